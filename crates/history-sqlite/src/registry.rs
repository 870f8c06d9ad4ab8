//! Name to identifier resolution. Names must already be normalized.

use crate::Store;
use rusqlite::{params, Connection, OptionalExtension};
use zonetrail_core::names::CanonicalIp;
use zonetrail_core::{AddressId, DomainId, EntityClass, NameServerId, QueryCtx, Result, ZoneId};

impl Store {
    pub async fn resolve_zone(&self, ctx: &QueryCtx, zone: &str) -> Result<Option<ZoneId>> {
        let zone = zone.to_owned();
        self.read(ctx, "registry.zone", move |c| lookup_id(c, "SELECT id FROM zones WHERE zone = ?1", &zone))
            .await
    }

    /// Resolves a domain to its id and the id of the zone it belongs to.
    pub async fn resolve_domain(&self, ctx: &QueryCtx, domain: &str) -> Result<Option<(DomainId, ZoneId)>> {
        let domain = domain.to_owned();
        self.read(ctx, "registry.domain", move |c| {
            c.query_row("SELECT id, zone_id FROM domains WHERE domain = ?1", params![domain], |r| {
                Ok((r.get(0)?, r.get(1)?))
            })
            .optional()
        })
        .await
    }

    pub async fn resolve_nameserver(&self, ctx: &QueryCtx, nameserver: &str) -> Result<Option<NameServerId>> {
        let nameserver = nameserver.to_owned();
        self.read(ctx, "registry.nameserver", move |c| {
            lookup_id(c, "SELECT id FROM nameservers WHERE domain = ?1", &nameserver)
        })
        .await
    }

    pub async fn resolve_address(&self, ctx: &QueryCtx, ip: &CanonicalIp) -> Result<Option<AddressId>> {
        let sql = format!("SELECT id FROM {} WHERE ip = ?1", address_table(ip));
        let text = ip.text();
        self.read(ctx, "registry.address", move |c| lookup_id(c, &sql, &text)).await
    }

    pub async fn zone_name(&self, ctx: &QueryCtx, id: ZoneId) -> Result<Option<String>> {
        self.read(ctx, "registry.zone_name", move |c| {
            c.query_row("SELECT zone FROM zones WHERE id = ?1", params![id], |r| r.get(0)).optional()
        })
        .await
    }

    /// Every entity class under which `name` (or `ip`) is known.
    pub async fn search(&self, ctx: &QueryCtx, name: &str, ip: Option<&CanonicalIp>) -> Result<Vec<EntityClass>> {
        let name = name.to_owned();
        let ip = ip.map(|ip| (format!("SELECT id FROM {} WHERE ip = ?1", address_table(ip)), ip.text()));
        self.read(ctx, "registry.search", move |c| {
            let mut found = Vec::new();
            let lookups = [
                (EntityClass::Zone, "SELECT id FROM zones WHERE zone = ?1"),
                (EntityClass::Domain, "SELECT id FROM domains WHERE domain = ?1"),
                (EntityClass::NameServer, "SELECT id FROM nameservers WHERE domain = ?1"),
            ];
            for (class, sql) in lookups {
                if lookup_id(c, sql, &name)?.is_some() {
                    found.push(class);
                }
            }
            if let Some((sql, text)) = ip {
                if lookup_id(c, &sql, &text)?.is_some() {
                    found.push(EntityClass::Address);
                }
            }
            Ok(found)
        })
        .await
    }
}

fn address_table(ip: &CanonicalIp) -> &'static str {
    crate::GlueTable::for_version(ip.version).addr_table
}

fn lookup_id(conn: &Connection, sql: &str, key: &str) -> rusqlite::Result<Option<i64>> {
    conn.prepare_cached(sql)?.query_row(params![key], |r| r.get(0)).optional()
}

#[cfg(test)]
mod tests {
    use crate::testutil::fixture;
    use zonetrail_core::names::parse_ip;
    use zonetrail_core::{EntityClass, QueryCtx};

    #[tokio::test]
    async fn resolves_known_names_and_reports_absence() {
        let (_dir, store, _rec) = fixture();
        let ctx = QueryCtx::background();

        let com = store.resolve_zone(&ctx, "COM").await.unwrap().unwrap();
        let (_, zone_id) = store.resolve_domain(&ctx, "EXAMPLE.COM").await.unwrap().unwrap();
        assert_eq!(zone_id, com);
        assert!(store.resolve_nameserver(&ctx, "NS1.EXAMPLE.NET").await.unwrap().is_some());
        assert!(store.resolve_domain(&ctx, "MISSING.COM").await.unwrap().is_none());

        let ip = parse_ip("192.0.2.1").unwrap();
        assert!(store.resolve_address(&ctx, &ip).await.unwrap().is_some());
        let v6 = parse_ip("2001:db8::1").unwrap();
        assert!(store.resolve_address(&ctx, &v6).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn search_lists_every_matching_class() {
        let (_dir, store, rec) = fixture();
        rec.zone("NS1.EXAMPLE.NET").unwrap();
        let ctx = QueryCtx::background();
        let found = store.search(&ctx, "NS1.EXAMPLE.NET", None).await.unwrap();
        assert_eq!(found, vec![EntityClass::Zone, EntityClass::NameServer]);
        assert!(store.search(&ctx, "NOPE", None).await.unwrap().is_empty());
    }
}

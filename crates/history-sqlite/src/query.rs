use crate::models::{window_at, SqlDate};
use crate::{GlueTable, Store};
use ipnet::IpNet;
use rusqlite::{params, OptionalExtension};
use serde::Serialize;
use time::Date;
use zonetrail_core::names::CanonicalIp;
use zonetrail_core::{DomainId, IpVersion, QueryCtx, Result, Validity, ZoneId};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DomainSample {
    pub domain: String,
    pub last_seen: Validity,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NameServerRank {
    pub nameserver: String,
    pub domains: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ActiveAddress {
    pub ip: String,
    pub version: IpVersion,
    pub nameserver: String,
    pub first_seen: Date,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ZoneShare {
    pub zone: String,
    pub nameservers: i64,
    pub percent: f64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct KnownAddress {
    pub ip: String,
    pub version: IpVersion,
    pub first_seen: Option<Date>,
    pub last_seen: Option<Validity>,
}

impl Store {
    pub async fn max_domain_id(&self, ctx: &QueryCtx) -> Result<Option<DomainId>> {
        self.read(ctx, "query.max_domain_id", |c| c.query_row("SELECT MAX(id) FROM domains", [], |r| r.get(0))).await
    }

    /// The domain's name if it has at least one open nameserver window.
    pub async fn active_domain(&self, ctx: &QueryCtx, id: DomainId) -> Result<Option<String>> {
        self.read(ctx, "query.active_domain", move |c| {
            c.prepare_cached(
                "SELECT d.domain FROM domains d WHERE d.id = ?1 \
                 AND EXISTS (SELECT 1 FROM domains_nameservers dn WHERE dn.domain_id = d.id AND dn.last_seen IS NULL)",
            )?
            .query_row(params![id], |r| r.get(0))
            .optional()
        })
        .await
    }

    /// Up to `limit` domains recently observed in a zone, with their latest validity.
    pub async fn sample_domains_in_zone(&self, ctx: &QueryCtx, zone: ZoneId, limit: usize) -> Result<Vec<DomainSample>> {
        let limit = limit as i64;
        self.read(ctx, "query.sample_domains", move |c| {
            let mut stmt = c.prepare_cached(
                "SELECT d.domain, CASE WHEN COUNT(*) > COUNT(dn.last_seen) THEN NULL ELSE MAX(dn.last_seen) END AS ls \
                 FROM domains_nameservers dn JOIN domains d ON d.id = dn.domain_id \
                 WHERE dn.zone_id = ?1 GROUP BY d.id ORDER BY ls IS NOT NULL, ls DESC, d.domain LIMIT ?2",
            )?;
            let rows = stmt.query_map(params![zone, limit], |r| {
                let last: Option<SqlDate> = r.get(1)?;
                Ok(DomainSample { domain: r.get(0)?, last_seen: Validity::from_last_seen(last.map(|d| d.0)) })
            })?;
            rows.collect()
        })
        .await
    }

    /// Nameservers ranked by number of open domain windows.
    pub async fn top_nameservers(&self, ctx: &QueryCtx, limit: usize) -> Result<Vec<NameServerRank>> {
        let limit = limit as i64;
        self.read(ctx, "query.top_nameservers", move |c| {
            let mut stmt = c.prepare_cached(
                "SELECT n.domain, COUNT(*) AS cnt FROM domains_nameservers dn JOIN nameservers n ON n.id = dn.nameserver_id \
                 WHERE dn.last_seen IS NULL GROUP BY n.id ORDER BY cnt DESC, n.domain LIMIT ?1",
            )?;
            let rows = stmt.query_map(params![limit], |r| Ok(NameServerRank { nameserver: r.get(0)?, domains: r.get(1)? }))?;
            rows.collect()
        })
        .await
    }

    /// Glue addresses whose window covers `day`, IPv4 first.
    pub async fn active_addresses(&self, ctx: &QueryCtx, day: Date, limit: usize) -> Result<Vec<ActiveAddress>> {
        let limit = limit as i64;
        self.read(ctx, "query.active_addresses", move |c| {
            let mut out = Vec::new();
            for glue in GlueTable::ALL {
                let sql = format!(
                    "SELECT a.ip, n.domain, g.first_seen, g.last_seen FROM {table} g \
                     JOIN {addr} a ON a.id = g.{col} JOIN nameservers n ON n.id = g.nameserver_id \
                     WHERE g.first_seen <= ?1 AND (g.last_seen IS NULL OR g.last_seen > ?1) \
                     ORDER BY a.ip_key, n.domain LIMIT ?2",
                    table = glue.table,
                    addr = glue.addr_table,
                    col = glue.addr_col,
                );
                let mut stmt = c.prepare_cached(&sql)?;
                let rows = stmt.query_map(params![SqlDate(day), limit], |r| {
                    let window = window_at(r, 2)?;
                    Ok(ActiveAddress { ip: r.get(0)?, version: glue.version, nameserver: r.get(1)?, first_seen: window.first_seen })
                })?;
                for row in rows {
                    out.push(row?);
                }
            }
            Ok(out)
        })
        .await
    }

    /// Share of an address's nameserver associations per glue zone.
    pub async fn address_zone_share(&self, ctx: &QueryCtx, ip: &CanonicalIp) -> Result<Vec<ZoneShare>> {
        let glue = GlueTable::for_version(ip.version);
        let sql = format!(
            "SELECT z.zone, COUNT(*) AS cnt FROM {table} g JOIN {addr} a ON a.id = g.{col} JOIN zones z ON z.id = g.zone_id \
             WHERE a.ip = ?1 GROUP BY z.id ORDER BY cnt DESC, z.zone",
            table = glue.table,
            addr = glue.addr_table,
            col = glue.addr_col,
        );
        let text = ip.text();
        self.read(ctx, "query.address_zone_share", move |c| {
            let mut stmt = c.prepare_cached(&sql)?;
            let counts: Vec<(String, i64)> =
                stmt.query_map(params![text], |r| Ok((r.get(0)?, r.get(1)?)))?.collect::<rusqlite::Result<_>>()?;
            let total: i64 = counts.iter().map(|(_, n)| n).sum();
            Ok(counts
                .into_iter()
                .map(|(zone, n)| ZoneShare { zone, nameservers: n, percent: percent(n, total) })
                .collect())
        })
        .await
    }

    /// Known addresses inside `net`, in address order, each with its glue lifetime.
    pub async fn addresses_in_prefix(&self, ctx: &QueryCtx, net: IpNet, limit: usize) -> Result<Vec<KnownAddress>> {
        let (version, low, high) = match net {
            IpNet::V4(n) => (IpVersion::V4, n.network().octets().to_vec(), n.broadcast().octets().to_vec()),
            IpNet::V6(n) => (IpVersion::V6, n.network().octets().to_vec(), n.broadcast().octets().to_vec()),
        };
        let glue = GlueTable::for_version(version);
        let sql = format!(
            "SELECT a.ip, MIN(g.first_seen), \
                    CASE WHEN COUNT(g.id) = 0 THEN NULL ELSE COUNT(g.id) - COUNT(g.last_seen) END, MAX(g.last_seen) \
             FROM {addr} a LEFT JOIN {table} g ON g.{col} = a.id \
             WHERE a.ip_key BETWEEN ?1 AND ?2 GROUP BY a.id ORDER BY a.ip_key LIMIT ?3",
            table = glue.table,
            addr = glue.addr_table,
            col = glue.addr_col,
        );
        let limit = limit as i64;
        self.read(ctx, "query.addresses_in_prefix", move |c| {
            let mut stmt = c.prepare_cached(&sql)?;
            let rows = stmt.query_map(params![low, high, limit], |r| {
                let first: Option<SqlDate> = r.get(1)?;
                let open: Option<i64> = r.get(2)?;
                let last: Option<SqlDate> = r.get(3)?;
                let last_seen = match (open, last) {
                    (None, _) => None,
                    (Some(n), _) if n > 0 => Some(Validity::Active),
                    (Some(_), last) => last.map(|d| Validity::ClosedAt(d.0)),
                };
                Ok(KnownAddress { ip: r.get(0)?, version, first_seen: first.map(|d| d.0), last_seen })
            })?;
            rows.collect()
        })
        .await
    }
}

fn percent(part: i64, total: i64) -> f64 {
    if total == 0 {
        0.0
    } else {
        part as f64 * 100.0 / total as f64
    }
}

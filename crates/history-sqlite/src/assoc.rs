//! Temporal association queries, generic over [`Relation`].

use crate::models::{window_at, SqlDate};
use crate::{Associated, CountStrategy, Lifetime, Relation, Store};
use rusqlite::{params, Connection, OptionalExtension};
use time::Date;
use zonetrail_core::{EntityRef, NameServerId, QueryCtx, Result, Validity};

impl Store {
    /// Peers of `id` whose window is open (`active`) or closed, capped at the page size.
    /// Archived rows come most recently closed first.
    pub async fn list_associated(&self, ctx: &QueryCtx, rel: Relation, id: i64, active: bool) -> Result<Vec<Associated>> {
        let filter = if active {
            "t.last_seen IS NULL ORDER BY p.{name}, t.first_seen"
        } else {
            "t.last_seen IS NOT NULL ORDER BY t.last_seen DESC, p.{name}, t.first_seen DESC"
        };
        let sql = format!(
            "SELECT p.id, p.{name}, t.first_seen, t.last_seen FROM {table} t JOIN {peer} p ON p.id = t.{peer_col} \
             WHERE t.{key} = ?1 AND {filter} LIMIT ?2",
            filter = filter.replace("{name}", rel.peer_name_col),
            name = rel.peer_name_col,
            table = rel.table,
            peer = rel.peer_table,
            peer_col = rel.peer_col,
            key = rel.key_col,
        );
        let limit = self.page_size() as i64;
        let op = if active { "assoc.list_active" } else { "assoc.list_archived" };
        self.read(ctx, op, move |c| {
            let mut stmt = c.prepare_cached(&sql)?;
            let rows = stmt.query_map(params![id, limit], |r| {
                Ok(Associated { peer: EntityRef::new(r.get(0)?, r.get::<_, String>(1)?), window: window_at(r, 2)? })
            })?;
            rows.collect()
        })
        .await
    }

    /// Number of open (or closed) windows for `id`, served from the count
    /// cache when the store is configured for it. The recorder drops an
    /// entity's cached row whenever one of its windows changes, so a cached
    /// answer is never older than that entity's last write.
    pub async fn count_associated(&self, ctx: &QueryCtx, rel: Relation, id: i64, active: bool) -> Result<i64> {
        let strategy = self.config().counts;
        self.read(ctx, "assoc.count", move |c| {
            if strategy == CountStrategy::Materialized {
                let cached: Option<(i64, i64)> = c
                    .prepare_cached("SELECT active, archived FROM association_counts WHERE relation = ?1 AND entity_id = ?2")?
                    .query_row(params![rel.name, id], |r| Ok((r.get(0)?, r.get(1)?)))
                    .optional()?;
                if let Some((on, off)) = cached {
                    return Ok(if active { on } else { off });
                }
            }
            live_count(c, rel, id, active)
        })
        .await
    }

    /// Earliest `first_seen` across every window of `id`.
    pub async fn first_seen(&self, ctx: &QueryCtx, rel: Relation, id: i64) -> Result<Option<Date>> {
        self.read(ctx, "assoc.first_seen", move |c| first_seen(c, rel, id)).await
    }

    /// `Active` while any window is open, else the latest close date. `None` without rows.
    pub async fn last_seen(&self, ctx: &QueryCtx, rel: Relation, id: i64) -> Result<Option<Validity>> {
        self.read(ctx, "assoc.last_seen", move |c| last_seen(c, rel, id)).await
    }

    pub async fn lifetime(&self, ctx: &QueryCtx, rel: Relation, id: i64) -> Result<Lifetime> {
        self.read(ctx, "assoc.lifetime", move |c| {
            Ok(Lifetime { first_seen: first_seen(c, rel, id)?, last_seen: last_seen(c, rel, id)? })
        })
        .await
    }

    /// The zone whose snapshot supplied this nameserver's glue, preferring IPv4 glue.
    pub async fn glue_zone(&self, ctx: &QueryCtx, nameserver: NameServerId) -> Result<Option<EntityRef>> {
        self.read(ctx, "assoc.glue_zone", move |c| {
            for glue in crate::GlueTable::ALL {
                let sql = format!(
                    "SELECT z.id, z.zone FROM {} g JOIN zones z ON z.id = g.zone_id \
                     WHERE g.nameserver_id = ?1 ORDER BY g.first_seen, g.id LIMIT 1",
                    glue.table
                );
                let zone = c
                    .prepare_cached(&sql)?
                    .query_row(params![nameserver], |r| Ok(EntityRef::new(r.get(0)?, r.get::<_, String>(1)?)))
                    .optional()?;
                if zone.is_some() {
                    return Ok(zone);
                }
            }
            Ok(None)
        })
        .await
    }
}

pub(crate) fn live_count(c: &Connection, rel: Relation, id: i64, active: bool) -> rusqlite::Result<i64> {
    let sql = format!(
        "SELECT COUNT(*) FROM {} WHERE {} = ?1 AND last_seen IS {}NULL",
        rel.table,
        rel.key_col,
        if active { "" } else { "NOT " }
    );
    c.prepare_cached(&sql)?.query_row(params![id], |r| r.get(0))
}

fn first_seen(c: &Connection, rel: Relation, id: i64) -> rusqlite::Result<Option<Date>> {
    let sql = format!("SELECT MIN(first_seen) FROM {} WHERE {} = ?1", rel.table, rel.key_col);
    let min: Option<SqlDate> = c.prepare_cached(&sql)?.query_row(params![id], |r| r.get(0))?;
    Ok(min.map(|d| d.0))
}

fn last_seen(c: &Connection, rel: Relation, id: i64) -> rusqlite::Result<Option<Validity>> {
    let sql = format!(
        "SELECT COUNT(*), COUNT(last_seen), MAX(last_seen) FROM {} WHERE {} = ?1",
        rel.table, rel.key_col
    );
    let (rows, closed, max): (i64, i64, Option<SqlDate>) =
        c.prepare_cached(&sql)?.query_row(params![id], |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)))?;
    Ok(match (rows, max) {
        (0, _) => None,
        _ if closed < rows => Some(Validity::Active),
        (_, Some(last)) => Some(Validity::ClosedAt(last.0)),
        (_, None) => None,
    })
}

#[cfg(test)]
mod tests {
    use crate::testutil::{d, fixture};
    use crate::{CountStrategy, Relation, Store, StoreConfig};
    use zonetrail_core::{QueryCtx, Validity};

    #[tokio::test]
    async fn archived_windows_come_most_recently_closed_first() {
        let (_dir, store, rec) = fixture();
        let dom = rec.domain("CHURN.COM", "COM").unwrap();
        let com = rec.zone("COM").unwrap();
        for (ns, first, last) in [("NS-A.NET", "2019-01-01", "2019-03-01"), ("NS-B.NET", "2019-02-01", "2019-09-01"), ("NS-C.NET", "2019-01-15", "2019-05-01")] {
            let ns = rec.nameserver(ns).unwrap();
            rec.open_window(Relation::DOMAIN_NAMESERVERS, dom, ns, com, d(first)).unwrap();
            rec.close_window(Relation::DOMAIN_NAMESERVERS, dom, ns, d(last)).unwrap();
        }
        let ctx = QueryCtx::background();
        let archived = store.list_associated(&ctx, Relation::DOMAIN_NAMESERVERS, dom, false).await.unwrap();
        let names: Vec<_> = archived.iter().map(|a| a.peer.name.as_str()).collect();
        assert_eq!(names, vec!["NS-B.NET", "NS-C.NET", "NS-A.NET"]);
        assert!(store.list_associated(&ctx, Relation::DOMAIN_NAMESERVERS, dom, true).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn lists_are_capped_at_page_size() {
        let dir = tempfile::tempdir().unwrap();
        let mut cfg = StoreConfig::new(dir.path().join("h.db"));
        cfg.page_size = 3;
        let rec = crate::Recorder::open(&cfg.path).unwrap();
        let store = Store::open(cfg).unwrap();
        let com = rec.zone("COM").unwrap();
        let ns = rec.nameserver("NS1.BIG.NET").unwrap();
        for i in 0..5 {
            let dom = rec.domain(&format!("D{i}.COM"), "COM").unwrap();
            rec.open_window(Relation::DOMAIN_NAMESERVERS, dom, ns, com, d("2020-01-01")).unwrap();
        }
        let ctx = QueryCtx::background();
        assert_eq!(store.list_associated(&ctx, Relation::NAMESERVER_DOMAINS, ns, true).await.unwrap().len(), 3);
        assert_eq!(store.count_associated(&ctx, Relation::NAMESERVER_DOMAINS, ns, true).await.unwrap(), 5);
    }

    #[tokio::test]
    async fn lifetime_of_entity_without_rows_is_none() {
        let (_dir, store, rec) = fixture();
        let lonely = rec.nameserver("NS.UNRESOLVED.ORG").unwrap();
        let ctx = QueryCtx::background();
        let life = store.lifetime(&ctx, Relation::NAMESERVER_A, lonely).await.unwrap();
        assert_eq!(life.first_seen, None);
        assert_eq!(life.last_seen, None);
        assert!(store.glue_zone(&ctx, lonely).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn last_seen_is_active_while_any_window_is_open() {
        let (_dir, store, rec) = fixture();
        let ctx = QueryCtx::background();
        let (dom, _) = store.resolve_domain(&ctx, "EXAMPLE.COM").await.unwrap().unwrap();
        let com = rec.zone("COM").unwrap();
        let old_ns = rec.nameserver("NS0.EXAMPLE.NET").unwrap();
        rec.open_window(Relation::DOMAIN_NAMESERVERS, dom, old_ns, com, d("2018-01-01")).unwrap();
        rec.close_window(Relation::DOMAIN_NAMESERVERS, dom, old_ns, d("2019-01-01")).unwrap();

        let life = store.lifetime(&ctx, Relation::DOMAIN_NAMESERVERS, dom).await.unwrap();
        assert_eq!(life.first_seen, Some(d("2018-01-01")));
        assert_eq!(life.last_seen, Some(Validity::Active));

        let ns1 = store.resolve_nameserver(&ctx, "NS1.EXAMPLE.NET").await.unwrap().unwrap();
        rec.close_window(Relation::DOMAIN_NAMESERVERS, dom, ns1, d("2021-06-01")).unwrap();
        let last = store.last_seen(&ctx, Relation::DOMAIN_NAMESERVERS, dom).await.unwrap();
        assert_eq!(last, Some(Validity::ClosedAt(d("2021-06-01"))));
    }

    #[tokio::test]
    async fn materialized_counts_match_live_counts() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("h.db");
        let rec = crate::Recorder::open(&path).unwrap();
        let com = rec.zone("COM").unwrap();
        let ns = rec.nameserver("NS1.EXAMPLE.NET").unwrap();
        for (name, closed) in [("A.COM", false), ("B.COM", true), ("C.COM", true)] {
            let dom = rec.domain(name, "COM").unwrap();
            rec.open_window(Relation::DOMAIN_NAMESERVERS, dom, ns, com, d("2020-01-01")).unwrap();
            if closed {
                rec.close_window(Relation::DOMAIN_NAMESERVERS, dom, ns, d("2020-02-01")).unwrap();
            }
        }
        let live = Store::open(StoreConfig::new(&path)).unwrap();
        let mut cfg = StoreConfig::new(&path);
        cfg.counts = CountStrategy::Materialized;
        let cached = Store::open(cfg).unwrap();
        let ctx = QueryCtx::background();

        // no cache rows yet: falls back to counting
        assert_eq!(cached.count_associated(&ctx, Relation::NAMESERVER_DOMAINS, ns, false).await.unwrap(), 2);

        rec.refresh_counts().unwrap();
        for active in [true, false] {
            assert_eq!(
                cached.count_associated(&ctx, Relation::NAMESERVER_DOMAINS, ns, active).await.unwrap(),
                live.count_associated(&ctx, Relation::NAMESERVER_DOMAINS, ns, active).await.unwrap(),
            );
        }

        // a write after the refresh must not leave the cache serving the old number
        let late = rec.domain("D.COM", "COM").unwrap();
        rec.open_window(Relation::DOMAIN_NAMESERVERS, late, ns, com, d("2020-03-01")).unwrap();
        let dom_b = rec.domain("B.COM", "COM").unwrap();
        rec.open_window(Relation::DOMAIN_NAMESERVERS, dom_b, ns, com, d("2020-03-01")).unwrap();
        for active in [true, false] {
            assert_eq!(
                cached.count_associated(&ctx, Relation::NAMESERVER_DOMAINS, ns, active).await.unwrap(),
                rec.count_live(Relation::NAMESERVER_DOMAINS, ns, active).unwrap(),
            );
        }
        assert_eq!(cached.count_associated(&ctx, Relation::NAMESERVER_DOMAINS, ns, true).await.unwrap(), 3);
        assert_eq!(cached.count_associated(&ctx, Relation::DOMAIN_NAMESERVERS, late, true).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn glue_zone_prefers_ipv4_glue() {
        let (_dir, store, _rec) = fixture();
        let ctx = QueryCtx::background();
        let ns1 = store.resolve_nameserver(&ctx, "NS1.EXAMPLE.NET").await.unwrap().unwrap();
        let zone = store.glue_zone(&ctx, ns1).await.unwrap().unwrap();
        assert_eq!(zone.name, "NET");
    }
}

//! Daily change feeds derived from association windows.
//!
//! For a day D an entity is
//! * new: it has a window opening on D that is still open after D, and no window
//!   covered the day before (a name coming back after a gap is new again);
//! * old: a window closed on D and no window of it is open on D;
//! * moved: a window closed on D in one zone, a window opened on D in another,
//!   and nothing keeps it in the old zone.
//!
//! The three sets are disjoint by construction. Nameserver feeds run once per
//! glue table so IPv4 and IPv6 changes are reported separately.

use history_sqlite::{SqlDate, Store};
use rusqlite::params;
use serde::Serialize;
use std::fmt;
use time::Date;
use tracing::debug;
use zonetrail_core::names::search_term;
use zonetrail_core::{IpVersion, QueryCtx, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeKind {
    New,
    Old,
    Moved,
}

impl ChangeKind {
    pub const ALL: [ChangeKind; 3] = [ChangeKind::New, ChangeKind::Old, ChangeKind::Moved];

    fn as_str(self) -> &'static str {
        match self {
            ChangeKind::New => "new",
            ChangeKind::Old => "old",
            ChangeKind::Moved => "moved",
        }
    }

    /// The window column whose date is the day of the change.
    fn anchor(self) -> &'static str {
        match self {
            ChangeKind::Old => "t.last_seen",
            ChangeKind::New | ChangeKind::Moved => "t.first_seen",
        }
    }
}

impl fmt::Display for ChangeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FeedClass {
    Domain,
    NameServer,
}

/// One association table viewed as the change history of its key entity.
#[derive(Debug, Clone, Copy)]
struct Source {
    table: &'static str,
    key: &'static str,
    entity: &'static str,
    version: Option<IpVersion>,
}

impl Source {
    const DOMAINS: Source = Source { table: "domains_nameservers", key: "domain_id", entity: "domains", version: None };
    const NAMESERVERS_V4: Source = Source { table: "a_nameservers", key: "nameserver_id", entity: "nameservers", version: Some(IpVersion::V4) };
    const NAMESERVERS_V6: Source = Source { table: "aaaa_nameservers", key: "nameserver_id", entity: "nameservers", version: Some(IpVersion::V6) };

    fn for_class(class: FeedClass) -> &'static [Source] {
        match class {
            FeedClass::Domain => &[Source::DOMAINS],
            FeedClass::NameServer => &[Source::NAMESERVERS_V4, Source::NAMESERVERS_V6],
        }
    }

    fn from_clause(&self, kind: ChangeKind) -> String {
        let mut sql = format!(
            "{table} t JOIN {entity} e ON e.id = t.{key} JOIN zones z ON z.id = t.zone_id",
            table = self.table,
            entity = self.entity,
            key = self.key
        );
        if kind == ChangeKind::Moved {
            sql.push_str(&format!(
                " JOIN {table} o ON o.{key} = t.{key} AND o.last_seen = t.first_seen \
                   AND o.first_seen < t.first_seen AND o.zone_id <> t.zone_id \
                 JOIN zones zo ON zo.id = o.zone_id",
                table = self.table,
                key = self.key
            ));
        }
        sql
    }

    /// Conditions that make a row of `t` a change of `kind` on its anchor day.
    fn condition(&self, kind: ChangeKind) -> String {
        let (table, key) = (self.table, self.key);
        match kind {
            ChangeKind::New => format!(
                "(t.last_seen IS NULL OR t.last_seen > t.first_seen) \
                 AND NOT EXISTS (SELECT 1 FROM {table} p WHERE p.{key} = t.{key} AND p.first_seen < t.first_seen \
                                 AND (p.last_seen IS NULL OR p.last_seen >= t.first_seen))"
            ),
            ChangeKind::Old => format!(
                "t.last_seen IS NOT NULL \
                 AND NOT EXISTS (SELECT 1 FROM {table} p WHERE p.{key} = t.{key} AND p.first_seen <= t.last_seen \
                                 AND (p.last_seen IS NULL OR p.last_seen > t.last_seen))"
            ),
            ChangeKind::Moved => format!(
                "(t.last_seen IS NULL OR t.last_seen > t.first_seen) \
                 AND NOT EXISTS (SELECT 1 FROM {table} s WHERE s.{key} = t.{key} AND s.zone_id = o.zone_id \
                                 AND s.first_seen <= t.first_seen AND (s.last_seen IS NULL OR s.last_seen > t.first_seen))"
            ),
        }
    }

    fn feed_sql(&self, kind: ChangeKind) -> String {
        let from_zone = if kind == ChangeKind::Moved { "MIN(zo.zone)" } else { "NULL" };
        format!(
            "SELECT e.domain, MIN(z.zone), {from_zone} FROM {from} WHERE {anchor} = ?1 AND {cond} \
             GROUP BY t.{key} ORDER BY e.domain LIMIT ?2",
            from = self.from_clause(kind),
            anchor = kind.anchor(),
            cond = self.condition(kind),
            key = self.key,
        )
    }

    fn search_sql(&self, kind: ChangeKind) -> String {
        format!(
            "SELECT {anchor} AS day, COUNT(DISTINCT t.{key}) FROM {from} WHERE instr(e.domain, ?1) > 0 AND {cond} \
             GROUP BY day ORDER BY day DESC LIMIT ?2",
            anchor = kind.anchor(),
            key = self.key,
            from = self.from_clause(kind),
            cond = self.condition(kind),
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FeedEntry {
    pub name: String,
    pub zone: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub from_zone: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Feed {
    pub date: Date,
    pub kind: ChangeKind,
    pub class: FeedClass,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<IpVersion>,
    pub entries: Vec<FeedEntry>,
    /// More entries exist than the cap allowed through.
    pub truncated: bool,
}

impl Feed {
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|e| e.name.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DayCount {
    pub date: Date,
    pub count: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SearchSeries {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<IpVersion>,
    pub days: Vec<DayCount>,
}

#[derive(Debug, Clone, Copy)]
pub struct FeedConfig {
    pub cap: usize,
    pub min_search_len: usize,
}

impl Default for FeedConfig {
    fn default() -> Self {
        FeedConfig { cap: 10_000, min_search_len: 4 }
    }
}

#[derive(Clone)]
pub struct FeedEngine {
    store: Store,
    config: FeedConfig,
}

impl FeedEngine {
    pub fn new(store: Store, config: FeedConfig) -> Self {
        FeedEngine { store, config }
    }

    /// Entities that changed by `kind` on `date`. Domains yield one feed,
    /// nameservers one per IP version.
    pub async fn feed(&self, ctx: &QueryCtx, date: Date, kind: ChangeKind, class: FeedClass) -> Result<Vec<Feed>> {
        let mut feeds = Vec::new();
        for src in Source::for_class(class) {
            let sql = src.feed_sql(kind);
            let fetch = self.config.cap as i64 + 1;
            let mut entries = self
                .store
                .read(ctx, "feed.list", move |c| {
                    let mut stmt = c.prepare_cached(&sql)?;
                    let rows = stmt.query_map(params![SqlDate(date), fetch], |r| {
                        Ok(FeedEntry { name: r.get(0)?, zone: r.get(1)?, from_zone: r.get(2)? })
                    })?;
                    rows.collect::<rusqlite::Result<Vec<_>>>()
                })
                .await?;
            let truncated = entries.len() > self.config.cap;
            entries.truncate(self.config.cap);
            debug!(%date, %kind, ?class, version = ?src.version, entries = entries.len(), truncated, "feed");
            feeds.push(Feed { date, kind, class, version: src.version, entries, truncated });
        }
        Ok(feeds)
    }

    /// Per-day counts of `kind` changes for entities whose name contains `term`.
    pub async fn feed_search(&self, ctx: &QueryCtx, kind: ChangeKind, class: FeedClass, term: &str) -> Result<Vec<SearchSeries>> {
        let term = search_term(term, self.config.min_search_len)?;
        let mut out = Vec::new();
        for src in Source::for_class(class) {
            let sql = src.search_sql(kind);
            let needle = term.clone();
            let limit = self.config.cap as i64;
            let days = self
                .store
                .read(ctx, "feed.search", move |c| {
                    let mut stmt = c.prepare_cached(&sql)?;
                    let rows = stmt.query_map(params![needle, limit], |r| {
                        Ok(DayCount { date: r.get::<_, SqlDate>(0)?.0, count: r.get(1)? })
                    })?;
                    rows.collect::<rusqlite::Result<Vec<_>>>()
                })
                .await?;
            out.push(SearchSeries { version: src.version, days });
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use history_sqlite::{Recorder, Relation, StoreConfig};
    use std::collections::HashSet;
    use zonetrail_core::date::parse_date;
    use zonetrail_core::HistoryError;

    fn d(s: &str) -> Date {
        parse_date(s).unwrap()
    }

    fn engine(cap: usize) -> (tempfile::TempDir, Recorder, FeedEngine) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("history.db");
        let rec = Recorder::open(&path).unwrap();
        let store = Store::open(StoreConfig::new(&path)).unwrap();
        (dir, rec, FeedEngine::new(store, FeedConfig { cap, min_search_len: 4 }))
    }

    fn domain_window(rec: &Recorder, domain: &str, zone: &str, ns: &str, first: &str, last: Option<&str>) {
        let zone_id = rec.zone(zone).unwrap();
        let dom = rec.domain(domain, zone).unwrap();
        let ns = rec.nameserver(ns).unwrap();
        rec.open_window(Relation::DOMAIN_NAMESERVERS, dom, ns, zone_id, d(first)).unwrap();
        if let Some(last) = last {
            rec.close_window(Relation::DOMAIN_NAMESERVERS, dom, ns, d(last)).unwrap();
        }
    }

    async fn names(engine: &FeedEngine, date: &str, kind: ChangeKind, class: FeedClass) -> Vec<Vec<String>> {
        let feeds = engine.feed(&QueryCtx::background(), d(date), kind, class).await.unwrap();
        feeds.iter().map(|f| f.names().map(str::to_owned).collect()).collect()
    }

    #[tokio::test]
    async fn new_domain_appears_only_on_its_first_day() {
        let (_dir, rec, engine) = engine(100);
        domain_window(&rec, "EXAMPLE.COM", "COM", "NS1.EXAMPLE.NET", "2020-01-01", None);
        assert_eq!(names(&engine, "2020-01-01", ChangeKind::New, FeedClass::Domain).await, vec![vec!["EXAMPLE.COM"]]);
        assert_eq!(names(&engine, "2020-01-02", ChangeKind::New, FeedClass::Domain).await, vec![Vec::<String>::new()]);
    }

    #[tokio::test]
    async fn registration_after_a_gap_is_new_again() {
        let (_dir, rec, engine) = engine(100);
        domain_window(&rec, "BACK.COM", "COM", "NS1.A.NET", "2015-01-01", Some("2016-01-01"));
        domain_window(&rec, "BACK.COM", "COM", "NS1.B.NET", "2020-01-01", None);
        assert_eq!(names(&engine, "2016-01-01", ChangeKind::Old, FeedClass::Domain).await, vec![vec!["BACK.COM"]]);
        assert_eq!(names(&engine, "2020-01-01", ChangeKind::New, FeedClass::Domain).await, vec![vec!["BACK.COM"]]);
        assert!(names(&engine, "2020-01-01", ChangeKind::Old, FeedClass::Domain).await[0].is_empty());
        assert!(names(&engine, "2020-01-01", ChangeKind::Moved, FeedClass::Domain).await[0].is_empty());

        let series = engine.feed_search(&QueryCtx::background(), ChangeKind::New, FeedClass::Domain, "back").await.unwrap();
        let days: Vec<_> = series[0].days.iter().map(|c| (c.date, c.count)).collect();
        assert_eq!(days, vec![(d("2020-01-01"), 1), (d("2015-01-01"), 1)]);
    }

    #[tokio::test]
    async fn nameserver_swap_is_neither_new_nor_old() {
        let (_dir, rec, engine) = engine(100);
        domain_window(&rec, "SWAP.COM", "COM", "NS1.A.NET", "2020-01-01", Some("2020-02-01"));
        domain_window(&rec, "SWAP.COM", "COM", "NS1.B.NET", "2020-02-01", None);
        domain_window(&rec, "GONE.COM", "COM", "NS1.A.NET", "2020-01-01", Some("2020-02-01"));
        assert!(names(&engine, "2020-02-01", ChangeKind::New, FeedClass::Domain).await[0].is_empty());
        assert_eq!(names(&engine, "2020-02-01", ChangeKind::Old, FeedClass::Domain).await, vec![vec!["GONE.COM"]]);
        assert!(names(&engine, "2020-02-01", ChangeKind::Moved, FeedClass::Domain).await[0].is_empty());
    }

    #[tokio::test]
    async fn new_old_and_moved_are_disjoint() {
        let (_dir, rec, engine) = engine(100);
        let day = "2021-03-01";
        domain_window(&rec, "FRESH.COM", "COM", "NS1.X.NET", day, None);
        domain_window(&rec, "DEAD.COM", "COM", "NS1.X.NET", "2020-01-01", Some(day));
        // same name observed under another zone's snapshot
        domain_window(&rec, "SHIFT.CO.UK", "UK", "NS1.X.NET", "2020-01-01", Some(day));
        domain_window(&rec, "SHIFT.CO.UK", "CO.UK", "NS1.X.NET", day, None);
        domain_window(&rec, "BLIP.COM", "COM", "NS1.X.NET", day, Some(day));

        let new: HashSet<_> = names(&engine, day, ChangeKind::New, FeedClass::Domain).await.remove(0).into_iter().collect();
        let old: HashSet<_> = names(&engine, day, ChangeKind::Old, FeedClass::Domain).await.remove(0).into_iter().collect();
        let moved: HashSet<_> = names(&engine, day, ChangeKind::Moved, FeedClass::Domain).await.remove(0).into_iter().collect();

        assert!(new.is_disjoint(&old));
        assert!(moved.is_disjoint(&new));
        assert!(moved.is_disjoint(&old));
        assert!(new.contains("FRESH.COM"));
        assert!(old.contains("DEAD.COM"));
        assert_eq!(moved, HashSet::from(["SHIFT.CO.UK".to_owned()]));

        let feeds = engine.feed(&QueryCtx::background(), d(day), ChangeKind::Moved, FeedClass::Domain).await.unwrap();
        let entry = &feeds[0].entries[0];
        assert_eq!((entry.zone.as_str(), entry.from_zone.as_deref()), ("CO.UK", Some("UK")));
    }

    #[tokio::test]
    async fn nameserver_feeds_are_split_by_ip_version() {
        let (_dir, rec, engine) = engine(100);
        let net = rec.zone("NET").unwrap();
        let ns = rec.nameserver("NS1.DUAL.NET").unwrap();
        let (v4, _) = rec.address("192.0.2.10").unwrap();
        let (v6, _) = rec.address("2001:db8::10").unwrap();
        rec.open_window(Relation::A_NAMESERVERS, v4, ns, net, d("2020-01-01")).unwrap();
        rec.open_window(Relation::AAAA_NAMESERVERS, v6, ns, net, d("2020-06-01")).unwrap();

        let feeds = engine.feed(&QueryCtx::background(), d("2020-06-01"), ChangeKind::New, FeedClass::NameServer).await.unwrap();
        assert_eq!(feeds.len(), 2);
        assert_eq!(feeds[0].version, Some(IpVersion::V4));
        assert!(feeds[0].entries.is_empty());
        assert_eq!(feeds[1].version, Some(IpVersion::V6));
        assert_eq!(feeds[1].names().collect::<Vec<_>>(), vec!["NS1.DUAL.NET"]);
    }

    #[tokio::test]
    async fn glue_moving_between_zones_is_moved_per_version() {
        let (_dir, rec, engine) = engine(100);
        let net = rec.zone("NET").unwrap();
        let org = rec.zone("ORG").unwrap();
        let ns = rec.nameserver("NS.MOVER.ORG").unwrap();
        let (a, _) = rec.address("192.0.2.77").unwrap();
        rec.open_window(Relation::A_NAMESERVERS, a, ns, net, d("2020-01-01")).unwrap();
        rec.close_window(Relation::A_NAMESERVERS, a, ns, d("2020-05-05")).unwrap();
        rec.open_window(Relation::A_NAMESERVERS, a, ns, org, d("2020-05-05")).unwrap();

        let feeds = engine.feed(&QueryCtx::background(), d("2020-05-05"), ChangeKind::Moved, FeedClass::NameServer).await.unwrap();
        assert_eq!(feeds[0].names().collect::<Vec<_>>(), vec!["NS.MOVER.ORG"]);
        assert!(feeds[1].entries.is_empty());
    }

    #[tokio::test]
    async fn feed_is_capped_and_flags_truncation() {
        let (_dir, rec, engine) = engine(2);
        for name in ["A.COM", "B.COM", "C.COM"] {
            domain_window(&rec, name, "COM", "NS1.X.NET", "2020-01-01", None);
        }
        let feeds = engine.feed(&QueryCtx::background(), d("2020-01-01"), ChangeKind::New, FeedClass::Domain).await.unwrap();
        assert_eq!(feeds[0].entries.len(), 2);
        assert!(feeds[0].truncated);
    }

    #[tokio::test]
    async fn search_counts_matches_per_day() {
        let (_dir, rec, engine) = engine(100);
        domain_window(&rec, "SHOPNOW.COM", "COM", "NS1.X.NET", "2020-01-01", None);
        domain_window(&rec, "MYSHOP.COM", "COM", "NS1.X.NET", "2020-01-01", None);
        domain_window(&rec, "SHOPPER.NET", "NET", "NS1.X.NET", "2020-01-03", None);
        domain_window(&rec, "OTHER.COM", "COM", "NS1.X.NET", "2020-01-03", None);

        let series = engine.feed_search(&QueryCtx::background(), ChangeKind::New, FeedClass::Domain, "shop").await.unwrap();
        assert_eq!(series.len(), 1);
        let days: Vec<_> = series[0].days.iter().map(|c| (c.date, c.count)).collect();
        assert_eq!(days, vec![(d("2020-01-03"), 1), (d("2020-01-01"), 2)]);
    }

    #[tokio::test]
    async fn short_search_term_is_rejected_before_querying() {
        let (_dir, _rec, engine) = engine(100);
        let err = engine.feed_search(&QueryCtx::background(), ChangeKind::Old, FeedClass::Domain, "ab").await.unwrap_err();
        assert!(matches!(err, HistoryError::Validation(_)));
    }

    #[tokio::test]
    async fn repeated_feed_calls_agree() {
        let (_dir, rec, engine) = engine(100);
        domain_window(&rec, "EXAMPLE.COM", "COM", "NS1.EXAMPLE.NET", "2020-01-01", None);
        domain_window(&rec, "OLD.COM", "COM", "NS1.EXAMPLE.NET", "2019-01-01", Some("2020-01-01"));
        let ctx = QueryCtx::background();
        for kind in ChangeKind::ALL {
            let a = engine.feed(&ctx, d("2020-01-01"), kind, FeedClass::Domain).await.unwrap();
            let b = engine.feed(&ctx, d("2020-01-01"), kind, FeedClass::Domain).await.unwrap();
            assert_eq!(a, b);
        }
    }
}

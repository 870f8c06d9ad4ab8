//! Where a name prefix is registered today, and where it is free.

use history_sqlite::{SqlDate, Store};
use rusqlite::params;
use serde::Serialize;
use time::Date;
use tracing::debug;
use zonetrail_core::names::normalize_label;
use zonetrail_core::{QueryCtx, Result};

/// Zones a prefix can be combined with: any zone with a completed import,
/// except the root and the reverse-lookup tree.
const ELIGIBLE_ZONES: &str = "SELECT z.id, z.zone FROM zones z \
     WHERE z.zone NOT IN ('', 'ARPA') \
       AND EXISTS (SELECT 1 FROM imports i WHERE i.zone_id = z.id AND i.imported = 1)";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Registered {
    pub domain: String,
    pub zone: String,
    pub first_seen: Date,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Available {
    pub domain: String,
    pub zone: String,
    /// Close of the latest past registration; absent when never registered.
    pub last_seen: Option<Date>,
}

#[derive(Clone)]
pub struct Availability {
    store: Store,
}

impl Availability {
    pub fn new(store: Store) -> Self {
        Availability { store }
    }

    /// `<prefix>.<zone>` names currently registered, oldest registration first.
    /// `first_seen` is the start of the current registration, not of any earlier one.
    pub async fn registered(&self, ctx: &QueryCtx, prefix: &str) -> Result<Vec<Registered>> {
        let label = normalize_label(prefix)?;
        let sql = format!(
            "WITH eligible AS ({ELIGIBLE_ZONES}) \
             SELECT d.domain, e.zone, MIN(dn.first_seen) AS first \
             FROM eligible e \
             JOIN domains d ON d.domain = ?1 || '.' || e.zone \
             JOIN domains_nameservers dn ON dn.domain_id = d.id AND dn.last_seen IS NULL \
             GROUP BY d.id ORDER BY first ASC, d.domain"
        );
        let rows = self
            .store
            .read(ctx, "availability.registered", move |c| {
                let mut stmt = c.prepare_cached(&sql)?;
                let rows = stmt.query_map(params![label], |r| {
                    Ok(Registered { domain: r.get(0)?, zone: r.get(1)?, first_seen: r.get::<_, SqlDate>(2)?.0 })
                })?;
                rows.collect::<rusqlite::Result<Vec<_>>>()
            })
            .await?;
        debug!(prefix, registered = rows.len(), "availability");
        Ok(rows)
    }

    /// `<prefix>.<zone>` names not registered today, shortest first, with the
    /// close of any earlier registration.
    pub async fn available(&self, ctx: &QueryCtx, prefix: &str) -> Result<Vec<Available>> {
        let label = normalize_label(prefix)?;
        let sql = format!(
            "WITH eligible AS ({ELIGIBLE_ZONES}) \
             SELECT ?1 || '.' || e.zone AS name, e.zone, \
                    (SELECT MAX(dn.last_seen) FROM domains d JOIN domains_nameservers dn ON dn.domain_id = d.id \
                     WHERE d.domain = ?1 || '.' || e.zone) \
             FROM eligible e \
             WHERE NOT EXISTS (SELECT 1 FROM domains d JOIN domains_nameservers dn ON dn.domain_id = d.id \
                               WHERE d.domain = ?1 || '.' || e.zone AND dn.last_seen IS NULL) \
             ORDER BY length(name), name"
        );
        let rows = self
            .store
            .read(ctx, "availability.available", move |c| {
                let mut stmt = c.prepare_cached(&sql)?;
                let rows = stmt.query_map(params![label], |r| {
                    let last: Option<SqlDate> = r.get(2)?;
                    Ok(Available { domain: r.get(0)?, zone: r.get(1)?, last_seen: last.map(|d| d.0) })
                })?;
                rows.collect::<rusqlite::Result<Vec<_>>>()
            })
            .await?;
        debug!(prefix, available = rows.len(), "availability");
        Ok(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use history_sqlite::{ImportTotals, Recorder, Relation, StoreConfig};
    use std::collections::BTreeSet;
    use zonetrail_core::date::parse_date;
    use zonetrail_core::HistoryError;

    fn d(s: &str) -> Date {
        parse_date(s).unwrap()
    }

    fn setup() -> (tempfile::TempDir, Recorder, Availability) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("history.db");
        let rec = Recorder::open(&path).unwrap();
        for zone in ["", "ARPA", "COM", "NET", "ORG", "SHOP"] {
            let id = rec.zone(zone).unwrap();
            rec.record_import(id, d("2021-01-01"), ImportTotals::default()).unwrap();
        }
        let ns = rec.nameserver("NS1.HOST.NET").unwrap();
        let reg = |name: &str, zone: &str, first: &str, last: Option<&str>| {
            let zone_id = rec.zone(zone).unwrap();
            let dom = rec.domain(name, zone).unwrap();
            rec.open_window(Relation::DOMAIN_NAMESERVERS, dom, ns, zone_id, d(first)).unwrap();
            if let Some(last) = last {
                rec.close_window(Relation::DOMAIN_NAMESERVERS, dom, ns, d(last)).unwrap();
            }
        };
        reg("EXAMPLE.NET", "NET", "2012-05-01", None);
        reg("EXAMPLE.COM", "COM", "1995-08-14", None);
        reg("EXAMPLE.ORG", "ORG", "2001-01-01", Some("2020-02-02"));
        let store = Store::open(StoreConfig::new(&path)).unwrap();
        (dir, rec, Availability::new(store))
    }

    #[tokio::test]
    async fn registered_names_come_oldest_first() {
        let (_dir, _rec, av) = setup();
        let got = av.registered(&QueryCtx::background(), "example").await.unwrap();
        let names: Vec<_> = got.iter().map(|r| r.domain.as_str()).collect();
        assert_eq!(names, vec!["EXAMPLE.COM", "EXAMPLE.NET"]);
        assert_eq!(got[0].first_seen, d("1995-08-14"));
    }

    #[tokio::test]
    async fn registered_since_dates_the_current_registration() {
        let (_dir, rec, av) = setup();
        let ns = rec.nameserver("NS2.HOST.NET").unwrap();
        let org = rec.zone("ORG").unwrap();
        let dom = rec.domain("EXAMPLE.ORG", "ORG").unwrap();
        rec.open_window(Relation::DOMAIN_NAMESERVERS, dom, ns, org, d("2020-06-01")).unwrap();

        let got = av.registered(&QueryCtx::background(), "example").await.unwrap();
        let rows: Vec<_> = got.iter().map(|r| (r.domain.as_str(), r.first_seen)).collect();
        assert_eq!(
            rows,
            vec![("EXAMPLE.COM", d("1995-08-14")), ("EXAMPLE.NET", d("2012-05-01")), ("EXAMPLE.ORG", d("2020-06-01"))]
        );
    }

    #[tokio::test]
    async fn available_names_carry_past_registrations() {
        let (_dir, _rec, av) = setup();
        let got = av.available(&QueryCtx::background(), "Example").await.unwrap();
        let names: Vec<_> = got.iter().map(|a| a.domain.as_str()).collect();
        assert_eq!(names, vec!["EXAMPLE.ORG", "EXAMPLE.SHOP"]);
        assert_eq!(got[0].last_seen, Some(d("2020-02-02")));
        // never registered is a normal answer, not an error
        assert_eq!(got[1].last_seen, None);
    }

    #[tokio::test]
    async fn registered_and_available_partition_eligible_zones() {
        let (_dir, _rec, av) = setup();
        let ctx = QueryCtx::background();
        let on: BTreeSet<_> = av.registered(&ctx, "example").await.unwrap().into_iter().map(|r| r.zone).collect();
        let off: BTreeSet<_> = av.available(&ctx, "example").await.unwrap().into_iter().map(|a| a.zone).collect();
        assert!(on.is_disjoint(&off));
        let all: BTreeSet<_> = on.union(&off).cloned().collect();
        let expected: BTreeSet<String> = ["COM", "NET", "ORG", "SHOP"].into_iter().map(String::from).collect();
        assert_eq!(all, expected);
    }

    #[tokio::test]
    async fn multi_label_prefix_is_rejected() {
        let (_dir, _rec, av) = setup();
        let err = av.available(&QueryCtx::background(), "foo.bar").await.unwrap_err();
        assert!(matches!(err, HistoryError::Validation(_)));
    }
}

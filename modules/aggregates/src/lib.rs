//! Time-bucketed history roll-ups and the zone graveyard.

use history_sqlite::{DailyCounts, SqlDate, Store};
use serde::Serialize;
use time::{Date, Duration};
use tracing::debug;
use zonetrail_core::date::{month_start, week_start};
use zonetrail_core::{QueryCtx, Result, ZoneId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Bucket {
    Week,
    Month,
}

impl Bucket {
    pub fn start_of(self, day: Date) -> Date {
        match self {
            Bucket::Week => week_start(day),
            Bucket::Month => month_start(day),
        }
    }
}

/// Which part of the dataset a history covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scope {
    All,
    Zone(ZoneId),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BucketCounts {
    pub start: Date,
    pub avg_domains: i64,
    pub old: i64,
    pub moved: i64,
    pub new: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ZoneHistory {
    pub zone: String,
    pub buckets: Vec<BucketCounts>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ZoneLifecycle {
    pub zone: String,
    pub created: Date,
    pub removed: Date,
    pub peak_domains: Option<i64>,
    pub age_days: i64,
}

impl ZoneLifecycle {
    pub fn age(&self) -> Duration {
        self.removed - self.created
    }
}

/// Groups newest-first daily rows into buckets, newest first, dropping nothing
/// but never inventing a bucket without data. Domain counts are averaged over
/// the days present, change volumes are summed.
pub fn roll_up(days: &[DailyCounts], bucket: Bucket, limit: usize) -> Vec<BucketCounts> {
    let mut out: Vec<(BucketCounts, i64, i64)> = Vec::new();
    for day in days {
        let start = bucket.start_of(day.date);
        match out.last_mut() {
            Some((b, total, n)) if b.start == start => {
                *total += day.domains;
                *n += 1;
                b.old += day.old;
                b.moved += day.moved;
                b.new += day.new;
            }
            _ => {
                if out.len() == limit {
                    break;
                }
                let b = BucketCounts { start, avg_domains: 0, old: day.old, moved: day.moved, new: day.new };
                out.push((b, day.domains, 1));
            }
        }
    }
    out.into_iter()
        .map(|(mut b, total, n)| {
            b.avg_domains = total / n;
            b
        })
        .collect()
}

#[derive(Clone)]
pub struct Aggregates {
    store: Store,
}

impl Aggregates {
    pub fn new(store: Store) -> Self {
        Aggregates { store }
    }

    /// Bucketed history for one zone or the whole dataset, most recent bucket first.
    pub async fn history(&self, ctx: &QueryCtx, scope: Scope, bucket: Bucket, limit: usize) -> Result<Vec<BucketCounts>> {
        let zone = match scope {
            Scope::All => None,
            Scope::Zone(id) => Some(id),
        };
        let days = self.store.daily_counts(ctx, zone).await?;
        let buckets = roll_up(&days, bucket, limit);
        debug!(?scope, ?bucket, days = days.len(), buckets = buckets.len(), "history");
        Ok(buckets)
    }

    /// Bucketed history of every zone with completed imports, by zone name.
    pub async fn history_by_zone(&self, ctx: &QueryCtx, bucket: Bucket, limit: usize) -> Result<Vec<ZoneHistory>> {
        let zones = self.store.daily_counts_by_zone(ctx).await?;
        Ok(zones
            .into_iter()
            .map(|(zone, days)| ZoneHistory { zone, buckets: roll_up(&days, bucket, limit) })
            .collect())
    }

    /// Zones seen in the past that have no open zone↔nameserver window today,
    /// most recently removed first.
    pub async fn zone_lifecycles(&self, ctx: &QueryCtx) -> Result<Vec<ZoneLifecycle>> {
        self.store
            .read(ctx, "aggregates.lifecycles", |c| {
                let mut stmt = c.prepare_cached(
                    "SELECT z.zone, MIN(zn.first_seen), MAX(zn.last_seen), \
                            (SELECT MAX(i.domains) FROM imports i WHERE i.zone_id = z.id AND i.imported = 1) \
                     FROM zones z JOIN zones_nameservers zn ON zn.zone_id = z.id \
                     WHERE NOT EXISTS (SELECT 1 FROM zones_nameservers a WHERE a.zone_id = z.id AND a.last_seen IS NULL) \
                     GROUP BY z.id \
                     ORDER BY MAX(zn.last_seen) DESC, MIN(zn.first_seen) ASC, z.zone",
                )?;
                let rows = stmt.query_map([], |r| {
                    let created = r.get::<_, SqlDate>(1)?.0;
                    let removed = r.get::<_, SqlDate>(2)?.0;
                    Ok(ZoneLifecycle {
                        zone: r.get(0)?,
                        created,
                        removed,
                        peak_domains: r.get(3)?,
                        age_days: (removed - created).whole_days(),
                    })
                })?;
                rows.collect()
            })
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use history_sqlite::{ImportTotals, Recorder, Relation, StoreConfig};
    use zonetrail_core::date::parse_date;

    fn d(s: &str) -> Date {
        parse_date(s).unwrap()
    }

    fn setup() -> (tempfile::TempDir, Recorder, Store) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("history.db");
        let rec = Recorder::open(&path).unwrap();
        let store = Store::open(StoreConfig::new(&path)).unwrap();
        (dir, rec, store)
    }

    fn day(date: &str, domains: i64, new: i64) -> DailyCounts {
        DailyCounts { date: d(date), domains, old: 1, moved: 0, new }
    }

    #[test]
    fn weekly_roll_up_averages_domains_and_sums_changes() {
        // 2020-01-06 is a Monday
        let days = [day("2020-01-14", 30, 3), day("2020-01-07", 21, 2), day("2020-01-06", 20, 1), day("2019-12-31", 10, 5)];
        let weeks = roll_up(&days, Bucket::Week, 10);
        assert_eq!(weeks.len(), 3);
        assert_eq!(weeks[0].start, d("2020-01-13"));
        assert_eq!((weeks[1].start, weeks[1].avg_domains, weeks[1].new, weeks[1].old), (d("2020-01-06"), 20, 3, 2));
        assert_eq!(weeks[2].start, d("2019-12-30"));
    }

    #[test]
    fn buckets_without_data_are_not_filled() {
        let days = [day("2020-05-02", 5, 0), day("2020-02-10", 4, 0)];
        let months = roll_up(&days, Bucket::Month, 10);
        assert_eq!(months.iter().map(|b| b.start).collect::<Vec<_>>(), vec![d("2020-05-01"), d("2020-02-01")]);
        assert_eq!(roll_up(&days, Bucket::Month, 1).len(), 1);
    }

    #[tokio::test]
    async fn dataset_history_ignores_partially_imported_days() {
        let (_dir, rec, store) = setup();
        let com = rec.zone("COM").unwrap();
        let net = rec.zone("NET").unwrap();
        let totals = |domains| ImportTotals { domains, feed_new: 1, ..Default::default() };
        rec.record_import(com, d("2020-03-02"), totals(100)).unwrap();
        rec.record_import(net, d("2020-03-02"), totals(50)).unwrap();
        rec.record_import(com, d("2020-03-09"), totals(110)).unwrap();
        rec.begin_import(net, d("2020-03-09")).unwrap();

        let agg = Aggregates::new(store);
        let ctx = QueryCtx::background();
        let all = agg.history(&ctx, Scope::All, Bucket::Week, 10).await.unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!((all[0].start, all[0].avg_domains, all[0].new), (d("2020-03-02"), 150, 2));

        let com_only = agg.history(&ctx, Scope::Zone(com), Bucket::Week, 10).await.unwrap();
        assert_eq!(com_only.iter().map(|b| b.avg_domains).collect::<Vec<_>>(), vec![110, 100]);

        let by_zone = agg.history_by_zone(&ctx, Bucket::Month, 12).await.unwrap();
        assert_eq!(by_zone.len(), 2);
        assert_eq!(by_zone[0].zone, "COM");
        assert_eq!(by_zone[0].buckets[0].avg_domains, 105);
    }

    #[tokio::test]
    async fn graveyard_lists_only_zones_without_open_windows() {
        let (_dir, rec, store) = setup();
        let dead = rec.zone("DEAD").unwrap();
        let live = rec.zone("LIVE").unwrap();
        let ns = rec.nameserver("A.ROOT-SERVERS.NET").unwrap();
        rec.open_window(Relation::ZONE_NAMESERVERS, dead, ns, dead, d("2015-01-01")).unwrap();
        rec.close_window(Relation::ZONE_NAMESERVERS, dead, ns, d("2019-06-01")).unwrap();
        rec.open_window(Relation::ZONE_NAMESERVERS, live, ns, live, d("2015-01-01")).unwrap();
        rec.record_import(dead, d("2018-01-01"), ImportTotals { domains: 42, ..Default::default() }).unwrap();

        let agg = Aggregates::new(store.clone());
        let ctx = QueryCtx::background();
        let graves = agg.zone_lifecycles(&ctx).await.unwrap();
        assert_eq!(graves.len(), 1);
        let g = &graves[0];
        assert_eq!(g.zone, "DEAD");
        assert_eq!(g.age(), d("2019-06-01") - d("2015-01-01"));
        assert_eq!(g.age_days, 1612);
        assert_eq!(g.peak_domains, Some(42));

        // eligibility matches the live count of active zone nameservers
        assert_eq!(store.count_associated(&ctx, Relation::ZONE_NAMESERVERS, dead, true).await.unwrap(), 0);
        assert_eq!(store.count_associated(&ctx, Relation::ZONE_NAMESERVERS, live, true).await.unwrap(), 1);
    }
}

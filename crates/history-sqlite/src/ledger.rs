//! Snapshot/import ledger reads.

use crate::models::SqlDate;
use crate::{DailyCounts, ImportBacklog, ImportDay, Store, ZoneImportSummary};
use rusqlite::{params, Connection, OptionalExtension};
use zonetrail_core::{QueryCtx, Result, ZoneId};

impl Store {
    /// Summary of completed runs for one zone; `None` before its first completed run.
    pub async fn zone_import(&self, ctx: &QueryCtx, zone: ZoneId) -> Result<Option<ZoneImportSummary>> {
        self.read(ctx, "ledger.zone_import", move |c| zone_summary(c, zone)).await
    }

    /// Summaries for every zone with at least one completed run, ordered by zone name.
    pub async fn zone_imports(&self, ctx: &QueryCtx) -> Result<Vec<ZoneImportSummary>> {
        self.read(ctx, "ledger.zone_imports", |c| {
            let ids: Vec<ZoneId> = c
                .prepare_cached(
                    "SELECT z.id FROM zones z WHERE EXISTS (SELECT 1 FROM imports i WHERE i.zone_id = z.id AND i.imported = 1) ORDER BY z.zone",
                )?
                .query_map([], |r| r.get(0))?
                .collect::<rusqlite::Result<_>>()?;
            let mut out = Vec::with_capacity(ids.len());
            for id in ids {
                if let Some(summary) = zone_summary(c, id)? {
                    out.push(summary);
                }
            }
            Ok(out)
        })
        .await
    }

    /// Summary for the root zone, the empty name.
    pub async fn root_import(&self, ctx: &QueryCtx) -> Result<Option<ZoneImportSummary>> {
        self.read(ctx, "ledger.root_import", |c| {
            let root: Option<ZoneId> = c
                .prepare_cached("SELECT id FROM zones WHERE zone = ''")?
                .query_row([], |r| r.get(0))
                .optional()?;
            match root {
                Some(id) => zone_summary(c, id),
                None => Ok(None),
            }
        })
        .await
    }

    /// Pending work plus per-date run totals for the latest `days` import dates.
    pub async fn import_backlog(&self, ctx: &QueryCtx, days: usize) -> Result<ImportBacklog> {
        let days = days as i64;
        self.read(ctx, "ledger.backlog", move |c| {
            let (pending_runs, pending_days): (i64, i64) = c.query_row(
                "SELECT COUNT(*), COUNT(DISTINCT date) FROM imports WHERE imported = 0",
                [],
                |r| Ok((r.get(0)?, r.get(1)?)),
            )?;
            let diff_backlog: i64 = c.query_row("SELECT COUNT(*) FROM imports WHERE imported = 1 AND diffed = 0", [], |r| r.get(0))?;
            let mut stmt = c.prepare_cached(
                "SELECT date, SUM(imported), SUM(1 - imported), COALESCE(SUM(diff_duration_ms), 0), COALESCE(SUM(import_duration_ms), 0) \
                 FROM imports GROUP BY date ORDER BY date DESC LIMIT ?1",
            )?;
            let days = stmt
                .query_map(params![days], |r| {
                    Ok(ImportDay {
                        date: r.get::<_, SqlDate>(0)?.0,
                        completed: r.get(1)?,
                        pending: r.get(2)?,
                        diff_ms: r.get(3)?,
                        import_ms: r.get(4)?,
                    })
                })?
                .collect::<rusqlite::Result<_>>()?;
            Ok(ImportBacklog { pending_runs, pending_days, diff_backlog, days })
        })
        .await
    }

    /// Completed-run totals per date, newest first. With no zone, totals are summed
    /// across zones and dates still holding an incomplete run are left out.
    pub async fn daily_counts(&self, ctx: &QueryCtx, zone: Option<ZoneId>) -> Result<Vec<DailyCounts>> {
        self.read(ctx, "ledger.daily_counts", move |c| match zone {
            Some(id) => {
                let mut stmt = c.prepare_cached(
                    "SELECT date, COALESCE(domains, 0), COALESCE(feed_old, 0), COALESCE(feed_moved, 0), COALESCE(feed_new, 0) \
                     FROM imports WHERE zone_id = ?1 AND imported = 1 ORDER BY date DESC",
                )?;
                let rows = stmt.query_map(params![id], daily_row)?;
                rows.collect()
            }
            None => {
                let mut stmt = c.prepare_cached(
                    "SELECT date, SUM(COALESCE(domains, 0)), SUM(COALESCE(feed_old, 0)), SUM(COALESCE(feed_moved, 0)), SUM(COALESCE(feed_new, 0)) \
                     FROM imports WHERE imported = 1 AND date NOT IN (SELECT date FROM imports WHERE imported = 0) \
                     GROUP BY date ORDER BY date DESC",
                )?;
                let rows = stmt.query_map([], daily_row)?;
                rows.collect()
            }
        })
        .await
    }

    /// Completed-run totals for every zone, grouped by zone name.
    pub async fn daily_counts_by_zone(&self, ctx: &QueryCtx) -> Result<Vec<(String, Vec<DailyCounts>)>> {
        self.read(ctx, "ledger.daily_counts_by_zone", |c| {
            let mut stmt = c.prepare_cached(
                "SELECT z.zone, i.date, COALESCE(i.domains, 0), COALESCE(i.feed_old, 0), COALESCE(i.feed_moved, 0), COALESCE(i.feed_new, 0) \
                 FROM imports i JOIN zones z ON z.id = i.zone_id WHERE i.imported = 1 ORDER BY z.zone, i.date DESC",
            )?;
            let mut rows = stmt.query([])?;
            let mut out: Vec<(String, Vec<DailyCounts>)> = Vec::new();
            while let Some(row) = rows.next()? {
                let zone: String = row.get(0)?;
                let day = DailyCounts {
                    date: row.get::<_, SqlDate>(1)?.0,
                    domains: row.get(2)?,
                    old: row.get(3)?,
                    moved: row.get(4)?,
                    new: row.get(5)?,
                };
                match out.last_mut() {
                    Some((z, days)) if *z == zone => days.push(day),
                    _ => out.push((zone, vec![day])),
                }
            }
            Ok(out)
        })
        .await
    }
}

fn daily_row(r: &rusqlite::Row<'_>) -> rusqlite::Result<DailyCounts> {
    Ok(DailyCounts {
        date: r.get::<_, SqlDate>(0)?.0,
        domains: r.get(1)?,
        old: r.get(2)?,
        moved: r.get(3)?,
        new: r.get(4)?,
    })
}

fn zone_summary(c: &Connection, zone: ZoneId) -> rusqlite::Result<Option<ZoneImportSummary>> {
    c.prepare_cached(
        "SELECT z.zone, f.id, f.date, l.id, l.date, l.domains, l.records, \
                (SELECT COUNT(*) FROM imports WHERE zone_id = ?1 AND imported = 1) \
         FROM zones z, \
              (SELECT id, date FROM imports WHERE zone_id = ?1 AND imported = 1 ORDER BY date ASC, id ASC LIMIT 1) f, \
              (SELECT id, date, domains, records FROM imports WHERE zone_id = ?1 AND imported = 1 ORDER BY date DESC, id DESC LIMIT 1) l \
         WHERE z.id = ?1",
    )?
    .query_row(params![zone], |r| {
        Ok(ZoneImportSummary {
            zone: r.get(0)?,
            first_import_id: r.get(1)?,
            first_import: r.get::<_, SqlDate>(2)?.0,
            last_import_id: r.get(3)?,
            last_import: r.get::<_, SqlDate>(4)?.0,
            domains: r.get(5)?,
            records: r.get(6)?,
            runs: r.get(7)?,
        })
    })
    .optional()
}

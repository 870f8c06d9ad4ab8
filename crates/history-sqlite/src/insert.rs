//! Append-only writer used by the importer. Reads never go through here.

use crate::models::SqlDate;
use crate::open::open_writer;
use crate::{assoc, ImportTotals, Relation};
use anyhow::{bail, Context, Result};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::time::Duration;
use time::Date;
use tracing::{debug, info};
use zonetrail_core::names::parse_ip;
use zonetrail_core::{AddressId, DomainId, ImportId, IpVersion, NameServerId, ZoneId};

pub struct Recorder {
    conn: Connection,
}

impl Recorder {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let conn = open_writer(path.as_ref(), Duration::from_secs(5))?;
        Ok(Recorder { conn })
    }

    pub fn zone(&self, zone: &str) -> Result<ZoneId> {
        self.conn.execute("INSERT INTO zones(zone) VALUES (?1) ON CONFLICT(zone) DO NOTHING", params![zone])?;
        let id = self.conn.query_row("SELECT id FROM zones WHERE zone = ?1", params![zone], |r| r.get(0))?;
        Ok(id)
    }

    /// Records a domain in `zone`; an existing domain is moved to `zone`.
    pub fn domain(&self, domain: &str, zone: &str) -> Result<DomainId> {
        let zone_id = self.zone(zone)?;
        self.conn.execute(
            "INSERT INTO domains(domain, zone_id) VALUES (?1, ?2) ON CONFLICT(domain) DO UPDATE SET zone_id = excluded.zone_id",
            params![domain, zone_id],
        )?;
        let id = self.conn.query_row("SELECT id FROM domains WHERE domain = ?1", params![domain], |r| r.get(0))?;
        Ok(id)
    }

    pub fn nameserver(&self, nameserver: &str) -> Result<NameServerId> {
        self.conn.execute(
            "INSERT INTO nameservers(domain) VALUES (?1) ON CONFLICT(domain) DO NOTHING",
            params![nameserver],
        )?;
        let id = self.conn.query_row("SELECT id FROM nameservers WHERE domain = ?1", params![nameserver], |r| r.get(0))?;
        Ok(id)
    }

    pub fn address(&self, ip: &str) -> Result<(AddressId, IpVersion)> {
        let ip = parse_ip(ip)?;
        let table = crate::GlueTable::for_version(ip.version).addr_table;
        let text = ip.text();
        self.conn.execute(
            &format!("INSERT INTO {table}(ip, ip_key) VALUES (?1, ?2) ON CONFLICT(ip) DO NOTHING"),
            params![text, ip.key()],
        )?;
        let id = self.conn.query_row(&format!("SELECT id FROM {table} WHERE ip = ?1"), params![text], |r| r.get(0))?;
        Ok((id, ip.version))
    }

    /// Opens a window between `key` and `peer` on `first_seen`. Fails if one is already open.
    /// `zone` is the zone whose snapshot observed the pair; the zone↔nameserver table
    /// carries it as its own key.
    pub fn open_window(&self, rel: Relation, key: i64, peer: i64, zone: ZoneId, first_seen: Date) -> Result<()> {
        let inserted = if rel.key_col == "zone_id" || rel.peer_col == "zone_id" {
            self.conn.execute(
                &format!("INSERT INTO {}({}, {}, first_seen) VALUES (?1, ?2, ?3)", rel.table, rel.key_col, rel.peer_col),
                params![key, peer, SqlDate(first_seen)],
            )
        } else {
            self.conn.execute(
                &format!("INSERT INTO {}({}, {}, zone_id, first_seen) VALUES (?1, ?2, ?3, ?4)", rel.table, rel.key_col, rel.peer_col),
                params![key, peer, zone, SqlDate(first_seen)],
            )
        };
        inserted.with_context(|| format!("opening {} window {key}->{peer} on {first_seen}", rel.name))?;
        self.invalidate_counts(rel, key, peer)?;
        debug!(relation = rel.name, key, peer, %first_seen, "window opened");
        Ok(())
    }

    /// Closes the open window between `key` and `peer` on `last_seen`.
    pub fn close_window(&self, rel: Relation, key: i64, peer: i64, last_seen: Date) -> Result<()> {
        let open: Option<(i64, SqlDate)> = self
            .conn
            .query_row(
                &format!(
                    "SELECT id, first_seen FROM {} WHERE {} = ?1 AND {} = ?2 AND last_seen IS NULL",
                    rel.table, rel.key_col, rel.peer_col
                ),
                params![key, peer],
                |r| Ok((r.get(0)?, r.get(1)?)),
            )
            .optional()?;
        let Some((id, first)) = open else {
            bail!("no open {} window {key}->{peer}", rel.name);
        };
        if last_seen < first.0 {
            bail!("{} window {key}->{peer} cannot close on {last_seen}, it opened on {}", rel.name, first.0);
        }
        self.conn.execute(
            &format!("UPDATE {} SET last_seen = ?1 WHERE id = ?2", rel.table),
            params![SqlDate(last_seen), id],
        )?;
        self.invalidate_counts(rel, key, peer)?;
        debug!(relation = rel.name, key, peer, %last_seen, "window closed");
        Ok(())
    }

    pub fn begin_import(&self, zone: ZoneId, date: Date) -> Result<ImportId> {
        self.conn.execute("INSERT INTO imports(zone_id, date) VALUES (?1, ?2)", params![zone, SqlDate(date)])?;
        Ok(self.conn.last_insert_rowid())
    }

    /// Marks a run complete; a run with a diff duration counts as diffed.
    pub fn finish_import(&self, import: ImportId, totals: ImportTotals) -> Result<()> {
        let changed = self.conn.execute(
            "UPDATE imports SET imported = 1, diffed = ?2, domains = ?3, records = ?4, feed_old = ?5, feed_moved = ?6, feed_new = ?7, \
             diff_duration_ms = ?8, import_duration_ms = ?9 WHERE id = ?1",
            params![
                import,
                totals.diff_duration_ms.is_some() as i64,
                totals.domains,
                totals.records,
                totals.feed_old,
                totals.feed_moved,
                totals.feed_new,
                totals.diff_duration_ms,
                totals.import_duration_ms
            ],
        )?;
        if changed == 0 {
            bail!("no import run {import}");
        }
        Ok(())
    }

    pub fn record_import(&self, zone: ZoneId, date: Date, totals: ImportTotals) -> Result<ImportId> {
        let id = self.begin_import(zone, date)?;
        self.finish_import(id, totals)?;
        Ok(id)
    }

    /// Rebuilds the association count cache from the association tables.
    pub fn refresh_counts(&self) -> Result<()> {
        let tx = self.conn.unchecked_transaction()?;
        tx.execute("DELETE FROM association_counts", [])?;
        for rel in Relation::ALL {
            tx.execute(
                &format!(
                    "INSERT INTO association_counts(relation, entity_id, active, archived) \
                     SELECT ?1, {key}, COUNT(*) - COUNT(last_seen), COUNT(last_seen) FROM {table} GROUP BY {key}",
                    key = rel.key_col,
                    table = rel.table
                ),
                params![rel.name],
            )?;
        }
        tx.commit()?;
        info!("association count cache refreshed");
        Ok(())
    }

    /// Drops cached counts for both ends of a changed pair so readers fall back
    /// to live counts until the next refresh.
    fn invalidate_counts(&self, rel: Relation, key: i64, peer: i64) -> Result<()> {
        self.conn.execute(
            "DELETE FROM association_counts WHERE (relation = ?1 AND entity_id = ?2) OR (relation = ?3 AND entity_id = ?4)",
            params![rel.name, key, rel.reverse().name, peer],
        )?;
        Ok(())
    }

    /// Live count, bypassing any cache. Used to check the cache after a refresh.
    pub fn count_live(&self, rel: Relation, id: i64, active: bool) -> Result<i64> {
        Ok(assoc::live_count(&self.conn, rel, id, active)?)
    }
}

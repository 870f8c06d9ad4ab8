use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, Type, ValueRef};
use rusqlite::Row;
use serde::Serialize;
use time::Date;
use zonetrail_core::date::{format_date, parse_date};
use zonetrail_core::{EntityRef, ImportId, Validity, Window};

/// A calendar date as stored: ISO `YYYY-MM-DD` text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct SqlDate(pub Date);

impl ToSql for SqlDate {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(format_date(self.0)))
    }
}

impl FromSql for SqlDate {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        let text = value.as_str()?;
        parse_date(text).map(SqlDate).map_err(|e| FromSqlError::Other(Box::new(e)))
    }
}

/// Reads a `(first_seen, last_seen)` column pair as a window.
pub(crate) fn window_at(row: &Row<'_>, first: usize) -> rusqlite::Result<Window> {
    let first_seen: SqlDate = row.get(first)?;
    let last_seen: Option<SqlDate> = row.get(first + 1)?;
    Window::new(first_seen.0, last_seen.map(|d| d.0))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(first + 1, Type::Text, Box::new(e)))
}

/// One association as seen from the queried entity: who the peer is and when.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Associated {
    #[serde(flatten)]
    pub peer: EntityRef,
    #[serde(flatten)]
    pub window: Window,
}

/// Overall observed lifetime of an entity within one relation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct Lifetime {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub first_seen: Option<Date>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_seen: Option<Validity>,
}

impl Lifetime {
    /// Lifetime across two relations: the earlier start, and active if either side is.
    pub fn merge(self, other: Lifetime) -> Lifetime {
        let first_seen = match (self.first_seen, other.first_seen) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        };
        let last_seen = match (self.last_seen, other.last_seen) {
            (Some(Validity::Active), _) | (_, Some(Validity::Active)) => Some(Validity::Active),
            (Some(Validity::ClosedAt(a)), Some(Validity::ClosedAt(b))) => Some(Validity::ClosedAt(a.max(b))),
            (a, b) => a.or(b),
        };
        Lifetime { first_seen, last_seen }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ZoneImportSummary {
    pub zone: String,
    pub first_import: Date,
    #[serde(skip)]
    pub first_import_id: ImportId,
    pub last_import: Date,
    #[serde(skip)]
    pub last_import_id: ImportId,
    pub runs: i64,
    pub domains: Option<i64>,
    pub records: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ImportDay {
    pub date: Date,
    pub completed: i64,
    pub pending: i64,
    pub diff_ms: i64,
    pub import_ms: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ImportBacklog {
    pub pending_runs: i64,
    pub pending_days: i64,
    pub diff_backlog: i64,
    pub days: Vec<ImportDay>,
}

/// Per-day ledger totals feeding the history roll-ups.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DailyCounts {
    pub date: Date,
    pub domains: i64,
    pub old: i64,
    pub moved: i64,
    pub new: i64,
}

/// Values written when an import run completes.
#[derive(Debug, Clone, Copy, Default)]
pub struct ImportTotals {
    pub domains: i64,
    pub records: i64,
    pub feed_old: i64,
    pub feed_moved: i64,
    pub feed_new: i64,
    pub diff_duration_ms: Option<i64>,
    pub import_duration_ms: Option<i64>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::d;

    #[test]
    fn merged_lifetime_spans_both_sides() {
        let glue = Lifetime { first_seen: Some(d("2018-01-01")), last_seen: Some(Validity::Active) };
        let domains = Lifetime { first_seen: Some(d("2019-01-01")), last_seen: Some(Validity::ClosedAt(d("2020-01-01"))) };
        let merged = domains.merge(glue);
        assert_eq!(merged.first_seen, Some(d("2018-01-01")));
        assert_eq!(merged.last_seen, Some(Validity::Active));

        let closed = Lifetime { first_seen: Some(d("2010-01-01")), last_seen: Some(Validity::ClosedAt(d("2011-01-01"))) };
        assert_eq!(closed.merge(domains).last_seen, Some(Validity::ClosedAt(d("2020-01-01"))));
        assert_eq!(Lifetime::default().merge(Lifetime::default()), Lifetime::default());
        assert_eq!(Lifetime::default().merge(closed), closed);
    }
}

//! Validity windows of association records.

use crate::{HistoryError, Result};
use serde::Serialize;
use time::{Date, Duration};

/// Whether an association is still observed, or the day it stopped being true.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Validity {
    Active,
    ClosedAt(Date),
}

impl Validity {
    pub fn from_last_seen(last_seen: Option<Date>) -> Self {
        match last_seen {
            None => Validity::Active,
            Some(d) => Validity::ClosedAt(d),
        }
    }

    pub fn is_active(&self) -> bool {
        matches!(self, Validity::Active)
    }

    pub fn closed_at(&self) -> Option<Date> {
        match self {
            Validity::Active => None,
            Validity::ClosedAt(d) => Some(*d),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct Window {
    pub first_seen: Date,
    #[serde(rename = "last_seen")]
    pub validity: Validity,
}

impl Window {
    /// Builds a window, rejecting a close date earlier than the open date.
    pub fn new(first_seen: Date, last_seen: Option<Date>) -> Result<Self> {
        if let Some(last) = last_seen {
            if last < first_seen {
                return Err(HistoryError::Fatal(format!(
                    "window closes ({last}) before it opens ({first_seen})"
                )));
            }
        }
        Ok(Window { first_seen, validity: Validity::from_last_seen(last_seen) })
    }

    pub fn is_active(&self) -> bool {
        self.validity.is_active()
    }

    /// True on every day from `first_seen` up to, not including, the close date.
    pub fn covers(&self, day: Date) -> bool {
        match self.validity {
            Validity::Active => self.first_seen <= day,
            Validity::ClosedAt(last) => self.first_seen <= day && day < last,
        }
    }

    /// Length of a closed window; `None` while it is still open.
    pub fn span(&self) -> Option<Duration> {
        self.validity.closed_at().map(|last| last - self.first_seen)
    }
}

//! SQLite-backed history store: entity registry, temporal associations and
//! the import ledger, read through a bounded, cancellable connection pool.

mod assoc;
mod insert;
mod ledger;
mod models;
mod open;
mod query;
mod registry;
mod relation;
mod schema;

pub use insert::Recorder;
pub use models::*;
pub use open::{CountStrategy, Store, StoreConfig};
pub use query::*;
pub use relation::{GlueTable, Relation};

use crate::schema::MIG_0001_INIT;
use rusqlite::{Connection, ErrorCode};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::{debug, error, info, warn};
use zonetrail_core::{HistoryError, QueryCtx, Result, TransientKind};

/// How `count_associated` is answered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CountStrategy {
    /// Always count association rows.
    #[default]
    Live,
    /// Read `association_counts` first, counting live when an entity has no cached row.
    Materialized,
}

#[derive(Debug, Clone)]
pub struct StoreConfig {
    pub path: PathBuf,
    pub pool_size: usize,
    pub acquire_timeout: Duration,
    pub statement_timeout: Duration,
    pub busy_timeout: Duration,
    pub counts: CountStrategy,
    pub page_size: usize,
}

impl StoreConfig {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        StoreConfig {
            path: path.into(),
            pool_size: 4,
            acquire_timeout: Duration::from_millis(2000),
            statement_timeout: Duration::from_millis(30_000),
            busy_timeout: Duration::from_millis(5000),
            counts: CountStrategy::Live,
            page_size: 100,
        }
    }
}

/// Read-only handle over the history database. Cheap to clone.
#[derive(Clone)]
pub struct Store {
    pool: Arc<Pool>,
    config: Arc<StoreConfig>,
}

impl Store {
    /// Opens (creating and migrating if needed) the database and fills the read pool.
    pub fn open(config: StoreConfig) -> anyhow::Result<Self> {
        let writer = open_writer(&config.path, config.busy_timeout)?;
        drop(writer);

        let size = config.pool_size.max(1);
        let mut idle = Vec::with_capacity(size);
        for _ in 0..size {
            let conn = Connection::open(&config.path)?;
            conn.busy_timeout(config.busy_timeout)?;
            conn.pragma_update(None, "query_only", &"ON")?;
            idle.push(Pooled::new(conn));
        }
        info!(path = %config.path.display(), pool_size = size, counts = ?config.counts, "history store opened");
        let pool = Pool {
            idle: Mutex::new(idle),
            permits: Arc::new(Semaphore::new(size)),
            acquire_timeout: config.acquire_timeout,
        };
        Ok(Store { pool: Arc::new(pool), config: Arc::new(config) })
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    pub fn page_size(&self) -> usize {
        self.config.page_size
    }

    /// Runs `f` on a pooled read connection.
    ///
    /// The query is raced against the caller's cancellation and against the
    /// earlier of its deadline and the statement timeout. When either fires the
    /// running statement is interrupted, any statement `f` starts afterwards
    /// fails as interrupted too, the connection is returned to the pool and a
    /// transient error is reported.
    pub async fn read<T, F>(&self, ctx: &QueryCtx, op: &'static str, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> rusqlite::Result<T> + Send + 'static,
    {
        if ctx.is_cancelled() {
            return Err(HistoryError::transient(TransientKind::Cancelled, op));
        }
        let started = Instant::now();
        let deadline = ctx.statement_deadline(self.config.statement_timeout);
        let checkout = Pool::acquire(&self.pool, ctx, deadline, op).await?;
        let interrupt = checkout.connection().map_err(|e| classify(op, e))?.get_interrupt_handle();
        let abort = checkout.abort_flag();

        let mut task = tokio::task::spawn_blocking(move || {
            let conn = checkout.connection()?;
            f(conn)
        });

        let sleep = tokio::time::sleep_until(deadline);
        tokio::pin!(sleep);
        let aborted = tokio::select! {
            joined = &mut task => {
                let outcome = joined
                    .map_err(|e| HistoryError::Fatal(format!("{op}: query worker failed: {e}")))
                    .and_then(|r| r.map_err(|e| classify(op, e)));
                debug!(op, elapsed_ms = started.elapsed().as_millis() as u64, ok = outcome.is_ok(), "query");
                return outcome;
            }
            _ = ctx.cancelled() => TransientKind::Cancelled,
            _ = &mut sleep => TransientKind::Timeout,
        };

        abort.store(true, Ordering::Relaxed);
        interrupt.interrupt();
        // the worker owns the checkout; wait for it so the connection is back before returning
        let _ = task.await;
        warn!(op, kind = %aborted, elapsed_ms = started.elapsed().as_millis() as u64, "query aborted");
        Err(HistoryError::transient(aborted, op))
    }
}

/// Statements run this many VM steps between checks of the abort flag.
const ABORT_CHECK_OPS: i32 = 1000;

/// A read connection plus the flag its progress handler polls. `sqlite3_interrupt`
/// only reaches statements already running; the flag also stops the ones a
/// multi-statement closure starts later.
struct Pooled {
    conn: Connection,
    abort: Arc<AtomicBool>,
}

impl Pooled {
    fn new(conn: Connection) -> Self {
        let abort = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&abort);
        conn.progress_handler(ABORT_CHECK_OPS, Some(move || flag.load(Ordering::Relaxed)));
        Pooled { conn, abort }
    }
}

struct Pool {
    idle: Mutex<Vec<Pooled>>,
    permits: Arc<Semaphore>,
    acquire_timeout: Duration,
}

impl Pool {
    async fn acquire(pool: &Arc<Pool>, ctx: &QueryCtx, deadline: tokio::time::Instant, op: &'static str) -> Result<Checkout> {
        let wait = tokio::time::timeout(pool.acquire_timeout, pool.permits.clone().acquire_owned());
        let permit = tokio::select! {
            acquired = wait => match acquired {
                Ok(Ok(permit)) => permit,
                Ok(Err(_)) => return Err(HistoryError::Fatal("connection pool closed".into())),
                Err(_) => {
                    warn!(op, "no pooled connection within acquire timeout");
                    return Err(HistoryError::transient(TransientKind::PoolExhausted, op));
                }
            },
            _ = ctx.cancelled() => return Err(HistoryError::transient(TransientKind::Cancelled, op)),
            _ = tokio::time::sleep_until(deadline) => return Err(HistoryError::transient(TransientKind::Timeout, op)),
        };
        let conn = pool.idle.lock().unwrap_or_else(|p| p.into_inner()).pop();
        match conn {
            Some(conn) => {
                conn.abort.store(false, Ordering::Relaxed);
                Ok(Checkout { conn: Some(conn), pool: Arc::clone(pool), _permit: permit })
            }
            None => Err(HistoryError::Fatal("connection pool has a free permit but no idle connection".into())),
        }
    }
}

/// A connection on loan from the pool; handed back on drop.
struct Checkout {
    conn: Option<Pooled>,
    pool: Arc<Pool>,
    _permit: OwnedSemaphorePermit,
}

impl Checkout {
    fn connection(&self) -> rusqlite::Result<&Connection> {
        self.conn.as_ref().map(|p| &p.conn).ok_or(rusqlite::Error::InvalidQuery)
    }

    fn abort_flag(&self) -> Arc<AtomicBool> {
        self.conn.as_ref().map_or_else(|| Arc::new(AtomicBool::new(true)), |p| Arc::clone(&p.abort))
    }
}

impl Drop for Checkout {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            self.pool.idle.lock().unwrap_or_else(|p| p.into_inner()).push(conn);
        }
    }
}

/// Maps a SQLite failure onto the error taxonomy.
pub(crate) fn classify(op: &'static str, err: rusqlite::Error) -> HistoryError {
    match err.sqlite_error_code() {
        Some(ErrorCode::OperationInterrupted) => HistoryError::transient(TransientKind::Timeout, op),
        Some(ErrorCode::DatabaseBusy) | Some(ErrorCode::DatabaseLocked) => {
            warn!(op, error = %err, "database busy");
            HistoryError::transient(TransientKind::Busy, format!("{op}: {err}"))
        }
        _ => {
            error!(op, error = %err, "query failed");
            HistoryError::Fatal(format!("{op}: {err}"))
        }
    }
}

pub(crate) fn open_writer(path: &Path, busy_timeout: Duration) -> anyhow::Result<Connection> {
    let conn = Connection::open(path)?;
    conn.busy_timeout(busy_timeout)?;
    apply_pragmas(&conn)?;
    migrate(&conn)?;
    Ok(conn)
}

fn apply_pragmas(conn: &Connection) -> anyhow::Result<()> {
    conn.pragma_update(None, "journal_mode", &"WAL")?;
    conn.pragma_update(None, "synchronous", &"NORMAL")?;
    conn.pragma_update(None, "foreign_keys", &"ON")?;
    conn.pragma_update(None, "mmap_size", &268435456i64)?; // 256 MiB
    Ok(())
}

fn migrate(conn: &Connection) -> anyhow::Result<()> {
    let exists: i64 = conn.query_row(
        "SELECT COUNT(1) FROM sqlite_master WHERE type='table' AND name='zones'",
        [],
        |r| r.get(0),
    )?;
    if exists == 0 {
        info!("applying schema migration 0001");
        conn.execute_batch(MIG_0001_INIT)?;
    }
    Ok(())
}

//! Database handle with lifecycle, statement cache, maintenance and close
//! listeners.
//!
//! A [`DbHandle`] owns exactly one physical connection (run on a background
//! thread by tokio-rusqlite). Clones share the connection and all of its
//! bookkeeping. The handle moves through three states: new, open and closed.
//! A closed handle cannot be reopened; create a new one instead.

pub mod engine;
pub mod migrations;
pub mod sqlite;
pub mod stats;

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::pin::{Pin, pin};
use std::sync::atomic::{AtomicBool, AtomicU8, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard, Weak};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_rusqlite::Connection;
use tokio_rusqlite::rusqlite::{self, CachedStatement, InterruptHandle};
use tokio_util::sync::CancellationToken;

use crate::Error;

pub use engine::{AfterOpen, BeforeMigrate, DataSource, DsnOptions, Engine, Observable};
pub use migrations::{Migration, MigrationStatus};
pub use sqlite::{SqliteConfig, SqliteEngine};
pub use stats::{DbStats, PoolStats};

/// Shortest interval accepted by [`DbHandle::maintenance`].
pub const MIN_MAINTENANCE_INTERVAL: Duration = Duration::from_secs(60);

/// Maximum number of close listeners per handle.
pub const MAX_CLOSE_LISTENERS: usize = 8;

/// Capacity of the connection's prepared statement cache.
const PREPARED_STATEMENT_CAPACITY: usize = 64;

type BoxFuture<T> = Pin<Box<dyn Future<Output = T> + Send + 'static>>;
type CloseListener = Box<dyn FnOnce() -> BoxFuture<Result<(), Error>> + Send>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
enum State {
    New = 0,
    Open = 1,
    Closed = 2,
}

impl State {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => State::New,
            1 => State::Open,
            _ => State::Closed,
        }
    }
}

#[derive(Default)]
struct Listeners {
    closing: bool,
    callbacks: Vec<CloseListener>,
}

struct Inner {
    engine: Arc<dyn Engine>,
    state: AtomicU8,
    lifecycle: tokio::sync::Mutex<()>,
    conn: RwLock<Option<Connection>>,
    interrupt: Mutex<Option<Arc<InterruptHandle>>>,
    statements: RwLock<HashMap<&'static str, Arc<str>>>,
    done: CancellationToken,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    listeners: Mutex<Listeners>,
    in_use: AtomicUsize,
    opened_at: Mutex<Option<DateTime<Utc>>>,
}

/// Shared handle to one database connection.
#[derive(Clone)]
pub struct DbHandle {
    inner: Arc<Inner>,
}

impl fmt::Debug for DbHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DbHandle")
            .field("driver", &self.inner.engine.driver())
            .field("data_source", &self.inner.engine.data_source().to_string())
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(PoisonError::into_inner)
}

fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(PoisonError::into_inner)
}

/// Counts calls currently executing on the connection thread.
struct InUse<'a>(&'a AtomicUsize);

impl<'a> InUse<'a> {
    fn enter(counter: &'a AtomicUsize) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(counter)
    }
}

impl Drop for InUse<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl DbHandle {
    /// Create an unopened handle for `engine`.
    pub fn new(engine: impl Engine) -> Self {
        Self::from_engine(Arc::new(engine))
    }

    pub fn from_engine(engine: Arc<dyn Engine>) -> Self {
        Self {
            inner: Arc::new(Inner {
                engine,
                state: AtomicU8::new(State::New as u8),
                lifecycle: tokio::sync::Mutex::new(()),
                conn: RwLock::new(None),
                interrupt: Mutex::new(None),
                statements: RwLock::new(HashMap::new()),
                done: CancellationToken::new(),
                tasks: Mutex::new(Vec::new()),
                listeners: Mutex::new(Listeners::default()),
                in_use: AtomicUsize::new(0),
                opened_at: Mutex::new(None),
            }),
        }
    }

    pub fn engine(&self) -> &dyn Engine {
        self.inner.engine.as_ref()
    }

    fn state(&self) -> State {
        State::from_u8(self.inner.state.load(Ordering::SeqCst))
    }

    pub fn is_open(&self) -> bool {
        self.state() == State::Open
    }

    pub fn is_closed(&self) -> bool {
        self.state() == State::Closed
    }

    fn ensure_open(&self) -> Result<(), Error> {
        match self.state() {
            State::New => Err(Error::DatabaseNotOpen),
            State::Open => Ok(()),
            State::Closed => Err(Error::DatabaseClosed),
        }
    }

    fn connection(&self) -> Result<Connection, Error> {
        self.ensure_open()?;
        read(&self.inner.conn).clone().ok_or(Error::DatabaseClosed)
    }

    /// Open the physical connection.
    ///
    /// When `cancel` fires the handle closes itself, running close listeners
    /// as an explicit [`close`](Self::close) would.
    pub async fn open(&self, cancel: CancellationToken) -> Result<(), Error> {
        {
            let _lifecycle = self.inner.lifecycle.lock().await;
            match self.state() {
                State::Open => return Err(Error::AlreadyOpen),
                State::Closed => return Err(Error::DatabaseClosed),
                State::New => {}
            }

            let source = self.inner.engine.data_source();
            if source.max_connections() > 1 {
                tracing::warn!(
                    requested = source.max_connections(),
                    "engine runs a single connection, ignoring max_connections"
                );
            }
            if let Some(lifetime) = source.conn_max_lifetime() {
                tracing::debug!(?lifetime, "connection lifetime is bound to the handle");
            }

            let conn = Connection::open(source.dsn()).await.map_err(|e| Error::Database(e.into()))?;
            let interrupt = conn
                .call(|conn| {
                    conn.set_prepared_statement_cache_capacity(PREPARED_STATEMENT_CAPACITY);
                    Ok::<_, rusqlite::Error>(conn.get_interrupt_handle())
                })
                .await
                .map_err(Error::from)?;

            *write(&self.inner.conn) = Some(conn);
            *lock(&self.inner.interrupt) = Some(Arc::new(interrupt));
            *lock(&self.inner.opened_at) = Some(Utc::now());
            self.inner.state.store(State::Open as u8, Ordering::SeqCst);

            self.watch(cancel);
            tracing::info!(
                driver = self.inner.engine.driver(),
                data_source = %source,
                "database opened"
            );
        }

        if let Some(hook) = self.inner.engine.as_after_open() {
            if let Err(err) = hook.after_open(self).await {
                tracing::error!(error = %err, "after-open hook failed, closing database");
                if let Err(close_err) = self.close().await {
                    return Err(Error::Multiple(vec![err, close_err]));
                }
                return Err(err);
            }
        }

        Ok(())
    }

    fn watch(&self, cancel: CancellationToken) {
        let weak: Weak<Inner> = Arc::downgrade(&self.inner);
        let done = self.inner.done.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = cancel.cancelled() => {
                    if let Some(inner) = weak.upgrade() {
                        tracing::debug!("cancellation received, closing database");
                        if let Err(e) = (DbHandle { inner }).close().await {
                            tracing::error!(error = %e, "failed to close database on cancellation");
                        }
                    }
                }
                _ = done.cancelled() => {}
            }
        });
    }

    /// Cached SQL for `key`, generated on first use.
    ///
    /// The statement is compiled into the connection's prepared statement
    /// cache the first time it runs through [`with_statement`](Self::with_statement).
    pub fn statement(&self, key: &'static str, generate: impl FnOnce() -> String) -> Result<Arc<str>, Error> {
        self.ensure_open()?;

        if let Some(sql) = read(&self.inner.statements).get(key) {
            return Ok(Arc::clone(sql));
        }

        let mut statements = write(&self.inner.statements);
        if let Some(sql) = statements.get(key) {
            return Ok(Arc::clone(sql));
        }
        let sql: Arc<str> = Arc::from(generate());
        tracing::trace!(key, sql = %sql, "caching statement");
        statements.insert(key, Arc::clone(&sql));
        Ok(sql)
    }

    /// Number of statements in the cache.
    pub fn statement_count(&self) -> usize {
        read(&self.inner.statements).len()
    }

    /// Run `f` with the prepared statement for `key`.
    pub async fn with_statement<G, F, R>(&self, key: &'static str, generate: G, f: F) -> Result<R, Error>
    where
        G: FnOnce() -> String,
        F: FnOnce(&mut CachedStatement<'_>) -> Result<R, Error> + Send + 'static,
        R: Send + 'static,
    {
        let sql = self.statement(key, generate)?;
        self.call(move |conn| {
            let mut stmt = conn.prepare_cached(&sql)?;
            f(&mut stmt)
        })
        .await
    }

    /// Run `f` on the connection thread.
    pub async fn call<F, R>(&self, f: F) -> Result<R, Error>
    where
        F: FnOnce(&mut rusqlite::Connection) -> Result<R, Error> + Send + 'static,
        R: Send + 'static,
    {
        let conn = self.connection()?;
        let _in_use = InUse::enter(&self.inner.in_use);
        conn.call(f).await.map_err(Error::from)
    }

    /// Execute `sql` bounded by `timeout`.
    ///
    /// A zero timeout falls back to the data source's query timeout. The
    /// timeout starts once the batch reaches the connection thread, so time
    /// queued behind other calls does not count. On expiry the batch is
    /// interrupted unless it has already finished.
    pub async fn exec_timeout(&self, timeout: Duration, sql: impl Into<String>) -> Result<(), Error> {
        let timeout = if timeout.is_zero() { self.inner.engine.data_source().query_timeout() } else { timeout };
        let sql = sql.into();
        let interrupt = lock(&self.inner.interrupt).clone();

        let (started_tx, started_rx) = oneshot::channel();
        let finished = Arc::new(AtomicBool::new(false));
        let done = Arc::clone(&finished);
        let mut run = pin!(self.call(move |conn| {
            let _ = started_tx.send(());
            let result = conn.execute_batch(&sql).map_err(Error::from);
            done.store(true, Ordering::SeqCst);
            result
        }));

        tokio::select! {
            result = run.as_mut() => return result,
            _ = started_rx => {}
        }

        match tokio::time::timeout(timeout, run).await {
            Ok(result) => result,
            Err(_) => {
                if let Some(handle) = interrupt.filter(|_| !finished.load(Ordering::SeqCst)) {
                    handle.interrupt();
                }
                tracing::warn!(?timeout, "statement timed out");
                Err(Error::QueryTimeout(timeout))
            }
        }
    }

    /// Round trip to the database.
    pub async fn ping(&self) -> Result<(), Error> {
        self.call(|conn| {
            conn.query_row("SELECT 1", [], |row| row.get::<_, i64>(0))?;
            Ok(())
        })
        .await
    }

    /// Register a periodic task.
    ///
    /// The first run happens one full `interval` after registration. An
    /// error from `f` is logged and ends the task. Tasks stop when the handle
    /// closes.
    pub fn maintenance<F, Fut>(&self, interval: Duration, f: F) -> Result<(), Error>
    where
        F: Fn(DbHandle) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), Error>> + Send + 'static,
    {
        if interval < MIN_MAINTENANCE_INTERVAL {
            return Err(Error::InvalidDuration(interval));
        }
        if self.inner.done.is_cancelled() {
            return Err(Error::DatabaseClosed);
        }

        let weak = Arc::downgrade(&self.inner);
        let done = self.inner.done.clone();
        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = done.cancelled() => break,
                    _ = ticker.tick() => {
                        let Some(inner) = weak.upgrade() else { break };
                        if let Err(e) = f(DbHandle { inner }).await {
                            tracing::error!(error = %e, ?interval, "maintenance task failed, stopping");
                            break;
                        }
                    }
                }
            }
        });

        let mut tasks = lock(&self.inner.tasks);
        tasks.retain(|t| !t.is_finished());
        tasks.push(task);
        Ok(())
    }

    /// Maintenance tasks still running.
    pub fn maintenance_task_count(&self) -> usize {
        lock(&self.inner.tasks).iter().filter(|t| !t.is_finished()).count()
    }

    /// Register a callback run during [`close`](Self::close), before the
    /// connection is released. Callbacks run in registration order.
    pub fn add_close_listener<F, Fut>(&self, f: F) -> Result<(), Error>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<(), Error>> + Send + 'static,
    {
        let mut listeners = lock(&self.inner.listeners);
        if listeners.closing || self.is_closed() {
            return Err(Error::DatabaseClosed);
        }
        if listeners.callbacks.len() >= MAX_CLOSE_LISTENERS {
            return Err(Error::ListenersFull);
        }
        listeners.callbacks.push(Box::new(move || Box::pin(f())));
        Ok(())
    }

    /// Close the handle. Safe to call more than once.
    pub async fn close(&self) -> Result<(), Error> {
        if self.is_closed() {
            return Ok(());
        }
        let _lifecycle = self.inner.lifecycle.lock().await;
        if self.is_closed() {
            return Ok(());
        }

        self.inner.done.cancel();
        for task in std::mem::take(&mut *lock(&self.inner.tasks)) {
            task.abort();
        }

        let callbacks = {
            let mut listeners = lock(&self.inner.listeners);
            listeners.closing = true;
            std::mem::take(&mut listeners.callbacks)
        };

        let mut errors = Vec::new();
        for callback in callbacks {
            if let Err(e) = callback().await {
                errors.push(e);
            }
        }

        self.inner.state.store(State::Closed as u8, Ordering::SeqCst);
        write(&self.inner.statements).clear();
        lock(&self.inner.interrupt).take();

        let conn = write(&self.inner.conn).take();
        if let Some(conn) = conn {
            let flushed = conn
                .call(|conn| {
                    conn.flush_prepared_statement_cache();
                    Ok::<_, rusqlite::Error>(())
                })
                .await;
            if let Err(e) = flushed {
                errors.push(Error::from(e));
            }
            if let Err(e) = conn.close().await {
                errors.push(Error::from(e));
            }
            tracing::info!(driver = self.inner.engine.driver(), "database closed");
        }

        Error::join(errors)
    }

    /// Connection and engine statistics.
    ///
    /// Engine statistics that fail to load are logged and left out.
    pub async fn stats(&self) -> DbStats {
        let open = self.is_open();
        let in_use = self.inner.in_use.load(Ordering::SeqCst);
        let source = self.inner.engine.data_source();

        let engine = match self.inner.engine.as_observable() {
            Some(observable) if open => match observable.stats(self).await {
                Ok(value) => Some(value),
                Err(e) => {
                    tracing::warn!(error = %e, "failed to collect engine stats");
                    None
                }
            },
            _ => None,
        };

        DbStats {
            driver: self.inner.engine.driver(),
            data_source: source.to_string(),
            state: format!("{:?}", self.state()).to_lowercase(),
            opened_at: *lock(&self.inner.opened_at),
            prepared_statements: self.statement_count(),
            maintenance_tasks: self.maintenance_task_count(),
            connections: PoolStats {
                max_open_connections: 1,
                open_connections: usize::from(open),
                in_use,
                idle: usize::from(open).saturating_sub(in_use.min(1)),
            },
            engine,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicBool;

    struct BareEngine {
        source: DsnOptions,
    }

    impl Engine for BareEngine {
        fn driver(&self) -> &'static str {
            "sqlite"
        }

        fn data_source(&self) -> &dyn DataSource {
            &self.source
        }
    }

    fn bare() -> DbHandle {
        DbHandle::new(BareEngine { source: DsnOptions::new(":memory:") })
    }

    async fn open_bare() -> DbHandle {
        let db = bare();
        db.open(CancellationToken::new()).await.unwrap();
        db
    }

    #[tokio::test]
    async fn test_lifecycle_errors() {
        let db = bare();
        assert!(matches!(db.ping().await, Err(Error::DatabaseNotOpen)));
        assert!(matches!(db.statement("k", String::new), Err(Error::DatabaseNotOpen)));

        db.open(CancellationToken::new()).await.unwrap();
        db.ping().await.unwrap();
        assert!(matches!(db.open(CancellationToken::new()).await, Err(Error::AlreadyOpen)));

        db.close().await.unwrap();
        db.close().await.unwrap();
        assert!(matches!(db.ping().await, Err(Error::DatabaseClosed)));
        assert!(matches!(db.open(CancellationToken::new()).await, Err(Error::DatabaseClosed)));
    }

    #[tokio::test]
    async fn test_statement_generated_once() {
        let db = open_bare().await;
        let calls = AtomicUsize::new(0);
        let generate = || {
            calls.fetch_add(1, Ordering::SeqCst);
            "SELECT 1".to_string()
        };

        let first = db.statement("select.one", generate).unwrap();
        let second = db
            .statement("select.one", || {
                calls.fetch_add(1, Ordering::SeqCst);
                "SELECT 2".to_string()
            })
            .unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(db.statement_count(), 1);

        let value = db
            .with_statement("select.one", String::new, |stmt| {
                Ok(stmt.query_row([], |row| row.get::<_, i64>(0))?)
            })
            .await
            .unwrap();
        assert_eq!(value, 1);

        db.close().await.unwrap();
        assert_eq!(db.statement_count(), 0);
    }

    #[tokio::test]
    async fn test_close_listeners_capacity_and_order() {
        let db = open_bare().await;
        let order = Arc::new(Mutex::new(Vec::new()));

        for i in 0..MAX_CLOSE_LISTENERS {
            let order = Arc::clone(&order);
            db.add_close_listener(move || async move {
                lock(&order).push(i);
                Ok(())
            })
            .unwrap();
        }
        let overflow = db.add_close_listener(|| async { Ok(()) });
        assert!(matches!(overflow, Err(Error::ListenersFull)));

        db.close().await.unwrap();
        assert_eq!(*lock(&order), (0..MAX_CLOSE_LISTENERS).collect::<Vec<_>>());

        let late = db.add_close_listener(|| async { Ok(()) });
        assert!(matches!(late, Err(Error::DatabaseClosed)));
    }

    #[tokio::test]
    async fn test_close_joins_listener_errors() {
        let db = open_bare().await;
        db.add_close_listener(|| async { Err(Error::InvalidInput("first".into())) }).unwrap();
        db.add_close_listener(|| async { Err(Error::InvalidInput("second".into())) }).unwrap();

        let err = db.close().await.unwrap_err();
        let message = err.to_string();
        assert!(message.contains("first"));
        assert!(message.contains("second"));
        assert!(db.is_closed());
    }

    #[tokio::test]
    async fn test_close_listener_can_use_connection() {
        let db = open_bare().await;
        let pinged = Arc::new(AtomicBool::new(false));
        let (handle, flag) = (db.clone(), Arc::clone(&pinged));
        db.add_close_listener(move || async move {
            handle.ping().await?;
            flag.store(true, Ordering::SeqCst);
            Ok(())
        })
        .unwrap();

        db.close().await.unwrap();
        assert!(pinged.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_maintenance_rejects_short_interval() {
        let db = open_bare().await;
        let result = db.maintenance(Duration::from_secs(59), |_| async { Ok(()) });
        assert!(matches!(result, Err(Error::InvalidDuration(d)) if d == Duration::from_secs(59)));
        assert_eq!(db.maintenance_task_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_maintenance_stops_after_error() {
        let db = open_bare().await;
        let runs = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&runs);
        db.maintenance(MIN_MAINTENANCE_INTERVAL, move |_| {
            let counter = Arc::clone(&counter);
            async move {
                if counter.fetch_add(1, Ordering::SeqCst) == 1 {
                    return Err(Error::InvalidInput("boom".into()));
                }
                Ok(())
            }
        })
        .unwrap();
        assert_eq!(db.maintenance_task_count(), 1);

        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(runs.load(Ordering::SeqCst), 0);

        tokio::time::sleep(MIN_MAINTENANCE_INTERVAL * 3).await;
        assert_eq!(runs.load(Ordering::SeqCst), 2);
        assert_eq!(db.maintenance_task_count(), 0);
    }

    #[tokio::test]
    async fn test_close_stops_maintenance() {
        let db = open_bare().await;
        db.maintenance(MIN_MAINTENANCE_INTERVAL, |_| async { Ok(()) }).unwrap();
        assert_eq!(db.maintenance_task_count(), 1);

        db.close().await.unwrap();
        assert_eq!(db.maintenance_task_count(), 0);
    }

    #[tokio::test]
    async fn test_cancel_closes_handle() {
        let db = bare();
        let token = CancellationToken::new();
        db.open(token.clone()).await.unwrap();

        token.cancel();
        for _ in 0..100 {
            if db.is_closed() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(db.is_closed());
    }

    #[tokio::test]
    async fn test_exec_timeout_runs_batch() {
        let db = open_bare().await;
        db.exec_timeout(Duration::ZERO, "CREATE TABLE t (x INTEGER); INSERT INTO t VALUES (1);")
            .await
            .unwrap();
        let count = db
            .call(|conn| Ok(conn.query_row("SELECT COUNT(*) FROM t", [], |row| row.get::<_, i64>(0))?))
            .await
            .unwrap();
        assert_eq!(count, 1);
    }

    #[tokio::test]
    async fn test_exec_timeout_ignores_time_queued() {
        let db = open_bare().await;
        let busy = {
            let db = db.clone();
            tokio::spawn(async move {
                db.call(|_| {
                    std::thread::sleep(Duration::from_millis(300));
                    Ok(())
                })
                .await
            })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;

        db.exec_timeout(Duration::from_millis(100), "CREATE TABLE queued (x INTEGER);")
            .await
            .unwrap();
        busy.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_stats_without_observable_engine() {
        let db = open_bare().await;
        let stats = db.stats().await;
        assert_eq!(stats.driver, "sqlite");
        assert_eq!(stats.state, "open");
        assert_eq!(stats.connections.open_connections, 1);
        assert!(stats.engine.is_none());
    }
}

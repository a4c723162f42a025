//! Scoped session acquisition.
//!
//! A session is one unit of work on one checked-out connection. Sessions
//! begin a transaction on their first statement and roll back whatever is
//! still open when they are closed. Closing is tied to scope: the guards
//! below close their session exactly once, on every exit path.

use std::ops::{Deref, DerefMut};
use std::sync::Arc;

use async_trait::async_trait;
use futures::future::BoxFuture;
use postgres::types::ToSql;
use postgres::Row;
use sea_orm::{ConnectionTrait, DatabaseConnection, DatabaseTransaction, QueryResult, Statement, TransactionTrait};
use tracing::{debug, warn};

use crate::error::DbInfraError;
use crate::infra::db::engine::{EngineRegistry, SyncConnection, SyncEngine};

const ERR_SESSION_CLOSED: &str = "session is closed";

/// A blocking unit of work that must be released when its scope ends.
pub trait SyncUnitOfWork {
    fn close(&mut self);
}

/// An async unit of work that must be released when its scope ends.
#[async_trait]
pub trait AsyncUnitOfWork: Send {
    async fn close(&mut self);

    /// Release without awaiting. Runs when the owning scope is dropped
    /// before `close` finished, e.g. on task cancellation.
    fn release_now(&mut self);
}

/// Session bound to one connection from the sync engine.
pub struct SyncSession {
    conn: Option<SyncConnection>,
    in_transaction: bool,
}

impl SyncSession {
    pub fn new(conn: SyncConnection) -> Self {
        Self {
            conn: Some(conn),
            in_transaction: false,
        }
    }

    pub fn in_transaction(&self) -> bool {
        self.in_transaction
    }

    fn client(&mut self) -> Result<&mut postgres::Client, DbInfraError> {
        match self.conn.as_mut() {
            Some(conn) => Ok(&mut **conn),
            None => Err(DbInfraError::query(ERR_SESSION_CLOSED)),
        }
    }

    fn begin_if_needed(&mut self) -> Result<(), DbInfraError> {
        if !self.in_transaction {
            self.client()?.batch_execute("BEGIN")?;
            self.in_transaction = true;
        }
        Ok(())
    }

    pub fn query(
        &mut self,
        sql: &str,
        params: &[&(dyn ToSql + Sync)],
    ) -> Result<Vec<Row>, DbInfraError> {
        self.begin_if_needed()?;
        Ok(self.client()?.query(sql, params)?)
    }

    pub fn execute(
        &mut self,
        sql: &str,
        params: &[&(dyn ToSql + Sync)],
    ) -> Result<u64, DbInfraError> {
        self.begin_if_needed()?;
        Ok(self.client()?.execute(sql, params)?)
    }

    pub fn commit(&mut self) -> Result<(), DbInfraError> {
        if self.in_transaction {
            // Cleared first: a failed COMMIT leaves the server-side transaction aborted.
            self.in_transaction = false;
            self.client()?.batch_execute("COMMIT")?;
        }
        Ok(())
    }

    pub fn rollback(&mut self) -> Result<(), DbInfraError> {
        if self.in_transaction {
            self.in_transaction = false;
            self.client()?.batch_execute("ROLLBACK")?;
        }
        Ok(())
    }
}

impl SyncUnitOfWork for SyncSession {
    fn close(&mut self) {
        if let Err(e) = self.rollback() {
            warn!(engine = "sync", error = %e, "rollback on session close failed");
        }
        // Returning the connection to the pool ends the session.
        self.conn.take();
    }
}

/// Scope guard for a sync session. Dropping it closes the session.
pub struct DbSession<S: SyncUnitOfWork = SyncSession> {
    session: S,
    closed: bool,
}

impl<S: SyncUnitOfWork> DbSession<S> {
    pub fn new(session: S) -> Self {
        Self {
            session,
            closed: false,
        }
    }

    /// Close now instead of at end of scope.
    pub fn close(mut self) {
        self.release();
    }

    fn release(&mut self) {
        if !self.closed {
            self.closed = true;
            self.session.close();
        }
    }
}

impl<S: SyncUnitOfWork> Deref for DbSession<S> {
    type Target = S;

    fn deref(&self) -> &S {
        &self.session
    }
}

impl<S: SyncUnitOfWork> DerefMut for DbSession<S> {
    fn deref_mut(&mut self) -> &mut S {
        &mut self.session
    }
}

impl<S: SyncUnitOfWork> Drop for DbSession<S> {
    fn drop(&mut self) {
        self.release();
    }
}

/// Session bound to the async engine.
pub struct AsyncSession {
    db: DatabaseConnection,
    txn: Option<DatabaseTransaction>,
    closed: bool,
}

impl AsyncSession {
    /// Check out a connection and begin the session's first transaction.
    pub async fn open(db: &DatabaseConnection) -> Result<Self, DbInfraError> {
        let txn = db.begin().await?;
        Ok(Self {
            db: db.clone(),
            txn: Some(txn),
            closed: false,
        })
    }

    pub fn in_transaction(&self) -> bool {
        self.txn.is_some()
    }

    async fn transaction(&mut self) -> Result<&DatabaseTransaction, DbInfraError> {
        if self.closed {
            return Err(DbInfraError::query(ERR_SESSION_CLOSED));
        }
        if self.txn.is_none() {
            self.txn = Some(self.db.begin().await?);
        }
        self.txn
            .as_ref()
            .ok_or_else(|| DbInfraError::query(ERR_SESSION_CLOSED))
    }

    pub async fn query_all(&mut self, stmt: Statement) -> Result<Vec<QueryResult>, DbInfraError> {
        Ok(self.transaction().await?.query_all(stmt).await?)
    }

    pub async fn query_one(&mut self, stmt: Statement) -> Result<Option<QueryResult>, DbInfraError> {
        Ok(self.transaction().await?.query_one(stmt).await?)
    }

    pub async fn execute(&mut self, stmt: Statement) -> Result<u64, DbInfraError> {
        let result = self.transaction().await?.execute(stmt).await?;
        Ok(result.rows_affected())
    }

    pub async fn commit(&mut self) -> Result<(), DbInfraError> {
        if let Some(txn) = self.txn.take() {
            txn.commit().await?;
        }
        Ok(())
    }

    pub async fn rollback(&mut self) -> Result<(), DbInfraError> {
        if let Some(txn) = self.txn.take() {
            txn.rollback().await?;
        }
        Ok(())
    }
}

#[async_trait]
impl AsyncUnitOfWork for AsyncSession {
    async fn close(&mut self) {
        self.closed = true;
        if let Err(e) = self.rollback().await {
            warn!(engine = "async", error = %e, "rollback on session close failed");
        }
    }

    fn release_now(&mut self) {
        self.closed = true;
        if self.txn.take().is_some() {
            // Dropping the transaction queues its rollback on the connection.
            debug!(engine = "async", "session released without awaiting close");
        }
    }
}

/// Scope guard for an async session.
///
/// Call [`AsyncDbSession::close`] on the way out; if the guard is dropped
/// first (early return, panic, cancelled task) the session is released
/// synchronously instead.
pub struct AsyncDbSession<S: AsyncUnitOfWork = AsyncSession> {
    session: S,
    closed: bool,
}

impl<S: AsyncUnitOfWork> AsyncDbSession<S> {
    pub fn new(session: S) -> Self {
        Self {
            session,
            closed: false,
        }
    }

    pub async fn close(mut self) {
        self.session.close().await;
        self.closed = true;
    }
}

impl<S: AsyncUnitOfWork> Deref for AsyncDbSession<S> {
    type Target = S;

    fn deref(&self) -> &S {
        &self.session
    }
}

impl<S: AsyncUnitOfWork> DerefMut for AsyncDbSession<S> {
    fn deref_mut(&mut self) -> &mut S {
        &mut self.session
    }
}

impl<S: AsyncUnitOfWork> Drop for AsyncDbSession<S> {
    fn drop(&mut self) {
        if !self.closed {
            self.closed = true;
            self.session.release_now();
        }
    }
}

/// Run `f` inside an async session scope and always close the session afterwards.
pub async fn scoped_async<S, F, R, E>(session: S, f: F) -> Result<R, E>
where
    S: AsyncUnitOfWork,
    F: for<'a> FnOnce(&'a mut S) -> BoxFuture<'a, Result<R, E>>,
{
    let mut guard = AsyncDbSession::new(session);
    let out = f(&mut *guard).await;
    guard.close().await;
    out
}

impl EngineRegistry {
    /// Check out a sync session. Blocks; call from a blocking thread.
    pub fn get_db(&self) -> Result<DbSession, DbInfraError> {
        let conn = self.sync_engine().checkout()?;
        Ok(DbSession::new(SyncSession::new(conn)))
    }

    /// Run `f` with a sync session on the blocking thread pool.
    pub async fn with_db<F, R, E>(&self, f: F) -> Result<R, E>
    where
        F: FnOnce(&mut SyncSession) -> Result<R, E> + Send + 'static,
        R: Send + 'static,
        E: From<DbInfraError> + Send + 'static,
    {
        let engine: Arc<SyncEngine> = self.sync_engine_handle();
        tokio::task::spawn_blocking(move || {
            let mut session = DbSession::new(SyncSession::new(engine.checkout()?));
            f(&mut *session)
        })
        .await
        .map_err(|e| E::from(DbInfraError::query(format!("sync session task failed: {e}"))))?
    }

    /// Open an async session. Fails before touching any pool when async mode is off.
    pub async fn get_async_session(&self) -> Result<AsyncDbSession, DbInfraError> {
        let db = self.async_engine()?.connection()?;
        let session = AsyncSession::open(db).await?;
        Ok(AsyncDbSession::new(session))
    }

    /// Run `f` inside an async session scope; the session is closed on every path.
    pub async fn with_async_session<F, R, E>(&self, f: F) -> Result<R, E>
    where
        F: for<'a> FnOnce(&'a mut AsyncSession) -> BoxFuture<'a, Result<R, E>>,
        E: From<DbInfraError>,
    {
        let mut guard = self.get_async_session().await?;
        let out = f(&mut *guard).await;
        guard.close().await;
        out
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use futures::FutureExt;

    use super::*;

    #[derive(Default, Clone)]
    struct Calls {
        close: Arc<AtomicUsize>,
        release_now: Arc<AtomicUsize>,
    }

    struct SpySession {
        calls: Calls,
    }

    impl SyncUnitOfWork for SpySession {
        fn close(&mut self) {
            self.calls.close.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[async_trait]
    impl AsyncUnitOfWork for SpySession {
        async fn close(&mut self) {
            tokio::task::yield_now().await;
            self.calls.close.fetch_add(1, Ordering::SeqCst);
        }

        fn release_now(&mut self) {
            self.calls.release_now.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn spy() -> (SpySession, Calls) {
        let calls = Calls::default();
        (
            SpySession {
                calls: calls.clone(),
            },
            calls,
        )
    }

    fn sync_work(session: DbSession<SpySession>, fail: bool) -> Result<u32, &'static str> {
        let _session = session;
        if fail {
            return Err("boom");
        }
        Ok(7)
    }

    #[test]
    fn sync_guard_closes_once_on_success() {
        let (session, calls) = spy();
        assert_eq!(sync_work(DbSession::new(session), false), Ok(7));
        assert_eq!(calls.close.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn sync_guard_closes_once_on_error() {
        let (session, calls) = spy();
        assert_eq!(sync_work(DbSession::new(session), true), Err("boom"));
        assert_eq!(calls.close.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn sync_guard_explicit_close_is_not_repeated_on_drop() {
        let (session, calls) = spy();
        let guard = DbSession::new(session);
        guard.close();
        assert_eq!(calls.close.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn sync_guard_closes_on_panic() {
        let (session, calls) = spy();
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let _guard = DbSession::new(session);
            panic!("handler panicked");
        }));
        assert!(result.is_err());
        assert_eq!(calls.close.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn async_scope_closes_once_on_success() {
        let (session, calls) = spy();
        let out: Result<u32, &str> = scoped_async(session, |_s| async { Ok(1) }.boxed()).await;
        assert_eq!(out, Ok(1));
        assert_eq!(calls.close.load(Ordering::SeqCst), 1);
        assert_eq!(calls.release_now.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn async_scope_closes_once_on_injected_failure() {
        let (session, calls) = spy();
        let out: Result<u32, &str> =
            scoped_async(session, |_s| async { Err("injected") }.boxed()).await;
        assert_eq!(out, Err("injected"));
        assert_eq!(calls.close.load(Ordering::SeqCst), 1);
        assert_eq!(calls.release_now.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn cancelled_async_scope_still_releases() {
        let (session, calls) = spy();
        let pending = scoped_async(session, |_s| {
            async {
                futures::future::pending::<()>().await;
                Ok::<u32, &str>(0)
            }
            .boxed()
        });
        let timed_out =
            tokio::time::timeout(std::time::Duration::from_millis(10), pending).await;
        assert!(timed_out.is_err());
        assert_eq!(calls.close.load(Ordering::SeqCst), 0);
        assert_eq!(calls.release_now.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn async_session_fails_fast_when_async_disabled() {
        use crate::config::db::EngineParams;

        let params = EngineParams {
            pool_pre_ping: false,
            pool_size: 1,
            max_overflow: 0,
            require_tls: false,
            acquire_timeout: std::time::Duration::from_millis(200),
        };
        let sync = SyncEngine::build("postgresql://u:p@127.0.0.1:1/db", &params).unwrap();
        let registry = EngineRegistry::from_engines(sync, None, params);

        let err = registry.get_async_session().await.err().unwrap();
        assert!(err.is_config());
        assert!(err.to_string().contains("USE_ASYNC_DRIVER"));
        registry.close_db().await;
    }

    #[tokio::test]
    async fn dropped_async_guard_releases_once() {
        let (session, calls) = spy();
        {
            let _guard = AsyncDbSession::new(session);
        }
        assert_eq!(calls.release_now.load(Ordering::SeqCst), 1);
        assert_eq!(calls.close.load(Ordering::SeqCst), 0);
    }
}

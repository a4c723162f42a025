//! Sync and async engines and the registry that owns them.
//!
//! The registry is built once at startup and shared by reference (usually
//! behind an `Arc` in application state). It is the only place that
//! constructs or disposes engines.

use std::str::FromStr;
use std::sync::Arc;
use std::time::Instant;

use parking_lot::RwLock;
use postgres::config::SslMode;
use postgres::Config as PgConfig;
use postgres_native_tls::MakeTlsConnector;
use r2d2::PooledConnection;
use r2d2_postgres::PostgresConnectionManager;
use sea_orm::{ConnectionTrait, DatabaseBackend, DatabaseConnection, SqlxPostgresConnector, Statement};
use sqlx::postgres::{PgConnectOptions, PgPoolOptions, PgSslMode};
use sqlx::PgPool;
use tracing::{error, info, warn};

use crate::config::db::{ConnectionSettings, DriverMode, EngineParams};
use crate::config::fallback::LocalDbProvider;
use crate::config::url::{connect_url, sanitize_db_url};
use crate::error::{DbInfraError, ERR_ENGINE_DISPOSED};
use crate::infra::db::diagnostics::{snapshot, PoolCounters, PoolStats, StatsSnapshot};

pub type SyncManager = PostgresConnectionManager<MakeTlsConnector>;
pub type SyncPool = r2d2::Pool<SyncManager>;
pub type SyncConnection = PooledConnection<SyncManager>;

const HEALTH_CHECK_SQL: &str = "SELECT 1";

/// Blocking connection pool. Every method that touches the network blocks
/// the calling thread and must run off the async executor.
pub struct SyncEngine {
    pool: RwLock<Option<SyncPool>>,
    url: String,
    params: EngineParams,
}

impl SyncEngine {
    /// Build the pool without opening a connection on the calling thread.
    pub fn build(url: &str, params: &EngineParams) -> Result<Self, DbInfraError> {
        let sanitized = sanitize_db_url(url);
        if params.max_connections() == 0 {
            return Err(DbInfraError::config("sync pool needs at least one connection"));
        }
        let mut config = PgConfig::from_str(&connect_url(url)).map_err(|e| {
            DbInfraError::config(format!("invalid sync database URL '{sanitized}': {e}"))
        })?;
        if params.require_tls {
            config.ssl_mode(SslMode::Require);
        }

        let tls = native_tls::TlsConnector::new()
            .map_err(|e| DbInfraError::config(format!("failed to initialise TLS connector: {e}")))?;
        let manager = PostgresConnectionManager::new(config, MakeTlsConnector::new(tls));

        let pool = r2d2::Pool::builder()
            .max_size(params.max_connections())
            .min_idle(Some(params.pool_size))
            .test_on_check_out(params.pool_pre_ping)
            .connection_timeout(params.acquire_timeout)
            .build_unchecked(manager);

        Ok(Self {
            pool: RwLock::new(Some(pool)),
            url: sanitized,
            params: *params,
        })
    }

    /// Cheap handle to the live pool, or a configuration error after disposal.
    pub fn pool(&self) -> Result<SyncPool, DbInfraError> {
        self.pool
            .read()
            .clone()
            .ok_or_else(|| DbInfraError::config(ERR_ENGINE_DISPOSED))
    }

    /// Check out one connection. Blocks until one is free or the pool times out.
    pub fn checkout(&self) -> Result<SyncConnection, DbInfraError> {
        Ok(self.pool()?.get()?)
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn is_disposed(&self) -> bool {
        self.pool.read().is_none()
    }

    /// Drop the registry's handle; connections close once the last checkout returns.
    pub fn dispose(&self) {
        if self.pool.write().take().is_some() {
            info!(engine = "sync", url = %self.url, "engine disposed");
        }
    }
}

impl PoolCounters for SyncEngine {
    fn pool_stats(&self) -> PoolStats {
        match self.pool.read().as_ref() {
            Some(pool) => {
                let state = pool.state();
                PoolStats::from_counts(
                    self.params.pool_size,
                    Some(state.connections),
                    Some(state.idle_connections),
                )
            }
            None => PoolStats::from_counts(self.params.pool_size, None, None),
        }
    }
}

/// Run the validation query on a blocking thread.
fn ping_sync(pool: SyncPool) -> Result<(), DbInfraError> {
    let mut conn = pool.get()?;
    conn.simple_query(HEALTH_CHECK_SQL)?;
    Ok(())
}

/// Async connection pool; statements go through sea-orm on top of the sqlx pool.
pub struct AsyncEngine {
    pool: PgPool,
    conn: DatabaseConnection,
    url: String,
    params: EngineParams,
}

impl AsyncEngine {
    /// Build the pool lazily. Must be called from within a tokio runtime.
    pub fn build(url: &str, params: &EngineParams) -> Result<Self, DbInfraError> {
        let sanitized = sanitize_db_url(url);
        if params.max_connections() == 0 {
            return Err(DbInfraError::config("async pool needs at least one connection"));
        }
        let mut options = PgConnectOptions::from_str(&connect_url(url)).map_err(|e| {
            DbInfraError::config(format!("invalid async database URL '{sanitized}': {e}"))
        })?;
        if params.require_tls {
            options = options.ssl_mode(PgSslMode::Require);
        }

        let pool = PgPoolOptions::new()
            .max_connections(params.max_connections())
            .min_connections(params.pool_size)
            .test_before_acquire(params.pool_pre_ping)
            .acquire_timeout(params.acquire_timeout)
            .connect_lazy_with(options);
        let conn = SqlxPostgresConnector::from_sqlx_postgres_pool(pool.clone());

        Ok(Self {
            pool,
            conn,
            url: sanitized,
            params: *params,
        })
    }

    /// Statement-level handle, or a configuration error after disposal.
    pub fn connection(&self) -> Result<&DatabaseConnection, DbInfraError> {
        if self.pool.is_closed() {
            return Err(DbInfraError::config(ERR_ENGINE_DISPOSED));
        }
        Ok(&self.conn)
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn is_disposed(&self) -> bool {
        self.pool.is_closed()
    }

    pub async fn ping(&self) -> Result<(), DbInfraError> {
        self.connection()?
            .execute(Statement::from_string(
                DatabaseBackend::Postgres,
                HEALTH_CHECK_SQL,
            ))
            .await?;
        Ok(())
    }

    /// Close every pooled connection; waits for checked-out ones to return.
    pub async fn dispose(&self) {
        if !self.pool.is_closed() {
            self.pool.close().await;
            info!(engine = "async", url = %self.url, "engine disposed");
        }
    }
}

impl PoolCounters for AsyncEngine {
    fn pool_stats(&self) -> PoolStats {
        if self.pool.is_closed() {
            return PoolStats::from_counts(self.params.pool_size, None, None);
        }
        let idle = u32::try_from(self.pool.num_idle()).ok();
        PoolStats::from_counts(self.params.pool_size, Some(self.pool.size()), idle)
    }
}

/// Owns the sync engine and, when async mode is enabled, the async engine.
pub struct EngineRegistry {
    sync_engine: Arc<SyncEngine>,
    async_engine: Option<AsyncEngine>,
    params: EngineParams,
}

impl EngineRegistry {
    /// Resolve URLs and build the engines. No connection is awaited here;
    /// call [`EngineRegistry::init_db`] to verify connectivity.
    pub async fn init(
        settings: &ConnectionSettings,
        fallback: &dyn LocalDbProvider,
    ) -> Result<Self, DbInfraError> {
        let params = settings.resolve_engine_params();
        let sync_url = settings.resolve_url(DriverMode::Sync, fallback)?;
        let sync_engine = SyncEngine::build(&sync_url, &params)?;

        let async_engine = if settings.use_async_driver {
            let async_url = settings.resolve_url(DriverMode::Async, fallback)?;
            Some(AsyncEngine::build(&async_url, &params)?)
        } else {
            None
        };

        info!(
            sync_url = %sync_engine.url(),
            async_url = %async_engine.as_ref().map(AsyncEngine::url).unwrap_or("disabled"),
            pool_size = params.pool_size,
            max_overflow = params.max_overflow,
            require_tls = params.require_tls,
            "engine registry initialized"
        );

        Ok(Self::from_engines(sync_engine, async_engine, params))
    }

    pub fn from_engines(
        sync_engine: SyncEngine,
        async_engine: Option<AsyncEngine>,
        params: EngineParams,
    ) -> Self {
        Self {
            sync_engine: Arc::new(sync_engine),
            async_engine,
            params,
        }
    }

    pub fn params(&self) -> &EngineParams {
        &self.params
    }

    pub fn async_enabled(&self) -> bool {
        self.async_engine.is_some()
    }

    pub fn sync_engine(&self) -> &SyncEngine {
        &self.sync_engine
    }

    /// The async engine, or a configuration error when async mode is off.
    pub fn async_engine(&self) -> Result<&AsyncEngine, DbInfraError> {
        self.async_engine
            .as_ref()
            .ok_or_else(DbInfraError::async_not_configured)
    }

    /// Startup health check: `SELECT 1` on every configured engine.
    ///
    /// Any failure is returned as a connectivity error and must stop startup.
    pub async fn init_db(&self) -> Result<(), DbInfraError> {
        let start = Instant::now();
        let pool = self.sync_engine.pool()?;

        let sync_result = tokio::task::spawn_blocking(move || ping_sync(pool))
            .await
            .map_err(|e| DbInfraError::connectivity(format!("sync health check aborted: {e}")))?;
        sync_result.map_err(|e| {
            error!(engine = "sync", url = %self.sync_engine.url(), error = %e, "health check failed");
            as_connectivity(e)
        })?;

        if let Some(engine) = &self.async_engine {
            engine.ping().await.map_err(|e| {
                error!(engine = "async", url = %engine.url(), error = %e, "health check failed");
                as_connectivity(e)
            })?;
        }

        info!(
            async_enabled = self.async_enabled(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "database health check passed"
        );
        Ok(())
    }

    /// Dispose every engine. Call once during orderly shutdown.
    pub async fn close_db(&self) {
        self.sync_engine.dispose();
        if let Some(engine) = &self.async_engine {
            engine.dispose().await;
        }
    }

    /// Read-only pool occupancy report.
    pub fn get_db_stats(&self) -> StatsSnapshot {
        snapshot(
            self.sync_engine.as_ref(),
            self.async_engine.as_ref().map(|e| e as &dyn PoolCounters),
        )
    }

    pub(crate) fn sync_engine_handle(&self) -> Arc<SyncEngine> {
        Arc::clone(&self.sync_engine)
    }
}

impl Drop for EngineRegistry {
    fn drop(&mut self) {
        let async_open = self
            .async_engine
            .as_ref()
            .map(|e| !e.is_disposed())
            .unwrap_or(false);
        if !self.sync_engine.is_disposed() || async_open {
            warn!("engine registry dropped without close_db; pooled connections closed implicitly");
        }
    }
}

fn as_connectivity(e: DbInfraError) -> DbInfraError {
    match e {
        DbInfraError::Config { .. } => e,
        DbInfraError::Connectivity { message } | DbInfraError::Query { message } => {
            DbInfraError::connectivity(message)
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    const CLOSED_PORT_URL: &str = "postgresql://u:p@127.0.0.1:1/db";

    fn fast_params() -> EngineParams {
        EngineParams {
            pool_pre_ping: true,
            pool_size: 1,
            max_overflow: 0,
            require_tls: false,
            acquire_timeout: Duration::from_millis(200),
        }
    }

    #[tokio::test]
    async fn init_db_reports_unreachable_sync_pool_as_connectivity_error() {
        let params = fast_params();
        let sync = SyncEngine::build(CLOSED_PORT_URL, &params).unwrap();
        let registry = EngineRegistry::from_engines(sync, None, params);

        let start = Instant::now();
        let err = registry.init_db().await.unwrap_err();

        assert!(matches!(err, DbInfraError::Connectivity { .. }), "{err}");
        assert!(!err.to_string().contains(":p@"), "{err}");
        assert!(start.elapsed() < Duration::from_secs(10));
        registry.close_db().await;
    }

    #[tokio::test]
    async fn init_db_reports_unreachable_async_pool_as_connectivity_error() {
        let params = fast_params();
        let sync = SyncEngine::build(CLOSED_PORT_URL, &params).unwrap();
        let async_engine = AsyncEngine::build(CLOSED_PORT_URL, &params).unwrap();
        let registry = EngineRegistry::from_engines(sync, Some(async_engine), params);

        // The sync check fails first; the async engine is still reported as configured.
        let err = registry.init_db().await.unwrap_err();
        assert!(matches!(err, DbInfraError::Connectivity { .. }), "{err}");

        let err = registry.async_engine().unwrap().ping().await.unwrap_err();
        assert!(matches!(as_connectivity(err), DbInfraError::Connectivity { .. }));
        registry.close_db().await;
    }

    #[tokio::test]
    async fn checkout_after_close_is_a_config_error() {
        let params = fast_params();
        let sync = SyncEngine::build(CLOSED_PORT_URL, &params).unwrap();
        let registry = EngineRegistry::from_engines(sync, None, params);
        registry.close_db().await;

        let err = registry.init_db().await.unwrap_err();
        assert!(err.is_config());
    }
}

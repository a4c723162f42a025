//! Schema migrations over the direct (unpooled) connection.

use std::future::Future;
use std::time::{Duration, Instant};

use migration::{migrate, MigrationCommand};
use sea_orm::{ConnectOptions, ConnectionTrait, Database, DatabaseBackend, DatabaseConnection, Statement};
use tracing::{info, warn};
use xxhash_rust::xxh3::xxh3_64;

use crate::config::db::ConnectionSettings;
use crate::config::fallback::LocalDbProvider;
use crate::config::url::{connect_url, is_managed_host, sanitize_db_url};
use crate::error::DbInfraError;

const CONNECT_ATTEMPTS: u32 = 5;
const RETRY_INTERVAL_MS: u64 = 500;
const MIGRATION_LOCK_KEY: &str = "db-infra:migrate";

async fn retry_connection<T, F, Fut>(
    mut connect_fn: F,
    max_attempts: u32,
    interval_ms: u64,
) -> Result<T, DbInfraError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, DbInfraError>>,
{
    let mut attempt = 1;
    loop {
        match connect_fn().await {
            Ok(result) => {
                if attempt > 1 {
                    info!(attempts = attempt, interval_ms, "connection retry succeeded");
                }
                return Ok(result);
            }
            Err(e) if attempt >= max_attempts => return Err(e),
            Err(e) => {
                warn!(attempt, max_attempts, interval_ms, error = %e, "connection attempt failed");
                tokio::time::sleep(Duration::from_millis(interval_ms)).await;
                attempt += 1;
            }
        }
    }
}

/// URL handed to the migration connection. Managed hosts get `sslmode=require`.
fn migration_url(url: &str) -> String {
    let url = connect_url(url);
    if is_managed_host(&url) && !url.contains("sslmode=") {
        let sep = if url.contains('?') { '&' } else { '?' };
        format!("{url}{sep}sslmode=require")
    } else {
        url
    }
}

/// Open a single-connection handle for schema work.
///
/// The pool is pinned to one connection so the advisory lock and the
/// migration statements share a server session.
pub async fn build_migration_connection(url: &str) -> Result<DatabaseConnection, DbInfraError> {
    let sanitized = sanitize_db_url(url);
    let mut opt = ConnectOptions::new(migration_url(url));
    opt.min_connections(1)
        .max_connections(1)
        .acquire_timeout(Duration::from_secs(2))
        .sqlx_logging(false);

    retry_connection(
        || {
            let opt = opt.clone();
            let sanitized = sanitized.clone();
            async move {
                Database::connect(opt).await.map_err(|e| {
                    DbInfraError::connectivity(format!(
                        "failed to connect to '{sanitized}' for migrations: {e}"
                    ))
                })
            }
        },
        CONNECT_ATTEMPTS,
        RETRY_INTERVAL_MS,
    )
    .await
}

pub fn pg_lock_id(key: &str) -> i64 {
    xxh3_64(key.as_bytes()) as i64
}

async fn advisory_lock(conn: &DatabaseConnection, sql: &str) -> Result<(), DbInfraError> {
    conn.execute(Statement::from_sql_and_values(
        DatabaseBackend::Postgres,
        sql,
        vec![pg_lock_id(MIGRATION_LOCK_KEY).into()],
    ))
    .await?;
    Ok(())
}

/// Run one migration command against `url`.
///
/// State-changing commands run under a session advisory lock so replicas
/// starting together apply each migration once.
pub async fn run_migrations(url: &str, command: MigrationCommand) -> Result<(), DbInfraError> {
    let start = Instant::now();
    let conn = build_migration_connection(url).await?;
    info!(url = %sanitize_db_url(url), command = ?command, "migrate start");

    let result = if command == MigrationCommand::Status {
        migrate(&conn, command).await.map_err(DbInfraError::from)
    } else {
        advisory_lock(&conn, "SELECT pg_advisory_lock($1)").await?;
        let result = migrate(&conn, command).await.map_err(DbInfraError::from);
        if let Err(e) = advisory_lock(&conn, "SELECT pg_advisory_unlock($1)").await {
            warn!(error = %e, "failed to release migration lock");
        }
        result
    };

    if let Err(e) = conn.close().await {
        warn!(error = %e, "failed to close migration connection");
    }
    info!(elapsed_ms = start.elapsed().as_millis() as u64, ok = result.is_ok(), "migrate done");
    result
}

/// Apply pending migrations when `MIGRATE_DB` is set. No-op otherwise.
pub async fn migrate_on_startup(
    settings: &ConnectionSettings,
    fallback: &dyn LocalDbProvider,
) -> Result<(), DbInfraError> {
    if !settings.migrate_db {
        return Ok(());
    }
    let url = settings.resolve_unpooled_url(fallback)?;
    run_migrations(&url, MigrationCommand::Up).await
}

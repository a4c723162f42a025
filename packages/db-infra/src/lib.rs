//! Database connection infrastructure shared by the backend and the migration CLI.
//!
//! Resolves connection URLs from the environment, owns the sync and async
//! connection pools, hands out scoped sessions and reports pool health.

pub mod config;
pub mod error;
pub mod infra;

pub use config::db::{ConnectionSettings, DriverMode, EngineParams};
pub use config::fallback::{DevDbResource, LocalDbProvider, NoLocalDb, StaticLocalDb};
pub use error::DbInfraError;
pub use infra::db::{
    migrate_on_startup, run_migrations, AsyncDbSession, AsyncSession, DbSession, EngineRegistry,
    PoolStats, StatsSnapshot, SyncSession,
};

#[cfg(test)]
#[ctor::ctor]
fn init_test_logging() {
    backend_test_support::test_logging::init();
}

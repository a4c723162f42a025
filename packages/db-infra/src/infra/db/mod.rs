pub mod diagnostics;
pub mod engine;
pub mod migrate;
pub mod session;

pub use diagnostics::{PoolStats, StatsSnapshot};
pub use engine::{AsyncEngine, EngineRegistry, SyncEngine};
pub use migrate::{migrate_on_startup, run_migrations};
pub use session::{AsyncDbSession, AsyncSession, DbSession, SyncSession};

//! Pool occupancy snapshots for health reporting.
//!
//! Everything here reads counters the pools already maintain; nothing
//! blocks, acquires a connection, or fails. A counter a pool cannot report
//! comes back as `None` and serializes as `null`.

use serde::Serialize;

/// Identifies the sync engine implementation in status output.
pub const SYNC_MODE: &str = "r2d2";

/// Counters read live from one pool.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PoolStats {
    /// Connections the pool keeps around when idle.
    pub pool_size: Option<u32>,
    /// Open connections waiting in the pool.
    pub checked_in: Option<u32>,
    /// Open connections currently handed out.
    pub checked_out: Option<u32>,
    /// Open connections beyond `pool_size`.
    pub overflow: Option<u32>,
}

impl PoolStats {
    /// Derive counters from the pool's total and idle connection counts.
    pub fn from_counts(pool_size: u32, open: Option<u32>, idle: Option<u32>) -> Self {
        let checked_out = match (open, idle) {
            (Some(open), Some(idle)) => Some(open.saturating_sub(idle)),
            _ => None,
        };
        Self {
            pool_size: Some(pool_size),
            checked_in: idle,
            checked_out,
            overflow: open.map(|open| open.saturating_sub(pool_size)),
        }
    }
}

/// Anything that can report pool counters without side effects.
pub trait PoolCounters {
    fn pool_stats(&self) -> PoolStats;
}

/// Status report consumed by the `/db/status` route.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    pub sync_mode: &'static str,
    pub async_enabled: bool,
    pub engine_stats: PoolStats,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub async_engine_stats: Option<PoolStats>,
}

pub fn snapshot(sync: &dyn PoolCounters, async_pool: Option<&dyn PoolCounters>) -> StatsSnapshot {
    StatsSnapshot {
        sync_mode: SYNC_MODE,
        async_enabled: async_pool.is_some(),
        engine_stats: sync.pool_stats(),
        async_engine_stats: async_pool.map(|p| p.pool_stats()),
    }
}

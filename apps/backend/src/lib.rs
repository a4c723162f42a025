#![deny(clippy::wildcard_imports)]

pub mod error;
pub mod errors;
pub mod extractors;
pub mod middleware;
pub mod routes;
pub mod state;
pub mod trace_ctx;

pub use error::AppError;
pub use extractors::{AsyncDb, Db};
pub use middleware::{RequestTrace, StructuredLogger, TraceSpan};
pub use state::AppState;

// Auto-initialize logging for unit tests
#[cfg(test)]
#[ctor::ctor]
fn init_test_logging() {
    backend_test_support::test_logging::init();
}

use std::sync::Arc;

use db_infra::EngineRegistry;

/// Shared resources handed to every handler through `web::Data`.
#[derive(Clone)]
pub struct AppState {
    /// Owns both connection pools; built once at startup.
    pub db: Arc<EngineRegistry>,
}

impl AppState {
    pub fn new(db: Arc<EngineRegistry>) -> Self {
        Self { db }
    }
}

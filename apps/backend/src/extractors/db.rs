//! Per-request database access.
//!
//! [`Db`] runs work on a sync session off the async executor. [`AsyncDb`]
//! runs work on an async session; extraction fails with a configuration
//! error when async mode is disabled, before any pool is touched.

use std::future::{ready, Ready};
use std::sync::Arc;

use actix_web::dev::Payload;
use actix_web::{web, FromRequest, HttpRequest};
use db_infra::{AsyncSession, DbInfraError, EngineRegistry, SyncSession};
use futures_util::future::BoxFuture;

use crate::error::AppError;
use crate::state::AppState;

fn registry(req: &HttpRequest) -> Result<Arc<EngineRegistry>, AppError> {
    req.app_data::<web::Data<AppState>>()
        .map(|state| Arc::clone(&state.db))
        .ok_or_else(|| AppError::internal("application state is not configured"))
}

/// Sync session access. Each call gets a fresh session that is closed when the call returns.
pub struct Db(Arc<EngineRegistry>);

impl Db {
    pub async fn run<F, R>(&self, f: F) -> Result<R, AppError>
    where
        F: FnOnce(&mut SyncSession) -> Result<R, AppError> + Send + 'static,
        R: Send + 'static,
    {
        self.0.with_db(f).await
    }
}

impl FromRequest for Db {
    type Error = AppError;
    type Future = Ready<Result<Self, Self::Error>>;

    fn from_request(req: &HttpRequest, _payload: &mut Payload) -> Self::Future {
        ready(registry(req).map(Db))
    }
}

/// Async session access, available only when async mode is enabled.
pub struct AsyncDb(Arc<EngineRegistry>);

impl AsyncDb {
    pub async fn run<F, R>(&self, f: F) -> Result<R, AppError>
    where
        F: for<'a> FnOnce(&'a mut AsyncSession) -> BoxFuture<'a, Result<R, AppError>>,
    {
        self.0.with_async_session(f).await
    }
}

impl FromRequest for AsyncDb {
    type Error = AppError;
    type Future = Ready<Result<Self, Self::Error>>;

    fn from_request(req: &HttpRequest, _payload: &mut Payload) -> Self::Future {
        let result = registry(req).and_then(|db| {
            if db.async_enabled() {
                Ok(AsyncDb(db))
            } else {
                Err(AppError::from(DbInfraError::async_not_configured()))
            }
        });
        ready(result)
    }
}

//! One `request_completed` line per request.
//!
//! Each line names the database route family the request hit. Failed
//! requests also carry their problem+json error code, and the level follows
//! that code: failed statements are errors, an unreachable or unconfigured
//! database is a warning.

use std::future::{ready, Ready};
use std::time::Instant;

use actix_web::dev::{forward_ready, Service, ServiceRequest, ServiceResponse, Transform};
use actix_web::http::StatusCode;
use actix_web::{Error as ActixError, HttpMessage};
use futures_util::future::LocalBoxFuture;
use tracing::{error, info, warn, Level};

use crate::error::AppError;
use crate::errors::ErrorCode;
use crate::trace_ctx::TraceId;

pub struct StructuredLogger;

/// Coarse grouping of request paths for log filtering.
pub fn route_family(path: &str) -> &'static str {
    match path.strip_prefix("/db") {
        Some("/status") => "db.status",
        Some(rest) if rest.starts_with("/async-") => "db.async",
        Some(rest) if rest.starts_with('/') => "db.sync",
        _ if path == "/health" => "health",
        _ => "other",
    }
}

fn level_for(status: StatusCode, code: Option<ErrorCode>) -> Level {
    match code {
        Some(ErrorCode::DbUnavailable | ErrorCode::DbConfig) => Level::WARN,
        Some(ErrorCode::DbError | ErrorCode::Internal) => Level::ERROR,
        None if status.is_server_error() => Level::ERROR,
        None if status.is_client_error() => Level::WARN,
        None => Level::INFO,
    }
}

fn app_error_code(err: &ActixError) -> Option<ErrorCode> {
    err.as_error::<AppError>().map(AppError::code)
}

impl<S, B> Transform<S, ServiceRequest> for StructuredLogger
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = ActixError>,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = ActixError;
    type InitError = ();
    type Transform = StructuredLoggerMiddleware<S>;
    type Future = Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        ready(Ok(StructuredLoggerMiddleware { service }))
    }
}

pub struct StructuredLoggerMiddleware<S> {
    service: S,
}

impl<S, B> Service<ServiceRequest> for StructuredLoggerMiddleware<S>
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = ActixError>,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = ActixError;
    type Future = LocalBoxFuture<'static, Result<Self::Response, Self::Error>>;

    forward_ready!(service);

    fn call(&self, req: ServiceRequest) -> Self::Future {
        let start = Instant::now();
        let method = req.method().to_string();
        let path = req.path().to_string();
        let family = route_family(&path);
        let trace_id = req
            .extensions()
            .get::<TraceId>()
            .map(|id| id.as_str().to_string())
            .unwrap_or_else(|| "unknown".to_string());

        let fut = self.service.call(req);

        Box::pin(async move {
            let result = fut.await;

            // Handler errors are already rendered here; the source error rides on the response.
            let (status, code) = match &result {
                Ok(res) => (res.status(), res.response().error().and_then(app_error_code)),
                Err(err) => (err.as_response_error().status_code(), app_error_code(err)),
            };
            let status_code = status.as_u16();
            let error_code = code.map(|c| c.as_str());
            let duration_us = start.elapsed().as_micros() as u64;

            match level_for(status, code) {
                Level::ERROR => error!(http.method=%method, url.path=%path, route.family=family, http.status_code=status_code, error.code=error_code, duration_us, trace_id=%trace_id, message="request_completed"),
                Level::WARN => warn!(http.method=%method, url.path=%path, route.family=family, http.status_code=status_code, error.code=error_code, duration_us, trace_id=%trace_id, message="request_completed"),
                _ => info!(http.method=%method, url.path=%path, route.family=family, http.status_code=status_code, duration_us, trace_id=%trace_id, message="request_completed"),
            }

            result
        })
    }
}

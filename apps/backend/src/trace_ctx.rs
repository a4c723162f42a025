//! Task-local trace id for the request being served.
//!
//! `RequestTrace` opens the scope; error responses read it so the body and
//! the `x-trace-id` header carry the same id as the request's log lines.

use tokio::task_local;
use uuid::Uuid;

task_local! {
    static TRACE_ID: String;
}

const UNKNOWN: &str = "unknown";

/// Trace id stored in request extensions by `RequestTrace`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TraceId(String);

impl TraceId {
    /// Reuse a caller-supplied UUID, otherwise mint a fresh one. Anything
    /// that is not a UUID is dropped so arbitrary header text never reaches logs.
    pub fn from_header(value: Option<&str>) -> Self {
        let id = value
            .and_then(|v| Uuid::parse_str(v.trim()).ok())
            .unwrap_or_else(Uuid::new_v4);
        Self(id.hyphenated().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Trace id of the current request, or `"unknown"` outside a request.
pub fn trace_id() -> String {
    TRACE_ID
        .try_with(Clone::clone)
        .unwrap_or_else(|_| UNKNOWN.to_string())
}

/// Run `future` with `trace_id` as the current trace id.
pub async fn with_trace_id<F, R>(trace_id: String, future: F) -> R
where
    F: std::future::Future<Output = R>,
{
    TRACE_ID.scope(trace_id, future).await
}

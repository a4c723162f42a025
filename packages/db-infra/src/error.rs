use thiserror::Error;

#[derive(Debug, Error)]
pub enum DbInfraError {
    /// Connection URL could not be resolved, or async was requested while disabled.
    #[error("Configuration error: {message}")]
    Config { message: String },
    /// The engine could not reach the database (network, auth, TLS).
    #[error("Connectivity error: {message}")]
    Connectivity { message: String },
    /// A statement issued through a session failed.
    #[error("Query error: {message}")]
    Query { message: String },
}

pub const ERR_NO_CONNECTION: &str = "could not build database connection";
pub const ERR_ASYNC_NOT_CONFIGURED: &str =
    "async connection not configured; set USE_ASYNC_DRIVER=true";
pub const ERR_ENGINE_DISPOSED: &str = "database engine has been disposed";

impl DbInfraError {
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    pub fn connectivity(message: impl Into<String>) -> Self {
        Self::Connectivity {
            message: message.into(),
        }
    }

    pub fn query(message: impl Into<String>) -> Self {
        Self::Query {
            message: message.into(),
        }
    }

    pub fn async_not_configured() -> Self {
        Self::config(ERR_ASYNC_NOT_CONFIGURED)
    }

    pub fn is_config(&self) -> bool {
        matches!(self, Self::Config { .. })
    }
}

impl From<sea_orm::DbErr> for DbInfraError {
    fn from(e: sea_orm::DbErr) -> Self {
        match e {
            sea_orm::DbErr::Conn(inner) => Self::connectivity(inner.to_string()),
            sea_orm::DbErr::ConnectionAcquire(inner) => Self::connectivity(inner.to_string()),
            other => Self::query(other.to_string()),
        }
    }
}

impl From<postgres::Error> for DbInfraError {
    fn from(e: postgres::Error) -> Self {
        // Server-side errors carry a SQLSTATE; everything else is transport.
        match e.as_db_error() {
            Some(db) => Self::query(format!("{} ({})", db.message(), db.code().code())),
            None => Self::connectivity(e.to_string()),
        }
    }
}

impl From<r2d2::Error> for DbInfraError {
    fn from(e: r2d2::Error) -> Self {
        Self::connectivity(format!("failed to check out sync connection: {e}"))
    }
}

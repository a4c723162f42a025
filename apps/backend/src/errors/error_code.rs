//! Error codes for the backend API.
//!
//! Every code that can appear in a problem+json body is listed here; never
//! pass ad-hoc strings as error codes.

use core::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    // Database
    /// A statement failed; the transaction was rolled back.
    DbError,
    /// The database could not be reached.
    DbUnavailable,
    /// The requested engine is not configured (e.g. async mode disabled).
    DbConfig,

    Internal,
}

impl ErrorCode {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::DbError => "DB_ERROR",
            Self::DbUnavailable => "DB_UNAVAILABLE",
            Self::DbConfig => "DB_CONFIG",

            Self::Internal => "INTERNAL",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

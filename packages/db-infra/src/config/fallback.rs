//! Local-development fallback for connection resolution.
//!
//! When neither an explicit URL nor a complete set of discrete fields is
//! configured, and the process is not running in a deployment environment,
//! the resolver asks a [`LocalDbProvider`] for a connection string. The
//! provider is supplied by the caller; nothing here reaches into deployment
//! configuration on its own.

/// Source of a connection string for a local development database.
pub trait LocalDbProvider: Send + Sync {
    fn get_db_connection_local(&self) -> Option<String>;
}

/// Provider that never yields a URL. Resolution then fails loudly.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoLocalDb;

impl LocalDbProvider for NoLocalDb {
    fn get_db_connection_local(&self) -> Option<String> {
        None
    }
}

/// A fixed URL, mostly useful for tests and one-off tooling.
#[derive(Debug, Clone)]
pub struct StaticLocalDb(pub String);

impl LocalDbProvider for StaticLocalDb {
    fn get_db_connection_local(&self) -> Option<String> {
        Some(self.0.clone())
    }
}

/// The development database container published on the developer's machine.
#[derive(Debug, Clone)]
pub struct DevDbResource {
    pub enabled: bool,
    pub user: String,
    pub password: String,
    pub database: String,
    /// Port published on localhost.
    pub host_port: u16,
}

impl Default for DevDbResource {
    fn default() -> Self {
        Self {
            enabled: true,
            user: "api".to_string(),
            password: "api".to_string(),
            database: "api".to_string(),
            host_port: 5432,
        }
    }
}

impl DevDbResource {
    /// Read overrides from `DEV_DB_USER`, `DEV_DB_PASS`, `DEV_DB_DATABASE`, `DEV_DB_PORT`, `DEV_DB_ENABLED`.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        Self {
            enabled: get("DEV_DB_ENABLED")
                .map(|v| super::db::parse_bool(&v))
                .unwrap_or(defaults.enabled),
            user: get("DEV_DB_USER").unwrap_or(defaults.user),
            password: get("DEV_DB_PASS").unwrap_or(defaults.password),
            database: get("DEV_DB_DATABASE").unwrap_or(defaults.database),
            host_port: get("DEV_DB_PORT")
                .and_then(|v| v.trim().parse().ok())
                .unwrap_or(defaults.host_port),
        }
    }
}

impl LocalDbProvider for DevDbResource {
    fn get_db_connection_local(&self) -> Option<String> {
        if !self.enabled {
            return None;
        }
        Some(format!(
            "postgresql://{}:{}@localhost:{}/{}",
            self.user, self.password, self.host_port, self.database
        ))
    }
}

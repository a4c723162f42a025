//! Connection-string scheme rewriting.
//!
//! Resolved URLs keep a `scheme+driver://` form (`postgresql+psycopg://`,
//! `postgresql+asyncpg://`) so the mode a URL was resolved for stays visible
//! in logs and diagnostics. The client libraries only accept the bare
//! scheme, which [`connect_url`] produces right before an engine is built.

/// Canonical scheme understood by the client libraries.
pub const CANONICAL_SCHEME: &str = "postgresql";
/// Short-form alias emitted by hosting providers (`postgres://`).
pub const LEGACY_SCHEME: &str = "postgres";
/// Driver-tagged scheme used for async engines.
pub const ASYNC_DRIVER: &str = "postgresql+asyncpg";
/// Driver-tagged scheme used for sync engines unless `DB_DRIVER` overrides it.
pub const DEFAULT_SYNC_DRIVER: &str = "postgresql+psycopg";
/// Host substring identifying the managed cloud provider that mandates TLS.
pub const MANAGED_HOST_MARKER: &str = "neon.tech";

/// Split `scheme://rest` into `(scheme, rest)`.
fn split_scheme(url: &str) -> Option<(&str, &str)> {
    let idx = url.find("://")?;
    Some((&url[..idx], &url[idx + 3..]))
}

/// Split a scheme into its base and optional driver suffix.
fn split_driver(scheme: &str) -> (&str, Option<&str>) {
    match scheme.split_once('+') {
        Some((base, driver)) => (base, Some(driver)),
        None => (scheme, None),
    }
}

fn is_postgres_base(base: &str) -> bool {
    base == CANONICAL_SCHEME || base == LEGACY_SCHEME
}

/// Rewrite the legacy `postgres` alias to `postgresql`, keeping any driver suffix.
///
/// Non-postgres URLs and strings without a scheme are returned unchanged.
pub fn normalize_scheme(url: &str) -> String {
    let Some((scheme, rest)) = split_scheme(url) else {
        return url.to_string();
    };
    match split_driver(scheme) {
        (LEGACY_SCHEME, Some(driver)) => format!("{CANONICAL_SCHEME}+{driver}://{rest}"),
        (LEGACY_SCHEME, None) => format!("{CANONICAL_SCHEME}://{rest}"),
        _ => url.to_string(),
    }
}

/// Rewrite a postgres URL to the async driver scheme.
///
/// The alias is normalized first; an existing driver suffix is replaced
/// rather than stacked.
pub fn to_async_scheme(url: &str) -> String {
    let normalized = normalize_scheme(url);
    let Some((scheme, rest)) = split_scheme(&normalized) else {
        return normalized;
    };
    let (base, _) = split_driver(scheme);
    if base == CANONICAL_SCHEME {
        format!("{ASYNC_DRIVER}://{rest}")
    } else {
        normalized
    }
}

/// Produce the string handed to the client library: canonical scheme, no driver suffix.
pub fn connect_url(url: &str) -> String {
    let Some((scheme, rest)) = split_scheme(url) else {
        return url.to_string();
    };
    let (base, _) = split_driver(scheme);
    if is_postgres_base(base) {
        format!("{CANONICAL_SCHEME}://{rest}")
    } else {
        url.to_string()
    }
}

/// True when the URL points at the managed cloud provider.
pub fn is_managed_host(url: &str) -> bool {
    url.contains(MANAGED_HOST_MARKER)
}

/// Mask the password of a connection string for logs and error messages.
pub fn sanitize_db_url(url: &str) -> String {
    let Some((scheme, rest)) = split_scheme(url) else {
        return url.to_string();
    };
    let authority_end = rest.find(&['/', '?', '#'][..]).unwrap_or(rest.len());
    let (authority, tail) = rest.split_at(authority_end);
    let Some(at) = authority.rfind('@') else {
        return url.to_string();
    };
    let (userinfo, host) = authority.split_at(at);
    match userinfo.split_once(':') {
        Some((user, _)) => format!("{scheme}://{user}:***{host}{tail}"),
        None => url.to_string(),
    }
}

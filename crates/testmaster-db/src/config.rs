use std::env;

/// Database configuration.
///
/// Reads from the `TESTMASTER_DATABASE_URL` environment variable, falling
/// back to `postgresql://localhost:5432/testmaster` when unset. The pool
/// size comes from `TESTMASTER_DB_MAX_CONNECTIONS`.
#[derive(Debug, Clone)]
pub struct DbConfig {
    /// Full PostgreSQL connection URL.
    pub database_url: String,
    /// Upper bound on pooled connections. Never zero.
    pub max_connections: u32,
}

impl DbConfig {
    /// The default connection URL used when no environment variable is set.
    pub const DEFAULT_URL: &str = "postgresql://localhost:5432/testmaster";

    /// Pool size when none is configured. `serve` holds one connection per
    /// in-flight request; the CLI rarely needs more than two.
    pub const DEFAULT_MAX_CONNECTIONS: u32 = 10;

    /// Environment variable consulted by [`DbConfig::from_env`].
    pub const ENV_VAR: &str = "TESTMASTER_DATABASE_URL";

    /// Environment variable holding the pool size.
    pub const MAX_CONNECTIONS_ENV_VAR: &str = "TESTMASTER_DB_MAX_CONNECTIONS";

    /// Build a config from the environment. An unparseable pool size is
    /// ignored in favour of the default.
    pub fn from_env() -> Self {
        let database_url =
            env::var(Self::ENV_VAR).unwrap_or_else(|_| Self::DEFAULT_URL.to_owned());
        let config = Self::new(database_url);
        match env::var(Self::MAX_CONNECTIONS_ENV_VAR) {
            Ok(raw) => match parse_max_connections(&raw) {
                Some(n) => config.with_max_connections(n),
                None => {
                    tracing::warn!(value = %raw, "ignoring invalid {}", Self::MAX_CONNECTIONS_ENV_VAR);
                    config
                }
            },
            Err(_) => config,
        }
    }

    /// Build a config from an explicit URL (useful for tests and CLI flags).
    pub fn new(database_url: impl Into<String>) -> Self {
        Self {
            database_url: database_url.into(),
            max_connections: Self::DEFAULT_MAX_CONNECTIONS,
        }
    }

    /// Replace the pool size; zero is raised to one.
    pub fn with_max_connections(mut self, max_connections: u32) -> Self {
        self.max_connections = max_connections.max(1);
        self
    }

    /// Split the URL into `(prefix_up_to_last_slash, db_name, query)`.
    fn split(&self) -> Option<(&str, &str, Option<&str>)> {
        let pos = self.database_url.rfind('/')?;
        let prefix = &self.database_url[..pos];
        // Only a path after the authority counts: "postgresql://host" has no db.
        if prefix.ends_with('/') || prefix.ends_with(':') {
            return None;
        }
        let tail = &self.database_url[pos + 1..];
        let (name, query) = match tail.split_once('?') {
            Some((n, q)) => (n, Some(q)),
            None => (tail, None),
        };
        Some((prefix, name, query))
    }

    /// Extract the database name from the URL.
    ///
    /// Returns `None` if the URL has no path component. Query parameters
    /// (`?sslmode=...`) are not part of the name.
    pub fn database_name(&self) -> Option<&str> {
        self.split()
            .map(|(_, name, _)| name)
            .filter(|s| !s.is_empty())
    }

    /// Return a URL pointing at the `postgres` maintenance database on the
    /// same host, preserving any query parameters.
    pub fn maintenance_url(&self) -> String {
        match self.split() {
            Some((prefix, _, Some(query))) => format!("{prefix}/postgres?{query}"),
            Some((prefix, _, None)) => format!("{prefix}/postgres"),
            None => self.database_url.clone(),
        }
    }
}

/// Parse a pool size as written in the environment or config file.
pub fn parse_max_connections(raw: &str) -> Option<u32> {
    raw.trim().parse::<u32>().ok().filter(|n| *n > 0)
}

impl Default for DbConfig {
    fn default() -> Self {
        Self::from_env()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_url() {
        let cfg = DbConfig::new(DbConfig::DEFAULT_URL);
        assert_eq!(cfg.database_url, "postgresql://localhost:5432/testmaster");
        assert_eq!(cfg.database_name(), Some("testmaster"));
    }

    #[test]
    fn database_name_extraction() {
        let cfg = DbConfig::new("postgresql://localhost:5432/mydb");
        assert_eq!(cfg.database_name(), Some("mydb"));
    }

    #[test]
    fn database_name_ignores_query() {
        let cfg = DbConfig::new("postgresql://u:p@db:5432/qa?sslmode=require");
        assert_eq!(cfg.database_name(), Some("qa"));
        assert_eq!(
            cfg.maintenance_url(),
            "postgresql://u:p@db:5432/postgres?sslmode=require"
        );
    }

    #[test]
    fn no_database_in_url() {
        let cfg = DbConfig::new("postgresql://localhost:5432");
        assert_eq!(cfg.database_name(), None);
        assert_eq!(cfg.maintenance_url(), "postgresql://localhost:5432");
    }

    #[test]
    fn pool_size_defaults_and_is_never_zero() {
        let cfg = DbConfig::new(DbConfig::DEFAULT_URL);
        assert_eq!(cfg.max_connections, DbConfig::DEFAULT_MAX_CONNECTIONS);
        assert_eq!(cfg.clone().with_max_connections(3).max_connections, 3);
        assert_eq!(cfg.with_max_connections(0).max_connections, 1);

        assert_eq!(parse_max_connections(" 25 "), Some(25));
        assert_eq!(parse_max_connections("0"), None);
        assert_eq!(parse_max_connections("-4"), None);
        assert_eq!(parse_max_connections("lots"), None);
    }

    #[test]
    fn maintenance_url_replaces_db() {
        let cfg = DbConfig::new("postgresql://localhost:5432/testmaster");
        assert_eq!(cfg.maintenance_url(), "postgresql://localhost:5432/postgres");
    }
}

//! Database configuration and backend selection.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Connection parameters for the primary (remote) SurrealDB.
#[derive(Clone, PartialEq, Serialize, Deserialize)]
pub struct PrimaryConfig {
    /// Hostname, or a full URL with scheme (e.g. "wss://db.example.com")
    pub host: String,
    /// Port the SurrealDB server listens on
    #[serde(default = "default_port")]
    pub port: u16,
    /// Database username
    pub username: String,
    /// Database password
    pub password: String,
    /// Namespace (default: "pitwall")
    #[serde(default = "default_namespace")]
    pub namespace: String,
    /// Database name (default: "main")
    #[serde(default = "default_database")]
    pub database: String,
    /// Whether this is a root user (true) or database user (false)
    #[serde(default)]
    pub root: bool,
}

fn default_port() -> u16 {
    8000
}

fn default_namespace() -> String {
    "pitwall".to_string()
}

fn default_database() -> String {
    "main".to_string()
}

impl std::fmt::Debug for PrimaryConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PrimaryConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("namespace", &self.namespace)
            .field("database", &self.database)
            .field("root", &self.root)
            .finish()
    }
}

impl PrimaryConfig {
    /// Create a configuration for a database user
    pub fn new(
        host: impl Into<String>,
        port: u16,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self {
            host: host.into(),
            port,
            username: username.into(),
            password: password.into(),
            namespace: default_namespace(),
            database: default_database(),
            root: false,
        }
    }

    /// Set custom namespace
    pub fn with_namespace(mut self, ns: impl Into<String>) -> Self {
        self.namespace = ns.into();
        self
    }

    /// Set custom database
    pub fn with_database(mut self, db: impl Into<String>) -> Self {
        self.database = db.into();
        self
    }

    /// Set whether this is a root user
    pub fn with_root(mut self, root: bool) -> Self {
        self.root = root;
        self
    }

    /// WebSocket endpoint for `surrealdb::engine::any::connect`.
    ///
    /// A bare host gets the `ws://` scheme; a host that already carries a
    /// scheme is used as given.
    pub fn endpoint(&self) -> String {
        if self.host.contains("://") {
            format!("{}:{}", self.host.trim_end_matches('/'), self.port)
        } else {
            format!("ws://{}:{}", self.host, self.port)
        }
    }

    /// Create from environment variables
    ///
    /// Reads:
    /// - PITWALL_DB_HOST (required)
    /// - PITWALL_DB_USERNAME (required)
    /// - PITWALL_DB_PASSWORD (required)
    /// - PITWALL_DB_PORT (optional, default: 8000)
    /// - PITWALL_DB_NAMESPACE (optional, default: "pitwall")
    /// - PITWALL_DB_DATABASE (optional, default: "main")
    /// - PITWALL_DB_ROOT (optional, default: "false")
    pub fn from_env() -> std::result::Result<Self, String> {
        let host = std::env::var("PITWALL_DB_HOST").map_err(|_| "PITWALL_DB_HOST not set")?;
        let username =
            std::env::var("PITWALL_DB_USERNAME").map_err(|_| "PITWALL_DB_USERNAME not set")?;
        let password =
            std::env::var("PITWALL_DB_PASSWORD").map_err(|_| "PITWALL_DB_PASSWORD not set")?;
        let port = match std::env::var("PITWALL_DB_PORT") {
            Ok(raw) => raw
                .parse::<u16>()
                .map_err(|_| format!("PITWALL_DB_PORT is not a valid port: {raw}"))?,
            Err(_) => default_port(),
        };
        let namespace =
            std::env::var("PITWALL_DB_NAMESPACE").unwrap_or_else(|_| default_namespace());
        let database = std::env::var("PITWALL_DB_DATABASE").unwrap_or_else(|_| default_database());
        let root = std::env::var("PITWALL_DB_ROOT")
            .map(|v| v.to_lowercase() == "true")
            .unwrap_or(false);

        Ok(Self::new(host, port, username, password)
            .with_namespace(namespace)
            .with_database(database)
            .with_root(root))
    }
}

/// Database section of the pipeline configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// Remote database; when absent the fallback path is used
    pub primary: Option<PrimaryConfig>,
    /// Directory for the local file-backed database
    pub fallback_path: PathBuf,
    /// Upper bound on concurrent writes sharing the connection
    pub max_concurrent_writes: usize,
    /// Deadline for a single write
    pub write_timeout_secs: u64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            primary: None,
            fallback_path: PathBuf::from("data/pitwall.db"),
            max_concurrent_writes: 4,
            write_timeout_secs: 10,
        }
    }
}

/// The backend chosen for this process. Resolved once; never re-evaluated.
#[derive(Debug, Clone, PartialEq)]
pub enum BackendSelection {
    Primary(PrimaryConfig),
    Fallback(PathBuf),
}

impl BackendSelection {
    /// Primary parameters present means primary; otherwise the fallback path.
    pub fn resolve(config: &DatabaseConfig) -> Self {
        match &config.primary {
            Some(primary) => BackendSelection::Primary(primary.clone()),
            None => BackendSelection::Fallback(config.fallback_path.clone()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bare_host_gets_ws_scheme() {
        let cfg = PrimaryConfig::new("db.local", 8000, "u", "p");
        assert_eq!(cfg.endpoint(), "ws://db.local:8000");
    }

    #[test]
    fn host_with_scheme_is_kept() {
        let cfg = PrimaryConfig::new("wss://db.example.com/", 443, "u", "p");
        assert_eq!(cfg.endpoint(), "wss://db.example.com:443");
    }

    #[test]
    fn debug_redacts_password() {
        let cfg = PrimaryConfig::new("db.local", 8000, "user", "hunter2");
        let shown = format!("{cfg:?}");
        assert!(!shown.contains("hunter2"));
        assert!(shown.contains("<redacted>"));
    }

    #[test]
    fn selection_prefers_primary_when_present() {
        let config = DatabaseConfig {
            primary: Some(PrimaryConfig::new("db.local", 8000, "u", "p")),
            ..DatabaseConfig::default()
        };
        assert!(matches!(
            BackendSelection::resolve(&config),
            BackendSelection::Primary(_)
        ));
    }

    #[test]
    fn selection_uses_fallback_without_primary() {
        let config = DatabaseConfig::default();
        assert_eq!(
            BackendSelection::resolve(&config),
            BackendSelection::Fallback(PathBuf::from("data/pitwall.db"))
        );
    }

    #[test]
    fn from_env_applies_optional_overrides() {
        // Only test in this crate touching PITWALL_DB_* variables.
        std::env::set_var("PITWALL_DB_HOST", "db.track");
        std::env::set_var("PITWALL_DB_USERNAME", "root");
        std::env::set_var("PITWALL_DB_PASSWORD", "secret");
        std::env::set_var("PITWALL_DB_PORT", "8100");
        std::env::set_var("PITWALL_DB_NAMESPACE", "race");
        std::env::set_var("PITWALL_DB_DATABASE", "sunday");
        std::env::set_var("PITWALL_DB_ROOT", "TRUE");

        let cfg = PrimaryConfig::from_env().unwrap();
        assert_eq!(cfg.endpoint(), "ws://db.track:8100");
        assert_eq!(cfg.namespace, "race");
        assert_eq!(cfg.database, "sunday");
        assert!(cfg.root);

        std::env::set_var("PITWALL_DB_PORT", "not-a-port");
        assert!(PrimaryConfig::from_env().unwrap_err().contains("PITWALL_DB_PORT"));

        for var in [
            "PITWALL_DB_HOST",
            "PITWALL_DB_USERNAME",
            "PITWALL_DB_PASSWORD",
            "PITWALL_DB_PORT",
            "PITWALL_DB_NAMESPACE",
            "PITWALL_DB_DATABASE",
            "PITWALL_DB_ROOT",
        ] {
            std::env::remove_var(var);
        }
        assert!(PrimaryConfig::from_env().is_err());
    }

    #[test]
    fn primary_section_parses_with_defaults() {
        let cfg: PrimaryConfig = serde_json::from_value(serde_json::json!({
            "host": "db.local",
            "username": "u",
            "password": "p",
        }))
        .unwrap();
        assert_eq!(cfg.port, 8000);
        assert_eq!(cfg.namespace, "pitwall");
        assert_eq!(cfg.database, "main");
        assert!(!cfg.root);
    }
}

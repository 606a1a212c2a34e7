//! # Configuration
//!
//! The struct shape the core consumes, per `spec.md` §6. Loading — file
//! discovery, profile selection, environment overlay precedence — is a CLI
//! concern out of scope for this crate; what lives here is the settings
//! object itself, built with the `config` crate the same way
//! `tasker-shared::config` composes its sources.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// TLS posture for a database connection. See `spec.md` §4.1.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TlsMode {
    Disable,
    Prefer,
    Require,
}

impl Default for TlsMode {
    fn default() -> Self {
        Self::Prefer
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub host: String,
    pub port: u16,
    pub database: String,
    pub user: String,
    #[serde(skip_serializing)]
    pub password: String,
    pub tls_mode: TlsMode,
    pub pool_min: u32,
    pub pool_max: u32,
    pub connect_timeout_secs: u64,
    pub statement_timeout_secs: u64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 5432,
            database: "meridian".to_string(),
            user: "meridian".to_string(),
            password: String::new(),
            tls_mode: TlsMode::default(),
            pool_min: 2,
            pool_max: 10,
            connect_timeout_secs: 5,
            statement_timeout_secs: 30,
        }
    }
}

impl DatabaseConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn statement_timeout(&self) -> Duration {
        Duration::from_secs(self.statement_timeout_secs)
    }

    /// Connection string without embedding TLS mode, which sqlx's
    /// `PgConnectOptions` takes as a separate `ssl_mode` call.
    pub fn connection_string(&self) -> String {
        format!(
            "postgres://{}:{}@{}:{}/{}",
            self.user, self.password, self.host, self.port, self.database
        )
    }
}

/// TLS material for the push server's listener.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TlsConfig {
    pub cert_path: Option<String>,
    pub key_path: Option<String>,
    pub ca_path: Option<String>,
    pub require_client_cert: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PushServerConfig {
    pub host: String,
    pub port: u16,
    pub max_connections: usize,
    pub auth_enabled: bool,
    pub jwt_secret: String,
    pub jwt_expiry_secs: u64,
    pub inbound_rate_per_sec: f64,
    pub inbound_burst: Option<f64>,
    pub cleanup_interval_secs: u64,
    pub tls: TlsConfig,
}

impl Default for PushServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 7878,
            max_connections: 10_000,
            auth_enabled: true,
            jwt_secret: String::new(),
            jwt_expiry_secs: 3600,
            inbound_rate_per_sec: 100.0,
            inbound_burst: None,
            cleanup_interval_secs: 300,
            tls: TlsConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BroadcasterConfig {
    pub buffer_enabled: bool,
    pub buffer_capacity: usize,
}

impl Default for BroadcasterConfig {
    fn default() -> Self {
        Self {
            // `spec.md` §9: "production default is buffering disabled to
            // avoid stale replay."
            buffer_enabled: false,
            buffer_capacity: 1000,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ImportFilterConfig {
    pub repo_allow_list: Vec<String>,
    pub label_allow_list: Vec<String>,
    pub skip_closed: bool,
}

/// Shared-secret material for verifying the two inbound webhook endpoints.
/// See `spec.md` §4.10 and §6.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WebhookConfig {
    #[serde(skip_serializing)]
    pub github_secret: Option<String>,
    #[serde(skip_serializing)]
    pub gitlab_token: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MeridianConfig {
    pub database: DatabaseConfig,
    pub push_server: PushServerConfig,
    pub broadcaster: BroadcasterConfig,
    pub import_filter: ImportFilterConfig,
    pub webhooks: WebhookConfig,
}

impl Default for MeridianConfig {
    fn default() -> Self {
        Self {
            database: DatabaseConfig::default(),
            push_server: PushServerConfig::default(),
            broadcaster: BroadcasterConfig::default(),
            import_filter: ImportFilterConfig::default(),
            webhooks: WebhookConfig::default(),
        }
    }
}

impl MeridianConfig {
    /// Build from layered sources: defaults, an optional TOML file, then
    /// environment variables prefixed `MERIDIAN_` (double underscore nesting,
    /// e.g. `MERIDIAN_DATABASE__HOST`). Mirrors the layering
    /// `tasker-shared::config::ConfigManager` uses, minus the CLI profile
    /// selection that is out of scope here.
    pub fn load(path: Option<&str>) -> Result<Self, config::ConfigError> {
        let mut builder = config::Config::builder()
            .add_source(config::Config::try_from(&Self::default())?);
        if let Some(path) = path {
            builder = builder.add_source(config::File::with_name(path).required(false));
        }
        builder = builder.add_source(
            config::Environment::with_prefix("MERIDIAN")
                .separator("__")
                .try_parsing(true),
        );
        builder.build()?.try_deserialize()
    }
}

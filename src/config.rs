//! Layered configuration for the PMO toolbox.
//!
//! Settings are read from `pmo.toml`, then overridden by environment
//! variables (a `.env` file is loaded first), then by CLI flags.
//!
//! # Configuration File Format
//!
//! ```toml
//! [server]
//! host = "127.0.0.1"
//! port = 3002
//! cors = true
//!
//! [database]
//! path = ".pmo/pmo.db"
//!
//! [auth]
//! jwt_secret = "change-me"
//! token_ttl = "1d"
//! bcrypt_cost = 10
//!
//! [logging]
//! level = "info"
//! format = "pretty"
//! directory = "logs"
//! ```

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Secret used when nothing is configured. `validate` warns about it.
pub const DEFAULT_JWT_SECRET: &str = "default-secret";

pub const DEFAULT_CONFIG_FILE: &str = "pmo.toml";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerSection {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Permissive CORS for a frontend served from another origin.
    #[serde(default = "default_cors")]
    pub cors: bool,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    3002
}

fn default_cors() -> bool {
    true
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            cors: default_cors(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseSection {
    #[serde(default = "default_db_path")]
    pub path: PathBuf,
}

fn default_db_path() -> PathBuf {
    PathBuf::from(".pmo/pmo.db")
}

impl Default for DatabaseSection {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthSection {
    #[serde(default = "default_jwt_secret")]
    pub jwt_secret: String,
    /// Token lifetime: `1d`, `12h`, `30m`, `45s` or bare seconds.
    #[serde(default = "default_token_ttl")]
    pub token_ttl: String,
    #[serde(default = "default_bcrypt_cost")]
    pub bcrypt_cost: u32,
}

fn default_jwt_secret() -> String {
    DEFAULT_JWT_SECRET.to_string()
}

fn default_token_ttl() -> String {
    "1d".to_string()
}

fn default_bcrypt_cost() -> u32 {
    10
}

impl Default for AuthSection {
    fn default() -> Self {
        Self {
            jwt_secret: default_jwt_secret(),
            token_ttl: default_token_ttl(),
            bcrypt_cost: default_bcrypt_cost(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

impl std::str::FromStr for LogFormat {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pretty" => Ok(LogFormat::Pretty),
            "json" => Ok(LogFormat::Json),
            _ => anyhow::bail!("Invalid log format '{}'. Valid values: pretty, json", s),
        }
    }
}

impl std::fmt::Display for LogFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LogFormat::Pretty => write!(f, "pretty"),
            LogFormat::Json => write!(f, "json"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingSection {
    #[serde(default = "default_log_level")]
    pub level: String,
    /// `pretty` or `json`. Anything else falls back to pretty with a
    /// `validate()` warning.
    #[serde(default = "default_log_format")]
    pub format: String,
    /// When set, logs are also written to a daily rolling file here.
    #[serde(default)]
    pub directory: Option<PathBuf>,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    LogFormat::default().to_string()
}

impl LoggingSection {
    pub fn log_format(&self) -> LogFormat {
        self.format.parse().unwrap_or_default()
    }
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
            directory: None,
        }
    }
}

/// On-disk shape of `pmo.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PmoToml {
    #[serde(default)]
    pub server: ServerSection,
    #[serde(default)]
    pub database: DatabaseSection,
    #[serde(default)]
    pub auth: AuthSection,
    #[serde(default)]
    pub logging: LoggingSection,
}

impl PmoToml {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).context("Failed to parse pmo.toml")
    }

    /// Returns defaults when the file does not exist.
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if path.exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self).context("Failed to serialize pmo.toml")?;
        std::fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;
        Ok(())
    }

    /// Apply environment overrides in place.
    pub fn apply_env(&mut self) {
        self.apply_env_with(|key| std::env::var(key).ok());
    }

    fn apply_env_with(&mut self, get: impl Fn(&str) -> Option<String>) {
        if let Some(host) = get("PMO_HOST") {
            self.server.host = host;
        }
        if let Some(port) = get("PORT").and_then(|p| p.parse().ok()) {
            self.server.port = port;
        }
        if let Some(path) = get("DATABASE_PATH") {
            self.database.path = PathBuf::from(path);
        }
        if let Some(secret) = get("JWT_SECRET") {
            self.auth.jwt_secret = secret;
        }
        if let Some(ttl) = get("JWT_EXPIRES_IN") {
            self.auth.token_ttl = ttl;
        }
    }

    /// Validate the configuration and return any warnings.
    pub fn validate(&self) -> Vec<String> {
        let mut warnings = Vec::new();

        if self.auth.jwt_secret == DEFAULT_JWT_SECRET {
            warnings.push(
                "auth.jwt_secret is the built-in default; set JWT_SECRET before deploying"
                    .to_string(),
            );
        }
        if parse_duration(&self.auth.token_ttl).is_none() {
            warnings.push(format!(
                "Invalid auth.token_ttl '{}': expected e.g. '1d', '12h', '30m' or seconds",
                self.auth.token_ttl
            ));
        }
        if !(4..=31).contains(&self.auth.bcrypt_cost) {
            warnings.push(format!(
                "auth.bcrypt_cost {} is outside the supported range 4..=31",
                self.auth.bcrypt_cost
            ));
        }
        if self.server.port == 0 {
            warnings.push("server.port 0 binds a random port".to_string());
        }
        if let Err(err) = self.logging.format.parse::<LogFormat>() {
            warnings.push(format!("logging.format: {}; using pretty", err));
        }

        warnings
    }
}

/// Resolved runtime configuration.
#[derive(Debug, Clone)]
pub struct PmoConfig {
    pub config_path: PathBuf,
    pub toml: PmoToml,
}

impl PmoConfig {
    /// Load `.env`, the config file and environment overrides.
    pub fn load(config_path: Option<&Path>) -> Result<Self> {
        // A missing .env is the common case.
        let _ = dotenvy::dotenv();

        let config_path = config_path
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE));
        let mut toml = PmoToml::load_or_default(&config_path)?;
        toml.apply_env();

        Ok(Self { config_path, toml })
    }

    pub fn with_overrides(
        mut self,
        host: Option<String>,
        port: Option<u16>,
        db_path: Option<PathBuf>,
    ) -> Self {
        if let Some(host) = host {
            self.toml.server.host = host;
        }
        if let Some(port) = port {
            self.toml.server.port = port;
        }
        if let Some(db_path) = db_path {
            self.toml.database.path = db_path;
        }
        self
    }

    /// Token lifetime, falling back to one day when unparseable.
    pub fn token_ttl(&self) -> Duration {
        parse_duration(&self.toml.auth.token_ttl).unwrap_or(Duration::from_secs(86_400))
    }

    pub fn validate(&self) -> Vec<String> {
        self.toml.validate()
    }
}

/// Parse `1d`, `12h`, `30m`, `45s` or a bare number of seconds.
pub fn parse_duration(value: &str) -> Option<Duration> {
    let value = value.trim();
    if value.is_empty() {
        return None;
    }
    let (digits, unit) = match value.char_indices().find(|(_, c)| !c.is_ascii_digit()) {
        Some((idx, _)) => value.split_at(idx),
        None => (value, "s"),
    };
    let amount: u64 = digits.parse().ok()?;
    let seconds = match unit {
        "s" => amount,
        "m" => amount.checked_mul(60)?,
        "h" => amount.checked_mul(3_600)?,
        "d" => amount.checked_mul(86_400)?,
        "w" => amount.checked_mul(604_800)?,
        _ => return None,
    };
    if seconds == 0 {
        return None;
    }
    Some(Duration::from_secs(seconds))
}

//! Configuration loading and validation.
//!
//! Loads `./intake.toml` (or `$INTAKE_CONFIG_PATH`, or an explicit
//! `--config`). A missing file yields defaults.
//!
//! Precedence: env vars > config file > defaults.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::engine::EngineSettings;
use crate::providers::ollama::DEFAULT_ENDPOINT;
use crate::resolver::ResolverPolicy;
use crate::routes::{RouteEntry, RouteTable};
use crate::session::cookie::DRAFT_COOKIE;
use crate::session::SessionBackend;

/// Default config file name in the working directory.
pub const DEFAULT_CONFIG_FILE: &str = "intake.toml";

// ── Top-level config ────────────────────────────────────────────

/// Top-level service configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    /// HTTP listener settings.
    pub server: ServerConfig,
    /// Completion service settings.
    pub completion: CompletionConfig,
    /// Session backend settings.
    pub session: SessionConfig,
    /// Missing-field policy and field validation.
    pub policy: PolicyConfig,
    /// SQLite datastore.
    pub database: DatabaseConfig,
    /// Caller identity.
    pub auth: AuthConfig,
    /// Log output.
    pub logging: LoggingConfig,
    /// Route table overrides. Empty means the built-in table.
    pub routes: Vec<RouteEntry>,
}

impl Config {
    /// Load with precedence env > file > defaults.
    ///
    /// `explicit` wins over `$INTAKE_CONFIG_PATH`, which wins over
    /// `./intake.toml`.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        Self::load_with(explicit, |key| std::env::var(key).ok())
    }

    /// [`Config::load`] with an injected env resolver.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed.
    pub fn load_with(
        explicit: Option<&Path>,
        env: impl Fn(&str) -> Option<String>,
    ) -> Result<Self> {
        let path = match explicit {
            Some(p) => p.to_path_buf(),
            None => Self::config_path_with(&env),
        };
        let mut config = Self::load_from_file(&path)?;
        config.apply_overrides(&env);
        Ok(config)
    }

    fn load_from_file(path: &Path) -> Result<Self> {
        match std::fs::read_to_string(path) {
            Ok(contents) => {
                tracing::info!(path = %path.display(), "loading config from file");
                Self::from_toml(&contents)
                    .with_context(|| format!("invalid config at {}", path.display()))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!(path = %path.display(), "no config file found, using defaults");
                Ok(Self::default())
            }
            Err(e) => Err(anyhow::anyhow!(
                "failed to read config at {}: {e}",
                path.display()
            )),
        }
    }

    fn config_path_with(env: impl Fn(&str) -> Option<String>) -> PathBuf {
        env("INTAKE_CONFIG_PATH").map_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE), PathBuf::from)
    }

    /// Apply environment variable overrides (env > config > defaults).
    ///
    /// Takes a resolver function so tests never touch the process environment.
    pub fn apply_overrides(&mut self, env: impl Fn(&str) -> Option<String>) {
        if let Some(v) = env("INTAKE_BIND") {
            self.server.bind = v;
        }
        if let Some(v) = env("INTAKE_COMPLETION_URL") {
            self.completion.endpoint = v;
        }
        if let Some(v) = env("INTAKE_MODEL") {
            self.completion.model = v;
        }
        override_number(&env, "INTAKE_COMPLETION_TIMEOUT_SECS", &mut self.completion.timeout_secs);
        override_number(&env, "INTAKE_COMPLETION_MAX_RETRIES", &mut self.completion.max_retries);
        if let Some(v) = env("INTAKE_SESSION_BACKEND") {
            match v.trim().to_lowercase().as_str() {
                "cookie" => self.session.backend = SessionBackend::Cookie,
                "memory" => self.session.backend = SessionBackend::Memory,
                "sqlite" => self.session.backend = SessionBackend::Sqlite,
                _ => tracing::warn!(
                    key = "INTAKE_SESSION_BACKEND",
                    value = %v,
                    "ignoring invalid env override"
                ),
            }
        }
        override_number(&env, "INTAKE_SESSION_TTL_SECS", &mut self.session.ttl_secs);
        if let Some(v) = env("INTAKE_DATABASE_PATH") {
            self.database.path = v;
        }
        if let Some(v) = env("INTAKE_AUTH_HEADER") {
            self.auth.header = v;
        }
        if let Some(v) = env("INTAKE_LOG_LEVEL") {
            self.logging.level = v;
        }
        if let Some(v) = env("INTAKE_LOG_DIR") {
            self.logging.dir = Some(PathBuf::from(v));
        }
    }

    /// Parse a TOML string into config.
    ///
    /// # Errors
    ///
    /// Returns an error when the TOML is malformed or has wrong types.
    pub fn from_toml(toml_str: &str) -> Result<Self> {
        toml::from_str(toml_str).context("failed to parse config TOML")
    }

    /// Reject configurations the service cannot run with.
    ///
    /// # Errors
    ///
    /// Returns the first problem found.
    pub fn validate(&self) -> Result<()> {
        let endpoint = url::Url::parse(&self.completion.endpoint).with_context(|| {
            format!("completion.endpoint is not a valid URL: {}", self.completion.endpoint)
        })?;
        if !matches!(endpoint.scheme(), "http" | "https") {
            anyhow::bail!("completion.endpoint must use http or https");
        }
        if self.completion.model.trim().is_empty() {
            anyhow::bail!("completion.model must not be empty");
        }
        if self.completion.timeout_secs == 0 {
            anyhow::bail!("completion.timeout_secs must be greater than zero");
        }
        if self.session.ttl_secs == 0 {
            anyhow::bail!("session.ttl_secs must be greater than zero");
        }
        if self.session.cookie_name.trim().is_empty() {
            anyhow::bail!("session.cookie_name must not be empty");
        }
        if self.policy.important_threshold == 0 || self.policy.total_threshold == 0 {
            anyhow::bail!("policy thresholds must be greater than zero");
        }
        if self.policy.phone_digits == 0 {
            anyhow::bail!("policy.phone_digits must be greater than zero");
        }
        if self.auth.header.trim().is_empty() {
            anyhow::bail!("auth.header must not be empty");
        }
        for route in &self.routes {
            if route.key.trim().is_empty() || !route.path.starts_with('/') {
                anyhow::bail!("route {:?} needs a key and an absolute path", route.key);
            }
        }
        Ok(())
    }

    /// The configured route table, or the built-in one.
    pub fn route_table(&self) -> RouteTable {
        if self.routes.is_empty() {
            RouteTable::default()
        } else {
            RouteTable::new(self.routes.clone())
        }
    }

    /// Engine tunables derived from `[policy]`, `[session]` and `[completion]`.
    pub fn engine_settings(&self) -> EngineSettings {
        EngineSettings {
            policy: self.policy.resolver_policy(),
            phone_digits: self.policy.phone_digits,
            session_ttl: self.session.ttl(),
            max_message_chars: self.completion.max_prompt_chars,
        }
    }
}

fn override_number<T: std::str::FromStr>(
    env: impl Fn(&str) -> Option<String>,
    key: &str,
    slot: &mut T,
) {
    if let Some(v) = env(key) {
        match v.trim().parse() {
            Ok(n) => *slot = n,
            Err(_) => tracing::warn!(key, value = %v, "ignoring invalid env override"),
        }
    }
}

// ── Sections ────────────────────────────────────────────────────

/// `[server]`.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Listen address.
    pub bind: String,
    /// Largest accepted request body.
    pub max_body_bytes: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1:8080".to_owned(),
            max_body_bytes: 65_536,
        }
    }
}

/// `[completion]`.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CompletionConfig {
    /// Generate endpoint URL.
    pub endpoint: String,
    /// Model identifier sent with each request.
    pub model: String,
    /// Per-request timeout.
    pub timeout_secs: u64,
    /// Extra attempts for transient failures.
    pub max_retries: u32,
    /// Base backoff between attempts.
    pub retry_backoff_ms: u64,
    /// Longest user message embedded in a prompt.
    pub max_prompt_chars: usize,
}

impl CompletionConfig {
    /// Request timeout.
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Retry backoff base.
    pub fn backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }
}

impl Default for CompletionConfig {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_ENDPOINT.to_owned(),
            model: "llama3.1:8b".to_owned(),
            timeout_secs: 60,
            max_retries: 1,
            retry_backoff_ms: 500,
            max_prompt_chars: 4000,
        }
    }
}

/// `[session]`.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Where session state lives.
    pub backend: SessionBackend,
    /// Cookie carrying the state (cookie backend).
    pub cookie_name: String,
    /// Session lifetime in seconds.
    pub ttl_secs: u64,
}

impl SessionConfig {
    /// Session lifetime.
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            backend: SessionBackend::Cookie,
            cookie_name: DRAFT_COOKIE.to_owned(),
            ttl_secs: 43_200,
        }
    }
}

/// `[policy]`.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PolicyConfig {
    /// Missing important fields that trigger a question.
    pub important_threshold: usize,
    /// Missing fields in total that trigger a question.
    pub total_threshold: usize,
    /// Never let "proceed anyway" skip a required field.
    pub required_is_hard_floor: bool,
    /// Required phone length.
    pub phone_digits: usize,
}

impl PolicyConfig {
    /// Thresholds as a resolver policy.
    pub fn resolver_policy(&self) -> ResolverPolicy {
        ResolverPolicy {
            important_threshold: self.important_threshold,
            total_threshold: self.total_threshold,
            required_is_hard_floor: self.required_is_hard_floor,
        }
    }
}

impl Default for PolicyConfig {
    fn default() -> Self {
        let policy = ResolverPolicy::default();
        Self {
            important_threshold: policy.important_threshold,
            total_threshold: policy.total_threshold,
            required_is_hard_floor: policy.required_is_hard_floor,
            phone_digits: 10,
        }
    }
}

/// `[database]`.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// SQLite file path.
    pub path: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: "data/intake.db".to_owned(),
        }
    }
}

/// `[auth]`.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    /// Header set by the upstream auth proxy with the caller id.
    pub header: String,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            header: "x-user-id".to_owned(),
        }
    }
}

/// `[logging]`.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Fallback filter when `RUST_LOG` is unset.
    pub level: String,
    /// Directory for JSON logs; console only when unset.
    pub dir: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_owned(),
            dir: None,
        }
    }
}

// ABOUTME: Configuration parsing from TOML file with environment variable overrides
// ABOUTME: Validates sync identities, services, and tunables; provides defaults for optional ones
use crate::paths;
use anyhow::{Context, Result};
use relaybot_core::{ServiceRecord, SyncConfig};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub clients: Vec<ClientConfig>,
    #[serde(default)]
    pub sync: SyncSettings,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub http: HttpConfig,
    #[serde(default)]
    pub services: Vec<ServiceConfig>,
}

/// One bot identity on a homeserver.
#[derive(Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    pub user_id: String,
    pub home_server: String,
    pub access_token: String,
    /// Run the long-poll sync loop for this identity.
    #[serde(default = "default_true")]
    pub sync: bool,
    /// Join rooms this identity is invited to.
    #[serde(default)]
    pub auto_join_rooms: bool,
    /// Inviters whose invites are accepted (empty = anyone).
    #[serde(default)]
    pub allowed_inviters: Vec<String>,
}

// Custom Debug impl to redact the access token
impl std::fmt::Debug for ClientConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientConfig")
            .field("user_id", &self.user_id)
            .field("home_server", &self.home_server)
            .field("access_token", &"[REDACTED]")
            .field("sync", &self.sync)
            .field("auto_join_rooms", &self.auto_join_rooms)
            .field("allowed_inviters", &self.allowed_inviters)
            .finish()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncSettings {
    #[serde(default = "default_sync_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default = "default_retry_backoff_secs")]
    pub retry_backoff_secs: u64,
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
    #[serde(default = "default_max_timeline")]
    pub max_timeline: usize,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            timeout_ms: default_sync_timeout_ms(),
            retry_backoff_secs: default_retry_backoff_secs(),
            channel_capacity: default_channel_capacity(),
            max_timeline: default_max_timeline(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_database_path")]
    pub path: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_database_path(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_http_host")]
    pub host: String,
    #[serde(default = "default_http_port")]
    pub port: u16,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            host: default_http_host(),
            port: default_http_port(),
        }
    }
}

/// A service declared in the config file; seeded into the database at boot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceConfig {
    pub id: String,
    #[serde(rename = "type")]
    pub service_type: String,
    #[serde(default)]
    pub owner: String,
    #[serde(default)]
    pub config: serde_json::Value,
}

impl ServiceConfig {
    pub fn to_record(&self) -> ServiceRecord {
        ServiceRecord {
            service_id: self.id.clone(),
            service_type: self.service_type.clone(),
            owner_user_id: self.owner.clone(),
            config: self.config.clone(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_sync_timeout_ms() -> u64 {
    30_000
}

fn default_retry_backoff_secs() -> u64 {
    5
}

fn default_channel_capacity() -> usize {
    5
}

fn default_max_timeline() -> usize {
    relaybot_core::room::DEFAULT_MAX_TIMELINE
}

fn default_database_path() -> String {
    paths::database_file().to_string_lossy().to_string()
}

fn default_http_host() -> String {
    "127.0.0.1".to_string()
}

fn default_http_port() -> u16 {
    4050
}

/// Expand tilde (~) to home directory in paths
fn expand_tilde(path: &str) -> String {
    if let Some(stripped) = path.strip_prefix("~/") {
        if let Some(base_dirs) = directories::BaseDirs::new() {
            return base_dirs
                .home_dir()
                .join(stripped)
                .to_string_lossy()
                .to_string();
        }
        tracing::warn!(
            path = %path,
            "Failed to expand tilde in path: could not determine home directory"
        );
    }
    path.to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            clients: Vec::new(),
            sync: SyncSettings::default(),
            database: DatabaseConfig::default(),
            http: HttpConfig::default(),
            services: Vec::new(),
        }
    }
}

impl Config {
    /// Find the config file, checking multiple locations in order:
    /// 1. RELAYBOT_CONFIG_PATH env var (if set)
    /// 2. ./config.toml (current directory - for development)
    /// 3. ~/.config/relaybot/config.toml (XDG config dir)
    fn find_config_file() -> Option<PathBuf> {
        if let Ok(env_path) = std::env::var("RELAYBOT_CONFIG_PATH") {
            let path = PathBuf::from(&env_path);
            if path.exists() {
                return Some(path);
            }
        }

        let local_config = PathBuf::from("config.toml");
        if local_config.exists() {
            return Some(local_config);
        }

        let xdg_config = paths::config_file();
        if xdg_config.exists() {
            return Some(xdg_config);
        }

        None
    }

    /// Load configuration from the first config file found, with environment overrides.
    pub fn load() -> Result<Self> {
        let config = match Self::find_config_file() {
            Some(path) => Self::read_file(&path)?,
            None => {
                tracing::info!("No config file found, using environment variables and defaults");
                Config::default()
            }
        };
        config.finish()
    }

    /// Load configuration from an explicit path, with environment overrides.
    pub fn load_from(path: &Path) -> Result<Self> {
        Self::read_file(path)?.finish()
    }

    fn read_file(path: &Path) -> Result<Self> {
        tracing::info!(path = %path.display(), "Loading configuration from file");
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        toml::from_str::<Config>(&content)
            .with_context(|| format!("Failed to parse {}", path.display()))
    }

    fn finish(mut self) -> Result<Self> {
        self.apply_env_overrides()?;
        self.database.path = expand_tilde(&self.database.path);
        self.validate()?;
        Ok(self)
    }

    fn apply_env_overrides(&mut self) -> Result<()> {
        let home_server = std::env::var("RELAYBOT_HOME_SERVER").ok();
        let user_id = std::env::var("RELAYBOT_USER_ID").ok();
        let access_token = std::env::var("RELAYBOT_ACCESS_TOKEN").ok();

        // Env identity overrides the first client, or creates one when complete.
        if let Some(client) = self.clients.first_mut() {
            if let Some(val) = home_server {
                client.home_server = val;
            }
            if let Some(val) = user_id {
                client.user_id = val;
            }
            if let Some(val) = access_token {
                client.access_token = val;
            }
        } else if let (Some(home_server), Some(user_id), Some(access_token)) =
            (home_server, user_id, access_token)
        {
            self.clients.push(ClientConfig {
                user_id,
                home_server,
                access_token,
                sync: true,
                auto_join_rooms: false,
                allowed_inviters: Vec::new(),
            });
        }

        if let Ok(val) = std::env::var("RELAYBOT_DATABASE_PATH") {
            self.database.path = val;
        }
        if let Ok(val) = std::env::var("RELAYBOT_HTTP_PORT") {
            self.http.port = val.parse().with_context(|| {
                format!("RELAYBOT_HTTP_PORT must be a valid port number, got: {}", val)
            })?;
        }
        if let Ok(val) = std::env::var("RELAYBOT_SYNC_TIMEOUT_MS") {
            self.sync.timeout_ms = val.parse().with_context(|| {
                format!("RELAYBOT_SYNC_TIMEOUT_MS must be a valid number, got: {}", val)
            })?;
        }
        Ok(())
    }

    fn validate(&self) -> Result<()> {
        let mut user_ids = HashSet::new();
        for client in &self.clients {
            if !client.user_id.starts_with('@') || !client.user_id.contains(':') {
                anyhow::bail!("Invalid user ID in clients: {}", client.user_id);
            }
            if !user_ids.insert(client.user_id.as_str()) {
                anyhow::bail!("Duplicate client user_id: {}", client.user_id);
            }
            if !client.home_server.starts_with("http://")
                && !client.home_server.starts_with("https://")
            {
                anyhow::bail!(
                    "clients.home_server must be an http(s) URL for {} (got '{}')",
                    client.user_id,
                    client.home_server
                );
            }
            if client.access_token.trim().is_empty() {
                anyhow::bail!("clients.access_token is required for {}", client.user_id);
            }
        }

        if self.sync.retry_backoff_secs == 0 {
            anyhow::bail!("sync.retry_backoff_secs must be at least 1");
        }

        if self.sync.channel_capacity == 0 {
            anyhow::bail!("sync.channel_capacity must be at least 1");
        }

        let mut service_ids = HashSet::new();
        for service in &self.services {
            if service.id.trim().is_empty() {
                anyhow::bail!("services.id must not be empty");
            }
            if service.service_type.trim().is_empty() {
                anyhow::bail!("services.type must not be empty for service {}", service.id);
            }
            if !service_ids.insert(service.id.as_str()) {
                anyhow::bail!("Duplicate service id: {}", service.id);
            }
        }

        Ok(())
    }

    /// Core sync settings for one client.
    pub fn sync_config(&self, client: &ClientConfig) -> SyncConfig {
        let mut config = SyncConfig::new(&client.user_id);
        config.timeout_ms = self.sync.timeout_ms;
        config.retry_backoff = Duration::from_secs(self.sync.retry_backoff_secs);
        config.channel_capacity = self.sync.channel_capacity;
        config.max_timeline = self.sync.max_timeline;
        config
    }

    pub fn http_addr(&self) -> String {
        format!("{}:{}", self.http.host, self.http.port)
    }
}

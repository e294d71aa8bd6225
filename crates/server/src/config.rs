//! Server configuration management

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default)]
    pub server: ServerSettings,
    /// Rule file locations
    #[serde(default)]
    pub rules: RuleSettings,
    /// Local socket endpoints
    #[serde(default)]
    pub ipc: IpcSettings,
    /// Enforcement loop timing
    #[serde(default)]
    pub enforcement: EnforcementSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerSettings {
    pub log_level: String,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuleSettings {
    /// Directory every rule file path is resolved against
    #[serde(default = "RuleSettings::default_root")]
    pub root: PathBuf,
    /// Rule file used when no pointer file names another one
    #[serde(default = "RuleSettings::default_file")]
    pub default_file: String,
    /// File under `root` holding the name of the active rule file
    #[serde(default = "RuleSettings::default_pointer_file")]
    pub pointer_file: String,
}

impl Default for RuleSettings {
    fn default() -> Self {
        Self {
            root: Self::default_root(),
            default_file: Self::default_file(),
            pointer_file: Self::default_pointer_file(),
        }
    }
}

impl RuleSettings {
    fn default_root() -> PathBuf {
        PathBuf::from("/etc/usbgate")
    }

    fn default_file() -> String {
        common::DEFAULT_RULE_FILE.to_string()
    }

    fn default_pointer_file() -> String {
        "active".to_string()
    }

    /// Root with `~` expanded
    pub fn root(&self) -> PathBuf {
        expand_path(&self.root)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IpcSettings {
    #[serde(default = "IpcSettings::default_socket_dir")]
    pub socket_dir: PathBuf,
    /// Permission bits applied to every socket file
    #[serde(default = "IpcSettings::default_socket_mode")]
    pub socket_mode: u32,
    /// How long a tick waits for a client to accept on `rule-update`
    #[serde(default = "IpcSettings::default_connect_timeout")]
    pub connect_timeout_ms: u64,
    /// How long a connected client may take to send its request
    #[serde(default = "IpcSettings::default_request_timeout")]
    pub request_timeout_ms: u64,
}

impl Default for IpcSettings {
    fn default() -> Self {
        Self {
            socket_dir: Self::default_socket_dir(),
            socket_mode: Self::default_socket_mode(),
            connect_timeout_ms: Self::default_connect_timeout(),
            request_timeout_ms: Self::default_request_timeout(),
        }
    }
}

impl IpcSettings {
    fn default_socket_dir() -> PathBuf {
        PathBuf::from(protocol::DEFAULT_SOCKET_DIR)
    }

    fn default_socket_mode() -> u32 {
        0o660
    }

    fn default_connect_timeout() -> u64 {
        50
    }

    fn default_request_timeout() -> u64 {
        1000
    }

    /// Socket directory with `~` expanded
    pub fn socket_dir(&self) -> PathBuf {
        expand_path(&self.socket_dir)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnforcementSettings {
    /// Period of the enforcement timer
    #[serde(default = "EnforcementSettings::default_tick_interval")]
    pub tick_interval_ms: u64,
    /// Gather interface info every Nth tick
    #[serde(default = "EnforcementSettings::default_gather_every")]
    pub gather_every: u32,
    /// Longest wait for one enforcement cycle before the loop moves on
    #[serde(default = "EnforcementSettings::default_scan_timeout")]
    pub scan_timeout_ms: u64,
}

impl Default for EnforcementSettings {
    fn default() -> Self {
        Self {
            tick_interval_ms: Self::default_tick_interval(),
            gather_every: Self::default_gather_every(),
            scan_timeout_ms: Self::default_scan_timeout(),
        }
    }
}

impl EnforcementSettings {
    fn default_tick_interval() -> u64 {
        200
    }

    fn default_gather_every() -> u32 {
        5
    }

    fn default_scan_timeout() -> u64 {
        5000
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }

    pub fn scan_timeout(&self) -> Duration {
        Duration::from_millis(self.scan_timeout_ms)
    }
}

impl ServerConfig {
    /// Load configuration from the specified path
    pub fn load(path: Option<PathBuf>) -> Result<Self> {
        let config_path = if let Some(p) = path {
            expand_path(&p)
        } else {
            // Try standard locations in order
            let candidates = vec![
                Self::default_path(),
                PathBuf::from("/etc/usbgate/server.toml"),
            ];

            candidates
                .into_iter()
                .find(|p| p.exists())
                .ok_or_else(|| anyhow!("No configuration file found, using defaults"))?
        };

        let content = fs::read_to_string(&config_path)
            .with_context(|| format!("Failed to read config file: {}", config_path.display()))?;

        let config: ServerConfig = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", config_path.display()))?;

        config.validate()?;

        tracing::info!("Loaded configuration from: {}", config_path.display());
        Ok(config)
    }

    /// Load configuration or return defaults if not found
    pub fn load_or_default() -> Self {
        match Self::load(None) {
            Ok(config) => config,
            Err(e) => {
                tracing::warn!("Failed to load config: {}, using defaults", e);
                Self::default()
            }
        }
    }

    /// Save configuration to the specified path
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self).context("Failed to serialize configuration")?;

        // Create parent directories if they don't exist
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create config directory: {}", parent.display())
            })?;
        }

        fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;

        tracing::info!("Saved configuration to: {}", path.display());
        Ok(())
    }

    /// Get the default configuration file path
    pub fn default_path() -> PathBuf {
        if let Some(config_dir) = dirs::config_dir() {
            config_dir.join("usbgate").join("server.toml")
        } else {
            PathBuf::from(".config/usbgate/server.toml")
        }
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.server.log_level.as_str()) {
            return Err(anyhow!(
                "Invalid log level '{}', must be one of: {}",
                self.server.log_level,
                valid_levels.join(", ")
            ));
        }

        if self.rules.default_file.trim().is_empty() {
            return Err(anyhow!("rules.default_file must not be empty"));
        }

        if self.rules.pointer_file.trim().is_empty() {
            return Err(anyhow!("rules.pointer_file must not be empty"));
        }

        if self.ipc.socket_mode > 0o777 {
            return Err(anyhow!(
                "Invalid socket_mode {:o}, must be at most 0o777",
                self.ipc.socket_mode
            ));
        }

        if self.enforcement.tick_interval_ms == 0 {
            return Err(anyhow!("enforcement.tick_interval_ms must be greater than 0"));
        }

        if self.enforcement.gather_every == 0 {
            return Err(anyhow!("enforcement.gather_every must be greater than 0"));
        }

        if self.enforcement.scan_timeout_ms == 0 {
            return Err(anyhow!("enforcement.scan_timeout_ms must be greater than 0"));
        }

        Ok(())
    }
}

fn expand_path(path: &Path) -> PathBuf {
    PathBuf::from(shellexpand::tilde(&path.to_string_lossy()).as_ref())
}

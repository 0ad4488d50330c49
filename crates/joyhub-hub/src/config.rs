//! Hub configuration loaded from TOML.

use std::path::PathBuf;
use std::time::Duration;

use joyhub_types::ControllerType;
use serde::{Deserialize, Serialize};

/// Lower bound applied to `call_timeout_ms`.
const MIN_CALL_TIMEOUT_MS: u64 = 10;
/// Lower bound applied to `poll_interval_ms`.
const MIN_POLL_INTERVAL_MS: u64 = 10;

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub driver: DriverConfig,
    #[serde(default)]
    pub macros: MacroConfig,
    #[serde(default)]
    pub admin: AdminConfig,
    #[serde(default)]
    pub storage: StorageConfig,
}

/// Listener and runtime settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            port: default_port(),
            log_level: default_log_level(),
        }
    }
}

/// How the hub talks to the controller driver.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DriverConfig {
    /// Kind of controller created for `create_controller` requests.
    #[serde(default)]
    pub controller_type: ControllerType,
    /// Upper bound on any single driver call.
    #[serde(default = "default_call_timeout_ms")]
    pub call_timeout_ms: u64,
    /// Attempts made for best-effort cleanup calls (stop macro, remove
    /// controller) before giving up.
    #[serde(default = "default_cleanup_attempts")]
    pub cleanup_attempts: u32,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            controller_type: ControllerType::default(),
            call_timeout_ms: default_call_timeout_ms(),
            cleanup_attempts: default_cleanup_attempts(),
        }
    }
}

impl DriverConfig {
    pub fn call_timeout(&self) -> Duration {
        Duration::from_millis(self.call_timeout_ms.max(MIN_CALL_TIMEOUT_MS))
    }
}

/// Macro completion watching.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MacroConfig {
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
}

impl Default for MacroConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval_ms(),
        }
    }
}

impl MacroConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(MIN_POLL_INTERVAL_MS))
    }
}

/// Administrative operations.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdminConfig {
    /// Allow any session to force-remove or shut down controllers.
    #[serde(default = "default_true")]
    pub allow_force_remove: bool,
}

impl Default for AdminConfig {
    fn default() -> Self {
        Self {
            allow_force_remove: true,
        }
    }
}

/// Where the device registry and macro library live.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default)]
    pub data_dir: Option<PathBuf>,
}

fn default_bind() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8000
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_call_timeout_ms() -> u64 {
    2000
}

fn default_cleanup_attempts() -> u32 {
    3
}

fn default_poll_interval_ms() -> u64 {
    100
}

fn default_true() -> bool {
    true
}

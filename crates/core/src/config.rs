//! Rollcall Configuration
//!
//! Configuration structures with defaults expressed through serde attributes,
//! plus the loader and validator used by the binary.

use crate::error::RollcallError;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

// ============================================================================
// Constants
// ============================================================================

/// Default listen host for every endpoint
pub const DEFAULT_HOST: &str = "127.0.0.1";
/// Default registrant gateway port
pub const DEFAULT_GATEWAY_PORT: u16 = 5000;
/// Default viewer (display) WebSocket port
pub const DEFAULT_VIEWER_PORT: u16 = 5001;
/// Default admin trigger HTTP port
pub const DEFAULT_ADMIN_PORT: u16 = 5002;
/// Default outbound send timeout (seconds)
pub const DEFAULT_SEND_TIMEOUT: u64 = 10;
/// Default per-viewer outbound queue capacity (frames)
pub const DEFAULT_VIEWER_QUEUE: usize = 64;
/// Default display service endpoint used by the HTTP publisher
pub const DEFAULT_DISPLAY_URL: &str = "http://127.0.0.1:5002/display";
/// Default database file name inside the rollcall directory
pub const DEFAULT_DB_FILE: &str = "users.db";

fn home_dir() -> PathBuf {
    dirs::home_dir().unwrap_or_else(|| PathBuf::from("."))
}

fn default_rollcall_dir() -> PathBuf {
    home_dir().join(".rollcall")
}

// ============================================================================
// Main Config
// ============================================================================

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Registrant gateway configuration
    #[serde(default)]
    pub gateway: GatewayConfig,
    /// Viewer fanout and admin endpoint configuration
    #[serde(default)]
    pub display: DisplayConfig,
    /// User record store configuration
    #[serde(default)]
    pub store: StoreConfig,
    /// Snapshot publisher configuration
    #[serde(default)]
    pub publisher: PublisherConfig,
}

// ============================================================================
// Gateway Config
// ============================================================================

/// What to do when an address is registered while another connection owns it
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum DuplicatePolicy {
    /// The newer registration replaces the existing record
    #[default]
    Replace,
    /// The newer registration is refused while the owner is connected
    Reject,
}

/// Registrant gateway configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    /// Listen host
    #[serde(default = "GatewayConfig::default_host")]
    pub host: String,
    /// Listen port
    #[serde(default = "GatewayConfig::default_port")]
    pub port: u16,
    /// Close registrant connections silent for this long (seconds)
    #[serde(default)]
    pub idle_timeout_secs: Option<u64>,
    /// Timeout for a single outbound frame (seconds)
    #[serde(default = "GatewayConfig::default_send_timeout")]
    pub send_timeout_secs: u64,
    /// Reply with `status;...` frames after each handled message
    #[serde(default)]
    pub echo_status: bool,
    /// Duplicate registration policy
    #[serde(default)]
    pub duplicate_policy: DuplicatePolicy,
}

impl GatewayConfig {
    fn default_host() -> String {
        DEFAULT_HOST.to_string()
    }
    fn default_port() -> u16 {
        DEFAULT_GATEWAY_PORT
    }
    fn default_send_timeout() -> u64 {
        DEFAULT_SEND_TIMEOUT
    }

    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_GATEWAY_PORT,
            idle_timeout_secs: None,
            send_timeout_secs: DEFAULT_SEND_TIMEOUT,
            echo_status: false,
            duplicate_policy: DuplicatePolicy::Replace,
        }
    }
}

// ============================================================================
// Display Config
// ============================================================================

/// Viewer fanout configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DisplayConfig {
    /// Listen host for both the viewer and the admin endpoint
    #[serde(default = "DisplayConfig::default_host")]
    pub host: String,
    /// Viewer WebSocket port
    #[serde(default = "DisplayConfig::default_viewer_port")]
    pub viewer_port: u16,
    /// Admin trigger HTTP port
    #[serde(default = "DisplayConfig::default_admin_port")]
    pub admin_port: u16,
    /// Frames buffered per viewer before it counts as a slow consumer
    #[serde(default = "DisplayConfig::default_queue_capacity")]
    pub queue_capacity: usize,
    /// Timeout for a single outbound frame (seconds)
    #[serde(default = "DisplayConfig::default_send_timeout")]
    pub send_timeout_secs: u64,
}

impl DisplayConfig {
    fn default_host() -> String {
        DEFAULT_HOST.to_string()
    }
    fn default_viewer_port() -> u16 {
        DEFAULT_VIEWER_PORT
    }
    fn default_admin_port() -> u16 {
        DEFAULT_ADMIN_PORT
    }
    fn default_queue_capacity() -> usize {
        DEFAULT_VIEWER_QUEUE
    }
    fn default_send_timeout() -> u64 {
        DEFAULT_SEND_TIMEOUT
    }

    pub fn viewer_addr(&self) -> String {
        format!("{}:{}", self.host, self.viewer_port)
    }

    pub fn admin_addr(&self) -> String {
        format!("{}:{}", self.host, self.admin_port)
    }
}

impl Default for DisplayConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            viewer_port: DEFAULT_VIEWER_PORT,
            admin_port: DEFAULT_ADMIN_PORT,
            queue_capacity: DEFAULT_VIEWER_QUEUE,
            send_timeout_secs: DEFAULT_SEND_TIMEOUT,
        }
    }
}

// ============================================================================
// Store Config
// ============================================================================

/// User record store configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// SQLite database path
    #[serde(default = "StoreConfig::default_db_path")]
    pub db_path: PathBuf,
    /// Keep records in memory only
    #[serde(default)]
    pub in_memory: bool,
    /// Drop records left over from a previous run before accepting connections
    #[serde(default = "StoreConfig::default_purge_on_start")]
    pub purge_on_start: bool,
}

impl StoreConfig {
    fn default_db_path() -> PathBuf {
        default_rollcall_dir().join(DEFAULT_DB_FILE)
    }
    fn default_purge_on_start() -> bool {
        true
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            db_path: Self::default_db_path(),
            in_memory: false,
            purge_on_start: true,
        }
    }
}

// ============================================================================
// Publisher Config
// ============================================================================

/// Where snapshots go after each publish
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum PublisherMode {
    /// Deliver into the viewer fanout of this process
    #[default]
    Local,
    /// POST to a display service
    Http,
}

/// Snapshot publisher configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PublisherConfig {
    /// Delivery mode
    #[serde(default)]
    pub mode: PublisherMode,
    /// Display service endpoint for `http` mode
    #[serde(default = "PublisherConfig::default_display_url")]
    pub display_url: String,
    /// Also publish on a fixed interval (seconds)
    #[serde(default)]
    pub interval_secs: Option<u64>,
    /// HTTP request timeout (seconds)
    #[serde(default = "PublisherConfig::default_request_timeout")]
    pub request_timeout_secs: u64,
}

impl PublisherConfig {
    fn default_display_url() -> String {
        DEFAULT_DISPLAY_URL.to_string()
    }
    fn default_request_timeout() -> u64 {
        DEFAULT_SEND_TIMEOUT
    }
}

impl Default for PublisherConfig {
    fn default() -> Self {
        Self {
            mode: PublisherMode::Local,
            display_url: DEFAULT_DISPLAY_URL.to_string(),
            interval_secs: None,
            request_timeout_secs: DEFAULT_SEND_TIMEOUT,
        }
    }
}

// ============================================================================
// Config Loading and Validation
// ============================================================================

/// Configuration loader
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load configuration from an explicit path or the default locations.
    ///
    /// An explicit path must exist. Without one, the first existing default
    /// location is used and built-in defaults apply when none exists.
    pub fn load(path: Option<&str>) -> Result<Config, RollcallError> {
        let config_path = match path {
            Some(p) => {
                let p = PathBuf::from(p);
                if !p.exists() {
                    return Err(RollcallError::config_not_found(p.display().to_string()));
                }
                p
            }
            None => match Self::find_default() {
                Some(p) => p,
                None => {
                    tracing::debug!("No config file found, using defaults");
                    return Ok(Config::default());
                }
            },
        };

        Self::load_file(&config_path)
    }

    /// Parse one configuration file
    pub fn load_file(path: &Path) -> Result<Config, RollcallError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| RollcallError::config_parse_error(format!("Failed to read: {}", e)))?;
        let config: Config = serde_yml::from_str(&content)
            .map_err(|e| RollcallError::config_parse_error(format!("Failed to parse: {}", e)))?;
        tracing::info!("Loaded config from {}", path.display());
        Ok(config)
    }

    fn find_default() -> Option<PathBuf> {
        let default_paths = [
            default_rollcall_dir().join("config.yaml"),
            dirs::config_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("rollcall.yaml"),
            PathBuf::from("./rollcall.yaml"),
        ];

        default_paths.into_iter().find(|p| p.exists())
    }
}

/// Configuration validator
pub struct ConfigValidator;

impl ConfigValidator {
    pub fn validate(config: &Config) -> Result<(), RollcallError> {
        if config.display.queue_capacity == 0 {
            return Err(RollcallError::config_invalid(
                "display.queue_capacity",
                "must be at least 1",
            ));
        }

        if config.gateway.send_timeout_secs == 0 || config.display.send_timeout_secs == 0 {
            return Err(RollcallError::config_invalid(
                "send_timeout_secs",
                "must be at least 1 second",
            ));
        }

        if config.gateway.idle_timeout_secs == Some(0) {
            return Err(RollcallError::config_invalid(
                "gateway.idle_timeout_secs",
                "use null to disable instead of 0",
            ));
        }

        if config.publisher.interval_secs == Some(0) {
            return Err(RollcallError::config_invalid(
                "publisher.interval_secs",
                "use null to disable instead of 0",
            ));
        }

        if config.publisher.mode == PublisherMode::Http {
            let url = config.publisher.display_url.as_str();
            if !(url.starts_with("http://") || url.starts_with("https://")) {
                return Err(RollcallError::config_invalid(
                    "publisher.display_url",
                    format!("expected an http(s) URL, got '{}'", url),
                ));
            }
        }

        // Port 0 asks the OS for an ephemeral port and never clashes.
        let clash = |a: u16, b: u16| a != 0 && a == b;
        let same_host = config.gateway.host == config.display.host;
        if clash(config.display.viewer_port, config.display.admin_port)
            || (same_host
                && (clash(config.gateway.port, config.display.viewer_port)
                    || clash(config.gateway.port, config.display.admin_port)))
        {
            return Err(RollcallError::config_invalid(
                "ports",
                "gateway, viewer and admin endpoints need distinct ports",
            ));
        }

        Ok(())
    }
}

impl Config {
    /// Load configuration (see [`ConfigLoader::load`])
    pub fn load(path: &Option<String>) -> Result<Self, RollcallError> {
        ConfigLoader::load(path.as_deref())
    }

    /// Save configuration to file
    pub fn save(&self, path: &Path) -> Result<(), RollcallError> {
        let content = serde_yml::to_string(self).map_err(|e| {
            RollcallError::config_parse_error(format!("Serialization failed: {}", e))
        })?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Generate a sample configuration
    pub fn sample() -> Self {
        Config {
            gateway: GatewayConfig {
                idle_timeout_secs: Some(300),
                ..GatewayConfig::default()
            },
            display: DisplayConfig::default(),
            store: StoreConfig::default(),
            publisher: PublisherConfig {
                interval_secs: Some(30),
                ..PublisherConfig::default()
            },
        }
    }
}

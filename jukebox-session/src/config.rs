//! Configuration management for jukebox-session
//!
//! Two tiers:
//! 1. **TOML Bootstrap**: port, database path, logging, remote endpoints and
//!    every timing constant of the session engine (static, restart to change)
//! 2. **Database Runtime**: user suggestion parameters and the last suggested
//!    track, kept in the `settings` table (see `db::settings`)
//!
//! # Settings Sources Priority
//!
//! 1. Command-line arguments (--port, --database)
//! 2. Environment variables (JUKEBOX_PORT, JUKEBOX_DATABASE, JUKEBOX_CONFIG)
//! 3. TOML configuration file
//! 4. Built-in defaults (code constants)

use crate::error::{Error, Result};
use jukebox_common::events::ConnectionQuality;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

/// Bootstrap configuration loaded from TOML
///
/// Every field has a built-in default, so an empty file (or no file) is a
/// valid configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// HTTP server port
    #[serde(default = "default_port")]
    pub port: u16,

    /// Path to SQLite database file
    #[serde(default = "default_database_path")]
    pub database_path: PathBuf,

    #[serde(default)]
    pub logging: LoggingConfig,

    #[serde(default)]
    pub api: ApiConfig,

    #[serde(default)]
    pub playlist: PlaylistConfig,

    #[serde(default)]
    pub device: DeviceConfig,

    #[serde(default)]
    pub token: TokenConfig,

    #[serde(default)]
    pub recovery: RecoveryConfig,

    #[serde(default)]
    pub health: HealthConfig,

    #[serde(default)]
    pub refresh: RefreshConfig,

    #[serde(default)]
    pub suggestion: SuggestionConfig,
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log filter used when RUST_LOG is unset
    #[serde(default = "default_log_level")]
    pub level: String,
}

/// Remote Web API endpoints
#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    #[serde(default = "default_api_base_url")]
    pub base_url: String,

    /// Credential source (`GET` returns `{ accessToken, expiresIn }`)
    #[serde(default = "default_token_url")]
    pub token_url: String,

    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,

    /// How long a coalesced GET result is reused
    #[serde(default = "default_coalesce_ttl_ms")]
    pub coalesce_ttl_ms: u64,

    #[serde(default = "default_coalesce_max_entries")]
    pub coalesce_max_entries: usize,
}

/// Managed playlist
#[derive(Debug, Clone, Deserialize)]
pub struct PlaylistConfig {
    /// Well-known name of the managed playlist
    #[serde(default = "default_playlist_name")]
    pub name: String,

    #[serde(default = "default_market")]
    pub market: String,
}

/// Device session timing
#[derive(Debug, Clone, Deserialize)]
pub struct DeviceConfig {
    /// Name of the playback device this process drives
    #[serde(default = "default_device_name")]
    pub name: String,

    #[serde(default = "default_sdk_load_timeout_ms")]
    pub sdk_load_timeout_ms: u64,

    #[serde(default = "default_ready_timeout_ms")]
    pub ready_timeout_ms: u64,

    #[serde(default = "default_verification_timeout_ms")]
    pub verification_timeout_ms: u64,

    /// Grace window before acting on a not-ready signal
    #[serde(default = "default_not_ready_grace_ms")]
    pub not_ready_grace_ms: u64,

    /// Device list polling period of the connect-device SDK
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Transfer playback to the device once it is ready
    #[serde(default = "default_true")]
    pub transfer_on_ready: bool,

    #[serde(default = "default_max_consecutive_failures")]
    pub max_consecutive_failures: u32,
}

/// Token lifecycle
#[derive(Debug, Clone, Deserialize)]
pub struct TokenConfig {
    /// Refresh this long before expiry (clamped to half the lifetime)
    #[serde(default = "default_refresh_margin_secs")]
    pub refresh_margin_secs: u64,

    /// Delays between failed credential fetches
    #[serde(default = "default_token_retry_delays_ms")]
    pub retry_delays_ms: Vec<u64>,

    /// Timer re-arm delay after a failed proactive refresh
    #[serde(default = "default_failure_rearm_secs")]
    pub failure_rearm_secs: u64,
}

/// Recovery engine budget
#[derive(Debug, Clone, Deserialize)]
pub struct RecoveryConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Fixed spacing between attempts
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,

    /// Consecutive network failures that downgrade connection quality
    #[serde(default = "default_network_failure_threshold")]
    pub network_failure_threshold: u32,
}

/// Health monitor cadence per connection quality
#[derive(Debug, Clone, Deserialize)]
pub struct HealthConfig {
    #[serde(default = "default_good_interval_secs")]
    pub good_interval_secs: u64,

    #[serde(default = "default_unstable_interval_secs")]
    pub unstable_interval_secs: u64,

    #[serde(default = "default_poor_interval_secs")]
    pub poor_interval_secs: u64,
}

/// Playlist refresh orchestrator and scheduler
#[derive(Debug, Clone, Deserialize)]
pub struct RefreshConfig {
    /// Whole-operation timeout
    #[serde(default = "default_operation_timeout_ms")]
    pub operation_timeout_ms: u64,

    /// Per-step timeout
    #[serde(default = "default_step_timeout_ms")]
    pub step_timeout_ms: u64,

    /// `POST /refresh-site` answers 504 after this long
    #[serde(default = "default_endpoint_timeout_ms")]
    pub endpoint_timeout_ms: u64,

    /// Enqueue only when upcoming tracks are at most this many
    #[serde(default = "default_upcoming_threshold")]
    pub upcoming_threshold: usize,

    /// External change with at most this many upcoming tracks forces a resume
    #[serde(default = "default_resume_threshold")]
    pub resume_threshold: usize,

    /// Periodic refresh
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,

    /// Minimum spacing between timer-driven refreshes
    #[serde(default = "default_cooldown_ms")]
    pub cooldown_ms: u64,

    /// Quiet window that coalesces "track added" bursts
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,
}

/// Track suggestion collaborator
#[derive(Debug, Clone, Deserialize)]
pub struct SuggestionConfig {
    #[serde(default = "default_suggestion_url")]
    pub url: String,

    #[serde(default = "default_suggestion_timeout_ms")]
    pub timeout_ms: u64,
}

fn default_port() -> u16 {
    5800
}

fn default_database_path() -> PathBuf {
    jukebox_common::config::default_data_dir().join("jukebox.db")
}

fn default_log_level() -> String {
    "jukebox_session=debug,tower_http=debug".to_string()
}

fn default_api_base_url() -> String {
    "https://api.spotify.com/v1".to_string()
}

fn default_token_url() -> String {
    "http://localhost:3000/api/token".to_string()
}

fn default_request_timeout_ms() -> u64 {
    10_000
}

fn default_coalesce_ttl_ms() -> u64 {
    1_000
}

fn default_coalesce_max_entries() -> usize {
    64
}

fn default_playlist_name() -> String {
    "3B Saigon".to_string()
}

fn default_market() -> String {
    "VN".to_string()
}

fn default_device_name() -> String {
    "Jukebox Player".to_string()
}

fn default_sdk_load_timeout_ms() -> u64 {
    10_000
}

fn default_ready_timeout_ms() -> u64 {
    10_000
}

fn default_verification_timeout_ms() -> u64 {
    5_000
}

fn default_not_ready_grace_ms() -> u64 {
    3_000
}

fn default_poll_interval_ms() -> u64 {
    5_000
}

fn default_true() -> bool {
    true
}

fn default_max_consecutive_failures() -> u32 {
    3
}

fn default_refresh_margin_secs() -> u64 {
    600
}

fn default_token_retry_delays_ms() -> Vec<u64> {
    vec![1_000, 3_000]
}

fn default_failure_rearm_secs() -> u64 {
    30
}

fn default_max_attempts() -> u32 {
    3
}

fn default_retry_delay_ms() -> u64 {
    5_000
}

fn default_network_failure_threshold() -> u32 {
    3
}

fn default_good_interval_secs() -> u64 {
    30
}

fn default_unstable_interval_secs() -> u64 {
    15
}

fn default_poor_interval_secs() -> u64 {
    10
}

fn default_operation_timeout_ms() -> u64 {
    45_000
}

fn default_step_timeout_ms() -> u64 {
    20_000
}

fn default_endpoint_timeout_ms() -> u64 {
    60_000
}

fn default_upcoming_threshold() -> usize {
    3
}

fn default_resume_threshold() -> usize {
    2
}

fn default_interval_secs() -> u64 {
    60
}

fn default_cooldown_ms() -> u64 {
    10_000
}

fn default_debounce_ms() -> u64 {
    10_000
}

fn default_suggestion_url() -> String {
    "http://localhost:3000/api/track-suggestions".to_string()
}

fn default_suggestion_timeout_ms() -> u64 {
    20_000
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: default_port(),
            database_path: default_database_path(),
            logging: LoggingConfig::default(),
            api: ApiConfig::default(),
            playlist: PlaylistConfig::default(),
            device: DeviceConfig::default(),
            token: TokenConfig::default(),
            recovery: RecoveryConfig::default(),
            health: HealthConfig::default(),
            refresh: RefreshConfig::default(),
            suggestion: SuggestionConfig::default(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: default_api_base_url(),
            token_url: default_token_url(),
            request_timeout_ms: default_request_timeout_ms(),
            coalesce_ttl_ms: default_coalesce_ttl_ms(),
            coalesce_max_entries: default_coalesce_max_entries(),
        }
    }
}

impl Default for PlaylistConfig {
    fn default() -> Self {
        Self {
            name: default_playlist_name(),
            market: default_market(),
        }
    }
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            name: default_device_name(),
            sdk_load_timeout_ms: default_sdk_load_timeout_ms(),
            ready_timeout_ms: default_ready_timeout_ms(),
            verification_timeout_ms: default_verification_timeout_ms(),
            not_ready_grace_ms: default_not_ready_grace_ms(),
            poll_interval_ms: default_poll_interval_ms(),
            transfer_on_ready: default_true(),
            max_consecutive_failures: default_max_consecutive_failures(),
        }
    }
}

impl Default for TokenConfig {
    fn default() -> Self {
        Self {
            refresh_margin_secs: default_refresh_margin_secs(),
            retry_delays_ms: default_token_retry_delays_ms(),
            failure_rearm_secs: default_failure_rearm_secs(),
        }
    }
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            retry_delay_ms: default_retry_delay_ms(),
            network_failure_threshold: default_network_failure_threshold(),
        }
    }
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            good_interval_secs: default_good_interval_secs(),
            unstable_interval_secs: default_unstable_interval_secs(),
            poor_interval_secs: default_poor_interval_secs(),
        }
    }
}

impl Default for RefreshConfig {
    fn default() -> Self {
        Self {
            operation_timeout_ms: default_operation_timeout_ms(),
            step_timeout_ms: default_step_timeout_ms(),
            endpoint_timeout_ms: default_endpoint_timeout_ms(),
            upcoming_threshold: default_upcoming_threshold(),
            resume_threshold: default_resume_threshold(),
            interval_secs: default_interval_secs(),
            cooldown_ms: default_cooldown_ms(),
            debounce_ms: default_debounce_ms(),
        }
    }
}

impl Default for SuggestionConfig {
    fn default() -> Self {
        Self {
            url: default_suggestion_url(),
            timeout_ms: default_suggestion_timeout_ms(),
        }
    }
}

/// Command-line overrides applied on top of the TOML file
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub config_path: Option<PathBuf>,
    pub database_path: Option<PathBuf>,
    pub port: Option<u16>,
}

impl Config {
    /// Load bootstrap configuration
    ///
    /// A missing config file is not fatal: built-in defaults are used and a
    /// warning is logged. A file that exists but does not parse is an error.
    pub fn load(overrides: ConfigOverrides) -> Result<Self> {
        let path = jukebox_common::config::resolve_config_path(
            overrides.config_path.as_deref(),
            "JUKEBOX_CONFIG",
        );

        let mut config = match path {
            Some(path) if path.exists() => {
                let config = Self::from_file(&path)?;
                info!("Loaded TOML configuration from {}", path.display());
                config
            }
            Some(path) => {
                warn!("Config file {} not found, using built-in defaults", path.display());
                Config::default()
            }
            None => {
                warn!("No config file found, using built-in defaults");
                Config::default()
            }
        };

        if let Some(database_path) = overrides.database_path {
            config.database_path = database_path;
        }
        if let Some(port) = overrides.port {
            config.port = port;
        }

        config.validate()?;
        Ok(config)
    }

    /// Parse a config file
    pub fn from_file(path: &Path) -> Result<Self> {
        Ok(jukebox_common::config::load_toml(path)?)
    }

    /// Reject values the engine cannot work with
    pub fn validate(&self) -> Result<()> {
        if self.recovery.max_attempts == 0 {
            return Err(Error::Config("recovery.max_attempts must be at least 1".to_string()));
        }
        if self.playlist.name.trim().is_empty() {
            return Err(Error::Config("playlist.name must not be empty".to_string()));
        }
        if self.refresh.operation_timeout_ms == 0 || self.refresh.step_timeout_ms == 0 {
            return Err(Error::Config("refresh timeouts must be non-zero".to_string()));
        }
        Ok(())
    }
}

impl ApiConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn coalesce_ttl(&self) -> Duration {
        Duration::from_millis(self.coalesce_ttl_ms)
    }
}

impl DeviceConfig {
    pub fn sdk_load_timeout(&self) -> Duration {
        Duration::from_millis(self.sdk_load_timeout_ms)
    }

    pub fn ready_timeout(&self) -> Duration {
        Duration::from_millis(self.ready_timeout_ms)
    }

    pub fn verification_timeout(&self) -> Duration {
        Duration::from_millis(self.verification_timeout_ms)
    }

    pub fn not_ready_grace(&self) -> Duration {
        Duration::from_millis(self.not_ready_grace_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

impl TokenConfig {
    pub fn refresh_margin(&self) -> Duration {
        Duration::from_secs(self.refresh_margin_secs)
    }

    pub fn retry_delays(&self) -> Vec<Duration> {
        self.retry_delays_ms.iter().map(|ms| Duration::from_millis(*ms)).collect()
    }

    pub fn failure_rearm(&self) -> Duration {
        Duration::from_secs(self.failure_rearm_secs)
    }
}

impl RecoveryConfig {
    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }
}

impl HealthConfig {
    /// Polling period for the given connection quality
    pub fn interval_for(&self, quality: ConnectionQuality) -> Duration {
        let secs = match quality {
            ConnectionQuality::Good => self.good_interval_secs,
            ConnectionQuality::Unstable => self.unstable_interval_secs,
            ConnectionQuality::Poor => self.poor_interval_secs,
        };
        Duration::from_secs(secs)
    }
}

impl SuggestionConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

impl RefreshConfig {
    pub fn operation_timeout(&self) -> Duration {
        Duration::from_millis(self.operation_timeout_ms)
    }

    pub fn step_timeout(&self) -> Duration {
        Duration::from_millis(self.step_timeout_ms)
    }

    pub fn endpoint_timeout(&self) -> Duration {
        Duration::from_millis(self.endpoint_timeout_ms)
    }

    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn cooldown(&self) -> Duration {
        Duration::from_millis(self.cooldown_ms)
    }

    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }
}

//! fleetdriver
//!
//! Drives a fleet of social-media accounts through scripted browser
//! sessions: login, content upload, warm-up browsing, follow actions, and
//! cookie collection. Tasks fan out into per-account sub-tasks executed in
//! isolated units with anti-detect profiles and pooled proxies.

pub mod binder;
pub mod browser;
pub mod captcha;
pub mod challenge;
pub mod flows;
pub mod model;
pub mod pacing;
pub mod runner;
pub mod selectors;
pub mod stats;
pub mod store;

use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::{error, info, warn};

use challenge::ChallengeConfig;
use pacing::PacingConfig;
use stats::FleetStats;

/// Application configuration
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppConfig {
    /// Target site root
    pub base_url: String,

    /// Anti-detect profile provider API base URL
    pub provider_base_url: String,

    /// CAPTCHA solver API key (empty disables solving)
    #[serde(default)]
    pub captcha_api_key: String,

    /// Default max sub-tasks in flight per task
    pub concurrency_limit: usize,

    /// Bound for navigation and element waits, in seconds
    pub action_timeout_secs: u64,

    /// Interaction pacing ranges
    pub pacing: PacingConfig,

    /// Challenge handling bounds
    pub challenge: ChallengeConfig,

    /// How often the daemon polls for pending tasks, in seconds
    #[serde(default = "default_poll_secs")]
    pub task_poll_secs: u64,
}

fn default_poll_secs() -> u64 {
    15
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            base_url: "https://www.instagram.com".to_string(),
            provider_base_url: "http://127.0.0.1:3001".to_string(),
            captcha_api_key: String::new(),
            concurrency_limit: 3,
            action_timeout_secs: 30,
            pacing: PacingConfig::default(),
            challenge: ChallengeConfig::default(),
            task_poll_secs: default_poll_secs(),
        }
    }
}

/// Get log directory path (shared across modules)
pub fn log_dir() -> Option<PathBuf> {
    dirs::config_dir().map(|p| p.join("fleetdriver").join("logs"))
}

impl AppConfig {
    /// Get config file path
    fn config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("fleetdriver").join("config.json"))
    }

    /// Load config from file
    pub fn load() -> Self {
        if let Some(path) = Self::config_path() {
            if path.exists() {
                match std::fs::read_to_string(&path) {
                    Ok(content) => match serde_json::from_str(&content) {
                        Ok(config) => {
                            info!("Loaded config from {:?}", path);
                            return config;
                        }
                        Err(e) => {
                            warn!("Failed to parse config file: {}", e);
                        }
                    },
                    Err(e) => {
                        warn!("Failed to read config file: {}", e);
                    }
                }
            }
        }
        Self::default()
    }

    /// Save config to file
    pub fn save(&self) {
        if let Some(path) = Self::config_path() {
            if let Some(parent) = path.parent() {
                if let Err(e) = std::fs::create_dir_all(parent) {
                    error!("Failed to create config directory: {}", e);
                    return;
                }
            }

            match serde_json::to_string_pretty(self) {
                Ok(content) => {
                    if let Err(e) = std::fs::write(&path, content) {
                        error!("Failed to save config: {}", e);
                    } else {
                        info!("Config saved to {:?}", path);
                    }
                }
                Err(e) => {
                    error!("Failed to serialize config: {}", e);
                }
            }
        }
    }
}

/// Application state shared across the daemon
pub struct AppState {
    /// Application configuration
    pub config: Arc<RwLock<AppConfig>>,
    /// Fleet statistics
    pub stats: Arc<FleetStats>,
    /// Daemon running state
    pub is_running: Arc<std::sync::atomic::AtomicBool>,
}

impl AppState {
    /// Create new application state with loaded config
    pub fn new() -> Self {
        let saved_config = AppConfig::load();

        Self {
            config: Arc::new(RwLock::new(saved_config)),
            stats: Arc::new(FleetStats::new()),
            is_running: Arc::new(std::sync::atomic::AtomicBool::new(false)),
        }
    }
}

impl Default for AppState {
    fn default() -> Self {
        Self::new()
    }
}

/// Initialize logging: console plus a daily-rotated file in the config dir.
pub fn init_logging() -> Option<tracing_appender::non_blocking::WorkerGuard> {
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;

    let env_filter = tracing_subscriber::EnvFilter::from_default_env()
        .add_directive(tracing::Level::INFO.into());

    let console_layer = tracing_subscriber::fmt::layer()
        .with_target(true)
        .with_thread_ids(false);

    if let Some(log_dir) = log_dir() {
        let _ = std::fs::create_dir_all(&log_dir);
        let file_appender = tracing_appender::rolling::daily(&log_dir, "fleetdriver.log");
        let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

        let file_layer = tracing_subscriber::fmt::layer()
            .with_ansi(false)
            .with_target(true)
            .with_thread_ids(true)
            .with_writer(non_blocking);

        tracing_subscriber::registry()
            .with(env_filter)
            .with(console_layer)
            .with(file_layer)
            .init();

        Some(guard)
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(console_layer)
            .init();

        None
    }
}

//! Configuration management with serde serialization/deserialization
//!
//! This module holds every tunable of the capture backend: worker pool sizing,
//! admission limits, render deadlines, cache TTL, the enrichment command and
//! the HTTP bind address, plus the Chrome launch settings derived from them.

use crate::CaptureError;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use tracing::warn;

/// Main configuration structure for the capture backend
///
/// Every field has a default, so a configuration file only needs to name the
/// settings it changes.
///
/// # Examples
///
/// ```rust
/// use page_capture::Config;
///
/// let config = Config {
///     pool_size: 5,
///     max_concurrent: 5,
///     ..Default::default()
/// };
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    /// Number of render workers pre-launched into the pool (default: 3)
    ///
    /// Should equal `max_concurrent` so admitted captures never have to fall
    /// back to an overflow worker.
    pub pool_size: usize,

    /// Maximum number of captures rendering at the same time (default: 3)
    pub max_concurrent: usize,

    /// Hard ceiling on live workers, managed plus overflow (default: unbounded)
    ///
    /// When set, `acquire` fails with `PoolExhausted` instead of launching
    /// another overflow worker past this number.
    pub max_total_workers: Option<usize>,

    /// Deadline for one navigate-and-screenshot sequence (default: 90 seconds)
    pub capture_timeout: Duration,

    /// Extra wait after navigation for dynamic content to render (default: 4 seconds)
    pub settle_delay: Duration,

    /// Validity window of a cached capture (default: 5 minutes)
    pub cache_ttl: Duration,

    /// Pause between consecutive worker launches during pool init (default: 500ms)
    ///
    /// Chrome instances launched back to back occasionally race on their
    /// profile directories.
    pub launch_stagger: Duration,

    /// How long shutdown waits for in-use workers to come back (default: 1 second)
    pub shutdown_grace: Duration,

    /// Browser viewport used for every capture
    pub viewport: Viewport,

    /// Path to Chrome/Chromium executable (default: auto-detect)
    pub chrome_path: Option<String>,

    /// Custom User-Agent string (default: Chrome default)
    pub user_agent: Option<String>,

    /// Background text-extraction settings
    pub enrichment: EnrichmentSettings,

    /// HTTP request layer settings
    pub server: ServerSettings,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            pool_size: 3,
            max_concurrent: 3,
            max_total_workers: None,
            capture_timeout: Duration::from_secs(90),
            settle_delay: Duration::from_secs(4),
            cache_ttl: Duration::from_secs(5 * 60),
            launch_stagger: Duration::from_millis(500),
            shutdown_grace: Duration::from_secs(1),
            viewport: Viewport::default(),
            chrome_path: None,
            user_agent: None,
            enrichment: EnrichmentSettings::default(),
            server: ServerSettings::default(),
        }
    }
}

impl Config {
    /// Load a JSON configuration file
    pub async fn from_file(path: &std::path::Path) -> Result<Self, CaptureError> {
        let content = tokio::fs::read_to_string(path).await?;
        Ok(serde_json::from_str(&content)?)
    }

    pub fn validate(&self) -> Result<(), CaptureError> {
        if self.max_concurrent == 0 {
            return Err(CaptureError::ConfigurationError(
                "max_concurrent must be greater than 0".to_string(),
            ));
        }

        if self.capture_timeout.is_zero() {
            return Err(CaptureError::ConfigurationError(
                "capture_timeout must be greater than 0".to_string(),
            ));
        }

        if self.cache_ttl.is_zero() {
            return Err(CaptureError::ConfigurationError(
                "cache_ttl must be greater than 0".to_string(),
            ));
        }

        if self.viewport.width == 0 || self.viewport.height == 0 {
            return Err(CaptureError::ConfigurationError(
                "viewport dimensions must be greater than 0".to_string(),
            ));
        }

        if let Some(limit) = self.max_total_workers {
            if limit < self.pool_size {
                return Err(CaptureError::ConfigurationError(format!(
                    "max_total_workers ({}) is smaller than pool_size ({})",
                    limit, self.pool_size
                )));
            }
        }

        if self.pool_size != self.max_concurrent {
            warn!(
                "pool_size ({}) differs from max_concurrent ({}); admitted captures may use overflow workers",
                self.pool_size, self.max_concurrent
            );
        }

        Ok(())
    }
}

/// Browser viewport configuration for captures
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Viewport {
    /// Viewport width in pixels (default: 1280)
    pub width: u32,

    /// Viewport height in pixels (default: 720)
    pub height: u32,

    /// Device pixel ratio (default: 1.0)
    pub device_scale_factor: f64,

    /// Whether to emulate a mobile device (default: false)
    pub mobile: bool,
}

impl Default for Viewport {
    fn default() -> Self {
        Self {
            width: 1280,
            height: 720,
            device_scale_factor: 1.0,
            mobile: false,
        }
    }
}

/// External text-extraction program run against every fresh capture
///
/// The program receives the PNG path as its last argument and prints a JSON
/// object with a `full_text_context` field on stdout. With no command
/// configured, enrichment attaches empty text.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct EnrichmentSettings {
    pub command: Option<String>,
    pub args: Vec<String>,
    /// Upper bound on one extraction run (default: 60 seconds)
    pub timeout: Duration,
}

impl Default for EnrichmentSettings {
    fn default() -> Self {
        Self {
            command: None,
            args: Vec::new(),
            timeout: Duration::from_secs(60),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ServerSettings {
    pub bind: String,
    pub port: u16,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0".to_string(),
            port: 3000,
        }
    }
}

/// Per-worker Chrome profile directory
pub fn worker_profile_dir(worker_id: u64) -> PathBuf {
    std::env::temp_dir().join(format!(
        "page-capture-{}-{}",
        std::process::id(),
        worker_id
    ))
}

/// Generate Chrome command-line arguments based on configuration
///
/// # Examples
///
/// ```rust
/// use page_capture::{Config, get_chrome_args};
///
/// let args = get_chrome_args(&Config::default());
/// assert!(args.contains(&"--no-sandbox".to_string()));
/// ```
pub fn get_chrome_args(config: &Config) -> Vec<String> {
    let mut args = vec![
        "--headless".to_string(),
        "--no-sandbox".to_string(),
        "--disable-setuid-sandbox".to_string(),
        "--disable-gpu".to_string(),
        "--disable-extensions".to_string(),
        "--disable-logging".to_string(),
        "--disable-software-rasterizer".to_string(),
        "--disable-dev-shm-usage".to_string(),
        "--no-first-run".to_string(),
        "--no-default-browser-check".to_string(),
        "--disable-features=ProcessSingleton".to_string(),
        format!(
            "--window-size={},{}",
            config.viewport.width, config.viewport.height
        ),
    ];

    if let Some(user_agent) = &config.user_agent {
        args.push(format!("--user-agent={user_agent}"));
    }

    args
}

pub fn create_browser_config(
    config: &Config,
    worker_id: u64,
) -> Result<chromiumoxide::browser::BrowserConfig, CaptureError> {
    use chromiumoxide::browser::BrowserConfig;

    let mut builder = BrowserConfig::builder()
        .window_size(config.viewport.width, config.viewport.height)
        .user_data_dir(worker_profile_dir(worker_id))
        .args(get_chrome_args(config));

    if let Some(chrome_path) = &config.chrome_path {
        builder = builder.chrome_executable(chrome_path);
    }

    builder
        .build()
        .map_err(CaptureError::ResourceCreationFailed)
}

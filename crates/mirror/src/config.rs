//! Configuration loading
//!
//! OAuth credentials are loaded from (in order of priority):
//! 1. Compile-time embedded credentials (for release builds)
//! 2. JSON file (Google Cloud Console format)
//! 3. Runtime environment variables
//!
//! Engine tuning lives in `settings.json` in the config directory; every
//! field is optional and falls back to its default.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

const CREDENTIALS_FILE: &str = "google-credentials.json";
const SETTINGS_FILE: &str = "settings.json";

/// Upper bound on folder-discovery threads
pub const MAX_CRAWL_WORKERS: usize = 15;

/// OAuth credentials for Drive API access
#[derive(Debug, Clone)]
pub struct DriveCredentials {
    pub client_id: String,
    pub client_secret: String,
}

#[derive(Deserialize)]
struct GoogleCredentialFile {
    installed: Option<ClientSection>,
    web: Option<ClientSection>,
}

#[derive(Deserialize)]
struct ClientSection {
    client_id: String,
    client_secret: String,
}

impl DriveCredentials {
    pub fn load() -> Result<Self> {
        if let Some(creds) = Self::from_compile_time() {
            return Ok(creds);
        }

        if config::config_exists(CREDENTIALS_FILE) {
            let creds: GoogleCredentialFile = config::load_json(CREDENTIALS_FILE)?;
            return Self::from_credential_file(creds);
        }

        Self::from_env()
    }

    /// Build with: GOOGLE_CLIENT_ID=xxx GOOGLE_CLIENT_SECRET=yyy cargo build --release
    pub fn from_compile_time() -> Option<Self> {
        let client_id = option_env!("GOOGLE_CLIENT_ID")?;
        let client_secret = option_env!("GOOGLE_CLIENT_SECRET")?;

        if client_id.is_empty() || client_secret.is_empty() {
            return None;
        }

        Some(Self {
            client_id: client_id.to_string(),
            client_secret: client_secret.to_string(),
        })
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let creds: GoogleCredentialFile = config::load_json_file(path)?;
        Self::from_credential_file(creds)
    }

    fn from_credential_file(creds: GoogleCredentialFile) -> Result<Self> {
        let section = creds
            .installed
            .or(creds.web)
            .context("Credentials file missing 'installed' or 'web' section")?;

        Ok(Self {
            client_id: section.client_id,
            client_secret: section.client_secret,
        })
    }

    pub fn from_json(json: &str) -> Result<Self> {
        let creds: GoogleCredentialFile =
            serde_json::from_str(json).context("Failed to parse credentials JSON")?;
        Self::from_credential_file(creds)
    }

    pub fn from_env() -> Result<Self> {
        let client_id = std::env::var("DRIVE_CLIENT_ID")
            .context("DRIVE_CLIENT_ID environment variable not set")?;
        let client_secret = std::env::var("DRIVE_CLIENT_SECRET")
            .context("DRIVE_CLIENT_SECRET environment variable not set")?;

        Ok(Self {
            client_id,
            client_secret,
        })
    }

    pub fn default_credentials_path() -> Option<PathBuf> {
        config::config_path(CREDENTIALS_FILE)
    }
}

/// How remote calls are paced
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ThrottleStrategy {
    /// No delay at all
    None,
    /// Constant delay before every call
    Fixed,
    /// Delay shrinks while calls succeed and grows after errors
    #[default]
    Adaptive,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ThrottleSettings {
    pub strategy: ThrottleStrategy,
    pub base_delay_ms: u64,
    pub min_delay_ms: u64,
    pub max_delay_ms: u64,
    /// Seconds without errors before the adaptive delay starts shrinking
    pub quiet_window_secs: u64,
    pub decay: f64,
    pub growth: f64,
}

impl Default for ThrottleSettings {
    fn default() -> Self {
        Self {
            strategy: ThrottleStrategy::Adaptive,
            base_delay_ms: 50,
            min_delay_ms: 10,
            max_delay_ms: 500,
            quiet_window_secs: 10,
            decay: 0.95,
            growth: 1.5,
        }
    }
}

impl ThrottleSettings {
    /// No pacing at all; used by tests and offline stores
    pub fn disabled() -> Self {
        Self {
            strategy: ThrottleStrategy::None,
            ..Self::default()
        }
    }
}

/// Caps on each merged artifact
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MergeLimits {
    pub max_bytes: usize,
    pub max_words: usize,
}

impl Default for MergeLimits {
    fn default() -> Self {
        Self {
            max_bytes: 200 * 1024 * 1024,
            max_words: 400_000,
        }
    }
}

/// Tuning for crawl, sync and merge
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncSettings {
    pub total_workers: usize,
    /// Share of `total_workers` spent listing folders
    pub folder_worker_percent: usize,
    pub crawl_workers: usize,
    pub crawl_batch_size: usize,
    pub throttle: ThrottleSettings,
    pub file_queue_capacity: usize,
    pub poll_interval_ms: u64,
    /// Consecutive idle observations before a phase is declared done
    pub quiescence_checks: usize,
    pub download_retries: usize,
    pub merge: MergeLimits,
    pub output_root: PathBuf,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            total_workers: 12,
            folder_worker_percent: 25,
            crawl_workers: 8,
            crawl_batch_size: 5,
            throttle: ThrottleSettings::default(),
            file_queue_capacity: 256,
            poll_interval_ms: 500,
            quiescence_checks: 5,
            download_retries: 3,
            merge: MergeLimits::default(),
            output_root: PathBuf::from("synced_content"),
        }
    }
}

impl SyncSettings {
    /// Load `settings.json` from the config directory, or defaults
    pub fn load() -> Result<Self> {
        let settings: Self = config::load_json_or_default(SETTINGS_FILE)?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<()> {
        if self.total_workers < 2 {
            anyhow::bail!("total_workers must be at least 2 (one folder and one file worker)");
        }
        if self.crawl_workers == 0 || self.crawl_batch_size == 0 {
            anyhow::bail!("crawl_workers and crawl_batch_size must be positive");
        }
        if self.folder_worker_percent > 100 {
            anyhow::bail!("folder_worker_percent must be between 0 and 100");
        }
        if self.file_queue_capacity == 0 || self.quiescence_checks == 0 {
            anyhow::bail!("file_queue_capacity and quiescence_checks must be positive");
        }
        if self.merge.max_bytes == 0 || self.merge.max_words == 0 {
            anyhow::bail!("merge caps must be positive");
        }
        if self.poll_interval_ms == 0 {
            anyhow::bail!("poll_interval_ms must be positive");
        }
        let throttle = &self.throttle;
        if throttle.strategy == ThrottleStrategy::Adaptive && throttle.min_delay_ms == 0 {
            anyhow::bail!("throttle.min_delay_ms must be positive for the adaptive strategy");
        }
        if throttle.min_delay_ms > throttle.max_delay_ms {
            anyhow::bail!(
                "throttle.min_delay_ms ({}) exceeds throttle.max_delay_ms ({})",
                throttle.min_delay_ms,
                throttle.max_delay_ms
            );
        }
        if throttle.decay.is_nan() || throttle.decay <= 0.0 || throttle.decay > 1.0 {
            anyhow::bail!("throttle.decay must be in (0, 1]");
        }
        if throttle.growth.is_nan() || throttle.growth < 1.0 {
            anyhow::bail!("throttle.growth must be at least 1");
        }
        Ok(())
    }

    /// Effective crawl concurrency
    pub fn crawl_worker_count(&self) -> usize {
        self.crawl_workers.clamp(1, MAX_CRAWL_WORKERS)
    }

    /// Split `total_workers` into (folder workers, file workers), each at least one
    pub fn worker_split(&self) -> (usize, usize) {
        let total = self.total_workers.max(2);
        let folders = (total * self.folder_worker_percent / 100).clamp(1, total - 1);
        (folders, total - folders)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

use crate::error::Result;
use crate::paths;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

// ---------------------------------------------------------------------------
// ConfigWarning / WarnLevel
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigWarning {
    pub level: WarnLevel,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WarnLevel {
    Warning,
    Error,
}

// ---------------------------------------------------------------------------
// TimingConfig
// ---------------------------------------------------------------------------

/// Reagent-switch settling overheads used by the duration estimator.
///
/// Every valve command costs `time_buffer_secs`; valve commands that select
/// one of the named buffers cost the matching extra overhead on top.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimingConfig {
    #[serde(default = "default_time_buffer")]
    pub time_buffer_secs: u64,
    #[serde(default = "default_buffer_overhead")]
    pub imaging_buffer_secs: u64,
    #[serde(default = "default_buffer_overhead")]
    pub wash_buffer_secs: u64,
    #[serde(default = "default_buffer_overhead")]
    pub bleach_buffer_secs: u64,
}

fn default_time_buffer() -> u64 {
    10
}

fn default_buffer_overhead() -> u64 {
    20
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            time_buffer_secs: default_time_buffer(),
            imaging_buffer_secs: default_buffer_overhead(),
            wash_buffer_secs: default_buffer_overhead(),
            bleach_buffer_secs: default_buffer_overhead(),
        }
    }
}

// ---------------------------------------------------------------------------
// RunnerConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunnerConfig {
    /// Interval of the elapsed-time poll and watchdog check.
    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,
    /// Slack added to a step's snapshotted duration before the watchdog
    /// reports a missing completion signal.
    #[serde(default = "default_watchdog_grace")]
    pub watchdog_grace_secs: u64,
}

fn default_poll_interval() -> u64 {
    1000
}

fn default_watchdog_grace() -> u64 {
    120
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval(),
            watchdog_grace_secs: default_watchdog_grace(),
        }
    }
}

impl RunnerConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn watchdog_grace(&self) -> Duration {
        Duration::from_secs(self.watchdog_grace_secs)
    }
}

// ---------------------------------------------------------------------------
// GeneratorConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeneratorConfig {
    #[serde(default = "default_imaging")]
    pub default_imaging_secs: u64,
    #[serde(default = "default_num_hybes")]
    pub default_num_hybes: u32,
}

fn default_imaging() -> u64 {
    300
}

fn default_num_hybes() -> u32 {
    10
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            default_imaging_secs: default_imaging(),
            default_num_hybes: default_num_hybes(),
        }
    }
}

// ---------------------------------------------------------------------------
// Config (top-level)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_version")]
    pub version: u32,
    #[serde(default = "default_catalog")]
    pub catalog: PathBuf,
    #[serde(default = "default_protocols_dir")]
    pub protocols_dir: PathBuf,
    #[serde(default)]
    pub timing: TimingConfig,
    #[serde(default)]
    pub runner: RunnerConfig,
    #[serde(default)]
    pub generator: GeneratorConfig,
}

fn default_version() -> u32 {
    1
}

fn default_catalog() -> PathBuf {
    PathBuf::from(paths::DEFAULT_CATALOG)
}

fn default_protocols_dir() -> PathBuf {
    PathBuf::from(paths::PROTOCOLS_DIR)
}

impl Default for Config {
    fn default() -> Self {
        Self {
            version: default_version(),
            catalog: default_catalog(),
            protocols_dir: default_protocols_dir(),
            timing: TimingConfig::default(),
            runner: RunnerConfig::default(),
            generator: GeneratorConfig::default(),
        }
    }
}

impl Config {
    /// Load `kilroy.yaml` from `root`, falling back to defaults when the file is absent.
    pub fn load(root: &Path) -> Result<Self> {
        let path = paths::config_path(root);
        if !path.exists() {
            tracing::debug!(path = %path.display(), "no config file, using defaults");
            return Ok(Self::default());
        }
        let data = std::fs::read_to_string(&path)?;
        let cfg: Config = serde_yaml::from_str(&data)?;
        Ok(cfg)
    }

    pub fn save(&self, root: &Path) -> Result<()> {
        let path = paths::config_path(root);
        let data = serde_yaml::to_string(self)?;
        crate::io::atomic_write(&path, data.as_bytes())
    }

    pub fn catalog_path(&self, root: &Path) -> PathBuf {
        root.join(&self.catalog)
    }

    pub fn protocols_path(&self, root: &Path) -> PathBuf {
        root.join(&self.protocols_dir)
    }

    // -----------------------------------------------------------------------
    // Validation
    // -----------------------------------------------------------------------

    pub fn validate(&self) -> Vec<ConfigWarning> {
        let mut warnings = Vec::new();

        if self.runner.poll_interval_ms == 0 {
            warnings.push(ConfigWarning {
                level: WarnLevel::Error,
                message: "runner.poll_interval_ms must be greater than zero".to_string(),
            });
        }

        if self.runner.watchdog_grace_secs == 0 {
            warnings.push(ConfigWarning {
                level: WarnLevel::Warning,
                message: "runner.watchdog_grace_secs is 0: any late completion is reported as a desync"
                    .to_string(),
            });
        }

        if self.protocols_dir.is_absolute() {
            warnings.push(ConfigWarning {
                level: WarnLevel::Warning,
                message: format!(
                    "protocols_dir '{}' is absolute; generated files will land outside the workspace",
                    self.protocols_dir.display()
                ),
            });
        }

        if self.generator.default_imaging_secs == 0 {
            warnings.push(ConfigWarning {
                level: WarnLevel::Warning,
                message: "generator.default_imaging_secs is 0: generated hold steps will be empty"
                    .to_string(),
            });
        }

        warnings
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

//! Harness configuration using Figment.
//!
//! Configuration is layered, later sources winning:
//! 1. built-in defaults (the public snap CI build server)
//! 2. `snap-harness.toml` in the working directory, or the file given on the command line
//! 3. the bare environment variables `PLUGINS_DIR`, `SNAP_DIR` and `PROJECT_DIR`
//! 4. environment variables prefixed with `SNAP_HARNESS_` (`__` separates nested keys)
//!
//! # Example
//! ```no_run
//! use snap_harness::config::HarnessConfig;
//!
//! let config = HarnessConfig::load()?;
//! println!("plugins go to {}", config.plugins_dir.display());
//! # Ok::<(), snap_harness::error::HarnessError>(())
//! ```

use crate::error::{HarnessError, HarnessResult};
use crate::logging::OutputFormat;
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default configuration file looked up in the working directory.
pub const DEFAULT_CONFIG_FILE: &str = "snap-harness.toml";

const BUILD_SERVER: &str = "http://snap.ci.snap-telemetry.io";

/// Top-level harness configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HarnessConfig {
    /// Directory plugins are downloaded to (`PLUGINS_DIR`)
    pub plugins_dir: PathBuf,
    /// Directory `snapd` and `snapctl` are downloaded to (`SNAP_DIR`)
    pub snap_dir: PathBuf,
    /// Checkout of the plugin project under test (`PROJECT_DIR`)
    pub project_dir: PathBuf,
    /// Harness logging level (trace, debug, info, warn, error)
    pub log_level: String,
    /// Harness log output format (pretty, compact, json)
    #[serde(default)]
    pub log_format: OutputFormat,
    /// Where binaries are fetched from
    pub sources: SourceConfig,
    /// Daemon launch settings
    pub snapd: SnapdConfig,
    /// Scenario tuning
    pub scenario: ScenarioConfig,
}

/// Download locations for every binary of a run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceConfig {
    /// `snapd` download URL
    pub snapd_url: String,
    /// `snapctl` download URL
    pub snapctl_url: String,
    /// Collector plugin download URL
    pub collector_url: String,
    /// Collector plugin version, absent when any version is acceptable
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub collector_version: Option<u32>,
    /// Publisher plugin download URL
    pub publisher_url: String,
    /// Publisher plugin version, absent when any version is acceptable
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub publisher_version: Option<u32>,
}

/// `snapd` launch settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapdConfig {
    /// `--plugin-trust` level (0 disables signature checks)
    #[serde(default)]
    pub plugin_trust: u8,
    /// `--log-level` (1 = debug ... 5 = fatal)
    #[serde(default = "default_snapd_log_level")]
    pub log_level: u8,
    /// REST API port; snapd and snapctl use their built-in default when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_port: Option<u16>,
    /// How long to wait for the ready banner
    #[serde(default = "default_startup_timeout", with = "humantime_serde")]
    pub startup_timeout: Duration,
    /// Extra arguments appended to the daemon command line
    #[serde(default)]
    pub extra_args: Vec<String>,
}

/// Scenario settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScenarioConfig {
    /// Per-invocation `snapctl` timeout
    #[serde(default = "default_command_timeout", with = "humantime_serde")]
    pub command_timeout: Duration,
    /// How long to wait for a new task to record its first hit
    #[serde(default = "default_task_settle_timeout", with = "humantime_serde")]
    pub task_settle_timeout: Duration,
    /// Metric whose config policy is inspected
    #[serde(default = "default_metric_namespace")]
    pub metric_namespace: String,
    /// Number of config-policy rules the metric must expose
    #[serde(default = "default_expected_rules")]
    pub expected_rules: usize,
    /// Task manifest; defaults to `<project_dir>/examples/tasks/task-mem.json`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_manifest: Option<PathBuf>,
}

// Default value functions
fn default_snapd_log_level() -> u8 {
    1
}

fn default_startup_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_command_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_task_settle_timeout() -> Duration {
    Duration::from_secs(10)
}

fn default_metric_namespace() -> String {
    "/intel/procfs/meminfo/mem_free".to_string()
}

fn default_expected_rules() -> usize {
    1
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            snapd_url: format!("{BUILD_SERVER}/snap/latest_build/linux/x86_64/snapd"),
            snapctl_url: format!("{BUILD_SERVER}/snap/latest_build/linux/x86_64/snapctl"),
            collector_url: format!(
                "{BUILD_SERVER}/plugins/snap-plugin-collector-meminfo/latest_build/linux/x86_64/snap-plugin-collector-meminfo"
            ),
            collector_version: Some(3),
            publisher_url: format!(
                "{BUILD_SERVER}/snap/latest_build/linux/x86_64/snap-plugin-publisher-mock-file"
            ),
            publisher_version: None,
        }
    }
}

impl Default for SnapdConfig {
    fn default() -> Self {
        Self {
            plugin_trust: 0,
            log_level: default_snapd_log_level(),
            api_port: None,
            startup_timeout: default_startup_timeout(),
            extra_args: Vec::new(),
        }
    }
}

impl Default for ScenarioConfig {
    fn default() -> Self {
        Self {
            command_timeout: default_command_timeout(),
            task_settle_timeout: default_task_settle_timeout(),
            metric_namespace: default_metric_namespace(),
            expected_rules: default_expected_rules(),
            task_manifest: None,
        }
    }
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            plugins_dir: PathBuf::from("/etc/snap/plugins"),
            snap_dir: PathBuf::from("/usr/local/bin"),
            project_dir: PathBuf::from("snap-plugin-collector-meminfo"),
            log_level: "info".to_string(),
            log_format: OutputFormat::default(),
            sources: SourceConfig::default(),
            snapd: SnapdConfig::default(),
            scenario: ScenarioConfig::default(),
        }
    }
}

impl HarnessConfig {
    /// Load configuration from defaults, `snap-harness.toml` and the environment
    pub fn load() -> HarnessResult<Self> {
        Self::figment(Path::new(DEFAULT_CONFIG_FILE))
            .extract()
            .map_err(HarnessError::from)
    }

    /// Load configuration with an explicit file, which must exist
    pub fn load_from<P: AsRef<Path>>(path: P) -> HarnessResult<Self> {
        let path = path.as_ref();
        if !path.is_file() {
            return Err(HarnessError::Configuration(format!(
                "config file {} does not exist",
                path.display()
            )));
        }
        Self::figment(path).extract().map_err(HarnessError::from)
    }

    fn figment(path: &Path) -> Figment {
        Figment::from(Serialized::defaults(HarnessConfig::default()))
            .merge(Toml::file(path))
            .merge(Env::raw().only(&["PLUGINS_DIR", "SNAP_DIR", "PROJECT_DIR"]))
            .merge(Env::prefixed("SNAP_HARNESS_").split("__"))
    }

    /// Validate configuration after loading
    pub fn validate(&self) -> HarnessResult<()> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.log_level.to_lowercase().as_str()) {
            return Err(HarnessError::Configuration(format!(
                "Invalid log_level '{}'. Must be one of: {}",
                self.log_level,
                valid_levels.join(", ")
            )));
        }

        for url in [
            &self.sources.snapd_url,
            &self.sources.snapctl_url,
            &self.sources.collector_url,
            &self.sources.publisher_url,
        ] {
            let parsed = url::Url::parse(url).map_err(|e| {
                HarnessError::Configuration(format!("Invalid download URL '{url}': {e}"))
            })?;
            if !matches!(parsed.scheme(), "http" | "https") {
                return Err(HarnessError::Configuration(format!(
                    "Download URL '{url}' must use http or https"
                )));
            }
        }

        if self.snapd.log_level == 0 || self.snapd.log_level > 5 {
            return Err(HarnessError::Configuration(format!(
                "Invalid snapd log_level {}. Must be 1-5",
                self.snapd.log_level
            )));
        }

        if self.snapd.startup_timeout.is_zero()
            || self.scenario.command_timeout.is_zero()
            || self.scenario.task_settle_timeout.is_zero()
        {
            return Err(HarnessError::Configuration(
                "Timeouts must be greater than zero".to_string(),
            ));
        }

        Ok(())
    }

    /// Task manifest used by the scenario
    pub fn task_manifest(&self) -> PathBuf {
        self.scenario
            .task_manifest
            .clone()
            .unwrap_or_else(|| self.project_dir.join("examples/tasks/task-mem.json"))
    }

    /// REST endpoint `snapctl` should talk to, if not the default one
    pub fn api_url(&self) -> Option<String> {
        self.snapd
            .api_port
            .map(|port| format!("http://localhost:{port}"))
    }
}

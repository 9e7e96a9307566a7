//! The binaries a large test needs and the processes built from them.
//!
//! - [`Binary`]: a downloadable executable (URL + target directory)
//! - [`Plugin`]: a collector, processor or publisher binary with its expected version
//! - [`BinarySet`]: everything one run downloads
//! - [`Snapd`]: supervisor for the telemetry daemon
//! - [`Snapctl`]: typed wrapper around the control CLI

pub mod plugin;
pub mod snapctl;
pub mod snapd;

pub use plugin::{Plugin, PluginType};
pub use snapctl::Snapctl;
pub use snapd::{Snapd, SnapdOptions};

use crate::config::HarnessConfig;
use crate::error::{HarnessError, HarnessResult};
use std::fmt;
use std::path::{Path, PathBuf};

/// A downloadable executable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Binary {
    url: String,
    dir: PathBuf,
    name: String,
}

impl Binary {
    /// Describe the binary at `url`, to be stored in `dir`.
    ///
    /// The file name is the last path segment of the URL.
    pub fn new(url: impl Into<String>, dir: impl Into<PathBuf>) -> HarnessResult<Self> {
        let url = url.into();
        let parsed = url::Url::parse(&url).map_err(|e| HarnessError::Url {
            url: url.clone(),
            reason: e.to_string(),
        })?;
        let name = parsed
            .path_segments()
            .and_then(|mut segments| segments.next_back())
            .filter(|segment| !segment.is_empty())
            .map(str::to_string)
            .ok_or_else(|| HarnessError::Url {
                url: url.clone(),
                reason: "no file name in path".to_string(),
            })?;

        Ok(Self {
            url,
            dir: dir.into(),
            name,
        })
    }

    /// Download URL
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Directory the binary lives in
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// File name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Full path of the executable
    pub fn path(&self) -> PathBuf {
        self.dir.join(&self.name)
    }
}

impl fmt::Display for Binary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.path().display())
    }
}

/// Every binary one run downloads.
#[derive(Debug, Clone)]
pub struct BinarySet {
    /// Telemetry daemon
    pub snapd: Binary,
    /// Control CLI
    pub snapctl: Binary,
    /// Collector under test
    pub collector: Plugin,
    /// Publisher the task writes to
    pub publisher: Plugin,
}

impl BinarySet {
    /// Build the set from configured URLs and directories.
    pub fn from_config(config: &HarnessConfig) -> HarnessResult<Self> {
        let sources = &config.sources;
        Ok(Self {
            snapd: Binary::new(&sources.snapd_url, &config.snap_dir)?,
            snapctl: Binary::new(&sources.snapctl_url, &config.snap_dir)?,
            collector: Plugin::new(
                Binary::new(&sources.collector_url, &config.plugins_dir)?,
                PluginType::Collector,
                sources.collector_version,
            ),
            publisher: Plugin::new(
                Binary::new(&sources.publisher_url, &config.plugins_dir)?,
                PluginType::Publisher,
                sources.publisher_version,
            ),
        })
    }

    /// Plugins in load order
    pub fn plugins(&self) -> [&Plugin; 2] {
        [&self.collector, &self.publisher]
    }

    /// Every binary, daemon and CLI first
    pub fn all(&self) -> [&Binary; 4] {
        [
            &self.snapd,
            &self.snapctl,
            self.collector.binary(),
            self.publisher.binary(),
        ]
    }
}

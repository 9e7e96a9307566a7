//! Plugin binaries.

use super::Binary;
use std::fmt;
use std::str::FromStr;

/// Kind of plugin as reported by `snapctl plugin list`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PluginType {
    /// Produces metrics
    Collector,
    /// Transforms metrics
    Processor,
    /// Writes metrics somewhere
    Publisher,
}

impl PluginType {
    /// Lowercase name used on the snapctl command line
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Collector => "collector",
            Self::Processor => "processor",
            Self::Publisher => "publisher",
        }
    }
}

impl fmt::Display for PluginType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PluginType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "collector" => Ok(Self::Collector),
            "processor" => Ok(Self::Processor),
            "publisher" => Ok(Self::Publisher),
            other => Err(format!("Unknown plugin type '{other}'")),
        }
    }
}

/// A plugin binary with the version the test expects it to register.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Plugin {
    binary: Binary,
    plugin_type: PluginType,
    version: Option<u32>,
}

impl Plugin {
    /// `version` is `None` when any registered version is acceptable.
    pub fn new(binary: Binary, plugin_type: PluginType, version: Option<u32>) -> Self {
        Self {
            binary,
            plugin_type,
            version,
        }
    }

    /// Underlying executable
    pub fn binary(&self) -> &Binary {
        &self.binary
    }

    /// Plugin kind
    pub fn plugin_type(&self) -> PluginType {
        self.plugin_type
    }

    /// Expected version, if pinned
    pub fn version(&self) -> Option<u32> {
        self.version
    }

    /// Name the daemon registers the plugin under.
    ///
    /// `snap-plugin-collector-meminfo` registers as `meminfo`. Files that do not
    /// follow the `snap-plugin-<type>-` convention keep their full name.
    pub fn short_name(&self) -> &str {
        let prefix = format!("snap-plugin-{}-", self.plugin_type);
        let name = self.binary.name();
        name.strip_prefix(prefix.as_str()).unwrap_or(name)
    }
}

impl fmt::Display for Plugin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.version {
            Some(version) => write!(f, "{}:{}:{}", self.plugin_type, self.short_name(), version),
            None => write!(f, "{}:{}", self.plugin_type, self.short_name()),
        }
    }
}

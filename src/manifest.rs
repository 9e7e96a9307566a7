//! Task manifest preflight.
//!
//! snap accepts task manifests as JSON or YAML. Before handing one to
//! `snapctl task create` the harness parses it and checks that it carries a
//! schedule and a workflow, so a broken fixture fails with its path.

use crate::error::{HarnessError, HarnessResult};
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// The parts of a task manifest the harness cares about
#[derive(Debug, Clone, Deserialize)]
pub struct TaskManifest {
    /// Manifest format version
    #[serde(default)]
    pub version: Option<u32>,
    /// When the task fires
    pub schedule: Schedule,
    /// Collect/process/publish tree, kept opaque
    pub workflow: serde_json::Value,
    /// Consecutive failures before the daemon disables the task
    #[serde(default, rename = "max-failures")]
    pub max_failures: Option<i64>,
}

/// Task schedule
#[derive(Debug, Clone, Deserialize)]
pub struct Schedule {
    /// `simple`, `windowed`, `cron` or `streaming`
    #[serde(rename = "type")]
    pub schedule_type: String,
    /// Interval for simple and windowed schedules, e.g. `1s`
    #[serde(default)]
    pub interval: Option<String>,
}

impl TaskManifest {
    /// Read and check a manifest file
    pub async fn load(path: &Path) -> HarnessResult<Self> {
        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| manifest_error(path, e.to_string()))?;
        Self::parse(path, &content)
    }

    /// Check manifest text; `path` selects the format by extension and labels errors
    pub fn parse(path: &Path, content: &str) -> HarnessResult<Self> {
        let is_json = path
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));
        let manifest: TaskManifest = if is_json {
            serde_json::from_str(content).map_err(|e| manifest_error(path, e.to_string()))?
        } else {
            serde_yaml::from_str(content).map_err(|e| manifest_error(path, e.to_string()))?
        };

        if !manifest.workflow.is_object() {
            return Err(manifest_error(path, "workflow must be a mapping".to_string()));
        }
        if manifest.schedule.schedule_type.trim().is_empty() {
            return Err(manifest_error(path, "schedule type is empty".to_string()));
        }
        Ok(manifest)
    }

    /// Short description for logs, e.g. `simple every 1s`
    pub fn schedule_summary(&self) -> String {
        match &self.schedule.interval {
            Some(interval) => format!("{} every {}", self.schedule.schedule_type, interval),
            None => self.schedule.schedule_type.clone(),
        }
    }
}

fn manifest_error(path: &Path, reason: String) -> HarnessError {
    HarnessError::Manifest {
        path: PathBuf::from(path),
        reason,
    }
}

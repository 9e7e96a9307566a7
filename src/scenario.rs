//! The meminfo collector large test.
//!
//! [`LargeTest`] mirrors a classic set-up / exercise / tear-down test case:
//!
//! 1. **set up**: optionally download the binaries, start `snapd`, wait for it to be ready
//! 2. **exercise**: load both plugins, inspect metrics and config policy, run a task
//!    through create/stop, unload the collector, and check the daemon logged no errors
//! 3. **tear down**: stop `snapd`
//!
//! A failed check is reported as [`HarnessError::Check`] with a message of the form
//! `"<what> <actual> expected <expected>"`.

use crate::bins::{BinarySet, Snapctl, Snapd, SnapdOptions};
use crate::config::HarnessConfig;
use crate::download::{self, DownloadOptions};
use crate::error::{HarnessError, HarnessResult};
use std::path::PathBuf;
use std::time::{Duration, Instant};

const TASK_POLL_INTERVAL: Duration = Duration::from_millis(250);

/// Figures observed during a successful run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScenarioReport {
    /// Id of the task created by the run
    pub task_id: String,
    /// Hits recorded before the task was stopped
    pub hits: u64,
    /// Metrics advertised while both plugins were loaded
    pub metrics: usize,
    /// Config-policy rules of the inspected metric
    pub rules: usize,
}

fn ensure(condition: bool, message: impl FnOnce() -> String) -> HarnessResult<()> {
    if condition {
        Ok(())
    } else {
        Err(HarnessError::Check(message()))
    }
}

fn ensure_eq(what: &str, actual: usize, expected: usize) -> HarnessResult<()> {
    ensure(actual == expected, || {
        format!("{what} {actual} expected {expected}")
    })
}

fn ensure_gt(what: &str, actual: u64, floor: u64) -> HarnessResult<()> {
    ensure(actual > floor, || format!("{what} {actual} expected >{floor}"))
}

/// Number of failed tests in a finished run, the runner's exit status.
///
/// Failed checks count as failed tests. Any other error means the test could not run
/// and is handed back.
pub fn failed_tests(outcome: HarnessResult<ScenarioReport>) -> HarnessResult<u8> {
    match outcome {
        Ok(_) => Ok(0),
        Err(e) if e.is_check_failure() => Ok(1),
        Err(e) => Err(e),
    }
}

/// One large-test run against a freshly started daemon
pub struct LargeTest {
    binaries: BinarySet,
    snapd: Snapd,
    snapctl: Snapctl,
    task_manifest: PathBuf,
    metric_namespace: String,
    expected_rules: usize,
    startup_timeout: Duration,
    task_settle_timeout: Duration,
}

impl LargeTest {
    /// Prepare a run from configuration; nothing is downloaded or started yet
    pub fn new(config: &HarnessConfig) -> HarnessResult<Self> {
        let binaries = BinarySet::from_config(config)?;
        let snapd = Snapd::new(
            binaries.snapd.clone(),
            SnapdOptions::from_config(&config.snapd),
        );
        let snapctl = Snapctl::new(
            binaries.snapctl.clone(),
            config.api_url(),
            config.scenario.command_timeout,
        );

        Ok(Self {
            binaries,
            snapd,
            snapctl,
            task_manifest: config.task_manifest(),
            metric_namespace: config.scenario.metric_namespace.clone(),
            expected_rules: config.scenario.expected_rules,
            startup_timeout: config.snapd.startup_timeout,
            task_settle_timeout: config.scenario.task_settle_timeout,
        })
    }

    /// Binaries used by the run
    pub fn binaries(&self) -> &BinarySet {
        &self.binaries
    }

    /// Daemon supervisor
    pub fn snapd(&mut self) -> &mut Snapd {
        &mut self.snapd
    }

    /// Control client
    pub fn snapctl(&self) -> &Snapctl {
        &self.snapctl
    }

    /// Download binaries (when `download` is given) and bring the daemon up
    pub async fn set_up(&mut self, download: Option<DownloadOptions>) -> HarnessResult<()> {
        if let Some(options) = download {
            download::download_binaries(&self.binaries, options).await?;
        }

        tracing::info!("starting snapd");
        self.snapd.start().await?;
        ensure(self.snapd.is_alive(), || "snapd thread died".to_string())?;

        tracing::debug!("Waiting for snapd to finish starting");
        match self.snapd.wait_ready(self.startup_timeout).await {
            Ok(()) => Ok(()),
            Err(HarnessError::DaemonNotReady(_)) => {
                tracing::error!("snapd errors: {:?}", self.snapd.errors());
                self.snapd.stop().await?;
                Err(HarnessError::Check("snapd not ready, timeout!".to_string()))
            }
            Err(HarnessError::DaemonExited(status)) => {
                tracing::error!("snapd errors: {:?}", self.snapd.errors());
                Err(HarnessError::Check(format!("snapd thread died ({status})")))
            }
            Err(other) => Err(other),
        }
    }

    /// Drive plugins and a task through their lifecycle and check every step
    pub async fn exercise(&self) -> HarnessResult<ScenarioReport> {
        // load plugins
        let plugins = self.binaries.plugins();
        for plugin in plugins {
            tracing::info!("snapctl plugin load {}", plugin.binary().path().display());
            let loaded = self.snapctl.load_plugin(plugin).await?;
            ensure(loaded, || format!("{} loaded", plugin.binary().name()))?;
        }

        // check available metrics, plugins and tasks
        let metrics = self.snapctl.list_metrics().await?;
        let loaded_plugins = self.snapctl.list_plugins().await?;
        let tasks = self.snapctl.list_tasks().await?;
        ensure_gt("Metrics available", metrics.len() as u64, 0)?;
        ensure_eq("Plugins available", loaded_plugins.len(), plugins.len())?;
        ensure_eq("Tasks available", tasks.len(), 0)?;

        // check config policy for metric
        let rules = self.snapctl.metric_get(&self.metric_namespace).await?;
        ensure_eq("Rules available", rules.len(), self.expected_rules)?;

        // create and list available task
        tracing::info!("snapctl task create -t {}", self.task_manifest.display());
        let task_id = self.snapctl.create_task(&self.task_manifest).await?;
        let tasks = self.snapctl.list_tasks().await?;
        ensure_eq("Tasks available", tasks.len(), 1)?;

        // check if task hits and fails
        let hits = self.wait_for_hits(&task_id).await?;
        let fails = self.snapctl.task_fails_count(&task_id).await?;
        ensure_gt("Task hits", hits, 0)?;
        ensure(fails == 0, || format!("Task fails {fails} expected 0"))?;

        // stop task and list available tasks
        tracing::info!("snapctl task stop {}", task_id);
        let stopped = self.snapctl.stop_task(&task_id).await?;
        ensure(stopped, || "Task stopped".to_string())?;
        let tasks = self.snapctl.list_tasks().await?;
        ensure_eq("Tasks available", tasks.len(), 1)?;

        // unload plugin, list metrics and plugins
        let collector = &self.binaries.collector;
        tracing::info!("snapctl plugin unload {}", collector);
        // a refused unload shows up in the counts below
        self.snapctl.unload_plugin(collector).await?;
        let metrics_after = self.snapctl.list_metrics().await?;
        let plugins_after = self.snapctl.list_plugins().await?;
        ensure_eq("Metrics available", metrics_after.len(), 0)?;
        ensure_eq("Plugins available", plugins_after.len(), plugins.len() - 1)?;

        // check for snapd errors
        let errors = self.snapd.errors();
        ensure(errors.is_empty(), || {
            format!(
                "Errors found during snapd execution:\n{}",
                errors.join("\n")
            )
        })?;

        Ok(ScenarioReport {
            task_id,
            hits,
            metrics: metrics.len(),
            rules: rules.len(),
        })
    }

    /// Poll the hit counter until it moves or the settle timeout passes
    async fn wait_for_hits(&self, task_id: &str) -> HarnessResult<u64> {
        let deadline = Instant::now() + self.task_settle_timeout;
        loop {
            let hits = self.snapctl.task_hits_count(task_id).await?;
            if hits > 0 || Instant::now() >= deadline {
                return Ok(hits);
            }
            tokio::time::sleep(TASK_POLL_INTERVAL).await;
        }
    }

    /// Stop the daemon
    pub async fn tear_down(&mut self) -> HarnessResult<()> {
        tracing::info!("stopping snapd");
        self.snapd.stop().await?;
        if self.snapd.is_alive() {
            tracing::warn!("snapd did not die");
        }
        Ok(())
    }

    /// Set up, exercise and tear down; tear-down runs even when a check fails
    pub async fn run(&mut self, download: Option<DownloadOptions>) -> HarnessResult<ScenarioReport> {
        self.set_up(download).await?;
        let outcome = self.exercise().await;
        let teardown = self.tear_down().await;

        let report = outcome?;
        teardown?;
        Ok(report)
    }
}

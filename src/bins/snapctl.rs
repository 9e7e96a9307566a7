//! Typed wrapper around the `snapctl` control CLI.
//!
//! Every operation runs one `snapctl` invocation with a timeout and parses its stdout
//! with the functions in [`crate::output`]. Infrastructure problems (spawn failures,
//! timeouts, unparseable output) are errors; operations that the daemon refuses are
//! reported through their return value so a test can assert on them.

use super::{Binary, Plugin};
use crate::error::{HarnessError, HarnessResult};
use crate::manifest::TaskManifest;
use crate::output::{self, MetricRow, PluginRow, RuleRow, TaskRow};
use std::ffi::{OsStr, OsString};
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;

/// Captured result of one `snapctl` invocation
#[derive(Debug, Clone)]
pub struct CommandOutput {
    /// Rendered command line, for messages
    pub command: String,
    /// Whether the process exited with status 0
    pub success: bool,
    /// Exit status text
    pub status: String,
    /// Captured standard output
    pub stdout: String,
    /// Captured standard error
    pub stderr: String,
}

impl CommandOutput {
    /// Turn a non-zero exit into [`HarnessError::CommandFailed`]
    pub fn checked(self) -> HarnessResult<Self> {
        if self.success {
            Ok(self)
        } else {
            Err(HarnessError::CommandFailed {
                command: self.command,
                status: self.status,
                stderr: self.stderr.trim().to_string(),
            })
        }
    }

    /// Accept a non-zero exit if stdout carries a `No ... found` notice
    fn checked_listing(self) -> HarnessResult<Self> {
        if self.stdout.lines().any(output::is_empty_notice) {
            Ok(self)
        } else {
            self.checked()
        }
    }

    fn parse_error(&self, reason: String) -> HarnessError {
        HarnessError::Parse {
            command: self.command.clone(),
            reason,
        }
    }
}

/// Client for one daemon
#[derive(Debug, Clone)]
pub struct Snapctl {
    binary: Binary,
    api_url: Option<String>,
    timeout: Duration,
}

impl Snapctl {
    /// `api_url` is passed as `--url` when set
    pub fn new(binary: Binary, api_url: Option<String>, timeout: Duration) -> Self {
        Self {
            binary,
            api_url,
            timeout,
        }
    }

    /// Binary this client runs
    pub fn binary(&self) -> &Binary {
        &self.binary
    }

    /// Run `snapctl` with arbitrary arguments
    pub async fn run<I, S>(&self, args: I) -> HarnessResult<CommandOutput>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        let program = self.binary.path();
        let mut full_args: Vec<OsString> = Vec::new();
        if let Some(url) = &self.api_url {
            full_args.push("--url".into());
            full_args.push(url.into());
        }
        full_args.extend(args.into_iter().map(|arg| arg.as_ref().to_os_string()));

        let command = std::iter::once(program.as_os_str())
            .chain(full_args.iter().map(OsString::as_os_str))
            .map(|part| part.to_string_lossy())
            .collect::<Vec<_>>()
            .join(" ");
        tracing::debug!("{}", command);

        let mut cmd = Command::new(&program);
        cmd.args(&full_args)
            .stdin(Stdio::null())
            .kill_on_drop(true);

        let result = tokio::time::timeout(self.timeout, cmd.output())
            .await
            .map_err(|_| HarnessError::CommandTimeout {
                command: command.clone(),
                timeout: self.timeout,
            })?
            .map_err(|source| HarnessError::Spawn {
                program: program.clone(),
                source,
            })?;

        let output = CommandOutput {
            command,
            success: result.status.success(),
            status: result.status.to_string(),
            stdout: String::from_utf8_lossy(&result.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&result.stderr).into_owned(),
        };
        tracing::trace!(stdout = %output.stdout, stderr = %output.stderr, "snapctl finished");
        Ok(output)
    }

    /// `snapctl plugin load <path>`; `true` if the daemon loaded it
    pub async fn load_plugin(&self, plugin: &Plugin) -> HarnessResult<bool> {
        let path = plugin.binary().path();
        let mut args: Vec<OsString> = vec!["plugin".into(), "load".into()];
        args.push(path.into_os_string());
        let reply = self.run(&args).await?;

        let loaded = reply.success && reply.stdout.contains("Plugin loaded");
        if !loaded {
            tracing::warn!(
                plugin = %plugin,
                "Plugin load refused: {}{}",
                reply.stdout.trim(),
                reply.stderr.trim()
            );
        }
        Ok(loaded)
    }

    /// `snapctl plugin unload <type>:<name>:<version>`; `true` if the daemon unloaded it.
    ///
    /// A plugin without a pinned version is unloaded at whatever version
    /// `plugin list` reports for it.
    pub async fn unload_plugin(&self, plugin: &Plugin) -> HarnessResult<bool> {
        let version = match plugin.version() {
            Some(version) => version,
            None => self.loaded_version(plugin).await?,
        };
        let target = format!(
            "{}:{}:{}",
            plugin.plugin_type(),
            plugin.short_name(),
            version
        );
        let reply = self.run(["plugin", "unload", target.as_str()]).await?;

        let unloaded = reply.success && reply.stdout.contains("Plugin unloaded");
        if !unloaded {
            tracing::warn!(
                plugin = %target,
                "Plugin unload refused: {}{}",
                reply.stdout.trim(),
                reply.stderr.trim()
            );
        }
        Ok(unloaded)
    }

    async fn loaded_version(&self, plugin: &Plugin) -> HarnessResult<u32> {
        self.list_plugins()
            .await?
            .into_iter()
            .filter(|row| row.name == plugin.short_name() && row.plugin_type == plugin.plugin_type())
            .map(|row| row.version)
            .max()
            .ok_or_else(|| HarnessError::Parse {
                command: "snapctl plugin list".to_string(),
                reason: format!("{} is not loaded", plugin),
            })
    }

    /// `snapctl plugin list`
    pub async fn list_plugins(&self) -> HarnessResult<Vec<PluginRow>> {
        let reply = self.run(["plugin", "list"]).await?.checked_listing()?;
        output::parse_plugin_list(&reply.stdout).map_err(|reason| reply.parse_error(reason))
    }

    /// `snapctl metric list`
    pub async fn list_metrics(&self) -> HarnessResult<Vec<MetricRow>> {
        let reply = self.run(["metric", "list"]).await?.checked_listing()?;
        output::parse_metric_list(&reply.stdout).map_err(|reason| reply.parse_error(reason))
    }

    /// `snapctl task list`
    pub async fn list_tasks(&self) -> HarnessResult<Vec<TaskRow>> {
        let reply = self.run(["task", "list"]).await?.checked_listing()?;
        output::parse_task_list(&reply.stdout).map_err(|reason| reply.parse_error(reason))
    }

    /// Config-policy rules of one metric (`snapctl metric get -m <namespace>`)
    pub async fn metric_get(&self, namespace: &str) -> HarnessResult<Vec<RuleRow>> {
        let reply = self
            .run(["metric", "get", "-m", namespace])
            .await?
            .checked()?;
        output::parse_metric_rules(&reply.stdout).map_err(|reason| reply.parse_error(reason))
    }

    /// `snapctl task create -t <manifest>`; returns the new task id.
    ///
    /// The manifest is checked locally first so a broken file is reported with its
    /// path instead of a daemon-side error.
    pub async fn create_task(&self, manifest: &Path) -> HarnessResult<String> {
        let task = TaskManifest::load(manifest).await?;
        tracing::debug!(
            manifest = %manifest.display(),
            schedule = %task.schedule_summary(),
            "task manifest ok"
        );

        let mut args: Vec<OsString> = vec!["task".into(), "create".into(), "-t".into()];
        args.push(manifest.as_os_str().to_os_string());
        let reply = self.run(&args).await?.checked()?;
        output::parse_created_task_id(&reply.stdout).map_err(|reason| reply.parse_error(reason))
    }

    /// Listing row for one task
    pub async fn task(&self, task_id: &str) -> HarnessResult<TaskRow> {
        self.list_tasks()
            .await?
            .into_iter()
            .find(|row| row.id == task_id)
            .ok_or_else(|| HarnessError::TaskNotFound(task_id.to_string()))
    }

    /// Successful collections of a task
    pub async fn task_hits_count(&self, task_id: &str) -> HarnessResult<u64> {
        Ok(self.task(task_id).await?.hits)
    }

    /// Failed collections of a task
    pub async fn task_fails_count(&self, task_id: &str) -> HarnessResult<u64> {
        Ok(self.task(task_id).await?.fails)
    }

    /// `snapctl task stop <id>`; `true` if the daemon stopped it
    pub async fn stop_task(&self, task_id: &str) -> HarnessResult<bool> {
        let reply = self.run(["task", "stop", task_id]).await?;
        let stopped = reply.success && reply.stdout.contains("Task stopped");
        if !stopped {
            tracing::warn!(
                task = task_id,
                "Task stop refused: {}{}",
                reply.stdout.trim(),
                reply.stderr.trim()
            );
        }
        Ok(stopped)
    }
}

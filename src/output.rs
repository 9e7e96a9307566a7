//! Parsers for `snapctl` output.
//!
//! `snapctl` prints tab-aligned tables with a header row, or a one-line notice such as
//! `No plugins found. Have you loaded a plugin?` when there is nothing to list. These
//! functions turn captured stdout into typed rows. They never look at exit codes.

use crate::bins::PluginType;
use regex::Regex;
use std::sync::LazyLock;

static TASK_ID: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^\s*ID:\s*(\S+)\s*$").expect("Invalid task id regex"));

/// Row of `snapctl plugin list`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PluginRow {
    /// Registered plugin name
    pub name: String,
    /// Registered version
    pub version: u32,
    /// Plugin kind
    pub plugin_type: PluginType,
    /// Whether the plugin was signed
    pub signed: bool,
    /// Load status, e.g. `loaded`
    pub status: String,
}

/// Row of `snapctl metric list`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetricRow {
    /// Metric namespace
    pub namespace: String,
    /// Versions offering the metric
    pub versions: Vec<u32>,
}

/// Row of `snapctl task list`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskRow {
    /// Task id
    pub id: String,
    /// Task name
    pub name: String,
    /// Scheduler state, e.g. `Running` or `Stopped`
    pub state: String,
    /// Successful collections
    pub hits: u64,
    /// Missed intervals
    pub misses: u64,
    /// Failed collections
    pub fails: u64,
}

/// Config-policy rule from `snapctl metric get`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuleRow {
    /// Rule key
    pub name: String,
    /// Value type
    pub rule_type: String,
    /// Remaining columns (default, required, minimum, maximum); empty cells are dropped
    pub details: Vec<String>,
}

/// `No ... found` notices replace the table when there is nothing to list.
pub fn is_empty_notice(line: &str) -> bool {
    let lower = line.trim().to_lowercase();
    lower.starts_with("no ") && lower.contains(" found")
}

/// Data rows of a table whose header starts with `header`, split into columns.
fn table_rows<'a>(stdout: &'a str, header: &str) -> Vec<Vec<&'a str>> {
    let mut rows = Vec::new();
    for line in stdout.lines() {
        let columns: Vec<&str> = line.split_whitespace().collect();
        match columns.first() {
            None => continue,
            Some(first) if *first == header => continue,
            Some(_) if is_empty_notice(line) => return Vec::new(),
            Some(_) => rows.push(columns),
        }
    }
    rows
}

fn column<'a>(row: &[&'a str], index: usize, what: &str) -> Result<&'a str, String> {
    row.get(index)
        .copied()
        .ok_or_else(|| format!("missing {what} column in row '{}'", row.join(" ")))
}

fn number<T: std::str::FromStr>(value: &str, what: &str) -> Result<T, String> {
    value
        .parse()
        .map_err(|_| format!("{what} '{value}' is not a number"))
}

/// Parse `snapctl plugin list`
pub fn parse_plugin_list(stdout: &str) -> Result<Vec<PluginRow>, String> {
    table_rows(stdout, "NAME")
        .into_iter()
        .map(|row| -> Result<PluginRow, String> {
            Ok(PluginRow {
                name: column(&row, 0, "name")?.to_string(),
                version: number(column(&row, 1, "version")?, "version")?,
                plugin_type: column(&row, 2, "type")?.parse()?,
                signed: column(&row, 3, "signed")?.eq_ignore_ascii_case("true"),
                status: column(&row, 4, "status")?.to_string(),
            })
        })
        .collect()
}

/// Parse `snapctl metric list`
pub fn parse_metric_list(stdout: &str) -> Result<Vec<MetricRow>, String> {
    table_rows(stdout, "NAMESPACE")
        .into_iter()
        .map(|row| -> Result<MetricRow, String> {
            let versions = column(&row, 1, "versions")?
                .split(',')
                .map(|v| number(v.trim(), "version"))
                .collect::<Result<Vec<u32>, String>>()?;
            Ok(MetricRow {
                namespace: column(&row, 0, "namespace")?.to_string(),
                versions,
            })
        })
        .collect()
}

/// Parse `snapctl task list`
pub fn parse_task_list(stdout: &str) -> Result<Vec<TaskRow>, String> {
    table_rows(stdout, "ID")
        .into_iter()
        .map(|row| -> Result<TaskRow, String> {
            Ok(TaskRow {
                id: column(&row, 0, "id")?.to_string(),
                name: column(&row, 1, "name")?.to_string(),
                state: column(&row, 2, "state")?.to_string(),
                hits: number(column(&row, 3, "hit")?, "hit count")?,
                misses: number(column(&row, 4, "miss")?, "miss count")?,
                fails: number(column(&row, 5, "fail")?, "fail count")?,
            })
        })
        .collect()
}

/// Parse the config-policy rules out of `snapctl metric get`.
///
/// Metrics without configurable rules print no `Rules for collecting` banner and
/// yield an empty list.
pub fn parse_metric_rules(stdout: &str) -> Result<Vec<RuleRow>, String> {
    let mut lines = stdout
        .lines()
        .skip_while(|line| !line.contains("Rules for collecting"));
    if lines.next().is_none() {
        return Ok(Vec::new());
    }

    let mut lines = lines.skip_while(|line| line.trim().is_empty());
    match lines.next() {
        Some(header) if header.split_whitespace().next() == Some("NAME") => {}
        Some(other) => return Err(format!("expected rule header, found '{}'", other.trim())),
        None => return Err("rule banner without a rule table".to_string()),
    }

    lines
        .take_while(|line| !line.trim().is_empty())
        .map(|line| -> Result<RuleRow, String> {
            let row: Vec<&str> = line.split_whitespace().collect();
            Ok(RuleRow {
                name: column(&row, 0, "name")?.to_string(),
                rule_type: column(&row, 1, "type")?.to_string(),
                details: row[2..].iter().map(|s| s.to_string()).collect(),
            })
        })
        .collect()
}

/// Task id from `snapctl task create` output.
pub fn parse_created_task_id(stdout: &str) -> Result<String, String> {
    if !stdout.contains("Task created") {
        return Err("no 'Task created' confirmation".to_string());
    }
    TASK_ID
        .captures(stdout)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
        .ok_or_else(|| "no 'ID:' line".to_string())
}

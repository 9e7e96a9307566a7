//! Shell-script stand-ins for snapd and snapctl.
//!
//! `FakeSnap` lays out a temporary install:
//!
//! ```text
//! <root>/bin/snapd          prints logrus-style lines, then the ready banner
//! <root>/bin/snapctl        keeps plugin and task state under <root>/state
//! <root>/plugins/...        non-empty plugin files
//! <root>/project/examples/tasks/task-mem.json
//! ```
//!
//! and a `HarnessConfig` pointing at it. Marker files in the state directory change
//! what the fake snapctl reports (see [`FakeSnap::inject`]).

#![allow(dead_code)]

use snap_harness::config::HarnessConfig;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tempfile::TempDir;

/// Hits every fake task reports unless the `no_hits` marker is present
pub const FAKE_TASK_HITS: u64 = 7;

/// Metrics the fake collector advertises
pub const FAKE_METRICS: usize = 5;

/// How the fake daemon behaves after launch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FakeDaemon {
    /// Prints the ready banner and keeps running
    Healthy,
    /// Becomes ready, then logs an error line
    LogsErrors,
    /// Logs a fatal line and exits 1 without becoming ready
    Crashes,
    /// Keeps running but never prints the ready banner
    Hangs,
}

const SNAPD_PREAMBLE: &str = r#"#!/bin/sh
STATE="$(cd "$(dirname "$0")/.." && pwd)/state"
echo "$*" > "$STATE/snapd.args"
echo 'time="2016-09-12T14:42:00Z" level=info msg="setting log level to: debug" _module=snapd'
echo 'time="2016-09-12T14:42:00Z" level=info msg="control started" _module=control' >&2
"#;

const READY_LINE: &str =
    r#"echo 'time="2016-09-12T14:42:01Z" level=info msg="snapd started" _module=snapd block=main'"#;

const SNAPCTL: &str = r#"#!/bin/sh
STATE="$(cd "$(dirname "$0")/.." && pwd)/state"
mkdir -p "$STATE/plugins" "$STATE/tasks"
if [ "$1" = "--url" ]; then
    echo "$2" > "$STATE/snapctl.url"
    shift 2
fi

has_collector() {
    ls "$STATE/plugins" | grep -q '^collector:'
}

case "$1 $2" in
"plugin load")
    if [ -e "$STATE/refuse_load" ]; then
        echo "Error loading plugin:"
        echo "plugin refused by daemon" >&2
        exit 1
    fi
    if [ ! -s "$3" ]; then
        echo "Error loading plugin:"
        echo "file does not exist: $3" >&2
        exit 1
    fi
    file=$(basename "$3")
    rest=${file#snap-plugin-}
    ptype=${rest%%-*}
    name=${rest#*-}
    : > "$STATE/plugins/$ptype:$name:3"
    echo "Plugin loaded"
    echo "Name: $name"
    echo "Version: 3"
    echo "Type: $ptype"
    echo "Signed: false"
    echo "Loaded Time: Mon, 12 Sep 2016 14:42:03 UTC"
    ;;
"plugin unload")
    if [ ! -e "$STATE/plugins/$3" ] || [ -e "$STATE/refuse_unload" ]; then
        echo "Error unloading plugin:"
        echo "plugin not found" >&2
        exit 1
    fi
    rm -f "$STATE/plugins/$3"
    echo "Plugin unloaded"
    echo "Name: $(echo "$3" | cut -d: -f2)"
    echo "Version: $(echo "$3" | cut -d: -f3)"
    echo "Type: $(echo "$3" | cut -d: -f1)"
    ;;
"plugin list")
    if [ -z "$(ls "$STATE/plugins")" ]; then
        echo "No plugins found. Have you loaded a plugin?"
        exit 1
    fi
    printf 'NAME \t VERSION \t TYPE \t\t SIGNED \t STATUS \t LOADED TIME\n'
    for p in $(ls "$STATE/plugins"); do
        ptype=$(echo "$p" | cut -d: -f1)
        name=$(echo "$p" | cut -d: -f2)
        version=$(echo "$p" | cut -d: -f3)
        printf '%s \t %s \t\t %s \t false \t\t loaded \t Mon, 12 Sep 2016 14:42:03 UTC\n' "$name" "$version" "$ptype"
    done
    ;;
"metric list")
    if ! has_collector; then
        echo "No metrics found. Have you loaded any collectors yet?"
        exit 1
    fi
    printf 'NAMESPACE \t\t\t\t VERSIONS\n'
    for m in active buffers cached mem_free mem_total; do
        printf '/intel/procfs/meminfo/%s \t 3\n' "$m"
    done
    ;;
"metric get")
    ns="$4"
    if ! has_collector; then
        echo "Error getting metric:"
        echo "metric not found: $ns" >&2
        exit 1
    fi
    printf 'NAMESPACE \t\t\t\t VERSION \t UNIT \t LAST ADVERTISED TIME \t\t DESCRIPTION\n'
    printf '%s \t 3 \t\t \t Mon, 12 Sep 2016 14:42:03 UTC \t \n\n' "$ns"
    printf '  Rules for collecting %s:\n\n' "$ns"
    printf '     NAME \t\t TYPE \t\t DEFAULT \t REQUIRED \t MINIMUM \t MAXIMUM\n'
    printf '     proc_path \t string \t /proc \t\t false\n\n'
    ;;
"task create")
    n=$(ls "$STATE/tasks" | wc -l | tr -d ' ')
    id="00000000-0000-4000-8000-00000000000$((n + 1))"
    hits=7
    if [ -e "$STATE/no_hits" ]; then hits=0; fi
    echo "Running $hits" > "$STATE/tasks/$id"
    echo "Using task manifest to create task"
    echo "Task created"
    echo "ID: $id"
    echo "Name: Task-$id"
    echo "State: Running"
    ;;
"task list")
    if [ -z "$(ls "$STATE/tasks")" ]; then
        echo "No task found. Have you created a task?"
        exit 0
    fi
    fails=0
    if [ -e "$STATE/task_fails" ]; then fails=$(cat "$STATE/task_fails"); fi
    printf 'ID \t\t\t\t\t NAME \t\t\t\t\t\t STATE \t\t HIT \t MISS \t FAIL \t CREATED \t\t LAST FAILURE\n'
    for id in $(ls "$STATE/tasks"); do
        read -r state hits < "$STATE/tasks/$id"
        printf '%s \t Task-%s \t %s \t %s \t 0 \t %s \t 2:42PM 9-12-2016 \t\n' "$id" "$id" "$state" "$hits" "$fails"
    done
    ;;
"task stop")
    if [ ! -e "$STATE/tasks/$3" ] || [ -e "$STATE/refuse_stop" ]; then
        echo "Error stopping task:"
        echo "task not found" >&2
        exit 1
    fi
    read -r state hits < "$STATE/tasks/$3"
    echo "Stopped $hits" > "$STATE/tasks/$3"
    echo "Task stopped:"
    echo "ID: $3"
    ;;
*)
    echo "unknown command: $*" >&2
    exit 2
    ;;
esac
"#;

const TASK_MEM_JSON: &str = r#"{
    "version": 1,
    "schedule": {
        "type": "simple",
        "interval": "1s"
    },
    "workflow": {
        "collect": {
            "metrics": {
                "/intel/procfs/meminfo/*": {}
            },
            "publish": [
                {
                    "plugin_name": "mock-file",
                    "config": {
                        "file": "/tmp/snap_published_meminfo.log"
                    }
                }
            ]
        }
    }
}
"#;

fn snapd_script(daemon: FakeDaemon) -> String {
    let body = match daemon {
        FakeDaemon::Healthy => format!("{READY_LINE}\nexec sleep 600\n"),
        FakeDaemon::LogsErrors => format!(
            "{READY_LINE}\necho 'time=\"2016-09-12T14:42:02Z\" level=error msg=\"plugin crashed\" _module=control-runner'\nexec sleep 600\n"
        ),
        FakeDaemon::Crashes => "echo 'time=\"2016-09-12T14:42:01Z\" level=fatal msg=\"listen tcp :8181: bind: address already in use\"' >&2\nexit 1\n".to_string(),
        FakeDaemon::Hangs => "exec sleep 600\n".to_string(),
    };
    format!("{SNAPD_PREAMBLE}{body}")
}

fn write_executable(path: &Path, contents: &str) {
    std::fs::write(path, contents).expect("write fake binary");
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o755))
        .expect("make fake binary executable");
}

/// A temporary fake snap installation
pub struct FakeSnap {
    root: TempDir,
    /// Configuration pointing at the fake installation
    pub config: HarnessConfig,
}

impl FakeSnap {
    pub fn new(daemon: FakeDaemon) -> Self {
        let root = tempfile::tempdir().expect("create temp dir");
        let bin = root.path().join("bin");
        let plugins = root.path().join("plugins");
        let tasks = root.path().join("project/examples/tasks");
        for dir in [&bin, &plugins, &tasks, &root.path().join("state")] {
            std::fs::create_dir_all(dir).expect("create fake layout");
        }

        write_executable(&bin.join("snapd"), &snapd_script(daemon));
        write_executable(&bin.join("snapctl"), SNAPCTL);
        write_executable(&plugins.join("snap-plugin-collector-meminfo"), "#!/bin/sh\n");
        write_executable(&plugins.join("snap-plugin-publisher-mock-file"), "#!/bin/sh\n");
        std::fs::write(tasks.join("task-mem.json"), TASK_MEM_JSON).expect("write task manifest");

        let mut config = HarnessConfig::default();
        config.snap_dir = bin;
        config.plugins_dir = plugins;
        config.project_dir = root.path().join("project");
        config.snapd.startup_timeout = Duration::from_secs(5);
        config.scenario.command_timeout = Duration::from_secs(5);
        config.scenario.task_settle_timeout = Duration::from_secs(1);

        Self { root, config }
    }

    pub fn root(&self) -> &Path {
        self.root.path()
    }

    pub fn state(&self) -> PathBuf {
        self.root.path().join("state")
    }

    /// Drop a marker file into the fake snapctl state: `no_hits`, `task_fails`
    /// (holding the count), `refuse_load`, `refuse_unload` or `refuse_stop`
    pub fn inject(&self, marker: &str, contents: &str) {
        std::fs::write(self.state().join(marker), contents).expect("write marker");
    }

    /// Write the configuration as TOML for the `snap-large` binary
    pub fn write_config(&self) -> PathBuf {
        let path = self.root.path().join("snap-harness.toml");
        let rendered = toml::to_string_pretty(&self.config).expect("render config");
        std::fs::write(&path, rendered).expect("write config");
        path
    }

    /// Arguments the fake snapd was launched with
    pub fn snapd_args(&self) -> String {
        std::fs::read_to_string(self.state().join("snapd.args"))
            .unwrap_or_default()
            .trim()
            .to_string()
    }
}

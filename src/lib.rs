//! # snap harness
//!
//! Large-test harness for snap telemetry plugins. It downloads `snapd`, `snapctl` and
//! the plugins under test, starts the daemon, drives plugin and task lifecycles through
//! the control CLI, and checks what comes back.
//!
//! ## Crate Structure
//!
//! - **`bins`**: binary descriptors plus the `Snapd` supervisor and `Snapctl` client.
//! - **`config`**: layered configuration (defaults, TOML, environment) via figment.
//! - **`download`**: fetching binaries from the build server.
//! - **`error`**: the `HarnessError` enum shared by every module.
//! - **`logging`**: tracing subscriber setup.
//! - **`manifest`**: task manifest preflight.
//! - **`output`**: parsers for `snapctl` tables and confirmations.
//! - **`scenario`**: the meminfo collector large test.

pub mod bins;
pub mod config;
pub mod download;
pub mod error;
pub mod logging;
pub mod manifest;
pub mod output;
pub mod scenario;

pub use bins::{Binary, BinarySet, Plugin, PluginType, Snapctl, Snapd, SnapdOptions};
pub use config::HarnessConfig;
pub use error::{HarnessError, HarnessResult};
pub use scenario::{LargeTest, ScenarioReport};

//! clawfleet-runtime — the container runtime collaborator.
//!
//! The core drives containers only through [`RuntimeAdapter`]. Each call
//! receives a typed [`LaunchSpec`] built from an instance record; the
//! adapter addresses one compose project per instance, named
//! deterministically from the instance name.
//!
//! # Architecture
//!
//! ```text
//! InstanceRecord ──▶ LaunchSpec ──▶ compose::render_instance ──▶ docker compose -f - up -d
//!                                   compose::render_fleet    ──▶ export file
//! ```

pub mod compose;
pub mod docker;
pub mod error;

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::{Path, PathBuf};

use clawfleet_core::{InstanceRecord, ResourceLimits};
use clawfleet_state::envfile;

pub use docker::DockerComposeAdapter;
pub use error::{RuntimeError, RuntimeResult};

/// Lines produced by one runtime action.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ActionOutput {
    pub lines: Vec<String>,
}

impl ActionOutput {
    pub fn from_bytes(stdout: &[u8], stderr: &[u8]) -> Self {
        let lines = String::from_utf8_lossy(stdout)
            .lines()
            .chain(String::from_utf8_lossy(stderr).lines())
            .map(str::trim_end)
            .filter(|l| !l.is_empty())
            .map(str::to_string)
            .collect();
        Self { lines }
    }
}

/// Everything the runtime needs to launch one instance.
#[derive(Clone, PartialEq)]
pub struct LaunchSpec {
    pub instance: String,
    pub project: String,
    pub image: String,
    pub gateway_port: u16,
    pub bridge_port: u16,
    pub config_dir: PathBuf,
    pub workspace_dir: PathBuf,
    /// Container environment: the record's `KEY=VALUE` pairs.
    pub environment: BTreeMap<String, String>,
    pub resources: ResourceLimits,
}

impl From<&InstanceRecord> for LaunchSpec {
    fn from(record: &InstanceRecord) -> Self {
        Self {
            instance: record.name.clone(),
            project: record.project_name(),
            image: record.image.clone(),
            gateway_port: record.gateway_port,
            bridge_port: record.bridge_port,
            config_dir: record.config_dir.clone(),
            workspace_dir: record.workspace_dir.clone(),
            environment: envfile::to_pairs(record)
                .into_iter()
                .map(|(k, v)| (k.to_string(), v))
                .collect(),
            resources: record.resources.clone(),
        }
    }
}

impl fmt::Debug for LaunchSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Environment values include the gateway token.
        f.debug_struct("LaunchSpec")
            .field("instance", &self.instance)
            .field("project", &self.project)
            .field("image", &self.image)
            .field("gateway_port", &self.gateway_port)
            .field("bridge_port", &self.bridge_port)
            .field("environment", &self.environment.keys().collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}

/// The container runtime as seen by the core.
///
/// Implementations must be idempotent: `up` on a running unit and `down`
/// on a stopped one both succeed. Calls block until the action finishes;
/// the executor runs them on blocking worker threads.
pub trait RuntimeAdapter: Send + Sync {
    /// Verify the runtime tooling is installed and reachable.
    fn check(&self) -> RuntimeResult<()>;

    /// Ensure the instance's unit is running.
    fn up(&self, launch: &LaunchSpec) -> RuntimeResult<ActionOutput>;

    /// Ensure the instance's unit is stopped.
    fn down(&self, launch: &LaunchSpec) -> RuntimeResult<ActionOutput>;

    /// Whether the unit for `instance` is currently running.
    fn is_running(&self, instance: &str) -> RuntimeResult<bool>;

    /// Host ports currently published by any container.
    fn published_ports(&self) -> RuntimeResult<BTreeSet<u16>>;

    fn image_exists(&self, image: &str) -> RuntimeResult<bool>;

    fn build(&self, image: &str, context: &Path) -> RuntimeResult<ActionOutput>;

    /// Stream the unit's logs to the terminal.
    fn logs(&self, instance: &str, follow: bool, tail: Option<u32>) -> RuntimeResult<()>;
}

pub mod instance;
pub mod lifecycle;
pub mod provision;
pub mod setup;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context as _;
use clawfleet_core::FleetDefaults;
use clawfleet_runtime::{DockerComposeAdapter, RuntimeAdapter};
use clawfleet_scheduler::{BoundedExecutor, HostPortProbe, LineSink, Provisioner};
use clawfleet_state::RecordStore;

/// Resolved global options shared by every command.
pub struct Context {
    pub home: PathBuf,
    pub image: String,
    pub docker: String,
}

impl Context {
    pub fn new(home: Option<PathBuf>, image: String, docker: String) -> anyhow::Result<Self> {
        let home = match home {
            Some(home) => home,
            None => std::env::var_os("HOME")
                .map(|h| PathBuf::from(h).join(".clawfleet"))
                .context("HOME is not set; pass --home or set CLAWFLEET_HOME")?,
        };
        Ok(Self {
            home,
            image,
            docker,
        })
    }

    pub fn store(&self) -> anyhow::Result<RecordStore> {
        let dir = self.home.join("instances");
        RecordStore::open(&dir).with_context(|| format!("opening record store {}", dir.display()))
    }

    pub fn defaults(&self) -> FleetDefaults {
        FleetDefaults::under_home(&self.home, &self.image)
    }

    pub fn fleet_file(&self) -> PathBuf {
        self.home.join("fleet.toml")
    }

    pub fn export_file(&self) -> PathBuf {
        self.home.join("compose.yml")
    }

    /// The docker adapter, after verifying docker and compose respond.
    pub fn runtime(&self) -> anyhow::Result<Arc<dyn RuntimeAdapter>> {
        let runtime = DockerComposeAdapter::new(&self.docker);
        runtime.check().context("runtime dependency check failed")?;
        Ok(Arc::new(runtime))
    }

    pub fn provisioner(&self, runtime: Arc<dyn RuntimeAdapter>) -> anyhow::Result<Provisioner> {
        Ok(Provisioner::new(self.store()?, runtime, Arc::new(HostPortProbe)))
    }

    /// Executor printing each action line as `[name] line`.
    pub fn executor(&self, parallel: usize) -> anyhow::Result<BoundedExecutor> {
        let sink: LineSink = Arc::new(|name: &str, line: &str| println!("[{name}] {line}"));
        Ok(BoundedExecutor::new(parallel)?.with_sink(sink))
    }
}


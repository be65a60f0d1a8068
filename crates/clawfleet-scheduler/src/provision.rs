//! Provisioner — turns definitions into persisted instance records.
//!
//! Bulk provisioning is a plan then an apply:
//!
//! 1. **Plan**: definitions whose name already has a record are marked
//!    `Exists` and left alone. Every other definition gets its ports from
//!    one `PortAllocator` and a fresh token. Any conflict aborts here,
//!    before a single record is written.
//! 2. **Apply**: each planned record is persisted in order.
//!
//! Both steps run under the store's creation lock, so the port scan and
//! the writes are one critical section with respect to other creators.

use std::sync::Arc;

use clawfleet_core::{
    FleetDefaults, GatewayToken, InstanceDefinition, InstanceRecord, PortRequest, ResourceLimits,
    validate_name,
};
use clawfleet_runtime::RuntimeAdapter;
use clawfleet_state::{RecordStore, StateError};
use tracing::{debug, info};

use crate::allocator::{PortAllocator, PortProbe};
use crate::error::{SchedulerError, SchedulerResult};

/// What provisioning will do (or did) for one definition.
#[derive(Debug, Clone, PartialEq)]
pub enum PlanAction {
    /// A new record with these ports and token.
    Create(InstanceRecord),
    /// A record with this name already exists and is kept as is.
    Exists(InstanceRecord),
}

#[derive(Debug, Clone, PartialEq)]
pub struct PlanEntry {
    pub name: String,
    pub action: PlanAction,
}

impl PlanEntry {
    pub fn record(&self) -> &InstanceRecord {
        match &self.action {
            PlanAction::Create(r) | PlanAction::Exists(r) => r,
        }
    }

    pub fn is_new(&self) -> bool {
        matches!(self.action, PlanAction::Create(_))
    }
}

/// Ordered plan, one entry per definition.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProvisionPlan {
    pub entries: Vec<PlanEntry>,
}

impl ProvisionPlan {
    pub fn created(&self) -> impl Iterator<Item = &InstanceRecord> {
        self.entries.iter().filter(|e| e.is_new()).map(PlanEntry::record)
    }

    pub fn existing(&self) -> impl Iterator<Item = &InstanceRecord> {
        self.entries.iter().filter(|e| !e.is_new()).map(PlanEntry::record)
    }
}

/// Parameters for creating one instance by hand.
#[derive(Debug, Clone)]
pub struct CreateRequest {
    pub name: String,
    pub gateway_port: Option<u16>,
    pub bridge_port: Option<u16>,
    pub image: Option<String>,
    pub resources: ResourceLimits,
}

impl CreateRequest {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            gateway_port: None,
            bridge_port: None,
            image: None,
            resources: ResourceLimits::default(),
        }
    }
}

/// Creates instance records against a store, using the runtime's view of
/// published ports and a host probe for occupancy.
pub struct Provisioner {
    store: RecordStore,
    runtime: Arc<dyn RuntimeAdapter>,
    probe: Arc<dyn PortProbe>,
}

impl Provisioner {
    pub fn new(store: RecordStore, runtime: Arc<dyn RuntimeAdapter>, probe: Arc<dyn PortProbe>) -> Self {
        Self {
            store,
            runtime,
            probe,
        }
    }

    pub fn store(&self) -> &RecordStore {
        &self.store
    }

    /// A fresh allocator seeded from current occupancy.
    pub fn allocator(&self) -> SchedulerResult<PortAllocator> {
        PortAllocator::scan(&self.store, self.runtime.as_ref(), Arc::clone(&self.probe))
    }

    /// Plan without persisting anything.
    pub fn plan(&self, definitions: &[InstanceDefinition]) -> SchedulerResult<ProvisionPlan> {
        let mut allocator = self.allocator()?;
        let existing = self.store.names()?;
        let mut entries = Vec::with_capacity(definitions.len());

        for def in definitions {
            if existing.iter().any(|n| n == &def.name) {
                let record = self.store.load(&def.name)?;
                debug!(instance = %def.name, "record exists, skipping");
                entries.push(PlanEntry {
                    name: def.name.clone(),
                    action: PlanAction::Exists(record),
                });
                continue;
            }
            if let Some(other) = existing.iter().find(|n| n.eq_ignore_ascii_case(&def.name)) {
                return Err(StateError::NameConflict {
                    name: def.name.clone(),
                    existing: other.clone(),
                }
                .into());
            }

            let gateway_port = allocator.claim(def.gateway, &def.name)?;
            let bridge_port = allocator.claim(def.bridge, &def.name)?;
            entries.push(PlanEntry {
                name: def.name.clone(),
                action: PlanAction::Create(InstanceRecord {
                    name: def.name.clone(),
                    gateway_port,
                    bridge_port,
                    config_dir: def.config_dir.clone(),
                    workspace_dir: def.workspace_dir.clone(),
                    token: GatewayToken::generate(),
                    image: def.image.clone(),
                    resources: def.resources.clone(),
                }),
            });
        }
        Ok(ProvisionPlan { entries })
    }

    /// Plan and persist under the creation lock.
    ///
    /// Re-running with the same definitions creates nothing new.
    pub fn provision(&self, definitions: &[InstanceDefinition]) -> SchedulerResult<ProvisionPlan> {
        self.store.with_creation_lock(|| {
            let plan = self.plan(definitions)?;
            for record in plan.created() {
                self.store.create(record)?;
            }
            info!(
                created = plan.created().count(),
                existing = plan.existing().count(),
                "fleet provisioned"
            );
            Ok(plan)
        })
    }

    /// Create one instance. Unspecified ports are found automatically:
    /// an adjacent pair from the default gateway base when neither is
    /// given, otherwise a single search for the missing one.
    pub fn create(&self, request: CreateRequest, defaults: &FleetDefaults) -> SchedulerResult<InstanceRecord> {
        validate_name(&request.name)?;
        let resources = defaults.resources.overlay(&request.resources);
        resources.validate()?;

        self.store.with_creation_lock(|| {
            if self.store.exists(&request.name) {
                return Err(SchedulerError::State(StateError::AlreadyExists(
                    request.name.clone(),
                )));
            }
            let mut allocator = self.allocator()?;
            let name = request.name.as_str();
            let (gateway_port, bridge_port) = match (request.gateway_port, request.bridge_port) {
                (None, None) => allocator.claim_pair(defaults.gateway_port_start)?,
                (Some(g), None) => {
                    let g = allocator.claim(PortRequest::Fixed(g), name)?;
                    (g, allocator.claim(PortRequest::Preferred(g.saturating_add(1)), name)?)
                }
                (None, Some(b)) => {
                    let b = allocator.claim(PortRequest::Fixed(b), name)?;
                    (allocator.claim(PortRequest::Preferred(defaults.gateway_port_start), name)?, b)
                }
                (Some(g), Some(b)) => (
                    allocator.claim(PortRequest::Fixed(g), name)?,
                    allocator.claim(PortRequest::Fixed(b), name)?,
                ),
            };

            let record = InstanceRecord {
                name: request.name.clone(),
                gateway_port,
                bridge_port,
                config_dir: defaults.config_dir(name),
                workspace_dir: defaults.workspace_dir(name),
                token: GatewayToken::generate(),
                image: request.image.clone().unwrap_or_else(|| defaults.image.clone()),
                resources,
            };
            self.store.create(&record)?;
            Ok(record)
        })
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;
    use std::path::Path;

    use clawfleet_core::{FleetSpec, Rule, expand};
    use clawfleet_runtime::{ActionOutput, LaunchSpec, RuntimeResult};
    use tempfile::TempDir;

    use super::*;
    use crate::allocator::tests::FakeProbe;

    /// Runtime that only reports a fixed set of published ports.
    struct PortsOnly(BTreeSet<u16>);

    impl RuntimeAdapter for PortsOnly {
        fn check(&self) -> RuntimeResult<()> {
            Ok(())
        }
        fn up(&self, _: &LaunchSpec) -> RuntimeResult<ActionOutput> {
            Ok(ActionOutput::default())
        }
        fn down(&self, _: &LaunchSpec) -> RuntimeResult<ActionOutput> {
            Ok(ActionOutput::default())
        }
        fn is_running(&self, _: &str) -> RuntimeResult<bool> {
            Ok(false)
        }
        fn published_ports(&self) -> RuntimeResult<BTreeSet<u16>> {
            Ok(self.0.clone())
        }
        fn image_exists(&self, _: &str) -> RuntimeResult<bool> {
            Ok(true)
        }
        fn build(&self, _: &str, _: &Path) -> RuntimeResult<ActionOutput> {
            Ok(ActionOutput::default())
        }
        fn logs(&self, _: &str, _: bool, _: Option<u32>) -> RuntimeResult<()> {
            Ok(())
        }
    }

    fn setup(published: &[u16], occupied: &[u16]) -> (TempDir, Provisioner, FleetDefaults) {
        let tmp = TempDir::new().unwrap();
        let store = RecordStore::open(tmp.path().join("instances")).unwrap();
        let provisioner = Provisioner::new(
            store,
            Arc::new(PortsOnly(published.iter().copied().collect())),
            Arc::new(FakeProbe(occupied.iter().copied().collect())),
        );
        let defaults = FleetDefaults::under_home(tmp.path(), "clawdbot:local");
        (tmp, provisioner, defaults)
    }

    #[test]
    fn create_without_ports_takes_first_free_pair() {
        let (_tmp, prov, defaults) = setup(&[18789], &[]);
        let record = prov.create(CreateRequest::named("admin"), &defaults).unwrap();
        assert_eq!((record.gateway_port, record.bridge_port), (18790, 18791));
        assert_eq!(record.token.expose().len(), GatewayToken::BYTES * 2);
        assert!(prov.store().exists("admin"));
        assert!(record.config_dir.is_dir());
    }

    #[test]
    fn create_with_one_port_searches_for_the_other() {
        let (_tmp, prov, defaults) = setup(&[], &[20001]);
        let mut req = CreateRequest::named("solo");
        req.gateway_port = Some(20000);
        let record = prov.create(req, &defaults).unwrap();
        assert_eq!((record.gateway_port, record.bridge_port), (20000, 20002));
    }

    #[test]
    fn create_with_taken_fixed_port_fails_without_writing() {
        let (_tmp, prov, defaults) = setup(&[30000], &[]);
        let mut req = CreateRequest::named("clash");
        req.gateway_port = Some(30000);
        req.bridge_port = Some(30001);
        let err = prov.create(req, &defaults).unwrap_err();
        assert!(matches!(err, SchedulerError::PortConflict { port: 30000, .. }));
        assert!(!prov.store().exists("clash"));
    }

    #[test]
    fn create_existing_name_fails() {
        let (_tmp, prov, defaults) = setup(&[], &[]);
        prov.create(CreateRequest::named("admin"), &defaults).unwrap();
        let err = prov.create(CreateRequest::named("admin"), &defaults).unwrap_err();
        assert!(matches!(err, SchedulerError::State(StateError::AlreadyExists(_))));
        let err = prov.create(CreateRequest::named("ADMIN"), &defaults).unwrap_err();
        assert!(matches!(err, SchedulerError::State(StateError::NameConflict { .. })));
    }

    #[test]
    fn invalid_name_is_rejected_before_allocation() {
        let (_tmp, prov, defaults) = setup(&[], &[]);
        assert!(matches!(
            prov.create(CreateRequest::named("bad name"), &defaults),
            Err(SchedulerError::Config(_))
        ));
    }

    #[test]
    fn provision_is_idempotent() {
        let (_tmp, prov, defaults) = setup(&[], &[]);
        let spec = FleetSpec::range("bot", 1, 3, Some(20000), Some(21000)).unwrap();
        let defs = expand(&spec, &defaults).unwrap();

        let first = prov.provision(&defs).unwrap();
        assert_eq!(first.created().count(), 3);

        let second = prov.provision(&defs).unwrap();
        assert_eq!(second.created().count(), 0);
        assert_eq!(second.existing().count(), 3);
        let ports: Vec<_> = second.existing().map(|r| r.gateway_port).collect();
        assert_eq!(ports, [20000, 20001, 20002]);
    }

    #[test]
    fn plan_does_not_write() {
        let (_tmp, prov, defaults) = setup(&[], &[]);
        let spec = FleetSpec::range("bot", 1, 2, Some(20000), Some(21000)).unwrap();
        let plan = prov.plan(&expand(&spec, &defaults).unwrap()).unwrap();
        assert_eq!(plan.created().count(), 2);
        assert!(prov.store().names().unwrap().is_empty());
    }

    #[test]
    fn fixed_conflict_aborts_whole_plan() {
        let (_tmp, prov, defaults) = setup(&[18789], &[]);
        let single = |name: &str, gateway_port, bridge_port| Rule::Single {
            name: name.to_string(),
            gateway_port,
            bridge_port,
            image: None,
            resources: ResourceLimits::default(),
        };
        let spec = FleetSpec {
            defaults: Default::default(),
            rules: vec![single("first", None, None), single("admin", Some(18789), Some(18800))],
        };
        let defs = expand(&spec, &defaults).unwrap();
        assert!(matches!(
            prov.provision(&defs),
            Err(SchedulerError::PortConflict { port: 18789, .. })
        ));
        assert!(prov.store().names().unwrap().is_empty());
    }
}

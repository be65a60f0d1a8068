//! End-to-end fleet tests against an instrumented in-memory runtime.
//!
//! Covers provisioning from a fleet spec through the record store and
//! bulk start/stop/status through the bounded executor.

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use clawfleet_core::{FleetDefaults, FleetSpec, NameTemplate, PortBases, ResourceLimits, Rule, expand};
use clawfleet_runtime::{ActionOutput, LaunchSpec, RuntimeAdapter, RuntimeError, RuntimeResult};
use clawfleet_scheduler::operations::{start_all, status_all, stop_all};
use clawfleet_scheduler::{BoundedExecutor, CreateRequest, PortProbe, Provisioner, SchedulerError};
use clawfleet_state::{RecordStore, StateError};
use tempfile::TempDir;

// ── Test doubles ──────────────────────────────────────────────────

/// Runtime that tracks running projects and concurrent calls.
#[derive(Default)]
struct MockRuntime {
    published: BTreeSet<u16>,
    failing: HashSet<String>,
    running: Mutex<BTreeSet<String>>,
    active: AtomicUsize,
    peak: AtomicUsize,
    calls: AtomicUsize,
    delay: Duration,
}

impl MockRuntime {
    fn enter(&self) {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        std::thread::sleep(self.delay);
    }

    fn leave(&self) {
        self.active.fetch_sub(1, Ordering::SeqCst);
    }

    fn act(&self, launch: &LaunchSpec, running: bool) -> RuntimeResult<ActionOutput> {
        self.enter();
        let result = if self.failing.contains(&launch.instance) {
            Err(RuntimeError::CommandFailed {
                command: format!("compose -p {}", launch.project),
                code: Some(1),
                output: vec!["port is already allocated".to_string()],
            })
        } else {
            let mut set = self.running.lock().unwrap();
            if running {
                set.insert(launch.instance.clone());
            } else {
                set.remove(&launch.instance);
            }
            Ok(ActionOutput {
                lines: vec![format!("Container {} Started", launch.project)],
            })
        };
        self.leave();
        result
    }
}

impl RuntimeAdapter for MockRuntime {
    fn check(&self) -> RuntimeResult<()> {
        Ok(())
    }

    fn up(&self, launch: &LaunchSpec) -> RuntimeResult<ActionOutput> {
        self.act(launch, true)
    }

    fn down(&self, launch: &LaunchSpec) -> RuntimeResult<ActionOutput> {
        self.act(launch, false)
    }

    fn is_running(&self, instance: &str) -> RuntimeResult<bool> {
        if self.failing.contains(instance) {
            return Err(RuntimeError::MissingDependency("daemon went away".to_string()));
        }
        Ok(self.running.lock().unwrap().contains(instance))
    }

    fn published_ports(&self) -> RuntimeResult<BTreeSet<u16>> {
        Ok(self.published.clone())
    }

    fn image_exists(&self, _image: &str) -> RuntimeResult<bool> {
        Ok(true)
    }

    fn build(&self, _image: &str, _context: &Path) -> RuntimeResult<ActionOutput> {
        Ok(ActionOutput::default())
    }

    fn logs(&self, _instance: &str, _follow: bool, _tail: Option<u32>) -> RuntimeResult<()> {
        Ok(())
    }
}

/// Host probe that reports a fixed set of ports as bound.
struct Occupied(BTreeSet<u16>);

impl PortProbe for Occupied {
    fn is_free(&self, port: u16) -> bool {
        !self.0.contains(&port)
    }
}

struct Fleet {
    _home: TempDir,
    runtime: Arc<MockRuntime>,
    provisioner: Provisioner,
    defaults: FleetDefaults,
}

fn fleet(runtime: MockRuntime, occupied: &[u16]) -> Fleet {
    let home = TempDir::new().unwrap();
    let store = RecordStore::open(home.path().join("instances")).unwrap();
    let runtime = Arc::new(runtime);
    let provisioner = Provisioner::new(
        store,
        runtime.clone(),
        Arc::new(Occupied(occupied.iter().copied().collect())),
    );
    let defaults = FleetDefaults::under_home(home.path(), "clawdbot:local");
    Fleet {
        _home: home,
        runtime,
        provisioner,
        defaults,
    }
}

fn admin_and_users() -> FleetSpec {
    FleetSpec {
        defaults: Default::default(),
        rules: vec![
            Rule::Single {
                name: "admin".to_string(),
                gateway_port: Some(18789),
                bridge_port: Some(18790),
                image: None,
                resources: ResourceLimits::default(),
            },
            Rule::Range {
                template: NameTemplate::parse("user-{n:03}").unwrap(),
                start: 1,
                end: 3,
                bases: PortBases {
                    gateway: Some(19000),
                    bridge: Some(29000),
                },
                image: None,
                resources: ResourceLimits::default(),
                overrides: BTreeMap::new(),
            },
        ],
    }
}

fn assert_ports_unique(records: &[clawfleet_core::InstanceRecord], occupied: &[u16]) {
    let mut seen = BTreeSet::new();
    for r in records {
        for port in r.ports() {
            assert!(seen.insert(port), "port {port} assigned twice");
            assert!(!occupied.contains(&port), "port {port} was occupied");
        }
    }
}

// ── Provisioning ──────────────────────────────────────────────────

#[test]
fn admin_and_user_range_provision_in_order() {
    let f = fleet(MockRuntime::default(), &[]);
    let defs = expand(&admin_and_users(), &f.defaults).unwrap();
    let plan = f.provisioner.provision(&defs).unwrap();

    let got: Vec<_> = plan
        .created()
        .map(|r| (r.name.as_str(), r.gateway_port))
        .collect();
    assert_eq!(
        got,
        [("admin", 18789), ("user-001", 19000), ("user-002", 19001), ("user-003", 19002)]
    );
    assert_eq!(f.provisioner.store().list().unwrap().len(), 4);
}

#[test]
fn create_range_bot_scenario() {
    let f = fleet(MockRuntime::default(), &[]);
    let spec = FleetSpec::range("bot", 1, 5, Some(20000), Some(21000)).unwrap();
    f.provisioner.provision(&expand(&spec, &f.defaults).unwrap()).unwrap();

    let records = f.provisioner.store().list().unwrap();
    let got: Vec<_> = records
        .iter()
        .map(|r| (r.name.as_str(), r.gateway_port, r.bridge_port))
        .collect();
    assert_eq!(
        got,
        [
            ("bot-1", 20000, 21000),
            ("bot-2", 20001, 21001),
            ("bot-3", 20002, 21002),
            ("bot-4", 20003, 21003),
            ("bot-5", 20004, 21004),
        ]
    );
}

#[test]
fn provisioned_ports_avoid_every_occupied_source() {
    let occupied = [20001, 21003];
    let runtime = MockRuntime {
        published: [20002, 20003].into_iter().collect(),
        ..Default::default()
    };
    let f = fleet(runtime, &occupied);
    let spec = FleetSpec::range("bot", 1, 6, Some(20000), Some(21000)).unwrap();
    f.provisioner.provision(&expand(&spec, &f.defaults).unwrap()).unwrap();

    let records = f.provisioner.store().list().unwrap();
    assert_eq!(records.len(), 6);
    assert_ports_unique(&records, &[20001, 20002, 20003, 21003]);
}

#[test]
fn planning_is_deterministic() {
    let f = fleet(MockRuntime::default(), &[19001]);
    let defs = expand(&admin_and_users(), &f.defaults).unwrap();
    let ports = |plan: clawfleet_scheduler::ProvisionPlan| -> Vec<(String, u16, u16)> {
        plan.created()
            .map(|r| (r.name.clone(), r.gateway_port, r.bridge_port))
            .collect()
    };
    let first = ports(f.provisioner.plan(&defs).unwrap());
    let second = ports(f.provisioner.plan(&defs).unwrap());
    assert_eq!(first, second);
    assert_eq!(first[2], ("user-002".to_string(), 19002, 29001));
}

#[test]
fn repeated_single_creates_get_adjacent_distinct_pairs() {
    let f = fleet(MockRuntime::default(), &[18790]);
    let mut records = Vec::new();
    for name in ["a", "b", "c"] {
        records.push(f.provisioner.create(CreateRequest::named(name), &f.defaults).unwrap());
    }
    for r in &records {
        assert_eq!(r.bridge_port, r.gateway_port + 1);
    }
    assert_ports_unique(&records, &[18790]);
    assert_eq!(records[0].gateway_port, 18791);
}

#[test]
fn duplicate_create_leaves_existing_record_alone() {
    let f = fleet(MockRuntime::default(), &[]);
    let original = f.provisioner.create(CreateRequest::named("admin"), &f.defaults).unwrap();

    let mut again = CreateRequest::named("admin");
    again.gateway_port = Some(25000);
    let err = f.provisioner.create(again, &f.defaults).unwrap_err();
    assert!(matches!(err, SchedulerError::State(StateError::AlreadyExists(_))));

    let stored = f.provisioner.store().load("admin").unwrap();
    assert_eq!(stored, original);
    assert_eq!(
        f.provisioner.store().used_ports().unwrap(),
        original.ports().into_iter().collect::<BTreeSet<u16>>()
    );
}

#[test]
fn duplicate_names_in_spec_abort_before_persisting() {
    let f = fleet(MockRuntime::default(), &[]);
    let mut spec = admin_and_users();
    spec.rules.push(Rule::List {
        names: vec!["user-002".to_string()],
        bases: PortBases::default(),
        image: None,
        resources: ResourceLimits::default(),
        overrides: BTreeMap::new(),
    });
    assert!(expand(&spec, &f.defaults).is_err());
    assert!(f.provisioner.store().names().unwrap().is_empty());
}

#[test]
fn removal_is_idempotent() {
    let f = fleet(MockRuntime::default(), &[]);
    f.provisioner.create(CreateRequest::named("gone"), &f.defaults).unwrap();
    assert!(f.provisioner.store().delete("gone").unwrap());
    assert!(!f.provisioner.store().delete("gone").unwrap());
    assert!(!f.provisioner.store().delete("never-existed").unwrap());
}

// ── Bulk operations ───────────────────────────────────────────────

#[tokio::test]
async fn bulk_up_respects_concurrency_ceiling() {
    let runtime = MockRuntime {
        delay: Duration::from_millis(15),
        ..Default::default()
    };
    let f = fleet(runtime, &[]);
    let spec = FleetSpec::range("bot", 1, 10, Some(20000), Some(21000)).unwrap();
    f.provisioner.provision(&expand(&spec, &f.defaults).unwrap()).unwrap();
    let records = f.provisioner.store().list().unwrap();

    let executor = BoundedExecutor::new(3).unwrap();
    let report = start_all(&executor, f.runtime.clone(), records).await;

    assert_eq!(report.attempted(), 10);
    assert_eq!(report.succeeded(), 10);
    assert!(f.runtime.peak.load(Ordering::SeqCst) <= 3);
    assert_eq!(f.runtime.calls.load(Ordering::SeqCst), 10);
}

#[tokio::test]
async fn bulk_up_isolates_failures() {
    let runtime = MockRuntime {
        failing: ["bot-2", "bot-5"].iter().map(|s| s.to_string()).collect(),
        ..Default::default()
    };
    let f = fleet(runtime, &[]);
    let spec = FleetSpec::range("bot", 1, 6, Some(20000), Some(21000)).unwrap();
    f.provisioner.provision(&expand(&spec, &f.defaults).unwrap()).unwrap();
    let records = f.provisioner.store().list().unwrap();

    let lines = Arc::new(Mutex::new(Vec::new()));
    let sink_lines = lines.clone();
    let executor = BoundedExecutor::new(2)
        .unwrap()
        .with_sink(Arc::new(move |name: &str, line: &str| {
            sink_lines.lock().unwrap().push(format!("[{name}] {line}"));
        }));
    let report = start_all(&executor, f.runtime.clone(), records.clone()).await;

    assert_eq!(report.attempted(), 6);
    assert_eq!(report.succeeded(), 4);
    assert_eq!(report.failed(), 2);
    let failed: Vec<_> = report.failures().map(|(n, _)| n).collect();
    assert_eq!(failed, ["bot-2", "bot-5"]);
    assert!(
        lines
            .lock()
            .unwrap()
            .contains(&"[bot-2] port is already allocated".to_string())
    );

    let status = status_all(&executor, f.runtime.clone(), records.clone()).await;
    let running: Vec<_> = status
        .outcomes
        .iter()
        .filter(|o| o.result == Ok(true))
        .map(|o| o.name.as_str())
        .collect();
    assert_eq!(running, ["bot-1", "bot-3", "bot-4", "bot-6"]);
    assert_eq!(status.failed(), 2);

    let down = stop_all(&executor, f.runtime.clone(), records).await;
    assert_eq!(down.succeeded(), 4);
    assert!(f.runtime.running.lock().unwrap().is_empty());
}

#[tokio::test]
async fn bulk_up_is_idempotent_for_running_instances() {
    let f = fleet(MockRuntime::default(), &[]);
    f.provisioner.create(CreateRequest::named("solo"), &f.defaults).unwrap();
    let records = f.provisioner.store().list().unwrap();
    let executor = BoundedExecutor::new(1).unwrap();

    assert!(start_all(&executor, f.runtime.clone(), records.clone()).await.is_success());
    assert!(start_all(&executor, f.runtime.clone(), records).await.is_success());
    assert_eq!(f.runtime.running.lock().unwrap().len(), 1);
}

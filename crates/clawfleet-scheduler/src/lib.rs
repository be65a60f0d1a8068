//! clawfleet-scheduler — fleet orchestration.
//!
//! Ties the record store and the runtime adapter together:
//!
//! - [`PortAllocator`] owns the used-port set for one operation, built
//!   from a fresh scan of the store and the runtime, and probes the host
//!   before handing out a port.
//! - [`Provisioner`] plans and persists new records (single or bulk)
//!   under the store's creation lock.
//! - [`BoundedExecutor`] runs a per-instance action across many records
//!   with a concurrency ceiling, recording each outcome separately.
//! - [`operations`] wires runtime actions (up, down, liveness) into the
//!   executor.
//!
//! # Architecture
//!
//! ```text
//! FleetSpec ─expand─▶ [InstanceDefinition] ─Provisioner─▶ RecordStore
//!                                              │
//!                                        PortAllocator ◀── store ports + runtime ports + host probe
//!
//! RecordStore ─filter─▶ [InstanceRecord] ─BoundedExecutor─▶ RuntimeAdapter::{up,down,is_running}
//! ```

pub mod allocator;
pub mod error;
pub mod executor;
pub mod operations;
pub mod provision;

pub use allocator::{HostPortProbe, PortAllocator, PortProbe};
pub use error::{SchedulerError, SchedulerResult};
pub use executor::{BatchReport, BoundedExecutor, InstanceOutcome, LineSink, TaskOutput};
pub use provision::{CreateRequest, PlanAction, PlanEntry, ProvisionPlan, Provisioner};

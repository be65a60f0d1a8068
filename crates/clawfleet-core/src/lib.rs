//! clawfleet-core — shared types and fleet expansion.
//!
//! Holds the instance data model (`InstanceRecord`, `ResourceLimits`,
//! `GatewayToken`), the fleet specification document, the validated
//! name template used by pattern rules, and the expander that turns a
//! specification into an ordered list of `InstanceDefinition`s.
//!
//! Nothing here touches the filesystem beyond reading a spec file, and
//! nothing here knows about ports being in use. Port occupancy is
//! resolved later by the allocator in `clawfleet-scheduler`.

pub mod config;
pub mod error;
pub mod expand;
pub mod template;
pub mod types;

pub use config::{FleetConfig, FleetSpec, PortBases, Rule};
pub use error::{CoreError, CoreResult};
pub use expand::expand;
pub use template::NameTemplate;
pub use types::*;

//! Instance data model shared across clawfleet crates.
//!
//! An `InstanceRecord` is immutable once persisted: there is no update
//! path, only delete-and-recreate. `InstanceDefinition` is the pre-
//! allocation form produced by the expander, where ports are still
//! requests rather than assignments.

use std::fmt;
use std::path::PathBuf;

use rand::RngCore;
use serde::{Deserialize, Serialize};

use crate::error::{CoreError, CoreResult};

/// Image launched when neither the fleet spec nor the CLI names one.
pub const DEFAULT_IMAGE: &str = "clawdbot:local";

/// First gateway port tried when nothing else is configured.
pub const DEFAULT_GATEWAY_PORT: u16 = 18789;

/// First bridge port tried for derived (non-adjacent) bridge ports.
pub const DEFAULT_BRIDGE_PORT: u16 = 28789;

const MAX_NAME_LEN: usize = 64;

/// Check that `name` is usable as an instance name.
///
/// Names are ASCII letters, digits, `-` and `_`, start with a letter or
/// digit, and are at most 64 characters. They end up in file names and
/// compose project names, so nothing else is allowed.
pub fn validate_name(name: &str) -> CoreResult<()> {
    let invalid = |reason: &str| CoreError::InvalidName {
        name: name.to_string(),
        reason: reason.to_string(),
    };

    if name.is_empty() {
        return Err(invalid("name is empty"));
    }
    if name.len() > MAX_NAME_LEN {
        return Err(invalid("name is longer than 64 characters"));
    }
    if !name.starts_with(|c: char| c.is_ascii_alphanumeric()) {
        return Err(invalid("name must start with a letter or digit"));
    }
    if let Some(c) = name.chars().find(|c| !is_name_char(*c)) {
        return Err(invalid(&format!(
            "character {c:?} is not allowed (use letters, digits, '-' or '_')"
        )));
    }
    Ok(())
}

pub(crate) fn is_name_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '-' || c == '_'
}

// ── Resources ─────────────────────────────────────────────────────

/// Optional per-instance runtime limits.
///
/// Every field is optional; merging is per field, so an override that
/// only sets `memory` keeps the inherited `cpus`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ResourceLimits {
    /// Memory limit, docker syntax (`512m`, `2g`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory: Option<String>,
    /// Memory + swap limit, docker syntax.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory_swap: Option<String>,
    /// CPU share as a decimal (`0.5`, `2`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cpus: Option<String>,
    /// Maximum number of processes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pids_limit: Option<u32>,
}

impl ResourceLimits {
    /// Layer `other` on top of `self`: fields set in `other` win.
    pub fn overlay(&self, other: &ResourceLimits) -> ResourceLimits {
        ResourceLimits {
            memory: other.memory.clone().or_else(|| self.memory.clone()),
            memory_swap: other
                .memory_swap
                .clone()
                .or_else(|| self.memory_swap.clone()),
            cpus: other.cpus.clone().or_else(|| self.cpus.clone()),
            pids_limit: other.pids_limit.or(self.pids_limit),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.memory.is_none()
            && self.memory_swap.is_none()
            && self.cpus.is_none()
            && self.pids_limit.is_none()
    }

    /// Reject values docker would refuse at launch time.
    pub fn validate(&self) -> CoreResult<()> {
        if let Some(memory) = &self.memory {
            validate_byte_size("memory", memory)?;
        }
        if let Some(swap) = &self.memory_swap {
            // -1 means unlimited swap.
            if swap != "-1" {
                validate_byte_size("memory_swap", swap)?;
            }
        }
        if let Some(cpus) = &self.cpus {
            match cpus.parse::<f64>() {
                Ok(v) if v > 0.0 && v.is_finite() => {}
                _ => {
                    return Err(CoreError::InvalidResource {
                        field: "cpus",
                        value: cpus.clone(),
                        reason: "expected a positive decimal number".to_string(),
                    });
                }
            }
        }
        if self.pids_limit == Some(0) {
            return Err(CoreError::InvalidResource {
                field: "pids_limit",
                value: "0".to_string(),
                reason: "must be at least 1".to_string(),
            });
        }
        Ok(())
    }
}

fn validate_byte_size(field: &'static str, value: &str) -> CoreResult<()> {
    let digits = value.trim_end_matches(|c: char| "bkmgBKMG".contains(c));
    let unit_len = value.len() - digits.len();
    let ok = !digits.is_empty() && unit_len <= 1 && digits.chars().all(|c| c.is_ascii_digit());
    if ok {
        Ok(())
    } else {
        Err(CoreError::InvalidResource {
            field,
            value: value.to_string(),
            reason: "expected a number with an optional b/k/m/g unit".to_string(),
        })
    }
}

// ── Token ─────────────────────────────────────────────────────────

/// Per-instance gateway secret: 32 random bytes, hex encoded.
///
/// Generated once at creation and stored with the record. `Debug` and
/// `Display` never print the value.
#[derive(Clone, PartialEq, Eq)]
pub struct GatewayToken(String);

impl GatewayToken {
    /// Bytes of entropy in a freshly generated token.
    pub const BYTES: usize = 32;

    pub fn generate() -> Self {
        let mut buf = [0u8; Self::BYTES];
        rand::rngs::OsRng.fill_bytes(&mut buf);
        Self(hex::encode(buf))
    }

    /// Wrap a token loaded from storage.
    pub fn from_stored(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for GatewayToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("GatewayToken(<redacted>)")
    }
}

impl fmt::Display for GatewayToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("<redacted>")
    }
}

// ── Records ───────────────────────────────────────────────────────

/// The durable definition of one instance.
///
/// Serializes without the token so it can be printed as JSON safely.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InstanceRecord {
    pub name: String,
    pub gateway_port: u16,
    pub bridge_port: u16,
    pub config_dir: PathBuf,
    pub workspace_dir: PathBuf,
    #[serde(skip_serializing)]
    pub token: GatewayToken,
    pub image: String,
    #[serde(skip_serializing_if = "ResourceLimits::is_empty")]
    pub resources: ResourceLimits,
}

impl InstanceRecord {
    /// Compose project (and container) name for this instance.
    pub fn project_name(&self) -> String {
        project_name(&self.name)
    }

    pub fn ports(&self) -> [u16; 2] {
        [self.gateway_port, self.bridge_port]
    }
}

/// Deterministic runtime unit name for an instance name.
///
/// Compose project names must be lowercase; case-insensitive duplicates
/// are rejected at creation so this stays one-to-one.
pub fn project_name(instance: &str) -> String {
    format!("clawdbot-{}", instance.to_ascii_lowercase())
}

/// How a port should be obtained for a new instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PortRequest {
    /// Exactly this port; conflict is a configuration error.
    Fixed(u16),
    /// This port if free, otherwise the next free one above it.
    Preferred(u16),
}

impl PortRequest {
    pub fn port(self) -> u16 {
        match self {
            PortRequest::Fixed(p) | PortRequest::Preferred(p) => p,
        }
    }
}

/// A concrete instance produced by expansion, before port allocation.
#[derive(Debug, Clone, PartialEq)]
pub struct InstanceDefinition {
    pub name: String,
    pub gateway: PortRequest,
    pub bridge: PortRequest,
    pub config_dir: PathBuf,
    pub workspace_dir: PathBuf,
    pub image: String,
    pub resources: ResourceLimits,
}

/// Fleet-wide defaults after all configuration layers are resolved.
#[derive(Debug, Clone, PartialEq)]
pub struct FleetDefaults {
    pub image: String,
    pub config_root: PathBuf,
    pub workspace_root: PathBuf,
    pub gateway_port_start: u16,
    pub bridge_port_start: u16,
    pub resources: ResourceLimits,
}

impl FleetDefaults {
    /// Defaults rooted at a clawfleet home directory.
    pub fn under_home(home: &std::path::Path, image: &str) -> Self {
        Self {
            image: image.to_string(),
            config_root: home.join("config"),
            workspace_root: home.join("workspace"),
            gateway_port_start: DEFAULT_GATEWAY_PORT,
            bridge_port_start: DEFAULT_BRIDGE_PORT,
            resources: ResourceLimits::default(),
        }
    }

    pub fn config_dir(&self, name: &str) -> PathBuf {
        self.config_root.join(name)
    }

    pub fn workspace_dir(&self, name: &str) -> PathBuf {
        self.workspace_root.join(name)
    }
}

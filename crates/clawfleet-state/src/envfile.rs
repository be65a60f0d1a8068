//! `KEY=VALUE` record codec.
//!
//! The key set is a stable interface: the same pairs are injected into
//! the container environment, so renaming a key breaks running fleets.

use std::path::PathBuf;

use clawfleet_core::{GatewayToken, InstanceRecord, ResourceLimits, validate_name};

pub const INSTANCE: &str = "INSTANCE";
pub const GATEWAY_PORT: &str = "CLAWDBOT_GATEWAY_PORT";
pub const BRIDGE_PORT: &str = "CLAWDBOT_BRIDGE_PORT";
pub const CONFIG_DIR: &str = "CLAWDBOT_CONFIG_DIR";
pub const WORKSPACE_DIR: &str = "CLAWDBOT_WORKSPACE_DIR";
pub const GATEWAY_TOKEN: &str = "CLAWDBOT_GATEWAY_TOKEN";
pub const IMAGE: &str = "CLAWDBOT_IMAGE";
pub const MEMORY: &str = "CLAWDBOT_MEMORY";
pub const MEMORY_SWAP: &str = "CLAWDBOT_MEMORY_SWAP";
pub const CPUS: &str = "CLAWDBOT_CPUS";
pub const PIDS_LIMIT: &str = "CLAWDBOT_PIDS_LIMIT";

const HEADER: &str = "# clawfleet instance record. Generated at creation; do not edit.";

/// Record fields as ordered `KEY=VALUE` pairs. Optional resource keys
/// are only present when set.
pub fn to_pairs(record: &InstanceRecord) -> Vec<(&'static str, String)> {
    let mut pairs = vec![
        (INSTANCE, record.name.clone()),
        (GATEWAY_PORT, record.gateway_port.to_string()),
        (BRIDGE_PORT, record.bridge_port.to_string()),
        (CONFIG_DIR, record.config_dir.display().to_string()),
        (WORKSPACE_DIR, record.workspace_dir.display().to_string()),
        (GATEWAY_TOKEN, record.token.expose().to_string()),
        (IMAGE, record.image.clone()),
    ];
    let limits = &record.resources;
    if let Some(memory) = &limits.memory {
        pairs.push((MEMORY, memory.clone()));
    }
    if let Some(swap) = &limits.memory_swap {
        pairs.push((MEMORY_SWAP, swap.clone()));
    }
    if let Some(cpus) = &limits.cpus {
        pairs.push((CPUS, cpus.clone()));
    }
    if let Some(pids) = limits.pids_limit {
        pairs.push((PIDS_LIMIT, pids.to_string()));
    }
    pairs
}

/// Render a record file.
pub fn encode(record: &InstanceRecord) -> Result<String, String> {
    let mut out = String::from(HEADER);
    out.push('\n');
    for (key, value) in to_pairs(record) {
        if value.contains(['\n', '\r']) {
            return Err(format!("value for {key} contains a line break"));
        }
        out.push_str(key);
        out.push('=');
        out.push_str(&value);
        out.push('\n');
    }
    Ok(out)
}

/// Parse a record file. Blank lines and `#` comments are ignored; values
/// may be wrapped in single or double quotes. Unknown keys are ignored.
pub fn decode(text: &str) -> Result<InstanceRecord, String> {
    let mut fields: Vec<(&str, &str)> = Vec::new();
    for (lineno, line) in text.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let line = line.strip_prefix("export ").unwrap_or(line);
        let (key, value) = line
            .split_once('=')
            .ok_or_else(|| format!("line {}: expected KEY=VALUE", lineno + 1))?;
        fields.push((key.trim(), unquote(value.trim())));
    }
    // Later assignments win, as with a shell env file.
    let get = |key: &str| {
        fields
            .iter()
            .rev()
            .find(|(k, _)| *k == key)
            .map(|(_, v)| *v)
    };
    let required = |key: &str| get(key).ok_or_else(|| format!("missing required key {key}"));
    let port = |key: &str| -> Result<u16, String> {
        let raw = required(key)?;
        match raw.parse::<u16>() {
            Ok(p) if p > 0 => Ok(p),
            _ => Err(format!("{key}={raw:?} is not a valid port")),
        }
    };

    let name = required(INSTANCE)?.to_string();
    validate_name(&name).map_err(|e| e.to_string())?;

    let token = required(GATEWAY_TOKEN)?;
    if token.is_empty() {
        return Err(format!("{GATEWAY_TOKEN} is empty"));
    }

    let pids_limit = match get(PIDS_LIMIT) {
        Some(raw) => Some(
            raw.parse::<u32>()
                .map_err(|_| format!("{PIDS_LIMIT}={raw:?} is not a number"))?,
        ),
        None => None,
    };

    Ok(InstanceRecord {
        gateway_port: port(GATEWAY_PORT)?,
        bridge_port: port(BRIDGE_PORT)?,
        config_dir: PathBuf::from(required(CONFIG_DIR)?),
        workspace_dir: PathBuf::from(required(WORKSPACE_DIR)?),
        token: GatewayToken::from_stored(token),
        image: required(IMAGE)?.to_string(),
        resources: ResourceLimits {
            memory: get(MEMORY).map(str::to_string),
            memory_swap: get(MEMORY_SWAP).map(str::to_string),
            cpus: get(CPUS).map(str::to_string),
            pids_limit,
        },
        name,
    })
}

fn unquote(value: &str) -> &str {
    for quote in ['"', '\''] {
        if value.len() >= 2 && value.starts_with(quote) && value.ends_with(quote) {
            return &value[1..value.len() - 1];
        }
    }
    value
}

//! Fleet expander — turns a `FleetSpec` into concrete instance definitions.
//!
//! Output order is rule order, then ascending order within a rule. That
//! order drives provisioning and therefore port assignment, so expanding
//! the same spec twice yields the same definitions.
//!
//! Port derivation per rule:
//!
//! ```text
//! gateway = gateway_base + offset      offset = 0, 1, 2, ... within the rule
//! bridge  = bridge_base  + offset
//! ```
//!
//! A rule without its own base continues one past the highest derived
//! port of the previous rule, starting at the fleet defaults. Fixed ports
//! on single-instance rules do not move the cursor.

use std::collections::{BTreeMap, HashMap};

use tracing::debug;

use crate::config::{FleetSpec, PortBases, Rule};
use crate::error::{CoreError, CoreResult};
use crate::types::{FleetDefaults, InstanceDefinition, PortRequest, ResourceLimits};

/// Expand `spec` over the CLI-level `base` defaults.
pub fn expand(spec: &FleetSpec, base: &FleetDefaults) -> CoreResult<Vec<InstanceDefinition>> {
    let defaults = spec.defaults.resolve(base);
    let mut out = Vec::new();
    // Lowercased name → 1-based rule index, for duplicate detection.
    let mut seen: HashMap<String, usize> = HashMap::new();
    let mut cursor = Cursor {
        gateway: u32::from(defaults.gateway_port_start),
        bridge: u32::from(defaults.bridge_port_start),
    };

    for (i, rule) in spec.rules.iter().enumerate() {
        let index = i + 1;
        match rule {
            Rule::Single {
                name,
                gateway_port,
                bridge_port,
                image,
                resources,
            } => {
                claim_name(&mut seen, name, index)?;
                let gateway = match gateway_port {
                    Some(port) => PortRequest::Fixed(*port),
                    None => PortRequest::Preferred(cursor.take_gateway(index, name)?),
                };
                let bridge = match bridge_port {
                    Some(port) => PortRequest::Fixed(*port),
                    None => PortRequest::Preferred(cursor.take_bridge(index, name)?),
                };
                out.push(definition(
                    &defaults,
                    name.clone(),
                    gateway,
                    bridge,
                    image.as_deref(),
                    &defaults.resources.overlay(resources),
                ));
            }
            Rule::List {
                names,
                bases,
                image,
                resources,
                overrides,
            } => {
                check_overrides(index, overrides, |n| names.iter().any(|x| x == n))?;
                let rule_limits = defaults.resources.overlay(resources);
                cursor.rebase(bases);
                for (offset, name) in names.iter().enumerate() {
                    claim_name(&mut seen, name, index)?;
                    let (gateway, bridge) = cursor.derive(index, name, offset as u32)?;
                    out.push(definition(
                        &defaults,
                        name.clone(),
                        gateway,
                        bridge,
                        image.as_deref(),
                        &instance_limits(&rule_limits, overrides, name),
                    ));
                }
                cursor.advance(names.len() as u32);
            }
            Rule::Range {
                template,
                start,
                end,
                bases,
                image,
                resources,
                overrides,
            } => {
                let rule_limits = defaults.resources.overlay(resources);
                cursor.rebase(bases);
                let mut produced = Vec::with_capacity((end - start) as usize + 1);
                for (offset, n) in (*start..=*end).enumerate() {
                    let name = template.render(n)?;
                    claim_name(&mut seen, &name, index)?;
                    let (gateway, bridge) = cursor.derive(index, &name, offset as u32)?;
                    out.push(definition(
                        &defaults,
                        name.clone(),
                        gateway,
                        bridge,
                        image.as_deref(),
                        &instance_limits(&rule_limits, overrides, &name),
                    ));
                    produced.push(name);
                }
                check_overrides(index, overrides, |n| produced.iter().any(|x| x == n))?;
                cursor.advance(end - start + 1);
                debug!(rule = index, %template, start, end, "range rule expanded");
            }
        }
    }

    debug!(count = out.len(), "fleet spec expanded");
    Ok(out)
}

/// Next-port cursors. Kept as `u32` so overflow past 65535 is detectable.
struct Cursor {
    gateway: u32,
    bridge: u32,
}

impl Cursor {
    fn rebase(&mut self, bases: &PortBases) {
        if let Some(gateway) = bases.gateway {
            self.gateway = u32::from(gateway);
        }
        if let Some(bridge) = bases.bridge {
            self.bridge = u32::from(bridge);
        }
    }

    fn derive(&self, index: usize, name: &str, offset: u32) -> CoreResult<(PortRequest, PortRequest)> {
        let gateway = to_port(self.gateway + offset, index, name)?;
        let bridge = to_port(self.bridge + offset, index, name)?;
        Ok((PortRequest::Preferred(gateway), PortRequest::Preferred(bridge)))
    }

    fn advance(&mut self, count: u32) {
        self.gateway += count;
        self.bridge += count;
    }

    fn take_gateway(&mut self, index: usize, name: &str) -> CoreResult<u16> {
        let port = to_port(self.gateway, index, name)?;
        self.gateway += 1;
        Ok(port)
    }

    fn take_bridge(&mut self, index: usize, name: &str) -> CoreResult<u16> {
        let port = to_port(self.bridge, index, name)?;
        self.bridge += 1;
        Ok(port)
    }
}

fn to_port(value: u32, index: usize, name: &str) -> CoreResult<u16> {
    u16::try_from(value).map_err(|_| CoreError::PortOverflow {
        index,
        name: name.to_string(),
    })
}

fn claim_name(seen: &mut HashMap<String, usize>, name: &str, index: usize) -> CoreResult<()> {
    if let Some(first) = seen.insert(name.to_ascii_lowercase(), index) {
        return Err(CoreError::DuplicateName {
            name: name.to_string(),
            first,
            second: index,
        });
    }
    Ok(())
}

fn check_overrides(
    index: usize,
    overrides: &BTreeMap<String, ResourceLimits>,
    produces: impl Fn(&str) -> bool,
) -> CoreResult<()> {
    match overrides.keys().find(|name| !produces(name.as_str())) {
        Some(name) => Err(CoreError::InvalidRule {
            index,
            reason: format!("override for {name:?} does not match any instance of this rule"),
        }),
        None => Ok(()),
    }
}

fn instance_limits(
    rule_limits: &ResourceLimits,
    overrides: &BTreeMap<String, ResourceLimits>,
    name: &str,
) -> ResourceLimits {
    match overrides.get(name) {
        Some(over) => rule_limits.overlay(over),
        None => rule_limits.clone(),
    }
}

fn definition(
    defaults: &FleetDefaults,
    name: String,
    gateway: PortRequest,
    bridge: PortRequest,
    image: Option<&str>,
    resources: &ResourceLimits,
) -> InstanceDefinition {
    InstanceDefinition {
        config_dir: defaults.config_dir(&name),
        workspace_dir: defaults.workspace_dir(&name),
        image: image.unwrap_or(&defaults.image).to_string(),
        resources: resources.clone(),
        gateway,
        bridge,
        name,
    }
}

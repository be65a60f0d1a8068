//! Fleet specification parser.
//!
//! The document has two sections: `[defaults]` and an ordered
//! `[[instances]]` list of rules. Each rule is exactly one of an explicit
//! `name`, a `names` list, or a `pattern` with a closed `start..=end`
//! range. TOML is the native format; `.yaml`/`.yml` and `.json` files
//! map onto the same model.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{CoreError, CoreResult};
use crate::template::NameTemplate;
use crate::types::{FleetDefaults, ResourceLimits, validate_name};

/// A single range can never need more ports than exist.
const MAX_RANGE: u32 = 65_536;

/// The raw fleet specification document.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FleetConfig {
    #[serde(default)]
    pub defaults: DefaultsConfig,
    #[serde(default)]
    pub instances: Vec<RuleConfig>,
}

/// `[defaults]` section. Unset fields inherit from the CLI-level defaults.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DefaultsConfig {
    pub image: Option<String>,
    pub config_root: Option<PathBuf>,
    pub workspace_root: Option<PathBuf>,
    pub gateway_port_start: Option<u16>,
    pub bridge_port_start: Option<u16>,
    #[serde(default)]
    pub resources: ResourceLimits,
}

/// One `[[instances]]` entry as written in the document.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RuleConfig {
    pub name: Option<String>,
    pub names: Option<Vec<String>>,
    pub pattern: Option<String>,
    pub start: Option<u32>,
    pub end: Option<u32>,
    pub gateway_port: Option<u16>,
    pub bridge_port: Option<u16>,
    pub gateway_port_start: Option<u16>,
    pub bridge_port_start: Option<u16>,
    pub image: Option<String>,
    #[serde(default)]
    pub resources: ResourceLimits,
    #[serde(default)]
    pub overrides: BTreeMap<String, ResourceLimits>,
}

/// A validated rule.
#[derive(Debug, Clone, PartialEq)]
pub enum Rule {
    Single {
        name: String,
        gateway_port: Option<u16>,
        bridge_port: Option<u16>,
        image: Option<String>,
        resources: ResourceLimits,
    },
    List {
        names: Vec<String>,
        bases: PortBases,
        image: Option<String>,
        resources: ResourceLimits,
        overrides: BTreeMap<String, ResourceLimits>,
    },
    Range {
        template: NameTemplate,
        start: u32,
        end: u32,
        bases: PortBases,
        image: Option<String>,
        resources: ResourceLimits,
        overrides: BTreeMap<String, ResourceLimits>,
    },
}

/// Rule-local starting ports. `None` continues from the previous rule.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PortBases {
    pub gateway: Option<u16>,
    pub bridge: Option<u16>,
}

/// A parsed and validated fleet specification.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FleetSpec {
    pub defaults: DefaultsSpec,
    pub rules: Vec<Rule>,
}

/// Validated `[defaults]`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DefaultsSpec {
    pub image: Option<String>,
    pub config_root: Option<PathBuf>,
    pub workspace_root: Option<PathBuf>,
    pub gateway_port_start: Option<u16>,
    pub bridge_port_start: Option<u16>,
    pub resources: ResourceLimits,
}

impl DefaultsSpec {
    /// Layer these defaults over `base`.
    pub fn resolve(&self, base: &FleetDefaults) -> FleetDefaults {
        FleetDefaults {
            image: self.image.clone().unwrap_or_else(|| base.image.clone()),
            config_root: self
                .config_root
                .clone()
                .unwrap_or_else(|| base.config_root.clone()),
            workspace_root: self
                .workspace_root
                .clone()
                .unwrap_or_else(|| base.workspace_root.clone()),
            gateway_port_start: self.gateway_port_start.unwrap_or(base.gateway_port_start),
            bridge_port_start: self.bridge_port_start.unwrap_or(base.bridge_port_start),
            resources: base.resources.overlay(&self.resources),
        }
    }
}

impl FleetConfig {
    /// Read a spec file, choosing the format by extension.
    pub fn from_file(path: &Path) -> CoreResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|source| CoreError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let parse_err = |reason: String| CoreError::Parse {
            path: path.to_path_buf(),
            reason,
        };
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or_default()
            .to_ascii_lowercase();
        let config = match ext.as_str() {
            "yaml" | "yml" => serde_yaml::from_str(&content).map_err(|e| parse_err(e.to_string()))?,
            "json" => serde_json::from_str(&content).map_err(|e| parse_err(e.to_string()))?,
            _ => toml::from_str(&content).map_err(|e| parse_err(e.to_string()))?,
        };
        Ok(config)
    }

    pub fn to_toml_string(&self) -> CoreResult<String> {
        toml::to_string_pretty(self).map_err(|e| CoreError::Serialize(e.to_string()))
    }

    /// A starter spec: one admin instance and a small numbered range.
    pub fn scaffold(image: &str) -> Self {
        FleetConfig {
            defaults: DefaultsConfig {
                image: Some(image.to_string()),
                gateway_port_start: Some(crate::types::DEFAULT_GATEWAY_PORT),
                bridge_port_start: Some(crate::types::DEFAULT_BRIDGE_PORT),
                resources: ResourceLimits {
                    memory: Some("2g".to_string()),
                    cpus: Some("1.0".to_string()),
                    ..Default::default()
                },
                ..Default::default()
            },
            instances: vec![
                RuleConfig {
                    name: Some("admin".to_string()),
                    ..Default::default()
                },
                RuleConfig {
                    pattern: Some("user-{n:03}".to_string()),
                    start: Some(1),
                    end: Some(3),
                    gateway_port_start: Some(19000),
                    bridge_port_start: Some(29000),
                    ..Default::default()
                },
            ],
        }
    }

    /// Validate every rule and produce a `FleetSpec`.
    pub fn into_spec(self) -> CoreResult<FleetSpec> {
        self.defaults.resources.validate()?;
        if let Some(image) = &self.defaults.image {
            validate_image(0, image)?;
        }
        let rules = self
            .instances
            .into_iter()
            .enumerate()
            .map(|(i, rule)| rule.into_rule(i + 1))
            .collect::<CoreResult<Vec<_>>>()?;

        Ok(FleetSpec {
            defaults: DefaultsSpec {
                image: self.defaults.image,
                config_root: self.defaults.config_root,
                workspace_root: self.defaults.workspace_root,
                gateway_port_start: self.defaults.gateway_port_start,
                bridge_port_start: self.defaults.bridge_port_start,
                resources: self.defaults.resources,
            },
            rules,
        })
    }
}

impl RuleConfig {
    fn into_rule(self, index: usize) -> CoreResult<Rule> {
        let invalid = |reason: &str| CoreError::InvalidRule {
            index,
            reason: reason.to_string(),
        };

        let kinds = [self.name.is_some(), self.names.is_some(), self.pattern.is_some()]
            .iter()
            .filter(|set| **set)
            .count();
        if kinds != 1 {
            return Err(invalid("set exactly one of `name`, `names` or `pattern`"));
        }
        if self.name.is_none() && (self.gateway_port.is_some() || self.bridge_port.is_some()) {
            return Err(invalid(
                "`gateway_port`/`bridge_port` are only valid with `name`; use `*_port_start` for lists and ranges",
            ));
        }
        if self.pattern.is_none() && (self.start.is_some() || self.end.is_some()) {
            return Err(invalid("`start`/`end` are only valid with `pattern`"));
        }
        if matches!(self.gateway_port, Some(0)) || matches!(self.bridge_port, Some(0)) {
            return Err(invalid("port 0 is not a valid fixed port"));
        }
        if matches!(self.gateway_port_start, Some(0)) || matches!(self.bridge_port_start, Some(0)) {
            return Err(invalid("port 0 is not a valid starting port"));
        }
        if self.gateway_port.is_some() && self.gateway_port == self.bridge_port {
            return Err(invalid("`gateway_port` and `bridge_port` must differ"));
        }
        if let Some(image) = &self.image {
            validate_image(index, image)?;
        }
        self.resources.validate()?;
        for limits in self.overrides.values() {
            limits.validate()?;
        }

        let bases = PortBases {
            gateway: self.gateway_port_start,
            bridge: self.bridge_port_start,
        };

        if let Some(name) = self.name {
            validate_name(&name)?;
            if self.gateway_port_start.is_some() || self.bridge_port_start.is_some() {
                return Err(invalid("`*_port_start` is not valid with `name`; use `gateway_port`/`bridge_port`"));
            }
            if !self.overrides.is_empty() {
                return Err(invalid("`overrides` is not valid with `name`; use `resources`"));
            }
            return Ok(Rule::Single {
                name,
                gateway_port: self.gateway_port,
                bridge_port: self.bridge_port,
                image: self.image,
                resources: self.resources,
            });
        }

        if let Some(names) = self.names {
            if names.is_empty() {
                return Err(invalid("`names` is empty"));
            }
            for name in &names {
                validate_name(name)?;
            }
            return Ok(Rule::List {
                names,
                bases,
                image: self.image,
                resources: self.resources,
                overrides: self.overrides,
            });
        }

        let pattern = self.pattern.unwrap_or_default();
        let template = NameTemplate::parse(&pattern)?;
        let (start, end) = match (self.start, self.end) {
            (Some(start), Some(end)) => (start, end),
            _ => return Err(invalid("`pattern` requires both `start` and `end`")),
        };
        if start > end {
            return Err(invalid(&format!("range start {start} is greater than end {end}")));
        }
        if end - start >= MAX_RANGE {
            return Err(invalid(&format!("range covers more than {MAX_RANGE} instances")));
        }
        Ok(Rule::Range {
            template,
            start,
            end,
            bases,
            image: self.image,
            resources: self.resources,
            overrides: self.overrides,
        })
    }
}

fn validate_image(index: usize, image: &str) -> CoreResult<()> {
    if image.trim().is_empty() || image.chars().any(char::is_whitespace) {
        return Err(CoreError::InvalidRule {
            index,
            reason: format!("invalid image reference {image:?}"),
        });
    }
    Ok(())
}

impl FleetSpec {
    pub fn from_file(path: &Path) -> CoreResult<Self> {
        FleetConfig::from_file(path)?.into_spec()
    }

    /// A one-rule spec equivalent to `create-range`.
    pub fn range(
        prefix: &str,
        start: u32,
        end: u32,
        gateway_start: Option<u16>,
        bridge_start: Option<u16>,
    ) -> CoreResult<Self> {
        if start > end || end - start >= MAX_RANGE {
            return Err(CoreError::InvalidRule {
                index: 1,
                reason: format!("invalid range {start}..={end}"),
            });
        }
        Ok(Self {
            defaults: DefaultsSpec::default(),
            rules: vec![Rule::Range {
                template: NameTemplate::with_prefix(prefix)?,
                start,
                end,
                bases: PortBases {
                    gateway: gateway_start,
                    bridge: bridge_start,
                },
                image: None,
                resources: ResourceLimits::default(),
                overrides: BTreeMap::new(),
            }],
        })
    }
}

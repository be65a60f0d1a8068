//! Compose document rendering.
//!
//! `render_instance` produces the single-service document piped to
//! `docker compose` for one instance. `render_fleet` produces the
//! exported multi-service document for external orchestration. Both use
//! the same service definition so the two never drift apart.

use std::collections::BTreeMap;

use serde::Serialize;

use crate::LaunchSpec;
use crate::error::{RuntimeError, RuntimeResult};

/// Gateway port inside the container.
pub const CONTAINER_GATEWAY_PORT: u16 = 18789;

/// Bridge port inside the container.
pub const CONTAINER_BRIDGE_PORT: u16 = 18790;

const CONTAINER_HOME: &str = "/home/node";

/// Service name used in per-instance projects.
pub const SERVICE_NAME: &str = "gateway";

const EXPORT_HEADER: &str = "\
# Generated by `clawfleet export` from the instance records.
# Do not edit: re-run the export after creating or removing instances.
";

#[derive(Debug, Serialize)]
pub struct ComposeFile {
    pub name: String,
    pub services: BTreeMap<String, ComposeService>,
}

#[derive(Debug, Serialize)]
pub struct ComposeService {
    pub image: String,
    pub container_name: String,
    pub restart: String,
    pub init: bool,
    pub command: Vec<String>,
    pub ports: Vec<String>,
    pub volumes: Vec<String>,
    pub environment: BTreeMap<String, String>,
    pub labels: BTreeMap<String, String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mem_limit: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub memswap_limit: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cpus: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pids_limit: Option<u32>,
}

impl ComposeService {
    pub fn for_launch(launch: &LaunchSpec) -> Self {
        let mut environment = launch.environment.clone();
        environment.insert("HOME".to_string(), CONTAINER_HOME.to_string());
        environment.insert("TERM".to_string(), "xterm-256color".to_string());

        let mut labels = BTreeMap::new();
        labels.insert("dev.clawfleet.instance".to_string(), launch.instance.clone());

        Self {
            image: launch.image.clone(),
            container_name: launch.project.clone(),
            restart: "unless-stopped".to_string(),
            init: true,
            command: [
                "node",
                "dist/index.js",
                "gateway",
                "--bind",
                "lan",
                "--port",
                &CONTAINER_GATEWAY_PORT.to_string(),
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
            ports: vec![
                format!("{}:{CONTAINER_GATEWAY_PORT}", launch.gateway_port),
                format!("{}:{CONTAINER_BRIDGE_PORT}", launch.bridge_port),
            ],
            volumes: vec![
                format!("{}:{CONTAINER_HOME}/.clawdbot", launch.config_dir.display()),
                format!("{}:{CONTAINER_HOME}/clawd", launch.workspace_dir.display()),
            ],
            environment,
            labels,
            mem_limit: launch.resources.memory.clone(),
            memswap_limit: launch.resources.memory_swap.clone(),
            cpus: launch.resources.cpus.clone(),
            pids_limit: launch.resources.pids_limit,
        }
    }
}

/// One-service document for a single instance's project.
pub fn render_instance(launch: &LaunchSpec) -> RuntimeResult<String> {
    let mut services = BTreeMap::new();
    services.insert(SERVICE_NAME.to_string(), ComposeService::for_launch(launch));
    to_yaml(&ComposeFile {
        name: launch.project.clone(),
        services,
    })
}

/// Multi-service document covering every given instance.
///
/// Services are keyed by project name, so the export and the
/// per-instance projects address the same containers.
pub fn render_fleet(project: &str, launches: &[LaunchSpec]) -> RuntimeResult<String> {
    let services = launches
        .iter()
        .map(|l| (l.project.clone(), ComposeService::for_launch(l)))
        .collect();
    let body = to_yaml(&ComposeFile {
        name: project.to_string(),
        services,
    })?;
    Ok(format!("{EXPORT_HEADER}{body}"))
}

fn to_yaml(file: &ComposeFile) -> RuntimeResult<String> {
    serde_yaml::to_string(file).map_err(|e| RuntimeError::Render(e.to_string()))
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use clawfleet_core::{GatewayToken, InstanceRecord, ResourceLimits};

    use super::*;

    fn launch(name: &str, gateway: u16, bridge: u16) -> LaunchSpec {
        LaunchSpec::from(&InstanceRecord {
            name: name.to_string(),
            gateway_port: gateway,
            bridge_port: bridge,
            config_dir: PathBuf::from(format!("/c/{name}")),
            workspace_dir: PathBuf::from(format!("/w/{name}")),
            token: GatewayToken::from_stored("feedface"),
            image: "clawdbot:local".to_string(),
            resources: ResourceLimits {
                memory: Some("1g".to_string()),
                cpus: Some("0.5".to_string()),
                ..Default::default()
            },
        })
    }

    #[test]
    fn instance_document_has_one_gateway_service() {
        let yaml = render_instance(&launch("admin", 18789, 18790)).unwrap();
        let doc: serde_yaml::Value = serde_yaml::from_str(&yaml).unwrap();

        assert_eq!(doc["name"].as_str(), Some("clawdbot-admin"));
        let svc = &doc["services"]["gateway"];
        assert_eq!(svc["image"].as_str(), Some("clawdbot:local"));
        assert_eq!(svc["ports"][0].as_str(), Some("18789:18789"));
        assert_eq!(svc["ports"][1].as_str(), Some("18790:18790"));
        assert_eq!(svc["volumes"][0].as_str(), Some("/c/admin:/home/node/.clawdbot"));
        assert_eq!(svc["environment"]["CLAWDBOT_GATEWAY_TOKEN"].as_str(), Some("feedface"));
        assert_eq!(svc["mem_limit"].as_str(), Some("1g"));
        assert!(svc.get("pids_limit").is_none());
    }

    #[test]
    fn fleet_document_has_service_per_instance() {
        let launches = vec![launch("a", 19000, 29000), launch("b", 19001, 29001)];
        let yaml = render_fleet("clawfleet", &launches).unwrap();
        assert!(yaml.starts_with("# Generated by `clawfleet export`"));

        let doc: serde_yaml::Value = serde_yaml::from_str(&yaml).unwrap();
        let services = doc["services"].as_mapping().unwrap();
        assert_eq!(services.len(), 2);
        assert_eq!(
            doc["services"]["clawdbot-b"]["ports"][0].as_str(),
            Some("19001:18789")
        );
    }
}

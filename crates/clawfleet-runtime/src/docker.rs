//! Docker Compose runtime adapter.
//!
//! Every instance is its own compose project (`clawdbot-<name>`). The
//! project definition is rendered from the `LaunchSpec` and fed on stdin,
//! so no compose file or environment variable is shared between
//! instances.

use std::collections::BTreeSet;
use std::io::Write;
use std::path::Path;
use std::process::{Command, Stdio};

use clawfleet_core::project_name;
use tracing::{debug, info};

use crate::compose;
use crate::error::{RuntimeError, RuntimeResult};
use crate::{ActionOutput, LaunchSpec, RuntimeAdapter};

/// Drives `docker` and the `docker compose` plugin as subprocesses.
#[derive(Debug, Clone)]
pub struct DockerComposeAdapter {
    docker: String,
}

impl DockerComposeAdapter {
    /// `docker` is the binary to invoke (usually `"docker"`).
    pub fn new(docker: impl Into<String>) -> Self {
        Self {
            docker: docker.into(),
        }
    }

    fn command(&self, args: &[&str]) -> Command {
        let mut cmd = Command::new(&self.docker);
        cmd.args(args);
        cmd
    }

    /// Run to completion, capturing output. Non-zero exit is an error.
    fn run(&self, args: &[&str], stdin: Option<&str>) -> RuntimeResult<ActionOutput> {
        let label = format!("{} {}", self.docker, args.join(" "));
        debug!(command = %label, "running");

        let mut cmd = self.command(args);
        cmd.stdout(Stdio::piped()).stderr(Stdio::piped());
        cmd.stdin(if stdin.is_some() {
            Stdio::piped()
        } else {
            Stdio::null()
        });

        let mut child = cmd.spawn().map_err(|source| self.spawn_error(&label, source))?;
        if let (Some(input), Some(mut pipe)) = (stdin, child.stdin.take()) {
            pipe.write_all(input.as_bytes())
                .map_err(|source| RuntimeError::Spawn {
                    command: label.clone(),
                    source,
                })?;
            // Dropping the pipe closes stdin so compose stops reading.
        }
        let output = child
            .wait_with_output()
            .map_err(|source| RuntimeError::Spawn {
                command: label.clone(),
                source,
            })?;

        let captured = ActionOutput::from_bytes(&output.stdout, &output.stderr);
        if output.status.success() {
            Ok(captured)
        } else {
            Err(RuntimeError::CommandFailed {
                command: label,
                code: output.status.code(),
                output: captured.lines,
            })
        }
    }

    fn spawn_error(&self, label: &str, source: std::io::Error) -> RuntimeError {
        if source.kind() == std::io::ErrorKind::NotFound {
            RuntimeError::MissingDependency(format!("`{}` is not on PATH", self.docker))
        } else {
            RuntimeError::Spawn {
                command: label.to_string(),
                source,
            }
        }
    }

    fn compose(&self, launch: &LaunchSpec, action: &[&str]) -> RuntimeResult<ActionOutput> {
        let document = compose::render_instance(launch)?;
        let mut args = vec!["compose", "-p", launch.project.as_str(), "-f", "-"];
        args.extend_from_slice(action);
        self.run(&args, Some(&document))
    }
}

impl Default for DockerComposeAdapter {
    fn default() -> Self {
        Self::new("docker")
    }
}

impl RuntimeAdapter for DockerComposeAdapter {
    fn check(&self) -> RuntimeResult<()> {
        self.run(&["version", "--format", "{{.Server.Version}}"], None)
            .map_err(|e| match e {
                RuntimeError::CommandFailed { .. } => {
                    RuntimeError::MissingDependency("docker daemon is not reachable".to_string())
                }
                other => other,
            })?;
        self.run(&["compose", "version"], None).map_err(|e| match e {
            RuntimeError::CommandFailed { .. } => {
                RuntimeError::MissingDependency("docker compose plugin is not installed".to_string())
            }
            other => other,
        })?;
        debug!("runtime dependencies present");
        Ok(())
    }

    fn up(&self, launch: &LaunchSpec) -> RuntimeResult<ActionOutput> {
        self.compose(launch, &["up", "-d", "--remove-orphans"])
    }

    fn down(&self, launch: &LaunchSpec) -> RuntimeResult<ActionOutput> {
        self.compose(launch, &["down"])
    }

    fn is_running(&self, instance: &str) -> RuntimeResult<bool> {
        let project = format!("label=com.docker.compose.project={}", project_name(instance));
        let out = self.run(
            &["ps", "-q", "--filter", &project, "--filter", "status=running"],
            None,
        )?;
        Ok(!out.lines.is_empty())
    }

    fn published_ports(&self) -> RuntimeResult<BTreeSet<u16>> {
        let out = self.run(&["ps", "--format", "{{.Ports}}"], None)?;
        Ok(out
            .lines
            .iter()
            .flat_map(|line| parse_published_ports(line))
            .collect())
    }

    fn image_exists(&self, image: &str) -> RuntimeResult<bool> {
        match self.run(&["image", "inspect", image], None) {
            Ok(_) => Ok(true),
            Err(RuntimeError::CommandFailed { .. }) => Ok(false),
            Err(e) => Err(e),
        }
    }

    fn build(&self, image: &str, context: &Path) -> RuntimeResult<ActionOutput> {
        let context = context.display().to_string();
        info!(%image, %context, "building image");
        self.run(&["build", "-t", image, &context], None)
    }

    fn logs(&self, instance: &str, follow: bool, tail: Option<u32>) -> RuntimeResult<()> {
        let project = project_name(instance);
        let tail = tail.map(|n| n.to_string());
        let mut args = vec!["compose", "-p", project.as_str(), "logs"];
        if follow {
            args.push("--follow");
        }
        if let Some(tail) = &tail {
            args.extend(["--tail", tail.as_str()]);
        }
        let label = format!("{} {}", self.docker, args.join(" "));
        // Inherit stdio so the operator sees the stream directly.
        let status = self
            .command(&args)
            .stdin(Stdio::null())
            .status()
            .map_err(|source| self.spawn_error(&label, source))?;
        if status.success() {
            Ok(())
        } else {
            Err(RuntimeError::CommandFailed {
                command: label,
                code: status.code(),
                output: Vec::new(),
            })
        }
    }
}

/// Host ports from one `docker ps --format {{.Ports}}` line.
///
/// Entries look like `0.0.0.0:18789->18789/tcp`, `:::18789->18789/tcp`,
/// `0.0.0.0:8000-8002->8000-8002/tcp`, or `18789/tcp` (not published).
pub fn parse_published_ports(line: &str) -> Vec<u16> {
    let mut ports = Vec::new();
    for entry in line.split(',').map(str::trim) {
        let Some((host, _container)) = entry.split_once("->") else {
            continue;
        };
        let host_ports = host.rsplit(':').next().unwrap_or(host);
        match host_ports.split_once('-') {
            Some((lo, hi)) => {
                if let (Ok(lo), Ok(hi)) = (lo.parse::<u16>(), hi.parse::<u16>()) {
                    ports.extend(lo..=hi);
                }
            }
            None => {
                if let Ok(port) = host_ports.parse::<u16>() {
                    ports.push(port);
                }
            }
        }
    }
    ports
}

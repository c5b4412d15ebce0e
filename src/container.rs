//! Thin subprocess wrapper around the container runtime CLI.
//!
//! Every operation shells out to `docker` (or `podman` as a fallback); the
//! runtime itself is an opaque collaborator. Launch failures are errors,
//! teardown failures are logged and swallowed so diagnostics gathering always
//! runs to completion.

use serde::Deserialize;
use std::path::Path;
use std::process::{Command, ExitStatus, Stdio};
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::time::sleep;
use tracing::{debug, warn};

/// Container runtime types supported
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContainerRuntime {
    /// Docker container runtime
    Docker,
    /// Podman container runtime
    Podman,
    /// No container runtime available
    None,
}

impl ContainerRuntime {
    /// Get the command name for this runtime
    pub fn command(&self) -> &'static str {
        match self {
            ContainerRuntime::Docker => "docker",
            ContainerRuntime::Podman => "podman",
            ContainerRuntime::None => "",
        }
    }

    /// Check if this runtime is available
    pub fn is_available(&self) -> bool {
        matches!(self, ContainerRuntime::Docker | ContainerRuntime::Podman)
    }
}

/// Container operation errors
#[derive(Error, Debug)]
pub enum ContainerError {
    /// No container runtime is available
    #[error("No container runtime available. Please install Docker to run the smoketest.")]
    NoRuntimeAvailable,

    /// Container failed to start
    #[error("Failed to start container '{name}': {reason}")]
    StartFailed { name: String, reason: String },

    /// Command execution failed
    #[error("Command execution failed: {command}")]
    CommandFailed { command: String },

    /// Inspect output could not be retrieved or parsed
    #[error("Failed to inspect container '{name}': {reason}")]
    InspectFailed { name: String, reason: String },

    /// Container did not reach the running state in time
    #[error("Container '{name}' did not reach running state within {timeout}s")]
    StartupTimeout { name: String, timeout: u64 },

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Detect available container runtime. Docker first: the smoketest's log
/// modes are Docker log-driver specific, so Podman is only a fallback.
pub fn detect_runtime() -> ContainerRuntime {
    if probe("docker") {
        return ContainerRuntime::Docker;
    }
    if probe("podman") {
        return ContainerRuntime::Podman;
    }
    ContainerRuntime::None
}

fn probe(command: &str) -> bool {
    Command::new(command)
        .arg("--version")
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .is_ok_and(|status| status.success())
}

/// Parameters for one `run` invocation.
#[derive(Debug, Clone, Default)]
pub struct RunSpec {
    /// Container name
    pub name: String,
    /// Image to run
    pub image: String,
    /// Environment variables
    pub env_vars: Vec<(String, String)>,
    /// Volume mounts (host_path, container_path)
    pub volumes: Vec<(String, String)>,
    /// Additional `docker run` arguments (log drivers, port maps)
    pub extra_args: Vec<String>,
    /// Command and arguments run inside the container, if any
    pub command: Vec<String>,
}

impl RunSpec {
    /// Assemble the argument vector for `docker run`, without the leading
    /// `run` and without `-d` (the caller decides detached vs. foreground).
    pub fn to_args(&self) -> Vec<String> {
        let mut args = vec!["--name".to_string(), self.name.clone()];
        for (key, value) in &self.env_vars {
            args.push("-e".to_string());
            args.push(format!("{}={}", key, value));
        }
        for (host, container) in &self.volumes {
            args.push("-v".to_string());
            args.push(format!("{}:{}", host, container));
        }
        args.extend(self.extra_args.iter().cloned());
        args.push(self.image.clone());
        args.extend(self.command.iter().cloned());
        args
    }

    /// Like [`RunSpec::to_args`], but with environment variable values
    /// masked. Used for command-line logging: the env pairs carry API keys.
    pub fn redacted_args(&self) -> Vec<String> {
        let mut args = vec!["--name".to_string(), self.name.clone()];
        for (key, _) in &self.env_vars {
            args.push("-e".to_string());
            args.push(format!("{}=***", key));
        }
        for (host, container) in &self.volumes {
            args.push("-v".to_string());
            args.push(format!("{}:{}", host, container));
        }
        args.extend(self.extra_args.iter().cloned());
        args.push(self.image.clone());
        args.extend(self.command.iter().cloned());
        args
    }
}

/// Start a container detached. Non-zero exit status is an error.
pub fn run_detached(runtime: &ContainerRuntime, spec: &RunSpec) -> Result<(), ContainerError> {
    if !runtime.is_available() {
        return Err(ContainerError::NoRuntimeAvailable);
    }

    let mut args = vec!["run".to_string(), "-d".to_string()];
    args.extend(spec.to_args());
    debug!(
        container = %spec.name,
        "{} run -d {}",
        runtime.command(),
        spec.redacted_args().join(" ")
    );

    let output = Command::new(runtime.command())
        .args(&args)
        .output()
        .map_err(|e| ContainerError::StartFailed {
            name: spec.name.clone(),
            reason: e.to_string(),
        })?;

    if !output.status.success() {
        return Err(ContainerError::StartFailed {
            name: spec.name.clone(),
            reason: String::from_utf8_lossy(&output.stderr).to_string(),
        });
    }

    Ok(())
}

/// Run a container in the foreground with inherited stdio, blocking until it
/// exits. The child's exit status is returned as data: a failing verifier is
/// a test verdict, not a launch error.
pub fn run_foreground(
    runtime: &ContainerRuntime,
    spec: &RunSpec,
) -> Result<ExitStatus, ContainerError> {
    if !runtime.is_available() {
        return Err(ContainerError::NoRuntimeAvailable);
    }

    let mut args = vec!["run".to_string()];
    args.extend(spec.to_args());
    debug!(
        container = %spec.name,
        "{} run {}",
        runtime.command(),
        spec.redacted_args().join(" ")
    );

    Command::new(runtime.command())
        .args(&args)
        .status()
        .map_err(|e| ContainerError::StartFailed {
            name: spec.name.clone(),
            reason: e.to_string(),
        })
}

// docker inspect emits a JSON array with one entry per container; only the
// state block matters here.
#[derive(Debug, Deserialize)]
struct InspectEntry {
    #[serde(rename = "State")]
    state: InspectState,
}

#[derive(Debug, Deserialize)]
struct InspectState {
    #[serde(rename = "Running")]
    running: bool,
    #[serde(rename = "Status")]
    status: String,
}

/// Query whether a container currently reports the running state.
pub fn is_running(runtime: &ContainerRuntime, name: &str) -> Result<bool, ContainerError> {
    if !runtime.is_available() {
        return Err(ContainerError::NoRuntimeAvailable);
    }

    let output = Command::new(runtime.command())
        .args(["inspect", name])
        .output()
        .map_err(|e| ContainerError::InspectFailed {
            name: name.to_string(),
            reason: e.to_string(),
        })?;

    if !output.status.success() {
        return Err(ContainerError::InspectFailed {
            name: name.to_string(),
            reason: String::from_utf8_lossy(&output.stderr).to_string(),
        });
    }

    let entries: Vec<InspectEntry> =
        serde_json::from_slice(&output.stdout).map_err(|e| ContainerError::InspectFailed {
            name: name.to_string(),
            reason: e.to_string(),
        })?;

    match entries.first() {
        Some(entry) => {
            debug!(container = name, status = %entry.state.status, "inspected");
            Ok(entry.state.running)
        }
        None => Err(ContainerError::InspectFailed {
            name: name.to_string(),
            reason: "inspect returned no entries".to_string(),
        }),
    }
}

/// Poll a container until it reports running, or the timeout lapses.
pub async fn wait_until_running(
    runtime: &ContainerRuntime,
    name: &str,
    timeout: Duration,
) -> Result<(), ContainerError> {
    let start = Instant::now();

    loop {
        match is_running(runtime, name) {
            Ok(true) => return Ok(()),
            // A failing inspect right after `run -d` usually means the
            // runtime has not registered the container yet; keep polling.
            Ok(false) | Err(ContainerError::InspectFailed { .. }) => {}
            Err(e) => return Err(e),
        }

        if start.elapsed() >= timeout {
            return Err(ContainerError::StartupTimeout {
                name: name.to_string(),
                timeout: timeout.as_secs(),
            });
        }
        sleep(Duration::from_secs(2)).await;
    }
}

/// Kill and remove a container, best effort. Failures (already stopped,
/// never started) are logged and swallowed so teardown runs to completion.
pub fn kill_and_remove(runtime: &ContainerRuntime, name: &str) {
    if !runtime.is_available() {
        return;
    }

    for subcommand in ["kill", "rm"] {
        match Command::new(runtime.command())
            .args([subcommand, name])
            .output()
        {
            Ok(output) if output.status.success() => {
                debug!(container = name, "{} succeeded", subcommand);
            }
            Ok(output) => {
                debug!(
                    container = name,
                    "{} failed: {}",
                    subcommand,
                    String::from_utf8_lossy(&output.stderr).trim()
                );
            }
            Err(e) => {
                warn!(container = name, "could not invoke {}: {}", subcommand, e);
            }
        }
    }
}

/// Copy a file out of a container into a host directory. Returns the exit
/// status of the `cp` invocation so the caller can thread it into the
/// process exit status.
pub fn copy_from(
    runtime: &ContainerRuntime,
    name: &str,
    container_path: &str,
    host_dir: &Path,
) -> Result<ExitStatus, ContainerError> {
    if !runtime.is_available() {
        return Err(ContainerError::NoRuntimeAvailable);
    }

    let source = format!("{}:{}", name, container_path);
    let output = Command::new(runtime.command())
        .arg("cp")
        .arg(&source)
        .arg(host_dir)
        .output()
        .map_err(|_| ContainerError::CommandFailed {
            command: format!("{} cp {}", runtime.command(), source),
        })?;

    if !output.status.success() {
        debug!(
            "cp {} failed: {}",
            source,
            String::from_utf8_lossy(&output.stderr).trim()
        );
    }
    Ok(output.status)
}

/// Capture the `ps -a` table for diagnostics.
pub fn list_all(runtime: &ContainerRuntime) -> Result<String, ContainerError> {
    if !runtime.is_available() {
        return Err(ContainerError::NoRuntimeAvailable);
    }

    let output = Command::new(runtime.command())
        .args(["ps", "-a"])
        .output()
        .map_err(|_| ContainerError::CommandFailed {
            command: format!("{} ps -a", runtime.command()),
        })?;

    Ok(String::from_utf8_lossy(&output.stdout).to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_container_runtime_command() {
        assert_eq!(ContainerRuntime::Docker.command(), "docker");
        assert_eq!(ContainerRuntime::Podman.command(), "podman");
        assert_eq!(ContainerRuntime::None.command(), "");
    }

    #[test]
    fn test_container_runtime_availability() {
        assert!(ContainerRuntime::Docker.is_available());
        assert!(ContainerRuntime::Podman.is_available());
        assert!(!ContainerRuntime::None.is_available());
    }

    #[test]
    fn test_detect_runtime_returns_valid_variant() {
        // We can't predict what is installed in the test environment.
        match detect_runtime() {
            ContainerRuntime::Docker | ContainerRuntime::Podman | ContainerRuntime::None => {}
        }
    }

    #[test]
    fn test_run_spec_arg_order() {
        let spec = RunSpec {
            name: "smoke-agent".to_string(),
            image: "agent:latest".to_string(),
            env_vars: vec![("SCALYR_API_KEY".to_string(), "key".to_string())],
            volumes: vec![(
                "/var/run/docker.sock".to_string(),
                "/var/scalyr/docker.sock".to_string(),
            )],
            extra_args: vec!["-p".to_string(), "601:601".to_string()],
            command: vec!["bash".to_string(), "-c".to_string(), "true".to_string()],
        };

        let args = spec.to_args();
        assert_eq!(args[0], "--name");
        assert_eq!(args[1], "smoke-agent");
        assert!(args.contains(&"SCALYR_API_KEY=key".to_string()));
        assert!(args.contains(&"/var/run/docker.sock:/var/scalyr/docker.sock".to_string()));

        // The image must come after every flag and before the command.
        let image_pos = args.iter().position(|a| a == "agent:latest").unwrap();
        let port_pos = args.iter().position(|a| a == "601:601").unwrap();
        let cmd_pos = args.iter().position(|a| a == "bash").unwrap();
        assert!(port_pos < image_pos);
        assert!(image_pos < cmd_pos);
    }

    #[test]
    fn test_redacted_args_mask_env_values() {
        let spec = RunSpec {
            name: "smoke-agent".to_string(),
            image: "agent:latest".to_string(),
            env_vars: vec![("SCALYR_API_KEY".to_string(), "secret".to_string())],
            ..Default::default()
        };
        let args = spec.redacted_args();
        assert!(args.contains(&"SCALYR_API_KEY=***".to_string()));
        assert!(!args.iter().any(|a| a.contains("secret")));
    }

    #[test]
    fn test_run_spec_minimal() {
        let spec = RunSpec {
            name: "v".to_string(),
            image: "img".to_string(),
            ..Default::default()
        };
        assert_eq!(spec.to_args(), vec!["--name", "v", "img"]);
    }

    #[test]
    fn test_operations_require_runtime() {
        let runtime = ContainerRuntime::None;
        let spec = RunSpec::default();

        assert!(matches!(
            run_detached(&runtime, &spec),
            Err(ContainerError::NoRuntimeAvailable)
        ));
        assert!(matches!(
            run_foreground(&runtime, &spec),
            Err(ContainerError::NoRuntimeAvailable)
        ));
        assert!(matches!(
            is_running(&runtime, "x"),
            Err(ContainerError::NoRuntimeAvailable)
        ));
        assert!(matches!(
            list_all(&runtime),
            Err(ContainerError::NoRuntimeAvailable)
        ));
    }

    #[test]
    fn test_kill_and_remove_without_runtime_is_a_no_op() {
        kill_and_remove(&ContainerRuntime::None, "anything");
    }

    #[test]
    fn test_inspect_entry_parsing() {
        let payload = r#"[{"Id": "abc", "State": {"Running": true, "Status": "running", "Pid": 42}}]"#;
        let entries: Vec<InspectEntry> = serde_json::from_str(payload).unwrap();
        assert!(entries[0].state.running);
        assert_eq!(entries[0].state.status, "running");
    }

    #[test]
    fn test_container_error_display() {
        let error = ContainerError::StartupTimeout {
            name: "smoke-agent".to_string(),
            timeout: 30,
        };
        assert!(error.to_string().contains("smoke-agent"));
        assert!(error.to_string().contains("30"));
    }
}

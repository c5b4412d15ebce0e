//! Orchestration of the three-container smoketest run.
//!
//! The sequence is strictly sequential: start the agent detached, start the
//! uploader detached, then run the verifier in the foreground until it
//! reports a verdict or gives up. A [`Teardown`] guard scoped to the whole
//! run plays the role of the shell `trap ... EXIT`: whatever happens, the
//! agent's diagnostic logs are copied out and all three containers are
//! killed and removed.

use crate::config::{SmoketestConfig, TestRole};
use crate::container::{
    self, detect_runtime, ContainerError, ContainerRuntime, RunSpec,
};
use crate::logcheck;
use std::path::PathBuf;
use std::process::ExitStatus;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

/// How long the agent container gets to reach the running state before the
/// run is abandoned. The verifier owns the much longer wait for actual data.
const AGENT_STARTUP_TIMEOUT: Duration = Duration::from_secs(60);

/// Host Docker socket, mounted into the agent at the path it watches.
const HOST_DOCKER_SOCKET: &str = "/var/run/docker.sock";
const AGENT_DOCKER_SOCKET: &str = "/var/scalyr/docker.sock";

/// Diagnostic files copied out of the agent container on every exit path.
const AGENT_LOG_PATH: &str = "/var/log/scalyr-agent-2/agent.log";
const AGENT_DEBUG_LOG_PATH: &str = "/var/log/scalyr-agent-2/agent_debug.log";
const COVERAGE_PATH: &str = "/.coverage";

/// Errors that abort a smoketest run
#[derive(Error, Debug)]
pub enum SmoketestError {
    /// Container operation failed
    #[error(transparent)]
    Container(#[from] ContainerError),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// `docker run` parameters for the agent container.
///
/// Every mode gets the API keys and the Docker socket; the mode contributes
/// its own log-collection flags on top.
pub fn agent_spec(config: &SmoketestConfig) -> RunSpec {
    RunSpec {
        name: config.agent_name(),
        image: config.tested_image.clone(),
        env_vars: vec![
            ("SCALYR_API_KEY".to_string(), config.env.scalyr_api_key.clone()),
            ("SCALYR_SERVER".to_string(), config.env.scalyr_server.clone()),
        ],
        volumes: vec![(
            HOST_DOCKER_SOCKET.to_string(),
            AGENT_DOCKER_SOCKET.to_string(),
        )],
        extra_args: config.mode.agent_args(),
        command: Vec::new(),
    }
}

/// `docker run` parameters for the uploader container.
pub fn uploader_spec(config: &SmoketestConfig) -> RunSpec {
    RunSpec {
        name: config.uploader_name(),
        image: config.smoketest_image.clone(),
        env_vars: Vec::new(),
        volumes: Vec::new(),
        extra_args: config.mode.uploader_args(),
        command: vec![
            "bash".to_string(),
            "-c".to_string(),
            config.runner_command(TestRole::Uploader),
        ],
    }
}

/// `docker run` parameters for the verifier container. The read key and
/// server endpoint travel through the environment, not the command line.
pub fn verifier_spec(config: &SmoketestConfig) -> RunSpec {
    RunSpec {
        name: config.verifier_name(),
        image: config.smoketest_image.clone(),
        env_vars: vec![
            ("READ_API_KEY".to_string(), config.env.read_api_key.clone()),
            ("SCALYR_SERVER".to_string(), config.env.scalyr_server.clone()),
        ],
        volumes: Vec::new(),
        extra_args: Vec::new(),
        command: vec![
            "bash".to_string(),
            "-c".to_string(),
            config.runner_command(TestRole::Verifier),
        ],
    }
}

/// Guaranteed cleanup for one smoketest run.
///
/// On [`Teardown::execute`] (or on drop, if the run panicked or errored out
/// before reaching it) the guard logs the container table, copies the
/// diagnostic files out of the agent container into `output_dir`, scans the
/// captured agent log for errors, and kills and removes all three
/// containers. Every step is best effort; only the status of the coverage
/// copy — the last copy step, mirroring the original exit contract — is
/// reported back.
pub struct Teardown {
    runtime: ContainerRuntime,
    agent: String,
    uploader: String,
    verifier: String,
    output_dir: PathBuf,
    exit_code: Option<i32>,
}

impl Teardown {
    pub fn new(runtime: ContainerRuntime, config: &SmoketestConfig, output_dir: PathBuf) -> Self {
        Self {
            runtime,
            agent: config.agent_name(),
            uploader: config.uploader_name(),
            verifier: config.verifier_name(),
            output_dir,
            exit_code: None,
        }
    }

    /// Run teardown now. Returns the exit status of the final copy step.
    /// Idempotent: a second call returns the first call's result.
    pub fn execute(&mut self) -> i32 {
        if let Some(code) = self.exit_code {
            return code;
        }

        match container::list_all(&self.runtime) {
            Ok(table) => debug!("containers after run:\n{}", table),
            Err(e) => debug!("could not list containers: {}", e),
        }

        self.capture(AGENT_LOG_PATH);
        self.scan_agent_log();
        self.capture(AGENT_DEBUG_LOG_PATH);
        let code = self.capture(COVERAGE_PATH);

        for name in [&self.agent, &self.uploader, &self.verifier] {
            info!(container = %name, "removing");
            container::kill_and_remove(&self.runtime, name);
        }

        self.exit_code = Some(code);
        code
    }

    fn capture(&self, container_path: &str) -> i32 {
        match container::copy_from(&self.runtime, &self.agent, container_path, &self.output_dir) {
            Ok(status) if status.success() => {
                info!(path = container_path, "captured from agent container");
                0
            }
            Ok(status) => {
                warn!(path = container_path, "copy failed with {}", status);
                status.code().unwrap_or(1)
            }
            Err(e) => {
                warn!(path = container_path, "copy failed: {}", e);
                1
            }
        }
    }

    fn scan_agent_log(&self) {
        let log_path = self.output_dir.join("agent.log");
        match logcheck::scan_file(&log_path) {
            Ok(errors) if errors.is_empty() => {
                info!("no errors in captured agent log");
            }
            Ok(errors) => {
                for error in &errors {
                    warn!("agent log error: {}", error);
                }
            }
            Err(e) => warn!("could not scan captured agent log: {}", e),
        }
    }
}

impl Drop for Teardown {
    fn drop(&mut self) {
        if self.exit_code.is_none() {
            self.execute();
        }
    }
}

/// Run the full smoketest. Returns the process exit code on the normal
/// path; launch failures propagate as errors after teardown has run.
pub async fn run(config: &SmoketestConfig) -> Result<i32, SmoketestError> {
    let runtime = detect_runtime();
    if !runtime.is_available() {
        return Err(ContainerError::NoRuntimeAvailable.into());
    }
    info!(runtime = runtime.command(), mode = %config.mode, "starting smoketest");

    let mut teardown = Teardown::new(runtime, config, std::env::current_dir()?);
    let verdict = launch_and_verify(&runtime, config).await;
    let exit_code = teardown.execute();

    match verdict {
        Ok(status) if status.success() => {
            info!("verifier passed");
            Ok(exit_code)
        }
        Ok(status) => {
            // The original contract: the verifier's verdict is surfaced in
            // the logs, the process exit status is the final copy step's.
            warn!("verifier exited with {}", status);
            Ok(exit_code)
        }
        Err(e) => Err(e),
    }
}

async fn launch_and_verify(
    runtime: &ContainerRuntime,
    config: &SmoketestConfig,
) -> Result<ExitStatus, SmoketestError> {
    let agent = agent_spec(config);
    info!(container = %agent.name, image = %agent.image, "starting agent");
    container::run_detached(runtime, &agent)?;
    container::wait_until_running(runtime, &agent.name, AGENT_STARTUP_TIMEOUT).await?;

    let uploader = uploader_spec(config);
    info!(container = %uploader.name, "starting uploader");
    container::run_detached(runtime, &uploader)?;

    let verifier = verifier_spec(config);
    info!(
        container = %verifier.name,
        max_wait = config.max_wait_secs,
        "running verifier"
    );
    let status = container::run_foreground(runtime, &verifier)?;
    Ok(status)
}

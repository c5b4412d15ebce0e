//! Smoketest configuration: CLI parameters, CI environment, and the values
//! derived from them (container names, verifier script URL, in-container
//! commands).

use serde::Serialize;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Branch used for the verifier script URL when `CIRCLE_BRANCH` is unset.
pub const DEFAULT_BRANCH: &str = "master";

/// Repository used for the verifier script URL when `CIRCLE_PROJECT_REPONAME`
/// is unset.
pub const DEFAULT_REPONAME: &str = "scalyr-agent-2";

/// Prefix shared by all three container names.
const CONTAINER_NAME_PREFIX: &str = "ci-agent-docker";

/// Configuration errors. All of these are fatal before any container
/// operation is attempted.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// The log mode string did not match any supported mode
    #[error(
        "unrecognized log mode '{0}', expected one of: docker-syslog, docker-json, docker-api"
    )]
    UnknownLogMode(String),

    /// A required environment variable is unset or empty
    #[error("required environment variable {0} is not set")]
    MissingEnvVar(&'static str),
}

/// Which Docker log-collection mechanism the agent under test uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum LogMode {
    /// Container logs routed to the agent through the syslog log driver
    Syslog,
    /// Agent reads the host's JSON log files directly
    JsonFile,
    /// Agent pulls logs through the Docker API socket
    Api,
}

impl FromStr for LogMode {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "docker-syslog" => Ok(LogMode::Syslog),
            "docker-json" => Ok(LogMode::JsonFile),
            "docker-api" => Ok(LogMode::Api),
            other => Err(ConfigError::UnknownLogMode(other.to_string())),
        }
    }
}

impl fmt::Display for LogMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LogMode::Syslog => write!(f, "docker-syslog"),
            LogMode::JsonFile => write!(f, "docker-json"),
            LogMode::Api => write!(f, "docker-api"),
        }
    }
}

impl LogMode {
    /// Extra `docker run` arguments for the agent container in this mode.
    ///
    /// Syslog mode exposes the agent's syslog intake port; JSON mode mounts
    /// the host's container log directory so the agent can tail the files.
    /// API mode needs nothing beyond the Docker socket every mode gets.
    pub fn agent_args(&self) -> Vec<String> {
        match self {
            LogMode::Syslog => vec!["-p".to_string(), "601:601".to_string()],
            LogMode::JsonFile => vec![
                "-v".to_string(),
                "/var/lib/docker/containers:/var/lib/docker/containers".to_string(),
            ],
            LogMode::Api => Vec::new(),
        }
    }

    /// Extra `docker run` arguments for the uploader container in this mode.
    ///
    /// In syslog mode the uploader's stdout is routed to the agent's syslog
    /// intake via the Docker syslog log driver. The other modes collect from
    /// the default json-file driver or the API, so no flags are needed.
    pub fn uploader_args(&self) -> Vec<String> {
        match self {
            LogMode::Syslog => vec![
                "--log-driver".to_string(),
                "syslog".to_string(),
                "--log-opt".to_string(),
                "syslog-address=tcp://127.0.0.1:601".to_string(),
            ],
            LogMode::JsonFile | LogMode::Api => Vec::new(),
        }
    }
}

/// Role of a smoketest-image container. Selects the `--mode` flag the
/// downloaded script is invoked with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TestRole {
    /// Emits synthetic log lines on stdout for the agent to collect
    Uploader,
    /// Polls for liveness and checks the backend for the uploaded lines
    Verifier,
}

impl fmt::Display for TestRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TestRole::Uploader => write!(f, "uploader"),
            TestRole::Verifier => write!(f, "verifier"),
        }
    }
}

/// Values taken from the CI environment.
#[derive(Debug, Clone)]
pub struct CiEnv {
    /// Write key injected into the agent container
    pub scalyr_api_key: String,
    /// Backend endpoint injected into the agent and verifier containers
    pub scalyr_server: String,
    /// Read key the verifier uses to query the backend
    pub read_api_key: String,
    /// CI build number, keeps container names unique across concurrent builds
    pub build_num: String,
    /// Branch component of the verifier script URL
    pub branch: String,
    /// Repository component of the verifier script URL
    pub reponame: String,
}

impl CiEnv {
    /// Read the CI environment. Missing or empty required variables are a
    /// fatal configuration error.
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            scalyr_api_key: required("SCALYR_API_KEY")?,
            scalyr_server: required("SCALYR_SERVER")?,
            read_api_key: required("READ_API_KEY")?,
            build_num: required("CIRCLE_BUILD_NUM")?,
            branch: optional("CIRCLE_BRANCH", DEFAULT_BRANCH),
            reponame: optional("CIRCLE_PROJECT_REPONAME", DEFAULT_REPONAME),
        })
    }
}

fn required(name: &'static str) -> Result<String, ConfigError> {
    match std::env::var(name) {
        Ok(value) if !value.is_empty() => Ok(value),
        _ => Err(ConfigError::MissingEnvVar(name)),
    }
}

fn optional(name: &str, default: &str) -> String {
    match std::env::var(name) {
        Ok(value) if !value.is_empty() => value,
        _ => default.to_string(),
    }
}

/// Full configuration for one smoketest run.
#[derive(Debug, Clone)]
pub struct SmoketestConfig {
    /// Image used for the uploader and verifier containers
    pub smoketest_image: String,
    /// Log collection mode under test
    pub mode: LogMode,
    /// Maximum seconds the verifier waits for the uploaded lines
    pub max_wait_secs: u64,
    /// Agent image under test
    pub tested_image: String,
    /// CI environment
    pub env: CiEnv,
}

impl SmoketestConfig {
    /// Name of the agent container.
    pub fn agent_name(&self) -> String {
        self.container_name("agent")
    }

    /// Name of the uploader container.
    pub fn uploader_name(&self) -> String {
        self.container_name("uploader")
    }

    /// Name of the verifier container.
    pub fn verifier_name(&self) -> String {
        self.container_name("verifier")
    }

    // Names are a pure function of mode and build number, so concurrent CI
    // builds with distinct build numbers never collide.
    fn container_name(&self, role: &str) -> String {
        format!(
            "{}-{}-{}-{}",
            CONTAINER_NAME_PREFIX, self.mode, self.env.build_num, role
        )
    }

    /// Raw-content URL of the uploader/verifier script.
    pub fn script_url(&self) -> String {
        format!(
            "https://raw.githubusercontent.com/scalyr/{}/{}/.circleci/docker_unified_smoke_unit/smoketest/smoketest.py",
            self.env.reponame, self.env.branch
        )
    }

    /// Shell command run inside an uploader or verifier container: download
    /// the script and execute it under the container's own name.
    ///
    /// The verifier additionally learns the names of the containers it
    /// monitors; it reads `READ_API_KEY` and `SCALYR_SERVER` from its
    /// environment (see [`crate::runner`]) so the secrets never appear on a
    /// command line.
    pub fn runner_command(&self, role: TestRole) -> String {
        let own_name = match role {
            TestRole::Uploader => self.uploader_name(),
            TestRole::Verifier => self.verifier_name(),
        };
        let mut command = format!(
            "source ~/.bashrc && pyenv shell 3.7.3 && wget -q {} && python smoketest.py {} {} --mode {}",
            self.script_url(),
            own_name,
            self.max_wait_secs,
            role,
        );
        if role == TestRole::Verifier {
            command.push_str(&format!(
                " --agent_name {} --uploader_name {}",
                self.agent_name(),
                self.uploader_name()
            ));
        }
        command
    }
}

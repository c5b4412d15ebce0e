pub mod config;
pub mod container;
pub mod logcheck;
pub mod runner;

pub use config::{CiEnv, ConfigError, LogMode, SmoketestConfig, TestRole};
pub use container::{
    detect_runtime, is_running, kill_and_remove, list_all, run_detached, run_foreground,
    wait_until_running, ContainerError, ContainerRuntime, RunSpec,
};
pub use logcheck::{find_errors, group_messages, scan_file, LogMessage};
pub use runner::{agent_spec, run, uploader_spec, verifier_spec, SmoketestError, Teardown};

use serial_test::serial;
use smoketest::{
    agent_spec, uploader_spec, verifier_spec, wait_until_running, CiEnv, ConfigError,
    ContainerError, ContainerRuntime, LogMode, SmoketestConfig, TestRole,
};
use std::time::Duration;

const BUILD_NUM: &str = "4242";

fn env_fixture() -> CiEnv {
    CiEnv {
        scalyr_api_key: "write-key".to_string(),
        scalyr_server: "https://agent.scalyr.com".to_string(),
        read_api_key: "read-key".to_string(),
        build_num: BUILD_NUM.to_string(),
        branch: "master".to_string(),
        reponame: "scalyr-agent-2".to_string(),
    }
}

fn config_fixture(mode: LogMode) -> SmoketestConfig {
    SmoketestConfig {
        smoketest_image: "scalyr/ci-smoketest:4".to_string(),
        mode,
        max_wait_secs: 300,
        tested_image: "scalyr/scalyr-agent-docker-json:latest".to_string(),
        env: env_fixture(),
    }
}

fn set_required_env() {
    std::env::set_var("SCALYR_API_KEY", "write-key");
    std::env::set_var("SCALYR_SERVER", "https://agent.scalyr.com");
    std::env::set_var("READ_API_KEY", "read-key");
    std::env::set_var("CIRCLE_BUILD_NUM", BUILD_NUM);
}

fn clear_ci_env() {
    for name in [
        "SCALYR_API_KEY",
        "SCALYR_SERVER",
        "READ_API_KEY",
        "CIRCLE_BUILD_NUM",
        "CIRCLE_BRANCH",
        "CIRCLE_PROJECT_REPONAME",
    ] {
        std::env::remove_var(name);
    }
}

#[test]
#[serial]
fn test_env_config_defaults() {
    clear_ci_env();
    set_required_env();

    let env = CiEnv::from_env().unwrap();
    assert_eq!(env.build_num, BUILD_NUM);
    assert_eq!(env.branch, "master");
    assert_eq!(env.reponame, "scalyr-agent-2");
}

#[test]
#[serial]
fn test_env_config_honors_overrides() {
    clear_ci_env();
    set_required_env();
    std::env::set_var("CIRCLE_BRANCH", "feature-x");
    std::env::set_var("CIRCLE_PROJECT_REPONAME", "scalyr-agent-3");

    let env = CiEnv::from_env().unwrap();
    assert_eq!(env.branch, "feature-x");
    assert_eq!(env.reponame, "scalyr-agent-3");
}

#[test]
#[serial]
fn test_env_config_missing_required_var() {
    clear_ci_env();
    set_required_env();
    std::env::remove_var("READ_API_KEY");

    let err = CiEnv::from_env().unwrap_err();
    assert!(matches!(err, ConfigError::MissingEnvVar("READ_API_KEY")));
}

#[test]
#[serial]
fn test_env_config_empty_var_counts_as_missing() {
    clear_ci_env();
    set_required_env();
    std::env::set_var("CIRCLE_BUILD_NUM", "");

    let err = CiEnv::from_env().unwrap_err();
    assert!(matches!(err, ConfigError::MissingEnvVar("CIRCLE_BUILD_NUM")));
}

// End-to-end over the pure pipeline: CLI-shaped inputs to final docker
// argument vectors, one mode at a time.

#[test]
fn test_syslog_mode_wiring() {
    let config = config_fixture(LogMode::Syslog);

    let agent_args = agent_spec(&config).to_args();
    assert!(agent_args.contains(&"601:601".to_string()));

    let uploader_args = uploader_spec(&config).to_args();
    assert!(uploader_args.contains(&"--log-driver".to_string()));
    assert!(uploader_args.contains(&"syslog-address=tcp://127.0.0.1:601".to_string()));
}

#[test]
fn test_json_mode_wiring() {
    let config = config_fixture(LogMode::JsonFile);

    let agent_args = agent_spec(&config).to_args();
    assert!(
        agent_args.contains(&"/var/lib/docker/containers:/var/lib/docker/containers".to_string())
    );
    assert!(!agent_args.contains(&"601:601".to_string()));

    let uploader_args = uploader_spec(&config).to_args();
    assert!(!uploader_args.contains(&"--log-driver".to_string()));
}

#[test]
fn test_api_mode_wiring() {
    let config = config_fixture(LogMode::Api);

    let agent_args = agent_spec(&config).to_args();
    assert!(!agent_args.contains(&"601:601".to_string()));
    assert!(
        !agent_args.contains(&"/var/lib/docker/containers:/var/lib/docker/containers".to_string())
    );

    // The Docker socket is mounted in every mode.
    assert!(agent_args.contains(&"/var/run/docker.sock:/var/scalyr/docker.sock".to_string()));
}

#[test]
fn test_container_names_embed_mode_and_build() {
    let config = config_fixture(LogMode::Syslog);
    for name in [
        config.agent_name(),
        config.uploader_name(),
        config.verifier_name(),
    ] {
        assert!(name.contains("docker-syslog"));
        assert!(name.contains(BUILD_NUM));
    }
}

#[test]
fn test_verifier_command_references_script_url() {
    let config = config_fixture(LogMode::Api);
    let command = config.runner_command(TestRole::Verifier);
    assert!(command.contains(&config.script_url()));
    assert!(command.contains(&format!("{}", config.max_wait_secs)));
}

#[test]
fn test_specs_use_distinct_names() {
    let config = config_fixture(LogMode::JsonFile);
    let names = [
        agent_spec(&config).name,
        uploader_spec(&config).name,
        verifier_spec(&config).name,
    ];
    assert_ne!(names[0], names[1]);
    assert_ne!(names[1], names[2]);
    assert_ne!(names[0], names[2]);
}

#[tokio::test]
async fn test_wait_until_running_requires_runtime() {
    let result = wait_until_running(
        &ContainerRuntime::None,
        "missing",
        Duration::from_millis(10),
    )
    .await;
    assert!(matches!(result, Err(ContainerError::NoRuntimeAvailable)));
}

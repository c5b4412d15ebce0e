use clap::Parser;
use smoketest::{run, CiEnv, LogMode, SmoketestConfig};
use tracing::error;

#[derive(Parser)]
#[command(name = "smoketest")]
#[command(about = "Three-container end-to-end smoketest for dockerized agent images")]
struct Cli {
    /// Image used for the uploader and verifier containers
    smoketest_image: String,
    /// Log collection mode: docker-syslog, docker-json or docker-api
    log_mode: String,
    /// Maximum seconds the verifier waits for the uploaded lines
    max_wait_secs: u64,
    /// Agent image under test
    tested_image: String,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    // Mode and environment are validated before any container operation; a
    // bad configuration exits 1 without touching the runtime.
    let mode: LogMode = match cli.log_mode.parse() {
        Ok(mode) => mode,
        Err(e) => {
            error!("{}", e);
            std::process::exit(1);
        }
    };
    let env = match CiEnv::from_env() {
        Ok(env) => env,
        Err(e) => {
            error!("{}", e);
            std::process::exit(1);
        }
    };

    let config = SmoketestConfig {
        smoketest_image: cli.smoketest_image,
        mode,
        max_wait_secs: cli.max_wait_secs,
        tested_image: cli.tested_image,
        env,
    };

    match run(&config).await {
        Ok(code) => std::process::exit(code),
        Err(e) => {
            error!("smoketest aborted: {}", e);
            std::process::exit(1);
        }
    }
}

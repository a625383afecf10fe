// Path: crates/node/src/bin/canopyd.rs
#![cfg_attr(
    not(test),
    deny(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::panic,
        clippy::unimplemented,
        clippy::todo,
        clippy::indexing_slicing
    )
)]

use std::path::PathBuf;

use clap::Parser;
use tracing::{error, info};

use canopy_node::config::DaemonConfig;
use canopy_node::daemon::Daemon;

const EXIT_SUCCESS: i32 = 0;
const EXIT_INIT_FAILURE: i32 = 1;
const EXIT_RUNTIME_FAILURE: i32 = 2;

#[derive(Parser, Debug)]
#[clap(name = "canopyd", about = "The Canopy virtual filesystem daemon")]
struct Opts {
    #[clap(
        long,
        env = "CANOPYD_CONFIG",
        default_value = "canopyd.toml",
        help = "Path to the daemon configuration file"
    )]
    config: PathBuf,
}

fn main() {
    std::process::exit(run());
}

#[tokio::main]
async fn run() -> i32 {
    let opts = Opts::parse();

    // Initialize tracing FIRST so every later failure is logged.
    if let Err(err) = canopy_node::telemetry::init_tracing() {
        eprintln!("failed to initialize logging: {err:#}");
        return EXIT_INIT_FAILURE;
    }

    let config = match DaemonConfig::load(&opts.config) {
        Ok(config) => config,
        Err(err) => {
            error!(error = %format!("{err:#}"), "configuration failure");
            return EXIT_INIT_FAILURE;
        }
    };

    let daemon = match Daemon::start(config).await {
        Ok(daemon) => daemon,
        Err(err) => {
            error!(error = %format!("{err:#}"), "initialization failure");
            return EXIT_INIT_FAILURE;
        }
    };

    let info = daemon.management().info();
    info!(pid = info.pid, mounts = info.mount_points.len(), "canopyd serving");

    match daemon.serve().await {
        Ok(()) => EXIT_SUCCESS,
        Err(err) => {
            error!(error = %format!("{err:#}"), "runtime failure");
            EXIT_RUNTIME_FAILURE
        }
    }
}

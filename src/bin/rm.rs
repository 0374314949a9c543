//! Central resource manager binary (§6): binds the control socket, boots
//! the orchestrator, and runs until `SIGINT`/`SIGTERM`.

use std::net::SocketAddr;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tracing::{error, info};

use rscmng::cli::RmArgs;
use rscmng::config::Config;
use rscmng::logging;
use rscmng::orchestrator::Orchestrator;
use rscmng::utils::{install_shutdown_handler, shutdown_requested};

/// The orchestrator's own protocol `source_id`; distinct from any
/// `CLIENT_ID` since the RM is not itself a unit in `UNIT_SETTINGS`.
const RM_SOURCE_ID: u32 = 0;

fn main() -> ExitCode {
    let args = RmArgs::parse();
    let host_label = args.host_name.clone().unwrap_or_else(|| "rm".to_string());
    let _log_guard = logging::init("rm", &host_label, args.verbose, args.quiet);

    let config = match Config::load(&args.config) {
        Ok(config) => Arc::new(config),
        Err(err) => {
            error!(error = %err, "failed to load configuration");
            return ExitCode::FAILURE;
        }
    };

    let unit = match &args.host_name {
        Some(name) => config.unit_settings_for_host(name),
        None => config
            .units
            .first()
            .ok_or_else(|| rscmng::error::ConfigError::UnknownHost {
                host_name: "<none configured>".to_string(),
            }),
    };
    let unit = match unit {
        Ok(unit) => unit,
        Err(err) => {
            error!(error = %err, "no unit settings available to determine the RM bind address");
            return ExitCode::FAILURE;
        }
    };

    let bind_addr: SocketAddr = match format!("{}:{}", unit.control_rm_ip, unit.control_rm_port).parse() {
        Ok(addr) => addr,
        Err(err) => {
            error!(error = %err, "invalid RM control address in configuration");
            return ExitCode::FAILURE;
        }
    };

    let orchestrator = match Orchestrator::spawn(config, bind_addr, RM_SOURCE_ID) {
        Ok(orchestrator) => orchestrator,
        Err(err) => {
            error!(error = %err, "failed to start orchestrator");
            return ExitCode::FAILURE;
        }
    };

    install_shutdown_handler();
    info!(bind_addr = %bind_addr, "resource manager started");

    while !shutdown_requested() {
        std::thread::sleep(Duration::from_millis(200));
    }

    info!("shutdown requested, stopping orchestrator");
    orchestrator.stop();
    ExitCode::SUCCESS
}

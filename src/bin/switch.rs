//! Switch client binary (§6, §4.5): a degenerate `ClientAgent` with no
//! traffic generator — `RECONFIGURE` turns into a call to `apply_mode`.

use std::net::SocketAddr;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tracing::{error, info};

use rscmng::agent::ClientAgent;
use rscmng::cli::SwitchArgs;
use rscmng::config::Config;
use rscmng::effect::{probe_link_rate, LoggingModeApplier, SwitchHandle};
use rscmng::logging;
use rscmng::transport::ControlTransport;
use rscmng::utils::{install_shutdown_handler, shutdown_requested};

fn main() -> ExitCode {
    let args = SwitchArgs::parse();
    let _log_guard = logging::init("switch", &args.host_name, args.verbose, args.quiet);

    let config = match Config::load(&args.config) {
        Ok(config) => config,
        Err(err) => {
            error!(error = %err, "failed to load configuration");
            return ExitCode::FAILURE;
        }
    };

    let unit = match config.unit_settings_for_host(&args.host_name) {
        Ok(unit) => unit,
        Err(err) => {
            error!(error = %err, "unknown host");
            return ExitCode::FAILURE;
        }
    };

    let control_local: SocketAddr =
        match format!("{}:{}", unit.control_local_ip, unit.control_local_port).parse() {
            Ok(addr) => addr,
            Err(err) => {
                error!(error = %err, "invalid control local address in configuration");
                return ExitCode::FAILURE;
            }
        };
    let rm_addr: SocketAddr = match format!("{}:{}", unit.control_rm_ip, unit.control_rm_port).parse() {
        Ok(addr) => addr,
        Err(err) => {
            error!(error = %err, "invalid RM control address in configuration");
            return ExitCode::FAILURE;
        }
    };

    let control = match ControlTransport::bind(control_local) {
        Ok(control) => Arc::new(control),
        Err(err) => {
            error!(error = %err, "failed to bind control socket");
            return ExitCode::FAILURE;
        }
    };

    if let Some(interface) = &unit.network_interface {
        probe_link_rate(interface);
    }

    // A switch client owns no traffic-generator service of its own, so it
    // registers under its unit's client_id as its service identity (§6).
    let service_id = unit.client_id as u64;

    let effects = SwitchHandle::new(LoggingModeApplier, config.experiment.experiment_number);
    let agent = ClientAgent::new(
        control,
        rm_addr,
        args.host_name.clone(),
        unit.client_id,
        service_id,
        effects,
    );

    if let Err(err) = agent.register() {
        error!(error = %err, "failed to register with the resource manager");
        return ExitCode::FAILURE;
    }
    info!(host = %args.host_name, service_id, "switch client registered");

    let shutdown_agent = agent.clone();
    let shutdown_watcher = std::thread::spawn(move || {
        while !shutdown_requested() {
            std::thread::sleep(Duration::from_millis(200));
        }
        shutdown_agent.stop();
    });
    install_shutdown_handler();

    agent.run();
    let _ = shutdown_watcher.join();

    info!("switch client shutting down");
    ExitCode::SUCCESS
}

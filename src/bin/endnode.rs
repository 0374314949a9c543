//! Endnode traffic-generator client binary (§6, §4.7): runs one
//! `ClientAgent` driving one `GeneratorHandle` for a single service.

use std::net::{SocketAddr, UdpSocket};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tracing::{error, info};

use rscmng::agent::ClientAgent;
use rscmng::cli::EndnodeArgs;
use rscmng::config::Config;
use rscmng::generator::{self, GeneratorConfig, GeneratorHandle};
use rscmng::logging;
use rscmng::transport::ControlTransport;
use rscmng::utils::{install_shutdown_handler, shutdown_requested, spawn_with_affinity};

fn main() -> ExitCode {
    let args = EndnodeArgs::parse();
    let _log_guard = logging::init("endnode", &args.host_name, args.verbose, args.quiet);

    let config = match Config::load(&args.config) {
        Ok(config) => Arc::new(config),
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

    let initial_mode = config.experiment.resolve_startup_mode(unit.client_id);
    let service_local: SocketAddr = format!(
        "{}:{}",
        unit.service_local_ip.first().map(String::as_str).unwrap_or("0.0.0.0"),
        unit.service_local_port.first().copied().unwrap_or(0),
    )
    .parse()
    .unwrap_or_else(|_| "0.0.0.0:0".parse().unwrap());

    let data_socket = match UdpSocket::bind(service_local) {
        Ok(socket) => socket,
        Err(err) => {
            error!(error = %err, "failed to bind data-plane socket");
            return ExitCode::FAILURE;
        }
    };

    let priority = match config.service_settings(args.service_id, initial_mode) {
        Ok(settings) => settings.priority as u8,
        Err(err) => {
            error!(error = %err, "no service settings for the requested service/mode");
            return ExitCode::FAILURE;
        }
    };

    let generator_handle = GeneratorHandle::new(initial_mode);
    let generator_config = GeneratorConfig {
        service_id: args.service_id,
        source_id: unit.client_id,
        priority,
        initial_mode,
        config: config.clone(),
    };

    let core_id = config.experiment.generator_core_id;
    let handle_for_generator = generator_handle.clone();
    let generator_thread = spawn_with_affinity(core_id, move || {
        generator::run(handle_for_generator, data_socket, generator_config)
    });

    let agent = ClientAgent::new(
        control,
        rm_addr,
        args.host_name.clone(),
        unit.client_id,
        args.service_id,
        generator_handle.clone(),
    );

    if let Err(err) = agent.register() {
        error!(error = %err, "failed to register with the resource manager");
        return ExitCode::FAILURE;
    }
    info!(host = %args.host_name, service_id = args.service_id, "endnode registered");

    let shutdown_agent = agent.clone();
    let shutdown_watcher = std::thread::spawn(move || {
        while !shutdown_requested() {
            std::thread::sleep(Duration::from_millis(200));
        }
        shutdown_agent.stop();
    });
    install_shutdown_handler();

    agent.run();
    generator_handle.stop();

    let _ = shutdown_watcher.join();
    match generator_thread.join() {
        Ok(Ok(())) => {}
        Ok(Err(err)) => error!(error = %err, "generator thread exited with an error"),
        Err(_) => error!("generator thread panicked"),
    }

    info!("endnode shutting down");
    ExitCode::SUCCESS
}

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use clap_derive::Parser;
use gw_common::config::Config;
use gw_common::error::exit_code;
use gw_common::telemetry::init_tracing;
use gw_gateway::connection::{begin_graceful_shutdown, handle_connection, run_heartbeat_ticker};
use gw_gateway::GatewayState;
use tokio::net::TcpListener;
use tokio::select;
use tokio::signal::unix::{signal, SignalKind};
use tracing::{error, info};

#[derive(Parser, Debug)]
struct Args {
    #[arg(long, value_name = "config-file", help = "Path to a YAML config file")]
    config: Option<PathBuf>,

    #[arg(long, help = "Override the TCP listen port")]
    port: Option<u16>,

    #[arg(long, help = "Enable debug logging", default_value = "false")]
    debug: bool,
}

#[tokio::main(flavor = "multi_thread")]
async fn main() -> eyre::Result<()> {
    color_eyre::install()?;
    let args = Args::parse();

    init_tracing(args.debug)?;

    let mut config = match Config::load(args.config.as_deref()) {
        Ok(config) => config,
        Err(err) => {
            error!(%err, "invalid configuration");
            std::process::exit(exit_code::CONFIG_INVALID);
        }
    };
    if let Some(port) = args.port {
        config.server.tcp.port = port;
    }

    let mut hup_signal = signal(SignalKind::hangup())?;
    let mut int_signal = signal(SignalKind::interrupt())?;
    let mut term_signal = signal(SignalKind::terminate())?;

    let zmq_ctx = tmq::Context::new();
    let state = match GatewayState::connect(config, &zmq_ctx).await {
        Ok(state) => state,
        Err(err) => {
            error!(%err, "failed to reach game nodes at startup");
            std::process::exit(exit_code::PEER_UNREACHABLE);
        }
    };

    let listen_addr = format!("0.0.0.0:{}", state.config.server.tcp.port);
    let listener = match TcpListener::bind(&listen_addr).await {
        Ok(listener) => listener,
        Err(err) => {
            error!(%err, %listen_addr, "failed to bind tcp listener");
            std::process::exit(exit_code::BIND_FAILURE);
        }
    };
    info!(%listen_addr, "gateway listening");

    let drain_timeout = state.config.server.shutdown.drain_timeout();

    let heartbeat = tokio::spawn(run_heartbeat_ticker(
        Arc::clone(&state.registry),
        state.config.server.heartbeat.interval(),
        state.config.server.heartbeat.timeout(),
    ));

    let health_check_state = Arc::clone(&state);
    let health_check_interval = state.config.server.heartbeat.interval();
    let node_health_check = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(health_check_interval);
        loop {
            ticker.tick().await;
            health_check_state.health_check_all_nodes().await;
        }
    });

    let accept_state = Arc::clone(&state);
    let accept_loop = tokio::spawn(async move {
        loop {
            match listener.accept().await {
                Ok((socket, peer_addr)) => {
                    let state = Arc::clone(&accept_state);
                    tokio::spawn(handle_connection(state, socket, peer_addr));
                }
                Err(err) => {
                    tracing::warn!(%err, "accept failed");
                }
            }
        }
    });

    let signaled = select! {
        _ = &mut accept_loop => {
            info!("accept loop exited");
            false
        }
        _ = &mut heartbeat => {
            info!("heartbeat ticker exited");
            false
        }
        _ = &mut node_health_check => {
            info!("node health check loop exited");
            false
        }
        _ = hup_signal.recv() => {
            info!("HUP received, stopping");
            true
        }
        _ = int_signal.recv() => {
            info!("SIGINT received, stopping");
            true
        }
        _ = term_signal.recv() => {
            info!("SIGTERM received, stopping");
            true
        }
    };

    // Refuse new connections before draining: abort the accept loop so no
    // further `handle_connection` tasks are spawned while existing
    // sessions are given a chance to flush and close on their own.
    accept_loop.abort();
    heartbeat.abort();
    node_health_check.abort();

    begin_graceful_shutdown(&state.registry, drain_timeout).await;
    info!("gateway shut down");

    if signaled {
        std::process::exit(exit_code::SIGNALED_SHUTDOWN);
    }
    Ok(())
}

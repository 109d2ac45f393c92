use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use clap_derive::Parser;
use gw_common::config::Config;
use gw_common::error::exit_code;
use gw_common::skill::{SkillDef, SkillId};
use gw_common::telemetry::init_tracing;
use gw_common::SkillTable;
use gw_game::aoi_hub::AoiHub;
use gw_game::handler::GameHandler;
use gw_game::PlayerDirectory;
use gw_persistence::{FlushPolicy, PersistenceGateway, StoreBackendConfig, StoreFactory};
use gw_rpc::transport::RpcTransport;
use tokio::signal::unix::{signal, SignalKind};
use tokio::time::interval;
use tracing::{error, info};

#[derive(Parser, Debug)]
struct Args {
    #[arg(long, value_name = "config-file", help = "Path to a YAML config file")]
    config: Option<PathBuf>,

    #[arg(long, help = "Override this node's RPC (ROUTER) listen endpoint")]
    rpc_addr: Option<String>,

    #[arg(long, help = "Override this node's events (PUB) listen endpoint")]
    events_addr: Option<String>,

    #[arg(long, help = "Enable debug logging", default_value = "false")]
    debug: bool,
}

/// Placeholder content table until skills are loaded from real game
/// content; gives `CastSkill` something to resolve in the meantime.
fn default_skill_table() -> SkillTable {
    let mut table = SkillTable::new();
    table.insert(
        SkillId(1),
        SkillDef {
            damage_base: 20,
            crit_base: 0.1,
            cooldown: Duration::from_secs(2),
            range: 15.0,
        },
    );
    table
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
    let rpc_addr = args
        .rpc_addr
        .unwrap_or_else(|| config.rpc.game_nodes.first().cloned().unwrap_or_default());
    let events_addr = args
        .events_addr
        .unwrap_or_else(|| config.rpc.game_event_nodes.first().cloned().unwrap_or_default());
    config.rpc.num_workers = config.rpc.num_workers.max(1);

    let store = if config.store.uri.starts_with("memory") {
        StoreFactory::in_memory_only()
    } else {
        match StoreFactory::create(StoreBackendConfig::WithFjallPersistence {
            path: PathBuf::from(&config.store.uri),
        }) {
            Ok(store) => store,
            Err(err) => {
                error!(%err, "failed to open persistence store");
                std::process::exit(exit_code::BIND_FAILURE);
            }
        }
    };
    let persistence = Arc::new(PersistenceGateway::new(
        store,
        FlushPolicy {
            flush_interval: config.persistence.flush_interval(),
            flush_threshold: config.persistence.flush_threshold,
            disconnect_grace: config.persistence.disconnect_grace(),
        },
    ));

    let directory = Arc::new(PlayerDirectory::new());

    let zmq_context = zmq::Context::new();
    let kill_switch = Arc::new(AtomicBool::new(false));
    let rpc_transport = match RpcTransport::new(zmq_context.clone(), &events_addr, Arc::clone(&kill_switch)) {
        Ok(transport) => Arc::new(transport),
        Err(err) => {
            error!(%err, %events_addr, "failed to bind events publisher");
            std::process::exit(exit_code::BIND_FAILURE);
        }
    };

    let aoi = AoiHub::new(config.aoi.clone(), Arc::clone(&rpc_transport), Arc::clone(&directory));
    let maps = Arc::new(gw_game::mapdata::MapTable::new(config.maps.clone()));

    let handler = Arc::new(GameHandler::new(
        Arc::clone(&directory),
        Arc::clone(&aoi),
        Arc::clone(&maps),
        Arc::clone(&persistence),
        Arc::new(default_skill_table()),
        config.movement.clone(),
        config.combat.clone(),
        256,
        config.rpc.deadline(),
    ));

    info!(%rpc_addr, %events_addr, "game node starting");

    let request_loop_transport = Arc::clone(&rpc_transport);
    let num_workers = config.rpc.num_workers;
    let request_loop = tokio::task::spawn_blocking(move || {
        request_loop_transport.start_request_loop(&rpc_addr, num_workers, handler)
    });

    let flush_interval = config.persistence.flush_interval();
    let flush_persistence = Arc::clone(&persistence);
    let flush_loop = tokio::spawn(async move {
        let mut ticker = interval(flush_interval);
        loop {
            ticker.tick().await;
            let flushed = flush_persistence.flush_dirty();
            if flushed > 0 {
                info!(flushed, "periodic flush completed");
            }
            for player_id in flush_persistence.sweep_expired_grace() {
                info!(%player_id, "disconnect grace expired, player evicted");
            }
        }
    });

    let mut hup_signal = signal(SignalKind::hangup())?;
    let mut int_signal = signal(SignalKind::interrupt())?;
    let mut term_signal = signal(SignalKind::terminate())?;

    let signaled = tokio::select! {
        result = request_loop => {
            match result {
                Ok(Ok(())) => info!("rpc request loop exited"),
                Ok(Err(err)) => tracing::error!(%err, "rpc request loop exited with error"),
                Err(err) => tracing::error!(%err, "rpc request loop task panicked"),
            }
            false
        }
        _ = flush_loop => {
            info!("flush loop exited");
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

    kill_switch.store(true, Ordering::Relaxed);
    info!("game node shut down");
    if signaled {
        std::process::exit(exit_code::SIGNALED_SHUTDOWN);
    }
    Ok(())
}

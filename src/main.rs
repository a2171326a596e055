// Use the library crate
use fwctl::config::load_config;
use fwctl::dispatch::{build_backend, NotifyMessage};
use fwctl::orchestrator::FirewallOrchestrator;
use fwctl::socket::SocketHandler;
use fwctl::store::MemoryStore;
use fwctl::types::{AgentMessage, AppError, ControlCommand, Result};

use clap::Parser;
use log::{error, info};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::mpsc;

const COMMAND_CHANNEL_SIZE: usize = 10;

#[derive(Parser, Debug)]
#[command(name = "fwctl", about = "Firewall policy control-plane service")]
struct Args {
    /// Path to the YAML configuration file.
    #[arg(short, long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();
    info!("Starting fwctl...");

    let mut sigterm =
        signal(SignalKind::terminate()).expect("Failed to create SIGTERM signal stream");
    let mut sigint =
        signal(SignalKind::interrupt()).expect("Failed to create SIGINT signal stream");

    let config = load_config(args.config.as_deref())
        .map_err(|e| AppError::Config(format!("Failed to load configuration: {}", e)))?;

    let store = Arc::new(MemoryStore::new());
    let backend = build_backend(&config.backend)?;

    // The orchestrator Arc is what an API surface (REST, RPC) would hold;
    // none is wired in this daemon, so it only backs the control socket.
    let orchestrator = Arc::new(FirewallOrchestrator::new(
        store,
        backend.fanout,
        backend.notifier,
    ));

    // Drain the backend queues. The consumers stand in for the opaque
    // agent/NFV transports: messages are logged and dropped.
    let agent_handle = backend.agent_rx.map(|mut rx| {
        tokio::spawn(async move {
            while let Some(msg) = rx.recv().await {
                match msg {
                    AgentMessage::UpdateFirewall(snapshot) => {
                        info!(
                            "agent fanout: update firewall {} ({} rule(s))",
                            snapshot.id,
                            snapshot.firewall_rule_list.len()
                        );
                    }
                    AgentMessage::DeleteFirewall(snapshot) => {
                        info!("agent fanout: delete firewall {}", snapshot.id);
                    }
                }
            }
        })
    });
    let notify_handle = backend.notify_rx.map(|mut rx| {
        tokio::spawn(async move {
            while let Some(NotifyMessage {
                config_handle_id,
                slug,
                payload,
            }) = rx.recv().await
            {
                info!(
                    "consumer notify: handle {} ({}): {:?}",
                    config_handle_id, slug, payload
                );
            }
        })
    });

    let (command_tx, mut command_rx) = mpsc::channel(COMMAND_CHANNEL_SIZE);
    let socket_handler = SocketHandler::new(config.socket_path.as_deref(), command_tx).await?;

    info!("Starting control socket handler...");
    let socket_handle = tokio::spawn(async move {
        if let Err(e) = socket_handler.start().await {
            error!("Socket handler failed: {}", e);
        }
    });

    info!("Starting main event loop...");
    loop {
        tokio::select! {
            Some(command) = command_rx.recv() => {
                match command {
                    ControlCommand::Status { response_tx } => {
                        let firewalls = orchestrator
                            .list_firewalls(&Default::default())
                            .map_or(0, |v| v.len());
                        let policies = orchestrator
                            .list_firewall_policies(&Default::default())
                            .map_or(0, |v| v.len());
                        let rules = orchestrator
                            .list_firewall_rules(&Default::default())
                            .map_or(0, |v| v.len());
                        let network_functions = orchestrator
                            .list_network_functions(&Default::default())
                            .map_or(0, |v| v.len());
                        let config_handles = orchestrator
                            .list_config_handles(&Default::default())
                            .map_or(0, |v| v.len());
                        let report = format!(
                            "Current Status:\n  Firewalls: {}\n  Policies: {}\n  Rules: {}\n  Network functions: {}\n  Config handles: {}",
                            firewalls, policies, rules, network_functions, config_handles
                        );
                        if response_tx.send(report).is_err() {
                            error!("Failed to send status response back to socket handler.");
                        }
                    }
                    ControlCommand::Ping { response_tx } => {
                        if response_tx.send("PONG".to_string()).is_err() {
                            error!("Failed to send pong response back to socket handler.");
                        }
                    }
                    ControlCommand::Shutdown => {
                        info!("Shutdown command received. Initiating graceful shutdown...");
                        break;
                    }
                }
            }

            _ = sigterm.recv() => {
                info!("Received SIGTERM. Initiating graceful shutdown...");
                break;
            }
            _ = sigint.recv() => {
                info!("Received SIGINT. Initiating graceful shutdown...");
                break;
            }

            else => {
                info!("All channels closed, shutting down.");
                break;
            }
        }
    }

    info!("Shutting down background tasks...");
    socket_handle.abort();
    if let Some(handle) = agent_handle {
        handle.abort();
    }
    if let Some(handle) = notify_handle {
        handle.abort();
    }

    info!("Shutdown complete.");
    Ok(())
}

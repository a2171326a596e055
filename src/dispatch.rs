use crate::config::BackendConfig;
use crate::store::EntityStore;
use crate::types::{
    AgentMessage, AppError, ConfigMode, DispatchEvent, FirewallSnapshot, NotifyRequest, Result,
};
use std::sync::Arc;
use tokio::sync::mpsc;
use uuid::Uuid;

/// Broadcast channel toward per-host agents. Fire-and-forget: no
/// acknowledgment, no retry. Failures are reported to the router and go
/// no further than a log line.
pub trait FanoutChannel: Send + Sync {
    fn update(&self, snapshot: &FirewallSnapshot) -> Result<()>;
    fn delete(&self, snapshot: &FirewallSnapshot) -> Result<()>;
}

/// Single logical message to one external config consumer, keyed by
/// config-handle id. Same best-effort semantics as the fanout channel.
pub trait NotifyChannel: Send + Sync {
    fn notify(&self, config_handle_id: Uuid, slug: &str, payload: &NotifyRequest) -> Result<()>;
}

/// Message handed to the notify consumer task.
#[derive(Debug, Clone, PartialEq)]
pub struct NotifyMessage {
    pub config_handle_id: Uuid,
    pub slug: String,
    pub payload: NotifyRequest,
}

/// Bounded-queue fanout adapter. `try_send` keeps dispatch non-blocking;
/// when the consumer falls behind the newest message is dropped and the
/// overflow is reported as a dispatch error.
pub struct QueueFanout {
    tx: mpsc::Sender<AgentMessage>,
}

impl FanoutChannel for QueueFanout {
    fn update(&self, snapshot: &FirewallSnapshot) -> Result<()> {
        self.tx
            .try_send(AgentMessage::UpdateFirewall(snapshot.clone()))
            .map_err(|e| AppError::BackendDispatch(format!("fanout update not queued: {}", e)))
    }

    fn delete(&self, snapshot: &FirewallSnapshot) -> Result<()> {
        self.tx
            .try_send(AgentMessage::DeleteFirewall(snapshot.clone()))
            .map_err(|e| AppError::BackendDispatch(format!("fanout delete not queued: {}", e)))
    }
}

pub struct QueueNotifier {
    tx: mpsc::Sender<NotifyMessage>,
}

impl NotifyChannel for QueueNotifier {
    fn notify(&self, config_handle_id: Uuid, slug: &str, payload: &NotifyRequest) -> Result<()> {
        self.tx
            .try_send(NotifyMessage {
                config_handle_id,
                slug: slug.to_string(),
                payload: payload.clone(),
            })
            .map_err(|e| AppError::BackendDispatch(format!("notify not queued: {}", e)))
    }
}

/// Log-only adapters for running without any agent transport attached.
pub struct LogFanout;

impl FanoutChannel for LogFanout {
    fn update(&self, snapshot: &FirewallSnapshot) -> Result<()> {
        tracing::info!(
            "fanout update: firewall {} with {} rule(s)",
            snapshot.id,
            snapshot.firewall_rule_list.len()
        );
        Ok(())
    }

    fn delete(&self, snapshot: &FirewallSnapshot) -> Result<()> {
        tracing::info!("fanout delete: firewall {}", snapshot.id);
        Ok(())
    }
}

pub struct LogNotifier;

impl NotifyChannel for LogNotifier {
    fn notify(&self, config_handle_id: Uuid, slug: &str, payload: &NotifyRequest) -> Result<()> {
        tracing::info!(
            "notify consumer for handle {} ({}): {:?}",
            config_handle_id,
            slug,
            payload
        );
        Ok(())
    }
}

/// Channels resolved from the backend strategy named in the application
/// config, plus the consumer ends of the queues when the queue driver is
/// selected.
pub struct Backend {
    pub fanout: Arc<dyn FanoutChannel>,
    pub notifier: Arc<dyn NotifyChannel>,
    pub agent_rx: Option<mpsc::Receiver<AgentMessage>>,
    pub notify_rx: Option<mpsc::Receiver<NotifyMessage>>,
}

/// Resolves a backend strategy name to its channel implementations.
/// Strategy selection happens exactly once, at startup.
pub fn build_backend(config: &BackendConfig) -> Result<Backend> {
    match config.driver.as_str() {
        "queue" => {
            let (agent_tx, agent_rx) = mpsc::channel(config.queue_depth);
            let (notify_tx, notify_rx) = mpsc::channel(config.queue_depth);
            Ok(Backend {
                fanout: Arc::new(QueueFanout { tx: agent_tx }),
                notifier: Arc::new(QueueNotifier { tx: notify_tx }),
                agent_rx: Some(agent_rx),
                notify_rx: Some(notify_rx),
            })
        }
        "log" => Ok(Backend {
            fanout: Arc::new(LogFanout),
            notifier: Arc::new(LogNotifier),
            agent_rx: None,
            notify_rx: None,
        }),
        other => Err(AppError::Configuration(format!(
            "unknown backend driver '{}' (expected 'queue' or 'log')",
            other
        ))),
    }
}

/// Routes a firewall change to the backend channel selected by the
/// firewall's config handle (or its absence).
pub struct DispatchRouter {
    store: Arc<dyn EntityStore>,
    fanout: Arc<dyn FanoutChannel>,
    notifier: Arc<dyn NotifyChannel>,
}

impl DispatchRouter {
    pub fn new(
        store: Arc<dyn EntityStore>,
        fanout: Arc<dyn FanoutChannel>,
        notifier: Arc<dyn NotifyChannel>,
    ) -> Self {
        DispatchRouter {
            store,
            fanout,
            notifier,
        }
    }

    /// Pushes one snapshot to the backend selected for the firewall.
    ///
    /// The config-handle id is passed explicitly rather than read from the
    /// snapshot so the deletion path can route after the firewall row is
    /// already gone.
    ///
    /// Mode table: no handle routes straight to the agent fanout; NN is
    /// the same with a handle attached; NFV tears down direct enforcement
    /// (fanout delete) and notifies the orchestration layer to pick up
    /// configuration out-of-band; OFC is reserved and deliberately a no-op.
    pub fn dispatch(
        &self,
        config_handle_id: Option<Uuid>,
        snapshot: &FirewallSnapshot,
        event: DispatchEvent,
    ) -> Result<()> {
        let handle = match config_handle_id {
            Some(id) => self.store.get_config_handle(id)?,
            None => {
                return match event {
                    DispatchEvent::Created | DispatchEvent::Updated => self.fanout.update(snapshot),
                    DispatchEvent::Deleted => self.fanout.delete(snapshot),
                };
            }
        };

        let mode: ConfigMode = handle.config_mode.parse()?;
        match (mode, event) {
            (ConfigMode::Nfv, DispatchEvent::Created | DispatchEvent::Updated) => {
                // Direct enforcement is superseded by orchestration.
                self.fanout.delete(snapshot)?;
                self.notifier
                    .notify(handle.id, "firewall", &NotifyRequest::modified(handle.id))
            }
            (ConfigMode::Nfv, DispatchEvent::Deleted) => {
                self.notifier
                    .notify(handle.id, "firewall", &NotifyRequest::modified(handle.id))
            }
            (ConfigMode::Nn, DispatchEvent::Created | DispatchEvent::Updated) => {
                self.fanout.update(snapshot)
            }
            (ConfigMode::Nn, DispatchEvent::Deleted) => self.fanout.delete(snapshot),
            (ConfigMode::Ofc, _) => {
                tracing::debug!(
                    "OFC handle {}: consumer notification not integrated, skipping",
                    handle.id
                );
                Ok(())
            }
        }
    }
}

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use tokio::sync::mpsc;
use uuid::Uuid;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Config(String),
    #[error("{kind} {id} not found")]
    NotFound { kind: &'static str, id: Uuid },
    #[error("Validation error: {0}")]
    Validation(String),
    #[error("Backend configuration error: {0}")]
    Configuration(String),
    #[error("Backend dispatch error: {0}")]
    BackendDispatch(String),
    #[error("Socket error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Channel send error: {0}")]
    ChannelSend(String),
    #[error("Channel receive error: {0}")]
    ChannelRecv(String),
    #[error("Anyhow error: {0}")]
    Anyhow(#[from] anyhow::Error), // General errors
}

impl AppError {
    pub fn not_found(kind: &'static str, id: Uuid) -> Self {
        AppError::NotFound { kind, id }
    }
}

// --- Entity Types ---

/// Identifies an enforcement target type. No cascading effect on firewalls.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NetworkFunction {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub name: String,
    pub description: String,
    pub shared: bool,
}

/// Binds a tenant's configuration intent to a delivery mode.
///
/// `config_mode` is stored as the raw string the caller supplied; it is
/// parsed into [`ConfigMode`] at routing time so an unrecognized value
/// surfaces as a server-side configuration fault, not a storage error.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfigHandle {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub name: String,
    pub shared: bool,
    pub config_mode: String,
}

/// Delivery mode selected by a config handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigMode {
    /// Orchestrated: tear down direct enforcement, notify the NFV layer.
    Nfv,
    /// Direct fanout to per-host agents.
    Nn,
    /// Reserved for a future consumer-notification integration.
    Ofc,
}

impl FromStr for ConfigMode {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "NFV" => Ok(ConfigMode::Nfv),
            "NN" => Ok(ConfigMode::Nn),
            "OFC" => Ok(ConfigMode::Ofc),
            other => Err(AppError::Configuration(format!(
                "unrecognized config_mode '{}'",
                other
            ))),
        }
    }
}

impl fmt::Display for ConfigMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigMode::Nfv => write!(f, "NFV"),
            ConfigMode::Nn => write!(f, "NN"),
            ConfigMode::Ofc => write!(f, "OFC"),
        }
    }
}

/// A single match/action entry. The match attributes are opaque to the
/// orchestration core; they are carried through to backends unmodified.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FirewallRule {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub name: String,
    pub description: String,
    pub shared: bool,
    pub protocol: Option<String>,
    pub source_ip_address: Option<String>,
    pub destination_ip_address: Option<String>,
    pub source_port: Option<String>,
    pub destination_port: Option<String>,
    pub action: String,
    pub enabled: bool,
    pub firewall_policy_id: Option<Uuid>,
}

/// An ordered sequence of rule ids. Order defines evaluation precedence.
///
/// `firewall_list` is derived at read time from the firewalls currently
/// referencing the policy; it is never written directly.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FirewallPolicy {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub name: String,
    pub description: String,
    pub shared: bool,
    pub audited: bool,
    pub firewall_rules: Vec<Uuid>,
    pub firewall_list: Vec<Uuid>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FirewallStatus {
    #[serde(rename = "ACTIVE")]
    Active,
    #[serde(rename = "PENDING_CREATE")]
    PendingCreate,
    #[serde(rename = "PENDING_UPDATE")]
    PendingUpdate,
    #[serde(rename = "PENDING_DELETE")]
    PendingDelete,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Firewall {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub name: String,
    pub description: String,
    pub admin_state_up: bool,
    pub firewall_policy_id: Option<Uuid>,
    pub config_handle_id: Option<Uuid>,
    pub status: FirewallStatus,
}

/// Denormalized firewall view sent to enforcement backends: the firewall
/// plus its fully resolved rule bodies in policy order. Rebuilt on demand,
/// never cached across calls.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FirewallSnapshot {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub name: String,
    pub admin_state_up: bool,
    pub firewall_policy_id: Option<Uuid>,
    pub config_handle_id: Option<Uuid>,
    pub status: FirewallStatus,
    pub firewall_rule_list: Vec<FirewallRule>,
}

// --- Creation specs and patches ---

#[derive(Debug, Clone, Default, Deserialize)]
pub struct FirewallSpec {
    pub tenant_id: Option<Uuid>,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default = "default_true")]
    pub admin_state_up: bool,
    pub firewall_policy_id: Option<Uuid>,
    pub config_handle_id: Option<Uuid>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct FirewallPatch {
    pub name: Option<String>,
    pub description: Option<String>,
    pub admin_state_up: Option<bool>,
    pub firewall_policy_id: Option<Option<Uuid>>,
    pub config_handle_id: Option<Option<Uuid>>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PolicySpec {
    pub tenant_id: Option<Uuid>,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub shared: bool,
    #[serde(default)]
    pub audited: bool,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PolicyPatch {
    pub name: Option<String>,
    pub description: Option<String>,
    pub shared: Option<bool>,
    pub audited: Option<bool>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RuleSpec {
    pub tenant_id: Option<Uuid>,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub shared: bool,
    pub protocol: Option<String>,
    pub source_ip_address: Option<String>,
    pub destination_ip_address: Option<String>,
    pub source_port: Option<String>,
    pub destination_port: Option<String>,
    pub action: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RulePatch {
    pub name: Option<String>,
    pub description: Option<String>,
    pub shared: Option<bool>,
    pub protocol: Option<Option<String>>,
    pub source_ip_address: Option<Option<String>>,
    pub destination_ip_address: Option<Option<String>>,
    pub source_port: Option<Option<String>>,
    pub destination_port: Option<Option<String>>,
    pub action: Option<String>,
    pub enabled: Option<bool>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct NetworkFunctionSpec {
    pub tenant_id: Option<Uuid>,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub shared: bool,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct NetworkFunctionPatch {
    pub name: Option<String>,
    pub description: Option<String>,
    pub shared: Option<bool>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ConfigHandleSpec {
    pub tenant_id: Option<Uuid>,
    pub name: String,
    #[serde(default)]
    pub shared: bool,
    pub config_mode: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ConfigHandlePatch {
    pub name: Option<String>,
    pub shared: Option<bool>,
    pub config_mode: Option<String>,
}

fn default_true() -> bool {
    true
}

/// Where to place a rule in a policy's evaluation sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RulePosition {
    First,
    Last,
    Before(Uuid),
    After(Uuid),
}

// --- Bulk pull (generate-config) wire shapes ---

/// Request shape used by an external polling consumer. Field names are
/// part of the wire contract and must not change.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigRequest {
    pub config_handle_id: Uuid,
    pub slug: String,
    pub version: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigResponse {
    pub config_handle_id: Uuid,
    pub slug: String,
    pub version: String,
    pub header: String,
    pub response: Vec<FirewallSnapshot>,
}

// --- Events and Commands ---

/// What happened to a firewall, from the backend's point of view.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchEvent {
    Created,
    Updated,
    Deleted,
}

/// Message broadcast to per-host agents over the fanout channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum AgentMessage {
    UpdateFirewall(FirewallSnapshot),
    DeleteFirewall(FirewallSnapshot),
}

/// Out-of-band notification asking a config consumer to re-pull.
/// Mirrors the notifier's request envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotifyRequest {
    pub header: String,
    pub config_handle_id: Uuid,
    pub slug: String,
    pub version: String,
}

impl NotifyRequest {
    pub fn modified(config_handle_id: Uuid) -> Self {
        NotifyRequest {
            header: "request".to_string(),
            config_handle_id,
            slug: "firewall".to_string(),
            version: "0.0".to_string(),
        }
    }
}

#[derive(Debug)]
pub enum ControlCommand {
    Status {
        response_tx: tokio::sync::oneshot::Sender<String>,
    },
    Ping {
        response_tx: tokio::sync::oneshot::Sender<String>,
    },
    Shutdown,
}

// --- Type Aliases ---
pub type Result<T> = std::result::Result<T, AppError>;
pub type CommandSender = mpsc::Sender<ControlCommand>;
pub type CommandReceiver = mpsc::Receiver<ControlCommand>;

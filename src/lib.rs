// Declare the modules that form the library's structure
pub mod config;
pub mod dispatch;
pub mod orchestrator;
pub mod snapshot;
pub mod socket;
pub mod store;
pub mod types;

// Publicly export key types, functions, and modules needed by the binary or tests
pub use config::{load_config, validate_config, AppConfig, BackendConfig};
pub use dispatch::{build_backend, DispatchRouter, FanoutChannel, NotifyChannel};
pub use orchestrator::FirewallOrchestrator;
pub use snapshot::SnapshotBuilder;
pub use socket::SocketHandler;
pub use store::{EntityStore, FirewallFilter, MemoryStore, TenantFilter};
pub use types::{AppError, Result};

pub mod api;
pub mod config;
pub mod consensus;
pub mod engine;
pub mod error;
pub mod formats;
pub mod ingress;
pub mod metrics;
pub mod models;
pub mod rpc;
pub mod store;

pub use api::{create_router, AppState};
pub use config::{Config, RaftSettings};
pub use consensus::{BrightNode, CommandResult, NodeId};
pub use error::{BrightError, Result};
pub use metrics::BrightMetrics;
pub use models::{Command, Document, IndexConfig};
pub use store::IndexStore;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

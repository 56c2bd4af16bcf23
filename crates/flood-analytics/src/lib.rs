// flood-analytics/crates/flood-analytics/src/lib.rs

pub mod config;
pub mod context_db;
pub mod context_engine;
pub mod dataset;
pub mod memory;
pub mod telemetry;
pub mod utils;

// Public API exports
pub use config::Config;
pub use context_db::SqliteContextStore;
pub use context_engine::{
    Action, Answer, ContextSlots, LocationPolicy, OrchestratorConfig, QueryOrchestrator, Reply, ResultPayload,
    SlotKey,
};
pub use dataset::{CsvLoader, Dataset, ProjectRow};
pub use memory::{ContextStore, InMemoryContextStore};

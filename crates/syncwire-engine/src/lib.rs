//! Replication engine: the staged pipeline that moves records from a
//! source connector to a destination connector.
//!
//! [`pipeline`] wires four blocking stages over bounded closable queues
//! ([`queue`]) and an async liveness watchdog; [`mapper`] rewrites stream
//! namespaces between the two connectors; [`config`] parses the sync YAML
//! and the configured catalog that drive a run.

pub mod config;
pub mod errors;
pub mod mapper;
pub mod pipeline;
pub mod queue;
pub mod state;
pub mod summary;

pub use config::{load_catalog, parse_sync, parse_sync_str, SyncConfig};
pub use errors::PipelineError;
pub use mapper::{NamespaceDefinition, NamespaceMapper};
pub use pipeline::{CancelHandle, PipelineOptions, ReplicationPipeline};
pub use summary::{ReplicationSummary, SyncStatus};

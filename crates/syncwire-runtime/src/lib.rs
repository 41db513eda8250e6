//! Connector runtime: subprocess transport, liveness monitors, and the
//! source/destination process facades the pipeline drives.
//!
//! The boundary with a connector subprocess is a shared directory of named
//! pipes and sentinel files ([`transport`]); everything above that is
//! process supervision: stderr forwarding ([`stderr`]), startup retries
//! ([`backoff`]), stall detection ([`monitor`]), and the per-role facades
//! ([`source`], [`destination`]).

pub mod backoff;
pub mod destination;
pub mod error;
pub mod monitor;
pub mod source;
pub mod stderr;
pub mod testing;
pub mod transport;

mod shutdown;

pub use backoff::Backoff;
pub use destination::{DestinationConfig, DestinationConnector};
pub use error::{ConnectorError, IGNORED_EXIT_CODES};
pub use monitor::{DestinationTimeoutMonitor, HeartbeatMonitor, TimeoutKind};
pub use source::{SourceConfig, SourceConnector};
pub use transport::{create_pipe_layout, PipeTransport, ProcessTerminator, ProcessTransport};

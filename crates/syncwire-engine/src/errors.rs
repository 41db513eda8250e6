//! Pipeline error taxonomy.
//!
//! Stage-local transient noise never reaches this type; it is absorbed and
//! counted inside the codec. What does reach it is fatal to the attempt:
//! connector lifecycle failures, catalog mismatches, liveness violations,
//! and host-side infrastructure errors.

use std::time::Duration;

use syncwire_runtime::monitor::TimeoutKind;
use syncwire_runtime::ConnectorError;

/// Consolidated failure reason for one sync attempt.
#[derive(Debug)]
pub enum PipelineError {
    /// A connector facade failed: process lifecycle, stream I/O, or a
    /// catalog mismatch surfaced through the codec.
    Connector(ConnectorError),
    /// The source emitted no RECORD or STATE message for too long.
    Heartbeat { threshold: Duration },
    /// A destination call sat in flight past its allowance.
    DestinationTimeout {
        kind: TimeoutKind,
        threshold: Duration,
    },
    /// Host-side error (task join, queue wiring, config) outside any
    /// connector's control.
    Infrastructure(anyhow::Error),
}

impl std::fmt::Display for PipelineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Connector(e) => write!(f, "{e}"),
            Self::Heartbeat { threshold } => {
                write!(f, "source heartbeat exceeded {threshold:?} without a record or state message")
            }
            Self::DestinationTimeout { kind, threshold } => {
                let call = match kind {
                    TimeoutKind::Accept => "accept",
                    TimeoutKind::NotifyEndOfInput => "notify_end_of_input",
                };
                write!(f, "destination {call} call exceeded {threshold:?}")
            }
            Self::Infrastructure(e) => write!(f, "{e}"),
        }
    }
}

impl std::error::Error for PipelineError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Connector(e) => Some(e),
            Self::Infrastructure(e) => Some(e.as_ref()),
            Self::Heartbeat { .. } | Self::DestinationTimeout { .. } => None,
        }
    }
}

impl From<ConnectorError> for PipelineError {
    fn from(e: ConnectorError) -> Self {
        Self::Connector(e)
    }
}

impl From<anyhow::Error> for PipelineError {
    fn from(e: anyhow::Error) -> Self {
        Self::Infrastructure(e)
    }
}

impl PipelineError {
    /// Catalog mismatches carry the offending stream identity and deserve
    /// a distinct report upstream.
    #[must_use]
    pub fn is_catalog_mismatch(&self) -> bool {
        matches!(self, Self::Connector(e) if e.is_catalog_mismatch())
    }
}

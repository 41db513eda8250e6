//! Connector lifecycle errors.

use std::io;
use std::time::Duration;

use thiserror::Error;

use syncwire_protocol::codec::CodecError;
use syncwire_protocol::ConnectorRole;

use crate::transport::ExitCodeError;

/// Exit codes that cooperative termination legitimately produces: normal
/// exit and SIGTERM.
pub const IGNORED_EXIT_CODES: [i32; 2] = [0, 143];

/// Errors surfaced by a connector facade. Everything here is fatal to the
/// sync attempt; transient per-line noise is absorbed inside the codec.
#[derive(Debug, Error)]
pub enum ConnectorError {
    #[error(transparent)]
    Codec(#[from] CodecError),
    #[error("{role} connector stream failed")]
    Io {
        role: ConnectorRole,
        #[source]
        source: io::Error,
    },
    #[error("{role} connector exited with non-ignorable code {code}")]
    UnexpectedExitCode { role: ConnectorRole, code: i32 },
    #[error("{role} connector did not terminate within {timeout:?}")]
    TerminationTimeout {
        role: ConnectorRole,
        timeout: Duration,
    },
    #[error("{role} connector exit state is unreadable")]
    ExitState {
        role: ConnectorRole,
        #[source]
        source: ExitCodeError,
    },
}

impl ConnectorError {
    /// Catalog mismatches get a dedicated message upstream; everything else
    /// reports as a process/stream failure.
    #[must_use]
    pub fn is_catalog_mismatch(&self) -> bool {
        matches!(self, Self::Codec(CodecError::CatalogMismatch(_)))
    }
}

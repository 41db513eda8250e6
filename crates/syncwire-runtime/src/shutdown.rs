//! Shared teardown path for both facades.

use std::time::Duration;

use syncwire_protocol::ConnectorRole;

use crate::error::{ConnectorError, IGNORED_EXIT_CODES};
use crate::transport::ProcessTransport;

/// Terminate a transport and verify its exit code.
///
/// After a user-initiated cancellation, non-clean outcomes are expected
/// and reported as warnings instead of errors.
pub(crate) fn close_transport(
    transport: &mut dyn ProcessTransport,
    role: ConnectorRole,
    timeout: Duration,
    cancelled: bool,
) -> Result<(), ConnectorError> {
    let exited = transport.terminate(timeout);
    if !exited {
        if cancelled {
            tracing::warn!(connector = %role, "process did not confirm termination after cancellation");
            return Ok(());
        }
        return Err(ConnectorError::TerminationTimeout { role, timeout });
    }
    let code = transport
        .exit_code()
        .map_err(|source| ConnectorError::ExitState { role, source })?;
    if IGNORED_EXIT_CODES.contains(&code) {
        tracing::info!(connector = %role, code, "process exited cleanly");
        Ok(())
    } else if cancelled {
        tracing::warn!(connector = %role, code, "non-ignorable exit code after cancellation");
        Ok(())
    } else {
        Err(ConnectorError::UnexpectedExitCode { role, code })
    }
}

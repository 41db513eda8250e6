//! Forwarding of connector stderr into the structured log sink.

use std::io::BufRead;
use std::thread::JoinHandle;

use syncwire_protocol::ConnectorRole;

/// Drain `stream` line by line into tracing, scoped by connector role,
/// until end of stream. The thread ends when the subprocess closes its
/// stderr, so no shutdown signal is needed.
pub fn forward_stderr(
    role: ConnectorRole,
    stream: Box<dyn BufRead + Send>,
) -> std::io::Result<JoinHandle<()>> {
    std::thread::Builder::new()
        .name(format!("{role}-stderr"))
        .spawn(move || {
            for line in stream.lines() {
                match line {
                    Ok(line) if line.is_empty() => {}
                    Ok(line) => tracing::warn!(connector = %role, "{line}"),
                    Err(err) => {
                        tracing::debug!(connector = %role, error = %err, "stderr stream closed");
                        break;
                    }
                }
            }
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_forwarder_drains_to_end() {
        let stream = Cursor::new("first\n\nsecond\n".to_string());
        let handle = forward_stderr(ConnectorRole::Source, Box::new(stream)).unwrap();
        handle.join().unwrap();
    }
}

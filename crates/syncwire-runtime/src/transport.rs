//! Subprocess I/O over named pipes and sentinel files.
//!
//! A connector subprocess and this engine share a directory: FIFOs for
//! stdout/stderr (and stdin on the destination side), an exit-code file the
//! subprocess supervisor writes on process exit, and a termination-request
//! file this engine writes to ask for graceful shutdown. No signals are
//! delivered; termination is cooperative, which matches container runtimes
//! that expose no direct signal path.
//!
//! [`ProcessTransport`] is a trait so tests can simulate exit-code
//! appearance without a real subprocess or filesystem watcher.

use std::fs::{self, File, OpenOptions};
use std::io::{self, BufRead, BufReader, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::mpsc;
use std::sync::Arc;
use std::time::{Duration, Instant};

use notify::{RecursiveMode, Watcher};
use thiserror::Error;

use syncwire_protocol::ConnectorRole;

pub const STDOUT_PIPE: &str = "stdout";
pub const STDERR_PIPE: &str = "stderr";
pub const STDIN_PIPE: &str = "stdin";
pub const EXIT_CODE_FILE: &str = "exit-code";
pub const TERMINATION_FILE: &str = "terminate";

/// Reading the exit-code sentinel can fail two ways, and callers care
/// which: the process may simply still be running, or the sentinel may be
/// present but unusable.
#[derive(Debug, Error)]
pub enum ExitCodeError {
    #[error("process has not exited yet")]
    NotYetExited,
    #[error("exit-code sentinel {path} is empty or unparsable")]
    CorruptExitState { path: PathBuf },
    #[error("reading exit-code sentinel failed")]
    Io(#[from] io::Error),
}

/// Non-blocking handle for requesting termination, shareable with monitor
/// and cancel paths while the owning facade holds the transport.
pub trait ProcessTerminator: Send + Sync {
    /// Write the termination sentinel. Idempotent.
    fn request_termination(&self) -> io::Result<()>;
}

/// One subprocess's I/O surface.
pub trait ProcessTransport: Send {
    /// The subprocess's standard output. Opening may block until the peer
    /// opens its end of the pipe.
    fn stdout(&mut self) -> io::Result<Box<dyn BufRead + Send>>;

    /// The subprocess's standard error.
    fn stderr(&mut self) -> io::Result<Box<dyn BufRead + Send>>;

    /// The subprocess's standard input. Destination side only.
    fn stdin(&mut self) -> io::Result<Box<dyn Write + Send>>;

    /// Cheap existence probe for the exit-code sentinel.
    fn exit_code_available(&self) -> bool;

    /// The process's exit code, once the sentinel exists.
    fn exit_code(&self) -> Result<i32, ExitCodeError>;

    /// Request graceful shutdown and wait up to `timeout` for the
    /// exit-code sentinel. Returns whether the sentinel appeared. Never
    /// kills the process.
    fn terminate(&mut self, timeout: Duration) -> bool;

    /// A termination handle usable independently of this transport.
    fn terminator(&self) -> Arc<dyn ProcessTerminator>;
}

/// Create the FIFO layout for one connector role under `dir`.
///
/// The exit-code and termination files are plain files created later by
/// the supervisor and this engine respectively; only the pipes exist up
/// front.
pub fn create_pipe_layout(dir: &Path, role: ConnectorRole) -> io::Result<()> {
    use nix::sys::stat::Mode;
    use nix::unistd::mkfifo;

    fs::create_dir_all(dir)?;
    let mut pipes = vec![STDOUT_PIPE, STDERR_PIPE];
    if role == ConnectorRole::Destination {
        pipes.push(STDIN_PIPE);
    }
    for pipe in pipes {
        let path = dir.join(pipe);
        mkfifo(&path, Mode::S_IRWXU).map_err(|errno| io::Error::from(errno))?;
    }
    Ok(())
}

/// Sentinel-file terminator for [`PipeTransport`].
struct FileTerminator {
    path: PathBuf,
}

impl ProcessTerminator for FileTerminator {
    fn request_termination(&self) -> io::Result<()> {
        // Content is a sentinel only; nothing reads it back.
        fs::write(&self.path, b"terminate\n")
    }
}

/// Filesystem-backed transport over a shared pipe directory.
pub struct PipeTransport {
    dir: PathBuf,
    role: ConnectorRole,
}

impl PipeTransport {
    #[must_use]
    pub fn open_for_source(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            role: ConnectorRole::Source,
        }
    }

    #[must_use]
    pub fn open_for_destination(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            role: ConnectorRole::Destination,
        }
    }

    fn exit_code_path(&self) -> PathBuf {
        self.dir.join(EXIT_CODE_FILE)
    }

    /// Wait for the exit-code sentinel with a filesystem watcher, falling
    /// back to polling when watching fails. The watcher is armed before
    /// the existence check so a file appearing in between is not missed.
    fn wait_for_exit_code(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let (tx, rx) = mpsc::channel();
        let watcher = notify::recommended_watcher(move |event: notify::Result<notify::Event>| {
            if event.is_ok() {
                let _ = tx.send(());
            }
        });
        let mut watcher = match watcher {
            Ok(watcher) => watcher,
            Err(err) => {
                tracing::warn!(connector = %self.role, error = %err, "filesystem watcher unavailable, polling for exit code");
                return self.poll_for_exit_code(deadline);
            }
        };
        if let Err(err) = watcher.watch(&self.dir, RecursiveMode::NonRecursive) {
            tracing::warn!(connector = %self.role, error = %err, "cannot watch pipe directory, polling for exit code");
            return self.poll_for_exit_code(deadline);
        }
        if self.exit_code_available() {
            return true;
        }
        while let Some(remaining) = deadline.checked_duration_since(Instant::now()) {
            match rx.recv_timeout(remaining) {
                Ok(()) if self.exit_code_available() => return true,
                Ok(()) => continue,
                Err(_) => break,
            }
        }
        self.exit_code_available()
    }

    fn poll_for_exit_code(&self, deadline: Instant) -> bool {
        while Instant::now() < deadline {
            if self.exit_code_available() {
                return true;
            }
            std::thread::sleep(Duration::from_millis(100));
        }
        self.exit_code_available()
    }
}

impl ProcessTransport for PipeTransport {
    fn stdout(&mut self) -> io::Result<Box<dyn BufRead + Send>> {
        let file = File::open(self.dir.join(STDOUT_PIPE))?;
        Ok(Box::new(BufReader::new(file)))
    }

    fn stderr(&mut self) -> io::Result<Box<dyn BufRead + Send>> {
        let file = File::open(self.dir.join(STDERR_PIPE))?;
        Ok(Box::new(BufReader::new(file)))
    }

    fn stdin(&mut self) -> io::Result<Box<dyn Write + Send>> {
        let file = OpenOptions::new().write(true).open(self.dir.join(STDIN_PIPE))?;
        Ok(Box::new(file))
    }

    fn exit_code_available(&self) -> bool {
        self.exit_code_path().exists()
    }

    fn exit_code(&self) -> Result<i32, ExitCodeError> {
        let path = self.exit_code_path();
        if !path.exists() {
            return Err(ExitCodeError::NotYetExited);
        }
        let mut contents = String::new();
        File::open(&path)?.read_to_string(&mut contents)?;
        contents
            .trim()
            .parse::<i32>()
            .map_err(|_| ExitCodeError::CorruptExitState { path })
    }

    fn terminate(&mut self, timeout: Duration) -> bool {
        let terminator = FileTerminator {
            path: self.dir.join(TERMINATION_FILE),
        };
        if let Err(err) = terminator.request_termination() {
            tracing::warn!(connector = %self.role, error = %err, "failed to write termination sentinel");
            return false;
        }
        let appeared = self.wait_for_exit_code(timeout);
        if !appeared {
            tracing::warn!(connector = %self.role, ?timeout, "exit-code sentinel did not appear before timeout");
        }
        appeared
    }

    fn terminator(&self) -> Arc<dyn ProcessTerminator> {
        Arc::new(FileTerminator {
            path: self.dir.join(TERMINATION_FILE),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn transport_in(dir: &Path) -> PipeTransport {
        PipeTransport::open_for_source(dir)
    }

    #[test]
    fn test_exit_code_not_yet_exited() {
        let dir = tempfile::tempdir().unwrap();
        let transport = transport_in(dir.path());
        assert!(!transport.exit_code_available());
        assert!(matches!(
            transport.exit_code(),
            Err(ExitCodeError::NotYetExited)
        ));
    }

    #[test]
    fn test_exit_code_parses_decimal() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join(EXIT_CODE_FILE), "143\n").unwrap();
        let transport = transport_in(dir.path());
        assert_eq!(transport.exit_code().unwrap(), 143);
    }

    #[test]
    fn test_exit_code_corrupt_sentinel() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join(EXIT_CODE_FILE), "").unwrap();
        let transport = transport_in(dir.path());
        assert!(matches!(
            transport.exit_code(),
            Err(ExitCodeError::CorruptExitState { .. })
        ));
        fs::write(dir.path().join(EXIT_CODE_FILE), "not a number").unwrap();
        assert!(matches!(
            transport.exit_code(),
            Err(ExitCodeError::CorruptExitState { .. })
        ));
    }

    #[test]
    fn test_terminate_without_exit_returns_false() {
        let dir = tempfile::tempdir().unwrap();
        let mut transport = transport_in(dir.path());
        let started = Instant::now();
        assert!(!transport.terminate(Duration::from_millis(200)));
        assert!(started.elapsed() < Duration::from_secs(5));
        assert!(dir.path().join(TERMINATION_FILE).exists());
    }

    #[test]
    fn test_terminate_sees_exit_code_written_concurrently() {
        let dir = tempfile::tempdir().unwrap();
        let exit_path = dir.path().join(EXIT_CODE_FILE);
        let writer = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(50));
            fs::write(exit_path, "0\n").unwrap();
        });
        let mut transport = transport_in(dir.path());
        assert!(transport.terminate(Duration::from_secs(5)));
        writer.join().unwrap();
        assert_eq!(transport.exit_code().unwrap(), 0);
    }

    #[test]
    fn test_terminate_with_preexisting_exit_code() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join(EXIT_CODE_FILE), "0\n").unwrap();
        let mut transport = transport_in(dir.path());
        assert!(transport.terminate(Duration::from_secs(1)));
    }

    #[test]
    fn test_create_pipe_layout_per_role() {
        let dir = tempfile::tempdir().unwrap();
        let source_dir = dir.path().join("source");
        create_pipe_layout(&source_dir, ConnectorRole::Source).unwrap();
        assert!(source_dir.join(STDOUT_PIPE).exists());
        assert!(source_dir.join(STDERR_PIPE).exists());
        assert!(!source_dir.join(STDIN_PIPE).exists());

        let dest_dir = dir.path().join("destination");
        create_pipe_layout(&dest_dir, ConnectorRole::Destination).unwrap();
        assert!(dest_dir.join(STDIN_PIPE).exists());
    }
}

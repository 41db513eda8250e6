//! Transport doubles for exercising facades and pipelines without real
//! subprocesses.

use std::io::{self, BufRead, BufReader, Cursor, Read, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use crate::transport::{ExitCodeError, ProcessTerminator, ProcessTransport};

/// Scripted stand-in for a connector subprocess: canned stdout, a capture
/// buffer for stdin, and an exit code that appears immediately, on
/// termination request, or never.
pub struct ScriptedTransport {
    stdout: Option<Box<dyn BufRead + Send>>,
    stderr: Option<Box<dyn BufRead + Send>>,
    stdin_sink: Arc<Mutex<Vec<u8>>>,
    exit_code: Arc<Mutex<Option<i32>>>,
    exit_on_terminate: Option<i32>,
    terminated: Arc<AtomicBool>,
}

impl ScriptedTransport {
    /// A transport whose stdout replays `script` and which exits with code
    /// 0 when asked to terminate.
    #[must_use]
    pub fn with_stdout(script: &str) -> Self {
        Self {
            stdout: Some(Box::new(Cursor::new(script.to_string()))),
            stderr: Some(Box::new(Cursor::new(String::new()))),
            stdin_sink: Arc::new(Mutex::new(Vec::new())),
            exit_code: Arc::new(Mutex::new(None)),
            exit_on_terminate: Some(0),
            terminated: Arc::new(AtomicBool::new(false)),
        }
    }

    /// A transport whose stdout blocks until termination is requested,
    /// then reports end of stream. Models a connector parked mid-read.
    #[must_use]
    pub fn idle() -> Self {
        let mut transport = Self::with_stdout("");
        transport.stdout = Some(Box::new(BufReader::new(IdleReader {
            released: Arc::clone(&transport.terminated),
        })));
        transport
    }

    /// The exit-code sentinel is already present.
    #[must_use]
    pub fn exit_immediately(self, code: i32) -> Self {
        *self.exit_code.lock() = Some(code);
        self
    }

    /// The sentinel appears with `code` once termination is requested.
    #[must_use]
    pub fn exit_on_terminate(mut self, code: i32) -> Self {
        self.exit_on_terminate = Some(code);
        self
    }

    /// The sentinel never appears, regardless of termination requests.
    #[must_use]
    pub fn never_exits(mut self) -> Self {
        self.exit_on_terminate = None;
        self
    }

    /// Everything written to the process's stdin.
    #[must_use]
    pub fn written(&self) -> Arc<Mutex<Vec<u8>>> {
        Arc::clone(&self.stdin_sink)
    }

    /// Whether termination has been requested, by any handle.
    #[must_use]
    pub fn terminated_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.terminated)
    }
}

impl ProcessTransport for ScriptedTransport {
    fn stdout(&mut self) -> io::Result<Box<dyn BufRead + Send>> {
        self.stdout
            .take()
            .ok_or_else(|| io::Error::new(io::ErrorKind::Other, "stdout already taken"))
    }

    fn stderr(&mut self) -> io::Result<Box<dyn BufRead + Send>> {
        self.stderr
            .take()
            .ok_or_else(|| io::Error::new(io::ErrorKind::Other, "stderr already taken"))
    }

    fn stdin(&mut self) -> io::Result<Box<dyn Write + Send>> {
        Ok(Box::new(SharedSink(Arc::clone(&self.stdin_sink))))
    }

    fn exit_code_available(&self) -> bool {
        self.exit_code.lock().is_some()
    }

    fn exit_code(&self) -> Result<i32, ExitCodeError> {
        (*self.exit_code.lock()).ok_or(ExitCodeError::NotYetExited)
    }

    fn terminate(&mut self, _timeout: Duration) -> bool {
        self.terminator().request_termination().is_ok() && self.exit_code_available()
    }

    fn terminator(&self) -> Arc<dyn ProcessTerminator> {
        Arc::new(ScriptedTerminator {
            terminated: Arc::clone(&self.terminated),
            exit_code: Arc::clone(&self.exit_code),
            exit_on_terminate: self.exit_on_terminate,
        })
    }
}

struct ScriptedTerminator {
    terminated: Arc<AtomicBool>,
    exit_code: Arc<Mutex<Option<i32>>>,
    exit_on_terminate: Option<i32>,
}

impl ProcessTerminator for ScriptedTerminator {
    fn request_termination(&self) -> io::Result<()> {
        self.terminated.store(true, Ordering::SeqCst);
        if let Some(code) = self.exit_on_terminate {
            let mut exit = self.exit_code.lock();
            if exit.is_none() {
                *exit = Some(code);
            }
        }
        Ok(())
    }
}

struct SharedSink(Arc<Mutex<Vec<u8>>>);

impl Write for SharedSink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Blocks every read until released, then reports end of stream. Simulates
/// a pipe read parked on a silent process.
struct IdleReader {
    released: Arc<AtomicBool>,
}

impl Read for IdleReader {
    fn read(&mut self, _buf: &mut [u8]) -> io::Result<usize> {
        while !self.released.load(Ordering::SeqCst) {
            std::thread::sleep(Duration::from_millis(5));
        }
        Ok(0)
    }
}

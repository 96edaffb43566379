//! Child processes with a deadline
//!
//! adb and Tesseract both run as subprocesses from blocking workers. A child
//! that hangs is killed once its deadline passes so the worker comes back.

use std::io::{self, Read, Write};
use std::process::{Child, Command, Stdio};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

const POLL_INTERVAL: Duration = Duration::from_millis(20);

/// Output of a child that exited in time
#[derive(Debug)]
pub struct Finished {
    pub success: bool,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
}

#[derive(Debug, thiserror::Error)]
pub enum ProcessError {
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error("timed out after {0:?}")]
    TimedOut(Duration),
}

fn drain<R: Read + Send + 'static>(pipe: Option<R>) -> Option<JoinHandle<Vec<u8>>> {
    pipe.map(|mut pipe| {
        thread::spawn(move || {
            let mut buf = Vec::new();
            let _ = pipe.read_to_end(&mut buf);
            buf
        })
    })
}

fn collect(handle: Option<JoinHandle<Vec<u8>>>) -> Vec<u8> {
    handle
        .and_then(|handle| handle.join().ok())
        .unwrap_or_default()
}

fn kill(child: &mut Child) {
    let _ = child.kill();
    let _ = child.wait();
}

/// Run `command` to completion, feeding it `input` on stdin, and kill it
/// if it is still running after `timeout`.
pub fn run_bounded(
    command: &mut Command,
    input: Option<Vec<u8>>,
    timeout: Duration,
) -> Result<Finished, ProcessError> {
    let mut child = command
        .stdin(if input.is_some() {
            Stdio::piped()
        } else {
            Stdio::null()
        })
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()?;

    // Pipes are pumped on their own threads; a screencap or a large PNG
    // easily fills a pipe buffer
    let writer = match (child.stdin.take(), input) {
        (Some(mut stdin), Some(bytes)) => Some(thread::spawn(move || stdin.write_all(&bytes))),
        _ => None,
    };
    let stdout = drain(child.stdout.take());
    let stderr = drain(child.stderr.take());

    let deadline = Instant::now() + timeout;
    let status = loop {
        match child.try_wait() {
            Ok(Some(status)) => break status,
            Ok(None) => {}
            Err(e) => {
                kill(&mut child);
                return Err(e.into());
            }
        }
        if Instant::now() >= deadline {
            kill(&mut child);
            return Err(ProcessError::TimedOut(timeout));
        }
        thread::sleep(POLL_INTERVAL);
    };

    if let Some(Ok(Err(e))) = writer.map(JoinHandle::join) {
        // The child may exit without reading everything
        log::debug!("Child stdin closed early: {}", e);
    }

    Ok(Finished {
        success: status.success(),
        stdout: collect(stdout),
        stderr: collect(stderr),
    })
}

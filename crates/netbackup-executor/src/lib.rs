// SPDX-License-Identifier: MIT OR Apache-2.0
#![deny(unsafe_code)]
#![warn(missing_docs)]
//! Executes one scheduled [`Execution`] against a device: opens a
//! session, dispatches by job variant (command-set or file-set), applies
//! scrubbers, and returns a timed [`ExecutionResult`].
//!
//! Device transport is abstracted behind [`Session`]/[`Shell`]/
//! [`SessionOpener`] so the expect-loop and file-fetch logic in this
//! crate can be exercised without a real SSH endpoint; [`ssh::Ssh2Opener`]
//! is the production implementation.

pub mod ssh;

use std::collections::BTreeMap;
use std::thread;
use std::time::Duration;

use chrono::Utc;

use netbackup_error::NetbackupError;
use netbackup_model::{
    Compression, Credentials, Device, Execution, ExecutionResult, FileEntry, FileSet, JobVariant,
    Outcome,
};

/// An interactive command channel to a device.
///
/// The read side is filled by a background reader running until the
/// shell is dropped; [`Shell::snapshot`] atomically takes everything
/// accumulated since the last call.
pub trait Shell: Send {
    /// Write raw bytes to the remote end.
    fn write_command(&mut self, data: &[u8]) -> std::io::Result<()>;
    /// Atomically take and clear everything read since the last call.
    fn snapshot(&mut self) -> Vec<u8>;
}

/// An authenticated transport to one device.
pub trait Session: Send {
    /// Authenticate with the device's configured credentials.
    fn authenticate(&mut self, credentials: &Credentials) -> Result<(), NetbackupError>;
    /// Open an interactive shell with a pty attached.
    fn open_shell(&mut self) -> Result<Box<dyn Shell>, NetbackupError>;
    /// Fetch the raw bytes of an absolute path on the device.
    fn fetch_file(&mut self, path: &str) -> Result<Vec<u8>, NetbackupError>;
}

/// Opens a transport-level [`Session`] to a device, before authentication.
pub trait SessionOpener: Send + Sync {
    /// Connect to `device.host`/`device.protocol`. Authentication happens
    /// separately via [`Session::authenticate`].
    fn open(&self, device: &Device) -> Result<Box<dyn Session>, NetbackupError>;
}

const BANNER_SETTLE: Duration = Duration::from_secs(1);
const STEP_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Run `execution` to completion against `opener`, producing a timed
/// [`ExecutionResult`].
///
/// Every failure path (session, authentication, command, scrubber) is
/// captured as an [`Outcome::Failure`] with a human-readable reason; this
/// function never panics on a reachable device error.
pub fn execute(execution: &Execution, opener: &dyn SessionOpener) -> ExecutionResult {
    let start_timestamp = Utc::now();
    let outcome = run(execution, opener);
    let end_timestamp = Utc::now();

    ExecutionResult {
        job: execution.job.name.clone(),
        device: execution.device.name.clone(),
        job_timestamp: execution.timestamp,
        start_timestamp,
        end_timestamp,
        outcome,
    }
}

fn run(execution: &Execution, opener: &dyn SessionOpener) -> Outcome {
    let device = &execution.device;
    let job = &execution.job;

    let mut session = match opener.open(device) {
        Ok(session) => session,
        Err(e) => {
            tracing::warn!(device = %device.name, error = %e, "unable to initiate session");
            return Outcome::Failure("unable to initiate session".to_string());
        }
    };

    if let Err(e) = session.authenticate(&device.credentials) {
        tracing::warn!(device = %device.name, error = %e, "authentication failed");
        return Outcome::Failure("authentication failed".to_string());
    }

    let (mut payload, mut failure) = match &job.variant {
        JobVariant::FileSet(set) => fetch_files(session.as_mut(), set),
        JobVariant::CommandSet(set) => {
            run_commands(session.as_mut(), &set.steps)
        }
    };

    for scrubber in &job.scrubbers {
        match scrubber.apply(&payload) {
            Ok(scrubbed) => payload = scrubbed,
            Err(e) => {
                tracing::warn!(job = %job.name, error = %e, "scrubber failed, discarding payload");
                payload = Vec::new();
                failure.get_or_insert_with(|| "scrubber failed".to_string());
            }
        }
    }

    match failure {
        Some(reason) => Outcome::Failure(reason),
        None => Outcome::Artifact(payload),
    }
}

fn fetch_files(session: &mut dyn Session, set: &FileSet) -> (Vec<u8>, Option<String>) {
    let paths: Vec<&String> = set.files.keys().collect();

    let mut failure: Option<String> = None;
    let mut bodies: Vec<(String, Vec<u8>)> = Vec::with_capacity(paths.len());
    for path in &paths {
        let entry = &set.files[path.as_str()];
        let body = fetch_one_file(session, path, entry).unwrap_or_else(|reason| {
            failure.get_or_insert(reason);
            Vec::new()
        });
        bodies.push(((*path).clone(), body));
    }

    let payload = if bodies.len() > 1 {
        let mut out = Vec::new();
        for (i, (path, body)) in bodies.iter().enumerate() {
            if i > 0 {
                out.push(b'\n');
            }
            out.extend_from_slice(format!("File: {path}\n").as_bytes());
            out.extend_from_slice(b"----------------------------------------\n\n");
            out.extend_from_slice(body);
            out.push(b'\n');
        }
        out
    } else {
        bodies.into_iter().next().map(|(_, body)| body).unwrap_or_default()
    };

    (payload, failure)
}

fn fetch_one_file(session: &mut dyn Session, path: &str, entry: &FileEntry) -> Result<Vec<u8>, String> {
    let raw = session.fetch_file(path).map_err(|e| format!("failed to fetch {path}: {e}"))?;
    match entry.compression {
        Some(Compression::Gzip) => netbackup_compress::decompress_gzip(&raw)
            .map_err(|e| format!("failed to decompress {path}: {e}")),
        None => Ok(raw),
    }
}

fn run_commands(
    session: &mut dyn Session,
    steps: &[netbackup_model::CommandStep],
) -> (Vec<u8>, Option<String>) {
    let mut shell = match session.open_shell() {
        Ok(shell) => shell,
        Err(e) => return (Vec::new(), Some(format!("unable to open shell: {e}"))),
    };

    thread::sleep(BANNER_SETTLE);
    let mut transcript = shell.snapshot();

    for step in steps {
        let step_result = run_step(shell.as_mut(), step, &mut transcript);
        if let Some(reason) = step_result {
            return (transcript, Some(reason));
        }
    }

    (transcript, None)
}

/// Run one [`CommandStep`](netbackup_model::CommandStep), appending
/// everything read to `transcript`. Returns `Some(reason)` on failure.
fn run_step(
    shell: &mut dyn Shell,
    step: &netbackup_model::CommandStep,
    transcript: &mut Vec<u8>,
) -> Option<String> {
    transcript.extend(shell.snapshot());

    let mut command = step.command.clone().into_bytes();
    if step.implicit_enter {
        command.push(b'\n');
    }
    if let Err(e) = shell.write_command(&command) {
        return Some(format!("failed to write command: {e}"));
    }

    if step.timeout == 0 {
        return None;
    }

    let expect = match step.compile_expect() {
        Ok(patterns) => patterns,
        Err(e) => return Some(format!("bad expect pattern: {e}")),
    };
    let expect_not = match step.compile_expect_not() {
        Ok(patterns) => patterns,
        Err(e) => return Some(format!("bad expect_not pattern: {e}")),
    };

    let mut step_buffer = Vec::new();
    for _ in 0..step.timeout {
        let chunk = shell.snapshot();
        step_buffer.extend_from_slice(&chunk);
        transcript.extend_from_slice(&chunk);

        let text = String::from_utf8_lossy(&step_buffer);
        if expect_not.iter().any(|re| re.is_match(&text)) {
            return Some("matched expect_not pattern".to_string());
        }
        if expect.iter().any(|re| re.is_match(&text)) {
            return None;
        }
        thread::sleep(STEP_POLL_INTERVAL);
    }

    if !expect.is_empty() {
        Some("never matched expected pattern(s)".to_string())
    } else {
        None
    }
}

/// A fixed script of responses a fake device shell plays back, used to
/// exercise the expect-loop without a real SSH endpoint.
#[cfg(test)]
struct ScriptedShell {
    chunks: std::collections::VecDeque<Vec<u8>>,
}

#[cfg(test)]
impl Shell for ScriptedShell {
    fn write_command(&mut self, _data: &[u8]) -> std::io::Result<()> {
        Ok(())
    }

    fn snapshot(&mut self) -> Vec<u8> {
        self.chunks.pop_front().unwrap_or_default()
    }
}

#[cfg(test)]
struct FakeSession {
    shell_script: Vec<Vec<u8>>,
    files: BTreeMap<String, Vec<u8>>,
    auth_should_fail: bool,
}

#[cfg(test)]
impl Session for FakeSession {
    fn authenticate(&mut self, _credentials: &Credentials) -> Result<(), NetbackupError> {
        if self.auth_should_fail {
            Err(NetbackupError::new(
                netbackup_error::ErrorCode::AuthenticationFailed,
                "bad password",
            ))
        } else {
            Ok(())
        }
    }

    fn open_shell(&mut self) -> Result<Box<dyn Shell>, NetbackupError> {
        Ok(Box::new(ScriptedShell {
            chunks: self.shell_script.clone().into(),
        }))
    }

    fn fetch_file(&mut self, path: &str) -> Result<Vec<u8>, NetbackupError> {
        self.files.get(path).cloned().ok_or_else(|| {
            NetbackupError::new(netbackup_error::ErrorCode::FileFetchFailed, "no such file")
                .with_context("path", path.to_string())
        })
    }
}

#[cfg(test)]
struct FakeOpener {
    session: std::sync::Mutex<Option<FakeSession>>,
    open_should_fail: bool,
}

#[cfg(test)]
impl SessionOpener for FakeOpener {
    fn open(&self, _device: &Device) -> Result<Box<dyn Session>, NetbackupError> {
        if self.open_should_fail {
            return Err(NetbackupError::new(
                netbackup_error::ErrorCode::SessionUnavailable,
                "connection refused",
            ));
        }
        let session = self.session.lock().unwrap().take().expect("session already consumed");
        Ok(Box::new(session))
    }
}

//! Subprocess invocation for live workers.
//!
//! # Protocol
//! - stdin: the [`PhaseContext`](crate::worker::PhaseContext) as JSON, then EOF.
//! - stdout: one [`PhaseOutcome`](crate::worker::PhaseOutcome) JSON document.
//! - stderr: free-form log text, captured and attached to failures.
//!
//! The child runs in the project root with `MISSION_ROOT` set. It is killed
//! when the timeout elapses.

use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use crate::config::WorkerCommand;
use crate::error::{MissionError, Result};

const POLL_INTERVAL: Duration = Duration::from_millis(20);

/// Captured result of a finished worker process.
#[derive(Debug, Clone)]
pub struct WorkerOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_ok: bool,
    pub exit_code: Option<i32>,
    pub duration_ms: u64,
}

impl WorkerOutput {
    /// Last `max` characters of stderr, for error messages.
    pub fn stderr_tail(&self, max: usize) -> String {
        let count = self.stderr.chars().count();
        self.stderr.chars().skip(count.saturating_sub(max)).collect()
    }
}

/// Resolve `program` on PATH unless it already names a path.
pub fn resolve_program(program: &str) -> Result<PathBuf> {
    if program.contains(std::path::MAIN_SEPARATOR) || program.contains('/') {
        let p = PathBuf::from(program);
        if p.exists() {
            return Ok(p);
        }
        return Err(MissionError::WorkerSpawn(format!("worker program not found: {program}")));
    }
    which::which(program)
        .map_err(|e| MissionError::WorkerSpawn(format!("worker program '{program}' not on PATH: {e}")))
}

/// Run `cmd`, feed `stdin_json`, and wait at most `timeout`.
pub fn run_worker(
    cmd: &WorkerCommand,
    stdin_json: &str,
    root: &Path,
    timeout: Duration,
) -> Result<WorkerOutput> {
    let program = resolve_program(&cmd.program)?;
    let started = Instant::now();

    let mut child = Command::new(&program)
        .args(&cmd.args)
        .env("MISSION_ROOT", root)
        .current_dir(root)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|e| MissionError::WorkerSpawn(format!("{}: {e}", program.display())))?;

    tracing::debug!(program = %program.display(), pid = child.id(), "worker spawned");

    // Pipes are drained on threads; a full pipe would block the child.
    let stdout_reader = child.stdout.take().map(|mut out| {
        thread::spawn(move || {
            let mut buf = String::new();
            let _ = out.read_to_string(&mut buf);
            buf
        })
    });
    let stderr_reader = child.stderr.take().map(|mut err| {
        thread::spawn(move || {
            let mut buf = String::new();
            let _ = err.read_to_string(&mut buf);
            buf
        })
    });

    // Fed from a thread so the deadline holds even when the worker never reads.
    let stdin_writer = child.stdin.take().map(|mut stdin| {
        let input = stdin_json.to_owned();
        thread::spawn(move || stdin.write_all(input.as_bytes()))
    });

    let deadline = started + timeout;
    let status = loop {
        match child.try_wait()? {
            Some(status) => break status,
            None if Instant::now() >= deadline => {
                let _ = child.kill();
                let _ = child.wait();
                tracing::warn!(
                    program = %program.display(),
                    seconds = timeout.as_secs(),
                    "worker timed out and was killed"
                );
                return Err(MissionError::WorkerTimeout {
                    worker: cmd.program.clone(),
                    seconds: timeout.as_secs(),
                });
            }
            None => thread::sleep(POLL_INTERVAL),
        }
    };

    if let Some(Ok(Err(e))) = stdin_writer.map(|h| h.join()) {
        // BrokenPipe: the worker exited without reading its context.
        if e.kind() != std::io::ErrorKind::BrokenPipe {
            return Err(MissionError::WorkerSpawn(format!("failed to write stdin: {e}")));
        }
    }

    let stdout = stdout_reader
        .and_then(|h| h.join().ok())
        .unwrap_or_default();
    let stderr = stderr_reader
        .and_then(|h| h.join().ok())
        .unwrap_or_default();

    Ok(WorkerOutput {
        stdout,
        stderr,
        exit_ok: status.success(),
        exit_code: status.code(),
        duration_ms: started.elapsed().as_millis() as u64,
    })
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn sh(script: &str) -> WorkerCommand {
        WorkerCommand {
            program: "sh".to_string(),
            args: vec!["-c".to_string(), script.to_string()],
            timeout_seconds: None,
        }
    }

    #[test]
    fn echoes_stdin_and_captures_stderr() {
        let dir = TempDir::new().unwrap();
        let out = run_worker(
            &sh("cat; echo 'log line' >&2"),
            r#"{"hello":1}"#,
            dir.path(),
            Duration::from_secs(10),
        )
        .unwrap();
        assert!(out.exit_ok);
        assert_eq!(out.stdout, r#"{"hello":1}"#);
        assert!(out.stderr.contains("log line"));
    }

    #[test]
    fn non_zero_exit_is_reported_not_raised() {
        let dir = TempDir::new().unwrap();
        let out = run_worker(&sh("exit 3"), "{}", dir.path(), Duration::from_secs(10)).unwrap();
        assert!(!out.exit_ok);
        assert_eq!(out.exit_code, Some(3));
    }

    #[test]
    fn slow_worker_times_out() {
        let dir = TempDir::new().unwrap();
        let err = run_worker(&sh("sleep 5"), "{}", dir.path(), Duration::from_millis(200))
            .unwrap_err();
        assert!(matches!(err, MissionError::WorkerTimeout { .. }));
    }

    #[test]
    fn timeout_holds_when_worker_never_reads_large_input() {
        let dir = TempDir::new().unwrap();
        let input = "x".repeat(1_000_000);
        let started = Instant::now();
        let err = run_worker(&sh("exec sleep 8"), &input, dir.path(), Duration::from_millis(300))
            .unwrap_err();
        assert!(matches!(err, MissionError::WorkerTimeout { .. }));
        assert!(started.elapsed() < Duration::from_secs(4), "took {:?}", started.elapsed());
    }

    #[test]
    fn missing_program_is_spawn_error() {
        let err = resolve_program("definitely-not-a-real-worker-binary").unwrap_err();
        assert!(matches!(err, MissionError::WorkerSpawn(_)));
    }

    #[test]
    fn stderr_tail_truncates_from_the_front() {
        let out = WorkerOutput {
            stdout: String::new(),
            stderr: "abcdef".into(),
            exit_ok: false,
            exit_code: Some(1),
            duration_ms: 0,
        };
        assert_eq!(out.stderr_tail(3), "def");
    }
}

//! Child processes with a hard timeout and bounded output capture.

use std::io::{Read, Write};
use std::process::{Command, ExitStatus, Stdio};
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use tracing::{debug, error, instrument, warn};
use wait_timeout::ChildExt;

/// Captured output of a finished (or killed) child.
#[derive(Debug)]
pub struct CommandOutput {
    pub status: ExitStatus,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    pub stdout_truncated: usize,
    pub stderr_truncated: usize,
    /// The child exceeded its timeout and was killed.
    pub timed_out: bool,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        !self.timed_out && self.status.success()
    }

    pub fn stdout_text(&self) -> String {
        String::from_utf8_lossy(&self.stdout).into_owned()
    }

    /// Diagnostic text for a failed run: stderr, falling back to stdout when stderr is empty.
    pub fn diagnostic(&self) -> String {
        let (bytes, truncated) = if self.stderr.iter().all(u8::is_ascii_whitespace) {
            (&self.stdout, self.stdout_truncated)
        } else {
            (&self.stderr, self.stderr_truncated)
        };
        let mut text = String::from_utf8_lossy(bytes).trim_end().to_string();
        if truncated > 0 {
            text.push_str(&format!("\n[output truncated {truncated} bytes]"));
        }
        text
    }
}

/// Run `cmd` with a wall-clock `timeout`, draining stdout/stderr on reader threads.
///
/// At most `output_limit_bytes` of each stream is kept; the rest is drained and
/// counted. On timeout the child is killed and reaped before returning, so no
/// process outlives the call. Spawn failures are returned as errors; the caller
/// decides whether they are fatal.
#[instrument(skip_all, fields(program = ?cmd.get_program(), timeout_ms = timeout.as_millis() as u64))]
pub fn run_command_with_timeout(
    mut cmd: Command,
    stdin: Option<&[u8]>,
    timeout: Duration,
    output_limit_bytes: usize,
) -> Result<CommandOutput> {
    cmd.stdin(if stdin.is_some() {
        Stdio::piped()
    } else {
        Stdio::null()
    });
    cmd.stdout(Stdio::piped()).stderr(Stdio::piped());

    let mut child = cmd.spawn().map_err(|err| {
        error!(err = %err, "failed to spawn child process");
        anyhow!(err).context(format!("spawn {:?}", cmd.get_program()))
    })?;

    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| anyhow!("stdout was not piped"))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| anyhow!("stderr was not piped"))?;
    let stdout_reader = thread::spawn(move || read_limited(stdout, output_limit_bytes));
    let stderr_reader = thread::spawn(move || read_limited(stderr, output_limit_bytes));

    if let Some(input) = stdin {
        let mut child_stdin = child
            .stdin
            .take()
            .ok_or_else(|| anyhow!("stdin was not piped"))?;
        // A child that exits without reading stdin closes the pipe; that is not our failure.
        if let Err(err) = child_stdin.write_all(input) {
            warn!(err = %err, "child closed stdin early");
        }
    }

    let mut timed_out = false;
    let status = match child.wait_timeout(timeout).context("wait for child")? {
        Some(status) => status,
        None => {
            warn!("child timed out, killing");
            timed_out = true;
            child.kill().context("kill timed out child")?;
            child.wait().context("reap killed child")?
        }
    };

    let (stdout, stdout_truncated) = join_reader(stdout_reader).context("join stdout reader")?;
    let (stderr, stderr_truncated) = join_reader(stderr_reader).context("join stderr reader")?;

    debug!(exit_code = ?status.code(), timed_out, "child finished");
    Ok(CommandOutput {
        status,
        stdout,
        stderr,
        stdout_truncated,
        stderr_truncated,
        timed_out,
    })
}

fn join_reader(handle: thread::JoinHandle<Result<(Vec<u8>, usize)>>) -> Result<(Vec<u8>, usize)> {
    handle
        .join()
        .map_err(|_| anyhow!("output reader thread panicked"))?
}

fn read_limited<R: Read>(mut reader: R, limit: usize) -> Result<(Vec<u8>, usize)> {
    let mut kept = Vec::new();
    let mut dropped = 0usize;
    let mut chunk = [0u8; 8192];
    loop {
        let n = reader.read(&mut chunk).context("read child output")?;
        if n == 0 {
            break;
        }
        let room = limit.saturating_sub(kept.len());
        let keep = n.min(room);
        kept.extend_from_slice(&chunk[..keep]);
        dropped += n - keep;
    }
    Ok((kept, dropped))
}

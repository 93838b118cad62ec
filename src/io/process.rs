//! Local shell execution with timeouts and bounded output.
//!
//! Every invocation yields a result string: captured output, truncated past
//! the configured cap, with process errors folded in as an annotation. A
//! failing or hung command never surfaces as an `Err` here — the caller
//! records whatever text comes back against the originating action.

use std::io::Read;
use std::process::{Command, Stdio};
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use tracing::{debug, warn};
use wait_timeout::ChildExt;

/// Marker appended when captured output exceeds the byte cap.
pub const TRUNCATION_MARKER: &str = "...[truncated]";

/// Run `command` through `sh -c`, capturing combined stdout/stderr.
///
/// Output beyond `output_limit_bytes` is truncated with a visible marker. A
/// non-zero exit, a timeout, or a spawn failure appends an `[ERROR]`
/// annotation instead of failing the call.
pub fn run_shell_command(command: &str, timeout: Duration, output_limit_bytes: usize) -> String {
    match run_shell_command_inner(command, timeout, output_limit_bytes) {
        Ok(output) => output,
        Err(err) => {
            warn!(command, %err, "command could not be run");
            format!("\n[ERROR] {err:#}")
        }
    }
}

fn run_shell_command_inner(
    command: &str,
    timeout: Duration,
    output_limit_bytes: usize,
) -> Result<String> {
    debug!(command, timeout_secs = timeout.as_secs(), "spawning shell command");

    let mut child = Command::new("sh")
        .arg("-c")
        .arg(command)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .context("spawn shell")?;

    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| anyhow!("stdout was not piped"))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| anyhow!("stderr was not piped"))?;

    // Drain both pipes off-thread so a chatty child cannot deadlock on a full
    // pipe while we wait on it.
    let stdout_handle = thread::spawn(move || read_limited(stdout, output_limit_bytes));
    let stderr_handle = thread::spawn(move || read_limited(stderr, output_limit_bytes));

    let mut timed_out = false;
    let status = match child.wait_timeout(timeout).context("wait for command")? {
        Some(status) => status,
        None => {
            warn!(command, timeout_secs = timeout.as_secs(), "command timed out, killing");
            timed_out = true;
            child.kill().context("kill command")?;
            child.wait().context("wait after kill")?
        }
    };

    let (stdout, stdout_over) = join_reader(stdout_handle).context("join stdout")?;
    let (stderr, stderr_over) = join_reader(stderr_handle).context("join stderr")?;

    let mut combined = Vec::with_capacity(stdout.len() + stderr.len());
    combined.extend_from_slice(&stdout);
    combined.extend_from_slice(&stderr);

    let truncated = stdout_over || stderr_over || combined.len() > output_limit_bytes;
    combined.truncate(output_limit_bytes);
    let mut output = String::from_utf8_lossy(&combined).into_owned();
    if truncated {
        output.push_str(TRUNCATION_MARKER);
    }

    if timed_out {
        output.push_str(&format!("\n[ERROR] timed out after {}s", timeout.as_secs()));
    } else if !status.success() {
        match status.code() {
            Some(code) => output.push_str(&format!("\n[ERROR] exited with status {code}")),
            None => output.push_str("\n[ERROR] terminated by signal"),
        }
    }

    debug!(command, exit_code = ?status.code(), timed_out, "command finished");
    Ok(output)
}

fn join_reader(handle: thread::JoinHandle<Result<(Vec<u8>, bool)>>) -> Result<(Vec<u8>, bool)> {
    handle
        .join()
        .map_err(|_| anyhow!("output reader thread panicked"))?
}

/// Read a stream up to `limit` bytes, draining the rest. Returns the bytes
/// kept and whether anything was discarded.
fn read_limited<R: Read>(mut reader: R, limit: usize) -> Result<(Vec<u8>, bool)> {
    let mut buf = Vec::new();
    let mut discarded = false;
    let mut chunk = [0u8; 8192];

    loop {
        let n = reader.read(&mut chunk).context("read output")?;
        if n == 0 {
            break;
        }
        let remaining = limit.saturating_sub(buf.len());
        if remaining > 0 {
            buf.extend_from_slice(&chunk[..n.min(remaining)]);
        }
        if n > remaining {
            discarded = true;
        }
    }

    Ok((buf, discarded))
}

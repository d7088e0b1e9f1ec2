//! Foreground command execution with streaming capture and cwd tracking.
//!
//! The user command is wrapped so the shell reports its final working
//! directory behind a per-session sentinel line; parsing that report back
//! out is what makes `cd` stick across tool calls.
//!
//! Concurrent foreground calls on one session are not serialized here; the
//! last sentinel write wins. Transports that pipeline bash calls within a
//! session accept that race.

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::config::ServerConfig;
use crate::error::ExecError;
use crate::exec::{KILL_GRACE, exit_code_of, kill_group, quote_single, spawn_group};
use crate::session::Session;

/// One line of live output, forwarded to the transport's progress sink.
#[derive(Debug, Clone)]
pub struct ProgressLine {
    /// Monotonically increasing counter across both streams of one call.
    pub line: u64,
    pub text: String,
}

/// Outcome of a completed foreground command. Buffers are cleaned of the
/// sentinel trailer but not yet truncated; exit codes are data, not errors.
#[derive(Debug)]
pub struct ExecOutcome {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
    pub timed_out: bool,
}

/// Run `command` in the session's cwd and fold the post-command working
/// directory back into the session.
///
/// `timeout_ms` must already be clamped by the caller
/// (`ServerConfig::clamp_timeout_ms`). On timeout the process group gets
/// SIGTERM, then SIGKILL after [`KILL_GRACE`]; the sentinel never appears in
/// that case, so the session cwd is left untouched.
pub async fn run_foreground(
    session: &Session,
    config: &ServerConfig,
    command: &str,
    timeout_ms: u64,
    progress: Option<mpsc::UnboundedSender<ProgressLine>>,
) -> Result<ExecOutcome, ExecError> {
    if command.trim().is_empty() {
        return Err(ExecError::EmptyCommand);
    }

    let cwd = session.cwd();
    let sentinel = session.sentinel();
    // `;` (not `&&`) before the trailer: the sentinel and pwd must appear
    // whether or not the user command failed.
    let script = format!(
        "cd {} && {} ; echo ; echo '{}' ; pwd",
        quote_single(&cwd.to_string_lossy()),
        command,
        sentinel,
    );

    let (mut child, pgid) = spawn_group(&config.shell_path, &script).map_err(ExecError::Spawn)?;
    tracing::debug!(pgid, timeout_ms, "spawned foreground command");

    let counter = Arc::new(AtomicU64::new(0));
    let stdout_task = spawn_line_reader(child.stdout.take(), counter.clone(), progress.clone());
    let stderr_task = spawn_line_reader(child.stderr.take(), counter, progress);

    let timed_out = Arc::new(AtomicBool::new(false));
    let killer = {
        let timed_out = timed_out.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(timeout_ms)).await;
            timed_out.store(true, Ordering::SeqCst);
            tracing::debug!(pgid, "foreground timeout fired, sending SIGTERM");
            kill_group(pgid, libc::SIGTERM);
            tokio::time::sleep(KILL_GRACE).await;
            kill_group(pgid, libc::SIGKILL);
        })
    };

    // Readers drain to EOF before we reap the child; sentinel parsing below
    // is therefore guaranteed to see the trailer when the command exited
    // cleanly.
    let stdout_raw = stdout_task.await.unwrap_or_default();
    let stderr = stderr_task.await.unwrap_or_default();
    let status = child.wait().await;
    killer.abort();
    let status = status.map_err(ExecError::Wait)?;

    let (stdout, new_cwd) = strip_sentinel(&stdout_raw, &sentinel);
    if let Some(dir) = new_cwd
        && !dir.is_empty()
    {
        session.set_cwd(PathBuf::from(dir));
    }

    Ok(ExecOutcome {
        exit_code: exit_code_of(status),
        stdout,
        stderr,
        timed_out: timed_out.load(Ordering::SeqCst),
    })
}

fn spawn_line_reader(
    pipe: Option<impl AsyncRead + Unpin + Send + 'static>,
    counter: Arc<AtomicU64>,
    progress: Option<mpsc::UnboundedSender<ProgressLine>>,
) -> JoinHandle<String> {
    tokio::spawn(async move {
        let mut buf = String::new();
        let Some(pipe) = pipe else {
            return buf;
        };
        let mut lines = BufReader::new(pipe).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            buf.push_str(&line);
            buf.push('\n');
            let n = counter.fetch_add(1, Ordering::SeqCst) + 1;
            if let Some(tx) = &progress {
                // Receiver gone means the client stopped listening; capture
                // continues regardless.
                let _ = tx.send(ProgressLine { line: n, text: line });
            }
        }
        buf
    })
}

/// Scan the captured stdout from the tail for the sentinel line. Returns the
/// buffer with the trailer stripped plus the reported working directory, or
/// the buffer untouched when the sentinel never made it out (timeout kill).
fn strip_sentinel(stdout: &str, sentinel: &str) -> (String, Option<String>) {
    let lines: Vec<&str> = stdout.lines().collect();
    let Some(idx) = lines.iter().rposition(|line| *line == sentinel) else {
        return (stdout.to_string(), None);
    };
    let new_cwd = lines.get(idx + 1).map(|line| line.trim().to_string());

    // Drop the sentinel, the pwd line, and the blank lines the wrapper's
    // `echo` added.
    let mut end = idx;
    while end > 0 && lines[end - 1].is_empty() {
        end -= 1;
    }
    let mut cleaned = lines[..end].join("\n");
    if !cleaned.is_empty() {
        cleaned.push('\n');
    }
    (cleaned, new_cwd)
}

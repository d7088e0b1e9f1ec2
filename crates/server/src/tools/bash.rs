//! The `bash` and `task_output` tools.

use std::sync::Arc;

use boris::config::ServerConfig;
use boris::error::ErrorCode;
use boris::exec::{self, ExecOutcome, ProgressLine};
use boris::session::Session;
use tokio::sync::mpsc;

use crate::result::{ToolFault, ToolOutcome};

/// Run a foreground command and format the result envelope.
pub async fn run_foreground(
    config: &ServerConfig,
    session: &Session,
    command: &str,
    timeout_ms: u64,
    progress: Option<mpsc::UnboundedSender<ProgressLine>>,
) -> ToolOutcome {
    let outcome = exec::run_foreground(session, config, command, timeout_ms, progress)
        .await
        .map_err(ToolFault::from)?;
    Ok(format_outcome(config, &outcome, timeout_ms))
}

/// Launch a background command and report its task id.
pub async fn run_background(
    config: &ServerConfig,
    session: &Arc<Session>,
    command: &str,
) -> ToolOutcome {
    let id = exec::spawn_background(session, config, command)
        .await
        .map_err(ToolFault::from)?;
    Ok(format!("task_id: {id}\nCommand started in background."))
}

/// Report (and on completion, consume) a background task's output.
pub fn task_output(config: &ServerConfig, session: &Session, task_id: &str) -> ToolOutcome {
    let Some(task) = session.get_task(task_id) else {
        return Err(ToolFault::new(
            ErrorCode::BashTaskNotFound,
            format!("no background task with id {task_id}"),
        ));
    };

    // Completion is checked before the snapshot so a task that finishes in
    // between is reported as running with partial buffers; the next call
    // sees it completed.
    let done = task.is_done();
    let (stdout, stderr) = task.output_snapshot();
    let stdout = exec::truncate_chars(&stdout, config.max_output_chars);
    let stderr = exec::truncate_chars(&stderr, config.max_output_chars);

    let mut text = String::new();
    if done {
        // Single-read consumption: a completed task disappears once reported.
        session.remove_task(task_id);
        text.push_str("status: completed");
        if task.timed_out() {
            text.push_str(" [killed by background task timeout]");
        }
        text.push('\n');
        text.push_str(&format!("exit_code: {}\n", task.exit_code().unwrap_or(-1)));
    } else {
        text.push_str("status: running\n");
    }
    if !stderr.is_empty() {
        text.push_str(&format!("\nstderr:\n{stderr}"));
    }
    if !stdout.is_empty() {
        text.push_str(&format!("\nstdout:\n{stdout}"));
    }
    Ok(text)
}

/// Assemble the foreground result envelope: optional timeout banner, exit
/// code, then the non-empty streams.
pub fn format_outcome(config: &ServerConfig, outcome: &ExecOutcome, timeout_ms: u64) -> String {
    let stdout = exec::truncate_chars(&outcome.stdout, config.max_output_chars);
    let stderr = exec::truncate_chars(&outcome.stderr, config.max_output_chars);

    let mut text = String::new();
    if outcome.timed_out {
        text.push_str(&format!("Command timed out after {timeout_ms}ms\n\n"));
    }
    text.push_str(&format!("exit_code: {}\n", outcome.exit_code));
    if !stderr.is_empty() {
        text.push_str(&format!("\nstderr:\n{stderr}"));
    }
    if !stdout.is_empty() {
        text.push_str(&format!("\nstdout:\n{stdout}"));
    }
    text
}

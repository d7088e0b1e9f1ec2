//! Background command execution: detached tasks with buffered output.

use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};

use crate::config::ServerConfig;
use crate::error::ExecError;
use crate::exec::{KILL_GRACE, exit_code_of, kill_group, quote_single, spawn_group};
use crate::session::{BackgroundTask, Session, short_hex};

/// Launch `command` detached in the session's cwd and register it in the
/// session's task table. Returns the new task id.
///
/// No sentinel wrapping here: background commands never mutate the session
/// cwd. If the session rejects the task (limit reached or closed), the just
/// spawned process group is killed and reaped before the error is returned
/// so no zombie remains.
pub async fn spawn_background(
    session: &Arc<Session>,
    config: &ServerConfig,
    command: &str,
) -> Result<String, ExecError> {
    if command.trim().is_empty() {
        return Err(ExecError::EmptyCommand);
    }

    let cwd = session.cwd();
    let script = format!(
        "cd {} && {}",
        quote_single(&cwd.to_string_lossy()),
        command,
    );
    let (mut child, pgid) = spawn_group(&config.shell_path, &script).map_err(ExecError::Spawn)?;

    let id = short_hex(16);
    let task = Arc::new(BackgroundTask::new(id.clone(), pgid));

    if let Err(err) = session.add_task(task.clone()) {
        kill_group(pgid, libc::SIGKILL);
        let _ = child.wait().await;
        return Err(err.into());
    }
    tracing::debug!(task_id = %id, pgid, "background task started");

    let stdout_task = {
        let task = task.clone();
        let pipe = child.stdout.take();
        tokio::spawn(async move { drain_into(pipe, |line| task.append_stdout(line)).await })
    };
    let stderr_task = {
        let task = task.clone();
        let pipe = child.stderr.take();
        tokio::spawn(async move { drain_into(pipe, |line| task.append_stderr(line)).await })
    };

    if config.bg_timeout_secs > 0 {
        let timer_task = task.clone();
        let timeout = Duration::from_secs(config.bg_timeout_secs);
        let timer = tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            tracing::debug!(task_id = %timer_task.id(), "background safety timeout fired");
            timer_task.mark_timed_out();
            timer_task.signal(libc::SIGTERM);
            tokio::time::sleep(KILL_GRACE).await;
            timer_task.signal(libc::SIGKILL);
        });
        task.set_timer(timer.abort_handle());
    }

    // Detached waiter: drain, reap, record the exit code, then signal done.
    let waiter = task.clone();
    tokio::spawn(async move {
        let _ = stdout_task.await;
        let _ = stderr_task.await;
        let code = match child.wait().await {
            Ok(status) => exit_code_of(status),
            Err(err) => {
                tracing::warn!(task_id = %waiter.id(), "background wait failed: {err}");
                -1
            }
        };
        waiter.set_exit_code(code);
        waiter.finish();
    });

    Ok(id)
}

async fn drain_into(pipe: Option<impl AsyncRead + Unpin>, sink: impl Fn(&str)) {
    let Some(pipe) = pipe else {
        return;
    };
    let mut lines = BufReader::new(pipe).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        sink(&line);
    }
}

//! Shell execution: foreground commands with cwd tracking, background
//! commands with task handles.
//!
//! Every command runs as the leader of a fresh process group so signals
//! reach the whole descendant tree. Termination is always two-phase:
//! SIGTERM, then SIGKILL after [`KILL_GRACE`].

use std::io;
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use tokio::process::{Child, Command};

mod background;
mod foreground;

pub use background::spawn_background;
pub use foreground::{ExecOutcome, ProgressLine, run_foreground};

/// Grace period between SIGTERM and SIGKILL.
pub const KILL_GRACE: Duration = Duration::from_secs(5);

/// Single-quote a string for POSIX shells. Embedded apostrophes use the
/// canonical `'"'"'` dance so quoting round-trips losslessly.
pub fn quote_single(text: &str) -> String {
    format!("'{}'", text.replace('\'', r#"'"'"'"#))
}

/// Cap `text` at `max` characters. Truncated output carries a trailing
/// marker naming the original size.
pub fn truncate_chars(text: &str, max: usize) -> String {
    let total = text.chars().count();
    if total <= max {
        return text.to_string();
    }
    let mut out: String = text.chars().take(max).collect();
    out.push_str(&format!(
        "\n\n[Truncated: output was {total} characters, showing first {max}]"
    ));
    out
}

/// Send `signal` to the whole process group. Errors (group already gone)
/// are ignored.
pub fn kill_group(pgid: i32, signal: i32) {
    if pgid <= 0 {
        return;
    }
    unsafe {
        libc::killpg(pgid, signal);
    }
}

/// Spawn `shell -c script` as the leader of a new process group with stdin
/// closed and stdout/stderr piped. Returns the child and its pgid.
pub(crate) fn spawn_group(shell: &Path, script: &str) -> io::Result<(Child, i32)> {
    let mut cmd = Command::new(shell);
    cmd.arg("-c")
        .arg(script)
        // No stdin: commands probing for input must see EOF, not hang.
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    unsafe {
        cmd.pre_exec(|| {
            if libc::setpgid(0, 0) != 0 {
                return Err(io::Error::last_os_error());
            }
            Ok(())
        });
    }
    let child = cmd.spawn()?;
    let pgid = child
        .id()
        .ok_or_else(|| io::Error::other("child exited before its pid could be read"))?
        as i32;
    Ok((child, pgid))
}

/// Map an exit status to the `exit_code` the agent sees: the code when the
/// process exited, `128 + signal` when it was killed.
pub(crate) fn exit_code_of(status: std::process::ExitStatus) -> i32 {
    use std::os::unix::process::ExitStatusExt;
    status
        .code()
        .unwrap_or_else(|| status.signal().map(|sig| 128 + sig).unwrap_or(-1))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quote_single_handles_apostrophes() {
        assert_eq!(quote_single("/tmp/plain"), "'/tmp/plain'");
        assert_eq!(
            quote_single("O'Brien's dir"),
            r#"'O'"'"'Brien'"'"'s dir'"#
        );
    }

    #[test]
    fn truncate_is_exact_at_the_boundary() {
        let exactly = "x".repeat(30_000);
        assert_eq!(truncate_chars(&exactly, 30_000), exactly);

        let over = "x".repeat(30_001);
        let truncated = truncate_chars(&over, 30_000);
        assert!(truncated.starts_with(&exactly));
        assert!(
            truncated
                .ends_with("[Truncated: output was 30001 characters, showing first 30000]")
        );
    }

    #[test]
    fn truncate_counts_chars_not_bytes() {
        let text = "é".repeat(10);
        assert_eq!(truncate_chars(&text, 10), text);
        let truncated = truncate_chars(&text, 9);
        assert!(truncated.starts_with(&"é".repeat(9)));
        assert!(truncated.contains("showing first 9"));
    }
}

//! Per-connection session state: tracked cwd, sentinel nonce, background
//! tasks and the viewed-files table.
//!
//! Not an actor, just plain data behind a mutex. The lock is held only for
//! field access, never across a subprocess wait.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;
use tokio::task::AbortHandle;
use tokio_util::sync::CancellationToken;

use crate::error::SessionError;
use crate::exec::{KILL_GRACE, kill_group};

/// Mint `len` lowercase hex characters from a cryptographic RNG.
pub fn short_hex(len: usize) -> String {
    debug_assert!(len <= 32);
    let id = uuid::Uuid::new_v4().simple().to_string();
    id[..len].to_string()
}

struct SessionInner {
    cwd: PathBuf,
    tasks: HashMap<String, Arc<BackgroundTask>>,
    viewed: HashSet<PathBuf>,
    closed: bool,
}

/// State bundle for one MCP session. Created by the transport factory,
/// closed by the registry (HTTP) or the shutdown path (stdio).
pub struct Session {
    nonce: String,
    max_tasks: usize,
    inner: Mutex<SessionInner>,
}

impl Session {
    /// `initial_cwd` must already be absolute and symlink-resolved
    /// (`ServerConfig::new` guarantees this for the configured workdir).
    pub fn new(initial_cwd: PathBuf, max_tasks: usize) -> Self {
        Self {
            nonce: short_hex(8),
            max_tasks,
            inner: Mutex::new(SessionInner {
                cwd: initial_cwd,
                tasks: HashMap::new(),
                viewed: HashSet::new(),
                closed: false,
            }),
        }
    }

    pub fn cwd(&self) -> PathBuf {
        self.inner.lock().cwd.clone()
    }

    pub fn set_cwd(&self, cwd: PathBuf) {
        self.inner.lock().cwd = cwd;
    }

    pub fn nonce(&self) -> &str {
        &self.nonce
    }

    /// The per-session marker the shell wrapper prints before the trailing
    /// `pwd`. Stable for the session's lifetime.
    pub fn sentinel(&self) -> String {
        format!("__BORIS_CWD_{}__", self.nonce)
    }

    pub fn add_task(&self, task: Arc<BackgroundTask>) -> Result<(), SessionError> {
        let mut inner = self.inner.lock();
        if inner.closed {
            return Err(SessionError::Closed);
        }
        if inner.tasks.len() >= self.max_tasks {
            return Err(SessionError::TaskLimit(self.max_tasks));
        }
        inner.tasks.insert(task.id().to_string(), task);
        Ok(())
    }

    pub fn get_task(&self, id: &str) -> Option<Arc<BackgroundTask>> {
        self.inner.lock().tasks.get(id).cloned()
    }

    pub fn remove_task(&self, id: &str) -> Option<Arc<BackgroundTask>> {
        self.inner.lock().tasks.remove(id)
    }

    pub fn task_count(&self) -> usize {
        self.inner.lock().tasks.len()
    }

    pub fn is_closed(&self) -> bool {
        self.inner.lock().closed
    }

    /// Record a successfully read file. Paths are stored post-resolution so
    /// symlinked and relative spellings collapse to one entry.
    pub fn mark_viewed(&self, path: &Path) {
        self.inner.lock().viewed.insert(path.to_path_buf());
    }

    pub fn has_viewed(&self, path: &Path) -> bool {
        self.inner.lock().viewed.contains(path)
    }

    /// Tear the session down: flip `closed`, drain the task table, then kill
    /// each still-running task's process group outside the lock. Idempotent;
    /// when this returns no task process survives.
    pub async fn close(&self) {
        let tasks: Vec<Arc<BackgroundTask>> = {
            let mut inner = self.inner.lock();
            inner.closed = true;
            inner.tasks.drain().map(|(_, task)| task).collect()
        };
        for task in tasks {
            task.terminate().await;
        }
    }
}

/// Handle for one detached shell command. Buffers grow until `task_output`
/// consumes them or the owning session closes.
pub struct BackgroundTask {
    id: String,
    pgid: i32,
    stdout: Mutex<String>,
    stderr: Mutex<String>,
    exit_code: Mutex<Option<i32>>,
    timed_out: AtomicBool,
    done: CancellationToken,
    timer: Mutex<Option<AbortHandle>>,
}

impl BackgroundTask {
    pub fn new(id: String, pgid: i32) -> Self {
        Self {
            id,
            pgid,
            stdout: Mutex::new(String::new()),
            stderr: Mutex::new(String::new()),
            exit_code: Mutex::new(None),
            timed_out: AtomicBool::new(false),
            done: CancellationToken::new(),
            timer: Mutex::new(None),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn append_stdout(&self, line: &str) {
        let mut buf = self.stdout.lock();
        buf.push_str(line);
        buf.push('\n');
    }

    pub fn append_stderr(&self, line: &str) {
        let mut buf = self.stderr.lock();
        buf.push_str(line);
        buf.push('\n');
    }

    pub fn output_snapshot(&self) -> (String, String) {
        (self.stdout.lock().clone(), self.stderr.lock().clone())
    }

    pub fn set_exit_code(&self, code: i32) {
        *self.exit_code.lock() = Some(code);
    }

    pub fn exit_code(&self) -> Option<i32> {
        *self.exit_code.lock()
    }

    pub fn mark_timed_out(&self) {
        self.timed_out.store(true, Ordering::SeqCst);
    }

    pub fn timed_out(&self) -> bool {
        self.timed_out.load(Ordering::SeqCst)
    }

    /// Register the safety-net timer so the waiter can stop it on exit.
    pub fn set_timer(&self, handle: AbortHandle) {
        *self.timer.lock() = Some(handle);
    }

    pub fn signal(&self, signal: i32) {
        kill_group(self.pgid, signal);
    }

    pub fn is_done(&self) -> bool {
        self.done.is_cancelled()
    }

    /// A clone of the completion token; cancelled exactly once, after the
    /// exit code has been recorded.
    pub fn done_token(&self) -> CancellationToken {
        self.done.clone()
    }

    /// Called by the waiter once `wait` has returned: stop the safety timer
    /// and signal completion.
    pub fn finish(&self) {
        if let Some(timer) = self.timer.lock().take() {
            timer.abort();
        }
        self.done.cancel();
    }

    /// SIGTERM the group, give it the grace period, SIGKILL if still alive,
    /// then wait for the waiter to confirm the exit.
    pub async fn terminate(&self) {
        if self.is_done() {
            return;
        }
        self.signal(libc::SIGTERM);
        let done = self.done_token();
        tokio::select! {
            _ = done.cancelled() => {}
            _ = tokio::time::sleep(KILL_GRACE) => {
                self.signal(libc::SIGKILL);
                done.cancelled().await;
            }
        }
    }
}

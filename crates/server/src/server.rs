//! The rmcp server handler: per-session state, tool routers and dispatch.
//!
//! One `BorisServer` exists per transport session (the HTTP factory mints a
//! fresh one for every new `Mcp-Session-Id`; stdio has exactly one). The
//! handler owns the session, so transport teardown (idle timeout, explicit
//! session DELETE, connection drop, process exit) always reaches
//! `Session::close`, even for sessions that never saw a tool call.

use std::sync::Arc;

use boris::config::ServerConfig;
use boris::error::ErrorCode;
use boris::exec::ProgressLine;
use boris::registry::SessionRegistry;
use boris::session::Session;
use parking_lot::Mutex;
use rmcp::handler::server::router::tool::ToolRouter;
use rmcp::handler::server::wrapper::Parameters;
use rmcp::model::{
    CallToolResult, Implementation, ProgressNotificationParam, ProgressToken, ProtocolVersion,
    ServerCapabilities, ServerInfo,
};
use rmcp::schemars;
use rmcp::service::{Peer, RequestContext};
use rmcp::{ErrorData as McpError, RoleServer, ServerHandler, tool, tool_handler, tool_router};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::result::{ToolFault, fault_result, outcome_result};
use crate::tools::{bash, create_file, find, grep, str_replace, view};

// ---------------------------------------------------------------------------
// Parameter structs (deserialized from MCP tool call arguments)
// ---------------------------------------------------------------------------

#[derive(Debug, serde::Deserialize, schemars::JsonSchema)]
pub struct BashParams {
    /// The shell command to run.
    pub command: String,
    /// Timeout in milliseconds. Non-positive or omitted uses the server
    /// default (120000); values above 600000 are clamped.
    #[serde(default)]
    pub timeout_ms: Option<i64>,
    /// Launch the command detached and return a task id immediately.
    #[serde(default)]
    pub run_in_background: Option<bool>,
}

#[derive(Debug, serde::Deserialize, schemars::JsonSchema)]
pub struct TaskOutputParams {
    /// Id returned by a backgrounded bash call.
    pub task_id: String,
}

#[derive(Debug, serde::Deserialize, schemars::JsonSchema)]
pub struct ViewParams {
    /// File path, relative to the session working directory or absolute.
    pub path: String,
    /// Optional [start_line, end_line] (1-indexed, inclusive; end -1 means
    /// end of file).
    #[serde(default)]
    pub view_range: Option<Vec<i64>>,
}

#[derive(Debug, serde::Deserialize, schemars::JsonSchema)]
pub struct CreateFileParams {
    /// File path, relative to the session working directory or absolute.
    pub path: String,
    /// Full content of the file to write.
    pub file_text: String,
}

#[derive(Debug, serde::Deserialize, schemars::JsonSchema)]
pub struct StrReplaceParams {
    /// File path, relative to the session working directory or absolute.
    pub path: String,
    /// Exact text to replace. Must occur exactly once in the file.
    pub old_str: String,
    /// Replacement text. Omitting it deletes the occurrence.
    #[serde(default)]
    pub new_str: Option<String>,
}

#[derive(Debug, serde::Deserialize, schemars::JsonSchema)]
pub struct GrepParams {
    /// Regular expression to search for.
    pub pattern: String,
    /// File or directory to search. Defaults to the session working
    /// directory.
    #[serde(default)]
    pub path: Option<String>,
    /// Glob filter applied to paths relative to the search root, e.g.
    /// "**/*.rs".
    #[serde(default)]
    pub include: Option<String>,
    /// One of "content" (default), "files_with_matches" or "count".
    #[serde(default)]
    pub output_mode: Option<String>,
    /// Case-insensitive matching.
    #[serde(default)]
    pub ignore_case: Option<bool>,
    /// Prefix content lines with line numbers.
    #[serde(default)]
    pub line_numbers: Option<bool>,
    /// Lines of context after each match.
    #[serde(default)]
    pub after_context: Option<u64>,
    /// Lines of context before each match.
    #[serde(default)]
    pub before_context: Option<u64>,
    /// Lines of context around each match; overridden by the directional
    /// options.
    #[serde(default)]
    pub context: Option<u64>,
}

/// Anthropic-compatible grep parameters: identical semantics, ripgrep-style
/// names.
#[derive(Debug, serde::Deserialize, schemars::JsonSchema)]
pub struct CompatGrepParams {
    /// Regular expression to search for.
    pub pattern: String,
    /// File or directory to search. Defaults to the session working
    /// directory.
    #[serde(default)]
    pub path: Option<String>,
    /// Glob filter applied to paths relative to the search root.
    #[serde(default)]
    pub glob: Option<String>,
    /// One of "content" (default), "files_with_matches" or "count".
    #[serde(default)]
    pub output_mode: Option<String>,
    /// Case-insensitive matching.
    #[serde(default, rename = "-i")]
    pub ignore_case: Option<bool>,
    /// Prefix content lines with line numbers.
    #[serde(default, rename = "-n")]
    pub line_numbers: Option<bool>,
    /// Lines of context after each match.
    #[serde(default, rename = "-A")]
    pub after_context: Option<u64>,
    /// Lines of context before each match.
    #[serde(default, rename = "-B")]
    pub before_context: Option<u64>,
    /// Lines of context around each match.
    #[serde(default, rename = "-C")]
    pub context: Option<u64>,
}

#[derive(Debug, serde::Deserialize, schemars::JsonSchema)]
pub struct FindParams {
    /// Glob pattern matched against paths relative to the search root.
    pub pattern: String,
    /// Directory to search. Defaults to the session working directory.
    #[serde(default)]
    pub path: Option<String>,
    /// Restrict results: "file", "dir" or "any" (default).
    #[serde(default, rename = "type")]
    pub entry_type: Option<String>,
}

#[derive(Debug, serde::Deserialize, schemars::JsonSchema)]
pub struct CompatGlobParams {
    /// Glob pattern matched against paths relative to the search root.
    pub pattern: String,
    /// Directory to search. Defaults to the session working directory.
    #[serde(default)]
    pub path: Option<String>,
}

#[derive(Debug, serde::Deserialize, schemars::JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum EditorCommand {
    View,
    Create,
    StrReplace,
}

/// Anthropic-compatible combined editor: view/create/str_replace selected by
/// `command`.
#[derive(Debug, serde::Deserialize, schemars::JsonSchema)]
pub struct EditorParams {
    pub command: EditorCommand,
    /// File path, relative to the session working directory or absolute.
    pub path: String,
    /// For view: optional [start_line, end_line].
    #[serde(default)]
    pub view_range: Option<Vec<i64>>,
    /// For create: full content of the file.
    #[serde(default)]
    pub file_text: Option<String>,
    /// For str_replace: exact text to replace.
    #[serde(default)]
    pub old_str: Option<String>,
    /// For str_replace: replacement text.
    #[serde(default)]
    pub new_str: Option<String>,
}

// ---------------------------------------------------------------------------
// Session lifecycle glue
// ---------------------------------------------------------------------------

/// Owns the session on behalf of one transport session. Dropping the guard
/// (the transport dropped its per-session service) schedules teardown.
struct SessionGuard {
    session: Arc<Session>,
    registry: Arc<SessionRegistry>,
    /// One-shot latch for lazy registration.
    registered: Mutex<bool>,
    transport_id: Mutex<Option<String>>,
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        if self.session.is_closed() {
            return;
        }
        let session = self.session.clone();
        let registry = self.registry.clone();
        let id = self.transport_id.lock().take();
        // Teardown blocks on task reaping (bounded by the SIGKILL fallback),
        // so it runs on the runtime rather than in Drop. Outside a runtime
        // (process exit) the registry's close_all has already run.
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            handle.spawn(async move {
                match id {
                    // Remove our binding only if it is still ours; a
                    // re-registered id belongs to a newer session.
                    Some(id)
                        if registry
                            .get(&id)
                            .is_some_and(|bound| Arc::ptr_eq(&bound, &session)) =>
                    {
                        registry.close_and_remove(&id).await;
                    }
                    _ => session.close().await,
                }
            });
        }
    }
}

// ---------------------------------------------------------------------------
// Server
// ---------------------------------------------------------------------------

pub struct BorisServer {
    config: Arc<ServerConfig>,
    registry: Arc<SessionRegistry>,
    session: Arc<Session>,
    guard: Arc<SessionGuard>,
    tool_router: ToolRouter<BorisServer>,
}

impl BorisServer {
    pub fn new(config: Arc<ServerConfig>, registry: Arc<SessionRegistry>) -> Self {
        let session = Arc::new(Session::new(config.workdir.clone(), config.max_tasks));
        let guard = Arc::new(SessionGuard {
            session: session.clone(),
            registry: registry.clone(),
            registered: Mutex::new(false),
            transport_id: Mutex::new(None),
        });
        let tool_router = Self::build_router(&config);
        Self {
            config,
            registry,
            session,
            guard,
            tool_router,
        }
    }

    pub fn session(&self) -> Arc<Session> {
        self.session.clone()
    }

    /// Select the tool set for this server instance: compat mode swaps the
    /// file tools for their anthropic-shaped equivalents, and the disable
    /// list removes routes afterwards. Disabling any of the three merged
    /// file tools disables the combined editor.
    fn build_router(config: &ServerConfig) -> ToolRouter<Self> {
        let mut router = if config.anthropic_compat {
            Self::exec_router() + Self::compat_router()
        } else {
            Self::exec_router() + Self::file_router()
        };
        for name in &config.disabled_tools {
            router.remove_route(name.as_str());
        }
        if config.anthropic_compat
            && ["view", "create_file", "str_replace"]
                .iter()
                .any(|tool| config.disabled_tools.contains(*tool))
        {
            router.remove_route("str_replace_editor");
        }
        router
    }

    /// The transport exposes its session id only inside requests, so the
    /// (id → session) binding is established on the first bash/task_output
    /// call. One-shot: later calls and absent ids (stdio) are no-ops.
    fn register_from_context(&self, ctx: &RequestContext<RoleServer>) {
        {
            let mut registered = self.guard.registered.lock();
            if *registered {
                return;
            }
            *registered = true;
        }
        if let Some(id) = transport_session_id(ctx) {
            tracing::debug!(session_id = %id, "registering session");
            *self.guard.transport_id.lock() = Some(id.clone());
            self.registry.register(id, self.session.clone());
        }
    }

    /// Wire a progress channel to the request's progress token, if the
    /// client asked for one. The request's cancellation token stops the
    /// forwarding; it never stops the command itself, so partial output is
    /// still captured and returned.
    fn progress_sink(
        &self,
        ctx: &RequestContext<RoleServer>,
    ) -> Option<mpsc::UnboundedSender<ProgressLine>> {
        let token = ctx.meta.get_progress_token()?;
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(forward_progress(
            ctx.peer.clone(),
            token,
            rx,
            ctx.ct.clone(),
        ));
        Some(tx)
    }
}

fn transport_session_id(ctx: &RequestContext<RoleServer>) -> Option<String> {
    ctx.extensions
        .get::<http::request::Parts>()
        .and_then(|parts| parts.headers.get("mcp-session-id"))
        .and_then(|value| value.to_str().ok())
        .map(str::to_owned)
}

async fn forward_progress(
    peer: Peer<RoleServer>,
    token: ProgressToken,
    mut rx: mpsc::UnboundedReceiver<ProgressLine>,
    ct: CancellationToken,
) {
    loop {
        let line = tokio::select! {
            _ = ct.cancelled() => break,
            line = rx.recv() => match line {
                Some(line) => line,
                None => break,
            },
        };
        let _ = peer
            .notify_progress(ProgressNotificationParam {
                progress_token: token.clone(),
                progress: line.line as f64,
                total: None,
                message: Some(line.text),
            })
            .await;
    }
}

fn grep_request_from(params: GrepParams) -> Result<grep::GrepRequest, ToolFault> {
    let output_mode = grep::OutputMode::parse(params.output_mode.as_deref())?;
    Ok(grep::GrepRequest {
        pattern: params.pattern,
        path: params.path,
        include: params.include,
        output_mode,
        ignore_case: params.ignore_case.unwrap_or(false),
        line_numbers: params.line_numbers.unwrap_or(false),
        before_context: params.before_context.or(params.context).unwrap_or(0) as usize,
        after_context: params.after_context.or(params.context).unwrap_or(0) as usize,
    })
}

// ---------------------------------------------------------------------------
// Execution tools (present in both modes)
// ---------------------------------------------------------------------------

#[tool_router(router = exec_router)]
impl BorisServer {
    #[tool(
        description = "Run a shell command in the session's working directory. `cd` persists across calls. Returns exit_code plus captured stdout/stderr (capped at 30000 characters per stream). Long commands stream their output as progress notifications when the request carries a progress token. Set run_in_background to launch the command detached and poll it with task_output."
    )]
    async fn bash(
        &self,
        Parameters(params): Parameters<BashParams>,
        ctx: RequestContext<RoleServer>,
    ) -> Result<CallToolResult, McpError> {
        self.register_from_context(&ctx);

        if params.run_in_background.unwrap_or(false) {
            let outcome = bash::run_background(&self.config, &self.session, &params.command).await;
            return Ok(outcome_result(outcome));
        }

        let timeout_ms = self.config.clamp_timeout_ms(params.timeout_ms.unwrap_or(0));
        let progress = self.progress_sink(&ctx);
        let outcome = bash::run_foreground(
            &self.config,
            &self.session,
            &params.command,
            timeout_ms,
            progress,
        )
        .await;
        Ok(outcome_result(outcome))
    }

    #[tool(
        description = "Fetch the output of a background task started with bash run_in_background. Running tasks report their buffers so far; completed tasks report exit_code and full output, then are removed (a second call returns BASH_TASK_NOT_FOUND)."
    )]
    async fn task_output(
        &self,
        Parameters(params): Parameters<TaskOutputParams>,
        ctx: RequestContext<RoleServer>,
    ) -> Result<CallToolResult, McpError> {
        self.register_from_context(&ctx);
        Ok(outcome_result(bash::task_output(
            &self.config,
            &self.session,
            &params.task_id,
        )))
    }
}

// ---------------------------------------------------------------------------
// File tools, standard naming
// ---------------------------------------------------------------------------

#[tool_router(router = file_router)]
impl BorisServer {
    #[tool(
        description = "Read a file with line numbers, or list a directory. Paths resolve against the session's working directory and are checked against the server's path policy. Reading a file unlocks it for editing when view-before-edit enforcement is on."
    )]
    async fn view(
        &self,
        Parameters(params): Parameters<ViewParams>,
    ) -> Result<CallToolResult, McpError> {
        Ok(outcome_result(
            view::view(
                &self.config,
                &self.session,
                &params.path,
                params.view_range.as_deref(),
            )
            .await,
        ))
    }

    #[tool(
        description = "Create or overwrite a file with the given content, creating parent directories as needed. Overwriting an existing file may require viewing it first."
    )]
    async fn create_file(
        &self,
        Parameters(params): Parameters<CreateFileParams>,
    ) -> Result<CallToolResult, McpError> {
        Ok(outcome_result(
            create_file::create_file(&self.config, &self.session, &params.path, &params.file_text)
                .await,
        ))
    }

    #[tool(
        description = "Replace one occurrence of old_str with new_str in a file. Fails if old_str is absent (STR_REPLACE_NOT_FOUND) or appears more than once (STR_REPLACE_AMBIGUOUS)."
    )]
    async fn str_replace(
        &self,
        Parameters(params): Parameters<StrReplaceParams>,
    ) -> Result<CallToolResult, McpError> {
        Ok(outcome_result(
            str_replace::str_replace(
                &self.config,
                &self.session,
                &params.path,
                &params.old_str,
                params.new_str.as_deref().unwrap_or(""),
            )
            .await,
        ))
    }

    #[tool(
        description = "Search file contents with a regular expression, gitignore-aware. Supports content/files_with_matches/count output modes, an include glob, case-insensitive matching and context lines."
    )]
    async fn grep(
        &self,
        Parameters(params): Parameters<GrepParams>,
    ) -> Result<CallToolResult, McpError> {
        let req = match grep_request_from(params) {
            Ok(req) => req,
            Err(fault) => return Ok(fault_result(&fault)),
        };
        Ok(outcome_result(
            grep::grep(&self.config, &self.session, req).await,
        ))
    }

    #[tool(
        description = "Find files and directories by glob pattern, most recently modified first. The optional type filter restricts results to \"file\" or \"dir\"."
    )]
    async fn find(
        &self,
        Parameters(params): Parameters<FindParams>,
    ) -> Result<CallToolResult, McpError> {
        let entry_type = match find::EntryType::parse(params.entry_type.as_deref()) {
            Ok(t) => t,
            Err(fault) => return Ok(fault_result(&fault)),
        };
        Ok(outcome_result(
            find::find(
                &self.config,
                &self.session,
                &params.pattern,
                params.path.as_deref(),
                entry_type,
            )
            .await,
        ))
    }
}

// ---------------------------------------------------------------------------
// File tools, anthropic-compatible naming
// ---------------------------------------------------------------------------

#[tool_router(router = compat_router)]
impl BorisServer {
    #[tool(
        name = "str_replace_editor",
        description = "View, create and edit files. `command` selects the operation: \"view\" reads a file with line numbers (optional view_range) or lists a directory, \"create\" writes file_text to path, \"str_replace\" replaces one unique occurrence of old_str with new_str."
    )]
    async fn str_replace_editor(
        &self,
        Parameters(params): Parameters<EditorParams>,
    ) -> Result<CallToolResult, McpError> {
        let outcome = match params.command {
            EditorCommand::View => {
                view::view(
                    &self.config,
                    &self.session,
                    &params.path,
                    params.view_range.as_deref(),
                )
                .await
            }
            EditorCommand::Create => match &params.file_text {
                Some(file_text) => {
                    create_file::create_file(&self.config, &self.session, &params.path, file_text)
                        .await
                }
                None => Err(ToolFault::new(
                    ErrorCode::InvalidInput,
                    "file_text is required for the create command",
                )),
            },
            EditorCommand::StrReplace => match &params.old_str {
                Some(old_str) => {
                    str_replace::str_replace(
                        &self.config,
                        &self.session,
                        &params.path,
                        old_str,
                        params.new_str.as_deref().unwrap_or(""),
                    )
                    .await
                }
                None => Err(ToolFault::new(
                    ErrorCode::InvalidInput,
                    "old_str is required for the str_replace command",
                )),
            },
        };
        Ok(outcome_result(outcome))
    }

    #[tool(
        name = "grep",
        description = "Search file contents with a regular expression, gitignore-aware. Supports content/files_with_matches/count output modes, a glob filter, -i, -n and -A/-B/-C context lines."
    )]
    async fn grep_compat(
        &self,
        Parameters(params): Parameters<CompatGrepParams>,
    ) -> Result<CallToolResult, McpError> {
        let req = match grep_request_from(GrepParams {
            pattern: params.pattern,
            path: params.path,
            include: params.glob,
            output_mode: params.output_mode,
            ignore_case: params.ignore_case,
            line_numbers: params.line_numbers,
            after_context: params.after_context,
            before_context: params.before_context,
            context: params.context,
        }) {
            Ok(req) => req,
            Err(fault) => return Ok(fault_result(&fault)),
        };
        Ok(outcome_result(
            grep::grep(&self.config, &self.session, req).await,
        ))
    }

    #[tool(
        name = "Glob",
        description = "Find files by glob pattern, most recently modified first."
    )]
    async fn glob_compat(
        &self,
        Parameters(params): Parameters<CompatGlobParams>,
    ) -> Result<CallToolResult, McpError> {
        Ok(outcome_result(
            find::find(
                &self.config,
                &self.session,
                &params.pattern,
                params.path.as_deref(),
                find::EntryType::Any,
            )
            .await,
        ))
    }
}

#[tool_handler(router = self.tool_router)]
impl ServerHandler for BorisServer {
    fn get_info(&self) -> ServerInfo {
        ServerInfo::new(ServerCapabilities::builder().enable_tools().build())
            .with_protocol_version(ProtocolVersion::V_2024_11_05)
            .with_server_info(Implementation::new("boris", env!("CARGO_PKG_VERSION")))
            .with_instructions(
                "boris is a sandbox for coding agents.\n\n\
                 SHELL: the bash tool runs commands in a persistent working \
                 directory; `cd` sticks for the rest of the session. Use \
                 run_in_background for long commands and poll them with \
                 task_output; completed tasks are removed after one read.\n\n\
                 FILES: view, create_file and str_replace operate on files; \
                 grep and find search contents and names. All paths resolve \
                 against the session working directory and are subject to \
                 the server's allow/deny policy.\n\n\
                 ERRORS: recoverable failures come back as tool results \
                 whose text starts with a stable [CODE] prefix.",
            )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use boris::resolver::Resolver;
    use std::collections::HashSet;
    use tempfile::TempDir;

    fn config_with(dir: &TempDir, f: impl FnOnce(&mut ServerConfig)) -> Arc<ServerConfig> {
        let mut config = ServerConfig::new(dir.path(), Resolver::unrestricted()).unwrap();
        f(&mut config);
        Arc::new(config)
    }

    fn tool_names(server: &BorisServer) -> HashSet<String> {
        server
            .tool_router
            .list_all()
            .into_iter()
            .map(|tool| tool.name.to_string())
            .collect()
    }

    #[test]
    fn standard_mode_exposes_the_plain_tool_set() {
        let dir = TempDir::new().unwrap();
        let server = BorisServer::new(config_with(&dir, |_| {}), Arc::new(SessionRegistry::new()));
        let names = tool_names(&server);
        for expected in [
            "bash",
            "task_output",
            "view",
            "create_file",
            "str_replace",
            "grep",
            "find",
        ] {
            assert!(names.contains(expected), "missing {expected}: {names:?}");
        }
        assert!(!names.contains("str_replace_editor"));
        assert!(!names.contains("Glob"));
    }

    #[test]
    fn compat_mode_merges_the_file_tools() {
        let dir = TempDir::new().unwrap();
        let server = BorisServer::new(
            config_with(&dir, |c| c.anthropic_compat = true),
            Arc::new(SessionRegistry::new()),
        );
        let names = tool_names(&server);
        for expected in ["bash", "task_output", "str_replace_editor", "grep", "Glob"] {
            assert!(names.contains(expected), "missing {expected}: {names:?}");
        }
        assert!(!names.contains("view"));
        assert!(!names.contains("create_file"));
        assert!(!names.contains("find"));
    }

    #[test]
    fn disable_list_removes_routes() {
        let dir = TempDir::new().unwrap();
        let server = BorisServer::new(
            config_with(&dir, |c| {
                c.disabled_tools = HashSet::from(["grep".to_string(), "find".to_string()]);
            }),
            Arc::new(SessionRegistry::new()),
        );
        let names = tool_names(&server);
        assert!(!names.contains("grep"));
        assert!(!names.contains("find"));
        assert!(names.contains("bash"));
    }

    #[test]
    fn disabling_a_merged_tool_disables_the_editor() {
        let dir = TempDir::new().unwrap();
        let server = BorisServer::new(
            config_with(&dir, |c| {
                c.anthropic_compat = true;
                c.disabled_tools = HashSet::from(["view".to_string()]);
            }),
            Arc::new(SessionRegistry::new()),
        );
        assert!(!tool_names(&server).contains("str_replace_editor"));
    }

    #[tokio::test]
    async fn dropping_the_server_closes_the_session() {
        let dir = TempDir::new().unwrap();
        let registry = Arc::new(SessionRegistry::new());
        let server = BorisServer::new(config_with(&dir, |_| {}), registry.clone());
        let session = server.session();
        drop(server);
        // Teardown is scheduled on the runtime; give it a beat.
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        assert!(session.is_closed());
    }

    #[tokio::test]
    async fn sessions_are_isolated_between_server_instances() {
        let dir = TempDir::new().unwrap();
        let config = config_with(&dir, |_| {});
        let registry = Arc::new(SessionRegistry::new());
        let a = BorisServer::new(config.clone(), registry.clone());
        let b = BorisServer::new(config, registry);
        assert_ne!(a.session().nonce(), b.session().nonce());

        a.session().set_cwd("/var".into());
        assert_ne!(b.session().cwd(), std::path::PathBuf::from("/var"));
    }
}

//! Command-line arguments and their translation into server configuration.

use std::collections::HashSet;
use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::{Context, Result};
use boris::config::ServerConfig;
use boris::resolver::Resolver;
use boris_server::http::{DEFAULT_IDLE_TIMEOUT, HttpOptions};
use clap::Parser;

#[derive(Debug, Parser)]
#[command(
    name = "boris",
    version,
    about = "Sandbox MCP server exposing filesystem and shell tools to coding agents"
)]
pub struct CliArgs {
    /// Serve MCP over stdin/stdout instead of HTTP.
    #[arg(long)]
    pub stdio: bool,

    /// Address for the HTTP transport.
    #[arg(long, default_value = "127.0.0.1:8132")]
    pub listen: SocketAddr,

    /// Initial working directory for new sessions.
    #[arg(long, default_value = ".")]
    pub workdir: PathBuf,

    /// Directory the tools may touch. Repeatable; omit for no restriction.
    #[arg(long = "allow", value_name = "DIR")]
    pub allow: Vec<PathBuf>,

    /// Deny glob evaluated against resolved paths, e.g. "**/.env".
    /// Repeatable.
    #[arg(long = "deny", value_name = "GLOB")]
    pub deny: Vec<String>,

    /// Default foreground command timeout, in seconds.
    #[arg(long, default_value_t = 120)]
    pub timeout: u64,

    /// Safety-net timeout for background tasks, in seconds. 0 disables it.
    #[arg(long, default_value_t = 0)]
    pub bg_timeout: u64,

    /// Largest file the file tools will read or write, in bytes.
    #[arg(long, default_value_t = 10 * 1024 * 1024)]
    pub max_file_size: u64,

    /// Per-stream character cap on command and search output.
    #[arg(long, default_value_t = 30_000)]
    pub max_output_chars: usize,

    /// Expose anthropic-compatible tool names and schemas.
    #[arg(long)]
    pub anthropic_compat: bool,

    /// Require files to be viewed before they may be edited.
    #[arg(long)]
    pub view_before_edit: bool,

    /// Tool name to hide from clients. Repeatable.
    #[arg(long = "disable-tool", value_name = "TOOL")]
    pub disable_tools: Vec<String>,

    /// Bearer token required on /mcp. Falls back to BORIS_AUTH_TOKEN.
    #[arg(long)]
    pub auth_token: Option<String>,

    /// Minutes an HTTP session may sit idle before teardown.
    #[arg(long, default_value_t = 10)]
    pub idle_timeout: u64,
}

impl CliArgs {
    pub fn server_config(&self) -> Result<ServerConfig> {
        let resolver = Resolver::new(self.allow.clone(), &self.deny)
            .context("invalid path policy")?;
        let mut config = ServerConfig::new(&self.workdir, resolver)
            .with_context(|| format!("invalid workdir {:?}", self.workdir))?;
        config.default_timeout_ms = self.timeout.saturating_mul(1_000);
        config.bg_timeout_secs = self.bg_timeout;
        config.max_file_size = self.max_file_size;
        config.max_output_chars = self.max_output_chars;
        config.anthropic_compat = self.anthropic_compat;
        config.view_before_edit = self.view_before_edit;
        config.disabled_tools = self.disable_tools.iter().cloned().collect::<HashSet<_>>();
        Ok(config)
    }

    pub fn http_options(&self) -> HttpOptions {
        let auth_token = self
            .auth_token
            .clone()
            .or_else(|| std::env::var("BORIS_AUTH_TOKEN").ok())
            .filter(|token| !token.is_empty());
        let idle_timeout = if self.idle_timeout == 0 {
            DEFAULT_IDLE_TIMEOUT
        } else {
            std::time::Duration::from_secs(self.idle_timeout * 60)
        };
        HttpOptions {
            addr: self.listen,
            auth_token,
            idle_timeout,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_parse() {
        let args = CliArgs::parse_from(["boris"]);
        assert!(!args.stdio);
        assert_eq!(args.timeout, 120);
        assert_eq!(args.listen.port(), 8132);
    }

    #[test]
    fn timeout_converts_to_milliseconds() {
        let args = CliArgs::parse_from(["boris", "--workdir", "/tmp", "--timeout", "30"]);
        let config = args.server_config().unwrap();
        assert_eq!(config.default_timeout_ms, 30_000);
    }

    #[test]
    fn policy_and_flags_flow_into_the_config() {
        let args = CliArgs::parse_from([
            "boris",
            "--workdir",
            "/tmp",
            "--deny",
            "**/.env",
            "--anthropic-compat",
            "--view-before-edit",
            "--disable-tool",
            "grep",
        ]);
        let config = args.server_config().unwrap();
        assert!(config.anthropic_compat);
        assert!(config.view_before_edit);
        assert!(config.disabled_tools.contains("grep"));
    }

    #[test]
    fn invalid_deny_glob_is_rejected() {
        let args = CliArgs::parse_from(["boris", "--workdir", "/tmp", "--deny", "["]);
        assert!(args.server_config().is_err());
    }
}

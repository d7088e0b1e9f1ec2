//! Error types shared across the sandbox core.

use std::fmt;
use std::io;
use std::path::PathBuf;

/// Stable error codes surfaced to agents as the `[<CODE>]` prefix of an
/// error tool result. The set is closed; agents match on the prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    InvalidInput,
    PathNotFound,
    AccessDenied,
    FileTooLarge,
    IoError,
    BashEmptyCommand,
    BashStartFailed,
    BashTaskLimit,
    BashTaskNotFound,
    StrReplaceNotFound,
    StrReplaceAmbiguous,
    GrepInvalidPattern,
    GrepInvalidOutputMode,
    FindInvalidPattern,
    FindInvalidType,
    FileNotViewed,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::InvalidInput => "INVALID_INPUT",
            ErrorCode::PathNotFound => "PATH_NOT_FOUND",
            ErrorCode::AccessDenied => "ACCESS_DENIED",
            ErrorCode::FileTooLarge => "FILE_TOO_LARGE",
            ErrorCode::IoError => "IO_ERROR",
            ErrorCode::BashEmptyCommand => "BASH_EMPTY_COMMAND",
            ErrorCode::BashStartFailed => "BASH_START_FAILED",
            ErrorCode::BashTaskLimit => "BASH_TASK_LIMIT",
            ErrorCode::BashTaskNotFound => "BASH_TASK_NOT_FOUND",
            ErrorCode::StrReplaceNotFound => "STR_REPLACE_NOT_FOUND",
            ErrorCode::StrReplaceAmbiguous => "STR_REPLACE_AMBIGUOUS",
            ErrorCode::GrepInvalidPattern => "GREP_INVALID_PATTERN",
            ErrorCode::GrepInvalidOutputMode => "GREP_INVALID_OUTPUT_MODE",
            ErrorCode::FindInvalidPattern => "FIND_INVALID_PATTERN",
            ErrorCode::FindInvalidType => "FIND_INVALID_TYPE",
            ErrorCode::FileNotViewed => "FILE_NOT_VIEWED",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Path resolution failure. Not-found is never a resolver error; callers
/// distinguish resolution from I/O.
#[derive(Debug, thiserror::Error)]
pub enum ResolveError {
    #[error("path {0:?} is outside the allowed directories")]
    OutsideAllowed(PathBuf),
    #[error("path {path:?} matches deny pattern {pattern:?}")]
    Denied { path: PathBuf, pattern: String },
    #[error("invalid deny pattern {pattern:?}: {source}")]
    InvalidDenyPattern {
        pattern: String,
        source: glob::PatternError,
    },
}

/// Session state-machine violations.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("background task limit reached ({0} tasks)")]
    TaskLimit(usize),
    #[error("session is closed")]
    Closed,
}

/// Shell execution failures that precede any command output.
#[derive(Debug, thiserror::Error)]
pub enum ExecError {
    #[error("command is empty")]
    EmptyCommand,
    #[error("failed to start command: {0}")]
    Spawn(#[source] io::Error),
    #[error("failed to wait for command: {0}")]
    Wait(#[source] io::Error),
    #[error(transparent)]
    Session(#[from] SessionError),
}

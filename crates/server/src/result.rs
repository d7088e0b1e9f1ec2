//! Uniform tool-result envelope.
//!
//! Operational failures stay in-band: a `CallToolResult` with `is_error`
//! set and a single text block starting `[<CODE>] `. Only infrastructure
//! failures (panics, deserialization) escape as protocol errors.

use boris::error::{ErrorCode, ExecError, ResolveError, SessionError};
use rmcp::model::{CallToolResult, Content};

/// An operational tool failure the agent can reason about.
#[derive(Debug)]
pub struct ToolFault {
    pub code: ErrorCode,
    pub message: String,
}

impl ToolFault {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

impl From<ResolveError> for ToolFault {
    fn from(err: ResolveError) -> Self {
        ToolFault::new(ErrorCode::AccessDenied, err.to_string())
    }
}

impl From<ExecError> for ToolFault {
    fn from(err: ExecError) -> Self {
        match &err {
            ExecError::EmptyCommand => ToolFault::new(ErrorCode::BashEmptyCommand, err.to_string()),
            ExecError::Spawn(_) | ExecError::Wait(_) => {
                ToolFault::new(ErrorCode::BashStartFailed, err.to_string())
            }
            ExecError::Session(SessionError::TaskLimit(_)) => {
                ToolFault::new(ErrorCode::BashTaskLimit, err.to_string())
            }
            ExecError::Session(SessionError::Closed) => {
                ToolFault::new(ErrorCode::BashStartFailed, err.to_string())
            }
        }
    }
}

/// What every tool implementation returns; the dispatch layer converts it
/// into the wire envelope.
pub type ToolOutcome = Result<String, ToolFault>;

pub fn text_result(text: String) -> CallToolResult {
    CallToolResult::success(vec![Content::text(text)])
}

pub fn fault_result(fault: &ToolFault) -> CallToolResult {
    CallToolResult::error(vec![Content::text(format!(
        "[{}] {}",
        fault.code, fault.message
    ))])
}

pub fn outcome_result(outcome: ToolOutcome) -> CallToolResult {
    match outcome {
        Ok(text) => text_result(text),
        Err(fault) => fault_result(&fault),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fault_result_carries_the_code_prefix() {
        let fault = ToolFault::new(ErrorCode::AccessDenied, "path /etc is off limits");
        let result = fault_result(&fault);
        assert_eq!(result.is_error, Some(true));
        let text = result.content[0].as_text().unwrap();
        assert_eq!(text.text, "[ACCESS_DENIED] path /etc is off limits");
    }

    #[test]
    fn exec_errors_map_to_bash_codes() {
        let fault: ToolFault = ExecError::EmptyCommand.into();
        assert_eq!(fault.code, ErrorCode::BashEmptyCommand);

        let fault: ToolFault = ExecError::Session(SessionError::TaskLimit(10)).into();
        assert_eq!(fault.code, ErrorCode::BashTaskLimit);
    }
}

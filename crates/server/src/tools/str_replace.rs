//! The `str_replace` tool: replace one unique occurrence in a file.

use boris::config::ServerConfig;
use boris::error::ErrorCode;
use boris::session::Session;

use crate::result::{ToolFault, ToolOutcome};

pub async fn str_replace(
    config: &ServerConfig,
    session: &Session,
    path: &str,
    old_str: &str,
    new_str: &str,
) -> ToolOutcome {
    if old_str.is_empty() {
        return Err(ToolFault::new(
            ErrorCode::InvalidInput,
            "old_str must not be empty",
        ));
    }

    let resolved = config.resolver.resolve(&session.cwd(), path)?;

    let meta = match tokio::fs::metadata(&resolved).await {
        Ok(meta) => meta,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            return Err(ToolFault::new(
                ErrorCode::PathNotFound,
                format!("{} does not exist", resolved.display()),
            ));
        }
        Err(err) => {
            return Err(ToolFault::new(
                ErrorCode::IoError,
                format!("failed to stat {}: {err}", resolved.display()),
            ));
        }
    };
    if meta.is_dir() {
        return Err(ToolFault::new(
            ErrorCode::InvalidInput,
            format!("{} is a directory", resolved.display()),
        ));
    }
    if meta.len() > config.max_file_size {
        return Err(ToolFault::new(
            ErrorCode::FileTooLarge,
            format!(
                "{} is {} bytes, larger than the {} byte limit",
                resolved.display(),
                meta.len(),
                config.max_file_size
            ),
        ));
    }
    if config.view_before_edit && !session.has_viewed(&resolved) {
        return Err(ToolFault::new(
            ErrorCode::FileNotViewed,
            format!(
                "{} has not been viewed; view it before editing",
                resolved.display()
            ),
        ));
    }

    let content = tokio::fs::read_to_string(&resolved).await.map_err(|err| {
        ToolFault::new(
            ErrorCode::IoError,
            format!("failed to read {}: {err}", resolved.display()),
        )
    })?;

    let occurrences = content.matches(old_str).count();
    if occurrences == 0 {
        return Err(ToolFault::new(
            ErrorCode::StrReplaceNotFound,
            "old_str was not found in the file",
        ));
    }
    if occurrences > 1 {
        return Err(ToolFault::new(
            ErrorCode::StrReplaceAmbiguous,
            format!("old_str appears {occurrences} times; include more context to make it unique"),
        ));
    }

    let updated = content.replacen(old_str, new_str, 1);
    tokio::fs::write(&resolved, updated).await.map_err(|err| {
        ToolFault::new(
            ErrorCode::IoError,
            format!("failed to write {}: {err}", resolved.display()),
        )
    })?;

    Ok(format!("File edited: {}", resolved.display()))
}

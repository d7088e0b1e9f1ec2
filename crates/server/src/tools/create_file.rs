//! The `create_file` tool: write a whole file, creating parents as needed.

use boris::config::ServerConfig;
use boris::error::ErrorCode;
use boris::session::Session;

use crate::result::{ToolFault, ToolOutcome};

pub async fn create_file(
    config: &ServerConfig,
    session: &Session,
    path: &str,
    file_text: &str,
) -> ToolOutcome {
    let resolved = config.resolver.resolve(&session.cwd(), path)?;

    if file_text.len() as u64 > config.max_file_size {
        return Err(ToolFault::new(
            ErrorCode::FileTooLarge,
            format!(
                "content is {} bytes, larger than the {} byte limit",
                file_text.len(),
                config.max_file_size
            ),
        ));
    }

    let existed = match tokio::fs::metadata(&resolved).await {
        Ok(meta) if meta.is_dir() => {
            return Err(ToolFault::new(
                ErrorCode::InvalidInput,
                format!("{} is a directory", resolved.display()),
            ));
        }
        Ok(_) => true,
        Err(_) => false,
    };

    // Overwriting an existing file counts as an edit; brand-new files are
    // exempt from the view-before-edit gate.
    if existed && config.view_before_edit && !session.has_viewed(&resolved) {
        return Err(ToolFault::new(
            ErrorCode::FileNotViewed,
            format!(
                "{} exists but has not been viewed; view it before overwriting",
                resolved.display()
            ),
        ));
    }

    if let Some(parent) = resolved.parent() {
        tokio::fs::create_dir_all(parent).await.map_err(|err| {
            ToolFault::new(
                ErrorCode::IoError,
                format!("failed to create {}: {err}", parent.display()),
            )
        })?;
    }
    tokio::fs::write(&resolved, file_text).await.map_err(|err| {
        ToolFault::new(
            ErrorCode::IoError,
            format!("failed to write {}: {err}", resolved.display()),
        )
    })?;

    // The writer has seen the content it just wrote.
    session.mark_viewed(&resolved);

    if existed {
        Ok(format!("File overwritten: {}", resolved.display()))
    } else {
        Ok(format!("File created: {}", resolved.display()))
    }
}

//! The `find` tool: glob matching over a directory tree, newest first.

use boris::config::ServerConfig;
use boris::error::ErrorCode;
use boris::exec::truncate_chars;
use boris::session::Session;
use glob::Pattern;
use ignore::WalkBuilder;

use crate::result::{ToolFault, ToolOutcome};

const MAX_RESULTS: usize = 1_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryType {
    File,
    Dir,
    Any,
}

impl EntryType {
    pub fn parse(raw: Option<&str>) -> Result<Self, ToolFault> {
        match raw {
            None | Some("any") => Ok(EntryType::Any),
            Some("file") => Ok(EntryType::File),
            Some("dir") => Ok(EntryType::Dir),
            Some(other) => Err(ToolFault::new(
                ErrorCode::FindInvalidType,
                format!("unknown type {other:?}; expected file, dir or any"),
            )),
        }
    }
}

pub async fn find(
    config: &ServerConfig,
    session: &Session,
    pattern: &str,
    path: Option<&str>,
    entry_type: EntryType,
) -> ToolOutcome {
    let pattern = Pattern::new(pattern).map_err(|err| {
        ToolFault::new(
            ErrorCode::FindInvalidPattern,
            format!("invalid glob {pattern:?}: {err}"),
        )
    })?;

    let root = config
        .resolver
        .resolve(&session.cwd(), path.unwrap_or(""))?;
    if !root.is_dir() {
        return Err(ToolFault::new(
            ErrorCode::PathNotFound,
            format!("{} is not a directory", root.display()),
        ));
    }

    let mut matches = Vec::new();
    for entry in WalkBuilder::new(&root).hidden(false).git_ignore(true).build() {
        // Walk errors are skipped so results stay stable across permission
        // quirks.
        let Ok(entry) = entry else {
            continue;
        };
        let entry_path = entry.path();
        if entry_path == root {
            continue;
        }
        let is_dir = entry.file_type().is_some_and(|ft| ft.is_dir());
        match entry_type {
            EntryType::File if is_dir => continue,
            EntryType::Dir if !is_dir => continue,
            _ => {}
        }
        if let Ok(relative) = entry_path.strip_prefix(&root)
            && pattern.matches_path(relative)
        {
            matches.push(entry_path.to_path_buf());
            if matches.len() >= MAX_RESULTS {
                break;
            }
        }
    }

    if matches.is_empty() {
        return Ok("No matches found".to_string());
    }

    // Most recently modified first, mirroring what agents actually want to
    // see at the top.
    matches.sort_by(|a, b| {
        let mtime = |p: &std::path::PathBuf| std::fs::metadata(p).and_then(|m| m.modified()).ok();
        mtime(b).cmp(&mtime(a))
    });

    let text = matches
        .iter()
        .map(|p| p.display().to_string())
        .collect::<Vec<_>>()
        .join("\n");
    Ok(truncate_chars(&text, config.max_output_chars))
}

#[cfg(test)]
mod tests {
    use super::*;
    use boris::resolver::Resolver;
    use tempfile::TempDir;

    fn setup() -> (TempDir, ServerConfig, Session) {
        let dir = TempDir::new().unwrap();
        let config = ServerConfig::new(dir.path(), Resolver::unrestricted()).unwrap();
        let session = Session::new(config.workdir.clone(), config.max_tasks);
        (dir, config, session)
    }

    #[tokio::test]
    async fn matches_nested_globs() {
        let (dir, config, session) = setup();
        std::fs::create_dir_all(dir.path().join("src/deep")).unwrap();
        std::fs::write(dir.path().join("src/deep/mod.rs"), "").unwrap();
        std::fs::write(dir.path().join("src/lib.rs"), "").unwrap();
        std::fs::write(dir.path().join("readme.md"), "").unwrap();

        let out = find(&config, &session, "**/*.rs", None, EntryType::Any)
            .await
            .unwrap();
        assert!(out.contains("mod.rs"));
        assert!(out.contains("lib.rs"));
        assert!(!out.contains("readme.md"));
    }

    #[tokio::test]
    async fn type_filter_selects_dirs() {
        let (dir, config, session) = setup();
        std::fs::create_dir(dir.path().join("target")).unwrap();
        std::fs::write(dir.path().join("target.txt"), "").unwrap();

        let out = find(&config, &session, "target*", None, EntryType::Dir)
            .await
            .unwrap();
        assert!(out.ends_with("target"));
        assert!(!out.contains("target.txt"));
    }

    #[tokio::test]
    async fn invalid_pattern_is_reported() {
        let (_dir, config, session) = setup();
        let fault = find(&config, &session, "[", None, EntryType::Any)
            .await
            .unwrap_err();
        assert_eq!(fault.code, ErrorCode::FindInvalidPattern);
    }

    #[test]
    fn invalid_type_is_reported() {
        let fault = EntryType::parse(Some("symlink")).unwrap_err();
        assert_eq!(fault.code, ErrorCode::FindInvalidType);
        assert_eq!(EntryType::parse(None).unwrap(), EntryType::Any);
    }

    #[tokio::test]
    async fn no_matches_is_a_normal_result() {
        let (_dir, config, session) = setup();
        let out = find(&config, &session, "*.zig", None, EntryType::Any)
            .await
            .unwrap();
        assert_eq!(out, "No matches found");
    }
}

//! The `view` tool: read a file with line numbers (tracking what was
//! read), or list a directory.

use std::path::Path;

use boris::config::ServerConfig;
use boris::error::ErrorCode;
use boris::session::Session;

use crate::result::{ToolFault, ToolOutcome};

pub async fn view(
    config: &ServerConfig,
    session: &Session,
    path: &str,
    view_range: Option<&[i64]>,
) -> ToolOutcome {
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
        if view_range.is_some() {
            return Err(ToolFault::new(
                ErrorCode::InvalidInput,
                "view_range is not valid for directories",
            ));
        }
        return list_directory(&resolved).await;
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

    let content = tokio::fs::read_to_string(&resolved).await.map_err(|err| {
        ToolFault::new(
            ErrorCode::IoError,
            format!("failed to read {}: {err}", resolved.display()),
        )
    })?;

    let rendered = render(config, &content, view_range, &resolved)?;
    session.mark_viewed(&resolved);
    Ok(rendered)
}

/// One-level listing, directories suffixed with `/`, sorted by name.
async fn list_directory(resolved: &Path) -> ToolOutcome {
    let mut reader = tokio::fs::read_dir(resolved).await.map_err(|err| {
        ToolFault::new(
            ErrorCode::IoError,
            format!("failed to list {}: {err}", resolved.display()),
        )
    })?;

    let mut names = Vec::new();
    while let Ok(Some(entry)) = reader.next_entry().await {
        let mut name = entry.file_name().to_string_lossy().into_owned();
        if entry.file_type().await.is_ok_and(|ft| ft.is_dir()) {
            name.push('/');
        }
        names.push(name);
    }
    names.sort();

    let mut out = format!("Directory {}:\n", resolved.display());
    if names.is_empty() {
        out.push_str("(empty)\n");
    } else {
        for name in names {
            out.push_str(&name);
            out.push('\n');
        }
    }
    Ok(out)
}

fn render(
    config: &ServerConfig,
    content: &str,
    view_range: Option<&[i64]>,
    resolved: &Path,
) -> Result<String, ToolFault> {
    let lines: Vec<&str> = content.lines().collect();
    let total = lines.len();

    let (start, end) = match view_range {
        None => (1, total),
        Some(range) => parse_range(range, total)?,
    };

    let mut out = String::new();
    let mut shown = 0usize;
    for (idx, line) in lines
        .iter()
        .enumerate()
        .take(end)
        .skip(start.saturating_sub(1))
    {
        if shown >= config.max_view_lines {
            out.push_str(&format!(
                "\n[Showing first {} lines of the requested range. Use view_range to read further.]",
                config.max_view_lines
            ));
            break;
        }
        let line = clip_line(line, config.max_line_chars);
        out.push_str(&format!("{:05}| {}\n", idx + 1, line));
        shown += 1;
    }

    if total == 0 {
        out.push_str(&format!("{} is empty\n", resolved.display()));
    }
    Ok(out)
}

fn parse_range(range: &[i64], total: usize) -> Result<(usize, usize), ToolFault> {
    let [start, end] = range else {
        return Err(ToolFault::new(
            ErrorCode::InvalidInput,
            "view_range must be [start_line, end_line]",
        ));
    };
    let (start, end) = (*start, *end);
    if start < 1 || (total > 0 && start as usize > total) {
        return Err(ToolFault::new(
            ErrorCode::InvalidInput,
            format!("view_range start {start} is outside the file (1..{total})"),
        ));
    }
    // -1 means "to end of file".
    let end = if end == -1 {
        total
    } else if end < start {
        return Err(ToolFault::new(
            ErrorCode::InvalidInput,
            format!("view_range end {end} is before start {start}"),
        ));
    } else {
        (end as usize).min(total)
    };
    Ok((start as usize, end))
}

fn clip_line(line: &str, max_chars: usize) -> String {
    if line.chars().count() <= max_chars {
        line.to_string()
    } else {
        let mut clipped: String = line.chars().take(max_chars).collect();
        clipped.push('…');
        clipped
    }
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
    async fn view_numbers_lines_and_marks_viewed() {
        let (dir, config, session) = setup();
        let file = dir.path().join("a.txt");
        std::fs::write(&file, "alpha\nbeta\n").unwrap();

        let out = view(&config, &session, "a.txt", None).await.unwrap();
        assert!(out.contains("00001| alpha"));
        assert!(out.contains("00002| beta"));
        assert!(session.has_viewed(&file.canonicalize().unwrap()));
    }

    #[tokio::test]
    async fn view_range_selects_lines() {
        let (dir, config, session) = setup();
        std::fs::write(dir.path().join("a.txt"), "one\ntwo\nthree\nfour\n").unwrap();

        let out = view(&config, &session, "a.txt", Some(&[2, 3]))
            .await
            .unwrap();
        assert!(!out.contains("00001|"));
        assert!(out.contains("00002| two"));
        assert!(out.contains("00003| three"));
        assert!(!out.contains("00004|"));

        let tail = view(&config, &session, "a.txt", Some(&[3, -1])).await.unwrap();
        assert!(tail.contains("00004| four"));
    }

    #[tokio::test]
    async fn bad_ranges_are_invalid_input() {
        let (dir, config, session) = setup();
        std::fs::write(dir.path().join("a.txt"), "one\ntwo\n").unwrap();

        for range in [vec![0, 1], vec![5, 6], vec![2, 1], vec![1]] {
            let fault = view(&config, &session, "a.txt", Some(&range))
                .await
                .unwrap_err();
            assert_eq!(fault.code, ErrorCode::InvalidInput, "range {range:?}");
        }
    }

    #[tokio::test]
    async fn missing_file_is_path_not_found() {
        let (_dir, config, session) = setup();
        let fault = view(&config, &session, "nope.txt", None).await.unwrap_err();
        assert_eq!(fault.code, ErrorCode::PathNotFound);
    }

    #[tokio::test]
    async fn denied_path_is_access_denied() {
        let dir = TempDir::new().unwrap();
        let root = dir.path().canonicalize().unwrap();
        let resolver = Resolver::new(vec![root.clone()], &[]).unwrap();
        let config = ServerConfig::new(&root, resolver).unwrap();
        let session = Session::new(config.workdir.clone(), config.max_tasks);

        let fault = view(&config, &session, "/etc/hostname", None)
            .await
            .unwrap_err();
        assert_eq!(fault.code, ErrorCode::AccessDenied);
    }

    #[tokio::test]
    async fn oversized_file_is_rejected() {
        let (dir, mut config, _) = setup();
        config.max_file_size = 4;
        let session = Session::new(config.workdir.clone(), config.max_tasks);
        std::fs::write(dir.path().join("big.txt"), "0123456789").unwrap();

        let fault = view(&config, &session, "big.txt", None).await.unwrap_err();
        assert_eq!(fault.code, ErrorCode::FileTooLarge);
    }

    #[tokio::test]
    async fn directories_are_listed_not_read() {
        let (dir, config, session) = setup();
        std::fs::create_dir(dir.path().join("sub")).unwrap();
        std::fs::write(dir.path().join("b.txt"), "x").unwrap();
        std::fs::write(dir.path().join("a.txt"), "x").unwrap();

        let out = view(&config, &session, "", None).await.unwrap();
        let listing: Vec<&str> = out.lines().skip(1).collect();
        assert_eq!(listing, vec!["a.txt", "b.txt", "sub/"]);

        // A range makes no sense against a directory.
        let fault = view(&config, &session, "", Some(&[1, 2])).await.unwrap_err();
        assert_eq!(fault.code, ErrorCode::InvalidInput);
    }

    #[test]
    fn long_lines_are_clipped() {
        let line = "x".repeat(50);
        let clipped = clip_line(&line, 10);
        assert_eq!(clipped.chars().count(), 11);
        assert!(clipped.ends_with('…'));
    }
}

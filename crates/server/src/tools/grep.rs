//! The `grep` tool: regex search over a directory tree.
//!
//! Walks with gitignore awareness; per-file I/O and walk errors are skipped
//! silently so results stay stable across permission quirks.

use std::io;
use std::path::Path;

use boris::config::ServerConfig;
use boris::error::ErrorCode;
use boris::exec::truncate_chars;
use boris::session::Session;
use glob::Pattern;
use grep_regex::{RegexMatcher, RegexMatcherBuilder};
use grep_searcher::{Searcher, SearcherBuilder, Sink, SinkContext, SinkMatch};
use ignore::WalkBuilder;

use crate::result::{ToolFault, ToolOutcome};

/// Hard cap on collected result lines; output is additionally subject to the
/// configured character truncation.
const MAX_RESULT_LINES: usize = 1_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputMode {
    Content,
    FilesWithMatches,
    Count,
}

impl OutputMode {
    pub fn parse(raw: Option<&str>) -> Result<Self, ToolFault> {
        match raw {
            None | Some("content") => Ok(OutputMode::Content),
            Some("files_with_matches") => Ok(OutputMode::FilesWithMatches),
            Some("count") => Ok(OutputMode::Count),
            Some(other) => Err(ToolFault::new(
                ErrorCode::GrepInvalidOutputMode,
                format!(
                    "unknown output_mode {other:?}; expected content, files_with_matches or count"
                ),
            )),
        }
    }
}

/// A fully validated grep request, shared by the standard and compat
/// parameter shapes.
#[derive(Debug)]
pub struct GrepRequest {
    pub pattern: String,
    pub path: Option<String>,
    pub include: Option<String>,
    pub output_mode: OutputMode,
    pub ignore_case: bool,
    pub line_numbers: bool,
    pub before_context: usize,
    pub after_context: usize,
}

pub async fn grep(config: &ServerConfig, session: &Session, req: GrepRequest) -> ToolOutcome {
    let matcher = RegexMatcherBuilder::new()
        .case_insensitive(req.ignore_case)
        .build(&req.pattern)
        .map_err(|err| {
            ToolFault::new(
                ErrorCode::GrepInvalidPattern,
                format!("invalid pattern {:?}: {err}", req.pattern),
            )
        })?;

    let include = req
        .include
        .as_deref()
        .map(|raw| {
            Pattern::new(raw).map_err(|err| {
                ToolFault::new(
                    ErrorCode::GrepInvalidPattern,
                    format!("invalid glob {raw:?}: {err}"),
                )
            })
        })
        .transpose()?;

    let root = config
        .resolver
        .resolve(&session.cwd(), req.path.as_deref().unwrap_or(""))?;
    if !root.exists() {
        return Err(ToolFault::new(
            ErrorCode::PathNotFound,
            format!("{} does not exist", root.display()),
        ));
    }

    let mut searcher = SearcherBuilder::new()
        .line_number(true)
        .before_context(req.before_context)
        .after_context(req.after_context)
        .build();

    let mut lines: Vec<String> = Vec::new();
    let mut files_with_matches = 0usize;
    let mut budget = MAX_RESULT_LINES;

    for entry in WalkBuilder::new(&root).hidden(false).git_ignore(true).build() {
        if budget == 0 {
            break;
        }
        let Ok(entry) = entry else {
            continue;
        };
        if !entry.file_type().is_some_and(|ft| ft.is_file()) {
            continue;
        }
        let path = entry.path();

        if let Some(pattern) = &include
            && let Ok(relative) = path.strip_prefix(&root)
            && !pattern.matches_path(relative)
        {
            continue;
        }

        let display = display_path(path, &root);
        let before = lines.len();
        let matched = search_file(
            &mut searcher,
            &matcher,
            path,
            &display,
            req.output_mode,
            req.line_numbers,
            &mut lines,
            &mut budget,
        );
        if matched {
            files_with_matches += 1;
            if req.output_mode == OutputMode::Content && lines.len() > before && budget > 0 {
                // Group separator between files, ripgrep-style.
                if req.before_context > 0 || req.after_context > 0 {
                    lines.push("--".to_string());
                }
            }
        }
    }

    // Strip a trailing group separator.
    if lines.last().is_some_and(|l| l == "--") {
        lines.pop();
    }

    if files_with_matches == 0 {
        return Ok("No matches found".to_string());
    }
    Ok(truncate_chars(&lines.join("\n"), config.max_output_chars))
}

fn display_path(path: &Path, root: &Path) -> String {
    path.strip_prefix(root)
        .ok()
        .filter(|p| !p.as_os_str().is_empty())
        .map(|p| p.display().to_string())
        .unwrap_or_else(|| path.display().to_string())
}

/// Search one file, appending result lines. Returns whether anything
/// matched. Errors are swallowed.
#[allow(clippy::too_many_arguments)]
fn search_file(
    searcher: &mut Searcher,
    matcher: &RegexMatcher,
    path: &Path,
    display: &str,
    mode: OutputMode,
    line_numbers: bool,
    lines: &mut Vec<String>,
    budget: &mut usize,
) -> bool {
    let mut sink = CollectSink {
        display,
        mode,
        line_numbers,
        lines: &mut *lines,
        budget: &mut *budget,
        match_count: 0,
    };
    let _ = searcher.search_path(matcher, path, &mut sink);
    let match_count = sink.match_count;

    match mode {
        OutputMode::Content => {}
        OutputMode::FilesWithMatches => {
            if match_count > 0 && *budget > 0 {
                lines.push(display.to_string());
                *budget -= 1;
            }
        }
        OutputMode::Count => {
            if match_count > 0 && *budget > 0 {
                lines.push(format!("{display}:{match_count}"));
                *budget -= 1;
            }
        }
    }
    match_count > 0
}

struct CollectSink<'a> {
    display: &'a str,
    mode: OutputMode,
    line_numbers: bool,
    lines: &'a mut Vec<String>,
    budget: &'a mut usize,
    match_count: u64,
}

impl CollectSink<'_> {
    fn push(&mut self, line_number: Option<u64>, bytes: &[u8], separator: char) -> bool {
        if *self.budget == 0 {
            return false;
        }
        let text = String::from_utf8_lossy(bytes);
        let text = text.trim_end_matches(['\n', '\r']);
        let rendered = match (self.line_numbers, line_number) {
            (true, Some(n)) => format!("{}{}{}{}{}", self.display, separator, n, separator, text),
            _ => format!("{}{}{}", self.display, separator, text),
        };
        self.lines.push(rendered);
        *self.budget -= 1;
        true
    }
}

impl Sink for CollectSink<'_> {
    type Error = io::Error;

    fn matched(&mut self, _searcher: &Searcher, mat: &SinkMatch<'_>) -> Result<bool, io::Error> {
        self.match_count += 1;
        match self.mode {
            // For the non-content modes only the count matters; stop early
            // for files_with_matches.
            OutputMode::FilesWithMatches => Ok(false),
            OutputMode::Count => Ok(true),
            OutputMode::Content => Ok(self.push(mat.line_number(), mat.bytes(), ':')),
        }
    }

    fn context(
        &mut self,
        _searcher: &Searcher,
        ctx: &SinkContext<'_>,
    ) -> Result<bool, io::Error> {
        if self.mode != OutputMode::Content {
            return Ok(true);
        }
        Ok(self.push(ctx.line_number(), ctx.bytes(), '-'))
    }
}

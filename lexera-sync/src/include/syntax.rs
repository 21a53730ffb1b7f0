/// Include syntax detection and classification.
///
/// Handles the `!!!include(path)!!!` pattern. Where it appears decides the
/// include variant:
///   `## !!!include(cols.md)!!!`      column include
///   `- [ ] !!!include(task.md)!!!`   task include
///   anything else                    regular (inline) include
/// Supports URL-encoded paths (%20), literal spaces, and tags after the closing `!!!`.
use regex::Regex;
use std::sync::LazyLock;

use crate::state::FileKind;

static INCLUDE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"!!!include\(([^)]+)\)!!!").unwrap());

static TASK_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*- \[[ xX]\]\s").unwrap());

/// An include directive found in board markdown.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IncludeDirective {
    /// Path exactly as written.
    pub raw_path: String,
    pub kind: FileKind,
    /// Zero-based line of the directive.
    pub line: usize,
}

pub fn is_include(text: &str) -> bool {
    INCLUDE_RE.is_match(text)
}

/// Extract the raw path from the first include directive.
pub fn extract_include_path(text: &str) -> Option<String> {
    INCLUDE_RE.captures(text).map(|caps| caps[1].to_string())
}

/// Strip the include directive, returning the remaining text (tags etc).
/// For example: `!!!include(path)!!! #stack` -> ` #stack`
pub fn strip_include(text: &str) -> String {
    INCLUDE_RE.replace(text, "").to_string()
}

/// Decode URL-encoded path components (%20 -> space, etc).
pub fn decode_include_path(raw: &str) -> String {
    percent_encoding::percent_decode_str(raw)
        .decode_utf8_lossy()
        .to_string()
}

/// Include variant implied by the line a directive sits on.
pub fn classify_line(line: &str) -> FileKind {
    if line.trim_start().starts_with("## ") {
        FileKind::IncludeColumn
    } else if TASK_RE.is_match(line) {
        FileKind::IncludeTask
    } else {
        FileKind::IncludeRegular
    }
}

/// All include directives in a board, in document order.
/// Fenced code blocks are skipped.
pub fn find_includes(markdown: &str) -> Vec<IncludeDirective> {
    let mut found = Vec::new();
    let mut in_fence = false;

    for (idx, line) in markdown.lines().enumerate() {
        if line.trim_start().starts_with("```") {
            in_fence = !in_fence;
            continue;
        }
        if in_fence {
            continue;
        }
        let kind = classify_line(line);
        for caps in INCLUDE_RE.captures_iter(line) {
            found.push(IncludeDirective {
                raw_path: caps[1].to_string(),
                kind,
                line: idx,
            });
        }
    }
    found
}

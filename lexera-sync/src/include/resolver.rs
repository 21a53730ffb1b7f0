/// Include path resolution.
///
/// Raw include paths (may be URL-encoded, relative) are resolved against the
/// main board file's parent directory. Each resolved path is reported once;
/// the first directive referencing it decides its variant.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use super::syntax::{decode_include_path, find_includes};
use crate::state::FileKind;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedInclude {
    pub raw_path: String,
    pub path: PathBuf,
    pub kind: FileKind,
}

/// Resolve a raw include path relative to the board's directory.
/// Handles URL-encoded paths (%20), `./` prefix, and relative paths.
pub fn resolve_include_path(raw_path: &str, board_dir: &Path) -> PathBuf {
    let decoded = decode_include_path(raw_path);
    let cleaned = decoded.strip_prefix("./").unwrap_or(&decoded);
    let resolved = board_dir.join(cleaned);

    // Try to canonicalize, fall back to the joined path
    std::fs::canonicalize(&resolved).unwrap_or(resolved)
}

/// Path of `path` relative to `base`, or its file name when outside `base`.
pub fn relative_display(path: &Path, base: &Path) -> String {
    match path.strip_prefix(base) {
        Ok(rel) => rel.to_string_lossy().to_string(),
        Err(_) => path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| path.to_string_lossy().to_string()),
    }
}

/// Resolve every include referenced by `markdown`, deduplicated by path.
pub fn resolve_includes(markdown: &str, board_dir: &Path) -> Vec<ResolvedInclude> {
    let mut seen = HashSet::new();
    find_includes(markdown)
        .into_iter()
        .filter_map(|directive| {
            let path = resolve_include_path(&directive.raw_path, board_dir);
            seen.insert(path.clone()).then(|| ResolvedInclude {
                raw_path: directive.raw_path,
                path,
                kind: directive.kind,
            })
        })
        .collect()
}

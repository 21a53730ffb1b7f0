/// Event types flowing in from the disk watcher and out to listeners.

use std::path::PathBuf;
use serde::{Deserialize, Serialize};

use crate::conflict::types::ResolutionAction;
use crate::state::FileKind;

/// SHA-256 fingerprint of file content, CRLF-normalized.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ContentFingerprint(pub String);

impl ContentFingerprint {
    pub fn from_content(content: &str) -> Self {
        use sha2::{Digest, Sha256};
        let normalized = content.replace("\r\n", "\n");
        let mut hasher = Sha256::new();
        hasher.update(normalized.as_bytes());
        Self(hex::encode(hasher.finalize()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeType {
    Modified,
    Deleted,
    Created,
}

/// A filesystem notification for a tracked path, already filtered for self-writes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileChangeEvent {
    #[serde(serialize_with = "serialize_path", deserialize_with = "deserialize_path")]
    pub path: PathBuf,
    pub change: ChangeType,
}

impl FileChangeEvent {
    pub fn new(path: impl Into<PathBuf>, change: ChangeType) -> Self {
        Self {
            path: path.into(),
            change,
        }
    }
}

/// Events emitted after the coordinator changed a file's state.
/// Include events carry the parent so listeners can re-derive the board.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum SyncEvent {
    Reloaded {
        #[serde(serialize_with = "serialize_path", deserialize_with = "deserialize_path")]
        path: PathBuf,
        kind: FileKind,
        #[serde(serialize_with = "serialize_opt_path", deserialize_with = "deserialize_opt_path")]
        parent: Option<PathBuf>,
        /// Content was re-read from disk and the board must be fully re-parsed.
        force_reparse: bool,
    },
    Saved {
        #[serde(serialize_with = "serialize_path", deserialize_with = "deserialize_path")]
        path: PathBuf,
        kind: FileKind,
    },
    Deleted {
        #[serde(serialize_with = "serialize_path", deserialize_with = "deserialize_path")]
        path: PathBuf,
        kind: FileKind,
        #[serde(serialize_with = "serialize_opt_path", deserialize_with = "deserialize_opt_path")]
        parent: Option<PathBuf>,
    },
    ExternalChangeIgnored {
        #[serde(serialize_with = "serialize_path", deserialize_with = "deserialize_path")]
        path: PathBuf,
    },
    ConflictResolved {
        #[serde(serialize_with = "serialize_path", deserialize_with = "deserialize_path")]
        path: PathBuf,
        action: ResolutionAction,
    },
    ConflictCancelled {
        #[serde(serialize_with = "serialize_path", deserialize_with = "deserialize_path")]
        path: PathBuf,
    },
    IncludesChanged {
        added: Vec<String>,
        removed: Vec<String>,
    },
}

fn serialize_path<S: serde::Serializer>(path: &PathBuf, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_str(&path.to_string_lossy())
}

fn deserialize_path<'de, D: serde::Deserializer<'de>>(d: D) -> Result<PathBuf, D::Error> {
    let s = String::deserialize(d)?;
    Ok(PathBuf::from(s))
}

fn serialize_opt_path<S: serde::Serializer>(path: &Option<PathBuf>, s: S) -> Result<S::Ok, S::Error> {
    match path {
        Some(p) => s.serialize_some(&p.to_string_lossy()),
        None => s.serialize_none(),
    }
}

fn deserialize_opt_path<'de, D: serde::Deserializer<'de>>(d: D) -> Result<Option<PathBuf>, D::Error> {
    let s = Option::<String>::deserialize(d)?;
    Ok(s.map(PathBuf::from))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fingerprint_deterministic() {
        let fp1 = ContentFingerprint::from_content("hello world");
        let fp2 = ContentFingerprint::from_content("hello world");
        assert_eq!(fp1, fp2);
    }

    #[test]
    fn test_fingerprint_normalized_line_endings() {
        let fp1 = ContentFingerprint::from_content("line1\nline2");
        let fp2 = ContentFingerprint::from_content("line1\r\nline2");
        assert_eq!(fp1, fp2);
    }

    #[test]
    fn test_sync_event_json_shape() {
        let event = SyncEvent::Deleted {
            path: PathBuf::from("/b/col.md"),
            kind: FileKind::IncludeColumn,
            parent: Some(PathBuf::from("/b/board.md")),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "Deleted");
        assert_eq!(json["path"], "/b/col.md");
        assert_eq!(json["kind"], "include-column");
        assert_eq!(json["parent"], "/b/board.md");

        let back: SyncEvent = serde_json::from_value(json).unwrap();
        assert_eq!(back, event);
    }
}

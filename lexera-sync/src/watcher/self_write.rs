/// One-shot self-write suppression.
///
/// Before every save: `mark(path, content)`.
/// On the next watcher notification for that path: `check_and_consume`.
/// The mark is consumed by that notification whatever the outcome. If the
/// current disk text is known and its fingerprint differs from what we wrote,
/// someone else wrote after us and the notification is let through.
/// Marks that never see a notification expire after the TTL.
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use super::types::ContentFingerprint;

pub const DEFAULT_SELF_WRITE_TTL: Duration = Duration::from_secs(10);

struct PendingWrite {
    fingerprint: ContentFingerprint,
    registered_at: Instant,
}

pub struct SelfWriteTracker {
    pending: HashMap<PathBuf, PendingWrite>,
    ttl: Duration,
}

impl Default for SelfWriteTracker {
    fn default() -> Self {
        Self::new(DEFAULT_SELF_WRITE_TTL)
    }
}

impl SelfWriteTracker {
    pub fn new(ttl: Duration) -> Self {
        Self {
            pending: HashMap::new(),
            ttl,
        }
    }

    /// Mark the next notification for `path` as our own write of `content`.
    pub fn mark(&mut self, path: &Path, content: &str) {
        self.pending.insert(
            path.to_path_buf(),
            PendingWrite {
                fingerprint: ContentFingerprint::from_content(content),
                registered_at: Instant::now(),
            },
        );
    }

    /// Drop a mark without a notification (e.g. the write failed).
    pub fn unmark(&mut self, path: &Path) {
        self.pending.remove(path);
    }

    /// Returns true if the notification should be suppressed.
    /// `current_content` is the disk text if it could be read.
    pub fn check_and_consume(&mut self, path: &Path, current_content: Option<&str>) -> bool {
        self.cleanup_expired();

        let Some(entry) = self.pending.remove(path) else {
            return false;
        };

        match current_content {
            Some(content) if ContentFingerprint::from_content(content) != entry.fingerprint => {
                log::info!(
                    "[lexera.watcher.self_write] {:?} changed after our write, not suppressing",
                    path
                );
                false
            }
            _ => true,
        }
    }

    pub fn cleanup_expired(&mut self) {
        let now = Instant::now();
        let ttl = self.ttl;
        self.pending
            .retain(|_, entry| now.duration_since(entry.registered_at) < ttl);
    }

    pub fn has_pending(&self, path: &Path) -> bool {
        self.pending.contains_key(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mark_and_consume() {
        let mut tracker = SelfWriteTracker::default();
        let path = Path::new("/tmp/board.md");
        let content = "# Hello\n\n- [ ] Task 1\n";

        tracker.mark(path, content);
        assert!(tracker.has_pending(path));

        assert!(tracker.check_and_consume(path, Some(content)));
        assert!(!tracker.has_pending(path));
        // one-shot
        assert!(!tracker.check_and_consume(path, Some(content)));
    }

    #[test]
    fn test_unreadable_disk_still_suppressed() {
        let mut tracker = SelfWriteTracker::default();
        let path = Path::new("/tmp/board.md");
        tracker.mark(path, "content");
        assert!(tracker.check_and_consume(path, None));
    }

    #[test]
    fn test_foreign_content_consumes_but_passes() {
        let mut tracker = SelfWriteTracker::default();
        let path = Path::new("/tmp/board.md");

        tracker.mark(path, "ours");
        assert!(!tracker.check_and_consume(path, Some("theirs")));
        assert!(!tracker.has_pending(path));
    }

    #[test]
    fn test_other_paths_unaffected() {
        let mut tracker = SelfWriteTracker::default();
        tracker.mark(Path::new("/tmp/a.md"), "a");
        assert!(!tracker.check_and_consume(Path::new("/tmp/b.md"), Some("a")));
        assert!(tracker.has_pending(Path::new("/tmp/a.md")));
    }

    #[test]
    fn test_normalized_line_endings() {
        let mut tracker = SelfWriteTracker::default();
        let path = Path::new("/tmp/board.md");

        tracker.mark(path, "line1\nline2");
        assert!(tracker.check_and_consume(path, Some("line1\r\nline2")));
    }

    #[test]
    fn test_expired_mark_is_dropped() {
        let mut tracker = SelfWriteTracker::default();
        let path = Path::new("/tmp/board.md");

        tracker.mark(path, "content");
        if let Some(entry) = tracker.pending.get_mut(path) {
            entry.registered_at = Instant::now() - Duration::from_secs(15);
        }

        assert!(!tracker.check_and_consume(path, Some("content")));
        assert!(!tracker.has_pending(path));
    }

    #[test]
    fn test_unmark() {
        let mut tracker = SelfWriteTracker::default();
        let path = Path::new("/tmp/board.md");
        tracker.mark(path, "content");
        tracker.unmark(path);
        assert!(!tracker.has_pending(path));
    }
}

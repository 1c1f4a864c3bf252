//! Bounded, deduplicated log of system notices.

use chrono::{DateTime, Utc};
use murmur_proto::RoomId;

/// Role of a notification in the log.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoticeKind {
    /// Free-standing notice.
    Info,
    /// Section header grouping the notices that follow it.
    Header,
    /// Unread summary line for one room.
    Unread,
}

/// A system notice.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    /// Notice text as added.
    pub text: String,
    /// Time the notice was added.
    pub timestamp: DateTime<Utc>,
    /// Room the notice is about, if any. Leaving the room purges it.
    pub room: Option<RoomId>,
    /// Role in the log.
    pub kind: NoticeKind,
}

/// Key two notices are compared by: trimmed, whitespace-collapsed, lowercase.
fn normalize(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ").to_lowercase()
}

/// Bounded notification log.
///
/// An add is suppressed when one of the `window` most recent entries has the
/// same normalized text. Once the log holds more than `cap` entries the oldest
/// are evicted down to half the cap.
#[derive(Debug, Clone)]
pub struct NotificationLog {
    entries: Vec<Notification>,
    cap: usize,
    window: usize,
}

impl NotificationLog {
    /// Create an empty log.
    pub fn new(cap: usize, window: usize) -> Self {
        Self { entries: Vec::new(), cap: cap.max(2), window: window.max(1) }
    }

    /// Add an unscoped notice. Returns false if it was a duplicate.
    pub fn add(&mut self, text: impl Into<String>) -> bool {
        self.add_scoped(None, NoticeKind::Info, text)
    }

    /// Add a section header. Returns false if it was a duplicate.
    pub fn add_header(&mut self, group: impl Into<String>) -> bool {
        self.add_scoped(None, NoticeKind::Header, group)
    }

    /// Add a notice tied to `room`. Returns false if it was a duplicate.
    pub fn add_scoped(
        &mut self,
        room: Option<RoomId>,
        kind: NoticeKind,
        text: impl Into<String>,
    ) -> bool {
        let text = text.into();
        let key = normalize(&text);
        if key.is_empty() {
            return false;
        }

        let start = self.entries.len().saturating_sub(self.window);
        if self.entries[start..].iter().any(|n| normalize(&n.text) == key) {
            tracing::trace!(text = %text, "suppressed duplicate notification");
            return false;
        }

        self.entries.push(Notification { text, timestamp: Utc::now(), room, kind });
        if self.entries.len() > self.cap {
            let evict = self.entries.len() - self.cap / 2;
            self.entries.drain(..evict);
        }
        true
    }

    /// Replace the unread summary of `room` with `text`.
    ///
    /// Returns false if an identical summary is already shown.
    pub fn set_unread(&mut self, room: &RoomId, text: impl Into<String>) -> bool {
        let text = text.into();
        let key = normalize(&text);
        let is_summary =
            |n: &Notification| n.kind == NoticeKind::Unread && n.room.as_ref() == Some(room);
        if self.entries.iter().any(|n| is_summary(n) && normalize(&n.text) == key) {
            return false;
        }

        self.entries.retain(|n| !is_summary(n));
        self.add_scoped(Some(room.clone()), NoticeKind::Unread, text)
    }

    /// Remove every entry. A later identical add succeeds.
    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Remove every entry scoped to `room`.
    pub fn purge_room(&mut self, room: &RoomId) {
        self.entries.retain(|n| n.room.as_ref() != Some(room));
        self.drop_orphan_headers();
    }

    /// Remove the unread summary of `room`.
    pub fn purge_unread(&mut self, room: &RoomId) {
        self.entries.retain(|n| !(n.kind == NoticeKind::Unread && n.room.as_ref() == Some(room)));
        self.drop_orphan_headers();
    }

    fn drop_orphan_headers(&mut self) {
        if !self.entries.iter().any(|n| n.kind == NoticeKind::Unread) {
            self.entries.retain(|n| n.kind != NoticeKind::Header);
        }
    }

    /// Entries, oldest first.
    pub fn entries(&self) -> &[Notification] {
        &self.entries
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True if the log is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

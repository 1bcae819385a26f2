//! Local message-read tracking at `.beads/mail-read.jsonl`.
//!
//! Hashes are computed locally and never reconciled across hosts — the log
//! only keeps one pane's TUI from re-surfacing mail it already showed.

use std::collections::HashSet;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use md5::{Digest, Md5};
use serde::{Deserialize, Serialize};
use tracing::warn;

use corral_core::fsutil;
use corral_core::paths::ProjectPaths;

use crate::rpc::InboxMessage;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ReadEntry {
    hash: String,
    read_at: DateTime<Utc>,
}

/// Content hash of a message: `md5(id|subject|body)`.
pub fn message_hash(message: &InboxMessage) -> String {
    let mut hasher = Md5::new();
    hasher.update(message.id.to_le_bytes());
    hasher.update(b"|");
    hasher.update(message.subject.as_bytes());
    hasher.update(b"|");
    hasher.update(message.body.as_bytes());
    hasher.finalize().iter().map(|b| format!("{b:02x}")).collect()
}

#[derive(Debug, Clone)]
pub struct MailReadLog {
    path: PathBuf,
}

impl MailReadLog {
    pub fn new(paths: &ProjectPaths) -> Self {
        Self { path: paths.mail_read_log() }
    }

    pub fn mark_read(&self, message: &InboxMessage) {
        let entry = ReadEntry { hash: message_hash(message), read_at: Utc::now() };
        if let Err(e) = fsutil::append_jsonl(&self.path, &entry) {
            warn!(error = %e, "failed to record read mail");
        }
    }

    fn read_hashes(&self) -> HashSet<String> {
        fsutil::read_jsonl::<ReadEntry>(&self.path)
            .into_iter()
            .map(|e| e.hash)
            .collect()
    }

    pub fn is_read(&self, message: &InboxMessage) -> bool {
        self.read_hashes().contains(&message_hash(message))
    }

    /// Keep only messages not yet marked read.
    pub fn filter_unread(&self, messages: Vec<InboxMessage>) -> Vec<InboxMessage> {
        let seen = self.read_hashes();
        messages
            .into_iter()
            .filter(|m| !seen.contains(&message_hash(m)))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rpc::Importance;

    fn msg(id: u64, subject: &str) -> InboxMessage {
        InboxMessage {
            id,
            from: "amber".into(),
            subject: subject.into(),
            body: "body".into(),
            importance: Importance::Normal,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn mark_then_filter() {
        let dir = tempfile::tempdir().unwrap();
        let log = MailReadLog::new(&ProjectPaths::new(dir.path()));
        let a = msg(1, "first");
        let b = msg(2, "second");

        assert!(!log.is_read(&a));
        log.mark_read(&a);
        assert!(log.is_read(&a));

        let unread = log.filter_unread(vec![a, b]);
        assert_eq!(unread.len(), 1);
        assert_eq!(unread[0].id, 2);
    }

    #[test]
    fn hash_depends_on_content() {
        let a = msg(1, "subject");
        let mut b = msg(1, "subject");
        b.body = "different".into();
        assert_ne!(message_hash(&a), message_hash(&b));
    }
}

//! User-facing transient notices (toasts and alerts)
//!
//! Components receive a [`Notices`] handle at construction and push messages
//! into it; whatever renders the UI subscribes to the channel.

use serde::Serialize;
use tokio::sync::broadcast;

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum NoticeKind {
    Info,
    Success,
    Warning,
    Error,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct Notice {
    pub id: String,
    pub kind: NoticeKind,
    /// Alerts carry a title, toasts don't
    pub title: Option<String>,
    pub message: String,
}

impl Notice {
    pub fn is_alert(&self) -> bool {
        self.title.is_some()
    }
}

/// Broadcast handle for notices
#[derive(Clone)]
pub struct Notices {
    tx: broadcast::Sender<Notice>,
}

impl Notices {
    pub fn new() -> Self {
        let (tx, _rx) = broadcast::channel(64);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Notice> {
        self.tx.subscribe()
    }

    /// Short-lived message without a title
    pub fn toast(&self, message: impl Into<String>, kind: NoticeKind) {
        self.emit(None, message.into(), kind);
    }

    /// Modal-style message with a title
    pub fn alert(&self, title: impl Into<String>, message: impl Into<String>, kind: NoticeKind) {
        self.emit(Some(title.into()), message.into(), kind);
    }

    fn emit(&self, title: Option<String>, message: String, kind: NoticeKind) {
        let notice = Notice {
            id: ulid::Ulid::new().to_string(),
            kind,
            title,
            message,
        };
        tracing::debug!(?kind, "notice: {}", notice.message);
        // Ignore send errors (no subscribers is fine)
        let _ = self.tx.send(notice);
    }
}

impl Default for Notices {
    fn default() -> Self {
        Self::new()
    }
}

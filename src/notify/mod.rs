//! Notification sink.
//!
//! The engine produces per-user notification obligations (bet placed
//! from queue, deposit credited, withdrawal failed, round winnings).
//! Delivery is fire-and-forget: a failed delivery must never roll back
//! a ledger mutation that already succeeded, so callers log and drop
//! errors from this trait.

use anyhow::Result;
use async_trait::async_trait;
use std::sync::Mutex;
use tracing::info;

/// Fire-and-forget "tell this user X".
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, user_id: &str, message: &str) -> Result<()>;
}

/// Default sink: writes notifications to the structured log. The
/// hosting process (chat bot, web frontend) substitutes its own.
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, user_id: &str, message: &str) -> Result<()> {
        info!(user_id, message, "notification");
        Ok(())
    }
}

/// Test sink that records every notification.
pub struct RecordingNotifier {
    messages: Mutex<Vec<(String, String)>>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self {
            messages: Mutex::new(Vec::new()),
        }
    }

    pub fn messages(&self) -> Vec<(String, String)> {
        self.messages.lock().unwrap().clone()
    }

    pub fn messages_for(&self, user_id: &str) -> Vec<String> {
        self.messages
            .lock()
            .unwrap()
            .iter()
            .filter(|(id, _)| id == user_id)
            .map(|(_, m)| m.clone())
            .collect()
    }
}

impl Default for RecordingNotifier {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn notify(&self, user_id: &str, message: &str) -> Result<()> {
        self.messages
            .lock()
            .unwrap()
            .push((user_id.to_string(), message.to_string()));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_recording_notifier_captures_messages() {
        let notifier = RecordingNotifier::new();
        notifier.notify("u1", "hello").await.unwrap();
        notifier.notify("u2", "other").await.unwrap();
        notifier.notify("u1", "again").await.unwrap();

        assert_eq!(notifier.messages().len(), 3);
        assert_eq!(notifier.messages_for("u1"), vec!["hello", "again"]);
    }
}

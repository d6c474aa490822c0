//! Delivers submissions to the admin chats over a transport channel.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::channels::{Channel, OutgoingMessage};
use crate::error::ChannelError;
use crate::gateway::NotificationGateway;
use crate::report::{Submission, format_submission};

/// Sends formatted submissions to a fixed list of chats.
pub struct ChannelNotifier {
    channel: Arc<dyn Channel>,
    chats: Vec<i64>,
}

impl ChannelNotifier {
    pub fn new(channel: Arc<dyn Channel>, chats: Vec<i64>) -> Self {
        Self { channel, chats }
    }
}

#[async_trait]
impl NotificationGateway for ChannelNotifier {
    /// True if at least one chat accepted the message.
    async fn deliver(
        &self,
        submission: &Submission,
        analysis: Option<&str>,
    ) -> Result<bool, ChannelError> {
        if self.chats.is_empty() {
            warn!("No admin chats configured; submission not delivered");
            return Ok(false);
        }

        let text = format_submission(submission, analysis);
        let mut delivered = 0usize;
        for &chat_id in &self.chats {
            match self
                .channel
                .send(chat_id, OutgoingMessage::text(text.clone()))
                .await
            {
                Ok(()) => delivered += 1,
                Err(e) => warn!(chat_id, error = %e, "Failed to deliver submission"),
            }
        }

        debug!(delivered, total = self.chats.len(), "Submission delivery finished");
        Ok(delivered > 0)
    }
}

//! Channel abstraction for message I/O.

pub mod cli;
pub mod telegram;

use std::pin::Pin;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::Stream;
use serde::Serialize;
use uuid::Uuid;

use crate::error::ChannelError;
use crate::wizard::Render;

pub use cli::CliChannel;
pub use telegram::TelegramChannel;

/// Stream of inbound messages produced by a channel.
pub type MessageStream = Pin<Box<dyn Stream<Item = IncomingMessage> + Send>>;

/// What the user sent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Payload {
    Text { text: String },
    /// An inline button press.
    Callback {
        data: String,
        /// Transport id used to acknowledge the press.
        query_id: Option<String>,
    },
}

/// A message received from a channel.
#[derive(Debug, Clone, Serialize)]
pub struct IncomingMessage {
    pub id: Uuid,
    pub channel: String,
    pub user_id: i64,
    /// Where replies go.
    pub chat_id: i64,
    pub username: Option<String>,
    pub display_name: Option<String>,
    pub payload: Payload,
    pub received_at: DateTime<Utc>,
}

impl IncomingMessage {
    pub fn text(channel: &str, user_id: i64, chat_id: i64, text: impl Into<String>) -> Self {
        Self::with_payload(
            channel,
            user_id,
            chat_id,
            Payload::Text { text: text.into() },
        )
    }

    pub fn callback(
        channel: &str,
        user_id: i64,
        chat_id: i64,
        data: impl Into<String>,
        query_id: Option<String>,
    ) -> Self {
        Self::with_payload(
            channel,
            user_id,
            chat_id,
            Payload::Callback {
                data: data.into(),
                query_id,
            },
        )
    }

    fn with_payload(channel: &str, user_id: i64, chat_id: i64, payload: Payload) -> Self {
        Self {
            id: Uuid::new_v4(),
            channel: channel.to_string(),
            user_id,
            chat_id,
            username: None,
            display_name: None,
            payload,
            received_at: Utc::now(),
        }
    }

    pub fn with_username(mut self, username: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self
    }

    pub fn with_display_name(mut self, name: impl Into<String>) -> Self {
        self.display_name = Some(name.into());
        self
    }

    /// Best name to show for the sender.
    pub fn sender_name(&self) -> Option<String> {
        self.display_name
            .clone()
            .or_else(|| self.username.as_ref().map(|u| format!("@{u}")))
    }
}

/// An inline button attached to an outgoing message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Button {
    pub label: String,
    /// Callback payload returned when pressed.
    pub data: String,
}

/// A message to send to a chat.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OutgoingMessage {
    pub text: String,
    pub buttons: Vec<Button>,
}

impl OutgoingMessage {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            buttons: Vec::new(),
        }
    }
}

impl From<Render> for OutgoingMessage {
    fn from(render: Render) -> Self {
        Self {
            text: render.text,
            buttons: render
                .options
                .into_iter()
                .map(|o| Button {
                    data: o.event.callback_data(),
                    label: o.label,
                })
                .collect(),
        }
    }
}

/// A messaging transport.
#[async_trait]
pub trait Channel: Send + Sync {
    fn name(&self) -> &str;

    /// Start receiving messages.
    async fn start(&self) -> Result<MessageStream, ChannelError>;

    /// Send a message to a chat.
    async fn send(&self, chat_id: i64, message: OutgoingMessage) -> Result<(), ChannelError>;

    /// Acknowledge a button press. No-op for channels without callbacks.
    async fn acknowledge(&self, _msg: &IncomingMessage) -> Result<(), ChannelError> {
        Ok(())
    }

    async fn health_check(&self) -> Result<(), ChannelError>;

    async fn shutdown(&self) -> Result<(), ChannelError> {
        Ok(())
    }
}

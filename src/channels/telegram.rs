//! Telegram channel — long-polls the Bot API for messages and button presses.

use async_trait::async_trait;
use serde_json::Value;

use crate::channels::{Button, Channel, IncomingMessage, MessageStream, OutgoingMessage, Payload};
use crate::error::ChannelError;

/// Maximum message length for Telegram's sendMessage API.
const TELEGRAM_MAX_MESSAGE_LENGTH: usize = 4096;

/// Telegram channel — connects to the Bot API via long-polling.
pub struct TelegramChannel {
    bot_token: String,
    client: reqwest::Client,
}

impl TelegramChannel {
    pub fn new(bot_token: String) -> Self {
        Self {
            bot_token,
            client: reqwest::Client::new(),
        }
    }

    fn api_url(&self, method: &str) -> String {
        format!("https://api.telegram.org/bot{}/{method}", self.bot_token)
    }

    /// Send a text message, splitting at Telegram's 4096 char limit.
    /// The keyboard is attached to the last chunk.
    async fn send_message(&self, chat_id: i64, message: &OutgoingMessage) -> Result<(), ChannelError> {
        let chunks = split_message(&message.text, TELEGRAM_MAX_MESSAGE_LENGTH);
        let last = chunks.len().saturating_sub(1);

        for (i, chunk) in chunks.iter().enumerate() {
            let markup = if i == last {
                inline_keyboard(&message.buttons)
            } else {
                None
            };
            self.send_message_chunk(chat_id, chunk, markup.as_ref()).await?;
        }
        Ok(())
    }

    /// Send a single message chunk (≤4096 chars), Markdown-first with fallback.
    async fn send_message_chunk(
        &self,
        chat_id: i64,
        text: &str,
        markup: Option<&Value>,
    ) -> Result<(), ChannelError> {
        let mut markdown_body = serde_json::json!({
            "chat_id": chat_id,
            "text": text,
            "parse_mode": "Markdown"
        });
        if let Some(markup) = markup {
            markdown_body["reply_markup"] = markup.clone();
        }

        let markdown_resp = self
            .client
            .post(self.api_url("sendMessage"))
            .json(&markdown_body)
            .send()
            .await
            .map_err(|e| ChannelError::SendFailed {
                name: "telegram".into(),
                reason: e.to_string(),
            })?;

        if markdown_resp.status().is_success() {
            return Ok(());
        }

        let markdown_status = markdown_resp.status();
        tracing::warn!(
            status = ?markdown_status,
            "Telegram sendMessage with Markdown failed; retrying without parse_mode"
        );

        // User answers often contain unbalanced `*` or `_`.
        let mut plain_body = serde_json::json!({
            "chat_id": chat_id,
            "text": text,
        });
        if let Some(markup) = markup {
            plain_body["reply_markup"] = markup.clone();
        }
        let plain_resp = self
            .client
            .post(self.api_url("sendMessage"))
            .json(&plain_body)
            .send()
            .await
            .map_err(|e| ChannelError::SendFailed {
                name: "telegram".into(),
                reason: e.to_string(),
            })?;

        if !plain_resp.status().is_success() {
            let plain_err = plain_resp.text().await.unwrap_or_default();
            return Err(ChannelError::SendFailed {
                name: "telegram".into(),
                reason: format!(
                    "sendMessage failed (markdown: {}, plain: {})",
                    markdown_status, plain_err
                ),
            });
        }

        Ok(())
    }
}

#[async_trait]
impl Channel for TelegramChannel {
    fn name(&self) -> &str {
        "telegram"
    }

    async fn start(&self) -> Result<MessageStream, ChannelError> {
        let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
        let url = self.api_url("getUpdates");
        let client = self.client.clone();

        tokio::spawn(async move {
            let mut offset: i64 = 0;

            tracing::info!("Telegram channel listening for messages...");

            loop {
                let body = serde_json::json!({
                    "offset": offset,
                    "timeout": 30,
                    "allowed_updates": ["message", "callback_query"]
                });

                let resp = match client.post(&url).json(&body).send().await {
                    Ok(r) => r,
                    Err(e) => {
                        tracing::warn!("Telegram poll error: {e}");
                        tokio::time::sleep(std::time::Duration::from_secs(5)).await;
                        continue;
                    }
                };

                let data: Value = match resp.json().await {
                    Ok(d) => d,
                    Err(e) => {
                        tracing::warn!("Telegram parse error: {e}");
                        tokio::time::sleep(std::time::Duration::from_secs(5)).await;
                        continue;
                    }
                };

                let Some(results) = data.get("result").and_then(Value::as_array) else {
                    continue;
                };

                for update in results {
                    if let Some(uid) = update.get("update_id").and_then(Value::as_i64) {
                        offset = uid + 1;
                    }

                    let Some(incoming) = parse_update(update) else {
                        continue;
                    };

                    if tx.send(incoming).is_err() {
                        tracing::info!("Telegram listener channel closed");
                        return;
                    }
                }
            }
        });

        let stream = futures::stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|msg| (msg, rx))
        });

        Ok(Box::pin(stream))
    }

    async fn send(&self, chat_id: i64, message: OutgoingMessage) -> Result<(), ChannelError> {
        self.send_message(chat_id, &message).await
    }

    async fn acknowledge(&self, msg: &IncomingMessage) -> Result<(), ChannelError> {
        let Payload::Callback {
            query_id: Some(query_id),
            ..
        } = &msg.payload
        else {
            return Ok(());
        };

        let resp = self
            .client
            .post(self.api_url("answerCallbackQuery"))
            .json(&serde_json::json!({ "callback_query_id": query_id }))
            .send()
            .await
            .map_err(|e| ChannelError::SendFailed {
                name: "telegram".into(),
                reason: e.to_string(),
            })?;

        if !resp.status().is_success() {
            tracing::debug!(status = ?resp.status(), "answerCallbackQuery rejected");
        }
        Ok(())
    }

    async fn health_check(&self) -> Result<(), ChannelError> {
        let resp = self
            .client
            .get(self.api_url("getMe"))
            .send()
            .await
            .map_err(|e| ChannelError::StartupFailed {
                name: "telegram".into(),
                reason: e.to_string(),
            })?;

        if resp.status().is_success() {
            Ok(())
        } else {
            Err(ChannelError::HealthCheckFailed {
                name: format!("telegram (getMe returned {})", resp.status()),
            })
        }
    }

    async fn shutdown(&self) -> Result<(), ChannelError> {
        tracing::info!("Telegram channel shutting down");
        Ok(())
    }
}

// ── Helpers ─────────────────────────────────────────────────────────

/// Turn one `getUpdates` entry into an inbound message.
/// Returns `None` for update types the bot does not handle.
fn parse_update(update: &Value) -> Option<IncomingMessage> {
    if let Some(query) = update.get("callback_query") {
        let from = query.get("from")?;
        let user_id = from.get("id").and_then(Value::as_i64)?;
        let chat_id = query
            .get("message")
            .and_then(|m| m.get("chat"))
            .and_then(|c| c.get("id"))
            .and_then(Value::as_i64)
            .unwrap_or(user_id);
        let data = query.get("data").and_then(Value::as_str)?;
        let query_id = query.get("id").and_then(Value::as_str).map(String::from);

        let incoming = IncomingMessage::callback("telegram", user_id, chat_id, data, query_id);
        return Some(with_sender(incoming, from));
    }

    let message = update.get("message")?;
    let text = message.get("text").and_then(Value::as_str)?;
    let from = message.get("from")?;
    let user_id = from.get("id").and_then(Value::as_i64)?;
    let chat_id = message
        .get("chat")
        .and_then(|c| c.get("id"))
        .and_then(Value::as_i64)
        .unwrap_or(user_id);

    let incoming = IncomingMessage::text("telegram", user_id, chat_id, text);
    Some(with_sender(incoming, from))
}

fn with_sender(mut incoming: IncomingMessage, from: &Value) -> IncomingMessage {
    if let Some(username) = from.get("username").and_then(Value::as_str) {
        incoming = incoming.with_username(username);
    }
    let first = from.get("first_name").and_then(Value::as_str);
    let last = from.get("last_name").and_then(Value::as_str);
    let full = match (first, last) {
        (Some(f), Some(l)) => Some(format!("{f} {l}")),
        (Some(f), None) => Some(f.to_string()),
        (None, Some(l)) => Some(l.to_string()),
        (None, None) => None,
    };
    if let Some(name) = full {
        incoming = incoming.with_display_name(name);
    }
    incoming
}

/// One button per row.
fn inline_keyboard(buttons: &[Button]) -> Option<Value> {
    if buttons.is_empty() {
        return None;
    }
    let rows: Vec<Value> = buttons
        .iter()
        .map(|b| serde_json::json!([{ "text": b.label, "callback_data": b.data }]))
        .collect();
    Some(serde_json::json!({ "inline_keyboard": rows }))
}

/// Split a message into chunks that fit Telegram's character limit.
/// Tries to split on newlines, then spaces, then hard-cuts on a char boundary.
fn split_message(text: &str, max_len: usize) -> Vec<String> {
    if text.len() <= max_len {
        return vec![text.to_string()];
    }

    let mut chunks = Vec::new();
    let mut remaining = text;

    while !remaining.is_empty() {
        if remaining.len() <= max_len {
            chunks.push(remaining.to_string());
            break;
        }

        let mut boundary = max_len;
        while !remaining.is_char_boundary(boundary) {
            boundary -= 1;
        }

        let chunk = &remaining[..boundary];
        let split_at = chunk
            .rfind('\n')
            .or_else(|| chunk.rfind(' '))
            .unwrap_or(boundary);

        // Don't split at position 0 (infinite loop guard)
        let split_at = if split_at == 0 { boundary } else { split_at };

        chunks.push(remaining[..split_at].to_string());
        remaining = remaining[split_at..].trim_start();
    }

    chunks
}

// ── Tests ───────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn telegram_channel_name() {
        let channel = TelegramChannel::new("token".into());
        assert_eq!(channel.name(), "telegram");
    }

    #[test]
    fn telegram_api_url() {
        let channel = TelegramChannel::new("123:ABC".into());
        assert_eq!(
            channel.api_url("getUpdates"),
            "https://api.telegram.org/bot123:ABC/getUpdates"
        );
    }

    #[test]
    fn parse_text_message() {
        let update = serde_json::json!({
            "update_id": 10,
            "message": {
                "text": "/report",
                "from": {"id": 42, "username": "ann", "first_name": "Ann", "last_name": "Lee"},
                "chat": {"id": 4200}
            }
        });
        let msg = parse_update(&update).unwrap();
        assert_eq!(msg.user_id, 42);
        assert_eq!(msg.chat_id, 4200);
        assert_eq!(msg.username.as_deref(), Some("ann"));
        assert_eq!(msg.display_name.as_deref(), Some("Ann Lee"));
        assert_eq!(msg.payload, Payload::Text { text: "/report".into() });
    }

    #[test]
    fn parse_callback_query() {
        let update = serde_json::json!({
            "update_id": 11,
            "callback_query": {
                "id": "cb-1",
                "data": "wiz:confirm",
                "from": {"id": 42, "first_name": "Ann"},
                "message": {"chat": {"id": 4200}}
            }
        });
        let msg = parse_update(&update).unwrap();
        assert_eq!(msg.chat_id, 4200);
        assert_eq!(
            msg.payload,
            Payload::Callback {
                data: "wiz:confirm".into(),
                query_id: Some("cb-1".into())
            }
        );
    }

    #[test]
    fn parse_ignores_non_text_updates() {
        let sticker = serde_json::json!({
            "update_id": 12,
            "message": {"sticker": {}, "from": {"id": 1}, "chat": {"id": 1}}
        });
        assert!(parse_update(&sticker).is_none());
        assert!(parse_update(&serde_json::json!({"update_id": 13})).is_none());
    }

    #[test]
    fn keyboard_has_one_button_per_row() {
        let buttons = vec![
            Button { label: "A".into(), data: "wiz:next".into() },
            Button { label: "B".into(), data: "wiz:cancel".into() },
        ];
        let markup = inline_keyboard(&buttons).unwrap();
        let rows = markup["inline_keyboard"].as_array().unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[1][0]["callback_data"], "wiz:cancel");
        assert!(inline_keyboard(&[]).is_none());
    }

    #[test]
    fn split_message_short() {
        let chunks = split_message("Hello", 4096);
        assert_eq!(chunks, vec!["Hello"]);
    }

    #[test]
    fn split_message_over_limit_on_newline() {
        let msg = format!("{}\n{}", "a".repeat(2000), "b".repeat(3000));
        let chunks = split_message(&msg, 4096);
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0], "a".repeat(2000));
        assert_eq!(chunks[1], "b".repeat(3000));
    }

    #[test]
    fn split_message_no_good_split_point() {
        let msg = "a".repeat(5000);
        let chunks = split_message(&msg, 4096);
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].len(), 4096);
        assert_eq!(chunks[1].len(), 904);
    }

    #[test]
    fn split_message_respects_char_boundaries() {
        // 'я' is two bytes in UTF-8.
        let msg = "я".repeat(3000);
        let chunks = split_message(&msg, 4097);
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].len(), 4096);
        assert_eq!(chunks.concat(), msg);
    }
}

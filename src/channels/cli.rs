//! CLI channel — stdin/stdout REPL for local testing.

use async_trait::async_trait;
use futures::stream;
use tokio::io::{AsyncBufReadExt, BufReader};

use crate::channels::{Channel, IncomingMessage, MessageStream, OutgoingMessage};
use crate::error::ChannelError;

/// A simple CLI channel that reads from stdin and writes to stdout.
///
/// Inline buttons are printed as hints; the slash shortcuts below stand in
/// for pressing them.
pub struct CliChannel {
    user_id: i64,
}

impl CliChannel {
    /// The local user talks as `user_id` (chat id is the same).
    pub fn new(user_id: i64) -> Self {
        Self { user_id }
    }
}

/// Map a typed line onto a text or callback message.
fn parse_line(user_id: i64, line: &str) -> IncomingMessage {
    let callback = match line {
        "/back" => Some("wiz:back".to_string()),
        "/skip" => Some("wiz:next".to_string()),
        "/confirm" => Some("wiz:confirm".to_string()),
        _ => line
            .strip_prefix("/edit ")
            .map(|state| format!("wiz:edit:{}", state.trim())),
    };

    let msg = match callback {
        Some(data) => IncomingMessage::callback("cli", user_id, user_id, data, None),
        None => IncomingMessage::text("cli", user_id, user_id, line),
    };
    msg.with_username("local-user")
}

#[async_trait]
impl Channel for CliChannel {
    fn name(&self) -> &str {
        "cli"
    }

    async fn start(&self) -> Result<MessageStream, ChannelError> {
        let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
        let user_id = self.user_id;

        tokio::spawn(async move {
            let stdin = tokio::io::stdin();
            let reader = BufReader::new(stdin);
            let mut lines = reader.lines();

            eprint!("> ");

            loop {
                match lines.next_line().await {
                    Ok(Some(line)) => {
                        let line = line.trim().to_string();
                        if line.is_empty() {
                            eprint!("> ");
                            continue;
                        }
                        if tx.send(parse_line(user_id, &line)).is_err() {
                            break;
                        }
                    }
                    Ok(None) => break, // EOF
                    Err(e) => {
                        tracing::error!("Error reading stdin: {}", e);
                        break;
                    }
                }
            }
        });

        let stream = stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|msg| (msg, rx))
        });

        Ok(Box::pin(stream))
    }

    async fn send(&self, _chat_id: i64, message: OutgoingMessage) -> Result<(), ChannelError> {
        println!("\n{}", message.text);
        if !message.buttons.is_empty() {
            let hints: Vec<String> = message
                .buttons
                .iter()
                .map(|b| format!("[{}] {}", b.label, shortcut(&b.data)))
                .collect();
            println!("{}", hints.join("  "));
        }
        println!();
        eprint!("> ");
        Ok(())
    }

    async fn health_check(&self) -> Result<(), ChannelError> {
        Ok(())
    }
}

/// The typed command for a button's callback data.
fn shortcut(data: &str) -> String {
    match data {
        "wiz:back" => "/back".to_string(),
        "wiz:next" => "/skip".to_string(),
        "wiz:confirm" => "/confirm".to_string(),
        "wiz:cancel" => "/cancel".to_string(),
        other => match other.strip_prefix("wiz:edit:") {
            Some(state) => format!("/edit {state}"),
            None => other.to_string(),
        },
    }
}

//! Scheduled reminders for users who have not reported this week.

use std::sync::Arc;

use chrono::Utc;
use cron::Schedule;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::channels::{Channel, OutgoingMessage};
use crate::error::DatabaseError;
use crate::report::week_start;
use crate::store::LibSqlStore;

const REMINDER_TEXT: &str =
    "⏰ Reminder: you haven't submitted your weekly report yet. Send /report to fill it in.";

/// Message every known user without a report for the current week.
/// Returns how many reminders were sent.
pub async fn send_reminders(
    store: &LibSqlStore,
    channel: &dyn Channel,
) -> Result<usize, DatabaseError> {
    let week = week_start(Utc::now().date_naive());
    let pending = store.users_without_report(week).await?;

    let mut sent = 0;
    for user in &pending {
        match channel
            .send(user.reply_chat(), OutgoingMessage::text(REMINDER_TEXT))
            .await
        {
            Ok(()) => sent += 1,
            Err(e) => warn!(user_id = user.user_id, error = %e, "Failed to send reminder"),
        }
    }

    info!(%week, pending = pending.len(), sent, "Weekly reminders sent");
    Ok(sent)
}

/// Spawn a loop that sends reminders at every upcoming time of `schedule`.
pub fn spawn_reminder_loop(
    schedule: Schedule,
    store: Arc<LibSqlStore>,
    channel: Arc<dyn Channel>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            let Some(next) = schedule.upcoming(Utc).next() else {
                warn!("Reminder schedule has no upcoming runs; stopping");
                return;
            };
            let wait = (next - Utc::now()).to_std().unwrap_or_default();
            debug!(next = %next, "Next reminder run scheduled");
            tokio::time::sleep(wait).await;

            if let Err(e) = send_reminders(&store, channel.as_ref()).await {
                warn!(error = %e, "Reminder run failed");
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use tokio::sync::Mutex;

    use crate::channels::MessageStream;
    use crate::error::ChannelError;
    use crate::report::WeeklyReport;

    #[derive(Default)]
    struct RecordingChannel {
        sent: Mutex<Vec<i64>>,
    }

    #[async_trait]
    impl Channel for RecordingChannel {
        fn name(&self) -> &str {
            "recording"
        }

        async fn start(&self) -> Result<MessageStream, ChannelError> {
            Ok(Box::pin(futures::stream::empty()))
        }

        async fn send(&self, chat_id: i64, _message: OutgoingMessage) -> Result<(), ChannelError> {
            self.sent.lock().await.push(chat_id);
            Ok(())
        }

        async fn health_check(&self) -> Result<(), ChannelError> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn reminds_only_users_without_a_report() {
        let store = LibSqlStore::new_memory().await.unwrap();
        store.upsert_user(1, 1, Some("ann"), None).await.unwrap();
        store.upsert_user(2, -200, Some("bob"), None).await.unwrap();
        store
            .insert_report(&WeeklyReport {
                user_id: 1,
                username: Some("ann".into()),
                week_start: week_start(Utc::now().date_naive()),
                tasks: "tasks text".into(),
                achievements: "achievements".into(),
                problems: "problems".into(),
                plans: "plans text".into(),
                created_at: Utc::now(),
            })
            .await
            .unwrap();

        let channel = RecordingChannel::default();
        let sent = send_reminders(&store, &channel).await.unwrap();
        assert_eq!(sent, 1);
        assert_eq!(*channel.sent.lock().await, vec![-200]);
    }
}

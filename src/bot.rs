//! Routes inbound messages to commands and the wizard engine, and forwards
//! background task events back to the users that own them.

use std::sync::Arc;

use futures::StreamExt;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::channels::{Channel, IncomingMessage, MessageStream, OutgoingMessage, Payload};
use crate::error::{DatabaseError, Error, Result, WizardError};
use crate::gateway::AuthorizationProvider;
use crate::store::LibSqlStore;
use crate::tasks::{TaskEvent, TaskOrchestrator, TaskRecord, TaskStatus};
use crate::wizard::{ControlEvent, FlowKind, WizardEngine, WizardEvent};

const HELP_TEXT: &str = "I collect weekly reports.\n\n\
/report - fill in this week's report\n\
/status - show your latest submission's processing status\n\
/history - list your recent reports\n\
/departments - list registered departments\n\
/cancel - abandon the form you are filling in\n\
/help - show this message";

const ADMIN_HELP_TEXT: &str = "\n\nAdmin commands:\n\
/department - register a department\n\
/stats - background task counts\n\
/grant <user_id> - make a user an admin\n\
/revoke <user_id> - remove a user's admin flag";

const IDLE_HINT: &str = "Send /report to start your weekly report, or /help for all commands.";

const STALE_FORM: &str = "That form is no longer active. Send /report to start again.";

const ADMIN_ONLY: &str = "⛔ This command is for admins only.";

/// Commands the bot reacts to. Other slash-leading text is a wizard answer
/// while a session is active.
const COMMANDS: &[&str] = &[
    "/start",
    "/help",
    "/report",
    "/department",
    "/departments",
    "/status",
    "/history",
    "/stats",
    "/grant",
    "/revoke",
    "/cancel",
];

/// How many reports `/history` lists.
const HISTORY_LIMIT: usize = 5;

/// The message dispatcher.
pub struct Bot {
    engine: Arc<WizardEngine>,
    orchestrator: TaskOrchestrator,
    store: Arc<LibSqlStore>,
    auth: Arc<dyn AuthorizationProvider>,
    channel: Arc<dyn Channel>,
}

impl Bot {
    pub fn new(
        engine: Arc<WizardEngine>,
        orchestrator: TaskOrchestrator,
        store: Arc<LibSqlStore>,
        auth: Arc<dyn AuthorizationProvider>,
        channel: Arc<dyn Channel>,
    ) -> Self {
        Self {
            engine,
            orchestrator,
            store,
            auth,
            channel,
        }
    }

    /// Process messages one at a time until the stream ends.
    pub async fn run(self: Arc<Self>, mut stream: MessageStream) {
        info!(channel = self.channel.name(), "Bot started");
        while let Some(msg) = stream.next().await {
            let user_id = msg.user_id;
            if let Err(e) = self.handle(msg).await {
                error!(user_id, error = %e, "Failed to handle message");
            }
        }
        info!("Message stream ended");
    }

    /// Handle one inbound message and send the reply.
    ///
    /// Failures while building the reply are logged and answered with an
    /// apology; only a failed send is returned.
    pub async fn handle(&self, msg: IncomingMessage) -> Result<()> {
        if let Err(e) = self
            .store
            .upsert_user(
                msg.user_id,
                msg.chat_id,
                msg.username.as_deref(),
                msg.display_name.as_deref(),
            )
            .await
        {
            warn!(user_id = msg.user_id, error = %e, "Failed to record user");
        }

        let reply = match &msg.payload {
            Payload::Callback { data, .. } => {
                if let Err(e) = self.channel.acknowledge(&msg).await {
                    debug!(user_id = msg.user_id, error = %e, "Callback acknowledge failed");
                }
                self.on_callback(&msg, data).await
            }
            Payload::Text { text } => self.on_text(&msg, text).await,
        };
        let reply = reply.unwrap_or_else(|e| failure_message(msg.user_id, e));

        self.channel.send(msg.chat_id, reply).await?;
        Ok(())
    }

    async fn on_callback(&self, msg: &IncomingMessage, data: &str) -> Result<OutgoingMessage> {
        if !ControlEvent::is_callback_data(data) {
            debug!(user_id = msg.user_id, data, "Ignoring unknown callback");
            return Ok(OutgoingMessage::text(IDLE_HINT));
        }
        let Some(event) = self.engine.parse_control(msg.user_id, data).await else {
            return Ok(OutgoingMessage::text(STALE_FORM));
        };
        self.advance(msg.user_id, WizardEvent::Control(event)).await
    }

    async fn on_text(&self, msg: &IncomingMessage, text: &str) -> Result<OutgoingMessage> {
        let user_id = msg.user_id;
        let active = self.engine.is_active(user_id).await;

        let command = parse_command(text).filter(|c| !active || COMMANDS.contains(c));
        let Some(command) = command else {
            if active {
                return self.advance(user_id, WizardEvent::Text(text.to_string())).await;
            }
            return Ok(OutgoingMessage::text(IDLE_HINT));
        };

        debug!(user_id, command, "Command received");
        let reply = match command {
            "/start" | "/help" => {
                let mut help = HELP_TEXT.to_string();
                if self.auth.is_admin(user_id).await {
                    help.push_str(ADMIN_HELP_TEXT);
                }
                OutgoingMessage::text(help)
            }
            "/report" => self.start_flow(msg, FlowKind::WeeklyReport).await?,
            "/department" => self.start_flow(msg, FlowKind::Department).await?,
            "/status" => match self.orchestrator.get_user_task(user_id).await {
                Some(record) => OutgoingMessage::text(format_task(&record)),
                None => OutgoingMessage::text("You have no submissions being processed."),
            },
            "/history" => self.history(user_id).await?,
            "/departments" => self.departments().await?,
            "/stats" => {
                if !self.auth.is_admin(user_id).await {
                    return Ok(OutgoingMessage::text(ADMIN_ONLY));
                }
                let stats = self.orchestrator.get_stats().await;
                OutgoingMessage::text(format!(
                    "📈 Tasks: {} total\nPending: {}\nRunning: {}\nCompleted: {}\nFailed: {}\nCancelled: {}",
                    stats.total,
                    stats.pending,
                    stats.running,
                    stats.completed,
                    stats.failed,
                    stats.cancelled
                ))
            }
            "/grant" | "/revoke" => {
                self.set_admin(user_id, command_args(text), command == "/grant")
                    .await?
            }
            "/cancel" => {
                if !active {
                    return Ok(OutgoingMessage::text("Nothing to cancel."));
                }
                self.advance(user_id, WizardEvent::Control(ControlEvent::Cancel))
                    .await?
            }
            _ => OutgoingMessage::text("Unknown command. Send /help for the list."),
        };
        Ok(reply)
    }

    async fn advance(&self, user_id: i64, event: WizardEvent) -> Result<OutgoingMessage> {
        let outcome = self.engine.advance(user_id, event).await?;
        Ok(outcome.render().clone().into())
    }

    async fn start_flow(&self, msg: &IncomingMessage, kind: FlowKind) -> Result<OutgoingMessage> {
        if kind.requires_admin() && !self.auth.is_admin(msg.user_id).await {
            info!(user_id = msg.user_id, flow = %kind, "Non-admin tried to start admin flow");
            return Ok(OutgoingMessage::text("⛔ Only admins can do that."));
        }
        let render = self
            .engine
            .start(msg.user_id, msg.sender_name(), kind)
            .await?;
        Ok(render.into())
    }

    async fn history(&self, user_id: i64) -> Result<OutgoingMessage> {
        let reports = self.store.reports_for_user(user_id, HISTORY_LIMIT).await?;
        if reports.is_empty() {
            return Ok(OutgoingMessage::text("You haven't submitted any reports yet."));
        }
        let mut text = String::from("📚 Your recent reports:");
        for report in &reports {
            let analysed = if report.analysis.is_some() { " 🤖" } else { "" };
            text.push_str(&format!(
                "\n• #{} week of {}{analysed}",
                report.id,
                report.week_start.format("%Y-%m-%d")
            ));
        }
        Ok(OutgoingMessage::text(text))
    }

    async fn departments(&self) -> Result<OutgoingMessage> {
        let departments = self.store.list_departments().await?;
        if departments.is_empty() {
            return Ok(OutgoingMessage::text("No departments are registered yet."));
        }
        let mut text = String::from("🏢 Departments:");
        for dept in &departments {
            text.push_str(&format!("\n• {} - {}", dept.code, dept.name));
            if let Some(head) = &dept.head {
                text.push_str(&format!(" (head: {head})"));
            }
        }
        Ok(OutgoingMessage::text(text))
    }

    /// `/grant` and `/revoke`: flip the database admin flag of a known user.
    /// Configured admins stay admins regardless of the flag.
    async fn set_admin(&self, caller: i64, args: &str, is_admin: bool) -> Result<OutgoingMessage> {
        if !self.auth.is_admin(caller).await {
            return Ok(OutgoingMessage::text(ADMIN_ONLY));
        }
        let Ok(target) = args.parse::<i64>() else {
            let usage = if is_admin { "/grant" } else { "/revoke" };
            return Ok(OutgoingMessage::text(format!("Usage: {usage} <user_id>")));
        };
        match self.store.set_admin(target, is_admin).await {
            Ok(()) => {
                info!(caller, target, is_admin, "Admin flag changed");
                let verb = if is_admin { "is now an admin" } else { "is no longer an admin" };
                Ok(OutgoingMessage::text(format!("✅ User {target} {verb}.")))
            }
            Err(DatabaseError::NotFound { .. }) => Ok(OutgoingMessage::text(format!(
                "User {target} hasn't talked to the bot yet."
            ))),
            Err(e) => Err(e.into()),
        }
    }

    /// Forward task events to the owning user's chat until the orchestrator
    /// goes away.
    pub fn spawn_event_forwarder(self: &Arc<Self>) -> JoinHandle<()> {
        let bot = Arc::clone(self);
        let mut events = self.orchestrator.subscribe();
        tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(event) => bot.forward(event).await,
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(skipped, "Task event forwarder lagged");
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        })
    }

    async fn forward(&self, event: TaskEvent) {
        let Some(text) = event_text(&event) else {
            return;
        };
        let chat_id = match self.store.get_user(event.user_id).await {
            Ok(Some(user)) => user.reply_chat(),
            Ok(None) => event.user_id,
            Err(e) => {
                warn!(user_id = event.user_id, error = %e, "Chat lookup failed");
                event.user_id
            }
        };
        if let Err(e) = self.channel.send(chat_id, OutgoingMessage::text(text)).await {
            warn!(user_id = event.user_id, task_id = %event.task_id, error = %e, "Failed to forward task event");
        }
    }
}

/// The command word of a message, without a `@botname` suffix.
fn parse_command(text: &str) -> Option<&str> {
    let word = text.split_whitespace().next()?;
    if !word.starts_with('/') {
        return None;
    }
    Some(word.split('@').next().unwrap_or(word))
}

/// Everything after the command word.
fn command_args(text: &str) -> &str {
    text.trim()
        .split_once(char::is_whitespace)
        .map(|(_, rest)| rest.trim())
        .unwrap_or("")
}

fn failure_message(user_id: i64, err: Error) -> OutgoingMessage {
    match err {
        Error::Wizard(WizardError::NoSession { .. }) => OutgoingMessage::text(STALE_FORM),
        e => {
            error!(user_id, error = %e, "Failed to build reply");
            OutgoingMessage::text("Something went wrong. Please try again.")
        }
    }
}

/// User-facing text for a task event. `None` for events not worth a message.
fn event_text(event: &TaskEvent) -> Option<String> {
    let message = event.message.as_deref();
    match event.status {
        TaskStatus::Pending => None,
        TaskStatus::Running => message.map(|m| format!("⏳ {m}...")),
        TaskStatus::Completed => Some(format!("✅ Done: {}", message.unwrap_or("processed"))),
        TaskStatus::Failed => Some(format!(
            "❌ Processing failed: {}. Your submission is saved.",
            message.unwrap_or("unknown error")
        )),
        TaskStatus::Cancelled => Some(format!(
            "🚫 Processing cancelled ({}).",
            message.unwrap_or("no reason given")
        )),
    }
}

fn format_task(record: &TaskRecord) -> String {
    let mut text = format!(
        "📊 {}\nStatus: {}\nStarted: {}",
        record.label,
        record.status,
        record.created_at.format("%Y-%m-%d %H:%M UTC")
    );
    if !record.status.is_terminal() {
        if let Some(progress) = &record.progress_message {
            text.push_str(&format!("\nProgress: {progress}"));
        }
    }
    if let Some(result) = &record.result {
        text.push_str(&format!("\nResult: {result}"));
    }
    if let Some(error) = &record.error {
        text.push_str(&format!("\nError: {error}"));
    }
    text
}

use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;

use weekly_report_bot::analysis::{DisabledAnalysis, HttpAnalysis};
use weekly_report_bot::api::task_routes;
use weekly_report_bot::bot::Bot;
use weekly_report_bot::channels::{Channel, CliChannel, TelegramChannel};
use weekly_report_bot::commit::CommitHandoff;
use weekly_report_bot::config::BotConfig;
use weekly_report_bot::gateway::AnalysisGateway;
use weekly_report_bot::notify::ChannelNotifier;
use weekly_report_bot::reminders::spawn_reminder_loop;
use weekly_report_bot::store::{AdminAuthorization, LibSqlStore};
use weekly_report_bot::tasks::{TaskOrchestrator, spawn_cleanup_task};
use weekly_report_bot::wizard::{
    SessionStore, WizardEngine, department_flow, spawn_session_sweeper, weekly_report_flow,
};

/// How often idle wizard sessions are swept.
const SESSION_SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// User id of the local CLI user.
const CLI_USER_ID: i64 = 1;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = BotConfig::from_env().context("invalid configuration")?;
    let _logging = weekly_report_bot::logging::init(config.log_dir.as_deref())
        .context("failed to initialise logging")?;

    eprintln!("📋 Weekly Report Bot v{}", env!("CARGO_PKG_VERSION"));

    // ── Database ─────────────────────────────────────────────────────────
    let store = Arc::new(
        LibSqlStore::new_local(&config.db_path)
            .await
            .with_context(|| format!("failed to open database at {}", config.db_path.display()))?,
    );
    eprintln!("   Database: {}", config.db_path.display());

    let auth = Arc::new(AdminAuthorization::new(
        config.admin_ids.iter().copied(),
        Arc::clone(&store),
    ));

    // ── Analysis ─────────────────────────────────────────────────────────
    let analysis: Arc<dyn AnalysisGateway> = match &config.analysis {
        Some(analysis_config) => {
            eprintln!("   Analysis: {}", analysis_config.model);
            Arc::new(HttpAnalysis::new(analysis_config.clone())?)
        }
        None => {
            eprintln!("   Analysis: disabled (ANALYSIS_API_KEY not set)");
            Arc::new(DisabledAnalysis)
        }
    };

    // ── Channel ──────────────────────────────────────────────────────────
    let channel: Arc<dyn Channel> = match &config.telegram_token {
        Some(token) => {
            let telegram = TelegramChannel::new(token.clone());
            if let Err(e) = telegram.health_check().await {
                tracing::warn!(error = %e, "Telegram health check failed");
            }
            eprintln!("   Channel: telegram");
            Arc::new(telegram)
        }
        None => {
            eprintln!("   Channel: cli (TELEGRAM_BOT_TOKEN not set)");
            eprintln!("   Shortcuts: /back /skip /confirm /edit <field>\n");
            Arc::new(CliChannel::new(CLI_USER_ID))
        }
    };
    if config.admin_chats.is_empty() {
        tracing::warn!("REPORT_BOT_ADMIN_CHATS is empty; submissions will not be delivered");
    }

    // ── Wizard + tasks ───────────────────────────────────────────────────
    let orchestrator = TaskOrchestrator::new();
    let notifier = Arc::new(ChannelNotifier::new(
        Arc::clone(&channel),
        config.admin_chats.clone(),
    ));
    let handoff = Arc::new(CommitHandoff::new(
        store.clone(),
        analysis,
        notifier,
        orchestrator.clone(),
    ));
    let sessions = SessionStore::new();
    let engine = Arc::new(
        WizardEngine::new(Arc::clone(&sessions), handoff)
            .with_flow(weekly_report_flow(config.min_answer_len)?)
            .with_flow(department_flow()?),
    );

    let bot = Arc::new(Bot::new(
        engine,
        orchestrator.clone(),
        Arc::clone(&store),
        auth,
        Arc::clone(&channel),
    ));

    // ── Background loops ─────────────────────────────────────────────────
    let _sweeper = spawn_session_sweeper(
        sessions,
        config.session_idle_timeout,
        SESSION_SWEEP_INTERVAL,
    );
    let _cleanup = spawn_cleanup_task(
        orchestrator.clone(),
        config.cleanup_interval,
        config.task_retention,
    );
    let schedule = cron::Schedule::from_str(&config.reminder_cron)
        .context("invalid reminder schedule")?;
    let _reminders = spawn_reminder_loop(schedule, Arc::clone(&store), Arc::clone(&channel));
    let _forwarder = bot.spawn_event_forwarder();

    // ── Admin API ────────────────────────────────────────────────────────
    if let Some(port) = config.api_port {
        let app = task_routes(orchestrator.clone());
        let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{port}"))
            .await
            .with_context(|| format!("failed to bind admin API port {port}"))?;
        eprintln!("   Admin API: http://0.0.0.0:{port}/api/tasks/stats");
        tokio::spawn(async move {
            tracing::info!(port, "Admin API started");
            if let Err(e) = axum::serve(listener, app).await {
                tracing::error!(error = %e, "Admin API stopped");
            }
        });
    }

    // ── Run ──────────────────────────────────────────────────────────────
    let stream = channel.start().await?;
    tokio::select! {
        _ = Arc::clone(&bot).run(stream) => {}
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Shutdown requested");
        }
    }

    let cancelled = orchestrator.cancel_all().await;
    if cancelled > 0 {
        tracing::info!(cancelled, "Cancelled unfinished tasks");
    }
    channel.shutdown().await?;

    Ok(())
}

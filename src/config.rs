//! Configuration types.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use secrecy::SecretString;

use crate::error::ConfigError;
use crate::wizard::flows::MAX_ANSWER_LEN;

/// Default OpenAI-compatible endpoint for report analysis.
pub const DEFAULT_ANALYSIS_URL: &str = "https://api.openai.com/v1/chat/completions";

/// Friday 15:00 UTC (the cron crate takes a leading seconds field).
pub const DEFAULT_REMINDER_CRON: &str = "0 0 15 * * Fri";

/// Analysis collaborator settings. Absent when no API key is configured.
#[derive(Debug, Clone)]
pub struct AnalysisConfig {
    pub api_key: SecretString,
    pub api_url: String,
    pub model: String,
    pub timeout: Duration,
}

/// Bot configuration.
#[derive(Debug, Clone)]
pub struct BotConfig {
    /// Telegram bot token. The CLI channel is used when unset.
    pub telegram_token: Option<String>,
    pub db_path: PathBuf,
    /// Users with admin rights regardless of the database flag.
    pub admin_ids: Vec<i64>,
    /// Chats that receive submitted reports.
    pub admin_chats: Vec<i64>,
    pub analysis: Option<AnalysisConfig>,
    /// Minimum length of a weekly-report answer.
    pub min_answer_len: usize,
    pub reminder_cron: String,
    /// How long terminal task records are kept.
    pub task_retention: Duration,
    pub cleanup_interval: Duration,
    /// Wizard sessions idle longer than this are dropped.
    pub session_idle_timeout: Duration,
    pub api_port: Option<u16>,
    pub log_dir: Option<PathBuf>,
}

impl Default for BotConfig {
    fn default() -> Self {
        Self {
            telegram_token: None,
            db_path: PathBuf::from("./data/report-bot.db"),
            admin_ids: Vec::new(),
            admin_chats: Vec::new(),
            analysis: None,
            min_answer_len: 10,
            reminder_cron: DEFAULT_REMINDER_CRON.to_string(),
            task_retention: Duration::from_secs(24 * 3600),
            cleanup_interval: Duration::from_secs(600),
            session_idle_timeout: Duration::from_secs(3600),
            api_port: None,
            log_dir: None,
        }
    }
}

impl BotConfig {
    /// Build config from environment variables, falling back to defaults.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build config from an arbitrary key lookup (used by `from_env` and tests).
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let admin_ids = parse_id_list("REPORT_BOT_ADMIN_IDS", get("REPORT_BOT_ADMIN_IDS"))?;
        let admin_chats = match get("REPORT_BOT_ADMIN_CHATS") {
            Some(raw) => parse_id_list("REPORT_BOT_ADMIN_CHATS", Some(raw))?,
            None => admin_ids.clone(),
        };

        let analysis = get("ANALYSIS_API_KEY").map(|key| AnalysisConfig {
            api_key: SecretString::from(key),
            api_url: get("ANALYSIS_API_URL").unwrap_or_else(|| DEFAULT_ANALYSIS_URL.to_string()),
            model: get("ANALYSIS_MODEL").unwrap_or_else(|| "gpt-4o-mini".to_string()),
            timeout: Duration::from_secs(60),
        });

        let min_answer_len = parse_or(
            "REPORT_BOT_MIN_ANSWER_LEN",
            get("REPORT_BOT_MIN_ANSWER_LEN"),
            defaults.min_answer_len,
        )?;
        if !(1..=MAX_ANSWER_LEN).contains(&min_answer_len) {
            return Err(ConfigError::InvalidValue {
                key: "REPORT_BOT_MIN_ANSWER_LEN".to_string(),
                message: format!("{min_answer_len} is outside 1..={MAX_ANSWER_LEN}"),
            });
        }

        let reminder_cron = get("REPORT_BOT_REMINDER_CRON").unwrap_or(defaults.reminder_cron);
        if let Err(e) = cron::Schedule::from_str(&reminder_cron) {
            return Err(ConfigError::InvalidValue {
                key: "REPORT_BOT_REMINDER_CRON".to_string(),
                message: e.to_string(),
            });
        }

        Ok(Self {
            telegram_token: get("TELEGRAM_BOT_TOKEN"),
            db_path: get("REPORT_BOT_DB_PATH")
                .map(PathBuf::from)
                .unwrap_or(defaults.db_path),
            admin_ids,
            admin_chats,
            analysis,
            min_answer_len,
            reminder_cron,
            task_retention: parse_secs(
                "REPORT_BOT_TASK_RETENTION_SECS",
                get("REPORT_BOT_TASK_RETENTION_SECS"),
                defaults.task_retention,
            )?,
            cleanup_interval: parse_secs(
                "REPORT_BOT_CLEANUP_INTERVAL_SECS",
                get("REPORT_BOT_CLEANUP_INTERVAL_SECS"),
                defaults.cleanup_interval,
            )?,
            session_idle_timeout: parse_secs(
                "REPORT_BOT_SESSION_IDLE_SECS",
                get("REPORT_BOT_SESSION_IDLE_SECS"),
                defaults.session_idle_timeout,
            )?,
            api_port: get("REPORT_BOT_API_PORT")
                .map(|raw| parse_value("REPORT_BOT_API_PORT", &raw))
                .transpose()?,
            log_dir: get("REPORT_BOT_LOG_DIR").map(PathBuf::from),
        })
    }
}

fn parse_value<T>(key: &str, raw: &str) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    raw.trim().parse().map_err(|e: T::Err| ConfigError::InvalidValue {
        key: key.to_string(),
        message: format!("{raw:?}: {e}"),
    })
}

fn parse_or<T>(key: &str, raw: Option<String>, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match raw {
        Some(raw) => parse_value(key, &raw),
        None => Ok(default),
    }
}

fn parse_secs(key: &str, raw: Option<String>, default: Duration) -> Result<Duration, ConfigError> {
    parse_or(key, raw, default.as_secs()).map(Duration::from_secs)
}

fn parse_id_list(key: &str, raw: Option<String>) -> Result<Vec<i64>, ConfigError> {
    raw.unwrap_or_default()
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| parse_value(key, s))
        .collect()
}

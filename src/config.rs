use std::time::Duration;

use chrono_tz::Tz;

use crate::error::{Result, StatusError};
use crate::scheduler::WeeklyTrigger;

#[derive(Debug, Clone)]
pub struct Config {
    /// Zone used for week windows, triggers and subject dates.
    pub timezone: Tz,
    pub reminder_schedule: WeeklyTrigger,
    pub summary_schedule: WeeklyTrigger,
    pub report_title: String,
    pub reminder_text: String,
    pub chat: ChatConfig,
    pub smtp: SmtpConfig,
    pub summarizer: SummarizerConfig,
}

#[derive(Debug, Clone)]
pub struct ChatConfig {
    pub webhook_url: Option<String>,
    pub secret: Option<String>,
    pub timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct SmtpConfig {
    pub host: Option<String>,
    pub port: u16,
    pub user: Option<String>,
    pub password: Option<String>,
    pub from: Option<String>,
    pub to: Vec<String>,
    pub sender_name: String,
    pub timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct SummarizerConfig {
    pub enabled: bool,
    pub api_key: Option<String>,
    pub base_url: String,
    pub model: String,
    pub temperature: f32,
    pub max_tokens: u32,
    pub timeout: Duration,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| {
            lookup(key)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };

        let timezone = match get("APP_TIMEZONE") {
            Some(name) => name
                .parse::<Tz>()
                .map_err(|e| StatusError::Config(format!("APP_TIMEZONE: {e}")))?,
            None => chrono_tz::UTC,
        };

        let reminder_schedule = get("REMINDER_SCHEDULE")
            .unwrap_or_else(|| "fri 10:00".to_string())
            .parse::<WeeklyTrigger>()
            .map_err(|e| StatusError::Config(format!("REMINDER_SCHEDULE: {e}")))?;
        let summary_schedule = get("SUMMARY_SCHEDULE")
            .unwrap_or_else(|| "fri 18:00".to_string())
            .parse::<WeeklyTrigger>()
            .map_err(|e| StatusError::Config(format!("SUMMARY_SCHEDULE: {e}")))?;

        let base_url = get("APP_BASE_URL").unwrap_or_else(|| "http://localhost:8000/".to_string());
        let reminder_text = get("REMINDER_TEXT").unwrap_or_else(|| {
            format!(
                "Weekly report reminder: please fill in this week's report using the usual format.\n\
                 Submit here: {base_url}"
            )
        });

        let chat = ChatConfig {
            webhook_url: get("CHAT_WEBHOOK_URL"),
            secret: get("CHAT_WEBHOOK_SECRET"),
            timeout: Duration::from_secs(parse_or(&get, "CHAT_TIMEOUT_SECS", 10)?),
        };

        let user = get("SMTP_USER");
        let smtp = SmtpConfig {
            host: get("SMTP_HOST"),
            port: parse_or(&get, "SMTP_PORT", 465)?,
            from: get("MAIL_FROM").or_else(|| user.clone()),
            user,
            password: get("SMTP_PASS"),
            to: get("MAIL_TO")
                .map(|list| {
                    list.split(',')
                        .map(str::trim)
                        .filter(|addr| !addr.is_empty())
                        .map(str::to_string)
                        .collect()
                })
                .unwrap_or_default(),
            sender_name: get("MAIL_SENDER_NAME")
                .unwrap_or_else(|| "Weekly Report Assistant".to_string()),
            timeout: Duration::from_secs(parse_or(&get, "SMTP_TIMEOUT_SECS", 30)?),
        };

        let summarizer = SummarizerConfig {
            enabled: get("LLM_SUMMARY_ENABLED").is_some_and(|flag| is_truthy(&flag)),
            api_key: get("LLM_API_KEY"),
            base_url: get("LLM_BASE_URL")
                .unwrap_or_else(|| "https://api.siliconflow.cn/v1".to_string()),
            model: get("LLM_MODEL").unwrap_or_else(|| "Qwen2.5-14B-Instruct".to_string()),
            temperature: parse_or(&get, "LLM_TEMPERATURE", 0.2)?,
            max_tokens: parse_or(&get, "LLM_MAX_TOKENS", 1024)?,
            timeout: Duration::from_secs(parse_or(&get, "LLM_TIMEOUT_SECS", 30)?),
        };

        Ok(Self {
            timezone,
            reminder_schedule,
            summary_schedule,
            report_title: get("REPORT_TITLE").unwrap_or_else(|| "Team Weekly Report".to_string()),
            reminder_text,
            chat,
            smtp,
            summarizer,
        })
    }
}

fn parse_or<T, G>(get: &G, key: &str, default: T) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
    G: Fn(&str) -> Option<String>,
{
    match get(key) {
        Some(raw) => raw
            .parse()
            .map_err(|e| StatusError::Config(format!("{key}={raw}: {e}"))),
        None => Ok(default),
    }
}

fn is_truthy(flag: &str) -> bool {
    matches!(flag.to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "y")
}

use std::sync::Arc;

use chrono::Utc;
use chrono_tz::Tz;
use serde::Serialize;
use tracing::{error, info, warn};

use crate::db::ReportStore;
use crate::notify::{ChatSender, EmailSender};
use crate::summarizer::Summarizer;
use crate::summary::{build_weekly_summary, splice_digest};
use crate::week::WeekWindow;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum JobKind {
    ChatReminder,
    SummaryEmail,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum JobArgs {
    /// `text` overrides the configured reminder text. Recipients are always
    /// the active members with a contact handle.
    ChatReminder { text: Option<String> },
    SummaryEmail,
}

impl JobArgs {
    pub fn kind(&self) -> JobKind {
        match self {
            Self::ChatReminder { .. } => JobKind::ChatReminder,
            Self::SummaryEmail => JobKind::SummaryEmail,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum JobOutcome {
    Delivered,
    Failed,
}

impl From<bool> for JobOutcome {
    fn from(ok: bool) -> Self {
        if ok {
            Self::Delivered
        } else {
            Self::Failed
        }
    }
}

#[derive(Clone)]
pub struct JobContext {
    pub store: Arc<dyn ReportStore>,
    pub chat: Arc<dyn ChatSender>,
    pub email: Arc<dyn EmailSender>,
    pub summarizer: Arc<dyn Summarizer>,
    pub timezone: Tz,
    pub report_title: String,
    pub reminder_text: String,
}

impl JobContext {
    pub async fn execute(&self, args: &JobArgs) -> JobOutcome {
        match args {
            JobArgs::ChatReminder { text } => self.chat_reminder(text.as_deref()).await,
            JobArgs::SummaryEmail => self.summary_email().await,
        }
    }

    pub async fn chat_reminder(&self, text: Option<&str>) -> JobOutcome {
        let text = text.unwrap_or(&self.reminder_text);
        let recipients = match self.store.active_contacts().await {
            Ok(recipients) => recipients,
            Err(e) => {
                warn!(error = %e, "cannot load reminder recipients, sending without mentions");
                Vec::new()
            }
        };

        info!(recipients = recipients.len(), "chat reminder job triggered");
        let ok = self.chat.send_chat_message(text, &recipients).await;
        info!(ok, "chat reminder finished");
        ok.into()
    }

    /// Renders the week, optionally enriches it and mails it.
    pub async fn render_summary(&self, enrich: bool) -> String {
        let window = WeekWindow::current(self.timezone);
        let document =
            build_weekly_summary(self.store.as_ref(), self.timezone, &window, &self.report_title)
                .await;
        if !enrich {
            return document;
        }

        match self.summarizer.summarize(&document).await {
            Some(digest) if !digest.trim().is_empty() => splice_digest(&document, &digest),
            _ => document,
        }
    }

    pub async fn summary_email(&self) -> JobOutcome {
        let document = self.render_summary(true).await;
        let subject = format!(
            "{} - {}",
            self.report_title,
            Utc::now().with_timezone(&self.timezone).format("%Y-%m-%d")
        );

        info!(%subject, "summary email job triggered");
        let ok = self.email.send_email(&subject, &document).await;
        if ok {
            info!(%subject, "summary email finished");
        } else {
            error!(%subject, "summary email was not delivered");
        }
        ok.into()
    }
}

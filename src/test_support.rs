use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::db::ReportStore;
use crate::error::{Result, StatusError};
use crate::models::{MemberProfile, ReportRecord};
use crate::notify::{ChatSender, EmailSender};
use crate::scheduler::JobContext;
use crate::summarizer::Summarizer;

/// A report with a resolved member.
pub fn report(project: &str, member: &str, work: &str) -> ReportRecord {
    ReportRecord {
        member_name: member.to_string(),
        project: project.to_string(),
        work_desc: work.to_string(),
        progress: 50.0,
        next_week_plan: "keep going".to_string(),
        risks: Some("none".to_string()),
        member: Some(MemberProfile {
            department: Some("Engineering".to_string()),
            position: None,
        }),
    }
}

/// Reports keyed by creation time, plus the active contact list.
#[derive(Default)]
pub struct MemoryStore {
    reports: Vec<(DateTime<Utc>, ReportRecord)>,
    contacts: Vec<String>,
}

impl MemoryStore {
    /// Reports created now.
    pub fn with_reports(reports: Vec<ReportRecord>) -> Self {
        let now = Utc::now();
        Self {
            reports: reports.into_iter().map(|r| (now, r)).collect(),
            contacts: Vec::new(),
        }
    }

    pub fn with_contacts(mut self, contacts: &[&str]) -> Self {
        self.contacts = contacts.iter().map(|c| c.to_string()).collect();
        self
    }
}

#[async_trait]
impl ReportStore for MemoryStore {
    async fn reports_between(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<ReportRecord>> {
        let mut rows: Vec<ReportRecord> = self
            .reports
            .iter()
            .filter(|(created_at, _)| *created_at >= start && *created_at <= end)
            .map(|(_, r)| r.clone())
            .collect();
        rows.sort_by(|a, b| {
            a.project
                .cmp(&b.project)
                .then_with(|| a.member_name.cmp(&b.member_name))
        });
        Ok(rows)
    }

    async fn active_contacts(&self) -> Result<Vec<String>> {
        Ok(self.contacts.clone())
    }
}

/// Store whose every query fails.
pub struct FailingStore;

#[async_trait]
impl ReportStore for FailingStore {
    async fn reports_between(
        &self,
        _start: DateTime<Utc>,
        _end: DateTime<Utc>,
    ) -> Result<Vec<ReportRecord>> {
        Err(StatusError::Database(sqlx::Error::PoolTimedOut))
    }

    async fn active_contacts(&self) -> Result<Vec<String>> {
        Err(StatusError::Database(sqlx::Error::PoolTimedOut))
    }
}

#[derive(Default)]
pub struct RecordingChat {
    sent: Mutex<Vec<(String, Vec<String>)>>,
    fail_next: AtomicBool,
}

impl RecordingChat {
    pub fn sent(&self) -> Vec<(String, Vec<String>)> {
        self.sent.lock().unwrap().clone()
    }

    /// Makes the next send report failure.
    pub fn fail_next(&self) {
        self.fail_next.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl ChatSender for RecordingChat {
    async fn send_chat_message(&self, text: &str, recipients: &[String]) -> bool {
        self.sent
            .lock()
            .unwrap()
            .push((text.to_string(), recipients.to_vec()));
        !self.fail_next.swap(false, Ordering::SeqCst)
    }
}

#[derive(Default)]
pub struct RecordingEmail {
    sent: Mutex<Vec<(String, String)>>,
}

impl RecordingEmail {
    pub fn sent(&self) -> Vec<(String, String)> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl EmailSender for RecordingEmail {
    async fn send_email(&self, subject: &str, html_body: &str) -> bool {
        self.sent
            .lock()
            .unwrap()
            .push((subject.to_string(), html_body.to_string()));
        true
    }
}

pub struct FixedSummarizer(pub Option<String>);

#[async_trait]
impl Summarizer for FixedSummarizer {
    async fn summarize(&self, _document: &str) -> Option<String> {
        self.0.clone()
    }
}

pub struct Harness {
    pub context: JobContext,
    pub chat: Arc<RecordingChat>,
    pub email: Arc<RecordingEmail>,
}

/// UTC job context over `store` with recording senders and no digest.
pub fn context(store: impl ReportStore + 'static) -> Harness {
    let chat = Arc::new(RecordingChat::default());
    let email = Arc::new(RecordingEmail::default());
    let context = JobContext {
        store: Arc::new(store),
        chat: chat.clone(),
        email: email.clone(),
        summarizer: Arc::new(FixedSummarizer(None)),
        timezone: chrono_tz::UTC,
        report_title: "Team Weekly Report".to_string(),
        reminder_text: "Please submit your weekly report.".to_string(),
    };
    Harness {
        context,
        chat,
        email,
    }
}

use chrono::{DateTime, Utc};

/// A report row joined with whatever is left of its member.
#[derive(Debug, Clone)]
pub struct ReportRecord {
    pub member_name: String,
    pub project: String,
    pub work_desc: String,
    pub progress: f64,
    pub next_week_plan: String,
    pub risks: Option<String>,
    /// `None` when the member was deleted or never resolved.
    pub member: Option<MemberProfile>,
}

#[derive(Debug, Clone, Default)]
pub struct MemberProfile {
    pub department: Option<String>,
    pub position: Option<String>,
}

impl MemberProfile {
    /// `"department / position"`, or a dash when neither is set.
    pub fn label(&self) -> String {
        let parts: Vec<&str> = [self.department.as_deref(), self.position.as_deref()]
            .into_iter()
            .flatten()
            .map(str::trim)
            .filter(|part| !part.is_empty())
            .collect();

        if parts.is_empty() {
            "-".to_string()
        } else {
            parts.join(" / ")
        }
    }
}

#[derive(Debug, Clone)]
pub struct NewReport {
    pub member_name: String,
    pub project: String,
    pub work_desc: String,
    pub progress: f64,
    pub next_week_plan: String,
    pub risks: Option<String>,
    pub created_at: Option<DateTime<Utc>>,
}

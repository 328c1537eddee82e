use std::fmt::Write;

use chrono_tz::Tz;
use tracing::{info, warn};

use crate::db::ReportStore;
use crate::models::ReportRecord;
use crate::week::WeekWindow;

/// Opening tag of the container every section is rendered into.
pub const OPENING_CONTAINER: &str = "<div class='wrap'>";

const STYLE: &str = "\
body { font-family: system-ui, -apple-system, Segoe UI, Helvetica, Arial; background:#f7f9fc; color:#1f2937; }
.wrap { max-width: 960px; margin: 20px auto; }
.card { background:#fff; border-radius:12px; box-shadow:0 6px 18px rgba(0,0,0,0.06); padding:18px; margin-bottom:16px; }
h1 { font-size:22px; margin:10px 0 16px; }
h2 { font-size:18px; margin:0 0 12px; }
table { width:100%; border-collapse: collapse; }
th, td { border-bottom:1px solid #e5e7eb; padding:10px; text-align:left; vertical-align:top; }
th { background:#f3f4f6; font-weight:600; }
.muted { color:#6b7280; }
.digest { white-space: normal; line-height:1.6; }
";

#[derive(Debug)]
pub struct ProjectSection<'a> {
    pub project: &'a str,
    pub rows: Vec<&'a ReportRecord>,
}

/// Groups rows by project. Rows are ordered by (project, member name) first,
/// so sections come out alphabetically and members sorted within each.
pub fn group_by_project(rows: &[ReportRecord]) -> Vec<ProjectSection<'_>> {
    let mut ordered: Vec<&ReportRecord> = rows.iter().collect();
    ordered.sort_by(|a, b| {
        a.project
            .cmp(&b.project)
            .then_with(|| a.member_name.cmp(&b.member_name))
    });

    let mut sections: Vec<ProjectSection<'_>> = Vec::new();
    for row in ordered {
        match sections.last_mut() {
            Some(section) if section.project == row.project => section.rows.push(row),
            _ => sections.push(ProjectSection {
                project: &row.project,
                rows: vec![row],
            }),
        }
    }
    sections
}

pub fn render_summary(title: &str, window: &WeekWindow, rows: &[ReportRecord]) -> String {
    let sections = group_by_project(rows);
    let heading = format!("{} ({})", escape_html(title), window.label());

    let mut output = String::new();
    let _ = writeln!(output, "<html><head><meta charset='utf-8'>");
    let _ = writeln!(output, "<title>{heading}</title>");
    let _ = writeln!(output, "<style>\n{STYLE}</style></head><body>");
    let _ = writeln!(output, "{OPENING_CONTAINER}");
    let _ = writeln!(output, "<h1>{heading}</h1>");

    if sections.is_empty() {
        let _ = writeln!(
            output,
            "<p class='card muted'>No data yet: nothing has been submitted this week.</p>"
        );
    }

    for section in &sections {
        let _ = write!(
            output,
            "<div class='card'><h2>Project: {}</h2>",
            escape_html(section.project)
        );
        let _ = write!(
            output,
            "<table><thead><tr><th>Member</th><th>Department / Position</th>\
             <th>This week</th><th>Progress</th><th>Next week</th>\
             <th>Risks &amp; issues</th></tr></thead><tbody>"
        );
        for row in &section.rows {
            let member_label = row
                .member
                .as_ref()
                .map(|member| member.label())
                .unwrap_or_else(|| "-".to_string());

            let _ = write!(
                output,
                "<tr><td>{}</td><td class='muted'>{}</td><td>{}</td><td>{}</td><td>{}</td><td>{}</td></tr>",
                escape_html(&row.member_name),
                escape_html(&member_label),
                escape_html(&row.work_desc),
                format_progress(row.progress),
                escape_html(&row.next_week_plan),
                escape_html(row.risks.as_deref().unwrap_or("")),
            );
        }
        let _ = writeln!(output, "</tbody></table></div>");
    }

    let _ = write!(output, "</div></body></html>");
    output
}

/// Renders the current week from the store. A failing store renders as an
/// empty week.
pub async fn build_weekly_summary(
    store: &dyn ReportStore,
    tz: Tz,
    window: &WeekWindow,
    title: &str,
) -> String {
    let (start, end) = window.utc_bounds(tz);
    let rows = match store.reports_between(start, end).await {
        Ok(rows) => rows,
        Err(e) => {
            warn!(error = %e, window = %window.label(), "report query failed, rendering empty week");
            Vec::new()
        }
    };
    info!(reports = rows.len(), window = %window.label(), "weekly summary built");
    render_summary(title, window, &rows)
}

/// Inserts the digest block right after the opening container tag.
pub fn splice_digest(document: &str, digest: &str) -> String {
    let block = format!(
        "<div class='card'><h2>AI Summary</h2><div class='digest'>{}</div></div>",
        escape_html(digest.trim())
    );
    match document.find(OPENING_CONTAINER) {
        Some(idx) => {
            let at = idx + OPENING_CONTAINER.len();
            format!("{}{}{}", &document[..at], block, &document[at..])
        }
        None => format!("{block}{document}"),
    }
}

pub fn escape_html(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    let mut chars = text.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '\r' => {
                if chars.peek() == Some(&'\n') {
                    chars.next();
                }
                escaped.push_str("<br>");
            }
            '\n' => escaped.push_str("<br>"),
            other => escaped.push(other),
        }
    }
    escaped
}

/// The stored value without trailing zeros: `80%`, `45.5%`, `33.33%`.
pub fn format_progress(progress: f64) -> String {
    format!("{progress}%")
}

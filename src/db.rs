use anyhow::Context;
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use sqlx::{PgPool, Row};
use tracing::debug;
use uuid::Uuid;

use crate::error::Result;
use crate::models::{MemberProfile, NewReport, ReportRecord};

/// Read side of the report store consumed by the aggregator and jobs.
#[async_trait]
pub trait ReportStore: Send + Sync {
    /// Reports created in `[start, end]`, left-joined to their member and
    /// ordered by project, then member display name.
    async fn reports_between(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<ReportRecord>>;

    /// Contact handles of active members that have one.
    async fn active_contacts(&self) -> Result<Vec<String>>;
}

/// Postgres-backed store. Each query checks a connection out of the pool
/// and returns it when done.
#[derive(Clone)]
pub struct PgReportStore {
    pool: PgPool,
}

impl PgReportStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ReportStore for PgReportStore {
    async fn reports_between(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<ReportRecord>> {
        let rows = sqlx::query(
            r#"
            SELECT r.member_name, r.project, r.work_desc, r.progress,
                   r.next_week_plan, r.risks,
                   m.id AS member_id, m.department, m.position
            FROM weekly_status.reports r
            LEFT JOIN weekly_status.members m ON m.id = r.member_id
            WHERE r.created_at >= $1 AND r.created_at <= $2
            ORDER BY r.project, r.member_name
            "#,
        )
        .bind(start)
        .bind(end)
        .fetch_all(&self.pool)
        .await?;

        let mut reports = Vec::with_capacity(rows.len());
        for row in rows {
            let member_id: Option<Uuid> = row.get("member_id");
            reports.push(ReportRecord {
                member_name: row.get("member_name"),
                project: row.get("project"),
                work_desc: row.get("work_desc"),
                progress: row.get("progress"),
                next_week_plan: row.get("next_week_plan"),
                risks: row.get("risks"),
                member: member_id.map(|_| MemberProfile {
                    department: row.get("department"),
                    position: row.get("position"),
                }),
            });
        }

        debug!(count = reports.len(), %start, %end, "fetched weekly reports");
        Ok(reports)
    }

    async fn active_contacts(&self) -> Result<Vec<String>> {
        let rows = sqlx::query(
            r#"
            SELECT phone
            FROM weekly_status.members
            WHERE is_active AND phone IS NOT NULL AND btrim(phone) <> ''
            ORDER BY name
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| row.get::<String, _>("phone").trim().to_string())
            .collect())
    }
}

pub async fn init_db(pool: &PgPool) -> anyhow::Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

pub async fn seed(pool: &PgPool) -> anyhow::Result<()> {
    let members = vec![
        ("Ann Lee", "Engineering", "Senior Engineer", "ann.lee@example.com", "13800000001"),
        ("Bob Chen", "Product", "Product Manager", "bob.chen@example.com", "13800000002"),
        ("Cara Wu", "Engineering", "Frontend Engineer", "cara.wu@example.com", "13800000003"),
        ("Dan Zhao", "QA", "Test Engineer", "dan.zhao@example.com", ""),
        ("Eve Qian", "Operations", "SRE", "eve.qian@example.com", "13800000005"),
    ];

    for (name, department, position, email, phone) in members {
        sqlx::query(
            r#"
            INSERT INTO weekly_status.members (id, name, department, position, email, phone)
            VALUES ($1, $2, $3, $4, $5, NULLIF($6, ''))
            ON CONFLICT (name) DO UPDATE
            SET department = EXCLUDED.department, position = EXCLUDED.position
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(name)
        .bind(department)
        .bind(position)
        .bind(email)
        .bind(phone)
        .execute(pool)
        .await?;
    }

    let projects = vec![
        ("Payments Upgrade", "Payment channel consolidation and performance work"),
        ("Core Platform", "Shared service platform"),
        ("Mobile App", "Mobile client iterations"),
        ("Data Governance", "Data quality and standardisation"),
        ("Ops Console", "Operations back-office improvements"),
    ];

    for (name, description) in projects {
        sqlx::query(
            r#"
            INSERT INTO weekly_status.projects (id, name, description)
            VALUES ($1, $2, $3)
            ON CONFLICT (name) DO NOTHING
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(name)
        .bind(description)
        .execute(pool)
        .await?;
    }

    let now = Utc::now();
    let reports = vec![
        NewReport {
            member_name: "Ann Lee".to_string(),
            project: "Core Platform".to_string(),
            work_desc: "Finished the config service migration\nReviewed gateway PRs".to_string(),
            progress: 80.0,
            next_week_plan: "Roll out to staging".to_string(),
            risks: None,
            created_at: Some(now - Duration::minutes(30)),
        },
        NewReport {
            member_name: "Bob Chen".to_string(),
            project: "Core Platform".to_string(),
            work_desc: "Drafted Q4 roadmap".to_string(),
            progress: 60.0,
            next_week_plan: "Align roadmap with stakeholders".to_string(),
            risks: Some("Waiting on budget sign-off".to_string()),
            created_at: Some(now - Duration::minutes(20)),
        },
        NewReport {
            member_name: "Cara Wu".to_string(),
            project: "Mobile App".to_string(),
            work_desc: "Implemented <Settings> screen & dark mode".to_string(),
            progress: 45.5,
            next_week_plan: "Accessibility pass".to_string(),
            risks: None,
            created_at: Some(now - Duration::minutes(10)),
        },
    ];

    for report in &reports {
        insert_report(pool, report).await?;
    }

    Ok(())
}

/// Stores one report, resolving the member by name. Unknown names keep a
/// null member reference.
pub async fn insert_report(pool: &PgPool, report: &NewReport) -> anyhow::Result<Uuid> {
    let member_id: Option<Uuid> =
        sqlx::query("SELECT id FROM weekly_status.members WHERE name = $1")
            .bind(&report.member_name)
            .fetch_optional(pool)
            .await?
            .map(|row| row.get("id"));

    let id = Uuid::new_v4();
    sqlx::query(
        r#"
        INSERT INTO weekly_status.reports
        (id, member_id, member_name, project, work_desc, progress, next_week_plan, risks, created_at)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, COALESCE($9, NOW()))
        "#,
    )
    .bind(id)
    .bind(member_id)
    .bind(&report.member_name)
    .bind(&report.project)
    .bind(&report.work_desc)
    .bind(report.progress)
    .bind(&report.next_week_plan)
    .bind(&report.risks)
    .bind(report.created_at)
    .execute(pool)
    .await
    .with_context(|| format!("failed to insert report for {}", report.member_name))?;

    Ok(id)
}

#[derive(Debug, serde::Deserialize)]
struct CsvReportRow {
    member_name: String,
    project: String,
    work_desc: String,
    progress: f64,
    next_week_plan: String,
    risks: Option<String>,
    created_at: Option<DateTime<Utc>>,
}

impl From<CsvReportRow> for NewReport {
    fn from(row: CsvReportRow) -> Self {
        NewReport {
            member_name: row.member_name.trim().to_string(),
            project: row.project.trim().to_string(),
            work_desc: row.work_desc,
            progress: row.progress.clamp(0.0, 100.0),
            next_week_plan: row.next_week_plan,
            risks: row.risks.filter(|risk| !risk.trim().is_empty()),
            created_at: row.created_at,
        }
    }
}

fn read_reports_csv<R: std::io::Read>(reader: R) -> anyhow::Result<Vec<NewReport>> {
    let mut reader = csv::Reader::from_reader(reader);
    let mut reports = Vec::new();
    for result in reader.deserialize::<CsvReportRow>() {
        reports.push(result?.into());
    }
    Ok(reports)
}

pub async fn import_reports_csv(pool: &PgPool, csv_path: &std::path::Path) -> anyhow::Result<usize> {
    let file = std::fs::File::open(csv_path)
        .with_context(|| format!("cannot open {}", csv_path.display()))?;
    let reports = read_reports_csv(file)?;

    for report in &reports {
        insert_report(pool, report).await?;
    }

    Ok(reports.len())
}

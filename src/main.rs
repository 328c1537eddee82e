use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

mod config;
mod db;
mod error;
mod models;
mod notify;
mod scheduler;
mod summarizer;
mod summary;
#[cfg(test)]
mod test_support;
mod week;

use config::Config;
use notify::{SmtpEmailSender, WebhookChatSender};
use scheduler::{JobArgs, JobContext, JobKind, SchedulerService};
use summarizer::LlmSummarizer;

#[derive(Parser)]
#[command(name = "weekly-status")]
#[command(about = "Team weekly status summaries and scheduled reminders", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create or upgrade the database schema
    InitDb,
    /// Load sample members, projects and reports
    Seed,
    /// Import reports from a CSV file
    Import {
        #[arg(long)]
        csv: PathBuf,
    },
    /// Render this week's summary as HTML
    Summary {
        #[arg(long, default_value = "weekly-summary.html")]
        out: PathBuf,
        /// Splice in the LLM digest when the summarizer is enabled
        #[arg(long)]
        enrich: bool,
    },
    /// Start the weekly scheduler and run until interrupted
    Run,
    /// Fire a notification once, optionally after a delay
    Send {
        #[arg(value_enum)]
        kind: JobKind,
        #[arg(long, default_value_t = 0, allow_negative_numbers = true)]
        delay_seconds: i64,
        /// Reminder text override (chat reminders only)
        #[arg(long)]
        text: Option<String>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let database_url = std::env::var("DATABASE_URL")
        .context("DATABASE_URL must be set to a Postgres instance")?;

    let pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(&database_url)
        .await
        .context("failed to connect to Postgres")?;

    match cli.command {
        Commands::InitDb => {
            db::init_db(&pool).await?;
            println!("Schema ready.");
        }
        Commands::Seed => {
            db::seed(&pool).await?;
            println!("Seed data inserted.");
        }
        Commands::Import { csv } => {
            let inserted = db::import_reports_csv(&pool, &csv).await?;
            println!("Inserted {inserted} reports from {}.", csv.display());
        }
        Commands::Summary { out, enrich } => {
            let config = Config::from_env()?;
            let context = job_context(&config, pool)?;
            let html = context.render_summary(enrich).await;
            std::fs::write(&out, html)?;
            println!("Summary written to {}.", out.display());
        }
        Commands::Run => {
            let config = Config::from_env()?;
            info!(
                webhook_present = config.chat.webhook_url.is_some(),
                secret_present = config.chat.secret.is_some(),
                smtp_present = config.smtp.host.is_some(),
                llm_summary = config.summarizer.enabled,
                "startup configuration check"
            );
            let scheduler = scheduler_service(&config, pool)?;
            scheduler.start()?;

            for job in scheduler.jobs() {
                if let Some(next_run) = job.next_run {
                    println!("- {} next run {}", job.name, next_run.to_rfc3339());
                }
            }
            println!("Scheduler running. Press Ctrl-C to stop.");
            tokio::signal::ctrl_c().await?;

            let history = scheduler.history();
            println!("Scheduler stopped after {} runs.", history.len());
            for run in history {
                println!(
                    "- {} {} {:?}",
                    run.started_at.to_rfc3339(),
                    run.name,
                    run.outcome
                );
            }
        }
        Commands::Send {
            kind,
            delay_seconds,
            text,
        } => {
            let config = Config::from_env()?;
            let scheduler = scheduler_service(&config, pool)?;
            let mut results = scheduler.subscribe();

            let args = match kind {
                JobKind::ChatReminder => JobArgs::ChatReminder { text },
                JobKind::SummaryEmail => {
                    if text.is_some() {
                        warn!("--text only applies to chat reminders, ignoring it");
                    }
                    JobArgs::SummaryEmail
                }
            };

            let status = scheduler.schedule_once(args, delay_seconds);
            println!("{}", serde_json::to_string_pretty(&status)?);
            if !status.scheduled {
                anyhow::bail!("job was not scheduled");
            }

            loop {
                let run = results.recv().await?;
                if run.kind == kind && run.name.starts_with("once_") {
                    println!("{}", serde_json::to_string_pretty(&run)?);
                    break;
                }
            }
        }
    }

    Ok(())
}

fn job_context(config: &Config, pool: PgPool) -> anyhow::Result<JobContext> {
    Ok(JobContext {
        store: Arc::new(db::PgReportStore::new(pool)),
        chat: Arc::new(WebhookChatSender::new(config.chat.clone())?),
        email: Arc::new(SmtpEmailSender::new(config.smtp.clone())),
        summarizer: Arc::new(LlmSummarizer::new(config.summarizer.clone())?),
        timezone: config.timezone,
        report_title: config.report_title.clone(),
        reminder_text: config.reminder_text.clone(),
    })
}

fn scheduler_service(config: &Config, pool: PgPool) -> anyhow::Result<SchedulerService> {
    Ok(SchedulerService::new(
        job_context(config, pool)?,
        config.reminder_schedule,
        config.summary_schedule,
    ))
}

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError};

use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use serde::Serialize;
use tokio::runtime::Handle;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::jobs::{JobArgs, JobContext, JobKind, JobOutcome};
use super::trigger::WeeklyTrigger;
use crate::error::{Result, StatusError};

const HISTORY_LIMIT: usize = 200;
const RESULT_CHANNEL_CAPACITY: usize = 64;
const PREVIEW_CHARS: usize = 80;

type Clock = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Trigger {
    Weekly(WeeklyTrigger),
    Once { run_at: DateTime<Tz> },
}

#[derive(Debug, Clone, Serialize)]
pub struct ScheduledJob {
    pub id: Uuid,
    pub name: String,
    pub args: JobArgs,
    pub trigger: Trigger,
    pub next_run: Option<DateTime<Tz>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct JobRunRecord {
    pub job_id: Uuid,
    pub name: String,
    pub kind: JobKind,
    pub started_at: DateTime<Tz>,
    pub finished_at: DateTime<Tz>,
    pub outcome: JobOutcome,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScheduleStatus {
    pub scheduled: bool,
    pub run_at: Option<DateTime<Tz>>,
    pub delay_seconds: i64,
}

#[derive(Default)]
struct Registry {
    jobs: Vec<ScheduledJob>,
    history: VecDeque<JobRunRecord>,
}

struct Engine {
    context: Arc<JobContext>,
    timezone: Tz,
    clock: Clock,
    registry: Mutex<Registry>,
    results: broadcast::Sender<JobRunRecord>,
}

impl Engine {
    fn registry(&self) -> MutexGuard<'_, Registry> {
        self.registry.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn now(&self) -> DateTime<Tz> {
        (self.clock)().with_timezone(&self.timezone)
    }

    /// Sleeps until the wall clock reaches `at`. Timers run on the monotonic
    /// clock, so the wall clock is checked again after every wake.
    async fn sleep_until(&self, at: DateTime<Tz>) {
        loop {
            let now = self.now();
            if now >= at {
                return;
            }
            let wait = (at - now).to_std().unwrap_or_default();
            tokio::time::sleep(wait).await;
        }
    }

    fn register(&self, job: ScheduledJob) {
        self.registry().jobs.push(job);
    }

    fn unregister(&self, id: Uuid) {
        self.registry().jobs.retain(|job| job.id != id);
    }

    fn set_next_run(&self, id: Uuid, next_run: DateTime<Tz>) {
        if let Some(job) = self.registry().jobs.iter_mut().find(|job| job.id == id) {
            job.next_run = Some(next_run);
        }
    }

    fn record(&self, run: JobRunRecord) {
        {
            let mut registry = self.registry();
            registry.history.push_back(run.clone());
            while registry.history.len() > HISTORY_LIMIT {
                registry.history.pop_front();
            }
        }
        // Nobody listening is fine.
        let _ = self.results.send(run);
    }

    async fn fire(self: Arc<Self>, job_id: Uuid, name: String, args: JobArgs) {
        let started_at = self.now();
        info!(job = %name, %job_id, "job fired");

        let context = Arc::clone(&self.context);
        let job_args = args.clone();
        let outcome = match tokio::spawn(async move { context.execute(&job_args).await }).await {
            Ok(outcome) => outcome,
            Err(e) => {
                error!(job = %name, error = %e, "job aborted");
                JobOutcome::Failed
            }
        };

        match outcome {
            JobOutcome::Delivered => info!(job = %name, "job completed"),
            JobOutcome::Failed => warn!(job = %name, "job completed without delivery"),
        }

        self.record(JobRunRecord {
            job_id,
            name,
            kind: args.kind(),
            started_at,
            finished_at: self.now(),
            outcome,
        });
    }

    async fn run_weekly(
        self: Arc<Self>,
        job_id: Uuid,
        name: String,
        trigger: WeeklyTrigger,
        args: JobArgs,
    ) {
        let mut last_run: Option<DateTime<Tz>> = None;
        loop {
            // Never earlier than the slot that already fired, even if the
            // wall clock was stepped back.
            let now = self.now();
            let from = last_run.map_or(now, |last| last.max(now));
            let next_run = trigger.next_after(&from);
            self.set_next_run(job_id, next_run);
            debug!(job = %name, %next_run, "waiting for next weekly run");

            self.sleep_until(next_run).await;
            last_run = Some(next_run);

            tokio::spawn(Arc::clone(&self).fire(job_id, name.clone(), args.clone()));
        }
    }
}

/// Application-lifetime scheduler. Construct once and share it.
pub struct SchedulerService {
    engine: Arc<Engine>,
    reminder: WeeklyTrigger,
    summary: WeeklyTrigger,
    weekly: OnceLock<Vec<JoinHandle<()>>>,
}

impl SchedulerService {
    pub fn new(context: JobContext, reminder: WeeklyTrigger, summary: WeeklyTrigger) -> Self {
        Self::with_clock(context, reminder, summary, Arc::new(Utc::now))
    }

    fn with_clock(
        context: JobContext,
        reminder: WeeklyTrigger,
        summary: WeeklyTrigger,
        clock: Clock,
    ) -> Self {
        let (results, _) = broadcast::channel(RESULT_CHANNEL_CAPACITY);
        Self {
            engine: Arc::new(Engine {
                timezone: context.timezone,
                context: Arc::new(context),
                clock,
                registry: Mutex::new(Registry::default()),
                results,
            }),
            reminder,
            summary,
            weekly: OnceLock::new(),
        }
    }

    /// Registers the weekly jobs. Returns `true` for the call that actually
    /// started the engine; later calls are no-ops returning `false`.
    pub fn start(&self) -> Result<bool> {
        let handle = Handle::try_current()
            .map_err(|e| StatusError::Scheduler(format!("no async runtime available: {e}")))?;

        let mut started_now = false;
        self.weekly.get_or_init(|| {
            started_now = true;
            self.spawn_weekly(&handle)
        });

        if started_now {
            info!(
                reminder = %self.reminder,
                summary = %self.summary,
                timezone = %self.engine.timezone,
                "scheduler started, weekly jobs registered"
            );
        } else {
            debug!("scheduler already started");
        }
        Ok(started_now)
    }

    fn spawn_weekly(&self, handle: &Handle) -> Vec<JoinHandle<()>> {
        let weekly = [
            (
                "weekly_chat_reminder",
                self.reminder,
                JobArgs::ChatReminder { text: None },
            ),
            ("weekly_summary_email", self.summary, JobArgs::SummaryEmail),
        ];

        weekly
            .into_iter()
            .map(|(name, trigger, args)| {
                let id = Uuid::new_v4();
                self.engine.register(ScheduledJob {
                    id,
                    name: name.to_string(),
                    args: args.clone(),
                    trigger: Trigger::Weekly(trigger),
                    next_run: Some(trigger.next_after(&self.engine.now())),
                });
                handle.spawn(Arc::clone(&self.engine).run_weekly(id, name.to_string(), trigger, args))
            })
            .collect()
    }

    /// Schedules a single run `delay_seconds` from now, starting the engine
    /// first if needed. Negative delays run immediately. Registration
    /// problems come back as `scheduled: false`.
    pub fn schedule_once(&self, args: JobArgs, delay_seconds: i64) -> ScheduleStatus {
        let delay_seconds = delay_seconds.max(0);
        match self.register_once(args, delay_seconds) {
            Ok(run_at) => ScheduleStatus {
                scheduled: true,
                run_at: Some(run_at),
                delay_seconds,
            },
            Err(e) => {
                error!(error = %e, delay_seconds, "failed to schedule one-off job");
                ScheduleStatus {
                    scheduled: false,
                    run_at: None,
                    delay_seconds,
                }
            }
        }
    }

    fn register_once(&self, args: JobArgs, delay_seconds: i64) -> Result<DateTime<Tz>> {
        self.start()?;
        let handle = Handle::try_current()
            .map_err(|e| StatusError::Scheduler(format!("no async runtime available: {e}")))?;

        let out_of_range =
            || StatusError::Scheduler(format!("delay of {delay_seconds}s is out of range"));
        let delay = chrono::Duration::try_seconds(delay_seconds).ok_or_else(out_of_range)?;
        let run_at = self
            .engine
            .now()
            .checked_add_signed(delay)
            .ok_or_else(out_of_range)?;
        let wait = delay.to_std().map_err(|_| out_of_range())?;

        let name = match args.kind() {
            JobKind::ChatReminder => "once_chat_reminder",
            JobKind::SummaryEmail => "once_summary_email",
        };
        if let JobArgs::ChatReminder { text: Some(text) } = &args {
            let mut preview: String = text.trim().chars().take(PREVIEW_CHARS).collect();
            if text.trim().chars().count() > PREVIEW_CHARS {
                preview.push_str("...");
            }
            info!(delay_seconds, %run_at, text = %preview, "scheduling one-off chat reminder");
        }

        let id = Uuid::new_v4();
        self.engine.register(ScheduledJob {
            id,
            name: name.to_string(),
            args: args.clone(),
            trigger: Trigger::Once { run_at },
            next_run: Some(run_at),
        });

        let engine = Arc::clone(&self.engine);
        handle.spawn(async move {
            tokio::time::sleep(wait).await;
            engine.unregister(id);
            engine.fire(id, name.to_string(), args).await;
        });

        info!(job = name, %run_at, "one-off job scheduled");
        Ok(run_at)
    }

    pub fn jobs(&self) -> Vec<ScheduledJob> {
        self.engine.registry().jobs.clone()
    }

    /// Most recent completed runs, oldest first.
    pub fn history(&self) -> Vec<JobRunRecord> {
        self.engine.registry().history.iter().cloned().collect()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<JobRunRecord> {
        self.engine.results.subscribe()
    }
}

impl Drop for SchedulerService {
    fn drop(&mut self) {
        if let Some(handles) = self.weekly.get() {
            for handle in handles {
                handle.abort();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notify::EmailSender;
    use crate::test_support::{context, MemoryStore};
    use async_trait::async_trait;
    use chrono::{Datelike, TimeZone, Weekday};
    use std::time::Duration;

    fn service(store: MemoryStore) -> (SchedulerService, crate::test_support::Harness) {
        let harness = context(store);
        let service = SchedulerService::new(
            harness.context.clone(),
            WeeklyTrigger::new(Weekday::Fri, 10, 0).unwrap(),
            WeeklyTrigger::new(Weekday::Fri, 18, 0).unwrap(),
        );
        (service, harness)
    }

    fn weekly_count(service: &SchedulerService) -> usize {
        service
            .jobs()
            .iter()
            .filter(|job| matches!(job.trigger, Trigger::Weekly(_)))
            .count()
    }

    async fn next_run(rx: &mut broadcast::Receiver<JobRunRecord>) -> JobRunRecord {
        tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("job did not complete in time")
            .expect("result channel closed")
    }

    #[tokio::test]
    async fn start_twice_registers_weekly_jobs_once() {
        let (service, _harness) = service(MemoryStore::default());
        assert!(service.start().unwrap());
        assert!(!service.start().unwrap());
        assert_eq!(weekly_count(&service), 2);

        let names: Vec<String> = service.jobs().into_iter().map(|job| job.name).collect();
        assert!(names.contains(&"weekly_chat_reminder".to_string()));
        assert!(names.contains(&"weekly_summary_email".to_string()));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_first_starts_initialise_once() {
        let (service, _harness) = service(MemoryStore::default());
        let service = Arc::new(service);

        let mut tasks = Vec::new();
        for _ in 0..16 {
            let service = Arc::clone(&service);
            tasks.push(tokio::spawn(async move { service.start().unwrap() }));
        }
        let mut started = 0;
        for task in tasks {
            if task.await.unwrap() {
                started += 1;
            }
        }

        assert_eq!(started, 1);
        assert_eq!(weekly_count(&service), 2);
    }

    #[tokio::test]
    async fn weekly_jobs_know_their_next_run() {
        let (service, _harness) = service(MemoryStore::default());
        service.start().unwrap();
        for job in service.jobs() {
            let next = job.next_run.unwrap();
            assert_eq!(next.weekday(), Weekday::Fri);
            assert!(next > Utc::now().with_timezone(&chrono_tz::UTC));
        }
    }

    #[tokio::test]
    async fn schedule_once_starts_engine_and_runs() {
        let (service, harness) = service(MemoryStore::default().with_contacts(&["138001"]));
        let mut rx = service.subscribe();

        let status = service.schedule_once(
            JobArgs::ChatReminder {
                text: Some("Ping".to_string()),
            },
            0,
        );
        assert!(status.scheduled);
        assert!(status.run_at.is_some());
        assert_eq!(weekly_count(&service), 2);

        let run = next_run(&mut rx).await;
        assert_eq!(run.kind, JobKind::ChatReminder);
        assert_eq!(run.outcome, JobOutcome::Delivered);
        assert_eq!(run.name, "once_chat_reminder");
        assert_eq!(harness.chat.sent()[0].0, "Ping");

        assert_eq!(service.history().len(), 1);
        assert!(service
            .jobs()
            .iter()
            .all(|job| matches!(job.trigger, Trigger::Weekly(_))));
    }

    #[tokio::test]
    async fn negative_delay_is_clamped() {
        let (service, _harness) = service(MemoryStore::default());
        let before = Utc::now();
        let status = service.schedule_once(JobArgs::SummaryEmail, -5);

        assert!(status.scheduled);
        assert_eq!(status.delay_seconds, 0);
        let run_at = status.run_at.unwrap().with_timezone(&Utc);
        assert!(run_at >= before);
        assert!(run_at - before < chrono::Duration::seconds(2));
    }

    #[tokio::test]
    async fn delayed_job_waits_in_registry() {
        let (service, _harness) = service(MemoryStore::default());
        let status = service.schedule_once(JobArgs::SummaryEmail, 3600);

        assert!(status.scheduled);
        let pending: Vec<ScheduledJob> = service
            .jobs()
            .into_iter()
            .filter(|job| matches!(job.trigger, Trigger::Once { .. }))
            .collect();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].next_run, status.run_at);
        assert_eq!(pending[0].args, JobArgs::SummaryEmail);
    }

    #[tokio::test]
    async fn out_of_range_delay_is_reported() {
        let (service, _harness) = service(MemoryStore::default());
        let status = service.schedule_once(JobArgs::SummaryEmail, i64::MAX);
        assert_eq!(
            status,
            ScheduleStatus {
                scheduled: false,
                run_at: None,
                delay_seconds: i64::MAX,
            }
        );
    }

    #[test]
    fn scheduling_without_runtime_is_reported() {
        let (service, _harness) = service(MemoryStore::default());
        assert!(service.start().is_err());
        let status = service.schedule_once(JobArgs::SummaryEmail, 0);
        assert!(!status.scheduled);
        assert!(status.run_at.is_none());
    }

    #[tokio::test]
    async fn failed_delivery_does_not_block_later_jobs() {
        let (service, harness) = service(MemoryStore::default());
        let mut rx = service.subscribe();
        harness.chat.fail_next();

        service.schedule_once(JobArgs::ChatReminder { text: None }, 0);
        let first = next_run(&mut rx).await;
        service.schedule_once(JobArgs::ChatReminder { text: None }, 0);
        let second = next_run(&mut rx).await;

        assert_eq!(first.outcome, JobOutcome::Failed);
        assert_eq!(second.outcome, JobOutcome::Delivered);
        assert_eq!(harness.chat.sent().len(), 2);
    }

    struct PanickingEmail;

    #[async_trait]
    impl EmailSender for PanickingEmail {
        async fn send_email(&self, _subject: &str, _html_body: &str) -> bool {
            panic!("smtp exploded");
        }
    }

    #[tokio::test]
    async fn panicking_job_is_contained() {
        let mut harness = context(MemoryStore::default());
        harness.context.email = Arc::new(PanickingEmail);
        let service = SchedulerService::new(
            harness.context.clone(),
            WeeklyTrigger::new(Weekday::Fri, 10, 0).unwrap(),
            WeeklyTrigger::new(Weekday::Fri, 18, 0).unwrap(),
        );
        let mut rx = service.subscribe();

        service.schedule_once(JobArgs::SummaryEmail, 0);
        assert_eq!(next_run(&mut rx).await.outcome, JobOutcome::Failed);

        service.schedule_once(JobArgs::ChatReminder { text: None }, 0);
        assert_eq!(next_run(&mut rx).await.outcome, JobOutcome::Delivered);
    }

    #[tokio::test]
    async fn status_serialises_for_callers() {
        let (service, _harness) = service(MemoryStore::default());
        let status = service.schedule_once(JobArgs::SummaryEmail, 30);
        let value = serde_json::to_value(&status).unwrap();

        assert_eq!(value["scheduled"], true);
        assert_eq!(value["delay_seconds"], 30);
        let run_at = value["run_at"].as_str().unwrap();
        let parsed = DateTime::parse_from_rfc3339(run_at).unwrap();
        assert_eq!(Some(parsed.with_timezone(&chrono_tz::UTC)), status.run_at);
    }

    /// Wall clock that only moves when told to.
    #[derive(Clone)]
    struct ManualClock(Arc<Mutex<DateTime<Utc>>>);

    impl ManualClock {
        fn new(at: DateTime<Utc>) -> Self {
            Self(Arc::new(Mutex::new(at)))
        }

        fn set(&self, at: DateTime<Utc>) {
            *self.0.lock().unwrap() = at;
        }

        fn clock(&self) -> Clock {
            let now = Arc::clone(&self.0);
            Arc::new(move || *now.lock().unwrap())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn weekly_job_fires_once_per_slot_and_rearms() {
        // Friday 2026-10-23, two minutes before the reminder slot.
        let clock = ManualClock::new(Utc.with_ymd_and_hms(2026, 10, 23, 9, 58, 0).unwrap());
        let harness = context(MemoryStore::default().with_contacts(&["138001"]));
        let service = SchedulerService::with_clock(
            harness.context.clone(),
            WeeklyTrigger::new(Weekday::Fri, 10, 0).unwrap(),
            WeeklyTrigger::new(Weekday::Fri, 18, 0).unwrap(),
            clock.clock(),
        );
        let mut rx = service.subscribe();
        service.start().unwrap();

        // Timers run well past the slot while the wall clock stands still.
        let early = tokio::time::timeout(Duration::from_secs(600), rx.recv()).await;
        assert!(early.is_err());
        assert!(harness.chat.sent().is_empty());

        let slot = chrono_tz::UTC.with_ymd_and_hms(2026, 10, 23, 10, 0, 0).unwrap();
        clock.set(slot.with_timezone(&Utc));
        let run = tokio::time::timeout(Duration::from_secs(600), rx.recv())
            .await
            .expect("weekly reminder did not fire")
            .unwrap();
        assert_eq!(run.name, "weekly_chat_reminder");
        assert_eq!(run.started_at, slot);
        assert_eq!(run.outcome, JobOutcome::Delivered);

        // A wall clock stepped back across the slot does not bring it back.
        clock.set(Utc.with_ymd_and_hms(2026, 10, 23, 9, 59, 30).unwrap());
        let repeat = tokio::time::timeout(Duration::from_secs(3600), rx.recv()).await;
        assert!(repeat.is_err());
        assert_eq!(harness.chat.sent().len(), 1);

        let reminder = service
            .jobs()
            .into_iter()
            .find(|job| job.name == "weekly_chat_reminder")
            .unwrap();
        assert_eq!(reminder.next_run, Some(slot + chrono::Duration::days(7)));
    }
}

pub mod jobs;
pub mod service;
pub mod trigger;

pub use jobs::{JobArgs, JobContext, JobKind};
pub use service::SchedulerService;
pub use trigger::WeeklyTrigger;

//! Periodic scheduling on calendar triggers.

mod scheduler;
mod trigger;

pub use scheduler::{ScheduleError, ScheduledJob, Scheduler, SchedulerHandle, maybe_start};
pub use trigger::{CalendarTrigger, TriggerError};

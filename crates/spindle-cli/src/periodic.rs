//! Periodic job table for the finance backend.
//!
//! Trigger expressions are `minute hour day_of_week`, evaluated in the
//! scheduler's configured zone (0 = Monday).

use serde_json::json;
use spindle_core::{ScheduleError, ScheduledJob};

use crate::tasks::{
    CHECK_ALL_BUDGETS, CLEANUP_OLD_NOTIFICATIONS, SEND_DAILY_REMINDERS, SEND_PAYMENT_REMINDERS,
    SEND_WEEKLY_SUMMARY,
};

const JOBS: [(&str, &str, &str); 5] = [
    ("send_weekly_summary", "0 20 sun", SEND_WEEKLY_SUMMARY),
    ("send_daily_reminders", "* * *", SEND_DAILY_REMINDERS),
    ("check_all_budgets", "*/30 * *", CHECK_ALL_BUDGETS),
    ("cleanup_old_notifications", "0 3 *", CLEANUP_OLD_NOTIFICATIONS),
    ("send_payment_reminders", "* * *", SEND_PAYMENT_REMINDERS),
];

pub fn finance_jobs() -> Result<Vec<ScheduledJob>, ScheduleError> {
    JOBS.iter()
        .map(|(job_id, expr, task)| ScheduledJob::new(*job_id, expr, *task, json!({})))
        .collect()
}

//! Finance task bodies and their registration.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::{info, warn};

use spindle_core::{
    BoundHandler, EngineBuilder, Handler, RegistryError, RetryPolicy, Task, TaskContext, TaskError,
    TaskResult,
};

use crate::services::{Directory, Mailer, PushSender, ReportRenderer};

pub const SEND_EMAIL: &str = "app.tasks.email_tasks.send_email_task";
pub const SEND_PUSH: &str = "app.tasks.notification_tasks.send_push_notification_task";
pub const SEND_NOTIFICATION: &str = "app.tasks.notification_tasks.send_notification_task";
pub const GENERATE_PDF_REPORT: &str = "app.tasks.report_tasks.generate_pdf_report_task";
pub const SEND_WEEKLY_SUMMARY: &str = "app.tasks.periodic_tasks.send_weekly_summary";
pub const SEND_DAILY_REMINDERS: &str = "app.tasks.periodic_tasks.send_daily_reminders";
pub const CHECK_ALL_BUDGETS: &str = "app.tasks.periodic_tasks.check_all_budgets";
pub const CLEANUP_OLD_NOTIFICATIONS: &str = "app.tasks.periodic_tasks.cleanup_old_notifications";
pub const SEND_PAYMENT_REMINDERS: &str = "app.tasks.periodic_tasks.send_payment_reminders";

pub const ALL_TASKS: [&str; 9] = [
    SEND_EMAIL,
    SEND_PUSH,
    SEND_NOTIFICATION,
    GENERATE_PDF_REPORT,
    SEND_WEEKLY_SUMMARY,
    SEND_DAILY_REMINDERS,
    CHECK_ALL_BUDGETS,
    CLEANUP_OLD_NOTIFICATIONS,
    SEND_PAYMENT_REMINDERS,
];

// ── email ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SendEmail {
    pub to_email: String,
    pub subject: String,
    pub html_content: String,
    #[serde(default)]
    pub text_content: Option<String>,
}

impl Task for SendEmail {
    const NAME: &'static str = SEND_EMAIL;
}

pub struct SendEmailTask {
    mailer: Arc<dyn Mailer>,
    backoff_base: Duration,
}

#[async_trait]
impl BoundHandler<SendEmail> for SendEmailTask {
    async fn handle(&self, ctx: TaskContext, args: SendEmail) -> TaskResult {
        let sent = self
            .mailer
            .send_email(
                &args.to_email,
                &args.subject,
                &args.html_content,
                args.text_content.as_deref(),
            )
            .await;
        match sent {
            Ok(true) => {
                info!(to = %args.to_email, "Email sent successfully");
                Ok(json!({ "status": "success", "to": args.to_email }))
            }
            Ok(false) => Err(ctx.retry("Email send failed", None)),
            Err(e) => {
                warn!(to = %args.to_email, error = %e, "Error sending email");
                let countdown = RetryPolicy::exponential(self.backoff_base, ctx.retries());
                Err(ctx.retry(e, Some(countdown)))
            }
        }
    }
}

// ── push ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SendPush {
    pub token: String,
    pub title: String,
    pub body: String,
    #[serde(default)]
    pub data: Option<Value>,
}

impl Task for SendPush {
    const NAME: &'static str = SEND_PUSH;
}

pub struct SendPushTask {
    push: Arc<dyn PushSender>,
    backoff_base: Duration,
}

#[async_trait]
impl BoundHandler<SendPush> for SendPushTask {
    async fn handle(&self, ctx: TaskContext, args: SendPush) -> TaskResult {
        match self
            .push
            .send_push(&args.token, &args.title, &args.body, args.data.as_ref())
            .await
        {
            Ok(true) => Ok(json!({ "status": "success" })),
            Ok(false) => Err(ctx.retry("Push notification failed", None)),
            Err(e) => {
                warn!(error = %e, "Error sending push");
                let countdown = RetryPolicy::exponential(self.backoff_base, ctx.retries());
                Err(ctx.retry(e, Some(countdown)))
            }
        }
    }
}

// ── notification fan-out ────────────────────────────────────────────────────

fn default_notification_type() -> String {
    "general".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SendNotification {
    pub user_id: String,
    pub title: String,
    pub message: String,
    #[serde(default = "default_notification_type")]
    pub notification_type: String,
    #[serde(default)]
    pub data: Option<Value>,
    #[serde(default)]
    pub channels: Option<Vec<String>>,
}

impl Task for SendNotification {
    const NAME: &'static str = SEND_NOTIFICATION;
}

/// Resolves the user's contacts and queues one delivery task per channel.
pub struct SendNotificationTask {
    directory: Directory,
}

impl SendNotificationTask {
    fn wants(channels: &Option<Vec<String>>, channel: &str) -> bool {
        channels
            .as_ref()
            .is_none_or(|list| list.iter().any(|c| c == channel))
    }
}

#[async_trait]
impl BoundHandler<SendNotification> for SendNotificationTask {
    async fn handle(&self, ctx: TaskContext, args: SendNotification) -> TaskResult {
        let Some(contact) = self.directory.get(&args.user_id) else {
            warn!(user_id = %args.user_id, "User not found");
            return Ok(json!({ "status": "error", "message": "User not found" }));
        };

        let mut follow_ups = Vec::new();
        let mut queued_via = Vec::new();

        if let Some(token) = contact.push_token.as_ref().filter(|_| Self::wants(&args.channels, "push")) {
            let push = SendPush {
                token: token.clone(),
                title: args.title.clone(),
                body: args.message.clone(),
                data: args.data.clone(),
            };
            let handle = ctx
                .submit(SEND_PUSH, serde_json::to_value(push)?)
                .await
                .map_err(|e| ctx.retry(e, None))?;
            follow_ups.push(handle.id().to_string());
            queued_via.push("push");
        }

        if let Some(email) = contact.email.as_ref().filter(|_| Self::wants(&args.channels, "email")) {
            let mail = SendEmail {
                to_email: email.clone(),
                subject: args.title.clone(),
                html_content: format!("<h1>{}</h1><p>{}</p>", args.title, args.message),
                text_content: Some(args.message.clone()),
            };
            let handle = ctx
                .submit(SEND_EMAIL, serde_json::to_value(mail)?)
                .await
                .map_err(|e| ctx.retry(e, None))?;
            follow_ups.push(handle.id().to_string());
            queued_via.push("email");
        }

        info!(
            user_id = %args.user_id,
            notification_type = %args.notification_type,
            ?queued_via,
            "Notification queued"
        );
        Ok(json!({
            "status": "success",
            "sent_via": queued_via,
            "follow_ups": follow_ups,
        }))
    }
}

// ── reports ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneratePdfReport {
    pub user_id: String,
    pub report_type: String,
    pub start_date_str: String,
    pub end_date_str: String,
    #[serde(default)]
    pub send_email: bool,
    #[serde(default)]
    pub user_email: Option<String>,
}

impl Task for GeneratePdfReport {
    const NAME: &'static str = GENERATE_PDF_REPORT;
}

pub struct GeneratePdfReportTask {
    renderer: Arc<dyn ReportRenderer>,
}

fn parse_date(field: &str, value: &str) -> Result<NaiveDate, TaskError> {
    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .map_err(|e| TaskError::fatal(format!("invalid {field} '{value}': {e}")))
}

#[async_trait]
impl BoundHandler<GeneratePdfReport> for GeneratePdfReportTask {
    async fn handle(&self, ctx: TaskContext, args: GeneratePdfReport) -> TaskResult {
        let start = parse_date("start_date_str", &args.start_date_str)?;
        let end = parse_date("end_date_str", &args.end_date_str)?;
        if end < start {
            return Err(TaskError::fatal("end date is before start date"));
        }

        info!(user_id = %args.user_id, report_type = %args.report_type, %start, %end, "Generating PDF report");
        let pdf = self
            .renderer
            .render(&args.user_id, &args.report_type, start, end)
            .await
            .map_err(|e| ctx.retry(e, None))?;

        let filename = format!(
            "reports/{}/reporte_{}_{}_{}.pdf",
            args.user_id, args.report_type, args.start_date_str, args.end_date_str
        );

        let mut email_task = None;
        if let (true, Some(to)) = (args.send_email, args.user_email.as_ref()) {
            let mail = SendEmail {
                to_email: to.clone(),
                subject: format!("Tu reporte {} esta listo", args.report_type),
                html_content: format!("<p>Descarga tu reporte: {filename}</p>"),
                text_content: None,
            };
            let handle = ctx
                .submit(SEND_EMAIL, serde_json::to_value(mail)?)
                .await
                .map_err(|e| ctx.retry(e, None))?;
            email_task = Some(handle.id().to_string());
        }

        Ok(json!({
            "status": "success",
            "filename": filename,
            "size_bytes": pdf.len(),
            "email_task": email_task,
        }))
    }
}

// ── periodic ────────────────────────────────────────────────────────────────

/// Argument-less periodic task. The body only logs its run.
///
/// Args are an empty object so scheduled jobs submit `{}`.
macro_rules! periodic_task {
    ($args:ident, $handler:ident, $name:expr, $label:literal) => {
        #[derive(Debug, Clone, Default, Serialize, Deserialize)]
        pub struct $args {}

        impl Task for $args {
            const NAME: &'static str = $name;
        }

        pub struct $handler;

        #[async_trait]
        impl Handler<$args> for $handler {
            async fn handle(&self, _args: $args) -> TaskResult {
                info!(task = $label, "periodic task running");
                Ok(json!({ "status": "success", "task": $label }))
            }
        }
    };
}

periodic_task!(SendWeeklySummary, SendWeeklySummaryTask, SEND_WEEKLY_SUMMARY, "weekly summary");
periodic_task!(SendDailyReminders, SendDailyRemindersTask, SEND_DAILY_REMINDERS, "daily reminders");
periodic_task!(CheckAllBudgets, CheckAllBudgetsTask, CHECK_ALL_BUDGETS, "budget check");
periodic_task!(
    CleanupOldNotifications,
    CleanupOldNotificationsTask,
    CLEANUP_OLD_NOTIFICATIONS,
    "notification cleanup"
);
periodic_task!(
    SendPaymentReminders,
    SendPaymentRemindersTask,
    SEND_PAYMENT_REMINDERS,
    "payment reminders"
);

// ── registration ────────────────────────────────────────────────────────────

/// Services the finance tasks depend on.
pub struct Services {
    pub mailer: Arc<dyn Mailer>,
    pub push: Arc<dyn PushSender>,
    pub renderer: Arc<dyn ReportRenderer>,
    pub directory: Directory,
    /// Base of the exponential countdown used on delivery errors.
    pub backoff_base: Duration,
}

/// Register every finance task with its retry policy.
pub fn register_all(
    builder: EngineBuilder,
    services: Services,
) -> Result<EngineBuilder, RegistryError> {
    builder
        .register_bound::<SendEmail, _>(
            SendEmailTask {
                mailer: services.mailer,
                backoff_base: services.backoff_base,
            },
            RetryPolicy::new(3).with_default_delay(Duration::from_secs(60)),
        )?
        .register_bound::<SendPush, _>(
            SendPushTask {
                push: services.push,
                backoff_base: services.backoff_base / 2,
            },
            RetryPolicy::new(3).with_default_delay(Duration::from_secs(30)),
        )?
        .register_bound::<SendNotification, _>(
            SendNotificationTask {
                directory: services.directory,
            },
            RetryPolicy::new(2),
        )?
        .register_bound::<GeneratePdfReport, _>(
            GeneratePdfReportTask {
                renderer: services.renderer,
            },
            RetryPolicy::new(2).with_time_limits(
                Some(Duration::from_secs(120)),
                Some(Duration::from_secs(100)),
            ),
        )?
        .register::<SendWeeklySummary, _>(SendWeeklySummaryTask, RetryPolicy::none())?
        .register::<SendDailyReminders, _>(SendDailyRemindersTask, RetryPolicy::none())?
        .register::<CheckAllBudgets, _>(CheckAllBudgetsTask, RetryPolicy::none())?
        .register::<CleanupOldNotifications, _>(CleanupOldNotificationsTask, RetryPolicy::none())?
        .register::<SendPaymentReminders, _>(SendPaymentRemindersTask, RetryPolicy::none())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::{Contact, StubMailer, StubPush, StubRenderer};
    use spindle_core::{Engine, TaskId, TaskState};

    const POLL: Duration = Duration::from_millis(5);
    const DEADLINE: Duration = Duration::from_secs(5);

    fn engine(mail_failures: u32) -> Engine {
        let services = Services {
            mailer: Arc::new(StubMailer::new(mail_failures)),
            push: Arc::new(StubPush),
            renderer: Arc::new(StubRenderer),
            directory: Directory::default().with(
                "u-1",
                Contact {
                    email: Some("ana@example.com".to_string()),
                    push_token: Some("fcm-token-0123456789".to_string()),
                },
            ),
            backoff_base: Duration::from_millis(1),
        };
        register_all(EngineBuilder::new(), services)
            .unwrap()
            .expect_tasks(&ALL_TASKS)
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn email_retries_with_backoff_then_succeeds() {
        let engine = engine(2);
        let handle = engine
            .task::<SendEmail>()
            .unwrap()
            .submit(SendEmail {
                to_email: "ana@example.com".to_string(),
                subject: "Resumen".to_string(),
                html_content: "<p>hola</p>".to_string(),
                text_content: None,
            })
            .await
            .unwrap();

        let state = tokio::time::timeout(DEADLINE, handle.wait(POLL)).await.unwrap();
        assert_eq!(state, TaskState::Success);
        assert_eq!(handle.retries().await, 2);
        assert_eq!(
            handle.result().await,
            Some(json!({ "status": "success", "to": "ana@example.com" }))
        );
        engine.shutdown().await;
    }

    #[tokio::test]
    async fn email_gives_up_after_three_retries() {
        let engine = engine(10);
        let handle = engine
            .submit_by_name(
                SEND_EMAIL,
                json!({ "to_email": "x@example.com", "subject": "s", "html_content": "h" }),
            )
            .await
            .unwrap();

        let state = tokio::time::timeout(DEADLINE, handle.wait(POLL)).await.unwrap();
        assert_eq!(state, TaskState::Failure);
        assert_eq!(handle.retries().await, 3);
        assert!(handle.info().await.unwrap().contains("smtp timeout"));
        engine.shutdown().await;
    }

    #[tokio::test]
    async fn notification_fans_out_per_channel() {
        let engine = engine(0);
        let handle = engine
            .task::<SendNotification>()
            .unwrap()
            .submit(SendNotification {
                user_id: "u-1".to_string(),
                title: "Presupuesto".to_string(),
                message: "Llegaste al 80%".to_string(),
                notification_type: "threshold_alert".to_string(),
                data: None,
                channels: None,
            })
            .await
            .unwrap();
        tokio::time::timeout(DEADLINE, handle.wait(POLL)).await.unwrap();

        let result = handle.result().await.unwrap();
        assert_eq!(result["sent_via"], json!(["push", "email"]));
        for id in result["follow_ups"].as_array().unwrap() {
            let id: TaskId = id.as_str().unwrap().parse().unwrap();
            let state = tokio::time::timeout(DEADLINE, engine.async_result(id).wait(POLL))
                .await
                .unwrap();
            assert_eq!(state, TaskState::Success);
        }
        engine.shutdown().await;
    }

    #[tokio::test]
    async fn notification_for_unknown_user_reports_error() {
        let engine = engine(0);
        let handle = engine
            .submit_by_name(
                SEND_NOTIFICATION,
                json!({ "user_id": "ghost", "title": "t", "message": "m" }),
            )
            .await
            .unwrap();
        tokio::time::timeout(DEADLINE, handle.wait(POLL)).await.unwrap();
        assert_eq!(
            handle.result().await,
            Some(json!({ "status": "error", "message": "User not found" }))
        );
        engine.shutdown().await;
    }

    #[tokio::test]
    async fn report_with_bad_dates_fails_without_retry() {
        let engine = engine(0);
        let handle = engine
            .task::<GeneratePdfReport>()
            .unwrap()
            .submit(GeneratePdfReport {
                user_id: "u-1".to_string(),
                report_type: "weekly".to_string(),
                start_date_str: "2026-13-01".to_string(),
                end_date_str: "2026-01-07".to_string(),
                send_email: false,
                user_email: None,
            })
            .await
            .unwrap();

        let state = tokio::time::timeout(DEADLINE, handle.wait(POLL)).await.unwrap();
        assert_eq!(state, TaskState::Failure);
        assert_eq!(handle.retries().await, 0);
        assert!(handle.info().await.unwrap().starts_with("invalid start_date_str"));
        engine.shutdown().await;
    }

    #[tokio::test]
    async fn report_records_filename_and_email_follow_up() {
        let engine = engine(0);
        let handle = engine
            .task::<GeneratePdfReport>()
            .unwrap()
            .submit(GeneratePdfReport {
                user_id: "u-1".to_string(),
                report_type: "monthly".to_string(),
                start_date_str: "2026-01-01".to_string(),
                end_date_str: "2026-01-31".to_string(),
                send_email: true,
                user_email: Some("ana@example.com".to_string()),
            })
            .await
            .unwrap();
        tokio::time::timeout(DEADLINE, handle.wait(POLL)).await.unwrap();

        let result = handle.result().await.unwrap();
        assert_eq!(
            result["filename"],
            "reports/u-1/reporte_monthly_2026-01-01_2026-01-31.pdf"
        );
        assert!(result["email_task"].is_string());
        engine.shutdown().await;
    }
}

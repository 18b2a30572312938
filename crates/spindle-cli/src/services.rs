//! Delivery services used by the finance tasks.
//!
//! Only stub implementations live here: they log instead of talking to an
//! SMTP server, a push gateway or a PDF renderer.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};

use async_trait::async_trait;
use tracing::info;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DeliveryError {
    #[error("service unavailable: {0}")]
    Unavailable(String),

    #[error("rejected: {0}")]
    Rejected(String),
}

/// Sends email. `Ok(false)` means the provider declined without an error.
#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send_email(
        &self,
        to: &str,
        subject: &str,
        html: &str,
        text: Option<&str>,
    ) -> Result<bool, DeliveryError>;
}

/// Sends push notifications to a device token.
#[async_trait]
pub trait PushSender: Send + Sync {
    async fn send_push(
        &self,
        token: &str,
        title: &str,
        body: &str,
        data: Option<&serde_json::Value>,
    ) -> Result<bool, DeliveryError>;
}

/// Renders a PDF report and returns its bytes.
#[async_trait]
pub trait ReportRenderer: Send + Sync {
    async fn render(
        &self,
        user_id: &str,
        report_type: &str,
        start: chrono::NaiveDate,
        end: chrono::NaiveDate,
    ) -> Result<Vec<u8>, DeliveryError>;
}

/// Mailer that fails a fixed number of times before it starts sending.
pub struct StubMailer {
    failures_left: AtomicU32,
}

impl StubMailer {
    pub fn new(failures: u32) -> Self {
        Self {
            failures_left: AtomicU32::new(failures),
        }
    }
}

#[async_trait]
impl Mailer for StubMailer {
    async fn send_email(
        &self,
        to: &str,
        subject: &str,
        _html: &str,
        _text: Option<&str>,
    ) -> Result<bool, DeliveryError> {
        let left = self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
        if let Ok(left) = left {
            return Err(DeliveryError::Unavailable(format!(
                "smtp timeout (failures left={})",
                left - 1
            )));
        }
        info!(to, subject, "email sent");
        Ok(true)
    }
}

pub struct StubPush;

#[async_trait]
impl PushSender for StubPush {
    async fn send_push(
        &self,
        token: &str,
        title: &str,
        _body: &str,
        _data: Option<&serde_json::Value>,
    ) -> Result<bool, DeliveryError> {
        if token.is_empty() {
            return Err(DeliveryError::Rejected("empty device token".to_string()));
        }
        let prefix: String = token.chars().take(10).collect();
        info!(token = %prefix, title, "push sent");
        Ok(true)
    }
}

pub struct StubRenderer;

#[async_trait]
impl ReportRenderer for StubRenderer {
    async fn render(
        &self,
        user_id: &str,
        report_type: &str,
        start: chrono::NaiveDate,
        end: chrono::NaiveDate,
    ) -> Result<Vec<u8>, DeliveryError> {
        let body = format!("%PDF-1.4\n% {report_type} report for {user_id}: {start} - {end}\n");
        Ok(body.into_bytes())
    }
}

/// Where a user can be reached.
#[derive(Debug, Clone, Default)]
pub struct Contact {
    pub email: Option<String>,
    pub push_token: Option<String>,
}

/// In-memory user directory.
#[derive(Debug, Clone, Default)]
pub struct Directory {
    contacts: HashMap<String, Contact>,
}

impl Directory {
    pub fn with(mut self, user_id: &str, contact: Contact) -> Self {
        self.contacts.insert(user_id.to_string(), contact);
        self
    }

    pub fn get(&self, user_id: &str) -> Option<&Contact> {
        self.contacts.get(user_id)
    }
}

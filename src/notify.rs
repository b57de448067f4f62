//! Outbound email notifications.
//!
//! Delivery is best effort: callers never see a failure, the dispatcher logs it.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::future::join_all;
use reqwest::Client;
use rust_decimal::Decimal;
use serde_json::json;
use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::{info, warn};

const SENDGRID_SEND_URL: &str = "https://api.sendgrid.com/v3/mail/send";

#[derive(Debug, Clone, PartialEq)]
pub enum Notification {
    SignatureRequest {
        document_title: String,
        sign_url: String,
        sender_name: String,
    },
    CommissionPaid {
        amount: Decimal,
        lead_name: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Email {
    pub to: String,
    pub subject: String,
    pub text: String,
    pub html: String,
}

impl Notification {
    pub fn kind(&self) -> &'static str {
        match self {
            Notification::SignatureRequest { .. } => "signature_request",
            Notification::CommissionPaid { .. } => "commission_paid",
        }
    }

    pub fn render(&self, to: &str) -> Email {
        match self {
            Notification::SignatureRequest {
                document_title,
                sign_url,
                sender_name,
            } => Email {
                to: to.to_string(),
                subject: format!("Signature Request: {document_title}"),
                text: format!(
                    "{sender_name} has requested your signature on \"{document_title}\". Please visit: {sign_url}"
                ),
                html: format!(
                    concat!(
                        "<div style=\"font-family: Arial, sans-serif; max-width: 600px; margin: 0 auto;\">",
                        "<h2 style=\"color: #333;\">Signature Request</h2>",
                        "<p>Hello,</p>",
                        "<p><strong>{sender}</strong> has requested your signature on the following document:</p>",
                        "<h3 style=\"color: #0066cc;\">{title}</h3>",
                        "<p><a href=\"{url}\" style=\"background-color: #0066cc; color: white; padding: 12px 24px; ",
                        "text-decoration: none; border-radius: 4px; display: inline-block;\">Sign Document</a></p>",
                        "<p style=\"color: #666; font-size: 12px; margin-top: 30px;\">",
                        "If you have any questions, please contact the sender directly.</p>",
                        "</div>"
                    ),
                    sender = escape_html(sender_name),
                    title = escape_html(document_title),
                    url = escape_html(sign_url),
                ),
            },
            Notification::CommissionPaid { amount, lead_name } => {
                let amount = format!("{:.2}", amount.round_dp(2));
                Email {
                    to: to.to_string(),
                    subject: format!("Commission Earned: ${amount}"),
                    text: format!(
                        "Congratulations! You've earned a commission of ${amount} for the lead \"{lead_name}\"."
                    ),
                    html: format!(
                        concat!(
                            "<div style=\"font-family: Arial, sans-serif; max-width: 600px; margin: 0 auto;\">",
                            "<h2 style=\"color: #28a745;\">Congratulations!</h2>",
                            "<p>You've earned a commission for your referral:</p>",
                            "<div style=\"background-color: #f8f9fa; padding: 20px; border-radius: 4px; margin: 20px 0;\">",
                            "<h3 style=\"color: #333; margin: 0 0 10px 0;\">Lead: {lead}</h3>",
                            "<p style=\"font-size: 24px; color: #28a745; margin: 0;\"><strong>${amount}</strong></p>",
                            "</div>",
                            "<p>Thank you for your continued partnership!</p>",
                            "</div>"
                        ),
                        lead = escape_html(lead_name),
                        amount = amount,
                    ),
                }
            }
        }
    }
}

fn escape_html(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for ch in raw.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(ch),
        }
    }
    out
}

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("notification timed out after {0:?}")]
    Timeout(Duration),
    #[error("delivery failed: {0}")]
    Delivery(String),
}

#[async_trait]
pub trait Notifier: Send + Sync + 'static {
    async fn send(&self, email: &Email) -> Result<(), NotifyError>;
}

pub struct SendGridNotifier {
    client: Client,
    api_key: String,
    from_email: String,
}

impl SendGridNotifier {
    pub fn new(api_key: impl Into<String>, from_email: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            api_key: api_key.into(),
            from_email: from_email.into(),
        }
    }
}

#[async_trait]
impl Notifier for SendGridNotifier {
    async fn send(&self, email: &Email) -> Result<(), NotifyError> {
        let body = json!({
            "personalizations": [{ "to": [{ "email": email.to }] }],
            "from": { "email": self.from_email },
            "subject": email.subject,
            "content": [
                { "type": "text/plain", "value": email.text },
                { "type": "text/html", "value": email.html }
            ]
        });

        let response = self
            .client
            .post(SENDGRID_SEND_URL)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|err| NotifyError::Delivery(err.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(NotifyError::Delivery(format!("sendgrid returned {status}: {detail}")));
        }
        Ok(())
    }
}

/// Used when no email provider is configured.
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn send(&self, email: &Email) -> Result<(), NotifyError> {
        info!(to = %email.to, subject = %email.subject, "email delivery disabled; message dropped");
        Ok(())
    }
}

#[derive(Clone)]
pub struct Dispatcher {
    notifier: Arc<dyn Notifier>,
    timeout: Duration,
}

impl Dispatcher {
    pub fn new(notifier: Arc<dyn Notifier>, timeout: Duration) -> Self {
        Self { notifier, timeout }
    }

    /// Sends one notification, bounded by the timeout. Failures are logged and returned.
    pub async fn deliver(&self, to: &str, notification: &Notification) -> Result<(), NotifyError> {
        let email = notification.render(to);
        let result = match tokio::time::timeout(self.timeout, self.notifier.send(&email)).await {
            Ok(result) => result,
            Err(_) => Err(NotifyError::Timeout(self.timeout)),
        };
        match &result {
            Ok(()) => info!(to = %to, kind = notification.kind(), "notification sent"),
            Err(err) => {
                warn!(to = %to, kind = notification.kind(), error = %err, "notification failed")
            }
        }
        result
    }

    /// Sends every notification concurrently and waits for all of them.
    /// Returns how many failed.
    pub async fn deliver_all(&self, batch: Vec<(String, Notification)>) -> usize {
        let results = join_all(
            batch
                .iter()
                .map(|(to, notification)| self.deliver(to, notification)),
        )
        .await;
        results.iter().filter(|result| result.is_err()).count()
    }

    /// Fire and forget.
    pub fn spawn(&self, to: String, notification: Notification) -> JoinHandle<()> {
        let dispatcher = self.clone();
        tokio::spawn(async move {
            let _ = dispatcher.deliver(&to, &notification).await;
        })
    }
}

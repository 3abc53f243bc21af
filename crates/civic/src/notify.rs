//! New-issue notifications.
//!
//! Creating an issue emits an [`IssueReported`] event into a bounded queue.
//! A worker task renders each event into an [`Email`] and hands it to a
//! [`Mailer`]. Emission never blocks the request path and delivery failures
//! are logged, never retried.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use lettre::message::header::ContentType;
use lettre::message::Mailbox;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::{MailTransport, NotifyConfig};
use crate::domain::{iso_millis, Issue, Status};

/// Emitted once per created issue.
///
/// `title` and `description` are the submitted values, empty when absent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IssueReported {
    pub issue_id: String,
    pub user_name: String,
    pub title: String,
    pub description: String,
    pub location: String,
    pub status: Status,
    pub created_at: DateTime<Utc>,
}

impl IssueReported {
    /// Event for a stored issue, with the title and description as the reporter sent them.
    pub fn new(issue: &Issue, title: String, description: String) -> Self {
        Self {
            issue_id: issue.id.clone(),
            user_name: issue.user_name.clone(),
            title,
            description,
            location: issue.location.clone(),
            status: issue.status,
            created_at: issue.created_at,
        }
    }
}

/// A rendered plain-text message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Email {
    pub from: String,
    pub to: String,
    pub subject: String,
    pub body: String,
}

/// Render the notification for a reported issue.
pub fn render_email(event: &IssueReported, from: &str, to: &str) -> Email {
    let title = if event.title.is_empty() {
        "Untitled"
    } else {
        event.title.as_str()
    };

    Email {
        from: from.to_string(),
        to: to.to_string(),
        subject: format!("New civic issue reported by {}: {}", event.user_name, title),
        body: format!(
            "A new issue was reported.\n\nTitle: {}\nDescription: {}\nLocation: {}\nStatus: {}\nDate: {}\nID: {}",
            title,
            event.description,
            event.location,
            event.status,
            iso_millis::format(&event.created_at),
            event.issue_id
        ),
    }
}

/// Outbound mail delivery.
#[async_trait]
pub trait Mailer: Send + Sync + 'static {
    async fn send(&self, email: &Email) -> Result<()>;
}

/// Delivers through an SMTP relay.
pub struct SmtpMailer {
    transport: AsyncSmtpTransport<Tokio1Executor>,
}

impl SmtpMailer {
    /// Build a relay transport: implicit TLS on port 465, STARTTLS otherwise.
    pub fn from_config(config: &NotifyConfig) -> Result<Self> {
        let relay = if config.smtp_port == 465 {
            AsyncSmtpTransport::<Tokio1Executor>::relay(&config.smtp_host)
        } else {
            AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&config.smtp_host)
        };
        let builder = relay
            .with_context(|| format!("Invalid SMTP relay host {}", config.smtp_host))?
            .port(config.smtp_port);

        let builder = match config.credentials() {
            Some((user, pass)) => {
                builder.credentials(Credentials::new(user.to_string(), pass.to_string()))
            }
            None => builder,
        };

        Ok(Self {
            transport: builder.build(),
        })
    }
}

#[async_trait]
impl Mailer for SmtpMailer {
    async fn send(&self, email: &Email) -> Result<()> {
        let from: Mailbox = email
            .from
            .parse()
            .with_context(|| format!("Invalid sender address {}", email.from))?;
        let to: Mailbox = email
            .to
            .parse()
            .with_context(|| format!("Invalid recipient address {}", email.to))?;

        let message = Message::builder()
            .from(from)
            .to(to)
            .subject(email.subject.clone())
            .header(ContentType::TEXT_PLAIN)
            .body(email.body.clone())
            .context("Failed to build notification message")?;

        self.transport
            .send(message)
            .await
            .context("SMTP delivery failed")?;
        Ok(())
    }
}

/// Writes messages to the log instead of sending them.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogMailer;

#[async_trait]
impl Mailer for LogMailer {
    async fn send(&self, email: &Email) -> Result<()> {
        info!(to = %email.to, subject = %email.subject, "Notification (log transport)\n{}", email.body);
        Ok(())
    }
}

/// Sending half of the notification queue.
///
/// Cloning shares the same queue. The worker exits once every clone is dropped
/// and the queue is drained.
#[derive(Debug, Clone)]
pub struct NotificationQueue {
    tx: mpsc::Sender<IssueReported>,
}

impl NotificationQueue {
    /// Spawn the delivery worker.
    pub fn start<M: Mailer>(
        mailer: M,
        from: String,
        to: String,
        capacity: usize,
    ) -> (Self, JoinHandle<()>) {
        let (tx, mut rx) = mpsc::channel::<IssueReported>(capacity.max(1));

        let worker = tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                let email = render_email(&event, &from, &to);
                match mailer.send(&email).await {
                    Ok(()) => debug!(issue_id = %event.issue_id, "Notification sent"),
                    Err(e) => warn!(issue_id = %event.issue_id, "Notification failed: {:#}", e),
                }
            }
            debug!("Notification queue closed");
        });

        (Self { tx }, worker)
    }

    /// Start the queue described by `config`.
    ///
    /// Returns `Ok(None)` when no recipient is configured.
    pub fn from_config(config: &NotifyConfig) -> Result<Option<(Self, JoinHandle<()>)>> {
        let Some(to) = config.recipient() else {
            info!("No notification recipient configured, notifications disabled");
            return Ok(None);
        };
        let from = config.sender().to_string();
        let to = to.to_string();

        let started = match config.transport {
            MailTransport::Smtp if config.smtp_user.is_none() => {
                info!("SMTP user not configured, notifications via log transport");
                Self::start(LogMailer, from, to, config.queue_capacity)
            }
            MailTransport::Smtp => {
                info!(host = %config.smtp_host, port = config.smtp_port, "Notifications via SMTP");
                Self::start(SmtpMailer::from_config(config)?, from, to, config.queue_capacity)
            }
            MailTransport::Log => {
                info!("Notifications via log transport");
                Self::start(LogMailer, from, to, config.queue_capacity)
            }
        };
        Ok(Some(started))
    }

    /// Queue an event without waiting.
    ///
    /// Returns `false` when the event was dropped (queue full or worker gone).
    pub fn emit(&self, event: IssueReported) -> bool {
        match self.tx.try_send(event) {
            Ok(()) => true,
            Err(TrySendError::Full(event)) => {
                warn!(issue_id = %event.issue_id, "Notification queue full, dropping event");
                false
            }
            Err(TrySendError::Closed(event)) => {
                warn!(issue_id = %event.issue_id, "Notification worker stopped, dropping event");
                false
            }
        }
    }
}

use super::{DeliveryChannel, DeliveryResult, ProviderError};
use crate::config::SmtpConfig;
use crate::models::{Channel, Notification};
use async_trait::async_trait;
use lettre::{
    message::{header::ContentType, Mailbox, MultiPart, SinglePart},
    transport::smtp::authentication::Credentials,
    AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor,
};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Email rendering of a notification payload.
#[derive(Debug, Clone, PartialEq)]
pub struct EmailContent {
    pub to: Option<String>,
    pub subject: String,
    pub body_text: Option<String>,
    pub body_html: Option<String>,
}

impl EmailContent {
    /// Reads `email`, `subject`/`title`, `body`/`message` and `html` from the
    /// payload. A notification with no body falls back to its subject.
    pub fn from_notification(notification: &Notification) -> Self {
        let subject = notification
            .payload_str("subject")
            .or_else(|| notification.payload_str("title"))
            .map(str::to_string)
            .unwrap_or_else(|| format!("New {}", notification.notification_type));

        let body_html = notification.payload_str("html").map(str::to_string);
        let mut body_text = notification
            .payload_str("body")
            .or_else(|| notification.payload_str("message"))
            .map(str::to_string);

        if body_text.is_none() && body_html.is_none() {
            body_text = Some(subject.clone());
        }

        Self {
            to: notification.payload_str("email").map(str::to_string),
            subject,
            body_text,
            body_html,
        }
    }
}

pub struct SmtpEmailChannel {
    config: SmtpConfig,
    transport: AsyncSmtpTransport<Tokio1Executor>,
}

impl SmtpEmailChannel {
    pub fn new(config: SmtpConfig) -> Result<Self, ProviderError> {
        let creds = Credentials::new(config.user.clone(), config.password.clone());

        let transport = AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&config.host)
            .map_err(|e| {
                ProviderError::Configuration(format!("Failed to create SMTP relay: {}", e))
            })?
            .port(config.port)
            .credentials(creds)
            .timeout(Some(Duration::from_secs(config.timeout_secs)))
            .build();

        Ok(Self { config, transport })
    }

    fn build_message(
        &self,
        notification: &Notification,
        content: &EmailContent,
    ) -> Result<Message, ProviderError> {
        let to = content.to.as_deref().ok_or_else(|| {
            ProviderError::InvalidRecipient("payload has no email address".to_string())
        })?;

        let from_mailbox: Mailbox = format!("{} <{}>", self.config.from_name, self.config.from_email)
            .parse()
            .map_err(|e| ProviderError::Configuration(format!("Invalid from address: {}", e)))?;

        let to_mailbox: Mailbox = to
            .parse()
            .map_err(|e| ProviderError::InvalidRecipient(format!("{}: {}", to, e)))?;

        // The notification id doubles as the dedupe key on the provider side.
        let domain = self
            .config
            .from_email
            .split('@')
            .nth(1)
            .unwrap_or("localhost");

        let builder = Message::builder()
            .from(from_mailbox)
            .to(to_mailbox)
            .subject(&content.subject)
            .message_id(Some(format!("<{}@{}>", notification.id, domain)));

        let message = match (&content.body_text, &content.body_html) {
            (Some(text), Some(html)) => builder.multipart(
                MultiPart::alternative()
                    .singlepart(
                        SinglePart::builder()
                            .header(ContentType::TEXT_PLAIN)
                            .body(text.clone()),
                    )
                    .singlepart(
                        SinglePart::builder()
                            .header(ContentType::TEXT_HTML)
                            .body(html.clone()),
                    ),
            ),
            (None, Some(html)) => builder.header(ContentType::TEXT_HTML).body(html.clone()),
            (text, None) => builder
                .header(ContentType::TEXT_PLAIN)
                .body(text.clone().unwrap_or_else(|| content.subject.clone())),
        };

        message.map_err(|e| ProviderError::Rejected(format!("Failed to build message: {}", e)))
    }

    async fn deliver(&self, notification: &Notification) -> Result<Option<String>, ProviderError> {
        let content = EmailContent::from_notification(notification);
        let message = self.build_message(notification, &content)?;

        let response = self.transport.send(message).await.map_err(|e| {
            if e.is_permanent() {
                ProviderError::Rejected(format!("SMTP rejected message: {}", e))
            } else if e.is_timeout() {
                ProviderError::Timeout(format!("SMTP timed out: {}", e))
            } else {
                ProviderError::Connection(format!("Failed to send email: {}", e))
            }
        })?;

        tracing::info!(
            notification_id = %notification.id,
            subject = %content.subject,
            "Email sent successfully"
        );

        let message_id = response.message().next().map(|s| s.to_string());
        Ok(message_id)
    }
}

#[async_trait]
impl DeliveryChannel for SmtpEmailChannel {
    fn channel(&self) -> Channel {
        Channel::Email
    }

    async fn send(&self, notification: &Notification) -> DeliveryResult {
        self.deliver(notification).await.into()
    }
}

/// Used when SMTP is disabled; logs instead of sending.
#[derive(Default)]
pub struct MockEmailChannel {
    send_count: AtomicU64,
}

impl MockEmailChannel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn send_count(&self) -> u64 {
        self.send_count.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DeliveryChannel for MockEmailChannel {
    fn channel(&self) -> Channel {
        Channel::Email
    }

    async fn send(&self, notification: &Notification) -> DeliveryResult {
        let count = self.send_count.fetch_add(1, Ordering::SeqCst) + 1;
        let content = EmailContent::from_notification(notification);

        tracing::info!(
            notification_id = %notification.id,
            to = ?content.to,
            subject = %content.subject,
            "[MOCK] Email would be sent"
        );

        DeliveryResult::success(Some(format!("mock-email-{}", count)))
    }
}

use std::sync::Arc;

use askama::Template;
use async_trait::async_trait;
use lettre::message::header::ContentType;
use lettre::message::{Attachment, Mailbox, MultiPart};
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use secrecy::ExposeSecret;
use serde::Serialize;
use thiserror::Error;
use time::OffsetDateTime;
use tracing::{info, warn};

use super::renderer::{ArtifactLocation, ArtifactRenderer};
use crate::config::MailConfig;

/// What the recipient is told about the certificate.
#[derive(Debug, Clone, Serialize)]
pub struct NotificationMetadata {
    pub student_name: String,
    pub certificate_number: String,
    pub program_label: String,
    pub verification_url: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryReceipt {
    pub recipient: String,
    pub delivered_at: OffsetDateTime,
}

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("no recipient address")]
    MissingRecipient,

    #[error("invalid address {0}")]
    InvalidAddress(String),

    #[error("mail transport not configured")]
    NotConfigured,

    #[error("failed to build message: {0}")]
    Message(String),

    #[error("delivery failed: {0}")]
    Delivery(String),
}

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(
        &self,
        recipient: &str,
        artifact: &ArtifactLocation,
        metadata: &NotificationMetadata,
    ) -> Result<DeliveryReceipt, NotifyError>;
}

/// Fallback when no SMTP relay is configured. Logs the notification and
/// reports it as not delivered.
#[derive(Debug, Clone, Default)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(
        &self,
        recipient: &str,
        artifact: &ArtifactLocation,
        metadata: &NotificationMetadata,
    ) -> Result<DeliveryReceipt, NotifyError> {
        if recipient.trim().is_empty() {
            return Err(NotifyError::MissingRecipient);
        }

        info!(
            certificate_number = %metadata.certificate_number,
            artifact = %artifact.url,
            "Certificate notification not sent (no mail transport configured)"
        );
        Err(NotifyError::NotConfigured)
    }
}

#[derive(Template)]
#[template(path = "certificate_email.html")]
struct CertificateEmail<'a> {
    app_name: &'a str,
    metadata: &'a NotificationMetadata,
    artifact_url: &'a str,
}

fn mailbox(name: Option<&str>, address: &str) -> Result<Mailbox, NotifyError> {
    let address = address
        .trim()
        .parse()
        .map_err(|_| NotifyError::InvalidAddress(address.to_string()))?;
    Ok(Mailbox::new(name.map(str::to_string), address))
}

/// Certificate mail: plain and HTML bodies, plus the artifact when its
/// bytes are available.
pub fn build_message(
    from: &Mailbox,
    recipient: &str,
    app_name: &str,
    artifact: &ArtifactLocation,
    metadata: &NotificationMetadata,
    attachment: Option<Vec<u8>>,
) -> Result<Message, NotifyError> {
    let to = mailbox(Some(&metadata.student_name), recipient)?;

    let html = CertificateEmail {
        app_name,
        metadata,
        artifact_url: &artifact.url,
    }
    .render()
    .map_err(|e| NotifyError::Message(e.to_string()))?;
    let plain = format!(
        "Dear {},\n\nYour {} certificate {} has been issued.\n\nDownload: {}\nVerify: {}\n\n{}",
        metadata.student_name,
        metadata.program_label,
        metadata.certificate_number,
        artifact.url,
        metadata.verification_url,
        app_name
    );

    let mut body = MultiPart::mixed().multipart(MultiPart::alternative_plain_html(plain, html));
    if let Some(bytes) = attachment {
        body = body.singlepart(
            Attachment::new(artifact.file_name.clone()).body(bytes, ContentType::TEXT_HTML),
        );
    }

    Message::builder()
        .from(from.clone())
        .to(to)
        .subject(format!(
            "Your {} certificate ({})",
            metadata.program_label, metadata.certificate_number
        ))
        .multipart(body)
        .map_err(|e| NotifyError::Message(e.to_string()))
}

/// Sends certificate mail through an SMTP relay with STARTTLS.
pub struct SmtpNotifier {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
    app_name: String,
    artifacts: Option<Arc<dyn ArtifactRenderer>>,
}

impl SmtpNotifier {
    /// `artifacts` supplies the attachment; mail goes out without one when
    /// it is `None` or the file cannot be read.
    pub fn new(
        config: &MailConfig,
        app_name: impl Into<String>,
        artifacts: Option<Arc<dyn ArtifactRenderer>>,
    ) -> Result<Self, NotifyError> {
        let host = config.smtp_host.as_deref().ok_or(NotifyError::NotConfigured)?;
        let from_address = config
            .from_address
            .as_deref()
            .ok_or(NotifyError::NotConfigured)?;

        let mut builder = AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(host)
            .map_err(|e| NotifyError::Delivery(e.to_string()))?
            .port(config.smtp_port);
        if let (Some(username), Some(password)) = (&config.username, &config.password) {
            builder = builder.credentials(Credentials::new(
                username.clone(),
                password.expose_secret().clone(),
            ));
        }

        Ok(Self {
            transport: builder.build(),
            from: mailbox(Some(&config.from_name), from_address)?,
            app_name: app_name.into(),
            artifacts,
        })
    }

    async fn attachment(&self, artifact: &ArtifactLocation) -> Option<Vec<u8>> {
        let renderer = self.artifacts.as_ref()?;
        match renderer.read_artifact(&artifact.file_name).await {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(file = %artifact.file_name, error = %e, "Sending certificate mail without attachment");
                None
            }
        }
    }
}

#[async_trait]
impl Notifier for SmtpNotifier {
    async fn notify(
        &self,
        recipient: &str,
        artifact: &ArtifactLocation,
        metadata: &NotificationMetadata,
    ) -> Result<DeliveryReceipt, NotifyError> {
        let recipient = recipient.trim();
        if recipient.is_empty() {
            return Err(NotifyError::MissingRecipient);
        }

        let attachment = self.attachment(artifact).await;
        let message = build_message(
            &self.from,
            recipient,
            &self.app_name,
            artifact,
            metadata,
            attachment,
        )?;

        self.transport
            .send(message)
            .await
            .map_err(|e| NotifyError::Delivery(e.to_string()))?;

        info!(certificate_number = %metadata.certificate_number, "Certificate mail sent");
        Ok(DeliveryReceipt {
            recipient: recipient.to_string(),
            delivered_at: OffsetDateTime::now_utc(),
        })
    }
}

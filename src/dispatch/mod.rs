//! Outbound email dispatch.
//!
//! The orchestrator only knows the `OrderDispatcher` trait; production uses
//! SMTP via lettre, tests use in-memory doubles.

use async_trait::async_trait;
use lettre::message::header::ContentType;
use lettre::message::{Attachment, MultiPart, SinglePart};
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use secrecy::ExposeSecret;
use tracing::info;

use crate::config::SmtpConfig;
use crate::error::DispatchError;

/// A fully prepared outbound order email.
#[derive(Debug, Clone)]
pub struct OutboundOrder {
    pub recipient: String,
    pub subject: String,
    pub body_text: String,
    /// Rendered order form, attached as a plain-text document.
    pub attachment: Option<OrderAttachment>,
}

#[derive(Debug, Clone)]
pub struct OrderAttachment {
    pub filename: String,
    pub content: Vec<u8>,
}

/// Sends prepared order emails.
#[async_trait]
pub trait OrderDispatcher: Send + Sync {
    async fn dispatch(&self, outbound: &OutboundOrder) -> Result<(), DispatchError>;
}

/// SMTP dispatcher over a relay with STARTTLS.
pub struct SmtpDispatcher {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from_address: String,
}

impl SmtpDispatcher {
    pub fn new(config: &SmtpConfig) -> Result<Self, DispatchError> {
        let creds = Credentials::new(
            config.username.clone(),
            config.password.expose_secret().to_string(),
        );

        let transport = AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&config.host)
            .map_err(|e| DispatchError::Smtp(format!("SMTP relay error: {e}")))?
            .port(config.port)
            .credentials(creds)
            .build();

        Ok(Self {
            transport,
            from_address: config.from_address.clone(),
        })
    }
}

#[async_trait]
impl OrderDispatcher for SmtpDispatcher {
    async fn dispatch(&self, outbound: &OutboundOrder) -> Result<(), DispatchError> {
        let from = self
            .from_address
            .parse()
            .map_err(|e| DispatchError::InvalidRecipient {
                address: self.from_address.clone(),
                reason: format!("invalid from address: {e}"),
            })?;
        let to = outbound
            .recipient
            .parse()
            .map_err(|e| DispatchError::InvalidRecipient {
                address: outbound.recipient.clone(),
                reason: format!("{e}"),
            })?;

        let builder = Message::builder()
            .from(from)
            .to(to)
            .subject(&outbound.subject);

        let email = match &outbound.attachment {
            Some(attachment) => builder
                .multipart(
                    MultiPart::mixed()
                        .singlepart(SinglePart::plain(outbound.body_text.clone()))
                        .singlepart(
                            Attachment::new(attachment.filename.clone()).body(
                                attachment.content.clone(),
                                ContentType::TEXT_PLAIN,
                            ),
                        ),
                )
                .map_err(|e| DispatchError::Build(format!("{e}")))?,
            None => builder
                .body(outbound.body_text.clone())
                .map_err(|e| DispatchError::Build(format!("{e}")))?,
        };

        self.transport
            .send(email)
            .await
            .map_err(|e| DispatchError::Smtp(format!("{e}")))?;

        info!(recipient = %outbound.recipient, subject = %outbound.subject, "Order email sent");
        Ok(())
    }
}

//! Outbound email transport for review-result notifications.

use crate::config::EmailConfig;
use anyhow::{Context, Result};
use aws_config::BehaviorVersion;
use aws_sdk_sesv2::types::{Body, Content, Destination, EmailContent, Message};
use aws_sdk_sesv2::Client as SesClient;
use std::sync::Mutex;
use tracing::{debug, info, instrument};

/// Narrow contract over the outbound email transport
#[async_trait::async_trait]
pub trait EmailTransport: Send + Sync {
    async fn send(&self, from: &str, to: &str, subject: &str, html_body: &str) -> Result<()>;
}

/// Email transport backed by SES
pub struct SesTransport {
    client: SesClient,
}

impl SesTransport {
    /// Create an SES-backed transport
    pub async fn new(config: &EmailConfig) -> Result<Self> {
        let aws_config = aws_config::defaults(BehaviorVersion::latest())
            .region(aws_config::Region::new(config.region.clone()))
            .load()
            .await;

        let client = SesClient::new(&aws_config);

        info!(region = %config.region, "SES email transport initialized");

        Ok(Self { client })
    }
}

#[async_trait::async_trait]
impl EmailTransport for SesTransport {
    #[instrument(skip(self, html_body), fields(to = %to, subject = %subject))]
    async fn send(&self, from: &str, to: &str, subject: &str, html_body: &str) -> Result<()> {
        let subject = Content::builder()
            .data(subject)
            .charset("UTF-8")
            .build()
            .context("Invalid email subject")?;
        let html = Content::builder()
            .data(html_body)
            .charset("UTF-8")
            .build()
            .context("Invalid email body")?;

        let message = Message::builder()
            .subject(subject)
            .body(Body::builder().html(html).build())
            .build();
        let content = EmailContent::builder().simple(message).build();
        let destination = Destination::builder().to_addresses(to).build();

        self.client
            .send_email()
            .from_email_address(from)
            .destination(destination)
            .content(content)
            .send()
            .await
            .context("Failed to send email via SES")?;

        debug!("Email dispatched");
        Ok(())
    }
}

/// A sent email captured by [`InMemoryTransport`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentEmail {
    pub from: String,
    pub to: String,
    pub subject: String,
    pub html_body: String,
}

/// In-memory transport for tests and local runs; records every send
#[derive(Default)]
pub struct InMemoryTransport {
    sent: Mutex<Vec<SentEmail>>,
}

impl InMemoryTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Emails sent so far, in order
    pub fn sent(&self) -> Vec<SentEmail> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait::async_trait]
impl EmailTransport for InMemoryTransport {
    async fn send(&self, from: &str, to: &str, subject: &str, html_body: &str) -> Result<()> {
        info!(to = %to, subject = %subject, "Recording email send");
        self.sent.lock().unwrap().push(SentEmail {
            from: from.to_string(),
            to: to.to_string(),
            subject: subject.to_string(),
            html_body: html_body.to_string(),
        });
        Ok(())
    }
}

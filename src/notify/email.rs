use std::time::Duration;

use async_trait::async_trait;
use lettre::message::{header, Mailbox, Message};
use lettre::transport::smtp::{authentication::Credentials, AsyncSmtpTransport};
use lettre::{Address, AsyncTransport, Tokio1Executor};

use super::{render, MailError, Mailer};
use crate::model::{Candidate, Quote, SmtpConfig};
use crate::security::CredentialCipher;

const DEFAULT_SENDER_NAME: &str = "行业新闻机器人";

/// Mailer over SMTP. Implicit TLS when the account says `use_tls`, STARTTLS otherwise.
pub struct SmtpMailer {
    cipher: CredentialCipher,
    timeout: Duration,
}

impl SmtpMailer {
    pub fn new(cipher: CredentialCipher) -> Self {
        Self {
            cipher,
            timeout: Duration::from_secs(20),
        }
    }

    fn transport(&self, smtp: &SmtpConfig) -> Result<AsyncSmtpTransport<Tokio1Executor>, MailError> {
        let password = self.cipher.decrypt(&smtp.password_encrypted)?;
        let creds = Credentials::new(smtp.username.clone(), password);
        let builder = if smtp.use_tls {
            AsyncSmtpTransport::<Tokio1Executor>::relay(&smtp.host)
        } else {
            AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&smtp.host)
        }
        .map_err(|e| MailError::Transport(e.to_string()))?;
        Ok(builder
            .port(smtp.port)
            .credentials(creds)
            .timeout(Some(self.timeout))
            .build())
    }

    async fn deliver(
        &self,
        smtp: &SmtpConfig,
        recipients: &[String],
        subject: &str,
        html: &str,
    ) -> Result<(), MailError> {
        let from_addr: Address = smtp
            .username
            .parse()
            .map_err(|_| MailError::Address(smtp.username.clone()))?;
        let sender_name = smtp
            .sender_name
            .clone()
            .filter(|n| !n.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_SENDER_NAME.to_string());
        let mut builder = Message::builder()
            .from(Mailbox::new(Some(sender_name), from_addr))
            .subject(subject)
            .header(header::ContentType::TEXT_HTML);

        let mut valid = 0usize;
        for r in recipients {
            match r.trim().parse::<Mailbox>() {
                Ok(mb) => {
                    builder = builder.to(mb);
                    valid += 1;
                }
                Err(_) => tracing::warn!(recipient = %r, "skipping invalid recipient address"),
            }
        }
        if valid == 0 {
            return Err(MailError::NoRecipients);
        }

        let msg = builder
            .body(html.to_string())
            .map_err(|e| MailError::Build(e.to_string()))?;
        self.transport(smtp)?
            .send(msg)
            .await
            .map_err(|e| MailError::Transport(e.to_string()))?;
        Ok(())
    }
}

#[async_trait]
impl Mailer for SmtpMailer {
    async fn send_morning(
        &self,
        smtp: &SmtpConfig,
        recipients: &[String],
        industry: &str,
        items: &[Candidate],
    ) -> Result<String, MailError> {
        let html = render::morning_html(industry, items, smtp.contact());
        if html.is_empty() {
            return Ok(html);
        }
        self.deliver(smtp, recipients, &render::morning_subject(industry), &html)
            .await?;
        tracing::info!(industry, recipients = recipients.len(), items = items.len(), "morning digest sent");
        Ok(html)
    }

    async fn send_evening(
        &self,
        smtp: &SmtpConfig,
        recipients: &[String],
        industry: &str,
        quotes: &[Quote],
    ) -> Result<String, MailError> {
        let html = render::evening_html(industry, quotes, smtp.contact());
        if html.is_empty() {
            return Ok(html);
        }
        self.deliver(smtp, recipients, &render::evening_subject(industry), &html)
            .await?;
        tracing::info!(industry, recipients = recipients.len(), quotes = quotes.len(), "evening digest sent");
        Ok(html)
    }

    async fn send_alert(&self, smtp: &SmtpConfig, subject: &str, html: &str) -> Result<(), MailError> {
        let to = vec![smtp.username.clone()];
        self.deliver(smtp, &to, subject, html).await
    }
}

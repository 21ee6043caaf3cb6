//! Outbound mail: digest delivery and operator alerts.

pub mod email;
pub mod render;

use async_trait::async_trait;
use thiserror::Error;

use crate::model::{Candidate, Quote, SmtpConfig};
use crate::security::CipherError;

pub use email::SmtpMailer;

#[derive(Debug, Error)]
pub enum MailError {
    #[error("cannot decrypt smtp password: {0}")]
    Credentials(#[from] CipherError),
    #[error("invalid address {0:?}")]
    Address(String),
    #[error("no valid recipient addresses")]
    NoRecipients,
    #[error("cannot build message: {0}")]
    Build(String),
    #[error("smtp transport error: {0}")]
    Transport(String),
}

/// Digest sends return the HTML actually delivered, or an empty string when
/// there was nothing to send.
#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send_morning(
        &self,
        smtp: &SmtpConfig,
        recipients: &[String],
        industry: &str,
        items: &[Candidate],
    ) -> Result<String, MailError>;

    async fn send_evening(
        &self,
        smtp: &SmtpConfig,
        recipients: &[String],
        industry: &str,
        quotes: &[Quote],
    ) -> Result<String, MailError>;

    /// Alerts go to the account's own address.
    async fn send_alert(&self, smtp: &SmtpConfig, subject: &str, html: &str) -> Result<(), MailError>;
}

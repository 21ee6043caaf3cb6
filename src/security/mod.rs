//! Outbound URL vetting, credential encryption and log redaction.

pub mod crypto;
pub mod redact;
pub mod ssrf;

pub use crypto::{CipherError, CredentialCipher};
pub use redact::{redact, truncate_chars};
pub use ssrf::{UnsafeTarget, UrlGuard};

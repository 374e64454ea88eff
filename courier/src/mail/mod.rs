//! Outbound mail.
//!
//! The dispatcher talks to a [`MailTransport`]; production wires the SMTP
//! transport, tests wire scripted fakes.

mod smtp;
mod template;

pub use smtp::{SmtpConfig, SmtpMailTransport};
pub use template::{render_template, resolve_content};

use async_trait::async_trait;

use crate::Result;

/// Something that can hand a rendered message to a mail server.
#[async_trait]
pub trait MailTransport: Send + Sync {
    /// Deliver one HTML message, returning a transport-assigned delivery id.
    ///
    /// Implementations own their timeout; an elapsed timeout is an error like
    /// any other failed send.
    async fn send(&self, to: &str, subject: &str, html: &str) -> Result<String>;
}

//! Mailbox collaborator seam.
//!
//! Verification codes arrive in an external mailbox the engine does not
//! manage; it only polls for the newest code through this interface.

use async_trait::async_trait;
use thiserror::Error;

use crate::model::MailboxCredentials;

#[derive(Error, Debug)]
pub enum MailboxError {
    #[error("mailbox access failed: {0}")]
    Access(String),
}

/// External mailbox reader.
#[async_trait]
pub trait Mailbox: Send + Sync {
    /// Newest unconsumed verification code, if one has arrived.
    async fn fetch_verification_code(
        &self,
        credentials: &MailboxCredentials,
    ) -> Result<Option<String>, MailboxError>;
}

//! The outbound transport contract.
//!
//! A transport either accepts a whole prepared batch in one call (`Bulk`,
//! a provider API that fans out server-side) or wants one call per
//! recipient (`Individual`, classic SMTP-style submission). The dispatcher
//! branches on the advertised capability, never on batch size.

use std::time::Duration;

use async_trait::async_trait;
use herald_common::outgoing;
use thiserror::Error;

use crate::source::{NewsletterPayload, PreparedRecipient};

/// How a transport wants to be driven.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Capability {
    /// One call per batch; success or failure is per-batch.
    Bulk,
    /// One call per recipient; success or failure is per-recipient.
    Individual,
}

/// Failure reported by a transport call.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The provider itself pushed back on volume. Distinct from the local
    /// cap: this drives persisted backoff.
    #[error("Provider rate limited (retry after {retry_after:?})")]
    RateLimited { retry_after: Option<Duration> },

    /// Transient failure (connection loss, timeout, 4xx-class response).
    /// The batch is retried on a later iteration.
    #[error("Retryable transport failure: {0}")]
    Retryable(String),

    /// Permanent rejection: in individual mode, of one recipient; in
    /// bulk mode, of the whole batch.
    #[error("Permanently rejected: {0}")]
    Rejected(String),
}

/// An outbound mail transport.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Which send mode this transport supports.
    fn capability(&self) -> Capability;

    /// Send one prepared batch in a single call.
    ///
    /// # Errors
    /// Any [`TransportError`]; the batch is atomic, so an error means no
    /// recipient in it was delivered.
    async fn send_bulk(
        &self,
        newsletter: &NewsletterPayload,
        recipients: &[PreparedRecipient],
    ) -> Result<(), TransportError>;

    /// Send to a single recipient.
    ///
    /// # Errors
    /// [`TransportError::Rejected`] marks this one recipient as
    /// permanently failed; other errors abort the remainder of the batch.
    async fn send_individual(
        &self,
        newsletter: &NewsletterPayload,
        recipient: &PreparedRecipient,
    ) -> Result<(), TransportError>;
}

/// A transport that logs instead of sending.
///
/// Stands in wherever a real provider adapter would be wired: local
/// development, demos, dry runs.
#[derive(Debug, Clone, Copy)]
pub struct LogTransport {
    capability: Capability,
}

impl LogTransport {
    #[must_use]
    pub const fn new(capability: Capability) -> Self {
        Self { capability }
    }
}

impl Default for LogTransport {
    fn default() -> Self {
        Self::new(Capability::Bulk)
    }
}

#[async_trait]
impl Transport for LogTransport {
    fn capability(&self) -> Capability {
        self.capability
    }

    async fn send_bulk(
        &self,
        newsletter: &NewsletterPayload,
        recipients: &[PreparedRecipient],
    ) -> Result<(), TransportError> {
        outgoing!(
            level = INFO,
            "Would send \"{}\" to {} recipients",
            newsletter.subject,
            recipients.len()
        );
        Ok(())
    }

    async fn send_individual(
        &self,
        newsletter: &NewsletterPayload,
        recipient: &PreparedRecipient,
    ) -> Result<(), TransportError> {
        outgoing!(
            level = INFO,
            "Would send \"{}\" to {}",
            newsletter.subject,
            recipient.display
        );
        Ok(())
    }
}

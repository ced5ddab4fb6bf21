//! Newsletter and recipient resolution contracts.
//!
//! Newsletters and subscriber lists are owned elsewhere; the dispatcher
//! reaches them through these two narrow read-only contracts. The
//! recipient source is cursor-based: the queue's processed count is the
//! cursor, so a batch is never handed out twice as long as cursors only
//! advance.

use async_trait::async_trait;
use herald_store::{NewsletterId, QueueId};

use crate::error::DispatchError;

/// A sender or reply-to mailbox.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Contact {
    pub address: String,
    pub name: Option<String>,
}

impl Contact {
    #[must_use]
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            name: None,
        }
    }

    #[must_use]
    pub fn named(address: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            name: Some(name.into()),
        }
    }
}

/// The newsletter a queue sends, as resolved from its owning store.
#[derive(Debug, Clone)]
pub struct Newsletter {
    pub id: NewsletterId,
    pub subject: String,
    pub sender: Option<Contact>,
    pub reply_to: Option<Contact>,
    pub body: String,
}

/// The transport-ready form of a newsletter.
///
/// Reply-to falls back to the sender when the newsletter does not carry
/// its own.
#[derive(Debug, Clone)]
pub struct NewsletterPayload {
    pub subject: String,
    pub sender: Option<Contact>,
    pub reply_to: Option<Contact>,
    pub body: String,
}

impl From<&Newsletter> for NewsletterPayload {
    fn from(newsletter: &Newsletter) -> Self {
        Self {
            subject: newsletter.subject.clone(),
            sender: newsletter.sender.clone(),
            reply_to: newsletter
                .reply_to
                .clone()
                .or_else(|| newsletter.sender.clone()),
            body: newsletter.body.clone(),
        }
    }
}

/// One subscriber as the recipient source hands it out.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Recipient {
    pub email: String,
    pub name: Option<String>,
}

/// One recipient in the transport's required shape.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreparedRecipient {
    pub email: String,
    /// RFC 5322-style display form, `Jane Doe <jane@example.com>` or the
    /// bare address.
    pub display: String,
}

/// Resolves a queue's newsletter.
#[async_trait]
pub trait NewsletterSource: Send + Sync {
    /// Look up a newsletter by id. `None` when it no longer exists.
    async fn newsletter(&self, id: &NewsletterId) -> Result<Option<Newsletter>, DispatchError>;
}

/// Resolves the next unsent batch of recipients for a queue.
#[async_trait]
pub trait RecipientSource: Send + Sync {
    /// Return up to `limit` recipients starting at `offset`.
    ///
    /// Implementations must never return the same recipient twice for the
    /// same queue across calls with advancing offsets; the dispatcher
    /// relies on this for its no-duplicate-sends guarantee.
    async fn next_batch(
        &self,
        queue: &QueueId,
        offset: u32,
        limit: u32,
    ) -> Result<Vec<Recipient>, DispatchError>;
}

/// In-memory newsletter source for testing and transient deployments.
#[derive(Debug, Clone, Default)]
pub struct MemoryNewsletterSource {
    newsletters: std::sync::Arc<std::sync::RwLock<std::collections::HashMap<NewsletterId, Newsletter>>>,
}

impl MemoryNewsletterSource {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a newsletter so queues can resolve it.
    pub fn insert(&self, newsletter: Newsletter) {
        self.newsletters
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .insert(newsletter.id, newsletter);
    }
}

#[async_trait]
impl NewsletterSource for MemoryNewsletterSource {
    async fn newsletter(&self, id: &NewsletterId) -> Result<Option<Newsletter>, DispatchError> {
        Ok(self
            .newsletters
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .get(id)
            .cloned())
    }
}

/// In-memory recipient source for testing and transient deployments.
///
/// Holds the full recipient list per queue and slices it by offset, which
/// trivially satisfies the no-duplicates guarantee.
#[derive(Debug, Clone, Default)]
pub struct MemoryRecipientSource {
    lists: std::sync::Arc<std::sync::RwLock<std::collections::HashMap<QueueId, Vec<Recipient>>>>,
}

impl MemoryRecipientSource {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the recipient list for a queue.
    pub fn insert(&self, queue: QueueId, recipients: Vec<Recipient>) {
        self.lists
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .insert(queue, recipients);
    }
}

#[async_trait]
impl RecipientSource for MemoryRecipientSource {
    async fn next_batch(
        &self,
        queue: &QueueId,
        offset: u32,
        limit: u32,
    ) -> Result<Vec<Recipient>, DispatchError> {
        let lists = self
            .lists
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        let Some(list) = lists.get(queue) else {
            return Ok(Vec::new());
        };

        let start = offset as usize;
        let end = start.saturating_add(limit as usize).min(list.len());
        if start >= list.len() {
            return Ok(Vec::new());
        }

        Ok(list[start..end].to_vec())
    }
}

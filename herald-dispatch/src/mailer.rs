//! The mail dispatcher: one prepared batch in, one outcome out.
//!
//! Wraps the configured transport, consulting the rate-limit log before
//! anything leaves and settling the counter afterwards. Queue state is
//! never touched here; progress bookkeeping belongs to the processor,
//! keeping a single writer per queue record.

use std::{sync::Arc, time::SystemTime};

use crate::{
    error::DispatchError,
    limiter::{LimitCheck, LimitReason, RateLimitLog},
    source::{Newsletter, NewsletterPayload, PreparedRecipient, Recipient},
    transport::{Capability, Transport, TransportError},
};

/// What happened to a batch that was actually attempted.
#[derive(Debug, Clone, Default)]
pub struct BatchReceipt {
    /// Recipients the transport accepted.
    pub delivered: u32,
    /// Recipients the transport permanently rejected (individual mode
    /// only; a bulk batch succeeds or fails whole).
    pub failed: Vec<FailedRecipient>,
}

impl BatchReceipt {
    /// Recipients this batch consumed, delivered or rejected.
    #[must_use]
    pub fn processed(&self) -> u32 {
        self.delivered
            .saturating_add(u32::try_from(self.failed.len()).unwrap_or(u32::MAX))
    }
}

/// One permanently rejected recipient.
#[derive(Debug, Clone)]
pub struct FailedRecipient {
    pub email: String,
    pub reason: String,
}

/// Outcome of a batch send. Rate limiting is expected control flow: the
/// caller stops its pass and tries again next iteration.
#[derive(Debug, Clone)]
pub enum BatchOutcome {
    Sent(BatchReceipt),
    RateLimited(LimitReason),
}

/// Transform one recipient into the transport's required shape.
///
/// Pure mapping, no I/O.
#[must_use]
pub fn prepare_recipient(recipient: &Recipient) -> PreparedRecipient {
    let display = recipient.name.as_ref().map_or_else(
        || recipient.email.clone(),
        |name| format!("{name} <{}>", recipient.email),
    );

    PreparedRecipient {
        email: recipient.email.clone(),
        display,
    }
}

/// Adapts the configured transport and wraps a prepared batch send.
#[derive(Clone)]
pub struct Mailer {
    transport: Arc<dyn Transport>,
    limiter: RateLimitLog,
}

impl std::fmt::Debug for Mailer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Mailer")
            .field("capability", &self.transport.capability())
            .finish_non_exhaustive()
    }
}

impl Mailer {
    #[must_use]
    pub fn new(transport: Arc<dyn Transport>, limiter: RateLimitLog) -> Self {
        Self { transport, limiter }
    }

    /// The capability of the wrapped transport.
    #[must_use]
    pub fn capability(&self) -> Capability {
        self.transport.capability()
    }

    /// Send one batch of a newsletter.
    ///
    /// Claims the batch against the rate limit in a single conditional
    /// update, then drives the transport in its advertised mode. Slots
    /// claimed for sends that were never attempted are handed back.
    ///
    /// # Errors
    /// Transport failures other than a provider rate limit propagate to
    /// the caller; the batch is then retried wholesale on a later
    /// iteration.
    pub async fn send_batch(
        &self,
        newsletter: &Newsletter,
        recipients: &[Recipient],
    ) -> Result<BatchOutcome, DispatchError> {
        if recipients.is_empty() {
            return Ok(BatchOutcome::Sent(BatchReceipt::default()));
        }

        let want = u32::try_from(recipients.len()).unwrap_or(u32::MAX);
        if let LimitCheck::Limited(reason) = self.limiter.claim(want).await? {
            tracing::debug!(batch = want, "Sending limit reached, batch not attempted");
            return Ok(BatchOutcome::RateLimited(reason));
        }

        let payload = NewsletterPayload::from(newsletter);
        let prepared: Vec<PreparedRecipient> = recipients.iter().map(prepare_recipient).collect();

        match self.transport.capability() {
            Capability::Bulk => self.dispatch_bulk(&payload, &prepared, want).await,
            Capability::Individual => self.dispatch_individual(&payload, &prepared, want).await,
        }
    }

    async fn dispatch_bulk(
        &self,
        payload: &NewsletterPayload,
        prepared: &[PreparedRecipient],
        want: u32,
    ) -> Result<BatchOutcome, DispatchError> {
        match self.transport.send_bulk(payload, prepared).await {
            Ok(()) => {
                self.limiter.note_success().await?;
                Ok(BatchOutcome::Sent(BatchReceipt {
                    delivered: want,
                    failed: Vec::new(),
                }))
            }
            Err(TransportError::RateLimited { retry_after }) => {
                // Nothing went out; the whole claim comes back.
                self.limiter.release(want).await?;
                let error = TransportError::RateLimited { retry_after }.to_string();
                let delay = self.limiter.record_failure(&error, retry_after).await?;
                Ok(BatchOutcome::RateLimited(LimitReason::BackingOff {
                    until: SystemTime::now() + delay,
                }))
            }
            Err(error) => {
                self.limiter.release(want).await?;
                Err(error.into())
            }
        }
    }

    async fn dispatch_individual(
        &self,
        payload: &NewsletterPayload,
        prepared: &[PreparedRecipient],
        want: u32,
    ) -> Result<BatchOutcome, DispatchError> {
        let mut delivered = 0u32;
        let mut failed = Vec::new();
        let mut attempted = 0u32;

        for recipient in prepared {
            match self.transport.send_individual(payload, recipient).await {
                Ok(()) => {
                    attempted += 1;
                    delivered += 1;
                }
                Err(TransportError::Rejected(reason)) => {
                    // A rejection still consumed a send attempt.
                    attempted += 1;
                    tracing::debug!(recipient = %recipient.email, %reason, "Recipient rejected");
                    failed.push(FailedRecipient {
                        email: recipient.email.clone(),
                        reason,
                    });
                }
                Err(TransportError::RateLimited { retry_after }) => {
                    self.limiter.release(want - attempted).await?;
                    let error = TransportError::RateLimited { retry_after }.to_string();
                    let delay = self.limiter.record_failure(&error, retry_after).await?;
                    return Ok(BatchOutcome::RateLimited(LimitReason::BackingOff {
                        until: SystemTime::now() + delay,
                    }));
                }
                Err(error) => {
                    self.limiter.release(want - attempted).await?;
                    return Err(error.into());
                }
            }
        }

        self.limiter.note_success().await?;
        Ok(BatchOutcome::Sent(BatchReceipt { delivered, failed }))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use async_trait::async_trait;
    use herald_store::{MemoryStore, NewsletterId, StateStore};

    use super::*;
    use crate::{backoff::BackoffPolicy, limiter::RateLimitConfig, source::Contact};

    fn newsletter() -> Newsletter {
        Newsletter {
            id: NewsletterId::generate(),
            subject: "Weekly digest".to_string(),
            sender: Some(Contact::named("news@example.com", "Example News")),
            reply_to: None,
            body: "hello".to_string(),
        }
    }

    fn recipients(n: u32) -> Vec<Recipient> {
        (0..n)
            .map(|i| Recipient {
                email: format!("user{i}@example.com"),
                name: (i % 2 == 0).then(|| format!("User {i}")),
            })
            .collect()
    }

    fn limiter_with(store: &Arc<MemoryStore>, cap: u32) -> RateLimitLog {
        RateLimitLog::new(
            store.clone(),
            RateLimitConfig {
                window_cap: cap,
                window_secs: 3600,
            },
            BackoffPolicy {
                base_delay_secs: 60,
                max_delay_secs: 3600,
                jitter_factor: 0.0,
            },
        )
    }

    /// Scripted transport: every `reject_every`-th individual send is
    /// rejected; optionally fails with the given error after a number of
    /// accepted calls.
    struct ScriptedTransport {
        capability: Capability,
        calls: AtomicU32,
        reject_every: Option<u32>,
        rate_limited_after: Option<u32>,
        retryable_after: Option<u32>,
    }

    impl ScriptedTransport {
        fn bulk_ok() -> Self {
            Self {
                capability: Capability::Bulk,
                calls: AtomicU32::new(0),
                reject_every: None,
                rate_limited_after: None,
                retryable_after: None,
            }
        }

        fn individual() -> Self {
            Self {
                capability: Capability::Individual,
                ..Self::bulk_ok()
            }
        }
    }

    #[async_trait]
    impl Transport for ScriptedTransport {
        fn capability(&self) -> Capability {
            self.capability
        }

        async fn send_bulk(
            &self,
            _newsletter: &NewsletterPayload,
            _recipients: &[PreparedRecipient],
        ) -> Result<(), TransportError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if self.rate_limited_after.is_some_and(|after| call >= after) {
                return Err(TransportError::RateLimited { retry_after: None });
            }
            Ok(())
        }

        async fn send_individual(
            &self,
            _newsletter: &NewsletterPayload,
            _recipient: &PreparedRecipient,
        ) -> Result<(), TransportError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if self.rate_limited_after.is_some_and(|after| call > after) {
                return Err(TransportError::RateLimited { retry_after: None });
            }
            if self.retryable_after.is_some_and(|after| call > after) {
                return Err(TransportError::Retryable("connection lost".to_string()));
            }
            if self.reject_every.is_some_and(|every| call % every == 0) {
                return Err(TransportError::Rejected("550 unknown user".to_string()));
            }
            Ok(())
        }
    }

    #[test]
    fn test_prepare_recipient_display_forms() {
        let named = Recipient {
            email: "jane@example.com".to_string(),
            name: Some("Jane Doe".to_string()),
        };
        assert_eq!(
            prepare_recipient(&named).display,
            "Jane Doe <jane@example.com>"
        );

        let bare = Recipient {
            email: "jane@example.com".to_string(),
            name: None,
        };
        assert_eq!(prepare_recipient(&bare).display, "jane@example.com");
    }

    #[tokio::test]
    async fn test_bulk_batch_is_atomic() {
        let store = Arc::new(MemoryStore::new());
        let mailer = Mailer::new(
            Arc::new(ScriptedTransport::bulk_ok()),
            limiter_with(&store, 100),
        );

        let outcome = mailer
            .send_batch(&newsletter(), &recipients(20))
            .await
            .unwrap();
        let BatchOutcome::Sent(receipt) = outcome else {
            panic!("expected a sent batch");
        };
        assert_eq!(receipt.delivered, 20);
        assert!(receipt.failed.is_empty());
        assert_eq!(store.rate_limit().await.unwrap().record.sent, 20);
    }

    #[tokio::test]
    async fn test_individual_mode_tracks_rejections() {
        let store = Arc::new(MemoryStore::new());
        let transport = ScriptedTransport {
            reject_every: Some(5),
            ..ScriptedTransport::individual()
        };
        let mailer = Mailer::new(Arc::new(transport), limiter_with(&store, 100));

        let outcome = mailer
            .send_batch(&newsletter(), &recipients(20))
            .await
            .unwrap();
        let BatchOutcome::Sent(receipt) = outcome else {
            panic!("expected a sent batch");
        };
        assert_eq!(receipt.delivered, 16);
        assert_eq!(receipt.failed.len(), 4);
        assert_eq!(receipt.processed(), 20);

        // Rejected recipients still consumed send attempts.
        assert_eq!(store.rate_limit().await.unwrap().record.sent, 20);
    }

    #[tokio::test]
    async fn test_local_cap_blocks_before_transport() {
        let store = Arc::new(MemoryStore::new());
        let limiter = limiter_with(&store, 50);
        limiter.record(50).await.unwrap();

        let transport = Arc::new(ScriptedTransport::bulk_ok());
        let mailer = Mailer::new(transport.clone(), limiter);

        let outcome = mailer
            .send_batch(&newsletter(), &recipients(20))
            .await
            .unwrap();
        assert!(matches!(outcome, BatchOutcome::RateLimited(_)));
        assert_eq!(transport.calls.load(Ordering::SeqCst), 0);
        assert_eq!(store.rate_limit().await.unwrap().record.sent, 50);
    }

    #[tokio::test]
    async fn test_provider_rate_limit_releases_claim_and_backs_off() {
        let store = Arc::new(MemoryStore::new());
        let transport = ScriptedTransport {
            rate_limited_after: Some(0),
            ..ScriptedTransport::bulk_ok()
        };
        let mailer = Mailer::new(Arc::new(transport), limiter_with(&store, 100));

        let outcome = mailer
            .send_batch(&newsletter(), &recipients(20))
            .await
            .unwrap();
        assert!(matches!(
            outcome,
            BatchOutcome::RateLimited(LimitReason::BackingOff { .. })
        ));

        let state = store.rate_limit().await.unwrap().record;
        assert_eq!(state.sent, 0);
        assert_eq!(state.retry_attempt, 1);
        assert!(state.backoff_until.is_some());
    }

    #[tokio::test]
    async fn test_mid_batch_failure_releases_unattempted_claims() {
        let store = Arc::new(MemoryStore::new());
        let transport = ScriptedTransport {
            retryable_after: Some(12),
            ..ScriptedTransport::individual()
        };
        let mailer = Mailer::new(Arc::new(transport), limiter_with(&store, 100));

        let result = mailer.send_batch(&newsletter(), &recipients(20)).await;
        assert!(result.is_err_and(|e| e.is_temporary()));

        // 12 attempts went out before the failure; the other 8 claims
        // were handed back.
        assert_eq!(store.rate_limit().await.unwrap().record.sent, 12);
    }

    #[tokio::test]
    async fn test_empty_batch_is_a_no_op() {
        let store = Arc::new(MemoryStore::new());
        let mailer = Mailer::new(
            Arc::new(ScriptedTransport::bulk_ok()),
            limiter_with(&store, 100),
        );

        let outcome = mailer.send_batch(&newsletter(), &[]).await.unwrap();
        let BatchOutcome::Sent(receipt) = outcome else {
            panic!("expected a sent batch");
        };
        assert_eq!(receipt.processed(), 0);
        assert_eq!(store.rate_limit().await.unwrap().record.sent, 0);
    }
}

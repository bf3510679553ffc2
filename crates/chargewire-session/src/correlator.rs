//! Tracks outbound calls awaiting their answer.
//!
//! The correlator owns three things: the table of pending calls keyed by
//! correlation id, the semaphore that caps how many calls are outstanding,
//! and the id generator. It does no I/O; the session puts frames on the
//! wire and feeds answers back in.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use rand::Rng;
use serde_json::Value;
use tokio::sync::{OwnedSemaphorePermit, Semaphore, oneshot};

use crate::{CallIdStrategy, SessionError};

pub(crate) type CallOutcome = Result<Value, SessionError>;

/// One outbound call waiting for a `CALLRESULT` or `CALLERROR`.
#[derive(Debug)]
pub(crate) struct PendingCall {
    pub(crate) method: String,
    pub(crate) created: Instant,
    pub(crate) timeout: Duration,
    tx: oneshot::Sender<CallOutcome>,
}

impl PendingCall {
    /// Delivers the outcome to the caller, if it is still waiting.
    pub(crate) fn complete(self, outcome: CallOutcome) {
        let _ = self.tx.send(outcome);
    }
}

pub(crate) struct Correlator {
    pending: Mutex<HashMap<String, PendingCall>>,
    slots: Arc<Semaphore>,
    strategy: CallIdStrategy,
    next_seq: AtomicU64,
}

impl Correlator {
    pub(crate) fn new(concurrency: usize, strategy: CallIdStrategy) -> Self {
        Self {
            pending: Mutex::new(HashMap::new()),
            // tokio's semaphore is fair: waiters are served in FIFO order
            slots: Arc::new(Semaphore::new(concurrency)),
            strategy,
            next_seq: AtomicU64::new(1),
        }
    }

    /// Waits for a free concurrency slot.
    ///
    /// Returns `None` once [`fail_all`](Self::fail_all) has run, so queued
    /// calls are never sent.
    pub(crate) async fn acquire(&self) -> Option<OwnedSemaphorePermit> {
        Arc::clone(&self.slots).acquire_owned().await.ok()
    }

    /// Allocates a fresh id and registers the call under it.
    ///
    /// Returns `None` if the correlator has already failed everything.
    pub(crate) fn register(
        &self,
        method: &str,
        timeout: Duration,
    ) -> Option<(String, oneshot::Receiver<CallOutcome>)> {
        let (tx, rx) = oneshot::channel();
        let mut pending = self.pending.lock();
        // checked under the lock: `fail_all` closes first, drains second
        if self.slots.is_closed() {
            return None;
        }

        let id = loop {
            let candidate = self.generate_id();
            if !pending.contains_key(&candidate) {
                break candidate;
            }
            tracing::debug!(id = %candidate, "correlation id collision, regenerating");
        };

        pending.insert(
            id.clone(),
            PendingCall {
                method: method.to_owned(),
                created: Instant::now(),
                timeout,
                tx,
            },
        );
        Some((id, rx))
    }

    /// Removes and returns the pending call with this id.
    ///
    /// `None` means the id is unknown: never issued, already answered, or
    /// timed out.
    pub(crate) fn take(&self, id: &str) -> Option<PendingCall> {
        self.pending.lock().remove(id)
    }

    pub(crate) fn pending_count(&self) -> usize {
        self.pending.lock().len()
    }

    /// Fails every pending call and refuses all future slots.
    pub(crate) fn fail_all(&self, code: u16, reason: &str) {
        self.slots.close();
        let drained: Vec<(String, PendingCall)> =
            self.pending.lock().drain().collect();

        for (id, call) in drained {
            tracing::debug!(
                %id,
                method = %call.method,
                age = ?call.created.elapsed(),
                timeout = ?call.timeout,
                "failing pending call on close"
            );
            call.complete(Err(SessionError::ConnectionClosed {
                code,
                reason: reason.to_owned(),
            }));
        }
    }

    fn generate_id(&self) -> String {
        match self.strategy {
            CallIdStrategy::Sequential => {
                self.next_seq.fetch_add(1, Ordering::Relaxed).to_string()
            }
            CallIdStrategy::Random => {
                let bytes: [u8; 16] = rand::rng().random();
                bytes.iter().map(|b| format!("{b:02x}")).collect()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_sequential_ids_are_increasing() {
        let c = Correlator::new(1, CallIdStrategy::Sequential);
        let (a, _ra) = c.register("Heartbeat", Duration::from_secs(1)).unwrap();
        let (b, _rb) = c.register("Heartbeat", Duration::from_secs(1)).unwrap();
        assert_eq!(a, "1");
        assert_eq!(b, "2");
        assert_eq!(c.pending_count(), 2);
    }

    #[test]
    fn test_register_random_ids_are_32_hex_chars() {
        let c = Correlator::new(1, CallIdStrategy::Random);
        let (id, _rx) = c.register("Reset", Duration::from_secs(1)).unwrap();
        assert_eq!(id.len(), 32);
        assert!(id.chars().all(|ch| ch.is_ascii_hexdigit()));
    }

    #[tokio::test]
    async fn test_take_then_complete_resolves_caller() {
        let c = Correlator::new(1, CallIdStrategy::Sequential);
        let (id, rx) = c.register("Reset", Duration::from_secs(1)).unwrap();

        let call = c.take(&id).expect("pending");
        assert_eq!(call.method, "Reset");
        call.complete(Ok(serde_json::json!({"status": "Accepted"})));

        let value = rx.await.unwrap().unwrap();
        assert_eq!(value["status"], "Accepted");
        assert!(c.take(&id).is_none(), "an answered id is unknown");
    }

    #[tokio::test]
    async fn test_fail_all_rejects_pending_and_queued() {
        let c = Arc::new(Correlator::new(1, CallIdStrategy::Sequential));
        let permit = c.acquire().await.unwrap();
        let (_id, rx) = c.register("Reset", Duration::from_secs(1)).unwrap();

        let queued = {
            let c = Arc::clone(&c);
            tokio::spawn(async move { c.acquire().await })
        };
        tokio::task::yield_now().await;

        c.fail_all(1001, "going away");
        drop(permit);

        assert!(matches!(
            rx.await.unwrap(),
            Err(SessionError::ConnectionClosed { code: 1001, .. })
        ));
        assert!(queued.await.unwrap().is_none());
        assert!(c.register("Reset", Duration::from_secs(1)).is_none());
        assert_eq!(c.pending_count(), 0);
    }
}

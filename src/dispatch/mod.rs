//! Record dispatch to the remote collector.
//!
//! Transports are interchangeable behind the [`Transport`] trait: a
//! request/response HTTP backend and a direct-write datastore backend are
//! both valid implementations, selected by configuration. The
//! [`Dispatcher`] wraps the chosen transport with a bounded per-attempt
//! timeout and an in-cycle [`RetryPolicy`].

pub mod datastore;
pub mod http;

use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::types::UploadRecord;

pub use datastore::{DatastoreTransport, DatastoreTransportConfig};
pub use http::{HttpTransport, HttpTransportConfig};

/// Failure modes a transport can report for one send.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The remote was unreachable (connect error or timeout).
    #[error("connection failure: {0}")]
    Connection(String),

    /// The remote was reachable but did not accept the record.
    #[error("record rejected (status {status:?}): {diagnostic:?}")]
    Rejected {
        status: Option<u16>,
        diagnostic: Option<String>,
    },

    /// The transport could not be constructed. Startup-time only.
    #[error("transport configuration: {0}")]
    Config(String),
}

/// Acknowledgement for an accepted record.
#[derive(Debug, Clone, Default)]
pub struct Accepted {
    /// Resource locator assigned by the remote, when it reports one.
    pub resource: Option<String>,
}

/// One interchangeable transport backend.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Short backend name for logs.
    fn name(&self) -> &str;

    /// Transmit one record.
    async fn send(&self, record: &UploadRecord) -> Result<Accepted, TransportError>;

    /// Release held connections. Idempotent.
    async fn close(&self) {}
}

/// In-cycle retry policy for dispatch attempts.
///
/// Dispatch normally makes a single attempt per cadence tick: the next tick
/// is never far away, and waiting for it keeps the sampling cadence
/// untouched. Extra in-cycle attempts can be enabled where the dispatch
/// interval is long enough to absorb them; only connection failures are
/// retried.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Extra attempts after the first (default 0).
    pub max_retries: u32,
    /// Base delay between attempts. Actual delay = base * 2^attempt.
    pub base_delay: Duration,
    /// Hard cap on the computed delay.
    pub max_delay: Duration,
    /// Add random jitter of up to base_delay/2 to each delay.
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 0,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(5),
            jitter: true,
        }
    }
}

impl RetryPolicy {
    /// Compute the delay before retry `attempt` (0-indexed).
    fn delay_for_attempt(&self, attempt: u32) -> Duration {
        // checked shift so large attempt numbers saturate instead of wrapping
        let multiplier = 1u32.checked_shl(attempt).unwrap_or(u32::MAX);
        let exp_delay = self
            .base_delay
            .checked_mul(multiplier)
            .unwrap_or(self.max_delay);
        let capped = exp_delay.min(self.max_delay);

        if !self.jitter {
            return capped;
        }

        let jitter_range_ms = u64::try_from(self.base_delay.as_millis()).unwrap_or(u64::MAX) / 2;
        if jitter_range_ms == 0 {
            return capped;
        }
        let jitter_ms = rand::thread_rng().gen_range(0..jitter_range_ms);
        (capped + Duration::from_millis(jitter_ms)).min(self.max_delay)
    }
}

/// How one dispatch call ended.
#[derive(Debug, Clone)]
pub enum DispatchStatus {
    Accepted {
        resource: Option<String>,
    },
    Rejected {
        status: Option<u16>,
        diagnostic: Option<String>,
    },
    ConnectionFailed {
        reason: String,
    },
}

/// Outcome of one dispatch call, including the attempt count.
///
/// Never persisted beyond the current cycle: a failed record is dropped and
/// the next cadence tick sends fresh data (last-value-wins, not a queue).
#[derive(Debug, Clone)]
pub struct DispatchOutcome {
    pub status: DispatchStatus,
    pub attempts: u32,
}

impl DispatchOutcome {
    pub fn accepted(&self) -> bool {
        matches!(self.status, DispatchStatus::Accepted { .. })
    }
}

/// Wraps a transport with a bounded timeout, retry policy and failure
/// classification.
pub struct Dispatcher {
    transport: Box<dyn Transport>,
    policy: RetryPolicy,
    timeout: Duration,
}

impl Dispatcher {
    pub fn new(transport: Box<dyn Transport>, policy: RetryPolicy, timeout: Duration) -> Self {
        Self {
            transport,
            policy,
            timeout,
        }
    }

    /// Name of the underlying transport, for logs.
    pub fn transport_name(&self) -> &str {
        self.transport.name()
    }

    /// Transmit one record, bounded by the configured timeout per attempt.
    ///
    /// Rejections are terminal for the cycle (the remote made a decision;
    /// resending the same record would not change it). Connection failures
    /// are retried up to the policy's limit, with cancellation-aware
    /// backoff sleeps so shutdown is never swallowed by a retry loop.
    pub async fn dispatch(
        &self,
        record: &UploadRecord,
        shutdown: &CancellationToken,
    ) -> DispatchOutcome {
        let mut attempt = 0u32;
        loop {
            let result = tokio::time::timeout(self.timeout, self.transport.send(record)).await;

            let status = match result {
                Ok(Ok(ack)) => {
                    return DispatchOutcome {
                        status: DispatchStatus::Accepted {
                            resource: ack.resource,
                        },
                        attempts: attempt + 1,
                    };
                }
                Ok(Err(TransportError::Rejected { status, diagnostic })) => {
                    return DispatchOutcome {
                        status: DispatchStatus::Rejected { status, diagnostic },
                        attempts: attempt + 1,
                    };
                }
                Ok(Err(e)) => DispatchStatus::ConnectionFailed {
                    reason: e.to_string(),
                },
                Err(_) => DispatchStatus::ConnectionFailed {
                    reason: format!("timed out after {:?}", self.timeout),
                },
            };

            if attempt >= self.policy.max_retries || shutdown.is_cancelled() {
                return DispatchOutcome {
                    status,
                    attempts: attempt + 1,
                };
            }

            let delay = self.policy.delay_for_attempt(attempt);
            tracing::warn!(
                transport = self.transport.name(),
                attempt = attempt + 1,
                max = self.policy.max_retries + 1,
                delay_ms = delay.as_millis() as u64,
                "Retrying dispatch after connection failure"
            );
            tokio::select! {
                _ = shutdown.cancelled() => {
                    return DispatchOutcome {
                        status,
                        attempts: attempt + 1,
                    };
                }
                _ = tokio::time::sleep(delay) => {}
            }
            attempt += 1;
        }
    }

    /// Release the underlying transport. Idempotent.
    pub async fn close(&self) {
        self.transport.close().await;
    }
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("transport", &self.transport.name())
            .field("policy", &self.policy)
            .field("timeout", &self.timeout)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    enum Mode {
        Accept,
        Reject,
        Unreachable,
    }

    struct MockTransport {
        mode: Mode,
        calls: Arc<AtomicU32>,
    }

    #[async_trait]
    impl Transport for MockTransport {
        fn name(&self) -> &str {
            "mock"
        }

        async fn send(&self, _record: &UploadRecord) -> Result<Accepted, TransportError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match self.mode {
                Mode::Accept => Ok(Accepted {
                    resource: Some("records/1".into()),
                }),
                Mode::Reject => Err(TransportError::Rejected {
                    status: Some(400),
                    diagnostic: Some("bad record".into()),
                }),
                Mode::Unreachable => {
                    Err(TransportError::Connection("connection refused".into()))
                }
            }
        }
    }

    fn record() -> UploadRecord {
        UploadRecord {
            sequence: 1,
            device_id: "rpi-test".into(),
            location: None,
            sample: Some(crate::types::Sample::new("rpi-test")),
            observation: None,
        }
    }

    fn dispatcher(mode: Mode, calls: Arc<AtomicU32>, max_retries: u32) -> Dispatcher {
        Dispatcher::new(
            Box::new(MockTransport { mode, calls }),
            RetryPolicy {
                max_retries,
                jitter: false,
                ..RetryPolicy::default()
            },
            Duration::from_secs(1),
        )
    }

    #[tokio::test]
    async fn accepted_after_single_attempt() {
        let calls = Arc::new(AtomicU32::new(0));
        let d = dispatcher(Mode::Accept, calls.clone(), 3);

        let outcome = d.dispatch(&record(), &CancellationToken::new()).await;
        assert!(outcome.accepted());
        assert_eq!(outcome.attempts, 1);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn rejection_is_not_retried() {
        let calls = Arc::new(AtomicU32::new(0));
        let d = dispatcher(Mode::Reject, calls.clone(), 3);

        let outcome = d.dispatch(&record(), &CancellationToken::new()).await;
        assert!(matches!(
            outcome.status,
            DispatchStatus::Rejected {
                status: Some(400),
                ..
            }
        ));
        assert_eq!(outcome.attempts, 1);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn connection_failure_retried_up_to_policy_limit() {
        let calls = Arc::new(AtomicU32::new(0));
        let d = dispatcher(Mode::Unreachable, calls.clone(), 2);

        let outcome = d.dispatch(&record(), &CancellationToken::new()).await;
        assert!(matches!(
            outcome.status,
            DispatchStatus::ConnectionFailed { .. }
        ));
        assert_eq!(outcome.attempts, 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn cancellation_stops_retry_loop() {
        let calls = Arc::new(AtomicU32::new(0));
        let d = dispatcher(Mode::Unreachable, calls.clone(), 5);

        let token = CancellationToken::new();
        token.cancel();
        let outcome = d.dispatch(&record(), &token).await;

        // the in-flight attempt finishes, then the loop exits
        assert_eq!(outcome.attempts, 1);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn retry_delay_respects_cap() {
        let policy = RetryPolicy {
            max_retries: 10,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(5),
            jitter: false,
        };
        assert_eq!(policy.delay_for_attempt(0), Duration::from_millis(500));
        assert_eq!(policy.delay_for_attempt(1), Duration::from_secs(1));
        // 500ms * 2^10 would be 512s; capped
        assert_eq!(policy.delay_for_attempt(10), Duration::from_secs(5));
    }

    #[test]
    fn retry_delay_with_jitter_stays_under_cap() {
        let policy = RetryPolicy {
            max_retries: 3,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(1),
            jitter: true,
        };
        for attempt in 0..6 {
            assert!(policy.delay_for_attempt(attempt) <= Duration::from_secs(1));
        }
    }
}

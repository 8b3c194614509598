//! Retry scheduling with capped exponential backoff
//!
//! Registration retries indefinitely (a registrar outage should not kill the
//! agent); outbound INVITEs give up after a bounded number of attempts. Waits
//! go through the [`Timer`] seam so callers on SIP-stack threads and tests
//! can drive them without a tokio sleep.

use async_trait::async_trait;
use sip_agent_config::SipConfig;
use std::sync::Arc;
use std::time::Duration;

/// Doubling stops here; anything further is capped by the policy anyway
const MAX_BACKOFF_EXPONENT: u32 = 16;

/// Backoff policy: delay doubles per attempt up to a cap, with an optional
/// attempt limit.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub max_attempts: Option<u32>,
}

impl RetryPolicy {
    /// Registration keeps trying until it succeeds.
    pub fn registration(sip: &SipConfig) -> Self {
        Self {
            base_delay: Duration::from_secs_f64(sip.reg_retry_base_secs),
            max_delay: Duration::from_secs_f64(sip.reg_retry_max_secs),
            max_attempts: None,
        }
    }

    /// Outbound INVITEs stop after a bounded number of attempts.
    pub fn invite(sip: &SipConfig) -> Self {
        Self {
            base_delay: Duration::from_secs_f64(sip.invite_retry_base_secs),
            max_delay: Duration::from_secs_f64(sip.invite_retry_max_secs),
            max_attempts: Some(sip.invite_max_attempts),
        }
    }
}

/// What to do after a failure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Try again after `delay`; `attempt` counts from 1
    Retry { attempt: u32, delay: Duration },
    /// Attempt limit reached; stays exhausted until [`RetryScheduler::reset`]
    Exhausted,
}

#[derive(Debug)]
pub struct RetryScheduler {
    policy: RetryPolicy,
    attempts: u32,
    exhausted: bool,
}

impl RetryScheduler {
    pub fn new(policy: RetryPolicy) -> Self {
        Self {
            policy,
            attempts: 0,
            exhausted: false,
        }
    }

    /// Decide the next step after a failure.
    pub fn next_decision(&mut self) -> RetryDecision {
        if self.exhausted {
            return RetryDecision::Exhausted;
        }
        if let Some(max) = self.policy.max_attempts {
            if self.attempts >= max {
                self.exhausted = true;
                return RetryDecision::Exhausted;
            }
        }
        let delay = self.delay_for(self.attempts);
        self.attempts += 1;
        RetryDecision::Retry {
            attempt: self.attempts,
            delay,
        }
    }

    /// Decide and, when retrying, wait out the delay on the given timer.
    pub async fn wait(&mut self, timer: &dyn Timer) -> RetryDecision {
        let decision = self.next_decision();
        if let RetryDecision::Retry { delay, .. } = decision {
            timer.sleep(delay).await;
        }
        decision
    }

    /// Clear attempt history after a success.
    pub fn reset(&mut self) {
        self.attempts = 0;
        self.exhausted = false;
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    fn delay_for(&self, attempt: u32) -> Duration {
        let factor = (1u64 << attempt.min(MAX_BACKOFF_EXPONENT)) as f64;
        let scaled = self.policy.base_delay.as_secs_f64() * factor;
        Duration::from_secs_f64(scaled.min(self.policy.max_delay.as_secs_f64()))
    }
}

/// Where retry delays are slept out.
#[async_trait]
pub trait Timer: Send + Sync {
    async fn sleep(&self, duration: Duration);
}

/// Sleeps on the tokio runtime
#[derive(Debug, Default)]
pub struct TokioTimer;

#[async_trait]
impl Timer for TokioTimer {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// Hook for SIP stacks that require every thread touching them to be
/// registered before use.
pub trait ThreadRegistrar: Send + Sync {
    fn register_current_thread(&self);
}

/// Sleeps on a dedicated OS thread, registering it first when a registrar
/// is configured. For callers that live outside the tokio runtime.
#[derive(Default)]
pub struct ThreadTimer {
    registrar: Option<Arc<dyn ThreadRegistrar>>,
}

impl ThreadTimer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_registrar(registrar: Arc<dyn ThreadRegistrar>) -> Self {
        Self {
            registrar: Some(registrar),
        }
    }
}

#[async_trait]
impl Timer for ThreadTimer {
    async fn sleep(&self, duration: Duration) {
        let (tx, rx) = tokio::sync::oneshot::channel();
        let registrar = self.registrar.clone();
        std::thread::spawn(move || {
            if let Some(registrar) = registrar {
                registrar.register_current_thread();
            }
            std::thread::sleep(duration);
            let _ = tx.send(());
        });
        let _ = rx.await;
    }
}

/// Records requested delays without sleeping
#[cfg(test)]
#[derive(Default)]
pub(crate) struct MockTimer {
    pub(crate) slept: parking_lot::Mutex<Vec<Duration>>,
}

#[cfg(test)]
#[async_trait]
impl Timer for MockTimer {
    async fn sleep(&self, duration: Duration) {
        self.slept.lock().push(duration);
    }
}

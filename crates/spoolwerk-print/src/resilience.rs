// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Bounded retry loop around a single job delivery.
//
// Transient failures are absorbed here: rediscover the device, wait a fixed
// delay, try again.  Rejections are never retried.  Once the attempt budget
// is spent the caller gets `Unavailable` and decides what to do with the job.

use std::time::Duration;

use tracing::{debug, info, warn};

use spoolwerk_core::config::ResilienceConfig;
use spoolwerk_core::types::PrintJob;

use crate::device::{DeviceError, PrinterCapability};

/// Retry settings for one device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts per dispatch, first one included.
    pub max_attempts: u32,
    /// Fixed pause between attempts.
    pub delay: Duration,
    /// Rediscover the device handle before each retry.
    pub reconnect: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&ResilienceConfig::default())
    }
}

impl From<&ResilienceConfig> for RetryPolicy {
    fn from(config: &ResilienceConfig) -> Self {
        Self {
            max_attempts: config.max_retries.max(1),
            delay: config.retry_delay(),
            reconnect: config.auto_reconnect,
        }
    }
}

/// What to do after a failed attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryDecision {
    /// Retry after this delay.
    RetryAfter(Duration),
    /// Do not retry; the device refused the job.
    GiveUp,
    /// Attempt budget spent.
    Exhausted,
}

impl RetryPolicy {
    /// Decide after `attempt` (1-based) failed with `err`.
    pub fn decide(&self, err: &DeviceError, attempt: u32) -> RetryDecision {
        if !err.is_transient() {
            RetryDecision::GiveUp
        } else if attempt >= self.max_attempts {
            RetryDecision::Exhausted
        } else {
            RetryDecision::RetryAfter(self.delay)
        }
    }
}

/// Result of one dispatch through the retry loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryOutcome {
    Delivered,
    /// Non-retryable refusal of the content.
    Rejected(String),
    /// Every attempt failed transiently.
    Unavailable(String),
}

/// Deliver `job`, retrying transient failures according to `policy`.
///
/// `job.attempts` and `job.last_error` are updated as attempts are made.
/// `on_failure` runs after each transient failure so the caller can
/// publish progress while the loop is still waiting.
pub async fn deliver<F>(
    device: &dyn PrinterCapability,
    job: &mut PrintJob,
    policy: &RetryPolicy,
    mut on_failure: F,
) -> DeliveryOutcome
where
    F: FnMut(&PrintJob, &DeviceError) + Send,
{
    let mut attempt = 0u32;
    loop {
        attempt += 1;
        job.attempts = job.attempts.saturating_add(1);
        debug!(device = %job.device_id, job_id = %job.id, attempt, "submitting job");

        let err = match device.submit(job).await {
            Ok(()) => {
                info!(device = %job.device_id, job_id = %job.id, attempt, "job delivered");
                return DeliveryOutcome::Delivered;
            }
            Err(e) => e,
        };
        job.last_error = Some(err.to_string());

        match policy.decide(&err, attempt) {
            RetryDecision::GiveUp => {
                warn!(device = %job.device_id, job_id = %job.id, error = %err, "job rejected by device");
                return DeliveryOutcome::Rejected(err.to_string());
            }
            RetryDecision::Exhausted => {
                on_failure(&*job, &err);
                warn!(
                    event = "reconnect_failed",
                    device = %job.device_id,
                    job_id = %job.id,
                    attempts = attempt,
                    error = %err,
                    "retry limit exhausted"
                );
                return DeliveryOutcome::Unavailable(err.to_string());
            }
            RetryDecision::RetryAfter(delay) => {
                on_failure(&*job, &err);
                warn!(
                    device = %job.device_id,
                    job_id = %job.id,
                    attempt,
                    max = policy.max_attempts,
                    error = %err,
                    "transient delivery failure, retrying"
                );
                if policy.reconnect {
                    match device.rediscover().await {
                        Ok(()) => debug!(device = %job.device_id, "device rediscovered"),
                        Err(e) => debug!(device = %job.device_id, error = %e, "rediscovery failed"),
                    }
                }
                tokio::time::sleep(delay).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::{SimOutcome, SimulatedPrinter};
    use spoolwerk_core::types::{DeviceId, JobContent, JobRequest};

    fn test_job() -> PrintJob {
        let content = JobContent::new("label.zpl", "text/plain", b"^XA^XZ".to_vec());
        PrintJob::new(DeviceId::from("label"), JobRequest::new(content))
    }

    fn fast_policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            delay: Duration::from_millis(5),
            reconnect: true,
        }
    }

    #[test]
    fn policy_follows_config() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.max_attempts, 3);
        assert_eq!(policy.delay, Duration::from_secs(1));
        assert!(policy.reconnect);
    }

    #[test]
    fn decisions() {
        let policy = fast_policy(3);
        let transient = DeviceError::Transient("EIO".into());
        assert_eq!(
            policy.decide(&transient, 1),
            RetryDecision::RetryAfter(Duration::from_millis(5))
        );
        assert_eq!(policy.decide(&transient, 3), RetryDecision::Exhausted);
        assert_eq!(
            policy.decide(&DeviceError::Rejected("bad".into()), 1),
            RetryDecision::GiveUp
        );
        assert_eq!(
            policy.decide(&DeviceError::NotFound("gone".into()), 1),
            RetryDecision::RetryAfter(Duration::from_millis(5))
        );
    }

    #[tokio::test]
    async fn succeeds_after_two_transient_failures() {
        let printer = SimulatedPrinter::new();
        printer.fail_next(2);
        let mut job = test_job();
        let mut failures = 0;

        let outcome = deliver(&printer, &mut job, &fast_policy(3), |_, _| failures += 1).await;

        assert_eq!(outcome, DeliveryOutcome::Delivered);
        assert_eq!(job.attempts, 3);
        assert_eq!(failures, 2);
        assert_eq!(printer.rediscoveries(), 2);
        assert_eq!(printer.delivered(), vec![job.id]);
    }

    #[tokio::test]
    async fn exhausts_after_max_attempts() {
        let printer = SimulatedPrinter::new();
        printer.fail_next(5);
        let mut job = test_job();

        let outcome = deliver(&printer, &mut job, &fast_policy(3), |_, _| {}).await;

        assert!(matches!(outcome, DeliveryOutcome::Unavailable(_)));
        assert_eq!(printer.attempts(), 3);
        assert_eq!(job.attempts, 3);
        assert!(job.last_error.is_some());
        assert!(printer.delivered().is_empty());
    }

    #[tokio::test]
    async fn rejection_is_not_retried() {
        let printer = SimulatedPrinter::new();
        printer.push_outcome(SimOutcome::Reject("unsupported format".into()));
        let mut job = test_job();

        let outcome = deliver(&printer, &mut job, &fast_policy(3), |_, _| {}).await;

        assert!(matches!(outcome, DeliveryOutcome::Rejected(_)));
        assert_eq!(printer.attempts(), 1);
        assert_eq!(printer.rediscoveries(), 0);
    }

    #[tokio::test]
    async fn no_rediscovery_without_auto_reconnect() {
        let printer = SimulatedPrinter::new();
        printer.fail_next(1);
        let mut job = test_job();
        let policy = RetryPolicy {
            reconnect: false,
            ..fast_policy(2)
        };

        let outcome = deliver(&printer, &mut job, &policy, |_, _| {}).await;

        assert_eq!(outcome, DeliveryOutcome::Delivered);
        assert_eq!(printer.rediscoveries(), 0);
    }
}

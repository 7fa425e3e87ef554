// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// In-memory printer for development and tests.
//
// Outcomes can be scripted per attempt, reachability can be toggled at any
// time, and every delivery is recorded so tests can assert ordering and
// the at-most-one-in-flight guarantee.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, info};

use spoolwerk_core::types::{DeviceStatus, JobId, PrintJob};

use super::{DeviceError, PrinterCapability};

/// Scripted result for one submission attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SimOutcome {
    Succeed,
    Transient(String),
    Reject(String),
}

/// Cheaply cloneable handle; clones share the same simulated device.
#[derive(Clone, Default)]
pub struct SimulatedPrinter {
    inner: Arc<SimState>,
}

#[derive(Default)]
struct SimState {
    delay: Mutex<Duration>,
    unreachable: AtomicBool,
    script: Mutex<VecDeque<SimOutcome>>,
    delivered: Mutex<Vec<JobId>>,
    attempts: AtomicU32,
    probes: AtomicU32,
    rediscoveries: AtomicU32,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

impl SimulatedPrinter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Time each submission takes.
    pub fn with_delay(self, delay: Duration) -> Self {
        self.set_delay(delay);
        self
    }

    pub fn set_delay(&self, delay: Duration) {
        *lock(&self.inner.delay) = delay;
    }

    /// Plug or unplug the device.  While unreachable every probe reports
    /// offline and every submission fails transiently.
    pub fn set_reachable(&self, reachable: bool) {
        self.inner.unreachable.store(!reachable, Ordering::SeqCst);
        debug!(reachable, "simulated device reachability changed");
    }

    pub fn is_reachable(&self) -> bool {
        !self.inner.unreachable.load(Ordering::SeqCst)
    }

    /// Queue an outcome for the next unscripted attempt.
    pub fn push_outcome(&self, outcome: SimOutcome) {
        lock(&self.inner.script).push_back(outcome);
    }

    /// Script `n` consecutive transient failures.
    pub fn fail_next(&self, n: usize) {
        let mut script = lock(&self.inner.script);
        for i in 0..n {
            script.push_back(SimOutcome::Transient(format!(
                "simulated I/O error ({} of {n})",
                i + 1
            )));
        }
    }

    /// Jobs delivered so far, in delivery order.
    pub fn delivered(&self) -> Vec<JobId> {
        lock(&self.inner.delivered).clone()
    }

    /// Total submission attempts, successful or not.
    pub fn attempts(&self) -> u32 {
        self.inner.attempts.load(Ordering::SeqCst)
    }

    pub fn probes(&self) -> u32 {
        self.inner.probes.load(Ordering::SeqCst)
    }

    pub fn rediscoveries(&self) -> u32 {
        self.inner.rediscoveries.load(Ordering::SeqCst)
    }

    /// Highest number of submissions ever observed running at once.
    pub fn max_concurrent(&self) -> usize {
        self.inner.max_in_flight.load(Ordering::SeqCst)
    }

    async fn attempt(&self, job: &PrintJob) -> Result<(), DeviceError> {
        let delay = *lock(&self.inner.delay);
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        if !self.is_reachable() {
            return Err(DeviceError::Transient("simulated device unreachable".into()));
        }

        let next = lock(&self.inner.script).pop_front();
        match next.unwrap_or(SimOutcome::Succeed) {
            SimOutcome::Succeed => {
                lock(&self.inner.delivered).push(job.id);
                info!(job_id = %job.id, name = %job.content.name, bytes = job.content.len(), "[sim] printed job");
                Ok(())
            }
            SimOutcome::Transient(msg) => Err(DeviceError::Transient(msg)),
            SimOutcome::Reject(msg) => Err(DeviceError::Rejected(msg)),
        }
    }
}

#[async_trait]
impl PrinterCapability for SimulatedPrinter {
    async fn status(&self) -> DeviceStatus {
        self.inner.probes.fetch_add(1, Ordering::SeqCst);
        if !self.is_reachable() {
            DeviceStatus::Offline
        } else if self.inner.in_flight.load(Ordering::SeqCst) > 0 {
            DeviceStatus::Busy
        } else {
            DeviceStatus::Ready
        }
    }

    async fn submit(&self, job: &PrintJob) -> Result<(), DeviceError> {
        self.inner.attempts.fetch_add(1, Ordering::SeqCst);
        let now = self.inner.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.inner.max_in_flight.fetch_max(now, Ordering::SeqCst);

        let result = self.attempt(job).await;

        self.inner.in_flight.fetch_sub(1, Ordering::SeqCst);
        result
    }

    async fn rediscover(&self) -> Result<(), DeviceError> {
        self.inner.rediscoveries.fetch_add(1, Ordering::SeqCst);
        if self.is_reachable() {
            Ok(())
        } else {
            Err(DeviceError::NotFound("simulated device unplugged".into()))
        }
    }
}

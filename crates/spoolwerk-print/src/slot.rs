// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// The per-device owner.
//
// A device's queue, availability state, and recent history live behind one
// mutex.  Every mutation (submission, dispatch, delivery outcome, probe
// result, expiry, cancellation) is a short synchronous critical section on
// that lock; nothing awaits while holding it.  The `Notify` wakes the
// device's dispatch worker.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::Notify;
use tracing::{debug, error, info, warn};

use spoolwerk_core::config::DeviceConfig;
use spoolwerk_core::error::Result;
use spoolwerk_core::types::{DeviceId, DeviceStatus, JobId, JobRequest, JobStatus, PrintJob};

use crate::device::{DeviceError, PrinterCapability};
use crate::queue::JobQueue;
use crate::resilience::{DeliveryOutcome, RetryPolicy};
use crate::state::DeviceState;

/// Point-in-time view of one device's queue.
#[derive(Debug, Clone, Serialize)]
pub struct QueueSnapshot {
    pub device_id: DeviceId,
    /// Jobs waiting with status `pending`.
    pub pending: usize,
    /// Jobs waiting with status `queued_offline`.
    pub queued_offline: usize,
    /// The job being delivered right now.
    pub processing: Option<PrintJob>,
    pub capacity: usize,
}

/// Result of a cancellation request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelOutcome {
    /// Removed from the queue before dispatch.
    Cancelled,
    /// Already handed to the device; left alone.
    AlreadyProcessing,
    /// Already in a terminal state.
    Finished(JobStatus),
    NotFound,
}

struct DeviceInner {
    queue: JobQueue,
    state: DeviceState,
    history: VecDeque<PrintJob>,
}

pub struct DeviceSlot {
    config: DeviceConfig,
    capability: Arc<dyn PrinterCapability>,
    policy: RetryPolicy,
    history_limit: usize,
    inner: Mutex<DeviceInner>,
    wake: Notify,
}

impl DeviceSlot {
    pub fn new(
        config: DeviceConfig,
        capability: Arc<dyn PrinterCapability>,
        state: DeviceState,
        history_limit: usize,
    ) -> Self {
        let queue = JobQueue::new(config.id.clone(), config.queue_capacity);
        Self {
            policy: RetryPolicy::from(&config.resilience),
            config,
            capability,
            history_limit,
            inner: Mutex::new(DeviceInner {
                queue,
                state,
                history: VecDeque::new(),
            }),
            wake: Notify::new(),
        }
    }

    pub fn id(&self) -> &DeviceId {
        &self.config.id
    }

    pub fn config(&self) -> &DeviceConfig {
        &self.config
    }

    pub fn capability(&self) -> &dyn PrinterCapability {
        self.capability.as_ref()
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    fn lock(&self) -> MutexGuard<'_, DeviceInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Wake the dispatch worker.
    pub fn wake(&self) {
        self.wake.notify_one();
    }

    /// Resolves on the next `wake`, or immediately if one is pending.
    pub async fn woken(&self) {
        self.wake.notified().await;
    }

    // -- submission -----------------------------------------------------------

    /// Admit a job. Jobs for an offline device are held straight away so
    /// their wait is bounded by the offline timeout.
    pub fn submit(&self, request: JobRequest) -> Result<JobId> {
        let mut job = PrintJob::new(self.config.id.clone(), request);
        let (id, offline) = {
            let mut inner = self.lock();
            let offline = inner.state.status == DeviceStatus::Offline;
            if offline {
                job.hold_offline(self.config.resilience.offline_queue_deadline())?;
            }
            (inner.queue.enqueue(job)?, offline)
        };
        if offline {
            info!(event = "job_queued_offline", device = %self.config.id, job_id = %id, "device offline, job held");
        } else {
            self.wake();
        }
        Ok(id)
    }

    // -- dispatch -------------------------------------------------------------

    /// Hand the head job to the caller as `Processing`, or `None` if the
    /// device is offline, busy, or has nothing queued.  Jobs held offline
    /// are only ever dispatched after a reconnect has resumed them, so any
    /// stale hold still at the head is expired first.
    pub fn next_job(&self, now: DateTime<Utc>) -> Option<PrintJob> {
        let mut inner = self.lock();
        if !inner.state.accepts_dispatch() || inner.queue.in_flight().is_some() {
            return None;
        }
        self.expire_locked(&mut inner, now);

        match inner.queue.begin_next() {
            Ok(Some(job)) => {
                inner.state.mark_busy(job.id);
                Some(job)
            }
            Ok(None) => None,
            Err(e) => {
                error!(device = %self.config.id, error = %e, "cannot dispatch head job");
                None
            }
        }
    }

    /// Publish progress of a delivery that is still retrying.
    pub fn record_attempt_failure(&self, job: &PrintJob, err: &DeviceError) {
        let mut inner = self.lock();
        if let Some(current) = inner.queue.in_flight_mut() {
            current.attempts = job.attempts;
            current.last_error = job.last_error.clone();
        }
        inner.state.record_attempt_failure(&err.to_string());
    }

    /// Settle the in-flight job.
    pub fn finish(&self, mut job: PrintJob, outcome: DeliveryOutcome) {
        let mut inner = self.lock();
        inner.queue.finish_in_flight();

        match outcome {
            DeliveryOutcome::Delivered => {
                inner.state.record_delivery(job.id);
                self.settle_locked(&mut inner, job, JobStatus::Completed);
                self.resume_locked(&mut inner);
            }
            DeliveryOutcome::Rejected(reason) => {
                inner.state.record_rejection(job.id, &reason);
                job.last_error = Some(reason);
                self.settle_locked(&mut inner, job, JobStatus::Failed);
            }
            DeliveryOutcome::Unavailable(reason) => {
                inner.state.mark_offline(&reason);
                let deadline = self.config.resilience.offline_queue_deadline();
                if let Err(e) = job.hold_offline(deadline) {
                    error!(device = %self.config.id, job_id = %job.id, error = %e, "cannot hold job offline");
                }
                info!(
                    event = "job_queued_offline",
                    device = %self.config.id,
                    job_id = %job.id,
                    attempts = job.attempts,
                    expires_at = ?job.expires_at,
                    "job held until device returns"
                );
                inner.queue.requeue_front(job);
                match inner.queue.hold_pending_offline(deadline) {
                    Ok(0) => {}
                    Ok(held) => info!(event = "job_queued_offline", device = %self.config.id, held, "waiting jobs held"),
                    Err(e) => error!(device = %self.config.id, error = %e, "cannot hold waiting jobs"),
                }
            }
        }
    }

    fn settle_locked(&self, inner: &mut DeviceInner, mut job: PrintJob, terminal: JobStatus) {
        if let Err(e) = job.transition(terminal) {
            error!(device = %self.config.id, job_id = %job.id, error = %e, "unexpected job transition");
        }
        self.archive_locked(inner, job);
    }

    fn archive_locked(&self, inner: &mut DeviceInner, job: PrintJob) {
        if self.history_limit == 0 {
            return;
        }
        while inner.history.len() >= self.history_limit {
            inner.history.pop_front();
        }
        inner.history.push_back(job);
    }

    /// Release offline holds once the device is known to answer.
    fn resume_locked(&self, inner: &mut DeviceInner) {
        match inner.queue.resume_held() {
            Ok(0) => {}
            Ok(resumed) => info!(device = %self.config.id, resumed, "held jobs resumed"),
            Err(e) => error!(device = %self.config.id, error = %e, "cannot resume held jobs"),
        }
    }

    fn expire_locked(&self, inner: &mut DeviceInner, now: DateTime<Utc>) -> usize {
        let expired = inner.queue.drain_expired(now);
        let count = expired.len();
        for job in expired {
            info!(
                event = "job_expired",
                device = %self.config.id,
                job_id = %job.id,
                attempts = job.attempts,
                "offline hold timed out"
            );
            self.archive_locked(inner, job);
        }
        count
    }

    // -- health -----------------------------------------------------------------

    /// Fold a probe result into the device state.  Ignored while a job is
    /// in flight, since the delivery outcome is the fresher signal.
    /// Returns `true` if the device came back, in which case held jobs lose
    /// their deadline and the worker is woken.
    pub fn apply_probe(&self, status: DeviceStatus) -> bool {
        let recovered = {
            let mut inner = self.lock();
            if inner.queue.in_flight().is_some() {
                debug!(device = %self.config.id, "probe result ignored during delivery");
                return false;
            }
            if status.is_online() {
                let recovered = inner.state.record_probe_success();
                if recovered {
                    self.resume_locked(&mut inner);
                }
                recovered
            } else {
                inner
                    .state
                    .record_probe_failure(&format!("probe reported {status}"));
                false
            }
        };
        if recovered {
            self.wake();
        }
        recovered
    }

    /// Expire offline-held jobs past their deadline.
    pub fn sweep(&self, now: DateTime<Utc>) -> usize {
        let mut inner = self.lock();
        self.expire_locked(&mut inner, now)
    }

    // -- queries and cancellation -------------------------------------------

    pub fn cancel(&self, job_id: JobId) -> CancelOutcome {
        let mut inner = self.lock();
        if inner.queue.in_flight().is_some_and(|job| job.id == job_id) {
            return CancelOutcome::AlreadyProcessing;
        }
        if let Some(mut job) = inner.queue.remove(job_id) {
            if let Err(e) = job.transition(JobStatus::Cancelled) {
                warn!(device = %self.config.id, job_id = %job_id, error = %e, "job cannot be cancelled");
                inner.queue.requeue_front(job);
                return CancelOutcome::AlreadyProcessing;
            }
            info!(device = %self.config.id, job_id = %job_id, "job cancelled");
            self.archive_locked(&mut inner, job);
            return CancelOutcome::Cancelled;
        }
        match inner.history.iter().rev().find(|job| job.id == job_id) {
            Some(job) => CancelOutcome::Finished(job.status),
            None => CancelOutcome::NotFound,
        }
    }

    /// A job's current record, active or recently finished.
    pub fn job(&self, job_id: JobId) -> Option<PrintJob> {
        let inner = self.lock();
        inner
            .queue
            .find(job_id)
            .or_else(|| inner.history.iter().rev().find(|job| job.id == job_id))
            .cloned()
    }

    pub fn snapshot(&self) -> QueueSnapshot {
        let inner = self.lock();
        QueueSnapshot {
            device_id: self.config.id.clone(),
            pending: inner.queue.count_with(JobStatus::Pending),
            queued_offline: inner.queue.count_with(JobStatus::QueuedOffline),
            processing: inner.queue.in_flight().cloned(),
            capacity: inner.queue.capacity(),
        }
    }

    pub fn state(&self) -> DeviceState {
        self.lock().state.clone()
    }

    pub fn status(&self) -> DeviceStatus {
        self.lock().state.status
    }

    pub fn is_delivering(&self) -> bool {
        self.lock().queue.in_flight().is_some()
    }

    /// Waiting jobs, head first.
    pub fn queued_jobs(&self) -> Vec<PrintJob> {
        self.lock().queue.iter().cloned().collect()
    }

    /// Recently finished jobs, oldest first.
    pub fn history(&self) -> Vec<PrintJob> {
        self.lock().history.iter().cloned().collect()
    }

    /// Empty the queue on deregistration.
    pub fn drain(&self) -> Vec<PrintJob> {
        self.lock().queue.clear()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::SimulatedPrinter;
    use spoolwerk_core::config::DeviceKind;
    use spoolwerk_core::types::JobContent;

    fn slot(history_limit: usize) -> DeviceSlot {
        let mut config = DeviceConfig::new(
            "label",
            DeviceKind::Simulated {
                print_delay_ms: 0,
                reachable: true,
            },
        );
        config.queue_capacity = 4;
        DeviceSlot::new(
            config,
            Arc::new(SimulatedPrinter::new()),
            DeviceState::new(DeviceId::from("label")),
            history_limit,
        )
    }

    fn request(name: &str) -> JobRequest {
        JobRequest::new(JobContent::new(name, "image/png", vec![1, 2, 3]))
    }

    #[test]
    fn exhausted_delivery_holds_job_and_waiting_jobs() {
        let slot = slot(10);
        let first = slot.submit(request("a")).expect("submit");
        let second = slot.submit(request("b")).expect("submit");

        let job = slot.next_job(Utc::now()).expect("dispatch");
        assert_eq!(job.id, first);
        assert_eq!(slot.status(), DeviceStatus::Busy);

        slot.finish(job, DeliveryOutcome::Unavailable("EIO".into()));

        assert_eq!(slot.status(), DeviceStatus::Offline);
        let queued = slot.queued_jobs();
        assert_eq!(queued.iter().map(|j| j.id).collect::<Vec<_>>(), vec![first, second]);
        assert!(queued.iter().all(|j| j.status == JobStatus::QueuedOffline));
        assert!(slot.next_job(Utc::now()).is_none(), "offline device holds its queue");

        let snapshot = slot.snapshot();
        assert_eq!(snapshot.queued_offline, 2);
        assert_eq!(snapshot.pending, 0);
    }

    #[test]
    fn offline_device_admits_jobs_as_held() {
        let slot = slot(10);
        slot.submit(request("a")).expect("submit");
        let job = slot.next_job(Utc::now()).expect("dispatch");
        slot.finish(job, DeliveryOutcome::Unavailable("gone".into()));

        let id = slot.submit(request("late")).expect("submit");
        let held = slot.job(id).expect("job");
        assert_eq!(held.status, JobStatus::QueuedOffline);
        assert_eq!(
            held.expires_at,
            Some(held.submitted_at + chrono::Duration::seconds(600))
        );
    }

    #[test]
    fn probe_recovers_offline_device_but_not_during_delivery() {
        let slot = slot(10);
        slot.submit(request("a")).expect("submit");
        let job = slot.next_job(Utc::now()).expect("dispatch");

        assert!(!slot.apply_probe(DeviceStatus::Offline));
        assert_eq!(slot.status(), DeviceStatus::Busy);

        slot.finish(job, DeliveryOutcome::Unavailable("EIO".into()));
        assert!(!slot.apply_probe(DeviceStatus::Offline));
        assert_eq!(slot.status(), DeviceStatus::Offline);

        assert!(slot.apply_probe(DeviceStatus::Ready));
        assert_eq!(slot.status(), DeviceStatus::Ready);
        assert!(slot.next_job(Utc::now()).is_some());
    }

    #[test]
    fn sweep_expires_and_archives() {
        let slot = slot(10);
        let id = slot.submit(request("a")).expect("submit");
        let job = slot.next_job(Utc::now()).expect("dispatch");
        slot.finish(job, DeliveryOutcome::Unavailable("EIO".into()));

        assert_eq!(slot.sweep(Utc::now()), 0);
        let later = Utc::now() + chrono::Duration::seconds(601);
        assert_eq!(slot.sweep(later), 1);

        assert!(slot.queued_jobs().is_empty());
        assert_eq!(slot.job(id).map(|j| j.status), Some(JobStatus::Expired));
        assert_eq!(slot.cancel(id), CancelOutcome::Finished(JobStatus::Expired));
    }

    #[test]
    fn reconnect_releases_offline_holds() {
        let slot = slot(10);
        let first = slot.submit(request("a")).expect("submit");
        let second = slot.submit(request("b")).expect("submit");
        let job = slot.next_job(Utc::now()).expect("dispatch");
        slot.finish(job, DeliveryOutcome::Unavailable("EIO".into()));
        assert_eq!(slot.snapshot().queued_offline, 2);

        assert!(slot.apply_probe(DeviceStatus::Ready));
        let queued = slot.queued_jobs();
        assert_eq!(queued.iter().map(|j| j.id).collect::<Vec<_>>(), vec![first, second]);
        assert!(queued
            .iter()
            .all(|j| j.status == JobStatus::Pending && j.expires_at.is_none()));

        // Past the old deadline, a backlog on a healthy device still drains.
        let later = Utc::now() + chrono::Duration::seconds(601);
        assert_eq!(slot.sweep(later), 0);
        let job = slot.next_job(later).expect("dispatch");
        assert_eq!(job.id, first);
        slot.finish(job, DeliveryOutcome::Delivered);
        assert_eq!(slot.job(second).map(|j| j.status), Some(JobStatus::Pending));
    }

    #[test]
    fn delivered_and_rejected_jobs_reach_history() {
        let slot = slot(10);
        let good = slot.submit(request("good")).expect("submit");
        let bad = slot.submit(request("bad")).expect("submit");

        let job = slot.next_job(Utc::now()).expect("dispatch");
        slot.finish(job, DeliveryOutcome::Delivered);
        let job = slot.next_job(Utc::now()).expect("dispatch");
        slot.finish(job, DeliveryOutcome::Rejected("bad raster".into()));

        let history = slot.history();
        assert_eq!(history.len(), 2);
        assert_eq!(slot.job(good).map(|j| j.status), Some(JobStatus::Completed));
        let failed = slot.job(bad).expect("job");
        assert_eq!(failed.status, JobStatus::Failed);
        assert_eq!(failed.last_error.as_deref(), Some("bad raster"));
        assert_eq!(slot.status(), DeviceStatus::Ready);
        assert_eq!(slot.state().last_job, Some(bad));
    }

    #[test]
    fn history_is_bounded() {
        let slot = slot(2);
        let ids: Vec<JobId> = (0..3)
            .map(|i| {
                let id = slot.submit(request(&format!("job-{i}"))).expect("submit");
                let job = slot.next_job(Utc::now()).expect("dispatch");
                slot.finish(job, DeliveryOutcome::Delivered);
                id
            })
            .collect();

        let kept: Vec<JobId> = slot.history().iter().map(|j| j.id).collect();
        assert_eq!(kept, ids[1..].to_vec());
        assert!(slot.job(ids[0]).is_none());
    }

    #[test]
    fn cancel_outcomes() {
        let slot = slot(10);
        let running = slot.submit(request("running")).expect("submit");
        let waiting = slot.submit(request("waiting")).expect("submit");
        let job = slot.next_job(Utc::now()).expect("dispatch");

        assert_eq!(slot.cancel(running), CancelOutcome::AlreadyProcessing);
        assert_eq!(slot.cancel(waiting), CancelOutcome::Cancelled);
        assert_eq!(
            slot.cancel(waiting),
            CancelOutcome::Finished(JobStatus::Cancelled)
        );
        assert_eq!(slot.cancel(JobId::new()), CancelOutcome::NotFound);

        slot.finish(job, DeliveryOutcome::Delivered);
        assert!(slot.queued_jobs().is_empty());
    }

    #[test]
    fn attempt_failures_are_visible_while_retrying() {
        let slot = slot(10);
        let id = slot.submit(request("a")).expect("submit");
        let mut job = slot.next_job(Utc::now()).expect("dispatch");
        job.attempts = 1;
        job.last_error = Some("EIO".into());

        slot.record_attempt_failure(&job, &DeviceError::Transient("EIO".into()));

        let seen = slot.job(id).expect("job");
        assert_eq!(seen.status, JobStatus::Processing);
        assert_eq!(seen.attempts, 1);
        assert_eq!(slot.status(), DeviceStatus::Error);
        assert_eq!(slot.state().consecutive_failures, 1);
    }
}

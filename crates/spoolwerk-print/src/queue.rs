// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Bounded per-device FIFO of print jobs.
//
// The queue owns every job from submission until it reaches a terminal
// state.  The job currently being delivered stays accounted for in
// `in_flight`, so returning it to the front after a failed delivery can
// never push the queue past its bound.

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use tracing::debug;

use spoolwerk_core::error::{Result, SpoolwerkError};
use spoolwerk_core::types::{DeviceId, JobId, JobStatus, PrintJob};

#[derive(Debug)]
pub struct JobQueue {
    device_id: DeviceId,
    pending: VecDeque<PrintJob>,
    in_flight: Option<PrintJob>,
    capacity: usize,
}

impl JobQueue {
    pub fn new(device_id: DeviceId, capacity: usize) -> Self {
        Self {
            device_id,
            pending: VecDeque::with_capacity(capacity.min(64)),
            in_flight: None,
            capacity,
        }
    }

    pub fn device_id(&self) -> &DeviceId {
        &self.device_id
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Waiting jobs plus the one in flight, if any.
    pub fn len(&self) -> usize {
        self.pending.len() + usize::from(self.in_flight.is_some())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Jobs waiting to be dispatched.
    pub fn waiting(&self) -> usize {
        self.pending.len()
    }

    /// Append a job. A full queue is left untouched.
    pub fn enqueue(&mut self, job: PrintJob) -> Result<JobId> {
        if self.len() >= self.capacity {
            return Err(SpoolwerkError::QueueFull {
                device: self.device_id.clone(),
                capacity: self.capacity,
            });
        }
        let id = job.id;
        self.pending.push_back(job);
        debug!(device = %self.device_id, job_id = %id, depth = self.len(), "job enqueued");
        Ok(id)
    }

    pub fn peek_next(&self) -> Option<&PrintJob> {
        self.pending.front()
    }

    /// Pop the head job into the in-flight slot as `Processing` and return
    /// a working copy for the delivery path.
    pub fn begin_next(&mut self) -> Result<Option<PrintJob>> {
        if self.in_flight.is_some() {
            return Ok(None);
        }
        let Some(mut job) = self.pending.pop_front() else {
            return Ok(None);
        };
        if let Err(e) = job.transition(JobStatus::Processing) {
            self.pending.push_front(job);
            return Err(e);
        }
        self.in_flight = Some(job.clone());
        Ok(Some(job))
    }

    pub fn in_flight(&self) -> Option<&PrintJob> {
        self.in_flight.as_ref()
    }

    pub fn in_flight_mut(&mut self) -> Option<&mut PrintJob> {
        self.in_flight.as_mut()
    }

    /// Release the in-flight slot.
    pub fn finish_in_flight(&mut self) -> Option<PrintJob> {
        self.in_flight.take()
    }

    /// Put a job back at the head. Only used for the job that just left
    /// the in-flight slot, so the bound still holds.
    pub fn requeue_front(&mut self, job: PrintJob) {
        debug!(device = %self.device_id, job_id = %job.id, status = %job.status, "job returned to head of queue");
        self.pending.push_front(job);
    }

    /// Take a waiting job out of the queue. The in-flight job is never
    /// removed this way.
    pub fn remove(&mut self, job_id: JobId) -> Option<PrintJob> {
        let index = self.pending.iter().position(|job| job.id == job_id)?;
        self.pending.remove(index)
    }

    /// Look a job up among the waiting and in-flight jobs.
    pub fn find(&self, job_id: JobId) -> Option<&PrintJob> {
        self.in_flight
            .iter()
            .chain(self.pending.iter())
            .find(|job| job.id == job_id)
    }

    /// Remove every offline-held job whose deadline has passed and return
    /// them marked `Expired`.
    pub fn drain_expired(&mut self, now: DateTime<Utc>) -> Vec<PrintJob> {
        if !self.pending.iter().any(|job| job.is_expired_at(now)) {
            return Vec::new();
        }

        let mut expired = Vec::new();
        let mut kept = VecDeque::with_capacity(self.pending.len());
        for mut job in self.pending.drain(..) {
            if job.is_expired_at(now) && job.transition(JobStatus::Expired).is_ok() {
                expired.push(job);
            } else {
                kept.push_back(job);
            }
        }
        self.pending = kept;
        expired
    }

    /// Convert every `Pending` job to `QueuedOffline`. Returns how many
    /// were converted.
    pub fn hold_pending_offline(&mut self, timeout: chrono::Duration) -> Result<usize> {
        let mut held = 0;
        for job in self.pending.iter_mut() {
            if job.status == JobStatus::Pending {
                job.hold_offline(timeout)?;
                held += 1;
            }
        }
        Ok(held)
    }

    /// Release every offline hold, keeping queue order. Returns how many
    /// jobs were resumed.
    pub fn resume_held(&mut self) -> Result<usize> {
        let mut resumed = 0;
        for job in self.pending.iter_mut() {
            if job.status == JobStatus::QueuedOffline {
                job.resume()?;
                resumed += 1;
            }
        }
        Ok(resumed)
    }

    /// Waiting jobs, head first.
    pub fn iter(&self) -> impl Iterator<Item = &PrintJob> {
        self.pending.iter()
    }

    pub fn count_with(&self, status: JobStatus) -> usize {
        self.pending.iter().filter(|job| job.status == status).count()
    }

    /// Drop everything, returning the jobs that were still queued.
    pub fn clear(&mut self) -> Vec<PrintJob> {
        self.in_flight
            .take()
            .into_iter()
            .chain(self.pending.drain(..))
            .collect()
    }
}

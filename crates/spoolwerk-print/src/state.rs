// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Availability tracking for a single device.
//
// Every transition goes through one of the `record_*` methods below, and
// those are only ever called with the device's slot lock held, so the
// dispatch worker and the health monitor cannot race each other.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, info, warn};

use spoolwerk_core::types::{DeviceId, DeviceStatus, JobId};

#[derive(Debug, Clone, Serialize)]
pub struct DeviceState {
    pub device_id: DeviceId,
    pub status: DeviceStatus,
    pub consecutive_failures: u32,
    /// Last successful probe or delivery.
    pub last_contact: Option<DateTime<Utc>>,
    /// Last job handed to the device, whatever its outcome.
    pub last_job: Option<JobId>,
    pub last_error: Option<String>,
    pub changed_at: DateTime<Utc>,
}

impl DeviceState {
    /// Freshly registered devices are assumed ready until proven otherwise.
    pub fn new(device_id: DeviceId) -> Self {
        Self {
            device_id,
            status: DeviceStatus::Ready,
            consecutive_failures: 0,
            last_contact: None,
            last_job: None,
            last_error: None,
            changed_at: Utc::now(),
        }
    }

    /// A device whose handle could not be built.
    pub fn offline(device_id: DeviceId, reason: impl Into<String>) -> Self {
        let mut state = Self::new(device_id);
        state.status = DeviceStatus::Offline;
        state.last_error = Some(reason.into());
        state
    }

    fn set(&mut self, next: DeviceStatus) -> DeviceStatus {
        let prev = self.status;
        if prev != next {
            self.status = next;
            self.changed_at = Utc::now();
            debug!(device = %self.device_id, from = %prev, to = %next, "device state changed");
        }
        prev
    }

    /// Whether the dispatch worker may hand the device a job.  Only an
    /// offline device holds its queue; `Error` still gets attempts so a
    /// job can clear it.
    pub fn accepts_dispatch(&self) -> bool {
        self.status != DeviceStatus::Offline
    }

    pub fn mark_busy(&mut self, job_id: JobId) {
        self.last_job = Some(job_id);
        self.set(DeviceStatus::Busy);
    }

    pub fn record_delivery(&mut self, job_id: JobId) {
        let prev = self.set(DeviceStatus::Ready);
        self.consecutive_failures = 0;
        self.last_contact = Some(Utc::now());
        self.last_job = Some(job_id);
        self.last_error = None;
        if prev == DeviceStatus::Offline || prev == DeviceStatus::Error {
            info!(event = "device_reconnected", device = %self.device_id, "device delivered a job and is ready again");
        }
    }

    /// The device answered but refused the job; the link itself is fine.
    pub fn record_rejection(&mut self, job_id: JobId, reason: &str) {
        self.set(DeviceStatus::Ready);
        self.consecutive_failures = 0;
        self.last_contact = Some(Utc::now());
        self.last_job = Some(job_id);
        self.last_error = Some(reason.to_string());
    }

    /// One transient delivery attempt failed.
    pub fn record_attempt_failure(&mut self, reason: &str) {
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);
        self.last_error = Some(reason.to_string());
        if self.status != DeviceStatus::Offline {
            self.set(DeviceStatus::Error);
        }
    }

    /// Retries exhausted. Returns `true` if this is a fresh transition.
    pub fn mark_offline(&mut self, reason: &str) -> bool {
        self.last_error = Some(reason.to_string());
        let prev = self.set(DeviceStatus::Offline);
        if prev != DeviceStatus::Offline {
            warn!(
                event = "device_offline",
                device = %self.device_id,
                failures = self.consecutive_failures,
                reason,
                "device marked offline"
            );
            true
        } else {
            false
        }
    }

    /// The device answered a probe. Returns `true` if it came back from
    /// `Offline` or `Error`, meaning the worker should be woken.
    pub fn record_probe_success(&mut self) -> bool {
        self.last_contact = Some(Utc::now());
        match self.status {
            DeviceStatus::Offline | DeviceStatus::Error => {
                let prev = self.set(DeviceStatus::Ready);
                self.consecutive_failures = 0;
                info!(event = "device_reconnected", device = %self.device_id, from = %prev, "device answered probe");
                true
            }
            DeviceStatus::Ready | DeviceStatus::Busy => false,
        }
    }

    /// The device did not answer a probe. `Ready` drops to `Error`
    /// immediately; `Offline` stays offline.
    pub fn record_probe_failure(&mut self, reason: &str) {
        self.last_error = Some(reason.to_string());
        match self.status {
            DeviceStatus::Ready => {
                self.consecutive_failures = self.consecutive_failures.saturating_add(1);
                self.set(DeviceStatus::Error);
                warn!(device = %self.device_id, reason, "health probe failed");
            }
            DeviceStatus::Error => {
                self.consecutive_failures = self.consecutive_failures.saturating_add(1);
            }
            DeviceStatus::Busy | DeviceStatus::Offline => {}
        }
    }
}

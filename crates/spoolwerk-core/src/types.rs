// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Core domain types for the Spoolwerk print gateway.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::error::{Result, SpoolwerkError};

/// Unique identifier for a print job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct JobId(pub Uuid);

impl JobId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Stable identifier of a physical print target (e.g. `"label"`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeviceId(String);

impl DeviceId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for DeviceId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for DeviceId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl std::fmt::Display for DeviceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Lifecycle states of a print job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Accepted, waiting in the device queue.
    Pending,
    /// Handed to the resilience layer; one or more delivery attempts.
    Processing,
    /// Held while the device is unreachable. Carries an expiry deadline.
    QueuedOffline,
    /// Delivered to the device.
    Completed,
    /// The device refused the content; never retried.
    Failed,
    /// Waited longer than the offline timeout.
    Expired,
    /// Removed by the caller before dispatch.
    Cancelled,
}

impl JobStatus {
    /// Whether the job has left the active queue for good.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::Completed | Self::Failed | Self::Expired | Self::Cancelled
        )
    }

    /// Allowed forward transitions. A held job is resumed to `Pending`
    /// when its device answers again.
    pub fn can_transition_to(self, next: JobStatus) -> bool {
        use JobStatus::*;
        matches!(
            (self, next),
            (Pending, Processing)
                | (Pending, QueuedOffline)
                | (Pending, Cancelled)
                | (Processing, Completed)
                | (Processing, Failed)
                | (Processing, QueuedOffline)
                | (QueuedOffline, Processing)
                | (QueuedOffline, Pending)
                | (QueuedOffline, Expired)
                | (QueuedOffline, Cancelled)
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::QueuedOffline => "queued_offline",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Expired => "expired",
            Self::Cancelled => "cancelled",
        }
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Availability of a device as seen by the gateway.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceStatus {
    /// Reachable and idle.
    Ready,
    /// A job is in flight.
    Busy,
    /// Retries exhausted or the handle could not be built. Jobs are held.
    Offline,
    /// A probe or delivery attempt failed; not yet given up on.
    Error,
}

impl DeviceStatus {
    /// Whether the device answered its last contact.
    pub fn is_online(self) -> bool {
        matches!(self, Self::Ready | Self::Busy)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Ready => "ready",
            Self::Busy => "busy",
            Self::Offline => "offline",
            Self::Error => "error",
        }
    }
}

impl std::fmt::Display for DeviceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Reference to an already-validated payload.
///
/// The bytes are shared, so cloning a job never copies the document.
#[derive(Debug, Clone, Serialize)]
pub struct JobContent {
    /// Original filename, used as the job name on spoolers.
    pub name: String,
    /// MIME type reported by the validation layer.
    pub content_type: String,
    /// SHA-256 of `data`, hex-encoded.
    pub digest: String,
    #[serde(skip_serializing)]
    pub data: Arc<[u8]>,
}

impl JobContent {
    pub fn new(name: impl Into<String>, content_type: impl Into<String>, data: Vec<u8>) -> Self {
        let digest = hex::encode(Sha256::digest(&data));
        Self {
            name: name.into(),
            content_type: content_type.into(),
            digest,
            data: Arc::from(data),
        }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// Upper bound on copies per job.
pub const MAX_COPIES: u32 = 999;

/// What a caller hands to `submit`: validated content plus print options.
#[derive(Debug, Clone)]
pub struct JobRequest {
    pub content: JobContent,
    pub copies: u32,
}

impl JobRequest {
    pub fn new(content: JobContent) -> Self {
        Self { content, copies: 1 }
    }

    /// Copy count, clamped to `1..=MAX_COPIES`.
    pub fn with_copies(mut self, copies: u32) -> Self {
        self.copies = copies.clamp(1, MAX_COPIES);
        self
    }
}

/// A print job as tracked by the gateway.
#[derive(Debug, Clone, Serialize)]
pub struct PrintJob {
    pub id: JobId,
    pub device_id: DeviceId,
    pub content: JobContent,
    pub copies: u32,
    pub status: JobStatus,
    pub submitted_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Delivery attempts made so far, across offline cycles.
    pub attempts: u32,
    /// Only set while the job is (or was last) `QueuedOffline`.
    pub expires_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

impl PrintJob {
    pub fn new(device_id: DeviceId, request: JobRequest) -> Self {
        let now = Utc::now();
        Self {
            id: JobId::new(),
            device_id,
            content: request.content,
            copies: request.copies.clamp(1, MAX_COPIES),
            status: JobStatus::Pending,
            submitted_at: now,
            updated_at: now,
            attempts: 0,
            expires_at: None,
            last_error: None,
        }
    }

    /// Move to `next`, rejecting anything the lifecycle does not allow.
    pub fn transition(&mut self, next: JobStatus) -> Result<()> {
        if !self.status.can_transition_to(next) {
            return Err(SpoolwerkError::InvalidTransition {
                from: self.status,
                to: next,
            });
        }
        self.status = next;
        self.updated_at = Utc::now();
        Ok(())
    }

    /// Hold the job while its device is unreachable. The deadline is
    /// measured from submission, not from the moment the device dropped.
    pub fn hold_offline(&mut self, timeout: chrono::Duration) -> Result<()> {
        self.transition(JobStatus::QueuedOffline)?;
        self.expires_at = Some(
            self.submitted_at
                .checked_add_signed(timeout)
                .unwrap_or(DateTime::<Utc>::MAX_UTC),
        );
        Ok(())
    }

    /// Release an offline hold once the device is back. The job waits as
    /// `Pending` again and no longer has a deadline.
    pub fn resume(&mut self) -> Result<()> {
        self.transition(JobStatus::Pending)?;
        self.expires_at = None;
        Ok(())
    }

    /// Whether an offline hold has run past its deadline.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.status == JobStatus::QueuedOffline && self.expires_at.is_some_and(|at| at <= now)
    }
}

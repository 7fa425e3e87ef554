// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Unified error types for Spoolwerk.

use thiserror::Error;

use crate::types::{DeviceId, JobId, JobStatus};

/// Top-level error type for all Spoolwerk operations.
///
/// Device-level delivery failures are not represented here: transient faults
/// are absorbed by the resilience layer, and unavailability or expiry only
/// ever show up through status queries.
#[derive(Debug, Error)]
pub enum SpoolwerkError {
    // -- Submission / routing --
    #[error("queue for device {device} is full ({capacity} jobs)")]
    QueueFull { device: DeviceId, capacity: usize },

    #[error("unknown device: {0}")]
    UnknownDevice(DeviceId),

    #[error("device already registered: {0}")]
    DuplicateDevice(DeviceId),

    #[error("job not found: {0}")]
    JobNotFound(JobId),

    // -- Lifecycle --
    #[error("invalid job transition: {from:?} -> {to:?}")]
    InvalidTransition { from: JobStatus, to: JobStatus },

    // -- Configuration --
    #[error("configuration error: {0}")]
    Config(String),

    #[error("file I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, SpoolwerkError>;

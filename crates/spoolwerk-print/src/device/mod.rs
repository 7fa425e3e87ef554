// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Printer capability boundary.
//
// The engine only ever talks to a device through `PrinterCapability`:
// probe it, hand it a job, or ask it to drop and re-acquire its handle.
// Variants are a closed set chosen from the tagged `DeviceKind` config value.

pub mod direct;
pub mod simulated;
pub mod spooled;

use std::io;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tracing::warn;

use spoolwerk_core::config::DeviceKind;
use spoolwerk_core::types::{DeviceStatus, PrintJob};

pub use direct::DirectPrinter;
pub use simulated::{SimOutcome, SimulatedPrinter};
pub use spooled::SpooledPrinter;

/// Failure reported by a device handle.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DeviceError {
    /// Communication fault that a reconnect and retry may clear.
    #[error("transient device failure: {0}")]
    Transient(String),

    /// The device refused the job itself. Retrying will not help.
    #[error("device rejected job: {0}")]
    Rejected(String),

    /// The device could not be located.
    #[error("device not found: {0}")]
    NotFound(String),
}

impl DeviceError {
    /// Whether the resilience layer should rediscover and retry.
    ///
    /// A missing device counts: USB printers vanish while asleep or during
    /// re-enumeration and come back moments later.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_) | Self::NotFound(_))
    }

    /// Classify an I/O error raised while talking to a device.
    pub fn from_io(context: &str, err: io::Error) -> Self {
        if err.kind() == io::ErrorKind::NotFound || err.raw_os_error() == Some(ENODEV) {
            Self::NotFound(format!("{context}: {err}"))
        } else if is_recoverable_io(&err) {
            Self::Transient(format!("{context}: {err}"))
        } else {
            Self::Rejected(format!("{context}: {err}"))
        }
    }
}

/// No such device.
const ENODEV: i32 = 19;

/// Errno values that show up when a USB printer drops off the bus or a
/// spooler stops answering.
const RECOVERABLE_ERRNO: &[i32] = &[
    5,   // EIO
    6,   // ENXIO
    ENODEV,
    110, // ETIMEDOUT
    121, // EREMOTEIO
];

/// Driver/backend messages that mean "reconnect and try again".
const RECOVERABLE_MESSAGES: &[&str] = &[
    "no backend",
    "device not found",
    "i/o error",
    "input/output error",
    "resource busy",
    "pipe error",
    "could not open",
    "no such device",
    "usb error",
    "endpoint halted",
    "operation timed out",
];

/// Whether an I/O error is worth a reconnect.  Anything unrecognised is
/// treated as permanent so a bad job cannot loop through retries.
pub fn is_recoverable_io(err: &io::Error) -> bool {
    if err
        .raw_os_error()
        .is_some_and(|code| RECOVERABLE_ERRNO.contains(&code))
    {
        return true;
    }

    if matches!(
        err.kind(),
        io::ErrorKind::TimedOut
            | io::ErrorKind::ConnectionRefused
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::NotConnected
            | io::ErrorKind::BrokenPipe
            | io::ErrorKind::UnexpectedEof
            | io::ErrorKind::Interrupted
            | io::ErrorKind::NotFound
    ) {
        return true;
    }

    // Wrapped errors: check the message and every source in the chain.
    if message_is_recoverable(&err.to_string()) {
        return true;
    }
    let mut current = err
        .get_ref()
        .map(|e| e as &(dyn std::error::Error + 'static));
    while let Some(inner) = current {
        if message_is_recoverable(&inner.to_string()) {
            return true;
        }
        current = inner.source();
    }
    false
}

fn message_is_recoverable(msg: &str) -> bool {
    let lower = msg.to_ascii_lowercase();
    RECOVERABLE_MESSAGES.iter().any(|phrase| lower.contains(phrase))
}

/// What the engine needs from a device.
#[async_trait]
pub trait PrinterCapability: Send + Sync {
    /// Probe reachability without submitting anything.
    async fn status(&self) -> DeviceStatus;

    /// Transmit one job. Only ever called by the device's dispatch worker,
    /// so implementations never see two concurrent submissions.
    async fn submit(&self, job: &PrintJob) -> Result<(), DeviceError>;

    /// Drop the current handle and locate the device again.
    async fn rediscover(&self) -> Result<(), DeviceError>;
}

/// The closed set of device variants.
pub enum Printer {
    Simulated(SimulatedPrinter),
    Direct(DirectPrinter),
    Spooled(SpooledPrinter),
    /// A device whose handle could not be built. Always offline.
    Detached { reason: String },
}

impl Printer {
    /// Build the variant named by the config tag.
    pub fn from_kind(kind: &DeviceKind) -> Result<Self, DeviceError> {
        match kind {
            DeviceKind::Simulated {
                print_delay_ms,
                reachable,
            } => {
                let printer = SimulatedPrinter::new()
                    .with_delay(Duration::from_millis(*print_delay_ms));
                printer.set_reachable(*reachable);
                Ok(Self::Simulated(printer))
            }
            DeviceKind::Direct { path } => Ok(Self::Direct(DirectPrinter::new(path)?)),
            DeviceKind::Spooled {
                host,
                port,
                protocol,
                queue,
                connect_timeout_secs,
            } => {
                let timeout = Duration::try_from_secs_f64(*connect_timeout_secs)
                    .unwrap_or(spooled::DEFAULT_CONNECT_TIMEOUT);
                Ok(Self::Spooled(SpooledPrinter::new(
                    host,
                    port.unwrap_or_else(|| protocol.default_port()),
                    *protocol,
                    queue,
                    timeout,
                )?))
            }
        }
    }

    /// Like `from_kind`, but a handle that cannot be built degrades to a
    /// detached device instead of failing registration.
    pub fn open(kind: &DeviceKind) -> Self {
        match Self::from_kind(kind) {
            Ok(printer) => printer,
            Err(e) => {
                warn!(adapter = kind.adapter_name(), error = %e, "device handle unavailable, detaching");
                Self::Detached {
                    reason: e.to_string(),
                }
            }
        }
    }

    pub fn is_detached(&self) -> bool {
        matches!(self, Self::Detached { .. })
    }
}

#[async_trait]
impl PrinterCapability for Printer {
    async fn status(&self) -> DeviceStatus {
        match self {
            Self::Simulated(p) => p.status().await,
            Self::Direct(p) => p.status().await,
            Self::Spooled(p) => p.status().await,
            Self::Detached { .. } => DeviceStatus::Offline,
        }
    }

    async fn submit(&self, job: &PrintJob) -> Result<(), DeviceError> {
        match self {
            Self::Simulated(p) => p.submit(job).await,
            Self::Direct(p) => p.submit(job).await,
            Self::Spooled(p) => p.submit(job).await,
            Self::Detached { reason } => Err(DeviceError::NotFound(reason.clone())),
        }
    }

    async fn rediscover(&self) -> Result<(), DeviceError> {
        match self {
            Self::Simulated(p) => p.rediscover().await,
            Self::Direct(p) => p.rediscover().await,
            Self::Spooled(p) => p.rediscover().await,
            Self::Detached { reason } => Err(DeviceError::NotFound(reason.clone())),
        }
    }
}

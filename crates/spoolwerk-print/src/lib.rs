// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Spoolwerk Print: per-device job queues, the dispatch workers that drain
// them, delivery retry and reconnect, health probing, offline-hold expiry,
// and the device transports themselves.

pub mod device;
mod dispatch;
pub mod engine;
pub mod expiry;
pub mod health;
pub mod queue;
pub mod resilience;
pub mod slot;
pub mod state;

pub use device::{DeviceError, Printer, PrinterCapability, SimOutcome, SimulatedPrinter};
pub use engine::PrintEngine;
pub use queue::JobQueue;
pub use resilience::{DeliveryOutcome, RetryPolicy};
pub use slot::{CancelOutcome, QueueSnapshot};
pub use state::DeviceState;

// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Periodic reachability probe per device.
//
// The probe never submits a job.  A device that answers after being
// offline or in error is flipped back to ready and its worker is woken;
// one that stops answering while ready drops to error straight away.

use std::sync::Arc;

use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info};

use spoolwerk_core::types::DeviceStatus;

use crate::slot::DeviceSlot;

/// Probe once and fold the result into the device state.  Returns `None`
/// when a delivery is in progress and the probe was skipped.
pub async fn probe_once(slot: &DeviceSlot) -> Option<DeviceStatus> {
    if slot.is_delivering() {
        debug!(device = %slot.id(), "delivery in progress, probe skipped");
        return None;
    }
    let observed = slot.capability().status().await;
    let recovered = slot.apply_probe(observed);
    debug!(device = %slot.id(), %observed, recovered, "health probe");
    Some(observed)
}

pub(crate) async fn run_monitor(slot: Arc<DeviceSlot>, mut shutdown: watch::Receiver<bool>) {
    let period = slot.config().resilience.health_check_interval();
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    info!(device = %slot.id(), period_ms = period.as_millis() as u64, "health monitor started");

    loop {
        tokio::select! {
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
            _ = ticker.tick() => {
                probe_once(&slot).await;
            }
        }
    }

    info!(device = %slot.id(), "health monitor stopped");
}

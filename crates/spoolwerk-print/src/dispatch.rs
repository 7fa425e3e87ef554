// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Dispatch worker: the only task that submits to a device.
//
// One worker runs per device, so at most one job is ever in flight to a
// capability handle.  The worker parks on the slot's `Notify` whenever the
// queue is empty or the device is offline, and is woken by new submissions
// and by the health monitor when the device comes back.

use std::sync::Arc;

use chrono::Utc;
use tokio::sync::watch;
use tracing::{debug, info};

use spoolwerk_core::types::PrintJob;

use crate::resilience::{self, DeliveryOutcome};
use crate::slot::DeviceSlot;

pub(crate) async fn run_worker(slot: Arc<DeviceSlot>, mut shutdown: watch::Receiver<bool>) {
    info!(device = %slot.id(), "dispatch worker started");

    loop {
        if *shutdown.borrow() {
            break;
        }

        let Some(job) = slot.next_job(Utc::now()) else {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
                _ = slot.woken() => {}
            }
            continue;
        };

        let outcome = dispatch_one(&slot, job).await;
        debug!(device = %slot.id(), ?outcome, "dispatch finished");
    }

    info!(device = %slot.id(), "dispatch worker stopped");
}

/// Run one job through the retry loop and settle it. Shutdown does not
/// interrupt a delivery that has started.
async fn dispatch_one(slot: &DeviceSlot, mut job: PrintJob) -> DeliveryOutcome {
    let outcome = resilience::deliver(slot.capability(), &mut job, slot.policy(), |job, err| {
        slot.record_attempt_failure(job, err)
    })
    .await;
    slot.finish(job, outcome.clone());
    outcome
}

// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Global sweeper for offline-held jobs that waited too long.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info};

use crate::slot::DeviceSlot;

/// Expire stale jobs on every device. Returns the number expired.
pub fn sweep_all(slots: &[Arc<DeviceSlot>], now: DateTime<Utc>) -> usize {
    slots.iter().map(|slot| slot.sweep(now)).sum()
}

pub(crate) async fn run_sweeper<F>(period: Duration, slots: F, mut shutdown: watch::Receiver<bool>)
where
    F: Fn() -> Vec<Arc<DeviceSlot>> + Send,
{
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    info!(period_ms = period.as_millis() as u64, "expiry sweeper started");

    loop {
        tokio::select! {
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
            _ = ticker.tick() => {
                let expired = sweep_all(&slots(), Utc::now());
                if expired > 0 {
                    debug!(expired, "sweep pass");
                }
            }
        }
    }

    info!("expiry sweeper stopped");
}

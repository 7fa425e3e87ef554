// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Print engine facade.
//
// Owns the device registry and the background tasks: one dispatch worker
// and one health monitor per registered device, plus a single expiry
// sweeper.  Callers only ever see job ids, statuses, and snapshots.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use chrono::Utc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info, instrument, warn};

use spoolwerk_core::config::{DeviceConfig, EngineConfig};
use spoolwerk_core::error::{Result, SpoolwerkError};
use spoolwerk_core::types::{DeviceId, DeviceStatus, JobId, JobRequest, PrintJob};

use crate::device::{Printer, PrinterCapability};
use crate::slot::{CancelOutcome, DeviceSlot, QueueSnapshot};
use crate::state::DeviceState;
use crate::{dispatch, expiry, health};

struct DeviceEntry {
    slot: Arc<DeviceSlot>,
    stop: watch::Sender<bool>,
    tasks: Vec<JoinHandle<()>>,
}

impl DeviceEntry {
    async fn stop(self) {
        let _ = self.stop.send(true);
        for task in self.tasks {
            let _ = task.await;
        }
    }
}

#[derive(Default)]
struct Registry {
    devices: RwLock<HashMap<DeviceId, DeviceEntry>>,
}

impl Registry {
    fn slot(&self, id: &DeviceId) -> Result<Arc<DeviceSlot>> {
        self.devices
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(id)
            .map(|entry| Arc::clone(&entry.slot))
            .ok_or_else(|| SpoolwerkError::UnknownDevice(id.clone()))
    }

    fn slots(&self) -> Vec<Arc<DeviceSlot>> {
        self.devices
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .map(|entry| Arc::clone(&entry.slot))
            .collect()
    }
}

pub struct PrintEngine {
    config: EngineConfig,
    registry: Arc<Registry>,
    shutdown_tx: watch::Sender<bool>,
    sweeper: Mutex<Option<JoinHandle<()>>>,
}

impl PrintEngine {
    /// Create the engine and spawn the expiry sweeper. Must be called from
    /// within a Tokio runtime.
    pub fn start(config: EngineConfig) -> Self {
        let registry = Arc::new(Registry::default());
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let sweep_registry = Arc::clone(&registry);
        let sweeper = tokio::spawn(expiry::run_sweeper(
            config.sweep_interval(),
            move || sweep_registry.slots(),
            shutdown_rx,
        ));

        info!(
            sweep_interval_secs = config.sweep_interval_secs,
            history_limit = config.history_limit,
            "print engine started"
        );
        Self {
            config,
            registry,
            shutdown_tx,
            sweeper: Mutex::new(Some(sweeper)),
        }
    }

    // -- registration ---------------------------------------------------------

    /// Register a device with an explicit capability handle.
    #[instrument(skip(self, config, capability), fields(device = %config.id))]
    pub fn register(
        &self,
        config: DeviceConfig,
        capability: Arc<dyn PrinterCapability>,
    ) -> Result<()> {
        let state = DeviceState::new(config.id.clone());
        self.install(config, capability, state)
    }

    /// Register a device, building its handle from the config tag.  A
    /// handle that cannot be built leaves the device registered but
    /// permanently offline.
    #[instrument(skip(self, config), fields(device = %config.id, adapter = config.connection.adapter_name()))]
    pub fn register_from_config(&self, config: DeviceConfig) -> Result<()> {
        let printer = Printer::open(&config.connection);
        let state = match &printer {
            Printer::Detached { reason } => {
                warn!(event = "device_offline", reason = %reason, "device registered detached");
                DeviceState::offline(config.id.clone(), reason.clone())
            }
            _ => DeviceState::new(config.id.clone()),
        };
        self.install(config, Arc::new(printer), state)
    }

    fn install(
        &self,
        config: DeviceConfig,
        capability: Arc<dyn PrinterCapability>,
        state: DeviceState,
    ) -> Result<()> {
        config.validate()?;

        let mut devices = self
            .registry
            .devices
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        if devices.contains_key(&config.id) {
            return Err(SpoolwerkError::DuplicateDevice(config.id));
        }

        let id = config.id.clone();
        let name = config.display_name().to_string();
        let slot = Arc::new(DeviceSlot::new(
            config,
            capability,
            state,
            self.config.history_limit,
        ));

        let (stop, stop_rx) = watch::channel(false);
        let tasks = vec![
            tokio::spawn(dispatch::run_worker(Arc::clone(&slot), stop_rx.clone())),
            tokio::spawn(health::run_monitor(Arc::clone(&slot), stop_rx)),
        ];

        info!(device = %id, name = %name, status = %slot.status(), "device registered");
        devices.insert(id, DeviceEntry { slot, stop, tasks });
        Ok(())
    }

    /// Stop a device's tasks and discard whatever it still had queued.
    #[instrument(skip(self))]
    pub async fn deregister(&self, device_id: &DeviceId) -> Result<()> {
        let entry = self
            .registry
            .devices
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(device_id)
            .ok_or_else(|| SpoolwerkError::UnknownDevice(device_id.clone()))?;

        let slot = Arc::clone(&entry.slot);
        entry.stop().await;

        let dropped = slot.drain();
        if !dropped.is_empty() {
            warn!(device = %device_id, dropped = dropped.len(), "discarding queued jobs");
        }
        info!(device = %device_id, "device deregistered");
        Ok(())
    }

    /// Registered device ids, sorted.
    pub fn devices(&self) -> Vec<DeviceId> {
        let mut ids: Vec<DeviceId> = self
            .registry
            .devices
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        ids.sort();
        ids
    }

    // -- jobs -------------------------------------------------------------------

    /// Queue a job. Returns as soon as the job is admitted.
    #[instrument(skip(self, request), fields(bytes = request.content.len(), copies = request.copies))]
    pub fn submit(&self, device_id: &DeviceId, request: JobRequest) -> Result<JobId> {
        self.registry.slot(device_id)?.submit(request)
    }

    /// A job's current record, queued or recently finished.
    pub fn job_status(&self, job_id: JobId) -> Result<PrintJob> {
        self.registry
            .slots()
            .iter()
            .find_map(|slot| slot.job(job_id))
            .ok_or(SpoolwerkError::JobNotFound(job_id))
    }

    /// Cancel a queued job.
    #[instrument(skip(self))]
    pub fn try_cancel(&self, job_id: JobId) -> CancelOutcome {
        for slot in self.registry.slots() {
            match slot.cancel(job_id) {
                CancelOutcome::NotFound => continue,
                outcome => return outcome,
            }
        }
        CancelOutcome::NotFound
    }

    /// `true` only if the job was removed before dispatch.
    pub fn cancel(&self, job_id: JobId) -> bool {
        self.try_cancel(job_id) == CancelOutcome::Cancelled
    }

    // -- devices ----------------------------------------------------------------

    pub fn status(&self, device_id: &DeviceId) -> Result<DeviceStatus> {
        Ok(self.registry.slot(device_id)?.status())
    }

    pub fn device_state(&self, device_id: &DeviceId) -> Result<DeviceState> {
        Ok(self.registry.slot(device_id)?.state())
    }

    pub fn queue_snapshot(&self, device_id: &DeviceId) -> Result<QueueSnapshot> {
        Ok(self.registry.slot(device_id)?.snapshot())
    }

    /// Jobs still waiting for a device, head first.
    pub fn queued_jobs(&self, device_id: &DeviceId) -> Result<Vec<PrintJob>> {
        Ok(self.registry.slot(device_id)?.queued_jobs())
    }

    /// Recently finished jobs for a device, oldest first.
    pub fn history(&self, device_id: &DeviceId) -> Result<Vec<PrintJob>> {
        Ok(self.registry.slot(device_id)?.history())
    }

    /// Probe a device now instead of waiting for its monitor.
    pub async fn probe_now(&self, device_id: &DeviceId) -> Result<DeviceStatus> {
        let slot = self.registry.slot(device_id)?;
        Ok(health::probe_once(&slot).await.unwrap_or_else(|| slot.status()))
    }

    /// Run an expiry pass now. Returns the number of jobs expired.
    pub fn sweep_now(&self) -> usize {
        expiry::sweep_all(&self.registry.slots(), Utc::now())
    }

    /// Stop every background task. Deliveries already in progress run to
    /// completion first.
    pub async fn shutdown(&self) {
        info!("print engine shutting down");
        let _ = self.shutdown_tx.send(true);

        let entries: Vec<DeviceEntry> = self
            .registry
            .devices
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .drain()
            .map(|(_, entry)| entry)
            .collect();
        for entry in entries {
            let id = entry.slot.id().clone();
            let waiting = entry.slot.snapshot();
            entry.stop().await;
            if waiting.pending + waiting.queued_offline > 0 {
                warn!(
                    device = %id,
                    pending = waiting.pending,
                    queued_offline = waiting.queued_offline,
                    "jobs left undelivered at shutdown"
                );
            }
        }

        let sweeper = self
            .sweeper
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(sweeper) = sweeper {
            let _ = sweeper.await;
        }
        info!("print engine stopped");
    }
}

// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Directly attached printer (USB line printer node such as /dev/usb/lp0).
//
// A handle is opened per submission and closed afterwards, so a printer
// that re-enumerates under a new node number can be adopted by
// `rediscover` without tearing anything else down.

use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;
use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

use spoolwerk_core::types::{DeviceStatus, PrintJob};

use super::{DeviceError, PrinterCapability};

pub struct DirectPrinter {
    configured: PathBuf,
    current: Mutex<PathBuf>,
}

impl DirectPrinter {
    pub fn new(path: impl Into<PathBuf>) -> Result<Self, DeviceError> {
        let configured = path.into();
        if configured.as_os_str().is_empty() {
            return Err(DeviceError::NotFound("no device path configured".into()));
        }
        Ok(Self {
            current: Mutex::new(configured.clone()),
            configured,
        })
    }

    /// The node submissions currently go to.
    pub fn current_path(&self) -> PathBuf {
        self.current
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn adopt(&self, path: PathBuf) {
        let mut current = self.current.lock().unwrap_or_else(PoisonError::into_inner);
        if *current != path {
            info!(from = %current.display(), to = %path.display(), "device node changed");
            *current = path;
        }
    }

    async fn open(&self) -> Result<tokio::fs::File, DeviceError> {
        let path = self.current_path();
        OpenOptions::new()
            .write(true)
            .append(true)
            .open(&path)
            .await
            .map_err(|e| DeviceError::from_io(&format!("open {}", path.display()), e))
    }
}

/// `lp0` -> `lp`, `usb-printer` -> `usb-printer`.
fn node_prefix(path: &Path) -> Option<String> {
    let name = path.file_name()?.to_str()?;
    let prefix = name.trim_end_matches(|c: char| c.is_ascii_digit());
    (!prefix.is_empty()).then(|| prefix.to_string())
}

/// Sibling nodes that share the configured node's prefix.
async fn sibling_nodes(configured: &Path) -> Vec<PathBuf> {
    let (Some(dir), Some(prefix)) = (configured.parent(), node_prefix(configured)) else {
        return Vec::new();
    };
    let mut entries = match tokio::fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(e) => {
            debug!(dir = %dir.display(), error = %e, "cannot scan for device nodes");
            return Vec::new();
        }
    };

    let mut found = Vec::new();
    while let Ok(Some(entry)) = entries.next_entry().await {
        let path = entry.path();
        if node_prefix(&path).as_deref() == Some(prefix.as_str()) {
            found.push(path);
        }
    }
    found.sort();
    found
}

#[async_trait]
impl PrinterCapability for DirectPrinter {
    async fn status(&self) -> DeviceStatus {
        match self.open().await {
            Ok(_) => DeviceStatus::Ready,
            Err(e) => {
                debug!(error = %e, "direct device probe failed");
                DeviceStatus::Offline
            }
        }
    }

    async fn submit(&self, job: &PrintJob) -> Result<(), DeviceError> {
        let mut file = self.open().await?;
        for _ in 0..job.copies {
            file.write_all(&job.content.data)
                .await
                .map_err(|e| DeviceError::from_io("write", e))?;
        }
        file.flush()
            .await
            .map_err(|e| DeviceError::from_io("flush", e))?;
        debug!(job_id = %job.id, bytes = job.content.len(), copies = job.copies, "wrote job to device node");
        Ok(())
    }

    async fn rediscover(&self) -> Result<(), DeviceError> {
        let current = self.current_path();
        if tokio::fs::try_exists(&current).await.unwrap_or(false) {
            return Ok(());
        }
        if tokio::fs::try_exists(&self.configured).await.unwrap_or(false) {
            self.adopt(self.configured.clone());
            return Ok(());
        }

        let mut candidates = sibling_nodes(&self.configured).await;
        match candidates.len() {
            1 => {
                self.adopt(candidates.remove(0));
                Ok(())
            }
            0 => Err(DeviceError::NotFound(format!(
                "{} is gone and no replacement node exists",
                self.configured.display()
            ))),
            n => {
                warn!(candidates = n, "several candidate device nodes, refusing to guess");
                Err(DeviceError::NotFound(format!(
                    "{} is gone and {n} candidate nodes exist",
                    self.configured.display()
                )))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use spoolwerk_core::types::{DeviceId, JobContent, JobRequest};

    fn test_job(copies: u32) -> PrintJob {
        let content = JobContent::new("ticket.txt", "text/plain", b"HELLO\n".to_vec());
        PrintJob::new(
            DeviceId::from("usb"),
            JobRequest::new(content).with_copies(copies),
        )
    }

    #[test]
    fn prefix_strips_node_number() {
        assert_eq!(node_prefix(Path::new("/dev/usb/lp0")).as_deref(), Some("lp"));
        assert_eq!(node_prefix(Path::new("/dev/usb/lp12")).as_deref(), Some("lp"));
        assert_eq!(node_prefix(Path::new("/dev/123")), None);
    }

    #[tokio::test]
    async fn writes_every_copy() {
        let dir = tempfile::tempdir().expect("tempdir");
        let node = dir.path().join("lp0");
        std::fs::write(&node, b"").expect("create node");

        let printer = DirectPrinter::new(&node).expect("printer");
        assert_eq!(printer.status().await, DeviceStatus::Ready);
        printer.submit(&test_job(2)).await.expect("submit");

        assert_eq!(std::fs::read(&node).expect("read"), b"HELLO\nHELLO\n");
    }

    #[tokio::test]
    async fn missing_node_is_offline_and_not_found() {
        let dir = tempfile::tempdir().expect("tempdir");
        let printer = DirectPrinter::new(dir.path().join("lp0")).expect("printer");

        assert_eq!(printer.status().await, DeviceStatus::Offline);
        assert!(matches!(
            printer.submit(&test_job(1)).await,
            Err(DeviceError::NotFound(_))
        ));
        assert!(matches!(
            printer.rediscover().await,
            Err(DeviceError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn rediscover_adopts_renumbered_node() {
        let dir = tempfile::tempdir().expect("tempdir");
        let printer = DirectPrinter::new(dir.path().join("lp0")).expect("printer");

        let renumbered = dir.path().join("lp1");
        std::fs::write(&renumbered, b"").expect("create node");

        printer.rediscover().await.expect("rediscover");
        assert_eq!(printer.current_path(), renumbered);
        printer.submit(&test_job(1)).await.expect("submit");
        assert_eq!(std::fs::read(&renumbered).expect("read"), b"HELLO\n");
    }

    #[tokio::test]
    async fn rediscover_refuses_ambiguous_nodes() {
        let dir = tempfile::tempdir().expect("tempdir");
        let printer = DirectPrinter::new(dir.path().join("lp0")).expect("printer");
        std::fs::write(dir.path().join("lp1"), b"").expect("create node");
        std::fs::write(dir.path().join("lp2"), b"").expect("create node");

        assert!(printer.rediscover().await.is_err());
        assert_eq!(printer.current_path(), dir.path().join("lp0"));
    }
}

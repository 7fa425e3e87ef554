// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Network spooler transport: LPR/LPD (RFC 1179, port 515) or raw
// JetDirect-style TCP (port 9100).
//
// Each submission opens its own connection.  The resolved address is cached
// and only re-resolved by `rediscover`, so a printer that picked up a new
// DHCP lease is found again after the first reconnect.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::{debug, info};

use spoolwerk_core::config::SpoolProtocol;
use spoolwerk_core::types::{DeviceStatus, PrintJob};

use super::{DeviceError, PrinterCapability};

pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Name this gateway announces in LPR control files.
const LPR_HOSTNAME: &str = "spoolwerk";

/// Raw transfers are written in 8 KiB chunks.
const RAW_CHUNK: usize = 8192;

pub struct SpooledPrinter {
    host: String,
    port: u16,
    protocol: SpoolProtocol,
    queue: String,
    timeout: Duration,
    addr: Mutex<Option<SocketAddr>>,
    next_job: AtomicU32,
}

impl SpooledPrinter {
    pub fn new(
        host: &str,
        port: u16,
        protocol: SpoolProtocol,
        queue: &str,
        timeout: Duration,
    ) -> Result<Self, DeviceError> {
        if host.trim().is_empty() {
            return Err(DeviceError::NotFound("no spooler host configured".into()));
        }
        Ok(Self {
            host: host.trim().to_string(),
            port,
            protocol,
            queue: queue.to_string(),
            timeout,
            addr: Mutex::new(None),
            next_job: AtomicU32::new(0),
        })
    }

    pub fn endpoint(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Next LPD job number. These are three digits and wrap after 999.
    fn next_job_number(&self) -> u16 {
        let n = self.next_job.fetch_add(1, Ordering::Relaxed);
        (n % 999 + 1) as u16
    }

    fn cached_addr(&self) -> Option<SocketAddr> {
        *self.addr.lock().unwrap_or_else(PoisonError::into_inner)
    }

    async fn resolve(&self) -> Result<SocketAddr, DeviceError> {
        let endpoint = self.endpoint();
        let mut addrs = tokio::net::lookup_host(&endpoint)
            .await
            .map_err(|e| DeviceError::from_io(&format!("resolve {endpoint}"), e))?;
        let addr = addrs
            .next()
            .ok_or_else(|| DeviceError::NotFound(format!("{endpoint} did not resolve")))?;
        *self.addr.lock().unwrap_or_else(PoisonError::into_inner) = Some(addr);
        Ok(addr)
    }

    async fn connect(&self) -> Result<TcpStream, DeviceError> {
        let addr = match self.cached_addr() {
            Some(addr) => addr,
            None => self.resolve().await?,
        };
        tokio::time::timeout(self.timeout, TcpStream::connect(addr))
            .await
            .map_err(|_| {
                DeviceError::Transient(format!(
                    "connect to {addr} timed out after {:?}",
                    self.timeout
                ))
            })?
            .map_err(|e| DeviceError::from_io(&format!("connect {addr}"), e))
    }

    async fn send(&self, stream: &mut TcpStream, stage: &str, bytes: &[u8]) -> Result<(), DeviceError> {
        stream
            .write_all(bytes)
            .await
            .map_err(|e| DeviceError::from_io(stage, e))
    }

    /// Read the one-byte LPD acknowledgement. Anything but zero means the
    /// daemon refused this job.
    async fn ack(&self, stream: &mut TcpStream, stage: &str) -> Result<(), DeviceError> {
        let code = tokio::time::timeout(self.timeout, stream.read_u8())
            .await
            .map_err(|_| DeviceError::Transient(format!("{stage}: no acknowledgement")))?
            .map_err(|e| DeviceError::from_io(stage, e))?;
        if code == 0 {
            Ok(())
        } else {
            Err(DeviceError::Rejected(format!(
                "{stage}: queue '{}' refused (ack {code})",
                self.queue
            )))
        }
    }

    async fn send_lpr(&self, job: &PrintJob) -> Result<(), DeviceError> {
        let mut stream = self.connect().await?;
        let job_num = self.next_job_number();
        let name = &job.content.name;

        self.send(&mut stream, "receive job", format!("\x02{}\n", self.queue).as_bytes())
            .await?;
        self.ack(&mut stream, "receive job").await?;

        let control = control_file(job, job_num);
        let header = format!("\x02{} cfA{job_num:03}{LPR_HOSTNAME}\n", control.len());
        self.send(&mut stream, "control header", header.as_bytes()).await?;
        self.ack(&mut stream, "control header").await?;
        self.send(&mut stream, "control file", control.as_bytes()).await?;
        self.send(&mut stream, "control file", &[0]).await?;
        self.ack(&mut stream, "control file").await?;

        let header = format!(
            "\x03{} dfA{job_num:03}{LPR_HOSTNAME}\n",
            job.content.len()
        );
        self.send(&mut stream, "data header", header.as_bytes()).await?;
        self.ack(&mut stream, "data header").await?;
        self.send(&mut stream, "data file", &job.content.data).await?;
        self.send(&mut stream, "data file", &[0]).await?;
        self.ack(&mut stream, "data file").await?;

        info!(job_id = %job.id, job = %name, queue = %self.queue, "LPR job accepted");
        Ok(())
    }

    async fn send_raw(&self, job: &PrintJob) -> Result<(), DeviceError> {
        let mut stream = self.connect().await?;
        let total = job.content.len() * job.copies as usize;
        let mut sent = 0usize;
        for _ in 0..job.copies {
            for chunk in job.content.data.chunks(RAW_CHUNK) {
                self.send(&mut stream, "raw send", chunk).await?;
                sent += chunk.len();
                debug!(sent, total, "raw TCP progress");
            }
        }
        stream
            .shutdown()
            .await
            .map_err(|e| DeviceError::from_io("raw shutdown", e))?;
        info!(job_id = %job.id, total, "raw TCP job sent");
        Ok(())
    }
}

fn control_file(job: &PrintJob, job_num: u16) -> String {
    let name = &job.content.name;
    let mut control = format!("H{LPR_HOSTNAME}\nP{LPR_HOSTNAME}\nJ{name}\n");
    for _ in 0..job.copies {
        control.push_str(&format!("ldfA{job_num:03}{LPR_HOSTNAME}\n"));
    }
    control.push_str(&format!("UdfA{job_num:03}{LPR_HOSTNAME}\nN{name}\n"));
    control
}

#[async_trait]
impl PrinterCapability for SpooledPrinter {
    async fn status(&self) -> DeviceStatus {
        match self.connect().await {
            Ok(_) => DeviceStatus::Ready,
            Err(e) => {
                debug!(endpoint = %self.endpoint(), error = %e, "spooler probe failed");
                DeviceStatus::Offline
            }
        }
    }

    async fn submit(&self, job: &PrintJob) -> Result<(), DeviceError> {
        match self.protocol {
            SpoolProtocol::Lpr => self.send_lpr(job).await,
            SpoolProtocol::Raw => self.send_raw(job).await,
        }
    }

    async fn rediscover(&self) -> Result<(), DeviceError> {
        *self.addr.lock().unwrap_or_else(PoisonError::into_inner) = None;
        let addr = self.resolve().await?;
        debug!(endpoint = %self.endpoint(), %addr, "spooler re-resolved");
        Ok(())
    }
}

// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Spoolwerk core types, errors, and configuration shared across all crates.

pub mod config;
pub mod error;
pub mod types;

pub use config::{DeviceConfig, DeviceKind, EngineConfig, GatewayConfig, ResilienceConfig};
pub use error::SpoolwerkError;
pub use types::*;

// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Printbridge: core types, error definitions and configuration shared across
// all crates.

pub mod category;
pub mod config;
pub mod error;
pub mod events;
pub mod types;

pub use config::{AppConfig, DeliveryStrategy, DispatchSettings, StationConfig, StoreSettings};
pub use error::BridgeError;
pub use events::{EventBus, Subscription};
pub use types::*;

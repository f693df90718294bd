// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Engine timing.

use std::time::Duration;

use printbridge_core::config::AppConfig;

/// Timers and bounds for one station engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineSettings {
    /// Interval of the pending-job poll backstop.
    pub poll_interval: Duration,
    /// Interval of the `last_seen_at` heartbeat.
    pub heartbeat_interval: Duration,
    /// How many dispatched job ids are remembered for de-duplication.
    pub recent_capacity: usize,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(3),
            heartbeat_interval: Duration::from_secs(30),
            recent_capacity: 512,
        }
    }
}

impl From<&AppConfig> for EngineSettings {
    fn from(config: &AppConfig) -> Self {
        Self {
            poll_interval: config.poll_interval(),
            heartbeat_interval: config.heartbeat_interval(),
            ..Self::default()
        }
    }
}

// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Printbridge sync: moves pending jobs from the remote store to a printer.
//
// `StationEngine` runs one station connection (sweep, push, poll, heartbeat
// and a single dispatch worker). `StationSupervisor` keeps one engine per
// connected station token and merges their events.

pub mod engine;
pub mod queue;
pub mod settings;
pub mod supervisor;

#[cfg(test)]
mod testing;

pub use engine::{Admission, JobOutcome, StationEngine};
pub use queue::{JobQueue, Offer};
pub use settings::EngineSettings;
pub use supervisor::{LOCAL_TEST_STATION, StationSupervisor};

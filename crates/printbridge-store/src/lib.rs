// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Printbridge Store: the remote job store contract and its implementations.
//
// `RestStore` talks to a PostgREST endpoint for reads and writes and to the
// Phoenix realtime websocket for insert notifications. `MemoryStore` keeps
// everything in process and backs the tests and the `--demo` mode.

pub mod memory;
pub mod realtime;
pub mod rest;
pub mod store;

pub use memory::MemoryStore;
pub use realtime::RealtimeSettings;
pub use rest::{RestStore, StoreCredentials};
pub use store::{JobSubscription, RecentJobsQuery, RemoteJobStore, StatusUpdate};

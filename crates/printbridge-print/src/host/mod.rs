// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Host printing primitives.
//
// Everything the dispatcher needs from the operating system goes through
// `PrintHost`. `SystemHost` shells out to the platform tools; tests supply
// scripted fakes.

mod system;

use std::time::Duration;

use async_trait::async_trait;

use printbridge_core::error::Result;
use printbridge_core::types::PrinterInfo;

use crate::completion::Completion;

pub use system::SystemHost;

/// A rendered page to submit silently to a device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderRequest {
    pub printer: String,
    pub html: String,
    /// How long the host must keep the submitted document available after
    /// reporting success (the dispatcher's settle delay).
    pub keepalive: Duration,
}

/// Native printing capabilities of the machine.
#[async_trait]
pub trait PrintHost: Send + Sync {
    /// Printers visible to the OS, with the default marked.
    async fn list_printers(&self) -> Result<Vec<PrinterInfo>>;

    /// Pipe bytes to the spooler in raw mode for `printer`.
    async fn spool_raw(&self, printer: &str, data: &[u8]) -> Result<()>;

    /// Run a script through the host scripting bridge, returning its stdout.
    async fn run_script(&self, script: &str) -> Result<String>;

    /// Start rendering and printing `request`. The host reports the
    /// submission result through `completion`, possibly after this returns.
    fn render_and_print(&self, request: RenderRequest, completion: Completion);

    /// Human-readable host name for logs.
    fn host_name(&self) -> &str;
}

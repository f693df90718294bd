// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Print dispatcher.
//
// Sanitizes the content for the chosen channel, bounds the prepare phase of
// every strategy with one timeout, and resolves each call exactly once.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Local;
use tracing::{debug, info, instrument, warn};

use printbridge_core::config::{DeliveryStrategy, DispatchSettings};
use printbridge_core::error::{BridgeError, Result};
use printbridge_core::types::PrinterInfo;

use crate::completion::Completion;
use crate::host::{PrintHost, RenderRequest, SystemHost};
use crate::printers::default_of;
use crate::render::{graphics_script, html_page};
use crate::sanitize::{raw_payload, sanitize};
use crate::test_page::test_page;

/// Time bounds applied to every dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DispatchTimeouts {
    /// Upper bound for loading/preparing and submitting a job.
    pub prepare: Duration,
    /// Wait after a rendered page was accepted, on top of `prepare`.
    pub settle: Duration,
}

impl Default for DispatchTimeouts {
    fn default() -> Self {
        Self {
            prepare: Duration::from_secs(10),
            settle: Duration::from_secs(2),
        }
    }
}

impl From<&DispatchSettings> for DispatchTimeouts {
    fn from(settings: &DispatchSettings) -> Self {
        Self {
            prepare: settings.prepare_timeout(),
            settle: settings.settle_delay(),
        }
    }
}

/// What the sync engine needs from a printer backend.
#[async_trait]
pub trait PrintService: Send + Sync {
    /// Deliver `content` to `printer`. One outcome per call.
    async fn print(&self, printer: &str, content: &str) -> Result<()>;

    async fn list_printers(&self) -> Result<Vec<PrinterInfo>>;

    /// Name of the host's default printer, `None` when none is marked.
    async fn default_printer(&self) -> Result<Option<String>> {
        Ok(default_of(&self.list_printers().await?))
    }

    /// Print the fixed test page naming `station` and `printer`.
    async fn test_print(&self, printer: &str, station: &str) -> Result<()> {
        self.print(printer, &test_page(station, printer, Local::now()))
            .await
    }
}

/// Print service that drives a [`PrintHost`] with one fixed strategy.
#[derive(Clone)]
pub struct PrintDispatcher {
    host: Arc<dyn PrintHost>,
    strategy: DeliveryStrategy,
    timeouts: DispatchTimeouts,
}

impl std::fmt::Debug for PrintDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PrintDispatcher")
            .field("host", &self.host.host_name())
            .field("strategy", &self.strategy)
            .field("timeouts", &self.timeouts)
            .finish()
    }
}

impl PrintDispatcher {
    pub fn new(host: Arc<dyn PrintHost>, strategy: DeliveryStrategy, timeouts: DispatchTimeouts) -> Self {
        info!(host = host.host_name(), strategy = strategy.as_str(), "print dispatcher ready");
        Self {
            host,
            strategy,
            timeouts,
        }
    }

    /// Dispatcher over the system host, honouring a forced strategy.
    pub fn from_settings(settings: &DispatchSettings) -> Self {
        Self::new(
            Arc::new(SystemHost::from_settings(settings)),
            settings.strategy.unwrap_or_else(DeliveryStrategy::detect),
            DispatchTimeouts::from(settings),
        )
    }

    pub fn strategy(&self) -> DeliveryStrategy {
        self.strategy
    }

    async fn bounded<T, F>(&self, phase: F) -> Result<T>
    where
        F: std::future::Future<Output = Result<T>>,
    {
        tokio::time::timeout(self.timeouts.prepare, phase)
            .await
            .map_err(|_| BridgeError::PrintTimeout(self.timeouts.prepare))?
    }

    async fn raw(&self, printer: &str, content: &str) -> Result<()> {
        let bytes = raw_payload(content);
        self.bounded(self.host.spool_raw(printer, &bytes)).await
    }

    async fn scripted(&self, printer: &str, content: &str) -> Result<()> {
        let printers = self.bounded(self.host.list_printers()).await?;
        if !printers.iter().any(|p| p.name == printer) {
            return Err(BridgeError::PrinterNotFound(printer.to_owned()));
        }

        let script = graphics_script(printer, &sanitize(content));
        match self.bounded(self.host.run_script(&script)).await {
            Ok(_) => Ok(()),
            Err(e) => {
                warn!(printer, error = %e, "scripted print failed, falling back to rendered page");
                self.rendered(printer, content).await
            }
        }
    }

    async fn rendered(&self, printer: &str, content: &str) -> Result<()> {
        let (completion, outcome) = Completion::new();
        let request = RenderRequest {
            printer: printer.to_owned(),
            html: html_page(&sanitize(content)),
            keepalive: self.timeouts.settle,
        };

        // The timer only holds a weak handle, so a host that drops its
        // handle without finishing fails the print at once.
        let timer = {
            let completion = completion.downgrade();
            let limit = self.timeouts.prepare;
            tokio::spawn(async move {
                tokio::time::sleep(limit).await;
                if completion.finish(Err(BridgeError::PrintTimeout(limit))) {
                    debug!("rendered page timed out before submission");
                }
            })
        };

        self.host.render_and_print(request, completion);
        let result = outcome.wait().await;
        timer.abort();
        result?;

        // The OS reports success before the driver has taken the job.
        tokio::time::sleep(self.timeouts.settle).await;
        Ok(())
    }
}

#[async_trait]
impl PrintService for PrintDispatcher {
    #[instrument(skip(self, content), fields(strategy = self.strategy.as_str(), bytes = content.len()))]
    async fn print(&self, printer: &str, content: &str) -> Result<()> {
        match self.strategy {
            DeliveryStrategy::RawSpooler => self.raw(printer, content).await,
            DeliveryStrategy::ScriptedGraphics => self.scripted(printer, content).await,
            DeliveryStrategy::RenderedPage => self.rendered(printer, content).await,
        }
    }

    async fn list_printers(&self) -> Result<Vec<PrinterInfo>> {
        self.host.list_printers().await
    }
}

// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Test doubles shared by the engine and supervisor tests.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{Semaphore, mpsc};

use printbridge_core::error::{BridgeError, Result};
use printbridge_core::types::{Job, JobId, OrderStatus, PrinterInfo, Station, StationId};
use printbridge_print::PrintService;
use printbridge_store::{JobSubscription, MemoryStore, RecentJobsQuery, RemoteJobStore, StatusUpdate};

use crate::settings::EngineSettings;

pub(crate) fn fast_settings() -> EngineSettings {
    EngineSettings {
        poll_interval: Duration::from_millis(25),
        heartbeat_interval: Duration::from_millis(200),
        recent_capacity: 64,
    }
}

/// Print service that records `(printer, payload)` for every print.
pub(crate) struct RecordingPrinter {
    printers: Vec<PrinterInfo>,
    delay: Duration,
    fail_marker: Option<String>,
    prints: mpsc::UnboundedSender<(String, String)>,
    active: AtomicUsize,
    max_active: AtomicUsize,
}

impl RecordingPrinter {
    pub(crate) fn new() -> (Self, mpsc::UnboundedReceiver<(String, String)>) {
        let (prints, rx) = mpsc::unbounded_channel();
        let printer = Self {
            printers: vec![
                PrinterInfo {
                    name: "POS-80".into(),
                    is_default: true,
                },
                PrinterInfo {
                    name: "Balcao".into(),
                    is_default: false,
                },
            ],
            delay: Duration::ZERO,
            fail_marker: None,
            prints,
            active: AtomicUsize::new(0),
            max_active: AtomicUsize::new(0),
        };
        (printer, rx)
    }

    pub(crate) fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Fail every payload containing `marker`.
    pub(crate) fn failing_on(mut self, marker: &str) -> Self {
        self.fail_marker = Some(marker.to_owned());
        self
    }

    pub(crate) fn without_default(mut self) -> Self {
        for printer in &mut self.printers {
            printer.is_default = false;
        }
        self
    }

    pub(crate) fn max_concurrent(&self) -> usize {
        self.max_active.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PrintService for RecordingPrinter {
    async fn print(&self, printer: &str, content: &str) -> Result<()> {
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_active.fetch_max(now, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.active.fetch_sub(1, Ordering::SeqCst);

        if self
            .fail_marker
            .as_deref()
            .is_some_and(|marker| content.contains(marker))
        {
            return Err(BridgeError::Print("paper jam".into()));
        }
        let _ = self.prints.send((printer.to_owned(), content.to_owned()));
        Ok(())
    }

    async fn list_printers(&self) -> Result<Vec<PrinterInfo>> {
        Ok(self.printers.clone())
    }
}

pub(crate) async fn next_print(
    prints: &mut mpsc::UnboundedReceiver<(String, String)>,
) -> (String, String) {
    tokio::time::timeout(Duration::from_secs(2), prints.recv())
        .await
        .expect("print within 2s")
        .expect("printer alive")
}

pub(crate) async fn no_print_within(
    prints: &mut mpsc::UnboundedReceiver<(String, String)>,
    window: Duration,
) {
    if let Ok(Some(print)) = tokio::time::timeout(window, prints.recv()).await {
        panic!("unexpected print: {print:?}");
    }
}

pub(crate) async fn eventually<F: Fn() -> bool>(check: F) {
    tokio::time::timeout(Duration::from_secs(2), async {
        while !check() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("condition within 2s");
}

/// Memory store whose station lookup for one token blocks until released.
pub(crate) struct GatedStore {
    store: MemoryStore,
    gated_token: String,
    gate: Semaphore,
}

impl GatedStore {
    pub(crate) fn new(store: MemoryStore, gated_token: &str) -> Self {
        Self {
            store,
            gated_token: gated_token.to_owned(),
            gate: Semaphore::new(0),
        }
    }

    pub(crate) fn release(&self) {
        self.gate.add_permits(1);
    }
}

#[async_trait]
impl RemoteJobStore for GatedStore {
    async fn resolve_station(&self, token: &str) -> Result<Option<Station>> {
        if token == self.gated_token {
            let permit = self
                .gate
                .acquire()
                .await
                .map_err(|e| BridgeError::StoreUnavailable(e.to_string()))?;
            permit.forget();
        }
        self.store.resolve_station(token).await
    }

    async fn touch_last_seen(&self, station: &StationId) -> Result<()> {
        self.store.touch_last_seen(station).await
    }

    async fn set_default_printer(&self, station: &StationId, printer: &str) -> Result<()> {
        self.store.set_default_printer(station, printer).await
    }

    async fn fetch_pending_jobs(&self, station: &StationId) -> Result<Vec<Job>> {
        self.store.fetch_pending_jobs(station).await
    }

    async fn set_job_status(&self, job: &JobId, update: StatusUpdate) -> Result<()> {
        self.store.set_job_status(job, update).await
    }

    async fn set_order_status(&self, job: &JobId, status: OrderStatus) -> Result<()> {
        self.store.set_order_status(job, status).await
    }

    async fn subscribe_new_jobs(&self, station: &StationId) -> Result<JobSubscription> {
        self.store.subscribe_new_jobs(station).await
    }

    async fn fetch_recent_jobs(&self, query: &RecentJobsQuery) -> Result<Vec<Job>> {
        self.store.fetch_recent_jobs(query).await
    }

    async fn rename_station(&self, token: &str, name: &str) -> Result<()> {
        self.store.rename_station(token, name).await
    }
}

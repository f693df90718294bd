// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Job synchronization engine for one station connection.
//
// Three producers feed one queue: the sweep run at connect, the push feed
// and the poll backstop. All of them go through `admit`, which applies the
// local category filter and the queue's de-duplication under the state
// lock. A single worker drains the queue, so dispatches never overlap.
//
// Lifecycle: `connect` resolves the station, starts the worker, sweeps,
// then starts the push, poll and heartbeat tasks. `disconnect` signals the
// shared watch channel, aborts the timer tasks and abandons queued jobs;
// the worker exits after the job it is printing, if any.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use tokio::sync::{Notify, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use printbridge_core::category::categories_match;
use printbridge_core::error::{BridgeError, Result};
use printbridge_core::events::{EventBus, Subscription};
use printbridge_core::types::{
    ConnectionStatus, Job, JobId, LogEntry, LogLevel, OrderStatus, Station, StationId,
};
use printbridge_print::PrintService;
use printbridge_store::{JobSubscription, RecentJobsQuery, RemoteJobStore, StatusUpdate};

use crate::queue::{JobQueue, Offer};
use crate::settings::EngineSettings;

/// How one dispatch attempt ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobOutcome {
    Printed { printer: String },
    Failed { printer: String, message: String },
    /// No printer could be resolved; the job was marked `error`.
    NoPrinter,
    /// The `printing` claim could not be written; nothing was dispatched.
    ClaimFailed(String),
}

impl JobOutcome {
    /// Whether the job left `pending` and must not be offered again.
    pub fn dispatched(&self) -> bool {
        !matches!(self, Self::ClaimFailed(_))
    }
}

/// What happened to a job offered by a producer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Queued,
    Filtered,
    Duplicate(Offer),
    /// The engine is not connected.
    Closed,
}

struct EngineState {
    station: Option<Station>,
    filter: Vec<String>,
    queue: JobQueue,
    shutdown: Option<watch::Sender<bool>>,
}

#[derive(Default)]
struct Tasks {
    worker: Option<JoinHandle<()>>,
    timers: Vec<JoinHandle<()>>,
}

struct Inner {
    store: Arc<dyn RemoteJobStore>,
    printer: Arc<dyn PrintService>,
    settings: EngineSettings,
    state: Mutex<EngineState>,
    tasks: Mutex<Tasks>,
    wake: Notify,
    lifecycle: tokio::sync::Mutex<()>,
    status: EventBus<ConnectionStatus>,
    logs: EventBus<LogEntry>,
}

/// Handle to one station's engine. Clones share the same engine.
#[derive(Clone)]
pub struct StationEngine {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for StationEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.inner.state();
        f.debug_struct("StationEngine")
            .field("station", &state.station.as_ref().map(|s| s.name.as_str()))
            .field("queued", &state.queue.len())
            .field("filter", &state.filter)
            .finish()
    }
}

impl StationEngine {
    pub fn new(
        store: Arc<dyn RemoteJobStore>,
        printer: Arc<dyn PrintService>,
        settings: EngineSettings,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                store,
                printer,
                settings,
                state: Mutex::new(EngineState {
                    station: None,
                    filter: Vec::new(),
                    queue: JobQueue::new(settings.recent_capacity),
                    shutdown: None,
                }),
                tasks: Mutex::new(Tasks::default()),
                wake: Notify::new(),
                lifecycle: tokio::sync::Mutex::new(()),
                status: EventBus::new(),
                logs: EventBus::new(),
            }),
        }
    }

    /// Whether both handles drive the same engine.
    pub(crate) fn same_engine(&self, other: &StationEngine) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Connect as the station identified by `token`.
    ///
    /// Already connected: returns the cached station and starts nothing.
    pub async fn connect(&self, token: &str) -> Result<Station> {
        self.connect_with_filter(token, Vec::new()).await
    }

    /// Connect and install `categories` as the local filter before the
    /// first sweep. Ignored when already connected.
    pub async fn connect_with_filter(&self, token: &str, categories: Vec<String>) -> Result<Station> {
        let inner = &self.inner;
        let _lifecycle = inner.lifecycle.lock().await;

        if let Some(station) = inner.state().station.clone() {
            return Ok(station);
        }

        // The previous connection's worker may still be finishing a job.
        let previous = inner.tasks().worker.take();
        if let Some(worker) = previous {
            let _ = worker.await;
        }

        inner.log(LogLevel::Info, "Looking up station by token...");
        let station = match inner.store.resolve_station(token).await {
            Ok(Some(station)) => station,
            Ok(None) => {
                return Err(inner.connect_failed(
                    BridgeError::StationNotFound,
                    "Invalid station token. Check your configuration.",
                ));
            }
            Err(e) => {
                let message = e.to_string();
                return Err(inner.connect_failed(e, message));
            }
        };
        inner.log(LogLevel::Success, format!("Station found: {}", station.name));

        if let Err(e) = inner.store.touch_last_seen(&station.id).await {
            inner.log(LogLevel::Warning, format!("Could not update last seen: {e}"));
        }

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        {
            let mut state = inner.state();
            state.station = Some(station.clone());
            state.shutdown = Some(shutdown_tx);
            state.filter = categories.clone();
        }
        inner.status.publish(&ConnectionStatus::connected(station.clone()));
        if !categories.is_empty() {
            inner.log(
                LogLevel::Info,
                format!("Local filter loaded: {}", describe_filter(&categories)),
            );
        }

        let worker = tokio::spawn(run_worker(Arc::clone(inner), shutdown_rx.clone()));
        inner.tasks().worker = Some(worker);

        inner.sweep(&station.id).await;

        let mut timers = Vec::with_capacity(3);
        inner.log(LogLevel::Info, "Subscribing to new jobs...");
        match inner.store.subscribe_new_jobs(&station.id).await {
            Ok(feed) => timers.push(tokio::spawn(run_push(
                Arc::clone(inner),
                feed,
                shutdown_rx.clone(),
            ))),
            Err(e) => inner.log(
                LogLevel::Warning,
                format!("Push feed unavailable, relying on polling: {e}"),
            ),
        }
        inner.log(
            LogLevel::Info,
            format!(
                "Polling for jobs every {}s",
                inner.settings.poll_interval.as_secs_f32()
            ),
        );
        timers.push(tokio::spawn(run_poll(
            Arc::clone(inner),
            station.id.clone(),
            shutdown_rx.clone(),
        )));
        timers.push(tokio::spawn(run_heartbeat(
            Arc::clone(inner),
            station.id.clone(),
            shutdown_rx,
        )));
        inner.tasks().timers = timers;

        inner.log(LogLevel::Success, "Print client connected and active");
        Ok(station)
    }

    /// Stop everything for this connection. Safe to call in any state; only
    /// a call that actually disconnects publishes a status event.
    pub async fn disconnect(&self) {
        let inner = &self.inner;
        let _lifecycle = inner.lifecycle.lock().await;

        let (was_connected, abandoned) = {
            let mut state = inner.state();
            let was_connected = state.station.take().is_some();
            if let Some(shutdown) = state.shutdown.take() {
                let _ = shutdown.send(true);
            }
            state.filter.clear();
            (was_connected, state.queue.abandon())
        };

        let timers = std::mem::take(&mut inner.tasks().timers);
        for timer in timers {
            timer.abort();
        }

        if was_connected {
            if abandoned > 0 {
                inner.log(
                    LogLevel::Info,
                    format!("{abandoned} queued job(s) left pending"),
                );
            }
            inner
                .status
                .publish(&ConnectionStatus::disconnected("Disconnected"));
            inner.log(LogLevel::Info, "Client disconnected and filters cleared");
        }
    }

    /// Claim, dispatch and record one job. Never fails: the outcome is
    /// written to the job and logged. Outside tests only the worker
    /// dispatches.
    #[cfg(test)]
    pub(crate) async fn process_job(&self, job: Job) -> JobOutcome {
        self.inner.process_job(job).await
    }

    /// Offer a job as a producer would.
    #[cfg(test)]
    pub(crate) fn admit(&self, job: Job) -> Admission {
        self.inner.admit(job)
    }

    /// Printer for the next dispatch: the station's default, else the
    /// host default.
    pub async fn resolve_printer(&self) -> Result<String> {
        self.inner.resolve_printer().await
    }

    pub async fn update_default_printer(&self, printer: &str) -> Result<()> {
        let station = self.require_station()?;
        self.inner
            .store
            .set_default_printer(&station.id, printer)
            .await?;
        if let Some(cached) = self
            .inner
            .state()
            .station
            .as_mut()
            .filter(|s| s.id == station.id)
        {
            cached.default_printer_name = Some(printer.to_owned());
        }
        self.inner.log(
            LogLevel::Success,
            format!("Default printer updated: {printer}"),
        );
        Ok(())
    }

    pub async fn update_station_name(&self, name: &str) -> Result<()> {
        let station = self.require_station()?;
        self.inner.store.rename_station(&station.token, name).await?;
        if let Some(cached) = self
            .inner
            .state()
            .station
            .as_mut()
            .filter(|s| s.id == station.id)
        {
            cached.name = name.to_owned();
        }
        self.inner
            .log(LogLevel::Success, format!("Station name updated: {name}"));
        Ok(())
    }

    /// Replace the connection-local category filter. Never written remotely.
    pub fn update_station_categories(&self, categories: Vec<String>) -> Result<()> {
        self.require_station()?;
        let summary = describe_filter(&categories);
        self.inner.state().filter = categories;
        self.inner
            .log(LogLevel::Success, format!("Local filter updated: {summary}"));
        Ok(())
    }

    pub fn local_categories(&self) -> Vec<String> {
        self.inner.state().filter.clone()
    }

    pub fn station(&self) -> Option<Station> {
        self.inner.state().station.clone()
    }

    pub fn is_connected(&self) -> bool {
        self.inner.state().station.is_some()
    }

    pub fn status(&self) -> ConnectionStatus {
        match self.station() {
            Some(station) => ConnectionStatus::connected(station),
            None => ConnectionStatus {
                connected: false,
                station: None,
                message: None,
            },
        }
    }

    /// Printed and cancelled jobs of this station, newest first. Empty when
    /// not connected.
    pub async fn recent_jobs(
        &self,
        limit: usize,
        from: Option<DateTime<Utc>>,
        to: Option<DateTime<Utc>>,
    ) -> Result<Vec<Job>> {
        let Some(station) = self.station() else {
            return Ok(Vec::new());
        };
        self.inner
            .store
            .fetch_recent_jobs(&RecentJobsQuery {
                station: Some(station.id),
                limit,
                from,
                to,
            })
            .await
    }

    pub async fn update_order_status(&self, job: &JobId, status: OrderStatus) -> Result<()> {
        self.inner.store.set_order_status(job, status).await?;
        self.inner.log(
            LogLevel::Info,
            format!("Order status of job {} updated: {}", job.short(), status.as_str()),
        );
        Ok(())
    }

    /// Print `payload` again on the resolved printer. No status changes.
    pub async fn reprint(&self, payload: &str) -> Result<()> {
        let printer = self.inner.resolve_printer().await?;
        self.inner.log(LogLevel::Info, "Reprinting job...");
        self.inner.printer.print(&printer, payload).await?;
        self.inner
            .log(LogLevel::Success, "Job reprinted successfully");
        Ok(())
    }

    pub fn on_status<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&ConnectionStatus) + Send + Sync + 'static,
    {
        self.inner.status.subscribe(listener)
    }

    pub fn on_log<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&LogEntry) + Send + Sync + 'static,
    {
        self.inner.logs.subscribe(listener)
    }

    fn require_station(&self) -> Result<Station> {
        self.station().ok_or(BridgeError::NotConnected)
    }
}

fn describe_filter(categories: &[String]) -> String {
    if categories.is_empty() {
        "none (all items)".into()
    } else {
        categories.join(", ")
    }
}

impl Inner {
    fn state(&self) -> MutexGuard<'_, EngineState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn tasks(&self) -> MutexGuard<'_, Tasks> {
        self.tasks.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Mirror to tracing and publish to log subscribers. Never call while
    /// holding the state lock: listeners may call back into the engine.
    fn log(&self, level: LogLevel, message: impl Into<String>) {
        let entry = LogEntry::new(level, message);
        match level {
            LogLevel::Info => info!(message = %entry.message),
            LogLevel::Success => info!(success = true, message = %entry.message),
            LogLevel::Warning => warn!(message = %entry.message),
            LogLevel::Error => error!(message = %entry.message),
        }
        self.logs.publish(&entry);
    }

    fn connect_failed(&self, err: BridgeError, message: impl Into<String>) -> BridgeError {
        self.log(LogLevel::Error, format!("Connection failed: {err}"));
        self.status.publish(&ConnectionStatus::disconnected(message));
        err
    }

    fn admit(&self, job: Job) -> Admission {
        let admission = {
            let mut state = self.state();
            if state.station.is_none() {
                Admission::Closed
            } else if !categories_match(&state.filter, job.categories()) {
                Admission::Filtered
            } else {
                match state.queue.offer(job) {
                    Offer::Queued => Admission::Queued,
                    duplicate => Admission::Duplicate(duplicate),
                }
            }
        };
        if admission == Admission::Queued {
            self.wake.notify_one();
        }
        admission
    }

    async fn sweep(&self, station: &StationId) {
        self.log(LogLevel::Info, "Fetching pending jobs...");
        match self.store.fetch_pending_jobs(station).await {
            Ok(jobs) => {
                let total = jobs.len();
                let queued = jobs
                    .into_iter()
                    .map(|job| self.admit(job))
                    .filter(|a| *a == Admission::Queued)
                    .count();
                if queued == 0 {
                    self.log(
                        LogLevel::Info,
                        "No pending jobs found (after local filter)",
                    );
                } else {
                    self.log(
                        LogLevel::Info,
                        format!(
                            "{queued} pending job(s) found ({} filtered)",
                            total - queued
                        ),
                    );
                }
            }
            Err(e) => self.log(
                LogLevel::Error,
                format!("Failed to fetch pending jobs: {e}"),
            ),
        }
    }

    async fn resolve_printer(&self) -> Result<String> {
        let cached = self
            .state()
            .station
            .as_ref()
            .and_then(|s| s.default_printer_name.clone())
            .filter(|name| !name.trim().is_empty());
        if let Some(name) = cached {
            return Ok(name);
        }
        match self.printer.default_printer().await {
            Ok(Some(name)) => Ok(name),
            Ok(None) => Err(BridgeError::NoPrinterConfigured),
            Err(e) => {
                warn!(error = %e, "could not read host default printer");
                Err(BridgeError::NoPrinterConfigured)
            }
        }
    }

    async fn write_back(&self, job: &JobId, update: StatusUpdate) {
        if let Err(e) = self.store.set_job_status(job, update).await {
            self.log(
                LogLevel::Error,
                format!("Could not record status of job {}: {e}", job.short()),
            );
        }
    }

    async fn process_job(&self, job: Job) -> JobOutcome {
        let short = job.id.short().to_owned();
        self.log(LogLevel::Info, format!("Processing job {short}..."));

        if let Err(e) = self
            .store
            .set_job_status(&job.id, StatusUpdate::Printing)
            .await
        {
            self.log(LogLevel::Error, format!("Could not claim job {short}: {e}"));
            return JobOutcome::ClaimFailed(e.to_string());
        }

        let printer = match self.resolve_printer().await {
            Ok(printer) => printer,
            Err(e) => {
                self.log(
                    LogLevel::Error,
                    format!("Failed to process job {short}: {e}"),
                );
                self.write_back(
                    &job.id,
                    StatusUpdate::Failed {
                        message: e.to_string(),
                    },
                )
                .await;
                return JobOutcome::NoPrinter;
            }
        };

        match self.printer.print(&printer, &job.payload).await {
            Ok(()) => {
                self.write_back(&job.id, StatusUpdate::printed_now()).await;
                self.log(
                    LogLevel::Success,
                    format!("Job {short} printed on {printer}"),
                );
                JobOutcome::Printed { printer }
            }
            Err(e) => {
                let message = e.to_string();
                self.log(
                    LogLevel::Error,
                    format!("Failed to process job {short}: {message}"),
                );
                self.write_back(
                    &job.id,
                    StatusUpdate::Failed {
                        message: message.clone(),
                    },
                )
                .await;
                JobOutcome::Failed { printer, message }
            }
        }
    }
}

async fn run_worker(inner: Arc<Inner>, mut shutdown: watch::Receiver<bool>) {
    loop {
        if *shutdown.borrow() {
            break;
        }
        let next = inner.state().queue.start_next();
        match next {
            Some(job) => {
                let id = job.id.clone();
                let outcome = inner.process_job(job).await;
                inner.state().queue.finish(&id, outcome.dispatched());
            }
            None => {
                tokio::select! {
                    _ = inner.wake.notified() => {}
                    changed = shutdown.changed() => {
                        if changed.is_err() {
                            break;
                        }
                    }
                }
            }
        }
    }
    debug!("queue worker stopped");
}

async fn run_push(inner: Arc<Inner>, mut feed: JobSubscription, mut shutdown: watch::Receiver<bool>) {
    loop {
        tokio::select! {
            job = feed.next() => {
                let Some(job) = job else {
                    inner.log(LogLevel::Warning, "Push feed closed, relying on polling");
                    break;
                };
                let short = job.id.short().to_owned();
                match inner.admit(job) {
                    Admission::Queued => {
                        inner.log(LogLevel::Info, format!("New job received via push: {short}"));
                    }
                    Admission::Filtered => {
                        inner.log(LogLevel::Info, format!("Job {short} skipped by local filter"));
                    }
                    other => debug!(job_id = %short, ?other, "push delivery not queued"),
                }
            }
            _ = shutdown.changed() => break,
        }
    }
    feed.unsubscribe();
}

async fn run_poll(inner: Arc<Inner>, station: StationId, mut shutdown: watch::Receiver<bool>) {
    let mut ticker = tokio::time::interval(inner.settings.poll_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = shutdown.changed() => break,
        }
        match inner.store.fetch_pending_jobs(&station).await {
            Ok(jobs) => {
                let found = jobs
                    .into_iter()
                    .map(|job| inner.admit(job))
                    .filter(|a| *a == Admission::Queued)
                    .count();
                if found > 0 {
                    inner.log(
                        LogLevel::Info,
                        format!("{found} new job(s) found via polling"),
                    );
                }
            }
            // Outages are retried by the next tick; keep the log quiet.
            Err(e) => debug!(station = %station, error = %e, "poll failed"),
        }
    }
}

async fn run_heartbeat(inner: Arc<Inner>, station: StationId, mut shutdown: watch::Receiver<bool>) {
    let mut ticker = tokio::time::interval(inner.settings.heartbeat_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = shutdown.changed() => break,
        }
        match inner.store.touch_last_seen(&station).await {
            Ok(()) => debug!(station = %station, "heartbeat"),
            Err(e) => inner.log(LogLevel::Warning, format!("Heartbeat failed: {e}")),
        }
    }
}

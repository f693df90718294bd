// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Station supervisor: one engine per connected station token.
//
// Every engine shares the same store and print service. Status and log
// events of all engines are re-published on the supervisor's buses.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use chrono::{DateTime, Utc};
use tracing::{info, instrument};

use printbridge_core::error::{BridgeError, Result};
use printbridge_core::events::{EventBus, Subscription};
use printbridge_core::types::{
    ConnectionStatus, Job, JobId, LogEntry, OrderStatus, PrinterInfo, Station,
};
use printbridge_print::PrintService;
use printbridge_store::RemoteJobStore;

use crate::engine::StationEngine;
use crate::settings::EngineSettings;

/// Station name printed on a test page when no station is connected.
pub const LOCAL_TEST_STATION: &str = "Local station (test)";

struct Attached {
    engine: StationEngine,
    subscriptions: Vec<Subscription>,
    // Held for the whole connect attempt of this token.
    connecting: Arc<tokio::sync::Mutex<()>>,
}

impl Attached {
    fn release(self) {
        for subscription in self.subscriptions {
            subscription.unsubscribe();
        }
    }
}

/// Owns the engines of every connected station.
pub struct StationSupervisor {
    store: Arc<dyn RemoteJobStore>,
    printer: Arc<dyn PrintService>,
    settings: EngineSettings,
    engines: tokio::sync::Mutex<HashMap<String, Attached>>,
    selected_printer: Mutex<Option<String>>,
    status: Arc<EventBus<ConnectionStatus>>,
    logs: Arc<EventBus<LogEntry>>,
}

impl StationSupervisor {
    pub fn new(
        store: Arc<dyn RemoteJobStore>,
        printer: Arc<dyn PrintService>,
        settings: EngineSettings,
    ) -> Self {
        Self {
            store,
            printer,
            settings,
            engines: tokio::sync::Mutex::new(HashMap::new()),
            selected_printer: Mutex::new(None),
            status: Arc::new(EventBus::new()),
            logs: Arc::new(EventBus::new()),
        }
    }

    /// Printer chosen by the operator, used for reprints before any
    /// station default.
    pub fn with_selected_printer(self, printer: Option<String>) -> Self {
        *self
            .selected_printer
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = printer;
        self
    }

    pub fn selected_printer(&self) -> Option<String> {
        self.selected_printer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Connect `token`, reusing its engine when already connected.
    pub async fn connect(&self, token: &str) -> Result<Station> {
        self.connect_with_categories(token, Vec::new()).await
    }

    /// Connect `token` and install a saved local category filter.
    ///
    /// The engine map is only locked to look up or attach the engine, so a
    /// slow station never blocks calls for the others.
    #[instrument(skip(self, categories), fields(token = %mask(token)))]
    pub async fn connect_with_categories(
        &self,
        token: &str,
        categories: Vec<String>,
    ) -> Result<Station> {
        loop {
            let (engine, connecting) = {
                let mut engines = self.engines.lock().await;
                let attached = engines
                    .entry(token.to_owned())
                    .or_insert_with(|| self.attach());
                (attached.engine.clone(), Arc::clone(&attached.connecting))
            };
            let _connecting = connecting.lock().await;

            // A failed attempt ahead of us may have detached this engine.
            if !self.is_attached(token, &engine).await {
                continue;
            }
            if let Some(station) = engine.station() {
                return Ok(station);
            }

            let connected = engine.connect_with_filter(token, categories).await;
            let station = match connected {
                Ok(station) => station,
                Err(e) => {
                    let mut engines = self.engines.lock().await;
                    if engines
                        .get(token)
                        .is_some_and(|a| a.engine.same_engine(&engine))
                        && let Some(failed) = engines.remove(token)
                    {
                        failed.release();
                    }
                    return Err(e);
                }
            };
            info!(station = %station.name, "station attached");
            return Ok(station);
        }
    }

    async fn is_attached(&self, token: &str, engine: &StationEngine) -> bool {
        self.engines
            .lock()
            .await
            .get(token)
            .is_some_and(|a| a.engine.same_engine(engine))
    }

    fn attach(&self) -> Attached {
        let engine = StationEngine::new(
            Arc::clone(&self.store),
            Arc::clone(&self.printer),
            self.settings,
        );
        let status = Arc::clone(&self.status);
        let logs = Arc::clone(&self.logs);
        let subscriptions = vec![
            engine.on_status(move |event| status.publish(event)),
            engine.on_log(move |entry| logs.publish(entry)),
        ];
        Attached {
            engine,
            subscriptions,
            connecting: Arc::new(tokio::sync::Mutex::new(())),
        }
    }

    pub async fn disconnect(&self, token: &str) {
        let detached = self.engines.lock().await.remove(token);
        if let Some(attached) = detached {
            attached.engine.disconnect().await;
            attached.release();
        }
    }

    pub async fn disconnect_all(&self) {
        let detached: Vec<Attached> = self.engines.lock().await.drain().map(|(_, a)| a).collect();
        for attached in detached {
            attached.engine.disconnect().await;
            attached.release();
        }
    }

    /// Status of `token`; a never-connected token reports disconnected.
    pub async fn status(&self, token: &str) -> ConnectionStatus {
        match self.engines.lock().await.get(token) {
            Some(attached) => attached.engine.status(),
            None => ConnectionStatus {
                connected: false,
                station: None,
                message: None,
            },
        }
    }

    pub async fn engine(&self, token: &str) -> Option<StationEngine> {
        self.engines
            .lock()
            .await
            .get(token)
            .map(|a| a.engine.clone())
    }

    pub async fn connected_stations(&self) -> Vec<Station> {
        let mut stations: Vec<Station> = self
            .engines
            .lock()
            .await
            .values()
            .filter_map(|a| a.engine.station())
            .collect();
        stations.sort_by(|a, b| a.name.cmp(&b.name));
        stations
    }

    pub async fn list_printers(&self) -> Result<Vec<PrinterInfo>> {
        self.printer.list_printers().await
    }

    /// Select `printer` for reprints. With a connected `token`, the
    /// station's remote default is updated as well.
    pub async fn select_printer(&self, token: Option<&str>, printer: &str) -> Result<()> {
        *self
            .selected_printer
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(printer.to_owned());
        if let Some(token) = token {
            let engine = self.engine(token).await.ok_or(BridgeError::NotConnected)?;
            engine.update_default_printer(printer).await?;
        }
        Ok(())
    }

    /// Recent jobs across every connected station, newest first.
    pub async fn recent_jobs(
        &self,
        limit: usize,
        from: Option<DateTime<Utc>>,
        to: Option<DateTime<Utc>>,
    ) -> Result<Vec<Job>> {
        let engines: Vec<StationEngine> = self
            .engines
            .lock()
            .await
            .values()
            .map(|a| a.engine.clone())
            .collect();
        let mut jobs = Vec::new();
        for engine in engines {
            jobs.extend(engine.recent_jobs(limit, from, to).await?);
        }
        jobs.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        jobs.truncate(limit);
        Ok(jobs)
    }

    pub async fn update_order_status(&self, job: &JobId, status: OrderStatus) -> Result<()> {
        self.store.set_order_status(job, status).await
    }

    /// Reprint `payload`. Printer order: the operator's selection, the
    /// station default of `token`, then the host default.
    pub async fn reprint(&self, job: &JobId, payload: &str, token: Option<&str>) -> Result<()> {
        let printer = self.reprint_printer(token).await?;
        info!(job_id = %job.short(), printer = %printer, "reprinting job");
        self.printer.print(&printer, payload).await
    }

    async fn reprint_printer(&self, token: Option<&str>) -> Result<String> {
        if let Some(selected) = self.selected_printer() {
            return Ok(selected);
        }
        if let Some(token) = token {
            let station_default = self
                .engine(token)
                .await
                .and_then(|e| e.station())
                .and_then(|s| s.default_printer_name);
            if let Some(name) = station_default {
                return Ok(name);
            }
        }
        self.printer
            .default_printer()
            .await?
            .ok_or(BridgeError::NoPrinterConfigured)
    }

    pub async fn update_categories(&self, token: &str, categories: Vec<String>) -> Result<()> {
        let engine = self.engine(token).await.ok_or(BridgeError::NotConnected)?;
        engine.update_station_categories(categories)
    }

    /// Rename the station of `token`. Works without a connection.
    pub async fn rename_station(&self, token: &str, name: &str) -> Result<()> {
        match self.engine(token).await.filter(StationEngine::is_connected) {
            Some(engine) => engine.update_station_name(name).await,
            None => self.store.rename_station(token, name).await,
        }
    }

    /// Print the test page on `printer`, naming the station of `token`.
    pub async fn test_print(&self, printer: &str, token: Option<&str>) -> Result<()> {
        let station = match token {
            Some(token) => self.engine(token).await.and_then(|e| e.station()),
            None => None,
        };
        let name = station
            .map(|s| s.name)
            .unwrap_or_else(|| LOCAL_TEST_STATION.to_owned());
        self.printer.test_print(printer, &name).await
    }

    pub fn on_status<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&ConnectionStatus) + Send + Sync + 'static,
    {
        self.status.subscribe(listener)
    }

    pub fn on_log<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&LogEntry) + Send + Sync + 'static,
    {
        self.logs.subscribe(listener)
    }
}

fn mask(token: &str) -> String {
    let visible: String = token.chars().take(4).collect();
    format!("{visible}***")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use printbridge_core::types::JobStatus;
    use printbridge_store::MemoryStore;

    use crate::testing::{GatedStore, RecordingPrinter, eventually, fast_settings, next_print};

    fn station(store: &MemoryStore, name: &str, token: &str, printer: Option<&str>) -> Station {
        let mut station = Station::new(name, token);
        station.default_printer_name = printer.map(str::to_owned);
        store.add_station(station.clone()).expect("station");
        station
    }

    fn supervisor(store: &MemoryStore, printer: RecordingPrinter) -> StationSupervisor {
        StationSupervisor::new(Arc::new(store.clone()), Arc::new(printer), fast_settings())
    }

    #[tokio::test]
    async fn connect_is_idempotent_per_token() {
        let store = MemoryStore::new();
        station(&store, "Cozinha", "tok-a", None);
        let (printer, _prints) = RecordingPrinter::new();
        let supervisor = supervisor(&store, printer);

        let first = supervisor.connect("tok-a").await.expect("connect");
        let again = supervisor.connect("tok-a").await.expect("connect again");
        assert_eq!(first.id, again.id);
        assert_eq!(supervisor.connected_stations().await.len(), 1);
        assert!(supervisor.status("tok-a").await.connected);
        assert!(!supervisor.status("tok-b").await.connected);

        supervisor.disconnect_all().await;
        assert!(supervisor.connected_stations().await.is_empty());
    }

    #[tokio::test]
    async fn slow_connect_does_not_block_other_stations() {
        let store = MemoryStore::new();
        station(&store, "Cozinha", "tok-a", None);
        station(&store, "Bar", "tok-slow", None);
        let gated = Arc::new(GatedStore::new(store.clone(), "tok-slow"));
        let (printer, _prints) = RecordingPrinter::new();
        let supervisor = Arc::new(StationSupervisor::new(
            Arc::clone(&gated) as Arc<dyn RemoteJobStore>,
            Arc::new(printer),
            fast_settings(),
        ));

        supervisor.connect("tok-a").await.expect("connect");
        let slow = {
            let supervisor = Arc::clone(&supervisor);
            tokio::spawn(async move { supervisor.connect("tok-slow").await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;

        let status = tokio::time::timeout(Duration::from_secs(1), supervisor.status("tok-a"))
            .await
            .expect("status while another station connects");
        assert!(status.connected);
        tokio::time::timeout(Duration::from_secs(1), supervisor.disconnect("tok-a"))
            .await
            .expect("disconnect while another station connects");
        assert!(!supervisor.status("tok-a").await.connected);

        gated.release();
        let station = slow.await.expect("join").expect("slow connect");
        assert_eq!(station.name, "Bar");
        assert!(supervisor.status("tok-slow").await.connected);
        supervisor.disconnect_all().await;
    }

    #[tokio::test]
    async fn concurrent_connects_share_one_engine() {
        let store = MemoryStore::new();
        station(&store, "Bar", "tok-slow", None);
        let gated = Arc::new(GatedStore::new(store.clone(), "tok-slow"));
        let (printer, _prints) = RecordingPrinter::new();
        let supervisor = Arc::new(StationSupervisor::new(
            Arc::clone(&gated) as Arc<dyn RemoteJobStore>,
            Arc::new(printer),
            fast_settings(),
        ));

        let attempts: Vec<_> = (0..2)
            .map(|_| {
                let supervisor = Arc::clone(&supervisor);
                tokio::spawn(async move { supervisor.connect("tok-slow").await })
            })
            .collect();
        tokio::time::sleep(Duration::from_millis(50)).await;
        gated.release();

        for attempt in attempts {
            attempt.await.expect("join").expect("connect");
        }
        assert_eq!(supervisor.connected_stations().await.len(), 1);
        supervisor.disconnect_all().await;
    }

    #[tokio::test]
    async fn stations_print_their_own_jobs() {
        let store = MemoryStore::new();
        let kitchen = station(&store, "Cozinha", "tok-a", Some("POS-80"));
        let bar = station(&store, "Bar", "tok-b", Some("Balcao"));
        let (printer, mut prints) = RecordingPrinter::new();
        let supervisor = supervisor(&store, printer);

        supervisor.connect("tok-a").await.expect("kitchen");
        supervisor.connect("tok-b").await.expect("bar");

        store
            .insert_job(Job::new(bar.id.clone(), "caipirinha"))
            .expect("insert");
        assert_eq!(
            next_print(&mut prints).await,
            ("Balcao".into(), "caipirinha".into())
        );
        store
            .insert_job(Job::new(kitchen.id.clone(), "feijoada"))
            .expect("insert");
        assert_eq!(
            next_print(&mut prints).await,
            ("POS-80".into(), "feijoada".into())
        );
        supervisor.disconnect_all().await;
    }

    #[tokio::test]
    async fn recent_jobs_merge_stations_newest_first() {
        let store = MemoryStore::new();
        let kitchen = station(&store, "Cozinha", "tok-a", None);
        let bar = station(&store, "Bar", "tok-b", None);
        for (i, owner) in [&kitchen, &bar, &kitchen].into_iter().enumerate() {
            let mut job = Job::new(owner.id.clone(), format!("job {i}"));
            job.status = JobStatus::Printed;
            job.created_at = Utc::now() - chrono::Duration::minutes(10 - i as i64);
            store.seed_job(job).expect("seed");
        }
        let (printer, _prints) = RecordingPrinter::new();
        let supervisor = supervisor(&store, printer);
        supervisor.connect("tok-a").await.expect("kitchen");
        supervisor.connect("tok-b").await.expect("bar");

        let jobs = supervisor.recent_jobs(2, None, None).await.expect("recent");
        let payloads: Vec<&str> = jobs.iter().map(|j| j.payload.as_str()).collect();
        assert_eq!(payloads, ["job 2", "job 1"]);
        supervisor.disconnect_all().await;
    }

    #[tokio::test]
    async fn reprint_prefers_selected_printer() {
        let store = MemoryStore::new();
        station(&store, "Cozinha", "tok-a", Some("Balcao"));
        let (printer, mut prints) = RecordingPrinter::new();
        let supervisor = supervisor(&store, printer);
        supervisor.connect("tok-a").await.expect("connect");
        let job = JobId::from("j1");

        supervisor
            .reprint(&job, "again", Some("tok-a"))
            .await
            .expect("station default");
        assert_eq!(next_print(&mut prints).await.0, "Balcao");

        supervisor
            .select_printer(None, "Escritorio")
            .await
            .expect("select");
        supervisor
            .reprint(&job, "again", Some("tok-a"))
            .await
            .expect("selected");
        assert_eq!(next_print(&mut prints).await.0, "Escritorio");
        supervisor.disconnect_all().await;
    }

    #[tokio::test]
    async fn reprint_without_station_uses_host_default() {
        let store = MemoryStore::new();
        let (printer, mut prints) = RecordingPrinter::new();
        let supervisor = supervisor(&store, printer);

        supervisor
            .reprint(&JobId::from("j1"), "again", None)
            .await
            .expect("host default");
        assert_eq!(next_print(&mut prints).await.0, "POS-80");
    }

    #[tokio::test]
    async fn select_printer_updates_station_default() {
        let store = MemoryStore::new();
        let kitchen = station(&store, "Cozinha", "tok-a", None);
        let (printer, _prints) = RecordingPrinter::new();
        let supervisor = supervisor(&store, printer);
        supervisor.connect("tok-a").await.expect("connect");

        supervisor
            .select_printer(Some("tok-a"), "Balcao")
            .await
            .expect("select");
        let stored = store.station(&kitchen.id).expect("store").expect("station");
        assert_eq!(stored.default_printer_name.as_deref(), Some("Balcao"));
        assert!(matches!(
            supervisor.select_printer(Some("tok-x"), "Balcao").await,
            Err(BridgeError::NotConnected)
        ));
        supervisor.disconnect_all().await;
    }

    #[tokio::test]
    async fn test_print_names_station_or_local_fallback() {
        let store = MemoryStore::new();
        station(&store, "Cozinha", "tok-a", None);
        let (printer, mut prints) = RecordingPrinter::new();
        let supervisor = supervisor(&store, printer);

        supervisor.test_print("POS-80", None).await.expect("local");
        assert!(next_print(&mut prints).await.1.contains(LOCAL_TEST_STATION));

        supervisor.connect("tok-a").await.expect("connect");
        supervisor
            .test_print("POS-80", Some("tok-a"))
            .await
            .expect("station");
        assert!(next_print(&mut prints).await.1.contains("Station: Cozinha"));
        supervisor.disconnect_all().await;
    }

    #[tokio::test]
    async fn saved_filter_is_installed_on_connect() {
        let store = MemoryStore::new();
        let kitchen = station(&store, "Cozinha", "tok-a", Some("POS-80"));
        let (printer, mut prints) = RecordingPrinter::new();
        let supervisor = supervisor(&store, printer);
        supervisor
            .connect_with_categories("tok-a", vec!["Comidas".into()])
            .await
            .expect("connect");

        store
            .insert_job(Job::new(kitchen.id.clone(), "suco").with_categories(["Bebidas"]))
            .expect("insert");
        store
            .insert_job(Job::new(kitchen.id.clone(), "pastel").with_categories(["Comidas"]))
            .expect("insert");
        assert_eq!(next_print(&mut prints).await.1, "pastel");
        supervisor.disconnect_all().await;
    }

    #[tokio::test]
    async fn rename_works_without_connection() {
        let store = MemoryStore::new();
        let kitchen = station(&store, "Cozinha", "tok-a", None);
        let (printer, _prints) = RecordingPrinter::new();
        let supervisor = supervisor(&store, printer);

        supervisor.rename_station("tok-a", "Cozinha 2").await.expect("rename");
        let stored = store.station(&kitchen.id).expect("store").expect("station");
        assert_eq!(stored.name, "Cozinha 2");
    }

    #[tokio::test]
    async fn events_are_forwarded_until_disconnect() {
        let store = MemoryStore::new();
        station(&store, "Cozinha", "tok-a", None);
        let (printer, _prints) = RecordingPrinter::new();
        let supervisor = supervisor(&store, printer);

        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let _sub = supervisor.on_status(move |status| {
            sink.lock().expect("events").push(status.connected);
        });

        supervisor.connect("tok-a").await.expect("connect");
        supervisor.disconnect("tok-a").await;
        eventually(|| seen.lock().expect("events").len() == 2).await;
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(*seen.lock().expect("events"), [true, false]);
    }
}

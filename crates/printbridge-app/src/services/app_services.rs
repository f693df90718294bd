// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Central service layer.
//
// Holds the loaded config and the printer, and builds the remote store on
// first use so printer-only commands work without store credentials.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{info, warn};

use printbridge_core::AppConfig;
use printbridge_core::config::StationConfig;
use printbridge_core::error::{BridgeError, Result};
use printbridge_core::types::{Job, JobId, OrderStatus, PrinterInfo, Station};
use printbridge_print::{PrintDispatcher, PrintService};
use printbridge_store::{RecentJobsQuery, RemoteJobStore, RestStore, StoreCredentials};
use printbridge_sync::{EngineSettings, LOCAL_TEST_STATION, StationSupervisor};

/// How far back `reprint` searches for a job's payload.
const REPRINT_LOOKUP_LIMIT: usize = 500;

pub struct AppServices {
    config: AppConfig,
    config_path: PathBuf,
    store: Option<Arc<dyn RemoteJobStore>>,
    printer: Arc<dyn PrintService>,
}

impl AppServices {
    /// Load the config at `config_path`, apply environment overrides and
    /// prepare the system printer.
    pub fn init(config_path: PathBuf) -> Result<Self> {
        let mut config = AppConfig::load(&config_path)?;
        config.apply_env();
        info!(path = %config_path.display(), "config loaded");

        // A broken endpoint must not lock the user out of `config set-store`.
        let store = if config.store.is_complete() {
            match rest_store(&config) {
                Ok(store) => Some(store),
                Err(e) => {
                    warn!(error = %e, "store settings unusable");
                    None
                }
            }
        } else {
            None
        };
        let printer = Arc::new(PrintDispatcher::from_settings(&config.dispatch));

        Ok(Self {
            config,
            config_path,
            store,
            printer,
        })
    }

    /// Services over explicit parts. Nothing is persisted unless `save` is
    /// called.
    pub fn with_parts(
        config: AppConfig,
        config_path: PathBuf,
        store: Option<Arc<dyn RemoteJobStore>>,
        printer: Arc<dyn PrintService>,
    ) -> Self {
        Self {
            config,
            config_path,
            store,
            printer,
        }
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn config_mut(&mut self) -> &mut AppConfig {
        &mut self.config
    }

    pub fn config_path(&self) -> &Path {
        &self.config_path
    }

    pub fn save(&self) -> Result<()> {
        self.config.save(&self.config_path)?;
        info!(path = %self.config_path.display(), "config saved");
        Ok(())
    }

    pub fn store(&self) -> Result<Arc<dyn RemoteJobStore>> {
        self.store.clone().ok_or_else(|| {
            BridgeError::Config(
                "store url and key are missing or invalid (run `printbridge config set-store`)"
                    .into(),
            )
        })
    }

    pub fn printer(&self) -> Arc<dyn PrintService> {
        Arc::clone(&self.printer)
    }

    pub fn supervisor(&self) -> Result<StationSupervisor> {
        Ok(StationSupervisor::new(
            self.store()?,
            self.printer(),
            EngineSettings::from(&self.config),
        )
        .with_selected_printer(self.config.selected_printer.clone()))
    }

    // -- Printers -------------------------------------------------------------

    pub async fn list_printers(&self) -> Result<Vec<PrinterInfo>> {
        self.printer.list_printers().await
    }

    /// Remember `name` as the selected printer. With `station`, also make it
    /// the remote default of that station.
    pub async fn select_printer(&mut self, name: &str, station: Option<&str>) -> Result<()> {
        if let Some(token) = station {
            let resolved = self.resolve_token(token).await?;
            self.store()?
                .set_default_printer(&resolved.id, name)
                .await?;
            if let Some(configured) = self.config.station_mut(token) {
                configured.printer = Some(name.to_owned());
            }
        }
        self.config.selected_printer = Some(name.to_owned());
        self.save()
    }

    /// Explicit printer, else the selected one, else the host default.
    pub async fn pick_printer(&self, explicit: Option<String>) -> Result<String> {
        if let Some(name) = explicit.or_else(|| self.config.selected_printer.clone()) {
            return Ok(name);
        }
        self.printer
            .default_printer()
            .await?
            .ok_or(BridgeError::NoPrinterConfigured)
    }

    pub async fn test_print(&self, printer: Option<String>, station: Option<&str>) -> Result<String> {
        let printer = self.pick_printer(printer).await?;
        let name = match station {
            Some(token) => self.resolve_token(token).await?.name,
            None => LOCAL_TEST_STATION.to_owned(),
        };
        self.printer.test_print(&printer, &name).await?;
        Ok(printer)
    }

    // -- Stations -------------------------------------------------------------

    async fn resolve_token(&self, token: &str) -> Result<Station> {
        self.store()?
            .resolve_station(token)
            .await?
            .ok_or(BridgeError::StationNotFound)
    }

    /// Remote stations of every active configured connection. Unknown
    /// tokens are skipped with a warning.
    pub async fn resolve_stations(&self) -> Result<Vec<Station>> {
        let store = self.store()?;
        let mut stations = Vec::new();
        for configured in self.config.active_stations() {
            match store.resolve_station(&configured.token).await? {
                Some(station) => stations.push(station),
                None => warn!(station = %configured.name, "station token not found, skipped"),
            }
        }
        Ok(stations)
    }

    pub async fn rename_station(&mut self, token: &str, name: &str) -> Result<()> {
        self.store()?.rename_station(token, name).await?;
        if let Some(configured) = self.config.station_mut(token) {
            configured.name = name.to_owned();
            self.save()?;
        }
        Ok(())
    }

    /// Persist the local category filter of a configured station.
    pub fn set_categories(&mut self, token: &str, categories: Vec<String>) -> Result<()> {
        let configured = self.config.station_mut(token).ok_or_else(|| {
            BridgeError::Config(format!(
                "no configured station with token {token} (add it with `config add-station`)"
            ))
        })?;
        configured.categories = categories;
        self.save()
    }

    /// Add `station`, replacing a connection with the same token.
    pub fn upsert_station(&mut self, station: StationConfig) -> Result<()> {
        self.config.stations.retain(|s| s.token != station.token);
        self.config.stations.push(station);
        self.save()
    }

    pub fn remove_station(&mut self, token: &str) -> Result<bool> {
        let before = self.config.stations.len();
        self.config.stations.retain(|s| s.token != token);
        let removed = self.config.stations.len() != before;
        if removed {
            self.save()?;
        }
        Ok(removed)
    }

    // -- Jobs -----------------------------------------------------------------

    /// Printed and cancelled jobs of the configured stations, newest first.
    pub async fn recent_jobs(
        &self,
        limit: usize,
        from: Option<DateTime<Utc>>,
        to: Option<DateTime<Utc>>,
    ) -> Result<Vec<Job>> {
        let store = self.store()?;
        let mut jobs = Vec::new();
        for station in self.resolve_stations().await? {
            let query = RecentJobsQuery {
                station: Some(station.id),
                limit,
                from,
                to,
            };
            jobs.extend(store.fetch_recent_jobs(&query).await?);
        }
        jobs.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        jobs.truncate(limit);
        Ok(jobs)
    }

    pub async fn update_order_status(&self, job: &JobId, status: OrderStatus) -> Result<()> {
        self.store()?.set_order_status(job, status).await
    }

    /// Reprint `job`. The payload comes from `payload_file` or the recent
    /// history of the configured stations.
    pub async fn reprint(
        &self,
        job: &JobId,
        station: Option<&str>,
        payload_file: Option<&Path>,
    ) -> Result<()> {
        let payload = match payload_file {
            Some(path) => std::fs::read_to_string(path)?,
            None => self
                .recent_jobs(REPRINT_LOOKUP_LIMIT, None, None)
                .await?
                .into_iter()
                .find(|j| &j.id == job)
                .map(|j| j.payload)
                .ok_or_else(|| {
                    BridgeError::Config(format!(
                        "job {job} is not in the recent history (pass --payload-file)"
                    ))
                })?,
        };
        self.supervisor()?.reprint(job, &payload, station).await
    }
}

fn rest_store(config: &AppConfig) -> Result<Arc<dyn RemoteJobStore>> {
    let credentials = StoreCredentials::from_settings(&config.store)?;
    Ok(Arc::new(RestStore::new(credentials)?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    use async_trait::async_trait;
    use printbridge_core::types::JobStatus;
    use printbridge_store::MemoryStore;

    #[derive(Default)]
    struct Recorder {
        prints: Mutex<Vec<(String, String)>>,
    }

    #[async_trait]
    impl PrintService for Recorder {
        async fn print(&self, printer: &str, content: &str) -> Result<()> {
            self.prints
                .lock()
                .expect("prints")
                .push((printer.to_owned(), content.to_owned()));
            Ok(())
        }

        async fn list_printers(&self) -> Result<Vec<PrinterInfo>> {
            Ok(vec![PrinterInfo {
                name: "POS-80".into(),
                is_default: true,
            }])
        }
    }

    fn services(dir: &Path) -> (AppServices, MemoryStore, Arc<Recorder>) {
        let store = MemoryStore::new();
        let printer = Arc::new(Recorder::default());
        let mut config = AppConfig::default();
        config.stations.push(StationConfig {
            id: "k".into(),
            name: "Kitchen".into(),
            token: "tok-k".into(),
            printer: None,
            categories: Vec::new(),
            is_active: true,
        });
        let services = AppServices::with_parts(
            config,
            dir.join("config.json"),
            Some(Arc::new(store.clone())),
            Arc::clone(&printer) as Arc<dyn PrintService>,
        );
        (services, store, printer)
    }

    #[tokio::test]
    async fn reprint_finds_payload_in_history() {
        let dir = tempfile::tempdir().expect("tempdir");
        let (services, store, printer) = services(dir.path());
        let station = Station::new("Cozinha", "tok-k");
        store.add_station(station.clone()).expect("station");
        let mut job = Job::new(station.id.clone(), "2x pastel");
        job.status = JobStatus::Printed;
        let id = job.id.clone();
        store.seed_job(job).expect("seed");

        services.reprint(&id, None, None).await.expect("reprint");
        assert_eq!(
            *printer.prints.lock().expect("prints"),
            [("POS-80".to_string(), "2x pastel".to_string())]
        );

        let missing = services.reprint(&JobId::from("nope"), None, None).await;
        assert!(matches!(missing, Err(BridgeError::Config(_))));
    }

    #[tokio::test]
    async fn select_printer_persists_and_updates_station() {
        let dir = tempfile::tempdir().expect("tempdir");
        let (mut services, store, _) = services(dir.path());
        let station = Station::new("Cozinha", "tok-k");
        store.add_station(station.clone()).expect("station");

        services
            .select_printer("Balcao", Some("tok-k"))
            .await
            .expect("select");
        let stored = store.station(&station.id).expect("store").expect("station");
        assert_eq!(stored.default_printer_name.as_deref(), Some("Balcao"));

        let reloaded = AppConfig::load(services.config_path()).expect("load");
        assert_eq!(reloaded.selected_printer.as_deref(), Some("Balcao"));
        assert_eq!(reloaded.stations[0].printer.as_deref(), Some("Balcao"));
    }

    #[tokio::test]
    async fn categories_need_a_configured_station() {
        let dir = tempfile::tempdir().expect("tempdir");
        let (mut services, _, _) = services(dir.path());

        services
            .set_categories("tok-k", vec!["Bebidas".into()])
            .expect("configured");
        assert_eq!(services.config().stations[0].categories, ["Bebidas".to_string()]);
        assert!(services.set_categories("tok-x", Vec::new()).is_err());
    }

    #[test]
    fn missing_store_is_a_config_error() {
        let services = AppServices::with_parts(
            AppConfig::default(),
            PathBuf::from("/nonexistent/config.json"),
            None,
            Arc::new(Recorder::default()),
        );
        assert!(matches!(services.store(), Err(BridgeError::Config(_))));
    }
}

// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// In-process job store.
//
// Holds stations and jobs in a mutex-guarded table and fans inserts out over
// a broadcast channel. An outage switch makes every call fail with
// `StoreUnavailable`, which lets tests drive the engine's retry paths.

use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::{broadcast, mpsc};
use tracing::debug;

use printbridge_core::category::categories_match;
use printbridge_core::error::{BridgeError, Result};
use printbridge_core::types::{
    Job, JobId, JobStatus, OrderStatus, Station, StationId, StationSummary,
};

use crate::store::{JobSubscription, RecentJobsQuery, RemoteJobStore, StatusUpdate};

const FEED_CAPACITY: usize = 256;

#[derive(Debug, Default)]
struct Tables {
    stations: Vec<Station>,
    jobs: Vec<Job>,
    offline: bool,
    status_writes: Vec<(JobId, StatusUpdate)>,
}

/// A job store kept entirely in memory.
#[derive(Debug, Clone)]
pub struct MemoryStore {
    tables: Arc<Mutex<Tables>>,
    inserts: broadcast::Sender<Job>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        let (inserts, _) = broadcast::channel(FEED_CAPACITY);
        Self {
            tables: Arc::new(Mutex::new(Tables::default())),
            inserts,
        }
    }

    fn tables(&self) -> Result<MutexGuard<'_, Tables>> {
        self.tables
            .lock()
            .map_err(|_| BridgeError::StoreUnavailable("store lock poisoned".into()))
    }

    fn online(&self) -> Result<MutexGuard<'_, Tables>> {
        let tables = self.tables()?;
        if tables.offline {
            return Err(BridgeError::StoreUnavailable("store is offline".into()));
        }
        Ok(tables)
    }

    /// Register a station, replacing any with the same id.
    pub fn add_station(&self, station: Station) -> Result<()> {
        let mut tables = self.tables()?;
        tables.stations.retain(|s| s.id != station.id);
        tables.stations.push(station);
        Ok(())
    }

    /// Store a job without notifying subscribers, as if it was created while
    /// nobody was listening.
    pub fn seed_job(&self, job: Job) -> Result<()> {
        self.tables()?.jobs.push(job);
        Ok(())
    }

    /// Store a job and notify subscribers of its station.
    pub fn insert_job(&self, job: Job) -> Result<()> {
        self.tables()?.jobs.push(job.clone());
        // No receivers is fine: nobody is subscribed yet.
        let _ = self.inserts.send(job);
        Ok(())
    }

    /// Re-deliver an existing job on the push feed.
    pub fn replay_insert(&self, id: &JobId) -> Result<()> {
        if let Some(job) = self.job(id)? {
            let _ = self.inserts.send(job);
        }
        Ok(())
    }

    pub fn job(&self, id: &JobId) -> Result<Option<Job>> {
        Ok(self.tables()?.jobs.iter().find(|j| &j.id == id).cloned())
    }

    pub fn station(&self, id: &StationId) -> Result<Option<Station>> {
        Ok(self
            .tables()?
            .stations
            .iter()
            .find(|s| &s.id == id)
            .cloned())
    }

    /// Every status write in the order it was received.
    pub fn status_writes(&self) -> Result<Vec<(JobId, StatusUpdate)>> {
        Ok(self.tables()?.status_writes.clone())
    }

    /// Simulate an outage: while offline every contract call fails.
    pub fn set_offline(&self, offline: bool) -> Result<()> {
        self.tables()?.offline = offline;
        Ok(())
    }

    pub fn cancel_job(&self, id: &JobId) -> Result<()> {
        let mut tables = self.tables()?;
        let job = tables
            .jobs
            .iter_mut()
            .find(|j| &j.id == id)
            .ok_or_else(|| BridgeError::StoreRejected(format!("job {id} not found")))?;
        job.status = JobStatus::Cancelled;
        Ok(())
    }
}

#[async_trait]
impl RemoteJobStore for MemoryStore {
    async fn resolve_station(&self, token: &str) -> Result<Option<Station>> {
        Ok(self
            .online()?
            .stations
            .iter()
            .find(|s| s.token == token)
            .cloned())
    }

    async fn touch_last_seen(&self, station: &StationId) -> Result<()> {
        let mut tables = self.online()?;
        if let Some(s) = tables.stations.iter_mut().find(|s| &s.id == station) {
            s.last_seen_at = Some(Utc::now());
        }
        Ok(())
    }

    async fn set_default_printer(&self, station: &StationId, printer: &str) -> Result<()> {
        let mut tables = self.online()?;
        let s = tables
            .stations
            .iter_mut()
            .find(|s| &s.id == station)
            .ok_or(BridgeError::StationNotFound)?;
        s.default_printer_name = Some(printer.to_owned());
        Ok(())
    }

    async fn fetch_pending_jobs(&self, station: &StationId) -> Result<Vec<Job>> {
        let tables = self.online()?;
        let filter = tables
            .stations
            .iter()
            .find(|s| &s.id == station)
            .map(|s| s.categories().to_vec())
            .ok_or(BridgeError::StationNotFound)?;

        let mut jobs: Vec<Job> = tables
            .jobs
            .iter()
            .filter(|j| &j.station_id == station)
            .filter(|j| j.status == JobStatus::Pending)
            .filter(|j| categories_match(&filter, j.categories()))
            .cloned()
            .collect();
        jobs.sort_by_key(|j| j.created_at);
        Ok(jobs)
    }

    async fn set_job_status(&self, job: &JobId, update: StatusUpdate) -> Result<()> {
        let mut tables = self.online()?;
        let row = tables
            .jobs
            .iter_mut()
            .find(|j| &j.id == job)
            .ok_or_else(|| BridgeError::StoreRejected(format!("job {job} not found")))?;
        update.apply(row);
        tables.status_writes.push((job.clone(), update));
        Ok(())
    }

    async fn set_order_status(&self, job: &JobId, status: OrderStatus) -> Result<()> {
        let mut tables = self.online()?;
        let row = tables
            .jobs
            .iter_mut()
            .find(|j| &j.id == job)
            .ok_or_else(|| BridgeError::StoreRejected(format!("job {job} not found")))?;
        if row.order_status_locked() {
            return Err(BridgeError::OrderStatusLocked(job.clone()));
        }
        row.order_status = status;
        row.order_status_updated_at = Some(Utc::now());
        Ok(())
    }

    async fn subscribe_new_jobs(&self, station: &StationId) -> Result<JobSubscription> {
        drop(self.online()?);
        let mut inserts = self.inserts.subscribe();
        let (tx, rx) = mpsc::channel(FEED_CAPACITY);
        let station = station.clone();

        let task = tokio::spawn(async move {
            loop {
                match inserts.recv().await {
                    Ok(job) if job.station_id == station => {
                        if tx.send(job).await.is_err() {
                            break;
                        }
                    }
                    Ok(_) => {}
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        debug!(skipped, "memory feed lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });
        Ok(JobSubscription::new(rx, task))
    }

    async fn fetch_recent_jobs(&self, query: &RecentJobsQuery) -> Result<Vec<Job>> {
        let tables = self.online()?;
        let mut jobs: Vec<Job> = tables
            .jobs
            .iter()
            .filter(|j| query.admits(j))
            .cloned()
            .map(|mut j| {
                j.station = tables
                    .stations
                    .iter()
                    .find(|s| s.id == j.station_id)
                    .map(|s| StationSummary {
                        id: s.id.clone(),
                        name: s.name.clone(),
                        token: s.token.clone(),
                    });
                j
            })
            .collect();
        jobs.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        jobs.truncate(query.limit);
        Ok(jobs)
    }

    async fn rename_station(&self, token: &str, name: &str) -> Result<()> {
        let mut tables = self.online()?;
        let s = tables
            .stations
            .iter_mut()
            .find(|s| s.token == token)
            .ok_or(BridgeError::StationNotFound)?;
        s.name = name.to_owned();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn store_with_station(categories: Option<Vec<String>>) -> (MemoryStore, Station) {
        let store = MemoryStore::new();
        let mut station = Station::new("Cozinha", "tok-cozinha");
        station.categories = categories;
        store.add_station(station.clone()).expect("add station");
        (store, station)
    }

    #[tokio::test]
    async fn pending_jobs_are_oldest_first_and_filtered() {
        let (store, station) = store_with_station(Some(vec!["Comidas".into()]));
        let now = Utc::now();

        let mut late = Job::new(station.id.clone(), "late");
        late.created_at = now;
        let mut early = Job::new(station.id.clone(), "early");
        early.created_at = now - chrono::Duration::seconds(5);
        let drink = Job::new(station.id.clone(), "drink").with_categories(["Bebidas"]);

        for job in [late, early, drink] {
            store.seed_job(job).expect("seed");
        }

        let pending = store.fetch_pending_jobs(&station.id).await.expect("fetch");
        let payloads: Vec<&str> = pending.iter().map(|j| j.payload.as_str()).collect();
        assert_eq!(payloads, ["early", "late"]);
    }

    #[tokio::test]
    async fn cancelled_job_rejects_order_status() {
        let (store, station) = store_with_station(None);
        let job = Job::new(station.id.clone(), "x");
        let id = job.id.clone();
        store.seed_job(job).expect("seed");
        store.cancel_job(&id).expect("cancel");

        let err = store
            .set_order_status(&id, OrderStatus::Ready)
            .await
            .expect_err("locked");
        assert!(matches!(err, BridgeError::OrderStatusLocked(_)));
    }

    #[tokio::test]
    async fn subscription_only_sees_own_station() {
        let (store, station) = store_with_station(None);
        let mut feed = store.subscribe_new_jobs(&station.id).await.expect("subscribe");

        store
            .insert_job(Job::new(StationId::from("elsewhere"), "skip"))
            .expect("insert");
        store
            .insert_job(Job::new(station.id.clone(), "mine"))
            .expect("insert");

        let job = tokio::time::timeout(Duration::from_secs(1), feed.next())
            .await
            .expect("timely")
            .expect("job");
        assert_eq!(job.payload, "mine");
    }

    #[tokio::test]
    async fn offline_store_fails_as_unavailable() {
        let (store, _) = store_with_station(None);
        store.set_offline(true).expect("toggle");
        let err = store
            .resolve_station("tok-cozinha")
            .await
            .expect_err("offline");
        assert!(err.is_transient());
    }

    #[tokio::test]
    async fn recent_jobs_embed_station_newest_first() {
        let (store, station) = store_with_station(None);
        let now = Utc::now();
        for (i, payload) in ["first", "second"].into_iter().enumerate() {
            let mut job = Job::new(station.id.clone(), payload);
            job.status = JobStatus::Printed;
            job.created_at = now + chrono::Duration::seconds(i as i64);
            store.seed_job(job).expect("seed");
        }

        let recent = store
            .fetch_recent_jobs(&RecentJobsQuery::default())
            .await
            .expect("recent");
        assert_eq!(recent[0].payload, "second");
        assert_eq!(
            recent[0].station.as_ref().map(|s| s.name.as_str()),
            Some("Cozinha")
        );
    }
}

// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// The contract every remote job store implements.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::{Value, json};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use printbridge_core::error::Result;
use printbridge_core::types::{Job, JobId, JobStatus, OrderStatus, Station, StationId};

/// Status write-back performed by the engine after claiming or dispatching.
#[derive(Debug, Clone, PartialEq)]
pub enum StatusUpdate {
    /// Claim the job before dispatch.
    Printing,
    /// Dispatch succeeded at the given instant.
    Printed { at: DateTime<Utc> },
    /// Dispatch failed with a human-readable reason.
    Failed { message: String },
}

impl StatusUpdate {
    pub fn printed_now() -> Self {
        Self::Printed { at: Utc::now() }
    }

    pub fn status(&self) -> JobStatus {
        match self {
            Self::Printing => JobStatus::Printing,
            Self::Printed { .. } => JobStatus::Printed,
            Self::Failed { .. } => JobStatus::Error,
        }
    }

    /// Column patch sent to the store.
    pub fn to_patch(&self) -> Value {
        match self {
            Self::Printing => json!({ "status": "printing" }),
            Self::Printed { at } => json!({
                "status": "printed",
                "printed_at": at.to_rfc3339(),
            }),
            Self::Failed { message } => json!({
                "status": "error",
                "error_message": message,
            }),
        }
    }

    /// Apply the update to a local copy of the job.
    pub fn apply(&self, job: &mut Job) {
        job.status = self.status();
        match self {
            Self::Printing => {}
            Self::Printed { at } => job.printed_at = Some(*at),
            Self::Failed { message } => job.error_message = Some(message.clone()),
        }
    }
}

/// Filters for the recent-jobs listing.
#[derive(Debug, Clone, PartialEq)]
pub struct RecentJobsQuery {
    /// Restrict to one station; `None` lists every station.
    pub station: Option<StationId>,
    pub limit: usize,
    /// Inclusive lower bound on `created_at`.
    pub from: Option<DateTime<Utc>>,
    /// Inclusive upper bound on `created_at`.
    pub to: Option<DateTime<Utc>>,
}

impl Default for RecentJobsQuery {
    fn default() -> Self {
        Self {
            station: None,
            limit: 50,
            from: None,
            to: None,
        }
    }
}

impl RecentJobsQuery {
    pub fn for_station(station: StationId, limit: usize) -> Self {
        Self {
            station: Some(station),
            limit,
            ..Self::default()
        }
    }

    /// Whether a job falls inside the station and date range of this query.
    pub fn admits(&self, job: &Job) -> bool {
        if !matches!(job.status, JobStatus::Printed | JobStatus::Cancelled) {
            return false;
        }
        if let Some(station) = &self.station
            && &job.station_id != station
        {
            return false;
        }
        if let Some(from) = self.from
            && job.created_at < from
        {
            return false;
        }
        if let Some(to) = self.to
            && job.created_at > to
        {
            return false;
        }
        true
    }
}

/// Stream of newly inserted jobs for one station.
///
/// Dropping the subscription (or calling [`JobSubscription::unsubscribe`])
/// stops the producing task.
#[derive(Debug)]
pub struct JobSubscription {
    jobs: mpsc::Receiver<Job>,
    task: Option<JoinHandle<()>>,
}

impl JobSubscription {
    pub fn new(jobs: mpsc::Receiver<Job>, task: JoinHandle<()>) -> Self {
        Self {
            jobs,
            task: Some(task),
        }
    }

    /// Next inserted job, or `None` once the feed has ended.
    pub async fn next(&mut self) -> Option<Job> {
        self.jobs.recv().await
    }

    pub fn unsubscribe(mut self) {
        self.stop();
    }

    fn stop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
        self.jobs.close();
    }
}

impl Drop for JobSubscription {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Remote persistence and notification for stations and jobs.
#[async_trait]
pub trait RemoteJobStore: Send + Sync {
    /// Look up a station by its token. `Ok(None)` means no such station.
    async fn resolve_station(&self, token: &str) -> Result<Option<Station>>;

    /// Record that the station is alive right now.
    async fn touch_last_seen(&self, station: &StationId) -> Result<()>;

    async fn set_default_printer(&self, station: &StationId, printer: &str) -> Result<()>;

    /// Pending jobs for a station, oldest first, with the station's persisted
    /// category filter already applied.
    async fn fetch_pending_jobs(&self, station: &StationId) -> Result<Vec<Job>>;

    async fn set_job_status(&self, job: &JobId, update: StatusUpdate) -> Result<()>;

    /// Fails with `OrderStatusLocked` when the job was cancelled.
    async fn set_order_status(&self, job: &JobId, status: OrderStatus) -> Result<()>;

    /// Push feed of jobs inserted for `station` from now on.
    async fn subscribe_new_jobs(&self, station: &StationId) -> Result<JobSubscription>;

    /// Printed and cancelled jobs, newest first, with the station summary
    /// embedded.
    async fn fetch_recent_jobs(&self, query: &RecentJobsQuery) -> Result<Vec<Job>>;

    async fn rename_station(&self, token: &str, name: &str) -> Result<()>;
}

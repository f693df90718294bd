// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// PostgREST-backed job store.
//
// Reads and writes go to `/rest/v1/print_stations` and `/rest/v1/print_jobs`
// with the anonymous key sent both as `apikey` and as a bearer token. Insert
// notifications come from the realtime websocket (see `realtime`).

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use reqwest::header::{AUTHORIZATION, HeaderMap, HeaderValue};
use reqwest::{Response, StatusCode};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use tokio::sync::mpsc;
use tracing::{debug, instrument};
use url::Url;

use printbridge_core::category::categories_match;
use printbridge_core::config::StoreSettings;
use printbridge_core::error::{BridgeError, Result};
use printbridge_core::types::{Job, JobId, JobStatus, OrderStatus, Station, StationId};

use crate::realtime::{self, JOBS_TABLE, RealtimeSettings};
use crate::store::{JobSubscription, RecentJobsQuery, RemoteJobStore, StatusUpdate};

const STATIONS_TABLE: &str = "print_stations";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(15);
const FEED_CAPACITY: usize = 64;

/// Endpoint and anonymous key of the remote store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreCredentials {
    pub base_url: Url,
    pub api_key: String,
}

impl StoreCredentials {
    pub fn new(url: &str, api_key: impl Into<String>) -> Result<Self> {
        let api_key = api_key.into();
        if api_key.trim().is_empty() {
            return Err(BridgeError::Config("store API key is empty".into()));
        }
        let base_url = Url::parse(url.trim())
            .map_err(|e| BridgeError::Config(format!("invalid store URL '{url}': {e}")))?;
        Ok(Self { base_url, api_key })
    }

    pub fn from_settings(settings: &StoreSettings) -> Result<Self> {
        if !settings.is_complete() {
            return Err(BridgeError::Config(
                "store URL and API key must both be set".into(),
            ));
        }
        Self::new(&settings.url, settings.api_key.clone())
    }

    /// URL of a PostgREST table endpoint.
    pub fn table_url(&self, table: &str) -> Url {
        let mut url = self.base_url.clone();
        let path = format!("{}/rest/v1/{table}", self.base_url.path().trim_end_matches('/'));
        url.set_path(&path);
        url.set_query(None);
        url
    }
}

/// Map a non-success HTTP status to the error taxonomy.
pub fn classify_status(status: StatusCode, body: &str) -> BridgeError {
    let detail = format!("HTTP {}: {}", status.as_u16(), body.trim());
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => BridgeError::Authentication(detail),
        StatusCode::REQUEST_TIMEOUT | StatusCode::TOO_MANY_REQUESTS => {
            BridgeError::StoreUnavailable(detail)
        }
        s if s.is_server_error() => BridgeError::StoreUnavailable(detail),
        _ => BridgeError::StoreRejected(detail),
    }
}

fn timestamp(at: &DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Query parameters for the pending sweep.
pub fn pending_query(station: &StationId) -> Vec<(&'static str, String)> {
    vec![
        ("select", "*".into()),
        ("station_id", format!("eq.{station}")),
        ("status", "eq.pending".into()),
        ("order", "created_at.asc".into()),
    ]
}

/// Query parameters for the recent-jobs listing.
pub fn recent_query(query: &RecentJobsQuery) -> Vec<(&'static str, String)> {
    let mut params = vec![
        ("select", format!("*,station:{STATIONS_TABLE}(id,name,token)")),
        ("status", "in.(printed,cancelled)".into()),
    ];
    if let Some(station) = &query.station {
        params.push(("station_id", format!("eq.{station}")));
    }
    if let Some(from) = &query.from {
        params.push(("created_at", format!("gte.{}", timestamp(from))));
    }
    if let Some(to) = &query.to {
        params.push(("created_at", format!("lte.{}", timestamp(to))));
    }
    params.push(("order", "created_at.desc".into()));
    params.push(("limit", query.limit.to_string()));
    params
}

#[derive(Debug, Deserialize)]
struct CategoriesRow {
    #[serde(default)]
    categories: Option<Vec<String>>,
}

#[derive(Debug, Deserialize)]
struct StatusRow {
    status: JobStatus,
}

/// Job store speaking PostgREST plus the realtime websocket.
#[derive(Debug, Clone)]
pub struct RestStore {
    http: reqwest::Client,
    credentials: StoreCredentials,
    realtime: RealtimeSettings,
}

impl RestStore {
    pub fn new(credentials: StoreCredentials) -> Result<Self> {
        let mut headers = HeaderMap::new();
        let key = HeaderValue::from_str(&credentials.api_key)
            .map_err(|_| BridgeError::Config("API key is not a valid header value".into()))?;
        let bearer = HeaderValue::from_str(&format!("Bearer {}", credentials.api_key))
            .map_err(|_| BridgeError::Config("API key is not a valid header value".into()))?;
        headers.insert("apikey", key);
        headers.insert(AUTHORIZATION, bearer);

        let http = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| BridgeError::Config(format!("HTTP client: {e}")))?;

        Ok(Self {
            http,
            credentials,
            realtime: RealtimeSettings::default(),
        })
    }

    pub fn with_realtime(mut self, settings: RealtimeSettings) -> Self {
        self.realtime = settings;
        self
    }

    pub fn credentials(&self) -> &StoreCredentials {
        &self.credentials
    }

    async fn check(response: Response) -> Result<Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(classify_status(status, &body))
    }

    async fn select<T: DeserializeOwned>(
        &self,
        table: &str,
        query: &[(&str, String)],
    ) -> Result<Vec<T>> {
        let response = self
            .http
            .get(self.credentials.table_url(table))
            .query(query)
            .send()
            .await
            .map_err(unavailable)?;
        Self::check(response)
            .await?
            .json::<Vec<T>>()
            .await
            .map_err(|e| BridgeError::StoreRejected(format!("unexpected response body: {e}")))
    }

    /// PATCH matching rows, returning the updated rows.
    async fn update(&self, table: &str, query: &[(&str, String)], patch: &Value) -> Result<Vec<Value>> {
        let response = self
            .http
            .patch(self.credentials.table_url(table))
            .query(query)
            .header("Prefer", "return=representation")
            .json(patch)
            .send()
            .await
            .map_err(unavailable)?;
        Self::check(response)
            .await?
            .json::<Vec<Value>>()
            .await
            .map_err(|e| BridgeError::StoreRejected(format!("unexpected response body: {e}")))
    }
}

fn unavailable(e: reqwest::Error) -> BridgeError {
    BridgeError::StoreUnavailable(e.to_string())
}

#[async_trait]
impl RemoteJobStore for RestStore {
    #[instrument(skip_all)]
    async fn resolve_station(&self, token: &str) -> Result<Option<Station>> {
        let rows: Vec<Station> = self
            .select(
                STATIONS_TABLE,
                &[("select", "*".into()), ("token", format!("eq.{token}"))],
            )
            .await?;
        Ok(rows.into_iter().next())
    }

    #[instrument(skip(self), fields(station = %station))]
    async fn touch_last_seen(&self, station: &StationId) -> Result<()> {
        self.update(
            STATIONS_TABLE,
            &[("id", format!("eq.{station}"))],
            &json!({ "last_seen_at": timestamp(&Utc::now()) }),
        )
        .await?;
        Ok(())
    }

    #[instrument(skip(self), fields(station = %station))]
    async fn set_default_printer(&self, station: &StationId, printer: &str) -> Result<()> {
        let rows = self
            .update(
                STATIONS_TABLE,
                &[("id", format!("eq.{station}"))],
                &json!({ "default_printer_name": printer }),
            )
            .await?;
        if rows.is_empty() {
            return Err(BridgeError::StationNotFound);
        }
        Ok(())
    }

    #[instrument(skip(self), fields(station = %station))]
    async fn fetch_pending_jobs(&self, station: &StationId) -> Result<Vec<Job>> {
        let filter = self
            .select::<CategoriesRow>(
                STATIONS_TABLE,
                &[("select", "categories".into()), ("id", format!("eq.{station}"))],
            )
            .await?
            .into_iter()
            .next()
            .ok_or(BridgeError::StationNotFound)?
            .categories
            .unwrap_or_default();

        let jobs: Vec<Job> = self.select(JOBS_TABLE, &pending_query(station)).await?;
        let total = jobs.len();
        let jobs: Vec<Job> = jobs
            .into_iter()
            .filter(|j| categories_match(&filter, j.categories()))
            .collect();
        debug!(total, kept = jobs.len(), "pending jobs fetched");
        Ok(jobs)
    }

    #[instrument(skip(self, update), fields(job_id = %job, status = update.status().as_str()))]
    async fn set_job_status(&self, job: &JobId, update: StatusUpdate) -> Result<()> {
        self.update(JOBS_TABLE, &[("id", format!("eq.{job}"))], &update.to_patch())
            .await?;
        Ok(())
    }

    #[instrument(skip(self), fields(job_id = %job, order_status = status.as_str()))]
    async fn set_order_status(&self, job: &JobId, status: OrderStatus) -> Result<()> {
        let rows = self
            .update(
                JOBS_TABLE,
                &[
                    ("id", format!("eq.{job}")),
                    ("status", "neq.cancelled".into()),
                ],
                &json!({
                    "order_status": status.as_str(),
                    "order_status_updated_at": timestamp(&Utc::now()),
                }),
            )
            .await?;
        if !rows.is_empty() {
            return Ok(());
        }

        // Nothing updated: either the job is cancelled or it does not exist.
        let current: Vec<StatusRow> = self
            .select(
                JOBS_TABLE,
                &[("select", "status".into()), ("id", format!("eq.{job}"))],
            )
            .await?;
        match current.first() {
            Some(row) if row.status == JobStatus::Cancelled => {
                Err(BridgeError::OrderStatusLocked(job.clone()))
            }
            Some(_) => Err(BridgeError::StoreRejected(format!(
                "order status of job {job} was not updated"
            ))),
            None => Err(BridgeError::StoreRejected(format!("job {job} not found"))),
        }
    }

    async fn subscribe_new_jobs(&self, station: &StationId) -> Result<JobSubscription> {
        let ws_url = realtime::websocket_url(&self.credentials.base_url, &self.credentials.api_key)?;
        let (tx, rx) = mpsc::channel(FEED_CAPACITY);
        let task = tokio::spawn(realtime::run_feed(
            ws_url,
            self.credentials.api_key.clone(),
            station.clone(),
            self.realtime.clone(),
            tx,
        ));
        Ok(JobSubscription::new(rx, task))
    }

    #[instrument(skip(self), fields(limit = query.limit))]
    async fn fetch_recent_jobs(&self, query: &RecentJobsQuery) -> Result<Vec<Job>> {
        self.select(JOBS_TABLE, &recent_query(query)).await
    }

    #[instrument(skip(self, token))]
    async fn rename_station(&self, token: &str, name: &str) -> Result<()> {
        let rows = self
            .update(
                STATIONS_TABLE,
                &[("token", format!("eq.{token}"))],
                &json!({ "name": name }),
            )
            .await?;
        if rows.is_empty() {
            return Err(BridgeError::StationNotFound);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn table_url_keeps_base_path() {
        let creds = StoreCredentials::new("https://abc.example.co/", "anon").expect("creds");
        assert_eq!(
            creds.table_url("print_jobs").as_str(),
            "https://abc.example.co/rest/v1/print_jobs"
        );

        let proxied = StoreCredentials::new("http://localhost:8000/store", "anon").expect("creds");
        assert_eq!(
            proxied.table_url("print_stations").as_str(),
            "http://localhost:8000/store/rest/v1/print_stations"
        );
    }

    #[test]
    fn empty_key_is_rejected() {
        assert!(matches!(
            StoreCredentials::new("https://abc.example.co", " "),
            Err(BridgeError::Config(_))
        ));
    }

    #[test]
    fn status_codes_map_to_classes() {
        use printbridge_core::error::ErrorClass;

        assert_eq!(
            classify_status(StatusCode::UNAUTHORIZED, "").class(),
            ErrorClass::Authentication
        );
        assert_eq!(
            classify_status(StatusCode::BAD_GATEWAY, "").class(),
            ErrorClass::StoreUnavailable
        );
        assert!(matches!(
            classify_status(StatusCode::BAD_REQUEST, "bad filter"),
            BridgeError::StoreRejected(msg) if msg.contains("bad filter")
        ));
    }

    #[test]
    fn pending_query_is_oldest_first() {
        let params = pending_query(&StationId::from("st-1"));
        assert!(params.contains(&("station_id", "eq.st-1".to_string())));
        assert!(params.contains(&("order", "created_at.asc".to_string())));
    }

    #[test]
    fn recent_query_includes_range_and_embed() {
        let from = Utc.with_ymd_and_hms(2025, 3, 1, 0, 0, 0).single().expect("date");
        let query = RecentJobsQuery {
            station: None,
            limit: 20,
            from: Some(from),
            to: None,
        };
        let params = recent_query(&query);
        assert_eq!(params[0].1, "*,station:print_stations(id,name,token)");
        assert!(params.contains(&("created_at", "gte.2025-03-01T00:00:00.000Z".to_string())));
        assert!(params.contains(&("limit", "20".to_string())));
        assert!(!params.iter().any(|(k, _)| *k == "station_id"));
    }
}

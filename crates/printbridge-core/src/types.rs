// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Core domain types for the Printbridge station client.
//
// Field names follow the remote store's column names so that rows decode
// directly with serde.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique identifier for a print job (assigned by the remote store).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(pub String);

impl JobId {
    /// Generate a fresh random identifier (used by in-process stores).
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// First eight characters, for log lines.
    pub fn short(&self) -> &str {
        self.0.get(..8).unwrap_or(&self.0)
    }
}

impl std::fmt::Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for JobId {
    fn from(value: &str) -> Self {
        Self(value.to_owned())
    }
}

/// Unique identifier for a printing station.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StationId(pub String);

impl StationId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for StationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for StationId {
    fn from(value: &str) -> Self {
        Self(value.to_owned())
    }
}

/// Print lifecycle of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    /// Created by the order entry path, waiting for a station.
    Pending,
    /// Claimed by a station; dispatch in progress.
    Printing,
    /// Dispatched successfully.
    Printed,
    /// Dispatch failed; see `error_message`.
    Error,
    /// Cancelled upstream. Order status is frozen from here on.
    Cancelled,
}

impl JobStatus {
    /// Wire keyword, as stored remotely.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Printing => "printing",
            Self::Printed => "printed",
            Self::Error => "error",
            Self::Cancelled => "cancelled",
        }
    }
}

/// Business workflow of the order behind a job, independent of printing.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OrderStatus {
    #[default]
    #[serde(rename = "recebido")]
    Received,
    #[serde(rename = "em_preparo")]
    InPreparation,
    #[serde(rename = "pronto")]
    Ready,
    #[serde(rename = "entregue")]
    Delivered,
}

impl OrderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Received => "recebido",
            Self::InPreparation => "em_preparo",
            Self::Ready => "pronto",
            Self::Delivered => "entregue",
        }
    }
}

impl std::str::FromStr for OrderStatus {
    type Err = String;

    /// Accepts both the wire keyword and the English name.
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "recebido" | "received" => Ok(Self::Received),
            "em_preparo" | "in_preparation" | "preparing" => Ok(Self::InPreparation),
            "pronto" | "ready" => Ok(Self::Ready),
            "entregue" | "delivered" => Ok(Self::Delivered),
            other => Err(format!("unknown order status '{other}'")),
        }
    }
}

/// A printing station as stored remotely.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Station {
    pub id: StationId,
    pub name: String,
    /// Opaque credential, also the lookup key.
    pub token: String,
    #[serde(default)]
    pub default_printer_name: Option<String>,
    /// Categories this station prints. Absent or empty accepts everything.
    #[serde(default)]
    pub categories: Option<Vec<String>>,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub last_seen_at: Option<DateTime<Utc>>,
    #[serde(default = "default_true")]
    pub is_active: bool,
}

fn default_true() -> bool {
    true
}

impl Station {
    pub fn new(name: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            id: StationId::generate(),
            name: name.into(),
            token: token.into(),
            default_printer_name: None,
            categories: None,
            created_at: Utc::now(),
            last_seen_at: None,
            is_active: true,
        }
    }

    pub fn categories(&self) -> &[String] {
        self.categories.as_deref().unwrap_or(&[])
    }
}

/// Station summary embedded in recent-job listings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StationSummary {
    pub id: StationId,
    pub name: String,
    pub token: String,
}

/// Rows written before the order workflow existed carry `null` here.
fn null_as_default<'de, D, T>(deserializer: D) -> std::result::Result<T, D::Error>
where
    D: serde::Deserializer<'de>,
    T: Deserialize<'de> + Default,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// A queued print job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub station_id: StationId,
    /// Pre-formatted print content.
    pub payload: String,
    pub status: JobStatus,
    #[serde(default)]
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub printed_at: Option<DateTime<Utc>>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub order_status: OrderStatus,
    #[serde(default)]
    pub order_status_updated_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub item_categories: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub station: Option<StationSummary>,
}

impl Job {
    /// A fresh pending job for `station_id`.
    pub fn new(station_id: StationId, payload: impl Into<String>) -> Self {
        Self {
            id: JobId::generate(),
            station_id,
            payload: payload.into(),
            status: JobStatus::Pending,
            error_message: None,
            created_at: Utc::now(),
            printed_at: None,
            order_status: OrderStatus::Received,
            order_status_updated_at: None,
            item_categories: None,
            station: None,
        }
    }

    pub fn with_categories<I, S>(mut self, categories: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.item_categories = Some(categories.into_iter().map(Into::into).collect());
        self
    }

    pub fn categories(&self) -> &[String] {
        self.item_categories.as_deref().unwrap_or(&[])
    }

    /// Once cancelled, the order workflow is frozen.
    pub fn order_status_locked(&self) -> bool {
        self.status == JobStatus::Cancelled
    }
}

/// Connection state pushed to status observers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectionStatus {
    pub connected: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub station: Option<Station>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl ConnectionStatus {
    pub fn connected(station: Station) -> Self {
        Self {
            connected: true,
            station: Some(station),
            message: None,
        }
    }

    pub fn disconnected(message: impl Into<String>) -> Self {
        Self {
            connected: false,
            station: None,
            message: Some(message.into()),
        }
    }
}

/// A printer visible to the host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrinterInfo {
    pub name: String,
    pub is_default: bool,
}

/// Severity of an engine log entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Info,
    Warning,
    Error,
    Success,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Info => "info",
            Self::Warning => "warning",
            Self::Error => "error",
            Self::Success => "success",
        }
    }
}

/// A log line published to an engine's log subscribers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    pub timestamp: DateTime<Utc>,
    pub level: LogLevel,
    pub message: String,
}

impl LogEntry {
    pub fn new(level: LogLevel, message: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            level,
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn job_decodes_from_store_row() {
        let row = r#"{
            "id": "8f0c6d2e-1111-2222-3333-444455556666",
            "station_id": "st-1",
            "payload": "1x X-Burger",
            "status": "pending",
            "error_message": null,
            "created_at": "2025-03-01T12:00:00.123456+00:00",
            "printed_at": null,
            "order_status": "em_preparo",
            "item_categories": ["Comidas"],
            "extra_column": 42
        }"#;
        let job: Job = serde_json::from_str(row).expect("decode");
        assert_eq!(job.status, JobStatus::Pending);
        assert_eq!(job.order_status, OrderStatus::InPreparation);
        assert_eq!(job.categories(), ["Comidas".to_string()]);
        assert_eq!(job.id.short(), "8f0c6d2e");
    }

    #[test]
    fn job_with_null_order_status_decodes_as_received() {
        let row = r#"{
            "id": "job-1",
            "station_id": "st-1",
            "payload": "1x Suco",
            "status": "pending",
            "created_at": "2025-03-01T12:00:00Z",
            "order_status": null
        }"#;
        let job: Job = serde_json::from_str(row).expect("decode");
        assert_eq!(job.order_status, OrderStatus::Received);

        let rows = format!("[{row}, {row}]");
        let jobs: Vec<Job> = serde_json::from_str(&rows).expect("decode batch");
        assert_eq!(jobs.len(), 2);
    }

    #[test]
    fn station_with_null_categories_accepts_all() {
        let row = r#"{
            "id": "st-1",
            "name": "Cozinha",
            "token": "tok",
            "categories": null,
            "created_at": "2025-03-01T12:00:00Z",
            "is_active": true
        }"#;
        let station: Station = serde_json::from_str(row).expect("decode");
        assert!(station.categories().is_empty());
        assert!(station.default_printer_name.is_none());
    }

    #[test]
    fn order_status_parses_both_spellings() {
        assert_eq!("pronto".parse::<OrderStatus>(), Ok(OrderStatus::Ready));
        assert_eq!("delivered".parse::<OrderStatus>(), Ok(OrderStatus::Delivered));
        assert!("lost".parse::<OrderStatus>().is_err());
    }

    #[test]
    fn cancelled_job_locks_order_status() {
        let mut job = Job::new(StationId::from("st"), "x");
        assert!(!job.order_status_locked());
        job.status = JobStatus::Cancelled;
        assert!(job.order_status_locked());
    }
}

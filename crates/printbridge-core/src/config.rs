// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Application configuration.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{BridgeError, Result};

/// How sanitized content reaches the printer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryStrategy {
    /// Pipe raw bytes to the OS spooler (`lp -o raw`).
    RawSpooler,
    /// Render text through a host script, falling back to `RenderedPage`.
    ScriptedGraphics,
    /// Render an HTML page off-screen and print it silently.
    RenderedPage,
}

impl DeliveryStrategy {
    /// The preferred strategy for the host this binary was built for.
    pub fn detect() -> Self {
        if cfg!(windows) {
            Self::ScriptedGraphics
        } else {
            Self::RawSpooler
        }
    }

    /// Whether content goes out as raw bytes with ESC/POS control sequences.
    pub fn is_raw(&self) -> bool {
        matches!(self, Self::RawSpooler)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::RawSpooler => "raw_spooler",
            Self::ScriptedGraphics => "scripted_graphics",
            Self::RenderedPage => "rendered_page",
        }
    }
}

impl std::str::FromStr for DeliveryStrategy {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().replace('-', "_").as_str() {
            "raw_spooler" | "raw" => Ok(Self::RawSpooler),
            "scripted_graphics" | "scripted" => Ok(Self::ScriptedGraphics),
            "rendered_page" | "rendered" => Ok(Self::RenderedPage),
            other => Err(format!("unknown delivery strategy '{other}'")),
        }
    }
}

/// Remote job store endpoint and credential.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreSettings {
    /// Base URL of the store (e.g. `https://xyz.example.co`).
    pub url: String,
    /// Anonymous API key sent with every request.
    pub api_key: String,
}

impl StoreSettings {
    pub fn is_complete(&self) -> bool {
        !self.url.trim().is_empty() && !self.api_key.trim().is_empty()
    }
}

/// One configured station connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StationConfig {
    /// Local identifier, unique within this config.
    pub id: String,
    /// Friendly name shown locally.
    pub name: String,
    pub token: String,
    /// Printer to use for this station, overriding the station default.
    #[serde(default)]
    pub printer: Option<String>,
    /// Connection-local category filter restored after reconnecting.
    #[serde(default)]
    pub categories: Vec<String>,
    #[serde(default = "default_true")]
    pub is_active: bool,
}

fn default_true() -> bool {
    true
}

/// Print dispatch tuning.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatchSettings {
    /// Force a delivery strategy instead of detecting one from the host.
    pub strategy: Option<DeliveryStrategy>,
    /// Upper bound for the load/prepare phase of any strategy.
    pub prepare_timeout_ms: u64,
    /// Wait after a rendered page was accepted by the OS.
    pub settle_delay_ms: u64,
    /// Spooler invocation for the raw channel; `{printer}` is substituted.
    pub spooler_command: Vec<String>,
}

impl Default for DispatchSettings {
    fn default() -> Self {
        Self {
            strategy: None,
            prepare_timeout_ms: 10_000,
            settle_delay_ms: 2_000,
            spooler_command: vec![
                "lp".into(),
                "-d".into(),
                "{printer}".into(),
                "-o".into(),
                "raw".into(),
            ],
        }
    }
}

impl DispatchSettings {
    pub fn prepare_timeout(&self) -> Duration {
        Duration::from_millis(self.prepare_timeout_ms)
    }

    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }
}

/// Persistent application settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub store: StoreSettings,
    /// Token of the station used by single-station commands.
    pub station_token: Option<String>,
    /// Printer chosen locally; wins over the station default when reprinting.
    pub selected_printer: Option<String>,
    pub stations: Vec<StationConfig>,
    /// Seconds between poll sweeps for pending jobs.
    pub poll_interval_secs: u64,
    /// Seconds between `last_seen_at` heartbeats.
    pub heartbeat_interval_secs: u64,
    pub dispatch: DispatchSettings,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            store: StoreSettings::default(),
            station_token: None,
            selected_printer: None,
            stations: Vec::new(),
            poll_interval_secs: 3,
            heartbeat_interval_secs: 30,
            dispatch: DispatchSettings::default(),
        }
    }
}

impl AppConfig {
    /// A station token is the only thing required to connect.
    pub fn is_configured(&self) -> bool {
        self.station_token
            .as_deref()
            .is_some_and(|t| !t.trim().is_empty())
            || self.stations.iter().any(|s| !s.token.trim().is_empty())
    }

    /// Stations to connect at startup: the active configured stations, or
    /// the single `station_token` when no list is configured.
    pub fn active_stations(&self) -> Vec<StationConfig> {
        if !self.stations.is_empty() {
            return self.stations.iter().filter(|s| s.is_active).cloned().collect();
        }
        match self.station_token.as_deref() {
            Some(token) if !token.trim().is_empty() => vec![StationConfig {
                id: "default".into(),
                name: "default".into(),
                token: token.to_owned(),
                printer: self.selected_printer.clone(),
                categories: Vec::new(),
                is_active: true,
            }],
            _ => Vec::new(),
        }
    }

    pub fn station_mut(&mut self, token: &str) -> Option<&mut StationConfig> {
        self.stations.iter_mut().find(|s| s.token == token)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs.max(1))
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_secs.max(1))
    }

    /// Read a config file. A missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            debug!(path = %path.display(), "no config file, using defaults");
            return Ok(Self::default());
        }
        let data = std::fs::read_to_string(path)?;
        let config = serde_json::from_str(&data)
            .map_err(|e| BridgeError::Config(format!("{}: {e}", path.display())))?;
        Ok(config)
    }

    /// Write the config as pretty JSON, creating parent directories.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir)?;
        }
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }

    /// Apply `PRINTBRIDGE_STORE_URL` / `PRINTBRIDGE_STORE_KEY` overrides.
    pub fn apply_env(&mut self) {
        self.apply_overrides(
            std::env::var("PRINTBRIDGE_STORE_URL").ok(),
            std::env::var("PRINTBRIDGE_STORE_KEY").ok(),
        );
    }

    fn apply_overrides(&mut self, url: Option<String>, key: Option<String>) {
        if let Some(url) = url.filter(|v| !v.trim().is_empty()) {
            self.store.url = url;
        }
        if let Some(key) = key.filter(|v| !v.trim().is_empty()) {
            self.store.api_key = key;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_engine_timings() {
        let config = AppConfig::default();
        assert_eq!(config.poll_interval(), Duration::from_secs(3));
        assert_eq!(config.heartbeat_interval(), Duration::from_secs(30));
        assert_eq!(config.dispatch.prepare_timeout(), Duration::from_secs(10));
        assert_eq!(config.dispatch.settle_delay(), Duration::from_secs(2));
        assert!(!config.is_configured());
    }

    #[test]
    fn save_then_load_preserves_stations() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("nested").join("config.json");

        let mut config = AppConfig::default();
        config.stations.push(StationConfig {
            id: "bar".into(),
            name: "Bar".into(),
            token: "tok-bar".into(),
            printer: Some("EPSON_TM_T20".into()),
            categories: vec!["Bebidas".into()],
            is_active: true,
        });
        config.save(&path).expect("save");

        let loaded = AppConfig::load(&path).expect("load");
        assert_eq!(loaded, config);
        assert!(loaded.is_configured());
    }

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempfile::tempdir().expect("tempdir");
        let loaded = AppConfig::load(&dir.path().join("absent.json")).expect("load");
        assert_eq!(loaded, AppConfig::default());
    }

    #[test]
    fn partial_file_fills_in_defaults() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{"station_token":"abc"}"#).expect("write");

        let loaded = AppConfig::load(&path).expect("load");
        assert_eq!(loaded.station_token.as_deref(), Some("abc"));
        assert_eq!(loaded.poll_interval_secs, 3);
        assert_eq!(loaded.active_stations().len(), 1);
    }

    #[test]
    fn inactive_stations_are_skipped() {
        let mut config = AppConfig::default();
        for (token, active) in [("a", true), ("b", false)] {
            config.stations.push(StationConfig {
                id: token.into(),
                name: token.into(),
                token: token.into(),
                printer: None,
                categories: Vec::new(),
                is_active: active,
            });
        }
        let active = config.active_stations();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].token, "a");
    }

    #[test]
    fn strategy_names_parse() {
        assert_eq!("raw".parse::<DeliveryStrategy>(), Ok(DeliveryStrategy::RawSpooler));
        assert_eq!(
            "rendered-page".parse::<DeliveryStrategy>(),
            Ok(DeliveryStrategy::RenderedPage)
        );
        assert!(DeliveryStrategy::RawSpooler.is_raw());
        assert!(!DeliveryStrategy::ScriptedGraphics.is_raw());
    }

    #[test]
    fn blank_overrides_are_ignored() {
        let mut config = AppConfig::default();
        config.store.url = "https://kept.example".into();
        config.apply_overrides(Some("  ".into()), Some("key".into()));
        assert_eq!(config.store.url, "https://kept.example");
        assert_eq!(config.store.api_key, "key");
    }
}

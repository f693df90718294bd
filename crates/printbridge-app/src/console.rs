// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Console output for the operator.

use chrono::Local;

use printbridge_core::types::{ConnectionStatus, Job, LogEntry, LogLevel, PrinterInfo};

pub fn log_line(entry: &LogEntry) -> String {
    let tag = match entry.level {
        LogLevel::Info => "info",
        LogLevel::Success => " ok ",
        LogLevel::Warning => "warn",
        LogLevel::Error => "FAIL",
    };
    format!(
        "{} [{tag}] {}",
        entry.timestamp.with_timezone(&Local).format("%H:%M:%S"),
        entry.message
    )
}

pub fn status_line(status: &ConnectionStatus) -> String {
    match (&status.station, status.connected) {
        (Some(station), true) => format!("● connected: {}", station.name),
        _ => format!(
            "○ disconnected{}",
            status
                .message
                .as_deref()
                .map(|m| format!(": {m}"))
                .unwrap_or_default()
        ),
    }
}

pub fn printer_lines(printers: &[PrinterInfo], selected: Option<&str>) -> Vec<String> {
    printers
        .iter()
        .map(|p| {
            let mut line = p.name.clone();
            if p.is_default {
                line.push_str("  (system default)");
            }
            if selected == Some(p.name.as_str()) {
                line.push_str("  (selected)");
            }
            line
        })
        .collect()
}

pub fn job_lines(jobs: &[Job]) -> Vec<String> {
    jobs.iter()
        .map(|job| {
            let station = job
                .station
                .as_ref()
                .map(|s| s.name.as_str())
                .unwrap_or("-");
            let first_line = job.payload.lines().find(|l| !l.trim().is_empty()).unwrap_or("");
            format!(
                "{}  {:<8}  {:<9}  {:<10}  {:<16}  {}",
                job.created_at.with_timezone(&Local).format("%d/%m %H:%M"),
                job.id.short(),
                job.status.as_str(),
                job.order_status.as_str(),
                station,
                first_line
            )
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use printbridge_core::types::{JobStatus, Station, StationId, StationSummary};

    #[test]
    fn status_lines() {
        let station = Station::new("Bar", "t");
        assert_eq!(status_line(&ConnectionStatus::connected(station)), "● connected: Bar");
        assert_eq!(
            status_line(&ConnectionStatus::disconnected("Disconnected")),
            "○ disconnected: Disconnected"
        );
    }

    #[test]
    fn printers_are_annotated() {
        let printers = [
            PrinterInfo {
                name: "POS-80".into(),
                is_default: true,
            },
            PrinterInfo {
                name: "Balcao".into(),
                is_default: false,
            },
        ];
        assert_eq!(
            printer_lines(&printers, Some("Balcao")),
            ["POS-80  (system default)", "Balcao  (selected)"]
        );
    }

    #[test]
    fn job_line_shows_station_and_first_line() {
        let mut job = Job::new(StationId::from("s1"), "\nPEDIDO #7\n1x suco");
        job.status = JobStatus::Printed;
        job.station = Some(StationSummary {
            id: StationId::from("s1"),
            name: "Bar".into(),
            token: "t".into(),
        });
        let line = &job_lines(&[job])[0];
        assert!(line.contains("printed"));
        assert!(line.contains("Bar"));
        assert!(line.ends_with("PEDIDO #7"));
    }
}

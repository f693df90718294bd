// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Command line definition.

use std::path::PathBuf;

use chrono::{DateTime, Local, NaiveDate, NaiveTime, TimeZone, Utc};
use clap::{Args, Parser, Subcommand};

use printbridge_core::config::DeliveryStrategy;
use printbridge_core::types::OrderStatus;

/// Print remote order tickets on local receipt printers.
#[derive(Debug, Parser)]
#[command(name = "printbridge", version, about)]
pub struct Cli {
    /// Config file (default: <data dir>/config.json).
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Connect every active station and print jobs until interrupted.
    Run {
        /// Use an in-memory store with a demo station instead of the
        /// configured one.
        #[arg(long)]
        demo: bool,
    },
    /// Printers on this machine.
    Printers {
        #[command(subcommand)]
        command: Option<PrintersCmd>,
    },
    /// Print the test page.
    TestPrint {
        /// Printer name (default: selected, then system default).
        #[arg(long)]
        printer: Option<String>,
        /// Station token whose name goes on the page.
        #[arg(long)]
        station: Option<String>,
    },
    /// Job history.
    Jobs {
        #[command(subcommand)]
        command: JobsCmd,
    },
    /// Move an order through its workflow.
    OrderStatus {
        job_id: String,
        #[arg(value_parser = parse_order_status)]
        status: OrderStatus,
    },
    /// Print a job again without touching its status.
    Reprint {
        job_id: String,
        /// Station token used for the printer lookup.
        #[arg(long)]
        station: Option<String>,
        /// Read the payload from a file instead of the job history.
        #[arg(long)]
        payload_file: Option<PathBuf>,
    },
    /// Station settings.
    Station {
        #[command(subcommand)]
        command: StationCmd,
    },
    /// Show or edit the config file.
    Config {
        #[command(subcommand)]
        command: ConfigCmd,
    },
}

#[derive(Debug, Subcommand)]
pub enum PrintersCmd {
    /// List printers (the default).
    List,
    /// Select the printer used for reprints and test pages.
    Select {
        name: String,
        /// Also make it the remote default of this station token.
        #[arg(long)]
        station: Option<String>,
    },
}

#[derive(Debug, Subcommand)]
pub enum JobsCmd {
    /// Printed and cancelled jobs of the configured stations, newest first.
    Recent(RecentArgs),
}

#[derive(Debug, Args)]
pub struct RecentArgs {
    #[arg(long, default_value_t = 50)]
    pub limit: usize,
    /// Earliest creation time (YYYY-MM-DD or RFC 3339).
    #[arg(long, value_parser = parse_from)]
    pub from: Option<DateTime<Utc>>,
    /// Latest creation time; a bare date includes the whole day.
    #[arg(long, value_parser = parse_to)]
    pub to: Option<DateTime<Utc>>,
    /// Print JSON instead of a table.
    #[arg(long)]
    pub json: bool,
}

#[derive(Debug, Subcommand)]
pub enum StationCmd {
    /// Rename a station in the remote store.
    Rename { token: String, name: String },
    /// Set the local category filter of a configured station. No
    /// categories clears it.
    Categories { token: String, categories: Vec<String> },
}

#[derive(Debug, Subcommand)]
pub enum ConfigCmd {
    /// Print the effective config as JSON.
    Show,
    /// Print the config file location.
    Path,
    /// Set the store endpoint and key.
    SetStore {
        #[arg(long)]
        url: String,
        #[arg(long)]
        key: String,
    },
    /// Set the single-station token.
    SetToken { token: String },
    /// Add or replace a station connection.
    AddStation {
        #[arg(long)]
        token: String,
        #[arg(long)]
        name: Option<String>,
        #[arg(long)]
        printer: Option<String>,
        #[arg(long = "category")]
        categories: Vec<String>,
    },
    /// Remove a station connection.
    RemoveStation { token: String },
    /// Enable or disable a station connection.
    SetActive {
        token: String,
        #[arg(action = clap::ArgAction::Set)]
        active: bool,
    },
    /// Force a delivery strategy (raw, scripted, rendered) or `auto`.
    SetStrategy { strategy: String },
}

fn parse_order_status(s: &str) -> Result<OrderStatus, String> {
    s.parse().map_err(|_| {
        format!("unknown order status `{s}` (expected recebido, em_preparo, pronto or entregue)")
    })
}

/// `auto` clears the override.
pub fn parse_strategy(s: &str) -> Result<Option<DeliveryStrategy>, String> {
    if s.eq_ignore_ascii_case("auto") {
        return Ok(None);
    }
    s.parse::<DeliveryStrategy>()
        .map(Some)
        .map_err(|_| format!("unknown strategy `{s}`"))
}

fn parse_from(s: &str) -> Result<DateTime<Utc>, String> {
    parse_bound(s, NaiveTime::MIN)
}

fn parse_to(s: &str) -> Result<DateTime<Utc>, String> {
    let end_of_day = NaiveTime::from_hms_milli_opt(23, 59, 59, 999).unwrap_or(NaiveTime::MIN);
    parse_bound(s, end_of_day)
}

/// RFC 3339 timestamp, or a local calendar date at `time`.
fn parse_bound(s: &str, time: NaiveTime) -> Result<DateTime<Utc>, String> {
    if let Ok(stamp) = DateTime::parse_from_rfc3339(s) {
        return Ok(stamp.with_timezone(&Utc));
    }
    let date = NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .map_err(|_| format!("invalid date `{s}` (expected YYYY-MM-DD or RFC 3339)"))?;
    Local
        .from_local_datetime(&date.and_time(time))
        .earliest()
        .map(|local| local.with_timezone(&Utc))
        .ok_or_else(|| format!("`{s}` does not exist in the local time zone"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn rfc3339_bounds_keep_their_instant() {
        let from = parse_from("2026-03-01T12:00:00Z").expect("rfc3339");
        assert_eq!(from.to_rfc3339(), "2026-03-01T12:00:00+00:00");
    }

    #[test]
    fn bare_dates_cover_the_whole_day() {
        let from = parse_from("2026-03-01").expect("from");
        let to = parse_to("2026-03-01").expect("to");
        assert_eq!((to - from).num_seconds(), 86_399);
        assert!(parse_from("01/03/2026").is_err());
    }

    #[test]
    fn order_status_and_strategy_arguments() {
        let cli = Cli::try_parse_from(["printbridge", "order-status", "j1", "em_preparo"])
            .expect("parse");
        assert!(matches!(
            cli.command,
            Command::OrderStatus {
                status: OrderStatus::InPreparation,
                ..
            }
        ));
        assert!(Cli::try_parse_from(["printbridge", "order-status", "j1", "cooking"]).is_err());
        assert_eq!(parse_strategy("auto"), Ok(None));
        assert_eq!(parse_strategy("raw"), Ok(Some(DeliveryStrategy::RawSpooler)));
    }

    #[test]
    fn recent_jobs_defaults() {
        let cli = Cli::try_parse_from(["printbridge", "jobs", "recent"]).expect("parse");
        let Command::Jobs {
            command: JobsCmd::Recent(args),
        } = cli.command
        else {
            panic!("expected jobs recent");
        };
        assert_eq!(args.limit, 50);
        assert!(args.from.is_none() && args.to.is_none() && !args.json);
    }
}

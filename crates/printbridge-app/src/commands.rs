// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Command execution.

use std::sync::Arc;
use std::time::Duration;

use tracing::{error, info, warn};

use printbridge_core::config::StationConfig;
use printbridge_core::error::{BridgeError, ErrorClass, Result};
use printbridge_core::types::JobId;
use printbridge_sync::StationSupervisor;

use crate::cli::{Cli, Command, ConfigCmd, JobsCmd, PrintersCmd, StationCmd, parse_strategy};
use crate::console;
use crate::services::app_services::AppServices;
use crate::services::{data_dir, demo};

/// Wait between connection attempts for stations whose store was
/// unreachable at startup.
const RECONNECT_DELAY: Duration = Duration::from_secs(15);

pub async fn execute(cli: Cli) -> Result<()> {
    let config_path = cli.config.unwrap_or_else(data_dir::config_path);
    let mut services = AppServices::init(config_path)?;

    match cli.command {
        Command::Run { demo: false } => run(&services).await,
        Command::Run { demo: true } => {
            let (services, store, station) = demo::demo_services(
                services.config().clone(),
                services.config_path().to_path_buf(),
                services.printer(),
            )?;
            let feed = demo::spawn_order_feed(store, station);
            let outcome = run(&services).await;
            feed.abort();
            outcome
        }
        Command::Printers { command } => match command.unwrap_or(PrintersCmd::List) {
            PrintersCmd::List => {
                let printers = services.list_printers().await?;
                if printers.is_empty() {
                    println!("No printers found.");
                }
                let selected = services.config().selected_printer.as_deref();
                for line in console::printer_lines(&printers, selected) {
                    println!("{line}");
                }
                Ok(())
            }
            PrintersCmd::Select { name, station } => {
                services.select_printer(&name, station.as_deref()).await?;
                println!("Selected printer: {name}");
                Ok(())
            }
        },
        Command::TestPrint { printer, station } => {
            let printer = services.test_print(printer, station.as_deref()).await?;
            println!("Test page sent to {printer}");
            Ok(())
        }
        Command::Jobs {
            command: JobsCmd::Recent(args),
        } => {
            let jobs = services.recent_jobs(args.limit, args.from, args.to).await?;
            if args.json {
                println!("{}", serde_json::to_string_pretty(&jobs)?);
            } else if jobs.is_empty() {
                println!("No printed or cancelled jobs.");
            } else {
                for line in console::job_lines(&jobs) {
                    println!("{line}");
                }
            }
            Ok(())
        }
        Command::OrderStatus { job_id, status } => {
            let job = JobId::from(job_id.as_str());
            services.update_order_status(&job, status).await?;
            println!("Order status of {} set to {}", job.short(), status.as_str());
            Ok(())
        }
        Command::Reprint {
            job_id,
            station,
            payload_file,
        } => {
            let job = JobId::from(job_id.as_str());
            services
                .reprint(&job, station.as_deref(), payload_file.as_deref())
                .await?;
            println!("Job {} reprinted", job.short());
            Ok(())
        }
        Command::Station { command } => match command {
            StationCmd::Rename { token, name } => {
                services.rename_station(&token, &name).await?;
                println!("Station renamed to {name}");
                Ok(())
            }
            StationCmd::Categories { token, categories } => {
                let summary = if categories.is_empty() {
                    "all items".to_string()
                } else {
                    categories.join(", ")
                };
                services.set_categories(&token, categories)?;
                println!("Local filter: {summary}");
                Ok(())
            }
        },
        Command::Config { command } => configure(&mut services, command),
    }
}

fn configure(services: &mut AppServices, command: ConfigCmd) -> Result<()> {
    match command {
        ConfigCmd::Show => {
            println!("{}", serde_json::to_string_pretty(services.config())?);
            return Ok(());
        }
        ConfigCmd::Path => {
            println!("{}", services.config_path().display());
            return Ok(());
        }
        ConfigCmd::SetStore { url, key } => {
            let store = &mut services.config_mut().store;
            store.url = url;
            store.api_key = key;
        }
        ConfigCmd::SetToken { token } => {
            services.config_mut().station_token = Some(token);
        }
        ConfigCmd::AddStation {
            token,
            name,
            printer,
            categories,
        } => {
            let id = format!("station-{}", services.config().stations.len() + 1);
            let station = StationConfig {
                name: name.unwrap_or_else(|| id.clone()),
                id,
                token,
                printer,
                categories,
                is_active: true,
            };
            println!("Station `{}` saved", station.name);
            return services.upsert_station(station);
        }
        ConfigCmd::RemoveStation { token } => {
            if !services.remove_station(&token)? {
                return Err(BridgeError::Config(format!("no station with token {token}")));
            }
            println!("Station removed");
            return Ok(());
        }
        ConfigCmd::SetActive { token, active } => {
            let station = services
                .config_mut()
                .station_mut(&token)
                .ok_or_else(|| BridgeError::Config(format!("no station with token {token}")))?;
            station.is_active = active;
        }
        ConfigCmd::SetStrategy { strategy } => {
            services.config_mut().dispatch.strategy =
                parse_strategy(&strategy).map_err(BridgeError::Config)?;
        }
    }
    services.save()?;
    println!("Saved {}", services.config_path().display());
    Ok(())
}

/// Connect every active station and print until ctrl-c.
async fn run(services: &AppServices) -> Result<()> {
    if !services.config().is_configured() {
        return Err(BridgeError::Config(
            "no station configured (run `printbridge config set-token` or `config add-station`)"
                .into(),
        ));
    }
    let supervisor = Arc::new(services.supervisor()?);
    let _status = supervisor.on_status(|status| println!("{}", console::status_line(status)));
    let _logs = supervisor.on_log(|entry| println!("{}", console::log_line(entry)));

    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    let mut waiting = services.config().active_stations();
    loop {
        waiting = connect_stations(&supervisor, waiting).await;
        if waiting.is_empty() && supervisor.connected_stations().await.is_empty() {
            return Err(BridgeError::Config("no station could be connected".into()));
        }
        tokio::select! {
            signal = &mut shutdown => {
                signal?;
                break;
            }
            _ = tokio::time::sleep(RECONNECT_DELAY), if !waiting.is_empty() => {
                info!(stations = waiting.len(), "retrying station connections");
            }
        }
    }

    info!("shutting down");
    supervisor.disconnect_all().await;
    Ok(())
}

/// Connect `stations`, returning the ones worth retrying later.
async fn connect_stations(
    supervisor: &StationSupervisor,
    stations: Vec<StationConfig>,
) -> Vec<StationConfig> {
    let mut retry = Vec::new();
    for configured in stations {
        match supervisor
            .connect_with_categories(&configured.token, configured.categories.clone())
            .await
        {
            Ok(station) => {
                let Some(printer) = configured.printer.as_deref() else {
                    continue;
                };
                if station.default_printer_name.as_deref() == Some(printer) {
                    continue;
                }
                if let Some(engine) = supervisor.engine(&configured.token).await {
                    if let Err(e) = engine.update_default_printer(printer).await {
                        warn!(station = %station.name, error = %e, "could not set station printer");
                    }
                }
            }
            Err(e) if e.class() == ErrorClass::StoreUnavailable => {
                warn!(station = %configured.name, error = %e, "store unreachable, will retry");
                retry.push(configured);
            }
            Err(e) => error!(station = %configured.name, error = %e, "station not connected"),
        }
    }
    retry
}

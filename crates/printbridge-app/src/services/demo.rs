// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Demo mode: an in-memory store with one station and a trickle of orders.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{debug, info};

use printbridge_core::AppConfig;
use printbridge_core::config::StationConfig;
use printbridge_core::error::Result;
use printbridge_core::types::{Job, Station, StationId};
use printbridge_print::PrintService;
use printbridge_store::MemoryStore;

use super::app_services::AppServices;

pub const DEMO_TOKEN: &str = "demo-station";

/// Interval between generated orders.
const ORDER_INTERVAL: Duration = Duration::from_secs(30);

const MENU: &[(&str, &str)] = &[
    ("Pão de queijo", "Comidas"),
    ("Café com leite", "Bebidas"),
    ("Coxinha", "Comidas"),
    ("Suco de laranja", "Bebidas"),
];

/// Services over a fresh in-memory store holding the demo station and two
/// pending orders. The config is the loaded one with its stations replaced.
pub fn demo_services(
    mut config: AppConfig,
    config_path: PathBuf,
    printer: Arc<dyn PrintService>,
) -> Result<(AppServices, MemoryStore, StationId)> {
    let store = MemoryStore::new();
    let mut station = Station::new("Demo station", DEMO_TOKEN);
    station.default_printer_name = config.selected_printer.clone();
    store.add_station(station.clone())?;
    for number in 1..=2 {
        store.seed_job(ticket(&station.id, number))?;
    }

    config.station_token = None;
    config.stations = vec![StationConfig {
        id: "demo".into(),
        name: station.name.clone(),
        token: DEMO_TOKEN.into(),
        printer: None,
        categories: Vec::new(),
        is_active: true,
    }];
    info!("demo mode: in-memory store with station `{}`", station.name);

    let services = AppServices::with_parts(
        config,
        config_path,
        Some(Arc::new(store.clone())),
        printer,
    );
    Ok((services, store, station.id))
}

/// Insert a new order every [`ORDER_INTERVAL`] until aborted.
pub fn spawn_order_feed(store: MemoryStore, station: StationId) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut number = 3;
        loop {
            tokio::time::sleep(ORDER_INTERVAL).await;
            if let Err(e) = store.insert_job(ticket(&station, number)) {
                debug!(error = %e, "demo order not inserted");
            }
            number += 1;
        }
    })
}

fn ticket(station: &StationId, number: usize) -> Job {
    let (item, category) = MENU[number % MENU.len()];
    let payload = format!(
        "PEDIDO #{number:04}\n------------------------\n1x {item}\n------------------------\n"
    );
    Job::new(station.clone(), payload).with_categories([category])
}

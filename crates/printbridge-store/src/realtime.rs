// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Realtime insert feed over the Phoenix channel websocket.
//
// One background task per subscription: connect, join a channel listening
// for `INSERT` on `print_jobs` filtered by station, forward decoded rows,
// heartbeat the socket, and reconnect with capped exponential backoff when
// the socket drops. The task ends when the receiving side goes away.

use std::time::Duration;

use backoff::ExponentialBackoff;
use backoff::backoff::Backoff;
use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tracing::{debug, info, warn};
use url::Url;

use printbridge_core::error::{BridgeError, Result};
use printbridge_core::types::{Job, StationId};

/// Table the feed listens on.
pub const JOBS_TABLE: &str = "print_jobs";

/// Socket and reconnection tuning for the realtime feed.
#[derive(Debug, Clone)]
pub struct RealtimeSettings {
    pub connect_timeout: Duration,
    /// Interval of the Phoenix `heartbeat` message.
    pub heartbeat_interval: Duration,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for RealtimeSettings {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
            heartbeat_interval: Duration::from_secs(25),
            initial_backoff: Duration::from_millis(500),
            max_backoff: Duration::from_secs(30),
        }
    }
}

/// A Phoenix channel frame (protocol v1, JSON object encoding).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhoenixFrame {
    pub topic: String,
    pub event: String,
    #[serde(default)]
    pub payload: Value,
    #[serde(rename = "ref", default)]
    pub reference: Option<String>,
}

impl PhoenixFrame {
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

/// Build the websocket URL from the store's base URL.
pub fn websocket_url(base: &Url, api_key: &str) -> Result<Url> {
    let mut url = base.clone();
    let scheme = match base.scheme() {
        "https" | "wss" => "wss",
        "http" | "ws" => "ws",
        other => {
            return Err(BridgeError::Config(format!(
                "unsupported store URL scheme '{other}'"
            )));
        }
    };
    url.set_scheme(scheme)
        .map_err(|_| BridgeError::Config(format!("cannot derive websocket URL from {base}")))?;
    url.set_path("/realtime/v1/websocket");
    url.query_pairs_mut()
        .clear()
        .append_pair("apikey", api_key)
        .append_pair("vsn", "1.0.0");
    Ok(url)
}

/// Channel topic for one station's insert feed.
pub fn topic_for(station: &StationId) -> String {
    format!("realtime:{JOBS_TABLE}:{station}")
}

/// The `phx_join` frame subscribing to inserts for `station`.
pub fn join_frame(station: &StationId, api_key: &str, reference: u64) -> PhoenixFrame {
    PhoenixFrame {
        topic: topic_for(station),
        event: "phx_join".into(),
        payload: json!({
            "config": {
                "broadcast": { "self": false },
                "presence": { "key": "" },
                "postgres_changes": [{
                    "event": "INSERT",
                    "schema": "public",
                    "table": JOBS_TABLE,
                    "filter": format!("station_id=eq.{station}"),
                }],
            },
            "access_token": api_key,
        }),
        reference: Some(reference.to_string()),
    }
}

pub fn heartbeat_frame(reference: u64) -> PhoenixFrame {
    PhoenixFrame {
        topic: "phoenix".into(),
        event: "heartbeat".into(),
        payload: json!({}),
        reference: Some(reference.to_string()),
    }
}

/// What a received frame means for the feed.
#[derive(Debug, Clone, PartialEq)]
pub enum FrameEvent {
    /// A job row was inserted.
    Inserted(Box<Job>),
    /// The server refused our join or closed the channel.
    ChannelError(String),
    /// Replies, presence and anything else we do not act on.
    Ignored,
}

/// Interpret one incoming frame for the station's topic.
pub fn classify_frame(frame: &PhoenixFrame, station: &StationId) -> FrameEvent {
    if frame.topic != topic_for(station) {
        return FrameEvent::Ignored;
    }
    match frame.event.as_str() {
        "postgres_changes" => {
            let data = &frame.payload["data"];
            if data["type"] != "INSERT" {
                return FrameEvent::Ignored;
            }
            decode_record(&data["record"], station)
        }
        // Older servers deliver the change under the DB event name.
        "INSERT" => decode_record(&frame.payload["record"], station),
        "phx_reply" if frame.payload["status"] == "error" => FrameEvent::ChannelError(
            frame.payload["response"].to_string(),
        ),
        "phx_error" => FrameEvent::ChannelError("channel error".into()),
        "phx_close" => FrameEvent::ChannelError("channel closed by server".into()),
        _ => FrameEvent::Ignored,
    }
}

fn decode_record(record: &Value, station: &StationId) -> FrameEvent {
    match serde_json::from_value::<Job>(record.clone()) {
        Ok(job) if &job.station_id == station => FrameEvent::Inserted(Box::new(job)),
        Ok(_) => FrameEvent::Ignored,
        Err(e) => {
            warn!(error = %e, "undecodable job row on realtime feed");
            FrameEvent::Ignored
        }
    }
}

fn backoff_policy(settings: &RealtimeSettings) -> ExponentialBackoff {
    ExponentialBackoff {
        current_interval: settings.initial_backoff,
        initial_interval: settings.initial_backoff,
        max_interval: settings.max_backoff,
        max_elapsed_time: None,
        ..ExponentialBackoff::default()
    }
}

/// Run the feed until `jobs` is closed. Spawned by `RestStore`.
pub(crate) async fn run_feed(
    ws_url: Url,
    api_key: String,
    station: StationId,
    settings: RealtimeSettings,
    jobs: mpsc::Sender<Job>,
) {
    let mut backoff = backoff_policy(&settings);
    let mut reference: u64 = 0;

    info!(station = %station, "realtime feed starting");
    loop {
        match session(&ws_url, &api_key, &station, &settings, &jobs, &mut reference).await {
            Ok(SessionEnd::ReceiverGone) => break,
            Ok(SessionEnd::Dropped) => {
                backoff.reset();
                debug!(station = %station, "realtime socket dropped");
            }
            Err(e) => warn!(station = %station, error = %e, "realtime session failed"),
        }

        let delay = backoff.next_backoff().unwrap_or(settings.max_backoff);
        debug!(?delay, "waiting before realtime reconnect");
        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            _ = jobs.closed() => break,
        }
    }
    info!(station = %station, "realtime feed stopped");
}

enum SessionEnd {
    ReceiverGone,
    Dropped,
}

async fn session(
    ws_url: &Url,
    api_key: &str,
    station: &StationId,
    settings: &RealtimeSettings,
    jobs: &mpsc::Sender<Job>,
    reference: &mut u64,
) -> Result<SessionEnd> {
    let (socket, _) = timeout(settings.connect_timeout, connect_async(ws_url.as_str()))
        .await
        .map_err(|_| BridgeError::StoreUnavailable("realtime connect timed out".into()))?
        .map_err(|e| BridgeError::StoreUnavailable(format!("realtime connect: {e}")))?;
    let (mut write, mut read) = socket.split();

    *reference += 1;
    let join = join_frame(station, api_key, *reference).to_json()?;
    write
        .send(WsMessage::Text(join.into()))
        .await
        .map_err(|e| BridgeError::StoreUnavailable(format!("realtime join: {e}")))?;
    debug!(station = %station, "realtime channel join sent");

    let mut heartbeat = tokio::time::interval(settings.heartbeat_interval);
    heartbeat.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    heartbeat.tick().await;

    loop {
        tokio::select! {
            incoming = read.next() => {
                let message = match incoming {
                    Some(Ok(message)) => message,
                    Some(Err(e)) => {
                        return Err(BridgeError::StoreUnavailable(format!("realtime read: {e}")));
                    }
                    None => return Ok(SessionEnd::Dropped),
                };
                match message {
                    WsMessage::Text(text) => {
                        let frame: PhoenixFrame = match serde_json::from_str(text.as_str()) {
                            Ok(frame) => frame,
                            Err(e) => {
                                warn!(error = %e, "unparseable realtime frame");
                                continue;
                            }
                        };
                        match classify_frame(&frame, station) {
                            FrameEvent::Inserted(job) => {
                                debug!(job_id = %job.id, "realtime insert");
                                if jobs.send(*job).await.is_err() {
                                    let _ = write.send(WsMessage::Close(None)).await;
                                    return Ok(SessionEnd::ReceiverGone);
                                }
                            }
                            FrameEvent::ChannelError(reason) => {
                                return Err(BridgeError::StoreUnavailable(format!(
                                    "realtime channel: {reason}"
                                )));
                            }
                            FrameEvent::Ignored => {}
                        }
                    }
                    WsMessage::Ping(data) => {
                        write
                            .send(WsMessage::Pong(data))
                            .await
                            .map_err(|e| BridgeError::StoreUnavailable(format!("realtime pong: {e}")))?;
                    }
                    WsMessage::Close(frame) => {
                        debug!(?frame, "realtime close frame");
                        return Ok(SessionEnd::Dropped);
                    }
                    _ => {}
                }
            }

            _ = heartbeat.tick() => {
                *reference += 1;
                let beat = heartbeat_frame(*reference).to_json()?;
                write
                    .send(WsMessage::Text(beat.into()))
                    .await
                    .map_err(|e| BridgeError::StoreUnavailable(format!("realtime heartbeat: {e}")))?;
            }

            _ = jobs.closed() => {
                let _ = write.send(WsMessage::Close(None)).await;
                return Ok(SessionEnd::ReceiverGone);
            }
        }
    }
}

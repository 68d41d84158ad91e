//! Headless viewer for a running `server_sensorsync`: connects to `/ws` and
//! prints per-stream message rates and per-sensor delta rates.

use anyhow::{Context, Result};
use chrono::{Duration, Utc};
use clap::Parser;
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::{Value, json};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use tokio::time::sleep;
use tokio_tungstenite::{connect_async, tungstenite::protocol::Message};

#[derive(Parser, Debug)]
#[clap(author, version, about, long_about = None)]
struct Args {
    /// WebSocket endpoint of the server
    #[clap(short, long, default_value = "ws://127.0.0.1:3000/ws")]
    url: String,

    /// Report interval in seconds
    #[clap(short, long, default_value_t = 60)]
    report_interval_seconds: u64,

    /// Ask for server stats after every report
    #[clap(long)]
    request_stats: bool,
}

#[derive(Debug, Deserialize)]
struct Incoming {
    #[serde(rename = "type")]
    kind: String,
    data: Value,
}

#[derive(Default)]
struct Stats {
    kind_timestamps: HashMap<String, VecDeque<chrono::DateTime<Utc>>>,
    sensor_deltas: HashMap<String, VecDeque<chrono::DateTime<Utc>>>,
}

fn prune(dq: &mut VecDeque<chrono::DateTime<Utc>>, cutoff: chrono::DateTime<Utc>) -> usize {
    while dq.front().is_some_and(|&t| t < cutoff) {
        dq.pop_front();
    }
    dq.len()
}

fn report(stats: &Mutex<Stats>, window: Duration) {
    let cutoff = Utc::now() - window;
    let Ok(mut data) = stats.lock() else {
        return;
    };

    let mut kinds: Vec<(String, usize)> = data
        .kind_timestamps
        .iter_mut()
        .map(|(k, dq)| (k.clone(), prune(dq, cutoff)))
        .filter(|(_, n)| *n > 0)
        .collect();
    kinds.sort_by(|a, b| b.1.cmp(&a.1));

    let mut sensors: Vec<(String, usize)> = data
        .sensor_deltas
        .iter_mut()
        .map(|(s, dq)| (s.clone(), prune(dq, cutoff)))
        .filter(|(_, n)| *n > 0)
        .collect();
    sensors.sort_by(|a, b| b.1.cmp(&a.1));

    let join = |rows: &[(String, usize)]| {
        rows.iter()
            .map(|(k, n)| format!("{k}: {n}"))
            .collect::<Vec<_>>()
            .join(", ")
    };

    println!("\n----- {}s Summary -----", window.num_seconds());
    println!("Streams: {}", if kinds.is_empty() { "No data".to_string() } else { join(&kinds) });
    println!("Sensor deltas: {}", if sensors.is_empty() { "No data".to_string() } else { join(&sensors) });
    println!("----------------------------\n");
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let stats = Arc::new(Mutex::new(Stats::default()));
    let window = Duration::seconds(args.report_interval_seconds as i64);

    println!("Connecting to {}...", args.url);
    let (ws_stream, _) = connect_async(args.url.as_str())
        .await
        .with_context(|| format!("Failed to connect to {}", args.url))?;
    let (mut write, mut read) = ws_stream.split();
    println!("Connected. Press Ctrl+C to stop.");

    let stats_reporter = Arc::clone(&stats);
    let request_stats = args.request_stats;
    let (req_tx, mut req_rx) = tokio::sync::mpsc::unbounded_channel::<()>();
    tokio::spawn(async move {
        loop {
            sleep(std::time::Duration::from_secs(window.num_seconds().max(1) as u64)).await;
            report(&stats_reporter, window);
            if request_stats && req_tx.send(()).is_err() {
                break;
            }
        }
    });

    loop {
        tokio::select! {
            msg = read.next() => {
                let Some(Ok(msg)) = msg else { break };
                let Message::Text(text) = msg else { continue };
                let Ok(parsed) = serde_json::from_str::<Incoming>(text.as_str()) else { continue };

                let now = Utc::now();
                let Ok(mut data) = stats.lock() else { break };
                if parsed.kind == "sensor-delta" {
                    if let Some(sensor_id) = parsed.data["sensorId"].as_str() {
                        data.sensor_deltas.entry(sensor_id.to_string()).or_default().push_back(now);
                    }
                }
                data.kind_timestamps.entry(parsed.kind).or_default().push_back(now);
            }
            Some(()) = req_rx.recv() => {
                let request = json!({ "type": "request-server-stats" }).to_string();
                write.send(Message::Text(request.into())).await.context("Failed to send request")?;
            }
        }
    }

    println!("Server closed the connection.");
    Ok(())
}

//! Geolocation tracker backed by a gpsd daemon.
//!
//! Every usable TPV fix is published on a `watch` channel; readers only ever
//! see the latest position. A fix without a 2D lock leaves the previous one
//! in place.

use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::sync::watch;
use tokio::task::JoinHandle;

const WATCH_COMMAND: &str = "?WATCH={\"enable\":true,\"json\":true};\n";

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub latitude: f64,
    pub longitude: f64,
}

#[derive(Deserialize)]
struct GpsdReport {
    class: String,
    #[serde(default)]
    mode: u8,
    lat: Option<f64>,
    lon: Option<f64>,
}

/// Extracts a position from one gpsd JSON line, if it is a TPV report with
/// at least a 2D fix.
pub fn parse_fix(line: &str) -> Option<Position> {
    let report: GpsdReport = serde_json::from_str(line).ok()?;
    if report.class != "TPV" || report.mode < 2 {
        return None;
    }
    Some(Position {
        latitude: report.lat?,
        longitude: report.lon?,
    })
}

pub struct GeoTracker;

impl GeoTracker {
    /// Subscribes to gpsd at `addr`. The receiver holds `None` until the
    /// first fix and is closed when the watch is lost.
    pub fn spawn(addr: &str) -> (GeoWatch, watch::Receiver<Option<Position>>) {
        let (tx, rx) = watch::channel(None);
        let addr = addr.to_string();
        let task = tokio::spawn(async move {
            if let Err(e) = watch_positions(&addr, &tx).await {
                log::warn!("Position watch on {} lost: {}", addr, e);
            } else {
                log::warn!("Position watch on {} ended", addr);
            }
        });
        (GeoWatch { task }, rx)
    }
}

async fn watch_positions(addr: &str, tx: &watch::Sender<Option<Position>>) -> anyhow::Result<()> {
    let mut stream = TcpStream::connect(addr).await?;
    stream.write_all(WATCH_COMMAND.as_bytes()).await?;
    log::info!("Watching positions from gpsd at {}", addr);

    let mut lines = BufReader::new(stream).lines();
    while let Some(line) = lines.next_line().await? {
        if let Some(pos) = parse_fix(&line) {
            log::debug!("Fix: {:.6}, {:.6}", pos.latitude, pos.longitude);
            if tx.send(Some(pos)).is_err() {
                break;
            }
        }
    }
    Ok(())
}

/// Teardown handle for the position subscription.
pub struct GeoWatch {
    task: JoinHandle<()>,
}

impl GeoWatch {
    pub fn cancel(&self) {
        self.task.abort();
    }

    pub fn is_active(&self) -> bool {
        !self.task.is_finished()
    }
}

impl Drop for GeoWatch {
    fn drop(&mut self) {
        self.cancel();
    }
}

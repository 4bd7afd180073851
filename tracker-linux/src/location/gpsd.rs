//! gpsd client: streams TPV reports over the gpsd JSON protocol.

use async_trait::async_trait;
use serde::Deserialize;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use std::time::Duration;

use tokio::net::TcpStream;
use tracing::{debug, warn};
use tracker_core::{Coordinate, LocationError, LocationProvider, Permission, PositionSink, WatchHandle};

use super::{host_permission, Watches};

const WATCH_COMMAND: &[u8] = b"?WATCH={\"enable\":true,\"json\":true};\n";
const RECONNECT_DELAY: Duration = Duration::from_secs(1);
const MAX_RECONNECT_DELAY: Duration = Duration::from_secs(30);

pub struct GpsdProvider {
    addr: String,
    allow: bool,
    reconnect_delay: Duration,
    watches: Watches,
}

/// The subset of a gpsd report we read. Only `TPV` carries a position.
#[derive(Deserialize)]
struct Report {
    class: String,
    #[serde(default)]
    mode: u8,
    lat: Option<f64>,
    lon: Option<f64>,
}

/// Parse one gpsd line. `None` for lines that are not TPV reports; an error for a TPV
/// without a 2D/3D fix.
pub fn parse_report(line: &str) -> Option<Result<Coordinate, LocationError>> {
    let report: Report = serde_json::from_str(line).ok()?;
    if report.class != "TPV" {
        return None;
    }
    match (report.mode >= 2, report.lat, report.lon) {
        (true, Some(lat), Some(lon)) => Some(
            Coordinate::new(lat, lon).map_err(|e| LocationError::Unavailable(e.to_string())),
        ),
        _ => Some(Err(LocationError::Unavailable("no fix".into()))),
    }
}

impl GpsdProvider {
    pub fn new(addr: impl Into<String>, allow: bool) -> Self {
        Self {
            addr: addr.into(),
            allow,
            reconnect_delay: RECONNECT_DELAY,
            watches: Watches::default(),
        }
    }

    /// First wait before a watch reconnects; doubles per failed attempt up to 30s.
    #[cfg(test)]
    pub fn with_reconnect_delay(mut self, delay: Duration) -> Self {
        self.reconnect_delay = delay;
        self
    }
}

type GpsdLines = Lines<BufReader<TcpStream>>;

async fn connect(addr: &str) -> Result<GpsdLines, LocationError> {
    let mut stream = TcpStream::connect(addr)
        .await
        .map_err(|e| LocationError::Unavailable(format!("gpsd {}: {}", addr, e)))?;
    stream
        .write_all(WATCH_COMMAND)
        .await
        .map_err(|e| LocationError::Unavailable(e.to_string()))?;
    Ok(BufReader::new(stream).lines())
}

/// Retry until gpsd answers again. Only an abort ends this.
async fn reconnect(addr: &str, first_delay: Duration) -> GpsdLines {
    let mut delay = first_delay;
    loop {
        tokio::time::sleep(delay).await;
        match connect(addr).await {
            Ok(lines) => {
                debug!(addr, "gpsd reconnected");
                return lines;
            }
            Err(e) => {
                debug!(error = %e, "gpsd reconnect failed");
                delay = (delay * 2).min(MAX_RECONNECT_DELAY);
            }
        }
    }
}

#[async_trait]
impl LocationProvider for GpsdProvider {
    async fn check_permission(&self) -> Permission {
        host_permission(self.allow)
    }

    async fn request_permission(&self) -> Permission {
        host_permission(self.allow)
    }

    /// First TPV with a fix. Reports without a fix are skipped.
    async fn current_position(&self) -> Result<Coordinate, LocationError> {
        let mut lines = connect(&self.addr).await?;
        while let Ok(Some(line)) = lines.next_line().await {
            if let Some(Ok(c)) = parse_report(&line) {
                return Ok(c);
            }
        }
        Err(LocationError::Unavailable("gpsd closed the connection".into()))
    }

    /// A dropped connection is reported once as unavailable, then the watch reconnects
    /// and keeps delivering until cancelled.
    async fn watch_position(&self, sink: PositionSink) -> Result<WatchHandle, LocationError> {
        let mut lines = connect(&self.addr).await?;
        let addr = self.addr.clone();
        let delay = self.reconnect_delay;
        let task = tokio::spawn(async move {
            loop {
                while let Ok(Some(line)) = lines.next_line().await {
                    if let Some(result) = parse_report(&line) {
                        sink(result);
                    }
                }
                warn!(addr = %addr, "gpsd connection lost, reconnecting");
                sink(Err(LocationError::Unavailable(
                    "gpsd closed the connection".into(),
                )));
                lines = reconnect(&addr, delay).await;
            }
        });
        Ok(self.watches.insert(task))
    }

    async fn cancel_watch(&self, handle: WatchHandle) {
        if !self.watches.cancel(handle) {
            debug!(?handle, "cancel for unknown gpsd watch");
        }
    }
}

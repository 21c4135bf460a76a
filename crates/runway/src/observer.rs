//! Observer client: connect, send `CONFIG`, and fold the telemetry stream
//! into a [`FlightBoard`] of per-plane status and per-runway occupancy.

use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use anyhow::Context;
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::time::Instant;
use tokio_util::codec::{FramedRead, FramedWrite, LinesCodec};

use crate::config::ConfigCommand;
use crate::event::{FlightEvent, Phase, PlaneId};
use crate::pool::RunwayId;

/// Last known state of one plane.
#[derive(Debug, Clone, PartialEq)]
pub struct PlaneStatus {
    pub phase: Phase,
    pub runway: Option<RunwayId>,
    /// Completed fraction of the runway time, `0.0` while waiting.
    pub progress: f64,
    /// Planned runway time in seconds, once the plane is running.
    pub hold_secs: Option<f64>,
}

/// One plane's stay on a runway, measured from the start of the watch.
#[derive(Debug, Clone, PartialEq)]
pub struct Occupancy {
    pub plane_id: PlaneId,
    pub started: Duration,
    /// `None` while the plane is still on the runway.
    pub finished: Option<Duration>,
}

/// Running summary of everything an observer has seen.
#[derive(Debug)]
pub struct FlightBoard {
    opened: Instant,
    received: usize,
    planes: BTreeMap<PlaneId, PlaneStatus>,
    runways: BTreeMap<RunwayId, Vec<Occupancy>>,
}

impl Default for FlightBoard {
    fn default() -> Self {
        Self::new()
    }
}

impl FlightBoard {
    pub fn new() -> Self {
        Self {
            opened: Instant::now(),
            received: 0,
            planes: BTreeMap::new(),
            runways: BTreeMap::new(),
        }
    }

    pub fn record(&mut self, event: &FlightEvent) {
        let now = self.opened.elapsed();
        self.received += 1;

        let status = self.planes.entry(event.plane_id).or_insert(PlaneStatus {
            phase: event.phase,
            runway: None,
            progress: 0.0,
            hold_secs: None,
        });
        status.phase = event.phase;
        status.runway = event.runway;

        match event.phase {
            Phase::Waiting => status.progress = 0.0,
            Phase::Running => {
                status.progress = 0.0;
                status.hold_secs = Some(event.metric);
            }
            Phase::Progress | Phase::Completed => status.progress = event.metric,
        }

        let Some(runway) = event.runway else {
            return;
        };
        match event.phase {
            Phase::Running => self.runways.entry(runway).or_default().push(Occupancy {
                plane_id: event.plane_id,
                started: now,
                finished: None,
            }),
            Phase::Completed => {
                let open = self.runways.get_mut(&runway).and_then(|segments| {
                    segments
                        .iter_mut()
                        .rev()
                        .find(|s| s.plane_id == event.plane_id && s.finished.is_none())
                });
                match open {
                    Some(segment) => segment.finished = Some(now),
                    None => tracing::warn!(
                        plane = %event.plane_id,
                        runway = %runway,
                        "COMPLETED without a matching RUNNING"
                    ),
                }
            }
            Phase::Waiting | Phase::Progress => {}
        }
    }

    /// Number of events recorded.
    pub fn received(&self) -> usize {
        self.received
    }

    pub fn plane(&self, plane_id: PlaneId) -> Option<&PlaneStatus> {
        self.planes.get(&plane_id)
    }

    /// Planes in id order.
    pub fn planes(&self) -> impl Iterator<Item = (PlaneId, &PlaneStatus)> {
        self.planes.iter().map(|(id, status)| (*id, status))
    }

    /// Stays on `runway`, in service order.
    pub fn occupancy(&self, runway: RunwayId) -> &[Occupancy] {
        self.runways.get(&runway).map(Vec::as_slice).unwrap_or_default()
    }

    /// Runways that served at least one plane, in runway order.
    pub fn runways(&self) -> impl Iterator<Item = (RunwayId, &[Occupancy])> {
        self.runways.iter().map(|(id, segments)| (*id, segments.as_slice()))
    }

    pub fn all_completed(&self) -> bool {
        self.planes.values().all(|s| s.phase == Phase::Completed)
    }
}

impl fmt::Display for FlightBoard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{:<6} {:<10} {:<7} {:>8}", "PLANE", "STATUS", "RUNWAY", "PROGRESS")?;
        for (id, status) in self.planes() {
            let runway = status.runway.map_or_else(|| "-".to_string(), |r| r.to_string());
            writeln!(
                f,
                "{:<6} {:<10} {:<7} {:>7.0}%",
                id.to_string(),
                status.phase.as_str(),
                runway,
                status.progress * 100.0
            )?;
        }
        for (runway, segments) in self.runways() {
            write!(f, "runway {runway}:")?;
            for segment in segments {
                let start = segment.started.as_secs_f64();
                match segment.finished {
                    Some(end) => write!(
                        f,
                        " P{} [{start:.2}s..{:.2}s]",
                        segment.plane_id,
                        end.as_secs_f64()
                    )?,
                    None => write!(f, " P{} [{start:.2}s..]", segment.plane_id)?,
                }
            }
            writeln!(f)?;
        }
        Ok(())
    }
}

/// Connect to the manager, retrying while it is still starting up.
pub async fn connect_with_retry(
    addr: &str,
    attempts: usize,
    delay: Duration,
) -> anyhow::Result<TcpStream> {
    let mut last_error = None;
    for attempt in 1..=attempts.max(1) {
        match TcpStream::connect(addr).await {
            Ok(stream) => {
                tracing::info!(attempt, "Connected to runway manager");
                return Ok(stream);
            }
            Err(e) => {
                tracing::debug!(attempt, error = %e, "Runway manager not reachable yet");
                last_error = Some(e);
                tokio::time::sleep(delay).await;
            }
        }
    }
    Err(anyhow::anyhow!(
        "could not connect to {addr} after {attempts} attempts: {}",
        last_error.map(|e| e.to_string()).unwrap_or_default()
    ))
}

/// Send `command` (if any) and feed every telemetry event to `on_event`
/// until the manager closes the connection.
///
/// Malformed lines are logged and skipped. Returns the board built from
/// every event delivered to `on_event`.
pub async fn watch<F>(
    stream: TcpStream,
    command: Option<&ConfigCommand>,
    mut on_event: F,
) -> anyhow::Result<FlightBoard>
where
    F: FnMut(FlightEvent),
{
    let (read_half, write_half) = stream.into_split();

    if let Some(command) = command {
        let mut writer = FramedWrite::new(write_half, LinesCodec::new());
        let line = format!("{command}\r");
        writer
            .send(line.as_str())
            .await
            .context("failed to send CONFIG")?;
        tracing::info!(config = %command, "Sent CONFIG");
    }

    let mut lines = FramedRead::new(read_half, LinesCodec::new());
    let mut board = FlightBoard::new();
    while let Some(line) = lines.next().await {
        let line = line.context("failed to read telemetry")?;
        if line.trim().is_empty() {
            continue;
        }
        match FlightEvent::parse_line(&line) {
            Ok(event) => {
                board.record(&event);
                on_event(event);
            }
            Err(e) => tracing::warn!(error = %e, line = %line, "Skipping malformed telemetry"),
        }
    }
    tracing::info!(received = board.received(), "Runway manager closed the connection");
    Ok(board)
}

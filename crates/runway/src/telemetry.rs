//! Telemetry sink: many planes announce, one writer talks to the observer.
//!
//! Events are pushed onto an unbounded channel and a single writer task
//! frames them as lines on the observer connection. Delivery is best
//! effort: a failed write drops that event with a warning and is never
//! retried. Each plane's own events keep their order; events from different
//! planes interleave in whatever order they reach the channel.
//!
//! Only one observer is ever attached. Fan-out to several observers is not
//! supported.

use std::sync::{Arc, Mutex};

use futures::SinkExt;
use tokio::io::AsyncWrite;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::codec::{FramedWrite, LinesCodec};

use crate::event::{FlightEvent, PlaneId};

/// Anything planes can report their state transitions to.
pub trait Announce: Send + Sync {
    /// Report one event. Must not block and must not fail the caller.
    fn announce(&self, event: FlightEvent);
}

/// Delivery counters reported when the writer shuts down.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TelemetryStats {
    pub delivered: usize,
    pub dropped: usize,
}

/// Producer handle for the observer connection. Cheap to clone.
#[derive(Clone)]
pub struct TelemetrySink {
    tx: Option<mpsc::UnboundedSender<FlightEvent>>,
}

impl TelemetrySink {
    /// Attach the sink to an observer connection.
    ///
    /// The writer task runs until every clone of the returned sink has been
    /// dropped; await [`TelemetryWriter::finish`] to flush and collect stats.
    pub fn attach<W>(writer: W) -> (Self, TelemetryWriter)
    where
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let (tx, rx) = mpsc::unbounded_channel();
        let framed = FramedWrite::new(writer, LinesCodec::new());
        let handle = tokio::spawn(run_writer(framed, rx));
        (Self { tx: Some(tx) }, TelemetryWriter { handle })
    }

    /// A sink with no observer: every announcement is discarded.
    pub fn detached() -> Self {
        Self { tx: None }
    }

    pub fn is_attached(&self) -> bool {
        self.tx.is_some()
    }
}

impl Announce for TelemetrySink {
    fn announce(&self, event: FlightEvent) {
        match &self.tx {
            Some(tx) => {
                if let Err(e) = tx.send(event) {
                    tracing::debug!(event = %e.0, "Telemetry writer gone, dropping event");
                }
            }
            None => tracing::trace!(event = %event, "No observer attached"),
        }
    }
}

/// Handle to the writer task owning the observer connection.
pub struct TelemetryWriter {
    handle: JoinHandle<TelemetryStats>,
}

impl TelemetryWriter {
    /// Wait for the writer to drain and close the connection.
    ///
    /// Completes once every [`TelemetrySink`] clone has been dropped.
    pub async fn finish(self) -> TelemetryStats {
        match self.handle.await {
            Ok(stats) => stats,
            Err(e) => {
                tracing::error!(error = %e, "Telemetry writer task failed");
                TelemetryStats::default()
            }
        }
    }
}

async fn run_writer<W>(
    mut framed: FramedWrite<W, LinesCodec>,
    mut rx: mpsc::UnboundedReceiver<FlightEvent>,
) -> TelemetryStats
where
    W: AsyncWrite + Unpin,
{
    let mut stats = TelemetryStats::default();

    while let Some(event) = rx.recv().await {
        let line = event.to_string();
        match framed.send(line.as_str()).await {
            Ok(()) => {
                stats.delivered += 1;
                tracing::trace!(line = %line, "Sent to observer");
            }
            Err(e) => {
                // The encoded line stays buffered after a failed flush.
                framed.write_buffer_mut().clear();
                stats.dropped += 1;
                tracing::warn!(error = %e, line = %line, "Failed to send event to observer");
            }
        }
    }

    if let Err(e) = SinkExt::<&str>::close(&mut framed).await {
        tracing::debug!(error = %e, "Observer connection did not close cleanly");
    }
    tracing::debug!(
        delivered = stats.delivered,
        dropped = stats.dropped,
        "Telemetry writer finished"
    );
    stats
}

/// In-memory sink that keeps every event, in announcement order.
#[derive(Debug, Default)]
pub struct FlightRecorder {
    events: Mutex<Vec<FlightEvent>>,
}

impl FlightRecorder {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn events(&self) -> Vec<FlightEvent> {
        match self.events.lock() {
            Ok(events) => events.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Events of one plane, in the order that plane announced them.
    pub fn events_for(&self, plane_id: PlaneId) -> Vec<FlightEvent> {
        self.events()
            .into_iter()
            .filter(|e| e.plane_id == plane_id)
            .collect()
    }
}

impl Announce for FlightRecorder {
    fn announce(&self, event: FlightEvent) {
        match self.events.lock() {
            Ok(mut events) => events.push(event),
            Err(poisoned) => poisoned.into_inner().push(event),
        }
    }
}

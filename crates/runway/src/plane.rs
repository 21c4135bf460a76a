//! Per-plane state machine.
//!
//! `WAITING → RUNNING → PROGRESS* → COMPLETED`
//!
//! A plane announces itself, asks the tower for a runway (holding if none is
//! free), occupies the runway for its planned duration while reporting
//! progress, then announces completion and releases. The release hands the
//! runway to the next waiting plane.

use std::ops::RangeInclusive;
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;

use crate::event::{FlightEvent, PlaneId, Priority};
use crate::pool::RunwayId;
use crate::telemetry::Announce;
use crate::tower::{Clearance, ClearanceError, ControlTower};

/// Shortest progress slice a plane will sleep.
const MIN_SLICE: Duration = Duration::from_millis(1);

#[derive(Debug, Clone)]
pub struct Plane {
    id: PlaneId,
    priority: Priority,
    hold: Duration,
}

impl Plane {
    pub fn new(id: PlaneId, priority: Priority, hold: Duration) -> Self {
        Self { id, priority, hold }
    }

    /// Create a plane whose hold time is drawn uniformly from `hold_ms`.
    pub fn with_random_hold<R: Rng + ?Sized>(
        id: PlaneId,
        priority: Priority,
        hold_ms: &RangeInclusive<u64>,
        rng: &mut R,
    ) -> Self {
        let millis = rng.gen_range(hold_ms.clone());
        Self::new(id, priority, Duration::from_millis(millis))
    }

    pub fn id(&self) -> PlaneId {
        self.id
    }

    pub fn priority(&self) -> Priority {
        self.priority
    }

    pub fn hold(&self) -> Duration {
        self.hold
    }

    /// Run the plane through its whole lifecycle.
    ///
    /// `slice` is how long the plane sleeps between progress reports.
    pub async fn fly(
        self,
        tower: &Arc<ControlTower>,
        telemetry: &dyn Announce,
        slice: Duration,
    ) -> Result<FlightLog, FlightError> {
        tracing::info!(
            plane = %self.id,
            priority = %self.priority,
            hold = ?self.hold,
            "Plane started"
        );
        telemetry.announce(FlightEvent::waiting(self.id));

        let (grant, queued_for) = match tower.request(self.id, self.priority) {
            Clearance::Granted(grant) => (grant, None),
            Clearance::Holding(holding) => {
                let started = tokio::time::Instant::now();
                let grant = holding.wait().await?;
                (grant, Some(started.elapsed()))
            }
        };
        let runway = grant.runway();
        tracing::info!(plane = %self.id, runway = %runway, "Acquired runway");

        telemetry.announce(FlightEvent::running(
            self.id,
            runway,
            self.hold.as_secs_f64(),
        ));
        let progress_reports = self.occupy(runway, telemetry, slice).await;

        telemetry.announce(FlightEvent::completed(self.id, runway));
        tracing::info!(plane = %self.id, runway = %runway, "Completed on runway");
        grant.release();

        Ok(FlightLog {
            plane_id: self.id,
            priority: self.priority,
            runway,
            hold: self.hold,
            queued_for,
            progress_reports,
        })
    }

    async fn occupy(&self, runway: RunwayId, telemetry: &dyn Announce, slice: Duration) -> usize {
        let slice = slice.max(MIN_SLICE);
        let planned = self.hold.as_secs_f64();
        let mut elapsed = Duration::ZERO;
        let mut reports = 0;

        while elapsed < self.hold {
            tokio::time::sleep(slice).await;
            elapsed += slice;
            let fraction = (elapsed.as_secs_f64() / planned).min(1.0);
            telemetry.announce(FlightEvent::progress(self.id, runway, fraction));
            reports += 1;
        }
        reports
    }
}

/// What happened to one plane.
#[derive(Debug, Clone)]
pub struct FlightLog {
    pub plane_id: PlaneId,
    pub priority: Priority,
    pub runway: RunwayId,
    pub hold: Duration,
    /// Time spent in the holding pattern, `None` if a runway was free.
    pub queued_for: Option<Duration>,
    pub progress_reports: usize,
}

impl FlightLog {
    pub fn waited(&self) -> bool {
        self.queued_for.is_some()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum FlightError {
    #[error(transparent)]
    Clearance(#[from] ClearanceError),
}

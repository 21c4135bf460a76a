//! Flight events and the telemetry line protocol.
//!
//! One record per event, newline-terminated:
//!
//! ```text
//! <planeId>,<PHASE>,<runway>,<metric>
//! ```
//!
//! `runway` is 1-based on the wire, `0` when the plane holds no runway.
//! `metric` is `0.0` for WAITING, the planned hold in seconds for RUNNING,
//! the completed fraction for PROGRESS and `1.0` for COMPLETED.

use std::fmt;
use std::str::FromStr;

use crate::pool::RunwayId;

/// Identifier of a plane, assigned in configuration order starting at 1.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PlaneId(u32);

impl PlaneId {
    pub fn new(id: u32) -> Self {
        Self(id)
    }

    pub fn get(&self) -> u32 {
        self.0
    }
}

impl fmt::Display for PlaneId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Scheduling priority. `1` is the most urgent; larger values wait longer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Priority(u32);

impl Priority {
    pub const MOST_URGENT: Priority = Priority(1);

    /// Returns `None` for `0`, which is not a valid priority.
    pub fn new(value: u32) -> Option<Self> {
        (value >= 1).then_some(Self(value))
    }

    pub fn get(&self) -> u32 {
        self.0
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid priority '{0}': expected an integer >= 1")]
pub struct InvalidPriority(pub String);

impl FromStr for Priority {
    type Err = InvalidPriority;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim()
            .parse::<u32>()
            .ok()
            .and_then(Priority::new)
            .ok_or_else(|| InvalidPriority(s.to_string()))
    }
}

/// Lifecycle phase of a plane as reported to the observer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Waiting,
    Running,
    Progress,
    Completed,
}

impl Phase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Waiting => "WAITING",
            Self::Running => "RUNNING",
            Self::Progress => "PROGRESS",
            Self::Completed => "COMPLETED",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Phase {
    type Err = EventParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "WAITING" => Ok(Self::Waiting),
            "RUNNING" => Ok(Self::Running),
            "PROGRESS" => Ok(Self::Progress),
            "COMPLETED" => Ok(Self::Completed),
            other => Err(EventParseError::Phase(other.to_string())),
        }
    }
}

/// A single state transition of one plane.
#[derive(Debug, Clone, PartialEq)]
pub struct FlightEvent {
    pub plane_id: PlaneId,
    pub phase: Phase,
    pub runway: Option<RunwayId>,
    pub metric: f64,
}

impl FlightEvent {
    pub fn waiting(plane_id: PlaneId) -> Self {
        Self {
            plane_id,
            phase: Phase::Waiting,
            runway: None,
            metric: 0.0,
        }
    }

    /// `hold_secs` is the total planned time on the runway.
    pub fn running(plane_id: PlaneId, runway: RunwayId, hold_secs: f64) -> Self {
        Self {
            plane_id,
            phase: Phase::Running,
            runway: Some(runway),
            metric: hold_secs,
        }
    }

    /// `fraction` is clamped to `[0, 1]`.
    pub fn progress(plane_id: PlaneId, runway: RunwayId, fraction: f64) -> Self {
        Self {
            plane_id,
            phase: Phase::Progress,
            runway: Some(runway),
            metric: fraction.clamp(0.0, 1.0),
        }
    }

    pub fn completed(plane_id: PlaneId, runway: RunwayId) -> Self {
        Self {
            plane_id,
            phase: Phase::Completed,
            runway: Some(runway),
            metric: 1.0,
        }
    }

    /// Decode one telemetry record. Trailing `\r`/`\n` are ignored.
    pub fn parse_line(line: &str) -> Result<Self, EventParseError> {
        let fields: Vec<&str> = line.trim_end_matches(['\r', '\n']).split(',').collect();
        let [plane, phase, runway, metric] = fields.as_slice() else {
            return Err(EventParseError::FieldCount(fields.len()));
        };

        let plane_id = plane
            .trim()
            .parse::<u32>()
            .map(PlaneId::new)
            .map_err(|_| EventParseError::PlaneId(plane.to_string()))?;
        let phase = phase.trim().parse::<Phase>()?;
        let runway = match runway.trim().parse::<usize>() {
            Ok(0) => None,
            Ok(n) => Some(RunwayId::new(n - 1)),
            Err(_) => return Err(EventParseError::Runway(runway.to_string())),
        };
        let metric = metric
            .trim()
            .parse::<f64>()
            .map_err(|_| EventParseError::Metric(metric.to_string()))?;

        Ok(Self {
            plane_id,
            phase,
            runway,
            metric,
        })
    }
}

impl fmt::Display for FlightEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let runway = self.runway.map_or(0, |r| r.wire_number());
        match self.phase {
            Phase::Waiting | Phase::Completed => write!(
                f,
                "{},{},{},{:.1}",
                self.plane_id, self.phase, runway, self.metric
            ),
            Phase::Running | Phase::Progress => write!(
                f,
                "{},{},{},{:.2}",
                self.plane_id, self.phase, runway, self.metric
            ),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EventParseError {
    #[error("expected 4 comma-separated fields, got {0}")]
    FieldCount(usize),
    #[error("invalid plane id '{0}'")]
    PlaneId(String),
    #[error("unknown phase '{0}'")]
    Phase(String),
    #[error("invalid runway number '{0}'")]
    Runway(String),
    #[error("invalid metric '{0}'")]
    Metric(String),
}

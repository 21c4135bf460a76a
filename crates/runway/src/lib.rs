//! runway: priority-ordered runway allocation with live telemetry.
//!
//! A fixed pool of runways is shared by a larger population of planes, each
//! with a fixed priority. The [`ControlTower`] owns the pool and the waiting
//! list; each [`Plane`] runs as its own task and reports every state
//! transition to one observer through an [`Announce`] sink.

mod pool;
mod waitlist;

pub mod config;
pub mod event;
pub mod observer;
pub mod plane;
pub mod server;
pub mod simulation;
pub mod telemetry;
pub mod tower;

pub use config::{ConfigCommand, ConfigError, SimulationConfig};
pub use event::{EventParseError, FlightEvent, Phase, PlaneId, Priority};
pub use observer::{FlightBoard, Occupancy, PlaneStatus};
pub use plane::{FlightError, FlightLog, Plane};
pub use pool::{RunwayId, RunwayPool};
pub use server::{ServerConfig, SessionReport, serve};
pub use simulation::{Simulation, SimulationReport};
pub use telemetry::{Announce, FlightRecorder, TelemetrySink, TelemetryStats, TelemetryWriter};
pub use tower::{Clearance, ClearanceError, ControlTower, HoldingPattern, RunwayGrant, TowerSnapshot};
pub use waitlist::{Requester, WaitingList};

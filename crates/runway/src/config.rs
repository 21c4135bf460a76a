//! Simulation settings and the observer's `CONFIG` command.

use std::fmt;
use std::ops::RangeInclusive;
use std::str::FromStr;
use std::time::Duration;

use crate::event::{InvalidPriority, Priority};

pub const DEFAULT_RUNWAYS: usize = 3;
pub const DEFAULT_PLANES: usize = 10;

#[derive(Debug, Clone)]
pub struct SimulationConfig {
    pub runways: usize,
    /// Range each plane's runway time is drawn from, in milliseconds.
    pub hold_ms: RangeInclusive<u64>,
    /// Sleep between two progress reports.
    pub progress_slice: Duration,
    /// Delay between launching consecutive planes.
    pub launch_stagger: Duration,
    /// Seed for hold times; `None` draws from OS entropy.
    pub seed: Option<u64>,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            runways: DEFAULT_RUNWAYS,
            hold_ms: 2000..=4000,
            progress_slice: Duration::from_millis(50),
            launch_stagger: Duration::from_millis(100),
            seed: None,
        }
    }
}

impl SimulationConfig {
    pub fn with_runways(mut self, runways: usize) -> Self {
        self.runways = runways;
        self
    }

    pub fn with_hold_ms(mut self, hold_ms: RangeInclusive<u64>) -> Self {
        self.hold_ms = hold_ms;
        self
    }

    pub fn with_progress_slice(mut self, slice: Duration) -> Self {
        self.progress_slice = slice;
        self
    }

    pub fn with_launch_stagger(mut self, stagger: Duration) -> Self {
        self.launch_stagger = stagger;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.runways == 0 {
            return Err(ConfigError::NoRunways);
        }
        if self.hold_ms.is_empty() {
            return Err(ConfigError::EmptyHoldRange {
                min: *self.hold_ms.start(),
                max: *self.hold_ms.end(),
            });
        }
        if self.progress_slice.is_zero() {
            return Err(ConfigError::ZeroSlice);
        }
        Ok(())
    }
}

/// `CONFIG,<runways>,<planes>,<p1>,...,<pN>` as sent by the observer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigCommand {
    pub runways: usize,
    /// One priority per plane; plane ids are assigned 1..=N in this order.
    pub priorities: Vec<Priority>,
}

impl ConfigCommand {
    pub const KEYWORD: &'static str = "CONFIG";

    pub fn new(runways: usize, priorities: Vec<Priority>) -> Self {
        Self {
            runways,
            priorities,
        }
    }

    pub fn planes(&self) -> usize {
        self.priorities.len()
    }
}

impl FromStr for ConfigCommand {
    type Err = ConfigError;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let mut fields = line
            .trim()
            .split(',')
            .map(str::trim)
            .filter(|f| !f.is_empty());

        match fields.next() {
            Some(Self::KEYWORD) => {}
            other => return Err(ConfigError::NotConfig(other.unwrap_or_default().to_string())),
        }

        let runways = parse_count(fields.next(), "runways")?;
        if runways == 0 {
            return Err(ConfigError::NoRunways);
        }
        let planes = parse_count(fields.next(), "planes")?;

        let priorities = fields
            .enumerate()
            .map(|(i, field)| {
                field
                    .parse::<Priority>()
                    .map_err(|source| ConfigError::InvalidPriority { plane: i + 1, source })
            })
            .collect::<Result<Vec<_>, _>>()?;

        if priorities.len() != planes {
            return Err(ConfigError::PlaneCountMismatch {
                declared: planes,
                received: priorities.len(),
            });
        }

        Ok(Self {
            runways,
            priorities,
        })
    }
}

impl fmt::Display for ConfigCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{},{},{}", Self::KEYWORD, self.runways, self.planes())?;
        for priority in &self.priorities {
            write!(f, ",{priority}")?;
        }
        Ok(())
    }
}

fn parse_count(field: Option<&str>, name: &'static str) -> Result<usize, ConfigError> {
    let value = field.ok_or(ConfigError::MissingField(name))?;
    value.parse().map_err(|_| ConfigError::InvalidNumber {
        field: name,
        value: value.to_string(),
    })
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("expected CONFIG, got '{0}'")]
    NotConfig(String),

    #[error("CONFIG is missing the {0} field")]
    MissingField(&'static str),

    #[error("invalid {field} '{value}'")]
    InvalidNumber { field: &'static str, value: String },

    #[error("at least one runway is required")]
    NoRunways,

    #[error("plane {plane}: {source}")]
    InvalidPriority {
        plane: usize,
        #[source]
        source: InvalidPriority,
    },

    #[error("expected {declared} priorities, got {received}")]
    PlaneCountMismatch { declared: usize, received: usize },

    #[error("hold range {min}..={max} ms is empty")]
    EmptyHoldRange { min: u64, max: u64 },

    #[error("progress slice must be greater than zero")]
    ZeroSlice,

    #[error("no CONFIG received within {0:?}")]
    Timeout(Duration),

    #[error("observer disconnected before sending CONFIG")]
    Disconnected,

    #[error("failed to read CONFIG: {0}")]
    Read(#[from] tokio_util::codec::LinesCodecError),
}

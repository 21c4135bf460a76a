//! Runway pool: a counting gate that also tracks which unit is held.
//!
//! The pool does no locking of its own. It is only reachable through
//! [`ControlTower`](crate::tower::ControlTower), whose lock turns every call
//! here into one critical region, so the available counter and the busy
//! table are always updated together.

use std::fmt;

/// Index of a runway in the pool, `0..capacity`.
///
/// Displays 1-based, matching the telemetry wire format and the logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RunwayId(usize);

impl RunwayId {
    pub fn new(index: usize) -> Self {
        Self(index)
    }

    pub fn index(&self) -> usize {
        self.0
    }

    /// Number used on the wire: index + 1, so that `0` can mean "none".
    pub fn wire_number(&self) -> usize {
        self.0 + 1
    }
}

impl fmt::Display for RunwayId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.wire_number())
    }
}

/// Fixed-size pool of interchangeable runways.
#[derive(Debug)]
pub struct RunwayPool {
    busy: Vec<bool>,
    available: usize,
    peak_busy: usize,
}

impl RunwayPool {
    pub fn new(capacity: usize) -> Self {
        Self {
            busy: vec![false; capacity],
            available: capacity,
            peak_busy: 0,
        }
    }

    /// Take the lowest-numbered free runway, or `None` if all are busy.
    pub fn try_acquire(&mut self) -> Option<RunwayId> {
        if self.available == 0 {
            return None;
        }
        let index = self.busy.iter().position(|busy| !busy)?;
        self.busy[index] = true;
        self.available -= 1;
        self.peak_busy = self.peak_busy.max(self.busy());
        Some(RunwayId(index))
    }

    /// Mark a runway free again.
    ///
    /// Returns `false` (and changes nothing) if the runway is unknown or
    /// already free.
    pub fn release(&mut self, runway: RunwayId) -> bool {
        match self.busy.get_mut(runway.0) {
            Some(flag) if *flag => {
                *flag = false;
                self.available += 1;
                true
            }
            _ => false,
        }
    }

    pub fn is_busy(&self, runway: RunwayId) -> bool {
        self.busy.get(runway.0).copied().unwrap_or(false)
    }

    pub fn capacity(&self) -> usize {
        self.busy.len()
    }

    pub fn available(&self) -> usize {
        self.available
    }

    pub fn busy(&self) -> usize {
        self.capacity() - self.available
    }

    /// Highest number of runways that were ever busy at the same time.
    pub fn peak_busy(&self) -> usize {
        self.peak_busy
    }
}

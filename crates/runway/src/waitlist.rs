//! Priority-ordered list of planes waiting for a runway.
//!
//! Kept sorted ascending by priority value at all times. Requesters with
//! equal priority stay in arrival order.

use std::collections::VecDeque;

use tokio::sync::oneshot;

use crate::event::{PlaneId, Priority};
use crate::pool::RunwayId;

/// A plane blocked on the tower, together with its private wake channel.
///
/// The wake channel fires exactly once, carrying the runway handed over by
/// the releasing plane.
#[derive(Debug)]
pub struct Requester {
    plane_id: PlaneId,
    priority: Priority,
    arrival: u64,
    wake: oneshot::Sender<RunwayId>,
}

impl Requester {
    pub fn new(plane_id: PlaneId, priority: Priority, wake: oneshot::Sender<RunwayId>) -> Self {
        Self {
            plane_id,
            priority,
            arrival: 0,
            wake,
        }
    }

    pub fn plane_id(&self) -> PlaneId {
        self.plane_id
    }

    pub fn priority(&self) -> Priority {
        self.priority
    }

    /// Arrival sequence number, assigned on insertion.
    pub fn arrival(&self) -> u64 {
        self.arrival
    }

    /// Hand `runway` to the waiting plane.
    ///
    /// Gives the runway back if the plane stopped listening.
    pub fn wake(self, runway: RunwayId) -> Result<(), RunwayId> {
        self.wake.send(runway)
    }
}

#[derive(Debug, Default)]
pub struct WaitingList {
    queue: VecDeque<Requester>,
    next_arrival: u64,
}

impl WaitingList {
    /// `capacity` is a sizing hint (usually the plane population), not a limit.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            queue: VecDeque::with_capacity(capacity),
            next_arrival: 0,
        }
    }

    /// Insert behind every requester of equal or more urgent priority.
    ///
    /// Returns the position the requester landed at (0 = next to be woken).
    pub fn insert(&mut self, mut requester: Requester) -> usize {
        requester.arrival = self.next_arrival;
        self.next_arrival += 1;

        let position = self
            .queue
            .partition_point(|queued| queued.priority <= requester.priority);
        self.queue.insert(position, requester);
        position
    }

    /// Remove the most urgent requester, the earliest arrival among equals.
    pub fn pop_highest_priority(&mut self) -> Option<Requester> {
        self.queue.pop_front()
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Requester> {
        self.queue.iter()
    }
}

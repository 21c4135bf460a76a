//! Control tower: the one owner of the runway pool and the waiting list.
//!
//! Both structures live behind a single lock. The two operations planes use,
//! request (check-then-register) and release (release-then-wake), each run as
//! one critical region on that lock, so a release can never look at an empty
//! waiting list while a request is between "no runway free" and "queued".
//!
//! A released runway is handed straight to the most urgent waiting plane. It
//! stays busy throughout, so a plane that never waited cannot grab it in
//! between.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Instant;

use tokio::sync::oneshot;

use crate::event::{PlaneId, Priority};
use crate::pool::{RunwayId, RunwayPool};
use crate::waitlist::{Requester, WaitingList};

struct Airspace {
    pool: RunwayPool,
    waiting: WaitingList,
}

/// Point-in-time view of the tower, for reporting and tests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TowerSnapshot {
    pub capacity: usize,
    pub available: usize,
    pub busy: usize,
    pub peak_busy: usize,
    /// Waiting planes, next to be woken first.
    pub waiting: Vec<(PlaneId, Priority)>,
}

impl TowerSnapshot {
    /// All runways free and nobody waiting.
    pub fn is_idle(&self) -> bool {
        self.available == self.capacity && self.waiting.is_empty()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ClearanceError {
    #[error("plane {0} was dropped from the waiting list without a runway")]
    Revoked(PlaneId),
}

/// Outcome of [`ControlTower::request`].
#[must_use = "a granted runway is held until released"]
pub enum Clearance {
    /// A runway was free and is now held.
    Granted(RunwayGrant),
    /// No runway was free; the plane is queued.
    Holding(HoldingPattern),
}

impl Clearance {
    pub fn is_granted(&self) -> bool {
        matches!(self, Clearance::Granted(_))
    }

    /// Resolve to a held runway, waiting in the holding pattern if needed.
    pub async fn landed(self) -> Result<RunwayGrant, ClearanceError> {
        match self {
            Clearance::Granted(grant) => Ok(grant),
            Clearance::Holding(holding) => holding.wait().await,
        }
    }
}

/// A held runway. Release it exactly once with [`RunwayGrant::release`].
#[must_use = "a runway is held until the grant is released"]
pub struct RunwayGrant {
    runway: RunwayId,
    tower: Option<Arc<ControlTower>>,
}

impl RunwayGrant {
    fn new(runway: RunwayId, tower: Arc<ControlTower>) -> Self {
        Self {
            runway,
            tower: Some(tower),
        }
    }

    pub fn runway(&self) -> RunwayId {
        self.runway
    }

    /// Give the runway back, waking the next waiting plane if there is one.
    pub fn release(mut self) {
        if let Some(tower) = self.tower.take() {
            tower.release(self.runway);
        }
    }
}

impl Drop for RunwayGrant {
    fn drop(&mut self) {
        if let Some(tower) = self.tower.take() {
            tracing::error!(runway = %self.runway, "RunwayGrant dropped without release - releasing");
            tower.release(self.runway);
        }
    }
}

/// A queued request. Resolves once a releasing plane hands over a runway.
pub struct HoldingPattern {
    plane_id: PlaneId,
    receiver: oneshot::Receiver<RunwayId>,
    tower: Arc<ControlTower>,
    since: Instant,
}

impl HoldingPattern {
    pub fn plane_id(&self) -> PlaneId {
        self.plane_id
    }

    /// Block until a runway is handed over. There is no timeout.
    pub async fn wait(mut self) -> Result<RunwayGrant, ClearanceError> {
        let runway = (&mut self.receiver)
            .await
            .map_err(|_| ClearanceError::Revoked(self.plane_id))?;
        tracing::debug!(
            plane = %self.plane_id,
            runway = %runway,
            waited = ?self.since.elapsed(),
            "Cleared from holding pattern"
        );
        Ok(RunwayGrant::new(runway, Arc::clone(&self.tower)))
    }
}

impl Drop for HoldingPattern {
    fn drop(&mut self) {
        // A runway may have been handed over after the waiting plane gave up.
        self.receiver.close();
        if let Ok(runway) = self.receiver.try_recv() {
            tracing::warn!(
                plane = %self.plane_id,
                runway = %runway,
                "Holding plane abandoned a handed-over runway - releasing"
            );
            self.tower.release(runway);
        }
    }
}

enum Handoff {
    Woke {
        plane_id: PlaneId,
        priority: Priority,
        skipped: usize,
        still_waiting: usize,
    },
    Freed {
        skipped: usize,
    },
    NotHeld,
}

/// Owner of the runway pool and the waiting list.
pub struct ControlTower {
    airspace: Mutex<Airspace>,
}

impl ControlTower {
    pub fn new(runways: usize) -> Arc<Self> {
        Self::with_expected_planes(runways, 0)
    }

    /// `planes` pre-sizes the waiting list; it is not a hard limit.
    pub fn with_expected_planes(runways: usize, planes: usize) -> Arc<Self> {
        Arc::new(Self {
            airspace: Mutex::new(Airspace {
                pool: RunwayPool::new(runways),
                waiting: WaitingList::with_capacity(planes),
            }),
        })
    }

    fn airspace(&self) -> MutexGuard<'_, Airspace> {
        match self.airspace.lock() {
            Ok(guard) => guard,
            Err(poisoned) => {
                tracing::error!("Tower lock poisoned - recovering");
                poisoned.into_inner()
            }
        }
    }

    /// Ask for a runway.
    ///
    /// Takes a free runway only when nobody is queued; otherwise the plane
    /// joins the waiting list. Both checks and the registration happen under
    /// the tower lock.
    pub fn request(self: &Arc<Self>, plane_id: PlaneId, priority: Priority) -> Clearance {
        let mut airspace = self.airspace();

        if airspace.waiting.is_empty()
            && let Some(runway) = airspace.pool.try_acquire()
        {
            drop(airspace);
            tracing::debug!(plane = %plane_id, runway = %runway, "Runway granted immediately");
            return Clearance::Granted(RunwayGrant::new(runway, Arc::clone(self)));
        }

        let (wake, receiver) = oneshot::channel();
        let position = airspace
            .waiting
            .insert(Requester::new(plane_id, priority, wake));
        let queued = airspace.waiting.len();
        drop(airspace);

        tracing::info!(
            plane = %plane_id,
            priority = %priority,
            position,
            queued,
            "No runway available, entering holding pattern"
        );

        Clearance::Holding(HoldingPattern {
            plane_id,
            receiver,
            tower: Arc::clone(self),
            since: Instant::now(),
        })
    }

    /// Release a held runway.
    ///
    /// Under the tower lock: hand the runway to the most urgent waiting plane
    /// that is still listening, or return it to the pool if there is none.
    /// Usually reached through [`RunwayGrant::release`].
    pub fn release(&self, runway: RunwayId) {
        let handoff = {
            let mut airspace = self.airspace();
            if !airspace.pool.is_busy(runway) {
                Handoff::NotHeld
            } else {
                let mut skipped = 0;
                let mut woke = None;
                while let Some(next) = airspace.waiting.pop_highest_priority() {
                    let (plane_id, priority) = (next.plane_id(), next.priority());
                    if next.wake(runway).is_ok() {
                        woke = Some((plane_id, priority));
                        break;
                    }
                    skipped += 1;
                }
                match woke {
                    Some((plane_id, priority)) => Handoff::Woke {
                        plane_id,
                        priority,
                        skipped,
                        still_waiting: airspace.waiting.len(),
                    },
                    None => {
                        airspace.pool.release(runway);
                        Handoff::Freed { skipped }
                    }
                }
            }
        };

        match handoff {
            Handoff::Woke {
                plane_id,
                priority,
                skipped,
                still_waiting,
            } => {
                if skipped > 0 {
                    tracing::warn!(skipped, "Skipped waiting planes that stopped listening");
                }
                tracing::info!(
                    runway = %runway,
                    plane = %plane_id,
                    priority = %priority,
                    still_waiting,
                    "Runway handed to next waiting plane"
                );
            }
            Handoff::Freed { skipped } => {
                if skipped > 0 {
                    tracing::warn!(skipped, "Skipped waiting planes that stopped listening");
                }
                tracing::debug!(runway = %runway, "Runway returned to pool");
            }
            Handoff::NotHeld => {
                tracing::warn!(runway = %runway, "Release of a runway that is not held - ignoring");
            }
        }
    }

    pub fn snapshot(&self) -> TowerSnapshot {
        let airspace = self.airspace();
        TowerSnapshot {
            capacity: airspace.pool.capacity(),
            available: airspace.pool.available(),
            busy: airspace.pool.busy(),
            peak_busy: airspace.pool.peak_busy(),
            waiting: airspace
                .waiting
                .iter()
                .map(|r| (r.plane_id(), r.priority()))
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, Ordering};

    use super::*;

    fn plane(id: u32) -> PlaneId {
        PlaneId::new(id)
    }

    fn prio(value: u32) -> Priority {
        Priority::new(value).unwrap()
    }

    fn granted(clearance: Clearance) -> RunwayGrant {
        match clearance {
            Clearance::Granted(grant) => grant,
            Clearance::Holding(h) => panic!("plane {} unexpectedly queued", h.plane_id()),
        }
    }

    fn holding(clearance: Clearance) -> HoldingPattern {
        match clearance {
            Clearance::Holding(holding) => holding,
            Clearance::Granted(g) => panic!("unexpected grant of runway {}", g.runway()),
        }
    }

    #[tokio::test]
    async fn free_runway_is_granted_without_queueing() {
        let tower = ControlTower::new(2);

        let clearance = tower.request(plane(1), prio(4));
        assert!(clearance.is_granted());
        let grant = granted(clearance);
        assert_eq!(grant.runway(), RunwayId::new(0));

        let snapshot = tower.snapshot();
        assert!(snapshot.waiting.is_empty());
        assert_eq!(snapshot.busy, 1);

        grant.release();
        assert!(tower.snapshot().is_idle());
    }

    #[tokio::test]
    async fn release_wakes_most_urgent_waiter_first() {
        // One runway; plane 1 (priority 3) holds it when planes 2 and 3 arrive.
        let tower = ControlTower::new(1);
        let first = granted(tower.request(plane(1), prio(3)));
        let second = holding(tower.request(plane(2), prio(1)));
        let third = holding(tower.request(plane(3), prio(2)));

        assert_eq!(
            tower.snapshot().waiting,
            vec![(plane(2), prio(1)), (plane(3), prio(2))]
        );

        first.release();
        let grant = second.wait().await.unwrap();
        assert_eq!(grant.runway(), RunwayId::new(0));
        assert_eq!(tower.snapshot().waiting, vec![(plane(3), prio(2))]);
        assert_eq!(tower.snapshot().available, 0);

        grant.release();
        let grant = third.wait().await.unwrap();
        assert!(tower.snapshot().waiting.is_empty());

        grant.release();
        assert!(tower.snapshot().is_idle());
    }

    #[tokio::test]
    async fn equal_priorities_wake_in_arrival_order() {
        let tower = ControlTower::new(1);
        let holder = granted(tower.request(plane(1), prio(1)));
        let waiters: Vec<_> = (2..=5)
            .map(|id| holding(tower.request(plane(id), prio(2))))
            .collect();

        let mut remaining: Vec<PlaneId> = waiters.iter().map(|w| w.plane_id()).collect();
        let mut grant = holder;
        for waiter in waiters {
            grant.release();
            remaining.remove(0);
            let queued: Vec<PlaneId> = tower.snapshot().waiting.iter().map(|(id, _)| *id).collect();
            assert_eq!(queued, remaining);
            grant = waiter.wait().await.unwrap();
        }
        grant.release();
        assert!(tower.snapshot().is_idle());
    }

    #[tokio::test]
    async fn newcomer_cannot_jump_the_queue() {
        let tower = ControlTower::new(1);
        let holder = granted(tower.request(plane(1), prio(5)));
        let waiter = holding(tower.request(plane(2), prio(5)));

        holder.release();

        // The runway went to plane 2 even though it has not woken up yet.
        let late = holding(tower.request(plane(3), prio(1)));
        assert_eq!(tower.snapshot().available, 0);

        waiter.wait().await.unwrap().release();
        late.wait().await.unwrap().release();
        assert!(tower.snapshot().is_idle());
    }

    #[tokio::test]
    async fn abandoned_waiter_is_skipped() {
        let tower = ControlTower::new(1);
        let holder = granted(tower.request(plane(1), prio(1)));
        let gone = holding(tower.request(plane(2), prio(1)));
        let next = holding(tower.request(plane(3), prio(2)));
        drop(gone);

        holder.release();
        let grant = next.wait().await.unwrap();
        grant.release();
        assert!(tower.snapshot().is_idle());
    }

    #[tokio::test]
    async fn abandoned_waiter_with_handed_over_runway_releases_it() {
        let tower = ControlTower::new(1);
        let holder = granted(tower.request(plane(1), prio(1)));
        let waiter = holding(tower.request(plane(2), prio(1)));

        holder.release();
        drop(waiter);

        assert!(tower.snapshot().is_idle());
    }

    #[tokio::test]
    async fn dropped_grant_returns_runway() {
        let tower = ControlTower::new(1);
        {
            let _grant = granted(tower.request(plane(1), prio(1)));
        }
        assert!(tower.snapshot().is_idle());
    }

    #[tokio::test]
    async fn releasing_a_free_runway_is_ignored() {
        let tower = ControlTower::new(2);
        tower.release(RunwayId::new(1));
        tower.release(RunwayId::new(9));
        assert!(tower.snapshot().is_idle());
    }

    /// Check-then-register and release-then-wake must be atomic with respect
    /// to each other: no observer may ever see a free runway while planes are
    /// queued.
    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn no_free_runway_while_planes_are_queued() {
        const RUNWAYS: usize = 2;
        let tower = ControlTower::new(RUNWAYS);
        let stop = Arc::new(AtomicBool::new(false));

        let checker = {
            let tower = Arc::clone(&tower);
            let stop = Arc::clone(&stop);
            tokio::spawn(async move {
                let mut checks = 0u64;
                while !stop.load(Ordering::Acquire) {
                    let s = tower.snapshot();
                    assert!(s.available == 0 || s.waiting.is_empty(), "{s:?}");
                    assert!(s.busy <= RUNWAYS, "{s:?}");
                    checks += 1;
                    tokio::task::yield_now().await;
                }
                checks
            })
        };

        let planes: Vec<_> = (1..=32u32)
            .map(|id| {
                let tower = Arc::clone(&tower);
                tokio::spawn(async move {
                    for _ in 0..50 {
                        let grant = tower
                            .request(plane(id), prio(id % 5 + 1))
                            .landed()
                            .await
                            .unwrap();
                        tokio::task::yield_now().await;
                        grant.release();
                    }
                })
            })
            .collect();

        for p in planes {
            p.await.unwrap();
        }
        stop.store(true, Ordering::Release);
        assert!(checker.await.unwrap() > 0);

        let snapshot = tower.snapshot();
        assert!(snapshot.is_idle(), "{snapshot:?}");
        assert!(snapshot.peak_busy <= RUNWAYS);
    }
}

//! Simulation driver: builds the planes, launches them, and waits for all.

use std::sync::Arc;

use rand::SeedableRng;
use rand::rngs::StdRng;

use crate::config::{ConfigError, SimulationConfig};
use crate::event::{PlaneId, Priority};
use crate::plane::{FlightLog, Plane};
use crate::telemetry::Announce;
use crate::tower::{ControlTower, TowerSnapshot};

/// Outcome of a full run.
#[derive(Debug, Clone)]
pub struct SimulationReport {
    /// One entry per plane that landed, ordered by plane id.
    pub flights: Vec<FlightLog>,
    /// Planes whose task failed or panicked.
    pub failed: Vec<PlaneId>,
    /// Tower state after the last plane finished.
    pub tower: TowerSnapshot,
}

impl SimulationReport {
    pub fn all_landed(&self) -> bool {
        self.failed.is_empty()
    }
}

pub struct Simulation {
    config: SimulationConfig,
    tower: Arc<ControlTower>,
    telemetry: Arc<dyn Announce>,
}

impl Simulation {
    pub fn new(
        config: SimulationConfig,
        planes: usize,
        telemetry: Arc<dyn Announce>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        let tower = ControlTower::with_expected_planes(config.runways, planes);
        Ok(Self {
            config,
            tower,
            telemetry,
        })
    }

    /// One plane per priority, ids 1..=N in input order, with random hold
    /// times drawn from the configured range.
    pub fn manifest(&self, priorities: &[Priority]) -> Vec<Plane> {
        let mut rng = match self.config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        priorities
            .iter()
            .zip(1u32..)
            .map(|(priority, id)| {
                Plane::with_random_hold(PlaneId::new(id), *priority, &self.config.hold_ms, &mut rng)
            })
            .collect()
    }

    pub async fn run(&self, priorities: &[Priority]) -> SimulationReport {
        self.fly_all(self.manifest(priorities)).await
    }

    /// Launch every plane, most urgent first, then wait for all of them.
    ///
    /// Launch order only shapes who arrives first; once running, access to
    /// runways is decided by the tower.
    pub async fn fly_all(&self, mut planes: Vec<Plane>) -> SimulationReport {
        planes.sort_by_key(|p| p.priority());
        tracing::info!(planes = planes.len(), runways = self.config.runways, "Launching planes");

        let mut handles = Vec::with_capacity(planes.len());
        for (i, plane) in planes.into_iter().enumerate() {
            if i > 0 && !self.config.launch_stagger.is_zero() {
                tokio::time::sleep(self.config.launch_stagger).await;
            }
            let id = plane.id();
            tracing::debug!(plane = %id, priority = %plane.priority(), "Launching plane");

            let tower = Arc::clone(&self.tower);
            let telemetry = Arc::clone(&self.telemetry);
            let slice = self.config.progress_slice;
            let handle =
                tokio::spawn(async move { plane.fly(&tower, telemetry.as_ref(), slice).await });
            handles.push((id, handle));
        }
        tracing::info!("All planes launched");

        let mut flights = Vec::with_capacity(handles.len());
        let mut failed = Vec::new();
        for (id, handle) in handles {
            match handle.await {
                Ok(Ok(log)) => flights.push(log),
                Ok(Err(e)) => {
                    tracing::error!(plane = %id, error = %e, "Plane did not land");
                    failed.push(id);
                }
                Err(e) => {
                    tracing::error!(plane = %id, error = %e, "Plane task panicked");
                    failed.push(id);
                }
            }
        }
        flights.sort_by_key(|f| f.plane_id);
        failed.sort();

        let tower = self.tower.snapshot();
        if failed.is_empty() {
            tracing::info!(peak_busy = tower.peak_busy, "All planes processed successfully");
        }
        SimulationReport {
            flights,
            failed,
            tower,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::time::Duration;

    use super::*;
    use crate::event::{FlightEvent, Phase};
    use crate::telemetry::FlightRecorder;

    fn priorities(values: &[u32]) -> Vec<Priority> {
        values.iter().map(|v| Priority::new(*v).unwrap()).collect()
    }

    fn fast_config(runways: usize) -> SimulationConfig {
        SimulationConfig::default()
            .with_runways(runways)
            .with_hold_ms(100..=300)
            .with_progress_slice(Duration::from_millis(20))
            .with_launch_stagger(Duration::from_millis(5))
            .with_seed(42)
    }

    /// Replays events in recorded order and returns the most planes that
    /// were between RUNNING and COMPLETED at once.
    fn peak_running(events: &[FlightEvent]) -> usize {
        let mut running = 0usize;
        let mut peak = 0;
        for event in events {
            match event.phase {
                Phase::Running => running += 1,
                Phase::Completed => running -= 1,
                _ => {}
            }
            peak = peak.max(running);
        }
        peak
    }

    fn assert_lifecycle(events: &[FlightEvent]) {
        let phases: Vec<Phase> = events.iter().map(|e| e.phase).collect();
        assert_eq!(phases.first(), Some(&Phase::Waiting), "{phases:?}");
        assert_eq!(phases.get(1), Some(&Phase::Running), "{phases:?}");
        assert_eq!(phases.last(), Some(&Phase::Completed), "{phases:?}");
        assert!(
            phases[2..phases.len() - 1]
                .iter()
                .all(|p| *p == Phase::Progress),
            "{phases:?}"
        );

        let progress: Vec<f64> = events
            .iter()
            .filter(|e| e.phase == Phase::Progress)
            .map(|e| e.metric)
            .collect();
        assert!(progress.windows(2).all(|w| w[0] <= w[1]), "{progress:?}");
        if let Some(last) = progress.last() {
            assert_eq!(*last, 1.0);
        }

        let runway = events[1].runway;
        assert!(runway.is_some());
        assert!(events[1..].iter().all(|e| e.runway == runway));
    }

    #[tokio::test(start_paused = true)]
    async fn every_plane_runs_one_clean_lifecycle() {
        let recorder = FlightRecorder::new();
        let sim = Simulation::new(fast_config(3), 10, recorder.clone()).unwrap();

        let report = sim.run(&priorities(&[5, 3, 8, 1, 9, 2, 7, 4, 10, 6])).await;

        assert!(report.all_landed());
        assert_eq!(report.flights.len(), 10);
        for id in 1..=10 {
            assert_lifecycle(&recorder.events_for(PlaneId::new(id)));
        }

        assert!(peak_running(&recorder.events()) <= 3);
        assert!(report.tower.peak_busy <= 3);
        assert!(report.tower.is_idle());
    }

    #[tokio::test(start_paused = true)]
    async fn single_runway_queues_every_plane_after_the_first() {
        let recorder = FlightRecorder::new();
        let sim = Simulation::new(fast_config(1), 6, recorder.clone()).unwrap();

        let report = sim.run(&priorities(&[6, 2, 5, 1, 4, 3])).await;
        assert!(report.tower.is_idle());

        // Launch is most urgent first and every hold outlasts the stagger,
        // so the first plane takes the runway and all others queue behind it.
        let order: Vec<u32> = recorder
            .events()
            .iter()
            .filter(|e| e.phase == Phase::Running)
            .map(|e| e.plane_id.get())
            .collect();
        assert_eq!(order, vec![4, 2, 6, 5, 3, 1]);

        let waited: HashMap<u32, bool> = report
            .flights
            .iter()
            .map(|f| (f.plane_id.get(), f.waited()))
            .collect();
        assert!(!waited[&4]);
        assert!(waited.iter().filter(|(id, _)| **id != 4).all(|(_, w)| *w));
    }

    #[tokio::test(start_paused = true)]
    async fn seeded_manifest_is_reproducible() {
        let recorder = FlightRecorder::new();
        let sim = Simulation::new(fast_config(2), 4, recorder).unwrap();
        let prios = priorities(&[1, 2, 3, 4]);

        let a: Vec<Duration> = sim.manifest(&prios).iter().map(|p| p.hold()).collect();
        let b: Vec<Duration> = sim.manifest(&prios).iter().map(|p| p.hold()).collect();
        assert_eq!(a, b);

        let ids: Vec<u32> = sim.manifest(&prios).iter().map(|p| p.id().get()).collect();
        assert_eq!(ids, vec![1, 2, 3, 4]);
    }

    #[test]
    fn invalid_config_is_rejected() {
        let recorder = FlightRecorder::new();
        assert!(Simulation::new(SimulationConfig::default().with_runways(0), 1, recorder).is_err());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn contended_run_finishes_with_all_runways_free() {
        let recorder = FlightRecorder::new();
        let config = SimulationConfig::default()
            .with_runways(2)
            .with_hold_ms(2..=8)
            .with_progress_slice(Duration::from_millis(1))
            .with_launch_stagger(Duration::ZERO);
        let sim = Simulation::new(config, 40, recorder.clone()).unwrap();

        let prios: Vec<Priority> = (0..40).map(|i| Priority::new(i % 7 + 1).unwrap()).collect();
        let report = sim.run(&prios).await;

        assert!(report.all_landed());
        assert_eq!(report.flights.len(), 40);
        assert!(report.tower.is_idle());
        assert!(report.tower.peak_busy <= 2);
        assert!(peak_running(&recorder.events()) <= 2);
    }
}

//! End-to-end: a real TCP observer drives a session and receives telemetry.

use std::collections::BTreeMap;
use std::time::Duration;

use runway::server::{ObserverListener, serve_on};
use runway::{
    ConfigCommand, FlightEvent, Phase, Priority, RunwayId, ServerConfig, SimulationConfig, observer,
};

fn priorities(values: &[u32]) -> Vec<Priority> {
    values.iter().map(|v| Priority::new(*v).unwrap()).collect()
}

fn fast_simulation() -> SimulationConfig {
    SimulationConfig::default()
        .with_runways(1)
        .with_hold_ms(20..=40)
        .with_progress_slice(Duration::from_millis(5))
        .with_launch_stagger(Duration::from_millis(1))
        .with_seed(9)
}

fn local_server() -> ServerConfig {
    ServerConfig {
        host: "127.0.0.1".to_string(),
        port: 0,
        handshake_timeout: Duration::from_secs(5),
    }
}

fn by_plane(events: &[FlightEvent]) -> BTreeMap<u32, Vec<FlightEvent>> {
    let mut planes: BTreeMap<u32, Vec<FlightEvent>> = BTreeMap::new();
    for event in events {
        planes
            .entry(event.plane_id.get())
            .or_default()
            .push(event.clone());
    }
    planes
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn observer_config_drives_session() {
    let server = local_server();
    let listener = ObserverListener::bind(&server).await.unwrap();
    let addr = listener.local_addr().unwrap().to_string();

    // The observer asks for 2 runways, overriding the server's 1.
    let command = ConfigCommand::new(2, priorities(&[4, 1, 3, 2, 5]));
    let session = tokio::spawn(async move {
        serve_on(listener, &server, fast_simulation(), None).await
    });

    let stream = observer::connect_with_retry(&addr, 20, Duration::from_millis(20))
        .await
        .unwrap();
    let mut events = Vec::new();
    let board = observer::watch(stream, Some(&command), |e| events.push(e))
        .await
        .unwrap();

    let report = session.await.unwrap().unwrap();
    assert_eq!(board.received(), events.len());
    assert_eq!(report.telemetry.delivered, events.len());
    assert_eq!(report.telemetry.dropped, 0);
    assert!(report.simulation.all_landed());
    assert_eq!(report.simulation.tower.capacity, 2);
    assert!(report.simulation.tower.is_idle());

    let planes = by_plane(&events);
    assert_eq!(planes.keys().copied().collect::<Vec<_>>(), vec![1, 2, 3, 4, 5]);
    for (id, events) in &planes {
        let phases: Vec<Phase> = events.iter().map(|e| e.phase).collect();
        assert_eq!(phases.first(), Some(&Phase::Waiting), "plane {id}");
        assert_eq!(phases.get(1), Some(&Phase::Running), "plane {id}");
        assert_eq!(phases.last(), Some(&Phase::Completed), "plane {id}");
        assert_eq!(events[0].runway, None, "plane {id}");
        let runway = events[1].runway.expect("running plane has a runway");
        assert!(runway.index() < 2, "plane {id}");
    }

    // The board agrees with the raw stream: every plane finished on the
    // runway it started on, and each runway's stays are back to back.
    assert!(board.all_completed());
    let mut served = 0;
    for (runway, stays) in board.runways() {
        for stay in stays {
            let status = board.plane(stay.plane_id).unwrap();
            assert_eq!(status.runway, Some(runway), "plane {}", stay.plane_id);
            assert_eq!(status.progress, 1.0);
            assert!(stay.finished.is_some(), "plane {}", stay.plane_id);
        }
        for pair in stays.windows(2) {
            assert!(pair[0].finished.unwrap() <= pair[1].started);
        }
        served += stays.len();
    }
    assert_eq!(served, 5);
    assert_eq!(board.planes().count(), 5);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn preset_priorities_skip_handshake() {
    let server = local_server();
    let listener = ObserverListener::bind(&server).await.unwrap();
    let addr = listener.local_addr().unwrap().to_string();

    let session = tokio::spawn(async move {
        serve_on(listener, &server, fast_simulation(), Some(priorities(&[2, 1, 3]))).await
    });

    let stream = observer::connect_with_retry(&addr, 20, Duration::from_millis(20))
        .await
        .unwrap();
    let mut events = Vec::new();
    let board = observer::watch(stream, None, |e| events.push(e)).await.unwrap();

    let report = session.await.unwrap().unwrap();
    assert!(report.simulation.all_landed());
    assert_eq!(report.simulation.tower.capacity, 1);

    // One runway: service order follows priority once the first plane holds it.
    let order: Vec<u32> = events
        .iter()
        .filter(|e| e.phase == Phase::Running)
        .map(|e| e.plane_id.get())
        .collect();
    assert_eq!(order, vec![2, 1, 3]);

    let timeline: Vec<u32> = board
        .occupancy(RunwayId::new(0))
        .iter()
        .map(|stay| stay.plane_id.get())
        .collect();
    assert_eq!(timeline, vec![2, 1, 3]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn bad_config_fails_the_session() {
    let server = local_server();
    let listener = ObserverListener::bind(&server).await.unwrap();
    let addr = listener.local_addr().unwrap().to_string();

    let session = tokio::spawn(async move {
        serve_on(listener, &server, fast_simulation(), None).await
    });

    // Declares 3 planes but sends 2 priorities.
    let stream = observer::connect_with_retry(&addr, 20, Duration::from_millis(20))
        .await
        .unwrap();

    let (_read, mut write) = stream.into_split();
    tokio::io::AsyncWriteExt::write_all(&mut write, b"CONFIG,1,3,1,2\r\n")
        .await
        .unwrap();

    let err = session.await.unwrap().unwrap_err();
    assert!(format!("{err:#}").contains("expected 3 priorities, got 2"), "{err:#}");
}

//! Observer-facing server: accept the one observer, read its `CONFIG`,
//! run the simulation, and stream telemetry back on the same connection.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use futures::StreamExt;
use tokio::io::AsyncRead;
use tokio::net::{TcpListener, TcpStream};
use tokio_util::codec::{FramedRead, LinesCodec};
use tracing::info;

use crate::config::{ConfigCommand, ConfigError, SimulationConfig};
use crate::event::Priority;
use crate::simulation::{Simulation, SimulationReport};
use crate::telemetry::{TelemetrySink, TelemetryStats};

pub const DEFAULT_PORT: u16 = 54321;

/// Longest `CONFIG` line accepted from the observer.
const MAX_CONFIG_LINE: usize = 1024;

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// How long the observer has to send `CONFIG` after connecting.
    pub handshake_timeout: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: DEFAULT_PORT,
            handshake_timeout: Duration::from_secs(10),
        }
    }
}

/// Listener that hands out exactly one observer connection.
pub struct ObserverListener {
    listener: TcpListener,
}

impl ObserverListener {
    pub async fn bind(config: &ServerConfig) -> anyhow::Result<Self> {
        let addr: SocketAddr = format!("{}:{}", config.host, config.port)
            .parse()
            .with_context(|| format!("invalid listen address {}:{}", config.host, config.port))?;
        let listener = TcpListener::bind(addr)
            .await
            .with_context(|| format!("failed to bind {addr}"))?;
        Ok(Self { listener })
    }

    pub fn local_addr(&self) -> anyhow::Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Wait for the observer. The listener is closed afterwards, so a
    /// second observer is refused.
    pub async fn accept(self) -> anyhow::Result<TcpStream> {
        info!("Listening for observer on {}", self.local_addr()?);
        let (stream, peer) = self
            .listener
            .accept()
            .await
            .context("failed to accept observer")?;
        info!(%peer, "Observer connected");
        Ok(stream)
    }
}

/// Read and parse the observer's `CONFIG` line.
pub async fn read_config<R>(reader: R, timeout: Duration) -> Result<ConfigCommand, ConfigError>
where
    R: AsyncRead + Unpin,
{
    let mut lines = FramedRead::new(reader, LinesCodec::new_with_max_length(MAX_CONFIG_LINE));
    tracing::debug!(?timeout, "Waiting for CONFIG command");

    let line = match tokio::time::timeout(timeout, lines.next()).await {
        Err(_) => return Err(ConfigError::Timeout(timeout)),
        Ok(None) => return Err(ConfigError::Disconnected),
        Ok(Some(line)) => line?,
    };
    tracing::debug!(line = %line, "Received CONFIG command");

    let command: ConfigCommand = line.parse()?;
    info!(
        runways = command.runways,
        planes = command.planes(),
        priorities = ?command.priorities.iter().map(Priority::get).collect::<Vec<_>>(),
        "Received and stored priorities"
    );
    Ok(command)
}

/// Report of a served session.
#[derive(Debug, Clone)]
pub struct SessionReport {
    pub simulation: SimulationReport,
    pub telemetry: TelemetryStats,
}

/// Bind, accept one observer and run a full session.
pub async fn serve(
    server: ServerConfig,
    simulation: SimulationConfig,
    priorities: Option<Vec<Priority>>,
) -> anyhow::Result<SessionReport> {
    let listener = ObserverListener::bind(&server).await?;
    serve_on(listener, &server, simulation, priorities).await
}

/// Run a session on an already bound listener.
///
/// With `priorities` given the handshake is skipped and the observer only
/// receives telemetry; otherwise the observer's `CONFIG` decides the runway
/// count and the priorities.
pub async fn serve_on(
    listener: ObserverListener,
    server: &ServerConfig,
    simulation: SimulationConfig,
    priorities: Option<Vec<Priority>>,
) -> anyhow::Result<SessionReport> {
    let stream = listener.accept().await?;
    let (read_half, write_half) = stream.into_split();

    let (simulation, priorities) = match priorities {
        Some(priorities) => (simulation, priorities),
        None => {
            let command = read_config(read_half, server.handshake_timeout)
                .await
                .context("CONFIG handshake failed")?;
            (simulation.with_runways(command.runways), command.priorities)
        }
    };

    let (sink, writer) = TelemetrySink::attach(write_half);
    let report = run_simulation(simulation, &priorities, Arc::new(sink)).await?;
    let telemetry = writer.finish().await;

    info!(
        delivered = telemetry.delivered,
        dropped = telemetry.dropped,
        "Observer session finished"
    );
    Ok(SessionReport {
        simulation: report,
        telemetry,
    })
}

/// Run without any observer; telemetry is discarded.
pub async fn run_headless(
    simulation: SimulationConfig,
    priorities: &[Priority],
) -> anyhow::Result<SimulationReport> {
    run_simulation(simulation, priorities, Arc::new(TelemetrySink::detached())).await
}

async fn run_simulation(
    config: SimulationConfig,
    priorities: &[Priority],
    sink: Arc<TelemetrySink>,
) -> anyhow::Result<SimulationReport> {
    let simulation = Simulation::new(config, priorities.len(), sink)
        .context("invalid simulation configuration")?;
    Ok(simulation.run(priorities).await)
}

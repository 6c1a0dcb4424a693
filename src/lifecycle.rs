//! Startup and teardown of agent resources.
//!
//! The lifecycle layer turns an [`AgentConfig`] into a runnable [`Agent`],
//! constructing the required transport first (its failure is fatal) and the
//! optional capabilities afterwards (their failure degrades the agent).
//! Everything it builds is owned by the agent and released exactly once
//! when the run ends, so several agents can coexist in one process.

use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::agent::{Agent, RunTotals};
use crate::broadcast::{Broadcaster, PortBroadcaster};
use crate::capture::{FileFrameSource, FrameSource};
use crate::config::{AgentConfig, TransportKind};
use crate::dispatch::{
    DatastoreTransport, Dispatcher, HttpTransport, Transport, TransportError,
};
use crate::predict::{Predictor, StubPredictor};
use crate::source::{rpi, Acquirer, SensorSource};

/// A required resource could not be constructed; the process must exit
/// non-zero after cleanup.
#[derive(Debug, Error)]
pub enum StartupError {
    #[error("failed to construct transport: {0}")]
    Transport(#[from] TransportError),
}

/// Externally supplied collaborators.
///
/// Anything left `None` is built from configuration (or omitted when the
/// profile does not call for it). This is how a deployed model, a real
/// camera driver, or a test double gets wired in without the agent knowing.
#[derive(Default)]
pub struct Collaborators {
    pub transport: Option<Box<dyn Transport>>,
    pub predictor: Option<Box<dyn Predictor>>,
    pub frames: Option<Box<dyn FrameSource>>,
    pub broadcaster: Option<Box<dyn Broadcaster>>,
    pub sources: Option<Vec<Box<dyn SensorSource>>>,
}

/// Build an agent from configuration and collaborators.
///
/// Acquisition order: transport (required), predictor, broadcaster, frame
/// source, sensors. Only the transport can fail startup; every optional
/// resource that cannot be constructed is logged and skipped.
pub async fn build(config: &AgentConfig, collab: Collaborators) -> Result<Agent, StartupError> {
    let device_id = config.device_id();

    let transport: Box<dyn Transport> = match collab.transport {
        Some(transport) => transport,
        None => match config.transport.kind {
            TransportKind::Http => Box::new(HttpTransport::new(
                config.transport.http.clone(),
                config.transport.timeout,
            )?),
            TransportKind::Datastore => {
                Box::new(DatastoreTransport::connect(&config.transport.datastore).await?)
            }
        },
    };
    let dispatcher = Dispatcher::new(
        transport,
        config.transport.retry_policy(),
        config.transport.timeout,
    );

    let mut acquirer = Acquirer::new(device_id.clone());
    if config.sensors_enabled() {
        for source in collab.sources.unwrap_or_else(rpi::standard_sources) {
            acquirer.push(source);
        }
    }

    let mut agent = Agent::new(
        device_id.clone(),
        acquirer,
        dispatcher,
        config.sample_interval(),
        config.dispatch_interval(),
    )
    .with_location(config.location.clone())
    .with_categories(config.categories.clone());

    if config.profile.wants_camera() || collab.frames.is_some() {
        let predictor: Box<dyn Predictor> = match collab.predictor {
            Some(predictor) => predictor,
            // no model collaborator wired in: fall back to the stub so the
            // capture/upload pipeline still runs
            None => Box::new(StubPredictor::new(&config.categories)),
        };
        agent = agent.with_predictor(predictor);

        let frames: Box<dyn FrameSource> = match collab.frames {
            Some(frames) => frames,
            None => {
                tracing::debug!(
                    device_index = config.camera.device_index,
                    frame_path = %config.camera.frame_path,
                    "No capture collaborator wired; reading frames from disk"
                );
                Box::new(FileFrameSource::new(&config.camera.frame_path))
            }
        };
        agent = agent.with_frames(frames);
    }

    if let Some(broadcaster) = collab.broadcaster {
        agent = agent.with_broadcaster(broadcaster);
    } else if config.profile.wants_broadcast() && config.peripheral.enabled {
        // connect-or-disable: a missing peripheral is a degraded mode, not
        // a startup failure
        match PortBroadcaster::connect(&config.peripheral.port).await {
            Ok(broadcaster) => {
                tracing::info!(
                    port = %config.peripheral.port,
                    baud = config.peripheral.baud,
                    "Peripheral connected"
                );
                agent = agent.with_broadcaster(Box::new(broadcaster));
            }
            Err(e) => {
                tracing::warn!(
                    port = %config.peripheral.port,
                    error = %e,
                    "Peripheral not connected; broadcasting disabled"
                );
            }
        }
    }

    Ok(agent)
}

/// Build and run an agent to completion under the given shutdown token.
///
/// The agent releases its resources on every exit path, including a
/// cancellation that arrives before the first cycle.
pub async fn run(
    config: &AgentConfig,
    collab: Collaborators,
    shutdown: CancellationToken,
) -> Result<RunTotals, StartupError> {
    let mut agent = build(config, collab).await?;
    Ok(agent.run(shutdown).await)
}

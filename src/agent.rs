//! The agent control loop: dual-cadence scheduling with failure isolation.
//!
//! One [`Agent`] represents one physical device. It runs its acquisition
//! sources (and, when configured, capture + inference + broadcast) on a
//! short local cadence, and dispatches the latest results to the remote
//! collector on an independent, typically much longer, cadence. Every
//! subsystem failure short of a fatal startup error is recovered locally:
//! logged, counted, and the loop keeps going.

use strum_macros::Display;
use tokio::time::{sleep_until, Duration, Instant};
use tokio_util::sync::CancellationToken;

use crate::broadcast::Broadcaster;
use crate::capture::FrameSource;
use crate::dispatch::{DispatchStatus, Dispatcher};
use crate::predict::{CategoryMap, Predictor};
use crate::source::Acquirer;
use crate::types::{
    Observation, Sample, ThrottleFlag, UploadRecord, READING_FAN, READING_FREQUENCY,
    READING_TEMPERATURE, READING_THROTTLED,
};

/// Scheduler lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "lowercase")]
pub enum AgentState {
    Starting,
    Running,
    Stopping,
    Stopped,
}

/// Absolute next-fire deadlines for the two cadences.
///
/// Deadlines advance by their interval from the previous deadline, which
/// keeps the cadence drift-free; a deadline that has fallen behind the
/// clock (after a stall) re-anchors to `now + interval` instead of firing
/// a burst of catch-up ticks.
#[derive(Debug, Clone)]
pub struct CadenceState {
    sample_interval: Duration,
    dispatch_interval: Duration,
    next_sample_at: Instant,
    next_dispatch_at: Instant,
}

impl CadenceState {
    /// Both deadlines start due, so the first loop pass samples and
    /// dispatches immediately.
    pub fn new(sample_interval: Duration, dispatch_interval: Duration) -> Self {
        let now = Instant::now();
        Self {
            sample_interval,
            dispatch_interval,
            next_sample_at: now,
            next_dispatch_at: now,
        }
    }

    /// Earliest pending deadline.
    pub fn next_wake(&self) -> Instant {
        self.next_sample_at.min(self.next_dispatch_at)
    }

    pub fn sample_due(&self, now: Instant) -> bool {
        now >= self.next_sample_at
    }

    pub fn dispatch_due(&self, now: Instant) -> bool {
        now >= self.next_dispatch_at
    }

    fn advance(deadline: Instant, interval: Duration, now: Instant) -> Instant {
        let next = deadline + interval;
        if next > now {
            next
        } else {
            now + interval
        }
    }

    /// Advance the sample deadline. Called whether the cycle succeeded or
    /// not.
    pub fn sample_fired(&mut self, now: Instant) {
        self.next_sample_at = Self::advance(self.next_sample_at, self.sample_interval, now);
    }

    /// Advance the dispatch deadline. Called whether the dispatch succeeded
    /// or not; a failed dispatch waits for the next tick, it does not
    /// busy-retry.
    pub fn dispatch_fired(&mut self, now: Instant) {
        self.next_dispatch_at = Self::advance(self.next_dispatch_at, self.dispatch_interval, now);
    }

    /// Time remaining until the next dispatch, for the status line.
    pub fn until_dispatch(&self, now: Instant) -> Duration {
        self.next_dispatch_at.saturating_duration_since(now)
    }
}

/// Cumulative run accounting, reported per cycle at debug level and in full
/// at shutdown.
#[derive(Debug, Clone, Default)]
pub struct RunTotals {
    /// Local sampling cycles run.
    pub cycles: u64,
    /// Samples acquired.
    pub samples: u64,
    /// Dispatch calls made.
    pub dispatch_attempts: u64,
    /// Records accepted by the collector.
    pub dispatch_accepted: u64,
    pub sensor_read_failures: u64,
    pub model_failures: u64,
    pub capture_failures: u64,
    pub peripheral_failures: u64,
    pub connection_failures: u64,
    pub rejected_dispatches: u64,
}

impl RunTotals {
    /// Recovered failures of every kind, summed.
    pub fn failures(&self) -> u64 {
        self.sensor_read_failures
            + self.model_failures
            + self.capture_failures
            + self.peripheral_failures
            + self.connection_failures
            + self.rejected_dispatches
    }
}

/// A single edge-agent instance: one device, one set of capabilities.
///
/// All resource handles are owned here and released exactly once when the
/// run ends, in reverse acquisition order. Nothing is shared between
/// instances, so several agents can run in one process.
pub struct Agent {
    device_id: String,
    location: Option<String>,
    acquirer: Acquirer,
    frames: Option<Box<dyn FrameSource>>,
    predictor: Option<Box<dyn Predictor>>,
    categories: CategoryMap,
    broadcaster: Option<Box<dyn Broadcaster>>,
    dispatcher: Dispatcher,
    sample_interval: Duration,
    dispatch_interval: Duration,
    state: AgentState,
    totals: RunTotals,
    sequence: u64,
    latest_sample: Option<Sample>,
    latest_observation: Option<Observation>,
}

impl Agent {
    pub fn new(
        device_id: impl Into<String>,
        acquirer: Acquirer,
        dispatcher: Dispatcher,
        sample_interval: Duration,
        dispatch_interval: Duration,
    ) -> Self {
        Self {
            device_id: device_id.into(),
            location: None,
            acquirer,
            frames: None,
            predictor: None,
            categories: CategoryMap::default(),
            broadcaster: None,
            dispatcher,
            sample_interval,
            dispatch_interval,
            state: AgentState::Starting,
            totals: RunTotals::default(),
            sequence: 0,
            latest_sample: None,
            latest_observation: None,
        }
    }

    /// Attach a location label for uploads.
    pub fn with_location(mut self, location: impl Into<String>) -> Self {
        self.location = Some(location.into());
        self
    }

    /// Attach a frame source.
    pub fn with_frames(mut self, frames: Box<dyn FrameSource>) -> Self {
        self.frames = Some(frames);
        self
    }

    /// Attach a predictor.
    pub fn with_predictor(mut self, predictor: Box<dyn Predictor>) -> Self {
        self.predictor = Some(predictor);
        self
    }

    /// Replace the category table.
    pub fn with_categories(mut self, categories: CategoryMap) -> Self {
        self.categories = categories;
        self
    }

    /// Attach a broadcaster.
    pub fn with_broadcaster(mut self, broadcaster: Box<dyn Broadcaster>) -> Self {
        self.broadcaster = Some(broadcaster);
        self
    }

    pub fn state(&self) -> AgentState {
        self.state
    }

    pub fn totals(&self) -> &RunTotals {
        &self.totals
    }

    /// Drive the agent until the token is cancelled.
    ///
    /// The first pass runs immediately so the operator sees data at startup
    /// rather than after a full interval. Afterwards the loop sleeps until
    /// the earliest deadline and performs whatever is due, sample before
    /// dispatch. Cancellation is observed at the inter-cycle sleep, so
    /// shutdown begins within one sampling interval; an in-flight dispatch
    /// finishes first, bounded by the transport timeout.
    pub async fn run(&mut self, shutdown: CancellationToken) -> RunTotals {
        self.state = AgentState::Running;
        let mut cadence = CadenceState::new(self.sample_interval, self.dispatch_interval);
        tracing::info!(
            device = %self.device_id,
            transport = self.dispatcher.transport_name(),
            sample_interval = ?self.sample_interval,
            dispatch_interval = ?self.dispatch_interval,
            "Agent running"
        );

        while !shutdown.is_cancelled() {
            let now = Instant::now();
            if cadence.sample_due(now) {
                self.sample_cycle(&cadence).await;
                cadence.sample_fired(Instant::now());
            }

            let now = Instant::now();
            if cadence.dispatch_due(now) {
                self.dispatch_cycle(&shutdown).await;
                cadence.dispatch_fired(Instant::now());
            }

            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = sleep_until(cadence.next_wake()) => {}
            }
        }

        self.state = AgentState::Stopping;
        tracing::info!(device = %self.device_id, "Agent stopping");
        self.release().await;
        self.state = AgentState::Stopped;

        tracing::info!(
            device = %self.device_id,
            cycles = self.totals.cycles,
            samples = self.totals.samples,
            dispatched = self.totals.dispatch_attempts,
            accepted = self.totals.dispatch_accepted,
            failures = self.totals.failures(),
            "Agent stopped"
        );
        self.totals.clone()
    }

    /// One local cycle: acquire readings and, when configured, capture a
    /// frame, classify it and broadcast the result.
    async fn sample_cycle(&mut self, cadence: &CadenceState) {
        self.totals.cycles += 1;

        if !self.acquirer.is_empty() {
            let acq = self.acquirer.acquire().await;
            self.totals.sensor_read_failures += acq.failed_sources as u64;
            self.totals.samples += 1;
            self.log_status(&acq.sample, cadence);
            // last-value-wins: anything the previous dispatch didn't take is replaced
            self.latest_sample = Some(acq.sample);
        }

        if let Some(observation) = self.observe().await {
            self.broadcast(&observation.inference.coarse_category).await;
            self.latest_observation = Some(observation);
        }
    }

    /// Capture one frame and classify it. Any failure degrades this cycle
    /// to acquisition-only.
    async fn observe(&mut self) -> Option<Observation> {
        let grabbed = match self.frames.as_mut() {
            Some(frames) => frames.grab().await,
            None => return None,
        };

        let frame = match grabbed {
            Ok(frame) => frame,
            Err(e) => {
                self.totals.capture_failures += 1;
                tracing::warn!(
                    device = %self.device_id,
                    error = %e,
                    "Frame capture failed; skipping this cycle's image"
                );
                return None;
            }
        };

        let predictor = self.predictor.as_ref()?;
        match predictor.predict(&frame).await {
            Ok(prediction) => {
                let inference = self.categories.resolve(prediction);
                tracing::debug!(
                    device = %self.device_id,
                    category = %inference.coarse_category,
                    label = %inference.specific_label,
                    confidence = inference.confidence,
                    latency_ms = inference.latency_ms,
                    "Inference complete"
                );
                Some(Observation { frame, inference })
            }
            Err(e) => {
                self.totals.model_failures += 1;
                tracing::warn!(
                    device = %self.device_id,
                    error = %e,
                    "Inference failed; continuing without it"
                );
                None
            }
        }
    }

    /// Fire-and-forget peripheral notification.
    async fn broadcast(&mut self, label: &str) {
        let Some(broadcaster) = self.broadcaster.as_mut() else {
            return;
        };
        match broadcaster.notify(label).await {
            Ok(()) => {
                tracing::debug!(device = %self.device_id, label = %label, "Peripheral notified");
            }
            Err(e) => {
                self.totals.peripheral_failures += 1;
                tracing::warn!(device = %self.device_id, error = %e, "Peripheral notify failed");
            }
        }
    }

    /// One dispatch cycle: take the latest results into a record and send
    /// it. Failure drops the record; the next tick sends fresh data.
    async fn dispatch_cycle(&mut self, shutdown: &CancellationToken) {
        let Some(record) = self.take_record() else {
            tracing::debug!(device = %self.device_id, "Nothing to dispatch this interval");
            return;
        };

        self.totals.dispatch_attempts += 1;
        let sequence = record.sequence;
        let outcome = self.dispatcher.dispatch(&record, shutdown).await;

        match &outcome.status {
            DispatchStatus::Accepted { resource } => {
                self.totals.dispatch_accepted += 1;
                tracing::info!(
                    device = %self.device_id,
                    sequence,
                    attempts = outcome.attempts,
                    resource = resource.as_deref().unwrap_or("-"),
                    "Record accepted by collector"
                );
            }
            DispatchStatus::Rejected { status, diagnostic } => {
                self.totals.rejected_dispatches += 1;
                tracing::error!(
                    device = %self.device_id,
                    sequence,
                    status = ?status,
                    diagnostic = diagnostic.as_deref().unwrap_or("-"),
                    "Collector rejected record"
                );
            }
            DispatchStatus::ConnectionFailed { reason } => {
                self.totals.connection_failures += 1;
                tracing::error!(
                    device = %self.device_id,
                    sequence,
                    attempts = outcome.attempts,
                    error = %reason,
                    "Collector unreachable; will retry at the next interval"
                );
            }
        }
    }

    /// Consume the latest sample/observation into an upload record.
    fn take_record(&mut self) -> Option<UploadRecord> {
        let sample = self.latest_sample.take();
        let observation = self.latest_observation.take();
        if sample.is_none() && observation.is_none() {
            return None;
        }

        self.sequence += 1;
        Some(UploadRecord {
            sequence: self.sequence,
            device_id: self.device_id.clone(),
            location: self.location.clone(),
            sample,
            observation,
        })
    }

    /// Per-cycle operator status line.
    fn log_status(&self, sample: &Sample, cadence: &CadenceState) {
        let throttle_raw = sample.text_or(READING_THROTTLED, "0x0");
        let flags = ThrottleFlag::decode(&throttle_raw)
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(", ");

        tracing::debug!(
            device = %self.device_id,
            cycle = self.totals.cycles,
            temperature_c = sample.number_or(READING_TEMPERATURE, 0.0),
            fan = %sample.text_or(READING_FAN, "N/A"),
            frequency_ghz = sample.number_or(READING_FREQUENCY, 0.0),
            throttle = %flags,
            accepted = self.totals.dispatch_accepted,
            failures = self.totals.failures(),
            next_dispatch_s = cadence.until_dispatch(Instant::now()).as_secs(),
            "Local sample"
        );
    }

    /// Release held resources in reverse acquisition order. Idempotent.
    async fn release(&mut self) {
        self.frames.take();
        if let Some(mut broadcaster) = self.broadcaster.take() {
            broadcaster.close().await;
        }
        self.predictor.take();
        self.dispatcher.close().await;
    }
}

impl std::fmt::Debug for Agent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Agent")
            .field("device_id", &self.device_id)
            .field("state", &self.state)
            .field("sequence", &self.sequence)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn deadlines_advance_without_drift() {
        let mut cadence = CadenceState::new(Duration::from_secs(1), Duration::from_secs(5));
        let start = Instant::now();

        assert!(cadence.sample_due(start));
        assert!(cadence.dispatch_due(start));

        // firing exactly on time advances by one interval from the deadline
        cadence.sample_fired(start);
        assert_eq!(cadence.next_wake(), start);
        cadence.dispatch_fired(start);
        assert_eq!(cadence.next_wake(), start + Duration::from_secs(1));

        // firing slightly late still advances from the scheduled deadline
        cadence.sample_fired(start + Duration::from_millis(1300));
        assert!(cadence.sample_due(start + Duration::from_secs(2)));
    }

    #[tokio::test(start_paused = true)]
    async fn stalled_deadline_reanchors_instead_of_bursting() {
        let mut cadence = CadenceState::new(Duration::from_secs(1), Duration::from_secs(5));
        let start = Instant::now();

        // a stall of several intervals must not produce catch-up fires
        let late = start + Duration::from_secs(10);
        cadence.sample_fired(late);
        assert!(!cadence.sample_due(late));
        assert!(cadence.sample_due(late + Duration::from_secs(1)));
    }

    #[tokio::test(start_paused = true)]
    async fn until_dispatch_counts_down() {
        let mut cadence = CadenceState::new(Duration::from_secs(1), Duration::from_secs(5));
        let start = Instant::now();
        cadence.dispatch_fired(start);

        assert_eq!(cadence.until_dispatch(start), Duration::from_secs(5));
        assert_eq!(
            cadence.until_dispatch(start + Duration::from_secs(2)),
            Duration::from_secs(3)
        );
        // saturates at zero once overdue
        assert_eq!(
            cadence.until_dispatch(start + Duration::from_secs(7)),
            Duration::ZERO
        );
    }

    #[test]
    fn totals_sum_failures_across_kinds() {
        let totals = RunTotals {
            sensor_read_failures: 2,
            model_failures: 1,
            connection_failures: 3,
            ..RunTotals::default()
        };
        assert_eq!(totals.failures(), 6);
    }

    #[test]
    fn state_display_is_lowercase() {
        assert_eq!(AgentState::Running.to_string(), "running");
        assert_eq!(AgentState::Stopped.to_string(), "stopped");
    }
}

//! Sample acquisition: the acquirer and its pluggable sensor sources.
//!
//! The acquirer itself contains no device-specific logic; it iterates the
//! sources registered with it and assembles a [`Sample`]. Each source is
//! read independently, so a dead sensor degrades exactly one reading (to the
//! source's sentinel) and never the whole report.

pub mod rpi;

use async_trait::async_trait;
use thiserror::Error;

use crate::types::{Reading, Sample};

/// Errors a sensor source can report for one read.
#[derive(Debug, Error)]
pub enum SensorError {
    /// I/O failure reading a pseudo-file or spawning a utility.
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    /// The raw value did not have the expected shape.
    #[error("parse error: {0}")]
    Parse(String),

    /// A system utility exited with a non-zero status.
    #[error("utility exited with status {0}")]
    CommandStatus(i32),
}

/// One pluggable acquisition source filling a single named reading.
#[async_trait]
pub trait SensorSource: Send + Sync {
    /// Name of the reading this source fills in the sample.
    fn name(&self) -> &str;

    /// Sentinel recorded in the sample when [`read`](Self::read) fails.
    fn fallback(&self) -> Reading;

    /// Obtain one raw reading.
    async fn read(&self) -> Result<Reading, SensorError>;
}

/// Result of one acquisition cycle.
#[derive(Debug)]
pub struct Acquisition {
    pub sample: Sample,
    /// Number of sources that fell back to their sentinel this cycle.
    pub failed_sources: u32,
}

/// Pulls one [`Sample`] per cycle from its registered sources.
pub struct Acquirer {
    device_id: String,
    sources: Vec<Box<dyn SensorSource>>,
}

impl Acquirer {
    /// Create an acquirer with no sources registered.
    pub fn new(device_id: impl Into<String>) -> Self {
        Self {
            device_id: device_id.into(),
            sources: Vec::new(),
        }
    }

    /// Register a source (builder form).
    pub fn with_source(mut self, source: impl SensorSource + 'static) -> Self {
        self.sources.push(Box::new(source));
        self
    }

    /// Register an already-boxed source.
    pub fn push(&mut self, source: Box<dyn SensorSource>) {
        self.sources.push(source);
    }

    /// True when no sources are registered.
    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }

    /// Acquire one sample.
    ///
    /// Total: a failing source contributes its sentinel and a warning, the
    /// remaining readings are unaffected.
    pub async fn acquire(&self) -> Acquisition {
        let mut sample = Sample::new(self.device_id.clone());
        let mut failed_sources = 0;

        for source in &self.sources {
            let reading = match source.read().await {
                Ok(reading) => reading,
                Err(e) => {
                    failed_sources += 1;
                    tracing::warn!(
                        device = %self.device_id,
                        reading = source.name(),
                        error = %e,
                        "Sensor read failed; recording sentinel"
                    );
                    source.fallback()
                }
            };
            sample.readings.insert(source.name().to_string(), reading);
        }

        Acquisition {
            sample,
            failed_sources,
        }
    }
}

impl std::fmt::Debug for Acquirer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Acquirer")
            .field("device_id", &self.device_id)
            .field("source_count", &self.sources.len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{READING_FAN, READING_TEMPERATURE, READING_THROTTLED};

    struct FixedSource {
        name: &'static str,
        reading: Reading,
    }

    #[async_trait]
    impl SensorSource for FixedSource {
        fn name(&self) -> &str {
            self.name
        }

        fn fallback(&self) -> Reading {
            Reading::Unavailable
        }

        async fn read(&self) -> Result<Reading, SensorError> {
            Ok(self.reading.clone())
        }
    }

    struct DeadSource {
        name: &'static str,
        fallback: Reading,
    }

    #[async_trait]
    impl SensorSource for DeadSource {
        fn name(&self) -> &str {
            self.name
        }

        fn fallback(&self) -> Reading {
            self.fallback.clone()
        }

        async fn read(&self) -> Result<Reading, SensorError> {
            Err(SensorError::Parse("sensor is gone".into()))
        }
    }

    #[tokio::test]
    async fn single_failure_degrades_one_reading_only() {
        let acquirer = Acquirer::new("rpi-test")
            .with_source(FixedSource {
                name: READING_TEMPERATURE,
                reading: Reading::Number(51.2),
            })
            .with_source(DeadSource {
                name: READING_FAN,
                fallback: Reading::Text("N/A".into()),
            })
            .with_source(FixedSource {
                name: READING_THROTTLED,
                reading: Reading::Text("0x0".into()),
            });

        let acq = acquirer.acquire().await;

        assert_eq!(acq.failed_sources, 1);
        assert_eq!(acq.sample.number_or(READING_TEMPERATURE, 0.0), 51.2);
        assert_eq!(acq.sample.text_or(READING_FAN, "missing"), "N/A");
        assert_eq!(acq.sample.text_or(READING_THROTTLED, "missing"), "0x0");
    }

    #[tokio::test]
    async fn empty_acquirer_yields_empty_sample() {
        let acquirer = Acquirer::new("rpi-test");
        assert!(acquirer.is_empty());

        let acq = acquirer.acquire().await;
        assert_eq!(acq.failed_sources, 0);
        assert!(acq.sample.readings.is_empty());
        assert_eq!(acq.sample.device_id, "rpi-test");
    }
}

//! Core data types shared across the agent.
//!
//! This module defines the units that flow through one acquisition/dispatch
//! cycle:
//!
//! - [`Sample`]: one timestamped set of named sensor readings
//! - [`ThrottleFlag`]: conditions decoded from the firmware throttle bitmask
//! - [`InferenceResult`]: a classification bound to a captured frame
//! - [`UploadRecord`]: the unit handed to the dispatcher

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use serde::Serialize;
use strum_macros::{AsRefStr, Display};

/// Reading name for CPU temperature in degrees Celsius.
pub const READING_TEMPERATURE: &str = "temperature";
/// Reading name for the fan state or duty percentage.
pub const READING_FAN: &str = "fan";
/// Reading name for the CPU frequency in GHz.
pub const READING_FREQUENCY: &str = "frequency";
/// Reading name for the raw throttle bitmask (hex string).
pub const READING_THROTTLED: &str = "throttled";

/// One named reading inside a [`Sample`].
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Reading {
    /// Numeric reading (temperature, frequency).
    Number(f64),
    /// Textual reading (fan state, raw throttle mask).
    Text(String),
    /// Sentinel recorded when the reading's source failed.
    Unavailable,
}

impl Reading {
    /// Numeric value, if this reading carries one.
    pub fn as_number(&self) -> Option<f64> {
        match self {
            Self::Number(v) => Some(*v),
            _ => None,
        }
    }

    /// Textual value, if this reading carries one.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            _ => None,
        }
    }
}

/// A timestamped set of named readings from one acquisition cycle.
///
/// Immutable once produced by the acquirer. A reading whose source failed is
/// present with its source's sentinel value, never missing.
#[derive(Debug, Clone, Serialize)]
pub struct Sample {
    /// Identifier of the device that produced the readings.
    pub device_id: String,
    /// Acquisition time (UTC).
    pub ts: DateTime<Utc>,
    /// Named readings, keyed by the `READING_*` constants for the built-in
    /// sources.
    pub readings: BTreeMap<String, Reading>,
}

impl Sample {
    /// Create an empty sample stamped with the current time.
    pub fn new(device_id: impl Into<String>) -> Self {
        Self {
            device_id: device_id.into(),
            ts: Utc::now(),
            readings: BTreeMap::new(),
        }
    }

    /// Look up a reading by name.
    pub fn reading(&self, name: &str) -> Option<&Reading> {
        self.readings.get(name)
    }

    /// Numeric reading by name, or `default` when absent or non-numeric.
    pub fn number_or(&self, name: &str, default: f64) -> f64 {
        self.reading(name)
            .and_then(Reading::as_number)
            .unwrap_or(default)
    }

    /// Textual reading by name, or `default` when absent or non-textual.
    pub fn text_or(&self, name: &str, default: &str) -> String {
        self.reading(name)
            .and_then(Reading::as_text)
            .unwrap_or(default)
            .to_string()
    }
}

/// Independent conditions decoded from the firmware throttle bitmask.
///
/// The low nibble reports conditions active right now; bits 16..=19 report
/// that the corresponding condition occurred at some point since boot.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Display, AsRefStr,
)]
pub enum ThrottleFlag {
    #[strum(serialize = "Under-voltage detected")]
    UnderVoltage,
    #[strum(serialize = "Frequency capped")]
    FrequencyCapped,
    #[strum(serialize = "Currently throttled")]
    Throttled,
    #[strum(serialize = "Soft temperature limit reached")]
    SoftTempLimit,
    #[strum(serialize = "Under-voltage occurred")]
    UnderVoltageOccurred,
    #[strum(serialize = "Frequency capping occurred")]
    FrequencyCappingOccurred,
    #[strum(serialize = "Throttling occurred")]
    ThrottlingOccurred,
    #[strum(serialize = "Soft temperature limit occurred")]
    SoftTempLimitOccurred,
    /// Zero mask: no condition set.
    Normal,
    /// The raw mask could not be parsed.
    Unknown,
}

/// Bit positions reported by `vcgencmd get_throttled`.
const THROTTLE_BITS: &[(u32, ThrottleFlag)] = &[
    (0x1, ThrottleFlag::UnderVoltage),
    (0x2, ThrottleFlag::FrequencyCapped),
    (0x4, ThrottleFlag::Throttled),
    (0x8, ThrottleFlag::SoftTempLimit),
    (0x1_0000, ThrottleFlag::UnderVoltageOccurred),
    (0x2_0000, ThrottleFlag::FrequencyCappingOccurred),
    (0x4_0000, ThrottleFlag::ThrottlingOccurred),
    (0x8_0000, ThrottleFlag::SoftTempLimitOccurred),
];

impl ThrottleFlag {
    /// Decode a raw mask string (e.g. `0x50000`) into its set of flags.
    ///
    /// Total over all inputs: an unparseable mask yields exactly
    /// `{Unknown}`, a zero mask exactly `{Normal}`, and every set bit
    /// contributes its flag independently.
    pub fn decode(raw: &str) -> BTreeSet<ThrottleFlag> {
        let trimmed = raw.trim();
        let digits = trimmed
            .strip_prefix("0x")
            .or_else(|| trimmed.strip_prefix("0X"))
            .unwrap_or(trimmed);

        let Ok(mask) = u32::from_str_radix(digits, 16) else {
            return BTreeSet::from([ThrottleFlag::Unknown]);
        };

        if mask == 0 {
            return BTreeSet::from([ThrottleFlag::Normal]);
        }

        THROTTLE_BITS
            .iter()
            .filter(|(bit, _)| mask & bit != 0)
            .map(|(_, flag)| *flag)
            .collect()
    }
}

/// A captured image frame.
#[derive(Debug, Clone)]
pub struct ImageFrame {
    /// Encoded image bytes.
    pub bytes: Vec<u8>,
    /// MIME type of `bytes`.
    pub content_type: String,
    /// File name reported to the collector.
    pub file_name: String,
}

/// Classification of a captured frame.
#[derive(Debug, Clone, Serialize)]
pub struct InferenceResult {
    /// One of the deployment's coarse waste categories, or `"unknown"`.
    pub coarse_category: String,
    /// The fine-grained model label the category was derived from.
    pub specific_label: String,
    /// Confidence as a percentage in `[0, 100]`.
    pub confidence: f64,
    /// Wall-clock inference latency in milliseconds.
    pub latency_ms: f64,
}

/// A captured frame paired with its inference result.
#[derive(Debug, Clone)]
pub struct Observation {
    pub frame: ImageFrame,
    pub inference: InferenceResult,
}

/// The unit handed to the dispatcher.
///
/// Carries the latest sample and/or observation produced by the agent. The
/// `sequence` number is local and operator-facing; the remote collector
/// assigns its own identity on acceptance.
#[derive(Debug, Clone)]
pub struct UploadRecord {
    /// Monotonically increasing per-agent sequence number.
    pub sequence: u64,
    pub device_id: String,
    /// Deployment location label attached to camera uploads.
    pub location: Option<String>,
    pub sample: Option<Sample>,
    pub observation: Option<Observation>,
}

impl UploadRecord {
    /// True when there is nothing to send.
    pub fn is_empty(&self) -> bool {
        self.sample.is_none() && self.observation.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_zero_mask_is_normal() {
        assert_eq!(
            ThrottleFlag::decode("0x0"),
            BTreeSet::from([ThrottleFlag::Normal])
        );
        assert_eq!(
            ThrottleFlag::decode("0"),
            BTreeSet::from([ThrottleFlag::Normal])
        );
    }

    #[test]
    fn decode_unparseable_mask_is_unknown() {
        assert_eq!(
            ThrottleFlag::decode("not-a-mask"),
            BTreeSet::from([ThrottleFlag::Unknown])
        );
        assert_eq!(
            ThrottleFlag::decode(""),
            BTreeSet::from([ThrottleFlag::Unknown])
        );
    }

    #[test]
    fn decode_historic_under_voltage_and_throttling() {
        // 0x50000 = bits 16 and 18
        assert_eq!(
            ThrottleFlag::decode("0x50000"),
            BTreeSet::from([
                ThrottleFlag::UnderVoltageOccurred,
                ThrottleFlag::ThrottlingOccurred,
            ])
        );
    }

    #[test]
    fn decode_concurrent_bits_all_appear() {
        let flags = ThrottleFlag::decode("0xF000F");
        assert_eq!(flags.len(), 8);
        assert!(flags.contains(&ThrottleFlag::UnderVoltage));
        assert!(flags.contains(&ThrottleFlag::SoftTempLimitOccurred));
        assert!(!flags.contains(&ThrottleFlag::Normal));
    }

    #[test]
    fn decode_accepts_uppercase_prefix() {
        assert_eq!(
            ThrottleFlag::decode("0X4"),
            BTreeSet::from([ThrottleFlag::Throttled])
        );
    }

    #[test]
    fn flag_display_matches_firmware_wording() {
        assert_eq!(
            ThrottleFlag::UnderVoltageOccurred.to_string(),
            "Under-voltage occurred"
        );
        assert_eq!(ThrottleFlag::Normal.to_string(), "Normal");
    }

    #[test]
    fn sample_reading_accessors() {
        let mut sample = Sample::new("rpi-test");
        sample
            .readings
            .insert(READING_TEMPERATURE.into(), Reading::Number(48.3));
        sample
            .readings
            .insert(READING_FAN.into(), Reading::Text("2".into()));
        sample
            .readings
            .insert(READING_FREQUENCY.into(), Reading::Unavailable);

        assert_eq!(sample.number_or(READING_TEMPERATURE, 0.0), 48.3);
        assert_eq!(sample.text_or(READING_FAN, "N/A"), "2");
        // sentinel readings fall back to the caller's default
        assert_eq!(sample.number_or(READING_FREQUENCY, 0.0), 0.0);
        assert_eq!(sample.text_or(READING_THROTTLED, "0x0"), "0x0");
    }

    #[test]
    fn empty_record_detected() {
        let record = UploadRecord {
            sequence: 1,
            device_id: "rpi-test".into(),
            location: None,
            sample: None,
            observation: None,
        };
        assert!(record.is_empty());
    }
}

//! Raspberry Pi sensor-source adapters.
//!
//! Each adapter reads one metric from the firmware utility (`vcgencmd`) or a
//! sysfs pseudo-file. Raw-value parsing lives in pure functions so it can be
//! tested without hardware.

use std::path::PathBuf;

use async_trait::async_trait;
use tokio::process::Command;

use crate::source::{SensorError, SensorSource};
use crate::types::{
    Reading, READING_FAN, READING_FREQUENCY, READING_TEMPERATURE, READING_THROTTLED,
};

/// cpufreq pseudo-file reporting the current frequency in kHz.
pub const DEFAULT_CPUFREQ_PATH: &str = "/sys/devices/system/cpu/cpu0/cpufreq/scaling_cur_freq";
/// Cooling-device state file used by the stock fan driver.
pub const DEFAULT_FAN_STATE_PATH: &str = "/sys/class/thermal/cooling_device0/cur_state";
/// hwmon PWM file used as a fallback on boards without a cooling device.
pub const DEFAULT_FAN_PWM_PATH: &str = "/sys/class/hwmon/hwmon0/pwm1";

/// The four standard health sources for a Raspberry Pi deployment.
pub fn standard_sources() -> Vec<Box<dyn SensorSource>> {
    vec![
        Box::new(VcgencmdTemp),
        Box::new(FanState::new()),
        Box::new(CpuFreq::new()),
        Box::new(VcgencmdThrottled),
    ]
}

/// Run `vcgencmd <arg>` and return its trimmed stdout.
async fn vcgencmd(arg: &str) -> Result<String, SensorError> {
    let output = Command::new("vcgencmd").arg(arg).output().await?;
    if !output.status.success() {
        return Err(SensorError::CommandStatus(
            output.status.code().unwrap_or(-1),
        ));
    }
    Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
}

/// Parse `temp=48.3'C` into degrees Celsius.
fn parse_temp(raw: &str) -> Result<f64, SensorError> {
    let value = raw
        .trim()
        .strip_prefix("temp=")
        .and_then(|s| s.strip_suffix("'C"))
        .ok_or_else(|| SensorError::Parse(format!("unexpected temperature output: {raw:?}")))?;
    value
        .parse()
        .map_err(|_| SensorError::Parse(format!("non-numeric temperature: {value:?}")))
}

/// Parse `throttled=0x50000` into the raw mask string.
fn parse_throttled(raw: &str) -> Result<String, SensorError> {
    raw.trim()
        .split_once('=')
        .map(|(_, mask)| mask.to_string())
        .ok_or_else(|| SensorError::Parse(format!("unexpected throttle output: {raw:?}")))
}

/// Convert a kHz value from `scaling_cur_freq` to GHz, rounded to 2 dp.
fn khz_to_ghz(raw: &str) -> Result<f64, SensorError> {
    let khz: u64 = raw
        .trim()
        .parse()
        .map_err(|_| SensorError::Parse(format!("non-numeric frequency: {raw:?}")))?;
    Ok((khz as f64 / 1_000_000.0 * 100.0).round() / 100.0)
}

/// Convert a `pwm1` byte value (0..=255) to a duty percentage string.
fn pwm_to_percent(raw: &str) -> Result<String, SensorError> {
    let pwm: u32 = raw
        .trim()
        .parse()
        .map_err(|_| SensorError::Parse(format!("non-numeric pwm value: {raw:?}")))?;
    Ok(((pwm as f64 / 255.0 * 100.0) as u32).to_string())
}

/// CPU temperature via `vcgencmd measure_temp`.
#[derive(Debug, Default)]
pub struct VcgencmdTemp;

#[async_trait]
impl SensorSource for VcgencmdTemp {
    fn name(&self) -> &str {
        READING_TEMPERATURE
    }

    fn fallback(&self) -> Reading {
        Reading::Number(0.0)
    }

    async fn read(&self) -> Result<Reading, SensorError> {
        let out = vcgencmd("measure_temp").await?;
        Ok(Reading::Number(parse_temp(&out)?))
    }
}

/// Raw throttle bitmask via `vcgencmd get_throttled`.
#[derive(Debug, Default)]
pub struct VcgencmdThrottled;

#[async_trait]
impl SensorSource for VcgencmdThrottled {
    fn name(&self) -> &str {
        READING_THROTTLED
    }

    fn fallback(&self) -> Reading {
        Reading::Text("0x0".into())
    }

    async fn read(&self) -> Result<Reading, SensorError> {
        let out = vcgencmd("get_throttled").await?;
        Ok(Reading::Text(parse_throttled(&out)?))
    }
}

/// Current CPU frequency from the cpufreq pseudo-file, reported in GHz.
#[derive(Debug)]
pub struct CpuFreq {
    path: PathBuf,
}

impl CpuFreq {
    pub fn new() -> Self {
        Self::with_path(DEFAULT_CPUFREQ_PATH)
    }

    pub fn with_path(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl Default for CpuFreq {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SensorSource for CpuFreq {
    fn name(&self) -> &str {
        READING_FREQUENCY
    }

    fn fallback(&self) -> Reading {
        Reading::Number(0.0)
    }

    async fn read(&self) -> Result<Reading, SensorError> {
        let raw = tokio::fs::read_to_string(&self.path).await?;
        Ok(Reading::Number(khz_to_ghz(&raw)?))
    }
}

/// Fan state from the thermal cooling device, with a hwmon PWM fallback.
///
/// Boards without a registered cooling device expose the fan through hwmon
/// instead; in that case the PWM byte is reported as a duty percentage.
#[derive(Debug)]
pub struct FanState {
    state_path: PathBuf,
    pwm_path: PathBuf,
}

impl FanState {
    pub fn new() -> Self {
        Self::with_paths(DEFAULT_FAN_STATE_PATH, DEFAULT_FAN_PWM_PATH)
    }

    pub fn with_paths(state_path: impl Into<PathBuf>, pwm_path: impl Into<PathBuf>) -> Self {
        Self {
            state_path: state_path.into(),
            pwm_path: pwm_path.into(),
        }
    }
}

impl Default for FanState {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SensorSource for FanState {
    fn name(&self) -> &str {
        READING_FAN
    }

    fn fallback(&self) -> Reading {
        Reading::Text("N/A".into())
    }

    async fn read(&self) -> Result<Reading, SensorError> {
        if let Ok(raw) = tokio::fs::read_to_string(&self.state_path).await {
            return Ok(Reading::Text(raw.trim().to_string()));
        }
        let raw = tokio::fs::read_to_string(&self.pwm_path).await?;
        Ok(Reading::Text(pwm_to_percent(&raw)?))
    }
}

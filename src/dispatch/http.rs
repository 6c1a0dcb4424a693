//! HTTP collector transport.
//!
//! Talks to the waste-management backend over its upload API: camera
//! observations go to the multipart feed route, plain health samples go to
//! the structured health route. A `201 Created` response means the record
//! was accepted; the response body may carry a resource locator the
//! operator sees in the logs.

use std::time::Duration;

use reqwest::multipart::{Form, Part};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};

use crate::dispatch::{Accepted, Transport, TransportError};
use crate::types::{
    Sample, UploadRecord, READING_FAN, READING_FREQUENCY, READING_TEMPERATURE, READING_THROTTLED,
};

/// Default backend base URL.
pub const DEFAULT_BASE_URL: &str = "http://localhost:5000";
/// Default route for structured health records.
pub const DEFAULT_HEALTH_ROUTE: &str = "/api/rpi-health";
/// Default route for camera-feed uploads.
pub const DEFAULT_FEED_ROUTE: &str = "/api/camera-feed/upload";

fn default_base_url() -> String {
    DEFAULT_BASE_URL.to_string()
}

fn default_health_route() -> String {
    DEFAULT_HEALTH_ROUTE.to_string()
}

fn default_feed_route() -> String {
    DEFAULT_FEED_ROUTE.to_string()
}

/// Configuration for the HTTP collector transport.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpTransportConfig {
    /// Backend base URL (default `http://localhost:5000`).
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// Route for structured health records.
    #[serde(default = "default_health_route")]
    pub health_route: String,
    /// Route for camera-feed uploads.
    #[serde(default = "default_feed_route")]
    pub feed_route: String,
}

impl Default for HttpTransportConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            health_route: default_health_route(),
            feed_route: default_feed_route(),
        }
    }
}

impl HttpTransportConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            ..Self::default()
        }
    }

    fn route(&self, route: &str) -> String {
        format!("{}{}", self.base_url.trim_end_matches('/'), route)
    }

    /// Full URL of the health route.
    pub fn health_url(&self) -> String {
        self.route(&self.health_route)
    }

    /// Full URL of the feed route.
    pub fn feed_url(&self) -> String {
        self.route(&self.feed_route)
    }
}

/// Request/response transport to the waste-management backend.
pub struct HttpTransport {
    config: HttpTransportConfig,
    client: Client,
}

impl HttpTransport {
    /// Build the transport and its HTTP client.
    ///
    /// # Errors
    /// Returns `TransportError::Config` if the client cannot be built.
    pub fn new(config: HttpTransportConfig, timeout: Duration) -> Result<Self, TransportError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| TransportError::Config(format!("failed to build HTTP client: {e}")))?;
        Ok(Self { config, client })
    }
}

impl std::fmt::Debug for HttpTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpTransport")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

/// Structured body for a health-only record.
fn health_body(record: &UploadRecord, sample: &Sample) -> serde_json::Value {
    serde_json::json!({
        "temperature": sample.number_or(READING_TEMPERATURE, 0.0),
        "fanState": sample.text_or(READING_FAN, "N/A"),
        "cpuFrequency": sample.number_or(READING_FREQUENCY, 0.0),
        "throttleStatus": sample.text_or(READING_THROTTLED, "0x0"),
        "deviceId": &record.device_id,
        "timestamp": sample.ts.to_rfc3339(),
    })
}

/// Pull a resource locator out of a success response body, if one is there.
fn resource_from_body(body: &serde_json::Value) -> Option<String> {
    ["/data/imageUrl", "/data/url", "/data/id"]
        .iter()
        .find_map(|pointer| body.pointer(pointer))
        .and_then(|v| match v {
            serde_json::Value::String(s) => Some(s.clone()),
            serde_json::Value::Number(n) => Some(n.to_string()),
            _ => None,
        })
}

#[async_trait::async_trait]
impl Transport for HttpTransport {
    fn name(&self) -> &str {
        "http"
    }

    async fn send(&self, record: &UploadRecord) -> Result<Accepted, TransportError> {
        let request = if let Some(obs) = &record.observation {
            let mut form = Form::new()
                .text("location", record.location.clone().unwrap_or_default())
                .text(
                    "predictedCategory",
                    obs.inference.coarse_category.clone(),
                )
                .text("confidence", format!("{:.2}", obs.inference.confidence))
                .text("deviceId", record.device_id.clone());

            // a sample riding along with an observation goes into the same form
            if let Some(sample) = &record.sample {
                let readings = serde_json::to_string(&sample.readings)
                    .map_err(|e| TransportError::Config(e.to_string()))?;
                form = form.text("healthReadings", readings);
            }

            let part = Part::bytes(obs.frame.bytes.clone())
                .file_name(obs.frame.file_name.clone())
                .mime_str(&obs.frame.content_type)
                .map_err(|e| TransportError::Config(e.to_string()))?;
            form = form.part("image", part);

            self.client.post(self.config.feed_url()).multipart(form)
        } else if let Some(sample) = &record.sample {
            self.client
                .post(self.config.health_url())
                .json(&health_body(record, sample))
        } else {
            return Err(TransportError::Rejected {
                status: None,
                diagnostic: Some("empty record".into()),
            });
        };

        let response = request
            .send()
            .await
            .map_err(|e| TransportError::Connection(e.to_string()))?;

        let status = response.status();
        if status == StatusCode::CREATED {
            let resource = response
                .json::<serde_json::Value>()
                .await
                .ok()
                .as_ref()
                .and_then(resource_from_body);
            Ok(Accepted { resource })
        } else {
            let diagnostic = response.text().await.ok().filter(|t| !t.is_empty());
            Err(TransportError::Rejected {
                status: Some(status.as_u16()),
                diagnostic,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Reading;

    #[test]
    fn config_defaults_match_backend_routes() {
        let config = HttpTransportConfig::default();
        assert_eq!(config.base_url, "http://localhost:5000");
        assert_eq!(config.health_url(), "http://localhost:5000/api/rpi-health");
        assert_eq!(
            config.feed_url(),
            "http://localhost:5000/api/camera-feed/upload"
        );
    }

    #[test]
    fn route_joining_handles_trailing_slash() {
        let config = HttpTransportConfig::new("http://collector:8080/");
        assert_eq!(config.health_url(), "http://collector:8080/api/rpi-health");
    }

    #[test]
    fn health_body_uses_sentinels_for_missing_readings() {
        let sample = Sample::new("rpi-main");
        let record = UploadRecord {
            sequence: 7,
            device_id: "rpi-main".into(),
            location: None,
            sample: Some(sample.clone()),
            observation: None,
        };

        let body = health_body(&record, &sample);
        assert_eq!(body["temperature"], 0.0);
        assert_eq!(body["fanState"], "N/A");
        assert_eq!(body["cpuFrequency"], 0.0);
        assert_eq!(body["throttleStatus"], "0x0");
        assert_eq!(body["deviceId"], "rpi-main");
    }

    #[test]
    fn health_body_carries_readings() {
        let mut sample = Sample::new("rpi-main");
        sample
            .readings
            .insert(READING_TEMPERATURE.into(), Reading::Number(55.4));
        sample
            .readings
            .insert(READING_THROTTLED.into(), Reading::Text("0x50000".into()));

        let record = UploadRecord {
            sequence: 1,
            device_id: "rpi-main".into(),
            location: None,
            sample: Some(sample.clone()),
            observation: None,
        };

        let body = health_body(&record, &sample);
        assert_eq!(body["temperature"], 55.4);
        assert_eq!(body["throttleStatus"], "0x50000");
    }

    #[test]
    fn resource_locator_prefers_image_url() {
        let body = serde_json::json!({"data": {"imageUrl": "https://cdn/x.jpg", "id": 42}});
        assert_eq!(
            resource_from_body(&body),
            Some("https://cdn/x.jpg".to_string())
        );

        let body = serde_json::json!({"data": {"id": 42}});
        assert_eq!(resource_from_body(&body), Some("42".to_string()));

        let body = serde_json::json!({"ok": true});
        assert_eq!(resource_from_body(&body), None);
    }
}

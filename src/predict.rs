//! Inference: the predictor capability and category mapping.
//!
//! Model loading (architecture, weights, label map) is an external
//! collaborator concern. Agents talk to a [`Predictor`] that classifies one
//! frame; the fine-grained label it returns is then mapped through a fixed
//! [`CategoryMap`] to one of the deployment's coarse waste categories.

use std::collections::BTreeMap;

use async_trait::async_trait;
use rand::Rng;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::{ImageFrame, InferenceResult};

/// Coarse category assigned to fine labels absent from the table.
pub const UNKNOWN_CATEGORY: &str = "unknown";

/// Errors a predictor can report.
#[derive(Debug, Error)]
pub enum ModelError {
    /// The model is not loaded or not usable.
    #[error("model unavailable: {0}")]
    Unavailable(String),

    /// Inference on a frame failed.
    #[error("inference failed: {0}")]
    Inference(String),
}

/// Raw model output before category mapping.
#[derive(Debug, Clone)]
pub struct Prediction {
    /// Fine-grained model label.
    pub label: String,
    /// Confidence as a percentage in `[0, 100]`.
    pub confidence: f64,
    /// Wall-clock inference latency in milliseconds.
    pub latency_ms: f64,
}

/// One pluggable inference backend classifying a single frame per call.
///
/// Implementations must be side-effect-free with respect to agent state.
#[async_trait]
pub trait Predictor: Send + Sync {
    async fn predict(&self, frame: &ImageFrame) -> Result<Prediction, ModelError>;
}

/// Fixed many-to-one mapping from fine model labels to coarse categories.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CategoryMap {
    map: BTreeMap<String, String>,
}

impl Default for CategoryMap {
    /// The deployment's 10-class table.
    fn default() -> Self {
        let map = [
            ("biological", "biodegradable"),
            ("metal", "metal"),
            ("battery", "non-biodegradable"),
            ("cardboard", "biodegradable"),
            ("clothes", "non-biodegradable"),
            ("glass", "non-biodegradable"),
            ("paper", "biodegradable"),
            ("plastic", "plastic"),
            ("shoes", "non-biodegradable"),
            ("trash", "non-biodegradable"),
        ]
        .into_iter()
        .map(|(fine, coarse)| (fine.to_string(), coarse.to_string()))
        .collect();
        Self { map }
    }
}

impl CategoryMap {
    pub fn new(map: BTreeMap<String, String>) -> Self {
        Self { map }
    }

    /// Coarse category for a fine label.
    ///
    /// Total: labels absent from the table resolve to
    /// [`UNKNOWN_CATEGORY`], never to an error or an absence.
    pub fn coarse(&self, label: &str) -> &str {
        self.map
            .get(label)
            .map(String::as_str)
            .unwrap_or(UNKNOWN_CATEGORY)
    }

    /// Fine labels known to the table.
    pub fn fine_labels(&self) -> impl Iterator<Item = &str> {
        self.map.keys().map(String::as_str)
    }

    /// Build an [`InferenceResult`] from raw model output.
    pub fn resolve(&self, prediction: Prediction) -> InferenceResult {
        InferenceResult {
            coarse_category: self.coarse(&prediction.label).to_string(),
            specific_label: prediction.label,
            confidence: prediction.confidence.clamp(0.0, 100.0),
            latency_ms: prediction.latency_ms,
        }
    }
}

/// Stand-in predictor for deployments without a model on the device.
///
/// Picks a random fine label from the category table with a plausible
/// confidence, so the rest of the pipeline (mapping, broadcast, upload) can
/// run unchanged.
pub struct StubPredictor {
    labels: Vec<String>,
}

impl StubPredictor {
    pub fn new(categories: &CategoryMap) -> Self {
        Self {
            labels: categories.fine_labels().map(str::to_string).collect(),
        }
    }
}

impl std::fmt::Debug for StubPredictor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StubPredictor")
            .field("label_count", &self.labels.len())
            .finish()
    }
}

#[async_trait]
impl Predictor for StubPredictor {
    async fn predict(&self, _frame: &ImageFrame) -> Result<Prediction, ModelError> {
        if self.labels.is_empty() {
            return Err(ModelError::Unavailable(
                "category table has no fine labels".into(),
            ));
        }

        let mut rng = rand::thread_rng();
        let label = self.labels[rng.gen_range(0..self.labels.len())].clone();
        let confidence = rng.gen_range(75.0..98.0);

        Ok(Prediction {
            label,
            confidence,
            latency_ms: 0.0,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame() -> ImageFrame {
        ImageFrame {
            bytes: vec![0xff, 0xd8],
            content_type: "image/jpeg".into(),
            file_name: "capture_test.jpg".into(),
        }
    }

    #[test]
    fn default_table_maps_fine_to_coarse() {
        let map = CategoryMap::default();
        assert_eq!(map.coarse("biological"), "biodegradable");
        assert_eq!(map.coarse("plastic"), "plastic");
        assert_eq!(map.coarse("battery"), "non-biodegradable");
    }

    #[test]
    fn unmapped_label_resolves_to_unknown() {
        let map = CategoryMap::default();
        assert_eq!(map.coarse("styrofoam"), UNKNOWN_CATEGORY);
        assert_eq!(map.coarse(""), UNKNOWN_CATEGORY);

        let empty = CategoryMap::new(BTreeMap::new());
        assert_eq!(empty.coarse("plastic"), UNKNOWN_CATEGORY);
    }

    #[test]
    fn resolve_clamps_confidence() {
        let map = CategoryMap::default();
        let result = map.resolve(Prediction {
            label: "glass".into(),
            confidence: 130.0,
            latency_ms: 12.5,
        });
        assert_eq!(result.coarse_category, "non-biodegradable");
        assert_eq!(result.specific_label, "glass");
        assert_eq!(result.confidence, 100.0);
        assert_eq!(result.latency_ms, 12.5);
    }

    #[tokio::test]
    async fn stub_predictor_stays_within_table() {
        let map = CategoryMap::default();
        let stub = StubPredictor::new(&map);

        for _ in 0..20 {
            let prediction = stub.predict(&frame()).await.unwrap();
            assert_ne!(map.coarse(&prediction.label), UNKNOWN_CATEGORY);
            assert!((75.0..98.0).contains(&prediction.confidence));
        }
    }

    #[tokio::test]
    async fn stub_predictor_with_empty_table_is_unavailable() {
        let stub = StubPredictor::new(&CategoryMap::new(BTreeMap::new()));
        assert!(matches!(
            stub.predict(&frame()).await,
            Err(ModelError::Unavailable(_))
        ));
    }
}

//! Frame classification.
//!
//! `FrameClassifier` maps a captured frame to `(label, confidence)`:
//! resize and normalize to the model input, run the backend, turn scores into
//! probabilities, take the argmax over the catalog. The acceptance threshold
//! is not applied here; it belongs to the detection session.

mod backend;
mod backends;
mod preprocess;

use anyhow::{anyhow, Result};
use serde::Serialize;

pub use backend::ClassifierBackend;
pub use backends::{CpuBackend, ScriptedBackend, REFERENCE_COLORS};
#[cfg(feature = "backend-tract")]
pub use backends::TractBackend;
pub use preprocess::{preprocess, ChannelOrder, InputLayout, InputSpec, InputTensor};

use crate::catalog::LabelCatalog;
use crate::config::{BackendKind, ModelSettings};
use crate::error::ScanError;
use crate::frame::Frame;

/// Tolerance when deciding whether scores already sum to one.
const DISTRIBUTION_TOLERANCE: f32 = 1e-3;

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Classification {
    pub label: String,
    /// Probability of `label`, in `[0, 1]`.
    pub confidence: f32,
}

pub struct FrameClassifier {
    backend: Box<dyn ClassifierBackend>,
    catalog: LabelCatalog,
    spec: InputSpec,
}

impl FrameClassifier {
    pub fn new(backend: Box<dyn ClassifierBackend>, catalog: LabelCatalog, spec: InputSpec) -> Self {
        Self {
            backend,
            catalog,
            spec,
        }
    }

    /// Builds the configured backend for `catalog`.
    pub fn from_settings(settings: &ModelSettings, catalog: LabelCatalog) -> Result<Self> {
        let spec = settings.input_spec();
        let backend: Box<dyn ClassifierBackend> = match settings.backend {
            BackendKind::Cpu => Box::new(CpuBackend::new(catalog.len())?),
            #[cfg(feature = "backend-tract")]
            BackendKind::Tract => Box::new(TractBackend::new(&settings.path, spec)?),
            #[cfg(not(feature = "backend-tract"))]
            BackendKind::Tract => {
                return Err(anyhow!(
                    "model backend 'tract' requires the backend-tract feature"
                ))
            }
        };
        Ok(Self::new(backend, catalog, spec))
    }

    pub fn catalog(&self) -> &LabelCatalog {
        &self.catalog
    }

    pub fn backend_name(&self) -> &'static str {
        self.backend.name()
    }

    /// Runs the backend once on a blank input so the first frame is not slow.
    pub fn warm_up(&self) -> Result<()> {
        let blank = InputTensor {
            spec: self.spec,
            data: vec![0.0; self.spec.shape().iter().product()],
        };
        self.backend.warm_up(&blank)
    }

    pub fn classify(&self, frame: &Frame) -> Result<Classification> {
        let input = preprocess(frame, &self.spec).map_err(ScanError::model)?;
        let scores = self.backend.infer(&input)?;
        if scores.len() != self.catalog.len() {
            return Err(ScanError::model(format!(
                "model produced {} scores for {} labels",
                scores.len(),
                self.catalog.len()
            )));
        }
        let probabilities = to_probabilities(scores)?;
        let (index, confidence) = argmax(&probabilities)
            .ok_or_else(|| ScanError::model("model produced no scores"))?;
        let label = self
            .catalog
            .label_at(index)
            .ok_or_else(|| anyhow!("label index {} outside catalog", index))?;
        Ok(Classification {
            label: label.to_string(),
            confidence,
        })
    }
}

/// Uses the scores as-is when they already form a distribution, otherwise
/// applies softmax.
pub fn to_probabilities(scores: Vec<f32>) -> Result<Vec<f32>> {
    if scores.iter().any(|s| !s.is_finite()) {
        return Err(ScanError::model("model produced non-finite scores"));
    }
    let in_range = scores.iter().all(|s| (0.0..=1.0).contains(s));
    let sum: f32 = scores.iter().sum();
    if in_range && (sum - 1.0).abs() <= DISTRIBUTION_TOLERANCE {
        return Ok(scores);
    }
    let max = scores.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let exps: Vec<f32> = scores.iter().map(|s| (s - max).exp()).collect();
    let total: f32 = exps.iter().sum();
    Ok(exps.into_iter().map(|e| e / total).collect())
}

/// First index of the largest value.
fn argmax(values: &[f32]) -> Option<(usize, f32)> {
    values
        .iter()
        .copied()
        .enumerate()
        .fold(None, |best, (i, v)| match best {
            Some((_, b)) if b >= v => best,
            _ => Some((i, v)),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{error_kind, ScanErrorKind};
    use image::{Rgb, RgbImage};

    fn frame(rgb: [u8; 3]) -> Frame {
        Frame::new(RgbImage::from_pixel(40, 30, Rgb(rgb)), 1)
    }

    fn scripted(scores: Vec<f32>) -> FrameClassifier {
        FrameClassifier::new(
            Box::new(ScriptedBackend::new().then_scores(scores)),
            LabelCatalog::default(),
            InputSpec::default(),
        )
    }

    #[test]
    fn picks_argmax_label_and_probability() -> Result<()> {
        let classifier = scripted(vec![0.1, 0.81, 0.09]);
        let result = classifier.classify(&frame([0, 0, 0]))?;
        assert_eq!(result.label, "Mars");
        assert!((result.confidence - 0.81).abs() < 1e-6);
        Ok(())
    }

    #[test]
    fn logits_are_softmaxed() -> Result<()> {
        let probs = to_probabilities(vec![2.0, 1.0, -1.0])?;
        assert!((probs.iter().sum::<f32>() - 1.0).abs() < 1e-5);
        assert!(probs[0] > probs[1] && probs[1] > probs[2]);

        let already = to_probabilities(vec![0.2, 0.3, 0.5])?;
        assert_eq!(already, vec![0.2, 0.3, 0.5]);
        Ok(())
    }

    #[test]
    fn non_finite_scores_are_model_errors() {
        let err = to_probabilities(vec![f32::NAN, 0.5]).unwrap_err();
        assert_eq!(error_kind(&err), Some(ScanErrorKind::Model));
    }

    #[test]
    fn score_count_must_match_catalog() {
        let classifier = scripted(vec![0.5, 0.5]);
        let err = classifier.classify(&frame([0, 0, 0])).unwrap_err();
        assert_eq!(error_kind(&err), Some(ScanErrorKind::Model));
    }

    #[test]
    fn argmax_prefers_first_on_ties() {
        assert_eq!(argmax(&[0.5, 0.5]), Some((0, 0.5)));
        assert_eq!(argmax(&[]), None);
    }

    #[test]
    fn cpu_classification_is_deterministic() -> Result<()> {
        let classifier = FrameClassifier::new(
            Box::new(CpuBackend::new(3)?),
            LabelCatalog::default(),
            InputSpec::default(),
        );
        let input = frame(REFERENCE_COLORS[2]);
        let first = classifier.classify(&input)?;
        for _ in 0..5 {
            assert_eq!(classifier.classify(&input)?, first);
        }
        assert_eq!(first.label, "KitKat");
        assert!(first.confidence > 0.8);
        Ok(())
    }

    #[cfg(not(feature = "backend-tract"))]
    #[test]
    fn tract_backend_requires_feature() {
        let settings = ModelSettings {
            backend: BackendKind::Tract,
            ..ModelSettings::default()
        };
        assert!(FrameClassifier::from_settings(&settings, LabelCatalog::default()).is_err());
    }

    #[cfg(feature = "backend-tract")]
    #[test]
    fn default_backend_fails_without_model_file() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let settings = ModelSettings {
            path: dir.path().join("model.onnx"),
            ..ModelSettings::default()
        };
        assert_eq!(settings.backend, BackendKind::Tract);
        let err = FrameClassifier::from_settings(&settings, LabelCatalog::default())
            .err()
            .expect("missing model must fail");
        assert_eq!(error_kind(&err), Some(ScanErrorKind::Model));
        Ok(())
    }
}

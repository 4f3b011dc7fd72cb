use anyhow::Result;

use super::preprocess::InputTensor;

/// Inference backend behind the frame classifier.
///
/// Backends receive an already resized and normalized tensor and return one
/// raw score per catalog label, in catalog order. Scores may be logits or
/// probabilities; the classifier normalizes them.
///
/// Inference takes `&self`: a backend holds no per-call state, so the same
/// input always yields the same scores.
pub trait ClassifierBackend: Send + Sync {
    /// Backend identifier.
    fn name(&self) -> &'static str;

    /// Run inference on one preprocessed frame.
    fn infer(&self, input: &InputTensor) -> Result<Vec<f32>>;

    /// Optional warm-up hook, called once before the first run.
    fn warm_up(&self, _input: &InputTensor) -> Result<()> {
        Ok(())
    }
}

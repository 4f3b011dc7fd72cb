#![cfg(feature = "backend-tract")]

use std::path::Path;

use anyhow::{anyhow, Context, Result};
use tract_onnx::prelude::*;

use crate::classify::backend::ClassifierBackend;
use crate::classify::preprocess::{InputSpec, InputTensor};
use crate::error::ScanError;

/// Tract-based backend for ONNX classifiers.
///
/// Loads a local model once, pinned to the configured input shape. Runs are
/// `&self` and stateless.
pub struct TractBackend {
    model: TypedRunnableModel<TypedModel>,
    spec: InputSpec,
}

impl TractBackend {
    /// Load an ONNX model from disk and prepare it for inference.
    pub fn new<P: AsRef<Path>>(model_path: P, spec: InputSpec) -> Result<Self> {
        let model_path = model_path.as_ref();
        Self::load(model_path, spec).map_err(|err| {
            ScanError::model(format!(
                "failed to load model {}: {:#}",
                model_path.display(),
                err
            ))
        })
    }

    fn load(model_path: &Path, spec: InputSpec) -> Result<Self> {
        let [n, a, b, c] = spec.shape();
        let model = tract_onnx::onnx()
            .model_for_path(model_path)
            .context("failed to parse ONNX model")?
            .with_input_fact(
                0,
                InferenceFact::dt_shape(f32::datum_type(), tvec!(n, a, b, c)),
            )
            .context("failed to set input fact")?
            .into_optimized()
            .context("failed to optimize ONNX model")?
            .into_runnable()
            .context("failed to build runnable ONNX model")?;
        Ok(Self { model, spec })
    }

    fn build_input(&self, input: &InputTensor) -> Result<Tensor> {
        if input.spec.shape() != self.spec.shape() {
            return Err(anyhow!(
                "input shape {:?} does not match model input {:?}",
                input.shape(),
                self.spec.shape()
            ));
        }
        let array = tract_ndarray::Array4::from_shape_vec(input.shape(), input.data.clone())
            .context("input tensor length does not match its shape")?;
        Ok(array.into_tensor())
    }
}

impl ClassifierBackend for TractBackend {
    fn name(&self) -> &'static str {
        "tract"
    }

    fn infer(&self, input: &InputTensor) -> Result<Vec<f32>> {
        let tensor = self.build_input(input).map_err(ScanError::model)?;
        let outputs = self
            .model
            .run(tvec!(tensor.into()))
            .map_err(|err| ScanError::model(format!("ONNX inference failed: {}", err)))?;
        let output = outputs
            .first()
            .ok_or_else(|| ScanError::model("model produced no outputs"))?;
        let scores = output
            .to_array_view::<f32>()
            .map_err(|_| ScanError::model("model output tensor was not f32"))?;
        Ok(scores.iter().copied().collect())
    }

    fn warm_up(&self, input: &InputTensor) -> Result<()> {
        self.infer(input).map(|_| ())
    }
}

use anyhow::{anyhow, Result};

use crate::classify::backend::ClassifierBackend;
use crate::classify::preprocess::InputTensor;

/// Reference colors, one per catalog slot (wrapping for larger catalogs).
/// The synthetic camera paints frames with the same palette.
pub const REFERENCE_COLORS: [[u8; 3]; 6] = [
    [200, 40, 40],
    [40, 170, 60],
    [50, 80, 200],
    [220, 200, 40],
    [150, 60, 170],
    [40, 190, 200],
];

/// Logit scale applied to the negative color distance.
const SHARPNESS: f32 = 12.0;

/// CPU backend: nearest reference color by mean frame color.
///
/// Needs no model file, so demos and the stub camera can select it with
/// `SCANNER_BACKEND=cpu`. Scores are logits; the classifier turns them into
/// probabilities.
pub struct CpuBackend {
    prototypes: Vec<[f32; 3]>,
}

impl CpuBackend {
    pub fn new(class_count: usize) -> Result<Self> {
        if class_count == 0 {
            return Err(anyhow!("cpu backend needs at least one class"));
        }
        let prototypes = (0..class_count)
            .map(|i| REFERENCE_COLORS[i % REFERENCE_COLORS.len()].map(|c| c as f32 / 255.0))
            .collect();
        Ok(Self { prototypes })
    }
}

impl ClassifierBackend for CpuBackend {
    fn name(&self) -> &'static str {
        "cpu"
    }

    fn infer(&self, input: &InputTensor) -> Result<Vec<f32>> {
        let mean = input.mean_rgb();
        Ok(self
            .prototypes
            .iter()
            .map(|proto| {
                let dist = proto
                    .iter()
                    .zip(mean.iter())
                    .map(|(p, m)| (p - m) * (p - m))
                    .sum::<f32>()
                    .sqrt();
                -dist * SHARPNESS
            })
            .collect())
    }
}

use anyhow::Result;
use std::collections::VecDeque;
use std::sync::Mutex;

use crate::classify::backend::ClassifierBackend;
use crate::classify::preprocess::InputTensor;
use crate::error::ScanError;

#[derive(Clone, Debug)]
enum Step {
    Scores(Vec<f32>),
    Fail(String),
}

/// Replays a fixed script of scores, one step per inference call.
///
/// For tests and demos that need exact confidences. Once the script runs out
/// the last step repeats. Unlike real backends this one consumes its script,
/// so repeated calls are not deterministic.
#[derive(Default)]
pub struct ScriptedBackend {
    steps: Mutex<VecDeque<Step>>,
    last: Mutex<Option<Step>>,
}

impl ScriptedBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn then_scores(self, scores: Vec<f32>) -> Self {
        self.push(Step::Scores(scores))
    }

    pub fn then_fail(self, message: &str) -> Self {
        self.push(Step::Fail(message.to_string()))
    }

    fn push(self, step: Step) -> Self {
        if let Ok(mut steps) = self.steps.lock() {
            steps.push_back(step);
        }
        self
    }
}

impl ClassifierBackend for ScriptedBackend {
    fn name(&self) -> &'static str {
        "scripted"
    }

    fn infer(&self, _input: &InputTensor) -> Result<Vec<f32>> {
        let mut steps = self
            .steps
            .lock()
            .map_err(|_| ScanError::model("scripted backend lock poisoned"))?;
        let mut last = self
            .last
            .lock()
            .map_err(|_| ScanError::model("scripted backend lock poisoned"))?;
        if let Some(step) = steps.pop_front() {
            *last = Some(step);
        }
        match last.as_ref() {
            Some(Step::Scores(scores)) => Ok(scores.clone()),
            Some(Step::Fail(message)) => Err(ScanError::model(message)),
            None => Err(ScanError::model("scripted backend has no steps")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classify::preprocess::InputSpec;

    fn input() -> InputTensor {
        InputTensor {
            spec: InputSpec::default(),
            data: Vec::new(),
        }
    }

    #[test]
    fn replays_then_repeats_last_step() -> Result<()> {
        let backend = ScriptedBackend::new()
            .then_scores(vec![0.9, 0.1])
            .then_scores(vec![0.2, 0.8]);
        assert_eq!(backend.infer(&input())?, vec![0.9, 0.1]);
        assert_eq!(backend.infer(&input())?, vec![0.2, 0.8]);
        assert_eq!(backend.infer(&input())?, vec![0.2, 0.8]);
        Ok(())
    }

    #[test]
    fn empty_and_failing_scripts_error() {
        assert!(ScriptedBackend::new().infer(&input()).is_err());
        let backend = ScriptedBackend::new().then_fail("boom");
        assert!(backend.infer(&input()).is_err());
    }
}

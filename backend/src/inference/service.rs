use shared::{AnalysisResult, LesionClass};
use std::sync::Arc;
use strum::IntoEnumIterator;

use super::classifier::{Classifier, ClassifierError};
use super::preprocess::preprocess;
use crate::config::{ImageConfig, ModelOutput};

#[derive(Debug, thiserror::Error)]
pub enum AnalysisError {
    #[error("Cannot decode image: {0}")]
    Decode(#[from] image::ImageError),
    #[error("Inference failed: {0}")]
    Inference(#[from] ClassifierError),
    #[error("Unexpected model output: {0}")]
    InvalidOutput(String),
}

#[derive(Debug, Clone)]
pub struct CatalogEntry {
    pub class: LesionClass,
    pub description: String,
}

/// Index-ordered label table matching the classifier's output positions.
#[derive(Debug, Clone)]
pub struct ClassCatalog {
    entries: Vec<CatalogEntry>,
}

impl ClassCatalog {
    pub fn lesions() -> Self {
        let entries = LesionClass::iter()
            .map(|class| CatalogEntry {
                class,
                description: class.description().to_string(),
            })
            .collect();
        Self { entries }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn get(&self, index: usize) -> Option<&CatalogEntry> {
        self.entries.get(index)
    }
}

/// Index of the highest score, the lowest index winning ties.
pub fn argmax(scores: &[f32]) -> Option<usize> {
    scores
        .iter()
        .enumerate()
        .fold(None, |best: Option<(usize, f32)>, (i, &score)| match best {
            Some((_, top)) if score <= top => best,
            _ => Some((i, score)),
        })
        .map(|(i, _)| i)
}

pub fn softmax(logits: &[f32]) -> Vec<f32> {
    let max = logits.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let exps: Vec<f32> = logits.iter().map(|&x| (x - max).exp()).collect();
    let sum: f32 = exps.iter().sum();
    exps.into_iter().map(|e| e / sum).collect()
}

/// Preprocess, classify and label one stored image. Blocking; run it off the async workers.
#[derive(Clone)]
pub struct Analyzer {
    classifier: Arc<dyn Classifier>,
    catalog: ClassCatalog,
    dims: ImageConfig,
    output: ModelOutput,
}

impl Analyzer {
    pub fn new(
        classifier: Arc<dyn Classifier>,
        catalog: ClassCatalog,
        dims: ImageConfig,
        output: ModelOutput,
    ) -> Self {
        Self {
            classifier,
            catalog,
            dims,
            output,
        }
    }

    pub fn analyze(&self, image_data: &[u8]) -> Result<AnalysisResult, AnalysisError> {
        let tensor = preprocess(image_data, &self.dims)?;
        let raw = self.classifier.predict(&tensor)?;
        let scores = match self.output {
            ModelOutput::Probabilities => raw,
            ModelOutput::Logits => softmax(&raw),
        };
        self.interpret(&scores)
    }

    fn interpret(&self, scores: &[f32]) -> Result<AnalysisResult, AnalysisError> {
        if scores.len() != self.catalog.len() {
            return Err(AnalysisError::InvalidOutput(format!(
                "expected {} scores, got {}",
                self.catalog.len(),
                scores.len()
            )));
        }
        if let Some(bad) = scores.iter().find(|s| !(0.0..=1.0).contains(*s)) {
            return Err(AnalysisError::InvalidOutput(format!(
                "score {} is not a probability",
                bad
            )));
        }

        let index = argmax(scores)
            .ok_or_else(|| AnalysisError::InvalidOutput("empty score vector".to_string()))?;
        let entry = self.catalog.get(index).ok_or_else(|| {
            AnalysisError::InvalidOutput(format!("no label for class index {}", index))
        })?;

        Ok(AnalysisResult {
            classification: entry.class,
            confidence: scores[index],
            description: entry.description.clone(),
        })
    }
}

use ndarray::Array4;
use std::path::Path;
use std::sync::Arc;
use tract_onnx::prelude::*;

use crate::config::{ImageConfig, ModelConfig};

#[derive(Debug, thiserror::Error)]
pub enum ClassifierError {
    #[error("Failed to load model {0}: {1}")]
    Load(String, String),
    #[error("Unsupported model format: {0}")]
    UnsupportedFormat(String),
    #[error("Model error: {0}")]
    Backend(String),
}

/// A loaded image classifier: one NHWC `[1, height, width, 3]` batch in, one score per class out.
pub trait Classifier: Send + Sync {
    fn predict(&self, input: &Array4<f32>) -> Result<Vec<f32>, ClassifierError>;
}

type OnnxPlan = TypedRunnableModel<TypedModel>;

pub struct OnnxClassifier {
    plan: OnnxPlan,
}

impl OnnxClassifier {
    pub fn load(model_path: &Path, image: &ImageConfig) -> Result<Self, ClassifierError> {
        let load_err = |e: TractError| {
            ClassifierError::Load(model_path.display().to_string(), e.to_string())
        };
        let model = tract_onnx::onnx()
            .model_for_path(model_path)
            .map_err(load_err)?;
        Self::from_model(model, image).map_err(load_err)
    }

    /// Pins the input to a single NHWC image of the configured size and optimizes the graph.
    pub fn from_model(model: InferenceModel, image: &ImageConfig) -> TractResult<Self> {
        let plan = model
            .with_input_fact(
                0,
                f32::fact([1, image.height as usize, image.width as usize, 3]).into(),
            )?
            .into_optimized()?
            .into_runnable()?;
        Ok(Self { plan })
    }
}

impl Classifier for OnnxClassifier {
    fn predict(&self, input: &Array4<f32>) -> Result<Vec<f32>, ClassifierError> {
        let data: Vec<f32> = input.iter().copied().collect();
        let tensor = Tensor::from_shape(input.shape(), &data)
            .map_err(|e| ClassifierError::Backend(e.to_string()))?;
        let outputs = self
            .plan
            .run(tvec!(tensor.into()))
            .map_err(|e| ClassifierError::Backend(e.to_string()))?;
        let scores = outputs
            .first()
            .ok_or_else(|| ClassifierError::Backend("model produced no outputs".to_string()))?
            .to_array_view::<f32>()
            .map_err(|e| ClassifierError::Backend(e.to_string()))?
            .iter()
            .copied()
            .collect();
        Ok(scores)
    }
}

#[cfg(feature = "libtorch")]
pub use torch::TorchClassifier;

#[cfg(feature = "libtorch")]
mod torch {
    use super::{Classifier, ClassifierError};
    use ndarray::Array4;
    use std::path::Path;
    use std::sync::Mutex;
    use tch::{CModule, Device, Kind, Tensor};

    /// TorchScript module; `CModule` is not `Sync`, so calls are serialized.
    pub struct TorchClassifier {
        model: Mutex<CModule>,
        device: Device,
    }

    impl TorchClassifier {
        pub fn load(model_path: &Path) -> Result<Self, ClassifierError> {
            let device = Device::cuda_if_available();
            let model = CModule::load_on_device(model_path, device).map_err(|e| {
                ClassifierError::Load(model_path.display().to_string(), e.to_string())
            })?;
            log::info!("Loaded TorchScript model on {:?}", device);
            Ok(Self {
                model: Mutex::new(model),
                device,
            })
        }
    }

    impl Classifier for TorchClassifier {
        fn predict(&self, input: &Array4<f32>) -> Result<Vec<f32>, ClassifierError> {
            let shape: Vec<i64> = input.shape().iter().map(|&d| d as i64).collect();
            let data: Vec<f32> = input.iter().copied().collect();
            let tensor = Tensor::from_slice(&data).view(shape.as_slice()).to_device(self.device);
            let output = self
                .model
                .lock()
                .map_err(|_| ClassifierError::Backend("model lock poisoned".to_string()))?
                .forward_ts(&[tensor])
                .map_err(|e| ClassifierError::Backend(e.to_string()))?;
            let output_flat = output.to_kind(Kind::Float).to_device(Device::Cpu).view([-1]);
            Vec::<f32>::try_from(&output_flat).map_err(|e| ClassifierError::Backend(e.to_string()))
        }
    }
}

/// Picks a backend from the model file extension: `.onnx` runs on tract, `.pt` on libtorch.
pub fn load_classifier(
    model: &ModelConfig,
    image: &ImageConfig,
) -> Result<Arc<dyn Classifier>, ClassifierError> {
    let extension = model
        .path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.to_ascii_lowercase())
        .unwrap_or_default();

    match extension.as_str() {
        "onnx" => Ok(Arc::new(OnnxClassifier::load(&model.path, image)?)),
        #[cfg(feature = "libtorch")]
        "pt" => Ok(Arc::new(TorchClassifier::load(&model.path)?)),
        #[cfg(not(feature = "libtorch"))]
        "pt" => Err(ClassifierError::UnsupportedFormat(
            "TorchScript models need the `libtorch` feature".to_string(),
        )),
        other => Err(ClassifierError::UnsupportedFormat(format!(
            "{} (expected .onnx or .pt)",
            if other.is_empty() { "<none>" } else { other }
        ))),
    }
}

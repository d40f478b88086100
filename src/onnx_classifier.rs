use ndarray::ArrayView4;
use ort::{inputs, GraphOptimizationLevel, Session, SessionOutputs, ValueType};
use tracing::info;

use crate::config::{load_labels, ModelConfig};
use crate::error::RequestConstructionError;
use crate::task::{Candidate, ClassifyTask, ModelDescription};

/// Image classification model running on ONNX Runtime.
///
/// Expects one `[N, 3, H, W]` f32 input and a score per class as first output.
#[derive(Debug)]
pub struct OnnxClassifier {
    model: Session,
    input_name: String,
    output_name: String,
    labels: Vec<String>,
    config: ModelConfig,
}

impl OnnxClassifier {
    pub fn load(config: &ModelConfig) -> anyhow::Result<Self> {
        // 如果不配置内部线程池且无全局线程池，默认创建一个使用全部 CPU 核心的线程池
        let model = Session::builder()?
            .with_optimization_level(GraphOptimizationLevel::Level3)?
            .commit_from_file(&config.path)?;

        let input_name = model
            .inputs
            .first()
            .map(|input| input.name.clone())
            .ok_or_else(|| anyhow::anyhow!("Model has no input."))?;
        let output_name = model
            .outputs
            .first()
            .map(|output| output.name.clone())
            .ok_or_else(|| anyhow::anyhow!("Model has no output."))?;

        let labels = match &config.labels {
            Some(path) => load_labels(path)?,
            None => Vec::new(),
        };
        info!(
            path = %config.path.display(),
            input = %input_name,
            output = %output_name,
            labels = labels.len(),
            "Model loaded"
        );

        Ok(Self {
            model,
            input_name,
            output_name,
            labels,
            config: config.clone(),
        })
    }

    fn input_dimensions(&self) -> Option<&[i64]> {
        let input = self.model.inputs.first()?;
        match &input.input_type {
            ValueType::Tensor { dimensions, .. } => Some(dimensions.as_slice()),
            _ => None,
        }
    }

    fn post_processing(&self, outputs: SessionOutputs) -> anyhow::Result<Vec<Candidate>> {
        let mut scores: Vec<f32> = outputs[self.output_name.as_str()]
            .try_extract_tensor::<f32>()?
            .iter()
            .copied()
            .collect();
        if self.config.softmax {
            softmax(&mut scores);
        }

        Ok(scores
            .into_iter()
            .enumerate()
            .map(|(index, confidence)| {
                let label = self
                    .labels
                    .get(index)
                    .cloned()
                    .unwrap_or_else(|| index.to_string());
                Candidate { label, confidence }
            })
            .collect())
    }
}

impl ClassifyTask for OnnxClassifier {
    fn describe(&self) -> Result<ModelDescription, RequestConstructionError> {
        let dimensions = self.input_dimensions().ok_or_else(|| {
            RequestConstructionError::Backend(format!(
                "input {} is not a tensor",
                self.input_name
            ))
        })?;

        let (height, width) = match dimensions {
            [_, 3, h, w] if *h > 0 && *w > 0 => (*h as u32, *w as u32),
            // 动态尺寸由配置补全
            [_, 3, _, _] => match self.config.input_size {
                Some((w, h)) => (h, w),
                None => return Err(RequestConstructionError::InvalidInputShape(dimensions.to_vec())),
            },
            _ => return Err(RequestConstructionError::InvalidInputShape(dimensions.to_vec())),
        };

        Ok(ModelDescription {
            input_width: width,
            input_height: height,
            mean: self.config.mean,
            std: self.config.std,
        })
    }

    fn classify(&self, input: ArrayView4<'_, f32>) -> anyhow::Result<Vec<Candidate>> {
        let outputs = self
            .model
            .run(inputs![self.input_name.as_str() => input]?)?;
        self.post_processing(outputs)
    }
}

pub fn softmax(scores: &mut [f32]) {
    let max = scores.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let mut sum = 0.;
    for score in scores.iter_mut() {
        *score = (*score - max).exp();
        sum += *score;
    }
    if sum > 0. {
        scores.iter_mut().for_each(|score| *score /= sum);
    }
}

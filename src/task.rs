use ndarray::ArrayView4;

use crate::error::RequestConstructionError;

#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
    pub label: String,
    pub confidence: f32,
}

impl Candidate {
    pub fn new(label: impl Into<String>, confidence: f32) -> Self {
        Self {
            label: label.into(),
            confidence,
        }
    }
}

/// 模型期望的输入格式
#[derive(Debug, Clone, PartialEq)]
pub struct ModelDescription {
    pub input_width: u32,
    pub input_height: u32,
    pub mean: [f32; 3],
    pub std: [f32; 3],
}

impl ModelDescription {
    pub fn new(input_width: u32, input_height: u32) -> Self {
        Self {
            input_width,
            input_height,
            mean: [0.; 3],
            std: [1.; 3],
        }
    }
}

/// An opaque, already loaded classification model.
///
/// `classify` receives a `[1, 3, H, W]` tensor laid out as described by `describe`
/// and returns every class the model scored, in model order.
pub trait ClassifyTask: Send + Sync {
    fn describe(&self) -> Result<ModelDescription, RequestConstructionError>;

    fn classify(&self, input: ArrayView4<'_, f32>) -> anyhow::Result<Vec<Candidate>>;
}

use thiserror::Error;

/// 单次识别请求的失败原因，只在引擎内部消化，对外表现为 `FailedToIdentifyObject`
#[derive(Debug, Error)]
pub enum IdentifyError {
    #[error("failed to decode image: {0}")]
    Decode(#[from] image::ImageError),
    #[error("unrecognized orientation value {0}")]
    Orientation(u32),
    #[error("failed to convert image into a pixel buffer: {0}")]
    Conversion(String),
    #[error("inference failed: {0}")]
    Inference(String),
    #[error("no candidate above the confidence threshold")]
    EmptyResult,
    #[error("inference request unavailable: {0}")]
    Unavailable(RequestConstructionError),
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum RequestConstructionError {
    #[error("model input shape {0:?} is not usable for image classification")]
    InvalidInputShape(Vec<i64>),
    #[error("{0}")]
    Backend(String),
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigError {
    #[error("confidence threshold must be within [0, 1], got {0}")]
    ThresholdOutOfRange(f32),
}

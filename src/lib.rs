//! Identify the main object of an image with an on-device classification model.
//!
//! [`ClassifierEngine`] decodes the image, applies its EXIF orientation, runs the
//! model and reports the best label above the confidence threshold through
//! [`Notifications`].

pub mod config;
pub mod engine;
pub mod error;
pub mod filter;
pub mod onnx_classifier;
pub mod preprocess;
pub mod reporter;
pub mod request;
pub mod task;
pub mod utils;

pub use config::{ClassifierConfig, ModelConfig, Settings};
pub use engine::ClassifierEngine;
pub use error::{ConfigError, IdentifyError, RequestConstructionError};
pub use onnx_classifier::OnnxClassifier;
pub use reporter::{Notification, Notifications, ResultReporter};
pub use task::{Candidate, ClassifyTask, ModelDescription};

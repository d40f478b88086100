use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing::{error, info};

use object_identifier::config::{ClassifierConfig, ModelConfig, Settings};
use object_identifier::utils::{ort_init, tracing_subscriber_init};
use object_identifier::{ClassifierEngine, OnnxClassifier, ResultReporter};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    images: Vec<PathBuf>,

    /// JSON settings file; command line options take precedence.
    #[arg(long)]
    config: Option<PathBuf>,

    /// ONNX classification model.
    #[arg(long, required_unless_present = "config")]
    model: Option<PathBuf>,

    /// Label file, one label per line in model output order.
    #[arg(long)]
    labels: Option<PathBuf>,

    /// A label is reported only when its confidence is strictly above this value.
    #[arg(long, required_unless_present = "config")]
    threshold: Option<f32>,

    /// Apply softmax to the raw model output.
    #[arg(long)]
    softmax: bool,
}

impl Args {
    fn settings(&self) -> anyhow::Result<(ClassifierConfig, ModelConfig)> {
        let settings = self.config.as_deref().map(Settings::load).transpose()?;

        let model = match (&self.model, settings.as_ref()) {
            (Some(path), Some(settings)) => ModelConfig {
                path: path.clone(),
                ..settings.model.clone()
            },
            (Some(path), None) => ModelConfig::new(path),
            (None, Some(settings)) => settings.model.clone(),
            (None, None) => anyhow::bail!("No model given."),
        };
        let model = ModelConfig {
            labels: self.labels.clone().or(model.labels),
            softmax: self.softmax || model.softmax,
            ..model
        };

        let classifier = match (self.threshold, settings.as_ref()) {
            (Some(threshold), Some(settings)) => ClassifierConfig::new(threshold)?
                .with_max_pixels(settings.classifier.max_pixels()),
            (Some(threshold), None) => ClassifierConfig::new(threshold)?,
            (None, Some(settings)) => settings.classifier,
            (None, None) => anyhow::bail!("No confidence threshold given."),
        };

        Ok((classifier, model))
    }
}

/// 结果直接打印到标准输出
struct ConsoleReporter {
    current: Option<PathBuf>,
}

impl ResultReporter for ConsoleReporter {
    fn identifying(&mut self) {
        info!("Identifying...");
    }

    fn did_identify_object(&mut self, name: &str) {
        match &self.current {
            Some(path) => println!("{}: {name}", path.display()),
            None => println!("{name}"),
        }
    }

    fn failed_to_identify_object(&mut self) {
        match &self.current {
            Some(path) => println!("{}: <unidentified>", path.display()),
            None => println!("<unidentified>"),
        }
    }

    fn failed_to_initialize(&mut self, error: &str) {
        error!("Failed to initialize classifier: {error}");
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber_init();
    ort_init()?;

    let args = Args::parse();
    let (classifier_config, model_config) = args.settings()?;
    let model = OnnxClassifier::load(&model_config)?;

    let (engine, mut notifications) = ClassifierEngine::new(classifier_config, Arc::new(model));
    let mut reporter = ConsoleReporter { current: None };

    if engine.ensure_ready().is_err() {
        // 初始化失败的通知已在队列中
        for notification in notifications.drain() {
            notification.deliver(&mut reporter);
        }
        anyhow::bail!("Classifier is not usable with this model.");
    }

    // 引擎内部按提交顺序依次处理，这里逐张等待结果以便对应文件名
    for path in &args.images {
        let bytes =
            std::fs::read(path).with_context(|| format!("Failed to read {}", path.display()))?;
        reporter.current = Some(path.clone());
        engine.identify(bytes);

        while let Some(notification) = notifications.recv().await {
            notification.deliver(&mut reporter);
            if notification.is_terminal() {
                break;
            }
        }
    }

    Ok(())
}

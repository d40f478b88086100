use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::mpsc::UnboundedSender;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::config::ClassifierConfig;
use crate::error::{IdentifyError, RequestConstructionError};
use crate::filter::select_name;
use crate::preprocess::{decode, normalize};
use crate::reporter::{Notification, Notifications};
use crate::request::InferenceRequest;
use crate::task::ClassifyTask;

#[derive(Debug, Default)]
struct EngineState {
    identified: bool,
}

struct Inner {
    config: ClassifierConfig,
    request: Result<InferenceRequest, RequestConstructionError>,
    state: Mutex<EngineState>,
    // 同一引擎上的请求依次执行，通知不会交错
    in_flight: tokio::sync::Mutex<()>,
    tx: UnboundedSender<Notification>,
}

/// Runs identify requests against one model and reports their outcome.
///
/// Cloning is cheap and every clone shares the same model, state and
/// notification channel.
#[derive(Clone)]
pub struct ClassifierEngine {
    inner: Arc<Inner>,
}

impl ClassifierEngine {
    /// Builds the inference request right away. If that fails, a single
    /// [`Notification::FailedToInitialize`] is queued and every later
    /// `identify` call fails without running the model.
    pub fn new(config: ClassifierConfig, task: Arc<dyn ClassifyTask>) -> (Self, Notifications) {
        let (tx, notifications) = Notifications::channel();

        let request = InferenceRequest::new(task);
        match &request {
            Ok(request) => debug!(description = ?request.description(), "Inference request ready"),
            Err(err) => {
                error!("Failed to build inference request: {err}");
                // 接收端此时一定存在
                let _ = tx.send(Notification::FailedToInitialize {
                    error: err.to_string(),
                });
            }
        }

        let engine = Self {
            inner: Arc::new(Inner {
                config,
                request,
                state: Mutex::new(EngineState::default()),
                in_flight: tokio::sync::Mutex::new(()),
                tx,
            }),
        };
        (engine, notifications)
    }

    /// Submits image bytes for classification and returns immediately.
    ///
    /// Exactly one of `DidIdentifyObject` or `FailedToIdentifyObject` follows,
    /// preceded by `Identifying` unless the previous request succeeded. The
    /// returned handle can be dropped. Must be called within a tokio runtime.
    pub fn identify(&self, image_bytes: Vec<u8>) -> JoinHandle<()> {
        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move { inner.run(image_bytes).await })
    }

    pub fn ensure_ready(&self) -> Result<(), &RequestConstructionError> {
        self.inner.request.as_ref().map(|_| ())
    }

    pub fn is_identified(&self) -> bool {
        self.inner.state().identified
    }

    /// 清除已识别状态，下次识别重新发送 `Identifying`
    pub fn restart(&self) {
        self.inner.state().identified = false;
    }

    pub fn threshold(&self) -> f32 {
        self.inner.config.confidence_threshold()
    }
}

impl Inner {
    fn state(&self) -> std::sync::MutexGuard<'_, EngineState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn notify(&self, notification: Notification) {
        // 调用方丢弃了接收端时不再有人关心结果
        if self.tx.send(notification).is_err() {
            debug!("Notification receiver dropped");
        }
    }

    async fn run(self: Arc<Self>, image_bytes: Vec<u8>) {
        let _flight = self.in_flight.lock().await;

        match self.process(image_bytes).await {
            Ok(name) => {
                info!(name = %name, "Object identified");
                self.state().identified = true;
                self.notify(Notification::DidIdentifyObject { name });
            }
            Err(err) => {
                warn!("Failed to identify object: {err}");
                self.state().identified = false;
                self.notify(Notification::FailedToIdentifyObject);
            }
        }
    }

    async fn process(self: &Arc<Self>, image_bytes: Vec<u8>) -> Result<String, IdentifyError> {
        if let Err(err) = &self.request {
            return Err(IdentifyError::Unavailable(err.clone()));
        }

        debug!(bytes = image_bytes.len(), "Decoding image");
        let decoded = tokio::task::spawn_blocking(move || decode(&image_bytes))
            .await
            .map_err(|err| IdentifyError::Conversion(format!("decode worker failed: {err}")))??;

        if !self.state().identified {
            self.notify(Notification::Identifying);
        }

        let max_pixels = self.config.max_pixels();
        let pixels = tokio::task::spawn_blocking(move || normalize(decoded, max_pixels))
            .await
            .map_err(|err| IdentifyError::Conversion(format!("normalize worker failed: {err}")))??;
        debug!(
            width = pixels.width(),
            height = pixels.height(),
            "Image normalized"
        );

        let inner = Arc::clone(self);
        let candidates = tokio::task::spawn_blocking(move || match &inner.request {
            Ok(request) => request.perform(&pixels),
            Err(err) => Err(IdentifyError::Unavailable(err.clone())),
        })
        .await
        .map_err(|err| IdentifyError::Inference(format!("inference worker failed: {err}")))??;
        debug!(count = candidates.len(), "Inference finished");

        select_name(candidates, self.config.confidence_threshold())
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;

    use ndarray::ArrayView4;

    use super::*;
    use crate::preprocess::tests::{jpeg_with_orientation, png_bytes};
    use crate::task::{Candidate, ModelDescription};

    /// 按顺序返回预设结果的假模型，用完后重复最后一个
    struct ScriptedTask {
        description: Result<ModelDescription, RequestConstructionError>,
        outcomes: Mutex<VecDeque<Result<Vec<Candidate>, String>>>,
        calls: Mutex<usize>,
    }

    impl ScriptedTask {
        fn new(outcomes: Vec<Result<Vec<Candidate>, String>>) -> Arc<Self> {
            Arc::new(Self {
                description: Ok(ModelDescription::new(8, 8)),
                outcomes: Mutex::new(outcomes.into()),
                calls: Mutex::new(0),
            })
        }

        fn broken() -> Arc<Self> {
            Arc::new(Self {
                description: Err(RequestConstructionError::Backend(
                    "unsupported model".to_owned(),
                )),
                outcomes: Mutex::new(VecDeque::new()),
                calls: Mutex::new(0),
            })
        }

        fn calls(&self) -> usize {
            *self.calls.lock().unwrap()
        }
    }

    impl ClassifyTask for ScriptedTask {
        fn describe(&self) -> Result<ModelDescription, RequestConstructionError> {
            self.description.clone()
        }

        fn classify(&self, _input: ArrayView4<'_, f32>) -> anyhow::Result<Vec<Candidate>> {
            *self.calls.lock().unwrap() += 1;
            let mut outcomes = self.outcomes.lock().unwrap();
            let outcome = if outcomes.len() > 1 {
                outcomes.pop_front().unwrap()
            } else {
                outcomes.front().cloned().unwrap()
            };
            outcome.map_err(anyhow::Error::msg)
        }
    }

    fn cats() -> Vec<Candidate> {
        vec![
            Candidate::new("tabby cat, tabby", 0.3),
            Candidate::new("Persian cat, cat", 0.8),
            Candidate::new("backpack", 0.1),
        ]
    }

    fn engine(task: Arc<ScriptedTask>) -> (ClassifierEngine, Notifications) {
        ClassifierEngine::new(ClassifierConfig::new(0.5).unwrap(), task)
    }

    fn identified(name: &str) -> Notification {
        Notification::DidIdentifyObject {
            name: name.to_owned(),
        }
    }

    #[tokio::test]
    async fn undecodable_bytes_fail_once() {
        let task = ScriptedTask::new(vec![Ok(cats())]);
        let (engine, mut notifications) = engine(task.clone());

        engine.identify(b"not an image".to_vec()).await.unwrap();

        assert_eq!(
            notifications.drain(),
            [Notification::FailedToIdentifyObject]
        );
        assert!(!engine.is_identified());
        assert_eq!(task.calls(), 0);
    }

    #[tokio::test]
    async fn first_success_reports_progress_once() {
        let (engine, mut notifications) = engine(ScriptedTask::new(vec![Ok(cats())]));

        engine.identify(png_bytes(16, 16)).await.unwrap();
        assert_eq!(
            notifications.drain(),
            [Notification::Identifying, identified("Persian Cat")]
        );
        assert!(engine.is_identified());

        engine.identify(png_bytes(16, 16)).await.unwrap();
        assert_eq!(notifications.drain(), [identified("Persian Cat")]);
    }

    #[tokio::test]
    async fn empty_candidates_fail() {
        let (engine, mut notifications) = engine(ScriptedTask::new(vec![Ok(Vec::new())]));

        engine.identify(png_bytes(16, 16)).await.unwrap();

        assert_eq!(
            notifications.drain(),
            [Notification::Identifying, Notification::FailedToIdentifyObject]
        );
        assert!(!engine.is_identified());
    }

    #[tokio::test]
    async fn candidates_below_threshold_fail() {
        let low = vec![
            Candidate::new("cup", 0.5),
            Candidate::new("mug", 0.2),
        ];
        let (engine, mut notifications) = engine(ScriptedTask::new(vec![Ok(low)]));

        engine.identify(png_bytes(16, 16)).await.unwrap();

        assert_eq!(
            notifications.drain(),
            [Notification::Identifying, Notification::FailedToIdentifyObject]
        );
    }

    #[tokio::test]
    async fn failure_resets_identified() {
        let task = ScriptedTask::new(vec![
            Ok(cats()),
            Err("backend crashed".to_owned()),
            Ok(cats()),
        ]);
        let (engine, mut notifications) = engine(task.clone());

        engine.identify(png_bytes(16, 16)).await.unwrap();
        engine.identify(png_bytes(16, 16)).await.unwrap();
        assert!(!engine.is_identified());
        engine.identify(png_bytes(16, 16)).await.unwrap();

        assert_eq!(
            notifications.drain(),
            [
                Notification::Identifying,
                identified("Persian Cat"),
                Notification::FailedToIdentifyObject,
                Notification::Identifying,
                identified("Persian Cat"),
            ]
        );
        assert_eq!(task.calls(), 3);
    }

    #[tokio::test]
    async fn unknown_orientation_fails_before_inference() {
        let task = ScriptedTask::new(vec![Ok(cats())]);
        let (engine, mut notifications) = engine(task.clone());

        engine
            .identify(jpeg_with_orientation(16, 16, 42))
            .await
            .unwrap();

        assert_eq!(
            notifications.drain(),
            [Notification::Identifying, Notification::FailedToIdentifyObject]
        );
        assert_eq!(task.calls(), 0);
    }

    #[tokio::test]
    async fn oversized_image_fails_conversion() {
        let task = ScriptedTask::new(vec![Ok(cats())]);
        let config = ClassifierConfig::new(0.5).unwrap().with_max_pixels(100);
        let (engine, mut notifications) = ClassifierEngine::new(config, task.clone());

        engine.identify(png_bytes(16, 16)).await.unwrap();

        assert_eq!(
            notifications.drain(),
            [Notification::Identifying, Notification::FailedToIdentifyObject]
        );
        assert_eq!(task.calls(), 0);
    }

    #[tokio::test]
    async fn construction_failure_is_reported_once() {
        let task = ScriptedTask::broken();
        let (engine, mut notifications) = engine(task.clone());

        assert_eq!(
            engine.ensure_ready(),
            Err(&RequestConstructionError::Backend(
                "unsupported model".to_owned()
            ))
        );

        engine.identify(png_bytes(16, 16)).await.unwrap();
        engine.identify(png_bytes(16, 16)).await.unwrap();

        let received = notifications.drain();
        assert_eq!(
            received,
            [
                Notification::FailedToInitialize {
                    error: "unsupported model".to_owned()
                },
                Notification::FailedToIdentifyObject,
                Notification::FailedToIdentifyObject,
            ]
        );
        assert!(!received
            .iter()
            .any(|n| matches!(n, Notification::DidIdentifyObject { .. })));
        assert_eq!(task.calls(), 0);
    }

    #[tokio::test]
    async fn restart_reenables_progress() {
        let (engine, mut notifications) = engine(ScriptedTask::new(vec![Ok(cats())]));

        engine.identify(png_bytes(16, 16)).await.unwrap();
        engine.restart();
        assert!(!engine.is_identified());
        engine.identify(png_bytes(16, 16)).await.unwrap();

        assert_eq!(
            notifications.drain(),
            [
                Notification::Identifying,
                identified("Persian Cat"),
                Notification::Identifying,
                identified("Persian Cat"),
            ]
        );
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn overlapping_requests_do_not_interleave() {
        let (engine, mut notifications) = engine(ScriptedTask::new(vec![Ok(cats())]));

        let first = engine.identify(png_bytes(64, 64));
        let second = engine.identify(png_bytes(64, 64));
        first.await.unwrap();
        second.await.unwrap();

        assert_eq!(
            notifications.drain(),
            [
                Notification::Identifying,
                identified("Persian Cat"),
                identified("Persian Cat"),
            ]
        );
    }

    #[tokio::test]
    async fn notifications_close_after_engine_is_dropped() {
        let (engine, mut notifications) = engine(ScriptedTask::new(vec![Ok(cats())]));

        let handle = engine.identify(png_bytes(16, 16));
        drop(engine);
        handle.await.unwrap();

        assert_eq!(notifications.recv().await, Some(Notification::Identifying));
        assert_eq!(
            notifications.recv().await,
            Some(identified("Persian Cat"))
        );
        assert_eq!(notifications.recv().await, None);
    }
}

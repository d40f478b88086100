use tokio::sync::mpsc;

/// Receives the outcome of identify requests.
///
/// The engine never calls a reporter directly. Notifications travel through
/// [`Notifications`] and are delivered on whichever context drains it, so a
/// UI layer can own its reporter without extra locking.
pub trait ResultReporter {
    fn identifying(&mut self);

    fn did_identify_object(&mut self, name: &str);

    fn failed_to_identify_object(&mut self);

    fn failed_to_initialize(&mut self, error: &str);
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notification {
    /// 识别进行中，成功识别过一次后不再发送
    Identifying,
    DidIdentifyObject { name: String },
    FailedToIdentifyObject,
    FailedToInitialize { error: String },
}

impl Notification {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::DidIdentifyObject { .. } | Self::FailedToIdentifyObject
        )
    }

    pub fn deliver<R: ResultReporter + ?Sized>(&self, reporter: &mut R) {
        match self {
            Self::Identifying => reporter.identifying(),
            Self::DidIdentifyObject { name } => reporter.did_identify_object(name),
            Self::FailedToIdentifyObject => reporter.failed_to_identify_object(),
            Self::FailedToInitialize { error } => reporter.failed_to_initialize(error),
        }
    }
}

/// Receiving half of an engine's notification channel.
#[derive(Debug)]
pub struct Notifications {
    rx: mpsc::UnboundedReceiver<Notification>,
}

impl Notifications {
    pub(crate) fn channel() -> (mpsc::UnboundedSender<Notification>, Self) {
        let (tx, rx) = mpsc::unbounded_channel();
        (tx, Self { rx })
    }

    /// Waits for the next notification. `None` once the engine and every
    /// request it started are gone.
    pub async fn recv(&mut self) -> Option<Notification> {
        self.rx.recv().await
    }

    /// 取出当前已排队的全部通知，不等待
    pub fn drain(&mut self) -> Vec<Notification> {
        let mut pending = Vec::new();
        while let Ok(notification) = self.rx.try_recv() {
            pending.push(notification);
        }
        pending
    }

    pub async fn forward_to<R: ResultReporter + ?Sized>(mut self, reporter: &mut R) {
        while let Some(notification) = self.recv().await {
            notification.deliver(reporter);
        }
    }
}

use std::sync::Mutex;

/// Fire-and-forget notifications for fatal or ambiguous conditions (missing
/// ancestors, unhandled outcomes). Implementations must not make callers
/// block on delivery: deliver in a spawned task or drop on the floor.
#[async_trait::async_trait]
pub trait Alerter: Send + Sync {
    async fn notify(&self, message: String);
}

/// Discards alerts. The default collaborator for tests and library use.
#[derive(Debug, Default)]
pub struct NoopAlerter;

#[async_trait::async_trait]
impl Alerter for NoopAlerter {
    async fn notify(&self, message: String) {
        tracing::debug!(%message, "alert suppressed (noop alerter)");
    }
}

/// Records alerts in memory; test double.
#[derive(Debug, Default)]
pub struct RecordingAlerter {
    messages: Mutex<Vec<String>>,
}

impl RecordingAlerter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn messages(&self) -> Vec<String> {
        self.messages.lock().unwrap().clone()
    }
}

#[async_trait::async_trait]
impl Alerter for RecordingAlerter {
    async fn notify(&self, message: String) {
        self.messages.lock().unwrap().push(message);
    }
}

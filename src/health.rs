use serde::{Deserialize, Serialize};
use tokio::sync::watch;

/// Name under which the flow endpoint reports its health.
pub const HEALTH_CHECK_NAME: &str = "authorize_code_flow_rpc_api";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    Starting,
    Serving,
    Terminated,
}

/// Health of a running server. Clones observe the same status.
#[derive(Debug, Clone)]
pub struct Health {
    rx: watch::Receiver<HealthStatus>,
}

/// Write side of [`Health`], owned by the listener task.
#[derive(Debug)]
pub(crate) struct HealthReporter {
    tx: watch::Sender<HealthStatus>,
}

impl HealthReporter {
    pub fn set(&self, status: HealthStatus) {
        self.tx.send_replace(status);
    }
}

impl Drop for HealthReporter {
    fn drop(&mut self) {
        self.tx.send_replace(HealthStatus::Terminated);
    }
}

pub(crate) fn channel() -> (HealthReporter, Health) {
    let (tx, rx) = watch::channel(HealthStatus::Starting);
    (HealthReporter { tx }, Health { rx })
}

impl Health {
    pub fn name(&self) -> &'static str {
        HEALTH_CHECK_NAME
    }

    pub fn status(&self) -> HealthStatus {
        *self.rx.borrow()
    }

    pub fn is_healthy(&self) -> bool {
        self.status() == HealthStatus::Serving
    }

    /// Wait until the status becomes `status`. Returns immediately if it
    /// already is.
    pub async fn wait_for(&mut self, status: HealthStatus) -> HealthStatus {
        match self.rx.wait_for(|s| *s == status).await {
            Ok(s) => *s,
            // Reporter gone: the server has terminated.
            Err(_) => HealthStatus::Terminated,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_status_follows_reporter() {
        let (reporter, mut health) = channel();
        assert_eq!(health.name(), "authorize_code_flow_rpc_api");
        assert_eq!(health.status(), HealthStatus::Starting);
        assert!(!health.is_healthy());

        reporter.set(HealthStatus::Serving);
        assert_eq!(health.wait_for(HealthStatus::Serving).await, HealthStatus::Serving);
        assert!(health.is_healthy());

        drop(reporter);
        assert_eq!(health.status(), HealthStatus::Terminated);
        assert_eq!(
            health.wait_for(HealthStatus::Serving).await,
            HealthStatus::Terminated
        );
    }
}

use std::future::Future;

use tokio_util::sync::CancellationToken;

use crate::error::{Error, Result};

/// Which phase of the grant a unit of work belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Authorize,
    Exchange,
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Phase::Authorize => f.write_str("authorize"),
            Phase::Exchange => f.write_str("exchange"),
        }
    }
}

/// Context handed to validators and handlers for a single unit of work.
#[derive(Debug, Clone)]
pub struct FlowCtx {
    request_id: String,
    phase: Phase,
    cancel: CancellationToken,
}

impl FlowCtx {
    pub(crate) fn new(request_id: impl Into<String>, phase: Phase, cancel: CancellationToken) -> Self {
        Self {
            request_id: request_id.into(),
            phase,
            cancel,
        }
    }

    pub fn request_id(&self) -> &str {
        &self.request_id
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Resolves once the unit of work has been cancelled.
    pub async fn cancelled(&self) {
        self.cancel.cancelled().await
    }

    /// Token for sub-operations that should stop with this unit of work.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub(crate) fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Run one step of the unit of work, abandoning it if the unit is
    /// cancelled first.
    pub(crate) async fn step<T, F>(&self, fut: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(Error::Cancelled),
            result = fut => result,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_step_stops_on_cancel() {
        let ctx = FlowCtx::new("req-1", Phase::Authorize, CancellationToken::new());
        ctx.cancel();

        let result: Result<()> = ctx
            .step(async {
                std::future::pending::<()>().await;
                Ok(())
            })
            .await;
        assert!(matches!(result, Err(Error::Cancelled)));
    }

    #[tokio::test]
    async fn test_step_passes_result_through() {
        let ctx = FlowCtx::new("req-1", Phase::Exchange, CancellationToken::new());
        let value = ctx.step(async { Ok(7) }).await.unwrap();
        assert_eq!(value, 7);
        assert_eq!(ctx.phase().to_string(), "exchange");
    }
}

//! Per-call cancellation context.
//!
//! Every public loader call carries a [`Context`]; it propagates into
//! every suspension point (RPCs, lock waits, proof discharge). Purely
//! in-memory steps never consult it.

use std::future::Future;

use tokio_util::sync::CancellationToken;

use crate::error::LoadError;

#[derive(Clone, Debug, Default)]
pub struct Context {
    token: CancellationToken,
}

impl Context {
    /// A context that is never cancelled.
    pub fn background() -> Self {
        Self::default()
    }

    /// A child context: cancelled when `self` is cancelled, or on its
    /// own.
    pub fn child(&self) -> Self {
        Self {
            token: self.token.child_token(),
        }
    }

    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Race a future against cancellation. Returns
    /// `Err(LoadError::Cancelled)` if the token fires first; the future
    /// is dropped, aborting whatever it was doing.
    pub async fn run<T>(&self, fut: impl Future<Output = T>) -> Result<T, LoadError> {
        tokio::select! {
            biased;
            () = self.token.cancelled() => Err(LoadError::Cancelled),
            value = fut => Ok(value),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn run_completes_when_not_cancelled() {
        let ctx = Context::background();
        let value = ctx.run(async { 7 }).await.expect("not cancelled");
        assert_eq!(value, 7);
    }

    #[tokio::test]
    async fn run_aborts_on_cancellation() {
        let ctx = Context::background();
        ctx.cancel();

        let result = ctx.run(std::future::pending::<()>()).await;
        assert!(matches!(result, Err(LoadError::Cancelled)));
    }

    #[tokio::test]
    async fn child_inherits_cancellation() {
        let parent = Context::background();
        let child = parent.child();
        parent.cancel();
        assert!(child.is_cancelled());
    }
}

//! Cooperative cancellation.
//!
//! All public operations accept a [`CancelToken`]; implementations poll it
//! between I/O steps and between per-item iterations in batches, monitors,
//! and query scans. No suspension point is allowed to ignore it silently.

use tokio_util::sync::CancellationToken;

#[trait_variant::make(Send)]
pub trait CancelToken: Send + Sync + 'static + Clone {
    async fn cancelled(&self);

    fn is_cancelled(&self) -> bool;
}

/// The concrete [`CancelToken`] used outside of tests, backed by
/// `tokio_util::sync::CancellationToken`.
#[derive(Clone, Default)]
pub struct TokioCancelToken(CancellationToken);

impl TokioCancelToken {
    pub fn new() -> Self {
        Self(CancellationToken::new())
    }

    pub fn child(&self) -> Self {
        Self(self.0.child_token())
    }

    pub fn cancel(&self) {
        self.0.cancel();
    }
}

impl CancelToken for TokioCancelToken {
    async fn cancelled(&self) {
        self.0.cancelled().await
    }

    fn is_cancelled(&self) -> bool {
        self.0.is_cancelled()
    }
}

/// A token that never cancels, for call sites that don't need cancellation
/// (unit tests, one-shot CLI-less scripts external to this crate).
#[derive(Clone, Copy, Default)]
pub struct NeverCancel;

impl CancelToken for NeverCancel {
    async fn cancelled(&self) {
        std::future::pending::<()>().await
    }

    fn is_cancelled(&self) -> bool {
        false
    }
}

use std::future::Future;

use tokio_util::sync::CancellationToken;

/// Cancellation scope bounding the lifetime of one call's tasks.
///
/// Cloning shares the scope.
#[derive(Debug, Clone, Default)]
pub struct CancelScope {
	token: CancellationToken,
}

impl CancelScope {
	/// Creates a fresh, uncancelled scope.
	pub fn new() -> Self {
		Self::default()
	}

	/// Requests cancellation. Idempotent.
	pub fn cancel(&self) {
		self.token.cancel();
	}

	/// Returns true once cancellation was requested.
	pub fn is_cancelled(&self) -> bool {
		self.token.is_cancelled()
	}

	/// Resolves when cancellation is requested.
	pub async fn cancelled(&self) {
		self.token.cancelled().await;
	}

	/// Drives `fut` until it completes or the scope is cancelled.
	///
	/// Returns `None` when cancellation won; `fut` is dropped at that point.
	pub async fn run<F>(&self, fut: F) -> Option<F::Output>
	where
		F: Future,
	{
		tokio::select! {
			biased;
			_ = self.token.cancelled() => None,
			out = fut => Some(out),
		}
	}
}

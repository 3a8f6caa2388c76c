use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;
use strand_worker::CancelScope;

use crate::metadata::Metadata;
use crate::transport::ServerTransport;
use crate::user_info::UserInfo;

/// What a [`crate::server::ServiceProvider`] gets to build a handler for one inbound call.
#[derive(Clone)]
pub struct CallHandlerContext {
	pub path: String,
	pub transport: Arc<dyn ServerTransport>,
}

impl fmt::Debug for CallHandlerContext {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("CallHandlerContext").field("path", &self.path).finish_non_exhaustive()
	}
}

/// Per-call view handed to user handler functions.
///
/// Clones share state.
#[derive(Clone)]
pub struct ServerCallContext {
	inner: Arc<ContextInner>,
}

struct ContextInner {
	path: String,
	headers: Mutex<Metadata>,
	user_info: UserInfo,
	compression_enabled: AtomicBool,
	response_headers: Mutex<Metadata>,
	trailers: Mutex<Metadata>,
	scope: CancelScope,
}

impl ServerCallContext {
	pub(crate) fn new(path: String, compression_enabled: bool) -> Self {
		Self {
			inner: Arc::new(ContextInner {
				path,
				headers: Mutex::new(Metadata::new()),
				user_info: UserInfo::new(),
				compression_enabled: AtomicBool::new(compression_enabled),
				response_headers: Mutex::new(Metadata::new()),
				trailers: Mutex::new(Metadata::new()),
				scope: CancelScope::new(),
			}),
		}
	}

	pub fn path(&self) -> &str {
		&self.inner.path
	}

	/// Request headers sent by the client.
	pub fn headers(&self) -> Metadata {
		self.inner.headers.lock().clone()
	}

	/// Extension map shared with the call's interceptors.
	pub fn user_info(&self) -> &UserInfo {
		&self.inner.user_info
	}

	/// Whether response messages of this call may be compressed.
	pub fn compression_enabled(&self) -> bool {
		self.inner.compression_enabled.load(Ordering::Relaxed)
	}

	pub fn set_compression_enabled(&self, enabled: bool) {
		self.inner.compression_enabled.store(enabled, Ordering::Relaxed);
	}

	/// Stages a response header. Headers go out with the first response part.
	pub fn insert_response_header(&self, name: impl AsRef<str>, value: impl Into<String>) {
		self.inner.response_headers.lock().insert(name, value);
	}

	/// Stages a trailer sent with the final status.
	pub fn insert_trailer(&self, name: impl AsRef<str>, value: impl Into<String>) {
		self.inner.trailers.lock().insert(name, value);
	}

	/// True once the client cancelled, the transport failed or the call ended.
	pub fn is_cancelled(&self) -> bool {
		self.inner.scope.is_cancelled()
	}

	/// Resolves once the call is cancelled or over.
	pub async fn cancelled(&self) {
		self.inner.scope.cancelled().await;
	}

	pub(crate) fn set_headers(&self, headers: Metadata) {
		*self.inner.headers.lock() = headers;
	}

	pub(crate) fn take_response_headers(&self) -> Metadata {
		std::mem::take(&mut *self.inner.response_headers.lock())
	}

	pub(crate) fn take_trailers(&self) -> Metadata {
		std::mem::take(&mut *self.inner.trailers.lock())
	}

	pub(crate) fn scope(&self) -> &CancelScope {
		&self.inner.scope
	}
}

impl fmt::Debug for ServerCallContext {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("ServerCallContext")
			.field("path", &self.inner.path)
			.field("cancelled", &self.is_cancelled())
			.finish_non_exhaustive()
	}
}

use std::time::Duration;

use crate::metadata::Metadata;

/// Header carrying [`CallOptions::request_id`].
pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// Per-call client configuration.
#[derive(Debug, Clone, Default)]
pub struct CallOptions {
	/// Custom metadata sent as the call's request headers.
	pub metadata: Metadata,
	/// Fail the call with `DeadlineExceeded` if no status arrives in time.
	pub timeout: Option<Duration>,
	/// Default compression for request messages.
	pub compress_messages: bool,
	/// Optional correlation id, sent as `x-request-id`.
	pub request_id: Option<String>,
}

impl CallOptions {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn with_metadata(mut self, name: impl AsRef<str>, value: impl Into<String>) -> Self {
		self.metadata.insert(name, value);
		self
	}

	pub fn with_timeout(mut self, timeout: Duration) -> Self {
		self.timeout = Some(timeout);
		self
	}

	pub fn with_compression(mut self, enabled: bool) -> Self {
		self.compress_messages = enabled;
		self
	}

	pub fn with_request_id(mut self, id: impl Into<String>) -> Self {
		self.request_id = Some(id.into());
		self
	}

	/// Headers sent at the start of the call.
	pub(crate) fn request_headers(&self) -> Metadata {
		let mut headers = self.metadata.clone();
		if let Some(id) = &self.request_id {
			headers.insert(REQUEST_ID_HEADER, id.clone());
		}
		headers
	}
}

/// Server-wide handler configuration.
#[derive(Debug, Clone, Default)]
pub struct ServerConfig {
	/// Whether handlers may compress response messages. Off by default.
	pub compression_enabled: bool,
}

impl ServerConfig {
	pub fn with_compression(mut self, enabled: bool) -> Self {
		self.compression_enabled = enabled;
		self
	}
}

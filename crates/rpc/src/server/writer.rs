use std::fmt;
use std::sync::Arc;

use crate::error::Result;
use crate::metadata::{Compression, MessageMetadata};
use crate::part::ResponsePart;
use crate::transport::Acceptance;

/// Response side of a server call as seen by the writer.
pub(crate) trait ResponseOutput<Resp>: Send + Sync + 'static {
	/// Runs a part through the chain toward the transport.
	///
	/// Fails with `StreamAlreadyClosed` once the call ended.
	fn emit(&self, part: ResponsePart<Resp>) -> Result<Vec<Acceptance>>;

	/// Whether both the server and the call allow compressed responses.
	fn compression_allowed(&self) -> bool;
}

/// Sends response messages of a streaming-response handler.
///
/// Each send emits one `Message` immediately. The call's `End` is emitted by
/// the dispatcher when the handler returns.
pub struct ResponseStreamWriter<Resp> {
	output: Arc<dyn ResponseOutput<Resp>>,
}

impl<Resp> Clone for ResponseStreamWriter<Resp> {
	fn clone(&self) -> Self {
		Self {
			output: Arc::clone(&self.output),
		}
	}
}

impl<Resp> fmt::Debug for ResponseStreamWriter<Resp> {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("ResponseStreamWriter").finish_non_exhaustive()
	}
}

impl<Resp: Send + 'static> ResponseStreamWriter<Resp> {
	pub(crate) fn new(output: Arc<dyn ResponseOutput<Resp>>) -> Self {
		Self { output }
	}

	/// Sends one response message and waits until the transport accepted it.
	pub async fn send_response(&self, response: Resp) -> Result<()> {
		self.send_response_with(response, Compression::DeferToCallDefault).await
	}

	/// Like [`send_response`](Self::send_response) with a compression override.
	///
	/// The override only takes effect when compression is enabled on the
	/// server and for this call.
	pub async fn send_response_with(&self, response: Resp, compression: Compression) -> Result<()> {
		let allowed = self.output.compression_allowed();
		let metadata = MessageMetadata::compressed(allowed && compression.is_enabled(allowed));
		let acceptances = self.output.emit(ResponsePart::Message(response, metadata))?;
		for acceptance in acceptances {
			acceptance.await?;
		}
		Ok(())
	}
}

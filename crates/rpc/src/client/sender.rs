use std::fmt;
use std::sync::Arc;

use futures::future::BoxFuture;
use futures::{Stream, StreamExt};
use strand_worker::TaskClass;

use super::call::RequestChannel;
use crate::error::Result;
use crate::metadata::{Compression, MessageMetadata};
use crate::part::RequestPart;

/// Cloneable handle to the request side of a streaming call.
///
/// Lets another task feed requests while the owner of the call drains
/// responses. Sends from all clones are serialized in call order.
pub struct RequestSender<Req> {
	channel: Arc<dyn RequestChannel<Req>>,
}

impl<Req> Clone for RequestSender<Req> {
	fn clone(&self) -> Self {
		Self {
			channel: Arc::clone(&self.channel),
		}
	}
}

impl<Req> fmt::Debug for RequestSender<Req> {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("RequestSender").finish_non_exhaustive()
	}
}

impl<Req: Send + 'static> RequestSender<Req> {
	pub(crate) fn new(channel: Arc<dyn RequestChannel<Req>>) -> Self {
		Self { channel }
	}

	/// Sends one request message using the call's compression default.
	pub async fn send_message(&self, message: Req) -> Result<()> {
		self.send_message_with(message, Compression::DeferToCallDefault).await
	}

	/// Sends one request message with a per-message compression override.
	pub async fn send_message_with(&self, message: Req, compression: Compression) -> Result<()> {
		let metadata = MessageMetadata::compressed(compression.is_enabled(self.channel.compress_by_default()));
		self.channel.send_parts(vec![RequestPart::Message(message, metadata)]).await
	}

	/// Sends a batch of messages back to back.
	pub fn send_messages<I>(&self, messages: I) -> BoxFuture<'_, Result<()>>
	where
		I: IntoIterator<Item = Req>,
	{
		let metadata = MessageMetadata::compressed(self.channel.compress_by_default());
		let parts = messages.into_iter().map(|message| RequestPart::Message(message, metadata)).collect();
		self.channel.send_parts(parts)
	}

	/// Closes the request stream. Any later send fails with `StreamAlreadyClosed`.
	pub async fn send_end(&self) -> Result<()> {
		self.channel.send_parts(vec![RequestPart::End]).await
	}

	/// Cancels the whole call.
	pub async fn cancel(&self) {
		self.channel.cancel().await;
	}
}

/// Forwards every item of `requests` into the call, then closes the request stream.
///
/// If this future is dropped before it completes, or the source or a send
/// fails, the call is cancelled by a detached cleanup task.
pub async fn forward_requests<Req, S>(sender: RequestSender<Req>, requests: S) -> Result<()>
where
	Req: Send + 'static,
	S: Stream<Item = Result<Req>>,
{
	let guard = CancelOnDrop {
		sender: Some(sender.clone()),
	};
	let mut requests = std::pin::pin!(requests);
	while let Some(request) = requests.next().await {
		sender.send_message(request?).await?;
	}
	sender.send_end().await?;
	guard.disarm();
	Ok(())
}

struct CancelOnDrop<Req: Send + 'static> {
	sender: Option<RequestSender<Req>>,
}

impl<Req: Send + 'static> CancelOnDrop<Req> {
	fn disarm(mut self) {
		self.sender = None;
	}
}

impl<Req: Send + 'static> Drop for CancelOnDrop<Req> {
	fn drop(&mut self) {
		let Some(sender) = self.sender.take() else {
			return;
		};
		tracing::debug!("rpc.client.forward_abandoned");
		strand_worker::spawn_detached(TaskClass::Cleanup, async move {
			sender.cancel().await;
		});
	}
}

//! Client side of the call layer.
//!
//! [`Client`] creates calls over a [`Channel`]. Each call shape wraps a shared
//! core that runs request parts through the interceptor chain to the
//! transport, and response parts from the transport back through the chain
//! into an accumulator of cells and streams.

use std::fmt;
use std::sync::Arc;

use futures::Stream;
use strand_worker::TaskClass;

use crate::codec::{Codec, CodecPair, JsonCodec};
use crate::error::Result;
use crate::options::CallOptions;
use crate::transport::{CallType, Channel};

mod call;
mod calls;
mod response;
mod sender;

pub use call::CallSetup;
pub use calls::{BidirectionalStreamingCall, ClientStreamingCall, ServerStreamingCall, UnaryCall};
pub use sender::{RequestSender, forward_requests};


/// Entry point for making calls over a channel.
pub struct Client<C, K = JsonCodec> {
	channel: Arc<C>,
	codec: K,
	default_options: CallOptions,
}

impl<C: Channel> Client<C> {
	/// Creates a client exchanging JSON payloads.
	pub fn new(channel: C) -> Self {
		Self {
			channel: Arc::new(channel),
			codec: JsonCodec,
			default_options: CallOptions::default(),
		}
	}
}

impl<C, K> Client<C, K>
where
	C: Channel,
	K: Clone + Send + Sync + 'static,
{
	pub fn with_codec<K2>(self, codec: K2) -> Client<C, K2> {
		Client {
			channel: self.channel,
			codec,
			default_options: self.default_options,
		}
	}

	/// Options used when a call does not bring its own.
	pub fn with_default_options(mut self, options: CallOptions) -> Self {
		self.default_options = options;
		self
	}

	pub fn default_options(&self) -> &CallOptions {
		&self.default_options
	}

	/// Creates the transport call for `path`, ready to be wrapped by a call shape.
	///
	/// Use this together with [`CallSetup::with_interceptors`] to attach a typed chain.
	pub fn call_setup<Req, Resp>(&self, path: &str, call_type: CallType, options: Option<CallOptions>) -> CallSetup<Req, Resp>
	where
		K: Codec<Req> + Codec<Resp>,
	{
		let options = options.unwrap_or_else(|| self.default_options.clone());
		let transport = self.channel.make_call(path, call_type, options);
		CallSetup::new(transport, CodecPair::new(self.codec.clone()))
	}

	pub fn make_unary_call<Req, Resp>(&self, path: &str, request: Req, options: Option<CallOptions>) -> UnaryCall<Req, Resp>
	where
		K: Codec<Req> + Codec<Resp>,
		Req: Send + 'static,
		Resp: Clone + Send + Sync + 'static,
	{
		UnaryCall::new(self.call_setup(path, CallType::Unary, options), request)
	}

	pub fn make_server_streaming_call<Req, Resp>(&self, path: &str, request: Req, options: Option<CallOptions>) -> ServerStreamingCall<Req, Resp>
	where
		K: Codec<Req> + Codec<Resp>,
		Req: Send + 'static,
		Resp: Send + Sync + 'static,
	{
		ServerStreamingCall::new(self.call_setup(path, CallType::ServerStreaming, options), request)
	}

	pub fn make_client_streaming_call<Req, Resp>(&self, path: &str, options: Option<CallOptions>) -> ClientStreamingCall<Req, Resp>
	where
		K: Codec<Req> + Codec<Resp>,
		Req: Send + 'static,
		Resp: Clone + Send + Sync + 'static,
	{
		ClientStreamingCall::new(self.call_setup(path, CallType::ClientStreaming, options))
	}

	pub fn make_bidirectional_streaming_call<Req, Resp>(&self, path: &str, options: Option<CallOptions>) -> BidirectionalStreamingCall<Req, Resp>
	where
		K: Codec<Req> + Codec<Resp>,
		Req: Send + 'static,
		Resp: Send + Sync + 'static,
	{
		BidirectionalStreamingCall::new(self.call_setup(path, CallType::BidirectionalStreaming, options))
	}

	/// Makes a unary call and waits for its response.
	pub async fn unary<Req, Resp>(&self, path: &str, request: Req) -> Result<Resp>
	where
		K: Codec<Req> + Codec<Resp>,
		Req: Send + 'static,
		Resp: Clone + Send + Sync + 'static,
	{
		self.make_unary_call(path, request, None).response().await
	}

	/// Streams `requests` into a client-streaming call and waits for its response.
	///
	/// Dropping the returned future before it completes cancels the call.
	pub async fn collect_with<Req, Resp, S>(&self, path: &str, requests: S) -> Result<Resp>
	where
		K: Codec<Req> + Codec<Resp>,
		Req: Send + 'static,
		Resp: Clone + Send + Sync + 'static,
		S: Stream<Item = Result<Req>>,
	{
		let call = self.make_client_streaming_call(path, None);
		forward_requests(call.sender(), requests).await?;
		call.response().await
	}

	/// Starts a bidirectional call fed from `requests` by a background task.
	///
	/// The returned call is only for draining responses; its request side is
	/// owned by the forwarding task.
	pub fn update_with<Req, Resp, S>(&self, path: &str, requests: S) -> BidirectionalStreamingCall<Req, Resp>
	where
		K: Codec<Req> + Codec<Resp>,
		Req: Send + 'static,
		Resp: Send + Sync + 'static,
		S: Stream<Item = Result<Req>> + Send + 'static,
	{
		let call = self.make_bidirectional_streaming_call(path, None);
		let sender = call.sender();
		let path = path.to_string();
		strand_worker::spawn_detached(TaskClass::Forwarder, async move {
			if let Err(error) = forward_requests(sender, requests).await {
				tracing::debug!(path = %path, %error, "rpc.client.forward_failed");
			}
		});
		call
	}
}

impl<C, K> fmt::Debug for Client<C, K> {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("Client").field("default_options", &self.default_options).finish_non_exhaustive()
	}
}

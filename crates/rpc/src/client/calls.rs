//! The four client call shapes.

use std::sync::Arc;

use super::call::{Call, CallSetup};
use super::response::{ResponseSink, StreamingResponseParts, UnaryResponseParts};
use super::sender::RequestSender;
use crate::error::{Error, Result};
use crate::metadata::{Compression, Metadata, MessageMetadata};
use crate::options::CallOptions;
use crate::part::RequestPart;
use crate::status::Status;
use crate::stream::MessageStream;
use crate::user_info::UserInfo;

/// Generates the accessors every call shape shares.
macro_rules! define_call_accessors {
    ($($ty:ident),* $(,)?) => {
        $(
        impl<Req, Resp> $ty<Req, Resp>
        where
            Req: Send + 'static,
            Resp: Send + Sync + 'static,
        {
            /// Options the call was started with.
            pub fn options(&self) -> &CallOptions {
                self.call.options()
            }

            /// RPC path, e.g. `/echo.Echo/Get`.
            pub fn path(&self) -> &str {
                self.call.path()
            }

            /// Extension map shared with the call's interceptors.
            pub fn user_info(&self) -> &UserInfo {
                self.call.user_info()
            }

            /// Cancels the call. Safe to call any number of times from any task.
            pub async fn cancel(&self) {
                self.call.terminate(Error::Cancelled).await;
            }

            /// Response headers.
            pub async fn initial_metadata(&self) -> Result<Metadata> {
                self.call.sink.outcome().initial_metadata.get().await
            }

            /// Response trailers.
            pub async fn trailing_metadata(&self) -> Result<Metadata> {
                self.call.sink.outcome().trailing_metadata.get().await
            }

            /// Final status. Every call reaches exactly one.
            pub async fn status(&self) -> Status {
                self.call.sink.outcome().status.get().await
            }
        }
        )*
    };
}

define_call_accessors!(UnaryCall, ServerStreamingCall, ClientStreamingCall, BidirectionalStreamingCall);

fn single_request<Req>(options: &CallOptions, request: Req) -> Vec<RequestPart<Req>> {
	vec![
		RequestPart::Metadata(options.request_headers()),
		RequestPart::Message(request, MessageMetadata::compressed(options.compress_messages)),
		RequestPart::End,
	]
}

/// One request, one response.
pub struct UnaryCall<Req, Resp> {
	call: Arc<Call<Req, Resp, UnaryResponseParts<Resp>>>,
}

impl<Req, Resp> UnaryCall<Req, Resp>
where
	Req: Send + 'static,
	Resp: Clone + Send + Sync + 'static,
{
	/// Starts the call and sends the whole request immediately.
	pub fn new(setup: CallSetup<Req, Resp>, request: Req) -> Self {
		let opening = single_request(setup.transport.options(), request);
		let call = Call::new(setup, UnaryResponseParts::new());
		call.start(opening);
		Self { call }
	}

	pub async fn response(&self) -> Result<Resp> {
		self.call.sink.response().await
	}
}

/// One request, a stream of responses.
pub struct ServerStreamingCall<Req, Resp> {
	call: Arc<Call<Req, Resp, StreamingResponseParts<Resp>>>,
	responses: MessageStream<Resp>,
}

impl<Req, Resp> ServerStreamingCall<Req, Resp>
where
	Req: Send + 'static,
	Resp: Send + Sync + 'static,
{
	/// Starts the call and sends the whole request immediately.
	pub fn new(setup: CallSetup<Req, Resp>, request: Req) -> Self {
		let opening = single_request(setup.transport.options(), request);
		let (parts, responses) = StreamingResponseParts::new();
		let call = Call::new(setup, parts);
		call.start(opening);
		Self { call, responses }
	}

	pub fn response_stream(&mut self) -> &mut MessageStream<Resp> {
		&mut self.responses
	}

	pub fn into_response_stream(self) -> MessageStream<Resp> {
		self.responses
	}
}

/// A stream of requests, one response.
pub struct ClientStreamingCall<Req, Resp> {
	call: Arc<Call<Req, Resp, UnaryResponseParts<Resp>>>,
	requests: RequestSender<Req>,
}

impl<Req, Resp> ClientStreamingCall<Req, Resp>
where
	Req: Send + 'static,
	Resp: Clone + Send + Sync + 'static,
{
	/// Starts the call and sends the request headers.
	pub fn new(setup: CallSetup<Req, Resp>) -> Self {
		let opening = vec![RequestPart::Metadata(setup.transport.options().request_headers())];
		let call = Call::new(setup, UnaryResponseParts::new());
		call.start(opening);
		let requests = RequestSender::new(Arc::clone(&call) as _);
		Self { call, requests }
	}

	pub async fn response(&self) -> Result<Resp> {
		self.call.sink.response().await
	}
}

/// Streams in both directions.
pub struct BidirectionalStreamingCall<Req, Resp> {
	call: Arc<Call<Req, Resp, StreamingResponseParts<Resp>>>,
	requests: RequestSender<Req>,
	responses: MessageStream<Resp>,
}

impl<Req, Resp> BidirectionalStreamingCall<Req, Resp>
where
	Req: Send + 'static,
	Resp: Send + Sync + 'static,
{
	/// Starts the call and sends the request headers.
	pub fn new(setup: CallSetup<Req, Resp>) -> Self {
		let opening = vec![RequestPart::Metadata(setup.transport.options().request_headers())];
		let (parts, responses) = StreamingResponseParts::new();
		let call = Call::new(setup, parts);
		call.start(opening);
		let requests = RequestSender::new(Arc::clone(&call) as _);
		Self {
			call,
			requests,
			responses,
		}
	}

	pub fn response_stream(&mut self) -> &mut MessageStream<Resp> {
		&mut self.responses
	}

	/// Splits off the response stream; keep a [`RequestSender`] to go on sending.
	pub fn into_response_stream(self) -> MessageStream<Resp> {
		self.responses
	}
}

/// Generates the request-side methods of the request-streaming shapes.
macro_rules! define_request_senders {
    ($($ty:ident),* $(,)?) => {
        $(
        impl<Req, Resp> $ty<Req, Resp>
        where
            Req: Send + 'static,
            Resp: Send + Sync + 'static,
        {
            /// Sends one request message.
            pub async fn send_message(&self, message: Req) -> Result<()> {
                self.requests.send_message(message).await
            }

            /// Sends one request message with a compression override.
            pub async fn send_message_with(&self, message: Req, compression: Compression) -> Result<()> {
                self.requests.send_message_with(message, compression).await
            }

            /// Sends a batch of request messages back to back.
            pub async fn send_messages<I>(&self, messages: I) -> Result<()>
            where
                I: IntoIterator<Item = Req>,
            {
                self.requests.send_messages(messages).await
            }

            /// Closes the request stream.
            pub async fn send_end(&self) -> Result<()> {
                self.requests.send_end().await
            }

            /// A cloneable handle for sending from another task.
            pub fn sender(&self) -> RequestSender<Req> {
                self.requests.clone()
            }
        }
        )*
    };
}

define_request_senders!(ClientStreamingCall, BidirectionalStreamingCall);

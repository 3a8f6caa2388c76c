//! Per-call state machine bridging transport parts and user handler functions.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use bytes::Bytes;
use futures::future::BoxFuture;
use parking_lot::Mutex;
use strand_worker::TaskClass;

use super::context::{CallHandlerContext, ServerCallContext};
use super::writer::{ResponseOutput, ResponseStreamWriter};
use crate::codec::CodecPair;
use crate::error::{Error, Result};
use crate::interceptor::{Admit, Endpoints, ResponseOrder, ServerInterceptors};
use crate::metadata::Metadata;
use crate::part::{RequestPart, ResponsePart};
use crate::status::{Code, Status};
use crate::stream::{MessageStream, StreamSender, message_stream};
use crate::transport::{Acceptance, ServerTransport};
use crate::user_info::UserInfo;

/// Receives the request side of one inbound call from the transport.
pub trait ServerHandler: Send + Sync + 'static {
	fn receive(&self, part: RequestPart<Bytes>);

	/// The client cancelled or the transport failed.
	fn receive_error(&self, error: Error);
}

pub(crate) type UnaryFn<Req, Resp> = Arc<dyn Fn(Req, ServerCallContext) -> BoxFuture<'static, Result<Resp>> + Send + Sync>;
pub(crate) type ServerStreamingFn<Req, Resp> =
	Arc<dyn Fn(Req, ResponseStreamWriter<Resp>, ServerCallContext) -> BoxFuture<'static, Result<()>> + Send + Sync>;
pub(crate) type ClientStreamingFn<Req, Resp> = Arc<dyn Fn(MessageStream<Req>, ServerCallContext) -> BoxFuture<'static, Result<Resp>> + Send + Sync>;
pub(crate) type BidirectionalFn<Req, Resp> =
	Arc<dyn Fn(MessageStream<Req>, ResponseStreamWriter<Resp>, ServerCallContext) -> BoxFuture<'static, Result<()>> + Send + Sync>;

/// A user handler function of one of the four shapes.
pub(crate) enum Method<Req, Resp> {
	Unary(UnaryFn<Req, Resp>),
	ServerStreaming(ServerStreamingFn<Req, Resp>),
	ClientStreaming(ClientStreamingFn<Req, Resp>),
	Bidirectional(BidirectionalFn<Req, Resp>),
}

impl<Req, Resp> Clone for Method<Req, Resp> {
	fn clone(&self) -> Self {
		match self {
			Self::Unary(f) => Self::Unary(Arc::clone(f)),
			Self::ServerStreaming(f) => Self::ServerStreaming(Arc::clone(f)),
			Self::ClientStreaming(f) => Self::ClientStreaming(Arc::clone(f)),
			Self::Bidirectional(f) => Self::Bidirectional(Arc::clone(f)),
		}
	}
}

impl<Req, Resp> Method<Req, Resp> {
	fn is_request_streaming(&self) -> bool {
		matches!(self, Self::ClientStreaming(_) | Self::Bidirectional(_))
	}
}

enum Inbound<Req> {
	/// Waiting for request headers.
	Idle,
	AwaitingMessage,
	HaveMessage(Req),
	Streaming(StreamSender<Req>),
	/// The request side is complete and the handler owns the call.
	Running,
	Closed,
}

enum Input<Req> {
	Single(Req),
	Stream(MessageStream<Req>),
}

enum Action<Req> {
	Nothing,
	Start(Input<Req>),
	Reject(&'static str),
}

#[derive(Default)]
struct Outbound {
	headers_sent: bool,
	/// Set once `End` entered the chain.
	closed: bool,
}

struct CallShared<Req, Resp> {
	this: Weak<Self>,
	transport: Arc<dyn ServerTransport>,
	interceptors: ServerInterceptors<Req, Resp>,
	codecs: CodecPair<Req, Resp>,
	method: Method<Req, Resp>,
	context: ServerCallContext,
	inbound: Mutex<Inbound<Req>>,
	/// Held while parts run through the chain so the response order is the emit order.
	outbound: Mutex<Outbound>,
	/// Set on inbound failure; all further output is dropped.
	suppressed: AtomicBool,
	order: Mutex<ResponseOrder>,
}

/// Transport-facing handle of one inbound call.
pub(crate) struct ServerCall<Req, Resp> {
	shared: Arc<CallShared<Req, Resp>>,
}

impl<Req, Resp> ServerCall<Req, Resp>
where
	Req: Send + 'static,
	Resp: Send + 'static,
{
	pub(crate) fn new(
		handler_context: CallHandlerContext,
		method: Method<Req, Resp>,
		interceptors: ServerInterceptors<Req, Resp>,
		codecs: CodecPair<Req, Resp>,
	) -> Self {
		let CallHandlerContext { path, transport } = handler_context;
		let shared = Arc::new_cyclic(|this| CallShared {
			this: this.clone(),
			transport,
			interceptors,
			codecs,
			method,
			context: ServerCallContext::new(path, true),
			inbound: Mutex::new(Inbound::Idle),
			outbound: Mutex::new(Outbound::default()),
			suppressed: AtomicBool::new(false),
			order: Mutex::new(ResponseOrder::default()),
		});
		Self { shared }
	}
}

impl<Req, Resp> ServerHandler for ServerCall<Req, Resp>
where
	Req: Send + 'static,
	Resp: Send + 'static,
{
	fn receive(&self, part: RequestPart<Bytes>) {
		let shared = &*self.shared;
		match part.try_map(|payload| shared.codecs.request.decode(payload)) {
			Ok(part) => shared.interceptors.receive(part, &ServerEnds::new(shared)),
			Err(error) => {
				tracing::warn!(path = shared.context.path(), %error, "rpc.server.decode_failed");
				shared.close_inbound(&error);
				shared.finish(error.to_status());
			}
		}
	}

	fn receive_error(&self, error: Error) {
		let shared = &*self.shared;
		shared.interceptors.fail(error.clone(), &ServerEnds::new(shared));
		shared.on_inbound_error(error);
	}
}

impl<Req, Resp> Drop for ServerCall<Req, Resp> {
	fn drop(&mut self) {
		// Released by the transport while still live: nobody will feed or read the call again.
		let scope = self.shared.context.scope();
		if !scope.is_cancelled() {
			tracing::debug!(path = self.shared.context.path(), "rpc.server.call_released");
			let previous = std::mem::replace(&mut *self.shared.inbound.lock(), Inbound::Closed);
			if let Inbound::Streaming(requests) = previous {
				requests.finish_with_error(Error::Transport("call released by transport".into()));
			}
			self.shared.suppressed.store(true, Ordering::Release);
			scope.cancel();
		}
	}
}

impl<Req, Resp> CallShared<Req, Resp>
where
	Req: Send + 'static,
	Resp: Send + 'static,
{
	/// Advances the request-side state machine with a part that left the chain.
	fn on_request(&self, part: RequestPart<Req>) {
		let action = {
			let mut inbound = self.inbound.lock();
			match (std::mem::replace(&mut *inbound, Inbound::Closed), part) {
				(Inbound::Idle, RequestPart::Metadata(headers)) => {
					self.context.set_headers(headers);
					if self.method.is_request_streaming() {
						let (requests, stream) = message_stream();
						*inbound = Inbound::Streaming(requests);
						Action::Start(Input::Stream(stream))
					} else {
						*inbound = Inbound::AwaitingMessage;
						Action::Nothing
					}
				}
				(Inbound::Idle, _) => Action::Reject("request part before request headers"),
				(Inbound::AwaitingMessage, RequestPart::Message(message, _)) => {
					*inbound = Inbound::HaveMessage(message);
					Action::Nothing
				}
				(Inbound::AwaitingMessage, RequestPart::End) => Action::Reject("unary method received no request message"),
				(Inbound::HaveMessage(_), RequestPart::Message(..)) => Action::Reject("unary method received more than one request message"),
				(Inbound::HaveMessage(message), RequestPart::End) => {
					*inbound = Inbound::Running;
					Action::Start(Input::Single(message))
				}
				(Inbound::Streaming(requests), RequestPart::Message(message, _)) => {
					requests.push(message);
					*inbound = Inbound::Streaming(requests);
					Action::Nothing
				}
				(Inbound::Streaming(requests), RequestPart::End) => {
					requests.finish();
					*inbound = Inbound::Running;
					Action::Nothing
				}
				(state @ (Inbound::Running | Inbound::Closed), part) => {
					tracing::trace!(path = self.context.path(), kind = part.kind(), "rpc.server.request_part_ignored");
					*inbound = state;
					Action::Nothing
				}
				(state, RequestPart::Metadata(_)) => {
					tracing::warn!(path = self.context.path(), "rpc.server.duplicate_request_headers");
					*inbound = state;
					Action::Nothing
				}
			}
		};

		match action {
			Action::Nothing => {}
			Action::Start(input) => self.start(input),
			Action::Reject(reason) => {
				tracing::warn!(path = self.context.path(), reason, "rpc.server.request_rejected");
				self.finish(Status::new(Code::FailedPrecondition, reason));
			}
		}
	}

	/// The client went away or the transport failed: stop the handler and drop its output.
	fn on_inbound_error(&self, error: Error) {
		tracing::debug!(path = self.context.path(), %error, "rpc.server.inbound_error");
		self.close_inbound(&error);
		self.suppressed.store(true, Ordering::Release);
		self.context.scope().cancel();
	}

	fn close_inbound(&self, error: &Error) {
		let previous = std::mem::replace(&mut *self.inbound.lock(), Inbound::Closed);
		if let Inbound::Streaming(requests) = previous {
			requests.finish_with_error(error.clone());
		}
	}

	fn start(&self, input: Input<Req>) {
		let Some(shared) = self.this.upgrade() else {
			return;
		};
		tracing::debug!(path = self.context.path(), "rpc.server.handler_start");
		strand_worker::spawn_detached(TaskClass::Handler, async move {
			let scope = shared.context.scope().clone();
			match scope.run(shared.invoke(input)).await {
				None => tracing::debug!(path = shared.context.path(), "rpc.server.handler_cancelled"),
				Some(Ok(())) => shared.finish(Status::OK),
				Some(Err(error)) => {
					tracing::debug!(path = shared.context.path(), %error, "rpc.server.handler_failed");
					shared.finish(error.to_status());
				}
			}
		});
	}

	async fn invoke(self: &Arc<Self>, input: Input<Req>) -> Result<()> {
		let writer = ResponseStreamWriter::new(Arc::clone(self) as Arc<dyn ResponseOutput<Resp>>);
		let context = self.context.clone();
		match (&self.method, input) {
			(Method::Unary(f), Input::Single(request)) => {
				let response = f(request, context).await?;
				writer.send_response(response).await
			}
			(Method::ServerStreaming(f), Input::Single(request)) => f(request, writer, context).await,
			(Method::ClientStreaming(f), Input::Stream(requests)) => {
				let response = f(requests, context).await?;
				writer.send_response(response).await
			}
			(Method::Bidirectional(f), Input::Stream(requests)) => f(requests, writer, context).await,
			_ => Err(Error::protocol("request input does not match handler shape")),
		}
	}

	/// Emits the call's single `End`. Later attempts are ignored.
	fn finish(&self, status: Status) {
		let trailers = self.context.take_trailers();
		match self.emit(ResponsePart::End(status, trailers)) {
			// The end goes out regardless of whether anyone awaits its acceptance.
			Ok(_acceptances) => {}
			Err(_) => tracing::trace!(path = self.context.path(), "rpc.server.end_suppressed"),
		}
	}

	fn write(&self, part: ResponsePart<Resp>) -> Acceptance {
		match part.try_map(|message| self.codecs.response.encode(&message)) {
			Ok(part) => self.transport.send(part),
			Err(error) => {
				tracing::warn!(path = self.context.path(), %error, "rpc.server.encode_failed");
				Acceptance::rejected(error)
			}
		}
	}
}

impl<Req, Resp> ResponseOutput<Resp> for CallShared<Req, Resp>
where
	Req: Send + 'static,
	Resp: Send + 'static,
{
	fn emit(&self, part: ResponsePart<Resp>) -> Result<Vec<Acceptance>> {
		let ends = ServerEnds::new(self);
		let mut outbound = self.outbound.lock();
		if outbound.closed || self.suppressed.load(Ordering::Acquire) {
			return Err(Error::StreamAlreadyClosed);
		}
		let part = if outbound.headers_sent {
			part
		} else {
			outbound.headers_sent = true;
			let staged = self.context.take_response_headers();
			match part {
				ResponsePart::Metadata(mut headers) => {
					headers.extend_from(&staged);
					ResponsePart::Metadata(headers)
				}
				other => {
					self.interceptors.send(ResponsePart::Metadata(staged), &ends);
					other
				}
			}
		};
		if matches!(part, ResponsePart::End(..)) {
			outbound.closed = true;
		}
		self.interceptors.send(part, &ends);
		drop(outbound);
		Ok(ends.into_acceptances())
	}

	fn compression_allowed(&self) -> bool {
		self.transport.compression_enabled() && self.context.compression_enabled()
	}
}

/// Chain edges for one pass through a server chain.
struct ServerEnds<'a, Req, Resp> {
	shared: &'a CallShared<Req, Resp>,
	acceptances: Mutex<Vec<Acceptance>>,
}

impl<'a, Req, Resp> ServerEnds<'a, Req, Resp> {
	fn new(shared: &'a CallShared<Req, Resp>) -> Self {
		Self {
			shared,
			acceptances: Mutex::new(Vec::new()),
		}
	}

	fn into_acceptances(self) -> Vec<Acceptance> {
		self.acceptances.into_inner()
	}
}

impl<Req, Resp> Endpoints<ResponsePart<Resp>, RequestPart<Req>> for ServerEnds<'_, Req, Resp>
where
	Req: Send + 'static,
	Resp: Send + 'static,
{
	fn to_transport(&self, part: ResponsePart<Resp>) {
		let shared = self.shared;
		let admit = shared.order.lock().admit(&part);
		match admit {
			Admit::Pass => {}
			Admit::WithMetadataFirst => {
				let acceptance = shared.write(ResponsePart::Metadata(Metadata::new()));
				self.acceptances.lock().push(acceptance);
			}
			Admit::Drop(reason) => {
				tracing::warn!(path = shared.context.path(), kind = part.kind(), reason, "rpc.server.response_part_dropped");
				return;
			}
		}

		let is_end = matches!(part, ResponsePart::End(..));
		let acceptance = shared.write(part);
		self.acceptances.lock().push(acceptance);
		if is_end {
			tracing::debug!(path = shared.context.path(), "rpc.server.call_ended");
			shared.context.scope().cancel();
		}
	}

	fn to_application(&self, part: RequestPart<Req>) {
		self.shared.on_request(part);
	}

	fn fail_application(&self, error: Error) {
		self.shared.on_inbound_error(error);
	}

	fn path(&self) -> &str {
		self.shared.context.path()
	}

	fn user_info(&self) -> &UserInfo {
		self.shared.context.user_info()
	}
}

//! Per-call state shared by every client call shape.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use bytes::Bytes;
use futures::FutureExt;
use futures::future::BoxFuture;
use parking_lot::Mutex;
use strand_worker::TaskClass;

use super::response::ResponseSink;
use crate::codec::CodecPair;
use crate::error::{Error, Result};
use crate::interceptor::{Admit, ClientInterceptors, Endpoints, ResponseOrder};
use crate::metadata::Metadata;
use crate::options::CallOptions;
use crate::part::{RequestPart, ResponsePart};
use crate::transport::{Acceptance, ResponseHandler, TransportCall};
use crate::user_info::UserInfo;

/// Everything needed to start a client call.
pub struct CallSetup<Req, Resp> {
	pub transport: Arc<dyn TransportCall>,
	pub interceptors: ClientInterceptors<Req, Resp>,
	pub codecs: CodecPair<Req, Resp>,
}

impl<Req, Resp> CallSetup<Req, Resp> {
	pub fn new(transport: Arc<dyn TransportCall>, codecs: CodecPair<Req, Resp>) -> Self {
		Self {
			transport,
			interceptors: ClientInterceptors::empty(),
			codecs,
		}
	}

	pub fn with_interceptors(mut self, interceptors: ClientInterceptors<Req, Resp>) -> Self {
		self.interceptors = interceptors;
		self
	}
}

impl<Req, Resp> fmt::Debug for CallSetup<Req, Resp> {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("CallSetup")
			.field("path", &self.transport.path())
			.field("call_type", &self.transport.call_type())
			.field("interceptors", &self.interceptors)
			.finish()
	}
}

#[derive(Debug, Default)]
struct SendState {
	/// Request messages enqueued so far.
	sequence: u64,
	/// Set once `End` was enqueued.
	closed: bool,
}

/// Core of a client call: the transport call, the chain and the accumulator.
///
/// The transport holds an `Arc` of this as its [`ResponseHandler`] until the
/// call finishes or is cancelled.
pub(crate) struct Call<Req, Resp, S> {
	transport: Arc<dyn TransportCall>,
	interceptors: ClientInterceptors<Req, Resp>,
	codecs: CodecPair<Req, Resp>,
	pub(crate) sink: S,
	order: Mutex<ResponseOrder>,
	/// Serializes sends so parts reach the transport in call order.
	send_state: Mutex<SendState>,
	/// Set by cancellation, deadline expiry or a protocol violation.
	terminated: AtomicBool,
	user_info: UserInfo,
}

impl<Req, Resp, S> Call<Req, Resp, S>
where
	Req: Send + 'static,
	Resp: Send + 'static,
	S: ResponseSink<Resp>,
{
	pub(crate) fn new(setup: CallSetup<Req, Resp>, sink: S) -> Arc<Self> {
		Arc::new(Self {
			transport: setup.transport,
			interceptors: setup.interceptors,
			codecs: setup.codecs,
			sink,
			order: Mutex::new(ResponseOrder::default()),
			send_state: Mutex::new(SendState::default()),
			terminated: AtomicBool::new(false),
			user_info: UserInfo::new(),
		})
	}

	pub(crate) fn path(&self) -> &str {
		self.transport.path()
	}

	pub(crate) fn options(&self) -> &CallOptions {
		self.transport.options()
	}

	pub(crate) fn user_info(&self) -> &UserInfo {
		&self.user_info
	}

	/// Invokes the transport call, arms the deadline and enqueues the opening parts.
	///
	/// Failures are reported through the accumulator rather than returned, so
	/// call construction stays infallible.
	pub(crate) fn start(self: &Arc<Self>, opening: Vec<RequestPart<Req>>) {
		tracing::debug!(path = self.path(), call_type = self.transport.call_type().as_str(), "rpc.call.start");
		let handler: Arc<dyn ResponseHandler> = Arc::clone(self) as Arc<dyn ResponseHandler>;
		if let Err(error) = self.transport.invoke(handler) {
			tracing::warn!(path = self.path(), %error, "rpc.call.invoke_failed");
			self.terminated.store(true, Ordering::Release);
			self.sink.handle_error(error);
			return;
		}
		self.arm_deadline();

		if let Err(error) = self.enqueue(opening) {
			tracing::debug!(path = self.path(), %error, "rpc.call.opening_rejected");
		}
	}

	fn arm_deadline(self: &Arc<Self>) {
		let Some(timeout) = self.options().timeout else {
			return;
		};
		let call = Arc::downgrade(self);
		strand_worker::spawn_detached(TaskClass::Watchdog, async move {
			tokio::time::sleep(timeout).await;
			let Some(call) = call.upgrade() else {
				return;
			};
			if call.sink.outcome().status.is_resolved() {
				return;
			}
			tracing::debug!(path = call.path(), ?timeout, "rpc.call.deadline_exceeded");
			call.terminate(Error::DeadlineExceeded).await;
		});
	}

	/// Runs parts through the chain toward the transport, under the send lock.
	///
	/// Returns the acceptances of every part the transport received.
	fn enqueue(&self, parts: Vec<RequestPart<Req>>) -> Result<Vec<Acceptance>> {
		let ends = Ends::new(self);
		let mut state = self.send_state.lock();
		for part in parts {
			if state.closed {
				tracing::debug!(path = self.path(), kind = part.kind(), "rpc.call.send_after_end");
				return Err(Error::StreamAlreadyClosed);
			}
			if self.terminated.load(Ordering::Acquire) {
				return Err(Error::Cancelled);
			}
			match &part {
				RequestPart::Message(..) => state.sequence += 1,
				RequestPart::End => state.closed = true,
				RequestPart::Metadata(_) => {}
			}
			tracing::trace!(path = self.path(), kind = part.kind(), sequence = state.sequence, "rpc.call.send");
			self.interceptors.send(part, &ends);
		}
		drop(state);
		Ok(ends.into_acceptances())
	}

	/// Enqueues parts, then waits until the transport accepted each of them.
	pub(crate) async fn send_parts(&self, parts: Vec<RequestPart<Req>>) -> Result<()> {
		let acceptances = self.enqueue(parts)?;
		for acceptance in acceptances {
			acceptance.await?;
		}
		Ok(())
	}

	/// Fails the call locally and cancels the transport call. Idempotent.
	pub(crate) async fn terminate(&self, error: Error) {
		if self.terminated.swap(true, Ordering::AcqRel) {
			tracing::trace!(path = self.path(), "rpc.call.already_terminated");
			return;
		}
		tracing::debug!(path = self.path(), %error, "rpc.call.terminate");

		self.interceptors.fail(error.clone(), &Ends::new(self));
		// Interceptors may swallow the error; the call still has to reach a status.
		self.sink.handle_error(error);

		if let Err(error) = self.transport.cancel().await {
			tracing::debug!(path = self.path(), %error, "rpc.call.cancel_rejected");
		}
	}

	/// Gives up on the transport call after a local failure, without waiting.
	fn abandon(&self) {
		if !self.terminated.swap(true, Ordering::AcqRel) {
			drop(self.transport.cancel());
		}
	}

	/// Applies a part that made it through the chain.
	fn deliver(&self, part: ResponsePart<Resp>) {
		let admit = self.order.lock().admit(&part);
		match admit {
			Admit::Pass => {}
			Admit::WithMetadataFirst => self.accumulate(ResponsePart::Metadata(Metadata::new())),
			Admit::Drop(reason) => {
				tracing::warn!(path = self.path(), kind = part.kind(), reason, "rpc.call.response_part_dropped");
				return;
			}
		}
		let is_end = matches!(part, ResponsePart::End(..));
		self.accumulate(part);
		if is_end {
			// Releases the transport call even when the end was produced by an interceptor.
			self.abandon();
		}
	}

	fn accumulate(&self, part: ResponsePart<Resp>) {
		if let Err(error) = self.sink.handle(part) {
			tracing::warn!(path = self.path(), %error, "rpc.call.protocol_violation");
			self.abandon();
		}
	}
}

impl<Req, Resp, S> ResponseHandler for Call<Req, Resp, S>
where
	Req: Send + 'static,
	Resp: Send + 'static,
	S: ResponseSink<Resp>,
{
	fn on_part(&self, part: ResponsePart<Bytes>) {
		let ends = Ends::new(self);
		match part.try_map(|payload| self.codecs.response.decode(payload)) {
			Ok(part) => self.interceptors.receive(part, &ends),
			Err(error) => {
				tracing::warn!(path = self.path(), %error, "rpc.call.decode_failed");
				self.interceptors.fail(error.clone(), &ends);
				self.sink.handle_error(error);
				self.abandon();
			}
		}
	}

	fn on_error(&self, error: Error) {
		tracing::debug!(path = self.path(), %error, "rpc.call.transport_error");
		let ends = Ends::new(self);
		self.interceptors.fail(error.clone(), &ends);
		// Nothing follows a transport error, so the status resolves here if the chain swallowed it.
		self.sink.handle_error(error);
	}
}

/// Request half of a call, erased over the response accumulator.
pub(crate) trait RequestChannel<Req>: Send + Sync + 'static {
	fn send_parts(&self, parts: Vec<RequestPart<Req>>) -> BoxFuture<'_, Result<()>>;
	fn cancel(&self) -> BoxFuture<'_, ()>;
	fn compress_by_default(&self) -> bool;
}

impl<Req, Resp, S> RequestChannel<Req> for Call<Req, Resp, S>
where
	Req: Send + 'static,
	Resp: Send + 'static,
	S: ResponseSink<Resp>,
{
	fn send_parts(&self, parts: Vec<RequestPart<Req>>) -> BoxFuture<'_, Result<()>> {
		// Enqueue now so the part order follows call order, not poll order.
		let enqueued = self.enqueue(parts);
		async move {
			for acceptance in enqueued? {
				acceptance.await?;
			}
			Ok(())
		}
		.boxed()
	}

	fn cancel(&self) -> BoxFuture<'_, ()> {
		self.terminate(Error::Cancelled).boxed()
	}

	fn compress_by_default(&self) -> bool {
		self.options().compress_messages
	}
}

/// Chain edges for one pass through a client chain.
struct Ends<'a, Req, Resp, S> {
	call: &'a Call<Req, Resp, S>,
	acceptances: Mutex<Vec<Acceptance>>,
}

impl<'a, Req, Resp, S> Ends<'a, Req, Resp, S> {
	fn new(call: &'a Call<Req, Resp, S>) -> Self {
		Self {
			call,
			acceptances: Mutex::new(Vec::new()),
		}
	}

	fn into_acceptances(self) -> Vec<Acceptance> {
		self.acceptances.into_inner()
	}
}

impl<Req, Resp, S> Endpoints<RequestPart<Req>, ResponsePart<Resp>> for Ends<'_, Req, Resp, S>
where
	Req: Send + 'static,
	Resp: Send + 'static,
	S: ResponseSink<Resp>,
{
	fn to_transport(&self, part: RequestPart<Req>) {
		let acceptance = match part.try_map(|message| self.call.codecs.request.encode(&message)) {
			Ok(part) => self.call.transport.send(part),
			Err(error) => Acceptance::rejected(error),
		};
		self.acceptances.lock().push(acceptance);
	}

	fn to_application(&self, part: ResponsePart<Resp>) {
		self.call.deliver(part);
	}

	fn fail_application(&self, error: Error) {
		self.call.sink.handle_error(error);
	}

	fn path(&self) -> &str {
		self.call.path()
	}

	fn user_info(&self) -> &UserInfo {
		&self.call.user_info
	}
}

//! Seams to the byte-level transport.
//!
//! A transport moves encoded parts for many concurrent calls. The call layer
//! drives it through [`TransportCall`] on the client and [`ServerTransport`]
//! on the server, and is driven by it through [`ResponseHandler`] and
//! [`crate::server::ServerHandler`].

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use bytes::Bytes;
use tokio::sync::oneshot;

use crate::error::{Error, Result};
use crate::options::CallOptions;
use crate::part::{RequestPart, ResponsePart};

/// The four call shapes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CallType {
	Unary,
	ClientStreaming,
	ServerStreaming,
	BidirectionalStreaming,
}

impl CallType {
	pub fn is_request_streaming(self) -> bool {
		matches!(self, Self::ClientStreaming | Self::BidirectionalStreaming)
	}

	pub fn is_response_streaming(self) -> bool {
		matches!(self, Self::ServerStreaming | Self::BidirectionalStreaming)
	}

	pub const fn as_str(self) -> &'static str {
		match self {
			Self::Unary => "unary",
			Self::ClientStreaming => "client_streaming",
			Self::ServerStreaming => "server_streaming",
			Self::BidirectionalStreaming => "bidirectional_streaming",
		}
	}
}

/// Resolves once the transport accepted an enqueued part.
///
/// The part is already enqueued when the acceptance is returned, so dropping
/// it does not withdraw the part.
#[must_use = "dropping an acceptance ignores transport failures"]
pub struct Acceptance {
	state: AcceptanceState,
}

enum AcceptanceState {
	Ready(Option<Result<()>>),
	Pending(oneshot::Receiver<Result<()>>),
}

impl Acceptance {
	pub fn accepted() -> Self {
		Self {
			state: AcceptanceState::Ready(Some(Ok(()))),
		}
	}

	pub fn rejected(error: Error) -> Self {
		Self {
			state: AcceptanceState::Ready(Some(Err(error))),
		}
	}

	/// Creates an acceptance settled later through the returned signal.
	pub fn pending() -> (AcceptanceSignal, Self) {
		let (tx, rx) = oneshot::channel();
		let acceptance = Self {
			state: AcceptanceState::Pending(rx),
		};
		(AcceptanceSignal { tx }, acceptance)
	}
}

impl Future for Acceptance {
	type Output = Result<()>;

	fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
		match &mut self.state {
			AcceptanceState::Ready(outcome) => Poll::Ready(outcome.take().unwrap_or(Ok(()))),
			AcceptanceState::Pending(rx) => match Pin::new(rx).poll(cx) {
				Poll::Ready(Ok(outcome)) => Poll::Ready(outcome),
				Poll::Ready(Err(_closed)) => Poll::Ready(Err(Error::Transport("transport dropped the part before accepting it".into()))),
				Poll::Pending => Poll::Pending,
			},
		}
	}
}

/// Settles a pending [`Acceptance`].
#[derive(Debug)]
pub struct AcceptanceSignal {
	tx: oneshot::Sender<Result<()>>,
}

impl AcceptanceSignal {
	pub fn accept(self) {
		let _ = self.tx.send(Ok(()));
	}

	pub fn reject(self, error: Error) {
		let _ = self.tx.send(Err(error));
	}
}

/// Receives response-side events for one client call.
///
/// Callbacks may run on any thread. Parts of one call arrive in transport
/// order.
pub trait ResponseHandler: Send + Sync + 'static {
	fn on_part(&self, part: ResponsePart<Bytes>);

	/// The transport failed before delivering `End`.
	fn on_error(&self, error: Error);
}

/// One outgoing call on a transport. Never reused.
pub trait TransportCall: Send + Sync + 'static {
	fn path(&self) -> &str;

	fn call_type(&self) -> CallType;

	fn options(&self) -> &CallOptions;

	/// Registers the response handler and starts the call.
	///
	/// A second invocation returns [`Error::AlreadyInvoked`]. The transport
	/// keeps the handler until it delivered `End` or an error, or the call was
	/// cancelled.
	fn invoke(&self, handler: Arc<dyn ResponseHandler>) -> Result<()>;

	/// Enqueues a request part before returning.
	fn send(&self, part: RequestPart<Bytes>) -> Acceptance;

	/// Cancels the call. Cancelling a finished call is accepted.
	fn cancel(&self) -> Acceptance;
}

/// Creates transport calls.
pub trait Channel: Send + Sync + 'static {
	fn make_call(&self, path: &str, call_type: CallType, options: CallOptions) -> Arc<dyn TransportCall>;
}

/// Response direction of one inbound server call.
pub trait ServerTransport: Send + Sync + 'static {
	/// Enqueues a response part before returning.
	fn send(&self, part: ResponsePart<Bytes>) -> Acceptance;

	/// Whether the transport permits compressed response messages.
	fn compression_enabled(&self) -> bool;
}

//! Onion-style interceptor chains shared by clients and servers.
//!
//! A chain is an ordered list. Index 0 sits closest to the transport: on a
//! client it sees outgoing request parts last and incoming response parts
//! first, and on a server it sees incoming request parts first and outgoing
//! response parts last.
//!
//! Every hook gets a [`Context`] and decides what happens next: forward the
//! part unchanged, forward a transformed part, drop it, emit extra parts, or
//! short-circuit by answering toward the application without reaching the
//! transport.
//!
//! Hooks run synchronously on the thread that produced the part and must not
//! block.

use std::fmt;
use std::sync::Arc;

use crate::error::Error;
use crate::metadata::Metadata;
use crate::part::{RequestPart, ResponsePart};
use crate::user_info::UserInfo;

mod order;

pub(crate) use order::{Admit, ResponseOrder};


/// A stage of an [`InterceptorChain`].
///
/// `Out` is the part type travelling toward the transport and `In` the type
/// travelling toward the application. Every hook defaults to forwarding.
pub trait Interceptor<Out, In>: Send + Sync {
	fn outbound(&self, part: Out, cx: &Context<'_, Out, In>) {
		cx.send(part);
	}

	fn inbound(&self, part: In, cx: &Context<'_, Out, In>) {
		cx.receive(part);
	}

	fn inbound_error(&self, error: Error, cx: &Context<'_, Out, In>) {
		cx.fail(error);
	}
}

/// Client chain: request parts go out, response parts come in.
pub type ClientInterceptors<Req, Resp> = InterceptorChain<RequestPart<Req>, ResponsePart<Resp>>;

/// Server chain: response parts go out, request parts come in.
pub type ServerInterceptors<Req, Resp> = InterceptorChain<ResponsePart<Resp>, RequestPart<Req>>;

/// The two edges of a chain, supplied by the call running it.
pub(crate) trait Endpoints<Out, In> {
	fn to_transport(&self, part: Out);
	fn to_application(&self, part: In);
	fn fail_application(&self, error: Error);
	fn path(&self) -> &str;
	fn user_info(&self) -> &UserInfo;
}

/// Position of one interceptor within a running chain.
pub struct Context<'a, Out, In> {
	chain: &'a [Arc<dyn Interceptor<Out, In>>],
	index: usize,
	ends: &'a dyn Endpoints<Out, In>,
}

impl<Out, In> Context<'_, Out, In> {
	/// Passes a part to the next stage toward the transport.
	pub fn send(&self, part: Out) {
		outbound_below(self.chain, self.index, part, self.ends);
	}

	/// Passes a part to the next stage toward the application.
	pub fn receive(&self, part: In) {
		inbound_at(self.chain, self.index + 1, part, self.ends);
	}

	/// Passes an error to the next stage toward the application.
	pub fn fail(&self, error: Error) {
		error_at(self.chain, self.index + 1, error, self.ends);
	}

	/// RPC path of the call, e.g. `/echo.Echo/Get`.
	pub fn path(&self) -> &str {
		self.ends.path()
	}

	pub fn user_info(&self) -> &UserInfo {
		self.ends.user_info()
	}

	/// Index of the running interceptor, 0 being nearest the transport.
	pub fn position(&self) -> usize {
		self.index
	}
}

fn outbound_below<Out, In>(chain: &[Arc<dyn Interceptor<Out, In>>], below: usize, part: Out, ends: &dyn Endpoints<Out, In>) {
	match below.checked_sub(1) {
		Some(index) => chain[index].outbound(part, &Context { chain, index, ends }),
		None => ends.to_transport(part),
	}
}

fn inbound_at<Out, In>(chain: &[Arc<dyn Interceptor<Out, In>>], index: usize, part: In, ends: &dyn Endpoints<Out, In>) {
	match chain.get(index) {
		Some(interceptor) => interceptor.inbound(part, &Context { chain, index, ends }),
		None => ends.to_application(part),
	}
}

fn error_at<Out, In>(chain: &[Arc<dyn Interceptor<Out, In>>], index: usize, error: Error, ends: &dyn Endpoints<Out, In>) {
	match chain.get(index) {
		Some(interceptor) => interceptor.inbound_error(error, &Context { chain, index, ends }),
		None => ends.fail_application(error),
	}
}

/// Immutable, cheaply cloneable interceptor list.
pub struct InterceptorChain<Out, In> {
	interceptors: Arc<[Arc<dyn Interceptor<Out, In>>]>,
}

impl<Out, In> InterceptorChain<Out, In> {
	/// Builds a chain; `interceptors[0]` sits nearest the transport.
	pub fn new(interceptors: Vec<Arc<dyn Interceptor<Out, In>>>) -> Self {
		Self {
			interceptors: interceptors.into(),
		}
	}

	pub fn empty() -> Self {
		Self::new(Vec::new())
	}

	/// Returns a new chain with `interceptor` appended on the application side.
	pub fn with(&self, interceptor: impl Interceptor<Out, In> + 'static) -> Self {
		let mut list = self.interceptors.to_vec();
		list.push(Arc::new(interceptor));
		Self::new(list)
	}

	pub fn len(&self) -> usize {
		self.interceptors.len()
	}

	pub fn is_empty(&self) -> bool {
		self.interceptors.is_empty()
	}

	/// Runs an application-originated part toward the transport.
	pub(crate) fn send(&self, part: Out, ends: &dyn Endpoints<Out, In>) {
		outbound_below(&self.interceptors, self.interceptors.len(), part, ends);
	}

	/// Runs a transport-originated part toward the application.
	pub(crate) fn receive(&self, part: In, ends: &dyn Endpoints<Out, In>) {
		inbound_at(&self.interceptors, 0, part, ends);
	}

	/// Runs a transport-originated error toward the application.
	pub(crate) fn fail(&self, error: Error, ends: &dyn Endpoints<Out, In>) {
		error_at(&self.interceptors, 0, error, ends);
	}
}

impl<Out, In> Clone for InterceptorChain<Out, In> {
	fn clone(&self) -> Self {
		Self {
			interceptors: Arc::clone(&self.interceptors),
		}
	}
}

impl<Out, In> Default for InterceptorChain<Out, In> {
	fn default() -> Self {
		Self::empty()
	}
}

impl<Out, In> fmt::Debug for InterceptorChain<Out, In> {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("InterceptorChain").field("len", &self.len()).finish()
	}
}

/// Appends fixed headers to the outgoing `Metadata` part.
///
/// On a client these are request headers; on a server, response headers.
#[derive(Debug, Clone, Default)]
pub struct HeaderInjector {
	headers: Metadata,
}

impl HeaderInjector {
	pub fn new(headers: Metadata) -> Self {
		Self { headers }
	}
}

impl<Req, Resp> Interceptor<RequestPart<Req>, ResponsePart<Resp>> for HeaderInjector
where
	Req: Send + 'static,
	Resp: Send + 'static,
{
	fn outbound(&self, part: RequestPart<Req>, cx: &Context<'_, RequestPart<Req>, ResponsePart<Resp>>) {
		match part {
			RequestPart::Metadata(mut metadata) => {
				metadata.extend_from(&self.headers);
				cx.send(RequestPart::Metadata(metadata));
			}
			other => cx.send(other),
		}
	}
}

impl<Req, Resp> Interceptor<ResponsePart<Resp>, RequestPart<Req>> for HeaderInjector
where
	Req: Send + 'static,
	Resp: Send + 'static,
{
	fn outbound(&self, part: ResponsePart<Resp>, cx: &Context<'_, ResponsePart<Resp>, RequestPart<Req>>) {
		match part {
			ResponsePart::Metadata(mut metadata) => {
				metadata.extend_from(&self.headers);
				cx.send(ResponsePart::Metadata(metadata));
			}
			other => cx.send(other),
		}
	}
}

/// Logs every part passing through at `trace` level.
#[derive(Debug, Clone, Copy, Default)]
pub struct PartLogger;

impl<Req, Resp> Interceptor<RequestPart<Req>, ResponsePart<Resp>> for PartLogger
where
	Req: Send + 'static,
	Resp: Send + 'static,
{
	fn outbound(&self, part: RequestPart<Req>, cx: &Context<'_, RequestPart<Req>, ResponsePart<Resp>>) {
		tracing::trace!(path = cx.path(), kind = part.kind(), "rpc.client.request_part");
		cx.send(part);
	}

	fn inbound(&self, part: ResponsePart<Resp>, cx: &Context<'_, RequestPart<Req>, ResponsePart<Resp>>) {
		tracing::trace!(path = cx.path(), kind = part.kind(), "rpc.client.response_part");
		cx.receive(part);
	}

	fn inbound_error(&self, error: Error, cx: &Context<'_, RequestPart<Req>, ResponsePart<Resp>>) {
		tracing::trace!(path = cx.path(), %error, "rpc.client.response_error");
		cx.fail(error);
	}
}

impl<Req, Resp> Interceptor<ResponsePart<Resp>, RequestPart<Req>> for PartLogger
where
	Req: Send + 'static,
	Resp: Send + 'static,
{
	fn outbound(&self, part: ResponsePart<Resp>, cx: &Context<'_, ResponsePart<Resp>, RequestPart<Req>>) {
		tracing::trace!(path = cx.path(), kind = part.kind(), "rpc.server.response_part");
		cx.send(part);
	}

	fn inbound(&self, part: RequestPart<Req>, cx: &Context<'_, ResponsePart<Resp>, RequestPart<Req>>) {
		tracing::trace!(path = cx.path(), kind = part.kind(), "rpc.server.request_part");
		cx.receive(part);
	}

	fn inbound_error(&self, error: Error, cx: &Context<'_, ResponsePart<Resp>, RequestPart<Req>>) {
		tracing::trace!(path = cx.path(), %error, "rpc.server.request_error");
		cx.fail(error);
	}
}

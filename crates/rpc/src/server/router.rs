use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

use futures::FutureExt;

use super::ServiceProvider;
use super::context::{CallHandlerContext, ServerCallContext};
use super::handler::{Method, ServerCall, ServerHandler};
use super::writer::ResponseStreamWriter;
use crate::codec::{Codec, CodecPair, JsonCodec};
use crate::error::Result;
use crate::interceptor::ServerInterceptors;
use crate::stream::MessageStream;
use crate::transport::CallType;

/// A handler function bound to its shape and server-side interceptors.
pub struct Route<Req, Resp> {
	method: Method<Req, Resp>,
	interceptors: ServerInterceptors<Req, Resp>,
}

impl<Req: Send + 'static, Resp: Send + 'static> Route<Req, Resp> {
	pub fn unary<F, Fut>(handler: F) -> Self
	where
		F: Fn(Req, ServerCallContext) -> Fut + Send + Sync + 'static,
		Fut: Future<Output = Result<Resp>> + Send + 'static,
	{
		Self::from_method(Method::Unary(Arc::new(move |request: Req, context: ServerCallContext| handler(request, context).boxed())))
	}

	pub fn server_streaming<F, Fut>(handler: F) -> Self
	where
		F: Fn(Req, ResponseStreamWriter<Resp>, ServerCallContext) -> Fut + Send + Sync + 'static,
		Fut: Future<Output = Result<()>> + Send + 'static,
	{
		Self::from_method(Method::ServerStreaming(Arc::new(move |request: Req, writer: ResponseStreamWriter<Resp>, context: ServerCallContext| {
			handler(request, writer, context).boxed()
		})))
	}

	pub fn client_streaming<F, Fut>(handler: F) -> Self
	where
		F: Fn(MessageStream<Req>, ServerCallContext) -> Fut + Send + Sync + 'static,
		Fut: Future<Output = Result<Resp>> + Send + 'static,
	{
		Self::from_method(Method::ClientStreaming(Arc::new(move |requests: MessageStream<Req>, context: ServerCallContext| handler(requests, context).boxed())))
	}

	pub fn bidirectional_streaming<F, Fut>(handler: F) -> Self
	where
		F: Fn(MessageStream<Req>, ResponseStreamWriter<Resp>, ServerCallContext) -> Fut + Send + Sync + 'static,
		Fut: Future<Output = Result<()>> + Send + 'static,
	{
		Self::from_method(Method::Bidirectional(Arc::new(move |requests: MessageStream<Req>, writer: ResponseStreamWriter<Resp>, context: ServerCallContext| {
			handler(requests, writer, context).boxed()
		})))
	}

	fn from_method(method: Method<Req, Resp>) -> Self {
		Self {
			method,
			interceptors: ServerInterceptors::empty(),
		}
	}

	/// Runs every call of this route through `interceptors`.
	pub fn with_interceptors(mut self, interceptors: ServerInterceptors<Req, Resp>) -> Self {
		self.interceptors = interceptors;
		self
	}
}

impl<Req, Resp> Route<Req, Resp> {
	pub fn call_type(&self) -> CallType {
		match self.method {
			Method::Unary(_) => CallType::Unary,
			Method::ServerStreaming(_) => CallType::ServerStreaming,
			Method::ClientStreaming(_) => CallType::ClientStreaming,
			Method::Bidirectional(_) => CallType::BidirectionalStreaming,
		}
	}
}

impl<Req, Resp> fmt::Debug for Route<Req, Resp> {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("Route")
			.field("call_type", &self.call_type())
			.field("interceptors", &self.interceptors)
			.finish_non_exhaustive()
	}
}

/// Type-erased route that builds one [`ServerHandler`] per inbound call.
trait MethodFactory: Send + Sync + 'static {
	fn make(&self, context: CallHandlerContext) -> Box<dyn ServerHandler>;
}

struct Registered<Req, Resp> {
	route: Route<Req, Resp>,
	codecs: CodecPair<Req, Resp>,
}

impl<Req: Send + 'static, Resp: Send + 'static> MethodFactory for Registered<Req, Resp> {
	fn make(&self, context: CallHandlerContext) -> Box<dyn ServerHandler> {
		Box::new(ServerCall::new(
			context,
			self.route.method.clone(),
			self.route.interceptors.clone(),
			self.codecs.clone(),
		))
	}
}

/// [`ServiceProvider`] mapping method names to routes.
///
/// Routes capture the router's codec when they are added.
pub struct ServiceRouter<K = JsonCodec> {
	name: String,
	codec: K,
	methods: HashMap<String, Arc<dyn MethodFactory>>,
}

impl ServiceRouter {
	pub fn new(name: impl Into<String>) -> Self {
		Self {
			name: name.into(),
			codec: JsonCodec,
			methods: HashMap::new(),
		}
	}
}

impl<K: Clone + Send + Sync + 'static> ServiceRouter<K> {
	pub fn with_codec<K2>(self, codec: K2) -> ServiceRouter<K2> {
		ServiceRouter {
			name: self.name,
			codec,
			methods: self.methods,
		}
	}

	/// Registers `route` under `method`, replacing any previous route of that name.
	pub fn route<Req, Resp>(mut self, method: impl Into<String>, route: Route<Req, Resp>) -> Self
	where
		K: Codec<Req> + Codec<Resp>,
		Req: Send + 'static,
		Resp: Send + 'static,
	{
		let method = method.into();
		tracing::debug!(service = %self.name, method = %method, call_type = route.call_type().as_str(), "rpc.server.route_registered");
		let registered = Registered {
			route,
			codecs: CodecPair::new(self.codec.clone()),
		};
		self.methods.insert(method, Arc::new(registered));
		self
	}

	pub fn unary<Req, Resp, F, Fut>(self, method: impl Into<String>, handler: F) -> Self
	where
		K: Codec<Req> + Codec<Resp>,
		Req: Send + 'static,
		Resp: Send + 'static,
		F: Fn(Req, ServerCallContext) -> Fut + Send + Sync + 'static,
		Fut: Future<Output = Result<Resp>> + Send + 'static,
	{
		self.route(method, Route::unary(handler))
	}

	pub fn server_streaming<Req, Resp, F, Fut>(self, method: impl Into<String>, handler: F) -> Self
	where
		K: Codec<Req> + Codec<Resp>,
		Req: Send + 'static,
		Resp: Send + 'static,
		F: Fn(Req, ResponseStreamWriter<Resp>, ServerCallContext) -> Fut + Send + Sync + 'static,
		Fut: Future<Output = Result<()>> + Send + 'static,
	{
		self.route(method, Route::server_streaming(handler))
	}

	pub fn client_streaming<Req, Resp, F, Fut>(self, method: impl Into<String>, handler: F) -> Self
	where
		K: Codec<Req> + Codec<Resp>,
		Req: Send + 'static,
		Resp: Send + 'static,
		F: Fn(MessageStream<Req>, ServerCallContext) -> Fut + Send + Sync + 'static,
		Fut: Future<Output = Result<Resp>> + Send + 'static,
	{
		self.route(method, Route::client_streaming(handler))
	}

	pub fn bidirectional_streaming<Req, Resp, F, Fut>(self, method: impl Into<String>, handler: F) -> Self
	where
		K: Codec<Req> + Codec<Resp>,
		Req: Send + 'static,
		Resp: Send + 'static,
		F: Fn(MessageStream<Req>, ResponseStreamWriter<Resp>, ServerCallContext) -> Fut + Send + Sync + 'static,
		Fut: Future<Output = Result<()>> + Send + 'static,
	{
		self.route(method, Route::bidirectional_streaming(handler))
	}
}

impl<K: Send + Sync + 'static> ServiceProvider for ServiceRouter<K> {
	fn service_name(&self) -> &str {
		&self.name
	}

	fn handle(&self, method: &str, context: CallHandlerContext) -> Option<Box<dyn ServerHandler>> {
		let factory = self.methods.get(method)?;
		Some(factory.make(context))
	}
}

impl<K> ServiceRouter<K> {
	/// Names of the registered methods, in no particular order.
	pub fn methods(&self) -> impl Iterator<Item = &str> {
		self.methods.keys().map(String::as_str)
	}
}

impl<K> fmt::Debug for ServiceRouter<K> {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		let mut methods: Vec<&str> = self.methods().collect();
		methods.sort_unstable();
		f.debug_struct("ServiceRouter").field("name", &self.name).field("methods", &methods).finish()
	}
}

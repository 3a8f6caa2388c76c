//! Server side of the call layer.
//!
//! A [`Server`] routes each inbound call by its `/service/method` path to a
//! [`ServiceProvider`], which builds a [`ServerHandler`] for it. Handlers
//! built by [`ServiceRouter`] drive one user function per call on a
//! cancellable worker task.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::metadata::Metadata;
use crate::options::ServerConfig;
use crate::part::ResponsePart;
use crate::status::{Code, Status};

mod context;
mod handler;
mod router;
mod writer;

pub use context::{CallHandlerContext, ServerCallContext};
pub use handler::ServerHandler;
pub use router::{Route, ServiceRouter};
pub use writer::ResponseStreamWriter;

#[cfg(test)]
mod tests;

/// A named group of methods.
pub trait ServiceProvider: Send + Sync + 'static {
	fn service_name(&self) -> &str;

	/// Builds the handler for `method`, or `None` if the service has no such method.
	fn handle(&self, method: &str, context: CallHandlerContext) -> Option<Box<dyn ServerHandler>>;
}

/// Registry of services keyed by name.
pub struct Server {
	services: HashMap<String, Arc<dyn ServiceProvider>>,
	config: ServerConfig,
}

impl Server {
	pub fn new(config: ServerConfig) -> Self {
		Self {
			services: HashMap::new(),
			config,
		}
	}

	pub fn with_service(mut self, provider: impl ServiceProvider) -> Self {
		self.add_service(provider);
		self
	}

	/// Registers `provider`, replacing a service of the same name.
	pub fn add_service(&mut self, provider: impl ServiceProvider) {
		let name = provider.service_name().to_string();
		if self.services.insert(name.clone(), Arc::new(provider)).is_some() {
			tracing::warn!(service = %name, "rpc.server.service_replaced");
		}
	}

	pub fn config(&self) -> &ServerConfig {
		&self.config
	}

	/// Looks up the handler for `path` without side effects.
	pub fn handle(&self, path: &str, context: CallHandlerContext) -> Option<Box<dyn ServerHandler>> {
		let (service, method) = split_path(path)?;
		self.services.get(service)?.handle(method, context)
	}

	/// Like [`handle`](Self::handle), but answers unknown paths with
	/// `Unimplemented` on the call's transport.
	pub fn dispatch(&self, path: &str, context: CallHandlerContext) -> Option<Box<dyn ServerHandler>> {
		let transport = Arc::clone(&context.transport);
		let handler = self.handle(path, context);
		if handler.is_none() {
			tracing::debug!(path, "rpc.server.method_not_found");
			let end = ResponsePart::End(Status::new(Code::Unimplemented, "method not found"), Metadata::new());
			// Nothing is waiting on this call server side.
			drop(transport.send(end));
		}
		handler
	}
}

impl fmt::Debug for Server {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		let mut services: Vec<&str> = self.services.keys().map(String::as_str).collect();
		services.sort_unstable();
		f.debug_struct("Server").field("services", &services).field("config", &self.config).finish()
	}
}

/// Splits `/service/method` into its parts.
fn split_path(path: &str) -> Option<(&str, &str)> {
	let (service, method) = path.strip_prefix('/')?.split_once('/')?;
	let valid = !service.is_empty() && !method.is_empty() && !method.contains('/');
	valid.then_some((service, method))
}

//! In-process transport connecting a [`Client`](crate::client::Client) to a [`Server`].
//!
//! Each call gets two transport tasks: one feeding request parts to the
//! server handler, one delivering response parts to the client. Parts are
//! accepted once the far side has consumed them.

use std::fmt;
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::Mutex;
use strand_worker::TaskClass;
use tokio::sync::mpsc;

use crate::error::{Error, Result};
use crate::options::CallOptions;
use crate::part::{RequestPart, ResponsePart};
use crate::server::{CallHandlerContext, Server};
use crate::transport::{Acceptance, AcceptanceSignal, CallType, Channel, ResponseHandler, ServerTransport, TransportCall};

enum ToServer {
	Part(RequestPart<Bytes>, AcceptanceSignal),
	Cancel(AcceptanceSignal),
}

type ToClient = (ResponsePart<Bytes>, AcceptanceSignal);

/// [`Channel`] whose calls are served by a [`Server`] in the same process.
#[derive(Clone)]
pub struct LocalChannel {
	server: Arc<Server>,
}

impl LocalChannel {
	pub fn new(server: Server) -> Self {
		Self { server: Arc::new(server) }
	}

	pub fn from_shared(server: Arc<Server>) -> Self {
		Self { server }
	}

	pub fn server(&self) -> &Arc<Server> {
		&self.server
	}
}

impl Channel for LocalChannel {
	fn make_call(&self, path: &str, call_type: CallType, options: CallOptions) -> Arc<dyn TransportCall> {
		Arc::new(LocalCall {
			server: Arc::clone(&self.server),
			path: path.to_string(),
			call_type,
			options,
			link: Arc::new(Mutex::new(Link::default())),
		})
	}
}

impl fmt::Debug for LocalChannel {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("LocalChannel").field("server", &self.server).finish()
	}
}

#[derive(Default)]
struct Link {
	invoked: bool,
	/// Dropped once the call is over in either direction, which stops the server task.
	to_server: Option<mpsc::UnboundedSender<ToServer>>,
}

struct LocalCall {
	server: Arc<Server>,
	path: String,
	call_type: CallType,
	options: CallOptions,
	link: Arc<Mutex<Link>>,
}

impl TransportCall for LocalCall {
	fn path(&self) -> &str {
		&self.path
	}

	fn call_type(&self) -> CallType {
		self.call_type
	}

	fn options(&self) -> &CallOptions {
		&self.options
	}

	fn invoke(&self, handler: Arc<dyn ResponseHandler>) -> Result<()> {
		let (to_server, from_client) = mpsc::unbounded_channel();
		let (to_client, from_server) = mpsc::unbounded_channel();
		{
			let mut link = self.link.lock();
			if link.invoked {
				return Err(Error::AlreadyInvoked);
			}
			link.invoked = true;
			link.to_server = Some(to_server);
		}

		let transport = Arc::new(LocalServerTransport {
			to_client,
			compression: self.server.config().compression_enabled,
		});
		let context = CallHandlerContext {
			path: self.path.clone(),
			transport,
		};
		strand_worker::spawn_detached(TaskClass::Transport, serve(Arc::clone(&self.server), context, from_client));
		strand_worker::spawn_detached(TaskClass::Transport, deliver(handler, from_server, Arc::clone(&self.link)));
		Ok(())
	}

	fn send(&self, part: RequestPart<Bytes>) -> Acceptance {
		let link = self.link.lock();
		let Some(to_server) = &link.to_server else {
			let reason = if link.invoked { "call is closed" } else { "call was not invoked" };
			return Acceptance::rejected(Error::Transport(reason.into()));
		};
		let (signal, acceptance) = Acceptance::pending();
		// On a closed channel the signal is dropped, which rejects the acceptance.
		let _ = to_server.send(ToServer::Part(part, signal));
		acceptance
	}

	fn cancel(&self) -> Acceptance {
		let Some(to_server) = self.link.lock().to_server.take() else {
			return Acceptance::accepted();
		};
		let (signal, acceptance) = Acceptance::pending();
		match to_server.send(ToServer::Cancel(signal)) {
			Ok(()) => acceptance,
			Err(_) => Acceptance::accepted(),
		}
	}
}

async fn serve(server: Arc<Server>, context: CallHandlerContext, mut from_client: mpsc::UnboundedReceiver<ToServer>) {
	let path = context.path.clone();
	let handler = server.dispatch(&path, context);
	while let Some(event) = from_client.recv().await {
		match event {
			ToServer::Part(part, signal) => {
				if let Some(handler) = &handler {
					handler.receive(part);
				}
				signal.accept();
			}
			ToServer::Cancel(signal) => {
				tracing::debug!(path = %path, "rpc.local.cancel");
				if let Some(handler) = &handler {
					handler.receive_error(Error::Cancelled);
				}
				signal.accept();
			}
		}
	}
	tracing::trace!(path = %path, "rpc.local.server_side_closed");
}

async fn deliver(handler: Arc<dyn ResponseHandler>, mut from_server: mpsc::UnboundedReceiver<ToClient>, link: Arc<Mutex<Link>>) {
	while let Some((part, signal)) = from_server.recv().await {
		let is_end = matches!(part, ResponsePart::End(..));
		handler.on_part(part);
		signal.accept();
		if is_end {
			link.lock().to_server = None;
			return;
		}
	}
	handler.on_error(Error::Transport("server closed the call without a status".into()));
}

struct LocalServerTransport {
	to_client: mpsc::UnboundedSender<ToClient>,
	compression: bool,
}

impl ServerTransport for LocalServerTransport {
	fn send(&self, part: ResponsePart<Bytes>) -> Acceptance {
		let (signal, acceptance) = Acceptance::pending();
		if self.to_client.send((part, signal)).is_err() {
			tracing::trace!("rpc.local.client_gone");
		}
		acceptance
	}

	fn compression_enabled(&self) -> bool {
		self.compression
	}
}

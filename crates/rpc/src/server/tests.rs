use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use bytes::Bytes;
use parking_lot::Mutex;
use pretty_assertions::assert_eq;
use tokio::sync::{Notify, mpsc};

use super::*;
use crate::error::Error;
use crate::interceptor::{Context, HeaderInjector, Interceptor, ServerInterceptors};
use crate::metadata::{Compression, MessageMetadata};
use crate::part::{RequestPart, ResponsePart};
use crate::stream::MessageStream;
use crate::transport::{Acceptance, CallType, ServerTransport};

/// What the transport saw, with payloads decoded.
#[derive(Debug, Clone, PartialEq)]
enum Seen {
	Headers(Metadata),
	Message(String, bool),
	End(Status, Metadata),
}

#[derive(Default)]
struct RecordingTransport {
	compression: bool,
	seen: Mutex<Vec<Seen>>,
	changed: Notify,
}

impl RecordingTransport {
	fn new() -> Arc<Self> {
		Arc::new(Self::default())
	}

	fn with_compression() -> Arc<Self> {
		Arc::new(Self {
			compression: true,
			..Self::default()
		})
	}

	fn seen(&self) -> Vec<Seen> {
		self.seen.lock().clone()
	}

	async fn wait_until(&self, done: impl Fn(&[Seen]) -> bool) -> Vec<Seen> {
		tokio::time::timeout(Duration::from_secs(2), async {
			loop {
				if done(&self.seen.lock()) {
					return self.seen();
				}
				self.changed.notified().await;
			}
		})
		.await
		.expect("transport did not see the expected parts")
	}

	async fn wait_for_end(&self) -> Vec<Seen> {
		self.wait_until(|seen| matches!(seen.last(), Some(Seen::End(..)))).await
	}
}

impl ServerTransport for RecordingTransport {
	fn send(&self, part: ResponsePart<Bytes>) -> Acceptance {
		let seen = match part {
			ResponsePart::Metadata(headers) => Seen::Headers(headers),
			ResponsePart::Message(payload, metadata) => Seen::Message(serde_json::from_slice(&payload).unwrap(), metadata.compress),
			ResponsePart::End(status, trailers) => Seen::End(status, trailers),
		};
		self.seen.lock().push(seen);
		self.changed.notify_one();
		Acceptance::accepted()
	}

	fn compression_enabled(&self) -> bool {
		self.compression
	}
}

fn context(transport: &Arc<RecordingTransport>, path: &str) -> CallHandlerContext {
	CallHandlerContext {
		path: path.to_string(),
		transport: Arc::clone(transport) as Arc<dyn ServerTransport>,
	}
}

fn encoded(text: &str) -> RequestPart<Bytes> {
	RequestPart::Message(Bytes::from(serde_json::to_vec(text).unwrap()), MessageMetadata::default())
}

fn headers() -> RequestPart<Bytes> {
	RequestPart::Metadata(Metadata::new().with("x-user", "alice"))
}

fn end(code: Code, message: &str) -> Seen {
	Seen::End(Status::new(code, message), Metadata::new())
}

fn echo_router() -> ServiceRouter {
	ServiceRouter::new("echo.Echo")
		.unary("Get", |request: String, context: ServerCallContext| async move {
			context.insert_response_header("x-served-by", "unit");
			context.insert_trailer("x-user-seen", context.headers().get("x-user").unwrap_or("nobody"));
			Ok(format!("get: {request}"))
		})
		.server_streaming("Expand", |request: String, writer: ResponseStreamWriter<String>, _context| async move {
			for word in request.split_whitespace() {
				writer.send_response(format!("expand: {word}")).await?;
			}
			Ok(())
		})
		.client_streaming("Collect", |mut requests: MessageStream<String>, _context| async move {
			let mut words = Vec::new();
			while let Some(word) = requests.message().await? {
				words.push(word);
			}
			Ok(format!("collect: {}", words.join(" ")))
		})
		.bidirectional_streaming(
			"Update",
			|mut requests: MessageStream<String>, writer: ResponseStreamWriter<String>, _context| async move {
				while let Some(word) = requests.message().await? {
					writer.send_response(format!("update: {word}")).await?;
				}
				Ok(())
			},
		)
}

fn server() -> Server {
	Server::new(ServerConfig::default()).with_service(echo_router())
}

#[tokio::test]
async fn unary_reply_carries_staged_headers_and_trailers() {
	let transport = RecordingTransport::new();
	let handler = server().dispatch("/echo.Echo/Get", context(&transport, "/echo.Echo/Get")).unwrap();

	handler.receive(headers());
	handler.receive(encoded("hello"));
	handler.receive(RequestPart::End);

	let seen = transport.wait_for_end().await;
	assert_eq!(
		seen,
		vec![
			Seen::Headers(Metadata::new().with("x-served-by", "unit")),
			Seen::Message("get: hello".to_string(), false),
			Seen::End(Status::OK, Metadata::new().with("x-user-seen", "alice")),
		]
	);
}

#[tokio::test]
async fn server_streaming_sends_each_response_in_order() {
	let transport = RecordingTransport::new();
	let handler = server().dispatch("/echo.Echo/Expand", context(&transport, "/echo.Echo/Expand")).unwrap();

	handler.receive(headers());
	handler.receive(encoded("a b c"));
	handler.receive(RequestPart::End);

	let seen = transport.wait_for_end().await;
	assert_eq!(
		seen,
		vec![
			Seen::Headers(Metadata::new()),
			Seen::Message("expand: a".to_string(), false),
			Seen::Message("expand: b".to_string(), false),
			Seen::Message("expand: c".to_string(), false),
			Seen::End(Status::OK, Metadata::new()),
		]
	);
}

#[tokio::test]
async fn client_streaming_collects_until_end() {
	let transport = RecordingTransport::new();
	let handler = server().dispatch("/echo.Echo/Collect", context(&transport, "/echo.Echo/Collect")).unwrap();

	handler.receive(headers());
	for word in ["foo", "bar", "baz"] {
		handler.receive(encoded(word));
	}
	handler.receive(RequestPart::End);

	let seen = transport.wait_for_end().await;
	assert_eq!(seen[1], Seen::Message("collect: foo bar baz".to_string(), false));
	assert_eq!(seen[2], Seen::End(Status::OK, Metadata::new()));
}

#[tokio::test]
async fn bidirectional_answers_before_request_end() {
	let transport = RecordingTransport::new();
	let handler = server().dispatch("/echo.Echo/Update", context(&transport, "/echo.Echo/Update")).unwrap();

	handler.receive(headers());
	handler.receive(encoded("one"));
	let seen = transport.wait_until(|seen| seen.len() == 2).await;
	assert_eq!(seen[1], Seen::Message("update: one".to_string(), false));

	handler.receive(encoded("two"));
	handler.receive(RequestPart::End);
	let seen = transport.wait_for_end().await;
	assert_eq!(seen.len(), 4);
	assert_eq!(seen[2], Seen::Message("update: two".to_string(), false));
}

fn guarded_unary(invoked: &Arc<AtomicBool>) -> Server {
	let invoked = Arc::clone(invoked);
	let router = ServiceRouter::new("guard.Guard").unary("Check", move |request: String, _context| {
		invoked.store(true, Ordering::SeqCst);
		async move { Ok(request) }
	});
	Server::new(ServerConfig::default()).with_service(router)
}

#[tokio::test]
async fn unary_with_two_messages_fails_without_invoking() {
	let transport = RecordingTransport::new();
	let invoked = Arc::new(AtomicBool::new(false));
	let handler = guarded_unary(&invoked).dispatch("/guard.Guard/Check", context(&transport, "/guard.Guard/Check")).unwrap();

	handler.receive(headers());
	handler.receive(encoded("one"));
	handler.receive(encoded("two"));
	handler.receive(RequestPart::End);

	let seen = transport.wait_for_end().await;
	assert_eq!(
		seen.last(),
		Some(&end(Code::FailedPrecondition, "unary method received more than one request message"))
	);
	assert!(!invoked.load(Ordering::SeqCst));
}

#[tokio::test]
async fn unary_without_message_fails_without_invoking() {
	let transport = RecordingTransport::new();
	let invoked = Arc::new(AtomicBool::new(false));
	let handler = guarded_unary(&invoked).dispatch("/guard.Guard/Check", context(&transport, "/guard.Guard/Check")).unwrap();

	handler.receive(headers());
	handler.receive(RequestPart::End);

	let seen = transport.wait_for_end().await;
	assert_eq!(seen.last(), Some(&end(Code::FailedPrecondition, "unary method received no request message")));
	assert!(!invoked.load(Ordering::SeqCst));
}

#[tokio::test]
async fn message_before_headers_is_rejected() {
	let transport = RecordingTransport::new();
	let invoked = Arc::new(AtomicBool::new(false));
	let handler = guarded_unary(&invoked).dispatch("/guard.Guard/Check", context(&transport, "/guard.Guard/Check")).unwrap();

	handler.receive(encoded("early"));

	let seen = transport.wait_for_end().await;
	assert_eq!(seen, vec![Seen::Headers(Metadata::new()), end(Code::FailedPrecondition, "request part before request headers")]);
	assert!(!invoked.load(Ordering::SeqCst));
}

#[tokio::test]
async fn handler_error_becomes_final_status() {
	let transport = RecordingTransport::new();
	let router = ServiceRouter::new("store.Store").unary("Fetch", |_request: String, _context| async move {
		Err::<String, Error>(Status::new(Code::NotFound, "no such key").into())
	});
	let server = Server::new(ServerConfig::default()).with_service(router);
	let handler = server.dispatch("/store.Store/Fetch", context(&transport, "/store.Store/Fetch")).unwrap();

	handler.receive(headers());
	handler.receive(encoded("k"));
	handler.receive(RequestPart::End);

	let seen = transport.wait_for_end().await;
	assert_eq!(seen, vec![Seen::Headers(Metadata::new()), end(Code::NotFound, "no such key")]);
}

#[tokio::test]
async fn unknown_method_is_unimplemented() {
	let transport = RecordingTransport::new();
	let server = server();

	assert!(server.dispatch("/echo.Echo/Missing", context(&transport, "/echo.Echo/Missing")).is_none());
	assert_eq!(transport.seen(), vec![end(Code::Unimplemented, "method not found")]);

	let quiet = RecordingTransport::new();
	assert!(server.handle("/other.Service/Get", context(&quiet, "/other.Service/Get")).is_none());
	assert!(quiet.seen().is_empty());
}

#[test]
fn paths_split_into_service_and_method() {
	assert_eq!(split_path("/echo.Echo/Get"), Some(("echo.Echo", "Get")));
	assert_eq!(split_path("echo.Echo/Get"), None);
	assert_eq!(split_path("/echo.Echo"), None);
	assert_eq!(split_path("//Get"), None);
	assert_eq!(split_path("/a/b/c"), None);
}

#[test]
fn router_debug_lists_sorted_methods() {
	let rendered = format!("{:?}", echo_router());
	assert_eq!(rendered, r#"ServiceRouter { name: "echo.Echo", methods: ["Collect", "Expand", "Get", "Update"] }"#);

	let route = Route::client_streaming(|_requests: MessageStream<String>, _context: ServerCallContext| async move { Ok::<_, Error>(String::new()) });
	assert_eq!(route.call_type(), CallType::ClientStreaming);
	assert!(format!("{route:?}").starts_with("Route { call_type: ClientStreaming"));
}

#[tokio::test]
async fn inbound_error_cancels_handler_and_suppresses_output() {
	let transport = RecordingTransport::new();
	let (contexts_tx, mut contexts) = mpsc::unbounded_channel();
	let router = ServiceRouter::new("wait.Wait").bidirectional_streaming(
		"Forever",
		move |_requests: MessageStream<String>, _writer: ResponseStreamWriter<String>, context: ServerCallContext| {
			let _ = contexts_tx.send(context.clone());
			async move {
				context.cancelled().await;
				Ok(())
			}
		},
	);
	let server = Server::new(ServerConfig::default()).with_service(router);
	let handler = server.dispatch("/wait.Wait/Forever", context(&transport, "/wait.Wait/Forever")).unwrap();

	handler.receive(headers());
	let call_context = contexts.recv().await.unwrap();
	assert!(!call_context.is_cancelled());

	handler.receive_error(Error::Cancelled);
	tokio::time::timeout(Duration::from_secs(2), call_context.cancelled()).await.unwrap();
	tokio::time::sleep(Duration::from_millis(20)).await;
	assert!(transport.seen().is_empty());
}

#[tokio::test]
async fn writer_fails_after_call_ended() {
	let transport = RecordingTransport::new();
	let (writers_tx, mut writers) = mpsc::unbounded_channel();
	let router = ServiceRouter::new("leak.Leak").server_streaming(
		"Keep",
		move |_request: String, writer: ResponseStreamWriter<String>, _context: ServerCallContext| {
			let _ = writers_tx.send(writer);
			async move { Ok(()) }
		},
	);
	let server = Server::new(ServerConfig::default()).with_service(router);
	let handler = server.dispatch("/leak.Leak/Keep", context(&transport, "/leak.Leak/Keep")).unwrap();

	handler.receive(headers());
	handler.receive(encoded("x"));
	handler.receive(RequestPart::End);
	transport.wait_for_end().await;

	let writer = writers.recv().await.unwrap();
	assert_eq!(writer.send_response("late".to_string()).await, Err(Error::StreamAlreadyClosed));
}

async fn compressed_flag(transport: &Arc<RecordingTransport>, disable_for_call: bool, compression: Compression) -> bool {
	let router = ServiceRouter::new("zip.Zip").server_streaming(
		"One",
		move |request: String, writer: ResponseStreamWriter<String>, context: ServerCallContext| async move {
			if disable_for_call {
				context.set_compression_enabled(false);
			}
			writer.send_response_with(request, compression).await
		},
	);
	let server = Server::new(ServerConfig::default()).with_service(router);
	let handler = server.dispatch("/zip.Zip/One", context(transport, "/zip.Zip/One")).unwrap();
	handler.receive(headers());
	handler.receive(encoded("payload"));
	handler.receive(RequestPart::End);

	let seen = transport.wait_for_end().await;
	match &seen[1] {
		Seen::Message(_, compressed) => *compressed,
		other => panic!("expected a message, got {other:?}"),
	}
}

#[tokio::test]
async fn compression_needs_server_and_call_consent() {
	assert!(compressed_flag(&RecordingTransport::with_compression(), false, Compression::Enabled).await);
	assert!(compressed_flag(&RecordingTransport::with_compression(), false, Compression::DeferToCallDefault).await);
	assert!(!compressed_flag(&RecordingTransport::with_compression(), false, Compression::Disabled).await);
	assert!(!compressed_flag(&RecordingTransport::with_compression(), true, Compression::Enabled).await);
	assert!(!compressed_flag(&RecordingTransport::new(), false, Compression::Enabled).await);
}

#[tokio::test]
async fn route_interceptors_see_response_headers() {
	let transport = RecordingTransport::new();
	let interceptors = ServerInterceptors::<String, String>::empty().with(HeaderInjector::new(Metadata::new().with("x-trace", "t-1")));
	let route = Route::unary(|request: String, _context| async move { Ok::<_, Error>(request) }).with_interceptors(interceptors);
	let server = Server::new(ServerConfig::default()).with_service(ServiceRouter::new("echo.Echo").route("Get", route));
	let handler = server.dispatch("/echo.Echo/Get", context(&transport, "/echo.Echo/Get")).unwrap();

	handler.receive(headers());
	handler.receive(encoded("hi"));
	handler.receive(RequestPart::End);

	let seen = transport.wait_for_end().await;
	assert_eq!(seen[0], Seen::Headers(Metadata::new().with("x-trace", "t-1")));
}

#[tokio::test]
async fn undecodable_request_fails_the_call() {
	let transport = RecordingTransport::new();
	let handler = server().dispatch("/echo.Echo/Get", context(&transport, "/echo.Echo/Get")).unwrap();

	handler.receive(headers());
	handler.receive(RequestPart::Message(Bytes::from_static(b"not json"), MessageMetadata::default()));

	let seen = transport.wait_for_end().await;
	match seen.last() {
		Some(Seen::End(status, _)) => assert_eq!(status.code(), Code::Internal),
		other => panic!("expected end, got {other:?}"),
	}
}

/// Swallows inbound errors on their way to the handler.
struct DropInboundErrors;

impl Interceptor<ResponsePart<String>, RequestPart<String>> for DropInboundErrors {
	fn inbound_error(&self, _error: Error, _cx: &Context<'_, ResponsePart<String>, RequestPart<String>>) {}
}

#[tokio::test]
async fn swallowed_inbound_error_still_cancels_handler() {
	let transport = RecordingTransport::new();
	let (contexts_tx, mut contexts) = mpsc::unbounded_channel();
	let route = Route::bidirectional_streaming(
		move |_requests: MessageStream<String>, _writer: ResponseStreamWriter<String>, context: ServerCallContext| {
			let _ = contexts_tx.send(context.clone());
			async move {
				context.cancelled().await;
				Ok(())
			}
		},
	)
	.with_interceptors(ServerInterceptors::<String, String>::empty().with(DropInboundErrors));
	let server = Server::new(ServerConfig::default()).with_service(ServiceRouter::new("wait.Wait").route("Forever", route));
	let handler = server.dispatch("/wait.Wait/Forever", context(&transport, "/wait.Wait/Forever")).unwrap();

	handler.receive(headers());
	let call_context = contexts.recv().await.unwrap();

	handler.receive_error(Error::Cancelled);
	tokio::time::timeout(Duration::from_secs(2), call_context.cancelled()).await.unwrap();
	tokio::time::sleep(Duration::from_millis(20)).await;
	assert!(transport.seen().is_empty());
}

//! End-to-end calls against an echo service over the in-process transport.

use std::time::Duration;

use futures::stream;
use pretty_assertions::assert_eq;
use strand_rpc::client::CallSetup;
use strand_rpc::{
	CallOptions, CallType, Client, ClientInterceptors, Code, Error, HeaderInjector, LocalChannel, MessageStream, Metadata, ResponseStreamWriter,
	Result, Server, ServerCallContext, ServerConfig, ServiceRouter, Status, UnaryCall,
};
use tokio::sync::mpsc;

fn echo_service(contexts: mpsc::UnboundedSender<ServerCallContext>) -> ServiceRouter {
	ServiceRouter::new("echo.Echo")
		.unary("Get", |request: String, context: ServerCallContext| async move {
			context.insert_response_header("x-served-by", "echo");
			context.insert_trailer("x-words", request.split_whitespace().count().to_string());
			Ok(format!("echo get: {request}"))
		})
		.unary("Whoami", |_request: String, context: ServerCallContext| async move {
			Ok(context.headers().get("x-token").unwrap_or("anonymous").to_string())
		})
		.unary("Fail", |_request: String, _context: ServerCallContext| async move {
			Err::<String, Error>(Status::new(Code::NotFound, "nothing here").into())
		})
		.server_streaming("Expand", |request: String, writer: ResponseStreamWriter<String>, _context| async move {
			for word in request.split_whitespace() {
				writer.send_response(format!("echo expand: {word}")).await?;
			}
			Ok(())
		})
		.client_streaming("Collect", |mut requests: MessageStream<String>, _context| async move {
			let mut words = Vec::new();
			while let Some(word) = requests.message().await? {
				words.push(word);
			}
			Ok(format!("echo collect: {}", words.join(" ")))
		})
		.bidirectional_streaming(
			"Update",
			|mut requests: MessageStream<String>, writer: ResponseStreamWriter<String>, _context| async move {
				while let Some(word) = requests.message().await? {
					writer.send_response(format!("echo update: {word}")).await?;
				}
				Ok(())
			},
		)
		.bidirectional_streaming(
			"Wait",
			move |_requests: MessageStream<String>, _writer: ResponseStreamWriter<String>, context: ServerCallContext| {
				let _ = contexts.send(context.clone());
				async move {
					context.cancelled().await;
					Ok(())
				}
			},
		)
}

struct Harness {
	client: Client<LocalChannel>,
	contexts: mpsc::UnboundedReceiver<ServerCallContext>,
}

fn harness() -> Harness {
	let _ = tracing_subscriber::fmt::try_init();
	let (contexts_tx, contexts) = mpsc::unbounded_channel();
	let server = Server::new(ServerConfig::default()).with_service(echo_service(contexts_tx));
	Harness {
		client: Client::new(LocalChannel::new(server)),
		contexts,
	}
}

async fn within<F: std::future::Future>(future: F) -> F::Output {
	tokio::time::timeout(Duration::from_secs(2), future).await.expect("timed out")
}

#[tokio::test]
async fn unary_get() {
	let Harness { client, .. } = harness();
	let call = client.make_unary_call::<String, String>("/echo.Echo/Get", "Hello".to_string(), None);

	assert_eq!(within(call.response()).await, Ok("echo get: Hello".to_string()));
	assert_eq!(within(call.initial_metadata()).await.unwrap().get("x-served-by"), Some("echo"));
	assert_eq!(within(call.trailing_metadata()).await.unwrap().get("x-words"), Some("1"));
	assert_eq!(within(call.status()).await, Status::OK);
}

#[tokio::test]
async fn server_streaming_expand() {
	let Harness { client, .. } = harness();
	let mut call = client.make_server_streaming_call::<String, String>("/echo.Echo/Expand", "foo bar baz".to_string(), None);

	let mut responses = Vec::new();
	while let Some(response) = within(call.response_stream().message()).await.unwrap() {
		responses.push(response);
	}
	assert_eq!(
		responses,
		vec!["echo expand: foo", "echo expand: bar", "echo expand: baz"]
	);
	assert_eq!(within(call.status()).await, Status::OK);
}

#[tokio::test]
async fn client_streaming_collect() {
	let Harness { client, .. } = harness();
	let call = client.make_client_streaming_call::<String, String>("/echo.Echo/Collect", None);

	call.send_messages(["foo", "bar", "baz"].map(String::from)).await.unwrap();
	call.send_end().await.unwrap();

	assert_eq!(within(call.response()).await, Ok("echo collect: foo bar baz".to_string()));
	assert_eq!(within(call.status()).await.code(), Code::Ok);
}

#[tokio::test]
async fn collect_with_forwards_a_stream() {
	let Harness { client, .. } = harness();
	let requests = stream::iter(["a", "b"].map(|word| Ok(word.to_string())));

	let response: Result<String> = within(client.collect_with("/echo.Echo/Collect", requests)).await;
	assert_eq!(response, Ok("echo collect: a b".to_string()));
}

#[tokio::test]
async fn bidirectional_update_interleaves() {
	let Harness { client, .. } = harness();
	let mut call = client.make_bidirectional_streaming_call::<String, String>("/echo.Echo/Update", None);

	call.send_message("one".to_string()).await.unwrap();
	assert_eq!(within(call.response_stream().message()).await, Ok(Some("echo update: one".to_string())));

	call.send_message("two".to_string()).await.unwrap();
	assert_eq!(within(call.response_stream().message()).await, Ok(Some("echo update: two".to_string())));

	call.send_end().await.unwrap();
	assert_eq!(within(call.response_stream().message()).await, Ok(None));
	assert_eq!(within(call.status()).await, Status::OK);
}

#[tokio::test]
async fn update_with_drains_responses() {
	let Harness { client, .. } = harness();
	let requests = stream::iter(["x", "y", "z"].map(|word| Ok(word.to_string())));
	let call = client.update_with::<String, String, _>("/echo.Echo/Update", requests);

	let mut responses = call.into_response_stream();
	let mut seen = Vec::new();
	while let Some(response) = within(responses.message()).await.unwrap() {
		seen.push(response);
	}
	assert_eq!(seen, vec!["echo update: x", "echo update: y", "echo update: z"]);
}

#[tokio::test]
async fn unknown_method_is_unimplemented() {
	let Harness { client, mut contexts } = harness();
	let call = client.make_unary_call::<String, String>("/echo.Echo/Missing", "Hello".to_string(), None);

	let expected = Status::new(Code::Unimplemented, "method not found");
	assert_eq!(within(call.response()).await, Err(Error::Status(expected.clone())));
	assert_eq!(within(call.status()).await, expected);
	assert!(contexts.try_recv().is_err());
}

#[tokio::test]
async fn handler_error_reaches_client() {
	let Harness { client, .. } = harness();
	let call = client.make_unary_call::<String, String>("/echo.Echo/Fail", "Hello".to_string(), None);

	let expected = Status::new(Code::NotFound, "nothing here");
	assert_eq!(within(call.response()).await, Err(Error::Status(expected.clone())));
	assert_eq!(within(call.status()).await, expected);
}

#[tokio::test]
async fn cancel_reaches_server_and_is_idempotent() {
	let Harness { client, mut contexts } = harness();
	let mut call = client.make_bidirectional_streaming_call::<String, String>("/echo.Echo/Wait", None);
	let server_context = within(contexts.recv()).await.unwrap();

	futures::join!(call.cancel(), call.cancel());

	assert_eq!(within(call.status()).await.code(), Code::Cancelled);
	assert_eq!(within(call.response_stream().message()).await, Err(Error::Cancelled));
	within(server_context.cancelled()).await;
	assert_eq!(call.send_message("late".to_string()).await, Err(Error::Cancelled));
}

#[tokio::test]
async fn send_after_end_is_rejected() {
	let Harness { client, .. } = harness();
	let call = client.make_client_streaming_call::<String, String>("/echo.Echo/Collect", None);

	call.send_end().await.unwrap();
	assert_eq!(call.send_message("late".to_string()).await, Err(Error::StreamAlreadyClosed));
	assert_eq!(within(call.response()).await, Ok("echo collect: ".to_string()));
}

#[tokio::test]
async fn deadline_cancels_both_sides() {
	let Harness { client, mut contexts } = harness();
	let options = CallOptions::new().with_timeout(Duration::from_millis(30));
	let call = client.make_bidirectional_streaming_call::<String, String>("/echo.Echo/Wait", Some(options));
	let server_context = within(contexts.recv()).await.unwrap();

	assert_eq!(within(call.status()).await.code(), Code::DeadlineExceeded);
	within(server_context.cancelled()).await;
}

#[tokio::test]
async fn client_interceptor_headers_reach_handler() {
	let Harness { client, .. } = harness();
	let interceptors = ClientInterceptors::<String, String>::empty().with(HeaderInjector::new(Metadata::new().with("x-token", "t-42")));
	let setup: CallSetup<String, String> = client.call_setup("/echo.Echo/Whoami", CallType::Unary, None);
	let call = UnaryCall::new(setup.with_interceptors(interceptors), "who".to_string());

	assert_eq!(within(call.response()).await, Ok("t-42".to_string()));
}

//! Accumulators turning response parts into cells and streams.

use std::sync::OnceLock;

use crate::cell::{ResultCell, StatusCell};
use crate::error::{Error, Result};
use crate::metadata::Metadata;
use crate::part::ResponsePart;
use crate::status::Status;
use crate::stream::{MessageStream, StreamSender, message_stream};

/// Cells every call shape exposes.
#[derive(Debug, Default)]
pub(crate) struct CallOutcome {
	pub(crate) initial_metadata: ResultCell<Metadata>,
	pub(crate) trailing_metadata: ResultCell<Metadata>,
	pub(crate) status: StatusCell,
}

impl CallOutcome {
	fn headers(&self, metadata: Metadata) {
		let _ = self.initial_metadata.succeed(metadata);
	}

	/// Resolves trailers and settles headers for an `End`. Status is left to the caller.
	fn end(&self, status: &Status, trailers: Metadata) {
		let _ = self.trailing_metadata.succeed(trailers);
		if status.is_ok() {
			let _ = self.initial_metadata.succeed(Metadata::new());
		} else {
			let _ = self.initial_metadata.fail(Error::Status(status.clone()));
		}
	}

	fn fail(&self, error: &Error) {
		let _ = self.initial_metadata.fail(error.clone());
		let _ = self.trailing_metadata.fail(error.clone());
		let _ = self.status.resolve(error.to_status());
	}
}

/// Receives a call's response parts after the interceptor chain.
pub(crate) trait ResponseSink<Resp>: Send + Sync + 'static {
	/// Applies one part. An `Err` reports a protocol violation; the sink has
	/// already failed itself and the caller should abandon the transport call.
	fn handle(&self, part: ResponsePart<Resp>) -> Result<()>;

	/// Fails everything still unresolved. First resolution wins.
	fn handle_error(&self, error: Error);

	fn outcome(&self) -> &CallOutcome;
}

/// Accumulator for unary-response shapes.
#[derive(Debug)]
pub(crate) struct UnaryResponseParts<Resp> {
	outcome: CallOutcome,
	response: ResultCell<Resp>,
	violation: OnceLock<Error>,
}

impl<Resp> UnaryResponseParts<Resp> {
	pub(crate) fn new() -> Self {
		Self {
			outcome: CallOutcome::default(),
			response: ResultCell::new(),
			violation: OnceLock::new(),
		}
	}
}

impl<Resp: Clone> UnaryResponseParts<Resp> {
	/// The single response message, or the violation that spoiled it.
	pub(crate) async fn response(&self) -> Result<Resp> {
		let outcome = self.response.get().await;
		match self.violation.get() {
			Some(violation) => Err(violation.clone()),
			None => outcome,
		}
	}
}

impl<Resp: Send + Sync + 'static> ResponseSink<Resp> for UnaryResponseParts<Resp> {
	fn handle(&self, part: ResponsePart<Resp>) -> Result<()> {
		match part {
			ResponsePart::Metadata(metadata) => self.outcome.headers(metadata),
			ResponsePart::Message(message, _) => {
				if self.response.succeed(message).is_err() {
					let violation = Error::protocol("unary call received more than one response message");
					let _ = self.violation.set(violation.clone());
					self.handle_error(violation.clone());
					return Err(violation);
				}
			}
			ResponsePart::End(status, trailers) => {
				self.outcome.end(&status, trailers);
				let mut status = status;
				if !self.response.is_resolved() {
					if status.is_ok() {
						let violation = Error::protocol("unary call ended without a response message");
						status = violation.to_status();
						let _ = self.response.fail(violation);
					} else {
						let _ = self.response.fail(Error::Status(status.clone()));
					}
				}
				let _ = self.outcome.status.resolve(status);
			}
		}
		Ok(())
	}

	fn handle_error(&self, error: Error) {
		let _ = self.response.fail(error.clone());
		self.outcome.fail(&error);
	}

	fn outcome(&self) -> &CallOutcome {
		&self.outcome
	}
}

/// Accumulator for streaming-response shapes.
#[derive(Debug)]
pub(crate) struct StreamingResponseParts<Resp> {
	outcome: CallOutcome,
	messages: StreamSender<Resp>,
}

impl<Resp> StreamingResponseParts<Resp> {
	/// Returns the accumulator and the stream it feeds.
	pub(crate) fn new() -> (Self, MessageStream<Resp>) {
		let (messages, stream) = message_stream();
		let parts = Self {
			outcome: CallOutcome::default(),
			messages,
		};
		(parts, stream)
	}
}

impl<Resp: Send + 'static> ResponseSink<Resp> for StreamingResponseParts<Resp> {
	fn handle(&self, part: ResponsePart<Resp>) -> Result<()> {
		match part {
			ResponsePart::Metadata(metadata) => self.outcome.headers(metadata),
			ResponsePart::Message(message, _) => {
				if !self.messages.push(message) {
					tracing::trace!("rpc.client.message_after_finish");
				}
			}
			ResponsePart::End(status, trailers) => {
				self.outcome.end(&status, trailers);
				// Finish the stream before publishing status so a reader woken by
				// status never sees a still-open stream.
				if status.is_ok() {
					self.messages.finish();
				} else {
					self.messages.finish_with_error(Error::Status(status.clone()));
				}
				let _ = self.outcome.status.resolve(status);
			}
		}
		Ok(())
	}

	fn handle_error(&self, error: Error) {
		self.messages.finish_with_error(error.clone());
		self.outcome.fail(&error);
	}

	fn outcome(&self) -> &CallOutcome {
		&self.outcome
	}
}

use crate::status::{Code, Status};

/// A convenient type alias for `Result` with `E` = [`enum@crate::Error`].
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Failures observed by calls, streams and handlers.
///
/// Errors are cloneable so one failure can be handed to every reader of a
/// cell or stream.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
	/// The peer or the handler ended the call with a non-OK status.
	#[error("{0}")]
	Status(Status),
	/// The call was cancelled locally.
	#[error("call cancelled")]
	Cancelled,
	/// The call deadline elapsed before a status arrived.
	#[error("deadline exceeded")]
	DeadlineExceeded,
	/// A send was attempted after the request stream was closed, or a write after the response
	/// stream ended.
	#[error("stream already closed")]
	StreamAlreadyClosed,
	/// The peer sent parts the call shape does not allow.
	#[error("protocol violation: {0}")]
	ProtocolViolation(String),
	/// The underlying transport failed or went away.
	#[error("transport error: {0}")]
	Transport(String),
	/// A message could not be encoded or decoded.
	#[error("codec error: {0}")]
	Codec(String),
	/// A write-once slot was resolved twice.
	#[error("result already resolved")]
	AlreadyResolved,
	/// A transport call was invoked twice.
	#[error("transport call already invoked")]
	AlreadyInvoked,
}

impl Error {
	/// Maps the error onto the status reported to the other side of the call.
	pub fn to_status(&self) -> Status {
		let code = match self {
			Self::Status(status) => return status.clone(),
			Self::Cancelled => Code::Cancelled,
			Self::DeadlineExceeded => Code::DeadlineExceeded,
			Self::StreamAlreadyClosed | Self::ProtocolViolation(_) => Code::FailedPrecondition,
			Self::Transport(_) => Code::Unavailable,
			Self::Codec(_) | Self::AlreadyResolved | Self::AlreadyInvoked => Code::Internal,
		};
		Status::new(code, self.to_string())
	}

	pub(crate) fn protocol(message: impl Into<String>) -> Self {
		Self::ProtocolViolation(message.into())
	}
}

impl From<Status> for Error {
	fn from(status: Status) -> Self {
		Self::Status(status)
	}
}

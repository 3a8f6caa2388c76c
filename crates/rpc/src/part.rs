use crate::metadata::{Metadata, MessageMetadata};
use crate::status::Status;

/// One event in the request direction of a call.
#[derive(Debug, Clone, PartialEq)]
pub enum RequestPart<T> {
	Metadata(Metadata),
	Message(T, MessageMetadata),
	End,
}

/// One event in the response direction of a call.
///
/// A well-formed response carries at most one `Metadata` before any
/// `Message`, and exactly one terminating `End`.
#[derive(Debug, Clone, PartialEq)]
pub enum ResponsePart<T> {
	Metadata(Metadata),
	Message(T, MessageMetadata),
	End(Status, Metadata),
}

impl<T> RequestPart<T> {
	pub fn kind(&self) -> &'static str {
		match self {
			Self::Metadata(_) => "metadata",
			Self::Message(..) => "message",
			Self::End => "end",
		}
	}

	/// Converts the payload of a `Message`, leaving other parts untouched.
	pub fn try_map<U, E>(self, f: impl FnOnce(T) -> Result<U, E>) -> Result<RequestPart<U>, E> {
		Ok(match self {
			Self::Metadata(metadata) => RequestPart::Metadata(metadata),
			Self::Message(message, meta) => RequestPart::Message(f(message)?, meta),
			Self::End => RequestPart::End,
		})
	}
}

impl<T> ResponsePart<T> {
	pub fn kind(&self) -> &'static str {
		match self {
			Self::Metadata(_) => "metadata",
			Self::Message(..) => "message",
			Self::End(..) => "end",
		}
	}

	/// Converts the payload of a `Message`, leaving other parts untouched.
	pub fn try_map<U, E>(self, f: impl FnOnce(T) -> Result<U, E>) -> Result<ResponsePart<U>, E> {
		Ok(match self {
			Self::Metadata(metadata) => ResponsePart::Metadata(metadata),
			Self::Message(message, meta) => ResponsePart::Message(f(message)?, meta),
			Self::End(status, trailers) => ResponsePart::End(status, trailers),
		})
	}
}

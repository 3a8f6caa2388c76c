use std::fmt;

/// Canonical RPC status codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i32)]
pub enum Code {
	/// The call completed successfully.
	Ok = 0,
	/// The call was cancelled, typically by the caller.
	Cancelled = 1,
	/// Unknown error.
	Unknown = 2,
	/// The client specified an invalid argument.
	InvalidArgument = 3,
	/// The deadline expired before the call could complete.
	DeadlineExceeded = 4,
	/// Some requested entity was not found.
	NotFound = 5,
	/// The entity a client attempted to create already exists.
	AlreadyExists = 6,
	/// The caller lacks permission for the operation.
	PermissionDenied = 7,
	/// Some resource has been exhausted.
	ResourceExhausted = 8,
	/// The system is not in a state required for the operation.
	FailedPrecondition = 9,
	/// The operation was aborted.
	Aborted = 10,
	/// The operation was attempted past the valid range.
	OutOfRange = 11,
	/// The operation is not implemented or supported.
	Unimplemented = 12,
	/// Internal invariant broken.
	Internal = 13,
	/// The service is currently unavailable.
	Unavailable = 14,
	/// Unrecoverable data loss or corruption.
	DataLoss = 15,
	/// The request lacks valid authentication credentials.
	Unauthenticated = 16,
}

impl Code {
	/// Maps a wire value to a code. Values outside the canonical range map to [`Code::Unknown`].
	pub fn from_i32(value: i32) -> Self {
		match value {
			0 => Self::Ok,
			1 => Self::Cancelled,
			2 => Self::Unknown,
			3 => Self::InvalidArgument,
			4 => Self::DeadlineExceeded,
			5 => Self::NotFound,
			6 => Self::AlreadyExists,
			7 => Self::PermissionDenied,
			8 => Self::ResourceExhausted,
			9 => Self::FailedPrecondition,
			10 => Self::Aborted,
			11 => Self::OutOfRange,
			12 => Self::Unimplemented,
			13 => Self::Internal,
			14 => Self::Unavailable,
			15 => Self::DataLoss,
			16 => Self::Unauthenticated,
			_ => Self::Unknown,
		}
	}

	pub const fn as_i32(self) -> i32 {
		self as i32
	}

	pub const fn as_str(self) -> &'static str {
		match self {
			Self::Ok => "ok",
			Self::Cancelled => "cancelled",
			Self::Unknown => "unknown",
			Self::InvalidArgument => "invalid argument",
			Self::DeadlineExceeded => "deadline exceeded",
			Self::NotFound => "not found",
			Self::AlreadyExists => "already exists",
			Self::PermissionDenied => "permission denied",
			Self::ResourceExhausted => "resource exhausted",
			Self::FailedPrecondition => "failed precondition",
			Self::Aborted => "aborted",
			Self::OutOfRange => "out of range",
			Self::Unimplemented => "unimplemented",
			Self::Internal => "internal",
			Self::Unavailable => "unavailable",
			Self::DataLoss => "data loss",
			Self::Unauthenticated => "unauthenticated",
		}
	}
}

impl fmt::Display for Code {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

/// Final outcome of a call: a code plus an optional human-readable message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Status {
	code: Code,
	message: Option<String>,
}

impl Status {
	/// Successful completion.
	pub const OK: Self = Self {
		code: Code::Ok,
		message: None,
	};

	pub fn new(code: Code, message: impl Into<String>) -> Self {
		Self {
			code,
			message: Some(message.into()),
		}
	}

	/// Status carrying only a code.
	pub const fn from_code(code: Code) -> Self {
		Self { code, message: None }
	}

	pub fn code(&self) -> Code {
		self.code
	}

	pub fn message(&self) -> Option<&str> {
		self.message.as_deref()
	}

	pub fn is_ok(&self) -> bool {
		self.code == Code::Ok
	}
}

impl fmt::Display for Status {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match &self.message {
			Some(message) => write!(f, "{}: {message}", self.code),
			None => write!(f, "{}", self.code),
		}
	}
}

impl std::error::Error for Status {}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn code_round_trips_through_wire_values() {
		for value in 0..=16 {
			assert_eq!(Code::from_i32(value).as_i32(), value);
		}
		assert_eq!(Code::from_i32(17), Code::Unknown);
		assert_eq!(Code::from_i32(-1), Code::Unknown);
	}

	#[test]
	fn display_includes_message_when_present() {
		assert_eq!(Status::OK.to_string(), "ok");
		assert_eq!(Status::new(Code::NotFound, "no such user").to_string(), "not found: no such user");
	}
}

/// Execution classes for tasks spawned by the call layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskClass {
	/// A user-provided server handler running for one inbound call.
	Handler,
	/// Fire-and-forget cleanup, such as cancelling an abandoned call.
	Cleanup,
	/// Deadline timers watching an in-flight call.
	Watchdog,
	/// Tasks moving request messages from a source stream into a call.
	Forwarder,
	/// Pumps moving parts between the two ends of an in-process transport.
	Transport,
}

impl TaskClass {
	/// Stable label used in log fields.
	pub const fn as_str(self) -> &'static str {
		match self {
			Self::Handler => "handler",
			Self::Cleanup => "cleanup",
			Self::Watchdog => "watchdog",
			Self::Forwarder => "forwarder",
			Self::Transport => "transport",
		}
	}
}

impl std::fmt::Display for TaskClass {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.write_str(self.as_str())
	}
}

//! Write-once awaitable slots.
//!
//! A slot resolves exactly once. Every reader, whether it arrived before or
//! after resolution, observes the same outcome.

use std::fmt;
use std::sync::OnceLock;

use tokio::sync::Notify;

use crate::error::{Error, Result};
use crate::status::Status;

struct Slot<V> {
	value: OnceLock<V>,
	notify: Notify,
}

impl<V> Default for Slot<V> {
	fn default() -> Self {
		Self {
			value: OnceLock::new(),
			notify: Notify::new(),
		}
	}
}

impl<V> Slot<V> {
	fn set(&self, value: V) -> Result<()> {
		self.value.set(value).map_err(|_| Error::AlreadyResolved)?;
		self.notify.notify_waiters();
		Ok(())
	}

	async fn wait(&self) -> &V {
		loop {
			// Registered before the check so a concurrent `set` cannot slip between them.
			let notified = self.notify.notified();
			if let Some(value) = self.value.get() {
				return value;
			}
			notified.await;
		}
	}

	fn peek(&self) -> Option<&V> {
		self.value.get()
	}
}

/// Write-once slot holding either a value or an error.
pub struct ResultCell<T> {
	slot: Slot<Result<T>>,
}

impl<T> Default for ResultCell<T> {
	fn default() -> Self {
		Self { slot: Slot::default() }
	}
}

impl<T> ResultCell<T> {
	pub fn new() -> Self {
		Self::default()
	}

	/// Stores the outcome and releases all readers.
	///
	/// Returns [`Error::AlreadyResolved`] if the cell already holds an outcome;
	/// the earlier outcome is kept.
	pub fn resolve(&self, outcome: Result<T>) -> Result<()> {
		self.slot.set(outcome).inspect_err(|_| tracing::trace!("rpc.cell.duplicate_resolve"))
	}

	pub fn succeed(&self, value: T) -> Result<()> {
		self.resolve(Ok(value))
	}

	pub fn fail(&self, error: Error) -> Result<()> {
		self.resolve(Err(error))
	}

	pub fn is_resolved(&self) -> bool {
		self.slot.peek().is_some()
	}
}

impl<T: Clone> ResultCell<T> {
	/// Waits for the outcome.
	pub async fn get(&self) -> Result<T> {
		self.slot.wait().await.clone()
	}

	/// Returns the outcome if the cell is already resolved.
	pub fn try_get(&self) -> Option<Result<T>> {
		self.slot.peek().cloned()
	}
}

impl<T> fmt::Debug for ResultCell<T> {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("ResultCell").field("resolved", &self.is_resolved()).finish()
	}
}

/// Write-once slot for a call status. Reading never fails.
#[derive(Default)]
pub struct StatusCell {
	slot: Slot<Status>,
}

impl StatusCell {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn resolve(&self, status: Status) -> Result<()> {
		self.slot.set(status)
	}

	pub async fn get(&self) -> Status {
		self.slot.wait().await.clone()
	}

	pub fn try_get(&self) -> Option<Status> {
		self.slot.peek().cloned()
	}

	pub fn is_resolved(&self) -> bool {
		self.slot.peek().is_some()
	}
}

impl fmt::Debug for StatusCell {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("StatusCell").field("status", &self.slot.peek()).finish()
	}
}

//! Push-to-pull message stream.
//!
//! Producers push from any thread without blocking; a single consumer pulls
//! items in push order. The stream ends with either a normal finish or an
//! error, and buffered items are always delivered before that terminal.

use std::fmt;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll, ready};

use futures::Stream;
use parking_lot::Mutex;
use tokio::sync::mpsc;

use crate::error::{Error, Result};

enum Event<T> {
	Item(T),
	End,
	Failed(Error),
}

/// Creates a connected producer/consumer pair.
pub fn message_stream<T>() -> (StreamSender<T>, MessageStream<T>) {
	let (tx, rx) = mpsc::unbounded_channel();
	let sender = StreamSender {
		shared: Arc::new(SenderShared { tx: Mutex::new(Some(tx)) }),
	};
	let stream = MessageStream {
		rx,
		terminal: None,
		exhausted: false,
	};
	(sender, stream)
}

struct SenderShared<T> {
	/// `None` once the stream was finished.
	tx: Mutex<Option<mpsc::UnboundedSender<Event<T>>>>,
}

/// Producer half of a [`MessageStream`].
///
/// Clones feed the same stream. Dropping every clone without finishing ends
/// the stream with [`Error::Cancelled`].
pub struct StreamSender<T> {
	shared: Arc<SenderShared<T>>,
}

impl<T> Clone for StreamSender<T> {
	fn clone(&self) -> Self {
		Self {
			shared: Arc::clone(&self.shared),
		}
	}
}

impl<T> StreamSender<T> {
	/// Enqueues an item. Returns `false` if the stream was already finished.
	pub fn push(&self, item: T) -> bool {
		let guard = self.shared.tx.lock();
		match guard.as_ref() {
			Some(tx) => tx.send(Event::Item(item)).is_ok(),
			None => false,
		}
	}

	/// Ends the stream normally. Only the first finish counts.
	pub fn finish(&self) -> bool {
		self.terminate(Event::End)
	}

	/// Ends the stream with an error. Only the first finish counts.
	pub fn finish_with_error(&self, error: Error) -> bool {
		self.terminate(Event::Failed(error))
	}

	fn is_finished(&self) -> bool {
		self.shared.tx.lock().is_none()
	}

	fn terminate(&self, event: Event<T>) -> bool {
		let Some(tx) = self.shared.tx.lock().take() else {
			return false;
		};
		// The consumer may already be gone; finishing still counts.
		let _ = tx.send(event);
		true
	}
}

impl<T> fmt::Debug for StreamSender<T> {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("StreamSender").field("finished", &self.is_finished()).finish()
	}
}

/// Consumer half of the stream.
pub struct MessageStream<T> {
	rx: mpsc::UnboundedReceiver<Event<T>>,
	terminal: Option<Result<()>>,
	/// Set once the [`Stream`] impl yielded its terminal item.
	exhausted: bool,
}

impl<T> MessageStream<T> {
	/// Pulls the next item.
	///
	/// Returns `Ok(None)` after a normal end and the same error after a failed
	/// end, however many times it is called.
	pub async fn message(&mut self) -> Result<Option<T>> {
		std::future::poll_fn(|cx| self.poll_message(cx)).await
	}

	/// Returns true once the terminal signal has been observed.
	pub fn is_terminated(&self) -> bool {
		self.terminal.is_some()
	}

	fn poll_message(&mut self, cx: &mut Context<'_>) -> Poll<Result<Option<T>>> {
		if let Some(terminal) = &self.terminal {
			return Poll::Ready(terminal.clone().map(|()| None));
		}
		let outcome = match ready!(self.rx.poll_recv(cx)) {
			Some(Event::Item(item)) => return Poll::Ready(Ok(Some(item))),
			Some(Event::End) => Ok(()),
			Some(Event::Failed(error)) => Err(error),
			None => Err(Error::Cancelled),
		};
		self.terminal = Some(outcome.clone());
		Poll::Ready(outcome.map(|()| None))
	}
}

impl<T> Unpin for MessageStream<T> {}

impl<T> Stream for MessageStream<T> {
	type Item = Result<T>;

	fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
		let this = self.get_mut();
		if this.exhausted {
			return Poll::Ready(None);
		}
		match ready!(this.poll_message(cx)) {
			Ok(Some(item)) => Poll::Ready(Some(Ok(item))),
			Ok(None) => {
				this.exhausted = true;
				Poll::Ready(None)
			}
			Err(error) => {
				this.exhausted = true;
				Poll::Ready(Some(Err(error)))
			}
		}
	}
}

impl<T> fmt::Debug for MessageStream<T> {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("MessageStream").field("terminal", &self.terminal).finish_non_exhaustive()
	}
}

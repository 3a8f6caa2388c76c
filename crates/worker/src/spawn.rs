use std::future::Future;
use std::sync::OnceLock;

use tokio::runtime::{Builder, Handle};

use crate::TaskClass;

/// Handle of the runtime the caller is inside, else of the shared fallback.
///
/// Transport callbacks can fire on foreign threads with no Tokio context.
fn runtime_handle() -> Handle {
	Handle::try_current().unwrap_or_else(|_| fallback().clone())
}

/// Single-threaded runtime parked on its own thread, started on first use.
fn fallback() -> &'static Handle {
	static FALLBACK: OnceLock<Handle> = OnceLock::new();
	FALLBACK.get_or_init(|| {
		let runtime = Builder::new_current_thread()
			.enable_all()
			.build()
			.expect("strand-worker: cannot build fallback runtime");
		let handle = runtime.handle().clone();
		std::thread::Builder::new()
			.name("strand-fallback".into())
			.spawn(move || runtime.block_on(std::future::pending::<()>()))
			.expect("strand-worker: cannot start fallback thread");
		tracing::debug!("worker.fallback_started");
		handle
	})
}

/// Spawns a task whose completion nobody observes.
///
/// The join handle is dropped immediately; the task keeps running to
/// completion on its own.
pub fn spawn_detached<F>(class: TaskClass, fut: F)
where
	F: Future<Output = ()> + Send + 'static,
{
	tracing::trace!(worker_class = class.as_str(), "worker.spawn_detached");
	drop(runtime_handle().spawn(fut));
}

#[cfg(test)]
mod tests {
	use std::sync::Arc;
	use std::sync::atomic::{AtomicBool, Ordering};
	use std::time::Duration;

	use tokio::runtime::RuntimeFlavor;

	use super::*;

	#[tokio::test]
	async fn detached_task_runs_on_current_runtime() {
		let ran = Arc::new(AtomicBool::new(false));
		let flag = Arc::clone(&ran);
		spawn_detached(TaskClass::Cleanup, async move {
			flag.store(true, Ordering::SeqCst);
		});

		for _ in 0..50 {
			if ran.load(Ordering::SeqCst) {
				return;
			}
			tokio::time::sleep(Duration::from_millis(2)).await;
		}
		panic!("detached task never ran");
	}

	#[test]
	fn spawn_outside_runtime_uses_fallback_thread() {
		let (tx, rx) = std::sync::mpsc::channel();
		for _ in 0..2 {
			let tx = tx.clone();
			spawn_detached(TaskClass::Cleanup, async move {
				let flavor = Handle::current().runtime_flavor();
				let _ = tx.send((flavor, std::thread::current().name().map(str::to_owned)));
			});
		}
		for _ in 0..2 {
			let (flavor, thread) = rx.recv_timeout(Duration::from_secs(2)).expect("fallback runtime should run the task");
			assert_eq!(flavor, RuntimeFlavor::CurrentThread);
			assert_eq!(thread.as_deref(), Some("strand-fallback"));
		}
	}
}

//! Task primitives shared by the strand call layer.
//!
//! * [`spawn_detached`]: attach futures to the active Tokio runtime, falling back to a private
//!   runtime when called from a thread outside any runtime context
//! * [`TaskClass`]: classification carried into spawn logs
//! * [`CancelScope`]: cancellation scope for handler, watchdog and pump tasks

mod class;
mod scope;
mod spawn;

pub use class::TaskClass;
pub use scope::CancelScope;
pub use spawn::spawn_detached;

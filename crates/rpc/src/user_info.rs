use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;

/// Typed extension map shared by a call's interceptors and its handler.
///
/// Keyed by type; clones share the same map.
#[derive(Clone, Default)]
pub struct UserInfo {
	map: Arc<Mutex<HashMap<TypeId, Box<dyn Any + Send + Sync>>>>,
}

impl UserInfo {
	pub fn new() -> Self {
		Self::default()
	}

	/// Stores `value`, returning the previous value of the same type.
	pub fn insert<T: Any + Send + Sync>(&self, value: T) -> Option<T> {
		self.map
			.lock()
			.insert(TypeId::of::<T>(), Box::new(value))
			.and_then(|old| old.downcast::<T>().ok())
			.map(|old| *old)
	}

	pub fn get<T: Any + Clone>(&self) -> Option<T> {
		self.map.lock().get(&TypeId::of::<T>()).and_then(|value| value.downcast_ref::<T>()).cloned()
	}

	pub fn remove<T: Any>(&self) -> Option<T> {
		self.map.lock().remove(&TypeId::of::<T>()).and_then(|old| old.downcast::<T>().ok()).map(|old| *old)
	}

	pub fn contains<T: Any>(&self) -> bool {
		self.map.lock().contains_key(&TypeId::of::<T>())
	}
}

impl fmt::Debug for UserInfo {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("UserInfo").field("entries", &self.map.lock().len()).finish()
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[derive(Debug, Clone, PartialEq)]
	struct Principal(&'static str);

	#[test]
	fn clones_share_entries() {
		let info = UserInfo::new();
		let view = info.clone();
		assert_eq!(info.insert(Principal("alice")), None);
		assert_eq!(view.get::<Principal>(), Some(Principal("alice")));
		assert_eq!(view.insert(Principal("bob")), Some(Principal("alice")));
		assert_eq!(info.remove::<Principal>(), Some(Principal("bob")));
		assert!(!view.contains::<Principal>());
	}
}

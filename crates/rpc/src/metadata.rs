/// Ordered multimap of header names to values.
///
/// Names are stored ASCII-lowercased. Duplicate names are kept and insertion
/// order is preserved.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Metadata {
	entries: Vec<(String, String)>,
}

impl Metadata {
	pub fn new() -> Self {
		Self::default()
	}

	/// Appends a value, keeping any existing values under the same name.
	pub fn insert(&mut self, name: impl AsRef<str>, value: impl Into<String>) {
		self.entries.push((name.as_ref().to_ascii_lowercase(), value.into()));
	}

	/// Builder form of [`Metadata::insert`].
	pub fn with(mut self, name: impl AsRef<str>, value: impl Into<String>) -> Self {
		self.insert(name, value);
		self
	}

	/// Returns the first value stored under `name`.
	pub fn get(&self, name: &str) -> Option<&str> {
		self.get_all(name).next()
	}

	/// Returns every value stored under `name`, in insertion order.
	pub fn get_all<'a>(&'a self, name: &str) -> impl Iterator<Item = &'a str> + use<'a> {
		let name = name.to_ascii_lowercase();
		self.entries.iter().filter(move |(key, _)| *key == name).map(|(_, value)| value.as_str())
	}

	pub fn contains_key(&self, name: &str) -> bool {
		self.get(name).is_some()
	}

	/// Removes every value under `name`, returning how many were removed.
	pub fn remove(&mut self, name: &str) -> usize {
		let name = name.to_ascii_lowercase();
		let before = self.entries.len();
		self.entries.retain(|(key, _)| *key != name);
		before - self.entries.len()
	}

	/// Appends all entries of `other`.
	pub fn extend_from(&mut self, other: &Metadata) {
		self.entries.extend(other.entries.iter().cloned());
	}

	pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
		self.entries.iter().map(|(key, value)| (key.as_str(), value.as_str()))
	}

	pub fn len(&self) -> usize {
		self.entries.len()
	}

	pub fn is_empty(&self) -> bool {
		self.entries.is_empty()
	}
}

impl<K: AsRef<str>, V: Into<String>> FromIterator<(K, V)> for Metadata {
	fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
		let mut metadata = Self::new();
		for (name, value) in iter {
			metadata.insert(name, value);
		}
		metadata
	}
}

/// Per-message transport hints.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MessageMetadata {
	/// Whether the transport should compress this message.
	pub compress: bool,
	/// Whether the transport should flush after writing this message.
	pub flush: bool,
}

impl Default for MessageMetadata {
	fn default() -> Self {
		Self {
			compress: false,
			flush: true,
		}
	}
}

impl MessageMetadata {
	pub fn compressed(compress: bool) -> Self {
		Self {
			compress,
			..Self::default()
		}
	}
}

/// Per-message compression override.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Compression {
	Enabled,
	Disabled,
	/// Use whatever the call (or server) is configured with.
	#[default]
	DeferToCallDefault,
}

impl Compression {
	/// Resolves the override against the call default.
	pub fn is_enabled(self, call_default: bool) -> bool {
		match self {
			Self::Enabled => true,
			Self::Disabled => false,
			Self::DeferToCallDefault => call_default,
		}
	}
}

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;
use rustc_hash::FxHashMap;

/// Opaque exported value.
pub type ExportValue = Arc<dyn Any + Send + Sync>;

/// The exports object of a module.
///
/// Clones share the same underlying map, so a module that is still executing
/// can hand out its partially populated exports.
#[derive(Clone, Default)]
pub struct Exports(Arc<RwLock<FxHashMap<String, ExportValue>>>);

impl Exports {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn set<T: Any + Send + Sync>(&self, name: impl Into<String>, value: T) {
		self.set_value(name, Arc::new(value));
	}

	pub fn set_value(&self, name: impl Into<String>, value: ExportValue) {
		self.0.write().insert(name.into(), value);
	}

	pub fn get(&self, name: &str) -> Option<ExportValue> {
		self.0.read().get(name).cloned()
	}

	/// Returns the export downcast to `T`, or `None` if absent or of another type.
	pub fn get_as<T: Any + Send + Sync>(&self, name: &str) -> Option<Arc<T>> {
		self.get(name)?.downcast::<T>().ok()
	}

	pub fn contains(&self, name: &str) -> bool {
		self.0.read().contains_key(name)
	}

	/// Export names in sorted order.
	pub fn names(&self) -> Vec<String> {
		let mut names: Vec<String> = self.0.read().keys().cloned().collect();
		names.sort_unstable();
		names
	}

	pub fn len(&self) -> usize {
		self.0.read().len()
	}

	pub fn is_empty(&self) -> bool {
		self.0.read().is_empty()
	}

	/// Returns true when both handles point at the same exports object.
	pub fn ptr_eq(&self, other: &Self) -> bool {
		Arc::ptr_eq(&self.0, &other.0)
	}
}

impl fmt::Debug for Exports {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("Exports").field("names", &self.names()).finish()
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn clones_share_state() {
		let exports = Exports::new();
		let alias = exports.clone();
		alias.set("answer", 42u32);
		assert_eq!(exports.get_as::<u32>("answer").as_deref(), Some(&42));
		assert!(exports.ptr_eq(&alias));
		assert!(!exports.ptr_eq(&Exports::new()));
	}

	#[test]
	fn downcast_to_wrong_type_is_none() {
		let exports = Exports::new();
		exports.set("name", String::from("fedra"));
		assert!(exports.get_as::<u32>("name").is_none());
		assert_eq!(exports.get_as::<String>("name").as_deref().map(String::as_str), Some("fedra"));
		assert_eq!(exports.names(), vec!["name".to_string()]);
	}
}

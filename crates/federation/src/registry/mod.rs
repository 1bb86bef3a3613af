//! Module registry.
//!
//! Maps module ids to factories and memoizes their instantiation. Each id gets
//! exactly one [`ModuleRecord`], created the first time it is required. A
//! record that is still executing hands out its partial exports to requires
//! from inside its own body, which is what lets cyclic requires terminate.
//! Requires from other threads block until the body settles.

use std::fmt;
use std::sync::Arc;
use std::thread::{self, ThreadId};

use parking_lot::{Condvar, Mutex, RwLock};
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use tracing::{debug, trace, warn};

use crate::error::ModuleError;
use crate::exports::Exports;
use crate::{Error, Result};

/// Identifier of a module inside a container.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ModuleId(String);

impl ModuleId {
	pub fn new(id: impl Into<String>) -> Self {
		Self(id.into())
	}

	pub fn as_str(&self) -> &str {
		&self.0
	}
}

impl fmt::Display for ModuleId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(&self.0)
	}
}

impl From<&str> for ModuleId {
	fn from(id: &str) -> Self {
		Self(id.to_string())
	}
}

impl From<String> for ModuleId {
	fn from(id: String) -> Self {
		Self(id)
	}
}

impl From<u32> for ModuleId {
	fn from(id: u32) -> Self {
		Self(id.to_string())
	}
}

/// A module body. It populates (or replaces) the exports through the scope.
pub type ModuleFactory = Arc<dyn Fn(&mut ModuleScope<'_>) -> Result<(), ModuleError> + Send + Sync>;

/// What a module body sees while it runs.
pub struct ModuleScope<'a> {
	id: &'a ModuleId,
	registry: &'a ModuleRegistry,
	exports: Exports,
}

impl ModuleScope<'_> {
	pub fn id(&self) -> &ModuleId {
		self.id
	}

	pub fn exports(&self) -> &Exports {
		&self.exports
	}

	/// Requires another module from the same registry.
	pub fn require(&self, id: impl Into<ModuleId>) -> Result<Exports> {
		self.registry.require(&id.into())
	}

	/// Replaces the exports wholesale. Modules that already received the
	/// partial exports through a cycle keep the old object.
	pub fn replace_exports(&mut self, exports: Exports) {
		self.exports = exports;
	}
}

/// Lifecycle of a module as reported by [`ModuleRegistry::status`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModuleStatus {
	/// A factory is defined but the module was never required.
	Pending,
	/// The body is executing.
	Loading,
	Ready,
	Failed,
}

enum RecordState {
	/// The body is running on `thread`.
	Loading { exports: Exports, thread: ThreadId },
	Ready(Exports),
	Failed(Error),
}

/// The memoized instantiation of one module.
pub struct ModuleRecord {
	id: ModuleId,
	state: Mutex<RecordState>,
	settled: Condvar,
}

impl ModuleRecord {
	fn loading(id: ModuleId) -> (Arc<Self>, Exports) {
		let exports = Exports::new();
		let record = Arc::new(Self {
			id,
			state: Mutex::new(RecordState::Loading {
				exports: exports.clone(),
				thread: thread::current().id(),
			}),
			settled: Condvar::new(),
		});
		(record, exports)
	}

	pub fn id(&self) -> &ModuleId {
		&self.id
	}

	pub fn status(&self) -> ModuleStatus {
		match &*self.state.lock() {
			RecordState::Loading { .. } => ModuleStatus::Loading,
			RecordState::Ready(_) => ModuleStatus::Ready,
			RecordState::Failed(_) => ModuleStatus::Failed,
		}
	}

	/// Current exports, partial while loading. `None` once failed.
	pub fn exports(&self) -> Option<Exports> {
		match &*self.state.lock() {
			RecordState::Loading { exports, .. } | RecordState::Ready(exports) => Some(exports.clone()),
			RecordState::Failed(_) => None,
		}
	}

	pub fn error(&self) -> Option<Error> {
		match &*self.state.lock() {
			RecordState::Failed(error) => Some(error.clone()),
			_ => None,
		}
	}

	/// Re-entry from the loading thread is a cycle and gets the partial
	/// exports. Any other thread waits for the body to settle.
	fn observe(&self) -> Result<Exports> {
		let current = thread::current().id();
		let mut state = self.state.lock();
		loop {
			match &*state {
				RecordState::Loading { exports, thread } if *thread == current => {
					trace!(module = %self.id, "module required while loading, returning partial exports");
					return Ok(exports.clone());
				}
				RecordState::Loading { .. } => {}
				RecordState::Ready(exports) => return Ok(exports.clone()),
				RecordState::Failed(error) => return Err(error.clone()),
			}
			trace!(module = %self.id, "waiting for module loading on another thread");
			self.settled.wait(&mut state);
		}
	}

	fn settle(&self, outcome: Result<Exports>) -> Result<Exports> {
		let mut state = self.state.lock();
		*state = match &outcome {
			Ok(exports) => RecordState::Ready(exports.clone()),
			Err(error) => RecordState::Failed(error.clone()),
		};
		drop(state);
		self.settled.notify_all();
		outcome
	}
}

impl fmt::Debug for ModuleRecord {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("ModuleRecord")
			.field("id", &self.id)
			.field("status", &self.status())
			.finish()
	}
}

/// Factory table plus the memoized records.
///
/// Locks are never held while a module body runs, so bodies may freely
/// require other modules (or themselves).
#[derive(Default)]
pub struct ModuleRegistry {
	factories: RwLock<FxHashMap<ModuleId, ModuleFactory>>,
	records: Mutex<FxHashMap<ModuleId, Arc<ModuleRecord>>>,
}

impl ModuleRegistry {
	pub fn new() -> Self {
		Self::default()
	}

	/// Installs or replaces the factory for `id`.
	///
	/// Replacing a factory does not touch a record that already exists.
	pub fn define<F>(&self, id: impl Into<ModuleId>, factory: F)
	where
		F: Fn(&mut ModuleScope<'_>) -> Result<(), ModuleError> + Send + Sync + 'static,
	{
		self.define_factory(id.into(), Arc::new(factory));
	}

	pub fn define_factory(&self, id: ModuleId, factory: ModuleFactory) {
		trace!(module = %id, "defining module");
		self.factories.write().insert(id, factory);
	}

	pub fn is_defined(&self, id: &ModuleId) -> bool {
		self.factories.read().contains_key(id)
	}

	/// Instantiates `id` on first use and returns its exports.
	///
	/// # Errors
	///
	/// [`Error::UnknownModule`] when no factory is defined, or the cached
	/// [`Error::ModuleInstantiation`] if the body failed, now or earlier.
	pub fn require(&self, id: &ModuleId) -> Result<Exports> {
		let (record, factory, exports) = {
			let mut records = self.records.lock();
			if let Some(record) = records.get(id) {
				let record = Arc::clone(record);
				drop(records);
				return record.observe();
			}
			let factory = self.factories.read().get(id).cloned().ok_or_else(|| Error::UnknownModule(id.clone()))?;
			let (record, exports) = ModuleRecord::loading(id.clone());
			records.insert(id.clone(), Arc::clone(&record));
			(record, factory, exports)
		};

		debug!(module = %id, "instantiating module");
		let mut scope = ModuleScope {
			id,
			registry: self,
			exports,
		};
		let outcome = match factory(&mut scope) {
			Ok(()) => Ok(scope.exports),
			Err(source) => {
				warn!(module = %id, error = %source, "module body failed");
				Err(Error::ModuleInstantiation {
					id: id.clone(),
					source: Arc::new(source),
				})
			}
		};
		record.settle(outcome)
	}

	/// Reports the lifecycle state of `id`, or `None` if it is unknown.
	pub fn status(&self, id: &ModuleId) -> Option<ModuleStatus> {
		if let Some(record) = self.records.lock().get(id) {
			return Some(record.status());
		}
		self.is_defined(id).then_some(ModuleStatus::Pending)
	}

	/// Returns the record for `id` once it has been required.
	pub fn record(&self, id: &ModuleId) -> Option<Arc<ModuleRecord>> {
		self.records.lock().get(id).cloned()
	}
}

impl fmt::Debug for ModuleRegistry {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("ModuleRegistry")
			.field("factories", &self.factories.read().len())
			.field("records", &self.records.lock().len())
			.finish()
	}
}

#[cfg(test)]
mod tests;

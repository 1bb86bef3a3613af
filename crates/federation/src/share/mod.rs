//! Shared scopes.
//!
//! A share scope maps library names to the versions that containers have
//! offered for them. Every container that joins a scope merges its own
//! offers; consumers then pick one through [`crate::consume`].

use std::collections::BTreeMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use fedra_semver::Version;
use futures::FutureExt;
use futures::future::BoxFuture;
use parking_lot::{Mutex, RwLock};
use rustc_hash::{FxHashMap, FxHashSet};
use serde::Serialize;
use tokio::sync::OnceCell;
use tracing::{debug, trace};

use crate::exports::Exports;
use crate::{Error, Result};

/// Lazily produces a shared library's exports.
pub type SharedFactory = Arc<dyn Fn() -> BoxFuture<'static, Result<Exports>> + Send + Sync>;

/// Wraps an async closure as a [`SharedFactory`].
pub fn shared_factory<F, Fut>(factory: F) -> SharedFactory
where
	F: Fn() -> Fut + Send + Sync + 'static,
	Fut: Future<Output = Result<Exports>> + Send + 'static,
{
	Arc::new(move || factory().boxed())
}

/// Outcome of [`SharedScope::register`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertAction {
	/// Version was new; entry inserted.
	InsertedNew,
	/// Version existed; kept the existing entry.
	KeptExisting,
	/// Version existed; replaced with the new entry.
	ReplacedExisting,
}

/// One offered version of a shared library.
pub struct SharedEntry {
	name: String,
	version: Version,
	from: String,
	eager: bool,
	loaded: AtomicBool,
	factory: SharedFactory,
	instance: OnceCell<Exports>,
}

impl SharedEntry {
	pub fn new(name: impl Into<String>, version: &str, from: impl Into<String>, factory: SharedFactory) -> Self {
		Self {
			name: name.into(),
			version: Version::parse(version),
			from: from.into(),
			eager: false,
			loaded: AtomicBool::new(false),
			factory,
			instance: OnceCell::new(),
		}
	}

	/// An entry whose exports already exist, e.g. a library the host bundled.
	pub fn resident(name: impl Into<String>, version: &str, from: impl Into<String>, exports: Exports) -> Self {
		let instance = exports.clone();
		let mut entry = Self::new(
			name,
			version,
			from,
			shared_factory(move || {
				let exports = instance.clone();
				async move { Ok(exports) }
			}),
		);
		entry.loaded = AtomicBool::new(true);
		entry.instance = OnceCell::from(exports);
		entry
	}

	pub fn with_eager(mut self, eager: bool) -> Self {
		self.eager = eager;
		self
	}

	pub fn name(&self) -> &str {
		&self.name
	}

	pub fn version(&self) -> &Version {
		&self.version
	}

	/// Identity of the container that offered this entry.
	pub fn from(&self) -> &str {
		&self.from
	}

	pub fn is_eager(&self) -> bool {
		self.eager
	}

	/// Whether a consumer has started using this entry. Never reset.
	pub fn is_loaded(&self) -> bool {
		self.loaded.load(Ordering::Acquire)
	}

	/// Exports, if the factory already ran.
	pub fn instance(&self) -> Option<Exports> {
		self.instance.get().cloned()
	}

	/// Marks the entry loaded and runs the factory once.
	///
	/// Concurrent callers share a single factory invocation. A failed
	/// invocation is not cached; the next call runs the factory again.
	pub async fn load(&self) -> Result<Exports> {
		self.loaded.store(true, Ordering::Release);
		let exports = self.instance.get_or_try_init(|| (self.factory)()).await?;
		Ok(exports.clone())
	}

	fn snapshot(&self) -> EntrySnapshot {
		EntrySnapshot {
			loaded: self.is_loaded().then_some(1),
			eager: self.eager,
			from: self.from.clone(),
		}
	}
}

impl fmt::Debug for SharedEntry {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("SharedEntry")
			.field("name", &self.name)
			.field("version", &self.version.as_str())
			.field("from", &self.from)
			.field("eager", &self.eager)
			.field("loaded", &self.is_loaded())
			.finish()
	}
}

/// One library version a container offers to its share scope.
#[derive(Clone)]
pub struct ShareDeclaration {
	pub name: String,
	pub version: String,
	pub eager: bool,
	pub factory: SharedFactory,
}

impl fmt::Debug for ShareDeclaration {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("ShareDeclaration")
			.field("name", &self.name)
			.field("version", &self.version)
			.field("eager", &self.eager)
			.finish_non_exhaustive()
	}
}

/// Everything one container offers to a scope, under its identity.
#[derive(Debug, Clone)]
pub struct ShareDeclarations {
	/// Unique name of the offering container, recorded as each entry's `from`.
	pub identity: String,
	pub declarations: Vec<ShareDeclaration>,
}

/// Serializable view of an entry. The factory is omitted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EntrySnapshot {
	#[serde(skip_serializing_if = "Option::is_none")]
	pub loaded: Option<u8>,
	pub eager: bool,
	pub from: String,
}

/// `{ scope: { library: { version: entry } } }`
pub type ScopeSnapshot = BTreeMap<String, BTreeMap<String, BTreeMap<String, EntrySnapshot>>>;

/// A named table of shared library versions.
#[derive(Default)]
pub struct SharedScope {
	libs: RwLock<BTreeMap<String, BTreeMap<String, Arc<SharedEntry>>>>,
	initialized: Mutex<FxHashSet<String>>,
}

impl SharedScope {
	pub fn new() -> Self {
		Self::default()
	}

	/// Offers `entry` under its name and version string.
	///
	/// An existing entry for the same version is replaced only while it is
	/// not loaded, and only by an eager entry when the eager flags differ or
	/// by a greater `from` identity when they match.
	pub fn register(&self, entry: SharedEntry) -> InsertAction {
		let mut libs = self.libs.write();
		let versions = libs.entry(entry.name.clone()).or_default();
		let key = entry.version.as_str().to_string();
		let action = match versions.get(&key) {
			None => InsertAction::InsertedNew,
			Some(existing) if existing.is_loaded() => InsertAction::KeptExisting,
			Some(existing) if existing.eager != entry.eager => {
				if entry.eager {
					InsertAction::ReplacedExisting
				} else {
					InsertAction::KeptExisting
				}
			}
			Some(existing) if entry.from > existing.from => InsertAction::ReplacedExisting,
			Some(_) => InsertAction::KeptExisting,
		};
		trace!(name = %entry.name, version = %key, from = %entry.from, ?action, "share registration");
		if action != InsertAction::KeptExisting {
			versions.insert(key, Arc::new(entry));
		}
		action
	}

	/// Merges a container's declarations once per identity.
	///
	/// Returns `false` if this identity was already merged.
	pub fn init(&self, declarations: &ShareDeclarations) -> bool {
		if !self.initialized.lock().insert(declarations.identity.clone()) {
			trace!(identity = %declarations.identity, "share scope already initialized");
			return false;
		}
		for declaration in &declarations.declarations {
			let entry = SharedEntry::new(
				declaration.name.clone(),
				&declaration.version,
				declarations.identity.clone(),
				Arc::clone(&declaration.factory),
			)
			.with_eager(declaration.eager);
			self.register(entry);
		}
		debug!(identity = %declarations.identity, offered = declarations.declarations.len(), "share scope initialized");
		true
	}

	pub fn entry(&self, name: &str, version: &str) -> Option<Arc<SharedEntry>> {
		self.libs.read().get(name)?.get(version).cloned()
	}

	/// Marks the entry registered under `entry`'s name and version as loaded
	/// and returns it.
	///
	/// This happens under the table lock: a concurrent [`Self::register`]
	/// either finds the entry loaded and keeps it, or already replaced it, in
	/// which case the replacement is the one claimed.
	pub fn claim(&self, entry: &Arc<SharedEntry>) -> Arc<SharedEntry> {
		let libs = self.libs.read();
		let current = libs
			.get(&entry.name)
			.and_then(|versions| versions.get(entry.version.as_str()))
			.map_or_else(|| Arc::clone(entry), Arc::clone);
		current.loaded.store(true, Ordering::Release);
		current
	}

	/// All entries offered for `name`.
	pub fn entries(&self, name: &str) -> Vec<Arc<SharedEntry>> {
		self.libs
			.read()
			.get(name)
			.map(|versions| versions.values().cloned().collect())
			.unwrap_or_default()
	}

	/// Version strings offered for `name`, in key order.
	pub fn versions(&self, name: &str) -> Vec<String> {
		self.libs
			.read()
			.get(name)
			.map(|versions| versions.keys().cloned().collect())
			.unwrap_or_default()
	}

	pub fn names(&self) -> Vec<String> {
		self.libs.read().keys().cloned().collect()
	}

	pub fn contains(&self, name: &str) -> bool {
		self.libs.read().get(name).is_some_and(|versions| !versions.is_empty())
	}

	pub fn snapshot(&self) -> BTreeMap<String, BTreeMap<String, EntrySnapshot>> {
		self.libs
			.read()
			.iter()
			.map(|(name, versions)| {
				let versions = versions
					.iter()
					.map(|(version, entry)| (version.clone(), entry.snapshot()))
					.collect();
				(name.clone(), versions)
			})
			.collect()
	}
}

impl fmt::Debug for SharedScope {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("SharedScope").field("libs", &self.names()).finish()
	}
}

/// Share scopes by name.
#[derive(Debug, Default)]
pub struct ShareScopes {
	scopes: RwLock<FxHashMap<String, Arc<SharedScope>>>,
}

impl ShareScopes {
	pub fn new() -> Self {
		Self::default()
	}

	/// Attaches a caller-supplied scope object to `name`.
	///
	/// # Errors
	///
	/// [`Error::ContainerInitConflict`] if a different scope object is already
	/// bound to that name. Rebinding the same object is a no-op.
	pub fn bind(&self, name: &str, scope: Arc<SharedScope>) -> Result<()> {
		let mut scopes = self.scopes.write();
		match scopes.get(name) {
			Some(existing) if Arc::ptr_eq(existing, &scope) => Ok(()),
			Some(_) => Err(Error::ContainerInitConflict { scope: name.to_string() }),
			None => {
				scopes.insert(name.to_string(), scope);
				Ok(())
			}
		}
	}

	pub fn get(&self, name: &str) -> Option<Arc<SharedScope>> {
		self.scopes.read().get(name).cloned()
	}

	pub fn get_or_create(&self, name: &str) -> Arc<SharedScope> {
		if let Some(scope) = self.get(name) {
			return scope;
		}
		Arc::clone(self.scopes.write().entry(name.to_string()).or_default())
	}

	pub fn register(&self, scope_name: &str, entry: SharedEntry) -> InsertAction {
		self.get_or_create(scope_name).register(entry)
	}

	/// Merges `declarations` into the named scope, once per identity.
	pub fn init_scope(&self, scope_name: &str, declarations: &ShareDeclarations) -> bool {
		self.get_or_create(scope_name).init(declarations)
	}

	pub fn snapshot(&self) -> ScopeSnapshot {
		self.scopes
			.read()
			.iter()
			.map(|(name, scope)| (name.clone(), scope.snapshot()))
			.collect()
	}
}

//! The federation context.
//!
//! Owns the module registry, share scopes, chunk loader and diagnostics of one
//! container. Shared factories it hands to a share scope hold only a weak
//! reference back, so a scope outliving the container does not keep it alive.

use std::fmt;
use std::sync::{Arc, Weak};

use futures::FutureExt;
use futures::future::try_join_all;
use rustc_hash::FxHashMap;
use tokio::sync::OnceCell;
use tracing::{debug, trace};

use crate::chunk::{ChunkId, ChunkLoader};
use crate::consume::{self, ConsumeOptions};
use crate::diagnostics::Diagnostics;
use crate::exports::Exports;
use crate::manifest::ModuleRef;
use crate::registry::{ModuleFactory, ModuleId, ModuleRegistry, ModuleScope};
use crate::share::{ShareDeclaration, ShareDeclarations, ShareScopes, SharedFactory};
use crate::{Error, Result};

/// A shared library version offered by this container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProvideSpec {
	pub scope: String,
	pub name: String,
	pub version: String,
	/// Eager offers are defined locally and need no chunks.
	pub eager: bool,
	pub source: ModuleRef,
}

/// A module id served from a share scope.
#[derive(Debug, Clone)]
pub struct ConsumeSpec {
	pub scope: String,
	pub name: String,
	pub options: ConsumeOptions,
	/// Bundled copy to use as the fallback, unless `options.fallback` is set.
	pub fallback: Option<ModuleRef>,
}

impl ConsumeSpec {
	pub fn new(scope: impl Into<String>, name: impl Into<String>, options: ConsumeOptions) -> Self {
		Self {
			scope: scope.into(),
			name: name.into(),
			options,
			fallback: None,
		}
	}

	pub fn with_fallback(mut self, fallback: ModuleRef) -> Self {
		self.fallback = Some(fallback);
		self
	}
}

pub(crate) struct FederationParts {
	pub identity: String,
	pub loader: ChunkLoader,
	pub registry: Arc<ModuleRegistry>,
	pub provides: Vec<ProvideSpec>,
	pub consumes: Vec<(ModuleId, ConsumeSpec)>,
	pub chunk_consumes: FxHashMap<ChunkId, Vec<ModuleId>>,
	pub modules: Vec<(ModuleId, ModuleFactory)>,
	pub local_chunks: Vec<ChunkId>,
}

struct Consumed {
	spec: ConsumeSpec,
	resolved: OnceCell<()>,
}

/// Runtime context of one container.
pub struct Federation {
	identity: String,
	registry: Arc<ModuleRegistry>,
	scopes: ShareScopes,
	loader: ChunkLoader,
	diagnostics: Diagnostics,
	shares: FxHashMap<String, ShareDeclarations>,
	consumes: FxHashMap<ModuleId, Consumed>,
	chunk_consumes: FxHashMap<ChunkId, Vec<ModuleId>>,
}

impl Federation {
	pub(crate) fn new(parts: FederationParts) -> Arc<Self> {
		for (id, factory) in parts.modules {
			parts.registry.define_factory(id, factory);
		}
		for chunk_id in parts.local_chunks {
			parts.loader.mark_loaded(chunk_id);
		}

		Arc::new_cyclic(|weak: &Weak<Self>| {
			let mut shares: FxHashMap<String, ShareDeclarations> = FxHashMap::default();
			for provide in parts.provides {
				shares
					.entry(provide.scope.clone())
					.or_insert_with(|| ShareDeclarations {
						identity: parts.identity.clone(),
						declarations: Vec::new(),
					})
					.declarations
					.push(ShareDeclaration {
						name: provide.name,
						version: provide.version,
						eager: provide.eager,
						factory: module_factory(weak.clone(), provide.source),
					});
			}

			let consumes = parts
				.consumes
				.into_iter()
				.map(|(id, mut spec)| {
					if spec.options.fallback.is_none()
						&& let Some(fallback) = spec.fallback.clone()
					{
						spec.options.fallback = Some(module_factory(weak.clone(), fallback));
					}
					let consumed = Consumed {
						spec,
						resolved: OnceCell::new(),
					};
					(id, consumed)
				})
				.collect();

			Self {
				identity: parts.identity,
				registry: parts.registry,
				scopes: ShareScopes::new(),
				loader: parts.loader,
				diagnostics: Diagnostics::new(),
				shares,
				consumes,
				chunk_consumes: parts.chunk_consumes,
			}
		})
	}

	/// Unique name of the container, recorded as `from` on offered entries.
	pub fn identity(&self) -> &str {
		&self.identity
	}

	pub fn registry(&self) -> &Arc<ModuleRegistry> {
		&self.registry
	}

	pub fn scopes(&self) -> &ShareScopes {
		&self.scopes
	}

	pub fn loader(&self) -> &ChunkLoader {
		&self.loader
	}

	pub fn diagnostics(&self) -> &Diagnostics {
		&self.diagnostics
	}

	/// Merges this container's offers into the named scope, creating the
	/// scope if nothing is bound yet. Repeated calls are no-ops.
	pub fn init_sharing(&self, scope_name: &str) {
		let scope = self.scopes.get_or_create(scope_name);
		match self.shares.get(scope_name) {
			Some(declarations) => {
				scope.init(declarations);
			}
			None => trace!(scope = scope_name, identity = %self.identity, "nothing to share"),
		}
	}

	/// Resolves a shared library from the named scope.
	pub async fn resolve(&self, scope_name: &str, name: &str, options: &ConsumeOptions) -> Result<Exports> {
		self.init_sharing(scope_name);
		let scope = self.scopes.get_or_create(scope_name);
		consume::resolve(&scope, scope_name, name, options, &self.diagnostics).await
	}

	/// Resolves a consumed module once and defines it in the registry.
	///
	/// Ids that are not consumed modules succeed immediately. A failed
	/// resolution is retried by the next caller.
	pub async fn consume(&self, id: &ModuleId) -> Result<()> {
		let Some(consumed) = self.consumes.get(id) else {
			return Ok(());
		};
		consumed
			.resolved
			.get_or_try_init(|| async {
				let spec = &consumed.spec;
				let exports = self.resolve(&spec.scope, &spec.name, &spec.options).await?;
				debug!(module = %id, name = %spec.name, "consumed shared module");
				self.registry.define(id.clone(), move |module: &mut ModuleScope<'_>| {
					module.replace_exports(exports.clone());
					Ok(())
				});
				Ok::<(), Error>(())
			})
			.await?;
		Ok(())
	}

	/// Runs everything a chunk needs: its consumed modules are resolved and
	/// the chunk itself is loaded, concurrently.
	pub async fn ensure_chunk(&self, chunk_id: &ChunkId) -> Result<()> {
		let consumed = self.chunk_consumes.get(chunk_id).map(Vec::as_slice).unwrap_or_default();
		let consumed = try_join_all(consumed.iter().map(|id| self.consume(id)));
		futures::try_join!(consumed, self.loader.load(chunk_id))?;
		Ok(())
	}

	pub async fn ensure_chunks(&self, chunk_ids: &[ChunkId]) -> Result<()> {
		try_join_all(chunk_ids.iter().map(|chunk_id| self.ensure_chunk(chunk_id))).await?;
		Ok(())
	}

	/// Loads the chunks of `target` and requires its module.
	pub async fn load_module(&self, target: &ModuleRef) -> Result<Exports> {
		self.ensure_chunks(&target.chunks).await?;
		self.require(&target.module)
	}

	pub fn require(&self, id: &ModuleId) -> Result<Exports> {
		self.registry.require(id)
	}
}

impl fmt::Debug for Federation {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("Federation")
			.field("identity", &self.identity)
			.field("registry", &self.registry)
			.field("scopes", &self.scopes)
			.field("loader", &self.loader)
			.finish_non_exhaustive()
	}
}

/// Shared factory that loads a module of this container on demand.
fn module_factory(federation: Weak<Federation>, target: ModuleRef) -> SharedFactory {
	Arc::new(move || {
		let federation = federation.clone();
		let target = target.clone();
		async move {
			let federation = federation
				.upgrade()
				.ok_or_else(|| Error::ContextDropped(target.module.clone()))?;
			federation.load_module(&target).await
		}
		.boxed()
	})
}

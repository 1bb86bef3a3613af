//! Remote container facade.
//!
//! A [`Container`] is what other containers see: `init` joins a share scope,
//! `get` loads an exposed module. Containers are assembled with a
//! [`ContainerBuilder`], either by hand or from a [`ContainerManifest`].

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use rustc_hash::FxHashMap;
use tracing::{debug, info};

use crate::chunk::{ChunkFetcher, ChunkId, ChunkLoader};
use crate::config::LoaderConfig;
use crate::consume::ConsumeOptions;
use crate::error::ModuleError;
use crate::exports::Exports;
use crate::federation::{ConsumeSpec, Federation, FederationParts, ProvideSpec};
use crate::locator::ChunkLocator;
use crate::manifest::{ContainerManifest, ModuleRef};
use crate::registry::{ModuleFactory, ModuleId, ModuleRegistry, ModuleScope};
use crate::share::SharedScope;
use crate::{DEFAULT_SHARE_SCOPE, Error, Result};

/// Exposed names are stored with a leading `./`.
fn normalize_request(request: &str) -> String {
	if request == "." || request.starts_with("./") {
		request.to_string()
	} else {
		format!("./{request}")
	}
}

/// A federated container.
pub struct Container {
	name: String,
	share_scope: String,
	exposes: BTreeMap<String, ModuleRef>,
	federation: Arc<Federation>,
}

impl Container {
	pub fn builder(name: impl Into<String>, fetcher: Arc<dyn ChunkFetcher>) -> ContainerBuilder {
		ContainerBuilder::new(name, fetcher)
	}

	pub fn name(&self) -> &str {
		&self.name
	}

	/// Name of the share scope `init` binds.
	pub fn share_scope_name(&self) -> &str {
		&self.share_scope
	}

	pub fn federation(&self) -> &Arc<Federation> {
		&self.federation
	}

	/// Exposed names, with their `./` prefix.
	pub fn exposes(&self) -> impl Iterator<Item = &str> {
		self.exposes.keys().map(String::as_str)
	}

	/// The scope bound by `init`, or created by the first resolution.
	pub fn share_scope(&self) -> Option<Arc<SharedScope>> {
		self.federation.scopes().get(&self.share_scope)
	}

	/// Joins `scope` and merges this container's shared offers into it.
	///
	/// Calling `init` again with the same scope has no further effect.
	///
	/// # Errors
	///
	/// [`Error::ContainerInitConflict`] if a different scope is already bound.
	pub fn init(&self, scope: Arc<SharedScope>) -> Result<()> {
		self.federation.scopes().bind(&self.share_scope, scope)?;
		self.federation.init_sharing(&self.share_scope);
		info!(container = %self.name, scope = %self.share_scope, "container initialized");
		Ok(())
	}

	/// Loads an exposed module and returns its exports.
	///
	/// `request` may be given with or without the `./` prefix.
	///
	/// # Errors
	///
	/// [`Error::ModuleNotFound`] for names the container does not expose, or
	/// whatever loading the chunks or running the module produced.
	pub async fn get(&self, request: &str) -> Result<Exports> {
		let key = normalize_request(request);
		let Some(target) = self.exposes.get(&key) else {
			return Err(Error::ModuleNotFound {
				request: request.to_string(),
				container: self.name.clone(),
			});
		};
		debug!(container = %self.name, request = %key, module = %target.module, "get");
		self.federation.load_module(target).await
	}

	/// Resolves the consumed modules of `chunk_id` and loads the chunk.
	pub async fn ensure_chunk(&self, chunk_id: &ChunkId) -> Result<()> {
		self.federation.ensure_chunk(chunk_id).await
	}
}

impl fmt::Debug for Container {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("Container")
			.field("name", &self.name)
			.field("share_scope", &self.share_scope)
			.field("exposes", &self.exposes.keys().collect::<Vec<_>>())
			.finish_non_exhaustive()
	}
}

/// Assembles a [`Container`].
pub struct ContainerBuilder {
	name: String,
	fetcher: Arc<dyn ChunkFetcher>,
	share_scope: String,
	config: LoaderConfig,
	hashes: Vec<(ChunkId, String)>,
	exposes: BTreeMap<String, ModuleRef>,
	provides: Vec<ProvideSpec>,
	consumes: Vec<(ModuleId, ConsumeSpec)>,
	chunk_consumes: FxHashMap<ChunkId, Vec<ModuleId>>,
	modules: Vec<(ModuleId, ModuleFactory)>,
	local_chunks: Vec<ChunkId>,
}

impl ContainerBuilder {
	pub fn new(name: impl Into<String>, fetcher: Arc<dyn ChunkFetcher>) -> Self {
		Self {
			name: name.into(),
			fetcher,
			share_scope: DEFAULT_SHARE_SCOPE.to_string(),
			config: LoaderConfig::default(),
			hashes: Vec::new(),
			exposes: BTreeMap::new(),
			provides: Vec::new(),
			consumes: Vec::new(),
			chunk_consumes: FxHashMap::default(),
			modules: Vec::new(),
			local_chunks: Vec::new(),
		}
	}

	/// Builder for the container described by `manifest`.
	pub fn from_manifest(manifest: ContainerManifest, fetcher: Arc<dyn ChunkFetcher>) -> Self {
		let mut builder = Self::new(manifest.name, fetcher).share_scope(manifest.share_scope);
		for (chunk_id, hash) in manifest.chunks {
			builder = builder.chunk_hash(chunk_id, hash);
		}
		for chunk_id in manifest.local_chunks {
			builder = builder.local_chunk(chunk_id);
		}
		for (name, target) in manifest.exposes {
			builder = builder.expose(name, target);
		}
		for provide in manifest.provides {
			let scope = provide.share_scope.unwrap_or_else(|| builder.share_scope.clone());
			builder = builder.provide(ProvideSpec {
				scope,
				name: provide.name,
				version: provide.version,
				eager: provide.eager,
				source: provide.source,
			});
		}
		for consume in manifest.consumes {
			let scope = consume.share_scope.unwrap_or_else(|| builder.share_scope.clone());
			let options = ConsumeOptions {
				required_version: consume.required_version,
				singleton: consume.singleton,
				strict_version: consume.strict_version,
				eager: consume.eager,
				fallback: None,
			};
			let mut spec = ConsumeSpec::new(scope, consume.name, options);
			if let Some(fallback) = consume.fallback {
				spec = spec.with_fallback(fallback);
			}
			builder = builder.consume(consume.module, spec);
		}
		for (chunk_id, modules) in manifest.chunk_consumes {
			builder = builder.chunk_consumes(chunk_id, modules);
		}
		builder
	}

	pub fn share_scope(mut self, scope: impl Into<String>) -> Self {
		self.share_scope = scope.into();
		self
	}

	pub fn config(mut self, config: LoaderConfig) -> Self {
		self.config = config;
		self
	}

	pub fn chunk_hash(mut self, chunk_id: impl Into<ChunkId>, hash: impl Into<String>) -> Self {
		self.hashes.push((chunk_id.into(), hash.into()));
		self
	}

	pub fn expose(mut self, name: impl AsRef<str>, target: ModuleRef) -> Self {
		self.exposes.insert(normalize_request(name.as_ref()), target);
		self
	}

	pub fn provide(mut self, provide: ProvideSpec) -> Self {
		self.provides.push(provide);
		self
	}

	/// Serves module `id` from the share scope instead of a local factory.
	pub fn consume(mut self, id: impl Into<ModuleId>, spec: ConsumeSpec) -> Self {
		self.consumes.push((id.into(), spec));
		self
	}

	/// Consumed modules that must be resolved before `chunk_id` runs.
	pub fn chunk_consumes<I, M>(mut self, chunk_id: impl Into<ChunkId>, modules: I) -> Self
	where
		I: IntoIterator<Item = M>,
		M: Into<ModuleId>,
	{
		self.chunk_consumes
			.entry(chunk_id.into())
			.or_default()
			.extend(modules.into_iter().map(Into::into));
		self
	}

	/// Defines a module that ships with the container entry.
	pub fn module<F>(mut self, id: impl Into<ModuleId>, factory: F) -> Self
	where
		F: Fn(&mut ModuleScope<'_>) -> Result<(), ModuleError> + Send + Sync + 'static,
	{
		self.modules.push((id.into(), Arc::new(factory)));
		self
	}

	/// Marks a chunk as bundled with the entry; it is never fetched.
	pub fn local_chunk(mut self, chunk_id: impl Into<ChunkId>) -> Self {
		self.local_chunks.push(chunk_id.into());
		self
	}

	/// # Errors
	///
	/// [`Error::PublicPath`] when the configured script URL yields no public path.
	pub fn build(self) -> Result<Container> {
		let mut locator = ChunkLocator::new(self.config.resolve_public_path()?).cache_bust(self.config.cache_bust);
		for (chunk_id, hash) in self.hashes {
			locator.set_hash(chunk_id, hash);
		}

		let registry = Arc::new(ModuleRegistry::new());
		let loader = ChunkLoader::new(self.fetcher, locator, self.config.chunk_timeout(), Arc::clone(&registry));
		let federation = Federation::new(FederationParts {
			identity: self.name.clone(),
			loader,
			registry,
			provides: self.provides,
			consumes: self.consumes,
			chunk_consumes: self.chunk_consumes,
			modules: self.modules,
			local_chunks: self.local_chunks,
		});

		debug!(container = %self.name, exposes = self.exposes.len(), "container built");
		Ok(Container {
			name: self.name,
			share_scope: self.share_scope,
			exposes: self.exposes,
			federation,
		})
	}
}

impl fmt::Debug for ContainerBuilder {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("ContainerBuilder")
			.field("name", &self.name)
			.field("share_scope", &self.share_scope)
			.field("config", &self.config)
			.finish_non_exhaustive()
	}
}

#[cfg(test)]
mod tests;

//! Chunk loading.
//!
//! A chunk is a remotely fetched bundle of module factories. [`ChunkLoader`]
//! guarantees at most one fetch per chunk at a time: the first caller becomes
//! the leader and performs the fetch, later callers wait on a `watch` channel
//! for the leader's outcome.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::error::{ChunkLoadError, ChunkLoadErrorKind, ModuleError};
use crate::locator::ChunkLocator;
use crate::registry::{ModuleFactory, ModuleId, ModuleRegistry, ModuleScope};
use crate::{Error, Result};

/// Identifier of a chunk.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChunkId(String);

impl ChunkId {
	pub fn new(id: impl Into<String>) -> Self {
		Self(id.into())
	}

	pub fn as_str(&self) -> &str {
		&self.0
	}
}

impl fmt::Display for ChunkId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(&self.0)
	}
}

impl From<&str> for ChunkId {
	fn from(id: &str) -> Self {
		Self(id.to_string())
	}
}

impl From<String> for ChunkId {
	fn from(id: String) -> Self {
		Self(id)
	}
}

impl From<u32> for ChunkId {
	fn from(id: u32) -> Self {
		Self(id.to_string())
	}
}

/// What the loader asks a [`ChunkFetcher`] for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkRequest {
	pub chunk_id: ChunkId,
	pub url: String,
}

/// Failure reported by a [`ChunkFetcher`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FetchError {
	/// Nothing was found at the requested location.
	#[error("missing")]
	Missing,
	#[error("{0}")]
	Transport(String),
}

/// Module factories delivered by one fetch.
///
/// A payload may complete several chunks at once.
#[derive(Clone, Default)]
pub struct ChunkPayload {
	pub chunk_ids: Vec<ChunkId>,
	pub modules: Vec<(ModuleId, ModuleFactory)>,
}

impl ChunkPayload {
	pub fn new(chunk_id: impl Into<ChunkId>) -> Self {
		Self {
			chunk_ids: vec![chunk_id.into()],
			modules: Vec::new(),
		}
	}

	/// Marks another chunk as completed by this payload.
	pub fn with_chunk(mut self, chunk_id: impl Into<ChunkId>) -> Self {
		self.chunk_ids.push(chunk_id.into());
		self
	}

	pub fn module<F>(mut self, id: impl Into<ModuleId>, factory: F) -> Self
	where
		F: Fn(&mut ModuleScope<'_>) -> Result<(), ModuleError> + Send + Sync + 'static,
	{
		self.modules.push((id.into(), Arc::new(factory)));
		self
	}
}

impl fmt::Debug for ChunkPayload {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		let modules: Vec<&ModuleId> = self.modules.iter().map(|(id, _)| id).collect();
		f.debug_struct("ChunkPayload")
			.field("chunk_ids", &self.chunk_ids)
			.field("modules", &modules)
			.finish()
	}
}

/// Fetches and evaluates a chunk, yielding its module factories.
#[async_trait]
pub trait ChunkFetcher: Send + Sync {
	async fn fetch(&self, request: &ChunkRequest) -> std::result::Result<ChunkPayload, FetchError>;
}

/// Lifecycle of a chunk as reported by [`ChunkLoader::status`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkStatus {
	Unrequested,
	Pending,
	Loaded,
	/// The last attempt failed. The next `load` starts over.
	Failed,
}

type LoadOutcome = std::result::Result<(), ChunkLoadError>;

/// What a leader publishes to its waiters.
#[derive(Clone)]
enum Published {
	Done(LoadOutcome),
	/// The leader was dropped before finishing. Waiters elect a new one.
	Abandoned,
}

/// Tracking state for a fetch in progress.
struct InFlightLoad {
	tx: watch::Sender<Option<Published>>,
	rx: watch::Receiver<Option<Published>>,
}

enum ChunkState {
	Pending(Arc<InFlightLoad>),
	Loaded,
	Failed(ChunkLoadError),
}

/// Loads chunks into a [`ModuleRegistry`].
pub struct ChunkLoader {
	fetcher: Arc<dyn ChunkFetcher>,
	locator: ChunkLocator,
	timeout: Duration,
	registry: Arc<ModuleRegistry>,
	chunks: Mutex<FxHashMap<ChunkId, ChunkState>>,
}

impl ChunkLoader {
	pub fn new(fetcher: Arc<dyn ChunkFetcher>, locator: ChunkLocator, timeout: Duration, registry: Arc<ModuleRegistry>) -> Self {
		Self {
			fetcher,
			locator,
			timeout,
			registry,
			chunks: Mutex::new(FxHashMap::default()),
		}
	}

	pub fn locator(&self) -> &ChunkLocator {
		&self.locator
	}

	pub fn timeout(&self) -> Duration {
		self.timeout
	}

	/// Marks a chunk as already present, e.g. the chunk that carries the
	/// container entry itself.
	pub fn mark_loaded(&self, chunk_id: impl Into<ChunkId>) {
		self.chunks.lock().insert(chunk_id.into(), ChunkState::Loaded);
	}

	pub fn status(&self, chunk_id: &ChunkId) -> ChunkStatus {
		match self.chunks.lock().get(chunk_id) {
			None => ChunkStatus::Unrequested,
			Some(ChunkState::Pending(_)) => ChunkStatus::Pending,
			Some(ChunkState::Loaded) => ChunkStatus::Loaded,
			Some(ChunkState::Failed(_)) => ChunkStatus::Failed,
		}
	}

	/// Returns the error of the last failed attempt, if the chunk is failed.
	pub fn last_error(&self, chunk_id: &ChunkId) -> Option<ChunkLoadError> {
		match self.chunks.lock().get(chunk_id) {
			Some(ChunkState::Failed(error)) => Some(error.clone()),
			_ => None,
		}
	}

	/// Loads `chunk_id` unless it is already loaded.
	///
	/// # Singleflight Protocol
	///
	/// 1. Fast path: chunk already loaded
	/// 2. Leader election: first caller inserts the in-flight entry, others wait on it
	/// 3. Leader fetches with a timeout, installs the payload and publishes the outcome
	/// 4. Failure resets the chunk so the next call fetches again
	///
	/// A waiter whose leader is dropped mid-fetch goes back to step 2 rather
	/// than failing.
	///
	/// # Errors
	///
	/// [`Error::ChunkLoad`] carrying the chunk id, failure kind and request URL.
	pub async fn load(&self, chunk_id: &ChunkId) -> Result<()> {
		loop {
			// 1 + 2. Fast path and leader election
			let (inflight, is_leader) = {
				let mut chunks = self.chunks.lock();
				match chunks.get(chunk_id) {
					Some(ChunkState::Loaded) => return Ok(()),
					Some(ChunkState::Pending(inflight)) => (Arc::clone(inflight), false),
					Some(ChunkState::Failed(_)) | None => {
						let (tx, rx) = watch::channel(None);
						let inflight = Arc::new(InFlightLoad { tx, rx });
						chunks.insert(chunk_id.clone(), ChunkState::Pending(Arc::clone(&inflight)));
						(inflight, true)
					}
				}
			};

			if is_leader {
				return self.lead(chunk_id, inflight).await.map_err(Error::from);
			}
			if let Some(outcome) = wait_for_leader(&inflight).await {
				return outcome.map_err(Error::from);
			}
			debug!(chunk = %chunk_id, "chunk leader dropped, electing a new one");
		}
	}

	/// 3 + 4. Leader work: fetch, install, publish.
	async fn lead(&self, chunk_id: &ChunkId, inflight: Arc<InFlightLoad>) -> LoadOutcome {
		let url = self.locator.url(chunk_id);
		let guard = LoadGuard {
			loader: self,
			chunk_id: chunk_id.clone(),
			inflight,
			completed: false,
		};
		let request = ChunkRequest {
			chunk_id: chunk_id.clone(),
			url: url.clone(),
		};

		debug!(chunk = %chunk_id, url = %url, "fetching chunk");
		let outcome = match tokio::time::timeout(self.timeout, self.fetcher.fetch(&request)).await {
			Ok(Ok(payload)) => self.install(chunk_id, payload),
			Ok(Err(FetchError::Missing)) => Err(ChunkLoadErrorKind::Missing),
			Ok(Err(FetchError::Transport(message))) => Err(ChunkLoadErrorKind::Transport(message)),
			Err(_) => Err(ChunkLoadErrorKind::Timeout),
		};
		let outcome = outcome.map_err(|kind| ChunkLoadError {
			chunk_id: chunk_id.clone(),
			kind,
			request: url,
		});

		guard.complete(outcome)
	}

	/// Defines the payload's modules and marks every chunk it carries as loaded.
	fn install(&self, requested: &ChunkId, payload: ChunkPayload) -> std::result::Result<(), ChunkLoadErrorKind> {
		let module_count = payload.modules.len();
		for (id, factory) in payload.modules {
			self.registry.define_factory(id, factory);
		}

		let mut chunks = self.chunks.lock();
		for chunk_id in &payload.chunk_ids {
			if chunk_id == requested {
				continue;
			}
			// Another caller may be fetching this chunk right now.
			if let Some(ChunkState::Pending(other)) = chunks.insert(chunk_id.clone(), ChunkState::Loaded) {
				let _ = other.tx.send(Some(Published::Done(Ok(()))));
			}
		}
		drop(chunks);

		if payload.chunk_ids.contains(requested) {
			info!(chunk = %requested, modules = module_count, "chunk loaded");
			Ok(())
		} else {
			warn!(chunk = %requested, carried = ?payload.chunk_ids, "payload did not register the requested chunk");
			Err(ChunkLoadErrorKind::Missing)
		}
	}
}

impl fmt::Debug for ChunkLoader {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("ChunkLoader")
			.field("locator", &self.locator)
			.field("timeout", &self.timeout)
			.field("chunks", &self.chunks.lock().len())
			.finish()
	}
}

/// Waits for the leader's outcome. `None` means the leader was dropped.
async fn wait_for_leader(inflight: &InFlightLoad) -> Option<LoadOutcome> {
	let mut rx = inflight.rx.clone();
	loop {
		let published = {
			let borrow = rx.borrow();
			borrow.as_ref().cloned()
		};

		match published {
			Some(Published::Done(outcome)) => return Some(outcome),
			Some(Published::Abandoned) => return None,
			None => {}
		}

		if rx.changed().await.is_err() {
			return None;
		}
	}
}

/// Guard that un-wedges the chunk table if the leader is dropped mid-fetch.
struct LoadGuard<'a> {
	loader: &'a ChunkLoader,
	chunk_id: ChunkId,
	inflight: Arc<InFlightLoad>,
	completed: bool,
}

impl LoadGuard<'_> {
	fn complete(mut self, outcome: LoadOutcome) -> LoadOutcome {
		self.completed = true;

		let outcome = {
			let mut chunks = self.loader.chunks.lock();
			match chunks.get(&self.chunk_id) {
				// A payload fetched for another chunk already carried this one.
				Some(ChunkState::Loaded) => Ok(()),
				Some(ChunkState::Pending(current)) if Arc::ptr_eq(current, &self.inflight) => {
					let state = match &outcome {
						Ok(()) => ChunkState::Loaded,
						Err(error) => ChunkState::Failed(error.clone()),
					};
					chunks.insert(self.chunk_id.clone(), state);
					outcome
				}
				_ => outcome,
			}
		};

		if let Err(error) = &outcome {
			warn!(chunk = %self.chunk_id, error = %error, "chunk load failed");
		}
		let _ = self.inflight.tx.send(Some(Published::Done(outcome.clone())));
		outcome
	}
}

impl Drop for LoadGuard<'_> {
	fn drop(&mut self) {
		if self.completed {
			return;
		}

		// Leader exited early: reset the chunk and let a waiter take over.
		{
			let mut chunks = self.loader.chunks.lock();
			if matches!(chunks.get(&self.chunk_id), Some(ChunkState::Pending(current)) if Arc::ptr_eq(current, &self.inflight)) {
				chunks.remove(&self.chunk_id);
			}
		}
		debug!(chunk = %self.chunk_id, "chunk load abandoned by its leader");
		let _ = self.inflight.tx.send(Some(Published::Abandoned));
	}
}

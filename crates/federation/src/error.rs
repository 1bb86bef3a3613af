use std::fmt;
use std::sync::Arc;

use crate::chunk::ChunkId;
use crate::registry::ModuleId;

/// Why a chunk failed to load.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChunkLoadErrorKind {
	/// The fetch completed but the chunk never registered itself.
	Missing,
	/// No payload arrived within the configured timeout.
	Timeout,
	/// Any other transport failure.
	Transport(String),
}

impl fmt::Display for ChunkLoadErrorKind {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			Self::Missing => f.write_str("missing"),
			Self::Timeout => f.write_str("timeout"),
			Self::Transport(message) => f.write_str(message),
		}
	}
}

/// A failed chunk load, delivered to every caller waiting on that chunk.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("loading chunk {chunk_id} failed ({kind}: {request})")]
pub struct ChunkLoadError {
	pub chunk_id: ChunkId,
	pub kind: ChunkLoadErrorKind,
	/// URL the chunk was requested from.
	pub request: String,
}

/// Error raised by a module body.
#[derive(Debug, thiserror::Error)]
pub enum ModuleError {
	#[error("{0}")]
	Message(String),
	/// A runtime operation inside the body failed, e.g. requiring another module.
	#[error(transparent)]
	Runtime(Box<Error>),
}

impl ModuleError {
	pub fn msg(message: impl Into<String>) -> Self {
		Self::Message(message.into())
	}
}

impl From<Error> for ModuleError {
	fn from(error: Error) -> Self {
		Self::Runtime(Box::new(error))
	}
}

/// Possible errors.
///
/// Errors are cheap to clone so one failure can be handed to every waiter.
#[derive(Debug, Clone, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
	#[error(transparent)]
	ChunkLoad(#[from] ChunkLoadError),
	/// `init` was called with a different share scope than the one already bound.
	#[error("container initialization failed as it has already been initialized with a different share scope ({scope})")]
	ContainerInitConflict { scope: String },
	/// A consumer opted into strict versions and nothing registered satisfies it.
	#[error("unsatisfied version {version} of shared module {name} in scope {scope} (required {required})")]
	UnsatisfiedSharedVersion {
		scope: String,
		name: String,
		version: String,
		required: String,
	},
	/// `get` was asked for a name the container does not expose.
	#[error("module \"{request}\" does not exist in container {container}")]
	ModuleNotFound { request: String, container: String },
	/// A module body failed. The failure is cached on the module record.
	#[error("module {id} failed to instantiate: {source}")]
	ModuleInstantiation { id: ModuleId, source: Arc<ModuleError> },
	/// No factory is defined for the requested module id.
	#[error("no factory registered for module {0}")]
	UnknownModule(ModuleId),
	#[error("shared module {name} is not available in share scope {scope}")]
	SharedModuleMissing { scope: String, name: String },
	/// An eager consumer found only lazy entries that were never loaded.
	#[error("shared module {name} in share scope {scope} has no eager or loaded version")]
	EagerUnavailable { scope: String, name: String },
	#[error("invalid container manifest: {0}")]
	Manifest(String),
	#[error("cannot derive public path from script url {0:?}")]
	PublicPath(String),
	/// A shared factory outlived the federation context that declared it.
	#[error("the container providing module {0} was dropped")]
	ContextDropped(ModuleId),
}

impl From<serde_json::Error> for Error {
	fn from(error: serde_json::Error) -> Self {
		Self::Manifest(error.to_string())
	}
}

//! Build output describing a container.
//!
//! The bundler emits which modules a container exposes, which shared
//! libraries it offers and consumes, and the content hash of each chunk.
//! Module code itself arrives through the [`crate::ChunkFetcher`].

use std::collections::BTreeMap;

use fedra_semver::Range;
use serde::{Deserialize, Serialize};

use crate::DEFAULT_SHARE_SCOPE;
use crate::Result;
use crate::chunk::ChunkId;
use crate::registry::ModuleId;

/// Where a module lives: the chunks to load, then the module to require.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleRef {
	#[serde(default)]
	pub chunks: Vec<ChunkId>,
	pub module: ModuleId,
}

impl ModuleRef {
	pub fn new<I, C>(chunks: I, module: impl Into<ModuleId>) -> Self
	where
		I: IntoIterator<Item = C>,
		C: Into<ChunkId>,
	{
		Self {
			chunks: chunks.into_iter().map(Into::into).collect(),
			module: module.into(),
		}
	}

	/// A module that is already defined locally and needs no chunks.
	pub fn local(module: impl Into<ModuleId>) -> Self {
		Self {
			chunks: Vec::new(),
			module: module.into(),
		}
	}
}

/// A shared library version the container offers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProvideManifest {
	pub name: String,
	pub version: String,
	#[serde(default)]
	pub eager: bool,
	/// Defaults to the container's share scope.
	#[serde(default)]
	pub share_scope: Option<String>,
	#[serde(flatten)]
	pub source: ModuleRef,
}

/// A module id whose implementation is taken from the share scope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsumeManifest {
	pub module: ModuleId,
	pub name: String,
	#[serde(default)]
	pub share_scope: Option<String>,
	#[serde(default)]
	pub required_version: Option<Range>,
	#[serde(default)]
	pub singleton: bool,
	#[serde(default)]
	pub strict_version: bool,
	#[serde(default)]
	pub eager: bool,
	/// Bundled copy used when the scope cannot serve the request.
	#[serde(default)]
	pub fallback: Option<ModuleRef>,
}

/// Serialized description of a container.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerManifest {
	/// Unique name, recorded as `from` on every offered shared entry.
	pub name: String,
	#[serde(default = "default_share_scope")]
	pub share_scope: String,
	/// Content hash per chunk, used in chunk file names.
	#[serde(default)]
	pub chunks: BTreeMap<ChunkId, String>,
	/// Chunks bundled with the entry script; never fetched.
	#[serde(default)]
	pub local_chunks: Vec<ChunkId>,
	/// Exposed name (e.g. `./index`) to module location.
	#[serde(default)]
	pub exposes: BTreeMap<String, ModuleRef>,
	#[serde(default)]
	pub provides: Vec<ProvideManifest>,
	#[serde(default)]
	pub consumes: Vec<ConsumeManifest>,
	/// Consumed module ids that must be resolved before each chunk runs.
	#[serde(default)]
	pub chunk_consumes: BTreeMap<ChunkId, Vec<ModuleId>>,
}

fn default_share_scope() -> String {
	DEFAULT_SHARE_SCOPE.to_string()
}

impl ContainerManifest {
	/// Parses a manifest from JSON.
	///
	/// # Errors
	///
	/// [`crate::Error::Manifest`] when the JSON is malformed.
	pub fn from_json(json: &str) -> Result<Self> {
		Ok(serde_json::from_str(json)?)
	}

	pub fn to_json(&self) -> Result<String> {
		Ok(serde_json::to_string_pretty(self)?)
	}
}

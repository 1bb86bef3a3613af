use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::Result;
use crate::locator::PublicPath;

/// Chunk loading configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoaderConfig {
	/// How long a single chunk fetch may take, in milliseconds.
	#[serde(default = "default_chunk_timeout_ms")]
	pub chunk_timeout_ms: u64,
	/// Explicit public path. Takes precedence over `script_url`.
	#[serde(default)]
	pub public_path: Option<String>,
	/// URL of the script hosting the container entry, used to derive the
	/// public path when none is given.
	#[serde(default)]
	pub script_url: Option<String>,
	/// Append `?v=<hash>` to chunk URLs.
	#[serde(default = "default_cache_bust")]
	pub cache_bust: bool,
}

/// Returns the default chunk timeout: two minutes.
fn default_chunk_timeout_ms() -> u64 {
	120_000
}

fn default_cache_bust() -> bool {
	true
}

impl Default for LoaderConfig {
	fn default() -> Self {
		Self {
			chunk_timeout_ms: default_chunk_timeout_ms(),
			public_path: None,
			script_url: None,
			cache_bust: default_cache_bust(),
		}
	}
}

impl LoaderConfig {
	pub fn chunk_timeout(&self) -> Duration {
		Duration::from_millis(self.chunk_timeout_ms)
	}

	/// Resolves the public path: explicit path, then script URL, then empty.
	pub fn resolve_public_path(&self) -> Result<PublicPath> {
		if let Some(path) = &self.public_path {
			return Ok(PublicPath::new(path.clone()));
		}
		match &self.script_url {
			Some(script_url) => PublicPath::from_script_url(script_url),
			None => Ok(PublicPath::default()),
		}
	}
}

//! Chunk URL computation.

use std::fmt;

use rustc_hash::FxHashMap;
use url::Url;

use crate::chunk::ChunkId;
use crate::{Error, Result};

/// Base location chunk file names are appended to.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PublicPath(String);

impl PublicPath {
	pub fn new(path: impl Into<String>) -> Self {
		Self(path.into())
	}

	/// Derives the public path from the URL of the script that hosts the
	/// container entry: fragment, query and last path segment are dropped.
	///
	/// Relative script paths are handled textually.
	pub fn from_script_url(script_url: &str) -> Result<Self> {
		let script_url = script_url.trim();
		if script_url.is_empty() {
			return Err(Error::PublicPath(script_url.to_string()));
		}
		match Url::parse(script_url) {
			Ok(mut url) => {
				url.set_fragment(None);
				url.set_query(None);
				let base = url
					.join("./")
					.map_err(|_| Error::PublicPath(script_url.to_string()))?;
				Ok(Self(base.into()))
			}
			Err(url::ParseError::RelativeUrlWithoutBase) => Ok(Self(strip_relative(script_url).to_string())),
			Err(_) => Err(Error::PublicPath(script_url.to_string())),
		}
	}

	pub fn as_str(&self) -> &str {
		&self.0
	}
}

fn strip_relative(path: &str) -> &str {
	let path = path.split('#').next().unwrap_or_default();
	let path = path.split('?').next().unwrap_or_default();
	match path.rfind('/') {
		Some(index) => &path[..=index],
		None => "",
	}
}

impl fmt::Display for PublicPath {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(&self.0)
	}
}

/// Computes where each chunk is fetched from: `public path + id.hash.js`.
#[derive(Debug, Clone)]
pub struct ChunkLocator {
	public_path: PublicPath,
	hashes: FxHashMap<ChunkId, String>,
	cache_bust: bool,
}

impl ChunkLocator {
	pub fn new(public_path: PublicPath) -> Self {
		Self {
			public_path,
			hashes: FxHashMap::default(),
			cache_bust: true,
		}
	}

	pub fn with_hash(mut self, chunk_id: impl Into<ChunkId>, hash: impl Into<String>) -> Self {
		self.set_hash(chunk_id, hash);
		self
	}

	pub fn set_hash(&mut self, chunk_id: impl Into<ChunkId>, hash: impl Into<String>) {
		self.hashes.insert(chunk_id.into(), hash.into());
	}

	/// Appends `?v=<hash>` to chunk URLs when enabled (the default).
	pub fn cache_bust(mut self, enabled: bool) -> Self {
		self.cache_bust = enabled;
		self
	}

	pub fn public_path(&self) -> &PublicPath {
		&self.public_path
	}

	pub fn file_name(&self, chunk_id: &ChunkId) -> String {
		match self.hashes.get(chunk_id) {
			Some(hash) => format!("{chunk_id}.{hash}.js"),
			None => format!("{chunk_id}.js"),
		}
	}

	pub fn url(&self, chunk_id: &ChunkId) -> String {
		let mut url = format!("{}{}", self.public_path, self.file_name(chunk_id));
		if self.cache_bust
			&& let Some(hash) = self.hashes.get(chunk_id)
		{
			url.push_str("?v=");
			url.push_str(hash);
		}
		url
	}
}

//! Consumption resolver.
//!
//! Decides which offered version of a shared library a consumer receives.
//! Unsatisfied ranges are served leniently: the highest version is used and a
//! [`Diagnostic`] is recorded, unless the consumer asked for strict versions.

use std::fmt;
use std::sync::Arc;

use fedra_semver::Range;
use tracing::debug;

use crate::diagnostics::{Diagnostic, Diagnostics};
use crate::exports::Exports;
use crate::share::{SharedEntry, SharedFactory, SharedScope};
use crate::{Error, Result};

/// How a module consumes a shared library.
#[derive(Clone, Default)]
pub struct ConsumeOptions {
	/// Range the consumer was built against. `None` accepts any version.
	pub required_version: Option<Range>,
	/// Everyone shares one instance: a loaded version wins over a higher one.
	pub singleton: bool,
	/// Fail instead of serving an unsatisfying version.
	pub strict_version: bool,
	/// Only eager or already loaded entries are eligible.
	pub eager: bool,
	/// Local copy used when the scope cannot serve the request.
	pub fallback: Option<SharedFactory>,
}

impl ConsumeOptions {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn required_version(mut self, range: impl Into<Range>) -> Self {
		self.required_version = Some(range.into());
		self
	}

	pub fn singleton(mut self) -> Self {
		self.singleton = true;
		self
	}

	pub fn strict_version(mut self) -> Self {
		self.strict_version = true;
		self
	}

	pub fn eager(mut self) -> Self {
		self.eager = true;
		self
	}

	pub fn fallback(mut self, factory: SharedFactory) -> Self {
		self.fallback = Some(factory);
		self
	}
}

impl fmt::Debug for ConsumeOptions {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("ConsumeOptions")
			.field("required_version", &self.required_version.as_ref().map(ToString::to_string))
			.field("singleton", &self.singleton)
			.field("strict_version", &self.strict_version)
			.field("eager", &self.eager)
			.field("fallback", &self.fallback.is_some())
			.finish()
	}
}

/// What a consumer will be served.
pub enum Choice {
	Entry(Arc<SharedEntry>),
	Fallback(SharedFactory),
}

impl fmt::Debug for Choice {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			Self::Entry(entry) => f.debug_tuple("Entry").field(entry).finish(),
			Self::Fallback(_) => f.write_str("Fallback"),
		}
	}
}

/// Picks an entry of `name` from `scope` without loading anything.
///
/// # Errors
///
/// - [`Error::SharedModuleMissing`] when nothing is offered and there is no fallback
/// - [`Error::EagerUnavailable`] when an eager consumer finds only lazy entries
/// - [`Error::UnsatisfiedSharedVersion`] for strict consumers
pub fn select(scope: &SharedScope, scope_name: &str, name: &str, options: &ConsumeOptions, diagnostics: &Diagnostics) -> Result<Choice> {
	let mut entries = scope.entries(name);
	if entries.is_empty() {
		return fallback_or(options, || Error::SharedModuleMissing {
			scope: scope_name.to_string(),
			name: name.to_string(),
		});
	}
	if options.eager {
		entries.retain(|entry| entry.is_eager() || entry.is_loaded());
		if entries.is_empty() {
			return fallback_or(options, || Error::EagerUnavailable {
				scope: scope_name.to_string(),
				name: name.to_string(),
			});
		}
	}

	let Some(highest) = highest(entries.iter()) else {
		return fallback_or(options, || Error::SharedModuleMissing {
			scope: scope_name.to_string(),
			name: name.to_string(),
		});
	};
	let Some(range) = &options.required_version else {
		return Ok(Choice::Entry(preferred(&entries).unwrap_or(highest)));
	};

	if options.singleton {
		let chosen = preferred_loaded(&entries).unwrap_or(highest);
		if !range.matches(chosen.version()) {
			if options.strict_version {
				return Err(unsatisfied(scope_name, name, &chosen, range));
			}
			diagnostics.push(Diagnostic::UnsatisfiedSingleton {
				scope: scope_name.to_string(),
				name: name.to_string(),
				version: chosen.version().to_string(),
				from: chosen.from().to_string(),
				required: range.to_string(),
			});
		}
		return Ok(Choice::Entry(chosen));
	}

	let satisfying: Vec<Arc<SharedEntry>> = entries.iter().filter(|entry| range.matches(entry.version())).cloned().collect();
	if let Some(chosen) = preferred(&satisfying) {
		return Ok(Choice::Entry(chosen));
	}
	if options.strict_version {
		return fallback_or(options, || unsatisfied(scope_name, name, &highest, range));
	}
	diagnostics.push(Diagnostic::NoSatisfyingVersion {
		scope: scope_name.to_string(),
		name: name.to_string(),
		required: range.to_string(),
		available: entries
			.iter()
			.map(|entry| format!("{} from {}", entry.version(), entry.from()))
			.collect(),
	});
	Ok(Choice::Entry(highest))
}

/// Selects and loads a shared module.
///
/// The chosen entry is claimed in the scope before its factory runs, so a
/// later registration of the same version cannot displace it.
pub async fn resolve(
	scope: &SharedScope,
	scope_name: &str,
	name: &str,
	options: &ConsumeOptions,
	diagnostics: &Diagnostics,
) -> Result<Exports> {
	match select(scope, scope_name, name, options, diagnostics)? {
		Choice::Entry(entry) => {
			let entry = scope.claim(&entry);
			debug!(scope = scope_name, name, version = %entry.version(), from = entry.from(), "consuming shared module");
			entry.load().await
		}
		Choice::Fallback(factory) => {
			debug!(scope = scope_name, name, "consuming fallback module");
			factory().await
		}
	}
}

fn highest<'a>(entries: impl Iterator<Item = &'a Arc<SharedEntry>>) -> Option<Arc<SharedEntry>> {
	entries.max_by(|a, b| a.version().cmp(b.version())).cloned()
}

fn preferred_loaded(entries: &[Arc<SharedEntry>]) -> Option<Arc<SharedEntry>> {
	highest(entries.iter().filter(|entry| entry.is_loaded()))
}

/// Highest loaded entry, else highest entry.
fn preferred(entries: &[Arc<SharedEntry>]) -> Option<Arc<SharedEntry>> {
	preferred_loaded(entries).or_else(|| highest(entries.iter()))
}

fn fallback_or(options: &ConsumeOptions, error: impl FnOnce() -> Error) -> Result<Choice> {
	match &options.fallback {
		Some(factory) => Ok(Choice::Fallback(Arc::clone(factory))),
		None => Err(error()),
	}
}

fn unsatisfied(scope_name: &str, name: &str, entry: &SharedEntry, range: &Range) -> Error {
	Error::UnsatisfiedSharedVersion {
		scope: scope_name.to_string(),
		name: name.to_string(),
		version: entry.version().to_string(),
		required: range.to_string(),
	}
}

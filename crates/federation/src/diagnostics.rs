use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::Serialize;
use tracing::warn;

/// A non-fatal event recorded while resolving shared modules.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Diagnostic {
	/// A singleton consumer got a version outside its required range.
	UnsatisfiedSingleton {
		scope: String,
		name: String,
		version: String,
		from: String,
		required: String,
	},
	/// No offered version satisfied the range; the highest one was used.
	NoSatisfyingVersion {
		scope: String,
		name: String,
		required: String,
		/// `"<version> from <identity>"` for every offered entry.
		available: Vec<String>,
	},
}

impl fmt::Display for Diagnostic {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			Self::UnsatisfiedSingleton {
				name,
				version,
				from,
				required,
				..
			} => write!(
				f,
				"Unsatisfied version {version} from {from} of shared singleton module {name} (required {required})"
			),
			Self::NoSatisfyingVersion {
				scope,
				name,
				required,
				available,
			} => write!(
				f,
				"No satisfying version ({required}) of shared module {name} found in shared scope {scope}. Available versions: {}",
				available.join(", ")
			),
		}
	}
}

/// Shared log of diagnostics. Every entry is also emitted as a `tracing` warning.
#[derive(Debug, Clone, Default)]
pub struct Diagnostics(Arc<Mutex<Vec<Diagnostic>>>);

impl Diagnostics {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn push(&self, diagnostic: Diagnostic) {
		warn!("{diagnostic}");
		self.0.lock().push(diagnostic);
	}

	pub fn snapshot(&self) -> Vec<Diagnostic> {
		self.0.lock().clone()
	}

	pub fn drain(&self) -> Vec<Diagnostic> {
		std::mem::take(&mut *self.0.lock())
	}

	pub fn len(&self) -> usize {
		self.0.lock().len()
	}

	pub fn is_empty(&self) -> bool {
		self.0.lock().is_empty()
	}
}

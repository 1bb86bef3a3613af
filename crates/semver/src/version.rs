//! Version token sequences and their total order.

use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use smallvec::SmallVec;

/// One comparable component of a [`Version`].
///
/// Kinds are ordered `PreRelease < Build < Numeric < Text`. Two markers of the
/// same kind compare equal; numeric and text tokens compare by value.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Token {
	/// Marks the start of the pre-release segments (`-` in the source string).
	PreRelease,
	/// Marks the start of the build metadata segments (`+` in the source string).
	Build,
	/// A segment made only of ASCII digits.
	Numeric(u64),
	/// Any other segment.
	Text(String),
}

/// Kind rank used when two tokens of different kinds meet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub(crate) enum TokenKind {
	PreRelease,
	Build,
	Numeric,
	Text,
}

impl Token {
	pub(crate) fn kind(&self) -> TokenKind {
		match self {
			Self::PreRelease => TokenKind::PreRelease,
			Self::Build => TokenKind::Build,
			Self::Numeric(_) => TokenKind::Numeric,
			Self::Text(_) => TokenKind::Text,
		}
	}

	/// Coerces one dot-delimited segment. Empty segments count as zero.
	pub(crate) fn from_segment(segment: &str) -> Self {
		let trimmed = segment.trim();
		if trimmed.is_empty() {
			return Self::Numeric(0);
		}
		if trimmed.bytes().all(|b| b.is_ascii_digit()) {
			if let Ok(value) = trimmed.parse::<u64>() {
				return Self::Numeric(value);
			}
		}
		Self::Text(segment.to_string())
	}

	/// Returns true for `x`, `X` and `*` placeholders.
	pub(crate) fn is_wildcard(&self) -> bool {
		matches!(self, Self::Text(text) if matches!(text.as_str(), "x" | "X" | "*"))
	}

	/// Compares two tokens of the same kind by value.
	pub(crate) fn cmp_value(&self, other: &Self) -> Ordering {
		match (self, other) {
			(Self::Numeric(a), Self::Numeric(b)) => a.cmp(b),
			(Self::Text(a), Self::Text(b)) => a.cmp(b),
			_ => self.kind().cmp(&other.kind()),
		}
	}
}

impl fmt::Display for Token {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			Self::PreRelease => f.write_str("-"),
			Self::Build => f.write_str("+"),
			Self::Numeric(value) => write!(f, "{value}"),
			Self::Text(text) => f.write_str(text),
		}
	}
}

pub(crate) type Tokens = SmallVec<[Token; 6]>;

/// A parsed version string.
///
/// Parsing never fails: anything that is not a run of digits becomes a text
/// token. The original string is kept for display and as the scope key.
#[derive(Debug, Clone)]
pub struct Version {
	raw: String,
	tokens: Tokens,
}

impl Version {
	/// Parses `main[-pre][+build]`.
	///
	/// The main part ends at the first `-` or `+`; the pre-release part runs to
	/// the first `+`; everything after that is build metadata.
	pub fn parse(input: &str) -> Self {
		let mut tokens = Tokens::new();
		let (main, pre, build) = split_parts(input);
		if let Some(main) = main {
			tokens.extend(main.split('.').map(Token::from_segment));
		}
		if let Some(pre) = pre {
			tokens.push(Token::PreRelease);
			tokens.extend(pre.split('.').map(Token::from_segment));
		}
		if let Some(build) = build {
			tokens.push(Token::Build);
			tokens.extend(build.split('.').map(Token::from_segment));
		}
		Self {
			raw: input.to_string(),
			tokens,
		}
	}

	/// Parses the version part of a range comparator.
	///
	/// Build metadata is ignored and trailing wildcards or dangling pre-release
	/// markers are dropped, so `1.2.x` and `1.2` yield the same tokens.
	pub(crate) fn parse_partial(input: &str) -> Self {
		let mut tokens = Tokens::new();
		let (main, pre, _) = split_parts(input);
		if let Some(main) = main {
			tokens.extend(main.split('.').map(Token::from_segment));
		}
		if let Some(pre) = pre {
			tokens.push(Token::PreRelease);
			tokens.extend(pre.split('.').map(Token::from_segment));
		}
		while tokens
			.last()
			.is_some_and(|last| last.is_wildcard() || *last == Token::PreRelease)
		{
			tokens.pop();
		}
		Self {
			raw: input.to_string(),
			tokens,
		}
	}

	/// Returns the string this version was parsed from.
	pub fn as_str(&self) -> &str {
		&self.raw
	}

	/// Returns the parsed tokens.
	pub fn tokens(&self) -> &[Token] {
		&self.tokens
	}

	/// Returns true when the version carries a pre-release part.
	pub fn is_prerelease(&self) -> bool {
		self.tokens.contains(&Token::PreRelease)
	}

	/// Number of tokens before any pre-release or build marker.
	pub(crate) fn release_len(&self) -> usize {
		self.tokens
			.iter()
			.position(|t| matches!(t, Token::PreRelease | Token::Build))
			.unwrap_or(self.tokens.len())
	}

	/// Renders the tokens in canonical form, e.g. `1.0.0-beta.2`.
	pub(crate) fn write_canonical(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		let mut need_dot = false;
		for token in &self.tokens {
			match token {
				Token::PreRelease | Token::Build => {
					write!(f, "{token}")?;
					need_dot = false;
				}
				_ => {
					if need_dot {
						f.write_str(".")?;
					}
					write!(f, "{token}")?;
					need_dot = true;
				}
			}
		}
		Ok(())
	}
}

fn split_parts(input: &str) -> (Option<&str>, Option<&str>, Option<&str>) {
	let (head, build) = match input.split_once('+') {
		Some((head, build)) => (head, Some(build).filter(|b| !b.is_empty())),
		None => (input, None),
	};
	let (main, pre) = match head.split_once('-') {
		Some((main, pre)) => (main, Some(pre).filter(|p| !p.is_empty())),
		None => (head, None),
	};
	(Some(main).filter(|m| !m.is_empty()), pre, build)
}

impl Ord for Version {
	fn cmp(&self, other: &Self) -> Ordering {
		let mut index = 0;
		loop {
			match (self.tokens.get(index), other.tokens.get(index)) {
				(None, None) => return Ordering::Equal,
				// A shorter version sorts first unless the longer one continues
				// into a pre-release part.
				(None, Some(next)) => {
					return if *next == Token::PreRelease {
						Ordering::Greater
					} else {
						Ordering::Less
					};
				}
				(Some(next), None) => {
					return if *next == Token::PreRelease {
						Ordering::Less
					} else {
						Ordering::Greater
					};
				}
				(Some(a), Some(b)) => {
					let ord = a.kind().cmp(&b.kind()).then_with(|| a.cmp_value(b));
					if ord != Ordering::Equal {
						return ord;
					}
				}
			}
			index += 1;
		}
	}
}

impl PartialOrd for Version {
	fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
		Some(self.cmp(other))
	}
}

impl PartialEq for Version {
	fn eq(&self, other: &Self) -> bool {
		self.cmp(other) == Ordering::Equal
	}
}

impl Eq for Version {}

impl Hash for Version {
	fn hash<H: Hasher>(&self, state: &mut H) {
		self.tokens.hash(state);
	}
}

impl fmt::Display for Version {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(&self.raw)
	}
}

impl From<&str> for Version {
	fn from(value: &str) -> Self {
		Self::parse(value)
	}
}

impl std::str::FromStr for Version {
	type Err = std::convert::Infallible;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		Ok(Self::parse(s))
	}
}

impl Serialize for Version {
	fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
		serializer.serialize_str(&self.raw)
	}
}

impl<'de> Deserialize<'de> for Version {
	fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
		let raw = String::deserialize(deserializer)?;
		Ok(Self::parse(&raw))
	}
}

/// Compares two version strings.
pub fn compare(a: &str, b: &str) -> Ordering {
	Version::parse(a).cmp(&Version::parse(b))
}

#[cfg(test)]
mod tests {
	use super::*;

	fn v(s: &str) -> Version {
		Version::parse(s)
	}

	#[test]
	fn test_parses_segments_by_kind() {
		assert_eq!(
			v("1.2.3-beta.4+build.5").tokens(),
			&[
				Token::Numeric(1),
				Token::Numeric(2),
				Token::Numeric(3),
				Token::PreRelease,
				Token::Text("beta".into()),
				Token::Numeric(4),
				Token::Build,
				Token::Text("build".into()),
				Token::Numeric(5),
			]
		);
	}

	#[test]
	fn test_pre_release_splits_on_first_dash_only() {
		assert_eq!(
			v("1-rc-1").tokens(),
			&[Token::Numeric(1), Token::PreRelease, Token::Text("rc-1".into())]
		);
	}

	#[test]
	fn test_empty_segments_are_zero() {
		assert_eq!(v("1..2").tokens(), v("1.0.2").tokens());
		assert!(v("").tokens().is_empty());
	}

	#[test]
	fn test_release_ordering() {
		assert!(v("1.2.3") < v("1.2.4"));
		assert!(v("1.2.4") < v("1.3.0"));
		assert!(v("1.3.0") < v("2.0.0"));
		assert!(v("1.10.0") > v("1.9.0"));
	}

	#[test]
	fn test_pre_release_sorts_below_release() {
		assert!(v("1.0.0-alpha") < v("1.0.0"));
		assert!(v("1.0.0-alpha") < v("1.0.0-beta"));
		assert!(v("1.0.0-alpha.1") < v("1.0.0-alpha.beta"));
		assert!(v("1.0.0-rc.1") > v("0.9.9"));
	}

	#[test]
	fn test_missing_tail_sorts_below_defined_segment() {
		assert!(v("1.0") < v("1.0.1"));
		assert!(v("1.0") < v("1.0.0"));
		assert!(v("1.0.0") < v("1.0.0+build"));
	}

	#[test]
	fn test_build_metadata_sorts_between_pre_release_and_numeric() {
		assert!(v("1.0.0-1") < v("1.0.0+1"));
		assert!(v("1.0.0+1") < v("1.0.0.1"));
	}

	#[test]
	fn test_numbers_sort_below_text() {
		assert!(v("1.0.5") < v("1.0.a"));
		assert!(v("1.0.0-1") < v("1.0.0-a"));
	}

	#[test]
	fn test_equality_ignores_leading_zeros_but_display_keeps_raw() {
		assert_eq!(v("1.01"), v("1.1"));
		assert_eq!(v("1.01").to_string(), "1.01");
	}

	#[test]
	fn test_compare_helper_matches_ord() {
		assert_eq!(compare("1.2.3", "1.2.4"), Ordering::Less);
		assert_eq!(compare("2.0.0", "2.0.0"), Ordering::Equal);
		assert_eq!(compare("1.0.0", "1.0.0-alpha"), Ordering::Greater);
	}

	#[test]
	fn test_serde_uses_raw_string() {
		let version = v("4.3.0-beta.1");
		let json = serde_json::to_string(&version).unwrap();
		assert_eq!(json, "\"4.3.0-beta.1\"");
		let back: Version = serde_json::from_str(&json).unwrap();
		assert_eq!(back, version);
	}
}

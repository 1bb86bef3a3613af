//! Range expressions compiled into a predicate tree.
//!
//! Supported syntax:
//!
//! * comparators: `=`, `v`, bare version, `!=`, `<`, `<=`, `>`, `>=`, `^`, `~`
//! * partial and x-range versions: `1`, `1.2`, `1.x`, `1.2.*`, `*`
//! * hyphen ranges: `1.2 - 2.3.4`
//! * whitespace for AND, `||` for OR
//!
//! Leaf matching works on token prefixes: the first `fixed` tokens of the
//! comparator must match exactly, the remainder acts as a lower bound (or an
//! upper bound when negated). Pre-release versions only satisfy a leaf whose
//! fixed prefix reaches into the same pre-release.

use std::cmp::Ordering;
use std::fmt;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::version::{Token, TokenKind, Version};

/// Comparison operator of a single [`Comparator`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Op {
	Eq,
	Ne,
	Lt,
	Le,
	Gt,
	Ge,
	Caret,
	Tilde,
}

impl Op {
	fn prefix(self) -> &'static str {
		match self {
			Self::Eq => "",
			Self::Ne => "!=",
			Self::Lt => "<",
			Self::Le => "<=",
			Self::Gt => ">",
			Self::Ge => ">=",
			Self::Caret => "^",
			Self::Tilde => "~",
		}
	}
}

/// One operator applied to one (possibly partial) version.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Comparator {
	pub op: Op,
	pub version: Version,
}

impl Comparator {
	pub fn new(op: Op, version: &str) -> Self {
		Self {
			op,
			version: Version::parse_partial(version),
		}
	}

	pub fn matches(&self, version: &Version) -> bool {
		let tokens = self.version.tokens();
		let exact = || prefix_match(tokens, exact_fix(tokens.len()), false, version);
		match self.op {
			Op::Eq => exact(),
			Op::Ne => !exact(),
			Op::Ge => prefix_match(tokens, 0, false, version),
			Op::Lt => prefix_match(tokens, 0, true, version),
			Op::Le => prefix_match(tokens, 0, true, version) || exact(),
			Op::Gt => prefix_match(tokens, 0, false, version) && !exact(),
			Op::Caret => prefix_match(tokens, self.caret_fix(), false, version),
			Op::Tilde => prefix_match(tokens, self.version.release_len().min(2), false, version),
		}
	}

	/// Leading tokens a caret range pins: the first nonzero release component
	/// and everything before it.
	fn caret_fix(&self) -> usize {
		let tokens = self.version.tokens();
		let fix = match tokens {
			[Token::Numeric(0), Token::Numeric(0), _, ..] => 3,
			[Token::Numeric(0), _, ..] => 2,
			_ => 1,
		};
		fix.min(self.version.release_len())
	}
}

impl fmt::Display for Comparator {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.op.prefix())?;
		if self.version.tokens().is_empty() {
			return f.write_str("*");
		}
		self.version.write_canonical(f)
	}
}

/// Fixed prefix length for an exact match against `len` range tokens.
///
/// Partials up to two components stay open at the tail (`1.2` accepts
/// `1.2.7`); longer versions must match in full.
fn exact_fix(len: usize) -> usize {
	match len {
		0..=2 => len,
		n => n + 1,
	}
}

/// Matches `version` against a comparator's tokens.
///
/// `fixed` counts the leading range tokens (1-based) that must be equal.
/// Past the fixed prefix the version must compare greater or equal, or
/// less when `negated`.
fn prefix_match(range: &[Token], fixed: usize, negated: bool, version: &Version) -> bool {
	let tokens = version.tokens();
	let mut is_equal = true;
	let mut i = 0;
	let mut j = 1;
	loop {
		let range_token = range.get(j - 1);
		let range_kind = range_token.map(Token::kind);
		let range_is_value = matches!(range_kind, Some(TokenKind::Numeric | TokenKind::Text));

		match tokens.get(i) {
			None | Some(Token::Build) => {
				if !is_equal {
					return true;
				}
				return match range_kind {
					Some(TokenKind::PreRelease) => j > fixed && !negated,
					None => !negated,
					Some(_) => negated,
				};
			}
			Some(Token::PreRelease) => {
				if !is_equal || range_kind != Some(TokenKind::PreRelease) {
					return false;
				}
			}
			Some(value) if is_equal => match range_token {
				Some(expected) if expected.kind() == value.kind() => {
					let ord = value.cmp_value(expected);
					if j <= fixed {
						if ord != Ordering::Equal {
							return false;
						}
					} else {
						let out_of_bounds = if negated { ord == Ordering::Greater } else { ord == Ordering::Less };
						if out_of_bounds {
							return false;
						}
						if ord != Ordering::Equal {
							is_equal = false;
						}
					}
				}
				_ if !range_is_value => {
					if negated || j <= fixed {
						return false;
					}
					is_equal = false;
					j -= 1;
				}
				_ => {
					// Numbers sort below text.
					let version_below = matches!(value, Token::Numeric(_));
					if j <= fixed || version_below != negated {
						return false;
					}
					is_equal = false;
				}
			},
			Some(_) => {
				if !range_is_value {
					j -= 1;
				}
			}
		}
		i += 1;
		j += 1;
	}
}

/// A compiled range expression.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum Range {
	/// Matches every release version.
	#[default]
	Any,
	Cmp(Comparator),
	Not(Box<Range>),
	And(Vec<Range>),
	Or(Vec<Range>),
}

impl Range {
	/// Compiles a range expression. Unrecognized text degrades to an exact
	/// comparator on a text version rather than failing.
	pub fn parse(input: &str) -> Self {
		let mut alternatives: Vec<Self> = input.split("||").map(parse_conjunction).collect();
		if alternatives.len() == 1 {
			return alternatives.pop().unwrap_or(Self::Any);
		}
		if alternatives.contains(&Self::Any) {
			return Self::Any;
		}
		Self::Or(alternatives)
	}

	pub fn cmp(op: Op, version: &str) -> Self {
		Self::Cmp(Comparator::new(op, version))
	}

	pub fn matches(&self, version: &Version) -> bool {
		match self {
			Self::Any => prefix_match(&[], 0, false, version),
			Self::Cmp(comparator) => comparator.matches(version),
			Self::Not(inner) => !inner.matches(version),
			Self::And(items) => items.iter().all(|item| item.matches(version)),
			Self::Or(items) => items.iter().any(|item| item.matches(version)),
		}
	}

	pub fn matches_str(&self, version: &str) -> bool {
		self.matches(&Version::parse(version))
	}
}

fn parse_conjunction(input: &str) -> Range {
	let input = input.trim();
	if let Some((low, high)) = split_hyphen(input) {
		return Range::And(vec![Range::cmp(Op::Ge, low.trim()), Range::cmp(Op::Le, high.trim())]);
	}

	let mut items = Vec::new();
	let mut pending_op = String::new();
	for word in input.split_whitespace() {
		if word.chars().all(|c| "<>=^~!".contains(c)) {
			pending_op.push_str(word);
			continue;
		}
		let simple = if pending_op.is_empty() {
			parse_simple(word)
		} else {
			let joined = format!("{pending_op}{word}");
			pending_op.clear();
			parse_simple(&joined)
		};
		items.push(simple);
	}
	if !pending_op.is_empty() {
		items.push(parse_simple(&pending_op));
	}

	items.retain(|item| *item != Range::Any);
	match items.len() {
		0 => Range::Any,
		1 => items.pop().unwrap_or(Range::Any),
		_ => Range::And(items),
	}
}

/// Finds ` - ` with whitespace on both sides of the dash.
fn split_hyphen(input: &str) -> Option<(&str, &str)> {
	let bytes = input.as_bytes();
	(1..bytes.len().saturating_sub(1))
		.find(|&i| bytes[i] == b'-' && bytes[i - 1].is_ascii_whitespace() && bytes[i + 1].is_ascii_whitespace())
		.map(|i| (&input[..i], &input[i + 1..]))
}

fn parse_simple(input: &str) -> Range {
	const OPS: [(&str, Op); 10] = [
		("<=", Op::Le),
		(">=", Op::Ge),
		("!=", Op::Ne),
		("<", Op::Lt),
		(">", Op::Gt),
		("=", Op::Eq),
		("^", Op::Caret),
		("~", Op::Tilde),
		("!", Op::Ne),
		("v", Op::Eq),
	];
	let (op, rest) = OPS
		.iter()
		.find_map(|(prefix, op)| input.strip_prefix(prefix).map(|rest| (*op, rest)))
		.unwrap_or((Op::Eq, input));
	let comparator = Comparator::new(op, rest.trim());
	if op == Op::Eq && comparator.version.tokens().is_empty() {
		return Range::Any;
	}
	Range::Cmp(comparator)
}

impl std::ops::Not for Range {
	type Output = Self;

	fn not(self) -> Self {
		Self::Not(Box::new(self))
	}
}

impl fmt::Display for Range {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			Self::Any => f.write_str("*"),
			Self::Cmp(comparator) => write!(f, "{comparator}"),
			Self::Not(inner) => write!(f, "not({inner})"),
			Self::And(items) => {
				for (index, item) in items.iter().enumerate() {
					if index > 0 {
						f.write_str(" ")?;
					}
					match item {
						Self::Or(_) => write!(f, "({item})")?,
						_ => write!(f, "{item}")?,
					}
				}
				Ok(())
			}
			Self::Or(items) => {
				for (index, item) in items.iter().enumerate() {
					if index > 0 {
						f.write_str(" || ")?;
					}
					write!(f, "{item}")?;
				}
				Ok(())
			}
		}
	}
}

impl From<&str> for Range {
	fn from(value: &str) -> Self {
		Self::parse(value)
	}
}

impl std::str::FromStr for Range {
	type Err = std::convert::Infallible;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		Ok(Self::parse(s))
	}
}

impl Serialize for Range {
	fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
		serializer.collect_str(self)
	}
}

impl<'de> Deserialize<'de> for Range {
	fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
		let raw = String::deserialize(deserializer)?;
		Ok(Self::parse(&raw))
	}
}

/// Returns true when `version` satisfies the range expression `range`.
pub fn satisfies(version: &str, range: &str) -> bool {
	Range::parse(range).matches(&Version::parse(version))
}

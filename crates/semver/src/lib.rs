//! Version ordering and range matching used to negotiate shared modules.
//!
//! [`Version`] parses loosely: every string is a version, segments that are not
//! numbers become text tokens. [`Range`] compiles the usual npm-style range
//! syntax into a predicate tree that can be evaluated against many versions.

mod range;
mod version;

pub use range::{Comparator, Op, Range, satisfies};
pub use version::{Token, Version, compare};

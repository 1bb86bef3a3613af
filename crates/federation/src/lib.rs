//! Federated module runtime.
//!
//! Independently built bundles ("containers") expose modules to each other and
//! negotiate shared libraries at load time. This crate provides the pieces a
//! container needs at runtime:
//!
//! - [`ModuleRegistry`]: instantiates module factories once, with a cycle guard.
//! - [`ChunkLoader`]: fetches code chunks through a [`ChunkFetcher`], coalescing
//!   concurrent requests and enforcing a timeout.
//! - [`ShareScopes`] and [`SharedScope`]: per-name tables of shared library
//!   versions, merged by every container that joins the scope.
//! - [`consume`]: picks which registered version satisfies a consumer.
//! - [`Container`]: the `init` / `get` surface seen by other containers.
//!
//! Everything hangs off an explicit [`Federation`] context; there is no global
//! state.

mod chunk;
mod config;
pub mod consume;
mod container;
mod diagnostics;
mod error;
mod exports;
mod federation;
mod locator;
mod manifest;
mod registry;
mod share;

#[cfg(test)]
use tracing_subscriber as _;

pub use chunk::{ChunkFetcher, ChunkId, ChunkLoader, ChunkPayload, ChunkRequest, ChunkStatus, FetchError};
pub use config::LoaderConfig;
pub use consume::ConsumeOptions;
pub use container::{Container, ContainerBuilder};
pub use diagnostics::{Diagnostic, Diagnostics};
pub use error::{ChunkLoadError, ChunkLoadErrorKind, Error, ModuleError};
pub use exports::{ExportValue, Exports};
pub use federation::{ConsumeSpec, Federation, ProvideSpec};
pub use locator::{ChunkLocator, PublicPath};
pub use manifest::{ConsumeManifest, ContainerManifest, ModuleRef, ProvideManifest};
pub use registry::{ModuleFactory, ModuleId, ModuleRecord, ModuleRegistry, ModuleScope, ModuleStatus};
pub use share::{
	EntrySnapshot, InsertAction, ScopeSnapshot, ShareDeclaration, ShareDeclarations, ShareScopes, SharedEntry, SharedFactory,
	SharedScope, shared_factory,
};

/// Result type with [`Error`] as the default error.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Name of the share scope containers join when none is configured.
pub const DEFAULT_SHARE_SCOPE: &str = "default";

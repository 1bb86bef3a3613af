use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;

use super::*;
use crate::chunk::{ChunkPayload, ChunkRequest, FetchError};
use crate::share::SharedEntry;

/// Serves fixed payloads by chunk id.
#[derive(Default)]
struct StaticFetcher {
	payloads: FxHashMap<ChunkId, ChunkPayload>,
	calls: AtomicUsize,
	urls: Mutex<Vec<String>>,
}

impl StaticFetcher {
	fn serve(mut self, payload: ChunkPayload) -> Self {
		for chunk_id in payload.chunk_ids.clone() {
			self.payloads.insert(chunk_id, payload.clone());
		}
		self
	}

	fn calls(&self) -> usize {
		self.calls.load(Ordering::SeqCst)
	}
}

#[async_trait]
impl ChunkFetcher for StaticFetcher {
	async fn fetch(&self, request: &ChunkRequest) -> std::result::Result<ChunkPayload, FetchError> {
		self.calls.fetch_add(1, Ordering::SeqCst);
		self.urls.lock().push(request.url.clone());
		self.payloads.get(&request.chunk_id).cloned().ok_or(FetchError::Missing)
	}
}

fn version_module(version: &'static str) -> impl Fn(&mut ModuleScope<'_>) -> Result<(), ModuleError> + Send + Sync + 'static {
	move |module: &mut ModuleScope<'_>| {
		module.exports().set("version", version);
		Ok(())
	}
}

fn version_of(exports: &Exports) -> &'static str {
	*exports.get_as::<&'static str>("version").unwrap()
}

/// Host offering `lib@1.0.0` from chunk 10.
fn host(fetcher: &Arc<StaticFetcher>) -> Container {
	ContainerBuilder::new("host", Arc::clone(fetcher) as Arc<dyn ChunkFetcher>)
		.provide(ProvideSpec {
			scope: DEFAULT_SHARE_SCOPE.into(),
			name: "lib".into(),
			version: "1.0.0".into(),
			eager: false,
			source: ModuleRef::new(["10"], "10"),
		})
		.build()
		.unwrap()
}

fn host_fetcher() -> Arc<StaticFetcher> {
	Arc::new(StaticFetcher::default().serve(ChunkPayload::new("10").module("10", version_module("1.0.0"))))
}

/// App exposing `./widget` (chunk 30), which consumes `lib` as module 20.
fn app(fetcher: &Arc<StaticFetcher>, options: ConsumeOptions, fallback: Option<ModuleRef>) -> Container {
	let mut spec = ConsumeSpec::new(DEFAULT_SHARE_SCOPE, "lib", options);
	if let Some(fallback) = fallback {
		spec = spec.with_fallback(fallback);
	}
	ContainerBuilder::new("app", Arc::clone(fetcher) as Arc<dyn ChunkFetcher>)
		.config(LoaderConfig {
			public_path: Some("https://cdn.example.com/app/".into()),
			..LoaderConfig::default()
		})
		.chunk_hash("30", "abc123")
		.expose("./widget", ModuleRef::new(["30"], "30"))
		.consume("20", spec)
		.chunk_consumes("30", ["20"])
		.build()
		.unwrap()
}

fn app_fetcher() -> Arc<StaticFetcher> {
	Arc::new(
		StaticFetcher::default()
			.serve(ChunkPayload::new("30").module("30", |module: &mut ModuleScope<'_>| {
				let lib = module.require("20")?;
				module.exports().set("lib", lib);
				Ok(())
			}))
			.serve(ChunkPayload::new("747").module("747", version_module("2.0.0-bundled"))),
	)
}

fn widget_lib(widget: &Exports) -> Exports {
	Exports::clone(&widget.get_as::<Exports>("lib").unwrap())
}

#[test]
fn test_init_twice_same_snapshot() {
	let container = host(&host_fetcher());
	let scope = Arc::new(SharedScope::new());
	container.init(Arc::clone(&scope)).unwrap();
	let once = scope.snapshot();
	container.init(Arc::clone(&scope)).unwrap();
	assert_eq!(scope.snapshot(), once);
	assert_eq!(once["lib"]["1.0.0"].from, "host");
	assert!(Arc::ptr_eq(&container.share_scope().unwrap(), &scope));
}

#[test]
fn test_init_with_other_scope_conflicts() {
	let container = host(&host_fetcher());
	container.init(Arc::new(SharedScope::new())).unwrap();
	let err = container.init(Arc::new(SharedScope::new())).unwrap_err();
	assert!(matches!(err, Error::ContainerInitConflict { ref scope } if scope == DEFAULT_SHARE_SCOPE));
}

#[tokio::test]
async fn test_get_unknown_export() {
	let fetcher = app_fetcher();
	let container = app(&fetcher, ConsumeOptions::new(), None);
	let err = container.get("./missing").await.unwrap_err();
	assert_eq!(err.to_string(), "module \"./missing\" does not exist in container app");
	assert_eq!(fetcher.calls(), 0);
}

#[tokio::test]
async fn test_get_shares_provider_across_containers() {
	let host_fetcher = host_fetcher();
	let host = host(&host_fetcher);
	let app_fetcher = app_fetcher();
	let app = app(&app_fetcher, ConsumeOptions::new().required_version("^1.0.0"), None);

	let scope = Arc::new(SharedScope::new());
	host.init(Arc::clone(&scope)).unwrap();
	app.init(Arc::clone(&scope)).unwrap();

	let widget = app.get("widget").await.unwrap();
	assert_eq!(version_of(&widget_lib(&widget)), "1.0.0");
	assert_eq!(host_fetcher.calls(), 1);
	assert_eq!(
		*app_fetcher.urls.lock(),
		vec!["https://cdn.example.com/app/30.abc123.js?v=abc123".to_string()]
	);

	// Same record, with or without the prefix.
	let again = app.get("./widget").await.unwrap();
	assert!(again.ptr_eq(&widget));
	assert_eq!(app_fetcher.calls(), 1);
	assert!(scope.entry("lib", "1.0.0").unwrap().is_loaded());
	assert!(app.federation().diagnostics().is_empty());
}

#[tokio::test]
async fn test_loaded_entry_is_not_fetched_again() {
	let host_fetcher = host_fetcher();
	let host = host(&host_fetcher);
	let scope = Arc::new(SharedScope::new());
	let resident = Exports::new();
	resident.set("version", "1.0.0");
	scope.register(SharedEntry::resident("lib", "1.0.0", "page", resident.clone()));
	host.init(Arc::clone(&scope)).unwrap();

	let app_fetcher = app_fetcher();
	let app = app(&app_fetcher, ConsumeOptions::new().required_version("^1.0.0").singleton(), None);
	app.init(Arc::clone(&scope)).unwrap();

	let widget = app.get("widget").await.unwrap();
	assert!(widget_lib(&widget).ptr_eq(&resident));
	assert_eq!(host_fetcher.calls(), 0);
	assert_eq!(scope.entry("lib", "1.0.0").unwrap().from(), "page");
}

#[tokio::test]
async fn test_strict_consumer_falls_back_to_bundled_copy() {
	let host_fetcher = host_fetcher();
	let host = host(&host_fetcher);
	let app_fetcher = app_fetcher();
	let app = app(
		&app_fetcher,
		ConsumeOptions::new().required_version("^2.0.0").strict_version(),
		Some(ModuleRef::new(["747"], "747")),
	);

	let scope = Arc::new(SharedScope::new());
	host.init(Arc::clone(&scope)).unwrap();
	app.init(Arc::clone(&scope)).unwrap();

	let widget = app.get("widget").await.unwrap();
	assert_eq!(version_of(&widget_lib(&widget)), "2.0.0-bundled");
	assert_eq!(host_fetcher.calls(), 0);
	assert!(!scope.entry("lib", "1.0.0").unwrap().is_loaded());
}

#[tokio::test]
async fn test_failed_consume_fails_get() {
	let app_fetcher = app_fetcher();
	let app = app(&app_fetcher, ConsumeOptions::new(), None);
	app.init(Arc::new(SharedScope::new())).unwrap();

	let err = app.get("widget").await.unwrap_err();
	assert!(matches!(err, Error::SharedModuleMissing { ref name, .. } if name == "lib"));
}

#[tokio::test]
async fn test_get_without_init_uses_private_scope() {
	let app_fetcher = app_fetcher();
	let app = app(
		&app_fetcher,
		ConsumeOptions::new(),
		Some(ModuleRef::new(["747"], "747")),
	);
	let widget = app.get("widget").await.unwrap();
	assert_eq!(version_of(&widget_lib(&widget)), "2.0.0-bundled");

	let err = app.init(Arc::new(SharedScope::new())).unwrap_err();
	assert!(matches!(err, Error::ContainerInitConflict { .. }));
}

#[test]
fn test_build_rejects_empty_script_url() {
	let err = ContainerBuilder::new("app", app_fetcher() as Arc<dyn ChunkFetcher>)
		.config(LoaderConfig {
			script_url: Some(String::new()),
			..LoaderConfig::default()
		})
		.build()
		.unwrap_err();
	assert!(matches!(err, Error::PublicPath(_)));
}

#[tokio::test]
async fn test_local_module_and_chunk() {
	let fetcher = Arc::new(StaticFetcher::default());
	let container = ContainerBuilder::new("solo", Arc::clone(&fetcher) as Arc<dyn ChunkFetcher>)
		.local_chunk("main")
		.module("1", version_module("0.1.0"))
		.expose(".", ModuleRef::new(["main"], "1"))
		.build()
		.unwrap();

	let exports = container.get(".").await.unwrap();
	assert_eq!(version_of(&exports), "0.1.0");
	assert_eq!(fetcher.calls(), 0);
	assert_eq!(container.exposes().collect::<Vec<_>>(), vec!["."]);
}

use std::sync::Barrier;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::Duration;

use super::*;

#[test]
fn test_require_memoizes() {
	let calls = Arc::new(AtomicUsize::new(0));
	let registry = ModuleRegistry::new();
	let counter = Arc::clone(&calls);
	registry.define("m", move |module: &mut ModuleScope<'_>| {
		counter.fetch_add(1, Ordering::SeqCst);
		module.exports().set("value", 7u8);
		Ok(())
	});

	let id = ModuleId::from("m");
	assert_eq!(registry.status(&id), Some(ModuleStatus::Pending));
	let first = registry.require(&id).unwrap();
	let second = registry.require(&id).unwrap();
	assert!(first.ptr_eq(&second));
	assert_eq!(calls.load(Ordering::SeqCst), 1);
	assert_eq!(registry.status(&id), Some(ModuleStatus::Ready));
	assert!(Arc::ptr_eq(&registry.record(&id).unwrap(), &registry.record(&id).unwrap()));
}

#[test]
fn test_unknown_module() {
	let registry = ModuleRegistry::new();
	let id = ModuleId::from("nope");
	assert!(matches!(registry.require(&id), Err(Error::UnknownModule(missing)) if missing == id));
	assert_eq!(registry.status(&id), None);
	assert!(registry.record(&id).is_none());
}

#[test]
fn test_cycle_returns_partial_exports() {
	let registry = ModuleRegistry::new();
	registry.define("a", |module: &mut ModuleScope<'_>| {
		module.exports().set("early", "a");
		let b = module.require("b")?;
		let seen: Arc<Exports> = b.get_as::<Exports>("a").ok_or_else(|| ModuleError::msg("b did not see a"))?;
		assert!(seen.contains("early"));
		assert!(!seen.contains("late"));
		module.exports().set("late", "a");
		Ok(())
	});
	registry.define("b", |module: &mut ModuleScope<'_>| {
		let a = module.require("a")?;
		module.exports().set("a", a);
		Ok(())
	});

	let a = registry.require(&ModuleId::from("a")).unwrap();
	assert!(a.contains("late"));
	let b = registry.require(&ModuleId::from("b")).unwrap();
	let seen = b.get_as::<Exports>("a").unwrap();
	assert!(seen.ptr_eq(&a));
	assert!(seen.contains("late"));
}

#[test]
fn test_failure_is_cached() {
	let calls = Arc::new(AtomicUsize::new(0));
	let registry = ModuleRegistry::new();
	let counter = Arc::clone(&calls);
	registry.define("broken", move |_: &mut ModuleScope<'_>| {
		counter.fetch_add(1, Ordering::SeqCst);
		Err(ModuleError::msg("boom"))
	});

	let id = ModuleId::from("broken");
	for _ in 0..3 {
		let err = registry.require(&id).unwrap_err();
		assert!(matches!(err, Error::ModuleInstantiation { ref id, .. } if id.as_str() == "broken"));
		assert!(err.to_string().contains("boom"));
	}
	assert_eq!(calls.load(Ordering::SeqCst), 1);
	assert_eq!(registry.status(&id), Some(ModuleStatus::Failed));

	// Redefining does not resurrect a failed record.
	registry.define("broken", |_: &mut ModuleScope<'_>| Ok(()));
	assert!(registry.require(&id).is_err());
}

#[test]
fn test_replace_exports() {
	let registry = ModuleRegistry::new();
	let replacement = Exports::new();
	replacement.set("kind", "replacement");
	let shared = replacement.clone();
	registry.define("m", move |module: &mut ModuleScope<'_>| {
		module.replace_exports(shared.clone());
		Ok(())
	});
	let exports = registry.require(&ModuleId::from("m")).unwrap();
	assert!(exports.ptr_eq(&replacement));
}

#[test]
fn test_dependency_failure_propagates() {
	let registry = ModuleRegistry::new();
	registry.define("outer", |module: &mut ModuleScope<'_>| {
		module.require("inner")?;
		Ok(())
	});
	let err = registry.require(&ModuleId::from("outer")).unwrap_err();
	match err {
		Error::ModuleInstantiation { source, .. } => {
			assert!(matches!(&*source, ModuleError::Runtime(inner) if matches!(**inner, Error::UnknownModule(_))));
		}
		other => panic!("unexpected error: {other}"),
	}
}

#[test]
fn test_other_thread_waits_for_settled_record() {
	let registry = ModuleRegistry::new();
	let entered = Arc::new(Barrier::new(2));
	let inside = Arc::clone(&entered);
	registry.define("slow", move |module: &mut ModuleScope<'_>| {
		module.exports().set("started", true);
		inside.wait();
		thread::sleep(Duration::from_millis(50));
		Err(ModuleError::msg("slow body failed"))
	});
	let id = ModuleId::from("slow");

	thread::scope(|scope| {
		let loader = scope.spawn(|| registry.require(&id));
		entered.wait();
		// Not a cycle: this thread must not see the partial exports.
		let observed = registry.require(&id);
		assert!(matches!(observed, Err(Error::ModuleInstantiation { .. })), "{observed:?}");
		assert!(loader.join().unwrap().is_err());
	});
	assert_eq!(registry.status(&id), Some(ModuleStatus::Failed));
}

#[test]
fn test_concurrent_requires_share_ready_exports() {
	let calls = Arc::new(AtomicUsize::new(0));
	let registry = ModuleRegistry::new();
	let counter = Arc::clone(&calls);
	registry.define("m", move |module: &mut ModuleScope<'_>| {
		counter.fetch_add(1, Ordering::SeqCst);
		thread::sleep(Duration::from_millis(20));
		module.exports().set("done", true);
		Ok(())
	});
	let id = ModuleId::from("m");

	let results: Vec<Exports> = thread::scope(|scope| {
		let handles: Vec<_> = (0..4).map(|_| scope.spawn(|| registry.require(&id).unwrap())).collect();
		handles.into_iter().map(|handle| handle.join().unwrap()).collect()
	});
	assert_eq!(calls.load(Ordering::SeqCst), 1);
	for exports in &results {
		assert!(exports.contains("done"));
		assert!(exports.ptr_eq(&results[0]));
	}
}

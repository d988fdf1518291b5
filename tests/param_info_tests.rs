//! Parameter metadata tests
//!
//! A dependency declaring a `ParamInfo` parameter receives the name and
//! declared type of the parameter through which it was requested.

use rstest::rstest;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use taskwire::{Depends, DependencyGraph, ParamInfo, ParamSpec, Provider, TySpec, provider};

/// Dependency that hands its own request metadata back to the caller.
fn introspecting_dep(counter: Option<Arc<AtomicUsize>>) -> Arc<dyn Provider> {
	provider::function(
		"introspect",
		vec![ParamSpec::dependency::<ParamInfo>("info", Depends::unset())],
		move |kwargs| {
			if let Some(counter) = &counter {
				counter.fetch_add(1, Ordering::SeqCst);
			}
			Ok((*kwargs.require::<ParamInfo>("info")?).clone())
		},
	)
}

#[rstest]
fn metadata_names_the_requesting_parameter() {
	// Arrange
	let dep = introspecting_dep(None);
	let target = provider::signature(
		"target",
		vec![ParamSpec::dependency::<ParamInfo>("dd", Depends::on(dep))],
	);
	let graph = DependencyGraph::build(target).unwrap();

	// Act
	let mut scope = graph.sync_scope();
	let kwargs = scope.resolve_kwargs().unwrap();
	scope.close().unwrap();

	// Assert
	let info = kwargs.get::<ParamInfo>("dd").unwrap();
	assert_eq!(info.name(), "dd");
	assert_eq!(info.declared(), Some(&TySpec::of::<ParamInfo>()));
}

#[rstest]
fn metadata_on_the_target_itself_has_an_empty_name() {
	// Arrange: the target requests ParamInfo directly; there is no
	// requesting parameter
	let target = provider::signature(
		"target",
		vec![ParamSpec::dependency::<ParamInfo>("info", Depends::unset())],
	);
	let graph = DependencyGraph::build(target).unwrap();

	// Act
	let mut scope = graph.sync_scope();
	let kwargs = scope.resolve_kwargs().unwrap();
	scope.close().unwrap();

	// Assert
	let info = kwargs.get::<ParamInfo>("info").unwrap();
	assert_eq!(info.name(), "");
	assert!(info.declared().is_none());
}

#[rstest]
fn each_requesting_parameter_sees_itself() {
	// Arrange: one introspecting dependency wired through two differently
	// named parameters
	let counter = Arc::new(AtomicUsize::new(0));
	let dep = introspecting_dep(Some(Arc::clone(&counter)));
	let target = provider::signature(
		"target",
		vec![
			ParamSpec::dependency::<ParamInfo>("first", Depends::on(dep.clone())),
			ParamSpec::dependency::<ParamInfo>("second", Depends::on(dep.clone())),
		],
	);
	let graph = DependencyGraph::build(target).unwrap();

	// Act
	let mut scope = graph.sync_scope();
	let kwargs = scope.resolve_kwargs().unwrap();
	scope.close().unwrap();

	// Assert: no first-requester-wins sharing
	assert_eq!(kwargs.get::<ParamInfo>("first").unwrap().name(), "first");
	assert_eq!(kwargs.get::<ParamInfo>("second").unwrap().name(), "second");
	assert_eq!(counter.load(Ordering::SeqCst), 2);
}

#[rstest]
fn metadata_reports_the_declared_type() {
	// Arrange: the requesting parameter declares a concrete type
	let dep = provider::function(
		"typed_introspect",
		vec![ParamSpec::dependency::<ParamInfo>("info", Depends::unset())],
		|kwargs| Ok((*kwargs.require::<ParamInfo>("info")?).clone()),
	);
	let target = provider::signature(
		"target",
		vec![ParamSpec::dependency::<u64>("count", Depends::on(dep))],
	);
	let graph = DependencyGraph::build(target).unwrap();

	// Act
	let mut scope = graph.sync_scope();
	let kwargs = scope.resolve_kwargs().unwrap();
	scope.close().unwrap();

	// Assert
	let info = kwargs.get::<ParamInfo>("count").unwrap();
	assert_eq!(info.name(), "count");
	assert_eq!(info.declared(), Some(&TySpec::of::<u64>()));
}

#[rstest]
fn metadata_does_not_leak_between_levels() {
	// Arrange: mid depends on the introspecting dep through `inner`; the
	// metadata must describe `inner`, not the parameter that requested mid
	let dep = introspecting_dep(None);
	let mid = provider::function(
		"mid",
		vec![ParamSpec::dependency::<ParamInfo>("inner", Depends::on(dep))],
		|kwargs| Ok(kwargs.require::<ParamInfo>("inner")?.name().to_string()),
	);
	let target = provider::signature(
		"target",
		vec![ParamSpec::dependency::<String>("outer", Depends::on(mid))],
	);
	let graph = DependencyGraph::build(target).unwrap();

	// Act
	let mut scope = graph.sync_scope();
	let kwargs = scope.resolve_kwargs().unwrap();
	scope.close().unwrap();

	// Assert
	assert_eq!(*kwargs.get::<String>("outer").unwrap(), "inner");
}

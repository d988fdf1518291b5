//! Graph construction and resolution ordering tests

use rstest::rstest;
use std::sync::Arc;
use taskwire::{
	Depends, DependencyGraph, GraphError, ParamSpec, ResolveError, TySpec, provider,
};

#[rstest]
fn simple_dependency_resolves() {
	// Arrange
	let dep1 = provider::function("dep1", vec![], |_| Ok(1i32));
	let target = provider::signature(
		"target",
		vec![ParamSpec::dependency::<i32>("some_int", Depends::on(dep1))],
	);
	let graph = DependencyGraph::build(target).unwrap();

	// Act
	let mut scope = graph.sync_scope();
	let kwargs = scope.resolve_kwargs().unwrap();

	// Assert
	assert_eq!(kwargs.len(), 1);
	assert_eq!(*kwargs.get::<i32>("some_int").unwrap(), 1);
	scope.close().unwrap();
}

#[rstest]
fn sub_dependencies_resolve_through_the_chain() {
	// Arrange: dep2 depends on dep1, target depends on dep2
	let dep1 = provider::function("dep1", vec![], |_| Ok(1i32));
	let dep2 = provider::function(
		"dep2",
		vec![ParamSpec::dependency::<i32>("a", Depends::on(dep1))],
		|kwargs| Ok(*kwargs.require::<i32>("a")? + 1),
	);
	let target = provider::signature(
		"target",
		vec![ParamSpec::dependency::<i32>("a", Depends::on(dep2))],
	);
	let graph = DependencyGraph::build(target).unwrap();

	// Act
	let mut scope = graph.sync_scope();
	let kwargs = scope.resolve_kwargs().unwrap();

	// Assert
	assert_eq!(*kwargs.get::<i32>("a").unwrap(), 2);
	scope.close().unwrap();
}

#[rstest]
fn order_puts_every_dependency_before_its_dependents() {
	// Arrange: diamond, target -> (left, right) -> base
	let base = provider::function("base", vec![], |_| Ok(1i32));
	let left = provider::function(
		"left",
		vec![ParamSpec::dependency::<i32>("b", Depends::on(base.clone()))],
		|kwargs| Ok(*kwargs.require::<i32>("b")? * 2),
	);
	let right = provider::function(
		"right",
		vec![ParamSpec::dependency::<i32>("b", Depends::on(base.clone()))],
		|kwargs| Ok(*kwargs.require::<i32>("b")? * 3),
	);
	let target = provider::signature(
		"target",
		vec![
			ParamSpec::dependency::<i32>("l", Depends::on(left)),
			ParamSpec::dependency::<i32>("r", Depends::on(right)),
		],
	);

	// Act
	let graph = DependencyGraph::build(target).unwrap();

	// Assert
	let order = graph.resolution_order();
	let pos = |name: &str| order.iter().position(|n| n == name).unwrap();
	assert!(pos("base") < pos("left"));
	assert!(pos("base") < pos("right"));
	assert!(pos("left") < pos("target"));
	assert!(pos("right") < pos("target"));
}

#[rstest]
fn plain_parameters_are_ignored() {
	// Arrange
	let dep1 = provider::function("dep1", vec![], |_| Ok(1i32));
	let target = provider::signature(
		"target",
		vec![
			ParamSpec::plain::<String>("q"),
			ParamSpec::dependency::<i32>("a", Depends::on(dep1)),
		],
	);
	let graph = DependencyGraph::build(target).unwrap();

	// Act
	let mut scope = graph.sync_scope();
	let kwargs = scope.resolve_kwargs().unwrap();

	// Assert: only the marked parameter is resolved
	assert_eq!(kwargs.len(), 1);
	assert!(kwargs.get::<i32>("a").is_some());
	scope.close().unwrap();
}

#[rstest]
fn dependency_free_target_resolves_to_empty_kwargs() {
	// Arrange
	let target = provider::signature("target", vec![ParamSpec::plain::<String>("q")]);
	let graph = DependencyGraph::build(target).unwrap();
	assert!(graph.is_empty());

	// Act
	let mut scope = graph.sync_scope();
	let kwargs = scope.resolve_kwargs().unwrap();

	// Assert
	assert!(kwargs.is_empty());
	scope.close().unwrap();
}

#[rstest]
fn unresolved_default_fails_at_resolution_time() {
	// Arrange: a pure-default parameter with no supplied default builds
	// fine and fails when resolved
	#[derive(Clone)]
	struct Missing;
	let dep = provider::function(
		"dep",
		vec![ParamSpec::dependency::<Missing>("m", Depends::unset())],
		|_| Ok(1i32),
	);
	let target = provider::signature(
		"target",
		vec![ParamSpec::dependency::<i32>("a", Depends::on(dep))],
	);
	let graph = DependencyGraph::build(target).unwrap();

	// Act
	let mut scope = graph.sync_scope();
	let result = scope.resolve_kwargs();

	// Assert
	match result {
		Err(ResolveError::UnresolvedDependency { provider, param, .. }) => {
			assert_eq!(provider, "dep");
			assert_eq!(param, "m");
		}
		other => panic!("expected unresolved dependency, got {:?}", other.map(|k| k.len())),
	}
	scope.close().unwrap();
}

#[rstest]
fn non_concrete_default_declaration_is_ambiguous_at_build_time() {
	// Arrange: a declared type with no concrete identity cannot be matched
	// against defaults
	let dep = provider::function(
		"dep",
		vec![ParamSpec::with_ty(
			"store",
			TySpec::generic("Store", [TySpec::of::<i32>()]),
			Depends::unset(),
		)],
		|_| Ok(1i32),
	);
	let target = provider::signature(
		"target",
		vec![ParamSpec::dependency::<i32>("a", Depends::on(dep))],
	);

	// Act
	let result = DependencyGraph::build(target);

	// Assert
	assert!(matches!(
		result,
		Err(GraphError::AmbiguousDependency { .. })
	));
}

#[rstest]
fn graph_is_reusable_across_scopes() {
	// Arrange
	let dep1 = provider::function("dep1", vec![], |_| Ok(1i32));
	let target = provider::signature(
		"target",
		vec![ParamSpec::dependency::<i32>("a", Depends::on(dep1))],
	);
	let graph = DependencyGraph::build(target).unwrap();

	// Act & Assert: the same graph serves many resolutions
	for _ in 0..3 {
		let shared: DependencyGraph = graph.clone();
		let mut scope = shared.sync_scope();
		assert_eq!(*scope.resolve_kwargs().unwrap().get::<i32>("a").unwrap(), 1);
		scope.close().unwrap();
	}
}

#[rstest]
fn graph_can_be_shared_across_threads() {
	// Arrange
	let dep1 = provider::function("dep1", vec![], |_| Ok(7i32));
	let target = provider::signature(
		"target",
		vec![ParamSpec::dependency::<i32>("a", Depends::on(dep1))],
	);
	let graph = Arc::new(DependencyGraph::build(target).unwrap());

	// Act: each thread owns its scope, the graph is shared read-only
	let handles: Vec<_> = (0..4)
		.map(|_| {
			let graph = Arc::clone(&graph);
			std::thread::spawn(move || {
				let mut scope = graph.sync_scope();
				let value = *scope.resolve_kwargs().unwrap().get::<i32>("a").unwrap();
				scope.close().unwrap();
				value
			})
		})
		.collect();

	// Assert
	for handle in handles {
		assert_eq!(handle.join().unwrap(), 7);
	}
}

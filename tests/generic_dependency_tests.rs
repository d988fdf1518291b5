//! Generic provider template tests
//!
//! One provider template serves many concrete instantiations. Type
//! arguments declared on the requesting parameter bind the template's type
//! variables; each distinct binding is its own node.

use rstest::rstest;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use taskwire::{
	Defaults, Depends, DependencyGraph, GraphError, ParamSpec, Provider, TySpec, provider,
};

#[derive(Clone, Debug, PartialEq)]
struct Store<T>(T);

/// Template resolving its seed from the defaults by bound type.
fn store_template(counter: &Arc<AtomicUsize>) -> Arc<dyn Provider> {
	let counter = Arc::clone(counter);
	provider::generic_function(
		"make_store",
		&["T"],
		vec![ParamSpec::with_ty(
			"seed",
			TySpec::var("T"),
			Depends::unset(),
		)],
		move |kwargs| {
			counter.fetch_add(1, Ordering::SeqCst);
			kwargs.value("seed").ok_or_else(|| "missing seed".into())
		},
	)
}

#[rstest]
fn distinct_type_arguments_become_distinct_nodes() {
	// Arrange: the same template bound to i32 and to String
	let counter = Arc::new(AtomicUsize::new(0));
	let template = store_template(&counter);
	let target = provider::signature(
		"target",
		vec![
			ParamSpec::with_ty(
				"ints",
				TySpec::of::<Store<i32>>().with_args([TySpec::of::<i32>()]),
				Depends::on(template.clone()),
			),
			ParamSpec::with_ty(
				"texts",
				TySpec::of::<Store<String>>().with_args([TySpec::of::<String>()]),
				Depends::on(template.clone()),
			),
		],
	);
	let graph = DependencyGraph::build(target).unwrap();
	let mut defaults = Defaults::new();
	defaults.set(5i32);
	defaults.set("hello".to_string());

	// Act
	let mut scope = graph.scope().defaults(defaults).enter_sync();
	let kwargs = scope.resolve_kwargs().unwrap();
	scope.close().unwrap();

	// Assert: each instantiation resolved its own seed
	assert_eq!(*kwargs.get::<i32>("ints").unwrap(), 5);
	assert_eq!(*kwargs.get::<String>("texts").unwrap(), "hello");
	assert_eq!(counter.load(Ordering::SeqCst), 2);
}

#[rstest]
fn equal_type_arguments_share_one_node() {
	// Arrange: two parameters bind the template to the same type
	let counter = Arc::new(AtomicUsize::new(0));
	let template = store_template(&counter);
	let ints = TySpec::of::<Store<i32>>().with_args([TySpec::of::<i32>()]);
	let target = provider::signature(
		"target",
		vec![
			ParamSpec::with_ty("a", ints.clone(), Depends::on(template.clone())),
			ParamSpec::with_ty("b", ints, Depends::on(template.clone())),
		],
	);
	let graph = DependencyGraph::build(target).unwrap();
	let mut defaults = Defaults::new();
	defaults.set(5i32);

	// Act
	let mut scope = graph.scope().defaults(defaults).enter_sync();
	let kwargs = scope.resolve_kwargs().unwrap();
	scope.close().unwrap();

	// Assert: one node, computed once, shared by both parameters
	assert_eq!(graph.node_count(), 3);
	assert_eq!(*kwargs.get::<i32>("a").unwrap(), 5);
	assert_eq!(*kwargs.get::<i32>("b").unwrap(), 5);
	assert_eq!(counter.load(Ordering::SeqCst), 1);
}

#[rstest]
fn instantiations_are_named_after_their_binding() {
	// Arrange
	let counter = Arc::new(AtomicUsize::new(0));
	let template = store_template(&counter);
	let target = provider::signature(
		"target",
		vec![ParamSpec::with_ty(
			"ints",
			TySpec::of::<Store<i32>>().with_args([TySpec::of::<i32>()]),
			Depends::on(template),
		)],
	);

	// Act
	let graph = DependencyGraph::build(target).unwrap();

	// Assert: the node name carries the bound type argument
	assert!(
		graph
			.resolution_order()
			.iter()
			.any(|name| name.starts_with("make_store<") && name.contains("i32"))
	);
}

#[rstest]
fn missing_type_arguments_are_ambiguous() {
	// Arrange: the declared type provides no arguments to bind `T`
	let counter = Arc::new(AtomicUsize::new(0));
	let template = store_template(&counter);
	let target = provider::signature(
		"target",
		vec![ParamSpec::dependency::<Store<i32>>(
			"ints",
			Depends::on(template),
		)],
	);

	// Act
	let result = DependencyGraph::build(target);

	// Assert
	match result {
		Err(GraphError::AmbiguousDependency { provider, param, .. }) => {
			assert_eq!(provider, "target");
			assert_eq!(param, "ints");
		}
		other => panic!("expected ambiguous dependency, got {other:?}"),
	}
}

#[rstest]
fn nested_templates_substitute_recursively() {
	// Arrange: a template whose own dependency passes the bound type along
	let inner_counter = Arc::new(AtomicUsize::new(0));
	let inner = store_template(&inner_counter);
	let outer = provider::generic_function(
		"wrap_store",
		&["U"],
		vec![ParamSpec::with_ty(
			"store",
			TySpec::generic("Store", [TySpec::var("U")]),
			Depends::on(inner),
		)],
		|kwargs| kwargs.value("store").ok_or_else(|| "missing store".into()),
	);
	let target = provider::signature(
		"target",
		vec![ParamSpec::with_ty(
			"wrapped",
			TySpec::of::<Store<u8>>().with_args([TySpec::of::<u8>()]),
			Depends::on(outer),
		)],
	);
	let graph = DependencyGraph::build(target).unwrap();
	let mut defaults = Defaults::new();
	defaults.set(9u8);

	// Act
	let mut scope = graph.scope().defaults(defaults).enter_sync();
	let kwargs = scope.resolve_kwargs().unwrap();
	scope.close().unwrap();

	// Assert: U bound to u8 flowed through to the inner template's seed
	assert_eq!(*kwargs.get::<u8>("wrapped").unwrap(), 9);
	assert_eq!(inner_counter.load(Ordering::SeqCst), 1);
}

//! Resolution scopes
//!
//! A scope is one resolution of a built graph: it owns the per-resolution
//! cache and the list of started two-phase lifecycles. Scopes are entered
//! through [`ScopeBuilder`], resolve keyword arguments with
//! `resolve_kwargs`, and must be closed exactly once, either normally with
//! `close` or with `close_on_error` when the caller's use of the resolved
//! arguments failed. Teardown runs in reverse start order. A scope is never
//! shared between resolutions; the graph behind it is.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use crate::defaults::Defaults;
use crate::error::{GraphError, ResolveError, ScopeError};
use crate::graph::{DependencyGraph, Edge, GraphInner, Node, NodeKey, NodeRole};
use crate::overrides::Overrides;
use crate::provider::{
	AsyncProviderOutput, AsyncScopedDependency, Kwargs, ProviderOutput, ScopedDependency,
	Teardown, Value,
};

/// Configures and enters a resolution scope.
pub struct ScopeBuilder {
	graph: DependencyGraph,
	defaults: Defaults,
	exception_propagation: bool,
}

impl ScopeBuilder {
	pub(crate) fn new(graph: DependencyGraph) -> Self {
		Self {
			graph,
			defaults: Defaults::new(),
			exception_propagation: true,
		}
	}

	/// Supplies default dependency values for this resolution.
	pub fn defaults(mut self, defaults: Defaults) -> Self {
		self.defaults = defaults;
		self
	}

	/// Controls whether an error passed to `close_on_error` is injected into
	/// active lifecycles. Enabled by default; when disabled, lifecycles
	/// finalize as if the scope exited normally and the error still
	/// propagates.
	pub fn exception_propagation(mut self, enabled: bool) -> Self {
		self.exception_propagation = enabled;
		self
	}

	/// Enters a synchronous scope.
	pub fn enter_sync(self) -> SyncScope {
		SyncScope {
			graph: self.graph,
			defaults: self.defaults,
			cache: HashMap::new(),
			active: Vec::new(),
			propagate: self.exception_propagation,
			closed: false,
		}
	}

	/// Enters an asynchronous scope.
	pub fn enter_async(self) -> AsyncScope {
		AsyncScope {
			graph: self.graph,
			defaults: self.defaults,
			cache: HashMap::new(),
			active: Vec::new(),
			propagate: self.exception_propagation,
			closed: false,
		}
	}
}

/// Synchronous resolution scope.
pub struct SyncScope {
	graph: DependencyGraph,
	defaults: Defaults,
	cache: HashMap<NodeKey, Value>,
	active: Vec<(String, Box<dyn ScopedDependency>)>,
	propagate: bool,
	closed: bool,
}

impl SyncScope {
	/// Resolves the target's keyword arguments.
	pub fn resolve_kwargs(&mut self) -> Result<Kwargs, ResolveError> {
		self.resolve(None)
	}

	/// Resolves with replacement providers. A fresh sub-graph is derived for
	/// this call; the prebuilt graph is not touched. This is the slow path.
	pub fn resolve_kwargs_with(&mut self, overrides: &Overrides) -> Result<Kwargs, ResolveError> {
		self.resolve(Some(overrides))
	}

	fn resolve(&mut self, overrides: Option<&Overrides>) -> Result<Kwargs, ResolveError> {
		if self.closed {
			return Err(ResolveError::Closed);
		}
		let base = self.graph.clone();
		let effective = match overrides {
			Some(overrides) if !overrides.is_empty() => DependencyGraph::build_with(
				Arc::clone(&base.inner().target_provider),
				overrides,
			)?,
			_ => base,
		};
		let inner = effective.inner();
		let mut resolver = SyncResolver {
			defaults: &self.defaults,
			active: &mut self.active,
		};
		resolver.run_plan(inner, &inner.plan, &mut self.cache)?;
		resolver.node_kwargs(inner, &inner.nodes[inner.target], &mut self.cache)
	}

	/// Closes the scope after a normal exit, finalizing every started
	/// lifecycle in reverse start order. Returns the first teardown failure.
	pub fn close(mut self) -> Result<(), ScopeError> {
		self.close_inner(None)
	}

	/// Closes the scope after the caller's use of the resolved arguments
	/// failed. With exception propagation enabled the error is injected into
	/// every active lifecycle; the error is re-raised unless every active
	/// lifecycle suppressed it.
	pub fn close_on_error(mut self, error: ScopeError) -> Result<(), ScopeError> {
		self.close_inner(Some(error))
	}

	fn close_inner(&mut self, error: Option<ScopeError>) -> Result<(), ScopeError> {
		if self.closed {
			return Ok(());
		}
		self.closed = true;
		let inject = if self.propagate { error.clone() } else { None };
		let had_active = !self.active.is_empty();
		let mut all_suppressed = had_active;
		let mut teardown_failure: Option<ResolveError> = None;
		for (name, mut lifecycle) in self.active.drain(..).rev() {
			match lifecycle.finish(inject.clone()) {
				Teardown::Completed => {
					if inject.is_some() {
						all_suppressed = false;
					}
				}
				Teardown::Suppressed => {}
				Teardown::Failed(failure) => {
					all_suppressed = false;
					if error.is_some() || teardown_failure.is_some() {
						tracing::warn!(
							dependency = %name,
							error = %failure,
							"error during dependency teardown"
						);
					} else {
						teardown_failure = Some(failure);
					}
				}
			}
		}
		finish_close(error, self.propagate, had_active, all_suppressed, teardown_failure)
	}
}

impl Drop for SyncScope {
	fn drop(&mut self) {
		if !self.closed {
			if let Err(error) = self.close_inner(None) {
				tracing::warn!(%error, "error while closing dependency scope");
			}
		}
	}
}

/// Asynchronous resolution scope.
pub struct AsyncScope {
	graph: DependencyGraph,
	defaults: Defaults,
	cache: HashMap<NodeKey, Value>,
	active: Vec<(String, ActiveLifecycle)>,
	propagate: bool,
	closed: bool,
}

enum ActiveLifecycle {
	Sync(Box<dyn ScopedDependency>),
	Async(Box<dyn AsyncScopedDependency>),
}

impl AsyncScope {
	/// Resolves the target's keyword arguments.
	pub async fn resolve_kwargs(&mut self) -> Result<Kwargs, ResolveError> {
		self.resolve(None).await
	}

	/// Resolves with replacement providers, deriving a fresh sub-graph for
	/// this call.
	pub async fn resolve_kwargs_with(
		&mut self,
		overrides: &Overrides,
	) -> Result<Kwargs, ResolveError> {
		self.resolve(Some(overrides)).await
	}

	async fn resolve(&mut self, overrides: Option<&Overrides>) -> Result<Kwargs, ResolveError> {
		if self.closed {
			return Err(ResolveError::Closed);
		}
		let base = self.graph.clone();
		let effective = match overrides {
			Some(overrides) if !overrides.is_empty() => DependencyGraph::build_with(
				Arc::clone(&base.inner().target_provider),
				overrides,
			)?,
			_ => base,
		};
		let inner = effective.inner();
		let mut resolver = AsyncResolver {
			defaults: &self.defaults,
			active: &mut self.active,
		};
		resolver.run_plan(inner, &inner.plan, &mut self.cache).await?;
		resolver
			.node_kwargs(inner, &inner.nodes[inner.target], &mut self.cache)
			.await
	}

	/// Closes the scope after a normal exit.
	pub async fn close(mut self) -> Result<(), ScopeError> {
		self.close_inner(None).await
	}

	/// Closes the scope after the caller's use of the resolved arguments
	/// failed; see [`SyncScope::close_on_error`].
	pub async fn close_on_error(mut self, error: ScopeError) -> Result<(), ScopeError> {
		self.close_inner(Some(error)).await
	}

	async fn close_inner(&mut self, error: Option<ScopeError>) -> Result<(), ScopeError> {
		if self.closed {
			return Ok(());
		}
		self.closed = true;
		let inject = if self.propagate { error.clone() } else { None };
		let had_active = !self.active.is_empty();
		let mut all_suppressed = had_active;
		let mut teardown_failure: Option<ResolveError> = None;
		let started: Vec<_> = self.active.drain(..).collect();
		for (name, lifecycle) in started.into_iter().rev() {
			let outcome = match lifecycle {
				ActiveLifecycle::Sync(mut lifecycle) => lifecycle.finish(inject.clone()),
				ActiveLifecycle::Async(mut lifecycle) => lifecycle.finish(inject.clone()).await,
			};
			match outcome {
				Teardown::Completed => {
					if inject.is_some() {
						all_suppressed = false;
					}
				}
				Teardown::Suppressed => {}
				Teardown::Failed(failure) => {
					all_suppressed = false;
					if error.is_some() || teardown_failure.is_some() {
						tracing::warn!(
							dependency = %name,
							error = %failure,
							"error during dependency teardown"
						);
					} else {
						teardown_failure = Some(failure);
					}
				}
			}
		}
		finish_close(error, self.propagate, had_active, all_suppressed, teardown_failure)
	}
}

impl Drop for AsyncScope {
	fn drop(&mut self) {
		if self.closed {
			return;
		}
		self.closed = true;
		let mut async_pending = 0usize;
		for (name, lifecycle) in self.active.drain(..).rev() {
			match lifecycle {
				ActiveLifecycle::Sync(mut lifecycle) => {
					if let Teardown::Failed(failure) = lifecycle.finish(None) {
						tracing::warn!(
							dependency = %name,
							error = %failure,
							"error during dependency teardown"
						);
					}
				}
				ActiveLifecycle::Async(_) => async_pending += 1,
			}
		}
		if async_pending > 0 {
			tracing::warn!(
				count = async_pending,
				"async scope dropped without close; async dependencies were not finalized"
			);
		}
	}
}

/// Shared scope-exit accounting for both scope flavors.
fn finish_close(
	error: Option<ScopeError>,
	propagate: bool,
	had_active: bool,
	all_suppressed: bool,
	teardown_failure: Option<ResolveError>,
) -> Result<(), ScopeError> {
	match error {
		Some(error) => {
			if propagate && had_active && all_suppressed {
				Ok(())
			} else {
				Err(error)
			}
		}
		None => match teardown_failure {
			Some(failure) => Err(ScopeError::from(failure)),
			None => Ok(()),
		},
	}
}

struct SyncResolver<'a> {
	defaults: &'a Defaults,
	active: &'a mut Vec<(String, Box<dyn ScopedDependency>)>,
}

impl SyncResolver<'_> {
	/// Executes a plan in topological order. Cacheable nodes run at most
	/// once per cache; defaults keyed by provider identity pre-seed them.
	fn run_plan(
		&mut self,
		graph: &GraphInner,
		plan: &[usize],
		cache: &mut HashMap<NodeKey, Value>,
	) -> Result<(), ResolveError> {
		for &idx in plan {
			let node = &graph.nodes[idx];
			if cache.contains_key(&node.key) {
				continue;
			}
			if node.use_cache() {
				if let NodeRole::Provider { id, .. } = &node.role {
					if let Some(seed) = self.defaults.for_provider(*id) {
						cache.insert(node.key.clone(), seed);
						continue;
					}
				}
			}
			let kwargs = self.node_kwargs(graph, node, cache)?;
			let value = self.execute(node, kwargs)?;
			cache.insert(node.key.clone(), value);
		}
		Ok(())
	}

	fn node_kwargs(
		&mut self,
		graph: &GraphInner,
		node: &Node,
		cache: &mut HashMap<NodeKey, Value>,
	) -> Result<Kwargs, ResolveError> {
		let mut kwargs = Kwargs::new();
		for edge in &node.edges {
			let child = &graph.nodes[edge.child];
			let value = match &child.role {
				NodeRole::ParamInfo { info } => Arc::new(info.clone()) as Value,
				NodeRole::Default { .. } => default_value(self.defaults, node, edge)?,
				NodeRole::Provider { use_cache, .. } => {
					if *use_cache {
						cached_value(node, child, cache)?
					} else {
						self.eval_uncached(graph, edge.child)?
					}
				}
			};
			kwargs.insert(edge.param, value);
		}
		Ok(kwargs)
	}

	/// Runs an uncached node's sub-plan against a fresh cache, so the whole
	/// sub-graph re-executes for this requesting edge.
	fn eval_uncached(&mut self, graph: &GraphInner, root: usize) -> Result<Value, ResolveError> {
		let plan = subplan(graph, root)?;
		let mut fresh = HashMap::new();
		self.run_plan(graph, plan, &mut fresh)?;
		take_root(graph, root, &mut fresh)
	}

	fn execute(&mut self, node: &Node, kwargs: Kwargs) -> Result<Value, ResolveError> {
		let NodeRole::Provider { provider, kind, .. } = &node.role else {
			return Err(not_executable(node));
		};
		if kind.is_async() {
			return Err(ResolveError::AsyncInSyncScope {
				name: node.name.clone(),
			});
		}
		tracing::debug!(dependency = %node.name, "resolving dependency");
		match provider.call(kwargs)? {
			ProviderOutput::Value(value) => Ok(value),
			ProviderOutput::Scoped(mut lifecycle) => {
				let value = lifecycle.start()?;
				self.active.push((node.name.clone(), lifecycle));
				Ok(value)
			}
		}
	}
}

struct AsyncResolver<'a> {
	defaults: &'a Defaults,
	active: &'a mut Vec<(String, ActiveLifecycle)>,
}

impl AsyncResolver<'_> {
	async fn run_plan(
		&mut self,
		graph: &GraphInner,
		plan: &[usize],
		cache: &mut HashMap<NodeKey, Value>,
	) -> Result<(), ResolveError> {
		for &idx in plan {
			let node = &graph.nodes[idx];
			if cache.contains_key(&node.key) {
				continue;
			}
			if node.use_cache() {
				if let NodeRole::Provider { id, .. } = &node.role {
					if let Some(seed) = self.defaults.for_provider(*id) {
						cache.insert(node.key.clone(), seed);
						continue;
					}
				}
			}
			let kwargs = self.node_kwargs(graph, node, cache).await?;
			let value = self.execute(node, kwargs).await?;
			cache.insert(node.key.clone(), value);
		}
		Ok(())
	}

	async fn node_kwargs(
		&mut self,
		graph: &GraphInner,
		node: &Node,
		cache: &mut HashMap<NodeKey, Value>,
	) -> Result<Kwargs, ResolveError> {
		let mut kwargs = Kwargs::new();
		for edge in &node.edges {
			let child = &graph.nodes[edge.child];
			let value = match &child.role {
				NodeRole::ParamInfo { info } => Arc::new(info.clone()) as Value,
				NodeRole::Default { .. } => default_value(self.defaults, node, edge)?,
				NodeRole::Provider { use_cache, .. } => {
					if *use_cache {
						cached_value(node, child, cache)?
					} else {
						self.eval_uncached(graph, edge.child).await?
					}
				}
			};
			kwargs.insert(edge.param, value);
		}
		Ok(kwargs)
	}

	/// Boxed to break the async recursion through nested uncached
	/// sub-graphs.
	fn eval_uncached<'a>(
		&'a mut self,
		graph: &'a GraphInner,
		root: usize,
	) -> Pin<Box<dyn Future<Output = Result<Value, ResolveError>> + Send + 'a>> {
		Box::pin(async move {
			let plan = subplan(graph, root)?;
			let mut fresh = HashMap::new();
			self.run_plan(graph, plan, &mut fresh).await?;
			take_root(graph, root, &mut fresh)
		})
	}

	async fn execute(&mut self, node: &Node, kwargs: Kwargs) -> Result<Value, ResolveError> {
		let NodeRole::Provider { provider, .. } = &node.role else {
			return Err(not_executable(node));
		};
		tracing::debug!(dependency = %node.name, "resolving dependency");
		match provider.call_async(kwargs).await? {
			AsyncProviderOutput::Value(value) => Ok(value),
			AsyncProviderOutput::Scoped(mut lifecycle) => {
				let value = lifecycle.start()?;
				self.active
					.push((node.name.clone(), ActiveLifecycle::Sync(lifecycle)));
				Ok(value)
			}
			AsyncProviderOutput::AsyncScoped(mut lifecycle) => {
				let value = lifecycle.start().await?;
				self.active
					.push((node.name.clone(), ActiveLifecycle::Async(lifecycle)));
				Ok(value)
			}
		}
	}
}

fn default_value(defaults: &Defaults, node: &Node, edge: &Edge) -> Result<Value, ResolveError> {
	edge.ty
		.type_id()
		.and_then(|id| defaults.for_type(id))
		.ok_or_else(|| ResolveError::UnresolvedDependency {
			provider: node.name.clone(),
			param: edge.param.to_string(),
			ty: edge.ty.to_string(),
		})
}

fn cached_value(
	node: &Node,
	child: &Node,
	cache: &HashMap<NodeKey, Value>,
) -> Result<Value, ResolveError> {
	cache.get(&child.key).cloned().ok_or_else(|| {
		ResolveError::Graph(GraphError::Inconsistent(format!(
			"node `{}` ran before its dependency `{}`",
			node.name, child.name
		)))
	})
}

fn subplan(graph: &GraphInner, root: usize) -> Result<&[usize], ResolveError> {
	graph
		.subplans
		.get(&root)
		.map(Vec::as_slice)
		.ok_or_else(|| {
			ResolveError::Graph(GraphError::Inconsistent(format!(
				"missing sub-plan for uncached dependency `{}`",
				graph.nodes[root].name
			)))
		})
}

fn take_root(
	graph: &GraphInner,
	root: usize,
	cache: &mut HashMap<NodeKey, Value>,
) -> Result<Value, ResolveError> {
	cache.remove(&graph.nodes[root].key).ok_or_else(|| {
		ResolveError::Graph(GraphError::Inconsistent(format!(
			"uncached dependency `{}` produced no value",
			graph.nodes[root].name
		)))
	})
}

fn not_executable(node: &Node) -> ResolveError {
	ResolveError::Graph(GraphError::Inconsistent(format!(
		"node `{}` is not executable",
		node.name
	)))
}

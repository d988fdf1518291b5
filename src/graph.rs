//! Dependency graph construction and ordering
//!
//! [`DependencyGraph::build`] walks a target provider's signature, discovers
//! every transitive dependency, deduplicates nodes by identity, binds generic
//! templates, rejects cycles while they are still on the discovery stack and
//! orders the surviving DAG with a Kahn-style extraction. The built graph is
//! immutable and cheap to clone; many scopes can resolve it concurrently.

use std::any::TypeId;
use std::collections::{HashMap, HashSet, VecDeque};
use std::fmt;
use std::sync::Arc;

use crate::context::ScopeBuilder;
use crate::dependency::{Binding, DependencyKind, ParamInfo, TySpec};
use crate::error::GraphError;
use crate::overrides::Overrides;
use crate::provider::{Provider, ProviderId, ProviderKind};

/// Maximum discovery depth, a backstop against pathological chains.
const MAX_DEPTH: usize = 100;

/// Identity of a node, used as the per-resolution cache key.
///
/// Provider nodes are keyed by provider identity, generics binding and cache
/// flag, so two parameters resolving to the same instantiation share one
/// node. A provider that directly requests [`ParamInfo`] is additionally
/// keyed by its requesting edge, because its value depends on which
/// parameter asked for it.
#[derive(Clone, PartialEq, Eq, Hash, Debug)]
pub(crate) enum NodeKey {
	Provider {
		id: ProviderId,
		binding: Binding,
		use_cache: bool,
		edge: Option<Box<EdgeRef>>,
	},
	Default {
		ty: TySpec,
	},
	ParamInfo {
		edge: Box<EdgeRef>,
	},
}

#[derive(Clone, PartialEq, Eq, Hash, Debug)]
pub(crate) struct EdgeRef {
	pub(crate) parent: NodeKey,
	pub(crate) param: &'static str,
}

pub(crate) enum NodeRole {
	/// Executes a provider.
	Provider {
		provider: Arc<dyn Provider>,
		id: ProviderId,
		kind: ProviderKind,
		use_cache: bool,
	},
	/// Satisfied from caller-supplied defaults by declared type.
	Default { ty: TySpec },
	/// Satisfied with metadata about the requesting parameter.
	ParamInfo { info: ParamInfo },
}

pub(crate) struct Edge {
	pub(crate) param: &'static str,
	pub(crate) ty: TySpec,
	pub(crate) child: usize,
}

pub(crate) struct Node {
	pub(crate) key: NodeKey,
	pub(crate) name: String,
	pub(crate) role: NodeRole,
	pub(crate) edges: Vec<Edge>,
}

impl Node {
	pub(crate) fn use_cache(&self) -> bool {
		match &self.role {
			NodeRole::Provider { use_cache, .. } => *use_cache,
			_ => true,
		}
	}
}

pub(crate) struct GraphInner {
	pub(crate) target: usize,
	pub(crate) target_provider: Arc<dyn Provider>,
	pub(crate) nodes: Vec<Node>,
	/// Full topological order over every discovered node.
	pub(crate) order: Vec<usize>,
	/// Cacheable provider nodes reachable from the target through cached
	/// edges, in execution order. The target itself is excluded.
	pub(crate) plan: Vec<usize>,
	/// Execution order for each uncached node's sub-graph, root included.
	pub(crate) subplans: HashMap<usize, Vec<usize>>,
}

/// The immutable, prebuilt dependency graph for one target.
///
/// Built once per target and reused by every resolution. Cloning shares the
/// underlying graph.
#[derive(Clone)]
pub struct DependencyGraph {
	inner: Arc<GraphInner>,
}

impl DependencyGraph {
	/// Builds the graph for `target`.
	pub fn build(target: Arc<dyn Provider>) -> Result<Self, GraphError> {
		Self::build_with(target, &Overrides::new())
	}

	/// Builds the graph for `target` with replacement providers applied.
	///
	/// Used internally when overrides are passed to a resolution; the graph
	/// the overrides were layered on is left untouched.
	pub fn build_with(target: Arc<dyn Provider>, overrides: &Overrides) -> Result<Self, GraphError> {
		let effective_target = overrides
			.for_provider(ProviderId::of(&target))
			.unwrap_or_else(|| Arc::clone(&target));

		let mut builder = Builder {
			overrides,
			nodes: Vec::new(),
			index: HashMap::new(),
			stack: Vec::new(),
		};
		let target_idx = builder.add_node(effective_target, Binding::new(), true, None)?;
		let nodes = builder.nodes;

		let order = topo_order(&nodes)?;
		let reachable = reachable_cached(&nodes, target_idx);
		let plan = order
			.iter()
			.copied()
			.filter(|&idx| idx != target_idx && reachable.contains(&idx))
			.collect();

		let mut subplans = HashMap::new();
		for (idx, node) in nodes.iter().enumerate() {
			if let NodeRole::Provider {
				use_cache: false, ..
			} = node.role
			{
				let sub = reachable_cached(&nodes, idx);
				subplans.insert(
					idx,
					order.iter().copied().filter(|i| sub.contains(i)).collect(),
				);
			}
		}

		tracing::debug!(
			root = %nodes[target_idx].name,
			nodes = nodes.len(),
			"dependency graph built"
		);

		Ok(Self {
			inner: Arc::new(GraphInner {
				target: target_idx,
				target_provider: target,
				nodes,
				order,
				plan,
				subplans,
			}),
		})
	}

	/// Whether the target depends on anything at all.
	pub fn is_empty(&self) -> bool {
		self.inner.nodes.len() <= 1
	}

	/// Number of nodes, target included.
	pub fn node_count(&self) -> usize {
		self.inner.nodes.len()
	}

	/// Node names in topological order; every node precedes the nodes that
	/// depend on it. The target comes last.
	pub fn resolution_order(&self) -> Vec<String> {
		self.inner
			.order
			.iter()
			.map(|&idx| self.inner.nodes[idx].name.clone())
			.collect()
	}

	/// Renders the graph in DOT format for Graphviz.
	pub fn to_dot(&self) -> String {
		let mut dot = String::from("digraph dependencies {\n");
		for node in &self.inner.nodes {
			let shape = match node.role {
				NodeRole::Provider { .. } => "box",
				NodeRole::Default { .. } => "ellipse",
				NodeRole::ParamInfo { .. } => "diamond",
			};
			dot.push_str(&format!("    \"{}\" [shape={}];\n", node.name, shape));
		}
		for node in &self.inner.nodes {
			for edge in &node.edges {
				dot.push_str(&format!(
					"    \"{}\" -> \"{}\" [label=\"{}\"];\n",
					node.name, self.inner.nodes[edge.child].name, edge.param
				));
			}
		}
		dot.push_str("}\n");
		dot
	}

	/// Starts configuring a resolution scope for this graph.
	pub fn scope(&self) -> ScopeBuilder {
		ScopeBuilder::new(self.clone())
	}

	/// Enters a synchronous scope with no defaults.
	pub fn sync_scope(&self) -> crate::context::SyncScope {
		self.scope().enter_sync()
	}

	/// Enters an asynchronous scope with no defaults.
	pub fn async_scope(&self) -> crate::context::AsyncScope {
		self.scope().enter_async()
	}

	pub(crate) fn inner(&self) -> &GraphInner {
		&self.inner
	}
}

impl fmt::Debug for DependencyGraph {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("DependencyGraph")
			.field("target", &self.inner.nodes[self.inner.target].name)
			.field("nodes", &self.inner.nodes.len())
			.field("order", &self.resolution_order())
			.finish()
	}
}

struct Builder<'a> {
	overrides: &'a Overrides,
	nodes: Vec<Node>,
	index: HashMap<NodeKey, usize>,
	stack: Vec<usize>,
}

impl Builder<'_> {
	/// Adds a provider node, reusing an existing node with the same
	/// identity. `requested_by` is the edge through which the node is being
	/// wired: (parent key, parameter name, declared type).
	fn add_node(
		&mut self,
		provider: Arc<dyn Provider>,
		binding: Binding,
		use_cache: bool,
		requested_by: Option<(NodeKey, &'static str, TySpec)>,
	) -> Result<usize, GraphError> {
		let id = ProviderId::of(&provider);
		let name = display_name(&provider, &binding);
		let params = provider.params();

		// Substitute declared types up front; anything still carrying a
		// type variable is a declaration error.
		let mut marked = Vec::new();
		for param in &params {
			let Some(marker) = param.marker() else {
				continue;
			};
			let ty = param.ty().substitute(&binding);
			if ty.has_vars() {
				return Err(GraphError::AmbiguousDependency {
					provider: name,
					param: param.name().to_string(),
					reason: format!("declared type `{ty}` contains unbound type parameters"),
				});
			}
			marked.push((param.name(), ty, marker.clone()));
		}

		let requests_param_info = marked.iter().any(|(_, ty, marker)| {
			matches!(marker.kind(), DependencyKind::Default)
				&& ty.type_id() == Some(TypeId::of::<ParamInfo>())
		});
		let key = NodeKey::Provider {
			id,
			binding,
			use_cache,
			edge: if requests_param_info {
				requested_by.as_ref().map(|(parent, param, _)| {
					Box::new(EdgeRef {
						parent: parent.clone(),
						param,
					})
				})
			} else {
				None
			},
		};

		if let Some(&existing) = self.index.get(&key) {
			if self.stack.contains(&existing) {
				return Err(self.cycle_error(existing));
			}
			return Ok(existing);
		}
		if self.stack.len() >= MAX_DEPTH {
			return Err(GraphError::DepthExceeded(self.stack.len()));
		}

		let idx = self.nodes.len();
		self.nodes.push(Node {
			key: key.clone(),
			name,
			role: NodeRole::Provider {
				provider: Arc::clone(&provider),
				id,
				kind: provider.kind(),
				use_cache,
			},
			edges: Vec::new(),
		});
		self.index.insert(key.clone(), idx);
		self.stack.push(idx);

		let mut edges = Vec::new();
		for (param, ty, marker) in marked {
			let child = match marker.kind() {
				DependencyKind::Provider(dep) => {
					let effective = self
						.overrides
						.for_provider(ProviderId::of(dep))
						.unwrap_or_else(|| Arc::clone(dep));
					let child_binding = self.bind_type_args(idx, param, &ty, &effective)?;
					self.add_node(
						effective,
						child_binding,
						marker.use_cache(),
						Some((key.clone(), param, ty.clone())),
					)?
				}
				DependencyKind::Default => {
					if ty.type_id() == Some(TypeId::of::<ParamInfo>()) {
						self.add_param_info(key.clone(), param, requested_by.as_ref())
					} else if let Some(replacement) =
						ty.type_id().and_then(|id| self.overrides.for_type(id))
					{
						let child_binding =
							self.bind_type_args(idx, param, &ty, &replacement)?;
						self.add_node(
							replacement,
							child_binding,
							marker.use_cache(),
							Some((key.clone(), param, ty.clone())),
						)?
					} else if ty.type_id().is_some() {
						self.add_default(ty.clone())
					} else {
						return Err(GraphError::AmbiguousDependency {
							provider: self.nodes[idx].name.clone(),
							param: param.to_string(),
							reason: format!(
								"declared type `{ty}` has no concrete identity to match \
								 caller-supplied defaults against"
							),
						});
					}
				}
			};
			edges.push(Edge { param, ty, child });
		}

		self.nodes[idx].edges = edges;
		self.stack.pop();
		Ok(idx)
	}

	fn add_param_info(
		&mut self,
		parent: NodeKey,
		param: &'static str,
		requested_by: Option<&(NodeKey, &'static str, TySpec)>,
	) -> usize {
		let key = NodeKey::ParamInfo {
			edge: Box::new(EdgeRef { parent, param }),
		};
		if let Some(&existing) = self.index.get(&key) {
			return existing;
		}
		let info = match requested_by {
			Some((_, name, ty)) => ParamInfo::new((*name).to_string(), Some(ty.clone())),
			None => ParamInfo::new(String::new(), None),
		};
		let idx = self.nodes.len();
		self.nodes.push(Node {
			key: key.clone(),
			name: "ParamInfo".to_string(),
			role: NodeRole::ParamInfo { info },
			edges: Vec::new(),
		});
		self.index.insert(key, idx);
		idx
	}

	fn add_default(&mut self, ty: TySpec) -> usize {
		let key = NodeKey::Default { ty: ty.clone() };
		if let Some(&existing) = self.index.get(&key) {
			return existing;
		}
		let idx = self.nodes.len();
		self.nodes.push(Node {
			key: key.clone(),
			name: ty.to_string(),
			role: NodeRole::Default { ty },
			edges: Vec::new(),
		});
		self.index.insert(key, idx);
		idx
	}

	/// Zips a generic template's type parameters with the declared type
	/// arguments of the requesting parameter.
	fn bind_type_args(
		&self,
		declaring: usize,
		param: &'static str,
		declared: &TySpec,
		dep: &Arc<dyn Provider>,
	) -> Result<Binding, GraphError> {
		let type_params = dep.type_params();
		if type_params.is_empty() {
			return Ok(Binding::new());
		}
		let args = declared.args();
		if args.len() != type_params.len() {
			return Err(GraphError::AmbiguousDependency {
				provider: self.nodes.get(declaring).map_or_else(
					|| declared.to_string(),
					|node| node.name.clone(),
				),
				param: param.to_string(),
				reason: format!(
					"generic dependency `{}` expects {} type argument(s), the declared type \
					 `{declared}` provides {}",
					dep.name(),
					type_params.len(),
					args.len()
				),
			});
		}
		Ok(type_params
			.iter()
			.copied()
			.zip(args.iter().cloned())
			.collect())
	}

	fn cycle_error(&self, revisited: usize) -> GraphError {
		let start = self
			.stack
			.iter()
			.position(|&idx| idx == revisited)
			.unwrap_or(0);
		let mut names: Vec<&str> = self.stack[start..]
			.iter()
			.map(|&idx| self.nodes[idx].name.as_str())
			.collect();
		names.push(self.nodes[revisited].name.as_str());
		GraphError::Cycle {
			path: names.join(" -> "),
		}
	}
}

fn display_name(provider: &Arc<dyn Provider>, binding: &Binding) -> String {
	if binding.is_empty() {
		return provider.name().to_string();
	}
	let args: Vec<String> = provider
		.type_params()
		.iter()
		.filter_map(|tp| binding.get(tp))
		.map(TySpec::to_string)
		.collect();
	if args.is_empty() {
		provider.name().to_string()
	} else {
		format!("{}<{}>", provider.name(), args.join(", "))
	}
}

/// Kahn-style extraction over the discovered nodes. Discovery already
/// rejected cycles, so leftovers indicate an internal inconsistency.
fn topo_order(nodes: &[Node]) -> Result<Vec<usize>, GraphError> {
	let count = nodes.len();
	let mut indegree = vec![0usize; count];
	let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); count];
	for (idx, node) in nodes.iter().enumerate() {
		let mut seen = HashSet::new();
		for edge in &node.edges {
			if seen.insert(edge.child) {
				indegree[idx] += 1;
				dependents[edge.child].push(idx);
			}
		}
	}

	let mut queue: VecDeque<usize> = (0..count).filter(|&idx| indegree[idx] == 0).collect();
	let mut order = Vec::with_capacity(count);
	while let Some(idx) = queue.pop_front() {
		order.push(idx);
		for &dependent in &dependents[idx] {
			indegree[dependent] -= 1;
			if indegree[dependent] == 0 {
				queue.push_back(dependent);
			}
		}
	}

	if order.len() != count {
		return Err(GraphError::Inconsistent(format!(
			"topological extraction left {} node(s) unresolved",
			count - order.len()
		)));
	}
	Ok(order)
}

/// Nodes reachable from `root` through cache-participating provider edges.
/// Uncached children are cut off here; they execute through their own
/// sub-plan at the moment a parameter requests them.
fn reachable_cached(nodes: &[Node], root: usize) -> HashSet<usize> {
	let mut mark = HashSet::from([root]);
	let mut stack = vec![root];
	while let Some(idx) = stack.pop() {
		for edge in &nodes[idx].edges {
			if let NodeRole::Provider { use_cache: true, .. } = nodes[edge.child].role {
				if mark.insert(edge.child) {
					stack.push(edge.child);
				}
			}
		}
	}
	mark
}

//! # Taskwire
//!
//! FastAPI-inspired dependency resolution graph for Rust.
//!
//! Given a target callable whose parameters are marked as dependencies,
//! taskwire builds the directed graph of everything that has to run first,
//! orders it so each dependency executes before its dependents, and resolves
//! it inside a scope that owns caching and teardown.
//!
//! ## Features
//!
//! - **Graph-first**: the graph is built once per target, validated for
//!   cycles at build time and shared by any number of resolutions
//! - **Scoped**: every resolution runs inside a sync or async scope with its
//!   own cache and LIFO teardown of two-phase dependencies
//! - **Cache**: a cacheable dependency shared by several parameters runs at
//!   most once per resolution; `no_cache` forces a fresh sub-graph run per
//!   requesting parameter
//! - **Overrides**: replacement providers substitute at resolution time,
//!   transparently extending the graph without mutating it
//! - **Generics**: one provider template serves many concrete
//!   instantiations, distinguished by declared type arguments
//!
//! ## Example
//!
//! ```rust
//! use taskwire::{DependencyGraph, Depends, ParamSpec, provider};
//!
//! let dep1 = provider::function("dep1", vec![], |_| Ok(1i32));
//! let target = provider::signature(
//!     "target",
//!     vec![ParamSpec::dependency::<i32>("some_int", Depends::on(dep1))],
//! );
//!
//! let graph = DependencyGraph::build(target).unwrap();
//! let mut scope = graph.sync_scope();
//! let kwargs = scope.resolve_kwargs().unwrap();
//!
//! assert_eq!(*kwargs.get::<i32>("some_int").unwrap(), 1);
//! scope.close().unwrap();
//! ```
//!
//! Two-phase dependencies pair a setup closure with a teardown closure; the
//! teardown runs at scope exit and receives the scope's error when exception
//! propagation is enabled:
//!
//! ```rust,ignore
//! let session = provider::scoped(
//!     "session",
//!     vec![],
//!     |_| Ok((open_session()?, ())),
//!     |_, injected| {
//!         if injected.is_some() {
//!             rollback();
//!         } else {
//!             commit();
//!         }
//!         Teardown::Completed
//!     },
//! );
//! ```

pub mod context;
pub mod defaults;
pub mod dependency;
pub mod error;
pub mod graph;
pub mod overrides;
pub mod provider;

pub use context::{AsyncScope, ScopeBuilder, SyncScope};
pub use defaults::Defaults;
pub use dependency::{Binding, DependencyKind, Depends, ParamInfo, ParamSpec, TySpec};
pub use error::{BoxError, GraphError, ResolveError, ScopeError};
pub use graph::DependencyGraph;
pub use overrides::Overrides;
pub use provider::{
	AsyncProviderOutput, AsyncScopedDependency, Kwargs, Provider, ProviderId, ProviderKind,
	ProviderOutput, ScopedDependency, Teardown, Value,
};

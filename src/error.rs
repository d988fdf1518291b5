//! Error types for graph construction and dependency resolution

use std::error::Error;
use std::fmt;
use std::sync::Arc;

/// Boxed error returned by user-supplied providers and lifecycles.
pub type BoxError = Box<dyn Error + Send + Sync + 'static>;

/// Errors raised while building a dependency graph.
#[derive(Debug, thiserror::Error)]
pub enum GraphError {
	/// The dependency relation contains a cycle.
	#[error("circular dependency detected\n  path: {path}\nThis forms a cycle that cannot be resolved.")]
	Cycle {
		/// Cycle path in `A -> B -> C -> A` form.
		path: String,
	},

	/// A dependency declaration cannot be made concrete at build time.
	#[error("ambiguous dependency `{param}` of `{provider}`: {reason}")]
	AmbiguousDependency {
		/// Provider declaring the parameter.
		provider: String,
		/// Parameter name.
		param: String,
		/// Why the declaration is ambiguous.
		reason: String,
	},

	/// The discovery stack grew past the supported depth.
	#[error("maximum dependency depth exceeded: {0}\nThis likely indicates a pathologically deep dependency chain.")]
	DepthExceeded(usize),

	/// The topological extraction left unresolved nodes behind. This can
	/// only happen if discovery-time cycle detection was bypassed.
	#[error("internal graph inconsistency: {0}")]
	Inconsistent(String),
}

/// Errors raised while resolving a graph inside a scope.
#[derive(Debug, thiserror::Error)]
pub enum ResolveError {
	/// Graph derivation failed, e.g. an override introduced a cycle.
	#[error(transparent)]
	Graph(#[from] GraphError),

	/// A pure-default dependency had no matching value in the supplied
	/// defaults or overrides.
	#[error("dependency `{param}` of `{provider}` cannot be resolved: no default value of type `{ty}` was supplied")]
	UnresolvedDependency {
		/// Provider declaring the parameter.
		provider: String,
		/// Parameter name.
		param: String,
		/// Declared type of the parameter.
		ty: String,
	},

	/// An asynchronous provider was requested from a synchronous scope.
	#[error("async dependency `{name}` cannot run inside a sync scope; use an async scope instead")]
	AsyncInSyncScope {
		/// Provider name.
		name: String,
	},

	/// A provider body failed.
	#[error("dependency `{name}` failed")]
	Provider {
		/// Provider name.
		name: String,
		/// Underlying error.
		#[source]
		source: BoxError,
	},

	/// The scope was already closed.
	#[error("dependency scope is already closed")]
	Closed,
}

impl ResolveError {
	pub(crate) fn provider(name: &str, source: BoxError) -> Self {
		Self::Provider {
			name: name.to_string(),
			source,
		}
	}
}

/// Error observed while the resolved arguments were in use.
///
/// A `ScopeError` is what gets injected into still-active two-phase
/// dependencies when a scope exits exceptionally. It is cheaply cloneable
/// so every active lifecycle can receive the same error, and supports
/// downcasting so a lifecycle can react to specific error types.
#[derive(Clone)]
pub struct ScopeError {
	inner: Arc<dyn Error + Send + Sync + 'static>,
}

impl ScopeError {
	/// Wraps any error for injection into a scope exit.
	pub fn new<E>(error: E) -> Self
	where
		E: Into<BoxError>,
	{
		Self {
			inner: Arc::from(error.into()),
		}
	}

	/// Returns the wrapped error.
	pub fn get_ref(&self) -> &(dyn Error + Send + Sync + 'static) {
		self.inner.as_ref()
	}

	/// Attempts to downcast the wrapped error to a concrete type.
	pub fn downcast_ref<E: Error + 'static>(&self) -> Option<&E> {
		self.inner.downcast_ref::<E>()
	}
}

impl fmt::Debug for ScopeError {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		fmt::Debug::fmt(&self.inner, f)
	}
}

impl fmt::Display for ScopeError {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		fmt::Display::fmt(&self.inner, f)
	}
}

impl Error for ScopeError {
	fn source(&self) -> Option<&(dyn Error + 'static)> {
		self.inner.source()
	}
}

impl From<ResolveError> for ScopeError {
	fn from(error: ResolveError) -> Self {
		Self::new(error)
	}
}

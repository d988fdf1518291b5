//! Providers and two-phase dependency lifecycles
//!
//! A [`Provider`] is the engine's view of a callable: it exposes an ordered
//! parameter list (the signature-introspection capability the engine
//! consumes) and an invocation path, sync or async. Two-phase dependencies
//! return a [`ScopedDependency`] or [`AsyncScopedDependency`] whose `start`
//! phase produces the value and whose `finish` phase runs at scope exit.
//!
//! Most providers are built from closures with the constructors in this
//! module rather than by implementing the trait by hand:
//!
//! ```rust,ignore
//! let db = provider::scoped(
//!     "db_session",
//!     vec![],
//!     |_| Ok((Session::connect()?, ())),
//!     |_, injected| {
//!         if injected.is_some() {
//!             rollback();
//!         }
//!         Teardown::Completed
//!     },
//! );
//! ```

use std::any::Any;
use std::collections::HashMap;
use std::future::Future;
use std::marker::PhantomData;
use std::sync::Arc;

use crate::dependency::ParamSpec;
use crate::error::{BoxError, ResolveError, ScopeError};

/// Type-erased resolved value.
pub type Value = Arc<dyn Any + Send + Sync>;

/// Resolved keyword arguments, keyed by parameter name.
#[derive(Clone, Default)]
pub struct Kwargs {
	values: HashMap<&'static str, Value>,
}

impl Kwargs {
	/// Creates an empty argument map.
	pub fn new() -> Self {
		Self::default()
	}

	/// Typed access to a resolved argument.
	pub fn get<T: Any + Send + Sync>(&self, name: &str) -> Option<Arc<T>> {
		self.values
			.get(name)
			.and_then(|value| value.clone().downcast::<T>().ok())
	}

	/// Typed access that fails with a descriptive error, for use inside
	/// provider closures.
	pub fn require<T: Any + Send + Sync>(&self, name: &str) -> Result<Arc<T>, BoxError> {
		self.get(name)
			.ok_or_else(|| format!("missing or mistyped argument `{name}`").into())
	}

	/// Raw access to a resolved argument.
	pub fn value(&self, name: &str) -> Option<Value> {
		self.values.get(name).cloned()
	}

	pub(crate) fn insert(&mut self, name: &'static str, value: Value) {
		self.values.insert(name, value);
	}

	/// Number of resolved arguments.
	pub fn len(&self) -> usize {
		self.values.len()
	}

	/// Whether the map is empty.
	pub fn is_empty(&self) -> bool {
		self.values.is_empty()
	}

	/// Names of the resolved arguments, in no particular order.
	pub fn names(&self) -> impl Iterator<Item = &'static str> + '_ {
		self.values.keys().copied()
	}
}

/// Stable identity of a provider, used for node identity, caching and
/// override lookup.
///
/// Identity is the `Arc` allocation: clones of one `Arc<dyn Provider>`
/// share an identity, separately constructed providers never do.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct ProviderId(usize);

impl ProviderId {
	/// Identity of the given provider handle.
	pub fn of(provider: &Arc<dyn Provider>) -> Self {
		Self(Arc::as_ptr(provider) as *const () as usize)
	}
}

/// Execution shape of a provider.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum ProviderKind {
	/// Plain synchronous callable.
	Sync,
	/// Asynchronous callable.
	Async,
	/// Synchronous two-phase dependency.
	Scoped,
	/// Asynchronous two-phase dependency.
	AsyncScoped,
}

impl ProviderKind {
	/// Whether this provider requires an async scope.
	pub fn is_async(self) -> bool {
		matches!(self, Self::Async | Self::AsyncScoped)
	}

	/// Whether this provider has a teardown phase.
	pub fn is_scoped(self) -> bool {
		matches!(self, Self::Scoped | Self::AsyncScoped)
	}
}

/// Result of invoking a provider synchronously.
pub enum ProviderOutput {
	/// A ready value.
	Value(Value),
	/// A two-phase lifecycle that still has to be started.
	Scoped(Box<dyn ScopedDependency>),
}

/// Result of invoking a provider asynchronously.
pub enum AsyncProviderOutput {
	/// A ready value.
	Value(Value),
	/// A synchronous two-phase lifecycle.
	Scoped(Box<dyn ScopedDependency>),
	/// An asynchronous two-phase lifecycle.
	AsyncScoped(Box<dyn AsyncScopedDependency>),
}

impl From<ProviderOutput> for AsyncProviderOutput {
	fn from(output: ProviderOutput) -> Self {
		match output {
			ProviderOutput::Value(value) => Self::Value(value),
			ProviderOutput::Scoped(lifecycle) => Self::Scoped(lifecycle),
		}
	}
}

/// A resolvable callable.
///
/// Implementations describe their signature through [`params`] and execute
/// through [`call`] or [`call_async`]. The engine never invokes a provider
/// before every dependency-marked parameter in its signature has been
/// resolved.
///
/// [`params`]: Provider::params
/// [`call`]: Provider::call
/// [`call_async`]: Provider::call_async
#[async_trait::async_trait]
pub trait Provider: Send + Sync {
	/// Name used in error messages and logs.
	fn name(&self) -> &'static str;

	/// Ordered parameter list with dependency markers.
	fn params(&self) -> Vec<ParamSpec>;

	/// Type variables of a generic provider template. A non-empty list makes
	/// the provider a template: each use must declare matching concrete type
	/// arguments, and each distinct argument tuple becomes its own node.
	fn type_params(&self) -> &'static [&'static str] {
		&[]
	}

	/// Execution shape.
	fn kind(&self) -> ProviderKind {
		ProviderKind::Sync
	}

	/// Invokes the provider synchronously.
	fn call(&self, kwargs: Kwargs) -> Result<ProviderOutput, ResolveError>;

	/// Invokes the provider asynchronously. Defaults to the sync path so
	/// plain providers work in async scopes unchanged.
	async fn call_async(&self, kwargs: Kwargs) -> Result<AsyncProviderOutput, ResolveError> {
		Ok(self.call(kwargs)?.into())
	}
}

/// Outcome of a lifecycle's finalization phase.
#[derive(Debug)]
pub enum Teardown {
	/// Cleanup ran. An injected error keeps propagating.
	Completed,
	/// The injected error was handled; the scope exit will not re-raise it.
	Suppressed,
	/// Cleanup itself failed.
	Failed(ResolveError),
}

/// Synchronous two-phase dependency lifecycle.
///
/// `start` produces the dependency value; `finish` runs exactly once at
/// scope exit, in reverse start order, receiving the scope's error when
/// exception propagation is enabled. The engine never calls `finish` on a
/// lifecycle whose `start` did not run, and never calls it twice.
pub trait ScopedDependency: Send {
	/// Produces the dependency value.
	fn start(&mut self) -> Result<Value, ResolveError>;

	/// Finalizes the dependency.
	fn finish(&mut self, injected: Option<ScopeError>) -> Teardown;
}

/// Asynchronous two-phase dependency lifecycle.
#[async_trait::async_trait]
pub trait AsyncScopedDependency: Send {
	/// Produces the dependency value.
	async fn start(&mut self) -> Result<Value, ResolveError>;

	/// Finalizes the dependency.
	async fn finish(&mut self, injected: Option<ScopeError>) -> Teardown;
}

/// Provider from a plain function or closure.
pub fn function<T, F>(
	name: &'static str,
	params: Vec<ParamSpec>,
	func: F,
) -> Arc<dyn Provider>
where
	T: Send + Sync + 'static,
	F: Fn(Kwargs) -> Result<T, BoxError> + Send + Sync + 'static,
{
	Arc::new(FnProvider {
		name,
		params,
		func,
		_marker: PhantomData,
	})
}

/// Provider from an async function or closure.
pub fn async_function<T, F, Fut>(
	name: &'static str,
	params: Vec<ParamSpec>,
	func: F,
) -> Arc<dyn Provider>
where
	T: Send + Sync + 'static,
	F: Fn(Kwargs) -> Fut + Send + Sync + 'static,
	Fut: Future<Output = Result<T, BoxError>> + Send + 'static,
{
	Arc::new(AsyncFnProvider {
		name,
		params,
		func,
		_marker: PhantomData,
	})
}

/// Generic provider template producing an already erased value.
///
/// Template parameters in `type_params` may appear as [`TySpec::Var`] in the
/// declared types of `params`; each use of the template binds them from the
/// requesting parameter's type arguments.
///
/// [`TySpec::Var`]: crate::dependency::TySpec::Var
pub fn generic_function<F>(
	name: &'static str,
	type_params: &'static [&'static str],
	params: Vec<ParamSpec>,
	func: F,
) -> Arc<dyn Provider>
where
	F: Fn(Kwargs) -> Result<Value, BoxError> + Send + Sync + 'static,
{
	Arc::new(RawFnProvider {
		name,
		type_params,
		params,
		func,
	})
}

/// Two-phase provider from a setup and a teardown closure.
///
/// `setup` returns the dependency value together with whatever state the
/// teardown needs; `teardown` consumes that state at scope exit.
pub fn scoped<T, S, F, G>(
	name: &'static str,
	params: Vec<ParamSpec>,
	setup: F,
	teardown: G,
) -> Arc<dyn Provider>
where
	T: Send + Sync + 'static,
	S: Send + 'static,
	F: Fn(Kwargs) -> Result<(T, S), BoxError> + Send + Sync + 'static,
	G: Fn(S, Option<ScopeError>) -> Teardown + Send + Sync + 'static,
{
	Arc::new(ScopedFnProvider {
		name,
		params,
		setup: Arc::new(setup),
		teardown: Arc::new(teardown),
		_marker: PhantomData,
	})
}

/// Async two-phase provider from a setup and a teardown closure.
pub fn async_scoped<T, S, F, FFut, G, GFut>(
	name: &'static str,
	params: Vec<ParamSpec>,
	setup: F,
	teardown: G,
) -> Arc<dyn Provider>
where
	T: Send + Sync + 'static,
	S: Send + 'static,
	F: Fn(Kwargs) -> FFut + Send + Sync + 'static,
	FFut: Future<Output = Result<(T, S), BoxError>> + Send + 'static,
	G: Fn(S, Option<ScopeError>) -> GFut + Send + Sync + 'static,
	GFut: Future<Output = Teardown> + Send + 'static,
{
	Arc::new(AsyncScopedFnProvider {
		name,
		params,
		setup: Arc::new(setup),
		teardown: Arc::new(teardown),
		_marker: PhantomData,
	})
}

/// Signature-only provider for the resolution target.
///
/// The engine introspects the target's parameters but never invokes it;
/// invoking the target with the resolved arguments is the host's job.
pub fn signature(name: &'static str, params: Vec<ParamSpec>) -> Arc<dyn Provider> {
	Arc::new(SignatureProvider { name, params })
}

struct FnProvider<T, F> {
	name: &'static str,
	params: Vec<ParamSpec>,
	func: F,
	_marker: PhantomData<fn() -> T>,
}

#[async_trait::async_trait]
impl<T, F> Provider for FnProvider<T, F>
where
	T: Send + Sync + 'static,
	F: Fn(Kwargs) -> Result<T, BoxError> + Send + Sync + 'static,
{
	fn name(&self) -> &'static str {
		self.name
	}

	fn params(&self) -> Vec<ParamSpec> {
		self.params.clone()
	}

	fn call(&self, kwargs: Kwargs) -> Result<ProviderOutput, ResolveError> {
		let value =
			(self.func)(kwargs).map_err(|source| ResolveError::provider(self.name, source))?;
		Ok(ProviderOutput::Value(Arc::new(value)))
	}
}

struct RawFnProvider<F> {
	name: &'static str,
	type_params: &'static [&'static str],
	params: Vec<ParamSpec>,
	func: F,
}

#[async_trait::async_trait]
impl<F> Provider for RawFnProvider<F>
where
	F: Fn(Kwargs) -> Result<Value, BoxError> + Send + Sync + 'static,
{
	fn name(&self) -> &'static str {
		self.name
	}

	fn params(&self) -> Vec<ParamSpec> {
		self.params.clone()
	}

	fn type_params(&self) -> &'static [&'static str] {
		self.type_params
	}

	fn call(&self, kwargs: Kwargs) -> Result<ProviderOutput, ResolveError> {
		let value =
			(self.func)(kwargs).map_err(|source| ResolveError::provider(self.name, source))?;
		Ok(ProviderOutput::Value(value))
	}
}

struct AsyncFnProvider<T, F, Fut> {
	name: &'static str,
	params: Vec<ParamSpec>,
	func: F,
	_marker: PhantomData<fn() -> (T, Fut)>,
}

#[async_trait::async_trait]
impl<T, F, Fut> Provider for AsyncFnProvider<T, F, Fut>
where
	T: Send + Sync + 'static,
	F: Fn(Kwargs) -> Fut + Send + Sync + 'static,
	Fut: Future<Output = Result<T, BoxError>> + Send + 'static,
{
	fn name(&self) -> &'static str {
		self.name
	}

	fn params(&self) -> Vec<ParamSpec> {
		self.params.clone()
	}

	fn kind(&self) -> ProviderKind {
		ProviderKind::Async
	}

	fn call(&self, _kwargs: Kwargs) -> Result<ProviderOutput, ResolveError> {
		Err(ResolveError::AsyncInSyncScope {
			name: self.name.to_string(),
		})
	}

	async fn call_async(&self, kwargs: Kwargs) -> Result<AsyncProviderOutput, ResolveError> {
		let value = (self.func)(kwargs)
			.await
			.map_err(|source| ResolveError::provider(self.name, source))?;
		Ok(AsyncProviderOutput::Value(Arc::new(value)))
	}
}

struct ScopedFnProvider<T, S, F, G> {
	name: &'static str,
	params: Vec<ParamSpec>,
	setup: Arc<F>,
	teardown: Arc<G>,
	_marker: PhantomData<fn() -> (T, S)>,
}

#[async_trait::async_trait]
impl<T, S, F, G> Provider for ScopedFnProvider<T, S, F, G>
where
	T: Send + Sync + 'static,
	S: Send + 'static,
	F: Fn(Kwargs) -> Result<(T, S), BoxError> + Send + Sync + 'static,
	G: Fn(S, Option<ScopeError>) -> Teardown + Send + Sync + 'static,
{
	fn name(&self) -> &'static str {
		self.name
	}

	fn params(&self) -> Vec<ParamSpec> {
		self.params.clone()
	}

	fn kind(&self) -> ProviderKind {
		ProviderKind::Scoped
	}

	fn call(&self, kwargs: Kwargs) -> Result<ProviderOutput, ResolveError> {
		Ok(ProviderOutput::Scoped(Box::new(FnLifecycle {
			name: self.name,
			kwargs: Some(kwargs),
			setup: Arc::clone(&self.setup),
			teardown: Arc::clone(&self.teardown),
			state: None,
			_marker: PhantomData,
		})))
	}
}

struct FnLifecycle<T, S, F, G> {
	name: &'static str,
	kwargs: Option<Kwargs>,
	setup: Arc<F>,
	teardown: Arc<G>,
	state: Option<S>,
	_marker: PhantomData<fn() -> T>,
}

impl<T, S, F, G> ScopedDependency for FnLifecycle<T, S, F, G>
where
	T: Send + Sync + 'static,
	S: Send + 'static,
	F: Fn(Kwargs) -> Result<(T, S), BoxError> + Send + Sync + 'static,
	G: Fn(S, Option<ScopeError>) -> Teardown + Send + Sync + 'static,
{
	fn start(&mut self) -> Result<Value, ResolveError> {
		let kwargs = self.kwargs.take().unwrap_or_default();
		let (value, state) =
			(self.setup)(kwargs).map_err(|source| ResolveError::provider(self.name, source))?;
		self.state = Some(state);
		Ok(Arc::new(value))
	}

	fn finish(&mut self, injected: Option<ScopeError>) -> Teardown {
		// A missing state means start never ran or finish already did.
		match self.state.take() {
			Some(state) => (self.teardown)(state, injected),
			None => Teardown::Completed,
		}
	}
}

struct AsyncScopedFnProvider<T, S, F, FFut, G, GFut> {
	name: &'static str,
	params: Vec<ParamSpec>,
	setup: Arc<F>,
	teardown: Arc<G>,
	_marker: PhantomData<fn() -> (T, S, FFut, GFut)>,
}

#[async_trait::async_trait]
impl<T, S, F, FFut, G, GFut> Provider for AsyncScopedFnProvider<T, S, F, FFut, G, GFut>
where
	T: Send + Sync + 'static,
	S: Send + 'static,
	F: Fn(Kwargs) -> FFut + Send + Sync + 'static,
	FFut: Future<Output = Result<(T, S), BoxError>> + Send + 'static,
	G: Fn(S, Option<ScopeError>) -> GFut + Send + Sync + 'static,
	GFut: Future<Output = Teardown> + Send + 'static,
{
	fn name(&self) -> &'static str {
		self.name
	}

	fn params(&self) -> Vec<ParamSpec> {
		self.params.clone()
	}

	fn kind(&self) -> ProviderKind {
		ProviderKind::AsyncScoped
	}

	fn call(&self, _kwargs: Kwargs) -> Result<ProviderOutput, ResolveError> {
		Err(ResolveError::AsyncInSyncScope {
			name: self.name.to_string(),
		})
	}

	async fn call_async(&self, kwargs: Kwargs) -> Result<AsyncProviderOutput, ResolveError> {
		Ok(AsyncProviderOutput::AsyncScoped(Box::new(AsyncFnLifecycle {
			name: self.name,
			kwargs: Some(kwargs),
			setup: Arc::clone(&self.setup),
			teardown: Arc::clone(&self.teardown),
			state: None,
			_marker: PhantomData,
		})))
	}
}

struct AsyncFnLifecycle<T, S, F, FFut, G, GFut> {
	name: &'static str,
	kwargs: Option<Kwargs>,
	setup: Arc<F>,
	teardown: Arc<G>,
	state: Option<S>,
	_marker: PhantomData<fn() -> (T, FFut, GFut)>,
}

#[async_trait::async_trait]
impl<T, S, F, FFut, G, GFut> AsyncScopedDependency for AsyncFnLifecycle<T, S, F, FFut, G, GFut>
where
	T: Send + Sync + 'static,
	S: Send + 'static,
	F: Fn(Kwargs) -> FFut + Send + Sync + 'static,
	FFut: Future<Output = Result<(T, S), BoxError>> + Send + 'static,
	G: Fn(S, Option<ScopeError>) -> GFut + Send + Sync + 'static,
	GFut: Future<Output = Teardown> + Send + 'static,
{
	async fn start(&mut self) -> Result<Value, ResolveError> {
		let kwargs = self.kwargs.take().unwrap_or_default();
		let (value, state) = (self.setup)(kwargs)
			.await
			.map_err(|source| ResolveError::provider(self.name, source))?;
		self.state = Some(state);
		Ok(Arc::new(value))
	}

	async fn finish(&mut self, injected: Option<ScopeError>) -> Teardown {
		match self.state.take() {
			Some(state) => (self.teardown)(state, injected).await,
			None => Teardown::Completed,
		}
	}
}

struct SignatureProvider {
	name: &'static str,
	params: Vec<ParamSpec>,
}

#[async_trait::async_trait]
impl Provider for SignatureProvider {
	fn name(&self) -> &'static str {
		self.name
	}

	fn params(&self) -> Vec<ParamSpec> {
		self.params.clone()
	}

	fn call(&self, _kwargs: Kwargs) -> Result<ProviderOutput, ResolveError> {
		Err(ResolveError::provider(
			self.name,
			"signature-only providers are introspected, never invoked".into(),
		))
	}
}

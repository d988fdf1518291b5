//! Caller-supplied default dependency values

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::sync::Arc;

use crate::provider::{Provider, ProviderId, Value};

/// Default values supplied to a scope before resolution starts.
///
/// A default is matched either by declared type (for parameters whose marker
/// has no resolving provider) or by provider identity (pre-seeding the
/// per-resolution cache so a cacheable provider is satisfied without
/// running). Defaults are moved into the scope on entry and stay read-only
/// for the lifetime of the resolution.
#[derive(Clone, Default)]
pub struct Defaults {
	by_type: HashMap<TypeId, Value>,
	by_provider: HashMap<ProviderId, Value>,
}

impl Defaults {
	/// Creates an empty default set.
	pub fn new() -> Self {
		Self::default()
	}

	/// Supplies a default matched by its type.
	///
	/// # Examples
	///
	/// ```
	/// use taskwire::Defaults;
	///
	/// let mut defaults = Defaults::new();
	/// defaults.set(42i32);
	///
	/// assert_eq!(*defaults.get::<i32>().unwrap(), 42);
	/// ```
	pub fn set<T: Any + Send + Sync>(&mut self, value: T) {
		self.by_type.insert(TypeId::of::<T>(), Arc::new(value));
	}

	/// Supplies a pre-wrapped `Arc<T>` matched by its type.
	///
	/// # Examples
	///
	/// ```
	/// use std::sync::Arc;
	/// use taskwire::Defaults;
	///
	/// let mut defaults = Defaults::new();
	/// defaults.set_arc(Arc::new("config".to_string()));
	///
	/// assert_eq!(*defaults.get::<String>().unwrap(), "config");
	/// ```
	pub fn set_arc<T: Any + Send + Sync>(&mut self, value: Arc<T>) {
		self.by_type.insert(TypeId::of::<T>(), value);
	}

	/// Supplies a precomputed value for a specific provider, so the provider
	/// is satisfied from the cache instead of running.
	pub fn set_for<T: Any + Send + Sync>(&mut self, provider: &Arc<dyn Provider>, value: T) {
		self.by_provider
			.insert(ProviderId::of(provider), Arc::new(value));
	}

	/// Typed access to a type-keyed default.
	pub fn get<T: Any + Send + Sync>(&self) -> Option<Arc<T>> {
		self.by_type
			.get(&TypeId::of::<T>())
			.and_then(|value| value.clone().downcast::<T>().ok())
	}

	/// Number of supplied defaults.
	pub fn len(&self) -> usize {
		self.by_type.len() + self.by_provider.len()
	}

	/// Whether no defaults were supplied.
	pub fn is_empty(&self) -> bool {
		self.by_type.is_empty() && self.by_provider.is_empty()
	}

	pub(crate) fn for_type(&self, id: TypeId) -> Option<Value> {
		self.by_type.get(&id).cloned()
	}

	pub(crate) fn for_provider(&self, id: ProviderId) -> Option<Value> {
		self.by_provider.get(&id).cloned()
	}
}

//! Runtime dependency replacement

use std::any::TypeId;
use std::collections::HashMap;
use std::sync::Arc;

use crate::provider::{Provider, ProviderId};

/// Replacement providers applied at resolution time.
///
/// Passing overrides to `resolve_kwargs_with` derives a fresh graph for that
/// call: every node whose original provider appears here executes the
/// replacement instead, and dependencies declared by the replacement are
/// discovered through the ordinary build process. The prebuilt shared graph
/// is never mutated. This is the slow path; resolutions without overrides
/// reuse the prebuilt graph as-is.
#[derive(Clone, Default)]
pub struct Overrides {
	providers: HashMap<ProviderId, Arc<dyn Provider>>,
	types: HashMap<TypeId, Arc<dyn Provider>>,
}

impl Overrides {
	/// Creates an empty override set.
	pub fn new() -> Self {
		Self::default()
	}

	/// Replaces `original` with `replacement` wherever it is depended on.
	pub fn replace(&mut self, original: &Arc<dyn Provider>, replacement: Arc<dyn Provider>) {
		self.providers.insert(ProviderId::of(original), replacement);
	}

	/// Supplies a provider for pure-default parameters declared as type `T`.
	pub fn replace_type<T: 'static>(&mut self, replacement: Arc<dyn Provider>) {
		self.types.insert(TypeId::of::<T>(), replacement);
	}

	/// Whether `provider` has a registered replacement.
	pub fn has(&self, provider: &Arc<dyn Provider>) -> bool {
		self.providers.contains_key(&ProviderId::of(provider))
	}

	/// Number of registered replacements.
	pub fn len(&self) -> usize {
		self.providers.len() + self.types.len()
	}

	/// Whether no replacements are registered.
	pub fn is_empty(&self) -> bool {
		self.providers.is_empty() && self.types.is_empty()
	}

	/// Removes every registered replacement.
	pub fn clear(&mut self) {
		self.providers.clear();
		self.types.clear();
	}

	pub(crate) fn for_provider(&self, id: ProviderId) -> Option<Arc<dyn Provider>> {
		self.providers.get(&id).cloned()
	}

	pub(crate) fn for_type(&self, id: TypeId) -> Option<Arc<dyn Provider>> {
		self.types.get(&id).cloned()
	}
}

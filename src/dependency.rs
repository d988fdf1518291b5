//! Dependency markers and parameter descriptors
//!
//! A provider's signature is a list of [`ParamSpec`]s. Parameters carrying a
//! [`Depends`] marker are resolved by the engine; everything else is left to
//! the caller. Declared types are described by [`TySpec`], which also carries
//! the type-variable machinery used for generic provider templates.

use std::any::{TypeId, type_name};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use crate::provider::Provider;

/// Binding of type variables to concrete type expressions, produced when a
/// generic provider template is instantiated.
pub type Binding = BTreeMap<&'static str, TySpec>;

/// Declared type of a parameter or a type argument.
///
/// `TySpec` is the engine's view of a declared type. Concrete types carry
/// their `TypeId` so pure-default parameters can be matched against
/// caller-supplied defaults. Type arguments are listed explicitly so a
/// generic provider template can bind them positionally.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum TySpec {
	/// A concrete Rust type, optionally with explicit type arguments.
	Concrete {
		/// Identity of the concrete type.
		id: TypeId,
		/// Display name of the type.
		name: &'static str,
		/// Explicit type arguments, for binding generic templates.
		args: Vec<TySpec>,
	},
	/// A named type constructor whose arguments are not yet concrete.
	Generic {
		/// Display name of the constructor.
		name: &'static str,
		/// Type arguments, possibly containing variables.
		args: Vec<TySpec>,
	},
	/// A type variable of a generic provider template.
	Var(&'static str),
}

impl TySpec {
	/// Describes the concrete type `T`.
	pub fn of<T: 'static>() -> Self {
		Self::Concrete {
			id: TypeId::of::<T>(),
			name: type_name::<T>(),
			args: Vec::new(),
		}
	}

	/// A type variable, to be bound when the template is instantiated.
	pub fn var(name: &'static str) -> Self {
		Self::Var(name)
	}

	/// A parameterized type without a concrete identity.
	pub fn generic(name: &'static str, args: impl IntoIterator<Item = TySpec>) -> Self {
		Self::Generic {
			name,
			args: args.into_iter().collect(),
		}
	}

	/// Attaches explicit type arguments to a concrete type, so a generic
	/// provider template can be bound from them.
	pub fn with_args(self, type_args: impl IntoIterator<Item = TySpec>) -> Self {
		match self {
			Self::Concrete { id, name, .. } => Self::Concrete {
				id,
				name,
				args: type_args.into_iter().collect(),
			},
			Self::Generic { name, .. } => Self::Generic {
				name,
				args: type_args.into_iter().collect(),
			},
			Self::Var(name) => Self::Var(name),
		}
	}

	/// Identity of the type, if it is concrete.
	pub fn type_id(&self) -> Option<TypeId> {
		match self {
			Self::Concrete { id, .. } => Some(*id),
			_ => None,
		}
	}

	/// Explicit type arguments.
	pub fn args(&self) -> &[TySpec] {
		match self {
			Self::Concrete { args, .. } | Self::Generic { args, .. } => args,
			Self::Var(_) => &[],
		}
	}

	/// Replaces type variables according to `binding`. Variables without a
	/// binding are left in place for the caller to report.
	pub(crate) fn substitute(&self, binding: &Binding) -> TySpec {
		match self {
			Self::Var(name) => binding.get(name).cloned().unwrap_or_else(|| self.clone()),
			Self::Concrete { id, name, args } => Self::Concrete {
				id: *id,
				name: *name,
				args: args.iter().map(|a| a.substitute(binding)).collect(),
			},
			Self::Generic { name, args } => Self::Generic {
				name: *name,
				args: args.iter().map(|a| a.substitute(binding)).collect(),
			},
		}
	}

	/// Whether any unbound type variable remains.
	pub(crate) fn has_vars(&self) -> bool {
		match self {
			Self::Var(_) => true,
			Self::Concrete { args, .. } | Self::Generic { args, .. } => {
				args.iter().any(TySpec::has_vars)
			}
		}
	}
}

impl fmt::Display for TySpec {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			Self::Concrete { name, .. } => write!(f, "{name}"),
			Self::Generic { name, args } => {
				write!(f, "{name}<")?;
				for (i, arg) in args.iter().enumerate() {
					if i > 0 {
						write!(f, ", ")?;
					}
					write!(f, "{arg}")?;
				}
				write!(f, ">")
			}
			Self::Var(name) => write!(f, "{name}"),
		}
	}
}

/// How a dependency-marked parameter is resolved.
#[derive(Clone)]
pub enum DependencyKind {
	/// No resolving callable; the value comes from caller-supplied defaults
	/// (or a type-keyed override) matched by declared type.
	Default,
	/// The value is produced by running the given provider.
	Provider(Arc<dyn Provider>),
}

/// Marks a parameter as a dependency to be resolved by the engine.
///
/// ```rust,ignore
/// let dep1 = provider::function("dep1", vec![], |_| Ok(1i32));
/// let target = provider::signature(
///     "target",
///     vec![ParamSpec::dependency::<i32>("some_int", Depends::on(dep1))],
/// );
/// ```
#[derive(Clone)]
pub struct Depends {
	kind: DependencyKind,
	use_cache: bool,
}

impl Depends {
	/// Resolve by running `provider`.
	pub fn on(provider: Arc<dyn Provider>) -> Self {
		Self {
			kind: DependencyKind::Provider(provider),
			use_cache: true,
		}
	}

	/// Resolve from caller-supplied defaults by declared type.
	pub fn unset() -> Self {
		Self {
			kind: DependencyKind::Default,
			use_cache: true,
		}
	}

	/// Disables per-resolution caching for this dependency. An uncached
	/// dependency re-runs, along with its whole sub-graph, for every
	/// parameter that requests it.
	pub fn no_cache(mut self) -> Self {
		self.use_cache = false;
		self
	}

	/// The resolution strategy.
	pub fn kind(&self) -> &DependencyKind {
		&self.kind
	}

	/// Whether this dependency participates in per-resolution caching.
	pub fn use_cache(&self) -> bool {
		self.use_cache
	}
}

/// One formal parameter of a provider.
#[derive(Clone)]
pub struct ParamSpec {
	name: &'static str,
	ty: TySpec,
	marker: Option<Depends>,
}

impl ParamSpec {
	/// A plain parameter of type `T`, ignored by the engine.
	pub fn plain<T: 'static>(name: &'static str) -> Self {
		Self {
			name,
			ty: TySpec::of::<T>(),
			marker: None,
		}
	}

	/// A dependency-marked parameter declared as type `T`.
	pub fn dependency<T: 'static>(name: &'static str, marker: Depends) -> Self {
		Self {
			name,
			ty: TySpec::of::<T>(),
			marker: Some(marker),
		}
	}

	/// A dependency-marked parameter with an explicit type expression.
	/// Needed inside generic templates and for parameterized declared types.
	pub fn with_ty(name: &'static str, ty: TySpec, marker: Depends) -> Self {
		Self {
			name,
			ty,
			marker: Some(marker),
		}
	}

	/// Parameter name.
	pub fn name(&self) -> &'static str {
		self.name
	}

	/// Declared type.
	pub fn ty(&self) -> &TySpec {
		&self.ty
	}

	/// Dependency marker, if any.
	pub fn marker(&self) -> Option<&Depends> {
		self.marker.as_ref()
	}
}

/// Introspective information about the parameter through which a dependency
/// was requested.
///
/// A provider declaring a parameter of type `ParamInfo` with an unset marker
/// receives, instead of a user-supplied value, the name and declared type of
/// the parameter that wired the provider into its dependent. For the target
/// itself there is no requesting parameter and the name is empty.
#[derive(Clone, Debug)]
pub struct ParamInfo {
	name: String,
	declared: Option<TySpec>,
}

impl ParamInfo {
	pub(crate) fn new(name: String, declared: Option<TySpec>) -> Self {
		Self { name, declared }
	}

	/// Name of the requesting parameter, empty for the target.
	pub fn name(&self) -> &str {
		&self.name
	}

	/// Declared type of the requesting parameter, if any.
	pub fn declared(&self) -> Option<&TySpec> {
		self.declared.as_ref()
	}
}

impl fmt::Display for ParamInfo {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "ParamInfo<name={}>", self.name)
	}
}

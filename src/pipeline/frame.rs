//! Resolution frames
//!
//! A [`Frame`] is the in-flight state of one contract being resolved. Frames
//! live on the stack and link to the frame that requested them, so the
//! dependency chain is walked by borrowing rather than through a side table.
//! Every frame of one top-level `resolve` call shares a [`CallGraph`] that
//! holds the resolver overrides and the per-resolve value cache.

use crate::contract::Contract;
use crate::engine::{self, Runtime};
use crate::error::Fault;
use crate::injection::{InjectionArg, ResolverOverride};
use crate::lifetime::Lifetime;
use crate::metadata::{Instance, TypeMetadata, Value};
use crate::provider::Injectable;
use crate::registration::RegistrationManager;
use crate::scope::Scope;
use crate::types::TypeDescriptor;
use ahash::RandomState;
use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// State shared by every frame of one top-level resolution
pub(crate) struct CallGraph<'o> {
    overrides: &'o [ResolverOverride],
    per_resolve: RefCell<HashMap<u64, Value, RandomState>>,
}

impl<'o> CallGraph<'o> {
    pub(crate) fn new(overrides: &'o [ResolverOverride]) -> Self {
        Self {
            overrides,
            per_resolve: RefCell::new(HashMap::default()),
        }
    }

    #[inline]
    pub(crate) fn overrides(&self) -> &'o [ResolverOverride] {
        self.overrides
    }

    #[inline]
    pub(crate) fn has_overrides(&self) -> bool {
        !self.overrides.is_empty()
    }

    /// Value cached for a per-resolve lifetime manager
    #[inline]
    pub(crate) fn per_resolve(&self, manager: u64) -> Option<Value> {
        self.per_resolve.borrow().get(&manager).cloned()
    }

    #[inline]
    pub(crate) fn remember(&self, manager: u64, value: Value) {
        self.per_resolve.borrow_mut().insert(manager, value);
    }
}

/// How a parameter or member obtains its value when no override applies
#[derive(Clone, Debug)]
pub(crate) enum Supply {
    /// Use an injection argument or directive
    Arg(InjectionArg),
    /// Resolve this contract
    Resolve(Contract),
}

impl Supply {
    /// Registration name the supplied dependency is resolved under
    pub(crate) fn dependency_name(&self) -> Option<&str> {
        match self {
            Supply::Resolve(contract) => contract.name(),
            Supply::Arg(InjectionArg::Named(_, name)) => Some(name.as_ref()),
            Supply::Arg(_) => None,
        }
    }
}

/// One contract being resolved
pub(crate) struct Frame<'a> {
    pub(crate) contract: Contract,
    /// Type the construction stage builds, once a mapping has been applied
    pub(crate) build_type: Option<TypeDescriptor>,
    pub(crate) registration: Arc<RegistrationManager>,
    /// Scope the registration was found in
    pub(crate) owner: Arc<Scope>,
    /// Scope the resolution was requested from
    pub(crate) scope: &'a Arc<Scope>,
    pub(crate) runtime: &'a Runtime,
    pub(crate) graph: &'a CallGraph<'a>,
    pub(crate) parent: Option<&'a Frame<'a>>,
    pub(crate) depth: usize,
    /// Value under construction
    pub(crate) instance: Option<Instance>,
    /// Result of the pipeline
    pub(crate) value: Option<Value>,
    /// Freshly built value before any upcast, with the metadata that built it
    pub(crate) produced: Option<Value>,
    pub(crate) metadata: Option<Arc<TypeMetadata>>,
}

impl<'a> Frame<'a> {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        contract: Contract,
        registration: Arc<RegistrationManager>,
        owner: Arc<Scope>,
        scope: &'a Arc<Scope>,
        runtime: &'a Runtime,
        graph: &'a CallGraph<'a>,
        parent: Option<&'a Frame<'a>>,
        depth: usize,
    ) -> Self {
        Self {
            contract,
            build_type: None,
            registration,
            owner,
            scope,
            runtime,
            graph,
            parent,
            depth,
            instance: None,
            value: None,
            produced: None,
            metadata: None,
        }
    }

    /// Frames that requested this one, nearest first
    pub(crate) fn ancestors(&self) -> impl Iterator<Item = &'a Frame<'a>> {
        std::iter::successors(self.parent, |frame| frame.parent)
    }

    /// Scope dependencies of this value are resolved from.
    ///
    /// Shared values resolve from the scope owning their registration so a
    /// child container cannot leak its registrations into them.
    #[inline]
    pub(crate) fn dependency_scope(&self) -> &Arc<Scope> {
        match self.registration.lifetime() {
            Lifetime::Singleton | Lifetime::ContainerControlled | Lifetime::Hierarchical => &self.owner,
            _ => self.scope,
        }
    }

    /// Resolve a dependency of the value being built
    pub(crate) fn resolve(&self, contract: Contract) -> Result<Value, Fault> {
        engine::resolve_contract(self.runtime, self.dependency_scope(), self.graph, Some(self), contract)
    }

    /// Type the current stage is building
    #[inline]
    pub(crate) fn target_type(&self) -> &TypeDescriptor {
        self.build_type.as_ref().unwrap_or_else(|| self.contract.ty())
    }

    /// Reshape `value` of type `from` into `to`
    pub(crate) fn shape(&self, value: Value, from: &TypeDescriptor, to: &TypeDescriptor) -> Result<Value, Fault> {
        if from == to {
            return Ok(value);
        }
        self.runtime.provider().cast(value, from, to).ok_or_else(|| {
            Fault::mismatch(
                &self.contract,
                format!("a {} cannot be supplied where {} is expected", from, to),
            )
        })
    }

    /// Value for a declared slot of type `declared`, honoring an override first
    pub(crate) fn supply(
        &self,
        declared: &TypeDescriptor,
        overriding: Option<&InjectionArg>,
        supply: &Supply,
    ) -> Result<Option<Value>, Fault> {
        if let Some(arg) = overriding {
            return self.supply_arg(declared, arg);
        }
        match supply {
            Supply::Resolve(contract) => self.resolve(contract.clone()).map(Some),
            Supply::Arg(arg) => self.supply_arg(declared, arg),
        }
    }

    /// Value for one injection argument; `None` leaves an optional slot unset
    pub(crate) fn supply_arg(&self, declared: &TypeDescriptor, arg: &InjectionArg) -> Result<Option<Value>, Fault> {
        match arg {
            InjectionArg::Type(ty) => {
                let value = self.resolve(Contract::new(ty.clone(), None))?;
                self.shape(value, ty, declared).map(Some)
            }
            InjectionArg::Named(ty, name) => {
                let value = self.resolve(Contract::new(ty.clone(), Some(name)))?;
                self.shape(value, ty, declared).map(Some)
            }
            InjectionArg::Value(value, ty) => self.shape(Arc::clone(value), ty, declared).map(Some),
            InjectionArg::Optional(ty, default) => match self.resolve(Contract::new(ty.clone(), None)) {
                Ok(value) => self.shape(value, ty, declared).map(Some),
                Err(fault) if fault.kind() == crate::error::FaultKind::NotRegistered => Ok(default.clone()),
                Err(fault) => Err(fault),
            },
            InjectionArg::Resolver(callback) => callback(&Resolver::new(self))
                .map(Some)
                .map_err(|error| engine::callback_fault(&self.contract, "resolver callback", error)),
        }
    }
}

impl fmt::Debug for Frame<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Frame")
            .field("contract", &self.contract)
            .field("build_type", &self.build_type.as_ref().map(TypeDescriptor::name))
            .field("depth", &self.depth)
            .field("has_instance", &self.instance.is_some())
            .field("has_value", &self.value.is_some())
            .finish()
    }
}

/// Resolves dependencies from inside a factory or resolver callback.
///
/// Nested resolutions join the current call: they see the same overrides,
/// share per-resolve values and take part in cycle detection.
///
/// # Examples
///
/// ```rust
/// use injector_runtime::{Container, Lifetime};
/// use std::sync::Arc;
///
/// struct Config { url: String }
/// struct Pool { url: String }
///
/// let container = Container::new();
/// container.singleton(Config { url: "postgres://localhost".into() }).unwrap();
/// container
///     .factory(None, Lifetime::Singleton, |resolver| {
///         let config = resolver.get::<Config>()?;
///         Ok(Pool { url: config.url.clone() })
///     })
///     .unwrap();
///
/// let pool = container.get::<Pool>().unwrap();
/// assert_eq!(pool.url, "postgres://localhost");
/// ```
pub struct Resolver<'f> {
    frame: &'f Frame<'f>,
}

impl<'f> Resolver<'f> {
    #[inline]
    pub(crate) fn new(frame: &'f Frame<'f>) -> Self {
        Self { frame }
    }

    /// Contract currently being resolved
    #[inline]
    pub fn contract(&self) -> &Contract {
        &self.frame.contract
    }

    /// Name of the container the resolution was requested from
    #[inline]
    pub fn container_name(&self) -> Option<&str> {
        self.frame.scope.name()
    }

    /// Resolve an erased value
    pub fn resolve(&self, ty: TypeDescriptor, name: Option<&str>) -> Result<Value, Fault> {
        self.frame.resolve(Contract::new(ty, name))
    }

    /// Resolve a concrete type
    pub fn get<T: Injectable>(&self) -> Result<Arc<T>, Fault> {
        self.typed(Contract::of::<T>())
    }

    /// Resolve a named registration of a concrete type
    pub fn get_named<T: Injectable>(&self, name: &str) -> Result<Arc<T>, Fault> {
        self.typed(Contract::named::<T>(name))
    }

    /// Resolve an interface registration
    pub fn get_trait<I: ?Sized + Send + Sync + 'static>(&self) -> Result<Arc<I>, Fault> {
        let contract = Contract::new(TypeDescriptor::of_trait::<I>(), None);
        let value = self.frame.resolve(contract.clone())?;
        engine::downcast_trait::<I>(value).map_err(|_| Fault::mismatch(&contract, "value is not an interface view"))
    }

    /// Resolve a concrete type, or `None` if that fails
    pub fn try_get<T: Injectable>(&self) -> Option<Arc<T>> {
        self.get::<T>().ok()
    }

    fn typed<T: Injectable>(&self, contract: Contract) -> Result<Arc<T>, Fault> {
        let value = self.frame.resolve(contract.clone())?;
        engine::downcast::<T>(value)
            .map_err(|_| Fault::mismatch(&contract, format!("value is not a {}", std::any::type_name::<T>())))
    }
}

impl fmt::Debug for Resolver<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Resolver")
            .field("contract", &self.frame.contract)
            .field("depth", &self.frame.depth)
            .finish()
    }
}

//! Registrations
//!
//! A registration binds a contract to a way of producing values: a type to
//! build, a pre-built instance, or a factory callback. It owns its lifetime
//! manager, its injection members and the pipeline cached for it.
//!
//! Registrations are immutable once published; re-registering a contract
//! replaces the registration wholesale. The only mutable parts are the
//! lifetime manager (guarded by its own lock) and the pipeline slot, which
//! is install-if-absent: when two threads build a pipeline concurrently the
//! first one installed wins and the other is discarded.

use crate::contract::Contract;
use crate::error::BoxError;
use crate::injection::InjectionPlan;
use crate::lifetime::{Lifetime, LifetimeManager, LifetimeState};
use crate::metadata::Value;
use crate::pipeline::{Pipeline, Resolver};
use crate::types::TypeDescriptor;
use once_cell::sync::OnceCell;
use std::any::Any;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

/// Factory callback: receives a resolver for dependencies and the contract
/// being resolved
pub type FactoryFn = Arc<dyn Fn(&Resolver<'_>, &Contract) -> Result<Value, BoxError> + Send + Sync>;

/// How a registration produces values
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Category {
    /// Registered type mapped to a different implementation type
    TypeMapping,
    /// Pre-built instance
    Instance,
    /// Factory callback
    Factory,
    /// Registered type built as itself
    ExplicitType,
}

#[derive(Clone)]
pub(crate) enum Source {
    /// Construct this type
    Build(TypeDescriptor),
    Instance(InstanceRef),
    Factory(FactoryFn),
}

#[derive(Clone)]
pub(crate) enum InstanceRef {
    Strong(Value),
    /// Externally controlled instances are not kept alive by the container
    Weak(Weak<dyn Any + Send + Sync>),
}

/// Where a registration came from
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Origin {
    /// Registered explicitly by the caller
    Registered,
    /// Hierarchical copy installed into a child of the registering scope
    Rehomed { source: u64 },
    /// Closed form of an open generic registration
    Closed { open: Contract, source: u64 },
    /// Built for a concrete type that was never registered
    Implicit,
}

static NEXT_REGISTRATION: AtomicU64 = AtomicU64::new(1);

/// A published registration
pub struct RegistrationManager {
    id: u64,
    contract: Contract,
    category: Category,
    source: Source,
    lifetime: LifetimeManager,
    plan: Arc<InjectionPlan>,
    pipeline: OnceCell<Pipeline>,
    origin: Origin,
}

impl RegistrationManager {
    pub(crate) fn new(
        contract: Contract,
        category: Category,
        source: Source,
        lifetime: Lifetime,
        plan: InjectionPlan,
    ) -> Self {
        Self {
            id: next_id(),
            contract,
            category,
            source,
            lifetime: LifetimeManager::new(lifetime),
            plan: Arc::new(plan),
            pipeline: OnceCell::new(),
            origin: Origin::Registered,
        }
    }

    /// Transient registration for an unregistered concrete type
    pub(crate) fn implicit(contract: Contract) -> Self {
        let ty = contract.ty().clone();
        let mut registration = Self::new(
            contract,
            Category::ExplicitType,
            Source::Build(ty),
            Lifetime::Transient,
            InjectionPlan::default(),
        );
        registration.origin = Origin::Implicit;
        registration
    }

    /// Copy for a child scope: fresh lifetime state, shared pipeline
    pub(crate) fn rehome(&self) -> Self {
        let pipeline = match self.pipeline.get() {
            Some(pipeline) => OnceCell::with_value(pipeline.clone()),
            None => OnceCell::new(),
        };
        Self {
            id: next_id(),
            contract: self.contract.clone(),
            category: self.category,
            source: self.source.clone(),
            lifetime: self.lifetime.fresh(),
            plan: Arc::clone(&self.plan),
            pipeline,
            origin: Origin::Rehomed { source: self.id },
        }
    }

    /// Closed form of this open generic registration
    pub(crate) fn close(&self, contract: Contract, build: TypeDescriptor) -> Self {
        Self {
            id: next_id(),
            contract,
            category: self.category,
            source: Source::Build(build),
            lifetime: self.lifetime.fresh(),
            plan: Arc::clone(&self.plan),
            pipeline: OnceCell::new(),
            origin: Origin::Closed {
                open: self.contract.clone(),
                source: self.id,
            },
        }
    }

    /// Monotonic identifier; also the registration order
    #[inline]
    pub fn id(&self) -> u64 {
        self.id
    }

    #[inline]
    pub fn contract(&self) -> &Contract {
        &self.contract
    }

    #[inline]
    pub fn category(&self) -> Category {
        self.category
    }

    #[inline]
    pub fn lifetime(&self) -> Lifetime {
        self.lifetime.kind()
    }

    #[inline]
    pub fn lifetime_state(&self) -> LifetimeState {
        self.lifetime.state()
    }

    /// Type the registration builds, for mappings and explicit types
    pub fn mapped_type(&self) -> Option<&TypeDescriptor> {
        match &self.source {
            Source::Build(ty) => Some(ty),
            _ => None,
        }
    }

    /// Whether a pipeline has been built and cached
    #[inline]
    pub fn has_pipeline(&self) -> bool {
        self.pipeline.get().is_some()
    }

    #[inline]
    pub(crate) fn manager(&self) -> &LifetimeManager {
        &self.lifetime
    }

    #[inline]
    pub(crate) fn source(&self) -> &Source {
        &self.source
    }

    #[inline]
    pub(crate) fn plan(&self) -> &InjectionPlan {
        &self.plan
    }

    #[inline]
    pub(crate) fn origin(&self) -> &Origin {
        &self.origin
    }

    #[inline]
    pub(crate) fn is_explicit(&self) -> bool {
        self.origin == Origin::Registered
    }

    #[inline]
    pub(crate) fn pipeline(&self) -> Option<&Pipeline> {
        self.pipeline.get()
    }

    /// Install `pipeline` unless one is already cached; returns the cached one
    #[inline]
    pub(crate) fn install_pipeline(&self, pipeline: Pipeline) -> &Pipeline {
        self.pipeline.get_or_init(move || pipeline)
    }

    /// Public snapshot of this registration
    pub fn info(&self) -> RegistrationInfo {
        RegistrationInfo {
            registered_type: self.contract.ty().clone(),
            name: self.contract.name().map(str::to_string),
            mapped_type: self.mapped_type().cloned(),
            category: self.category,
            lifetime: self.lifetime.kind(),
        }
    }
}

#[inline]
fn next_id() -> u64 {
    NEXT_REGISTRATION.fetch_add(1, Ordering::Relaxed)
}

impl fmt::Debug for RegistrationManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RegistrationManager")
            .field("id", &self.id)
            .field("contract", &self.contract)
            .field("category", &self.category)
            .field("lifetime", &self.lifetime)
            .field("origin", &self.origin)
            .field("pipeline", &self.pipeline.get().map(Pipeline::strategy))
            .finish()
    }
}

/// Read-only view of a registration, as returned by enumeration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistrationInfo {
    pub registered_type: TypeDescriptor,
    pub name: Option<String>,
    pub mapped_type: Option<TypeDescriptor>,
    pub category: Category,
    pub lifetime: Lifetime,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::{PipelineStrategy, Stage};

    struct Engine;

    fn registration(lifetime: Lifetime) -> RegistrationManager {
        RegistrationManager::new(
            Contract::of::<Engine>(),
            Category::ExplicitType,
            Source::Build(TypeDescriptor::of::<Engine>()),
            lifetime,
            InjectionPlan::default(),
        )
    }

    #[test]
    fn test_ids_are_monotonic() {
        let a = registration(Lifetime::Transient);
        let b = registration(Lifetime::Transient);
        assert!(b.id() > a.id());
        assert!(a.is_explicit());
    }

    #[test]
    fn test_pipeline_install_if_absent() {
        let reg = registration(Lifetime::Transient);
        assert!(!reg.has_pipeline());

        let first = reg.install_pipeline(Pipeline::interpreted(vec![Stage::Lifetime, Stage::Construction]));
        assert_eq!(first.strategy(), PipelineStrategy::Interpreted);

        let second = reg.install_pipeline(Pipeline::interpreted(vec![Stage::Construction]));
        assert_eq!(second.stage_count(), Some(2));
        assert!(reg.has_pipeline());
    }

    #[test]
    fn test_rehome_has_fresh_lifetime_and_shared_pipeline() {
        let reg = registration(Lifetime::Hierarchical);
        reg.install_pipeline(Pipeline::interpreted(vec![Stage::Lifetime]));
        let value: Value = Arc::new(Engine);
        reg.manager().seed(&value);

        let copy = reg.rehome();
        assert_eq!(copy.contract(), reg.contract());
        assert_eq!(copy.lifetime(), Lifetime::Hierarchical);
        assert_eq!(copy.lifetime_state(), LifetimeState::Empty);
        assert!(copy.has_pipeline());
        assert_eq!(copy.origin(), &Origin::Rehomed { source: reg.id() });
        assert!(!copy.is_explicit());
    }

    #[test]
    fn test_info_snapshot() {
        let reg = registration(Lifetime::Singleton);
        let info = reg.info();
        assert_eq!(info.registered_type, TypeDescriptor::of::<Engine>());
        assert_eq!(info.mapped_type, Some(TypeDescriptor::of::<Engine>()));
        assert_eq!(info.category, Category::ExplicitType);
        assert_eq!(info.lifetime, Lifetime::Singleton);
        assert_eq!(info.name, None);
    }
}

//! Composition container
//!
//! The `Container` is the public face of the runtime. It registers
//! contracts into its scope, resolves them through the engine and owns the
//! lifecycle of what it builds. Cloning a container is cheap and yields a
//! handle to the same scope.

use crate::catalog::TypeCatalog;
use crate::contract::Contract;
use crate::engine::{self, Runtime};
use crate::error::{BoxError, RegistrationError, ResolutionError};
use crate::injection::{InjectionMember, InjectionPlan, ResolverOverride};
use crate::lifetime::Lifetime;
use crate::metadata::{MetadataProvider, TypeMetadata, Value};
use crate::pipeline::{PipelineStrategy, Resolver};
use crate::provider::{Describe, Injectable};
use crate::registration::{Category, FactoryFn, InstanceRef, RegistrationInfo, RegistrationManager, Source};
use crate::scope::Scope;
use crate::storage::DEFAULT_FLAT_LIMIT;
use crate::types::TypeDescriptor;
use std::any::Any;
use std::fmt;
use std::sync::Arc;

#[cfg(feature = "logging")]
use tracing::debug;

/// Default limit on nested resolutions before a chain is reported as circular
pub const DEFAULT_MAX_DEPTH: usize = 256;

// =============================================================================
// Configuration
// =============================================================================

/// Settings for a root container and every child created from it.
///
/// # Examples
///
/// ```rust
/// use injector_runtime::{Container, ContainerConfig, PipelineStrategy};
///
/// let container = Container::with_config(
///     ContainerConfig::new()
///         .strategy(PipelineStrategy::Interpreted)
///         .flat_table_limit(64)
///         .max_depth(32),
/// );
/// assert_eq!(container.strategy(), PipelineStrategy::Interpreted);
/// ```
#[derive(Clone)]
pub struct ContainerConfig {
    strategy: PipelineStrategy,
    flat_table_limit: usize,
    max_depth: usize,
    provider: Option<Arc<dyn MetadataProvider>>,
}

impl ContainerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// How pipelines run
    pub fn strategy(mut self, strategy: PipelineStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    /// Registrations a scope keeps in a flat table before switching to a trie
    pub fn flat_table_limit(mut self, limit: usize) -> Self {
        self.flat_table_limit = limit.max(1);
        self
    }

    /// Maximum nesting of dependency resolutions
    pub fn max_depth(mut self, depth: usize) -> Self {
        self.max_depth = depth.max(1);
        self
    }

    /// Replace the built-in [`TypeCatalog`] with a custom metadata provider
    pub fn metadata(mut self, provider: Arc<dyn MetadataProvider>) -> Self {
        self.provider = Some(provider);
        self
    }
}

impl Default for ContainerConfig {
    fn default() -> Self {
        Self {
            strategy: PipelineStrategy::default(),
            flat_table_limit: DEFAULT_FLAT_LIMIT,
            max_depth: DEFAULT_MAX_DEPTH,
            provider: None,
        }
    }
}

impl fmt::Debug for ContainerConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ContainerConfig")
            .field("strategy", &self.strategy)
            .field("flat_table_limit", &self.flat_table_limit)
            .field("max_depth", &self.max_depth)
            .field("custom_provider", &self.provider.is_some())
            .finish()
    }
}

// =============================================================================
// Container
// =============================================================================

/// Object-composition container.
///
/// Registrations bind contracts to types, instances or factories; resolving
/// a contract builds its dependency graph according to each registration's
/// lifetime. Child containers see their parent's registrations and can
/// shadow them.
///
/// # Examples
///
/// ```rust
/// use injector_runtime::{Container, Lifetime, MetadataBuilder, Parameter, TypeDescriptor};
/// use std::sync::Arc;
///
/// struct Config { url: String }
/// struct Database { config: Arc<Config> }
///
/// let container = Container::new();
/// container.add_metadata(
///     MetadataBuilder::<Database>::new()
///         .constructor([Parameter::of::<Config>("config")], |mut args| {
///             Ok(Database { config: args.take(0)? })
///         })
///         .finish(),
/// );
/// container.singleton(Config { url: "postgres://localhost".into() }).unwrap();
/// container
///     .register_type(TypeDescriptor::of::<Database>(), None, None, Some(Lifetime::Singleton), Vec::new())
///     .unwrap();
///
/// let db = container.get::<Database>().unwrap();
/// assert_eq!(db.config.url, "postgres://localhost");
/// assert!(Arc::ptr_eq(&db, &container.get::<Database>().unwrap()));
/// ```
#[derive(Clone)]
pub struct Container {
    scope: Arc<Scope>,
    runtime: Arc<Runtime>,
}

impl Container {
    /// Create a root container with the default configuration.
    #[inline]
    pub fn new() -> Self {
        Self::with_config(ContainerConfig::default())
    }

    /// Create a root container.
    pub fn with_config(config: ContainerConfig) -> Self {
        let (provider, catalog) = match config.provider {
            Some(provider) => (provider, None),
            None => {
                let catalog = Arc::new(TypeCatalog::new());
                let provider: Arc<dyn MetadataProvider> = catalog.clone();
                (provider, Some(catalog))
            }
        };

        #[cfg(feature = "logging")]
        debug!(
            target: "injector_runtime",
            strategy = ?config.strategy,
            flat_table_limit = config.flat_table_limit,
            max_depth = config.max_depth,
            custom_provider = catalog.is_none(),
            "Creating root container"
        );

        Self {
            scope: Scope::root(config.flat_table_limit),
            runtime: Arc::new(Runtime::new(config.strategy, config.max_depth, provider, catalog)),
        }
    }

    /// Create a child container that falls back to this one.
    ///
    /// The child can shadow any registration; it never modifies this
    /// container. Disposing this container disposes the child too.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use injector_runtime::Container;
    ///
    /// struct AppConfig { debug: bool }
    /// struct RequestId(String);
    ///
    /// let root = Container::new();
    /// root.singleton(AppConfig { debug: true }).unwrap();
    ///
    /// let request = root.create_child_container(Some("request"));
    /// request.singleton(RequestId("req-123".into())).unwrap();
    ///
    /// assert!(request.contains::<AppConfig>());
    /// assert!(!root.contains::<RequestId>());
    /// ```
    pub fn create_child_container(&self, name: Option<&str>) -> Self {
        #[cfg(feature = "logging")]
        debug!(
            target: "injector_runtime",
            parent_depth = self.scope.depth(),
            name = name.unwrap_or(""),
            parent_registrations = self.scope.local_len(),
            "Creating child container"
        );

        Self {
            scope: self.scope.child(name),
            runtime: Arc::clone(&self.runtime),
        }
    }

    /// Alias for [`Container::create_child_container`] without a name.
    #[inline]
    pub fn scope(&self) -> Self {
        self.create_child_container(None)
    }

    // =========================================================================
    // Metadata
    // =========================================================================

    /// Describe a type to the built-in catalog.
    ///
    /// Has no effect when the container was configured with a custom
    /// metadata provider.
    pub fn add_metadata(&self, metadata: TypeMetadata) -> &Self {
        match self.runtime.catalog() {
            Some(catalog) => catalog.add(metadata),
            None => {
                #[cfg(feature = "logging")]
                debug!(
                    target: "injector_runtime",
                    type_name = metadata.ty().name(),
                    "Custom metadata provider configured; ignoring added metadata"
                );
            }
        }
        self
    }

    /// Describe `T` through its [`Describe`] impl
    #[inline]
    pub fn describe<T: Describe>(&self) -> &Self {
        self.add_metadata(T::describe())
    }

    // =========================================================================
    // Registration
    // =========================================================================

    /// Bind `registered` to a type the container builds.
    ///
    /// Without an `implementation` the registered type is built as itself.
    /// The default lifetime is [`Lifetime::Transient`]. Replaces any previous
    /// registration of the same contract in this container.
    pub fn register_type(
        &self,
        registered: TypeDescriptor,
        implementation: Option<TypeDescriptor>,
        name: Option<&str>,
        lifetime: Option<Lifetime>,
        members: Vec<InjectionMember>,
    ) -> Result<&Self, RegistrationError> {
        self.check_open(&registered, name)?;

        let build = implementation.unwrap_or_else(|| registered.clone());
        let category = if build == registered {
            Category::ExplicitType
        } else {
            let both_open = build.is_generic_definition() && registered.is_generic_definition();
            if !both_open && !self.runtime.provider().is_assignable(&build, &registered) {
                return Err(RegistrationError::NotAssignable {
                    registered: registered.name().to_string(),
                    implementation: build.name().to_string(),
                });
            }
            Category::TypeMapping
        };

        let plan = InjectionPlan::from_members(members).ok_or_else(|| RegistrationError::DuplicateConstructor {
            type_name: registered.name().to_string(),
        })?;

        let registration = RegistrationManager::new(
            Contract::new(registered, name),
            category,
            Source::Build(build),
            lifetime.unwrap_or(Lifetime::Transient),
            plan,
        );
        Ok(self.publish(registration))
    }

    /// Bind a contract to an existing value.
    ///
    /// Resolving the contract returns `instance` itself. The default lifetime
    /// is [`Lifetime::ContainerControlled`], which disposes the instance with
    /// this container when its metadata declares a disposer;
    /// [`Lifetime::ExternallyControlled`] holds it weakly instead.
    pub fn register_instance(
        &self,
        ty: TypeDescriptor,
        name: Option<&str>,
        instance: Value,
        lifetime: Option<Lifetime>,
    ) -> Result<&Self, RegistrationError> {
        self.check_open(&ty, name)?;

        if let Some(carrier) = ty.carrier() {
            if Any::type_id(&*instance) != carrier {
                return Err(RegistrationError::InstanceMismatch {
                    registered: ty.name().to_string(),
                    reason: "the value is of a different type".to_string(),
                });
            }
        }

        let lifetime = lifetime.unwrap_or(Lifetime::ContainerControlled);
        let source = match lifetime {
            Lifetime::ExternallyControlled => Source::Instance(InstanceRef::Weak(Arc::downgrade(&instance))),
            _ => Source::Instance(InstanceRef::Strong(Arc::clone(&instance))),
        };

        if lifetime.tracks_disposal() {
            let disposer = self
                .runtime
                .provider()
                .metadata(&ty)
                .and_then(|metadata| metadata.disposer().cloned());
            if let Some(dispose) = disposer {
                let owner = match lifetime {
                    Lifetime::Singleton => self.scope.root_of(),
                    _ => Arc::clone(&self.scope),
                };
                owner.track(&Contract::new(ty.clone(), name), Arc::clone(&instance), dispose);
            }
        }

        let registration = RegistrationManager::new(
            Contract::new(ty, name),
            Category::Instance,
            source,
            lifetime,
            InjectionPlan::default(),
        );
        registration.manager().seed(&instance);
        Ok(self.publish(registration))
    }

    /// Bind a contract to a factory callback.
    ///
    /// The factory receives a [`Resolver`] for its own dependencies. The
    /// default lifetime is [`Lifetime::Transient`].
    pub fn register_factory(
        &self,
        ty: TypeDescriptor,
        name: Option<&str>,
        factory: FactoryFn,
        lifetime: Option<Lifetime>,
    ) -> Result<&Self, RegistrationError> {
        self.check_open(&ty, name)?;

        if ty.is_generic_definition() {
            return Err(RegistrationError::InvalidFactory {
                type_name: ty.name().to_string(),
                reason: "a factory cannot produce an open generic definition".to_string(),
            });
        }

        let registration = RegistrationManager::new(
            Contract::new(ty, name),
            Category::Factory,
            Source::Factory(factory),
            lifetime.unwrap_or(Lifetime::Transient),
            InjectionPlan::default(),
        );
        Ok(self.publish(registration))
    }

    fn check_open(&self, ty: &TypeDescriptor, name: Option<&str>) -> Result<(), RegistrationError> {
        if self.scope.is_disposed() {
            return Err(RegistrationError::Disposed {
                type_name: ty.name().to_string(),
            });
        }
        if name.is_some_and(str::is_empty) {
            return Err(RegistrationError::EmptyName {
                type_name: ty.name().to_string(),
            });
        }
        Ok(())
    }

    fn publish(&self, registration: RegistrationManager) -> &Self {
        #[cfg(feature = "logging")]
        debug!(
            target: "injector_runtime",
            contract = %registration.contract(),
            category = ?registration.category(),
            lifetime = ?registration.lifetime(),
            depth = self.scope.depth(),
            "Registering contract"
        );

        self.scope.register(Arc::new(registration));
        self
    }

    // =========================================================================
    // Typed registration helpers
    // =========================================================================

    /// Register a value shared by every resolution from this container.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use injector_runtime::Container;
    /// use std::sync::Arc;
    ///
    /// struct Database { url: String }
    ///
    /// let container = Container::new();
    /// container.singleton(Database { url: "postgres://localhost".into() }).unwrap();
    ///
    /// let a = container.get::<Database>().unwrap();
    /// let b = container.get::<Database>().unwrap();
    /// assert!(Arc::ptr_eq(&a, &b));
    /// ```
    #[inline]
    pub fn singleton<T: Injectable>(&self, instance: T) -> Result<&Self, RegistrationError> {
        self.instance(Arc::new(instance))
    }

    /// Register an existing `Arc`; resolutions return that same allocation
    #[inline]
    pub fn instance<T: Injectable>(&self, instance: Arc<T>) -> Result<&Self, RegistrationError> {
        self.register_instance(TypeDescriptor::of::<T>(), None, instance, None)
    }

    /// Register a named value
    #[inline]
    pub fn instance_named<T: Injectable>(&self, name: &str, instance: T) -> Result<&Self, RegistrationError> {
        self.register_instance(TypeDescriptor::of::<T>(), Some(name), Arc::new(instance), None)
    }

    /// Register an existing interface view
    #[inline]
    pub fn instance_trait<I: ?Sized + Send + Sync + 'static>(&self, view: Arc<I>) -> Result<&Self, RegistrationError> {
        self.register_instance(TypeDescriptor::of_trait::<I>(), None, Arc::new(view), None)
    }

    /// Register a factory called once, on first resolution.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use injector_runtime::Container;
    ///
    /// struct Expensive { data: Vec<u8> }
    ///
    /// let container = Container::new();
    /// container.lazy(|| Expensive { data: vec![0; 1024] }).unwrap();
    /// assert_eq!(container.get::<Expensive>().unwrap().data.len(), 1024);
    /// ```
    #[inline]
    pub fn lazy<T: Injectable, F>(&self, factory: F) -> Result<&Self, RegistrationError>
    where
        F: Fn() -> T + Send + Sync + 'static,
    {
        self.factory(None, Lifetime::ContainerControlled, move |_| Ok(factory()))
    }

    /// Register a factory called on every resolution.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use injector_runtime::Container;
    /// use std::sync::atomic::{AtomicU64, Ordering};
    ///
    /// static COUNTER: AtomicU64 = AtomicU64::new(0);
    ///
    /// struct RequestId(u64);
    ///
    /// let container = Container::new();
    /// container.transient(|| RequestId(COUNTER.fetch_add(1, Ordering::SeqCst))).unwrap();
    ///
    /// let id1 = container.get::<RequestId>().unwrap();
    /// let id2 = container.get::<RequestId>().unwrap();
    /// assert_ne!(id1.0, id2.0);
    /// ```
    #[inline]
    pub fn transient<T: Injectable, F>(&self, factory: F) -> Result<&Self, RegistrationError>
    where
        F: Fn() -> T + Send + Sync + 'static,
    {
        self.factory(None, Lifetime::Transient, move |_| Ok(factory()))
    }

    /// Register a factory that resolves its own dependencies
    pub fn factory<T, F>(&self, name: Option<&str>, lifetime: Lifetime, factory: F) -> Result<&Self, RegistrationError>
    where
        T: Injectable,
        F: Fn(&Resolver<'_>) -> Result<T, BoxError> + Send + Sync + 'static,
    {
        let erased: FactoryFn = Arc::new(move |resolver: &Resolver<'_>, _: &Contract| {
            factory(resolver).map(|value| Arc::new(value) as Value)
        });
        self.register_factory(TypeDescriptor::of::<T>(), name, erased, Some(lifetime))
    }

    /// Register a factory producing an interface view
    pub fn factory_trait<I, F>(&self, name: Option<&str>, lifetime: Lifetime, factory: F) -> Result<&Self, RegistrationError>
    where
        I: ?Sized + Send + Sync + 'static,
        F: Fn(&Resolver<'_>) -> Result<Arc<I>, BoxError> + Send + Sync + 'static,
    {
        let erased: FactoryFn = Arc::new(move |resolver: &Resolver<'_>, _: &Contract| {
            factory(resolver).map(|view| Arc::new(view) as Value)
        });
        self.register_factory(TypeDescriptor::of_trait::<I>(), name, erased, Some(lifetime))
    }

    /// Describe `T` and register it as itself
    pub fn register<T: Describe>(&self, lifetime: Lifetime) -> Result<&Self, RegistrationError> {
        self.describe::<T>();
        self.register_type(TypeDescriptor::of::<T>(), None, None, Some(lifetime), Vec::new())
    }

    /// Describe `T` and register it as the implementation of interface `I`
    pub fn map<I, T>(&self, lifetime: Lifetime) -> Result<&Self, RegistrationError>
    where
        I: ?Sized + Send + Sync + 'static,
        T: Describe,
    {
        self.describe::<T>();
        self.register_type(
            TypeDescriptor::of_trait::<I>(),
            Some(TypeDescriptor::of::<T>()),
            None,
            Some(lifetime),
            Vec::new(),
        )
    }

    // =========================================================================
    // Resolution
    // =========================================================================

    /// Resolve a contract to its erased value.
    ///
    /// `overrides` replace injected values for this call and every nested
    /// resolution it triggers.
    pub fn resolve(
        &self,
        ty: TypeDescriptor,
        name: Option<&str>,
        overrides: &[ResolverOverride],
    ) -> Result<Value, ResolutionError> {
        engine::resolve(&self.runtime, &self.scope, &Contract::new(ty, name), overrides)
    }

    /// Resolve a concrete type.
    #[inline]
    pub fn get<T: Injectable>(&self) -> Result<Arc<T>, ResolutionError> {
        self.typed(Contract::of::<T>(), &[])
    }

    /// Resolve a named registration of a concrete type.
    #[inline]
    pub fn get_named<T: Injectable>(&self, name: &str) -> Result<Arc<T>, ResolutionError> {
        self.typed(Contract::named::<T>(name), &[])
    }

    /// Resolve a concrete type with per-call overrides.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use injector_runtime::{Container, MetadataBuilder, Parameter, ResolverOverride};
    /// use std::sync::Arc;
    ///
    /// struct Endpoint { url: Arc<String> }
    ///
    /// let container = Container::new();
    /// container.add_metadata(
    ///     MetadataBuilder::<Endpoint>::new()
    ///         .constructor([Parameter::of::<String>("url")], |mut args| Ok(Endpoint { url: args.take(0)? }))
    ///         .finish(),
    /// );
    ///
    /// let endpoint = container
    ///     .get_with::<Endpoint>(&[ResolverOverride::parameter("url", String::from("sqlite::memory:"))])
    ///     .unwrap();
    /// assert_eq!(endpoint.url.as_str(), "sqlite::memory:");
    /// ```
    #[inline]
    pub fn get_with<T: Injectable>(&self, overrides: &[ResolverOverride]) -> Result<Arc<T>, ResolutionError> {
        self.typed(Contract::of::<T>(), overrides)
    }

    /// Resolve an interface registration.
    pub fn get_trait<I: ?Sized + Send + Sync + 'static>(&self) -> Result<Arc<I>, ResolutionError> {
        self.typed_trait::<I>(None)
    }

    /// Resolve a named interface registration.
    pub fn get_trait_named<I: ?Sized + Send + Sync + 'static>(&self, name: &str) -> Result<Arc<I>, ResolutionError> {
        self.typed_trait::<I>(Some(name))
    }

    /// Resolve a concrete type, or `None` if that fails.
    #[inline]
    pub fn try_get<T: Injectable>(&self) -> Option<Arc<T>> {
        self.get::<T>().ok()
    }

    /// Every registration of `T` visible from this container, named or not,
    /// in registration order.
    pub fn resolve_all<T: Injectable>(&self) -> Result<Vec<Arc<T>>, ResolutionError> {
        let contract = Contract::new(TypeDescriptor::array_of(TypeDescriptor::of::<T>()), None);
        self.resolve_items(&contract)?
            .into_iter()
            .map(|item| {
                engine::downcast::<T>(item)
                    .map_err(|_| ResolutionError::type_mismatch(&contract, "an array item of another type"))
            })
            .collect()
    }

    /// Every registration of interface `I` visible from this container.
    pub fn resolve_all_traits<I: ?Sized + Send + Sync + 'static>(&self) -> Result<Vec<Arc<I>>, ResolutionError> {
        let contract = Contract::new(TypeDescriptor::array_of(TypeDescriptor::of_trait::<I>()), None);
        self.resolve_items(&contract)?
            .into_iter()
            .map(|item| {
                engine::downcast_trait::<I>(item)
                    .map_err(|_| ResolutionError::type_mismatch(&contract, "an array item of another type"))
            })
            .collect()
    }

    fn resolve_items(&self, contract: &Contract) -> Result<Vec<Value>, ResolutionError> {
        let value = engine::resolve(&self.runtime, &self.scope, contract, &[])?;
        let items = value
            .downcast::<Vec<Value>>()
            .map_err(|_| ResolutionError::type_mismatch(contract, "not an array"))?;
        Ok(Arc::unwrap_or_clone(items))
    }

    fn typed<T: Injectable>(&self, contract: Contract, overrides: &[ResolverOverride]) -> Result<Arc<T>, ResolutionError> {
        let value = engine::resolve(&self.runtime, &self.scope, &contract, overrides)?;
        engine::downcast::<T>(value).map_err(|_| ResolutionError::type_mismatch(&contract, "a value of another type"))
    }

    fn typed_trait<I: ?Sized + Send + Sync + 'static>(&self, name: Option<&str>) -> Result<Arc<I>, ResolutionError> {
        let contract = Contract::new(TypeDescriptor::of_trait::<I>(), name);
        let value = engine::resolve(&self.runtime, &self.scope, &contract, &[])?;
        engine::downcast_trait::<I>(value)
            .map_err(|_| ResolutionError::type_mismatch(&contract, "not an interface view"))
    }

    // =========================================================================
    // Queries
    // =========================================================================

    /// Whether the contract is registered here or in an ancestor.
    /// Never builds anything.
    #[inline]
    pub fn is_registered(&self, ty: TypeDescriptor, name: Option<&str>) -> bool {
        self.scope.is_registered(&Contract::new(ty, name))
    }

    #[inline]
    pub fn contains<T: Injectable>(&self) -> bool {
        self.scope.is_registered(&Contract::of::<T>())
    }

    /// Snapshot of every registration visible from this container, in
    /// registration order.
    pub fn registrations(&self) -> Vec<RegistrationInfo> {
        self.scope.registrations().iter().map(|entry| entry.info()).collect()
    }

    /// Number of entries stored in this container (not including parents).
    #[inline]
    pub fn len(&self) -> usize {
        self.scope.local_len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Nesting depth (0 = root).
    #[inline]
    pub fn depth(&self) -> u32 {
        self.scope.depth()
    }

    #[inline]
    pub fn name(&self) -> Option<&str> {
        self.scope.name()
    }

    #[inline]
    pub fn strategy(&self) -> PipelineStrategy {
        self.runtime.strategy()
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Dispose child containers, then every value this container tracks,
    /// newest first. Later calls do nothing.
    #[inline]
    pub fn dispose(&self) {
        self.scope.dispose();
    }

    #[inline]
    pub fn is_disposed(&self) -> bool {
        self.scope.is_disposed()
    }
}

impl Default for Container {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Container {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Container")
            .field("name", &self.scope.name())
            .field("depth", &self.scope.depth())
            .field("entries", &self.scope.local_len())
            .field("strategy", &self.runtime.strategy())
            .field("disposed", &self.scope.is_disposed())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FaultKind;
    use crate::injection::InjectionArg;
    use crate::lifetime::LifetimeState;
    use crate::metadata::{Arguments, Member, MetadataBuilder, Method, Parameter};
    use crate::provider::Dispose;
    use std::marker::PhantomData;
    use std::sync::Barrier;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;
    use std::time::Duration;

    const STRATEGIES: [PipelineStrategy; 2] = [PipelineStrategy::Interpreted, PipelineStrategy::Specialized];

    #[derive(Debug)]

    struct Config {
        url: String,
    }

    #[derive(Debug)]

    struct Database {
        config: Arc<Config>,
    }

    #[derive(Debug)]

    struct Service {
        database: Arc<Database>,
    }

    fn describe_graph(container: &Container) {
        container.add_metadata(
            MetadataBuilder::<Database>::new()
                .constructor([Parameter::of::<Config>("config")], |mut args: Arguments| {
                    Ok(Database { config: args.take(0)? })
                })
                .finish(),
        );
        container.add_metadata(
            MetadataBuilder::<Service>::new()
                .constructor([Parameter::of::<Database>("database")], |mut args: Arguments| {
                    Ok(Service { database: args.take(0)? })
                })
                .finish(),
        );
    }

    fn container_with(strategy: PipelineStrategy) -> Container {
        let container = Container::with_config(ContainerConfig::new().strategy(strategy));
        describe_graph(&container);
        container
            .singleton(Config {
                url: "postgres://localhost".into(),
            })
            .unwrap();
        container
    }

    fn database() -> TypeDescriptor {
        TypeDescriptor::of::<Database>()
    }

    // =========================================================================
    // Lifetimes
    // =========================================================================

    #[test]
    fn test_singleton_stability() {
        for strategy in STRATEGIES {
            let container = container_with(strategy);
            container
                .register_type(database(), None, None, Some(Lifetime::Singleton), Vec::new())
                .unwrap();

            let first = container.get::<Database>().unwrap();
            for _ in 0..10 {
                assert!(Arc::ptr_eq(&first, &container.get::<Database>().unwrap()));
            }
            assert_eq!(first.config.url, "postgres://localhost");
        }
    }

    #[test]
    fn test_transient_distinctness() {
        for strategy in STRATEGIES {
            let container = container_with(strategy);
            container.register_type(database(), None, None, None, Vec::new()).unwrap();

            let built: Vec<Arc<Database>> = (0..5).map(|_| container.get::<Database>().unwrap()).collect();
            for (i, a) in built.iter().enumerate() {
                for b in &built[i + 1..] {
                    assert!(!Arc::ptr_eq(a, b));
                }
            }
            // The shared dependency is still shared
            assert!(Arc::ptr_eq(&built[0].config, &built[4].config));
        }
    }

    #[test]
    fn test_single_construction_under_race() {
        static BUILT: AtomicUsize = AtomicUsize::new(0);

        struct Expensive {
            id: usize,
        }

        let container = Container::new();
        container.add_metadata(
            MetadataBuilder::<Expensive>::new()
                .constructor([], |_| {
                    let id = BUILT.fetch_add(1, Ordering::SeqCst);
                    thread::sleep(Duration::from_millis(20));
                    Ok(Expensive { id })
                })
                .finish(),
        );
        container
            .register_type(TypeDescriptor::of::<Expensive>(), None, None, Some(Lifetime::Singleton), Vec::new())
            .unwrap();

        let barrier = Arc::new(Barrier::new(8));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let container = container.clone();
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    barrier.wait();
                    container.get::<Expensive>().unwrap()
                })
            })
            .collect();
        let values: Vec<Arc<Expensive>> = handles.into_iter().map(|h| h.join().unwrap()).collect();

        assert_eq!(BUILT.load(Ordering::SeqCst), 1);
        assert!(values.iter().all(|v| Arc::ptr_eq(v, &values[0])));
        assert_eq!(values[0].id, 0);
    }

    #[test]
    fn test_hierarchy_fallback() {
        let parent = container_with(PipelineStrategy::Specialized);
        parent
            .register_type(database(), None, Some("hierarchical"), Some(Lifetime::Hierarchical), Vec::new())
            .unwrap();
        parent
            .register_type(database(), None, Some("singleton"), Some(Lifetime::Singleton), Vec::new())
            .unwrap();
        let child = parent.create_child_container(Some("request"));

        let from_parent = parent.get_named::<Database>("hierarchical").unwrap();
        let from_child = child.get_named::<Database>("hierarchical").unwrap();
        assert!(!Arc::ptr_eq(&from_parent, &from_child));
        assert!(Arc::ptr_eq(&from_child, &child.get_named::<Database>("hierarchical").unwrap()));

        let from_parent = parent.get_named::<Database>("singleton").unwrap();
        let from_child = child.get_named::<Database>("singleton").unwrap();
        assert!(Arc::ptr_eq(&from_parent, &from_child));

        assert!(child.is_registered(database(), Some("hierarchical")));
        assert!(!child.is_registered(database(), Some("missing")));
        assert_eq!(child.name(), Some("request"));
        assert_eq!(child.depth(), 1);
    }

    #[test]
    fn test_child_shadows_parent() {
        let root = Container::new();
        root.singleton(Config { url: "root".into() }).unwrap();
        let child = root.scope();
        child.singleton(Config { url: "child".into() }).unwrap();

        assert_eq!(root.get::<Config>().unwrap().url, "root");
        assert_eq!(child.get::<Config>().unwrap().url, "child");
    }

    #[test]
    fn test_per_resolve_shares_within_one_call() {
        static BUILT: AtomicUsize = AtomicUsize::new(0);

        struct Context {
            id: usize,
        }
        struct Pair {
            left: Arc<Context>,
            right: Arc<Context>,
        }

        for strategy in STRATEGIES {
            let container = Container::with_config(ContainerConfig::new().strategy(strategy));
            container.add_metadata(
                MetadataBuilder::<Context>::new()
                    .constructor([], |_| Ok(Context { id: BUILT.fetch_add(1, Ordering::SeqCst) }))
                    .finish(),
            );
            container.add_metadata(
                MetadataBuilder::<Pair>::new()
                    .constructor(
                        [Parameter::of::<Context>("left"), Parameter::of::<Context>("right")],
                        |mut args| Ok(Pair { left: args.take(0)?, right: args.take(1)? }),
                    )
                    .finish(),
            );
            container
                .register_type(TypeDescriptor::of::<Context>(), None, None, Some(Lifetime::PerResolve), Vec::new())
                .unwrap();

            let first = container.get::<Pair>().unwrap();
            let second = container.get::<Pair>().unwrap();
            assert!(Arc::ptr_eq(&first.left, &first.right));
            assert!(Arc::ptr_eq(&second.left, &second.right));
            assert_ne!(first.left.id, second.left.id);
        }
    }

    #[test]
    fn test_per_thread_values() {
        struct Session {
            thread: thread::ThreadId,
        }

        let container = Container::new();
        container.add_metadata(
            MetadataBuilder::<Session>::new()
                .constructor([], |_| Ok(Session { thread: thread::current().id() }))
                .finish(),
        );
        container
            .register_type(TypeDescriptor::of::<Session>(), None, None, Some(Lifetime::PerThread), Vec::new())
            .unwrap();

        let here = container.get::<Session>().unwrap();
        assert!(Arc::ptr_eq(&here, &container.get::<Session>().unwrap()));
        assert_eq!(here.thread, thread::current().id());

        let other = container.clone();
        let there = thread::spawn(move || other.get::<Session>().unwrap().thread).join().unwrap();
        assert_ne!(there, here.thread);
    }

    #[test]
    fn test_per_thread_values_released_with_container() {
        struct Session {
            dropped: Arc<AtomicUsize>,
        }

        impl Drop for Session {
            fn drop(&mut self) {
                self.dropped.fetch_add(1, Ordering::SeqCst);
            }
        }

        let describe = |container: &Container, dropped: &Arc<AtomicUsize>| {
            let dropped = Arc::clone(dropped);
            container.add_metadata(
                MetadataBuilder::<Session>::new()
                    .constructor([], move |_| Ok(Session { dropped: Arc::clone(&dropped) }))
                    .finish(),
            );
            container
                .register_type(TypeDescriptor::of::<Session>(), None, None, Some(Lifetime::PerThread), Vec::new())
                .unwrap();
        };

        // Disposed explicitly
        let dropped = Arc::new(AtomicUsize::new(0));
        let container = Container::new();
        describe(&container, &dropped);
        drop(container.get::<Session>().unwrap());
        let worker = container.clone();
        thread::spawn(move || drop(worker.get::<Session>().unwrap())).join().unwrap();
        assert_eq!(dropped.load(Ordering::SeqCst), 0);

        container.dispose();
        assert_eq!(dropped.load(Ordering::SeqCst), 2);

        // Dropped without disposing
        let dropped = Arc::new(AtomicUsize::new(0));
        let container = Container::new();
        describe(&container, &dropped);
        drop(container.get::<Session>().unwrap());
        drop(container);
        assert_eq!(dropped.load(Ordering::SeqCst), 1);

        // Registration replaced
        let dropped = Arc::new(AtomicUsize::new(0));
        let container = Container::new();
        describe(&container, &dropped);
        drop(container.get::<Session>().unwrap());
        container
            .register_type(TypeDescriptor::of::<Session>(), None, None, Some(Lifetime::Transient), Vec::new())
            .unwrap();
        assert_eq!(dropped.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_externally_controlled_type_rebuilds_after_release() {
        static BUILT: AtomicUsize = AtomicUsize::new(0);

        struct Cache {
            generation: usize,
        }

        let container = Container::new();
        container.add_metadata(
            MetadataBuilder::<Cache>::new()
                .constructor([], |_| Ok(Cache { generation: BUILT.fetch_add(1, Ordering::SeqCst) }))
                .finish(),
        );
        container
            .register_type(
                TypeDescriptor::of::<Cache>(),
                None,
                None,
                Some(Lifetime::ExternallyControlled),
                Vec::new(),
            )
            .unwrap();

        let held = container.get::<Cache>().unwrap();
        assert!(Arc::ptr_eq(&held, &container.get::<Cache>().unwrap()));
        let generation = held.generation;
        drop(held);

        assert_ne!(container.get::<Cache>().unwrap().generation, generation);
    }

    #[test]
    fn test_externally_controlled_instance_is_weak() {
        let container = Container::new();
        let value: Value = Arc::new(Config { url: "weak".into() });
        container
            .register_instance(
                TypeDescriptor::of::<Config>(),
                None,
                Arc::clone(&value),
                Some(Lifetime::ExternallyControlled),
            )
            .unwrap();

        assert_eq!(container.get::<Config>().unwrap().url, "weak");
        drop(value);

        let error = container.get::<Config>().unwrap_err();
        assert_eq!(error.kind, FaultKind::Construction);
    }

    // =========================================================================
    // Instances and factories
    // =========================================================================

    #[test]
    fn test_instance_identity_round_trip() {
        let container = Container::new();
        let config = Arc::new(Config { url: "sqlite::memory:".into() });
        container.instance(Arc::clone(&config)).unwrap();
        assert!(Arc::ptr_eq(&container.get::<Config>().unwrap(), &config));

        let erased: Value = Arc::new(Config { url: "erased".into() });
        container
            .register_instance(TypeDescriptor::of::<Config>(), Some("erased"), Arc::clone(&erased), None)
            .unwrap();
        let resolved = container.resolve(TypeDescriptor::of::<Config>(), Some("erased"), &[]).unwrap();
        assert!(Arc::ptr_eq(&resolved, &erased));
    }

    #[test]
    fn test_factory_resolves_dependencies() {
        struct Pool {
            url: String,
        }

        let container = container_with(PipelineStrategy::Specialized);
        container
            .factory(None, Lifetime::Singleton, |resolver| {
                let config = resolver.get::<Config>()?;
                Ok(Pool { url: config.url.clone() })
            })
            .unwrap();

        let pool = container.get::<Pool>().unwrap();
        assert_eq!(pool.url, "postgres://localhost");
        assert!(Arc::ptr_eq(&pool, &container.get::<Pool>().unwrap()));
    }

    #[test]
    fn test_recovery_after_failure() {
        let container = Container::new();
        container
            .factory(None, Lifetime::Singleton, |_| Err::<Config, BoxError>("database offline".into()))
            .unwrap();

        let error = container.get::<Config>().unwrap_err();
        assert_eq!(error.kind, FaultKind::Construction);
        assert!(error.cause.as_ref().is_some_and(|c| c.to_string() == "database offline"));

        container
            .factory(None, Lifetime::Singleton, |_| Ok(Config { url: "online".into() }))
            .unwrap();
        assert_eq!(container.get::<Config>().unwrap().url, "online");
    }

    #[test]
    fn test_failed_build_resets_lifetime() {
        let attempts = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&attempts);

        let container = Container::new();
        container
            .factory(Some("flaky"), Lifetime::Singleton, move |_| {
                if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                    Err("first attempt fails".into())
                } else {
                    Ok(Config { url: "second".into() })
                }
            })
            .unwrap();

        assert!(container.get_named::<Config>("flaky").is_err());
        let value = container.get_named::<Config>("flaky").unwrap();
        assert!(Arc::ptr_eq(&value, &container.get_named::<Config>("flaky").unwrap()));
        assert_eq!(attempts.load(Ordering::SeqCst), 2);

        let info = container.scope.lookup(&Contract::named::<Config>("flaky")).unwrap();
        assert_eq!(info.registration.lifetime_state(), LifetimeState::Built);
    }

    #[test]
    fn test_lazy_and_transient_helpers() {
        static CREATED: AtomicUsize = AtomicUsize::new(0);

        struct Counter(usize);

        let container = Container::new();
        container.lazy(|| Config { url: "lazy".into() }).unwrap();
        container.transient(|| Counter(CREATED.fetch_add(1, Ordering::SeqCst))).unwrap();

        let a = container.get::<Config>().unwrap();
        assert!(Arc::ptr_eq(&a, &container.get::<Config>().unwrap()));
        assert_ne!(container.get::<Counter>().unwrap().0, container.get::<Counter>().unwrap().0);
    }

    // =========================================================================
    // Selection and injection members
    // =========================================================================

    #[test]
    fn test_selection_prefers_exact_match() {
        struct Registered;
        struct Unregistered;
        struct Widget {
            source: &'static str,
        }

        for strategy in STRATEGIES {
            let container = Container::with_config(ContainerConfig::new().strategy(strategy));
            container.add_metadata(MetadataBuilder::<Registered>::new().constructor([], |_| Ok(Registered)).finish());
            container.add_metadata(
                MetadataBuilder::<Unregistered>::new()
                    .constructor([], |_| Ok(Unregistered))
                    .finish(),
            );
            container.add_metadata(
                MetadataBuilder::<Widget>::new()
                    .constructor([Parameter::of::<Unregistered>("dependency")], |_| {
                        Ok(Widget { source: "compatible" })
                    })
                    .constructor([Parameter::of::<Registered>("dependency")], |_| Ok(Widget { source: "exact" }))
                    .finish(),
            );
            container
                .register_type(TypeDescriptor::of::<Registered>(), None, None, None, Vec::new())
                .unwrap();

            for _ in 0..3 {
                assert_eq!(container.get::<Widget>().unwrap().source, "exact");
            }
        }
    }

    #[test]
    fn test_strategies_agree_after_late_registration() {
        struct Registered;
        struct Unregistered;
        struct Widget {
            source: &'static str,
        }

        let mut observed = Vec::new();
        for strategy in STRATEGIES {
            let container = Container::with_config(ContainerConfig::new().strategy(strategy));
            container.add_metadata(MetadataBuilder::<Registered>::new().constructor([], |_| Ok(Registered)).finish());
            container.add_metadata(
                MetadataBuilder::<Unregistered>::new()
                    .constructor([], |_| Ok(Unregistered))
                    .finish(),
            );
            container.add_metadata(
                MetadataBuilder::<Widget>::new()
                    .constructor([Parameter::of::<Unregistered>("dependency")], |_| {
                        Ok(Widget { source: "compatible" })
                    })
                    .constructor([Parameter::of::<Registered>("dependency")], |_| Ok(Widget { source: "exact" }))
                    .finish(),
            );
            container
                .register_type(TypeDescriptor::of::<Widget>(), None, None, Some(Lifetime::Transient), Vec::new())
                .unwrap();

            let before = container.get::<Widget>().unwrap().source;
            container
                .register_type(TypeDescriptor::of::<Registered>(), None, None, None, Vec::new())
                .unwrap();
            let after = container.get::<Widget>().unwrap().source;
            let child = container.create_child_container(Some("late"));
            let from_child = child.get::<Widget>().unwrap().source;

            observed.push((before, after, from_child));
        }

        assert_eq!(observed[0], ("compatible", "exact", "exact"));
        assert_eq!(observed[0], observed[1]);
    }

    #[test]
    fn test_child_registration_changes_selection_only_in_child() {
        struct Registered;
        struct Unregistered;
        struct Widget {
            source: &'static str,
        }

        for strategy in STRATEGIES {
            let root = Container::with_config(ContainerConfig::new().strategy(strategy));
            root.add_metadata(MetadataBuilder::<Registered>::new().constructor([], |_| Ok(Registered)).finish());
            root.add_metadata(
                MetadataBuilder::<Unregistered>::new()
                    .constructor([], |_| Ok(Unregistered))
                    .finish(),
            );
            root.add_metadata(
                MetadataBuilder::<Widget>::new()
                    .constructor([Parameter::of::<Unregistered>("dependency")], |_| {
                        Ok(Widget { source: "compatible" })
                    })
                    .constructor([Parameter::of::<Registered>("dependency")], |_| Ok(Widget { source: "exact" }))
                    .finish(),
            );
            root.register_type(TypeDescriptor::of::<Widget>(), None, None, None, Vec::new())
                .unwrap();
            let child = root.create_child_container(None);
            child
                .register_type(TypeDescriptor::of::<Registered>(), None, None, None, Vec::new())
                .unwrap();

            for _ in 0..2 {
                assert_eq!(root.get::<Widget>().unwrap().source, "compatible");
                assert_eq!(child.get::<Widget>().unwrap().source, "exact");
            }
        }
    }

    #[derive(Debug, Default)]
    struct Server {
        port: u16,
        config: Option<Arc<Config>>,
        started: bool,
    }

    fn describe_server(container: &Container) {
        container.add_metadata(
            MetadataBuilder::<Server>::new()
                .constructor([], |_| Ok(Server::default()))
                .property(Member::of::<Server, u16, _>("port", |server, port| server.port = *port))
                .field(Member::of::<Server, Config, _>("config", |server, config| server.config = Some(config)).inject())
                .method(Method::new::<Server, _>(
                    "start",
                    [Parameter::of::<Config>("config")],
                    |server, mut args| {
                        let config: Arc<Config> = args.take(0)?;
                        server.started = !config.url.is_empty();
                        Ok(())
                    },
                ))
                .finish(),
        );
    }

    #[test]
    fn test_injection_members() {
        for strategy in STRATEGIES {
            let container = container_with(strategy);
            describe_server(&container);
            container
                .register_type(
                    TypeDescriptor::of::<Server>(),
                    None,
                    None,
                    None,
                    vec![
                        InjectionMember::property_with("port", InjectionArg::value(8080u16)),
                        InjectionMember::method("start", [InjectionArg::of::<Config>()]),
                    ],
                )
                .unwrap();

            let server = container.get::<Server>().unwrap();
            assert_eq!(server.port, 8080);
            assert!(server.started);
            assert_eq!(server.config.as_ref().map(|c| c.url.as_str()), Some("postgres://localhost"));
        }
    }

    #[test]
    fn test_unknown_member_is_a_selection_failure() {
        let container = container_with(PipelineStrategy::Specialized);
        describe_server(&container);
        container
            .register_type(
                TypeDescriptor::of::<Server>(),
                None,
                None,
                None,
                vec![InjectionMember::property("missing")],
            )
            .unwrap();

        let error = container.get::<Server>().unwrap_err();
        assert_eq!(error.kind, FaultKind::Selection);
        assert!(error.message.contains("missing"));
    }

    #[test]
    fn test_resolver_callback_argument() {
        let container = container_with(PipelineStrategy::Specialized);
        container
            .register_type(
                database(),
                None,
                Some("custom"),
                None,
                vec![InjectionMember::constructor([InjectionArg::resolver(|resolver| {
                    assert!(resolver.contract().name() == Some("custom"));
                    Ok(Arc::new(Config { url: "from-callback".into() }) as Value)
                })])],
            )
            .unwrap();

        assert_eq!(container.get_named::<Database>("custom").unwrap().config.url, "from-callback");
    }

    #[test]
    fn test_optional_and_named_parameters() {
        struct Sink;
        struct Reporter {
            sink: Option<Arc<Sink>>,
            replica: Arc<Config>,
        }

        let container = container_with(PipelineStrategy::Specialized);
        container.add_metadata(
            MetadataBuilder::<Reporter>::new()
                .constructor(
                    [
                        Parameter::of::<Sink>("sink").optional(),
                        Parameter::of::<Config>("replica").named("replica"),
                    ],
                    |mut args| {
                        Ok(Reporter {
                            sink: args.take_optional(0)?,
                            replica: args.take(1)?,
                        })
                    },
                )
                .finish(),
        );
        container.instance_named("replica", Config { url: "replica".into() }).unwrap();

        let reporter = container.get::<Reporter>().unwrap();
        assert!(reporter.sink.is_none());
        assert_eq!(reporter.replica.url, "replica");

        container.singleton(Sink).unwrap();
        assert!(container.get::<Reporter>().unwrap().sink.is_some());
    }

    #[test]
    fn test_optional_parameter_ranks_as_compatible() {
        struct Missing;
        struct Unregistered;
        struct Widget {
            source: &'static str,
        }

        for strategy in STRATEGIES {
            let container = Container::with_config(ContainerConfig::new().strategy(strategy));
            container.add_metadata(
                MetadataBuilder::<Unregistered>::new()
                    .constructor([], |_| Ok(Unregistered))
                    .finish(),
            );
            container.add_metadata(
                MetadataBuilder::<Widget>::new()
                    .constructor([Parameter::of::<Unregistered>("dependency")], |_| {
                        Ok(Widget { source: "implicit" })
                    })
                    .constructor([Parameter::of::<Missing>("dependency").optional()], |_| {
                        Ok(Widget { source: "optional" })
                    })
                    .finish(),
            );

            // Equal ranks fall back to declaration order
            assert_eq!(container.get::<Widget>().unwrap().source, "implicit");
        }
    }

    #[test]
    fn test_resolver_overrides() {
        #[derive(Debug)]
        struct Endpoint {
            url: Arc<String>,
        }

        let container = container_with(PipelineStrategy::Specialized);
        container.add_metadata(
            MetadataBuilder::<Endpoint>::new()
                .constructor([Parameter::of::<String>("url")], |mut args| Ok(Endpoint { url: args.take(0)? }))
                .finish(),
        );

        let error = container.get::<Endpoint>().unwrap_err();
        assert_eq!(error.kind, FaultKind::NotRegistered);

        let endpoint = container
            .get_with::<Endpoint>(&[ResolverOverride::parameter("url", String::from("sqlite::memory:"))])
            .unwrap();
        assert_eq!(endpoint.url.as_str(), "sqlite::memory:");

        // Dependency overrides reach nested resolutions
        let service = container
            .get_with::<Service>(&[ResolverOverride::dependency(Config { url: "override".into() })])
            .unwrap();
        assert_eq!(service.database.config.url, "override");
        assert_eq!(container.get::<Service>().unwrap().database.config.url, "postgres://localhost");
    }

    // =========================================================================
    // Interfaces, generics and arrays
    // =========================================================================

    trait Clock: Send + Sync + std::fmt::Debug {
        fn now(&self) -> u64;
    }

    #[derive(Debug)]

    struct FixedClock {
        at: u64,
    }

    impl Clock for FixedClock {
        fn now(&self) -> u64 {
            self.at
        }
    }

    #[test]
    fn test_interface_mapping_upcasts() {
        for strategy in STRATEGIES {
            let container = Container::with_config(ContainerConfig::new().strategy(strategy));
            container.add_metadata(
                MetadataBuilder::<FixedClock>::new()
                    .constructor([], |_| Ok(FixedClock { at: 42 }))
                    .implements::<dyn Clock>(|clock| clock)
                    .finish(),
            );
            container
                .register_type(
                    TypeDescriptor::of_trait::<dyn Clock>(),
                    Some(TypeDescriptor::of::<FixedClock>()),
                    None,
                    Some(Lifetime::ContainerControlled),
                    Vec::new(),
                )
                .unwrap();

            let clock = container.get_trait::<dyn Clock>().unwrap();
            assert_eq!(clock.now(), 42);
            assert!(Arc::ptr_eq(&clock, &container.get_trait::<dyn Clock>().unwrap()));
        }
    }

    #[test]
    fn test_mapping_redirects_to_registered_implementation() {
        static BUILT: AtomicUsize = AtomicUsize::new(0);

        let container = Container::new();
        container.add_metadata(
            MetadataBuilder::<FixedClock>::new()
                .constructor([], |_| {
                    BUILT.fetch_add(1, Ordering::SeqCst);
                    Ok(FixedClock { at: 7 })
                })
                .implements::<dyn Clock>(|clock| clock)
                .finish(),
        );
        container
            .register_type(TypeDescriptor::of::<FixedClock>(), None, None, Some(Lifetime::Singleton), Vec::new())
            .unwrap();
        container
            .register_type(
                TypeDescriptor::of_trait::<dyn Clock>(),
                Some(TypeDescriptor::of::<FixedClock>()),
                None,
                None,
                Vec::new(),
            )
            .unwrap();

        for _ in 0..3 {
            assert_eq!(container.get_trait::<dyn Clock>().unwrap().now(), 7);
        }
        assert_eq!(container.get::<FixedClock>().unwrap().at, 7);
        assert_eq!(BUILT.load(Ordering::SeqCst), 1);
    }

    struct RepositoryDef;
    struct StoreDef;
    struct User;
    struct Order;

    struct Repository<T> {
        config: Arc<Config>,
        _entity: PhantomData<fn() -> T>,
    }

    trait Store<T>: Send + Sync {
        fn entity(&self) -> &'static str;
    }

    impl<T: 'static> Store<T> for Repository<T> {
        fn entity(&self) -> &'static str {
            std::any::type_name::<T>()
        }
    }

    fn describe_repository<T: 'static>(container: &Container) {
        let definition = TypeDescriptor::generic_definition::<RepositoryDef>("Repository<>");
        container.add_metadata(
            MetadataBuilder::<Repository<T>>::new()
                .closes(definition, vec![TypeDescriptor::of::<T>()])
                .constructor([Parameter::of::<Config>("config")], |mut args| {
                    Ok(Repository {
                        config: args.take(0)?,
                        _entity: PhantomData,
                    })
                })
                .implements::<dyn Store<T>>(|repository| repository)
                .finish(),
        );
    }

    #[test]
    fn test_open_generic_registration_closes_on_demand() {
        let container = container_with(PipelineStrategy::Specialized);
        describe_repository::<User>(&container);
        describe_repository::<Order>(&container);
        let definition = TypeDescriptor::generic_definition::<RepositoryDef>("Repository<>");
        container
            .register_type(definition, None, None, Some(Lifetime::ContainerControlled), Vec::new())
            .unwrap();

        let users = container.get::<Repository<User>>().unwrap();
        assert!(Arc::ptr_eq(&users, &container.get::<Repository<User>>().unwrap()));
        assert_eq!(users.config.url, "postgres://localhost");
        assert!(container.get::<Repository<Order>>().is_ok());

        // Only the open registration is enumerated
        assert_eq!(container.registrations().len(), 2);
    }

    #[test]
    fn test_open_generic_interface_mapping() {
        let container = container_with(PipelineStrategy::Interpreted);
        describe_repository::<User>(&container);
        let repository = TypeDescriptor::generic_definition::<RepositoryDef>("Repository<>");
        let store = TypeDescriptor::generic_definition::<StoreDef>("Store<>");
        container
            .register_type(store.clone(), Some(repository), None, None, Vec::new())
            .unwrap();

        let closed = TypeDescriptor::of_trait::<dyn Store<User>>().closing(store, vec![TypeDescriptor::of::<User>()]);
        let value = container.resolve(closed, None, &[]).unwrap();
        let users = engine::downcast_trait::<dyn Store<User>>(value).ok().unwrap();
        assert!(users.entity().ends_with("User"));
    }

    trait Plugin: Send + Sync {
        fn name(&self) -> &'static str;
    }

    struct Alpha;
    struct Beta;
    struct Gamma;

    impl Plugin for Alpha {
        fn name(&self) -> &'static str {
            "alpha"
        }
    }
    impl Plugin for Beta {
        fn name(&self) -> &'static str {
            "beta"
        }
    }
    impl Plugin for Gamma {
        fn name(&self) -> &'static str {
            "gamma"
        }
    }

    #[test]
    fn test_resolve_all_in_registration_order() {
        let root = Container::new();
        root.add_metadata(MetadataBuilder::<Alpha>::new().constructor([], |_| Ok(Alpha)).implements::<dyn Plugin>(|p| p).finish());
        root.add_metadata(MetadataBuilder::<Beta>::new().constructor([], |_| Ok(Beta)).implements::<dyn Plugin>(|p| p).finish());
        root.add_metadata(MetadataBuilder::<Gamma>::new().constructor([], |_| Ok(Gamma)).implements::<dyn Plugin>(|p| p).finish());

        let plugin = TypeDescriptor::of_trait::<dyn Plugin>;
        root.register_type(plugin(), Some(TypeDescriptor::of::<Alpha>()), Some("first"), None, Vec::new())
            .unwrap();
        root.register_type(plugin(), Some(TypeDescriptor::of::<Beta>()), Some("second"), None, Vec::new())
            .unwrap();

        let names: Vec<_> = root.resolve_all_traits::<dyn Plugin>().unwrap().iter().map(|p| p.name()).collect();
        assert_eq!(names, ["alpha", "beta"]);

        let child = root.scope();
        child
            .register_type(plugin(), Some(TypeDescriptor::of::<Gamma>()), Some("first"), None, Vec::new())
            .unwrap();
        let names: Vec<_> = child.resolve_all_traits::<dyn Plugin>().unwrap().iter().map(|p| p.name()).collect();
        assert_eq!(names, ["beta", "gamma"]);
    }

    #[test]
    fn test_array_parameters() {
        struct Replicas {
            configs: Vec<Arc<Config>>,
        }

        let container = container_with(PipelineStrategy::Specialized);
        container.instance_named("replica", Config { url: "replica".into() }).unwrap();
        container.add_metadata(
            MetadataBuilder::<Replicas>::new()
                .constructor([Parameter::all::<Config>("configs")], |mut args| {
                    Ok(Replicas { configs: args.take_all(0)? })
                })
                .finish(),
        );

        let replicas = container.get::<Replicas>().unwrap();
        let urls: Vec<_> = replicas.configs.iter().map(|c| c.url.as_str()).collect();
        assert_eq!(urls, ["postgres://localhost", "replica"]);
        assert_eq!(container.resolve_all::<Config>().unwrap().len(), 2);
    }

    // =========================================================================
    // Failures
    // =========================================================================

    #[derive(Debug)]

    struct Chicken {
        _egg: Arc<Egg>,
    }
    #[derive(Debug)]
    struct Egg {
        _chicken: Arc<Chicken>,
    }

    #[test]
    fn test_circular_dependency_is_reported() {
        for strategy in STRATEGIES {
            let container = Container::with_config(ContainerConfig::new().strategy(strategy));
            container.add_metadata(
                MetadataBuilder::<Chicken>::new()
                    .constructor([Parameter::of::<Egg>("egg")], |mut args| Ok(Chicken { _egg: args.take(0)? }))
                    .finish(),
            );
            container.add_metadata(
                MetadataBuilder::<Egg>::new()
                    .constructor([Parameter::of::<Chicken>("chicken")], |mut args| {
                        Ok(Egg { _chicken: args.take(0)? })
                    })
                    .finish(),
            );

            let error = container.get::<Chicken>().unwrap_err();
            assert_eq!(error.kind, FaultKind::CircularDependency);
            assert!(error.type_requested.contains("Chicken"));
            assert!(error.message.contains("dependency path"));
        }
    }

    #[test]
    fn test_factory_cycle_keeps_kind() {
        let container = Container::new();
        container
            .factory(None, Lifetime::Transient, |resolver| {
                let inner = resolver.get::<Config>()?;
                Ok(Config { url: inner.url.clone() })
            })
            .unwrap();

        assert_eq!(container.get::<Config>().unwrap_err().kind, FaultKind::CircularDependency);
    }

    #[test]
    fn test_depth_limit() {
        let container = Container::with_config(ContainerConfig::new().max_depth(2));
        describe_graph(&container);
        container.singleton(Config { url: "deep".into() }).unwrap();

        assert!(container.get::<Database>().is_ok());
        let error = container.get::<Service>().unwrap_err();
        assert_eq!(error.kind, FaultKind::CircularDependency);
        assert!(error.message.contains("maximum depth"));
    }

    #[test]
    fn test_failure_names_requested_contract() {
        let container = Container::new();
        describe_graph(&container);

        let error = container.get::<Service>().unwrap_err();
        assert_eq!(error.kind, FaultKind::NotRegistered);
        assert!(error.type_requested.contains("Service"));
        assert!(error.message.contains("Config"));
    }

    #[test]
    fn test_interface_without_mapping_is_not_registered() {
        let container = Container::new();
        let error = container.get_trait::<dyn Clock>().unwrap_err();
        assert_eq!(error.kind, FaultKind::NotRegistered);
    }

    #[test]
    fn test_registration_errors() {
        let container = Container::new();

        assert!(matches!(
            container.register_type(database(), None, Some(""), None, Vec::new()),
            Err(RegistrationError::EmptyName { .. })
        ));
        assert!(matches!(
            container.register_type(
                TypeDescriptor::of_trait::<dyn Clock>(),
                Some(TypeDescriptor::of::<Config>()),
                None,
                None,
                Vec::new()
            ),
            Err(RegistrationError::NotAssignable { .. })
        ));
        assert!(matches!(
            container.register_type(
                database(),
                None,
                None,
                None,
                vec![InjectionMember::constructor([]), InjectionMember::constructor([])]
            ),
            Err(RegistrationError::DuplicateConstructor { .. })
        ));
        assert!(matches!(
            container.register_instance(TypeDescriptor::of::<Config>(), None, Arc::new(5u32), None),
            Err(RegistrationError::InstanceMismatch { .. })
        ));

        let open = TypeDescriptor::generic_definition::<RepositoryDef>("Repository<>");
        let factory: FactoryFn = Arc::new(|_: &Resolver<'_>, _: &Contract| Ok::<Value, BoxError>(Arc::new(0u8)));
        assert!(matches!(
            container.register_factory(open, None, factory, None),
            Err(RegistrationError::InvalidFactory { .. })
        ));
        assert!(container.registrations().is_empty());
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    #[derive(Debug)]

    struct Handle {
        closed: Arc<AtomicUsize>,
    }

    impl Dispose for Handle {
        fn dispose(&self) {
            self.closed.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn describe_handle(container: &Container, closed: &Arc<AtomicUsize>) {
        let closed = Arc::clone(closed);
        container.add_metadata(
            MetadataBuilder::<Handle>::new()
                .constructor([], move |_| Ok(Handle { closed: Arc::clone(&closed) }))
                .disposable()
                .finish(),
        );
    }

    #[test]
    fn test_disposal_idempotence() {
        let closed = Arc::new(AtomicUsize::new(0));
        let container = Container::new();
        describe_handle(&container, &closed);
        container
            .register_type(TypeDescriptor::of::<Handle>(), None, None, Some(Lifetime::ContainerControlled), Vec::new())
            .unwrap();
        container.get::<Handle>().unwrap();

        container.dispose();
        container.dispose();
        assert_eq!(closed.load(Ordering::SeqCst), 1);
        assert!(container.is_disposed());

        assert_eq!(container.get::<Handle>().unwrap_err().kind, FaultKind::Disposed);
        assert!(matches!(
            container.singleton(Config { url: "late".into() }),
            Err(RegistrationError::Disposed { .. })
        ));
    }

    #[test]
    fn test_disposal_cascades_to_children() {
        let closed = Arc::new(AtomicUsize::new(0));
        let root = Container::new();
        describe_handle(&root, &closed);

        let child = root.create_child_container(Some("worker"));
        child
            .register_type(TypeDescriptor::of::<Handle>(), None, None, Some(Lifetime::ContainerControlled), Vec::new())
            .unwrap();
        child.get::<Handle>().unwrap();

        let instance = Arc::new(Handle { closed: Arc::clone(&closed) });
        root.instance(instance).unwrap();

        root.dispose();
        assert!(child.is_disposed());
        assert_eq!(closed.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_transients_are_not_tracked() {
        let closed = Arc::new(AtomicUsize::new(0));
        let container = Container::new();
        describe_handle(&container, &closed);
        container.get::<Handle>().unwrap();
        container.get::<Handle>().unwrap();

        container.dispose();
        assert_eq!(closed.load(Ordering::SeqCst), 0);
    }

    // =========================================================================
    // Queries and storage
    // =========================================================================

    #[test]
    fn test_registrations_snapshot() {
        let root = container_with(PipelineStrategy::Specialized);
        root.register_type(database(), None, None, Some(Lifetime::Singleton), Vec::new())
            .unwrap();
        let child = root.scope();
        child.register_type(database(), None, None, None, Vec::new()).unwrap();

        let infos = child.registrations();
        assert_eq!(infos.len(), 2);
        assert_eq!(infos[0].registered_type, TypeDescriptor::of::<Config>());
        assert_eq!(infos[1].lifetime, Lifetime::Transient);
        assert_eq!(infos[1].category, Category::ExplicitType);

        assert_eq!(root.registrations()[1].lifetime, Lifetime::Singleton);
    }

    #[test]
    fn test_many_registrations_switch_storage() {
        let container = Container::with_config(ContainerConfig::new().flat_table_limit(2));
        for i in 0..40 {
            container.instance_named(&format!("config-{}", i), Config { url: i.to_string() }).unwrap();
        }
        for i in 0..40 {
            assert_eq!(container.get_named::<Config>(&format!("config-{}", i)).unwrap().url, i.to_string());
        }
        assert_eq!(container.registrations().len(), 40);
    }

    #[test]
    fn test_custom_metadata_provider() {
        let catalog = Arc::new(TypeCatalog::new());
        catalog.add(MetadataBuilder::<FixedClock>::new().constructor([], |_| Ok(FixedClock { at: 3 })).finish());
        let container = Container::with_config(ContainerConfig::new().metadata(catalog));

        assert_eq!(container.get::<FixedClock>().unwrap().at, 3);
        // Metadata added through the container is ignored
        container.add_metadata(MetadataBuilder::<Config>::new().constructor([], |_| Ok(Config { url: String::new() })).finish());
        assert!(container.get::<Config>().is_err());
    }
}

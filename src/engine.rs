//! Resolution engine
//!
//! Locates the registration for a contract, builds and caches its pipeline
//! on first use, and runs it in a fresh [`Frame`]. This is the only place a
//! [`Fault`] is turned into a [`ResolutionError`].
//!
//! A contract with no registration of its own can still resolve when it is:
//!
//! 1. a closed generic whose open definition is registered,
//! 2. an array type, collecting every registration of its element type, or
//! 3. a constructible concrete type the metadata provider describes.

use crate::catalog::TypeCatalog;
use crate::contract::Contract;
use crate::error::{BoxError, Fault, ResolutionError};
use crate::injection::ResolverOverride;
use crate::metadata::{MetadataProvider, Value};
use crate::pipeline::{CallGraph, Frame, Pipeline, PipelineStrategy};
use crate::provider::Injectable;
use crate::registration::RegistrationManager;
use crate::scope::{Located, Scope};
use crate::selection::{self, MatchRank};
use crate::types::TypeDescriptor;
use std::fmt;
use std::sync::Arc;

#[cfg(feature = "logging")]
use tracing::{debug, trace};

/// State shared by a container tree: configuration and the metadata provider
pub(crate) struct Runtime {
    strategy: PipelineStrategy,
    max_depth: usize,
    provider: Arc<dyn MetadataProvider>,
    /// Set when the provider is the built-in catalog, so types can be described later
    catalog: Option<Arc<TypeCatalog>>,
}

impl Runtime {
    pub(crate) fn new(
        strategy: PipelineStrategy,
        max_depth: usize,
        provider: Arc<dyn MetadataProvider>,
        catalog: Option<Arc<TypeCatalog>>,
    ) -> Self {
        Self {
            strategy,
            max_depth,
            provider,
            catalog,
        }
    }

    #[inline]
    pub(crate) fn provider(&self) -> &dyn MetadataProvider {
        &*self.provider
    }

    #[inline]
    pub(crate) fn catalog(&self) -> Option<&Arc<TypeCatalog>> {
        self.catalog.as_ref()
    }

    #[inline]
    pub(crate) fn strategy(&self) -> PipelineStrategy {
        self.strategy
    }

    #[inline]
    pub(crate) fn max_depth(&self) -> usize {
        self.max_depth
    }
}

impl fmt::Debug for Runtime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Runtime")
            .field("strategy", &self.strategy)
            .field("max_depth", &self.max_depth)
            .field("catalog", &self.catalog)
            .finish()
    }
}

// =============================================================================
// Entry points
// =============================================================================

/// Resolve `contract` from `scope` as a new top-level call
pub(crate) fn resolve(
    runtime: &Runtime,
    scope: &Arc<Scope>,
    contract: &Contract,
    overrides: &[ResolverOverride],
) -> Result<Value, ResolutionError> {
    #[cfg(feature = "logging")]
    trace!(
        target: "injector_runtime",
        contract = %contract,
        overrides = overrides.len(),
        "Resolving contract"
    );

    let graph = CallGraph::new(overrides);
    resolve_contract(runtime, scope, &graph, None, contract.clone()).map_err(|fault| {
        #[cfg(feature = "logging")]
        debug!(
            target: "injector_runtime",
            contract = %contract,
            kind = ?fault.kind(),
            failing = fault.contract(),
            "Resolution failed"
        );

        ResolutionError::from_fault(contract, fault)
    })
}

/// Resolve `contract` within an existing call graph
pub(crate) fn resolve_contract(
    runtime: &Runtime,
    scope: &Arc<Scope>,
    graph: &CallGraph<'_>,
    parent: Option<&Frame<'_>>,
    contract: Contract,
) -> Result<Value, Fault> {
    run(runtime, scope, graph, parent, &contract).map_err(|fault| fault.through(&contract))
}

fn run(
    runtime: &Runtime,
    scope: &Arc<Scope>,
    graph: &CallGraph<'_>,
    parent: Option<&Frame<'_>>,
    contract: &Contract,
) -> Result<Value, Fault> {
    if scope.is_disposed() {
        return Err(Fault::disposed(contract));
    }

    let depth = parent.map_or(1, |frame| frame.depth + 1);
    if depth > runtime.max_depth {
        return Err(Fault::too_deep(contract, runtime.max_depth));
    }
    if let Some(parent) = parent {
        if std::iter::once(parent)
            .chain(parent.ancestors())
            .any(|frame| frame.contract == *contract)
        {
            return Err(Fault::circular(contract));
        }
    }

    let located = match scope.lookup(contract) {
        Some(located) => located,
        None => match close_open_generic(runtime, scope, contract) {
            Some(located) => located,
            None if contract.ty().is_array() => return resolve_array(runtime, scope, graph, parent, contract),
            None => implicit(runtime, scope, contract).ok_or_else(|| Fault::not_registered(contract))?,
        },
    };
    let Located { registration, owner } = located;

    let pipeline = match registration.pipeline() {
        Some(pipeline) => pipeline,
        None => registration.install_pipeline(Pipeline::build(runtime.strategy, &registration)),
    };

    let mut frame = Frame::new(
        contract.clone(),
        Arc::clone(&registration),
        owner,
        scope,
        runtime,
        graph,
        parent,
        depth,
    );
    pipeline.run(&mut frame)?;
    frame
        .value
        .take()
        .ok_or_else(|| Fault::mismatch(contract, "pipeline completed without producing a value"))
}

// =============================================================================
// Derived registrations
// =============================================================================

/// `ty` as the metadata provider describes it, so closed generics carry
/// their definition link
fn canonical(runtime: &Runtime, ty: &TypeDescriptor) -> TypeDescriptor {
    if ty.is_closed_generic() {
        return ty.clone();
    }
    runtime
        .provider()
        .metadata(ty)
        .map_or_else(|| ty.clone(), |metadata| metadata.ty().clone())
}

/// Materialize the closed form of a registered open generic mapping
fn close_open_generic(runtime: &Runtime, scope: &Arc<Scope>, contract: &Contract) -> Option<Located> {
    let closed = canonical(runtime, contract.ty());
    let definition = closed.definition()?;
    let Located {
        registration: open,
        owner,
    } = scope.lookup(&contract.with_type(definition.clone()))?;

    let build = match open.mapped_type() {
        Some(mapped) if mapped.is_generic_definition() => {
            runtime.provider().close_generic(mapped, closed.arguments())?
        }
        Some(mapped) => mapped.clone(),
        None => return None,
    };

    let contract = contract.with_type(closed);
    let stale = match owner.local(&contract) {
        Some(existing) if owner.is_current(&existing) => {
            return Some(Located {
                registration: existing,
                owner,
            });
        }
        Some(existing) => Some(existing.id()),
        None => None,
    };

    #[cfg(feature = "logging")]
    debug!(
        target: "injector_runtime",
        contract = %contract,
        open = %open.contract(),
        build = build.name(),
        "Closing open generic registration"
    );

    let registration = owner.install_over(stale, Arc::new(open.close(contract, build)));
    Some(Located { registration, owner })
}

/// Register an unregistered constructible type in the resolving scope
fn implicit(runtime: &Runtime, scope: &Arc<Scope>, contract: &Contract) -> Option<Located> {
    let metadata = runtime.provider().metadata(contract.ty())?;
    if !metadata.is_constructible() {
        return None;
    }

    #[cfg(feature = "logging")]
    trace!(
        target: "injector_runtime",
        contract = %contract,
        "Building unregistered type implicitly"
    );

    let stale = scope
        .local(contract)
        .filter(|existing| !scope.is_current(existing))
        .map(|existing| existing.id());
    let registration = scope.install_over(stale, Arc::new(RegistrationManager::implicit(contract.clone())));
    Some(Located {
        registration,
        owner: Arc::clone(scope),
    })
}

/// Every visible registration of the element type, in registration order
fn resolve_array(
    runtime: &Runtime,
    scope: &Arc<Scope>,
    graph: &CallGraph<'_>,
    parent: Option<&Frame<'_>>,
    contract: &Contract,
) -> Result<Value, Fault> {
    let Some(element) = contract.ty().element() else {
        return Err(Fault::not_registered(contract));
    };
    let element = canonical(runtime, element);

    let mut contracts: Vec<(u64, Contract)> = scope
        .registrations_of(&element)
        .into_iter()
        .map(|entry| (entry.id(), entry.contract().clone()))
        .collect();
    if let Some(definition) = element.definition() {
        for entry in scope.registrations_of(definition) {
            let closed = entry.contract().with_type(element.clone());
            if !contracts.iter().any(|(_, c)| *c == closed) {
                contracts.push((entry.id(), closed));
            }
        }
        contracts.sort_by_key(|(id, _)| *id);
    }

    #[cfg(feature = "logging")]
    trace!(
        target: "injector_runtime",
        contract = %contract,
        items = contracts.len(),
        "Resolving array"
    );

    let items = contracts
        .into_iter()
        .map(|(_, item)| resolve_contract(runtime, scope, graph, parent, item))
        .collect::<Result<Vec<Value>, Fault>>()?;
    Ok(Arc::new(items) as Value)
}

/// How well the scope can satisfy a dependency on `contract`, without
/// building anything
pub(crate) fn rank_dependency(runtime: &Runtime, scope: &Arc<Scope>, contract: &Contract) -> MatchRank {
    if scope.is_registered(contract) {
        return MatchRank::ExactMatch;
    }
    let ty = canonical(runtime, contract.ty());
    if ty.is_array() {
        return MatchRank::Compatible;
    }
    let layer = selection::final_type(&ty, |layer| scope.is_registered(&contract.with_type(layer.clone())));
    if layer != ty {
        return MatchRank::Compatible;
    }
    match runtime.provider().metadata(&ty) {
        Some(metadata) if metadata.is_constructible() => MatchRank::Compatible,
        _ => MatchRank::NoMatch,
    }
}

// =============================================================================
// Helpers
// =============================================================================

/// Convert an error returned by a user callback into a fault.
///
/// Faults raised by nested resolutions inside the callback keep their kind.
pub(crate) fn callback_fault(contract: &Contract, what: &str, error: BoxError) -> Fault {
    match error.downcast::<Fault>() {
        Ok(fault) => *fault,
        Err(error) => Fault::construction(contract, format!("{} failed: {}", what, error), error),
    }
}

#[inline]
pub(crate) fn downcast<T: Injectable>(value: Value) -> Result<Arc<T>, Value> {
    value.downcast::<T>()
}

/// Unwrap an interface view stored as `Arc<Arc<dyn I>>`
#[inline]
pub(crate) fn downcast_trait<I: ?Sized + Send + Sync + 'static>(value: Value) -> Result<Arc<I>, Value> {
    value.downcast::<Arc<I>>().map(Arc::unwrap_or_clone)
}

//! Pipeline stages
//!
//! Every pipeline runs some prefix-preserving subset of the same fixed
//! stage order. Each stage receives the frame and the rest of the chain; a
//! stage either short-circuits with a value, or calls the rest of the chain
//! and post-processes what it produced. Faults propagate with `?`, so a
//! failing stage stops everything after it.

use super::frame::{Frame, Supply};
use super::{Compiled, compiled};
use crate::contract::Contract;
use crate::engine::{self, Runtime};
use crate::error::Fault;
use crate::injection::{InjectionArg, InjectionPlan, ResolverOverride};
use crate::lifetime::{Lifetime, Resolved};
use crate::metadata::{Arguments, Directive, Member, Method, Parameter, TypeMetadata, Value};
use crate::registration::{Category, InstanceRef, Source};
use crate::scope::Scope;
use crate::selection::{self, MatchRank};
use crate::types::TypeDescriptor;
use arc_swap::ArcSwapOption;
use std::sync::Arc;

#[cfg(feature = "logging")]
use tracing::trace;

/// One step of a resolution pipeline, in execution order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    /// Return the lifetime manager's value, or build and store one
    Lifetime,
    /// Return a registered instance or call a factory
    Instance,
    /// Switch to the implementation type and upcast the result
    Mapping,
    /// Select and invoke a constructor
    Construction,
    /// Populate fields
    Fields,
    /// Populate properties
    Properties,
    /// Call injection methods
    Methods,
}

impl Stage {
    /// Stages a registration of `category` runs
    pub(crate) fn for_category(category: Category) -> Vec<Stage> {
        match category {
            Category::Instance | Category::Factory => vec![Stage::Lifetime, Stage::Instance],
            Category::TypeMapping => vec![
                Stage::Lifetime,
                Stage::Mapping,
                Stage::Construction,
                Stage::Fields,
                Stage::Properties,
                Stage::Methods,
            ],
            Category::ExplicitType => vec![
                Stage::Lifetime,
                Stage::Construction,
                Stage::Fields,
                Stage::Properties,
                Stage::Methods,
            ],
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Stage::Lifetime => "lifetime",
            Stage::Instance => "instance",
            Stage::Mapping => "mapping",
            Stage::Construction => "construction",
            Stage::Fields => "fields",
            Stage::Properties => "properties",
            Stage::Methods => "methods",
        }
    }

    /// Run this stage interpreted, selecting members on every call
    fn execute(self, frame: &mut Frame<'_>, next: Chain<'_>) -> Result<(), Fault> {
        match self {
            Stage::Lifetime => run_lifetime(frame, |frame| next.run(frame)),
            Stage::Instance => match supplied_value(frame)? {
                Some(value) => {
                    frame.value = Some(value);
                    Ok(())
                }
                None => next.run(frame),
            },
            Stage::Mapping => run_mapping(frame, |frame| next.run(frame)),
            Stage::Construction => {
                let construction = plan_for_frame(frame)?;
                construct(frame, &construction, |frame| next.run(frame))
            }
            Stage::Fields | Stage::Properties => {
                let property = self == Stage::Properties;
                if let Some(metadata) = frame.metadata.clone() {
                    let slots = plan_members(
                        frame.runtime,
                        &frame.contract,
                        &metadata,
                        members_of(frame.registration.plan(), property),
                        property,
                    )?;
                    inject_members(frame, &slots, property)?;
                }
                next.run(frame)
            }
            Stage::Methods => {
                if let Some(metadata) = frame.metadata.clone() {
                    let methods = plan_methods(
                        frame.runtime,
                        &frame.contract,
                        &metadata,
                        &frame.registration.plan().methods,
                    )?;
                    invoke_methods(frame, &methods)?;
                }
                next.run(frame)
            }
        }
    }

    /// Closure equivalent to this stage followed by `next`.
    ///
    /// Member selection is cached in the closure and reused while the
    /// registrations and metadata it was made from are unchanged. A failed
    /// selection is not cached.
    fn specialize(self, next: Compiled) -> Compiled {
        match self {
            Stage::Lifetime => compiled(move |frame| run_lifetime(frame, |frame| next(frame))),
            Stage::Instance => compiled(move |frame| match supplied_value(frame)? {
                Some(value) => {
                    frame.value = Some(value);
                    Ok(())
                }
                None => next(frame),
            }),
            Stage::Mapping => compiled(move |frame| run_mapping(frame, |frame| next(frame))),
            Stage::Construction => {
                let cache: PlanCache<Construction> = PlanCache::new();
                compiled(move |frame| {
                    let view: &Frame<'_> = frame;
                    let planned = cache.get_or_plan(view, || plan_for_frame(view))?;
                    construct(frame, &planned.plan, |frame| next(frame))
                })
            }
            Stage::Fields | Stage::Properties => {
                let property = self == Stage::Properties;
                let cache: PlanCache<Vec<MemberSlot>> = PlanCache::new();
                compiled(move |frame| {
                    if let Some(metadata) = frame.metadata.clone() {
                        let view: &Frame<'_> = frame;
                        let planned = cache.get_or_plan(view, || {
                            plan_members(
                                view.runtime,
                                &view.contract,
                                &metadata,
                                members_of(view.registration.plan(), property),
                                property,
                            )
                        })?;
                        inject_members(frame, &planned.plan, property)?;
                    }
                    next(frame)
                })
            }
            Stage::Methods => {
                let cache: PlanCache<Vec<MethodSlot>> = PlanCache::new();
                compiled(move |frame| {
                    if let Some(metadata) = frame.metadata.clone() {
                        let view: &Frame<'_> = frame;
                        let planned = cache.get_or_plan(view, || {
                            plan_methods(
                                view.runtime,
                                &view.contract,
                                &metadata,
                                &view.registration.plan().methods,
                            )
                        })?;
                        invoke_methods(frame, &planned.plan)?;
                    }
                    next(frame)
                })
            }
        }
    }
}

/// What a cached selection was made against
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Stamp {
    /// Scope dependencies were ranked in
    scope: u64,
    /// Registration versions of that scope and its ancestors
    registrations: u64,
    metadata: u64,
}

impl Stamp {
    fn of(frame: &Frame<'_>) -> Self {
        let scope = frame.dependency_scope();
        Self {
            scope: scope.id(),
            registrations: scope.chain_version(),
            metadata: frame.runtime.provider().revision(),
        }
    }
}

struct Planned<T> {
    stamp: Stamp,
    plan: T,
}

/// A selection replaced whenever the state it was made against changes
struct PlanCache<T> {
    slot: ArcSwapOption<Planned<T>>,
}

impl<T> PlanCache<T> {
    fn new() -> Self {
        Self {
            slot: ArcSwapOption::empty(),
        }
    }

    fn get_or_plan<F>(&self, frame: &Frame<'_>, plan: F) -> Result<Arc<Planned<T>>, Fault>
    where
        F: FnOnce() -> Result<T, Fault>,
    {
        let stamp = Stamp::of(frame);
        if let Some(planned) = self.slot.load_full() {
            if planned.stamp == stamp {
                return Ok(planned);
            }
        }

        #[cfg(feature = "logging")]
        trace!(
            target: "injector_runtime",
            contract = %frame.contract,
            scope = stamp.scope,
            "Selecting members for specialized pipeline"
        );

        let planned = Arc::new(Planned { stamp, plan: plan()? });
        self.slot.store(Some(Arc::clone(&planned)));
        Ok(planned)
    }
}

/// Compose `stages` into a single closure
pub(crate) fn specialize(stages: &[Stage]) -> Compiled {
    stages
        .iter()
        .rev()
        .fold(compiled(|_| Ok(())), |next, stage| stage.specialize(next))
}

/// The remaining stages of an interpreted pipeline
#[derive(Clone, Copy)]
pub(crate) struct Chain<'s> {
    stages: &'s [Stage],
}

impl<'s> Chain<'s> {
    #[inline]
    pub(crate) fn new(stages: &'s [Stage]) -> Self {
        Self { stages }
    }

    pub(crate) fn run(self, frame: &mut Frame<'_>) -> Result<(), Fault> {
        let Some((stage, rest)) = self.stages.split_first() else {
            return Ok(());
        };

        #[cfg(feature = "logging")]
        trace!(
            target: "injector_runtime",
            stage = stage.name(),
            contract = %frame.contract,
            depth = frame.depth,
            "Executing pipeline stage"
        );

        stage.execute(frame, Chain { stages: rest })
    }
}

// =============================================================================
// Lifetime
// =============================================================================

fn run_lifetime<'a, F>(frame: &mut Frame<'a>, next: F) -> Result<(), Fault>
where
    F: FnOnce(&mut Frame<'a>) -> Result<(), Fault>,
{
    let registration = Arc::clone(&frame.registration);
    let manager = registration.manager();
    let graph = frame.graph;
    let contract = frame.contract.clone();

    let resolved = manager.resolve(graph, &contract, || {
        next(frame)?;
        frame
            .value
            .take()
            .ok_or_else(|| Fault::mismatch(&contract, "pipeline completed without producing a value"))
    })?;

    match resolved {
        Resolved::Built(value) => {
            if manager.tracks_disposal() {
                track(frame, registration.lifetime());
            }
            frame.value = Some(value);
        }
        Resolved::Cached(value) => frame.value = Some(value),
    }
    Ok(())
}

/// Hand a freshly built value to the scope that disposes it
fn track(frame: &mut Frame<'_>, lifetime: Lifetime) {
    let Some(produced) = frame.produced.take() else {
        return;
    };
    let metadata = frame
        .metadata
        .clone()
        .or_else(|| frame.runtime.provider().metadata(frame.contract.ty()));
    let Some(dispose) = metadata.as_ref().and_then(|m| m.disposer()).cloned() else {
        return;
    };
    let scope = match lifetime {
        Lifetime::Singleton => frame.owner.root_of(),
        _ => Arc::clone(&frame.owner),
    };
    scope.track(&frame.contract, produced, dispose);
}

// =============================================================================
// Instance
// =============================================================================

/// Value of an instance or factory registration; `None` for built types
fn supplied_value(frame: &mut Frame<'_>) -> Result<Option<Value>, Fault> {
    let registration = Arc::clone(&frame.registration);
    match registration.source() {
        Source::Instance(InstanceRef::Strong(value)) => Ok(Some(Arc::clone(value))),
        Source::Instance(InstanceRef::Weak(weak)) => weak.upgrade().map(Some).ok_or_else(|| {
            Fault::construction(
                &frame.contract,
                "externally controlled instance has been released by its owner",
                "instance dropped".into(),
            )
        }),
        Source::Factory(factory) => {
            let value = factory(&super::Resolver::new(&*frame), &frame.contract)
                .map_err(|error| engine::callback_fault(&frame.contract, "factory", error))?;
            frame.produced = Some(Arc::clone(&value));
            Ok(Some(value))
        }
        Source::Build(_) => Ok(None),
    }
}

// =============================================================================
// Mapping
// =============================================================================

fn run_mapping<'a, F>(frame: &mut Frame<'a>, next: F) -> Result<(), Fault>
where
    F: FnOnce(&mut Frame<'a>) -> Result<(), Fault>,
{
    let Some(mapped) = frame.registration.mapped_type().cloned() else {
        return next(frame);
    };

    // The implementation has a registration of its own: resolve through it.
    let target = frame.contract.with_type(mapped.clone());
    if target != frame.contract && frame.dependency_scope().is_registered(&target) {
        #[cfg(feature = "logging")]
        trace!(
            target: "injector_runtime",
            contract = %frame.contract,
            redirect = %target,
            "Mapping redirects to registered implementation"
        );

        let value = frame.resolve(target)?;
        let value = frame.shape(value, &mapped, frame.contract.ty())?;
        frame.value = Some(value);
        return Ok(());
    }

    frame.build_type = Some(mapped.clone());
    next(frame)?;
    if let Some(value) = frame.value.take() {
        let value = frame.shape(value, &mapped, frame.contract.ty())?;
        frame.value = Some(value);
    }
    Ok(())
}

// =============================================================================
// Construction
// =============================================================================

/// A parameter with how its value is supplied
#[derive(Debug)]
pub(crate) struct ParamSlot {
    param: Parameter,
    supply: Supply,
}

/// A selected constructor and its argument slots
#[derive(Debug)]
pub(crate) struct Construction {
    metadata: Arc<TypeMetadata>,
    constructor: usize,
    slots: Vec<ParamSlot>,
}

/// Default supply for a slot: explicit argument, then directive, then resolution
fn supply_for(ty: &TypeDescriptor, arg: Option<&InjectionArg>, directive: Option<&Directive>) -> Supply {
    match (arg, directive) {
        (Some(arg), _) => Supply::Arg(arg.clone()),
        (None, Some(directive)) => Supply::Arg(InjectionArg::from_directive(ty, directive)),
        (None, None) => Supply::Resolve(Contract::new(ty.clone(), None)),
    }
}

fn selection_fault(contract: &Contract, error: selection::SelectionError) -> Fault {
    Fault::selection(contract, error.to_string())
}

/// Metadata for the type being built, or a selection fault
fn build_metadata(runtime: &Runtime, contract: &Contract, ty: &TypeDescriptor) -> Result<Arc<TypeMetadata>, Fault> {
    if !ty.kind().is_constructible() {
        return Err(selection_fault(
            contract,
            selection::SelectionError::NotConstructible {
                type_name: ty.name().to_string(),
                kind: ty.kind(),
            },
        ));
    }
    runtime.provider().metadata(ty).ok_or_else(|| {
        Fault::selection(
            contract,
            format!("{} has no metadata describing how to construct it", ty),
        )
    })
}

/// Rank one constructor parameter for selection
fn rank_parameter(
    runtime: &Runtime,
    scope: &Arc<Scope>,
    overrides: &[ResolverOverride],
    declaring: &TypeDescriptor,
    param: &Parameter,
) -> MatchRank {
    let provider = runtime.provider();
    let supply = supply_for(param.ty(), None, param.directive());
    if let Some(arg) =
        ResolverOverride::for_parameter(overrides, declaring, param.name(), param.ty(), supply.dependency_name())
    {
        return selection::match_arg(param.ty(), arg, provider);
    }
    match param.directive() {
        Some(Directive::Value(_, ty)) => selection::match_type(param.ty(), ty, provider),
        Some(Directive::Named(name)) => {
            engine::rank_dependency(runtime, scope, &Contract::new(param.ty().clone(), Some(name)))
        }
        Some(Directive::Optional(_)) => {
            engine::rank_dependency(runtime, scope, &Contract::new(param.ty().clone(), None)).max(MatchRank::Compatible)
        }
        None => engine::rank_dependency(runtime, scope, &Contract::new(param.ty().clone(), None)),
    }
}

fn plan_construction(
    runtime: &Runtime,
    scope: &Arc<Scope>,
    overrides: &[ResolverOverride],
    contract: &Contract,
    metadata: Arc<TypeMetadata>,
    plan: &InjectionPlan,
) -> Result<Construction, Fault> {
    let directive = plan.constructor.as_deref();
    let declaring = metadata.ty().clone();
    let (index, constructor) = selection::select_constructor(&metadata, directive, runtime.provider(), |param| {
        rank_parameter(runtime, scope, overrides, &declaring, param)
    })
    .map_err(|error| selection_fault(contract, error))?;

    let slots = constructor
        .parameters()
        .iter()
        .enumerate()
        .map(|(i, param)| ParamSlot {
            param: param.clone(),
            supply: supply_for(param.ty(), directive.and_then(|args| args.get(i)), param.directive()),
        })
        .collect();

    Ok(Construction {
        metadata,
        constructor: index,
        slots,
    })
}

fn plan_for_frame(frame: &Frame<'_>) -> Result<Construction, Fault> {
    let metadata = build_metadata(frame.runtime, &frame.contract, frame.target_type())?;
    plan_construction(
        frame.runtime,
        frame.dependency_scope(),
        frame.graph.overrides(),
        &frame.contract,
        metadata,
        frame.registration.plan(),
    )
}

/// Values for `slots`, honoring per-call parameter overrides
fn collect_arguments(frame: &Frame<'_>, declaring: &TypeDescriptor, slots: &[ParamSlot]) -> Result<Arguments, Fault> {
    let overrides = frame.graph.overrides();
    let mut values = Vec::with_capacity(slots.len());
    for slot in slots {
        let overriding = ResolverOverride::for_parameter(
            overrides,
            declaring,
            slot.param.name(),
            slot.param.ty(),
            slot.supply.dependency_name(),
        );
        values.push(frame.supply(slot.param.ty(), overriding, &slot.supply)?);
    }
    Ok(Arguments::new(values))
}

fn construct<'a, F>(frame: &mut Frame<'a>, construction: &Construction, next: F) -> Result<(), Fault>
where
    F: FnOnce(&mut Frame<'a>) -> Result<(), Fault>,
{
    let declaring = construction.metadata.ty();
    let constructor = construction
        .metadata
        .constructors()
        .get(construction.constructor)
        .ok_or_else(|| Fault::selection(&frame.contract, format!("{} lost its selected constructor", declaring)))?;

    let args = collect_arguments(frame, declaring, &construction.slots)?;
    let instance = constructor.invoke(args).map_err(|error| {
        engine::callback_fault(&frame.contract, &format!("constructor of {}", declaring), error)
    })?;

    #[cfg(feature = "logging")]
    trace!(
        target: "injector_runtime",
        contract = %frame.contract,
        type_name = declaring.name(),
        arguments = construction.slots.len(),
        "Constructed instance"
    );

    frame.instance = Some(instance);
    frame.metadata = Some(Arc::clone(&construction.metadata));
    next(frame)?;

    let instance = frame
        .instance
        .take()
        .ok_or_else(|| Fault::mismatch(&frame.contract, "instance was taken before construction completed"))?;
    let value: Value = Arc::from(instance);
    frame.produced = Some(Arc::clone(&value));
    frame.value = Some(value);
    Ok(())
}

// =============================================================================
// Fields, properties and methods
// =============================================================================

#[derive(Debug)]
pub(crate) struct MemberSlot {
    member: Member,
    supply: Supply,
}

#[derive(Debug)]
pub(crate) struct MethodSlot {
    method: Method,
    slots: Vec<ParamSlot>,
}

#[inline]
fn members_of(plan: &InjectionPlan, property: bool) -> &[(String, Option<InjectionArg>)] {
    if property { &plan.properties } else { &plan.fields }
}

/// Members named by the registration, then members marked for injection
fn plan_members(
    runtime: &Runtime,
    contract: &Contract,
    metadata: &TypeMetadata,
    requested: &[(String, Option<InjectionArg>)],
    property: bool,
) -> Result<Vec<MemberSlot>, Fault> {
    let (kind, members) = if property {
        ("property", metadata.properties())
    } else {
        ("field", metadata.fields())
    };
    let type_name = metadata.ty().name();

    let mut slots = Vec::with_capacity(requested.len());
    for (name, arg) in requested {
        let member = selection::select_member(type_name, members, kind, name, arg.as_ref(), runtime.provider())
            .map_err(|error| selection_fault(contract, error))?;
        slots.push(MemberSlot {
            member: member.clone(),
            supply: supply_for(member.ty(), arg.as_ref(), member.directive()),
        });
    }
    for member in members
        .iter()
        .filter(|m| m.is_injected() && !requested.iter().any(|(name, _)| name == m.name()))
    {
        slots.push(MemberSlot {
            member: member.clone(),
            supply: supply_for(member.ty(), None, member.directive()),
        });
    }
    Ok(slots)
}

fn inject_members(frame: &mut Frame<'_>, slots: &[MemberSlot], property: bool) -> Result<(), Fault> {
    let declaring = frame.target_type().clone();
    let overrides = frame.graph.overrides();
    for slot in slots {
        let overriding = ResolverOverride::for_member(
            overrides,
            &declaring,
            property,
            slot.member.name(),
            slot.member.ty(),
            slot.supply.dependency_name(),
        );
        let Some(value) = frame.supply(slot.member.ty(), overriding, &slot.supply)? else {
            continue;
        };
        let Some(instance) = frame.instance.as_mut() else {
            return Ok(());
        };
        slot.member.assign(&mut **instance, value).map_err(|error| {
            let kind = if property { "property" } else { "field" };
            engine::callback_fault(
                &frame.contract,
                &format!("{} '{}' of {}", kind, slot.member.name(), declaring),
                error,
            )
        })?;
    }
    Ok(())
}

/// Methods named by the registration, then methods marked for injection
fn plan_methods(
    runtime: &Runtime,
    contract: &Contract,
    metadata: &TypeMetadata,
    requested: &[(String, Vec<InjectionArg>)],
) -> Result<Vec<MethodSlot>, Fault> {
    let mut planned = Vec::with_capacity(requested.len());
    for (name, args) in requested {
        let method = selection::select_method(metadata, name, args, runtime.provider())
            .map_err(|error| selection_fault(contract, error))?;
        planned.push(MethodSlot {
            method: method.clone(),
            slots: method
                .parameters()
                .iter()
                .enumerate()
                .map(|(i, param)| ParamSlot {
                    param: param.clone(),
                    supply: supply_for(param.ty(), args.get(i), param.directive()),
                })
                .collect(),
        });
    }
    for method in metadata
        .methods()
        .iter()
        .filter(|m| m.is_injected() && !requested.iter().any(|(name, _)| name == m.name()))
    {
        planned.push(MethodSlot {
            method: method.clone(),
            slots: method
                .parameters()
                .iter()
                .map(|param| ParamSlot {
                    param: param.clone(),
                    supply: supply_for(param.ty(), None, param.directive()),
                })
                .collect(),
        });
    }
    Ok(planned)
}

fn invoke_methods(frame: &mut Frame<'_>, methods: &[MethodSlot]) -> Result<(), Fault> {
    let declaring = frame.target_type().clone();
    for planned in methods {
        let args = collect_arguments(frame, &declaring, &planned.slots)?;
        let Some(instance) = frame.instance.as_mut() else {
            return Ok(());
        };
        planned.method.invoke(&mut **instance, args).map_err(|error| {
            engine::callback_fault(
                &frame.contract,
                &format!("method '{}' of {}", planned.method.name(), declaring),
                error,
            )
        })?;
    }
    Ok(())
}

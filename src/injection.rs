//! Injection members and resolver overrides
//!
//! Injection members are attached to a registration and steer how its
//! type is built: which constructor to use, which fields and properties to
//! populate, which methods to call. Resolver overrides are supplied per
//! `resolve` call and replace values for the duration of that call only.

use crate::error::BoxError;
use crate::metadata::{Directive, Value};
use crate::pipeline::Resolver;
use crate::provider::Injectable;
use crate::types::TypeDescriptor;
use std::fmt;
use std::sync::Arc;

/// Callback producing an argument value at resolution time
pub type ResolverFn = Arc<dyn Fn(&Resolver<'_>) -> Result<Value, BoxError> + Send + Sync>;

/// How a single argument is supplied
#[derive(Clone)]
pub enum InjectionArg {
    /// Resolve this type, unnamed
    Type(TypeDescriptor),
    /// Resolve this type under a name
    Named(TypeDescriptor, Arc<str>),
    /// Use this literal value
    Value(Value, TypeDescriptor),
    /// Resolve if possible, otherwise use the default (if any)
    Optional(TypeDescriptor, Option<Value>),
    /// Compute the value with a callback
    Resolver(ResolverFn),
}

impl InjectionArg {
    #[inline]
    pub fn of<T: Injectable>() -> Self {
        InjectionArg::Type(TypeDescriptor::of::<T>())
    }

    #[inline]
    pub fn of_trait<I: ?Sized + 'static>() -> Self {
        InjectionArg::Type(TypeDescriptor::of_trait::<I>())
    }

    pub fn named<T: Injectable>(name: &str) -> Self {
        InjectionArg::Named(TypeDescriptor::of::<T>(), Arc::from(name))
    }

    pub fn value<T: Injectable>(value: T) -> Self {
        InjectionArg::Value(Arc::new(value), TypeDescriptor::of::<T>())
    }

    pub fn optional<T: Injectable>() -> Self {
        InjectionArg::Optional(TypeDescriptor::of::<T>(), None)
    }

    pub fn resolver<F>(callback: F) -> Self
    where
        F: Fn(&Resolver<'_>) -> Result<Value, BoxError> + Send + Sync + 'static,
    {
        InjectionArg::Resolver(Arc::new(callback))
    }

    /// Argument equivalent to a member's own directive
    pub(crate) fn from_directive(ty: &TypeDescriptor, directive: &Directive) -> Self {
        match directive {
            Directive::Value(value, value_ty) => InjectionArg::Value(Arc::clone(value), value_ty.clone()),
            Directive::Named(name) => InjectionArg::Named(ty.clone(), Arc::clone(name)),
            Directive::Optional(default) => InjectionArg::Optional(ty.clone(), default.clone()),
        }
    }

    /// Type the argument supplies, when known up front
    pub fn ty(&self) -> Option<&TypeDescriptor> {
        match self {
            InjectionArg::Type(ty)
            | InjectionArg::Named(ty, _)
            | InjectionArg::Value(_, ty)
            | InjectionArg::Optional(ty, _) => Some(ty),
            InjectionArg::Resolver(_) => None,
        }
    }
}

impl fmt::Debug for InjectionArg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InjectionArg::Type(ty) => f.debug_tuple("Type").field(&ty.name()).finish(),
            InjectionArg::Named(ty, name) => f.debug_tuple("Named").field(&ty.name()).field(name).finish(),
            InjectionArg::Value(_, ty) => f.debug_tuple("Value").field(&ty.name()).finish(),
            InjectionArg::Optional(ty, _) => f.debug_tuple("Optional").field(&ty.name()).finish(),
            InjectionArg::Resolver(_) => f.write_str("Resolver"),
        }
    }
}

/// A directive attached to a registration
#[derive(Clone, Debug)]
pub enum InjectionMember {
    /// Use the constructor whose signature matches these arguments
    Constructor(Vec<InjectionArg>),
    /// Populate a field, optionally with a specific argument
    Field(String, Option<InjectionArg>),
    /// Populate a property, optionally with a specific argument
    Property(String, Option<InjectionArg>),
    /// Call a method with these arguments
    Method(String, Vec<InjectionArg>),
}

impl InjectionMember {
    pub fn constructor(args: impl IntoIterator<Item = InjectionArg>) -> Self {
        InjectionMember::Constructor(args.into_iter().collect())
    }

    pub fn field(name: impl Into<String>) -> Self {
        InjectionMember::Field(name.into(), None)
    }

    pub fn field_with(name: impl Into<String>, arg: InjectionArg) -> Self {
        InjectionMember::Field(name.into(), Some(arg))
    }

    pub fn property(name: impl Into<String>) -> Self {
        InjectionMember::Property(name.into(), None)
    }

    pub fn property_with(name: impl Into<String>, arg: InjectionArg) -> Self {
        InjectionMember::Property(name.into(), Some(arg))
    }

    pub fn method(name: impl Into<String>, args: impl IntoIterator<Item = InjectionArg>) -> Self {
        InjectionMember::Method(name.into(), args.into_iter().collect())
    }
}

/// Injection members of one registration, grouped by stage
#[derive(Clone, Debug, Default)]
pub(crate) struct InjectionPlan {
    pub(crate) constructor: Option<Vec<InjectionArg>>,
    pub(crate) fields: Vec<(String, Option<InjectionArg>)>,
    pub(crate) properties: Vec<(String, Option<InjectionArg>)>,
    pub(crate) methods: Vec<(String, Vec<InjectionArg>)>,
}

impl InjectionPlan {
    /// Group members; `None` when more than one constructor is supplied
    pub(crate) fn from_members(members: Vec<InjectionMember>) -> Option<Self> {
        let mut plan = InjectionPlan::default();
        for member in members {
            match member {
                InjectionMember::Constructor(args) => {
                    if plan.constructor.is_some() {
                        return None;
                    }
                    plan.constructor = Some(args);
                }
                InjectionMember::Field(name, arg) => plan.fields.push((name, arg)),
                InjectionMember::Property(name, arg) => plan.properties.push((name, arg)),
                InjectionMember::Method(name, args) => plan.methods.push((name, args)),
            }
        }
        Some(plan)
    }

    #[cfg(test)]
    #[inline]
    pub(crate) fn is_empty(&self) -> bool {
        self.constructor.is_none()
            && self.fields.is_empty()
            && self.properties.is_empty()
            && self.methods.is_empty()
    }
}

// =============================================================================
// Resolver overrides
// =============================================================================

/// What a resolver override replaces
#[derive(Clone, Debug)]
pub enum OverrideTarget {
    /// A constructor or method parameter, by name
    Parameter(String),
    /// Any dependency of this type (and name)
    Dependency(TypeDescriptor, Option<Arc<str>>),
    /// A field, by name
    Field(String),
    /// A property, by name
    Property(String),
}

/// Per-call replacement of an injected value.
///
/// Overrides apply to every object built during the `resolve` call that
/// received them, optionally restricted to one declaring type.
///
/// # Examples
///
/// ```rust
/// use injector_runtime::ResolverOverride;
///
/// struct Connection;
///
/// let by_name = ResolverOverride::parameter("url", String::from("sqlite::memory:"));
/// let scoped = ResolverOverride::parameter("url", String::from("pg://"))
///     .on_type(injector_runtime::TypeDescriptor::of::<Connection>());
/// # let _ = (by_name, scoped);
/// ```
#[derive(Clone, Debug)]
pub struct ResolverOverride {
    target: OverrideTarget,
    arg: InjectionArg,
    on_type: Option<TypeDescriptor>,
}

impl ResolverOverride {
    pub fn new(target: OverrideTarget, arg: InjectionArg) -> Self {
        Self {
            target,
            arg,
            on_type: None,
        }
    }

    pub fn parameter<T: Injectable>(name: impl Into<String>, value: T) -> Self {
        Self::new(OverrideTarget::Parameter(name.into()), InjectionArg::value(value))
    }

    pub fn dependency<T: Injectable>(value: T) -> Self {
        Self::new(
            OverrideTarget::Dependency(TypeDescriptor::of::<T>(), None),
            InjectionArg::value(value),
        )
    }

    pub fn dependency_named<T: Injectable>(name: &str, value: T) -> Self {
        Self::new(
            OverrideTarget::Dependency(TypeDescriptor::of::<T>(), Some(Arc::from(name))),
            InjectionArg::value(value),
        )
    }

    pub fn field<T: Injectable>(name: impl Into<String>, value: T) -> Self {
        Self::new(OverrideTarget::Field(name.into()), InjectionArg::value(value))
    }

    pub fn property<T: Injectable>(name: impl Into<String>, value: T) -> Self {
        Self::new(OverrideTarget::Property(name.into()), InjectionArg::value(value))
    }

    /// Only apply while building `ty`
    pub fn on_type(mut self, ty: TypeDescriptor) -> Self {
        self.on_type = Some(ty);
        self
    }

    #[inline]
    pub fn target(&self) -> &OverrideTarget {
        &self.target
    }

    #[inline]
    pub fn arg(&self) -> &InjectionArg {
        &self.arg
    }

    #[inline]
    fn applies_to(&self, declaring: &TypeDescriptor) -> bool {
        self.on_type.as_ref().is_none_or(|ty| ty == declaring)
    }

    fn matches_dependency(&self, ty: &TypeDescriptor, name: Option<&str>) -> bool {
        matches!(&self.target, OverrideTarget::Dependency(t, n) if t == ty && n.as_deref() == name)
    }

    /// Override applying to a constructor or method parameter
    pub(crate) fn for_parameter<'o>(
        overrides: &'o [ResolverOverride],
        declaring: &TypeDescriptor,
        name: &str,
        ty: &TypeDescriptor,
        dependency_name: Option<&str>,
    ) -> Option<&'o InjectionArg> {
        overrides
            .iter()
            .filter(|o| o.applies_to(declaring))
            .find(|o| match &o.target {
                OverrideTarget::Parameter(param) => param == name,
                _ => o.matches_dependency(ty, dependency_name),
            })
            .map(|o| &o.arg)
    }

    /// Override applying to a field (`property == false`) or property
    pub(crate) fn for_member<'o>(
        overrides: &'o [ResolverOverride],
        declaring: &TypeDescriptor,
        property: bool,
        name: &str,
        ty: &TypeDescriptor,
        dependency_name: Option<&str>,
    ) -> Option<&'o InjectionArg> {
        overrides
            .iter()
            .filter(|o| o.applies_to(declaring))
            .find(|o| match &o.target {
                OverrideTarget::Field(field) => !property && field == name,
                OverrideTarget::Property(prop) => property && prop == name,
                _ => o.matches_dependency(ty, dependency_name),
            })
            .map(|o| &o.arg)
    }
}

//! Type metadata
//!
//! Everything the runtime needs to know about a type it composes: how to
//! construct it, which fields and properties to populate, which methods to
//! call after construction, which interfaces it can be viewed as, and how
//! to release it. Metadata is built once per type, usually through a
//! [`MetadataBuilder`] or `#[derive(Inject)]`, and shared behind an `Arc`.

use crate::error::BoxError;
use crate::provider::{Dispose, Injectable};
use crate::types::{TypeDescriptor, TypeKind};
use std::any::{Any, type_name};
use std::borrow::Cow;
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

/// A composed value as stored by the runtime.
///
/// Concrete types are stored as `Arc<T>` erased; interface views are
/// stored as `Arc<dyn Trait>` erased (so the erased value holds an
/// `Arc<Arc<dyn Trait>>`).
pub type Value = Arc<dyn Any + Send + Sync>;

/// A value under construction, before it is frozen into a [`Value`]
pub type Instance = Box<dyn Any + Send + Sync>;

pub(crate) type ConstructFn = Arc<dyn Fn(Arguments) -> Result<Instance, BoxError> + Send + Sync>;
pub(crate) type SetterFn =
    Arc<dyn Fn(&mut (dyn Any + Send + Sync), Value) -> Result<(), BoxError> + Send + Sync>;
pub(crate) type MethodFn =
    Arc<dyn Fn(&mut (dyn Any + Send + Sync), Arguments) -> Result<(), BoxError> + Send + Sync>;
pub(crate) type CastFn = Arc<dyn Fn(Value) -> Option<Value> + Send + Sync>;
pub(crate) type DisposeFn = Arc<dyn Fn(&Value) + Send + Sync>;

// =============================================================================
// Metadata provider
// =============================================================================

/// Source of type metadata for the runtime.
///
/// The default implementation is [`TypeCatalog`](crate::TypeCatalog); custom
/// providers can be plugged in through
/// [`ContainerConfig::metadata`](crate::ContainerConfig::metadata).
pub trait MetadataProvider: Send + Sync {
    /// Metadata describing `ty`, if any
    fn metadata(&self, ty: &TypeDescriptor) -> Option<Arc<TypeMetadata>>;

    /// Whether a value of `from` can stand in for `to`
    fn is_assignable(&self, from: &TypeDescriptor, to: &TypeDescriptor) -> bool;

    /// Reshape a value of `from` into the representation of `to`
    fn cast(&self, value: Value, from: &TypeDescriptor, to: &TypeDescriptor) -> Option<Value>;

    /// The closed form of `definition` over `arguments`, if one is described
    fn close_generic(
        &self,
        definition: &TypeDescriptor,
        arguments: &[TypeDescriptor],
    ) -> Option<TypeDescriptor>;

    /// Counter that changes whenever described metadata changes. Providers
    /// whose metadata never changes keep the default.
    fn revision(&self) -> u64 {
        0
    }
}

// =============================================================================
// Directives
// =============================================================================

/// How a parameter, field or property obtains its value
#[derive(Clone)]
pub enum Directive {
    /// Use this literal value
    Value(Value, TypeDescriptor),
    /// Resolve the declared type under this registration name
    Named(Arc<str>),
    /// Resolve if possible, otherwise fall back to the default (or leave unset)
    Optional(Option<Value>),
}

impl fmt::Debug for Directive {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Directive::Value(_, ty) => f.debug_tuple("Value").field(&ty.name()).finish(),
            Directive::Named(name) => f.debug_tuple("Named").field(name).finish(),
            Directive::Optional(default) => f
                .debug_tuple("Optional")
                .field(&default.is_some())
                .finish(),
        }
    }
}

// =============================================================================
// Parameters and arguments
// =============================================================================

/// A declared constructor or method parameter
#[derive(Clone, Debug)]
pub struct Parameter {
    name: Cow<'static, str>,
    ty: TypeDescriptor,
    directive: Option<Directive>,
}

impl Parameter {
    pub fn new(name: impl Into<Cow<'static, str>>, ty: TypeDescriptor) -> Self {
        Self {
            name: name.into(),
            ty,
            directive: None,
        }
    }

    /// Parameter receiving an `Arc<T>`
    #[inline]
    pub fn of<T: Injectable>(name: impl Into<Cow<'static, str>>) -> Self {
        Self::new(name, TypeDescriptor::of::<T>())
    }

    /// Parameter receiving an `Arc<dyn Trait>`
    #[inline]
    pub fn of_trait<I: ?Sized + 'static>(name: impl Into<Cow<'static, str>>) -> Self {
        Self::new(name, TypeDescriptor::of_trait::<I>())
    }

    /// Parameter receiving every registration of `T`
    #[inline]
    pub fn all<T: Injectable>(name: impl Into<Cow<'static, str>>) -> Self {
        Self::new(name, TypeDescriptor::array_of(TypeDescriptor::of::<T>()))
    }

    /// Resolve under a registration name
    pub fn named(mut self, name: &str) -> Self {
        self.directive = Some(Directive::Named(Arc::from(name)));
        self
    }

    /// Leave unset when the dependency cannot be resolved
    pub fn optional(mut self) -> Self {
        self.directive = Some(Directive::Optional(None));
        self
    }

    /// Fall back to `value` when the dependency cannot be resolved
    pub fn or_value(mut self, value: Value) -> Self {
        self.directive = Some(Directive::Optional(Some(value)));
        self
    }

    /// Always receive this literal value
    pub fn with_value<V: Injectable>(mut self, value: V) -> Self {
        self.directive = Some(Directive::Value(Arc::new(value), TypeDescriptor::of::<V>()));
        self
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[inline]
    pub fn ty(&self) -> &TypeDescriptor {
        &self.ty
    }

    #[inline]
    pub fn directive(&self) -> Option<&Directive> {
        self.directive.as_ref()
    }
}

/// Values supplied to a constructor or method, in parameter order.
pub struct Arguments {
    values: Vec<Option<Value>>,
}

impl Arguments {
    pub fn new(values: Vec<Option<Value>>) -> Self {
        Self { values }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Take the erased value at `index`
    #[inline]
    pub fn raw(&mut self, index: usize) -> Option<Value> {
        self.values.get_mut(index).and_then(Option::take)
    }

    /// Take a required concrete argument
    pub fn take<T: Injectable>(&mut self, index: usize) -> Result<Arc<T>, BoxError> {
        match self.take_optional::<T>(index)? {
            Some(value) => Ok(value),
            None => Err(format!("argument {} ({}) was not supplied", index, type_name::<T>()).into()),
        }
    }

    /// Take an optional concrete argument
    pub fn take_optional<T: Injectable>(&mut self, index: usize) -> Result<Option<Arc<T>>, BoxError> {
        match self.raw(index) {
            None => Ok(None),
            Some(value) => value
                .downcast::<T>()
                .map(Some)
                .map_err(|_| format!("argument {} is not a {}", index, type_name::<T>()).into()),
        }
    }

    /// Take a required interface argument
    pub fn take_trait<I: ?Sized + Send + Sync + 'static>(
        &mut self,
        index: usize,
    ) -> Result<Arc<I>, BoxError> {
        match self.take_trait_optional::<I>(index)? {
            Some(value) => Ok(value),
            None => Err(format!("argument {} ({}) was not supplied", index, type_name::<I>()).into()),
        }
    }

    /// Take an optional interface argument
    pub fn take_trait_optional<I: ?Sized + Send + Sync + 'static>(
        &mut self,
        index: usize,
    ) -> Result<Option<Arc<I>>, BoxError> {
        match self.raw(index) {
            None => Ok(None),
            Some(value) => value
                .downcast::<Arc<I>>()
                .map(|view| Some(Arc::unwrap_or_clone(view)))
                .map_err(|_| format!("argument {} is not an Arc<{}>", index, type_name::<I>()).into()),
        }
    }

    /// Take an array argument holding every registration of `T`
    pub fn take_all<T: Injectable>(&mut self, index: usize) -> Result<Vec<Arc<T>>, BoxError> {
        let Some(value) = self.raw(index) else {
            return Ok(Vec::new());
        };
        let items = value
            .downcast::<Vec<Value>>()
            .map_err(|_| format!("argument {} is not an array", index))?;
        items
            .iter()
            .map(|item| {
                Arc::clone(item)
                    .downcast::<T>()
                    .map_err(|_| format!("array item is not a {}", type_name::<T>()).into())
            })
            .collect()
    }
}

// =============================================================================
// Members
// =============================================================================

/// A constructor the runtime may select
#[derive(Clone)]
pub struct Constructor {
    params: Vec<Parameter>,
    invoke: ConstructFn,
    preferred: bool,
}

impl Constructor {
    pub fn new<T, F>(params: impl IntoIterator<Item = Parameter>, build: F) -> Self
    where
        T: Injectable,
        F: Fn(Arguments) -> Result<T, BoxError> + Send + Sync + 'static,
    {
        Self {
            params: params.into_iter().collect(),
            invoke: Arc::new(move |args| build(args).map(|value| Box::new(value) as Instance)),
            preferred: false,
        }
    }

    /// Mark as the preferred constructor, bypassing ranking
    pub fn preferred(mut self) -> Self {
        self.preferred = true;
        self
    }

    #[inline]
    pub fn parameters(&self) -> &[Parameter] {
        &self.params
    }

    #[inline]
    pub fn is_preferred(&self) -> bool {
        self.preferred
    }

    #[inline]
    pub(crate) fn invoke(&self, args: Arguments) -> Result<Instance, BoxError> {
        (self.invoke)(args)
    }
}

impl fmt::Debug for Constructor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Constructor")
            .field("params", &self.params)
            .field("preferred", &self.preferred)
            .finish()
    }
}

/// A field or property that can be populated after construction
#[derive(Clone)]
pub struct Member {
    name: Cow<'static, str>,
    ty: TypeDescriptor,
    directive: Option<Directive>,
    inject: bool,
    setter: SetterFn,
}

impl Member {
    /// Member holding an `Arc<V>`
    pub fn of<T, V, F>(name: impl Into<Cow<'static, str>>, set: F) -> Self
    where
        T: Injectable,
        V: Injectable,
        F: Fn(&mut T, Arc<V>) + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            ty: TypeDescriptor::of::<V>(),
            directive: None,
            inject: false,
            setter: Arc::new(move |target, value| {
                let target = target
                    .downcast_mut::<T>()
                    .ok_or_else(|| format!("target is not a {}", type_name::<T>()))?;
                let value = value
                    .downcast::<V>()
                    .map_err(|_| format!("value is not a {}", type_name::<V>()))?;
                set(target, value);
                Ok(())
            }),
        }
    }

    /// Member holding an `Arc<dyn Trait>`
    pub fn of_trait<T, I, F>(name: impl Into<Cow<'static, str>>, set: F) -> Self
    where
        T: Injectable,
        I: ?Sized + Send + Sync + 'static,
        F: Fn(&mut T, Arc<I>) + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            ty: TypeDescriptor::of_trait::<I>(),
            directive: None,
            inject: false,
            setter: Arc::new(move |target, value| {
                let target = target
                    .downcast_mut::<T>()
                    .ok_or_else(|| format!("target is not a {}", type_name::<T>()))?;
                let view = value
                    .downcast::<Arc<I>>()
                    .map_err(|_| format!("value is not an Arc<{}>", type_name::<I>()))?;
                set(target, Arc::unwrap_or_clone(view));
                Ok(())
            }),
        }
    }

    /// Populate this member on every build, not only when requested
    pub fn inject(mut self) -> Self {
        self.inject = true;
        self
    }

    pub fn named(mut self, name: &str) -> Self {
        self.directive = Some(Directive::Named(Arc::from(name)));
        self
    }

    pub fn optional(mut self) -> Self {
        self.directive = Some(Directive::Optional(None));
        self
    }

    pub fn with_value<V: Injectable>(mut self, value: V) -> Self {
        self.directive = Some(Directive::Value(Arc::new(value), TypeDescriptor::of::<V>()));
        self
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[inline]
    pub fn ty(&self) -> &TypeDescriptor {
        &self.ty
    }

    #[inline]
    pub fn directive(&self) -> Option<&Directive> {
        self.directive.as_ref()
    }

    #[inline]
    pub fn is_injected(&self) -> bool {
        self.inject
    }

    #[inline]
    pub(crate) fn assign(&self, target: &mut (dyn Any + Send + Sync), value: Value) -> Result<(), BoxError> {
        (self.setter)(target, value)
    }
}

impl fmt::Debug for Member {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Member")
            .field("name", &self.name)
            .field("type", &self.ty.name())
            .field("inject", &self.inject)
            .finish()
    }
}

/// A method called on the built instance
#[derive(Clone)]
pub struct Method {
    name: Cow<'static, str>,
    params: Vec<Parameter>,
    inject: bool,
    invoke: MethodFn,
}

impl Method {
    pub fn new<T, F>(
        name: impl Into<Cow<'static, str>>,
        params: impl IntoIterator<Item = Parameter>,
        call: F,
    ) -> Self
    where
        T: Injectable,
        F: Fn(&mut T, Arguments) -> Result<(), BoxError> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            params: params.into_iter().collect(),
            inject: false,
            invoke: Arc::new(move |target, args| {
                let target = target
                    .downcast_mut::<T>()
                    .ok_or_else(|| format!("target is not a {}", type_name::<T>()))?;
                call(target, args)
            }),
        }
    }

    /// Call this method on every build, not only when requested
    pub fn inject(mut self) -> Self {
        self.inject = true;
        self
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[inline]
    pub fn parameters(&self) -> &[Parameter] {
        &self.params
    }

    #[inline]
    pub fn is_injected(&self) -> bool {
        self.inject
    }

    #[inline]
    pub(crate) fn invoke(&self, target: &mut (dyn Any + Send + Sync), args: Arguments) -> Result<(), BoxError> {
        (self.invoke)(target, args)
    }
}

impl fmt::Debug for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Method")
            .field("name", &self.name)
            .field("params", &self.params)
            .field("inject", &self.inject)
            .finish()
    }
}

#[derive(Clone)]
pub(crate) struct Upcast {
    pub(crate) target: TypeDescriptor,
    pub(crate) cast: CastFn,
}

// =============================================================================
// Type metadata
// =============================================================================

/// Complete description of how to compose one type
#[derive(Clone)]
pub struct TypeMetadata {
    ty: TypeDescriptor,
    constructors: Vec<Constructor>,
    fields: Vec<Member>,
    properties: Vec<Member>,
    methods: Vec<Method>,
    upcasts: Vec<Upcast>,
    disposer: Option<DisposeFn>,
}

impl TypeMetadata {
    /// Empty metadata for a type (no constructors, nothing to inject)
    pub fn new(ty: TypeDescriptor) -> Self {
        Self {
            ty,
            constructors: Vec::new(),
            fields: Vec::new(),
            properties: Vec::new(),
            methods: Vec::new(),
            upcasts: Vec::new(),
            disposer: None,
        }
    }

    #[inline]
    pub fn ty(&self) -> &TypeDescriptor {
        &self.ty
    }

    #[inline]
    pub fn constructors(&self) -> &[Constructor] {
        &self.constructors
    }

    #[inline]
    pub fn fields(&self) -> &[Member] {
        &self.fields
    }

    #[inline]
    pub fn properties(&self) -> &[Member] {
        &self.properties
    }

    #[inline]
    pub fn methods(&self) -> &[Method] {
        &self.methods
    }

    /// Interfaces this type declares it can be viewed as
    pub fn implements(&self) -> impl Iterator<Item = &TypeDescriptor> {
        self.upcasts.iter().map(|u| &u.target)
    }

    /// Whether the runtime can build this type without a registration
    #[inline]
    pub fn is_constructible(&self) -> bool {
        self.ty.kind() == TypeKind::Concrete && !self.constructors.is_empty()
    }

    #[inline]
    pub fn is_disposable(&self) -> bool {
        self.disposer.is_some()
    }

    #[inline]
    pub(crate) fn disposer(&self) -> Option<&DisposeFn> {
        self.disposer.as_ref()
    }

    #[inline]
    pub(crate) fn upcasts(&self) -> &[Upcast] {
        &self.upcasts
    }
}

impl fmt::Debug for TypeMetadata {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TypeMetadata")
            .field("type", &self.ty.name())
            .field("constructors", &self.constructors.len())
            .field("fields", &self.fields.len())
            .field("properties", &self.properties.len())
            .field("methods", &self.methods.len())
            .field("implements", &self.upcasts.len())
            .field("disposable", &self.disposer.is_some())
            .finish()
    }
}

/// Typed builder for [`TypeMetadata`].
///
/// # Examples
///
/// ```rust
/// use injector_runtime::{MetadataBuilder, Parameter, Member};
/// use std::sync::Arc;
///
/// trait Greeter: Send + Sync { fn greet(&self) -> String; }
///
/// #[derive(Default)]
/// struct English { punctuation: Option<Arc<String>> }
///
/// impl Greeter for English {
///     fn greet(&self) -> String { "hello".into() }
/// }
///
/// let meta = MetadataBuilder::<English>::new()
///     .constructor([], |_| Ok(English::default()))
///     .property(Member::of::<English, String, _>("punctuation", |e, p| e.punctuation = Some(p)))
///     .implements::<dyn Greeter>(|e| e)
///     .finish();
///
/// assert_eq!(meta.constructors().len(), 1);
/// assert_eq!(meta.implements().count(), 1);
/// ```
pub struct MetadataBuilder<T> {
    meta: TypeMetadata,
    _marker: PhantomData<fn() -> T>,
}

impl<T: Injectable> Default for MetadataBuilder<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Injectable> MetadataBuilder<T> {
    pub fn new() -> Self {
        Self {
            meta: TypeMetadata::new(TypeDescriptor::of::<T>()),
            _marker: PhantomData,
        }
    }

    pub fn kind(mut self, kind: TypeKind) -> Self {
        self.meta.ty = self.meta.ty.with_kind(kind);
        self
    }

    /// Declare `T` as the closed form of an open generic definition
    pub fn closes(mut self, definition: TypeDescriptor, arguments: Vec<TypeDescriptor>) -> Self {
        self.meta.ty = self.meta.ty.closing(definition, arguments);
        self
    }

    pub fn constructor<F>(mut self, params: impl IntoIterator<Item = Parameter>, build: F) -> Self
    where
        F: Fn(Arguments) -> Result<T, BoxError> + Send + Sync + 'static,
    {
        self.meta.constructors.push(Constructor::new(params, build));
        self
    }

    /// Add a constructor that is always selected when no directive applies
    pub fn preferred_constructor<F>(mut self, params: impl IntoIterator<Item = Parameter>, build: F) -> Self
    where
        F: Fn(Arguments) -> Result<T, BoxError> + Send + Sync + 'static,
    {
        self.meta.constructors.push(Constructor::new(params, build).preferred());
        self
    }

    pub fn field(mut self, member: Member) -> Self {
        self.meta.fields.push(member);
        self
    }

    pub fn property(mut self, member: Member) -> Self {
        self.meta.properties.push(member);
        self
    }

    pub fn method(mut self, method: Method) -> Self {
        self.meta.methods.push(method);
        self
    }

    /// Declare that `T` can be viewed as the interface `I`
    pub fn implements<I>(mut self, cast: fn(Arc<T>) -> Arc<I>) -> Self
    where
        I: ?Sized + Send + Sync + 'static,
    {
        let target = TypeDescriptor::of_trait::<I>();
        self.meta.upcasts.retain(|u| u.target != target);
        self.meta.upcasts.push(Upcast {
            target,
            cast: Arc::new(move |value: Value| {
                value
                    .downcast::<T>()
                    .ok()
                    .map(|concrete| Arc::new(cast(concrete)) as Value)
            }),
        });
        self
    }

    /// Release through [`Dispose`] when the owning container is disposed
    pub fn disposable(self) -> Self
    where
        T: Dispose,
    {
        self.on_dispose(T::dispose)
    }

    pub fn on_dispose<F>(mut self, dispose: F) -> Self
    where
        F: Fn(&T) + Send + Sync + 'static,
    {
        self.meta.disposer = Some(Arc::new(move |value: &Value| {
            if let Some(target) = value.downcast_ref::<T>() {
                dispose(target);
            }
        }));
        self
    }

    pub fn finish(self) -> TypeMetadata {
        self.meta
    }
}

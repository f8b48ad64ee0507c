//! Runtime type descriptors
//!
//! Rust erases generics at compile time, so the runtime carries its own
//! description of the types it composes. A [`TypeDescriptor`] identifies a
//! type, records what kind of type it is (concrete, trait object, open
//! generic definition, array) and links closed generics back to their
//! definition and arguments.
//!
//! Descriptors are cheap to clone and compare: equality is by identity key,
//! and the hash is computed once when the descriptor is created.

use ahash::RandomState;
use once_cell::sync::Lazy;
use std::any::{Any, TypeId, type_name};
use std::borrow::Cow;
use std::fmt;
use std::hash::{BuildHasher, Hash, Hasher};
use std::sync::Arc;

/// Fixed-seed hasher so contract hashes are stable for the process lifetime.
static STABLE: Lazy<RandomState> = Lazy::new(|| {
    RandomState::with_seeds(
        0x243f_6a88_85a3_08d3,
        0x1319_8a2e_0370_7344,
        0xa409_3822_299f_31d0,
        0x082e_fa98_ec4e_6c89,
    )
});

/// Hash a value with the process-stable hasher.
#[inline]
pub(crate) fn stable_hash<T: Hash + ?Sized>(value: &T) -> u64 {
    STABLE.hash_one(value)
}

/// What kind of type a descriptor stands for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TypeKind {
    /// A struct or enum that can be constructed
    Concrete,
    /// A trait object (`dyn Trait`)
    Interface,
    /// A type that is described but never built directly
    Abstract,
    /// A callable type
    Delegate,
    /// An open generic definition, closed by supplying type arguments
    GenericDefinition,
    /// A collection of every registration of an element type
    Array,
}

impl TypeKind {
    /// Whether a constructor may be selected for this kind
    #[inline]
    pub fn is_constructible(self) -> bool {
        matches!(self, TypeKind::Concrete)
    }
}

/// Identity of a described type
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TypeKey {
    /// A real Rust type (including marker types for open generics)
    Native(TypeId),
    /// An array of the element type
    ArrayOf(Arc<TypeKey>),
}

#[derive(Clone)]
struct TypeInfo {
    key: TypeKey,
    name: Cow<'static, str>,
    kind: TypeKind,
    /// `TypeId` of the value a resolution of this type yields
    carrier: Option<TypeId>,
    definition: Option<TypeDescriptor>,
    arguments: Vec<TypeDescriptor>,
    element: Option<TypeDescriptor>,
    hash: u64,
}

/// Runtime description of a type.
///
/// # Examples
///
/// ```
/// use injector_runtime::{TypeDescriptor, TypeKind};
///
/// trait Logger: Send + Sync {}
/// struct Console;
///
/// let console = TypeDescriptor::of::<Console>();
/// let logger = TypeDescriptor::of_trait::<dyn Logger>();
///
/// assert_eq!(console.kind(), TypeKind::Concrete);
/// assert_eq!(logger.kind(), TypeKind::Interface);
/// assert_ne!(console, logger);
/// ```
#[derive(Clone)]
pub struct TypeDescriptor(Arc<TypeInfo>);

impl TypeDescriptor {
    fn build(
        key: TypeKey,
        name: Cow<'static, str>,
        kind: TypeKind,
        carrier: Option<TypeId>,
    ) -> Self {
        let hash = stable_hash(&key);
        Self(Arc::new(TypeInfo {
            key,
            name,
            kind,
            carrier,
            definition: None,
            arguments: Vec::new(),
            element: None,
            hash,
        }))
    }

    /// Descriptor for a concrete Rust type
    #[inline]
    pub fn of<T: Any>() -> Self {
        Self::build(
            TypeKey::Native(TypeId::of::<T>()),
            Cow::Borrowed(type_name::<T>()),
            TypeKind::Concrete,
            Some(TypeId::of::<T>()),
        )
    }

    /// Descriptor for a trait object such as `dyn Logger`.
    ///
    /// Values resolved for an interface are carried as `Arc<dyn Trait>`
    /// inside the erased value.
    #[inline]
    pub fn of_trait<T: ?Sized + 'static>() -> Self {
        Self::build(
            TypeKey::Native(TypeId::of::<T>()),
            Cow::Borrowed(type_name::<T>()),
            TypeKind::Interface,
            Some(TypeId::of::<Arc<T>>()),
        )
    }

    /// Descriptor for an open generic definition.
    ///
    /// `M` is a marker type standing for the definition itself; closed
    /// forms are linked back to it with [`TypeDescriptor::closing`].
    pub fn generic_definition<M: Any>(name: &'static str) -> Self {
        Self::build(
            TypeKey::Native(TypeId::of::<M>()),
            Cow::Borrowed(name),
            TypeKind::GenericDefinition,
            None,
        )
    }

    /// Descriptor for an array of every registration of `element`
    pub fn array_of(element: TypeDescriptor) -> Self {
        let key = TypeKey::ArrayOf(Arc::new(element.key().clone()));
        let name = Cow::Owned(format!("[{}]", element.name()));
        let mut desc = Self::build(key, name, TypeKind::Array, Some(TypeId::of::<Vec<crate::Value>>()));
        if let Some(info) = Arc::get_mut(&mut desc.0) {
            info.element = Some(element);
        }
        desc
    }

    /// Mark this descriptor as the closed form of `definition` over `arguments`
    pub fn closing(mut self, definition: TypeDescriptor, arguments: Vec<TypeDescriptor>) -> Self {
        let info = Arc::make_mut(&mut self.0);
        info.definition = Some(definition);
        info.arguments = arguments;
        self
    }

    /// Override the kind, e.g. to mark a described type as abstract
    pub fn with_kind(mut self, kind: TypeKind) -> Self {
        Arc::make_mut(&mut self.0).kind = kind;
        self
    }

    #[inline]
    pub fn key(&self) -> &TypeKey {
        &self.0.key
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.0.name
    }

    #[inline]
    pub fn kind(&self) -> TypeKind {
        self.0.kind
    }

    /// `TypeId` of the erased value produced for this type, when known
    #[inline]
    pub fn carrier(&self) -> Option<TypeId> {
        self.0.carrier
    }

    /// Open definition this closed generic was built from
    #[inline]
    pub fn definition(&self) -> Option<&TypeDescriptor> {
        self.0.definition.as_ref()
    }

    #[inline]
    pub fn arguments(&self) -> &[TypeDescriptor] {
        &self.0.arguments
    }

    #[inline]
    pub fn element(&self) -> Option<&TypeDescriptor> {
        self.0.element.as_ref()
    }

    #[inline]
    pub fn is_generic_definition(&self) -> bool {
        self.0.kind == TypeKind::GenericDefinition
    }

    #[inline]
    pub fn is_closed_generic(&self) -> bool {
        self.0.definition.is_some()
    }

    #[inline]
    pub fn is_array(&self) -> bool {
        self.0.kind == TypeKind::Array
    }

    #[inline]
    pub fn hash_code(&self) -> u64 {
        self.0.hash
    }
}

impl PartialEq for TypeDescriptor {
    #[inline]
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0) || (self.0.hash == other.0.hash && self.0.key == other.0.key)
    }
}

impl Eq for TypeDescriptor {}

impl Hash for TypeDescriptor {
    #[inline]
    fn hash<H: Hasher>(&self, state: &mut H) {
        state.write_u64(self.0.hash);
    }
}

impl fmt::Display for TypeDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0.name)
    }
}

impl fmt::Debug for TypeDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TypeDescriptor")
            .field("name", &self.0.name)
            .field("kind", &self.0.kind)
            .finish()
    }
}

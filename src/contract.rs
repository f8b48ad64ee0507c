//! Contracts: the identity of a registration
//!
//! A contract is a `(type, optional name)` pair. Two contracts are equal iff
//! both parts are equal; the hash is computed once at construction so table
//! lookups never rehash.

use crate::types::{TypeDescriptor, stable_hash};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

/// Identity of a registration: a type plus an optional name.
///
/// # Examples
///
/// ```
/// use injector_runtime::Contract;
///
/// struct Database;
///
/// let primary = Contract::named::<Database>("primary");
/// let default = Contract::of::<Database>();
///
/// assert_ne!(primary, default);
/// assert_eq!(primary, Contract::named::<Database>("primary"));
/// ```
#[derive(Clone)]
pub struct Contract {
    ty: TypeDescriptor,
    name: Option<Arc<str>>,
    hash: u64,
}

impl Contract {
    pub fn new(ty: TypeDescriptor, name: Option<&str>) -> Self {
        let name: Option<Arc<str>> = name.map(Arc::from);
        let hash = combine(ty.hash_code(), name.as_deref());
        Self { ty, name, hash }
    }

    /// Unnamed contract for a concrete type
    #[inline]
    pub fn of<T: Send + Sync + 'static>() -> Self {
        Self::new(TypeDescriptor::of::<T>(), None)
    }

    /// Named contract for a concrete type
    #[inline]
    pub fn named<T: Send + Sync + 'static>(name: &str) -> Self {
        Self::new(TypeDescriptor::of::<T>(), Some(name))
    }

    #[inline]
    pub fn ty(&self) -> &TypeDescriptor {
        &self.ty
    }

    #[inline]
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    #[inline]
    pub fn hash_code(&self) -> u64 {
        self.hash
    }

    /// Same name, different type
    pub fn with_type(&self, ty: TypeDescriptor) -> Self {
        let hash = combine(ty.hash_code(), self.name.as_deref());
        Self {
            ty,
            name: self.name.clone(),
            hash,
        }
    }
}

#[inline]
fn combine(type_hash: u64, name: Option<&str>) -> u64 {
    match name {
        None => type_hash,
        Some(name) => type_hash.rotate_left(29) ^ stable_hash(name),
    }
}

impl PartialEq for Contract {
    #[inline]
    fn eq(&self, other: &Self) -> bool {
        self.hash == other.hash && self.ty == other.ty && self.name == other.name
    }
}

impl Eq for Contract {}

impl Hash for Contract {
    #[inline]
    fn hash<H: Hasher>(&self, state: &mut H) {
        state.write_u64(self.hash);
    }
}

impl fmt::Display for Contract {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.name {
            Some(name) => write!(f, "{}[\"{}\"]", self.ty.name(), name),
            None => f.write_str(self.ty.name()),
        }
    }
}

impl fmt::Debug for Contract {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Contract")
            .field("type", &self.ty.name())
            .field("name", &self.name)
            .finish()
    }
}

//! Default metadata provider
//!
//! Uses `DashMap` with `ahash` so metadata can be described from any thread
//! while resolutions read it concurrently.

use crate::metadata::{CastFn, MetadataProvider, TypeMetadata, Value};
use crate::provider::Describe;
use crate::types::{TypeDescriptor, TypeKey};
use ahash::RandomState;
use dashmap::DashMap;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

#[cfg(feature = "logging")]
use tracing::debug;

type ClosingKey = (TypeKey, Vec<TypeKey>);

/// Thread-safe catalog of type metadata.
///
/// Each container runtime owns one catalog; child containers share their
/// root's catalog.
///
/// # Examples
///
/// ```rust
/// use injector_runtime::{MetadataBuilder, MetadataProvider, TypeCatalog, TypeDescriptor};
///
/// struct Clock;
///
/// let catalog = TypeCatalog::new();
/// catalog.add(MetadataBuilder::<Clock>::new().constructor([], |_| Ok(Clock)).finish());
///
/// assert!(catalog.metadata(&TypeDescriptor::of::<Clock>()).is_some());
/// ```
pub struct TypeCatalog {
    types: DashMap<TypeKey, Arc<TypeMetadata>, RandomState>,
    casts: DashMap<(TypeKey, TypeKey), CastFn, RandomState>,
    closed: DashMap<ClosingKey, TypeDescriptor, RandomState>,
    revision: AtomicU64,
}

impl TypeCatalog {
    /// Create an empty catalog.
    ///
    /// Uses 8 shards: catalogs are written rarely and read on every build.
    pub fn new() -> Self {
        Self {
            types: DashMap::with_capacity_and_hasher_and_shard_amount(0, RandomState::new(), 8),
            casts: DashMap::with_capacity_and_hasher_and_shard_amount(0, RandomState::new(), 8),
            closed: DashMap::with_capacity_and_hasher_and_shard_amount(0, RandomState::new(), 8),
            revision: AtomicU64::new(0),
        }
    }

    /// Add (or replace) metadata for a type
    pub fn add(&self, metadata: TypeMetadata) {
        let ty = metadata.ty().clone();

        #[cfg(feature = "logging")]
        debug!(
            target: "injector_runtime",
            type_name = ty.name(),
            constructors = metadata.constructors().len(),
            implements = metadata.upcasts().len(),
            "Describing type"
        );

        for upcast in metadata.upcasts() {
            self.casts
                .insert((ty.key().clone(), upcast.target.key().clone()), Arc::clone(&upcast.cast));
        }
        if let Some(definition) = ty.definition() {
            let arguments = ty.arguments().iter().map(|a| a.key().clone()).collect();
            self.closed
                .insert((definition.key().clone(), arguments), ty.clone());
        }
        self.types.insert(ty.key().clone(), Arc::new(metadata));
        self.revision.fetch_add(1, Ordering::Release);
    }

    /// Add metadata generated by [`Describe`]
    #[inline]
    pub fn describe<T: Describe>(&self) {
        self.add(T::describe());
    }

    #[inline]
    pub fn contains(&self, ty: &TypeDescriptor) -> bool {
        self.types.contains_key(ty.key())
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.types.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }
}

impl Default for TypeCatalog {
    fn default() -> Self {
        Self::new()
    }
}

impl MetadataProvider for TypeCatalog {
    #[inline]
    fn metadata(&self, ty: &TypeDescriptor) -> Option<Arc<TypeMetadata>> {
        self.types.get(ty.key()).map(|m| Arc::clone(m.value()))
    }

    fn is_assignable(&self, from: &TypeDescriptor, to: &TypeDescriptor) -> bool {
        if from == to {
            return true;
        }
        if to.is_generic_definition() && from.definition() == Some(to) {
            return true;
        }
        if let (Some(from_elem), Some(to_elem)) = (from.element(), to.element()) {
            return self.is_assignable(from_elem, to_elem);
        }
        self.casts
            .contains_key(&(from.key().clone(), to.key().clone()))
    }

    fn cast(&self, value: Value, from: &TypeDescriptor, to: &TypeDescriptor) -> Option<Value> {
        if from == to {
            return Some(value);
        }
        let cast = self
            .casts
            .get(&(from.key().clone(), to.key().clone()))
            .map(|c| Arc::clone(c.value()))?;
        cast(value)
    }

    fn close_generic(
        &self,
        definition: &TypeDescriptor,
        arguments: &[TypeDescriptor],
    ) -> Option<TypeDescriptor> {
        let key = (
            definition.key().clone(),
            arguments.iter().map(|a| a.key().clone()).collect::<Vec<_>>(),
        );
        self.closed.get(&key).map(|d| d.value().clone())
    }

    #[inline]
    fn revision(&self) -> u64 {
        self.revision.load(Ordering::Acquire)
    }
}

impl fmt::Debug for TypeCatalog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TypeCatalog")
            .field("types", &self.types.len())
            .field("casts", &self.casts.len())
            .field("closed_generics", &self.closed.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::MetadataBuilder;
    use std::marker::PhantomData;

    trait Store: Send + Sync {}

    struct Memory;
    impl Store for Memory {}

    struct Repo<T>(PhantomData<fn() -> T>);
    struct RepoDef;

    #[test]
    fn test_upcast_registered_as_cast() {
        let catalog = TypeCatalog::new();
        catalog.add(
            MetadataBuilder::<Memory>::new()
                .constructor([], |_| Ok(Memory))
                .implements::<dyn Store>(|m| m)
                .finish(),
        );

        let memory = TypeDescriptor::of::<Memory>();
        let store = TypeDescriptor::of_trait::<dyn Store>();

        assert!(catalog.is_assignable(&memory, &store));
        assert!(!catalog.is_assignable(&store, &memory));

        let value: Value = Arc::new(Memory);
        let view = catalog.cast(value, &memory, &store).unwrap();
        assert!(view.downcast::<Arc<dyn Store>>().is_ok());
    }

    #[test]
    fn test_close_generic_lookup() {
        let catalog = TypeCatalog::new();
        let def = TypeDescriptor::generic_definition::<RepoDef>("Repo<>");
        catalog.add(
            MetadataBuilder::<Repo<Memory>>::new()
                .closes(def.clone(), vec![TypeDescriptor::of::<Memory>()])
                .constructor([], |_| Ok(Repo(PhantomData)))
                .finish(),
        );

        let closed = catalog
            .close_generic(&def, &[TypeDescriptor::of::<Memory>()])
            .unwrap();
        assert_eq!(closed, TypeDescriptor::of::<Repo<Memory>>());
        assert!(catalog.is_assignable(&closed, &def));
        assert!(catalog.close_generic(&def, &[TypeDescriptor::of::<String>()]).is_none());
    }

    #[test]
    fn test_replace_metadata() {
        let catalog = TypeCatalog::new();
        catalog.add(MetadataBuilder::<Memory>::new().finish());
        let first = catalog.revision();
        catalog.add(MetadataBuilder::<Memory>::new().constructor([], |_| Ok(Memory)).finish());

        assert!(catalog.revision() > first);
        assert_eq!(catalog.len(), 1);
        let meta = catalog.metadata(&TypeDescriptor::of::<Memory>()).unwrap();
        assert_eq!(meta.constructors().len(), 1);
    }
}

//! Traits implemented by composable types
//!
//! These traits define what types can be composed, how their construction
//! is described to the runtime, and how they release resources.

use crate::metadata::TypeMetadata;
use std::any::TypeId;

/// Marker trait for types that can be composed by the container.
///
/// This is automatically implemented for all types that are `Send + Sync + 'static`.
/// You never need to implement this manually.
pub trait Injectable: Send + Sync + 'static {
    /// Returns the TypeId of this type (for internal use)
    #[inline]
    fn type_id_of() -> TypeId
    where
        Self: Sized,
    {
        TypeId::of::<Self>()
    }

    /// Returns the type name for debugging
    #[inline]
    fn type_name_of() -> &'static str
    where
        Self: Sized,
    {
        std::any::type_name::<Self>()
    }
}

impl<T: Send + Sync + 'static> Injectable for T {}

/// Types that can describe their own construction.
///
/// Implemented by hand with a [`MetadataBuilder`](crate::MetadataBuilder),
/// or generated by `#[derive(Inject)]` with the `derive` feature.
///
/// # Examples
///
/// ```rust
/// use injector_runtime::{Arguments, Describe, MetadataBuilder, Parameter, TypeMetadata};
/// use std::sync::Arc;
///
/// struct Config { url: String }
/// struct Database { config: Arc<Config> }
///
/// impl Describe for Database {
///     fn describe() -> TypeMetadata {
///         MetadataBuilder::<Self>::new()
///             .constructor([Parameter::of::<Config>("config")], |mut args: Arguments| {
///                 Ok(Database { config: args.take(0)? })
///             })
///             .finish()
///     }
/// }
/// ```
pub trait Describe: Injectable + Sized {
    fn describe() -> TypeMetadata;
}

/// Types holding resources that must be released when their owning
/// container is disposed.
pub trait Dispose: Injectable {
    fn dispose(&self);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Clone)]
    struct TestService;

    #[test]
    fn test_injectable_auto_impl() {
        fn accepts_injectable<T: Injectable>() {}
        accepts_injectable::<TestService>();
        accepts_injectable::<String>();
        accepts_injectable::<Vec<u8>>();
    }

    #[test]
    fn test_type_name() {
        assert!(TestService::type_name_of().contains("TestService"));
        assert_eq!(TestService::type_id_of(), TypeId::of::<TestService>());
    }
}

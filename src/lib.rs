//! # injector-runtime - Object Composition for Rust
//!
//! A runtime that builds object graphs from registrations. Types describe
//! how they are constructed; the container selects constructors, resolves
//! their dependencies and caches results according to each registration's
//! lifetime.
//!
//! ## Features
//!
//! - **Lock-free reads** - Registration tables are published as immutable
//!   snapshots; resolving never takes a lock on the hot path
//! - **Seven lifetimes** - Transient, singleton, container-controlled,
//!   hierarchical, per-resolve, per-thread and externally controlled
//! - **Child containers** - Shadow registrations without touching the parent
//! - **Member selection** - The best satisfiable constructor wins,
//!   deterministically
//! - **Interfaces and generics** - Map `dyn Trait` contracts to
//!   implementations; register open generic definitions once
//! - **Two pipeline strategies** - Interpreted, or specialized closures that
//!   cache member selection
//! - **Observable** - Optional `tracing` integration with JSON or pretty output
//!
//! ## Quick Start
//!
//! ```rust
//! use injector_runtime::{Container, Lifetime, MetadataBuilder, Parameter, TypeDescriptor};
//! use std::sync::Arc;
//!
//! struct Database { url: String }
//! struct UserService { db: Arc<Database> }
//!
//! let container = Container::new();
//! container.add_metadata(
//!     MetadataBuilder::<UserService>::new()
//!         .constructor([Parameter::of::<Database>("db")], |mut args| {
//!             Ok(UserService { db: args.take(0)? })
//!         })
//!         .finish(),
//! );
//!
//! container.singleton(Database { url: "postgres://localhost".into() }).unwrap();
//! container
//!     .register_type(TypeDescriptor::of::<UserService>(), None, None, Some(Lifetime::Singleton), Vec::new())
//!     .unwrap();
//!
//! let users = container.get::<UserService>().unwrap();
//! assert_eq!(users.db.url, "postgres://localhost");
//! ```
//!
//! ## Interfaces
//!
//! ```rust
//! use injector_runtime::{Container, Lifetime, MetadataBuilder, TypeDescriptor};
//!
//! trait Greeter: Send + Sync { fn greet(&self) -> String; }
//! struct English;
//! impl Greeter for English { fn greet(&self) -> String { "hello".into() } }
//!
//! let container = Container::new();
//! container.add_metadata(
//!     MetadataBuilder::<English>::new()
//!         .constructor([], |_| Ok(English))
//!         .implements::<dyn Greeter>(|e| e)
//!         .finish(),
//! );
//! container
//!     .register_type(
//!         TypeDescriptor::of_trait::<dyn Greeter>(),
//!         Some(TypeDescriptor::of::<English>()),
//!         None,
//!         Some(Lifetime::ContainerControlled),
//!         Vec::new(),
//!     )
//!     .unwrap();
//!
//! assert_eq!(container.get_trait::<dyn Greeter>().unwrap().greet(), "hello");
//! ```
//!
//! ## Child Containers
//!
//! ```rust
//! use injector_runtime::Container;
//!
//! struct AppConfig { name: String }
//! struct RequestContext { id: String }
//!
//! let root = Container::new();
//! root.singleton(AppConfig { name: "MyApp".into() }).unwrap();
//!
//! let request = root.create_child_container(Some("request"));
//! request.singleton(RequestContext { id: "req-123".into() }).unwrap();
//!
//! assert!(request.contains::<AppConfig>());
//! assert!(!root.contains::<RequestContext>());
//!
//! root.dispose();
//! assert!(request.is_disposed());
//! ```

extern crate self as injector_runtime;

mod catalog;
mod container;
mod contract;
mod engine;
mod error;
mod injection;
mod lifetime;
#[cfg(feature = "logging")]
pub mod logging;
mod metadata;
mod pipeline;
mod provider;
mod registration;
mod scope;
mod selection;
mod storage;
mod types;

pub use catalog::TypeCatalog;
pub use container::{Container, ContainerConfig, DEFAULT_MAX_DEPTH};
pub use contract::Contract;
pub use error::{BoxError, DiError, Fault, FaultKind, RegistrationError, ResolutionError, Result, SharedCause};
pub use injection::{InjectionArg, InjectionMember, OverrideTarget, ResolverFn, ResolverOverride};
pub use lifetime::{Lifetime, LifetimeState};
pub use metadata::{
    Arguments, Constructor, Directive, Instance, Member, MetadataBuilder, MetadataProvider, Method, Parameter,
    TypeMetadata, Value,
};
pub use pipeline::{PipelineStrategy, Resolver, Stage};
pub use provider::{Describe, Dispose, Injectable};
pub use registration::{Category, FactoryFn, RegistrationInfo, RegistrationManager};
pub use selection::{MatchRank, SelectionError, Signature};
pub use storage::DEFAULT_FLAT_LIMIT;
pub use types::{TypeDescriptor, TypeKey, TypeKind};

#[cfg(feature = "derive")]
pub use injector_runtime_derive::Inject;

// Re-export tracing macros for convenience when logging feature is enabled
#[cfg(feature = "logging")]
pub use tracing::{debug, error, info, trace, warn};

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::{
        Arguments, Container, ContainerConfig, Describe, DiError, Dispose, InjectionArg, InjectionMember, Lifetime,
        Member, MetadataBuilder, Method, Parameter, ResolutionError, Resolver, ResolverOverride, Result,
        TypeDescriptor, TypeMetadata,
    };
    #[cfg(feature = "derive")]
    pub use crate::Inject;
    pub use std::sync::Arc;
}

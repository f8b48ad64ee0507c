//! Error types for the composition runtime
//!
//! Three layers of failure exist:
//!
//! - [`Fault`] is raised by a pipeline stage while a value is being built.
//!   It names the innermost contract and accumulates the dependency trail
//!   as it bubbles out of nested resolutions.
//! - [`ResolutionError`] is what callers of `resolve` see. The engine is the
//!   only place that converts a fault into one, so it always names the
//!   contract the caller originally asked for.
//! - [`RegistrationError`] is reported synchronously by registration calls.

use crate::contract::Contract;
use std::error::Error as StdError;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

/// Boxed error returned by user supplied constructors, factories and setters.
pub type BoxError = Box<dyn StdError + Send + Sync + 'static>;

/// Shared, clonable form of an underlying failure.
pub type SharedCause = Arc<dyn StdError + Send + Sync + 'static>;

/// Classification of a resolution failure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FaultKind {
    /// No registration and no implicit way to build the contract
    NotRegistered,
    /// No accessible or matching member, or a non-constructible target type
    Selection,
    /// A constructor, factory, setter or method reported an error
    Construction,
    /// The contract was requested again while it was being built
    CircularDependency,
    /// A value could not be shaped into the requested type
    TypeMismatch,
    /// The container was disposed
    Disposed,
}

impl fmt::Display for FaultKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            FaultKind::NotRegistered => "not registered",
            FaultKind::Selection => "selection failed",
            FaultKind::Construction => "construction failed",
            FaultKind::CircularDependency => "circular dependency",
            FaultKind::TypeMismatch => "type mismatch",
            FaultKind::Disposed => "container disposed",
        };
        f.write_str(text)
    }
}

/// Failure recorded by a pipeline stage for the in-flight resolution.
///
/// Stages short-circuit with `?` as soon as a fault is raised, so later
/// stages never observe a half-built value.
#[derive(Error, Debug, Clone)]
#[error("{message}")]
pub struct Fault {
    kind: FaultKind,
    contract: String,
    message: String,
    #[source]
    cause: Option<SharedCause>,
    trail: Vec<String>,
}

impl Fault {
    fn new(kind: FaultKind, contract: &Contract, message: impl Into<String>) -> Self {
        Self {
            kind,
            contract: contract.to_string(),
            message: message.into(),
            cause: None,
            trail: Vec::new(),
        }
    }

    /// The contract has no registration and cannot be built implicitly
    pub fn not_registered(contract: &Contract) -> Self {
        Self::new(
            FaultKind::NotRegistered,
            contract,
            format!("{} is not registered and cannot be constructed implicitly", contract),
        )
    }

    /// Member selection failed for the contract
    pub fn selection(contract: &Contract, message: impl Into<String>) -> Self {
        Self::new(FaultKind::Selection, contract, message)
    }

    /// A user callback failed; the cause is preserved
    pub fn construction(contract: &Contract, message: impl Into<String>, cause: BoxError) -> Self {
        let mut fault = Self::new(FaultKind::Construction, contract, message);
        fault.cause = Some(SharedCause::from(cause));
        fault
    }

    /// The contract was re-entered within its own resolution chain
    pub fn circular(contract: &Contract) -> Self {
        Self::new(
            FaultKind::CircularDependency,
            contract,
            format!("{} depends on itself", contract),
        )
    }

    /// The dependency chain grew past the configured depth limit
    pub fn too_deep(contract: &Contract, limit: usize) -> Self {
        Self::new(
            FaultKind::CircularDependency,
            contract,
            format!("resolving {} exceeded the maximum depth of {}", contract, limit),
        )
    }

    /// A value could not be shaped into the requested type
    pub fn mismatch(contract: &Contract, message: impl Into<String>) -> Self {
        Self::new(FaultKind::TypeMismatch, contract, message)
    }

    /// The container owning the resolution has been disposed
    pub fn disposed(contract: &Contract) -> Self {
        Self::new(
            FaultKind::Disposed,
            contract,
            format!("cannot resolve {}: container has been disposed", contract),
        )
    }

    /// Record that this fault surfaced while resolving `contract`.
    pub(crate) fn through(mut self, contract: &Contract) -> Self {
        self.trail.push(contract.to_string());
        self
    }

    pub fn kind(&self) -> FaultKind {
        self.kind
    }

    /// Innermost contract the fault was raised for
    pub fn contract(&self) -> &str {
        &self.contract
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn cause(&self) -> Option<&SharedCause> {
        self.cause.as_ref()
    }

    /// Dependency chain from the outermost resolution down to the failing one
    pub fn path(&self) -> Vec<&str> {
        let mut path: Vec<&str> = self.trail.iter().rev().map(String::as_str).collect();
        if path.last().copied() != Some(self.contract.as_str()) {
            path.push(&self.contract);
        }
        path
    }
}

/// The single externally visible resolution failure.
///
/// Always identifies the originally requested contract; the innermost
/// failing contract and dependency path are folded into `message`.
#[derive(Error, Debug, Clone)]
#[error("Resolution of {type_requested}{} failed: {message}", display_name(.name_requested))]
pub struct ResolutionError {
    /// Type name of the contract passed to `resolve`
    pub type_requested: String,
    /// Name of the contract passed to `resolve`
    pub name_requested: Option<String>,
    /// Failure classification
    pub kind: FaultKind,
    /// Human readable explanation including the dependency path
    pub message: String,
    /// Underlying user error, if any
    #[source]
    pub cause: Option<SharedCause>,
}

fn display_name(name: &Option<String>) -> String {
    match name {
        Some(name) => format!(" (name: \"{}\")", name),
        None => String::new(),
    }
}

impl ResolutionError {
    /// Convert a terminal fault into the caller-facing error
    pub(crate) fn from_fault(requested: &Contract, fault: Fault) -> Self {
        let path = fault.path();
        let message = if path.len() > 1 {
            format!("{} (dependency path: {})", fault.message, path.join(" -> "))
        } else {
            fault.message.clone()
        };
        Self {
            type_requested: requested.ty().name().to_string(),
            name_requested: requested.name().map(str::to_string),
            kind: fault.kind,
            message,
            cause: fault.cause,
        }
    }

    /// Value resolved but could not be downcast to the typed request
    pub(crate) fn type_mismatch(requested: &Contract, actual: &str) -> Self {
        Self {
            type_requested: requested.ty().name().to_string(),
            name_requested: requested.name().map(str::to_string),
            kind: FaultKind::TypeMismatch,
            message: format!("resolved value is not a {} ({})", requested.ty().name(), actual),
            cause: None,
        }
    }
}

/// Errors reported immediately by registration calls
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RegistrationError {
    /// A registration name was supplied but empty
    #[error("Registration name for {type_name} must not be empty")]
    EmptyName { type_name: String },

    /// The implementation type cannot stand in for the registered type
    #[error("Type {implementation} cannot be assigned to {registered}")]
    NotAssignable {
        registered: String,
        implementation: String,
    },

    /// The factory cannot produce values for the registered type
    #[error("Invalid factory for {type_name}: {reason}")]
    InvalidFactory { type_name: String, reason: String },

    /// The instance is not a value of the registered type
    #[error("Instance cannot be registered as {registered}: {reason}")]
    InstanceMismatch { registered: String, reason: String },

    /// More than one constructor directive was supplied
    #[error("Multiple constructor injection members supplied for {type_name}")]
    DuplicateConstructor { type_name: String },

    /// The container was disposed
    #[error("Container has been disposed - cannot register {type_name}")]
    Disposed { type_name: String },
}

/// Umbrella error for callers that mix registration and resolution
#[derive(Error, Debug, Clone)]
pub enum DiError {
    #[error(transparent)]
    Resolution(#[from] ResolutionError),

    #[error(transparent)]
    Registration(#[from] RegistrationError),
}

/// Result type alias for runtime operations
pub type Result<T> = std::result::Result<T, DiError>;

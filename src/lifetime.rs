//! Lifetime managers
//!
//! A lifetime manager decides whether a resolution reuses a previously
//! built value or builds a new one. Managers that share a value across
//! threads move through `Empty -> Building -> Built`:
//!
//! - the fast path is a lock-free load of the published value;
//! - on a miss the manager takes its own reentrant build lock, re-checks,
//!   and builds while holding it, so concurrent first requests run the
//!   construction exactly once;
//! - re-entry from the building thread means the value depends on itself
//!   and is reported as a circular dependency instead of deadlocking;
//! - if the build fails or panics the manager recovers to `Empty`, so the
//!   next request retries.
//!
//! Per-thread values live in the manager, one slot per calling thread. They
//! are dropped with the manager or when its container is disposed.

use crate::contract::Contract;
use crate::error::Fault;
use crate::metadata::Value;
use crate::pipeline::CallGraph;
use ahash::RandomState;
use arc_swap::ArcSwapOption;
use dashmap::DashMap;
use parking_lot::{Mutex, ReentrantMutex};
use std::any::Any;
use std::cell::Cell;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::thread::{self, ThreadId};

#[cfg(feature = "logging")]
use tracing::{debug, trace};

/// How long a resolved value lives
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Lifetime {
    /// A new value for every resolution
    #[default]
    Transient,
    /// One value for the whole container tree, disposed with the root
    Singleton,
    /// One value per registering container, disposed with it
    ContainerControlled,
    /// One value per container that resolves it; children get their own
    Hierarchical,
    /// One value per top-level `resolve` call
    PerResolve,
    /// One value per thread
    PerThread,
    /// One value held weakly; rebuilt once every strong owner drops it
    ExternallyControlled,
}

impl Lifetime {
    /// Alias of [`Lifetime::ContainerControlled`]
    pub const PER_CONTAINER: Lifetime = Lifetime::ContainerControlled;

    /// Whether values built under this lifetime are disposed with a container
    #[inline]
    pub fn tracks_disposal(self) -> bool {
        matches!(
            self,
            Lifetime::Singleton | Lifetime::ContainerControlled | Lifetime::Hierarchical | Lifetime::PerThread
        )
    }
}

/// Observable state of a lifetime manager
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifetimeState {
    Empty,
    Building,
    Built,
}

/// Outcome of asking a manager for its value
pub(crate) enum Resolved {
    /// A previously built value was reused
    Cached(Value),
    /// The build callback ran and produced this value
    Built(Value),
}

#[cfg(test)]
impl Resolved {
    #[inline]
    pub(crate) fn into_value(self) -> Value {
        match self {
            Resolved::Cached(value) | Resolved::Built(value) => value,
        }
    }
}

static NEXT_MANAGER: AtomicU64 = AtomicU64::new(1);

/// Per-registration lifetime state
pub(crate) struct LifetimeManager {
    kind: Lifetime,
    id: u64,
    store: Store,
}

enum Store {
    /// Transient and per-resolve keep their values elsewhere
    Unshared,
    Shared(SharedSlot),
    External(ExternalSlot),
    /// Only the owning thread reads or writes its slot
    PerThread(DashMap<ThreadId, Value, RandomState>),
}

type Gate = ReentrantMutex<Cell<bool>>;

struct SharedSlot {
    value: ArcSwapOption<Value>,
    gate: Gate,
}

struct ExternalSlot {
    value: Mutex<Option<Weak<dyn Any + Send + Sync>>>,
    gate: Gate,
}

/// Resets the building flag when the build scope exits, successfully or not
struct Recover<'a>(&'a Cell<bool>);

impl Drop for Recover<'_> {
    #[inline]
    fn drop(&mut self) {
        self.0.set(false);
    }
}

impl LifetimeManager {
    pub(crate) fn new(kind: Lifetime) -> Self {
        let store = match kind {
            Lifetime::Singleton | Lifetime::ContainerControlled | Lifetime::Hierarchical => {
                Store::Shared(SharedSlot {
                    value: ArcSwapOption::empty(),
                    gate: ReentrantMutex::new(Cell::new(false)),
                })
            }
            Lifetime::ExternallyControlled => Store::External(ExternalSlot {
                value: Mutex::new(None),
                gate: ReentrantMutex::new(Cell::new(false)),
            }),
            Lifetime::PerThread => Store::PerThread(DashMap::with_hasher(RandomState::new())),
            Lifetime::Transient | Lifetime::PerResolve => Store::Unshared,
        };
        Self {
            kind,
            id: NEXT_MANAGER.fetch_add(1, Ordering::Relaxed),
            store,
        }
    }

    /// A manager of the same kind with no value
    #[inline]
    pub(crate) fn fresh(&self) -> Self {
        Self::new(self.kind)
    }

    #[inline]
    pub(crate) fn kind(&self) -> Lifetime {
        self.kind
    }

    #[inline]
    pub(crate) fn tracks_disposal(&self) -> bool {
        self.kind.tracks_disposal()
    }

    pub(crate) fn state(&self) -> LifetimeState {
        match &self.store {
            Store::Shared(slot) => {
                if slot.value.load().is_some() {
                    LifetimeState::Built
                } else if slot.gate.is_locked() {
                    LifetimeState::Building
                } else {
                    LifetimeState::Empty
                }
            }
            Store::External(slot) => {
                if slot.value.lock().as_ref().is_some_and(|w| w.strong_count() > 0) {
                    LifetimeState::Built
                } else if slot.gate.is_locked() {
                    LifetimeState::Building
                } else {
                    LifetimeState::Empty
                }
            }
            Store::PerThread(values) => {
                if values.contains_key(&thread::current().id()) {
                    LifetimeState::Built
                } else {
                    LifetimeState::Empty
                }
            }
            Store::Unshared => LifetimeState::Empty,
        }
    }

    /// Pre-populate with a registered instance
    pub(crate) fn seed(&self, value: &Value) {
        match &self.store {
            Store::Shared(slot) => slot.value.store(Some(Arc::new(Arc::clone(value)))),
            Store::External(slot) => *slot.value.lock() = Some(Arc::downgrade(value)),
            Store::PerThread(values) => {
                values.insert(thread::current().id(), Arc::clone(value));
            }
            Store::Unshared => {}
        }
    }

    /// Return the managed value, building it with `build` when required
    pub(crate) fn resolve<F>(&self, graph: &CallGraph<'_>, contract: &Contract, build: F) -> Result<Resolved, Fault>
    where
        F: FnOnce() -> Result<Value, Fault>,
    {
        match &self.store {
            Store::Unshared => match self.kind {
                Lifetime::PerResolve => {
                    if let Some(value) = graph.per_resolve(self.id) {
                        return Ok(Resolved::Cached(value));
                    }
                    let value = build()?;
                    graph.remember(self.id, Arc::clone(&value));
                    Ok(Resolved::Built(value))
                }
                _ => build().map(Resolved::Built),
            },
            Store::PerThread(values) => {
                let thread = thread::current().id();
                if let Some(value) = values.get(&thread) {
                    return Ok(Resolved::Cached(Value::clone(value.value())));
                }
                // No shard guard is held while building
                let value = build()?;
                values.insert(thread, Arc::clone(&value));
                Ok(Resolved::Built(value))
            }
            Store::Shared(slot) => {
                if let Some(value) = slot.value.load_full() {
                    return Ok(Resolved::Cached(Value::clone(&value)));
                }
                gated(
                    &slot.gate,
                    contract,
                    || slot.value.load_full().map(|v| Value::clone(&v)),
                    |value| slot.value.store(Some(Arc::new(Arc::clone(value)))),
                    build,
                )
            }
            Store::External(slot) => {
                if let Some(value) = slot.upgrade() {
                    return Ok(Resolved::Cached(value));
                }
                gated(
                    &slot.gate,
                    contract,
                    || slot.upgrade(),
                    |value| *slot.value.lock() = Some(Arc::downgrade(value)),
                    build,
                )
            }
        }
    }

    /// Drop per-thread values held for every thread
    pub(crate) fn release(&self) {
        if let Store::PerThread(values) = &self.store {
            #[cfg(feature = "logging")]
            trace!(
                target: "injector_runtime",
                manager = self.id,
                values = values.len(),
                "Releasing per-thread values"
            );

            values.clear();
        }
    }
}

impl ExternalSlot {
    #[inline]
    fn upgrade(&self) -> Option<Value> {
        self.value.lock().as_ref().and_then(Weak::upgrade)
    }
}

fn gated<L, S, F>(gate: &Gate, contract: &Contract, lookup: L, store: S, build: F) -> Result<Resolved, Fault>
where
    L: Fn() -> Option<Value>,
    S: FnOnce(&Value),
    F: FnOnce() -> Result<Value, Fault>,
{
    let guard = gate.lock();
    if let Some(value) = lookup() {
        return Ok(Resolved::Cached(value));
    }
    if guard.get() {
        return Err(Fault::circular(contract));
    }
    guard.set(true);
    let _recover = Recover(&*guard);

    #[cfg(feature = "logging")]
    trace!(target: "injector_runtime", contract = %contract, "Building shared value");

    match build() {
        Ok(value) => {
            store(&value);
            Ok(Resolved::Built(value))
        }
        Err(fault) => {
            #[cfg(feature = "logging")]
            debug!(
                target: "injector_runtime",
                contract = %contract,
                error = %fault,
                "Build failed, lifetime manager recovered to empty"
            );
            Err(fault)
        }
    }
}

impl fmt::Debug for LifetimeManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LifetimeManager")
            .field("kind", &self.kind)
            .field("id", &self.id)
            .field("state", &self.state())
            .finish()
    }
}

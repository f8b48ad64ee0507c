//! Container scopes
//!
//! Every container is backed by a [`Scope`]: a registration table plus a
//! strong link to its parent. Lookups search the local table first and then
//! walk the parent chain, so registrations in a child shadow its ancestors.
//!
//! Scopes also hold what must be released when they are disposed: values
//! built under tracking lifetimes and registered disposable instances.
//! Disposal cascades to live children first, then releases local values in
//! reverse order of acquisition.

use crate::contract::Contract;
use crate::lifetime::Lifetime;
use crate::metadata::{DisposeFn, Value};
use crate::registration::Origin;
use crate::storage::{Entry, RegistrationStore};
use crate::types::TypeDescriptor;
use ahash::RandomState;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

#[cfg(feature = "logging")]
use tracing::{debug, trace};

static NEXT_SCOPE: AtomicU64 = AtomicU64::new(1);

/// A registration and the scope that owns it
pub(crate) struct Located {
    pub(crate) registration: Entry,
    pub(crate) owner: Arc<Scope>,
}

struct Tracked {
    contract: Contract,
    value: Value,
    dispose: DisposeFn,
}

/// Registration table and disposal list of one container
pub(crate) struct Scope {
    id: u64,
    name: Option<Arc<str>>,
    parent: Option<Arc<Scope>>,
    depth: u32,
    flat_limit: usize,
    store: RegistrationStore,
    children: Mutex<Vec<Weak<Scope>>>,
    disposables: Mutex<Vec<Tracked>>,
    disposed: AtomicBool,
}

impl Scope {
    pub(crate) fn root(flat_limit: usize) -> Arc<Self> {
        Arc::new(Self::new(None, None, flat_limit))
    }

    fn new(parent: Option<Arc<Scope>>, name: Option<&str>, flat_limit: usize) -> Self {
        let depth = parent.as_ref().map_or(0, |p| p.depth + 1);
        Self {
            id: NEXT_SCOPE.fetch_add(1, Ordering::Relaxed),
            name: name.map(Arc::from),
            parent,
            depth,
            flat_limit,
            store: RegistrationStore::new(flat_limit),
            children: Mutex::new(Vec::new()),
            disposables: Mutex::new(Vec::new()),
            disposed: AtomicBool::new(false),
        }
    }

    /// Create a child scope linked to this one.
    ///
    /// A child of a disposed scope starts out disposed.
    pub(crate) fn child(self: &Arc<Self>, name: Option<&str>) -> Arc<Self> {
        let child = Arc::new(Self::new(Some(Arc::clone(self)), name, self.flat_limit));
        let mut children = self.children.lock();
        if self.is_disposed() {
            child.disposed.store(true, Ordering::Release);
            return child;
        }
        children.retain(|c| c.strong_count() > 0);
        children.push(Arc::downgrade(&child));
        child
    }

    #[inline]
    pub(crate) fn id(&self) -> u64 {
        self.id
    }

    #[inline]
    pub(crate) fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    #[inline]
    pub(crate) fn depth(&self) -> u32 {
        self.depth
    }

    #[inline]
    pub(crate) fn parent(&self) -> Option<&Arc<Scope>> {
        self.parent.as_ref()
    }

    /// Topmost ancestor (or self)
    pub(crate) fn root_of(self: &Arc<Self>) -> Arc<Scope> {
        let mut scope = self;
        while let Some(parent) = &scope.parent {
            scope = parent;
        }
        Arc::clone(scope)
    }

    #[inline]
    pub(crate) fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::Acquire)
    }

    #[inline]
    pub(crate) fn version(&self) -> u64 {
        self.store.version()
    }

    /// Sum of the versions of this scope and its ancestors. Changes whenever
    /// a registration visible from this scope changes.
    pub(crate) fn chain_version(&self) -> u64 {
        let mut total = 0;
        let mut scope = Some(self);
        while let Some(current) = scope {
            total += current.version();
            scope = current.parent.as_deref();
        }
        total
    }

    #[inline]
    pub(crate) fn local_len(&self) -> usize {
        self.store.len()
    }

    // =========================================================================
    // Registration
    // =========================================================================

    /// Publish a registration; returns the one it replaced
    #[inline]
    pub(crate) fn register(&self, entry: Entry) -> Option<Entry> {
        self.store.insert(entry)
    }

    /// Publish a derived registration unless one is already stored
    #[inline]
    pub(crate) fn install(&self, entry: Entry) -> Entry {
        self.store.insert_if_absent(entry)
    }

    /// Publish a derived registration over the stale one with id `stale`
    #[inline]
    pub(crate) fn install_over(&self, stale: Option<u64>, entry: Entry) -> Entry {
        match stale {
            Some(stale) => self.store.replace_stale(stale, entry),
            None => self.store.insert_if_absent(entry),
        }
    }

    /// Registration stored in this scope only, current or not
    #[inline]
    pub(crate) fn local(&self, contract: &Contract) -> Option<Entry> {
        self.store.get(contract)
    }

    // =========================================================================
    // Lookup
    // =========================================================================

    /// Find the registration serving `contract` from this scope.
    ///
    /// Hierarchical registrations found in an ancestor are copied into this
    /// scope with a fresh lifetime, so each resolving scope gets its own value.
    pub(crate) fn lookup(self: &Arc<Self>, contract: &Contract) -> Option<Located> {
        let mut stale_here = None;
        let mut scope = self;
        loop {
            if let Some(entry) = scope.store.get(contract) {
                if scope.is_current(&entry) {
                    if entry.lifetime() == Lifetime::Hierarchical && !Arc::ptr_eq(scope, self) {
                        return Some(self.adopt(entry, stale_here));
                    }
                    return Some(Located {
                        registration: entry,
                        owner: Arc::clone(scope),
                    });
                }
                if Arc::ptr_eq(scope, self) {
                    stale_here = Some(entry.id());
                }
            }
            match &scope.parent {
                Some(parent) => scope = parent,
                None => return None,
            }
        }
    }

    fn adopt(self: &Arc<Self>, source: Entry, stale: Option<u64>) -> Located {
        #[cfg(feature = "logging")]
        trace!(
            target: "injector_runtime",
            contract = %source.contract(),
            scope = self.id,
            "Re-homing hierarchical registration into resolving scope"
        );

        let copy = Arc::new(source.rehome());
        Located {
            registration: self.install_over(stale, copy),
            owner: Arc::clone(self),
        }
    }

    /// First current registration walking up from this scope, without re-homing
    fn current_in_chain(&self, contract: &Contract) -> Option<Entry> {
        let mut scope = self;
        loop {
            if let Some(entry) = scope.store.get(contract) {
                if scope.is_current(&entry) {
                    return Some(entry);
                }
            }
            scope = scope.parent.as_deref()?;
        }
    }

    /// Whether a stored entry still reflects the registration it was derived from
    pub(crate) fn is_current(&self, entry: &Entry) -> bool {
        match entry.origin() {
            Origin::Registered | Origin::Implicit => true,
            Origin::Rehomed { source } => self
                .parent
                .as_ref()
                .and_then(|p| p.current_in_chain(entry.contract()))
                .is_some_and(|e| e.id() == *source),
            Origin::Closed { open, source } => self
                .current_in_chain(open)
                .is_some_and(|e| e.id() == *source),
        }
    }

    /// Whether an explicit registration exists in this scope or an ancestor
    pub(crate) fn is_registered(&self, contract: &Contract) -> bool {
        let mut scope = Some(self);
        while let Some(current) = scope {
            if current.store.get(contract).is_some_and(|e| e.is_explicit()) {
                return true;
            }
            scope = current.parent.as_deref();
        }
        false
    }

    /// Explicit registrations visible from this scope, in registration order.
    /// A child registration shadows an ancestor's for the same contract.
    pub(crate) fn registrations(&self) -> Vec<Entry> {
        let mut chain = Vec::with_capacity(self.depth as usize + 1);
        let mut scope = Some(self);
        while let Some(current) = scope {
            chain.push(current);
            scope = current.parent.as_deref();
        }

        let mut visible: HashMap<Contract, Entry, RandomState> = HashMap::default();
        for scope in chain.into_iter().rev() {
            for entry in scope.store.snapshot().table.entries() {
                if entry.is_explicit() {
                    visible.insert(entry.contract().clone(), entry);
                }
            }
        }

        let mut entries: Vec<Entry> = visible.into_values().collect();
        entries.sort_by_key(|e| e.id());
        entries
    }

    /// Every visible explicit registration of `ty`, named or not
    pub(crate) fn registrations_of(&self, ty: &TypeDescriptor) -> Vec<Entry> {
        self.registrations()
            .into_iter()
            .filter(|e| e.contract().ty() == ty)
            .collect()
    }

    // =========================================================================
    // Disposal
    // =========================================================================

    /// Release `value` with `dispose` when this scope is disposed
    pub(crate) fn track(&self, contract: &Contract, value: Value, dispose: DisposeFn) {
        let mut disposables = self.disposables.lock();
        if self.is_disposed() {
            drop(disposables);
            dispose(&value);
            return;
        }
        disposables.push(Tracked {
            contract: contract.clone(),
            value,
            dispose,
        });
    }

    #[cfg(test)]
    #[inline]
    pub(crate) fn tracked_len(&self) -> usize {
        self.disposables.lock().len()
    }

    /// Dispose live children, then release tracked values newest first and
    /// drop values cached per thread. Idempotent.
    pub(crate) fn dispose(&self) {
        if self.disposed.swap(true, Ordering::AcqRel) {
            return;
        }

        let children: Vec<Arc<Scope>> = self
            .children
            .lock()
            .drain(..)
            .filter_map(|c| c.upgrade())
            .collect();
        for child in children.iter().rev() {
            child.dispose();
        }

        let tracked = std::mem::take(&mut *self.disposables.lock());

        #[cfg(feature = "logging")]
        debug!(
            target: "injector_runtime",
            scope = self.id,
            depth = self.depth,
            children = children.len(),
            values = tracked.len(),
            "Disposing container scope"
        );

        for item in tracked.into_iter().rev() {
            #[cfg(feature = "logging")]
            trace!(target: "injector_runtime", contract = %item.contract, "Disposing value");

            (item.dispose)(&item.value);
        }

        for entry in self.store.snapshot().table.entries() {
            entry.manager().release();
        }
    }
}

impl Drop for Scope {
    fn drop(&mut self) {
        self.dispose();
    }
}

impl fmt::Debug for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scope")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("depth", &self.depth)
            .field("store", &self.store)
            .field("disposed", &self.is_disposed())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::injection::InjectionPlan;
    use crate::registration::{Category, RegistrationManager, Source};
    use crate::storage::DEFAULT_FLAT_LIMIT;
    use std::sync::atomic::AtomicUsize;

    struct Service;

    fn register(scope: &Scope, lifetime: Lifetime, name: Option<&str>) -> Entry {
        let entry = Arc::new(RegistrationManager::new(
            Contract::new(TypeDescriptor::of::<Service>(), name),
            Category::ExplicitType,
            Source::Build(TypeDescriptor::of::<Service>()),
            lifetime,
            InjectionPlan::default(),
        ));
        scope.register(Arc::clone(&entry));
        entry
    }

    #[test]
    fn test_child_falls_back_to_parent() {
        let root = Scope::root(DEFAULT_FLAT_LIMIT);
        let entry = register(&root, Lifetime::ContainerControlled, None);
        let child = root.child(Some("request"));

        let found = child.lookup(&Contract::of::<Service>()).unwrap();
        assert!(Arc::ptr_eq(&found.registration, &entry));
        assert!(Arc::ptr_eq(&found.owner, &root));
        assert_eq!(child.depth(), 1);
        assert_eq!(child.name(), Some("request"));
    }

    #[test]
    fn test_child_shadows_parent() {
        let root = Scope::root(DEFAULT_FLAT_LIMIT);
        register(&root, Lifetime::Transient, None);
        let child = root.child(None);
        let local = register(&child, Lifetime::Transient, None);

        let found = child.lookup(&Contract::of::<Service>()).unwrap();
        assert!(Arc::ptr_eq(&found.registration, &local));
        assert_eq!(child.registrations().len(), 1);
    }

    #[test]
    fn test_hierarchical_rehomed_once_per_scope() {
        let root = Scope::root(DEFAULT_FLAT_LIMIT);
        let source = register(&root, Lifetime::Hierarchical, None);
        let child = root.child(None);

        let first = child.lookup(&Contract::of::<Service>()).unwrap();
        assert!(!Arc::ptr_eq(&first.registration, &source));
        assert!(Arc::ptr_eq(&first.owner, &child));

        let second = child.lookup(&Contract::of::<Service>()).unwrap();
        assert!(Arc::ptr_eq(&first.registration, &second.registration));

        // Not an explicit registration of the child.
        assert_eq!(child.registrations().len(), 1);
        assert!(Arc::ptr_eq(&child.registrations()[0], &source));
    }

    #[test]
    fn test_stale_rehomed_copy_replaced() {
        let root = Scope::root(DEFAULT_FLAT_LIMIT);
        register(&root, Lifetime::Hierarchical, None);
        let child = root.child(None);
        let old_copy = child.lookup(&Contract::of::<Service>()).unwrap().registration;

        let replacement = register(&root, Lifetime::Hierarchical, None);
        let new_copy = child.lookup(&Contract::of::<Service>()).unwrap().registration;

        assert!(!Arc::ptr_eq(&old_copy, &new_copy));
        assert_eq!(new_copy.origin(), &Origin::Rehomed { source: replacement.id() });
    }

    #[test]
    fn test_is_registered_ignores_derived() {
        let root = Scope::root(DEFAULT_FLAT_LIMIT);
        let child = root.child(None);
        let contract = Contract::of::<Service>();
        assert!(!child.is_registered(&contract));

        child.install(Arc::new(RegistrationManager::implicit(contract.clone())));
        assert!(!child.is_registered(&contract));

        register(&root, Lifetime::Transient, None);
        assert!(child.is_registered(&contract));
    }

    #[test]
    fn test_registrations_in_order() {
        let root = Scope::root(DEFAULT_FLAT_LIMIT);
        let a = register(&root, Lifetime::Transient, Some("a"));
        let b = register(&root, Lifetime::Transient, Some("b"));
        let child = root.child(None);
        let c = register(&child, Lifetime::Transient, Some("c"));

        let ids: Vec<u64> = child.registrations().iter().map(|e| e.id()).collect();
        assert_eq!(ids, vec![a.id(), b.id(), c.id()]);
        assert_eq!(child.registrations_of(&TypeDescriptor::of::<Service>()).len(), 3);
        assert_eq!(root.registrations().len(), 2);
    }

    #[test]
    fn test_dispose_children_first_reverse_order() {
        static ORDER: std::sync::Mutex<Vec<&'static str>> = std::sync::Mutex::new(Vec::new());

        fn disposer(label: &'static str) -> DisposeFn {
            Arc::new(move |_| ORDER.lock().unwrap().push(label))
        }

        let root = Scope::root(DEFAULT_FLAT_LIMIT);
        let child = root.child(None);
        let contract = Contract::of::<Service>();

        root.track(&contract, Arc::new(Service), disposer("root-1"));
        root.track(&contract, Arc::new(Service), disposer("root-2"));
        child.track(&contract, Arc::new(Service), disposer("child"));

        root.dispose();
        assert_eq!(*ORDER.lock().unwrap(), vec!["child", "root-2", "root-1"]);
        assert!(child.is_disposed());

        root.dispose();
        assert_eq!(ORDER.lock().unwrap().len(), 3);
    }

    #[test]
    fn test_track_after_dispose_releases_immediately() {
        let count = Arc::new(AtomicUsize::new(0));
        let root = Scope::root(DEFAULT_FLAT_LIMIT);
        root.dispose();

        let counter = Arc::clone(&count);
        root.track(
            &Contract::of::<Service>(),
            Arc::new(Service),
            Arc::new(move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
            }),
        );
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert_eq!(root.tracked_len(), 0);
    }

    #[test]
    fn test_drop_disposes() {
        let count = Arc::new(AtomicUsize::new(0));
        {
            let root = Scope::root(DEFAULT_FLAT_LIMIT);
            let counter = Arc::clone(&count);
            root.track(
                &Contract::of::<Service>(),
                Arc::new(Service),
                Arc::new(move |_| {
                    counter.fetch_add(1, Ordering::SeqCst);
                }),
            );
        }
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_child_of_disposed_scope_is_disposed() {
        let root = Scope::root(DEFAULT_FLAT_LIMIT);
        root.dispose();
        let child = root.child(Some("late"));
        assert!(child.is_disposed());
        assert_eq!(child.depth(), 1);
    }
}

//! Singleton registry — shared instances, early references and ordered
//! destruction.
//!
//! Per component name the registry walks the state machine
//! `Absent → FactoryRegistered → EarlyExposed → Initialized → [Destroyed]`.
//! The two middle states exist only while the name is marked as currently
//! in creation; they are what resolves circular singleton references: a
//! component being constructed can expose an early (not yet populated)
//! reference that its dependencies may consume.
//!
//! Locking: fully-initialized singletons live in a lock-free concurrent
//! map; all creation-phase state sits behind one coarse reentrant mutex,
//! so singleton creation is serialized per registry while recursive
//! creation of dependencies on the constructing thread can re-enter.
//! Dependency bookkeeping uses its own short-lived mutexes.

use std::cell::RefCell;
use std::collections::{HashMap, HashSet};
use std::fmt;

use dashmap::DashMap;
use parking_lot::{Mutex, ReentrantMutex};
use tracing::{debug, trace, warn};

use crate::error::{ContainerError, Result};
use crate::value::ObjectHandle;

/// Produces the early (partially-constructed) reference for a component
/// currently in creation.
pub type EarlyFactory = Box<dyn FnOnce() -> ObjectHandle + Send>;

/// Teardown callback registered for a disposable singleton.
pub type DisposeFn = Box<dyn FnOnce() -> Result<()> + Send>;

/// Outcome of [`SingletonRegistry::get_or_create`].
#[derive(Debug)]
pub enum SingletonLookup {
    /// The singleton already existed (possibly having appeared while the
    /// factory ran); no new instance was produced.
    AlreadyPresent(ObjectHandle),
    /// The factory ran and its product is now cached.
    Created(ObjectHandle),
}

impl SingletonLookup {
    pub fn into_handle(self) -> ObjectHandle {
        match self {
            SingletonLookup::AlreadyPresent(handle) | SingletonLookup::Created(handle) => handle,
        }
    }
}

#[derive(Default)]
struct CreationState {
    /// Early-reference producers for components under construction.
    factories: HashMap<String, EarlyFactory>,
    /// Promoted early references, memoized for repeat consumers.
    early: HashMap<String, ObjectHandle>,
    /// Singleton names in registration order.
    registered: Vec<String>,
    /// Names currently being created.
    in_creation: HashSet<String>,
    /// Names excluded from in-creation checks.
    exclusions: HashSet<String>,
    /// Errors suppressed while the outermost creation is in flight.
    suppressed: Option<Vec<ContainerError>>,
    /// Set for the duration of [`SingletonRegistry::destroy_singletons`].
    in_destruction: bool,
}

/// Registry of shared component instances.
pub struct SingletonRegistry {
    /// Fully-initialized singletons; read without blocking.
    singletons: DashMap<String, ObjectHandle>,
    /// Creation-phase state behind the coarse singleton lock.
    state: ReentrantMutex<RefCell<CreationState>>,
    /// Teardown callbacks in registration order.
    disposables: Mutex<Vec<(String, DisposeFn)>>,
    /// name → components that depend on it.
    dependents: Mutex<HashMap<String, Vec<String>>>,
    /// name → components it depends on.
    dependencies: Mutex<HashMap<String, Vec<String>>>,
    /// outer name → inner components it contains.
    contained: Mutex<HashMap<String, Vec<String>>>,
}

impl Default for SingletonRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl SingletonRegistry {
    pub fn new() -> Self {
        Self {
            singletons: DashMap::new(),
            state: ReentrantMutex::new(RefCell::new(CreationState::default())),
            disposables: Mutex::new(Vec::new()),
            dependents: Mutex::new(HashMap::new()),
            dependencies: Mutex::new(HashMap::new()),
            contained: Mutex::new(HashMap::new()),
        }
    }

    /// Manually registers a fully-constructed singleton.
    ///
    /// # Errors
    /// Fails if another instance is already bound under this name.
    pub fn register_singleton(&self, name: &str, handle: ObjectHandle) -> Result<()> {
        let guard = self.state.lock();
        if self.singletons.contains_key(name) {
            return Err(ContainerError::InvalidDefinition {
                name: name.to_string(),
                message: "a singleton instance is already bound under this name".into(),
            });
        }
        self.add_singleton(&guard, name, handle);
        Ok(())
    }

    /// Caches a constructed singleton, evicting early/factory bookkeeping.
    fn add_singleton(
        &self,
        guard: &ReentrantMutexGuardRef<'_>,
        name: &str,
        handle: ObjectHandle,
    ) {
        let mut st = guard.borrow_mut();
        self.singletons.insert(name.to_string(), handle);
        st.factories.remove(name);
        st.early.remove(name);
        if !st.registered.iter().any(|n| n == name) {
            st.registered.push(name.to_string());
        }
    }

    /// Registers the early-reference producer for a singleton that just
    /// got instantiated but is not yet populated.
    pub fn add_singleton_factory(&self, name: &str, factory: EarlyFactory) {
        let guard = self.state.lock();
        let mut st = guard.borrow_mut();
        if !self.singletons.contains_key(name) {
            st.factories.insert(name.to_string(), factory);
            st.early.remove(name);
            if !st.registered.iter().any(|n| n == name) {
                st.registered.push(name.to_string());
            }
        }
    }

    /// Returns the singleton registered under `name`, if any.
    ///
    /// With `allow_early_reference`, a component currently in creation is
    /// served its early reference, promoting the registered factory on
    /// first use. This is the circular-reference resolution mechanism.
    pub fn get_singleton(&self, name: &str, allow_early_reference: bool) -> Option<ObjectHandle> {
        if let Some(handle) = self.singletons.get(name).map(|r| r.value().clone()) {
            return Some(handle);
        }

        let guard = self.state.lock();
        {
            let st = guard.borrow();
            if !st.in_creation.contains(name) {
                return None;
            }
            if let Some(handle) = st.early.get(name) {
                return Some(handle.clone());
            }
            if !allow_early_reference {
                return None;
            }
        }
        let factory = guard.borrow_mut().factories.remove(name)?;
        let handle = factory();
        trace!(component = name, "Promoted singleton factory to early reference");
        guard.borrow_mut().early.insert(name.to_string(), handle.clone());
        Some(handle)
    }

    /// Returns the singleton registered under `name`, creating it via
    /// `factory` if absent.
    ///
    /// The whole operation runs under the registry's coarse creation lock;
    /// the factory may recursively create other singletons on the same
    /// thread. Errors suppressed during creation are attached as related
    /// causes to the factory's failure.
    pub fn get_or_create(
        &self,
        name: &str,
        factory: impl FnOnce() -> Result<ObjectHandle>,
    ) -> Result<SingletonLookup> {
        let guard = self.state.lock();
        if let Some(handle) = self.singletons.get(name).map(|r| r.value().clone()) {
            return Ok(SingletonLookup::AlreadyPresent(handle));
        }
        if guard.borrow().in_destruction {
            return Err(ContainerError::CreationNotAllowed { name: name.to_string() });
        }
        debug!(component = name, "Creating shared instance of singleton");
        Self::before_creation(&guard, name)?;
        let record_suppressed = {
            let mut st = guard.borrow_mut();
            if st.suppressed.is_none() {
                st.suppressed = Some(Vec::new());
                true
            } else {
                false
            }
        };

        let result = factory();

        let suppressed = if record_suppressed {
            guard.borrow_mut().suppressed.take().unwrap_or_default()
        } else {
            Vec::new()
        };
        Self::after_creation(&guard, name);

        match result {
            Ok(handle) => {
                self.add_singleton(&guard, name, handle.clone());
                Ok(SingletonLookup::Created(handle))
            }
            Err(err) => {
                // The singleton may have implicitly appeared in the
                // meantime; if so, proceed with it.
                if let Some(handle) = self.singletons.get(name).map(|r| r.value().clone()) {
                    return Ok(SingletonLookup::AlreadyPresent(handle));
                }
                Err(err.with_related(suppressed))
            }
        }
    }

    /// Records an error suppressed while the outermost singleton creation
    /// is in flight, to be attached to the eventual failure.
    pub fn on_suppressed(&self, err: ContainerError) {
        let guard = self.state.lock();
        let mut st = guard.borrow_mut();
        if let Some(suppressed) = st.suppressed.as_mut() {
            suppressed.push(err);
        }
    }

    /// Removes all cached state for `name`, so a failed creation can be
    /// retried cleanly.
    pub fn remove_singleton(&self, name: &str) {
        let guard = self.state.lock();
        let mut st = guard.borrow_mut();
        self.singletons.remove(name);
        st.factories.remove(name);
        st.early.remove(name);
        st.registered.retain(|n| n != name);
    }

    pub fn contains(&self, name: &str) -> bool {
        self.singletons.contains_key(name)
    }

    /// Singleton names in registration order.
    pub fn names(&self) -> Vec<String> {
        self.state.lock().borrow().registered.clone()
    }

    pub fn count(&self) -> usize {
        self.state.lock().borrow().registered.len()
    }

    /// Enables or disables in-creation checks for `name`.
    pub fn set_currently_in_creation(&self, name: &str, in_creation: bool) {
        let guard = self.state.lock();
        let mut st = guard.borrow_mut();
        if in_creation {
            st.exclusions.remove(name);
        } else {
            st.exclusions.insert(name.to_string());
        }
    }

    /// Whether the singleton is currently being created, honoring
    /// exclusions.
    pub fn is_currently_in_creation(&self, name: &str) -> bool {
        let guard = self.state.lock();
        let st = guard.borrow();
        !st.exclusions.contains(name) && st.in_creation.contains(name)
    }

    /// Whether the singleton is in creation, ignoring exclusions.
    pub fn is_singleton_in_creation(&self, name: &str) -> bool {
        self.state.lock().borrow().in_creation.contains(name)
    }

    fn before_creation(guard: &ReentrantMutexGuardRef<'_>, name: &str) -> Result<()> {
        let mut st = guard.borrow_mut();
        if !st.exclusions.contains(name) && !st.in_creation.insert(name.to_string()) {
            return Err(ContainerError::CurrentlyInCreation { name: name.to_string() });
        }
        Ok(())
    }

    fn after_creation(guard: &ReentrantMutexGuardRef<'_>, name: &str) {
        let mut st = guard.borrow_mut();
        if !st.exclusions.contains(name) && !st.in_creation.remove(name) {
            warn!(component = name, "Singleton was not marked as in creation");
        }
    }

    /// Registers a teardown callback, replacing any previous one for the
    /// same name.
    pub fn register_disposable(&self, name: &str, dispose: DisposeFn) {
        let mut disposables = self.disposables.lock();
        disposables.retain(|(n, _)| n != name);
        disposables.push((name.to_string(), dispose));
    }

    /// Registers `dependent` as depending on `name`, for depends-on
    /// ordering and destruction ordering.
    pub fn register_dependent(&self, name: &str, dependent: &str) {
        {
            let mut dependents = self.dependents.lock();
            let entry = dependents.entry(name.to_string()).or_default();
            if entry.iter().any(|d| d == dependent) {
                return;
            }
            entry.push(dependent.to_string());
        }
        let mut dependencies = self.dependencies.lock();
        let entry = dependencies.entry(dependent.to_string()).or_default();
        if !entry.iter().any(|d| d == name) {
            entry.push(name.to_string());
        }
    }

    /// Registers a containment relationship (inner component inside
    /// `containing`); the containing component is destroyed before its
    /// contained parts.
    pub fn register_contained(&self, contained: &str, containing: &str) {
        {
            let mut map = self.contained.lock();
            let entry = map.entry(containing.to_string()).or_default();
            if entry.iter().any(|c| c == contained) {
                return;
            }
            entry.push(contained.to_string());
        }
        self.register_dependent(contained, containing);
    }

    /// Whether `dependent` transitively depends on `name`.
    pub fn is_dependent(&self, name: &str, dependent: &str) -> bool {
        let dependents = self.dependents.lock();
        let mut seen = HashSet::new();
        Self::is_dependent_inner(&dependents, name, dependent, &mut seen)
    }

    fn is_dependent_inner(
        map: &HashMap<String, Vec<String>>,
        name: &str,
        dependent: &str,
        seen: &mut HashSet<String>,
    ) -> bool {
        if !seen.insert(name.to_string()) {
            return false;
        }
        let Some(direct) = map.get(name) else {
            return false;
        };
        if direct.iter().any(|d| d == dependent) {
            return true;
        }
        direct
            .iter()
            .any(|transitive| Self::is_dependent_inner(map, transitive, dependent, seen))
    }

    pub fn dependents_of(&self, name: &str) -> Vec<String> {
        self.dependents.lock().get(name).cloned().unwrap_or_default()
    }

    pub fn dependencies_of(&self, name: &str) -> Vec<String> {
        self.dependencies.lock().get(name).cloned().unwrap_or_default()
    }

    /// Destroys every disposable singleton in reverse registration order,
    /// then clears all bookkeeping.
    pub fn destroy_singletons(&self) {
        trace!("Destroying singletons");
        {
            let guard = self.state.lock();
            guard.borrow_mut().in_destruction = true;
        }

        let names: Vec<String> = {
            let disposables = self.disposables.lock();
            disposables.iter().map(|(name, _)| name.clone()).collect()
        };
        for name in names.iter().rev() {
            self.destroy_singleton(name);
        }

        self.contained.lock().clear();
        self.dependents.lock().clear();
        self.dependencies.lock().clear();

        let guard = self.state.lock();
        let mut st = guard.borrow_mut();
        self.singletons.clear();
        st.factories.clear();
        st.early.clear();
        st.registered.clear();
        st.in_destruction = false;
    }

    /// Destroys one singleton: its dependents first, then its own teardown
    /// callback, then its contained components.
    pub fn destroy_singleton(&self, name: &str) {
        self.remove_singleton(name);
        let dispose = {
            let mut disposables = self.disposables.lock();
            disposables
                .iter()
                .position(|(n, _)| n == name)
                .map(|index| disposables.remove(index).1)
        };
        self.destroy_component(name, dispose);
    }

    fn destroy_component(&self, name: &str, dispose: Option<DisposeFn>) {
        // Destroy dependents first. The removal is done under full lock so
        // the recursion works on a disconnected set.
        let dependents = self.dependents.lock().remove(name);
        if let Some(dependents) = dependents {
            trace!(component = name, ?dependents, "Destroying dependent components first");
            for dependent in dependents {
                self.destroy_singleton(&dependent);
            }
        }

        if let Some(dispose) = dispose {
            if let Err(err) = dispose() {
                warn!(component = name, error = %err, "Destruction of component threw an error");
            }
        }

        let contained = self.contained.lock().remove(name);
        if let Some(contained) = contained {
            for inner in contained {
                self.destroy_singleton(&inner);
            }
        }

        {
            let mut dependents = self.dependents.lock();
            dependents.retain(|_, entries| {
                entries.retain(|d| d != name);
                !entries.is_empty()
            });
        }
        self.dependencies.lock().remove(name);
    }
}

type ReentrantMutexGuardRef<'a> = parking_lot::ReentrantMutexGuard<'a, RefCell<CreationState>>;

impl fmt::Debug for SingletonRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SingletonRegistry")
            .field("singletons", &self.count())
            .finish()
    }
}

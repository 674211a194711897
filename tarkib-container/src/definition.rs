//! Component definitions — the declarative blueprints of the container.
//!
//! A [`ComponentDefinition`] says how to build one managed component:
//! target class name, scope, constructor arguments, properties, factory
//! delegation, `depends-on`, and so on. Definitions may reference a parent
//! definition; the merge engine flattens such chains into a concrete
//! [`MergedDefinition`] which is what the rest of the container works
//! with.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use once_cell::sync::OnceCell;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::key::TypeKey;
use crate::registry::Executable;
use crate::scope::Scope;
use crate::value::{
    ArgumentValue, ConstructorArgumentValues, PropertyValues, Value, ValueSpec,
};

/// Whether unmatched executable parameters are resolved as dependency
/// lookups against the container.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AutowireMode {
    /// Every parameter must be satisfied by a declared argument value.
    None,
    /// Unmatched parameters are resolved by type against the container.
    Constructor,
}

impl Default for AutowireMode {
    fn default() -> Self {
        AutowireMode::None
    }
}

/// Declarative blueprint for one managed component.
///
/// Built fluently:
/// ```
/// use tarkib_container::definition::ComponentDefinition;
/// use tarkib_container::scope::Scope;
/// use tarkib_container::value::ValueSpec;
///
/// let def = ComponentDefinition::for_class("Engine")
///     .with_scope(Scope::Singleton)
///     .with_property("power", ValueSpec::literal(100i64));
/// ```
#[derive(Clone, Debug, Default)]
pub struct ComponentDefinition {
    pub class_name: Option<String>,
    /// Name of the parent definition this one inherits from.
    pub parent: Option<String>,
    pub scope: Option<Scope>,
    /// Template-only definitions are never instantiated directly.
    pub abstract_flag: bool,
    pub lazy_init: Option<bool>,
    pub autowire: Option<AutowireMode>,
    /// Lenient constructor resolution picks the closest match on weight
    /// ties; strict resolution reports them as ambiguous.
    pub lenient_resolution: Option<bool>,
    /// Whether non-public executables participate in resolution.
    pub allow_non_public: Option<bool>,
    /// Preferred candidate for autowire-by-type ties.
    pub primary: bool,
    pub depends_on: Option<Vec<String>>,
    pub constructor_args: ConstructorArgumentValues,
    pub properties: PropertyValues,
    /// Component whose instance factory method builds this component.
    pub factory_component: Option<String>,
    /// Factory method name; static on the target class when
    /// `factory_component` is unset.
    pub factory_method: Option<String>,
}

impl ComponentDefinition {
    pub fn new() -> Self {
        Self::default()
    }

    /// Definition targeting a registered class name.
    pub fn for_class(class_name: impl Into<String>) -> Self {
        Self { class_name: Some(class_name.into()), ..Self::default() }
    }

    /// Child definition inheriting from `parent`.
    pub fn child_of(parent: impl Into<String>) -> Self {
        Self { parent: Some(parent.into()), ..Self::default() }
    }

    pub fn with_class(mut self, class_name: impl Into<String>) -> Self {
        self.class_name = Some(class_name.into());
        self
    }

    pub fn with_scope(mut self, scope: Scope) -> Self {
        self.scope = Some(scope);
        self
    }

    pub fn as_abstract(mut self) -> Self {
        self.abstract_flag = true;
        self
    }

    pub fn with_lazy_init(mut self, lazy: bool) -> Self {
        self.lazy_init = Some(lazy);
        self
    }

    pub fn with_autowire(mut self, mode: AutowireMode) -> Self {
        self.autowire = Some(mode);
        self
    }

    pub fn with_lenient_resolution(mut self, lenient: bool) -> Self {
        self.lenient_resolution = Some(lenient);
        self
    }

    pub fn with_allow_non_public(mut self, allow: bool) -> Self {
        self.allow_non_public = Some(allow);
        self
    }

    pub fn as_primary(mut self) -> Self {
        self.primary = true;
        self
    }

    pub fn with_depends_on(mut self, names: Vec<&str>) -> Self {
        self.depends_on = Some(names.into_iter().map(str::to_string).collect());
        self
    }

    /// Adds a generic (unindexed) constructor argument.
    pub fn with_ctor_arg(mut self, value: ArgumentValue) -> Self {
        self.constructor_args.add_generic(value);
        self
    }

    /// Adds an indexed constructor argument.
    pub fn with_indexed_arg(mut self, index: usize, value: ArgumentValue) -> Self {
        self.constructor_args.add_indexed(index, value);
        self
    }

    pub fn with_property(mut self, name: impl Into<String>, spec: ValueSpec) -> Self {
        self.properties.add(name, spec);
        self
    }

    pub fn with_factory_component(mut self, name: impl Into<String>) -> Self {
        self.factory_component = Some(name.into());
        self
    }

    pub fn with_factory_method(mut self, name: impl Into<String>) -> Self {
        self.factory_method = Some(name.into());
        self
    }
}

/// One argument slot of a memoized executable resolution.
#[derive(Clone, Debug)]
pub enum PreparedArg {
    /// Fully converted; reused as-is.
    Converted(Value),
    /// Needs re-resolution from its declarative source (reference,
    /// placeholder, expression) on every instantiation.
    Spec(ValueSpec),
    /// Autowired dependency lookup, re-run on every instantiation.
    Autowired,
}

/// Memoized argument forms for repeat instantiation.
#[derive(Clone, Debug)]
pub enum ResolvedArgs {
    /// All arguments were plain values; reuse the converted array.
    Fixed(Vec<Value>),
    /// Some arguments need per-instantiation resolution.
    Prepared(Vec<PreparedArg>),
}

/// The winning executable plus its argument forms, cached on the merged
/// definition after the first successful resolution.
#[derive(Clone)]
pub(crate) struct ResolvedExecutable {
    pub exec: Arc<Executable>,
    pub args: ResolvedArgs,
}

/// The flattened, concrete form of a definition after parent-chain
/// resolution. Everything downstream of the merge engine consumes this.
pub struct MergedDefinition {
    pub class_name: Option<String>,
    pub scope: Scope,
    pub abstract_flag: bool,
    pub lazy_init: bool,
    pub autowire: AutowireMode,
    pub lenient_resolution: bool,
    pub allow_non_public: bool,
    pub primary: bool,
    pub depends_on: Vec<String>,
    pub constructor_args: ConstructorArgumentValues,
    pub properties: PropertyValues,
    pub factory_component: Option<String>,
    pub factory_method: Option<String>,

    /// Set when the underlying definitions change; a stale merge is
    /// rebuilt on next access.
    stale: AtomicBool,
    /// Memoized resolved target type, carried across re-merges when the
    /// class/factory coordinates are unchanged.
    resolved_type: OnceCell<TypeKey>,
    /// Memoized indirection-shape flag.
    is_indirection: OnceCell<bool>,
    /// Memoized winning executable + argument forms.
    resolution: Mutex<Option<ResolvedExecutable>>,
}

impl MergedDefinition {
    /// Concrete merge of a parentless definition.
    pub fn from_definition(def: &ComponentDefinition) -> Self {
        Self {
            class_name: def.class_name.clone(),
            scope: def.scope.clone().unwrap_or_default(),
            abstract_flag: def.abstract_flag,
            lazy_init: def.lazy_init.unwrap_or(false),
            autowire: def.autowire.unwrap_or_default(),
            lenient_resolution: def.lenient_resolution.unwrap_or(true),
            allow_non_public: def.allow_non_public.unwrap_or(true),
            primary: def.primary,
            depends_on: def.depends_on.clone().unwrap_or_default(),
            constructor_args: def.constructor_args.clone(),
            properties: def.properties.clone(),
            factory_component: def.factory_component.clone(),
            factory_method: def.factory_method.clone(),
            stale: AtomicBool::new(false),
            resolved_type: OnceCell::new(),
            is_indirection: OnceCell::new(),
            resolution: Mutex::new(None),
        }
    }

    /// Deep copy of a parent merge, ready to be overlaid by a child.
    /// Memoized caches are deliberately not carried over.
    pub fn copy_of(parent: &MergedDefinition) -> Self {
        Self {
            class_name: parent.class_name.clone(),
            scope: parent.scope.clone(),
            abstract_flag: parent.abstract_flag,
            lazy_init: parent.lazy_init,
            autowire: parent.autowire,
            lenient_resolution: parent.lenient_resolution,
            allow_non_public: parent.allow_non_public,
            primary: parent.primary,
            depends_on: parent.depends_on.clone(),
            constructor_args: parent.constructor_args.clone(),
            properties: parent.properties.clone(),
            factory_component: parent.factory_component.clone(),
            factory_method: parent.factory_method.clone(),
            stale: AtomicBool::new(false),
            resolved_type: OnceCell::new(),
            is_indirection: OnceCell::new(),
            resolution: Mutex::new(None),
        }
    }

    /// Overlays every explicitly-set field of `child` onto this merge:
    /// child wins, unset child fields inherit.
    pub fn override_from(&mut self, child: &ComponentDefinition) {
        if let Some(class_name) = &child.class_name {
            self.class_name = Some(class_name.clone());
        }
        if let Some(scope) = &child.scope {
            self.scope = scope.clone();
        }
        self.abstract_flag = child.abstract_flag;
        if let Some(lazy) = child.lazy_init {
            self.lazy_init = lazy;
        }
        if let Some(autowire) = child.autowire {
            self.autowire = autowire;
        }
        if let Some(lenient) = child.lenient_resolution {
            self.lenient_resolution = lenient;
        }
        if let Some(allow) = child.allow_non_public {
            self.allow_non_public = allow;
        }
        self.primary = child.primary;
        if let Some(depends_on) = &child.depends_on {
            self.depends_on = depends_on.clone();
        }
        self.constructor_args.merge_from(&child.constructor_args);
        self.properties.merge_from(&child.properties);
        if let Some(factory_component) = &child.factory_component {
            self.factory_component = Some(factory_component.clone());
        }
        if let Some(factory_method) = &child.factory_method {
            self.factory_method = Some(factory_method.clone());
        }
    }

    #[inline]
    pub fn is_singleton(&self) -> bool {
        self.scope.is_singleton()
    }

    #[inline]
    pub fn is_prototype(&self) -> bool {
        self.scope.is_prototype()
    }

    pub fn uses_factory_method(&self) -> bool {
        self.factory_method.is_some()
    }

    pub fn mark_stale(&self) {
        self.stale.store(true, Ordering::Release);
    }

    pub fn is_stale(&self) -> bool {
        self.stale.load(Ordering::Acquire)
    }

    /// Memoized resolved target type.
    pub fn resolved_type(&self) -> Option<TypeKey> {
        self.resolved_type.get().copied()
    }

    pub fn set_resolved_type(&self, key: TypeKey) {
        let _ = self.resolved_type.set(key);
    }

    /// Memoized indirection flag; `None` until first introspection.
    pub fn indirection_flag(&self) -> Option<bool> {
        self.is_indirection.get().copied()
    }

    pub fn set_indirection_flag(&self, flag: bool) {
        let _ = self.is_indirection.set(flag);
    }

    pub(crate) fn cached_resolution(&self) -> Option<ResolvedExecutable> {
        self.resolution.lock().clone()
    }

    pub(crate) fn store_resolution(&self, resolved: ResolvedExecutable) {
        *self.resolution.lock() = Some(resolved);
    }

    /// Carries expensive introspection results forward from a previous
    /// merge when the class name and factory coordinates are unchanged.
    pub fn copy_relevant_caches_from(&self, previous: &MergedDefinition) {
        if self.class_name == previous.class_name
            && self.factory_component == previous.factory_component
            && self.factory_method == previous.factory_method
        {
            if let Some(key) = previous.resolved_type() {
                self.set_resolved_type(key);
            }
            if let Some(flag) = previous.indirection_flag() {
                self.set_indirection_flag(flag);
            }
            if let Some(resolution) = previous.cached_resolution() {
                self.store_resolution(resolution);
            }
        }
    }
}

impl fmt::Debug for MergedDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MergedDefinition")
            .field("class_name", &self.class_name)
            .field("scope", &self.scope)
            .field("abstract", &self.abstract_flag)
            .field("lazy_init", &self.lazy_init)
            .field("factory_method", &self.factory_method)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_chain() {
        let def = ComponentDefinition::for_class("Engine")
            .with_scope(Scope::Prototype)
            .with_lazy_init(true)
            .with_depends_on(vec!["fuelPump"])
            .with_property("power", ValueSpec::literal(100i64));

        assert_eq!(def.class_name.as_deref(), Some("Engine"));
        assert_eq!(def.scope, Some(Scope::Prototype));
        assert_eq!(def.lazy_init, Some(true));
        assert_eq!(def.depends_on.as_ref().unwrap().len(), 1);
        assert!(def.properties.get("power").is_some());
    }

    #[test]
    fn merge_defaults() {
        let def = ComponentDefinition::for_class("Engine");
        let merged = MergedDefinition::from_definition(&def);

        assert_eq!(merged.scope, Scope::Singleton);
        assert!(!merged.lazy_init);
        assert!(merged.lenient_resolution);
        assert_eq!(merged.autowire, AutowireMode::None);
    }

    #[test]
    fn override_child_wins() {
        let parent = ComponentDefinition::for_class("Base")
            .with_property("x", ValueSpec::literal(1i64))
            .with_property("y", ValueSpec::literal(2i64));
        let mut merged = MergedDefinition::from_definition(&parent);

        let child = ComponentDefinition::child_of("base")
            .with_property("x", ValueSpec::literal(3i64))
            .with_scope(Scope::Prototype);
        merged.override_from(&child);

        assert_eq!(merged.class_name.as_deref(), Some("Base"));
        assert_eq!(merged.scope, Scope::Prototype);
        assert_eq!(merged.properties.len(), 2);
        match merged.properties.get("x").unwrap() {
            ValueSpec::Literal(Value::Int(3)) => {}
            other => panic!("Expected overridden x, got: {other:?}"),
        }
        match merged.properties.get("y").unwrap() {
            ValueSpec::Literal(Value::Int(2)) => {}
            other => panic!("Expected inherited y, got: {other:?}"),
        }
    }

    #[test]
    fn stale_flag_roundtrip() {
        let merged = MergedDefinition::from_definition(&ComponentDefinition::for_class("Engine"));
        assert!(!merged.is_stale());
        merged.mark_stale();
        assert!(merged.is_stale());
    }

    #[test]
    fn cache_carry_forward_requires_same_coordinates() {
        let previous =
            MergedDefinition::from_definition(&ComponentDefinition::for_class("Engine"));
        previous.set_resolved_type(TypeKey::of::<String>());

        let same = MergedDefinition::from_definition(&ComponentDefinition::for_class("Engine"));
        same.copy_relevant_caches_from(&previous);
        assert_eq!(same.resolved_type(), Some(TypeKey::of::<String>()));

        let different =
            MergedDefinition::from_definition(&ComponentDefinition::for_class("Turbine"));
        different.copy_relevant_caches_from(&previous);
        assert_eq!(different.resolved_type(), None);
    }
}

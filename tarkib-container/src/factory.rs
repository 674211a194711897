//! The component factory: the façade tying the alias registry, singleton
//! registry, merge engine and resolution engine together.
//!
//! A request for a component name walks the pipeline: name transform →
//! singleton cache check → parent delegation → depends-on pre-creation →
//! scoped instantiation → indirection handling → required-type check.
//!
//! # Examples
//! ```
//! use std::sync::Arc;
//! use tarkib_container::prelude::*;
//!
//! struct Greeter {
//!     greeting: String,
//! }
//!
//! let factory = ComponentFactory::new();
//! factory
//!     .register_type(
//!         ComponentType::builder::<Greeter>("Greeter")
//!             .constructor(vec![ParamSpec::str_("greeting")], |args| {
//!                 Ok(Greeter { greeting: args.str_(0)? })
//!             })
//!             .build(),
//!     )
//!     .unwrap();
//! factory
//!     .register_definition(
//!         "greeter",
//!         ComponentDefinition::for_class("Greeter")
//!             .with_ctor_arg(ArgumentValue::new(ValueSpec::literal("hello"))),
//!     )
//!     .unwrap();
//!
//! let greeter: Arc<Greeter> = factory.get_as("greeter").unwrap();
//! assert_eq!(greeter.greeting, "hello");
//! ```

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use dashmap::{DashMap, DashSet};
use parking_lot::{Mutex, RwLock};
use tracing::{debug, trace, warn};

use tarkib_support::rendering::suggest_similar;

use crate::alias::AliasRegistry;
use crate::convert::{ConversionService, SimpleConversionService};
use crate::definition::{ComponentDefinition, MergedDefinition};
use crate::error::{
    CircularDependsOnError, ContainerError, NoSuchDefinitionError, Result,
};
use crate::key::TypeKey;
use crate::registry::{
    ComponentModule, ComponentType, ModuleRegistry, TypeRegistry,
};
use crate::scope::{Scope, ScopeStrategy};
use crate::singleton::{DisposeFn, SingletonRegistry};
use crate::value::{ObjectHandle, Value, ValueSpec};

/// Marker prefix requesting the indirection object itself rather than its
/// product.
pub const INDIRECTION_PREFIX: &str = "&";

/// Chainable placeholder resolver; returning `None` short-circuits the
/// chain.
pub type EmbeddedValueResolver = Arc<dyn Fn(&str) -> Option<String> + Send + Sync>;

/// Evaluates expression-valued definition fields.
pub trait ExpressionEvaluator: Send + Sync {
    fn evaluate(&self, expression: &str, scope: &Scope) -> Result<Value>;
}

/// Hooks invoked around component initialization.
pub trait ComponentPostProcessor: Send + Sync {
    fn before_init(&self, _name: &str, _instance: &ObjectHandle) -> Result<()> {
        Ok(())
    }

    fn after_init(&self, _name: &str, _instance: &ObjectHandle) -> Result<()> {
        Ok(())
    }
}

/// Per-request creation state, threaded by reference through the
/// orchestrator and the resolution engine.
#[derive(Default)]
pub(crate) struct CreationContext {
    /// Prototype names currently being created in this request chain.
    pub(crate) prototypes: HashSet<String>,
}

/// The container: owns definitions, registered types and every managed
/// instance lifecycle.
pub struct ComponentFactory {
    pub(crate) parent: Option<Arc<ComponentFactory>>,
    pub(crate) definitions: RwLock<HashMap<String, ComponentDefinition>>,
    pub(crate) definition_order: Mutex<Vec<String>>,
    pub(crate) merged: Mutex<HashMap<String, Arc<MergedDefinition>>>,
    pub(crate) types: TypeRegistry,
    pub(crate) aliases: AliasRegistry,
    pub(crate) singletons: SingletonRegistry,
    pub(crate) scopes: RwLock<HashMap<String, Arc<dyn ScopeStrategy>>>,
    pub(crate) embedded_resolvers: RwLock<Vec<EmbeddedValueResolver>>,
    pub(crate) expression_evaluator: RwLock<Option<Arc<dyn ExpressionEvaluator>>>,
    pub(crate) conversion: RwLock<Arc<dyn ConversionService>>,
    pub(crate) post_processors: RwLock<Vec<Arc<dyn ComponentPostProcessor>>>,
    /// Products of singleton indirection objects.
    pub(crate) indirection_products: DashMap<String, ObjectHandle>,
    /// Names that have been created (or are about to be) at least once.
    pub(crate) already_created: DashSet<String>,
    pub(crate) frozen: AtomicBool,
    allow_override: AtomicBool,
    allow_circular: AtomicBool,
    cache_bean_metadata: AtomicBool,
    inner_seq: AtomicUsize,
}

impl Default for ComponentFactory {
    fn default() -> Self {
        Self::new()
    }
}

impl ComponentFactory {
    /// Creates a root factory.
    pub fn new() -> Self {
        Self::build(None)
    }

    /// Creates a factory delegating unresolvable requests to `parent`.
    pub fn with_parent(parent: Arc<ComponentFactory>) -> Self {
        Self::build(Some(parent))
    }

    fn build(parent: Option<Arc<ComponentFactory>>) -> Self {
        Self {
            parent,
            definitions: RwLock::new(HashMap::new()),
            definition_order: Mutex::new(Vec::new()),
            merged: Mutex::new(HashMap::new()),
            types: TypeRegistry::new(),
            aliases: AliasRegistry::new(),
            singletons: SingletonRegistry::new(),
            scopes: RwLock::new(HashMap::new()),
            embedded_resolvers: RwLock::new(Vec::new()),
            expression_evaluator: RwLock::new(None),
            conversion: RwLock::new(Arc::new(SimpleConversionService::new())),
            post_processors: RwLock::new(Vec::new()),
            indirection_products: DashMap::new(),
            already_created: DashSet::new(),
            frozen: AtomicBool::new(false),
            allow_override: AtomicBool::new(false),
            allow_circular: AtomicBool::new(true),
            cache_bean_metadata: AtomicBool::new(true),
            inner_seq: AtomicUsize::new(0),
        }
    }

    // ── Configuration ──

    /// Allow re-registering definitions and types under taken names.
    pub fn set_allow_override(&self, allow: bool) {
        self.allow_override.store(allow, Ordering::Release);
    }

    /// Allow circular singleton references via early exposure (default
    /// true); disabling turns such cycles into hard failures.
    pub fn set_allow_circular_references(&self, allow: bool) {
        self.allow_circular.store(allow, Ordering::Release);
    }

    pub(crate) fn allow_circular_references(&self) -> bool {
        self.allow_circular.load(Ordering::Acquire)
    }

    fn allows_override(&self) -> bool {
        self.allow_override.load(Ordering::Acquire)
    }

    pub(crate) fn cache_metadata(&self) -> bool {
        self.cache_bean_metadata.load(Ordering::Acquire)
    }

    /// Whether merged metadata is cached or recomputed on every access.
    pub fn set_cache_metadata(&self, cache: bool) {
        self.cache_bean_metadata.store(cache, Ordering::Release);
    }

    pub(crate) fn parent_factory(&self) -> Option<&Arc<ComponentFactory>> {
        self.parent.as_ref()
    }

    // ── Registration ──

    pub fn register_type(&self, ty: ComponentType) -> Result<()> {
        self.types.register(ty, self.allows_override())
    }

    pub fn register_definition(&self, name: &str, definition: ComponentDefinition) -> Result<()> {
        let mut definitions = self.definitions.write();
        if definitions.contains_key(name) {
            if !self.allows_override() {
                return Err(ContainerError::InvalidDefinition {
                    name: name.to_string(),
                    message: "a definition is already registered under this name".into(),
                });
            }
            debug!(component = name, "Overriding existing definition");
            self.clear_merged_definition(name);
            self.already_created.remove(name);
        } else {
            self.definition_order.lock().push(name.to_string());
        }
        definitions.insert(name.to_string(), definition);
        Ok(())
    }

    pub fn register_alias(&self, name: &str, alias: &str) -> Result<()> {
        self.aliases.register_alias(name, alias)
    }

    pub fn aliases_of(&self, name: &str) -> Vec<String> {
        self.aliases.aliases_of(name)
    }

    /// Applies a renaming transform to every registered alias pair.
    pub fn resolve_aliases(&self, transform: &dyn Fn(&str) -> Option<String>) -> Result<()> {
        self.aliases.resolve_aliases(transform)
    }

    /// Registers a custom scope strategy.
    ///
    /// The `singleton` and `prototype` scopes are built in and cannot be
    /// replaced.
    pub fn register_scope(&self, scope_name: &str, strategy: Arc<dyn ScopeStrategy>) -> Result<()> {
        if scope_name == Scope::Singleton.name() || scope_name == Scope::Prototype.name() {
            return Err(ContainerError::InvalidDefinition {
                name: scope_name.to_string(),
                message: "the singleton and prototype scopes cannot be replaced".into(),
            });
        }
        self.scopes.write().insert(scope_name.to_string(), strategy);
        Ok(())
    }

    pub fn registered_scope_names(&self) -> Vec<String> {
        self.scopes.read().keys().cloned().collect()
    }

    /// Registers a fully-constructed singleton instance under `name`.
    pub fn register_singleton_instance<T: Send + Sync + 'static>(
        &self,
        name: &str,
        instance: T,
    ) -> Result<()> {
        self.singletons.register_singleton(name, ObjectHandle::new(instance))
    }

    pub fn add_embedded_value_resolver(
        &self,
        resolver: impl Fn(&str) -> Option<String> + Send + Sync + 'static,
    ) {
        self.embedded_resolvers.write().push(Arc::new(resolver));
    }

    pub fn set_expression_evaluator(&self, evaluator: Arc<dyn ExpressionEvaluator>) {
        *self.expression_evaluator.write() = Some(evaluator);
    }

    pub fn set_conversion_service(&self, conversion: Arc<dyn ConversionService>) {
        *self.conversion.write() = conversion;
    }

    pub fn add_post_processor(&self, processor: Arc<dyn ComponentPostProcessor>) {
        self.post_processors.write().push(processor);
    }

    /// Installs a [`ComponentModule`]'s registrations.
    pub fn install_module(&self, module: &dyn ComponentModule) -> Result<()> {
        debug!(module = module.name(), "Installing component module");
        let mut installer = ModuleInstaller(self);
        module.register(&mut installer)
    }

    // ── Introspection ──

    pub fn definition_names(&self) -> Vec<String> {
        self.definition_order.lock().clone()
    }

    /// Returns the raw (unmerged) definition registered under `name`.
    pub fn definition(&self, name: &str) -> Result<ComponentDefinition> {
        self.local_definition(&self.transformed_name(name))
    }

    pub fn contains_local_definition(&self, name: &str) -> bool {
        self.definitions.read().contains_key(name)
    }

    pub(crate) fn local_definition(&self, name: &str) -> Result<ComponentDefinition> {
        match self.definitions.read().get(name) {
            Some(definition) => Ok(definition.clone()),
            None => {
                let names = self.definition_order.lock().clone();
                let available: Vec<&str> = names.iter().map(String::as_str).collect();
                Err(ContainerError::NoSuchDefinition(NoSuchDefinitionError {
                    requested: name.to_string(),
                    required_by: None,
                    suggestions: suggest_similar(name, &available, 3),
                }))
            }
        }
    }

    /// Whether a component (definition or manually registered singleton)
    /// exists under `name`, here or up the factory hierarchy.
    pub fn contains(&self, name: &str) -> bool {
        let canonical = self.transformed_name(name);
        if self.singletons.contains(&canonical) || self.contains_local_definition(&canonical) {
            return true;
        }
        match self.parent_factory() {
            Some(parent) => parent.contains(&self.original_name(name)),
            None => false,
        }
    }

    pub fn contains_singleton(&self, name: &str) -> bool {
        self.singletons.contains(&self.transformed_name(name))
    }

    pub fn singleton_names(&self) -> Vec<String> {
        self.singletons.names()
    }

    pub fn is_singleton(&self, name: &str) -> Result<bool> {
        let canonical = self.transformed_name(name);
        if let Some(handle) = self.singletons.get_singleton(&canonical, false) {
            let is_indirection = self
                .type_for_instance(&handle.key())
                .is_some_and(|t| t.indirection().is_some());
            let dereference = name.starts_with(INDIRECTION_PREFIX);
            return Ok(is_indirection || !dereference);
        }
        if !self.contains_local_definition(&canonical) {
            if let Some(parent) = self.parent_factory() {
                return parent.is_singleton(&self.original_name(name));
            }
        }
        Ok(self.merged_local_definition(&canonical)?.is_singleton())
    }

    pub fn is_prototype(&self, name: &str) -> Result<bool> {
        let canonical = self.transformed_name(name);
        if !self.contains_local_definition(&canonical) {
            if let Some(parent) = self.parent_factory() {
                return parent.is_prototype(&self.original_name(name));
            }
        }
        Ok(self.merged_local_definition(&canonical)?.is_prototype())
    }

    /// Best-effort type prediction without forcing full instantiation.
    pub fn type_of(&self, name: &str) -> Result<Option<TypeKey>> {
        let canonical = self.transformed_name(name);
        let dereference = name.starts_with(INDIRECTION_PREFIX);

        if let Some(handle) = self.singletons.get_singleton(&canonical, false) {
            if !dereference {
                if let Some(ty) = self.type_for_instance(&handle.key()) {
                    if let Some(indirection) = ty.indirection() {
                        return Ok(Some(indirection.produces));
                    }
                }
            }
            return Ok(Some(handle.key()));
        }

        if !self.contains_local_definition(&canonical) {
            if let Some(parent) = self.parent_factory() {
                return parent.type_of(&self.original_name(name));
            }
        }

        let merged = self.merged_local_definition(&canonical)?;
        let Some(raw) = self.predict_type(&canonical, &merged) else {
            return Ok(None);
        };
        if !dereference {
            if let Some(ty) = self.type_for_instance(&raw) {
                if let Some(indirection) = ty.indirection() {
                    return Ok(Some(indirection.produces));
                }
            }
        }
        Ok(Some(raw))
    }

    // ── Retrieval ──

    /// Returns the component registered under `name`, constructing it as
    /// its scope dictates.
    pub fn get(&self, name: &str) -> Result<ObjectHandle> {
        let mut ctx = CreationContext::default();
        self.do_get(name, None, &mut ctx)
    }

    /// Returns the component, constructed with explicit call-site
    /// arguments (only meaningful when a new instance is created).
    pub fn get_with_args(&self, name: &str, args: Vec<Value>) -> Result<ObjectHandle> {
        let mut ctx = CreationContext::default();
        self.do_get(name, Some(&args), &mut ctx)
    }

    /// Typed retrieval; attempts a view conversion before failing with
    /// [`ContainerError::NotOfRequiredType`].
    pub fn get_as<T: Send + Sync + 'static>(&self, name: &str) -> Result<Arc<T>> {
        let handle = self.get(name)?;
        self.require_type::<T>(name, handle)
    }

    /// Like [`ComponentFactory::get_as`] for cloneable view values such as
    /// `Arc<dyn Trait>`.
    pub fn get_view<V: Clone + Send + Sync + 'static>(&self, name: &str) -> Result<V> {
        let view = self.get_as::<V>(name)?;
        Ok((*view).clone())
    }

    fn require_type<T: Send + Sync + 'static>(
        &self,
        name: &str,
        handle: ObjectHandle,
    ) -> Result<Arc<T>> {
        if let Some(typed) = handle.downcast::<T>() {
            return Ok(typed);
        }
        let target = TypeKey::of::<T>();
        if let Some(ty) = self.type_for_instance(&handle.key()) {
            if let Ok(view) = ty.cast_to(&handle, &target) {
                if let Some(typed) = view.downcast::<T>() {
                    return Ok(typed);
                }
            }
        }
        Err(ContainerError::NotOfRequiredType {
            name: name.to_string(),
            required: target.type_name().to_string(),
            actual: handle.key().type_name().to_string(),
        })
    }

    /// Internal retrieval for nested resolution (references, autowiring,
    /// factory components).
    pub(crate) fn get_internal(
        &self,
        name: &str,
        ctx: &mut CreationContext,
    ) -> Result<ObjectHandle> {
        self.do_get(name, None, ctx)
    }

    pub(crate) fn do_get(
        &self,
        name: &str,
        explicit: Option<&[Value]>,
        ctx: &mut CreationContext,
    ) -> Result<ObjectHandle> {
        let canonical = self.transformed_name(name);

        // Eagerly check the singleton cache, allowing early references for
        // circular-resolution consumers.
        if explicit.is_none() {
            if let Some(shared) = self.singletons.get_singleton(&canonical, true) {
                if self.singletons.is_singleton_in_creation(&canonical) {
                    trace!(
                        component = %canonical,
                        "Returning eagerly cached singleton that is not fully initialized yet"
                    );
                } else {
                    trace!(component = %canonical, "Returning cached singleton");
                }
                return self.object_for_instance(shared, name, &canonical, None);
            }
        }

        // A prototype already being created in this request chain means an
        // unresolvable circular reference.
        if ctx.prototypes.contains(&canonical) {
            return Err(ContainerError::CurrentlyInCreation { name: canonical });
        }

        if !self.contains_local_definition(&canonical) {
            if let Some(parent) = self.parent_factory() {
                return parent.do_get(&self.original_name(name), explicit, ctx);
            }
        }

        self.mark_created(&canonical);
        match self.get_from_definition(name, &canonical, explicit, ctx) {
            Ok(handle) => Ok(handle),
            Err(err) => {
                self.cleanup_after_failure(&canonical);
                Err(err)
            }
        }
    }

    fn get_from_definition(
        &self,
        name: &str,
        canonical: &str,
        explicit: Option<&[Value]>,
        ctx: &mut CreationContext,
    ) -> Result<ObjectHandle> {
        let merged = self.merged_local_definition(canonical)?;
        self.check_merged(&merged, canonical)?;

        // Guarantee initialization of pre-declared dependencies.
        for dep in &merged.depends_on {
            let dep_canonical = self.transformed_name(dep);
            if self.singletons.is_dependent(canonical, &dep_canonical) {
                return Err(ContainerError::CircularDependsOn(CircularDependsOnError {
                    chain: vec![
                        canonical.to_string(),
                        dep_canonical.clone(),
                        canonical.to_string(),
                    ],
                }));
            }
            self.singletons.register_dependent(&dep_canonical, canonical);
            self.do_get(dep, None, ctx).map_err(|err| match err {
                err @ ContainerError::CircularDependsOn(_) => err,
                other => ContainerError::creation(
                    canonical,
                    format!("depends-on component '{dep}' could not be initialized"),
                    Some(other),
                ),
            })?;
        }

        match &merged.scope {
            Scope::Singleton => {
                let lookup = self.singletons.get_or_create(canonical, || {
                    self.create_component(canonical, &merged, explicit, &mut *ctx).map_err(
                        |err| {
                            // Evict eagerly cached partial state so a later
                            // request can retry cleanly.
                            self.singletons.destroy_singleton(canonical);
                            err
                        },
                    )
                })?;
                self.object_for_instance(lookup.into_handle(), name, canonical, Some(&merged))
            }
            Scope::Prototype => {
                ctx.prototypes.insert(canonical.to_string());
                let created = self.create_component(canonical, &merged, explicit, ctx);
                ctx.prototypes.remove(canonical);
                self.object_for_instance(created?, name, canonical, Some(&merged))
            }
            Scope::Named(scope_name) => {
                let strategy =
                    self.scopes.read().get(scope_name).cloned().ok_or_else(|| {
                        ContainerError::NoSuchScope { scope: scope_name.clone() }
                    })?;
                let mut producer = || {
                    ctx.prototypes.insert(canonical.to_string());
                    let created = self.create_component(canonical, &merged, explicit, ctx);
                    ctx.prototypes.remove(canonical);
                    created
                };
                let scoped = strategy.get(canonical, &mut producer).map_err(|err| match err {
                    err @ ContainerError::ScopeNotActive { .. } => ContainerError::creation(
                        canonical,
                        format!("scope '{scope_name}' is not active for the current context"),
                        Some(err),
                    ),
                    other => other,
                })?;
                self.object_for_instance(scoped, name, canonical, Some(&merged))
            }
        }
    }

    /// Creates a raw instance and runs it through population and
    /// initialization.
    pub(crate) fn create_component(
        &self,
        name: &str,
        merged: &Arc<MergedDefinition>,
        explicit: Option<&[Value]>,
        ctx: &mut CreationContext,
    ) -> Result<ObjectHandle> {
        debug!(component = name, scope = %merged.scope, "Creating component instance");
        let instance = if merged.uses_factory_method() {
            self.instantiate_with_factory_method(name, merged, explicit, ctx)
        } else {
            self.autowire_constructor(name, merged, explicit, ctx)
        }
        .map_err(|err| match err {
            err @ ContainerError::Creation(_) => err,
            other => ContainerError::creation(name, "instantiation failed", Some(other)),
        })?;
        merged.set_resolved_type(instance.key());

        // Eagerly expose an early reference so circular singleton
        // references can resolve while this instance is being populated.
        if merged.is_singleton()
            && self.allow_circular_references()
            && self.singletons.is_singleton_in_creation(name)
        {
            trace!(component = name, "Eagerly exposing early reference");
            let early = instance.clone();
            self.singletons.add_singleton_factory(name, Box::new(move || early));
        }

        self.populate_properties(name, merged, &instance, ctx)?;
        self.initialize_component(name, &instance)?;
        self.register_disposable_if_necessary(name, merged, &instance);
        Ok(instance)
    }

    fn populate_properties(
        &self,
        name: &str,
        merged: &Arc<MergedDefinition>,
        instance: &ObjectHandle,
        ctx: &mut CreationContext,
    ) -> Result<()> {
        if merged.properties.is_empty() {
            return Ok(());
        }
        let Some(ty) = self.type_for_instance(&instance.key()) else {
            return Err(ContainerError::creation(
                name,
                format!("no registered type for instances of {}", instance.key()),
                None,
            ));
        };
        for property in merged.properties.iter() {
            let Some(setter) = ty.setter(&property.name) else {
                return Err(ContainerError::creation(
                    name,
                    format!("type {} has no property '{}'", ty.class_name(), property.name),
                    None,
                ));
            };
            let value = self.resolve_value_spec(name, merged, &property.spec, ctx)?;
            let converted = self.convert_for_param(&value, &setter.param).map_err(|err| {
                ContainerError::creation(
                    name,
                    format!("could not convert value for property '{}'", property.name),
                    Some(err),
                )
            })?;
            setter.apply(instance, converted).map_err(|err| {
                ContainerError::creation(
                    name,
                    format!("error setting property '{}'", property.name),
                    Some(err),
                )
            })?;
        }
        Ok(())
    }

    fn initialize_component(&self, name: &str, instance: &ObjectHandle) -> Result<()> {
        let processors = self.post_processors.read().clone();
        for processor in &processors {
            processor.before_init(name, instance).map_err(|err| {
                ContainerError::creation(name, "post-processing before initialization failed", Some(err))
            })?;
        }
        if let Some(ty) = self.type_for_instance(&instance.key()) {
            if let Some(init) = ty.init_callback() {
                init(instance).map_err(|err| {
                    ContainerError::creation(name, "initialization callback failed", Some(err))
                })?;
            }
        }
        for processor in &processors {
            processor.after_init(name, instance).map_err(|err| {
                ContainerError::creation(name, "post-processing after initialization failed", Some(err))
            })?;
        }
        Ok(())
    }

    fn register_disposable_if_necessary(
        &self,
        name: &str,
        merged: &MergedDefinition,
        instance: &ObjectHandle,
    ) {
        if merged.is_prototype() {
            return;
        }
        let Some(ty) = self.type_for_instance(&instance.key()) else {
            return;
        };
        let Some(destroy) = ty.destroy_callback() else {
            return;
        };
        let destroy = destroy.clone();
        let handle = instance.clone();
        let callback: DisposeFn = Box::new(move || destroy(&handle));
        if merged.is_singleton() {
            self.singletons.register_disposable(name, callback);
        } else if let Scope::Named(scope_name) = &merged.scope {
            if let Some(strategy) = self.scopes.read().get(scope_name).cloned() {
                let name_owned = name.to_string();
                strategy.register_destruction_callback(
                    name,
                    Box::new(move || {
                        if let Err(err) = callback() {
                            warn!(component = %name_owned, error = %err, "Scoped destruction callback failed");
                        }
                    }),
                );
            }
        }
    }

    /// Adapts a raw instance for the caller: indirection objects yield
    /// their product unless the caller asked for the indirection itself.
    fn object_for_instance(
        &self,
        instance: ObjectHandle,
        name: &str,
        canonical: &str,
        merged: Option<&Arc<MergedDefinition>>,
    ) -> Result<ObjectHandle> {
        let wants_indirection = name.starts_with(INDIRECTION_PREFIX);
        let ty = self.type_for_instance(&instance.key());
        let indirection = ty.as_ref().and_then(|t| t.indirection().cloned());

        if wants_indirection {
            if indirection.is_none() {
                return Err(ContainerError::NotAnIndirection {
                    name: canonical.to_string(),
                    type_name: instance.key().type_name().to_string(),
                });
            }
            if let Some(merged) = merged {
                merged.set_indirection_flag(true);
            }
            return Ok(instance);
        }

        let Some(indirection) = indirection else {
            return Ok(instance);
        };
        if let Some(merged) = merged {
            merged.set_indirection_flag(true);
        }

        if let Some(cached) = self.indirection_products.get(canonical).map(|r| r.value().clone())
        {
            return Ok(cached);
        }
        let product = indirection.access(&instance).map_err(|err| {
            ContainerError::creation(canonical, "indirection accessor failed", Some(err))
        })?;
        let singleton_owner = merged.map_or(true, |m| m.is_singleton());
        if singleton_owner && self.singletons.contains(canonical) {
            self.indirection_products.insert(canonical.to_string(), product.clone());
        }
        Ok(product)
    }

    // ── Value resolution ──

    /// Resolves a declarative value: literals (with embedded-value
    /// substitution on strings), references, placeholders, expressions and
    /// inner definitions.
    pub(crate) fn resolve_value_spec(
        &self,
        requesting: &str,
        containing: &Arc<MergedDefinition>,
        spec: &ValueSpec,
        ctx: &mut CreationContext,
    ) -> Result<Value> {
        match spec {
            ValueSpec::Literal(Value::Str(s)) => Ok(Value::Str(
                self.resolve_embedded_value(s).unwrap_or_else(|| s.clone()),
            )),
            ValueSpec::Literal(value) => Ok(value.clone()),
            ValueSpec::Ref(target) => {
                let handle = self.get_internal(target, ctx)?;
                let canonical = self.transformed_name(target);
                self.singletons.register_dependent(&canonical, requesting);
                Ok(Value::Object(handle))
            }
            ValueSpec::Placeholder(expr) => Ok(match self.resolve_embedded_value(expr) {
                Some(resolved) => Value::Str(resolved),
                None => Value::Null,
            }),
            ValueSpec::Expression(expr) => {
                let evaluator = self.expression_evaluator.read().clone();
                match evaluator {
                    Some(evaluator) => evaluator.evaluate(expr, &containing.scope),
                    None => Ok(Value::Str(expr.clone())),
                }
            }
            ValueSpec::Inner(definition) => {
                self.create_inner(requesting, containing, definition, ctx)
            }
        }
    }

    fn create_inner(
        &self,
        requesting: &str,
        containing: &Arc<MergedDefinition>,
        definition: &ComponentDefinition,
        ctx: &mut CreationContext,
    ) -> Result<Value> {
        let seq = self.inner_seq.fetch_add(1, Ordering::Relaxed);
        let inner_name = format!("{requesting}#inner{seq}");
        let merged = self.merged_definition_for(&inner_name, definition, Some(containing.as_ref()))?;
        self.check_merged(&merged, &inner_name)?;

        let handle = self.create_component(&inner_name, &merged, None, ctx)?;

        // Containment for destruction ordering: the outer component is
        // destroyed before its contained parts.
        if !merged.is_prototype() {
            if let Some(ty) = self.type_for_instance(&handle.key()) {
                if let Some(destroy) = ty.destroy_callback() {
                    let destroy = destroy.clone();
                    let disposable_handle = handle.clone();
                    self.singletons.register_disposable(
                        &inner_name,
                        Box::new(move || destroy(&disposable_handle)),
                    );
                    self.singletons.register_contained(&inner_name, requesting);
                }
            }
        }
        let exposed = self.object_for_instance(handle, &inner_name, &inner_name, Some(&merged))?;
        Ok(Value::Object(exposed))
    }

    /// Runs a string through the embedded-value resolver chain;
    /// short-circuits to `None` when any stage yields `None`.
    pub fn resolve_embedded_value(&self, value: &str) -> Option<String> {
        let resolvers = self.embedded_resolvers.read();
        let mut current = value.to_string();
        for resolver in resolvers.iter() {
            match resolver(&current) {
                Some(next) => current = next,
                None => return None,
            }
        }
        Some(current)
    }

    // ── Type machinery ──

    pub(crate) fn component_type_for(
        &self,
        name: &str,
        merged: &MergedDefinition,
    ) -> Result<Arc<ComponentType>> {
        let Some(class_name) = merged.class_name.as_deref() else {
            return Err(ContainerError::InvalidDefinition {
                name: name.to_string(),
                message: "definition does not declare a class".into(),
            });
        };
        self.types.get(class_name).ok_or_else(|| ContainerError::InvalidDefinition {
            name: name.to_string(),
            message: format!("class '{class_name}' is not registered"),
        })
    }

    /// Finds the registered type for a concrete instance key, here or up
    /// the hierarchy.
    pub(crate) fn type_for_instance(&self, key: &TypeKey) -> Option<Arc<ComponentType>> {
        self.types
            .get_by_key(key)
            .or_else(|| self.parent_factory().and_then(|p| p.type_for_instance(key)))
    }

    /// Whether an instance of `from` can satisfy `to`, directly or via a
    /// registered view.
    pub(crate) fn key_assignable(&self, from: &TypeKey, to: &TypeKey) -> bool {
        if from == to {
            return true;
        }
        if self.types.get_by_key(from).is_some_and(|t| t.assignable_to(to)) {
            return true;
        }
        self.parent_factory().is_some_and(|p| p.key_assignable(from, to))
    }

    /// Predicts the raw type a definition will produce, memoizing on the
    /// merged definition.
    pub(crate) fn predict_type(&self, name: &str, merged: &MergedDefinition) -> Option<TypeKey> {
        if let Some(key) = merged.resolved_type() {
            return Some(key);
        }
        let key = match &merged.factory_method {
            Some(method) => {
                let (factory_ty, is_static) = match &merged.factory_component {
                    Some(factory_component) => {
                        let factory_name = self.transformed_name(factory_component);
                        if factory_name == name {
                            return None;
                        }
                        let factory_merged = self.merged_definition(&factory_name).ok()?;
                        let factory_key = self.predict_type(&factory_name, &factory_merged)?;
                        (self.type_for_instance(&factory_key)?, false)
                    }
                    None => (self.types.get(merged.class_name.as_deref()?)?, true),
                };
                let candidates = factory_ty.factory_method_candidates(method, is_static);
                let first = candidates.first()?.produces;
                if !candidates.iter().all(|c| c.produces == first) {
                    return None;
                }
                first
            }
            None => self.types.get(merged.class_name.as_deref()?)?.key(),
        };
        merged.set_resolved_type(key);
        Some(key)
    }

    /// The type key a definition exposes for by-type matching: the
    /// indirection product for unprefixed indirection objects.
    fn type_for_matching(&self, name: &str, merged: &MergedDefinition) -> Option<TypeKey> {
        let raw = self.predict_type(name, merged)?;
        if let Some(ty) = self.type_for_instance(&raw) {
            if let Some(indirection) = ty.indirection() {
                merged.set_indirection_flag(true);
                return Some(indirection.produces);
            }
        }
        Some(raw)
    }

    /// Definition names whose predicted type can satisfy `key`, excluding
    /// the requesting definition itself (self-reference guard).
    pub(crate) fn autowire_candidates(&self, key: &TypeKey, exclude: &str) -> Vec<String> {
        let mut result = Vec::new();
        let names = self.definition_order.lock().clone();
        for name in names {
            if name == exclude {
                continue;
            }
            let Ok(merged) = self.merged_local_definition(&name) else {
                continue;
            };
            if merged.abstract_flag {
                continue;
            }
            let Some(candidate_key) = self.type_for_matching(&name, &merged) else {
                continue;
            };
            if self.key_assignable(&candidate_key, key) {
                result.push(name);
            }
        }
        if let Some(parent) = self.parent_factory() {
            for name in parent.autowire_candidates(key, exclude) {
                if !result.contains(&name) && !self.contains_local_definition(&name) {
                    result.push(name);
                }
            }
        }
        result
    }

    pub(crate) fn conversion_service(&self) -> Arc<dyn ConversionService> {
        self.conversion.read().clone()
    }

    // ── Name transformation ──

    /// Strips the indirection marker and resolves aliases to the
    /// canonical component name.
    pub(crate) fn transformed_name(&self, name: &str) -> String {
        let mut stripped = name;
        while let Some(rest) = stripped.strip_prefix(INDIRECTION_PREFIX) {
            stripped = rest;
        }
        self.aliases.canonical_name(stripped)
    }

    /// Canonical name with the indirection marker preserved, for parent
    /// delegation.
    fn original_name(&self, name: &str) -> String {
        let canonical = self.transformed_name(name);
        if name.starts_with(INDIRECTION_PREFIX) {
            format!("{INDIRECTION_PREFIX}{canonical}")
        } else {
            canonical
        }
    }

    // ── Lifecycle ──

    /// Marks `name` as created (or about to be), re-merging its definition
    /// once in case metadata changed since registration.
    fn mark_created(&self, name: &str) {
        if !self.already_created.contains(name) {
            self.clear_merged_definition(name);
            self.already_created.insert(name.to_string());
        }
    }

    fn cleanup_after_failure(&self, name: &str) {
        self.already_created.remove(name);
    }

    /// Eagerly instantiates every non-lazy, non-abstract singleton
    /// definition, in registration order.
    pub fn pre_instantiate_singletons(&self) -> Result<()> {
        debug!("Pre-instantiating non-lazy singletons");
        for name in self.definition_names() {
            let merged = self.merged_local_definition(&name)?;
            if !merged.abstract_flag && merged.is_singleton() && !merged.lazy_init {
                self.get(&name)?;
            }
        }
        Ok(())
    }

    /// Triggers full ordered teardown of all singletons.
    pub fn destroy_all(&self) {
        debug!("Destroying all singletons");
        self.indirection_products.clear();
        self.singletons.destroy_singletons();
    }

    /// Removes the instance bound in a custom scope and runs its
    /// destruction callback.
    pub fn destroy_scoped(&self, name: &str) -> Result<()> {
        let canonical = self.transformed_name(name);
        let merged = self.merged_local_definition(&canonical)?;
        let Scope::Named(scope_name) = &merged.scope else {
            return Err(ContainerError::InvalidDefinition {
                name: canonical,
                message: "component does not live in a custom scope".into(),
            });
        };
        let strategy = self
            .scopes
            .read()
            .get(scope_name)
            .cloned()
            .ok_or_else(|| ContainerError::NoSuchScope { scope: scope_name.clone() })?;
        if let Some(handle) = strategy.remove(&canonical) {
            if let Some(ty) = self.type_for_instance(&handle.key()) {
                if let Some(destroy) = ty.destroy_callback() {
                    if let Err(err) = destroy(&handle) {
                        warn!(component = %canonical, error = %err, "Destruction of scoped component threw an error");
                    }
                }
            }
        }
        Ok(())
    }
}

impl fmt::Debug for ComponentFactory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ComponentFactory")
            .field("definitions", &self.definition_order.lock().len())
            .field("types", &self.types.len())
            .field("singletons", &self.singletons.count())
            .field("parented", &self.parent.is_some())
            .finish()
    }
}

/// Adapter letting [`ComponentModule`]s register into a live factory.
struct ModuleInstaller<'a>(&'a ComponentFactory);

impl ModuleRegistry for ModuleInstaller<'_> {
    fn register_type(&mut self, ty: ComponentType) -> Result<()> {
        self.0.register_type(ty)
    }

    fn register_definition(&mut self, name: &str, definition: ComponentDefinition) -> Result<()> {
        self.0.register_definition(name, definition)
    }

    fn register_alias(&mut self, name: &str, alias: &str) -> Result<()> {
        self.0.register_alias(name, alias)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::definition::AutowireMode;
    use crate::registry::ParamSpec;
    use crate::value::ArgumentValue;
    use std::sync::atomic::AtomicU32;

    struct Engine {
        power: RwLock<i64>,
    }

    struct Car {
        engine: RwLock<Option<Arc<Engine>>>,
    }

    fn engine_type() -> ComponentType {
        ComponentType::builder::<Engine>("Engine")
            .constructor(vec![], |_| Ok(Engine { power: RwLock::new(0) }))
            .constructor(vec![ParamSpec::int("power")], |args| {
                Ok(Engine { power: RwLock::new(args.int(0)?) })
            })
            .setter("power", ParamSpec::int("power"), |engine, value| {
                *engine.power.write() = value.as_i64().unwrap_or_default();
                Ok(())
            })
            .build()
    }

    fn car_type() -> ComponentType {
        ComponentType::builder::<Car>("Car")
            .constructor(vec![], |_| Ok(Car { engine: RwLock::new(None) }))
            .setter("engine", ParamSpec::object::<Engine>("engine"), |car, value| {
                *car.engine.write() = value.downcast::<Engine>();
                Ok(())
            })
            .build()
    }

    fn engine_factory() -> ComponentFactory {
        let factory = ComponentFactory::new();
        factory.register_type(engine_type()).unwrap();
        factory
    }

    #[test]
    fn engine_car_scenario() {
        let factory = engine_factory();
        factory.register_type(car_type()).unwrap();
        factory
            .register_definition(
                "engine",
                ComponentDefinition::for_class("Engine")
                    .with_property("power", ValueSpec::literal(100i64)),
            )
            .unwrap();
        factory
            .register_definition(
                "car",
                ComponentDefinition::for_class("Car")
                    .with_property("engine", ValueSpec::reference("engine")),
            )
            .unwrap();

        let car: Arc<Car> = factory.get_as("car").unwrap();
        let engine = car.engine.read().clone().unwrap();
        assert_eq!(*engine.power.read(), 100);

        let car_again: Arc<Car> = factory.get_as("car").unwrap();
        assert!(Arc::ptr_eq(&car, &car_again));

        let engine_direct: Arc<Engine> = factory.get_as("engine").unwrap();
        assert!(Arc::ptr_eq(&engine, &engine_direct));
    }

    #[test]
    fn prototype_returns_fresh_equal_instances() {
        let factory = engine_factory();
        factory
            .register_definition(
                "engine",
                ComponentDefinition::for_class("Engine")
                    .with_scope(Scope::Prototype)
                    .with_property("power", ValueSpec::literal(50i64)),
            )
            .unwrap();

        let first: Arc<Engine> = factory.get_as("engine").unwrap();
        let second: Arc<Engine> = factory.get_as("engine").unwrap();
        assert!(!Arc::ptr_eq(&first, &second));
        assert_eq!(*first.power.read(), *second.power.read());
        assert!(factory.is_prototype("engine").unwrap());
        assert!(!factory.is_singleton("engine").unwrap());
    }

    struct Alpha {
        beta: RwLock<Option<Arc<Beta>>>,
    }

    struct Beta {
        alpha: RwLock<Option<Arc<Alpha>>>,
    }

    fn circular_factory() -> ComponentFactory {
        let factory = ComponentFactory::new();
        factory
            .register_type(
                ComponentType::builder::<Alpha>("Alpha")
                    .constructor(vec![], |_| Ok(Alpha { beta: RwLock::new(None) }))
                    .setter("beta", ParamSpec::object::<Beta>("beta"), |alpha, value| {
                        *alpha.beta.write() = value.downcast::<Beta>();
                        Ok(())
                    })
                    .build(),
            )
            .unwrap();
        factory
            .register_type(
                ComponentType::builder::<Beta>("Beta")
                    .constructor(vec![], |_| Ok(Beta { alpha: RwLock::new(None) }))
                    .setter("alpha", ParamSpec::object::<Alpha>("alpha"), |beta, value| {
                        *beta.alpha.write() = value.downcast::<Alpha>();
                        Ok(())
                    })
                    .build(),
            )
            .unwrap();
        factory
            .register_definition(
                "alpha",
                ComponentDefinition::for_class("Alpha")
                    .with_property("beta", ValueSpec::reference("beta")),
            )
            .unwrap();
        factory
            .register_definition(
                "beta",
                ComponentDefinition::for_class("Beta")
                    .with_property("alpha", ValueSpec::reference("alpha")),
            )
            .unwrap();
        factory
    }

    #[test]
    fn circular_singletons_resolve_via_early_exposure() {
        let factory = circular_factory();

        let alpha: Arc<Alpha> = factory.get_as("alpha").unwrap();
        let beta: Arc<Beta> = factory.get_as("beta").unwrap();

        let alpha_beta = alpha.beta.read().clone().unwrap();
        let beta_alpha = beta.alpha.read().clone().unwrap();
        assert!(Arc::ptr_eq(&alpha_beta, &beta));
        assert!(Arc::ptr_eq(&beta_alpha, &alpha));
    }

    #[test]
    fn circular_singletons_fail_without_early_exposure() {
        let factory = circular_factory();
        factory.set_allow_circular_references(false);

        let err = factory.get("alpha").unwrap_err();
        assert!(format!("{err}").contains("currently in creation"));
    }

    struct Widget {
        label: String,
        count: i64,
        used_two_arg: bool,
    }

    fn widget_factory() -> ComponentFactory {
        let factory = ComponentFactory::new();
        factory
            .register_type(
                ComponentType::builder::<Widget>("Widget")
                    .constructor(vec![ParamSpec::str_("label")], |args| {
                        Ok(Widget { label: args.str_(0)?, count: -1, used_two_arg: false })
                    })
                    .constructor(
                        vec![ParamSpec::str_("label"), ParamSpec::int("count")],
                        |args| {
                            Ok(Widget {
                                label: args.str_(0)?,
                                count: args.int(1)?,
                                used_two_arg: true,
                            })
                        },
                    )
                    .build(),
            )
            .unwrap();
        factory
    }

    #[test]
    fn declared_arguments_select_matching_arity() {
        let factory = widget_factory();
        factory
            .register_definition(
                "two",
                ComponentDefinition::for_class("Widget")
                    .with_ctor_arg(ArgumentValue::new(ValueSpec::literal("a")))
                    .with_ctor_arg(ArgumentValue::new(ValueSpec::literal(5i64))),
            )
            .unwrap();
        factory
            .register_definition(
                "one",
                ComponentDefinition::for_class("Widget")
                    .with_ctor_arg(ArgumentValue::new(ValueSpec::literal("a"))),
            )
            .unwrap();

        let two: Arc<Widget> = factory.get_as("two").unwrap();
        assert!(two.used_two_arg);
        assert_eq!(two.label, "a");
        assert_eq!(two.count, 5);

        let one: Arc<Widget> = factory.get_as("one").unwrap();
        assert!(!one.used_two_arg);
        assert_eq!(one.label, "a");
    }

    trait Left: Send + Sync {}
    trait Right: Send + Sync {}

    struct Dual;
    impl Left for Dual {}
    impl Right for Dual {}

    struct Pair {
        order: &'static str,
    }

    fn pair_factory() -> ComponentFactory {
        let factory = ComponentFactory::new();
        factory
            .register_type(
                ComponentType::builder::<Dual>("Dual")
                    .constructor(vec![], |_| Ok(Dual))
                    .view(|dual| dual as Arc<dyn Left>)
                    .view(|dual| dual as Arc<dyn Right>)
                    .build(),
            )
            .unwrap();
        factory
            .register_type(
                ComponentType::builder::<Pair>("Pair")
                    .constructor(
                        vec![
                            ParamSpec::object::<Arc<dyn Left>>("left"),
                            ParamSpec::object::<Arc<dyn Right>>("right"),
                        ],
                        |_| Ok(Pair { order: "left-right" }),
                    )
                    .constructor(
                        vec![
                            ParamSpec::object::<Arc<dyn Right>>("right"),
                            ParamSpec::object::<Arc<dyn Left>>("left"),
                        ],
                        |_| Ok(Pair { order: "right-left" }),
                    )
                    .build(),
            )
            .unwrap();
        factory
            .register_definition("dual1", ComponentDefinition::for_class("Dual"))
            .unwrap();
        factory
            .register_definition("dual2", ComponentDefinition::for_class("Dual"))
            .unwrap();
        factory
    }

    #[test]
    fn strict_resolution_reports_ambiguity() {
        let factory = pair_factory();
        factory
            .register_definition(
                "pair",
                ComponentDefinition::for_class("Pair")
                    .with_lenient_resolution(false)
                    .with_ctor_arg(ArgumentValue::new(ValueSpec::reference("dual1")))
                    .with_ctor_arg(ArgumentValue::new(ValueSpec::reference("dual2"))),
            )
            .unwrap();

        let err = factory.get("pair").unwrap_err();
        let mut current = &err;
        let mut found = false;
        loop {
            match current {
                ContainerError::AmbiguousConstructor(_) => {
                    found = true;
                    break;
                }
                ContainerError::Creation(inner) => match &inner.source {
                    Some(source) => current = source,
                    None => break,
                },
                _ => break,
            }
        }
        assert!(found, "expected an ambiguous-constructor failure, got: {err}");
    }

    #[test]
    fn lenient_resolution_picks_deterministically() {
        let factory = pair_factory();
        factory
            .register_definition(
                "pair",
                ComponentDefinition::for_class("Pair")
                    .with_ctor_arg(ArgumentValue::new(ValueSpec::reference("dual1")))
                    .with_ctor_arg(ArgumentValue::new(ValueSpec::reference("dual2"))),
            )
            .unwrap();

        let pair: Arc<Pair> = factory.get_as("pair").unwrap();
        assert_eq!(pair.order, "left-right");
    }

    #[test]
    fn typed_retrieval_adapts_through_views() {
        let factory = pair_factory();

        let left: Arc<dyn Left> = factory.get_view::<Arc<dyn Left>>("dual1").unwrap();
        let _ = left;

        let direct: Arc<Dual> = factory.get_as("dual1").unwrap();
        let _ = direct;

        let result = factory.get_as::<Pair>("dual1");
        assert!(matches!(result, Err(ContainerError::NotOfRequiredType { .. })));
    }

    struct Svc {
        tag: String,
    }

    #[test]
    fn depends_on_orders_construction_and_destruction() {
        let order: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
        let destroyed = order.clone();

        let factory = ComponentFactory::new();
        factory
            .register_type(
                ComponentType::builder::<Svc>("Svc")
                    .constructor(vec![ParamSpec::str_("tag")], |args| {
                        Ok(Svc { tag: args.str_(0)? })
                    })
                    .destroy(move |svc| {
                        destroyed.lock().push(svc.tag.clone());
                        Ok(())
                    })
                    .build(),
            )
            .unwrap();
        factory
            .register_definition(
                "b",
                ComponentDefinition::for_class("Svc")
                    .with_ctor_arg(ArgumentValue::new(ValueSpec::literal("b"))),
            )
            .unwrap();
        factory
            .register_definition(
                "a",
                ComponentDefinition::for_class("Svc")
                    .with_depends_on(vec!["b"])
                    .with_ctor_arg(ArgumentValue::new(ValueSpec::literal("a"))),
            )
            .unwrap();

        factory.get("a").unwrap();
        // b was pre-created before a
        assert_eq!(factory.singleton_names(), vec!["b".to_string(), "a".to_string()]);

        factory.destroy_all();
        assert_eq!(*order.lock(), vec!["a".to_string(), "b".to_string()]);
    }

    #[test]
    fn depends_on_cycle_fails_consistently() {
        let factory = engine_factory();
        factory
            .register_definition(
                "a",
                ComponentDefinition::for_class("Engine").with_depends_on(vec!["b"]),
            )
            .unwrap();
        factory
            .register_definition(
                "b",
                ComponentDefinition::for_class("Engine").with_depends_on(vec!["a"]),
            )
            .unwrap();

        for _ in 0..3 {
            let err = factory.get("a").unwrap_err();
            assert!(matches!(err, ContainerError::CircularDependsOn(_)), "got: {err}");
        }
        let err = factory.get("b").unwrap_err();
        assert!(matches!(err, ContainerError::CircularDependsOn(_)));
    }

    #[test]
    fn aliases_resolve_to_the_same_singleton() {
        let factory = engine_factory();
        factory
            .register_definition("engine", ComponentDefinition::for_class("Engine"))
            .unwrap();
        factory.register_alias("engine", "motor").unwrap();
        factory.register_alias("motor", "powerplant").unwrap();

        let by_name: Arc<Engine> = factory.get_as("engine").unwrap();
        let by_alias: Arc<Engine> = factory.get_as("powerplant").unwrap();
        assert!(Arc::ptr_eq(&by_name, &by_alias));
        assert!(factory.is_singleton("powerplant").unwrap());
        assert!(factory.contains("motor"));
    }

    #[test]
    fn static_factory_method_instantiates() {
        let factory = ComponentFactory::new();
        factory
            .register_type(
                ComponentType::builder::<Engine>("Engine")
                    .constructor(vec![], |_| Ok(Engine { power: RwLock::new(0) }))
                    .static_factory("stock", vec![ParamSpec::int("power")], |args| {
                        Ok(Engine { power: RwLock::new(args.int(0)?) })
                    })
                    .build(),
            )
            .unwrap();
        factory
            .register_definition(
                "stock_engine",
                ComponentDefinition::for_class("Engine")
                    .with_factory_method("stock")
                    .with_ctor_arg(ArgumentValue::new(ValueSpec::literal(90i64))),
            )
            .unwrap();

        let engine: Arc<Engine> = factory.get_as("stock_engine").unwrap();
        assert_eq!(*engine.power.read(), 90);
        assert_eq!(
            factory.type_of("stock_engine").unwrap(),
            Some(TypeKey::of::<Engine>())
        );
    }

    struct Plant {
        built: AtomicU32,
    }

    #[test]
    fn instance_factory_method_instantiates() {
        let factory = engine_factory();
        factory
            .register_type(
                ComponentType::builder::<Plant>("Plant")
                    .constructor(vec![], |_| Ok(Plant { built: AtomicU32::new(0) }))
                    .instance_factory(
                        "make_engine",
                        vec![ParamSpec::int("power")],
                        |plant, args| {
                            plant.built.fetch_add(1, Ordering::SeqCst);
                            Ok(Engine { power: RwLock::new(args.int(0)?) })
                        },
                    )
                    .build(),
            )
            .unwrap();
        factory
            .register_definition("plant", ComponentDefinition::for_class("Plant"))
            .unwrap();
        factory
            .register_definition(
                "built_engine",
                ComponentDefinition::new()
                    .with_factory_component("plant")
                    .with_factory_method("make_engine")
                    .with_ctor_arg(ArgumentValue::new(ValueSpec::literal(120i64))),
            )
            .unwrap();

        let engine: Arc<Engine> = factory.get_as("built_engine").unwrap();
        assert_eq!(*engine.power.read(), 120);

        let plant: Arc<Plant> = factory.get_as("plant").unwrap();
        assert_eq!(plant.built.load(Ordering::SeqCst), 1);
    }

    struct Conn {
        url: String,
    }

    struct ConnSource {
        url: String,
    }

    fn conn_factory() -> ComponentFactory {
        let factory = ComponentFactory::new();
        factory
            .register_type(
                ComponentType::builder::<ConnSource>("ConnSource")
                    .constructor(vec![ParamSpec::str_("url")], |args| {
                        Ok(ConnSource { url: args.str_(0)? })
                    })
                    .indirection(|source| Ok(Conn { url: source.url.clone() }))
                    .build(),
            )
            .unwrap();
        factory
            .register_definition(
                "conn",
                ComponentDefinition::for_class("ConnSource")
                    .with_ctor_arg(ArgumentValue::new(ValueSpec::literal("db://primary"))),
            )
            .unwrap();
        factory
    }

    #[test]
    fn indirection_object_yields_its_product() {
        let factory = conn_factory();

        let conn: Arc<Conn> = factory.get_as("conn").unwrap();
        assert_eq!(conn.url, "db://primary");

        // The product of a singleton indirection object is cached.
        let again: Arc<Conn> = factory.get_as("conn").unwrap();
        assert!(Arc::ptr_eq(&conn, &again));

        // The dereference prefix returns the indirection object itself.
        let source: Arc<ConnSource> = factory.get_as("&conn").unwrap();
        assert_eq!(source.url, "db://primary");

        assert_eq!(factory.type_of("conn").unwrap(), Some(TypeKey::of::<Conn>()));
        assert_eq!(
            factory.type_of("&conn").unwrap(),
            Some(TypeKey::of::<ConnSource>())
        );
    }

    #[test]
    fn dereferencing_a_plain_component_fails() {
        let factory = engine_factory();
        factory
            .register_definition("engine", ComponentDefinition::for_class("Engine"))
            .unwrap();

        let err = factory.get("&engine").unwrap_err();
        assert!(matches!(err, ContainerError::NotAnIndirection { .. }));
    }

    struct MapScope {
        instances: Mutex<HashMap<String, ObjectHandle>>,
        active: AtomicBool,
    }

    impl MapScope {
        fn new() -> Self {
            Self { instances: Mutex::new(HashMap::new()), active: AtomicBool::new(true) }
        }
    }

    impl ScopeStrategy for MapScope {
        fn get(
            &self,
            name: &str,
            producer: crate::scope::ObjectProducer<'_>,
        ) -> Result<ObjectHandle> {
            if !self.active.load(Ordering::Acquire) {
                return Err(ContainerError::ScopeNotActive {
                    scope: "request".into(),
                    name: name.into(),
                });
            }
            if let Some(handle) = self.instances.lock().get(name) {
                return Ok(handle.clone());
            }
            let handle = producer()?;
            self.instances.lock().insert(name.to_string(), handle.clone());
            Ok(handle)
        }

        fn remove(&self, name: &str) -> Option<ObjectHandle> {
            self.instances.lock().remove(name)
        }
    }

    #[test]
    fn custom_scope_dispatches_to_strategy() {
        let factory = engine_factory();
        let scope = Arc::new(MapScope::new());
        factory.register_scope("request", scope.clone()).unwrap();
        factory
            .register_definition(
                "session_engine",
                ComponentDefinition::for_class("Engine")
                    .with_scope(Scope::Named("request".into())),
            )
            .unwrap();

        let first: Arc<Engine> = factory.get_as("session_engine").unwrap();
        let second: Arc<Engine> = factory.get_as("session_engine").unwrap();
        assert!(Arc::ptr_eq(&first, &second));

        factory.destroy_scoped("session_engine").unwrap();
        let third: Arc<Engine> = factory.get_as("session_engine").unwrap();
        assert!(!Arc::ptr_eq(&first, &third));

        scope.active.store(false, Ordering::Release);
        factory.destroy_scoped("session_engine").unwrap();
        let err = factory.get("session_engine").unwrap_err();
        assert!(format!("{err}").contains("is not active"));
    }

    #[test]
    fn unregistered_scope_is_an_error() {
        let factory = engine_factory();
        factory
            .register_definition(
                "session_engine",
                ComponentDefinition::for_class("Engine")
                    .with_scope(Scope::Named("session".into())),
            )
            .unwrap();

        let err = factory.get("session_engine").unwrap_err();
        assert!(matches!(err, ContainerError::NoSuchScope { .. }));
    }

    #[test]
    fn prototype_self_cycle_is_rejected() {
        let factory = engine_factory();
        factory.register_type(car_type()).unwrap();
        factory
            .register_definition(
                "selfish",
                ComponentDefinition::for_class("Car")
                    .with_scope(Scope::Prototype)
                    .with_property("engine", ValueSpec::reference("selfish")),
            )
            .unwrap();

        let err = factory.get("selfish").unwrap_err();
        assert!(format!("{err}").contains("currently in creation"));
    }

    #[test]
    fn explicit_arguments_require_exact_arity() {
        let factory = engine_factory();
        factory
            .register_definition(
                "proto_engine",
                ComponentDefinition::for_class("Engine").with_scope(Scope::Prototype),
            )
            .unwrap();

        let handle = factory.get_with_args("proto_engine", vec![Value::Int(7)]).unwrap();
        let engine = handle.downcast::<Engine>().unwrap();
        assert_eq!(*engine.power.read(), 7);

        let err = factory
            .get_with_args("proto_engine", vec![Value::Int(1), Value::Int(2), Value::Int(3)])
            .unwrap_err();
        let rendered = format!("{err}");
        assert!(rendered.contains("explicit argument"), "got: {rendered}");
    }

    #[test]
    fn pre_instantiation_skips_lazy_and_prototype() {
        let factory = engine_factory();
        factory
            .register_definition("eager", ComponentDefinition::for_class("Engine"))
            .unwrap();
        factory
            .register_definition(
                "lazy",
                ComponentDefinition::for_class("Engine").with_lazy_init(true),
            )
            .unwrap();
        factory
            .register_definition(
                "proto",
                ComponentDefinition::for_class("Engine").with_scope(Scope::Prototype),
            )
            .unwrap();

        factory.pre_instantiate_singletons().unwrap();
        assert!(factory.contains_singleton("eager"));
        assert!(!factory.contains_singleton("lazy"));
        assert!(!factory.contains_singleton("proto"));
    }

    struct Labeled {
        label: RwLock<String>,
    }

    #[test]
    fn placeholders_resolve_through_the_chain() {
        let factory = ComponentFactory::new();
        factory
            .register_type(
                ComponentType::builder::<Labeled>("Labeled")
                    .constructor(vec![], |_| Ok(Labeled { label: RwLock::new(String::new()) }))
                    .setter("label", ParamSpec::str_("label"), |labeled, value| {
                        if let Some(s) = value.as_str() {
                            *labeled.label.write() = s.to_string();
                        }
                        Ok(())
                    })
                    .build(),
            )
            .unwrap();
        factory.add_embedded_value_resolver(|s| Some(s.replace("${region}", "eu-1")));
        factory
            .register_definition(
                "cache",
                ComponentDefinition::for_class("Labeled")
                    .with_property("label", ValueSpec::placeholder("${region}-cache")),
            )
            .unwrap();

        let cache: Arc<Labeled> = factory.get_as("cache").unwrap();
        assert_eq!(*cache.label.read(), "eu-1-cache");

        // Any resolver stage returning None short-circuits the chain.
        factory.add_embedded_value_resolver(|s| if s.contains("${") { None } else { Some(s.to_string()) });
        assert_eq!(factory.resolve_embedded_value("${unknown}"), None);
        assert_eq!(factory.resolve_embedded_value("plain"), Some("plain".to_string()));
    }

    #[test]
    fn required_type_check_fails_cleanly() {
        let factory = engine_factory();
        factory
            .register_definition("engine", ComponentDefinition::for_class("Engine"))
            .unwrap();

        let result = factory.get_as::<Car>("engine");
        assert!(matches!(result, Err(ContainerError::NotOfRequiredType { .. })));
    }

    #[test]
    fn unknown_name_gets_suggestions() {
        let factory = engine_factory();
        factory
            .register_definition("engine", ComponentDefinition::for_class("Engine"))
            .unwrap();

        let err = factory.get("enginee").unwrap_err();
        match err {
            ContainerError::NoSuchDefinition(inner) => {
                assert!(inner.suggestions.contains(&"engine".to_string()));
            }
            other => panic!("Expected NoSuchDefinition, got: {other}"),
        }
    }

    struct Mount {
        engine: Arc<Engine>,
        slot: i64,
    }

    #[test]
    fn prototype_reuses_prepared_arguments() {
        let factory = engine_factory();
        factory
            .register_type(
                ComponentType::builder::<Mount>("Mount")
                    .constructor(
                        vec![ParamSpec::object::<Engine>("engine"), ParamSpec::int("slot")],
                        |args| Ok(Mount { engine: args.object(0)?, slot: args.int(1)? }),
                    )
                    .build(),
            )
            .unwrap();
        factory
            .register_definition("engine", ComponentDefinition::for_class("Engine"))
            .unwrap();
        factory
            .register_definition(
                "mount",
                ComponentDefinition::for_class("Mount")
                    .with_scope(Scope::Prototype)
                    .with_ctor_arg(ArgumentValue::new(ValueSpec::reference("engine")))
                    .with_ctor_arg(ArgumentValue::new(ValueSpec::literal(3i64))),
            )
            .unwrap();

        let first: Arc<Mount> = factory.get_as("mount").unwrap();
        let second: Arc<Mount> = factory.get_as("mount").unwrap();
        assert!(!Arc::ptr_eq(&first, &second));
        assert!(Arc::ptr_eq(&first.engine, &second.engine));
        assert_eq!(first.slot, 3);
        assert_eq!(second.slot, 3);
    }

    struct Gearbox;

    struct Drivetrain {
        engine: Arc<Engine>,
        gearbox: Arc<Gearbox>,
    }

    fn drivetrain_factory() -> ComponentFactory {
        let factory = engine_factory();
        factory
            .register_type(
                ComponentType::builder::<Gearbox>("Gearbox")
                    .constructor(vec![], |_| Ok(Gearbox))
                    .build(),
            )
            .unwrap();
        factory
            .register_type(
                ComponentType::builder::<Drivetrain>("Drivetrain")
                    .constructor(
                        vec![
                            ParamSpec::object::<Engine>("engine"),
                            ParamSpec::object::<Gearbox>("gearbox"),
                        ],
                        |args| {
                            Ok(Drivetrain { engine: args.object(0)?, gearbox: args.object(1)? })
                        },
                    )
                    .build(),
            )
            .unwrap();
        factory
    }

    #[test]
    fn constructor_autowiring_resolves_by_type() {
        let factory = drivetrain_factory();
        factory
            .register_definition("engine", ComponentDefinition::for_class("Engine"))
            .unwrap();
        factory
            .register_definition("gearbox", ComponentDefinition::for_class("Gearbox"))
            .unwrap();
        factory
            .register_definition(
                "drivetrain",
                ComponentDefinition::for_class("Drivetrain")
                    .with_autowire(AutowireMode::Constructor),
            )
            .unwrap();

        let drivetrain: Arc<Drivetrain> = factory.get_as("drivetrain").unwrap();
        let engine: Arc<Engine> = factory.get_as("engine").unwrap();
        let gearbox: Arc<Gearbox> = factory.get_as("gearbox").unwrap();
        assert!(Arc::ptr_eq(&drivetrain.engine, &engine));
        assert!(Arc::ptr_eq(&drivetrain.gearbox, &gearbox));

        // Autowiring records destruction-ordering dependencies.
        assert!(factory.singletons.is_dependent("engine", "drivetrain"));
    }

    #[test]
    fn autowiring_without_tiebreak_reports_no_unique_candidate() {
        let factory = drivetrain_factory();
        factory
            .register_definition("left_engine", ComponentDefinition::for_class("Engine"))
            .unwrap();
        factory
            .register_definition("right_engine", ComponentDefinition::for_class("Engine"))
            .unwrap();
        factory
            .register_definition("gearbox", ComponentDefinition::for_class("Gearbox"))
            .unwrap();
        factory
            .register_definition(
                "drivetrain",
                ComponentDefinition::for_class("Drivetrain")
                    .with_autowire(AutowireMode::Constructor),
            )
            .unwrap();

        // Two Engine candidates, neither primary nor matching the
        // parameter name "engine".
        let err = factory.get("drivetrain").unwrap_err();
        let rendered = format!("{err}");
        assert!(rendered.contains("No unique candidate"), "got: {rendered}");
    }

    #[test]
    fn autowiring_prefers_parameter_name_on_ties() {
        let factory = drivetrain_factory();
        factory
            .register_definition("engine", ComponentDefinition::for_class("Engine"))
            .unwrap();
        factory
            .register_definition("spare", ComponentDefinition::for_class("Engine"))
            .unwrap();
        factory
            .register_definition("gearbox", ComponentDefinition::for_class("Gearbox"))
            .unwrap();
        factory
            .register_definition(
                "drivetrain",
                ComponentDefinition::for_class("Drivetrain")
                    .with_autowire(AutowireMode::Constructor),
            )
            .unwrap();

        // Two Engine candidates, but the parameter is named "engine".
        let drivetrain: Arc<Drivetrain> = factory.get_as("drivetrain").unwrap();
        let engine: Arc<Engine> = factory.get_as("engine").unwrap();
        assert!(Arc::ptr_eq(&drivetrain.engine, &engine));
    }

    #[test]
    fn autowiring_prefers_primary_candidates() {
        let factory = drivetrain_factory();
        factory
            .register_definition("first_engine", ComponentDefinition::for_class("Engine"))
            .unwrap();
        factory
            .register_definition(
                "second_engine",
                ComponentDefinition::for_class("Engine").as_primary(),
            )
            .unwrap();
        factory
            .register_definition("gearbox", ComponentDefinition::for_class("Gearbox"))
            .unwrap();
        factory
            .register_definition(
                "drivetrain",
                ComponentDefinition::for_class("Drivetrain")
                    .with_autowire(AutowireMode::Constructor),
            )
            .unwrap();

        let drivetrain: Arc<Drivetrain> = factory.get_as("drivetrain").unwrap();
        let primary: Arc<Engine> = factory.get_as("second_engine").unwrap();
        assert!(Arc::ptr_eq(&drivetrain.engine, &primary));
    }

    struct Bus {
        riders: Vec<Value>,
    }

    #[test]
    fn collection_parameter_falls_back_to_empty() {
        let factory = ComponentFactory::new();
        factory
            .register_type(
                ComponentType::builder::<Bus>("Bus")
                    .constructor(vec![ParamSpec::list("riders")], |args| {
                        Ok(Bus { riders: args.list(0)? })
                    })
                    .build(),
            )
            .unwrap();
        factory
            .register_definition(
                "bus",
                ComponentDefinition::for_class("Bus").with_autowire(AutowireMode::Constructor),
            )
            .unwrap();

        let bus: Arc<Bus> = factory.get_as("bus").unwrap();
        assert!(bus.riders.is_empty());
    }

    struct CountingProcessor {
        before: AtomicU32,
        after: AtomicU32,
    }

    impl ComponentPostProcessor for CountingProcessor {
        fn before_init(&self, _name: &str, _instance: &ObjectHandle) -> Result<()> {
            self.before.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        fn after_init(&self, _name: &str, _instance: &ObjectHandle) -> Result<()> {
            self.after.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[test]
    fn post_processors_run_around_initialization() {
        let factory = engine_factory();
        let processor =
            Arc::new(CountingProcessor { before: AtomicU32::new(0), after: AtomicU32::new(0) });
        factory.add_post_processor(processor.clone());
        factory
            .register_definition("engine", ComponentDefinition::for_class("Engine"))
            .unwrap();

        factory.get("engine").unwrap();
        factory.get("engine").unwrap();
        assert_eq!(processor.before.load(Ordering::SeqCst), 1);
        assert_eq!(processor.after.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn parent_factory_serves_missing_definitions() {
        let parent = Arc::new(engine_factory());
        parent
            .register_definition("engine", ComponentDefinition::for_class("Engine"))
            .unwrap();

        let child = ComponentFactory::with_parent(parent.clone());
        let engine: Arc<Engine> = child.get_as("engine").unwrap();
        let from_parent: Arc<Engine> = parent.get_as("engine").unwrap();
        assert!(Arc::ptr_eq(&engine, &from_parent));
        assert!(child.contains("engine"));
        assert!(child.is_singleton("engine").unwrap());
    }

    #[test]
    fn failed_singleton_creation_can_be_retried() {
        let attempts = Arc::new(AtomicU32::new(0));
        let factory = ComponentFactory::new();
        let counter = attempts.clone();
        factory
            .register_type(
                ComponentType::builder::<Svc>("Flaky")
                    .constructor(vec![], move |_| {
                        if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                            Err(ContainerError::creation("flaky", "first attempt fails", None))
                        } else {
                            Ok(Svc { tag: "ok".into() })
                        }
                    })
                    .build(),
            )
            .unwrap();
        factory
            .register_definition("flaky", ComponentDefinition::for_class("Flaky"))
            .unwrap();

        assert!(factory.get("flaky").is_err());
        assert!(!factory.contains_singleton("flaky"));

        let svc: Arc<Svc> = factory.get_as("flaky").unwrap();
        assert_eq!(svc.tag, "ok");
        assert_eq!(attempts.load(Ordering::SeqCst), 2);
    }

    struct WiringModule;

    impl ComponentModule for WiringModule {
        fn register(&self, registry: &mut dyn ModuleRegistry) -> Result<()> {
            registry.register_type(
                ComponentType::builder::<Engine>("Engine")
                    .constructor(vec![], |_| Ok(Engine { power: RwLock::new(40) }))
                    .build(),
            )?;
            registry.register_definition("engine", ComponentDefinition::for_class("Engine"))?;
            registry.register_alias("engine", "motor")?;
            Ok(())
        }
    }

    #[test]
    fn modules_install_their_registrations() {
        let factory = ComponentFactory::new();
        factory.install_module(&WiringModule).unwrap();

        let engine: Arc<Engine> = factory.get_as("motor").unwrap();
        assert_eq!(*engine.power.read(), 40);
    }

    #[test]
    fn inner_definitions_instantiate_contained_components() {
        let factory = engine_factory();
        factory.register_type(car_type()).unwrap();
        factory
            .register_definition(
                "car",
                ComponentDefinition::for_class("Car").with_property(
                    "engine",
                    ValueSpec::inner(
                        ComponentDefinition::for_class("Engine")
                            .with_property("power", ValueSpec::literal(70i64)),
                    ),
                ),
            )
            .unwrap();

        let car: Arc<Car> = factory.get_as("car").unwrap();
        let engine = car.engine.read().clone().unwrap();
        assert_eq!(*engine.power.read(), 70);
        // The inner component is not registered as a standalone definition.
        assert!(!factory.contains("car#inner0"));
    }
}

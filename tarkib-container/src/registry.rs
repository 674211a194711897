//! Component type registry — the container's capability set.
//!
//! Rust has no runtime reflection, so every type the container can build
//! is registered up front as a [`ComponentType`]: a set of invocable
//! [`Executable`]s (constructors and factory methods), property setters,
//! trait views and lifecycle callbacks. Definitions then refer to these
//! types by class name, and the resolution engine selects among the
//! registered executables the same way a reflective container would
//! select among discovered constructors.

use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{debug, trace};

use tarkib_support::rendering::shorten_type_name;

use crate::definition::ComponentDefinition;
use crate::error::{ContainerError, Result};
use crate::key::TypeKey;
use crate::value::{ObjectHandle, Value};

/// Shape of an executable parameter, used for matching, conversion and
/// the empty-collection autowire fallback.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ParamShape {
    Bool,
    Int,
    Float,
    Str,
    List,
    Map,
    Object,
}

impl ParamShape {
    /// Short tag matched against declared argument type hints.
    pub fn tag(&self) -> &'static str {
        match self {
            ParamShape::Bool => "bool",
            ParamShape::Int => "int",
            ParamShape::Float => "float",
            ParamShape::Str => "str",
            ParamShape::List => "list",
            ParamShape::Map => "map",
            ParamShape::Object => "object",
        }
    }
}

/// One parameter of a registered executable.
#[derive(Clone, Debug)]
pub struct ParamSpec {
    pub key: TypeKey,
    pub shape: ParamShape,
    pub name: Option<&'static str>,
}

impl ParamSpec {
    pub fn bool_(name: &'static str) -> Self {
        Self { key: TypeKey::of::<bool>(), shape: ParamShape::Bool, name: Some(name) }
    }

    pub fn int(name: &'static str) -> Self {
        Self { key: TypeKey::of::<i64>(), shape: ParamShape::Int, name: Some(name) }
    }

    pub fn float(name: &'static str) -> Self {
        Self { key: TypeKey::of::<f64>(), shape: ParamShape::Float, name: Some(name) }
    }

    pub fn str_(name: &'static str) -> Self {
        Self { key: TypeKey::of::<String>(), shape: ParamShape::Str, name: Some(name) }
    }

    pub fn list(name: &'static str) -> Self {
        Self { key: TypeKey::of::<Vec<Value>>(), shape: ParamShape::List, name: Some(name) }
    }

    pub fn map(name: &'static str) -> Self {
        Self {
            key: TypeKey::of::<std::collections::BTreeMap<String, Value>>(),
            shape: ParamShape::Map,
            name: Some(name),
        }
    }

    /// An object parameter expecting an instance of `T` (or a view onto
    /// `T`, e.g. `Arc<dyn Trait>`).
    pub fn object<T: ?Sized + 'static>(name: &'static str) -> Self {
        Self { key: TypeKey::of::<T>(), shape: ParamShape::Object, name: Some(name) }
    }

    /// Readable form for candidate signatures in error messages.
    pub fn render(&self) -> String {
        match self.shape {
            ParamShape::Object => shorten_type_name(self.key.type_name()),
            other => other.tag().to_string(),
        }
    }

    /// Whether a declared type hint addresses this parameter.
    pub fn matches_hint(&self, hint: &str) -> bool {
        self.shape.tag() == hint
            || self.key.type_name() == hint
            || shorten_type_name(self.key.type_name()) == hint
    }
}

/// Typed access into the positional argument slice handed to an
/// executable's invocation closure.
pub struct Args<'a>(pub &'a [Value]);

impl Args<'_> {
    fn arg(&self, index: usize) -> Result<&Value> {
        self.0.get(index).ok_or_else(|| ContainerError::TypeMismatch {
            value: "missing argument".into(),
            target: format!("argument #{index}"),
        })
    }

    pub fn bool_(&self, index: usize) -> Result<bool> {
        let v = self.arg(index)?;
        v.as_bool().ok_or_else(|| ContainerError::type_mismatch(v, &TypeKey::of::<bool>()))
    }

    pub fn int(&self, index: usize) -> Result<i64> {
        let v = self.arg(index)?;
        v.as_i64().ok_or_else(|| ContainerError::type_mismatch(v, &TypeKey::of::<i64>()))
    }

    pub fn float(&self, index: usize) -> Result<f64> {
        let v = self.arg(index)?;
        v.as_f64().ok_or_else(|| ContainerError::type_mismatch(v, &TypeKey::of::<f64>()))
    }

    pub fn str_(&self, index: usize) -> Result<String> {
        let v = self.arg(index)?;
        v.as_str()
            .map(str::to_string)
            .ok_or_else(|| ContainerError::type_mismatch(v, &TypeKey::of::<String>()))
    }

    pub fn list(&self, index: usize) -> Result<Vec<Value>> {
        match self.arg(index)? {
            Value::List(items) => Ok(items.clone()),
            v => Err(ContainerError::type_mismatch(v, &TypeKey::of::<Vec<Value>>())),
        }
    }

    /// Shared instance of a concrete component type.
    pub fn object<T: Send + Sync + 'static>(&self, index: usize) -> Result<Arc<T>> {
        let v = self.arg(index)?;
        v.downcast::<T>()
            .ok_or_else(|| ContainerError::type_mismatch(v, &TypeKey::of::<T>()))
    }

    /// Cloned view value, e.g. an `Arc<dyn Trait>` produced by a type view.
    pub fn shared<T: Clone + Send + Sync + 'static>(&self, index: usize) -> Result<T> {
        let v = self.arg(index)?;
        v.downcast::<T>()
            .map(|arc| (*arc).clone())
            .ok_or_else(|| ContainerError::type_mismatch(v, &TypeKey::of::<T>()))
    }
}

/// What kind of executable this is.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ExecKind {
    Constructor,
    FactoryMethod { name: String, is_static: bool },
}

/// Executable visibility, used by the public-before-non-public candidate
/// ordering.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Visibility {
    Public,
    Private,
}

/// Invocation closure: receives the factory component instance (for
/// instance factory methods) and the resolved positional arguments.
pub type InvokeFn =
    Arc<dyn Fn(Option<&ObjectHandle>, &[Value]) -> Result<ObjectHandle> + Send + Sync>;

/// A registered constructor or factory method: the unit the resolution
/// engine selects and invokes.
#[derive(Clone)]
pub struct Executable {
    pub kind: ExecKind,
    pub visibility: Visibility,
    pub params: Vec<ParamSpec>,
    /// The type this executable produces.
    pub produces: TypeKey,
    invoke: InvokeFn,
}

impl Executable {
    #[inline]
    pub fn param_count(&self) -> usize {
        self.params.len()
    }

    #[inline]
    pub fn is_public(&self) -> bool {
        self.visibility == Visibility::Public
    }

    pub fn method_name(&self) -> Option<&str> {
        match &self.kind {
            ExecKind::FactoryMethod { name, .. } => Some(name),
            ExecKind::Constructor => None,
        }
    }

    pub fn is_static(&self) -> bool {
        match &self.kind {
            ExecKind::FactoryMethod { is_static, .. } => *is_static,
            ExecKind::Constructor => true,
        }
    }

    /// Runs the executable against resolved arguments.
    pub fn invoke(&self, target: Option<&ObjectHandle>, args: &[Value]) -> Result<ObjectHandle> {
        (self.invoke)(target, args)
    }

    /// Signature like `(str, int)` or `create(str) -> Engine` for errors.
    pub fn signature(&self) -> String {
        let params: Vec<String> = self.params.iter().map(ParamSpec::render).collect();
        match &self.kind {
            ExecKind::Constructor => format!("({})", params.join(", ")),
            ExecKind::FactoryMethod { name, .. } => format!(
                "{}({}) -> {}",
                name,
                params.join(", "),
                shorten_type_name(self.produces.type_name()),
            ),
        }
    }

    /// Whether two executables declare the same parameter signature.
    pub fn same_signature(&self, other: &Executable) -> bool {
        self.params.len() == other.params.len()
            && self
                .params
                .iter()
                .zip(other.params.iter())
                .all(|(a, b)| a.key == b.key && a.shape == b.shape)
    }
}

impl fmt::Debug for Executable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Executable")
            .field("kind", &self.kind)
            .field("signature", &self.signature())
            .finish()
    }
}

/// Property setter closure over the erased instance.
pub type SetterFn = Arc<dyn Fn(&(dyn Any + Send + Sync), Value) -> Result<()> + Send + Sync>;

/// A registered property on a component type.
#[derive(Clone)]
pub struct PropertySetter {
    pub param: ParamSpec,
    apply: SetterFn,
}

impl PropertySetter {
    pub fn apply(&self, instance: &ObjectHandle, value: Value) -> Result<()> {
        (self.apply)(instance.as_any(), value)
    }
}

/// Lifecycle callback over the erased instance.
pub type LifecycleFn = Arc<dyn Fn(&ObjectHandle) -> Result<()> + Send + Sync>;

/// An upcast from the concrete type to another key, e.g.
/// `Engine -> Arc<dyn Power>`; the cast produces a new handle carrying
/// the view value.
#[derive(Clone)]
pub struct TypeView {
    pub key: TypeKey,
    cast: Arc<dyn Fn(&ObjectHandle) -> Result<ObjectHandle> + Send + Sync>,
}

impl TypeView {
    pub fn cast(&self, handle: &ObjectHandle) -> Result<ObjectHandle> {
        (self.cast)(handle)
    }
}

/// Accessor for indirection objects: components whose *product*, rather
/// than the instance itself, is what callers actually want.
#[derive(Clone)]
pub struct Indirection {
    pub produces: TypeKey,
    accessor: Arc<dyn Fn(&ObjectHandle) -> Result<ObjectHandle> + Send + Sync>,
}

impl Indirection {
    pub fn access(&self, handle: &ObjectHandle) -> Result<ObjectHandle> {
        (self.accessor)(handle)
    }
}

/// Everything the container knows about one registered type.
pub struct ComponentType {
    class_name: String,
    key: TypeKey,
    constructors: Vec<Arc<Executable>>,
    factory_methods: Vec<Arc<Executable>>,
    setters: HashMap<String, PropertySetter>,
    views: Vec<TypeView>,
    init: Option<LifecycleFn>,
    destroy: Option<LifecycleFn>,
    indirection: Option<Indirection>,
}

impl ComponentType {
    /// Starts a builder for type `T` registered under `class_name`.
    pub fn builder<T: Send + Sync + 'static>(
        class_name: impl Into<String>,
    ) -> ComponentTypeBuilder<T> {
        ComponentTypeBuilder {
            class_name: class_name.into(),
            constructors: Vec::new(),
            factory_methods: Vec::new(),
            setters: HashMap::new(),
            views: Vec::new(),
            init: None,
            destroy: None,
            indirection: None,
            _marker: PhantomData,
        }
    }

    pub fn class_name(&self) -> &str {
        &self.class_name
    }

    pub fn key(&self) -> TypeKey {
        self.key
    }

    pub fn constructors(&self) -> &[Arc<Executable>] {
        &self.constructors
    }

    pub fn factory_methods(&self) -> &[Arc<Executable>] {
        &self.factory_methods
    }

    /// Candidate factory methods with the given name and staticness.
    pub fn factory_method_candidates(&self, name: &str, is_static: bool) -> Vec<Arc<Executable>> {
        self.factory_methods
            .iter()
            .filter(|m| m.method_name() == Some(name) && m.is_static() == is_static)
            .cloned()
            .collect()
    }

    pub fn setter(&self, property: &str) -> Option<&PropertySetter> {
        self.setters.get(property)
    }

    pub fn init_callback(&self) -> Option<&LifecycleFn> {
        self.init.as_ref()
    }

    pub fn destroy_callback(&self) -> Option<&LifecycleFn> {
        self.destroy.as_ref()
    }

    pub fn indirection(&self) -> Option<&Indirection> {
        self.indirection.as_ref()
    }

    /// Whether an instance of this type can satisfy `key`, directly or
    /// through a registered view.
    pub fn assignable_to(&self, key: &TypeKey) -> bool {
        self.key == *key || self.views.iter().any(|v| v.key == *key)
    }

    /// Adapts `handle` to `key`: identity when the key matches directly,
    /// otherwise the registered view cast.
    pub fn cast_to(&self, handle: &ObjectHandle, key: &TypeKey) -> Result<ObjectHandle> {
        if handle.key() == *key {
            return Ok(handle.clone());
        }
        match self.views.iter().find(|v| v.key == *key) {
            Some(view) => view.cast(handle),
            None => Err(ContainerError::TypeMismatch {
                value: format!("object of type {}", handle.key()),
                target: key.type_name().to_string(),
            }),
        }
    }
}

impl fmt::Debug for ComponentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ComponentType")
            .field("class_name", &self.class_name)
            .field("key", &self.key)
            .field("constructors", &self.constructors.len())
            .field("factory_methods", &self.factory_methods.len())
            .field("setters", &self.setters.len())
            .finish()
    }
}

/// Fluent builder for [`ComponentType`].
pub struct ComponentTypeBuilder<T> {
    class_name: String,
    constructors: Vec<Arc<Executable>>,
    factory_methods: Vec<Arc<Executable>>,
    setters: HashMap<String, PropertySetter>,
    views: Vec<TypeView>,
    init: Option<LifecycleFn>,
    destroy: Option<LifecycleFn>,
    indirection: Option<Indirection>,
    _marker: PhantomData<fn() -> T>,
}

impl<T: Send + Sync + 'static> ComponentTypeBuilder<T> {
    /// Registers a public constructor.
    pub fn constructor(
        self,
        params: Vec<ParamSpec>,
        build: impl Fn(&Args<'_>) -> Result<T> + Send + Sync + 'static,
    ) -> Self {
        self.constructor_with_visibility(Visibility::Public, params, build)
    }

    /// Registers a non-public constructor, ordered after public ones during
    /// candidate selection.
    pub fn private_constructor(
        self,
        params: Vec<ParamSpec>,
        build: impl Fn(&Args<'_>) -> Result<T> + Send + Sync + 'static,
    ) -> Self {
        self.constructor_with_visibility(Visibility::Private, params, build)
    }

    fn constructor_with_visibility(
        mut self,
        visibility: Visibility,
        params: Vec<ParamSpec>,
        build: impl Fn(&Args<'_>) -> Result<T> + Send + Sync + 'static,
    ) -> Self {
        self.constructors.push(Arc::new(Executable {
            kind: ExecKind::Constructor,
            visibility,
            params,
            produces: TypeKey::of::<T>(),
            invoke: Arc::new(move |_, values| Ok(ObjectHandle::new(build(&Args(values))?))),
        }));
        self
    }

    /// Registers a static factory method on this type producing `U`.
    pub fn static_factory<U: Send + Sync + 'static>(
        mut self,
        name: impl Into<String>,
        params: Vec<ParamSpec>,
        build: impl Fn(&Args<'_>) -> Result<U> + Send + Sync + 'static,
    ) -> Self {
        self.factory_methods.push(Arc::new(Executable {
            kind: ExecKind::FactoryMethod { name: name.into(), is_static: true },
            visibility: Visibility::Public,
            params,
            produces: TypeKey::of::<U>(),
            invoke: Arc::new(move |_, values| Ok(ObjectHandle::new(build(&Args(values))?))),
        }));
        self
    }

    /// Registers an instance factory method: invoked on a constructed
    /// instance of this type, producing `U`.
    pub fn instance_factory<U: Send + Sync + 'static>(
        mut self,
        name: impl Into<String>,
        params: Vec<ParamSpec>,
        build: impl Fn(Arc<T>, &Args<'_>) -> Result<U> + Send + Sync + 'static,
    ) -> Self {
        let produces = TypeKey::of::<U>();
        self.factory_methods.push(Arc::new(Executable {
            kind: ExecKind::FactoryMethod { name: name.into(), is_static: false },
            visibility: Visibility::Public,
            params,
            produces,
            invoke: Arc::new(move |target, values| {
                let handle = target.ok_or_else(|| ContainerError::TypeMismatch {
                    value: "missing factory instance".into(),
                    target: TypeKey::of::<T>().type_name().to_string(),
                })?;
                let this = handle.downcast::<T>().ok_or_else(|| ContainerError::TypeMismatch {
                    value: format!("object of type {}", handle.key()),
                    target: TypeKey::of::<T>().type_name().to_string(),
                })?;
                Ok(ObjectHandle::new(build(this, &Args(values))?))
            }),
        }));
        self
    }

    /// Registers a property setter. Setters run after early exposure, so
    /// writable fields need interior mutability (`RwLock`, `OnceLock`, ...).
    pub fn setter(
        mut self,
        property: impl Into<String>,
        param: ParamSpec,
        apply: impl Fn(&T, Value) -> Result<()> + Send + Sync + 'static,
    ) -> Self {
        let setter = PropertySetter {
            param,
            apply: Arc::new(move |any, value| {
                let this = any.downcast_ref::<T>().ok_or_else(|| ContainerError::TypeMismatch {
                    value: "instance of unexpected type".into(),
                    target: TypeKey::of::<T>().type_name().to_string(),
                })?;
                apply(this, value)
            }),
        };
        self.setters.insert(property.into(), setter);
        self
    }

    /// Registers an initialization callback, run after property population.
    pub fn init(mut self, callback: impl Fn(&T) -> Result<()> + Send + Sync + 'static) -> Self {
        self.init = Some(Self::lifecycle(callback));
        self
    }

    /// Registers a destruction callback, run during ordered teardown.
    pub fn destroy(mut self, callback: impl Fn(&T) -> Result<()> + Send + Sync + 'static) -> Self {
        self.destroy = Some(Self::lifecycle(callback));
        self
    }

    fn lifecycle(callback: impl Fn(&T) -> Result<()> + Send + Sync + 'static) -> LifecycleFn {
        Arc::new(move |handle| {
            let this = handle.downcast::<T>().ok_or_else(|| ContainerError::TypeMismatch {
                value: format!("object of type {}", handle.key()),
                target: TypeKey::of::<T>().type_name().to_string(),
            })?;
            callback(&this)
        })
    }

    /// Registers a view of this type under another key, e.g.
    /// `Arc<dyn Trait>`: `builder.view(|engine| engine as Arc<dyn Power>)`.
    pub fn view<V: Send + Sync + 'static>(
        mut self,
        cast: impl Fn(Arc<T>) -> V + Send + Sync + 'static,
    ) -> Self {
        self.views.push(TypeView {
            key: TypeKey::of::<V>(),
            cast: Arc::new(move |handle| {
                let this = handle.downcast::<T>().ok_or_else(|| ContainerError::TypeMismatch {
                    value: format!("object of type {}", handle.key()),
                    target: TypeKey::of::<T>().type_name().to_string(),
                })?;
                Ok(ObjectHandle::new(cast(this)))
            }),
        });
        self
    }

    /// Marks this type as an indirection object. Unprefixed requests
    /// receive its product `U` instead of the instance itself.
    pub fn indirection<U: Send + Sync + 'static>(
        mut self,
        access: impl Fn(Arc<T>) -> Result<U> + Send + Sync + 'static,
    ) -> Self {
        self.indirection = Some(Indirection {
            produces: TypeKey::of::<U>(),
            accessor: Arc::new(move |handle| {
                let this = handle.downcast::<T>().ok_or_else(|| ContainerError::TypeMismatch {
                    value: format!("object of type {}", handle.key()),
                    target: TypeKey::of::<T>().type_name().to_string(),
                })?;
                Ok(ObjectHandle::new(access(this)?))
            }),
        });
        self
    }

    pub fn build(self) -> ComponentType {
        ComponentType {
            class_name: self.class_name,
            key: TypeKey::of::<T>(),
            constructors: self.constructors,
            factory_methods: self.factory_methods,
            setters: self.setters,
            views: self.views,
            init: self.init,
            destroy: self.destroy,
            indirection: self.indirection,
        }
    }
}

/// Stores every registered component type, keyed by class name.
pub struct TypeRegistry {
    types: RwLock<HashMap<String, Arc<ComponentType>>>,
}

impl Default for TypeRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl TypeRegistry {
    pub fn new() -> Self {
        Self { types: RwLock::new(HashMap::new()) }
    }

    /// Registers a component type.
    ///
    /// # Errors
    /// Fails if the class name is already taken and `allow_override` is
    /// false.
    pub fn register(&self, ty: ComponentType, allow_override: bool) -> Result<()> {
        let mut types = self.types.write();
        if !allow_override && types.contains_key(ty.class_name()) {
            return Err(ContainerError::InvalidDefinition {
                name: ty.class_name().to_string(),
                message: "component type already registered under this class name".into(),
            });
        }
        debug!(class = ty.class_name(), key = %ty.key(), "Registered component type");
        types.insert(ty.class_name().to_string(), Arc::new(ty));
        Ok(())
    }

    pub fn get(&self, class_name: &str) -> Option<Arc<ComponentType>> {
        let found = self.types.read().get(class_name).cloned();
        if found.is_none() {
            trace!(class = class_name, "Component type not registered");
        }
        found
    }

    /// Finds the type registered for a concrete instance key.
    pub fn get_by_key(&self, key: &TypeKey) -> Option<Arc<ComponentType>> {
        self.types.read().values().find(|t| t.key() == *key).cloned()
    }

    pub fn class_names(&self) -> Vec<String> {
        self.types.read().keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.types.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.types.read().is_empty()
    }
}

impl fmt::Debug for TypeRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TypeRegistry").field("types", &self.len()).finish()
    }
}

/// A module of related type and definition registrations.
///
/// Group registrations by domain instead of one giant wiring block.
pub trait ComponentModule: Send + Sync {
    /// Register types, definitions and aliases into the container.
    fn register(&self, registry: &mut dyn ModuleRegistry) -> Result<()>;

    /// Optional: human-readable name for diagnostics.
    fn name(&self) -> &str {
        std::any::type_name::<Self>()
    }
}

/// Interface that modules use to register into a container.
///
/// A subset of the factory's API, so modules can be tested against a mock.
pub trait ModuleRegistry {
    fn register_type(&mut self, ty: ComponentType) -> Result<()>;

    fn register_definition(&mut self, name: &str, definition: ComponentDefinition) -> Result<()>;

    fn register_alias(&mut self, name: &str, alias: &str) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Engine {
        power: i64,
    }

    trait Power: Send + Sync {
        fn power(&self) -> i64;
    }

    impl Power for Engine {
        fn power(&self) -> i64 {
            self.power
        }
    }

    fn engine_type() -> ComponentType {
        ComponentType::builder::<Engine>("Engine")
            .constructor(vec![ParamSpec::int("power")], |args| {
                Ok(Engine { power: args.int(0)? })
            })
            .static_factory("stock", vec![], |_| Ok(Engine { power: 90 }))
            .view(|engine| engine as Arc<dyn Power>)
            .build()
    }

    #[test]
    fn constructor_invokes() {
        let ty = engine_type();
        let exec = &ty.constructors()[0];
        let handle = exec.invoke(None, &[Value::Int(120)]).unwrap();
        let engine = handle.downcast::<Engine>().unwrap();
        assert_eq!(engine.power, 120);
    }

    #[test]
    fn static_factory_candidates() {
        let ty = engine_type();
        let candidates = ty.factory_method_candidates("stock", true);
        assert_eq!(candidates.len(), 1);
        let handle = candidates[0].invoke(None, &[]).unwrap();
        assert_eq!(handle.downcast::<Engine>().unwrap().power, 90);
    }

    #[test]
    fn view_cast_produces_trait_object() {
        let ty = engine_type();
        let handle = ObjectHandle::new(Engine { power: 10 });
        assert!(ty.assignable_to(&TypeKey::of::<Arc<dyn Power>>()));

        let view = ty.cast_to(&handle, &TypeKey::of::<Arc<dyn Power>>()).unwrap();
        let power: Arc<Arc<dyn Power>> = view.downcast().unwrap();
        assert_eq!(power.power(), 10);
    }

    #[test]
    fn cast_to_unknown_key_fails() {
        let ty = engine_type();
        let handle = ObjectHandle::new(Engine { power: 10 });
        let result = ty.cast_to(&handle, &TypeKey::of::<String>());
        assert!(matches!(result, Err(ContainerError::TypeMismatch { .. })));
    }

    #[test]
    fn registry_rejects_duplicates() {
        let registry = TypeRegistry::new();
        registry.register(engine_type(), false).unwrap();
        assert!(registry.register(engine_type(), false).is_err());
        assert!(registry.register(engine_type(), true).is_ok());
    }

    #[test]
    fn instance_factory_receives_target() {
        struct Plant;
        let ty = ComponentType::builder::<Plant>("Plant")
            .constructor(vec![], |_| Ok(Plant))
            .instance_factory("make_engine", vec![ParamSpec::int("power")], |_plant, args| {
                Ok(Engine { power: args.int(0)? })
            })
            .build();

        let plant = ObjectHandle::new(Plant);
        let method = &ty.factory_method_candidates("make_engine", false)[0];
        let engine = method.invoke(Some(&plant), &[Value::Int(77)]).unwrap();
        assert_eq!(engine.downcast::<Engine>().unwrap().power, 77);

        assert!(method.invoke(None, &[Value::Int(1)]).is_err());
    }

    #[test]
    fn signature_rendering() {
        let ty = engine_type();
        assert_eq!(ty.constructors()[0].signature(), "(int)");
        let stock = &ty.factory_method_candidates("stock", true)[0];
        assert!(stock.signature().starts_with("stock()"));
    }
}

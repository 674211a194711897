//! Runtime values and declarative value specifications.
//!
//! The container moves two kinds of data around:
//!
//! - [`Value`] — a runtime argument or property value: a scalar, a list, a
//!   map, or a type-erased component instance ([`ObjectHandle`]).
//! - [`ValueSpec`] — the declarative side of the same coin, as it appears
//!   in a component definition: a literal, a reference to another
//!   component by name, a placeholder to substitute, an expression to
//!   evaluate, or an inner (nested) definition.

use std::any::Any;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use crate::definition::ComponentDefinition;
use crate::key::TypeKey;

/// A type-erased, shared component instance.
///
/// Carries the [`TypeKey`] of the concrete type so the resolution engine
/// can match parameters and apply trait views without reflection.
#[derive(Clone)]
pub struct ObjectHandle {
    key: TypeKey,
    obj: Arc<dyn Any + Send + Sync>,
}

impl ObjectHandle {
    /// Wraps a value in a new shared handle.
    pub fn new<T: Send + Sync + 'static>(value: T) -> Self {
        Self {
            key: TypeKey::of::<T>(),
            obj: Arc::new(value),
        }
    }

    /// Wraps an existing `Arc` without another allocation.
    pub fn from_arc<T: Send + Sync + 'static>(value: Arc<T>) -> Self {
        Self {
            key: TypeKey::of::<T>(),
            obj: value,
        }
    }

    /// The concrete type this handle holds.
    #[inline]
    pub fn key(&self) -> TypeKey {
        self.key
    }

    /// Typed access to the shared instance.
    pub fn downcast<T: Send + Sync + 'static>(&self) -> Option<Arc<T>> {
        Arc::clone(&self.obj).downcast::<T>().ok()
    }

    /// Borrow the erased instance, e.g. for property setters.
    #[inline]
    pub fn as_any(&self) -> &(dyn Any + Send + Sync) {
        &*self.obj
    }

    /// Identity comparison: do both handles point at the same allocation?
    pub fn same_instance(&self, other: &ObjectHandle) -> bool {
        Arc::ptr_eq(&self.obj, &other.obj)
    }
}

impl fmt::Debug for ObjectHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ObjectHandle({})", self.key)
    }
}

/// A runtime value flowing into a constructor, factory method or setter.
#[derive(Clone, Debug)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    List(Vec<Value>),
    Map(BTreeMap<String, Value>),
    Object(ObjectHandle),
}

impl Value {
    /// Short kind tag for error messages.
    pub fn kind(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Str(_) => "str",
            Value::List(_) => "list",
            Value::Map(_) => "map",
            Value::Object(_) => "object",
        }
    }

    /// Human-oriented description, used when a conversion fails.
    pub fn describe(&self) -> String {
        match self {
            Value::Object(handle) => format!("object of type {}", handle.key()),
            other => other.kind().to_string(),
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Float(f) => Some(*f),
            Value::Int(i) => Some(*i as f64),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_object(&self) -> Option<&ObjectHandle> {
        match self {
            Value::Object(handle) => Some(handle),
            _ => None,
        }
    }

    /// Typed shortcut through [`ObjectHandle::downcast`].
    pub fn downcast<T: Send + Sync + 'static>(&self) -> Option<Arc<T>> {
        self.as_object().and_then(ObjectHandle::downcast)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Str(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Str(v)
    }
}

impl From<ObjectHandle> for Value {
    fn from(v: ObjectHandle) -> Self {
        Value::Object(v)
    }
}

/// Declarative value as written in a component definition.
#[derive(Clone, Debug)]
pub enum ValueSpec {
    /// A literal runtime value. String literals still pass through the
    /// embedded-value resolver chain at resolution time.
    Literal(Value),
    /// A reference to another component by name.
    Ref(String),
    /// A placeholder string handed to the embedded-value resolvers.
    Placeholder(String),
    /// An expression handed to the expression evaluator.
    Expression(String),
    /// A nested definition, instantiated as a contained component.
    Inner(Box<ComponentDefinition>),
}

impl ValueSpec {
    pub fn literal(value: impl Into<Value>) -> Self {
        ValueSpec::Literal(value.into())
    }

    pub fn reference(name: impl Into<String>) -> Self {
        ValueSpec::Ref(name.into())
    }

    pub fn placeholder(expr: impl Into<String>) -> Self {
        ValueSpec::Placeholder(expr.into())
    }

    pub fn inner(definition: ComponentDefinition) -> Self {
        ValueSpec::Inner(Box::new(definition))
    }
}

/// A single property assignment on a definition.
#[derive(Clone, Debug)]
pub struct PropertyValue {
    pub name: String,
    pub spec: ValueSpec,
}

/// Ordered property set; merging replaces entries by name (child wins).
#[derive(Clone, Debug, Default)]
pub struct PropertyValues {
    values: Vec<PropertyValue>,
}

impl PropertyValues {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, name: impl Into<String>, spec: ValueSpec) {
        let name = name.into();
        if let Some(existing) = self.values.iter_mut().find(|pv| pv.name == name) {
            existing.spec = spec;
        } else {
            self.values.push(PropertyValue { name, spec });
        }
    }

    /// Overlays `other` onto `self`: entries from `other` replace same-named
    /// entries here and are appended otherwise.
    pub fn merge_from(&mut self, other: &PropertyValues) {
        for pv in &other.values {
            self.add(pv.name.clone(), pv.spec.clone());
        }
    }

    pub fn get(&self, name: &str) -> Option<&ValueSpec> {
        self.values.iter().find(|pv| pv.name == name).map(|pv| &pv.spec)
    }

    pub fn iter(&self) -> impl Iterator<Item = &PropertyValue> {
        self.values.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }
}

/// One declared constructor/factory-method argument.
#[derive(Clone, Debug)]
pub struct ArgumentValue {
    pub spec: ValueSpec,
    /// Optional declared type, matched against a parameter's type name or
    /// shape tag ("int", "str", ...).
    pub type_hint: Option<String>,
    /// Optional declared parameter name.
    pub name: Option<String>,
}

impl ArgumentValue {
    pub fn new(spec: ValueSpec) -> Self {
        Self { spec, type_hint: None, name: None }
    }

    pub fn with_type(mut self, type_hint: impl Into<String>) -> Self {
        self.type_hint = Some(type_hint.into());
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }
}

/// Declared constructor arguments: indexed entries plus generic (unindexed)
/// entries, matched against parameters positionally, by name or by type.
#[derive(Clone, Debug, Default)]
pub struct ConstructorArgumentValues {
    indexed: BTreeMap<usize, ArgumentValue>,
    generic: Vec<ArgumentValue>,
}

impl ConstructorArgumentValues {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_indexed(&mut self, index: usize, value: ArgumentValue) {
        self.indexed.insert(index, value);
    }

    pub fn add_generic(&mut self, value: ArgumentValue) {
        self.generic.push(value);
    }

    pub fn indexed(&self) -> &BTreeMap<usize, ArgumentValue> {
        &self.indexed
    }

    pub fn generic(&self) -> &[ArgumentValue] {
        &self.generic
    }

    /// Total number of declared argument values.
    pub fn len(&self) -> usize {
        self.indexed.len() + self.generic.len()
    }

    pub fn is_empty(&self) -> bool {
        self.indexed.is_empty() && self.generic.is_empty()
    }

    /// Overlays `other` onto `self`; indexed entries replace by index,
    /// generic entries are appended.
    pub fn merge_from(&mut self, other: &ConstructorArgumentValues) {
        for (index, value) in &other.indexed {
            self.indexed.insert(*index, value.clone());
        }
        for value in &other.generic {
            self.generic.push(value.clone());
        }
    }
}

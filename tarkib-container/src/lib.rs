//! Core container implementation for Tarkib IoC.
//!
//! # Architecture
//! ```text
//! register_type() / register_definition()
//!                │
//!                ▼
//!         ComponentFactory ──get("name")──> ObjectHandle
//!          │    │    │    │
//!          │    │    │    └─ ConstructorResolution (executable selection)
//!          │    │    └────── MergeEngine (parent-chain flattening)
//!          │    └─────────── SingletonRegistry (lifecycle + destruction)
//!          └──────────────── AliasRegistry (canonical names)
//! ```

pub mod alias;
pub mod convert;
pub mod definition;
pub mod error;
pub mod factory;
pub mod key;
pub mod merge;
pub mod registry;
pub mod resolution;
pub mod scope;
pub mod singleton;
pub mod value;

pub use error::{ContainerError, Result};
pub use factory::ComponentFactory;
pub use key::TypeKey;
pub use scope::Scope;

pub mod prelude {
    pub use crate::alias::AliasRegistry;
    pub use crate::convert::{ConversionService, SimpleConversionService};
    pub use crate::definition::{AutowireMode, ComponentDefinition, MergedDefinition};
    pub use crate::error::{ContainerError, Result};
    pub use crate::factory::{
        ComponentFactory, ComponentPostProcessor, EmbeddedValueResolver, ExpressionEvaluator,
        INDIRECTION_PREFIX,
    };
    pub use crate::key::TypeKey;
    pub use crate::registry::{
        Args, ComponentModule, ComponentType, ComponentTypeBuilder, ModuleRegistry, ParamShape,
        ParamSpec,
    };
    pub use crate::scope::{Scope, ScopeStrategy};
    pub use crate::singleton::{SingletonLookup, SingletonRegistry};
    pub use crate::value::{ArgumentValue, ObjectHandle, PropertyValues, Value, ValueSpec};
}

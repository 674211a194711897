//! Component lifetime scopes.
//!
//! A scope decides how many instances a definition produces:
//! - [`Scope::Singleton`] — one shared instance per container
//! - [`Scope::Prototype`] — a fresh instance on every request
//! - [`Scope::Named`] — delegated to a registered [`ScopeStrategy`]
//!   (e.g. a per-request or per-session scope)

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::value::ObjectHandle;

/// The lifetime/sharing policy of a definition.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Scope {
    /// One instance shared across the container.
    ///
    /// Created on first request, cached by the singleton registry, lives
    /// until [`crate::factory::ComponentFactory::destroy_all`].
    Singleton,

    /// New instance on every request; never cached, never destroyed by
    /// the container.
    Prototype,

    /// A custom scope, dispatched to the [`ScopeStrategy`] registered
    /// under this name.
    Named(String),
}

impl Default for Scope {
    fn default() -> Self {
        Scope::Singleton
    }
}

impl Scope {
    #[inline]
    pub fn is_singleton(&self) -> bool {
        matches!(self, Scope::Singleton)
    }

    #[inline]
    pub fn is_prototype(&self) -> bool {
        matches!(self, Scope::Prototype)
    }

    /// The strategy name for custom scopes.
    pub fn name(&self) -> &str {
        match self {
            Scope::Singleton => "singleton",
            Scope::Prototype => "prototype",
            Scope::Named(name) => name,
        }
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Producer handed to a [`ScopeStrategy`]; invoking it runs the container's
/// fresh-construction path for the requested component.
pub type ObjectProducer<'a> = &'a mut dyn FnMut() -> Result<ObjectHandle>;

/// Strategy object backing a custom scope.
///
/// Implementations own their instance storage (a request map, a session,
/// a thread registry, ...) and call back into the supplied producer when
/// the scope holds no instance yet.
pub trait ScopeStrategy: Send + Sync {
    /// Returns the instance bound under `name`, creating it via `producer`
    /// if absent.
    fn get(&self, name: &str, producer: ObjectProducer<'_>) -> Result<ObjectHandle>;

    /// Removes and returns the instance bound under `name`, if any.
    fn remove(&self, name: &str) -> Option<ObjectHandle>;

    /// Registers a teardown callback to run when the scoped instance ends
    /// its lifetime. Default: scope does not support destruction callbacks.
    fn register_destruction_callback(&self, _name: &str, _callback: Box<dyn FnOnce() + Send>) {}
}

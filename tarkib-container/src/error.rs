//! Error types for container operations.
//!
//! Every failure is a structured value on the calling thread; the
//! container has no asynchronous error channel. Messages carry hints,
//! rendered dependency chains and "did you mean?" suggestions.

use std::fmt;

use tarkib_support::rendering::render_chain;

use crate::key::TypeKey;

/// Main error type for all container operations.
#[derive(Debug, thiserror::Error)]
pub enum ContainerError {
    /// Requested name has no definition anywhere in the factory hierarchy.
    #[error("{}", .0)]
    NoSuchDefinition(NoSuchDefinitionError),

    /// Registering the alias would close an alias cycle.
    #[error("{}", .0)]
    CircularAlias(CircularAliasError),

    /// Alias already bound to a different name and overriding is disabled.
    #[error("{}", .0)]
    DuplicateAlias(DuplicateAliasError),

    /// Two components declare `depends-on` each other (directly or
    /// transitively).
    #[error("{}", .0)]
    CircularDependsOn(CircularDependsOnError),

    /// Re-entrant construction detected on a path that cannot be resolved
    /// by early exposure (e.g. a prototype self-cycle or a
    /// constructor-injection singleton cycle).
    #[error(
        "Component '{name}' is currently in creation: unresolvable circular reference\n  \
         Hint: break the cycle with a property reference so an early instance can be exposed"
    )]
    CurrentlyInCreation { name: String },

    /// Singleton requested while the registry is destroying singletons.
    #[error(
        "Singleton creation of '{name}' not allowed while the registry is in destruction \
         (do not request components from a destroy callback)"
    )]
    CreationNotAllowed { name: String },

    /// No candidate constructor or factory method could be satisfied.
    #[error("{}", .0)]
    NoMatchingConstructor(NoMatchingConstructorError),

    /// Several candidates tied at the same match weight in strict mode.
    #[error("{}", .0)]
    AmbiguousConstructor(AmbiguousConstructorError),

    /// Explicit call-site arguments matched no candidate's arity.
    #[error(
        "Ambiguous argument values for component '{component}': {supplied} explicit argument(s) \
         match no candidate ({candidates})\n  \
         Hint: explicit arguments must match a candidate's parameter count exactly"
    )]
    AmbiguousArguments {
        component: String,
        supplied: usize,
        candidates: String,
    },

    /// General wrapper for any failure during instantiation, property
    /// population or initialization callbacks.
    #[error("{}", .0)]
    Creation(Box<CreationError>),

    /// Post-construction required-type check failed.
    #[error(
        "Component '{name}' is of type {actual} and could not be converted to required type {required}"
    )]
    NotOfRequiredType {
        name: String,
        required: String,
        actual: String,
    },

    /// Argument or property conversion failure.
    #[error("Cannot convert {value} to {target}")]
    TypeMismatch { value: String, target: String },

    /// Abstract definitions are templates and cannot be instantiated.
    #[error("Definition '{name}' is abstract and cannot be instantiated directly")]
    DefinitionIsAbstract { name: String },

    /// Scope name has no registered strategy.
    #[error("No scope registered for scope name '{scope}'")]
    NoSuchScope { scope: String },

    /// The custom scope is not bound to the current execution context.
    #[error("Scope '{scope}' is not active for the current context while creating '{name}'")]
    ScopeNotActive { scope: String, name: String },

    /// A `&name` dereference was requested for a component whose type
    /// registers no indirection accessor.
    #[error("Component '{name}' of type {type_name} is not an indirection object")]
    NotAnIndirection { name: String, type_name: String },

    /// Autowire-by-type matched more than one candidate definition.
    #[error(
        "No unique candidate of type {required} for autowiring into '{component}': \
         matching definitions [{candidates}]\n  \
         Hint: mark one definition as primary or name the parameter after the wanted component"
    )]
    NoUniqueCandidate {
        component: String,
        required: String,
        candidates: String,
    },

    /// A structurally invalid definition (e.g. a parent-reference cycle, or
    /// neither a class nor a factory reference).
    #[error("Invalid definition '{name}': {message}")]
    InvalidDefinition { name: String, message: String },
}

/// Error when a component name has no definition.
///
/// Includes suggestions about what might have been meant.
#[derive(Debug)]
pub struct NoSuchDefinitionError {
    /// The name that was requested.
    pub requested: String,
    /// What required this component (if known).
    pub required_by: Option<String>,
    /// Similar names that ARE registered.
    pub suggestions: Vec<String>,
}

impl fmt::Display for NoSuchDefinitionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "No definition registered for component '{}'", self.requested)?;

        if let Some(ref parent) = self.required_by {
            write!(f, "\n  Required by: {parent}")?;
        }

        if !self.suggestions.is_empty() {
            write!(f, "\n  Did you mean one of:")?;
            for suggestion in &self.suggestions {
                write!(f, "\n    - {suggestion}")?;
            }
        }

        write!(
            f,
            "\n  Hint: Did you forget to register a definition for '{}'?",
            self.requested
        )
    }
}

/// Error when an alias registration would close a cycle.
#[derive(Debug)]
pub struct CircularAliasError {
    pub name: String,
    pub alias: String,
}

impl fmt::Display for CircularAliasError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Cannot register alias '{}' for name '{}': '{}' is already a direct or indirect alias for '{}'",
            self.alias, self.name, self.name, self.alias,
        )
    }
}

/// Error when an alias is already bound to a different name.
#[derive(Debug)]
pub struct DuplicateAliasError {
    pub alias: String,
    pub existing: String,
    pub requested: String,
}

impl fmt::Display for DuplicateAliasError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Cannot register alias '{}' for name '{}': it is already registered for name '{}'",
            self.alias, self.requested, self.existing,
        )?;
        write!(f, "\n  Hint: enable alias overriding to replace existing bindings")
    }
}

/// Error when two components pre-declare each other as dependencies.
///
/// Shows the full chain so the cycle is visible at a glance.
#[derive(Debug)]
pub struct CircularDependsOnError {
    /// The chain of `depends-on` declarations that forms the cycle.
    pub chain: Vec<String>,
}

impl fmt::Display for CircularDependsOnError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Circular depends-on relationship:\n  {}",
            render_chain(&self.chain),
        )?;
        write!(
            f,
            "\n  Hint: depends-on declares hard creation ordering and cannot be cyclic; \
             use a property reference for mutual wiring"
        )
    }
}

/// Error when no constructor or factory method could be satisfied.
#[derive(Debug)]
pub struct NoMatchingConstructorError {
    pub component: String,
    /// Signatures of the candidates that were considered.
    pub candidates: Vec<String>,
    /// The most specific dependency-resolution failure, if any.
    pub cause: Option<Box<ContainerError>>,
}

impl fmt::Display for NoMatchingConstructorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Could not resolve a matching constructor for component '{}'", self.component)?;
        if !self.candidates.is_empty() {
            write!(f, "\n  Candidates:")?;
            for candidate in &self.candidates {
                write!(f, "\n    - {candidate}")?;
            }
        }
        if let Some(ref cause) = self.cause {
            write!(f, "\n  Caused by: {cause}")?;
        }
        write!(
            f,
            "\n  Hint: declare index/type/name on simple argument values to avoid type ambiguities"
        )
    }
}

/// Error when several candidates tie at the same minimal weight.
#[derive(Debug)]
pub struct AmbiguousConstructorError {
    pub component: String,
    /// Signatures of every tied candidate.
    pub candidates: Vec<String>,
}

impl fmt::Display for AmbiguousConstructorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Ambiguous constructor matches for component '{}':", self.component)?;
        for candidate in &self.candidates {
            write!(f, "\n    - {candidate}")?;
        }
        write!(
            f,
            "\n  Hint: declare index/type/name on simple argument values, or allow lenient resolution"
        )
    }
}

/// General creation failure wrapper.
///
/// Carries the root cause plus any related causes that were suppressed
/// while eagerly resolving supporting components.
#[derive(Debug)]
pub struct CreationError {
    pub component: String,
    pub message: String,
    pub source: Option<ContainerError>,
    pub related: Vec<ContainerError>,
}

impl fmt::Display for CreationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Error creating component '{}': {}", self.component, self.message)?;
        if let Some(ref source) = self.source {
            write!(f, "\n  Caused by: {source}")?;
        }
        for related in &self.related {
            write!(f, "\n  Related cause: {related}")?;
        }
        Ok(())
    }
}

impl ContainerError {
    /// Wraps any error into the general creation wrapper, unless it is
    /// already one for the same component.
    pub fn creation(component: impl Into<String>, message: impl Into<String>, source: Option<ContainerError>) -> Self {
        ContainerError::Creation(Box::new(CreationError {
            component: component.into(),
            message: message.into(),
            source,
            related: Vec::new(),
        }))
    }

    /// Attaches suppressed related causes to a creation error; other
    /// variants are returned unchanged.
    pub fn with_related(self, related: Vec<ContainerError>) -> Self {
        match self {
            ContainerError::Creation(mut inner) => {
                inner.related.extend(related);
                ContainerError::Creation(inner)
            }
            other => other,
        }
    }

    /// Conversion failure helper used by the conversion service.
    pub fn type_mismatch(value: &crate::value::Value, target: &TypeKey) -> Self {
        ContainerError::TypeMismatch {
            value: value.describe(),
            target: target.type_name().to_string(),
        }
    }
}

/// Convenient Result type for container operations.
pub type Result<T> = std::result::Result<T, ContainerError>;

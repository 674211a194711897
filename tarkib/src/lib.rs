//! # Tarkib — a name-driven IoC container for Rust
//!
//! A runtime that owns the lifecycle of application components: it
//! resolves declarative definitions, selects constructors and factory
//! methods through dependency-aware argument matching, and assembles
//! whole object graphs on demand.

pub use tarkib_container::*;
pub use tarkib_support::*;

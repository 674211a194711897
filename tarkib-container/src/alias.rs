//! Alias registry — maps alternative names onto canonical component names.
//!
//! Aliases may chain (`a → b → c`); resolution follows the chain to a
//! fixed point. Registration rejects any pair that would close a cycle,
//! which is what guarantees [`AliasRegistry::canonical_name`] terminates.

use std::collections::HashMap;

use parking_lot::Mutex;
use tracing::{debug, trace};

use crate::error::{CircularAliasError, ContainerError, DuplicateAliasError, Result};

/// Bidirectional name-to-canonical-name mapping.
pub struct AliasRegistry {
    /// alias → canonical (or next-hop) name
    aliases: Mutex<HashMap<String, String>>,
    allow_override: bool,
}

impl Default for AliasRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl AliasRegistry {
    /// Creates an empty registry that permits alias overriding.
    pub fn new() -> Self {
        Self {
            aliases: Mutex::new(HashMap::new()),
            allow_override: true,
        }
    }

    /// Creates a registry with an explicit overriding policy.
    pub fn with_override(allow_override: bool) -> Self {
        Self {
            aliases: Mutex::new(HashMap::new()),
            allow_override,
        }
    }

    /// Registers `alias` for `name`.
    ///
    /// - `alias == name` removes any existing mapping (a self-alias is
    ///   meaningless).
    /// - Re-registering the same pair is a silent no-op.
    /// - A different existing target either gets overwritten (when
    ///   overriding is permitted) or fails with
    ///   [`ContainerError::DuplicateAlias`].
    /// - A pair that would close a cycle fails with
    ///   [`ContainerError::CircularAlias`] and leaves the registry
    ///   unchanged.
    pub fn register_alias(&self, name: &str, alias: &str) -> Result<()> {
        let mut aliases = self.aliases.lock();
        if alias == name {
            if aliases.remove(alias).is_some() {
                debug!(alias, "Alias ignored: points to same name");
            }
            return Ok(());
        }

        if let Some(registered) = aliases.get(alias) {
            if registered == name {
                // An existing alias - no need to re-register
                return Ok(());
            }
            if !self.allow_override {
                return Err(ContainerError::DuplicateAlias(DuplicateAliasError {
                    alias: alias.to_string(),
                    existing: registered.clone(),
                    requested: name.to_string(),
                }));
            }
            debug!(alias, old = %registered, new = name, "Overriding alias");
        }

        if Self::has_alias(&aliases, alias, name) {
            return Err(ContainerError::CircularAlias(CircularAliasError {
                name: name.to_string(),
                alias: alias.to_string(),
            }));
        }
        aliases.insert(alias.to_string(), name.to_string());
        trace!(alias, name, "Alias registered");
        Ok(())
    }

    /// Removes `alias`; returns whether it was registered.
    pub fn remove_alias(&self, alias: &str) -> bool {
        self.aliases.lock().remove(alias).is_some()
    }

    /// Whether `name` is registered as an alias (rather than a canonical
    /// name).
    pub fn is_alias(&self, name: &str) -> bool {
        self.aliases.lock().contains_key(name)
    }

    /// Follows the alias chain to its fixed point.
    ///
    /// Always terminates: cycles are rejected at registration time.
    pub fn canonical_name(&self, name: &str) -> String {
        let aliases = self.aliases.lock();
        let mut canonical = name;
        while let Some(resolved) = aliases.get(canonical) {
            canonical = resolved;
        }
        canonical.to_string()
    }

    /// All aliases transitively pointing at `name`.
    pub fn aliases_of(&self, name: &str) -> Vec<String> {
        let aliases = self.aliases.lock();
        let mut result = Vec::new();
        Self::collect_aliases(&aliases, name, &mut result);
        result
    }

    fn collect_aliases(aliases: &HashMap<String, String>, name: &str, result: &mut Vec<String>) {
        for (alias, registered) in aliases {
            if registered == name {
                result.push(alias.clone());
                Self::collect_aliases(aliases, alias, result);
            }
        }
    }

    /// Applies a renaming function to every registered alias/target pair,
    /// re-validating for collisions and newly introduced cycles.
    ///
    /// Used when placeholder-valued names get resolved post-hoc. The
    /// transform returning `None` (or collapsing alias and target into the
    /// same string) removes the entry.
    pub fn resolve_aliases(&self, transform: &dyn Fn(&str) -> Option<String>) -> Result<()> {
        let mut aliases = self.aliases.lock();
        let snapshot: Vec<(String, String)> =
            aliases.iter().map(|(a, n)| (a.clone(), n.clone())).collect();

        for (alias, registered) in snapshot {
            let resolved_alias = transform(&alias);
            let resolved_name = transform(&registered);
            let (resolved_alias, resolved_name) = match (resolved_alias, resolved_name) {
                (Some(a), Some(n)) if a != n => (a, n),
                _ => {
                    aliases.remove(&alias);
                    continue;
                }
            };

            if resolved_alias != alias {
                if let Some(existing) = aliases.get(&resolved_alias) {
                    if *existing == resolved_name {
                        // Pointing to existing alias - just remove placeholder
                        aliases.remove(&alias);
                        continue;
                    }
                    return Err(ContainerError::DuplicateAlias(DuplicateAliasError {
                        alias: resolved_alias,
                        existing: existing.clone(),
                        requested: resolved_name,
                    }));
                }
                if Self::has_alias(&aliases, &resolved_alias, &resolved_name) {
                    return Err(ContainerError::CircularAlias(CircularAliasError {
                        name: resolved_name,
                        alias: resolved_alias,
                    }));
                }
                aliases.remove(&alias);
                aliases.insert(resolved_alias, resolved_name);
            } else if registered != resolved_name {
                aliases.insert(alias, resolved_name);
            }
        }
        Ok(())
    }

    /// Whether `candidate` already resolves (directly or transitively)
    /// to `target`: the reverse-direction probe behind cycle rejection.
    fn has_alias(aliases: &HashMap<String, String>, target: &str, candidate: &str) -> bool {
        match aliases.get(candidate) {
            Some(registered) if registered == target => true,
            Some(registered) => Self::has_alias(aliases, target, registered),
            None => false,
        }
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.aliases.lock().len()
    }
}

impl std::fmt::Debug for AliasRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AliasRegistry")
            .field("aliases", &self.aliases.lock().len())
            .finish()
    }
}

//! Definition merge engine — flattens parent-referencing definitions into
//! concrete [`MergedDefinition`]s.
//!
//! Merged results are cached per canonical name and transparently rebuilt
//! when marked stale by definition mutation. Re-merges carry forward
//! expensive introspection results when the class/factory coordinates are
//! unchanged, so a metadata refresh does not redo resolution work.

use std::sync::Arc;

use tracing::{debug, trace};

use tarkib_support::rendering::render_chain;

use crate::definition::{ComponentDefinition, MergedDefinition};
use crate::error::{ContainerError, Result};
use crate::factory::ComponentFactory;

impl ComponentFactory {
    /// Returns the merged definition for a locally-registered component,
    /// merging the parent-definition chain on first access.
    ///
    /// `name` must already be canonical (no indirection prefix, aliases
    /// resolved).
    pub(crate) fn merged_local_definition(&self, name: &str) -> Result<Arc<MergedDefinition>> {
        // Quick check on the cache first, with minimal locking.
        if let Some(existing) = self.merged.lock().get(name) {
            if !existing.is_stale() {
                return Ok(existing.clone());
            }
        }
        let def = self.local_definition(name)?;
        self.merge_with_chain(name, &def, None, &mut vec![name.to_string()])
    }

    /// Returns a merged definition for `name`, delegating to the parent
    /// factory when this factory holds no local definition.
    pub fn merged_definition(&self, name: &str) -> Result<Arc<MergedDefinition>> {
        let canonical = self.transformed_name(name);
        if !self.contains_local_definition(&canonical) {
            if let Some(parent) = self.parent_factory() {
                return parent.merged_definition(&canonical);
            }
        }
        self.merged_local_definition(&canonical)
    }

    /// Merges `def` (usually an inner definition) against an optional
    /// containing definition. Inner merges are never cached standalone.
    pub(crate) fn merged_definition_for(
        &self,
        name: &str,
        def: &ComponentDefinition,
        containing: Option<&MergedDefinition>,
    ) -> Result<Arc<MergedDefinition>> {
        self.merge_with_chain(name, def, containing, &mut vec![name.to_string()])
    }

    fn merge_with_chain(
        &self,
        name: &str,
        def: &ComponentDefinition,
        containing: Option<&MergedDefinition>,
        visiting: &mut Vec<String>,
    ) -> Result<Arc<MergedDefinition>> {
        let mut previous: Option<Arc<MergedDefinition>> = None;
        if containing.is_none() {
            // Re-check under the lock so concurrent merges agree on one
            // instance; remember a stale entry for cache carry-forward.
            if let Some(existing) = self.merged.lock().get(name) {
                if !existing.is_stale() {
                    return Ok(existing.clone());
                }
                previous = Some(existing.clone());
            }
        }

        let mut merged = match &def.parent {
            None => MergedDefinition::from_definition(def),
            Some(parent_ref) => {
                let parent_merged = self.parent_chain_merge(name, parent_ref, visiting)?;
                // Deep copy of the parent with the child overlaid on top.
                let mut merged = MergedDefinition::copy_of(&parent_merged);
                merged.override_from(def);
                merged
            }
        };

        if merged.class_name.is_none() && merged.factory_component.is_none() {
            return Err(ContainerError::InvalidDefinition {
                name: name.to_string(),
                message: "definition declares neither a class nor a factory-component reference"
                    .into(),
            });
        }

        // A component contained in a non-singleton component cannot be a
        // singleton itself; correct the scope to match the container.
        if let Some(containing) = containing {
            if !containing.scope.is_singleton() && merged.scope.is_singleton() {
                trace!(
                    component = name,
                    scope = %containing.scope,
                    "Correcting inner definition scope to containing scope"
                );
                merged.scope = containing.scope.clone();
            }
        }

        let merged = Arc::new(merged);
        if containing.is_none() && self.cache_metadata() {
            if let Some(previous) = &previous {
                merged.copy_relevant_caches_from(previous);
            }
            debug!(component = name, scope = %merged.scope, "Cached merged definition");
            self.merged.lock().insert(name.to_string(), merged.clone());
        }
        Ok(merged)
    }

    fn parent_chain_merge(
        &self,
        name: &str,
        parent_ref: &str,
        visiting: &mut Vec<String>,
    ) -> Result<Arc<MergedDefinition>> {
        let parent_name = self.transformed_name(parent_ref);
        if parent_name != name {
            if visiting.iter().any(|n| n == &parent_name) {
                let mut chain = visiting.clone();
                chain.push(parent_name.clone());
                return Err(ContainerError::InvalidDefinition {
                    name: name.to_string(),
                    message: format!("parent-definition cycle: {}", render_chain(&chain)),
                });
            }
            if self.contains_local_definition(&parent_name) {
                let parent_def = self.local_definition(&parent_name)?;
                visiting.push(parent_name.clone());
                let merged = self.merge_with_chain(&parent_name, &parent_def, None, visiting);
                visiting.pop();
                return merged;
            }
            if let Some(parent_factory) = self.parent_factory() {
                return parent_factory.merged_definition(&parent_name);
            }
            return Err(ContainerError::InvalidDefinition {
                name: name.to_string(),
                message: format!("could not resolve parent definition '{parent_ref}'"),
            });
        }

        // Parent name equals the component name: only resolvable through
        // an ancestor factory holding the like-named definition.
        match self.parent_factory() {
            Some(parent_factory) => parent_factory.merged_definition(&parent_name),
            None => Err(ContainerError::InvalidDefinition {
                name: name.to_string(),
                message: format!(
                    "parent name '{parent_name}' is equal to the component name and no \
                     parent factory is available"
                ),
            }),
        }
    }

    /// Checks a merged definition before instantiation.
    pub(crate) fn check_merged(&self, merged: &MergedDefinition, name: &str) -> Result<()> {
        if merged.abstract_flag {
            return Err(ContainerError::DefinitionIsAbstract { name: name.to_string() });
        }
        Ok(())
    }

    /// Marks the cached merge for `name` stale, to be rebuilt on next
    /// access.
    pub fn clear_merged_definition(&self, name: &str) {
        if let Some(existing) = self.merged.lock().get(name) {
            existing.mark_stale();
        }
    }

    /// Marks every cached merge stale, except entries for components that
    /// have already been created (a live singleton is never retroactively
    /// unmerged). Typically called after a definition post-processing
    /// step mutated the source definitions.
    pub fn clear_metadata_cache(&self) {
        if self.is_configuration_frozen() {
            trace!("Metadata cache frozen; skipping invalidation");
            return;
        }
        let cache = self.merged.lock();
        for (name, merged) in cache.iter() {
            if !self.already_created.contains(name) {
                merged.mark_stale();
            }
        }
    }

    /// Freezes configuration: merged metadata is retained permanently and
    /// no longer eligible for eager invalidation.
    pub fn freeze_configuration(&self) {
        self.frozen.store(true, std::sync::atomic::Ordering::Release);
        debug!("Configuration frozen; merged metadata cached permanently");
    }

    pub fn is_configuration_frozen(&self) -> bool {
        self.frozen.load(std::sync::atomic::Ordering::Acquire)
    }
}

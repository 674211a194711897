//! Constructor and factory-method resolution — dependency-aware argument
//! matching over the registered executable candidates.
//!
//! Selection is greedy and weighted: candidates are ordered public-first
//! then most-parameters-first, each one tries to build a full argument
//! array (declared values first, autowired lookups when enabled), and the
//! minimum type-difference weight wins. The winning executable and its
//! argument forms are memoized on the merged definition so repeat
//! instantiation (prototypes, scoped components) skips the search and only
//! re-resolves the prepared subset.

use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::trace;

use crate::definition::{
    AutowireMode, MergedDefinition, PreparedArg, ResolvedArgs, ResolvedExecutable,
};
use crate::error::{
    AmbiguousConstructorError, ContainerError, NoMatchingConstructorError, Result,
};
use crate::factory::{ComponentFactory, CreationContext};
use crate::registry::{Executable, ParamShape, ParamSpec};
use crate::value::{ObjectHandle, Value, ValueSpec};

/// Weight of a candidate that cannot be satisfied at all.
const MAX_WEIGHT: i64 = i64::MAX;
/// Offset preferring raw argument matches over equal converted ones.
const RAW_PREFERENCE: i64 = 1024;
/// Penalty for candidates whose raw arguments are not directly assignable
/// in strict mode.
const ASSIGNABLE_RAW_PENALTY: i64 = 512;

/// One declared argument value, resolved to a runtime value, with its
/// declarative source kept for prepared-argument reuse.
struct DeclaredArg {
    value: Value,
    spec: ValueSpec,
    type_hint: Option<String>,
    name: Option<String>,
    used: bool,
}

impl DeclaredArg {
    fn matches(&self, param: &ParamSpec) -> bool {
        if let Some(hint) = &self.type_hint {
            if !param.matches_hint(hint) {
                return false;
            }
        }
        match (&self.name, param.name) {
            (Some(declared), Some(param_name)) => declared == param_name,
            (Some(_), None) => false,
            (None, _) => true,
        }
    }
}

/// Working set of declared argument values; each candidate pass consumes
/// every holder at most once.
#[derive(Default)]
struct DeclaredArgs {
    indexed: BTreeMap<usize, DeclaredArg>,
    generic: Vec<DeclaredArg>,
}

impl DeclaredArgs {
    /// Minimum parameter count implied by the declared values: the total
    /// count, raised further by any indexed position beyond it.
    fn min_args(&self) -> usize {
        let mut min = self.indexed.len() + self.generic.len();
        for &index in self.indexed.keys() {
            if index + 1 > min {
                min = index + 1;
            }
        }
        min
    }

    fn reset_used(&mut self) {
        for arg in self.indexed.values_mut() {
            arg.used = false;
        }
        for arg in &mut self.generic {
            arg.used = false;
        }
    }

    /// Matches parameter `index`: the indexed value at that position
    /// first, then the next compatible generic value.
    fn take(&mut self, index: usize, param: &ParamSpec) -> Option<(Value, ValueSpec)> {
        if let Some(arg) = self.indexed.get_mut(&index) {
            if !arg.used && arg.matches(param) {
                arg.used = true;
                return Some((arg.value.clone(), arg.spec.clone()));
            }
        }
        for arg in &mut self.generic {
            if !arg.used && arg.matches(param) {
                arg.used = true;
                return Some((arg.value.clone(), arg.spec.clone()));
            }
        }
        None
    }
}

/// Argument array built for one candidate.
struct BuiltArgs {
    raw: Vec<Value>,
    converted: Vec<Value>,
    prepared: Vec<PreparedArg>,
    resolve_necessary: bool,
}

fn unsatisfied(
    component: &str,
    index: usize,
    param: &ParamSpec,
    cause: Option<ContainerError>,
) -> ContainerError {
    ContainerError::creation(
        component,
        format!(
            "unsatisfied dependency for parameter #{index} of type {}",
            param.render()
        ),
        cause,
    )
}

fn signatures(candidates: &[Arc<Executable>]) -> Vec<String> {
    candidates.iter().map(|c| c.signature()).collect()
}

impl ComponentFactory {
    /// Instantiates via constructor selection over the registered
    /// candidates of the definition's target type.
    pub(crate) fn autowire_constructor(
        &self,
        name: &str,
        merged: &Arc<MergedDefinition>,
        explicit: Option<&[Value]>,
        ctx: &mut CreationContext,
    ) -> Result<ObjectHandle> {
        if explicit.is_none() {
            if let Some(cached) = merged.cached_resolution() {
                trace!(component = name, "Reusing cached constructor resolution");
                let args = self.arguments_from_cache(name, merged, &cached, ctx)?;
                return cached.exec.invoke(None, &args);
            }
        }

        let ty = self.component_type_for(name, merged)?;
        let candidates: Vec<Arc<Executable>> = ty
            .constructors()
            .iter()
            .filter(|c| merged.allow_non_public || c.is_public())
            .cloned()
            .collect();
        if candidates.is_empty() {
            return Err(ContainerError::NoMatchingConstructor(NoMatchingConstructorError {
                component: name.to_string(),
                candidates: Vec::new(),
                cause: None,
            }));
        }
        self.select_and_invoke(name, merged, candidates, None, explicit, ctx)
    }

    /// Instantiates via the definition's named factory method: static on
    /// the target class, or an instance method on the factory component.
    pub(crate) fn instantiate_with_factory_method(
        &self,
        name: &str,
        merged: &Arc<MergedDefinition>,
        explicit: Option<&[Value]>,
        ctx: &mut CreationContext,
    ) -> Result<ObjectHandle> {
        let Some(method) = merged.factory_method.clone() else {
            return Err(ContainerError::InvalidDefinition {
                name: name.to_string(),
                message: "factory-method instantiation without a factory method name".into(),
            });
        };

        let (factory_handle, factory_ty, is_static) = match &merged.factory_component {
            Some(factory_component) => {
                let factory_name = self.transformed_name(factory_component);
                if factory_name == name {
                    return Err(ContainerError::InvalidDefinition {
                        name: name.to_string(),
                        message: "factory-component reference points back to the same definition"
                            .into(),
                    });
                }
                let handle = self.get_internal(factory_component, ctx)?;
                let ty = self.types.get_by_key(&handle.key()).ok_or_else(|| {
                    ContainerError::InvalidDefinition {
                        name: name.to_string(),
                        message: format!(
                            "factory component '{factory_component}' has no registered type"
                        ),
                    }
                })?;
                (Some(handle), ty, false)
            }
            None => {
                let Some(class_name) = merged.class_name.as_deref() else {
                    return Err(ContainerError::InvalidDefinition {
                        name: name.to_string(),
                        message:
                            "definition declares neither a class nor a factory-component reference"
                                .into(),
                    });
                };
                let ty = self.types.get(class_name).ok_or_else(|| {
                    ContainerError::InvalidDefinition {
                        name: name.to_string(),
                        message: format!("class '{class_name}' is not registered"),
                    }
                })?;
                (None, ty, true)
            }
        };

        if explicit.is_none() {
            if let Some(cached) = merged.cached_resolution() {
                trace!(component = name, "Reusing cached factory-method resolution");
                let args = self.arguments_from_cache(name, merged, &cached, ctx)?;
                return cached.exec.invoke(factory_handle.as_ref(), &args);
            }
        }

        let candidates: Vec<Arc<Executable>> = factory_ty
            .factory_method_candidates(&method, is_static)
            .into_iter()
            .filter(|c| merged.allow_non_public || c.is_public())
            .collect();
        if candidates.is_empty() {
            return Err(ContainerError::NoMatchingConstructor(NoMatchingConstructorError {
                component: name.to_string(),
                candidates: vec![format!(
                    "{} factory method '{}' on {}",
                    if is_static { "static" } else { "instance" },
                    method,
                    factory_ty.class_name(),
                )],
                cause: None,
            }));
        }
        self.select_and_invoke(name, merged, candidates, factory_handle.as_ref(), explicit, ctx)
    }

    /// Shared candidate-selection core for constructors and factory
    /// methods.
    fn select_and_invoke(
        &self,
        name: &str,
        merged: &Arc<MergedDefinition>,
        mut candidates: Vec<Arc<Executable>>,
        target: Option<&ObjectHandle>,
        explicit: Option<&[Value]>,
        ctx: &mut CreationContext,
    ) -> Result<ObjectHandle> {
        // Single zero-parameter candidate with nothing declared: use it
        // directly and cache the trivial resolution.
        if candidates.len() == 1 && explicit.is_none() && merged.constructor_args.is_empty() {
            let unique = candidates[0].clone();
            if unique.param_count() == 0 {
                merged.store_resolution(ResolvedExecutable {
                    exec: unique.clone(),
                    args: ResolvedArgs::Fixed(Vec::new()),
                });
                return unique.invoke(target, &[]);
            }
        }

        let mut declared = match explicit {
            Some(_) => DeclaredArgs::default(),
            None => self.resolve_declared_arguments(name, merged, ctx)?,
        };
        let min_args = match explicit {
            Some(args) => args.len(),
            None => declared.min_args(),
        };
        let autowiring = explicit.is_none() && merged.autowire == AutowireMode::Constructor;
        let single_candidate = candidates.len() == 1;

        // Greedy bias: prefer executables consuming the most declared
        // values before falling back to autowiring for the rest.
        candidates.sort_by_key(|c| (!c.is_public(), std::cmp::Reverse(c.param_count())));

        let mut best: Option<(Arc<Executable>, BuiltArgs)> = None;
        let mut min_weight = MAX_WEIGHT;
        let mut ambiguous: Vec<Arc<Executable>> = Vec::new();
        let mut causes: Vec<ContainerError> = Vec::new();

        for candidate in &candidates {
            let param_count = candidate.param_count();
            if let Some((_, built)) = &best {
                if built.converted.len() > param_count {
                    // Already found a greedy candidate that can be
                    // satisfied; only less greedy ones remain.
                    break;
                }
            }
            if param_count < min_args {
                continue;
            }

            let built = match explicit {
                Some(explicit_args) => {
                    // Explicit call-site arguments must match exactly.
                    if param_count != explicit_args.len() {
                        continue;
                    }
                    BuiltArgs {
                        raw: explicit_args.to_vec(),
                        converted: explicit_args.to_vec(),
                        prepared: Vec::new(),
                        resolve_necessary: false,
                    }
                }
                None => match self.build_arguments(
                    name,
                    &mut declared,
                    candidate,
                    autowiring,
                    single_candidate,
                    ctx,
                ) {
                    Ok(built) => built,
                    Err(err) => {
                        trace!(
                            component = name,
                            candidate = %candidate.signature(),
                            "Skipping candidate: {err}"
                        );
                        causes.push(err);
                        continue;
                    }
                },
            };

            let weight = if merged.lenient_resolution {
                self.lenient_weight(&candidate.params, &built)
            } else {
                self.strict_weight(&candidate.params, &built)
            };
            if weight < min_weight {
                best = Some((candidate.clone(), built));
                min_weight = weight;
                ambiguous.clear();
            } else if let Some((best_exec, _)) = &best {
                if weight == min_weight && !candidate.same_signature(best_exec) {
                    if ambiguous.is_empty() {
                        ambiguous.push(best_exec.clone());
                    }
                    ambiguous.push(candidate.clone());
                }
            }
        }

        let Some((exec, built)) = best else {
            if let Some(explicit_args) = explicit {
                return Err(ContainerError::AmbiguousArguments {
                    component: name.to_string(),
                    supplied: explicit_args.len(),
                    candidates: signatures(&candidates).join(", "),
                });
            }
            // Surface the most recent cause; demote earlier ones to
            // suppressed diagnostics.
            let cause = causes.pop();
            for earlier in causes {
                self.singletons.on_suppressed(earlier);
            }
            return Err(ContainerError::NoMatchingConstructor(NoMatchingConstructorError {
                component: name.to_string(),
                candidates: signatures(&candidates),
                cause: cause.map(Box::new),
            }));
        };

        if !ambiguous.is_empty() {
            if !merged.lenient_resolution {
                return Err(ContainerError::AmbiguousConstructor(AmbiguousConstructorError {
                    component: name.to_string(),
                    candidates: signatures(&ambiguous),
                }));
            }
            trace!(
                component = name,
                chosen = %exec.signature(),
                ties = ambiguous.len(),
                "Weight tie resolved leniently"
            );
        }

        if explicit.is_none() {
            let args = if built.resolve_necessary {
                ResolvedArgs::Prepared(built.prepared.clone())
            } else {
                ResolvedArgs::Fixed(built.converted.clone())
            };
            merged.store_resolution(ResolvedExecutable { exec: exec.clone(), args });
        }
        exec.invoke(target, &built.converted)
    }

    /// Resolves the declared constructor argument values into runtime
    /// values, keeping the declarative sources for prepared reuse.
    fn resolve_declared_arguments(
        &self,
        name: &str,
        merged: &Arc<MergedDefinition>,
        ctx: &mut CreationContext,
    ) -> Result<DeclaredArgs> {
        let mut result = DeclaredArgs::default();
        for (index, arg) in merged.constructor_args.indexed() {
            let value = self.resolve_value_spec(name, merged, &arg.spec, ctx)?;
            result.indexed.insert(
                *index,
                DeclaredArg {
                    value,
                    spec: arg.spec.clone(),
                    type_hint: arg.type_hint.clone(),
                    name: arg.name.clone(),
                    used: false,
                },
            );
        }
        for arg in merged.constructor_args.generic() {
            let value = self.resolve_value_spec(name, merged, &arg.spec, ctx)?;
            result.generic.push(DeclaredArg {
                value,
                spec: arg.spec.clone(),
                type_hint: arg.type_hint.clone(),
                name: arg.name.clone(),
                used: false,
            });
        }
        Ok(result)
    }

    /// Builds the argument array for one candidate: declared values first
    /// (indexed, then generic), autowired lookups for the rest.
    fn build_arguments(
        &self,
        name: &str,
        declared: &mut DeclaredArgs,
        exec: &Executable,
        autowiring: bool,
        fallback: bool,
        ctx: &mut CreationContext,
    ) -> Result<BuiltArgs> {
        declared.reset_used();
        let mut built = BuiltArgs {
            raw: Vec::with_capacity(exec.param_count()),
            converted: Vec::with_capacity(exec.param_count()),
            prepared: Vec::with_capacity(exec.param_count()),
            resolve_necessary: false,
        };

        for (index, param) in exec.params.iter().enumerate() {
            if let Some((value, spec)) = declared.take(index, param) {
                let converted = self
                    .convert_for_param(&value, param)
                    .map_err(|err| unsatisfied(name, index, param, Some(err)))?;
                match &spec {
                    ValueSpec::Literal(_) => {
                        built.prepared.push(PreparedArg::Converted(converted.clone()));
                    }
                    other => {
                        built.resolve_necessary = true;
                        built.prepared.push(PreparedArg::Spec(other.clone()));
                    }
                }
                built.raw.push(value);
                built.converted.push(converted);
            } else if autowiring {
                let value = self
                    .resolve_autowired_param(name, param, fallback, ctx)
                    .map_err(|err| unsatisfied(name, index, param, Some(err)))?;
                built.raw.push(value.clone());
                built.converted.push(value);
                built.prepared.push(PreparedArg::Autowired);
                built.resolve_necessary = true;
            } else {
                return Err(unsatisfied(name, index, param, None));
            }
        }
        Ok(built)
    }

    /// Re-resolves a memoized argument array: converted values are reused,
    /// declarative sources and autowired slots resolve afresh.
    fn arguments_from_cache(
        &self,
        name: &str,
        merged: &Arc<MergedDefinition>,
        cached: &ResolvedExecutable,
        ctx: &mut CreationContext,
    ) -> Result<Vec<Value>> {
        match &cached.args {
            ResolvedArgs::Fixed(values) => Ok(values.clone()),
            ResolvedArgs::Prepared(prepared) => {
                let mut out = Vec::with_capacity(prepared.len());
                for (arg, param) in prepared.iter().zip(cached.exec.params.iter()) {
                    let value = match arg {
                        PreparedArg::Converted(value) => value.clone(),
                        PreparedArg::Spec(spec) => {
                            let value = self.resolve_value_spec(name, merged, spec, ctx)?;
                            self.convert_for_param(&value, param)?
                        }
                        PreparedArg::Autowired => {
                            self.resolve_autowired_param(name, param, true, ctx)?
                        }
                    };
                    out.push(value);
                }
                Ok(out)
            }
        }
    }

    /// Resolves an undeclared parameter as a dependency lookup by type.
    ///
    /// Array/collection/map-shaped parameters degrade to empty-but-non-null
    /// instances only as a last resort for the single viable candidate.
    pub(crate) fn resolve_autowired_param(
        &self,
        requesting: &str,
        param: &ParamSpec,
        fallback: bool,
        ctx: &mut CreationContext,
    ) -> Result<Value> {
        match param.shape {
            ParamShape::Object => {}
            ParamShape::List if fallback => return Ok(Value::List(Vec::new())),
            ParamShape::Map if fallback => return Ok(Value::Map(BTreeMap::new())),
            _ => {
                return Err(ContainerError::creation(
                    requesting,
                    format!("cannot autowire parameter of type {}", param.render()),
                    None,
                ));
            }
        }

        let candidates = self.autowire_candidates(&param.key, requesting);
        match candidates.len() {
            0 => Err(ContainerError::creation(
                requesting,
                format!("no component of type {} available for autowiring", param.key),
                None,
            )),
            1 => self.autowired_value(&candidates[0], requesting, param, ctx),
            _ => {
                let mut primaries = Vec::new();
                for candidate in &candidates {
                    if let Ok(merged) = self.merged_definition(candidate) {
                        if merged.primary {
                            primaries.push(candidate.clone());
                        }
                    }
                }
                if primaries.len() == 1 {
                    return self.autowired_value(&primaries[0], requesting, param, ctx);
                }
                if let Some(param_name) = param.name {
                    if candidates.iter().any(|c| c == param_name) {
                        return self.autowired_value(param_name, requesting, param, ctx);
                    }
                }
                Err(ContainerError::NoUniqueCandidate {
                    component: requesting.to_string(),
                    required: param.key.type_name().to_string(),
                    candidates: candidates.join(", "),
                })
            }
        }
    }

    fn autowired_value(
        &self,
        candidate: &str,
        requesting: &str,
        param: &ParamSpec,
        ctx: &mut CreationContext,
    ) -> Result<Value> {
        let handle = self.get_internal(candidate, ctx)?;
        let canonical = self.transformed_name(candidate);
        self.singletons.register_dependent(&canonical, requesting);
        trace!(
            component = requesting,
            autowired = %canonical,
            "Autowired dependency by type"
        );
        self.convert_for_param(&Value::Object(handle), param)
    }

    /// Converts a value to a parameter type: object parameters adapt via
    /// registered views, everything else goes through the conversion
    /// service.
    pub(crate) fn convert_for_param(&self, value: &Value, param: &ParamSpec) -> Result<Value> {
        if param.shape == ParamShape::Object {
            return match value {
                Value::Null => Ok(Value::Null),
                Value::Object(handle) if handle.key() == param.key => Ok(value.clone()),
                Value::Object(handle) => match self.types.get_by_key(&handle.key()) {
                    Some(ty) => ty.cast_to(handle, &param.key).map(Value::Object),
                    None => Err(ContainerError::type_mismatch(value, &param.key)),
                },
                other => Err(ContainerError::type_mismatch(other, &param.key)),
            };
        }
        self.conversion_service().convert(value, param)
    }

    /// Weight of one argument against one parameter: 0 for a direct
    /// match, small positive for near matches, `MAX_WEIGHT` when not
    /// assignable.
    fn value_weight(&self, param: &ParamSpec, value: &Value) -> i64 {
        match (param.shape, value) {
            (_, Value::Null) => 0,
            (ParamShape::Bool, Value::Bool(_))
            | (ParamShape::Int, Value::Int(_))
            | (ParamShape::Float, Value::Float(_))
            | (ParamShape::Str, Value::Str(_))
            | (ParamShape::List, Value::List(_))
            | (ParamShape::Map, Value::Map(_)) => 0,
            (ParamShape::Float, Value::Int(_)) => 1,
            (ParamShape::Object, Value::Object(handle)) => {
                if handle.key() == param.key {
                    0
                } else if self.key_assignable(&handle.key(), &param.key) {
                    2
                } else {
                    MAX_WEIGHT
                }
            }
            _ => MAX_WEIGHT,
        }
    }

    fn args_weight(&self, params: &[ParamSpec], values: &[Value]) -> i64 {
        let mut total = 0i64;
        for (param, value) in params.iter().zip(values.iter()) {
            let weight = self.value_weight(param, value);
            if weight == MAX_WEIGHT {
                return MAX_WEIGHT;
            }
            total += weight;
        }
        total
    }

    /// Lenient mode: total conversion distance, with raw arguments
    /// preferred by a fixed offset when they are already assignable.
    fn lenient_weight(&self, params: &[ParamSpec], built: &BuiltArgs) -> i64 {
        let converted = self.args_weight(params, &built.converted);
        let raw = self.args_weight(params, &built.raw) - RAW_PREFERENCE;
        converted.min(raw)
    }

    /// Strict mode: binary assignability ladder.
    fn strict_weight(&self, params: &[ParamSpec], built: &BuiltArgs) -> i64 {
        for (param, value) in params.iter().zip(built.converted.iter()) {
            if self.value_weight(param, value) == MAX_WEIGHT {
                return MAX_WEIGHT;
            }
        }
        for (param, value) in params.iter().zip(built.raw.iter()) {
            if self.value_weight(param, value) == MAX_WEIGHT {
                return MAX_WEIGHT - ASSIGNABLE_RAW_PENALTY;
            }
        }
        MAX_WEIGHT - RAW_PREFERENCE
    }
}

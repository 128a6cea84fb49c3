//! OperationCompiler: turns an operation into a compiled operation
//!
//! Steps, in order:
//! 1. resolve the component reference chain
//! 2. merge layers `project-default → referenced operations → presets → user`
//!    and apply the merged `runPatch`
//! 3. validate params against the component's inputs and outputs
//! 4. render every template in the run with the param/global context
//! 5. attach per-replica contexts
//! 6. flatten trigger and early stopping policies
//! 7. check every requested connection against the connection table
//!
//! ```rust,ignore
//! let compiled = OperationCompiler::new(operation)
//!     .with_resolver(&resolver)
//!     .with_connections(&connections)
//!     .with_globals(globals)
//!     .compile()
//!     .await?;
//! ```

use std::collections::BTreeMap;

use async_trait::async_trait;
use plx_common::template::TemplateEngine;
use plx_schema::io::ParamSpec;
use plx_schema::{
    CompiledOperation, Component, ComponentReference, Connection, Globals, Operation, Param,
    PatchStrategy, Run, SchemaError,
};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info};

use crate::contexts::{
    apply_param_side_effects, build_context, check_connections, replica_contexts, used_connections,
};
use crate::loader::{accumulate, merge};
use crate::matrix::Trial;
use crate::resolver::{resolve_component, ComponentResolver};
use crate::{CompileError, Result};

const REFERENCE_KEYS: &[&str] = &["component", "hubRef", "pathRef", "urlRef", "dagRef", "version", "isPreset"];

/// Resolver used when none is configured; only inline components resolve
struct InlineOnly;

#[async_trait]
impl ComponentResolver for InlineOnly {
    async fn fetch(&self, reference: &ComponentReference) -> Result<Value> {
        Err(CompileError::resolve(
            format!("{}:{}", reference.source(), reference.identifier()),
            "no resolver configured",
        ))
    }

    async fn fetch_preset(&self, name: &str) -> Result<Value> {
        Err(CompileError::resolve(format!("preset:{}", name), "no resolver configured"))
    }
}

static INLINE_ONLY: InlineOnly = InlineOnly;

/// Operation after reference resolution and layer merging
#[derive(Clone, Debug)]
pub struct Resolved {
    /// Merged operation; `component` holds the patched component
    pub operation: Operation,
    /// Component with every layer's `runPatch` applied
    pub component: Component,
    /// Labels of the layers applied, in order
    pub layers: Vec<String>,
}

/// Compiles an [`Operation`] into a [`CompiledOperation`]
pub struct OperationCompiler<'a> {
    operation: Operation,
    resolver: Option<&'a dyn ComponentResolver>,
    project_default: Option<Value>,
    connections: BTreeMap<String, Connection>,
    globals: Globals,
    upstream: BTreeMap<String, Value>,
    engine: TemplateEngine,
}

impl<'a> OperationCompiler<'a> {
    /// Create a compiler for an operation
    pub fn new(operation: Operation) -> Self {
        Self {
            operation,
            resolver: None,
            project_default: None,
            connections: BTreeMap::new(),
            globals: Globals::default(),
            upstream: BTreeMap::new(),
            engine: TemplateEngine::new(),
        }
    }

    /// Resolver for non-inline components and presets
    pub fn with_resolver(mut self, resolver: &'a dyn ComponentResolver) -> Self {
        self.resolver = Some(resolver);
        self
    }

    /// Project default preset, applied before every other layer
    pub fn with_project_default(mut self, preset: Value) -> Self {
        self.project_default = Some(preset);
        self
    }

    /// Connection table
    pub fn with_connections(mut self, connections: &BTreeMap<String, Connection>) -> Self {
        self.connections = connections.clone();
        self
    }

    /// Run metadata exposed as `globals`
    pub fn with_globals(mut self, globals: Globals) -> Self {
        self.globals = globals;
        self
    }

    /// Values of referenced params, keyed `<ref>.<section>.<name>`
    /// (e.g. `ops.train.outputs.loss`)
    pub fn with_upstream(mut self, values: BTreeMap<String, Value>) -> Self {
        self.upstream = values;
        self
    }

    /// Resolve, merge and compile.
    ///
    /// Operations carrying a matrix compile to a parent whose run is left
    /// unrendered; trials are compiled with [`OperationCompiler::compile_trial`].
    pub async fn compile(&self) -> Result<CompiledOperation> {
        let resolved = self.resolve().await?;
        if resolved.operation.matrix.is_some() {
            return self.compile_matrix_parent(&resolved);
        }
        self.compile_resolved(&resolved, None, &BTreeMap::new())
    }

    /// Steps 1 and 2: reference resolution and layer merging
    pub async fn resolve(&self) -> Result<Resolved> {
        let resolver: &dyn ComponentResolver = self.resolver.unwrap_or(&INLINE_ONLY);
        let resolution = resolve_component(&self.operation, resolver).await?;
        let mut component = resolution.component;
        let run_kind = component.run.kind();

        let mut layers: Vec<(String, Value)> = Vec::new();
        if let Some(preset) = &self.project_default {
            layers.push(("project-default".to_string(), canonical_layer(preset.clone())?));
        }
        for (label, op) in resolution.chain.iter().rev() {
            layers.push((label.clone(), canonical_layer(serde_json::to_value(op)?)?));
        }

        let mut preset_names: Vec<&String> = Vec::new();
        let chain_presets = resolution.chain.iter().rev().flat_map(|(_, op)| op.presets.iter());
        for name in component.presets.iter().chain(chain_presets).chain(self.operation.presets.iter()) {
            if !preset_names.contains(&name) {
                preset_names.push(name);
            }
        }
        for name in preset_names {
            let doc = resolver.fetch_preset(name).await?;
            layers.push((format!("preset:{}", name), canonical_layer(doc)?));
        }
        layers.push(("user".to_string(), canonical_layer(serde_json::to_value(&self.operation)?)?));

        let mut merged = Value::Null;
        let mut run_patch = Value::Null;
        let mut applied = Vec::with_capacity(layers.len());
        for (label, mut layer) in layers {
            let strategy = layer_strategy(&layer);
            if let Some(patch) = layer.as_object_mut().and_then(|o| o.remove("runPatch")) {
                if let Some(kind) = patch.get("kind").and_then(Value::as_str) {
                    if kind != run_kind.as_str() {
                        return Err(CompileError::PatchConflict {
                            layer: label,
                            from: run_kind.to_string(),
                            to: kind.to_string(),
                        });
                    }
                }
                accumulate(&mut run_patch, canonical_run_patch(patch, &component.run)?, strategy);
            }
            info!(layer = %label, strategy = %strategy, "applying operation layer");
            accumulate(&mut merged, layer, strategy);
            applied.push(label);
        }

        let mut operation: Operation = serde_json::from_value(merged)?;
        if !run_patch.is_null() {
            let strategy = operation.patch_strategy.unwrap_or_default();
            let mut run = serde_json::to_value(&component.run)?;
            merge(&mut run, run_patch, strategy);
            component.run = serde_json::from_value(run)
                .map_err(|e| SchemaError::schema("runPatch", "a patch compatible with the run", e.to_string()))?;
        }
        component.queue = operation.queue.clone().or(component.queue);
        component.cache = merge_section(component.cache.take(), operation.cache.take())?;
        component.termination = merge_section(component.termination.take(), operation.termination.take())?;
        component.plugins = merge_section(component.plugins.take(), operation.plugins.take())?;
        operation.component = Some(Box::new(component.clone()));
        operation.validate()?;

        Ok(Resolved {
            operation,
            component,
            layers: applied,
        })
    }

    /// Compile one matrix trial
    pub fn compile_trial(&self, resolved: &Resolved, iteration: u32, trial: &Trial) -> Result<CompiledOperation> {
        debug!(iteration, trial = trial.index, "compiling matrix trial");
        let mut compiled = self.compile_resolved(resolved, Some(iteration), &trial.params)?;
        compiled.matrix = None;
        Ok(compiled)
    }

    fn compile_matrix_parent(&self, resolved: &Resolved) -> Result<CompiledOperation> {
        let deferred: Vec<String> = resolved
            .operation
            .matrix
            .as_ref()
            .map(matrix_param_names)
            .unwrap_or_default();
        let specs = self.validate_params(&resolved.component, &resolved.operation.params, &deferred)?;
        let mut compiled = self.skeleton(resolved, resolved.component.run.clone(), &specs);
        compiled.matrix = resolved.operation.matrix.clone();
        Ok(compiled)
    }

    /// Steps 3 to 7 on an already resolved operation
    pub fn compile_resolved(
        &self,
        resolved: &Resolved,
        iteration: Option<u32>,
        overrides: &BTreeMap<String, Value>,
    ) -> Result<CompiledOperation> {
        let mut params = resolved.operation.params.clone();
        for (name, value) in overrides {
            params.insert(name.clone(), Param::value(value.clone()));
        }
        let specs = self.validate_params(&resolved.component, &params, &[])?;

        let mut globals = self.globals.clone();
        if iteration.is_some() {
            globals.iteration = iteration;
        }

        let used = used_connections(&resolved.component.run, &specs);
        check_connections(&used, &self.connections)?;
        let ctx = build_context(&specs, &globals, &self.connections, &used)?;

        let run: Run = self.render_typed(&resolved.component.run, &ctx, "run")?;
        let mut compiled = self.skeleton(resolved, run, &specs);
        compiled.globals = globals;
        compiled.iteration = iteration;
        if let Some(termination) = &resolved.component.termination {
            compiled.termination = Some(self.render_typed(termination, &ctx, "termination")?);
        }

        apply_param_side_effects(&mut compiled, &specs)?;
        compiled.connections = used_connections(&compiled.run, &specs);
        check_connections(&compiled.connections, &self.connections)?;
        compiled.contexts = replica_contexts(&compiled.run)?;
        info!(
            kind = %compiled.run_kind(),
            params = specs.len(),
            connections = compiled.connections.len(),
            "operation compiled"
        );
        Ok(compiled)
    }

    fn skeleton(&self, resolved: &Resolved, run: Run, specs: &[ParamSpec]) -> CompiledOperation {
        let op = &resolved.operation;
        let component = &resolved.component;
        let mut compiled = CompiledOperation::from_run(run);
        compiled.version = Some(plx_schema::version::CURRENT_VERSION);
        compiled.name = op.name.clone().or_else(|| component.name.clone());
        compiled.description = op.description.clone().or_else(|| component.description.clone());
        compiled.tags = if op.tags.is_empty() { component.tags.clone() } else { op.tags.clone() };
        compiled.queue = component.queue.clone();
        compiled.cache = component.cache.clone();
        compiled.termination = component.termination.clone();
        compiled.plugins = component.plugins.clone();
        compiled.inputs = component.inputs.clone();
        compiled.outputs = component.outputs.clone();
        compiled.params = specs.iter().map(|s| (s.name.clone(), s.value.clone())).collect();
        compiled.globals = self.globals.clone();
        compiled.schedule = op.schedule.clone();
        compiled.hooks = op.hooks.clone();
        compiled.events = op.events.clone();
        compiled.dependencies = op.dependencies.clone();
        compiled.trigger = op.trigger;
        compiled.trigger_statuses = op.trigger.map(|t| t.statuses()).unwrap_or_default();
        compiled.early_stopping = op
            .matrix
            .as_ref()
            .map(|m| m.early_stopping().to_vec())
            .unwrap_or_default();
        compiled.is_approved = op.is_approved.or(component.is_approved);
        compiled.cost = op.cost.or(component.cost);
        compiled
    }

    fn validate_params(
        &self,
        component: &Component,
        params: &BTreeMap<String, Param>,
        deferred: &[String],
    ) -> Result<Vec<ParamSpec>> {
        for (name, param) in params {
            if component.io(name).is_none() && !param.context_only.unwrap_or(false) {
                return Err(SchemaError::schema(
                    format!("params.{}", name),
                    "a declared input or output",
                    format!("unknown param `{}`", name),
                )
                .into());
            }
        }

        let mut specs = Vec::new();
        let declared = component
            .inputs
            .iter()
            .map(|io| (io, false))
            .chain(component.outputs.iter().map(|io| (io, true)));
        for (io, is_output) in declared {
            let path = format!("params.{}", io.name);
            let param = params.get(&io.name);
            let raw = match param {
                Some(p) if p.reference.is_some() => self.upstream_value(p)?,
                Some(p) => p.value.clone(),
                None => None,
            }
            .or_else(|| io.value.clone())
            .unwrap_or(Value::Null);

            let lenient = is_output || deferred.contains(&io.name) || io.delay_validation.unwrap_or(false);
            let value = if raw.is_null() && lenient {
                Value::Null
            } else {
                io.validate(&raw, &path)?
            };
            specs.push(ParamSpec {
                name: io.name.clone(),
                value,
                io: Some(io.clone()),
                is_output,
                context_only: false,
                connection: param.and_then(|p| p.connection.clone()).or_else(|| io.connection.clone()),
                to_init: param.and_then(|p| p.to_init).or(io.to_init).unwrap_or(false),
                to_env: param.and_then(|p| p.to_env.clone()).or_else(|| io.to_env.clone()),
            });
        }

        for (name, param) in params {
            if component.io(name).is_some() {
                continue;
            }
            specs.push(ParamSpec {
                name: name.clone(),
                value: param.value.clone().unwrap_or(Value::Null),
                io: None,
                is_output: false,
                context_only: true,
                connection: param.connection.clone(),
                to_init: false,
                to_env: param.to_env.clone(),
            });
        }
        Ok(specs)
    }

    fn upstream_value(&self, param: &Param) -> Result<Option<Value>> {
        let (Some(reference), Some(selector)) = (param.param_ref()?, param.selector()?) else {
            return Ok(None);
        };
        let key = format!("{}.{}.{}", reference, selector.section.as_str(), selector.name);
        let value = self.upstream.get(&key).cloned();
        if value.is_none() {
            debug!(reference = %key, "upstream value not provided");
        }
        Ok(value)
    }

    fn render_typed<T: Serialize + DeserializeOwned>(&self, value: &T, ctx: &Value, root: &str) -> Result<T> {
        let mut raw = serde_json::to_value(value)?;
        let report = self.engine.render_json(&mut raw, ctx)?;
        serde_json::from_value(raw).map_err(|e| {
            match (report.empty_paths.first(), report.empty_expressions.first()) {
                (Some(pointer), Some(expr)) => {
                    SchemaError::missing_input(expr.trim(), format!("{}{}", root, pointer.replace('/', "."))).into()
                }
                _ => SchemaError::schema(root, "a valid value after substitution", e.to_string()).into(),
            }
        })
    }
}

fn matrix_param_names(matrix: &plx_schema::Matrix) -> Vec<String> {
    match matrix {
        plx_schema::Matrix::Mapping(m) => {
            let mut names: Vec<String> = Vec::new();
            for key in m.values.iter().flat_map(|v| v.keys()) {
                if !names.contains(key) {
                    names.push(key.clone());
                }
            }
            names
        }
        other => other
            .params()
            .map(|p| p.names().into_iter().map(str::to_string).collect())
            .unwrap_or_default(),
    }
}

fn layer_strategy(layer: &Value) -> PatchStrategy {
    layer
        .get("patchStrategy")
        .cloned()
        .and_then(|s| serde_json::from_value(s).ok())
        .unwrap_or_default()
}

/// Layer in canonical (camelCase) form without reference keys
fn canonical_layer(doc: Value) -> Result<Value> {
    let op: Operation = serde_json::from_value(doc)
        .map_err(|e| SchemaError::schema("preset", "an operation layer", e.to_string()))?;
    let mut value = serde_json::to_value(op)?;
    if let Some(obj) = value.as_object_mut() {
        for key in REFERENCE_KEYS {
            obj.remove(*key);
        }
    }
    Ok(value)
}

/// Run patch in canonical form, typed against the run's kind
fn canonical_run_patch(mut patch: Value, run: &Run) -> Result<Value> {
    if let Some(obj) = patch.as_object_mut() {
        obj.entry("kind")
            .or_insert_with(|| Value::String(run.kind().to_string()));
    }
    let typed: Run = serde_json::from_value(patch)
        .map_err(|e| SchemaError::schema("runPatch", format!("a {} patch", run.kind()), e.to_string()))?;
    Ok(serde_json::to_value(typed)?)
}

/// Operation-level section merged over the component's
fn merge_section<T: Serialize + DeserializeOwned>(base: Option<T>, patch: Option<T>) -> Result<Option<T>> {
    match (base, patch) {
        (Some(base), Some(patch)) => {
            let mut merged = serde_json::to_value(base)?;
            merge(&mut merged, serde_json::to_value(patch)?, PatchStrategy::PostMerge);
            Ok(Some(serde_json::from_value(merged)?))
        }
        (base, patch) => Ok(patch.or(base)),
    }
}

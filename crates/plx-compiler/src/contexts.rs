//! Template contexts and param side effects (`toEnv`, `toInit`)

use std::collections::BTreeMap;

use plx_schema::init::Init;
use plx_schema::k8s::EnvVar;
use plx_schema::{CompiledOperation, Connection, Globals, IoType, ParamSpec, ReplicaContext, Run};
use serde_json::{json, Map, Value};
use tracing::warn;

use crate::{CompileError, Result};

/// Keys of the context root that params cannot shadow
const RESERVED_KEYS: &[&str] = &["params", "globals", "inputs", "outputs", "connections"];

/// Context exposed to `{{ ... }}` expressions.
///
/// Params are reachable both as top-level names (`{{ lr }}`) and under
/// `params.<name>` with their `value`, `as_str` and `as_arg` forms.
pub fn build_context(
    specs: &[ParamSpec],
    globals: &Globals,
    connections: &BTreeMap<String, Connection>,
    used_connections: &[String],
) -> Result<Value> {
    let mut root = Map::new();
    let mut params = Map::new();
    let mut inputs = Map::new();
    let mut outputs = Map::new();

    for spec in specs {
        if !RESERVED_KEYS.contains(&spec.name.as_str()) {
            root.insert(spec.name.clone(), spec.value.clone());
        }
        params.insert(spec.name.clone(), spec.context());
        match (&spec.io, spec.is_output) {
            (Some(_), false) => {
                inputs.insert(spec.name.clone(), spec.value.clone());
            }
            (Some(_), true) => {
                outputs.insert(spec.name.clone(), spec.value.clone());
            }
            (None, _) => {}
        }
    }

    let mut conns = Map::new();
    for name in used_connections {
        if let Some(connection) = connections.get(name) {
            conns.insert(
                name.clone(),
                json!({
                    "name": connection.name,
                    "kind": connection.kind.as_str(),
                    "schema": serde_json::to_value(connection)?.get("schema").cloned().unwrap_or(Value::Null),
                    "mount_path": connection.mount_path(),
                    "store_path": connection.store_path(),
                }),
            );
        }
    }

    root.insert("params".to_string(), Value::Object(params));
    root.insert("inputs".to_string(), Value::Object(inputs));
    root.insert("outputs".to_string(), Value::Object(outputs));
    root.insert("globals".to_string(), serde_json::to_value(globals)?);
    root.insert("connections".to_string(), Value::Object(conns));
    Ok(Value::Object(root))
}

/// One context per replica role
pub fn replica_contexts(run: &Run) -> Result<BTreeMap<String, ReplicaContext>> {
    let mut contexts = BTreeMap::new();
    for replica in run.replicas() {
        let mut init = Vec::with_capacity(replica.pod.init.len());
        for (i, item) in replica.pod.init.iter().enumerate() {
            init.push(item.kind(&format!("run.{}.init[{}]", replica.role, i))?.to_string());
        }
        let mut connections = replica.pod.connections.clone();
        for name in replica.pod.init.iter().filter_map(|i| i.connection.as_ref()) {
            if !connections.contains(name) {
                connections.push(name.clone());
            }
        }
        let replicas = match replica.replicas {
            Some(r) => Some(*r.resolved(&format!("run.{}.replicas", replica.role))?),
            None => None,
        };
        contexts.insert(
            replica.role,
            ReplicaContext {
                replicas,
                init,
                connections,
            },
        );
    }
    Ok(contexts)
}

/// Every connection the compiled operation needs, in first-use order
pub fn used_connections(run: &Run, specs: &[ParamSpec]) -> Vec<String> {
    let mut names = run.connection_names();
    for spec in specs {
        let from_value = match spec.io.as_ref().map(|io| io.effective_type()) {
            Some(IoType::Connection) => spec.value.as_str().map(str::to_string),
            _ => None,
        };
        for name in spec.connection.clone().into_iter().chain(from_value) {
            if !names.contains(&name) {
                names.push(name);
            }
        }
    }
    names
}

/// Fail on the first connection missing from the table
pub fn check_connections(
    names: &[String],
    connections: &BTreeMap<String, Connection>,
) -> Result<()> {
    for name in names {
        if !connections.contains_key(name) {
            return Err(CompileError::UnknownConnection {
                name: name.clone(),
                path: "connections".to_string(),
            });
        }
    }
    Ok(())
}

/// Init item materializing a `toInit` param
fn init_for(spec: &ParamSpec) -> Result<Option<Init>> {
    let ty = spec
        .io
        .as_ref()
        .map(|io| io.effective_type())
        .unwrap_or(IoType::Any);
    let value = || -> Result<Value> {
        if spec.value.is_null() {
            let path = format!("params.{}", spec.name);
            return Err(plx_schema::SchemaError::missing_input(&spec.name, path).into());
        }
        Ok(spec.value.clone())
    };
    let mut init = Init {
        connection: spec.connection.clone(),
        ..Default::default()
    };
    match ty {
        IoType::Artifacts => init.artifacts = Some(serde_json::from_value(value()?)?),
        IoType::Git => init.git = Some(serde_json::from_value(value()?)?),
        IoType::File => init.file = Some(serde_json::from_value(value()?)?),
        IoType::Dockerfile => init.dockerfile = Some(serde_json::from_value(value()?)?),
        IoType::Tensorboard => init.tensorboard = Some(serde_json::from_value(value()?)?),
        IoType::Connection => {
            init.connection = spec.value.as_str().map(str::to_string).or(init.connection);
        }
        _ if init.connection.is_some() => {}
        other => {
            warn!(param = %spec.name, io_type = %other, "toInit ignored for a non-init type");
            return Ok(None);
        }
    }
    Ok(Some(init))
}

/// Apply `toEnv` and `toInit` params to the compiled run
pub fn apply_param_side_effects(compiled: &mut CompiledOperation, specs: &[ParamSpec]) -> Result<()> {
    let mut env = Vec::new();
    let mut inits = Vec::new();
    for spec in specs {
        if let Some(name) = &spec.to_env {
            env.push(EnvVar::new(name.clone(), spec.as_str()));
        }
        if spec.to_init {
            if let Some(init) = init_for(spec)? {
                inits.push(init);
            }
        }
    }

    let mut pods = compiled.run.pods_mut();
    for pod in pods.iter_mut() {
        if let Some(container) = pod.container.as_mut() {
            for var in &env {
                container.env.retain(|existing| existing.name != var.name);
                container.env.push(var.clone());
            }
        }
    }
    if let Some(main) = pods.first_mut() {
        main.init.extend(inits);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use plx_schema::IoSpec;

    fn spec(name: &str, io: Value, value: Value) -> ParamSpec {
        let io: IoSpec = serde_json::from_value(io).unwrap();
        ParamSpec {
            name: name.to_string(),
            value,
            to_init: io.to_init.unwrap_or(false),
            to_env: io.to_env.clone(),
            connection: io.connection.clone(),
            io: Some(io),
            is_output: false,
            context_only: false,
        }
    }

    #[test]
    fn context_exposes_params_three_ways() {
        let specs = vec![spec("lr", json!({"name": "lr", "type": "float"}), json!(0.1))];
        let ctx = build_context(&specs, &Globals::for_run("abc"), &BTreeMap::new(), &[]).unwrap();
        assert_eq!(ctx["lr"], json!(0.1));
        assert_eq!(ctx["params"]["lr"]["as_arg"], json!("--lr=0.1"));
        assert_eq!(ctx["inputs"]["lr"], json!(0.1));
        assert_eq!(ctx["globals"]["uuid"], json!("abc"));
    }

    #[test]
    fn reserved_names_stay_under_params() {
        let specs = vec![spec("globals", json!({"name": "globals"}), json!("x"))];
        let ctx = build_context(&specs, &Globals::default(), &BTreeMap::new(), &[]).unwrap();
        assert_eq!(ctx["params"]["globals"]["value"], json!("x"));
        assert!(ctx["globals"].is_object());
    }

    #[test]
    fn unknown_connection() {
        let err = check_connections(&["data".to_string()], &BTreeMap::new()).unwrap_err();
        assert!(matches!(err, CompileError::UnknownConnection { ref name, .. } if name == "data"));
    }

    #[test]
    fn to_env_and_to_init() {
        let run: Run = serde_json::from_value(json!({"kind": "job", "container": {"image": "busybox"}})).unwrap();
        let mut compiled = CompiledOperation::from_run(run);
        let specs = vec![
            spec("lr", json!({"name": "lr", "type": "float", "toEnv": "LR"}), json!(0.1)),
            spec(
                "repo",
                json!({"name": "repo", "type": "git", "toInit": true}),
                json!({"url": "https://github.com/acme/models.git"}),
            ),
        ];
        apply_param_side_effects(&mut compiled, &specs).unwrap();
        let pod = &compiled.run.replicas()[0].pod;
        let container = pod.container.as_ref().unwrap();
        assert_eq!(container.env[0].name, "LR");
        assert_eq!(container.env[0].value.as_deref(), Some("0.1"));
        assert_eq!(pod.init.len(), 1);
        assert!(pod.init[0].git.is_some());
    }

    #[test]
    fn replica_contexts_per_role() {
        let run: Run = serde_json::from_value(json!({
            "kind": "mpijob",
            "launcher": {"replicas": 1, "connections": ["data"]},
            "worker": {"replicas": 2, "init": [{"git": {"url": "https://x/y.git"}}]},
        }))
        .unwrap();
        let contexts = replica_contexts(&run).unwrap();
        assert_eq!(contexts["launcher"].connections, vec!["data"]);
        assert_eq!(contexts["worker"].replicas, Some(2));
        assert_eq!(contexts["worker"].init, vec!["git"]);
    }
}

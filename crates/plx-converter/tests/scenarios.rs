//! Compiling operations end to end and converting them for each backend

use std::collections::BTreeMap;

use plx_compiler::OperationCompiler;
use plx_converter::{volume_name, Backend, Converted, Converter, ConverterConfig, ConverterError, RunMeta};
use plx_schema::{CompiledOperation, Connection, Globals};
use serde_json::json;

const UUID: &str = "3f0c2a9be1d84a8f9d4c6e7a5b2c1d0e";

fn data_connection() -> Connection {
    serde_json::from_value(json!({
        "name": "data",
        "kind": "host_path",
        "schema": {"hostPath": "/data", "mountPath": "/data"},
    }))
    .unwrap()
}

async fn compile(content: &str, connections: &[Connection]) -> CompiledOperation {
    let operation = plx_schema::read_str(content).unwrap().into_operation().unwrap();
    let table: BTreeMap<String, Connection> = connections.iter().map(|c| (c.name.clone(), c.clone())).collect();
    OperationCompiler::new(operation)
        .with_connections(&table)
        .with_globals(Globals::for_run(UUID))
        .compile()
        .await
        .unwrap()
}

fn config(connections: &[Connection]) -> ConverterConfig {
    ConverterConfig::new(
        "plx",
        RunMeta {
            uuid: UUID.into(),
            ..Default::default()
        },
    )
    .with_connections(connections.iter().cloned())
}

fn k8s(compiled: &CompiledOperation, config: &ConverterConfig) -> serde_json::Value {
    Converter::new(compiled, config)
        .convert(Backend::K8s)
        .unwrap()
        .to_json()
        .unwrap()
}

const ECHO: &str = r#"
version: 1.1
kind: operation
component:
  run:
    kind: job
    container:
      image: busybox
      command: ["echo", "hi"]
"#;

#[tokio::test]
async fn plain_job_becomes_a_batch_job_without_sidecar() {
    let compiled = compile(ECHO, &[]).await;
    let value = k8s(&compiled, &config(&[]));

    assert_eq!(value["kind"], "Operation");
    assert_eq!(value["metadata"]["name"], format!("plx-operation-{}", UUID));
    assert_eq!(value["metadata"]["namespace"], "plx");
    let containers = value["spec"]["batchJob"]["template"]["spec"]["containers"]
        .as_array()
        .unwrap();
    assert_eq!(containers.len(), 1);
    assert_eq!(containers[0]["name"], "polyaxon-main-job");
    assert_eq!(containers[0]["image"], "busybox");
    assert_eq!(containers[0]["command"], json!(["echo", "hi"]));
}

#[tokio::test]
async fn mpi_job_keeps_roles_and_gang_scheduling() {
    let compiled = compile(
        r#"
version: 1.1
kind: operation
component:
  run:
    kind: mpijob
    slotsPerWorker: 2
    schedulingPolicy:
      minAvailable: 3
    launcher:
      replicas: 1
      container:
        image: horovod
        command: ["mpirun", "python", "train.py"]
    worker:
      replicas: 2
      container:
        image: horovod
"#,
        &[],
    )
    .await;
    let value = k8s(&compiled, &config(&[]));
    let mpi = &value["spec"]["mpiJob"];

    assert_eq!(mpi["replicaSpecs"]["launcher"]["replicas"], 1);
    assert_eq!(mpi["replicaSpecs"]["worker"]["replicas"], 2);
    assert_eq!(mpi["schedulingPolicy"]["minAvailable"], 3);
    assert_eq!(mpi["slotsPerWorker"], 2);
    let launcher = &mpi["replicaSpecs"]["launcher"]["template"]["spec"]["containers"][0];
    assert_eq!(launcher["name"], "polyaxon-main-job");
}

#[tokio::test]
async fn shared_connection_volume_is_declared_once() {
    let connections = [data_connection()];
    let compiled = compile(
        r#"
version: 1.1
kind: operation
component:
  run:
    kind: job
    init:
      - connection: data
      - connection: data
    container:
      image: trainer
"#,
        &connections,
    )
    .await;
    let value = k8s(&compiled, &config(&connections));
    let spec = &value["spec"]["batchJob"]["template"]["spec"];

    let expected = volume_name("/data");
    let volumes: Vec<_> = spec["volumes"]
        .as_array()
        .unwrap()
        .iter()
        .filter(|v| v["name"] == expected.as_str())
        .collect();
    assert_eq!(volumes.len(), 1);
    assert_eq!(volumes[0]["hostPath"]["path"], "/data");

    let inits = spec["initContainers"].as_array().unwrap();
    assert_eq!(inits.len(), 2);
    for init in inits {
        let mounted = init["volumeMounts"]
            .as_array()
            .unwrap()
            .iter()
            .any(|m| m["name"] == expected.as_str() && m["mountPath"] == "/data");
        assert!(mounted, "init container {} misses the data mount", init["name"]);
    }
}

#[tokio::test]
async fn conversion_is_byte_stable() {
    let connections = [data_connection()];
    let compiled = compile(
        r#"
version: 1.1
kind: operation
component:
  run:
    kind: pytorchjob
    master:
      replicas: 1
      connections: [data]
      container:
        image: torch
    worker:
      replicas: 4
      connections: [data]
      container:
        image: torch
"#,
        &connections,
    )
    .await;
    let config = config(&connections);
    let first = Converter::new(&compiled, &config).convert(Backend::K8s).unwrap().to_yaml().unwrap();
    let second = Converter::new(&compiled, &config).convert(Backend::K8s).unwrap().to_yaml().unwrap();
    assert_eq!(first, second);
}

#[tokio::test]
async fn docker_backend_rejects_distributed_runs() {
    let compiled = compile(
        r#"
version: 1.1
kind: operation
component:
  run:
    kind: tfjob
    worker:
      replicas: 2
      container:
        image: tf
"#,
        &[],
    )
    .await;
    let config = config(&[]);
    let err = Converter::new(&compiled, &config).convert(Backend::Docker).unwrap_err();
    assert!(matches!(err, ConverterError::UnsupportedRunKind { .. }));
}

#[tokio::test]
async fn docker_backend_runs_the_main_container() {
    let compiled = compile(ECHO, &[]).await;
    let config = config(&[]);
    let converted = Converter::new(&compiled, &config).convert(Backend::Docker).unwrap();
    let Converted::Docker(plan) = converted else {
        panic!("expected a docker plan");
    };
    let main = plan.steps.last().unwrap();
    assert_eq!(main.argv[..3], ["docker", "run", "--rm"]);
    assert!(main.argv.ends_with(&["busybox".to_string(), "hi".to_string()]));
}

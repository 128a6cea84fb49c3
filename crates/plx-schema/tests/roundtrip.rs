//! Reading the canonical form of a document yields the same typed document

use plx_schema::{read, read_str, Specification};
use serde_json::json;

fn assert_canonical(spec: &Specification) {
    let canonical = spec.to_value().unwrap();
    let again = read(canonical.clone()).unwrap();
    assert_eq!(&again, spec);
    assert_eq!(again.to_value().unwrap(), canonical);
}

#[test]
fn operation_with_matrix_and_snake_case_fields() {
    let spec = read_str(
        r#"
version: 1.1
kind: operation
name: sweep
params:
  epochs:
    value: 3
matrix:
  kind: random
  num_runs: 4
  seed: 7
  params:
    lr:
      kind: loguniform
      value: "0.0001:0.1"
    optimizer:
      kind: pchoice
      value: [[adam, 0.7], [sgd, 0.3]]
  early_stopping:
    - kind: failure_early_stopping
      percent: 30
component:
  inputs:
    - name: epochs
      type: int
    - name: lr
      type: float
    - name: optimizer
      type: str
  run:
    kind: job
    environment:
      node_selector:
        pool: gpu
    container:
      image: polyaxon/trainer:1.0
      args: ["--lr={{ lr }}", "--epochs={{ epochs }}"]
      resources:
        limits:
          nvidia.com/gpu: 1
"#,
    )
    .unwrap();
    let canonical = spec.to_value().unwrap();
    assert_eq!(canonical["matrix"]["numRuns"], json!(4));
    assert_eq!(canonical["matrix"]["earlyStopping"][0]["kind"], json!("failure_early_stopping"));
    assert_eq!(
        canonical["component"]["run"]["environment"]["nodeSelector"]["pool"],
        json!("gpu")
    );
    assert_canonical(&spec);
}

#[test]
fn distributed_runs() {
    for run in [
        json!({
            "kind": "tfjob",
            "clean_pod_policy": "running",
            "chief": {"replicas": 1, "container": {"image": "tf"}},
            "worker": {"replicas": "{{ workers }}", "container": {"image": "tf"}},
        }),
        json!({
            "kind": "rayjob",
            "entrypoint": "python main.py",
            "head": {"container": {"image": "ray"}},
            "workers": {
                "small": {"replicas": 2, "minReplicas": 1, "maxReplicas": 4, "container": {"image": "ray"}},
                "large": {"replicas": 1, "container": {"image": "ray"}},
            },
        }),
        json!({
            "kind": "mpijob",
            "slotsPerWorker": 1,
            "schedulingPolicy": {"minAvailable": 3},
            "launcher": {"replicas": 1, "container": {"image": "mpi"}},
            "worker": {"replicas": 2, "container": {"image": "mpi"}},
        }),
    ] {
        let spec = read(json!({"kind": "component", "run": run})).unwrap();
        assert_canonical(&spec);
    }
}

#[test]
fn compiled_operation() {
    let spec = read(json!({
        "kind": "compiled_operation",
        "run": {"kind": "service", "ports": [8888], "container": {"image": "jupyter"}},
        "params": {"port": 8888},
        "globals": {"uuid": "f3a2", "owner_name": "acme", "is_independent": true},
    }))
    .unwrap();
    assert_canonical(&spec);
}

#[test]
fn unsupported_version() {
    let err = read(json!({"version": 2.0, "kind": "component", "run": {"kind": "job"}})).unwrap_err();
    assert_eq!(err.kind(), "VersionError");
}

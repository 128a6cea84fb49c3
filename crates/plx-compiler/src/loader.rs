//! Multi-file document loading and patch merging

use std::path::{Path, PathBuf};

use plx_schema::{PatchStrategy, Specification};
use serde_json::Value;
use tracing::debug;

use crate::{CompileError, Result};

/// Read one YAML or JSON file into an untyped document
pub fn read_file(path: &Path) -> Result<Value> {
    let content = std::fs::read_to_string(path).map_err(|source| CompileError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    parse_document(&content)
}

/// Parse YAML or JSON text
pub fn parse_document(content: &str) -> Result<Value> {
    let doc: Value = serde_yaml::from_str(content)?;
    Ok(doc)
}

/// Read and deep-merge files in order; later files win
pub fn read_from(paths: &[PathBuf]) -> Result<Value> {
    read_from_with(paths, PatchStrategy::Replace)
}

/// Read and deep-merge files in order with an explicit strategy
pub fn read_from_with(paths: &[PathBuf], strategy: PatchStrategy) -> Result<Value> {
    let mut merged = Value::Null;
    for path in paths {
        debug!(path = %path.display(), strategy = %strategy, "merging document");
        let doc = read_file(path)?;
        accumulate(&mut merged, doc, strategy);
    }
    Ok(merged)
}

/// Read, merge and type a set of files
pub fn load(paths: &[PathBuf]) -> Result<Specification> {
    Ok(plx_schema::read(read_from(paths)?)?)
}

/// Merge `doc` into `acc`; the first document seeds an empty accumulator
pub fn accumulate(acc: &mut Value, doc: Value, strategy: PatchStrategy) {
    if acc.is_null() {
        *acc = doc;
    } else {
        merge(acc, doc, strategy);
    }
}

/// Merge `patch` into `base` in place.
///
/// Mappings always merge key by key. Null patch values never erase base
/// values, except under `isnull` where every non-mapping field the patch
/// names is set to null.
pub fn merge(base: &mut Value, patch: Value, strategy: PatchStrategy) {
    if strategy == PatchStrategy::Isnull {
        clear(base, patch);
        return;
    }
    if patch.is_null() {
        return;
    }
    if base.is_null() {
        *base = patch;
        return;
    }
    match (base, patch) {
        (Value::Object(base_map), Value::Object(patch_map)) => {
            for (key, patch_value) in patch_map {
                match base_map.get_mut(&key) {
                    Some(base_value) => merge(base_value, patch_value, strategy),
                    None if !patch_value.is_null() => {
                        base_map.insert(key, patch_value);
                    }
                    None => {}
                }
            }
        }
        (Value::Array(base_items), Value::Array(patch_items)) => match strategy {
            PatchStrategy::Replace | PatchStrategy::Isnull => *base_items = patch_items,
            PatchStrategy::PostMerge => base_items.extend(patch_items),
            PatchStrategy::PreMerge => {
                let mut items = patch_items;
                items.append(base_items);
                *base_items = items;
            }
        },
        (base, patch) => match strategy {
            PatchStrategy::Replace | PatchStrategy::PostMerge | PatchStrategy::Isnull => *base = patch,
            PatchStrategy::PreMerge => {}
        },
    }
}

fn clear(base: &mut Value, patch: Value) {
    match (base, patch) {
        (Value::Object(base_map), Value::Object(patch_map)) => {
            for (key, patch_value) in patch_map {
                if let Some(base_value) = base_map.get_mut(&key) {
                    clear(base_value, patch_value);
                }
            }
        }
        (base, _) => *base = Value::Null,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use serde_json::json;
    use std::io::Write;

    fn base() -> Value {
        json!({"image": "a", "args": ["x"], "env": {"A": "1"}, "workdir": null})
    }

    fn patch() -> Value {
        json!({"image": "b", "args": ["y"], "env": {"B": "2"}, "workdir": "/code"})
    }

    #[rstest]
    #[case::replace(PatchStrategy::Replace, json!({"image": "b", "args": ["y"], "env": {"A": "1", "B": "2"}, "workdir": "/code"}))]
    #[case::isnull_clears_named_fields(PatchStrategy::Isnull, json!({"image": null, "args": null, "env": {"A": "1"}, "workdir": null}))]
    #[case::post_merge(PatchStrategy::PostMerge, json!({"image": "b", "args": ["x", "y"], "env": {"A": "1", "B": "2"}, "workdir": "/code"}))]
    #[case::pre_merge(PatchStrategy::PreMerge, json!({"image": "a", "args": ["y", "x"], "env": {"A": "1", "B": "2"}, "workdir": "/code"}))]
    fn merge_strategies(#[case] strategy: PatchStrategy, #[case] expected: Value) {
        let mut doc = base();
        merge(&mut doc, patch(), strategy);
        assert_eq!(doc, expected);
    }

    #[test]
    fn null_patch_values_do_not_erase() {
        let mut doc = json!({"image": "a"});
        merge(&mut doc, json!({"image": null}), PatchStrategy::Replace);
        assert_eq!(doc, json!({"image": "a"}));
    }

    #[test]
    fn isnull_clears_nested_fields_and_keeps_the_rest() {
        let mut doc = json!({"container": {"image": "a", "args": ["x"], "command": ["sh"]}, "kind": "job"});
        merge(
            &mut doc,
            json!({"container": {"args": null, "image": "ignored"}, "missing": 1}),
            PatchStrategy::Isnull,
        );
        assert_eq!(
            doc,
            json!({"container": {"image": null, "args": null, "command": ["sh"]}, "kind": "job"})
        );
    }

    #[test]
    fn first_document_seeds_even_under_isnull() {
        let mut acc = Value::Null;
        accumulate(&mut acc, json!({"image": "a", "args": ["x"]}), PatchStrategy::Isnull);
        accumulate(&mut acc, json!({"args": ["y"]}), PatchStrategy::Isnull);
        assert_eq!(acc, json!({"image": "a", "args": null}));
    }

    #[test]
    fn files_merge_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let first = dir.path().join("polyaxonfile.yaml");
        let second = dir.path().join("override.json");
        let mut f = std::fs::File::create(&first).unwrap();
        writeln!(f, "kind: component\nrun:\n  kind: job\n  container:\n    image: busybox").unwrap();
        std::fs::write(&second, r#"{"run": {"container": {"image": "alpine"}}}"#).unwrap();

        let merged = read_from(&[first.clone(), second]).unwrap();
        assert_eq!(merged["run"]["container"]["image"], json!("alpine"));
        assert_eq!(merged["run"]["kind"], json!("job"));

        let spec = load(&[first]).unwrap();
        assert_eq!(spec.kind(), plx_schema::SpecKind::Component);
    }

    #[test]
    fn missing_file_is_io_error() {
        let err = read_file(Path::new("/nonexistent/polyaxonfile.yaml")).unwrap_err();
        assert!(matches!(err, CompileError::Io { .. }));
    }
}

//! Storage class list loading from YAML and JSON.

use std::fs;

use bootvol::class::{ClassError, ClassRegistry, Quantity};

const YAML: &str = r#"
classes:
  - name: fast
    description: NVMe-backed
    capabilities:
      iops: 16000
      throughput: 1Gi
  - name: bulk
    capabilities:
      throughput: 125M
"#;

#[test]
fn yaml_list_under_classes_key() {
    let registry = ClassRegistry::load(YAML).unwrap();
    assert_eq!(registry.len(), 2);

    let fast = registry.get("fast").unwrap();
    assert_eq!(fast.description.as_deref(), Some("NVMe-backed"));
    assert_eq!(fast.capability("iops"), Some(Quantity::new(16_000)));
    assert_eq!(fast.capability("throughput"), Some(Quantity::new(1 << 30)));

    let bulk = registry.get("bulk").unwrap();
    assert_eq!(bulk.capability("throughput").map(Quantity::value), Some(125_000_000));
    assert!(bulk.description.is_none());
}

#[test]
fn bare_json_list() {
    let registry = ClassRegistry::load(
        r#"  [{"name": "fast", "capabilities": {"iops": 3000, "throughput": "250Mi"}},
             {"name": "archive"}]"#,
    )
    .unwrap();

    let mut names: Vec<_> = registry.list().map(|c| c.name.as_str()).collect();
    names.sort_unstable();
    assert_eq!(names, ["archive", "fast"]);
    assert_eq!(
        registry.get("fast").and_then(|c| c.capability("throughput")),
        Some(Quantity::new(250 << 20))
    );
    assert!(registry.get("archive").unwrap().capabilities.is_empty());
}

#[test]
fn wrapped_json_and_bare_yaml_agree() {
    let json = ClassRegistry::load(r#"{"classes": [{"name": "a"}, {"name": "b"}]}"#).unwrap();
    let yaml = ClassRegistry::load("- name: a\n- name: b\n").unwrap();
    for name in ["a", "b"] {
        assert_eq!(json.get(name), yaml.get(name));
    }
}

#[test]
fn duplicate_names_reject_the_whole_list() {
    let err = ClassRegistry::load("- name: fast\n- name: bulk\n- name: fast\n").unwrap_err();
    match err {
        ClassError::Duplicate { names } => assert_eq!(names, vec!["fast"]),
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn absent_class_is_none() {
    let registry = ClassRegistry::load(YAML).unwrap();
    assert!(registry.get("nonexistent").is_none());
}

#[test]
fn bad_quantity_is_a_parse_error() {
    let err = ClassRegistry::load("- name: odd\n  capabilities:\n    iops: 12X\n").unwrap_err();
    assert!(matches!(err, ClassError::Yaml(_)), "{err}");

    let err = ClassRegistry::load(r#"[{"name": "odd", "capabilities": {"iops": "lots"}}]"#)
        .unwrap_err();
    assert!(matches!(err, ClassError::Json(_)), "{err}");
}

#[test]
fn load_file_reports_the_path() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("classes.yaml");
    fs::write(&path, YAML).unwrap();
    assert_eq!(ClassRegistry::load_file(&path).unwrap().len(), 2);

    let missing = dir.path().join("missing.yaml");
    let err = ClassRegistry::load_file(&missing).unwrap_err();
    assert!(matches!(err, ClassError::Read { .. }));
    assert!(err.to_string().contains("missing.yaml"));
}

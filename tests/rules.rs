//! Rule configuration loading through the memoization layer.

use promptloom::cache::CacheLayer;
use promptloom::rules::{RuleConfigStore, RuleRecord, RuleStoreError};
use serde_json::json;
use std::sync::Arc;

fn write_category(dir: &tempfile::TempDir, category: &str, value: serde_json::Value) {
    std::fs::write(
        dir.path().join(format!("{category}.json")),
        serde_json::to_vec_pretty(&value).unwrap(),
    )
    .unwrap();
}

#[tokio::test]
async fn loads_and_parses_a_category_file() {
    let dir = tempfile::tempdir().unwrap();
    write_category(
        &dir,
        "ESS",
        json!([
            {"id": "ess-1", "title": "Genus", "body": "Name the nearest kind."},
            {"id": "ess-2", "title": "Differentia", "body": "State what sets it apart."},
        ]),
    );

    let store = RuleConfigStore::new(dir.path(), Arc::new(CacheLayer::new(None)));
    let rules = store.rules("ESS").await.unwrap();

    assert_eq!(rules.len(), 2);
    assert_eq!(
        rules[0],
        RuleRecord {
            id: "ess-1".to_string(),
            title: "Genus".to_string(),
            body: "Name the nearest kind.".to_string(),
        }
    );
}

#[tokio::test]
async fn file_is_read_once_per_category() {
    let dir = tempfile::tempdir().unwrap();
    write_category(&dir, "STYLE", json!([{"id": "s-1", "title": "Tone", "body": "Plain."}]));

    let store = RuleConfigStore::new(dir.path(), Arc::new(CacheLayer::new(None)));
    let first = store.rules("STYLE").await.unwrap();

    // Deleting the file proves later reads are served from memory.
    std::fs::remove_file(dir.path().join("STYLE.json")).unwrap();
    let second = store.rules("STYLE").await.unwrap();

    assert_eq!(first, second);
}

#[tokio::test]
async fn missing_category_fails_without_poisoning_the_key() {
    let dir = tempfile::tempdir().unwrap();
    let store = RuleConfigStore::new(dir.path(), Arc::new(CacheLayer::new(None)));

    let err = store.rules("ABSENT").await.unwrap_err();
    assert!(matches!(err, RuleStoreError::Cache(_)));

    // The failed read was not memoized; creating the file heals the category.
    write_category(&dir, "ABSENT", json!([{"id": "a-1", "title": "T", "body": "B."}]));
    let rules = store.rules("ABSENT").await.unwrap();
    assert_eq!(rules.len(), 1);
}

#[tokio::test]
async fn wrong_shape_is_reported_as_malformed() {
    let dir = tempfile::tempdir().unwrap();
    write_category(&dir, "ODD", json!({"not": "a rule list"}));

    let store = RuleConfigStore::new(dir.path(), Arc::new(CacheLayer::new(None)));
    let err = store.rules("ODD").await.unwrap_err();
    assert!(matches!(err, RuleStoreError::Malformed { .. }));
}

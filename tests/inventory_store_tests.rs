//! Inventory Store Tests
//!
//! End-to-end reads and writes against a flake directory on disk: repo
//! config, JSON overlay file and an evaluator that sees the overlay the way
//! the module system does.

use std::fs;
use std::path::{Path as FsPath, PathBuf};

use serde_json::{json, Map, Value};
use tempfile::TempDir;

use clan_persist::config::repo_config_path;
use clan_persist::flake::{EvalError, Evaluator, Flake, JsonEvaluator};
use clan_persist::persist::{merge_objects, PersistError};
use clan_persist::store::{CommitHook, StoreError};
use clan_persist::{EffectiveConfig, InventoryStore, JsonFileStore, OverlayStore, Path, Selector, Settings};

/// Evaluates declarative values merged with whatever the overlay file holds
/// at the time of the call.
struct OverlayEvaluator {
    introspection: Value,
    declarative: Map<String, Value>,
    overlay: PathBuf,
}

impl OverlayEvaluator {
    fn overlay(&self) -> Map<String, Value> {
        match fs::read_to_string(&self.overlay) {
            Ok(text) => serde_json::from_str(&text).unwrap(),
            Err(_) => Map::new(),
        }
    }

    fn document(&self) -> JsonEvaluator {
        let all_values = merge_objects(&self.declarative, &self.overlay(), true).unwrap();
        JsonEvaluator::new(json!({
            "clanInternals": {
                "inventoryClass": {
                    "introspection": self.introspection,
                    "allValues": all_values
                }
            }
        }))
    }
}

impl Evaluator for OverlayEvaluator {
    fn evaluate(&self, selectors: &[Selector]) -> Result<Vec<Value>, EvalError> {
        self.document().evaluate(selectors)
    }

    fn revision(&self) -> Result<Option<String>, EvalError> {
        self.document().revision()
    }
}

/// Records commit messages in a file next to the overlay.
struct LogHook;

impl CommitHook for LogHook {
    fn commit(&self, file: &FsPath, message: &str) -> Result<(), StoreError> {
        let log = file.with_extension("log");
        let mut text = fs::read_to_string(&log).unwrap_or_default();
        text.push_str(message);
        text.push('\n');
        fs::write(&log, text).map_err(|source| StoreError::Io { path: log, source })
    }
}

fn obj(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        other => panic!("expected an object, got {}", other),
    }
}

fn settings(flake_dir: &FsPath) -> Settings {
    EffectiveConfig::build(None, Some(&repo_config_path(flake_dir)), None)
        .unwrap()
        .settings()
        .unwrap()
}

fn open(flake_dir: &FsPath) -> InventoryStore<OverlayEvaluator, JsonFileStore> {
    let settings = settings(flake_dir);
    let overlay = settings.inventory_path(flake_dir);
    let evaluator = OverlayEvaluator {
        introspection: json!({
            "machines": {
                "__prio": 100,
                "jon": {
                    "__prio": 100,
                    "tags": {"__prio": 100},
                    "deploy": {"__prio": 100, "targetHost": {"__prio": 1500}}
                }
            },
            "meta": {"__prio": 100, "name": {"__prio": 50}}
        }),
        declarative: obj(json!({
            "machines": {"jon": {"tags": ["all"], "deploy": {"targetHost": null}}},
            "meta": {"name": "fleet"}
        })),
        overlay: overlay.clone(),
    };

    let mut flake = Flake::new("fleet", evaluator, &settings.store_dir);
    flake.refresh().unwrap();
    let file = JsonFileStore::new(overlay).with_commit_hook(LogHook);
    InventoryStore::new(flake, file).with_settings(&settings)
}

// =============================================================================
// Configuration
// =============================================================================

#[test]
fn test_repo_config_renames_overlay() {
    let dir = TempDir::new().unwrap();
    fs::create_dir_all(dir.path().join(".clan")).unwrap();
    fs::write(
        repo_config_path(dir.path()),
        "inventory_file = \"fleet.json\"\n\n[cache]\nenabled = false\n",
    )
    .unwrap();

    let store = open(dir.path());
    assert_eq!(store.inventory_file(), "fleet.json");
    assert_eq!(store.store().path(), dir.path().join("fleet.json"));
    assert_eq!(settings(dir.path()).cache_dir().unwrap(), None);
}

// =============================================================================
// Writes
// =============================================================================

#[test]
fn test_write_then_read_back() {
    let dir = TempDir::new().unwrap();
    let mut store = open(dir.path());

    let update = store
        .merged_update(&obj(json!({
            "machines": {"jon": {"tags": ["web"], "deploy": {"targetHost": "root@jon"}}}
        })))
        .unwrap();
    let plan = store.write(&update, "configure jon").unwrap();
    assert_eq!(plan.patches.len(), 2);

    let on_disk: Value =
        serde_json::from_str(&fs::read_to_string(dir.path().join("inventory.json")).unwrap()).unwrap();
    assert_eq!(
        on_disk,
        json!({"machines": {"jon": {"tags": ["web"], "deploy": {"targetHost": "root@jon"}}}})
    );

    // The cache was refreshed, so the read sees the new overlay
    let values = store.read().unwrap();
    assert_eq!(values["machines"]["jon"]["tags"], json!(["all", "web"]));
    assert_eq!(values["machines"]["jon"]["deploy"]["targetHost"], json!("root@jon"));

    let again = store.plan(&update).unwrap();
    assert!(again.is_empty(), "{:?}", again);

    let log = fs::read_to_string(dir.path().join("inventory.log")).unwrap();
    assert_eq!(log, "update(inventory.json): configure jon\n");
}

#[test]
fn test_rejected_write_leaves_no_file() {
    let dir = TempDir::new().unwrap();
    let mut store = open(dir.path());

    let update = store
        .merged_update(&obj(json!({"meta": {"name": "renamed"}})))
        .unwrap();
    let err = store.write(&update, "rename").unwrap_err();

    match err {
        StoreError::Persist(PersistError::NotWriteable { path }) => {
            assert_eq!(path, Path::from(["meta", "name"]));
        }
        other => panic!("expected NotWriteable, got {:?}", other),
    }
    assert!(!dir.path().join("inventory.json").exists());
    assert!(!dir.path().join("inventory.log").exists());
}

#[test]
fn test_delete_from_overlay() {
    let dir = TempDir::new().unwrap();
    fs::write(
        dir.path().join("inventory.json"),
        r#"{"machines": {"jon": {"tags": ["web"]}}, "meta": {"description": "x"}}"#,
    )
    .unwrap();
    let mut store = open(dir.path());

    let removed = store
        .delete(&[Path::from(["meta", "description"])], "drop description")
        .unwrap();
    assert_eq!(removed, vec![Path::from(["meta", "description"])]);

    assert_eq!(
        store.store().read().unwrap(),
        obj(json!({"machines": {"jon": {"tags": ["web"]}}, "meta": {}}))
    );
    assert_eq!(store.read().unwrap()["machines"]["jon"]["tags"], json!(["all", "web"]));
}

#[test]
fn test_writeability_reflects_overlay() {
    let dir = TempDir::new().unwrap();
    let mut store = open(dir.path());

    let attributes = store.get_writeability().unwrap();
    assert!(attributes.is_writeable(&Path::from(["machines", "jon", "tags"])).unwrap());
    assert!(attributes
        .is_writeable(&Path::from(["machines", "jon", "deploy", "targetHost"]))
        .unwrap());
    assert!(!attributes.is_writeable(&Path::from(["meta", "name"])).unwrap());
}

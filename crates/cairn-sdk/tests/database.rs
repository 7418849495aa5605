//! End-to-end tests over on-disk databases.

use cairn_sdk::{
    Database, DatabaseConfig, Document, DocumentId, FindOptions, SdkError, Store, Strategy,
    ViewDefinition, ViewValue, ALL_SLOTS_VIEW,
};
use serde_json::{json, Value};

fn by_score(doc: &Document) -> Vec<(Value, ViewValue)> {
    doc.get("score")
        .map(|score| vec![(score.clone(), ViewValue::Document(doc.clone()))])
        .unwrap_or_default()
}

fn scores(rows: &[cairn_sdk::ViewRow]) -> Vec<Value> {
    rows.iter()
        .map(|row| row.value.as_document().unwrap().get("score").unwrap().clone())
        .collect()
}

fn small_chunks(root: &std::path::Path) -> DatabaseConfig {
    DatabaseConfig {
        chunk_capacity: 4,
        volume_size: 1024,
        ..DatabaseConfig::file(root)
    }
}

// ---------------------------------------------------------------------------
// Persistence
// ---------------------------------------------------------------------------

#[test]
fn documents_and_views_survive_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let mut ids = Vec::new();
    {
        let db = Database::open(small_chunks(dir.path())).unwrap();
        db.register_view(ViewDefinition::named("scores"), by_score)
            .unwrap();
        for score in 0..20 {
            let saved = db
                .save(&mut Document::from_slots([("score", json!(score))]))
                .unwrap();
            ids.push(saved.id());
        }
        db.flush().unwrap();
    }

    let db = Database::open(small_chunks(dir.path())).unwrap();
    let view = db
        .register_view(ViewDefinition::named("scores"), by_score)
        .unwrap();
    assert_eq!(view.index().len(), 20);
    for id in &ids {
        assert!(db.get(id, None).unwrap().is_some());
    }

    let rows = db
        .find_view(
            "scores",
            &FindOptions::new().start_key(json!(2)).end_key(json!(4)),
        )
        .unwrap();
    assert_eq!(scores(&rows), vec![json!(2), json!(3), json!(4)]);
}

#[test]
fn history_spans_chunk_splits() {
    let dir = tempfile::tempdir().unwrap();
    let db = Database::open(small_chunks(dir.path())).unwrap();

    let mut tracked = Document::from_slots([("score", json!(0))]);
    db.save(&mut tracked).unwrap();
    for n in 1..=5 {
        tracked.set("score", n);
        db.save(&mut tracked).unwrap();
        for _ in 0..3 {
            db.save(&mut Document::from_slots([("filler", json!(n))]))
                .unwrap();
        }
    }

    assert_eq!(db.history(&tracked.id()).unwrap().len(), 6);
    assert_eq!(db.verify(&tracked.id()).unwrap(), 6);
}

// ---------------------------------------------------------------------------
// Crash recovery
// ---------------------------------------------------------------------------

#[test]
fn saves_missed_by_views_are_replayed_on_open() {
    let dir = tempfile::tempdir().unwrap();
    let config = DatabaseConfig::file(dir.path());
    let missed = {
        let db = Database::open(config.clone()).unwrap();
        db.save(&mut Document::from_slots([("score", json!(1))]))
            .unwrap();
        // Straight to the store, as if the process died before the views ran.
        let mut doc = Document::from_slots([("score", json!(2))]);
        doc.save(db.store()).unwrap()
    };

    let db = Database::open(config).unwrap();
    let rows = db
        .find_view(ALL_SLOTS_VIEW, &FindOptions::new().key(json!(["score", 2])))
        .unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].value.as_document(), Some(&missed));
}

#[test]
fn versions_view_replays_every_missed_version() {
    let dir = tempfile::tempdir().unwrap();
    let config = DatabaseConfig::file(dir.path());
    let definition = ViewDefinition::named("all").strategy(Strategy::Versions);
    {
        let db = Database::open(config.clone()).unwrap();
        let mut doc = Document::from_slots([("score", json!(1))]);
        doc.save(db.store()).unwrap();
        doc.set("score", 2);
        doc.save(db.store()).unwrap();
    }

    let db = Database::open(config).unwrap();
    db.register_view(definition, by_score).unwrap();
    let rows = db.find_view("all", &FindOptions::new()).unwrap();
    assert_eq!(scores(&rows), vec![json!(1), json!(2)]);
}

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

#[test]
fn unknown_types_fail_at_open() {
    let cases = [
        ("storage = \"tape\"", "storage"),
        ("store = \"btree\"", "store"),
        ("index = \"lsm\"", "index"),
    ];
    for (toml, kind) in cases {
        let config = DatabaseConfig::from_toml_str(toml).unwrap();
        let err = Database::open(config).unwrap_err();
        let matched = match kind {
            "storage" => matches!(err, SdkError::UnknownStorageType(_)),
            "store" => matches!(err, SdkError::UnknownStoreType(_)),
            _ => matches!(err, SdkError::UnknownIndexType(_)),
        };
        assert!(matched, "{kind}: {err}");
    }
}

#[test]
fn memory_store_with_file_views() {
    let dir = tempfile::tempdir().unwrap();
    let config = DatabaseConfig {
        index: "file".into(),
        root: dir.path().to_path_buf(),
        ..DatabaseConfig::memory()
    };
    let db = Database::open(config).unwrap();
    db.save(&mut Document::from_slots([("tags", json!(["a", "b"]))]))
        .unwrap();
    assert!(dir.path().join("views").join(ALL_SLOTS_VIEW).is_dir());
    assert!(!dir.path().join("store").exists());
    assert_eq!(db.find_slots(&FindOptions::new()).unwrap().len(), 2);
}

#[test]
fn missing_documents() {
    let db = Database::memory().unwrap();
    let id = DocumentId::random();
    assert!(!db.store().exists(&id).unwrap());
    assert!(matches!(db.history(&id), Err(SdkError::DocumentNotFound(_))));
}

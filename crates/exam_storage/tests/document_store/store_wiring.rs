#![forbid(unsafe_code)]

use std::fs;
use std::path::PathBuf;
use std::time::{SystemTime, UNIX_EPOCH};

use exam_kernel_contracts::document::{Document, EditorContent};
use exam_storage::document_store::{
    DocumentStore, FileDocumentStore, InMemoryDocumentStore, DOCUMENT_CONTENT_KEY,
    DOCUMENT_TITLE_KEY,
};
use exam_storage::repo::DocumentRepo;

fn essay() -> Document {
    Document::v1(
        "मराठी निबंध".to_string(),
        EditorContent::v1(
            "<p>पहिली ओळ</p><p>second</p>".to_string(),
            "पहिली ओळ\nsecond".to_string(),
        )
        .unwrap(),
    )
    .unwrap()
}

fn temp_store_path(name: &str) -> (PathBuf, PathBuf) {
    let suffix = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or(1);
    let base = std::env::temp_dir().join(format!("exam-store-wiring-{name}-{suffix}"));
    let path = base.join("documents.json");
    (base, path)
}

#[test]
fn at_store_db_01_in_memory_save_then_load_round_trips() {
    let mut store = InMemoryDocumentStore::new();
    assert!(store.load_document_row().unwrap().is_none());

    let doc = essay();
    store.save_document_row(&doc).unwrap();
    let saved = store.load_document_row().unwrap().unwrap();
    assert_eq!(saved.title.as_deref(), Some(doc.title.as_str()));
    assert_eq!(saved.body, doc.body);
}

#[test]
fn at_store_db_02_file_store_save_then_load_round_trips() {
    let (base, path) = temp_store_path("roundtrip");
    let doc = essay();
    {
        let mut store = FileDocumentStore::for_path(path.clone());
        store.save_document_row(&doc).unwrap();
    }
    let store = FileDocumentStore::for_path(path.clone());
    let saved = store.load_document_row().unwrap().unwrap();
    assert_eq!(saved.title, Some(doc.title.clone()));
    assert_eq!(saved.body, doc.body);

    let raw = fs::read_to_string(path).unwrap();
    assert!(raw.contains(DOCUMENT_CONTENT_KEY));
    assert!(raw.contains(DOCUMENT_TITLE_KEY));
    fs::remove_dir_all(base).unwrap();
}

#[test]
fn at_store_db_03_second_save_overwrites_first() {
    let mut store: Box<dyn DocumentStore + Send> = Box::new(InMemoryDocumentStore::new());
    store.save_document_row(&essay()).unwrap();
    let draft = Document::v1(
        "Draft".to_string(),
        EditorContent::v1("<p>draft</p>".to_string(), "draft".to_string()).unwrap(),
    )
    .unwrap();
    store.save_document_row(&draft).unwrap();
    let saved = store.load_document_row().unwrap().unwrap();
    assert_eq!(saved.title.as_deref(), Some("Draft"));
    assert_eq!(saved.body.plain_text, "draft");

    store.save_document_row(&Document::untitled()).unwrap();
    assert!(store.load_document_row().unwrap().is_none());
}

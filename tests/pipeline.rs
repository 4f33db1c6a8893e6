use std::path::{Path, PathBuf};

use docsift::{
    ConfigDb,
    DataDir,
    Engine,
    answer::AnswerMode,
    pipeline::DocumentStatus,
    search::SearchRequest,
    toc::IndexMethod,
};
use serde_json::json;

fn line(text: &str, size: f32, page: u32) -> serde_json::Value {
    json!({ "text": text, "font_size": size, "page": page })
}

/// A three-chapter manual whose last chapter heading is set in body font.
/// Only the printed contents page knows it is a chapter.
fn write_manual(dir: &Path) -> PathBuf {
    let layout = json!({
        "lines": [
            line("Contents", 10.0, 1),
            line("Chapter 1 Installing ........ 2", 10.0, 1),
            line("Chapter 2 Protection Groups ........ 3", 10.0, 1),
            line("Chapter 3 Recovery Plans ........ 4", 10.0, 1),
            line("Installing", 18.0, 2),
            line("Install the server on a supported Windows host.", 10.0, 2),
            line("The installer checks the database connection first.", 10.0, 2),
            line("Restart the host when the installer finishes.", 10.0, 2),
            line("Protection Groups", 18.0, 3),
            line("A protection group collects virtual machines.", 10.0, 3),
            line("Groups replicate together to the recovery site.", 10.0, 3),
            line("Each machine belongs to one group at a time.", 10.0, 3),
            line("Recovery Plans", 10.0, 4),
            line("A recovery plan orders the recovery of protection groups.", 10.0, 4),
            line("Plans can run as tests without touching production.", 10.0, 4),
        ]
    });
    std::fs::create_dir_all(dir).unwrap();
    let path = dir.join("manual.json");
    std::fs::write(&path, serde_json::to_string_pretty(&layout).unwrap()).unwrap();
    path
}

fn open_engine(root: &Path) -> Engine {
    let data_dir = DataDir::resolve(Some(&root.join("data"))).unwrap();
    let config_db = ConfigDb::open(&data_dir.config_db()).unwrap();
    config_db.set_setting("embedder", "hashing").unwrap();
    drop(config_db);
    Engine::open(data_dir, None).unwrap()
}

#[test]
fn index_recovers_sections_missing_from_font_structure() {
    let tmp = tempfile::tempdir().unwrap();
    let engine = open_engine(tmp.path());
    let docs = tmp.path().join("docs");
    write_manual(&docs);

    let report = engine.index_documents(&docs, false).unwrap();
    assert_eq!(report.indexed(), 1);

    let doc = engine.document("manual.json").unwrap();
    let structure = doc.report.as_ref().expect("structure report");
    assert_eq!(structure.index_method, IndexMethod::TableOfContents);
    assert_eq!(structure.missing_sections.len(), 1);
    assert_eq!(structure.recovered_chunks, 1);

    let recovered = doc
        .chunks
        .iter()
        .find(|c| c.extraction_method() == "index_recovery")
        .expect("recovered chunk");
    assert_eq!(recovered.title, "Recovery Plans");
    assert_eq!(recovered.page_start, 4);

    let full = engine.full_content(&doc, recovered);
    assert!(full.contains("without touching production"));

    for (i, chunk) in doc.chunks.iter().enumerate() {
        assert_eq!(chunk.ordinal, i);
    }
}

#[test]
fn recovered_section_is_searchable_by_title() {
    let tmp = tempfile::tempdir().unwrap();
    let engine = open_engine(tmp.path());
    let docs = tmp.path().join("docs");
    write_manual(&docs);
    engine.index_documents(&docs, false).unwrap();

    let outcome = engine.search(&SearchRequest::new("Recovery Plans", 5));
    assert!(outcome.short_circuited);
    assert!(
        outcome
            .results
            .iter()
            .any(|r| r.chunk.title == "Recovery Plans")
    );

    let answer = engine.answer("recovery plans", None);
    assert_eq!(answer.mode, AnswerMode::Verbatim);
    assert!(answer.text.contains("orders the recovery"));

    let lexical = engine.search(
        &SearchRequest::new("virtual machines replicate together", 3).lexical_only(),
    );
    assert_eq!(lexical.results[0].chunk.title, "Protection Groups");
}

#[test]
fn reindexing_skips_unchanged_and_replaces_changed_documents() {
    let tmp = tempfile::tempdir().unwrap();
    let engine = open_engine(tmp.path());
    let docs = tmp.path().join("docs");
    write_manual(&docs);

    engine.index_documents(&docs, false).unwrap();
    let chunks = engine.status().unwrap().chunks;

    let again = engine.index_documents(&docs, false).unwrap();
    assert_eq!(again.up_to_date(), 1);
    assert_eq!(engine.status().unwrap().chunks, chunks);

    std::fs::write(
        docs.join("manual.json"),
        json!({ "markdown_text": "# Overview\n\nThis section covers licensing terms for the replication appliance." })
            .to_string(),
    )
    .unwrap();
    let changed = engine.index_documents(&docs, false).unwrap();
    assert!(matches!(
        changed.documents[0].status,
        DocumentStatus::Indexed { .. }
    ));

    let doc = engine.document("manual.json").unwrap();
    assert_eq!(doc.chunks.len(), 1);
    assert_eq!(doc.chunks[0].title, "Overview");
    assert!(!engine.search(&SearchRequest::new("Recovery Plans", 5)).short_circuited);
}

#[test]
fn catalog_survives_reopen() {
    let tmp = tempfile::tempdir().unwrap();
    let docs = tmp.path().join("docs");
    write_manual(&docs);
    {
        let engine = open_engine(tmp.path());
        engine.index_documents(&docs, false).unwrap();
    }

    let engine = open_engine(tmp.path());
    let status = engine.status().unwrap();
    assert_eq!(status.documents, 1);
    assert_eq!(status.documents_with_vectors, 1);
    assert_eq!(
        engine.title_suggestions("prot", 5),
        vec!["Protection Groups"]
    );
}

use bright::models::IndexConfig;
use bright::store::IndexStore;
use serde_json::json;
use tempfile::TempDir;

fn doc(pairs: &[(&str, serde_json::Value)]) -> bright::models::Document {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.clone()))
        .collect()
}

#[test]
fn test_create_index_and_search_round_trip() -> Result<(), Box<dyn std::error::Error>> {
    let dir = TempDir::new()?;
    let store = IndexStore::open(dir.path())?;

    store.create_index(IndexConfig::new("books", "isbn"))?;
    store.add_documents(
        "books",
        &[doc(&[
            ("isbn", json!("9780131103627")),
            ("title", json!("The C Programming Language")),
        ])],
    )?;

    let results = store.search("books", "C Programming", 10, 0, &[])?;
    assert!(results.total >= 1);
    assert_eq!(results.hits[0].document["isbn"], "9780131103627");

    Ok(())
}

#[test]
fn test_add_documents_is_upsert() -> Result<(), Box<dyn std::error::Error>> {
    let dir = TempDir::new()?;
    let store = IndexStore::open(dir.path())?;
    store.create_index(IndexConfig::new("books", "isbn"))?;

    let documents = vec![
        doc(&[("isbn", json!("1")), ("title", json!("first"))]),
        doc(&[("isbn", json!("2")), ("title", json!("second"))]),
    ];

    store.add_documents("books", &documents)?;
    store.add_documents("books", &documents)?;

    assert_eq!(store.doc_count("books")?, 2);
    Ok(())
}

#[test]
fn test_update_document_shallow_merge() -> Result<(), Box<dyn std::error::Error>> {
    let dir = TempDir::new()?;
    let store = IndexStore::open(dir.path())?;
    store.create_index(IndexConfig::new("books", "isbn"))?;

    store.add_documents(
        "books",
        &[doc(&[
            ("isbn", json!("9780131103627")),
            ("title", json!("The C Programming Language")),
            ("year", json!(1978)),
        ])],
    )?;

    let merged = store.update_document(
        "books",
        "9780131103627",
        &doc(&[("title", json!("K&R"))]),
    )?;
    assert_eq!(merged["title"], "K&R");
    assert_eq!(merged["year"], 1978);

    let fetched = store.get_document("books", "9780131103627")?.unwrap();
    assert_eq!(fetched["title"], "K&R");
    Ok(())
}

#[test]
fn test_update_missing_document_fails() -> Result<(), Box<dyn std::error::Error>> {
    let dir = TempDir::new()?;
    let store = IndexStore::open(dir.path())?;
    store.create_index(IndexConfig::new("books", "isbn"))?;

    let err = store
        .update_document("books", "missing", &doc(&[("a", json!(1))]))
        .unwrap_err();
    assert!(matches!(err, bright::BrightError::DocumentNotFound(_)));
    Ok(())
}

#[test]
fn test_delete_documents_by_filter_paginates() -> Result<(), Box<dyn std::error::Error>> {
    let dir = TempDir::new()?;
    let store = IndexStore::open(dir.path())?;
    store.create_index(IndexConfig::new("books", "isbn"))?;

    let mut documents = Vec::new();
    for i in 0..50 {
        documents.push(doc(&[
            ("isbn", json!(format!("isbn-{}", i))),
            (
                "category",
                json!(if i % 2 == 0 { "keep" } else { "drop" }),
            ),
        ]));
    }
    store.add_documents("books", &documents)?;

    let deleted = store.delete_documents("books", "category:drop", &[])?;
    assert_eq!(deleted, 25);
    assert_eq!(store.doc_count("books")?, 25);
    Ok(())
}

#[test]
fn test_create_then_delete_restores_prior_state() -> Result<(), Box<dyn std::error::Error>> {
    let dir = TempDir::new()?;
    let store = IndexStore::open(dir.path())?;

    let before = store.get_all_configs();
    store.create_index(IndexConfig::new("ephemeral", "id"))?;
    store.add_documents("ephemeral", &[doc(&[("id", json!("1"))])])?;
    store.delete_index("ephemeral")?;

    assert_eq!(store.get_all_configs(), before);
    assert!(!dir.path().join("ephemeral").exists());
    Ok(())
}

#[test]
fn test_recovery_recreates_missing_index_directory() -> Result<(), Box<dyn std::error::Error>> {
    let dir = TempDir::new()?;
    {
        let store = IndexStore::open(dir.path())?;
        store.create_index(IndexConfig::new("books", "isbn"))?;
        store.add_documents("books", &[doc(&[("isbn", json!("1"))])])?;
    }

    // Simulate losing the engine directory but keeping configs.json
    std::fs::remove_dir_all(dir.path().join("books"))?;

    let store = IndexStore::open(dir.path())?;
    let config = store.get_index("books")?;
    assert_eq!(config.primary_key, "isbn");
    assert_eq!(store.doc_count("books")?, 0);
    Ok(())
}

#[test]
fn test_page_offset_equivalence() -> Result<(), Box<dyn std::error::Error>> {
    let dir = TempDir::new()?;
    let store = IndexStore::open(dir.path())?;
    store.create_index(IndexConfig::new("nums", "id"))?;

    let documents: Vec<_> = (0..30)
        .map(|i| doc(&[("id", json!(format!("{:02}", i)))]))
        .collect();
    store.add_documents("nums", &documents)?;

    // page=k over a sorted field equals offset=(k-1)*limit
    let limit = 10;
    let page_3 = store.search("nums", "", limit, 2 * limit, &["id".to_string()])?;
    let offset_20 = store.search("nums", "", limit, 20, &["id".to_string()])?;

    let ids = |results: &bright::engine::SearchResults| {
        results
            .hits
            .iter()
            .map(|h| h.document["id"].as_str().unwrap().to_string())
            .collect::<Vec<_>>()
    };
    assert_eq!(ids(&page_3), ids(&offset_20));
    assert_eq!(page_3.total, 30);
    Ok(())
}

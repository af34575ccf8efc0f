use std::fs;
use std::path::Path;
use std::sync::Arc;
use tempfile::TempDir;

use skill_memory::backend::{
    BackendConfig, BackendState, MemoryIndex, QueryFilter, RetrievalBackend, SqliteIndex,
};
use skill_memory::config::{BackendKind, Config};
use skill_memory::embedding::{DistanceMetric, Embedder, HashingProvider};
use skill_memory::{SkillError, SkillMemoryStore};

const ADD_TWO: &str = "def add_two(a, b): return a + b";

fn config_at(dir: &Path) -> Config {
    let mut config = Config::default();
    config.store.path = dir.join("data").join("skills.sqlite");
    config
}

fn sqlite_store(dir: &Path) -> SkillMemoryStore {
    SkillMemoryStore::from_config(&config_at(dir)).unwrap()
}

fn embedder() -> Arc<dyn Embedder> {
    Arc::new(HashingProvider::default())
}

fn write_seven_files(dir: &Path) {
    let files = [
        ("add.py", "def add(a, b):\n    return a + b\n"),
        ("sub.py", "def sub(a, b):\n    return a - b\n"),
        ("mul.py", "def mul(a, b):\n    return a * b\n"),
        ("pkg/div.py", "def div(a, b):\n    return a / b\n"),
        ("pkg/notes.md", "# Notes\n\nArithmetic helpers.\n"),
        ("docs/usage.txt", "Call add or sub with two numbers.\n"),
        ("docs/deep/more.md", "More notes about multiplication.\n"),
    ];
    for (path, text) in files {
        let full = dir.join(path);
        fs::create_dir_all(full.parent().unwrap()).unwrap();
        fs::write(full, text).unwrap();
    }
    fs::write(dir.join("image.bin"), [0u8, 1, 2]).unwrap();
}

#[tokio::test]
async fn test_store_then_query_finds_artifact() {
    let tmp = TempDir::new().unwrap();
    let store = sqlite_store(tmp.path());
    store.initialize(false).await.unwrap();

    store.store("add_two", ADD_TWO).await.unwrap();
    let results = store.query("add two numbers", 1, Some(2.0)).await.unwrap();

    assert_eq!(results.len(), 1);
    assert_eq!(results[0].id, "add_two");
    assert!(results[0].distance < 2.0);
    assert_eq!(results[0].document, ADD_TWO);
}

#[tokio::test]
async fn test_fresh_collection_query_is_empty() {
    let tmp = TempDir::new().unwrap();
    let store = sqlite_store(tmp.path());
    store.initialize(false).await.unwrap();
    let results = store.query("anything", 5, Some(1.0)).await.unwrap();
    assert!(results.is_empty());
}

#[tokio::test]
async fn test_self_retrieval() {
    let tmp = TempDir::new().unwrap();
    let store = sqlite_store(tmp.path());
    store.initialize(false).await.unwrap();

    let artifacts = [
        ("add_two", ADD_TWO),
        ("read_csv", "def read_csv(path):\n    import csv\n    return list(csv.reader(open(path)))\n"),
        ("greet", "def greet(name):\n    return f'hello {name}'\n"),
        ("fetch_json", "def fetch_json(url):\n    import requests\n    return requests.get(url).json()\n"),
    ];
    for (id, text) in artifacts {
        store.store(id, text).await.unwrap();
    }
    for (id, text) in artifacts {
        let results = store.query(text, artifacts.len(), Some(0.01)).await.unwrap();
        assert!(
            results.iter().any(|r| r.id == id),
            "{} not retrieved by its own text",
            id
        );
    }
}

#[tokio::test]
async fn test_upsert_leaves_one_record_with_latest_text() {
    let tmp = TempDir::new().unwrap();
    let store = sqlite_store(tmp.path());
    store.initialize(false).await.unwrap();

    store.store("f", "def f():\n    return 1\n").await.unwrap();
    store.store("f", "def f():\n    return 2\n").await.unwrap();

    assert_eq!(store.count().await.unwrap(), 1);
    let artifact = store.get("f").await.unwrap().unwrap();
    assert_eq!(artifact.source_text, "def f():\n    return 2\n");

    let results = store.query("return", 10, None).await.unwrap();
    assert_eq!(results.iter().filter(|r| r.id == "f").count(), 1);
}

#[tokio::test]
async fn test_threshold_excludes_distant_results() {
    let tmp = TempDir::new().unwrap();
    let store = sqlite_store(tmp.path());
    store.initialize(false).await.unwrap();

    store.store("add_two", ADD_TWO).await.unwrap();
    store
        .store("weather", "def weather(city):\n    return forecast(city)\n")
        .await
        .unwrap();
    store
        .store("parse_date", "def parse_date(text):\n    return datetime.fromisoformat(text)\n")
        .await
        .unwrap();

    let unfiltered = store.query("add two numbers", 10, None).await.unwrap();
    assert_eq!(unfiltered.len(), 3);
    assert!(unfiltered.windows(2).all(|w| w[0].distance <= w[1].distance));

    for threshold in [0.2, 0.5, 0.8, 1.0] {
        let results = store
            .query("add two numbers", 10, Some(threshold))
            .await
            .unwrap();
        assert!(results.iter().all(|r| r.distance < threshold));
    }
}

#[tokio::test]
async fn test_records_survive_reopen() {
    let tmp = TempDir::new().unwrap();
    {
        let store = sqlite_store(tmp.path());
        store.initialize(false).await.unwrap();
        store.store("add_two", ADD_TWO).await.unwrap();
    }

    let reopened = sqlite_store(tmp.path());
    assert!(reopened.backend().index_exists().await.unwrap());
    reopened.open_existing().await.unwrap();
    assert_eq!(reopened.count().await.unwrap(), 1);
    let results = reopened.query(ADD_TWO, 1, Some(0.5)).await.unwrap();
    assert_eq!(results[0].id, "add_two");
}

#[tokio::test]
async fn test_reset_clears_collection() {
    let tmp = TempDir::new().unwrap();
    let store = sqlite_store(tmp.path());
    store.initialize(false).await.unwrap();
    store.store("add_two", ADD_TWO).await.unwrap();

    store.reset().await.unwrap();
    assert_eq!(store.count().await.unwrap(), 0);
    assert!(store.query(ADD_TWO, 5, None).await.unwrap().is_empty());
    assert_eq!(store.backend().state().await, BackendState::Initialized);
}

#[tokio::test]
async fn test_open_existing_without_index_fails() {
    let tmp = TempDir::new().unwrap();
    let store = sqlite_store(tmp.path());
    assert!(!store.backend().index_exists().await.unwrap());

    let err = store.open_existing().await.unwrap_err();
    assert!(matches!(err, SkillError::IndexNotFound { .. }));
    // Nothing was created as a side effect.
    assert!(!tmp.path().join("data").join("skills.sqlite").exists());
}

#[tokio::test]
async fn test_index_exists_across_handles() {
    let tmp = TempDir::new().unwrap();
    let writer = sqlite_store(tmp.path());
    let reader = sqlite_store(tmp.path());

    assert!(!reader.backend().index_exists().await.unwrap());
    writer.initialize(false).await.unwrap();
    assert!(reader.backend().index_exists().await.unwrap());
    assert_eq!(reader.backend().state().await, BackendState::Uninitialized);
}

#[tokio::test]
async fn test_other_collection_is_not_found() {
    let tmp = TempDir::new().unwrap();
    sqlite_store(tmp.path()).initialize(false).await.unwrap();

    let mut config = config_at(tmp.path());
    config.store.collection = "other".to_string();
    let store = SkillMemoryStore::from_config(&config).unwrap();
    assert!(!store.backend().index_exists().await.unwrap());
    assert!(matches!(
        store.open_existing().await,
        Err(SkillError::IndexNotFound { .. })
    ));
}

#[tokio::test]
async fn test_store_before_initialize_is_not_initialized() {
    let tmp = TempDir::new().unwrap();
    let store = sqlite_store(tmp.path());
    let err = store.store("add_two", ADD_TWO).await.unwrap_err();
    assert!(matches!(err, SkillError::NotInitialized(_)));
    // The skill-level query tolerates an uninitialized store.
    assert!(store.query("add", 3, None).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_backend_query_requires_initialize() {
    let tmp = TempDir::new().unwrap();
    let backend = SqliteIndex::new(
        BackendConfig::new(tmp.path().join("x.sqlite"), "functions"),
        embedder(),
    );
    let err = backend
        .query(&["anything".to_string()], 3, None)
        .await
        .unwrap_err();
    assert!(matches!(err, SkillError::NotInitialized(_)));
}

#[tokio::test]
async fn test_ingest_overwrite_is_idempotent() {
    let tmp = TempDir::new().unwrap();
    let docs = tmp.path().join("docs");
    write_seven_files(&docs);

    let store = sqlite_store(tmp.path());
    let first = store.backend().ingest(&docs, true).await.unwrap();
    assert_eq!(first.chunks, 7);
    assert_eq!(store.count().await.unwrap(), 7);

    let second = store.backend().ingest(&docs, true).await.unwrap();
    assert_eq!(second.chunks, 7);
    assert_eq!(store.count().await.unwrap(), 7);
    assert_eq!(store.backend().state().await, BackendState::Populated);
}

#[tokio::test]
async fn test_skill_query_ignores_ingested_chunks() {
    let tmp = TempDir::new().unwrap();
    let docs = tmp.path().join("docs");
    fs::create_dir_all(&docs).unwrap();
    fs::write(docs.join("notes.md"), "how to add two numbers together\n").unwrap();

    let store = sqlite_store(tmp.path());
    store.initialize(false).await.unwrap();
    store.store("add_two", ADD_TWO).await.unwrap();
    store.backend().ingest(&docs, false).await.unwrap();
    assert_eq!(store.count().await.unwrap(), 2);

    let results = store.query("add two numbers", 5, Some(2.0)).await.unwrap();
    let ids: Vec<&str> = results.iter().map(|r| r.id.as_str()).collect();
    assert_eq!(ids, vec!["add_two"]);

    // The chunk is still there for document-level queries.
    let texts = vec!["add two numbers".to_string()];
    let chunks = QueryFilter::source("ingest");
    let response = store
        .backend()
        .query(&texts, 5, Some(&chunks))
        .await
        .unwrap();
    assert_eq!(response.ids[0], vec!["notes.md#0".to_string()]);
}

#[tokio::test]
async fn test_ingest_overwrite_drops_stored_skills() {
    let tmp = TempDir::new().unwrap();
    let docs = tmp.path().join("docs");
    write_seven_files(&docs);

    let store = sqlite_store(tmp.path());
    store.initialize(false).await.unwrap();
    store.store("add_two", ADD_TWO).await.unwrap();

    store.backend().ingest(&docs, false).await.unwrap();
    assert_eq!(store.count().await.unwrap(), 8);

    store.backend().ingest(&docs, true).await.unwrap();
    assert_eq!(store.count().await.unwrap(), 7);
    assert!(store.get("add_two").await.unwrap().is_none());
}

#[tokio::test]
async fn test_custom_splitter_overrides_chunking() {
    let tmp = TempDir::new().unwrap();
    let docs = tmp.path().join("docs");
    fs::create_dir_all(&docs).unwrap();
    fs::write(docs.join("list.txt"), "alpha;beta;gamma").unwrap();

    let config = BackendConfig::new(tmp.path().join("idx.sqlite"), "docs").with_splitter(
        Arc::new(|text: &str| -> Vec<String> { text.split(';').map(str::to_string).collect() }),
    );
    let backend = SqliteIndex::new(config, embedder());
    let stats = backend.ingest(&docs, true).await.unwrap();
    assert_eq!(stats.chunks, 3);
    assert!(backend.get("list.txt#2").await.unwrap().is_some());
}

#[tokio::test]
async fn test_batched_query_with_filter() {
    let tmp = TempDir::new().unwrap();
    let docs = tmp.path().join("docs");
    write_seven_files(&docs);

    let store = sqlite_store(tmp.path());
    store.backend().ingest(&docs, true).await.unwrap();
    store.store("add_two", ADD_TWO).await.unwrap();

    let texts = vec!["add two numbers".to_string(), "notes".to_string()];
    let response = store.backend().query(&texts, 3, None).await.unwrap();
    assert_eq!(response.len(), 2);
    for row in &response.distances {
        assert!(row.len() <= 3);
        assert!(row.windows(2).all(|w| w[0] <= w[1]));
    }

    let only_skills = QueryFilter::source("skill");
    let response = store
        .backend()
        .query(&texts, 10, Some(&only_skills))
        .await
        .unwrap();
    assert_eq!(response.ids[0], vec!["add_two".to_string()]);

    let only_pkg = QueryFilter {
        sources: Vec::new(),
        id_prefix: Some("pkg/".to_string()),
    };
    let response = store
        .backend()
        .query(&texts[..1], 10, Some(&only_pkg))
        .await
        .unwrap();
    assert_eq!(response.ids[0].len(), 2);
    assert!(response.ids[0].iter().all(|id| id.starts_with("pkg/")));
}

#[tokio::test]
async fn test_backend_rejects_empty_query() {
    let backend = MemoryIndex::new(BackendConfig::default(), embedder());
    backend.initialize(false).await.unwrap();
    assert!(matches!(
        backend.query(&[], 3, None).await,
        Err(SkillError::InvalidArgument(_))
    ));
    assert!(matches!(
        backend.query(&["ok".to_string()], 0, None).await,
        Err(SkillError::InvalidArgument(_))
    ));
}

#[tokio::test]
async fn test_memory_backend_from_config() {
    let mut config = Config::default();
    config.store.backend = BackendKind::Memory;
    config.store.metric = DistanceMetric::L2;
    let store = SkillMemoryStore::from_config(&config).unwrap();
    store.initialize(false).await.unwrap();

    store.store("add_two", ADD_TWO).await.unwrap();
    let results = store.query("add two numbers", 5, Some(4.0)).await.unwrap();
    assert_eq!(results[0].id, "add_two");
    // Squared L2 between unit vectors lies in [0, 4].
    assert!(results[0].distance <= 4.0);
}

//! End-to-end coverage of the knowledge base's tool surface, driven
//! entirely through `KnowledgeBase` rather than its individual modules.

use knowbase::{Config, KnowledgeBase, TopicId};

fn kb(dir: &std::path::Path) -> KnowledgeBase {
    let mut config = Config::new(dir);
    config.writer_id = "tester".to_string();
    KnowledgeBase::new(config).unwrap()
}

#[tokio::test]
async fn write_then_read_round_trips_through_the_facade() {
    let dir = tempfile::tempdir().unwrap();
    let kb = kb(dir.path());
    let id = TopicId::new("python/gil");

    let written = kb
        .write_topic(&id, "# The GIL\n\nCPython serializes bytecode execution.", "The GIL", vec!["python".into(), "concurrency".into()], vec![], vec![], None)
        .await;
    assert!(written.success);
    assert_eq!(written.data.as_ref().unwrap().version, 1);

    let read = kb.read_topic(&id).await;
    assert!(read.success);
    let topic = read.data.unwrap();
    assert_eq!(topic.content, "# The GIL\n\nCPython serializes bytecode execution.");
    assert_eq!(topic.metadata.keywords, vec!["python", "concurrency"]);
}

#[tokio::test]
async fn version_bumps_monotonically_across_writes() {
    let dir = tempfile::tempdir().unwrap();
    let kb = kb(dir.path());
    let id = TopicId::new("python/asyncio");

    let first = kb.write_topic(&id, "v1", "Asyncio", vec![], vec![], vec![], None).await;
    let etag = first.data.unwrap().etag;

    let second = kb.write_topic(&id, "v2", "Asyncio", vec![], vec![], vec![], Some(&etag)).await;
    assert!(second.success);
    assert_eq!(second.data.unwrap().version, 2);
}

#[tokio::test]
async fn write_with_stale_etag_reports_conflict_not_panic() {
    let dir = tempfile::tempdir().unwrap();
    let kb = kb(dir.path());
    let id = TopicId::new("python/gil");

    kb.write_topic(&id, "v1", "The GIL", vec![], vec![], vec![], None).await;
    let conflicted = kb.write_topic(&id, "v2", "The GIL", vec![], vec![], vec![], Some("not-the-real-etag")).await;

    assert!(!conflicted.success);
    assert!(conflicted.error.unwrap().contains("Conflict"));
}

#[tokio::test]
async fn search_and_list_reflect_writes_without_an_explicit_rebuild() {
    let dir = tempfile::tempdir().unwrap();
    let kb = kb(dir.path());

    kb.write_topic(&TopicId::new("python/gil"), "body", "The GIL", vec!["python".into()], vec![], vec![], None).await;
    kb.write_topic(&TopicId::new("python/asyncio"), "body", "Asyncio", vec!["python".into(), "async".into()], vec![], vec![], None)
        .await;
    kb.write_topic(&TopicId::new("rust/ownership"), "body", "Ownership", vec!["rust".into()], vec![], vec![], None).await;

    let hits = kb.search_topics("python").await;
    assert!(hits.success);
    assert_eq!(hits.data.unwrap().len(), 2);

    let python_topics = kb.list_topics(Some("python")).await;
    assert_eq!(python_topics.data.unwrap().len(), 2);

    let rust_topics = kb.list_topics(Some("rust")).await;
    assert_eq!(rust_topics.data.unwrap().len(), 1);
}

#[tokio::test]
async fn deleting_a_topic_removes_it_from_search_and_listing() {
    let dir = tempfile::tempdir().unwrap();
    let kb = kb(dir.path());
    let id = TopicId::new("python/gil");

    kb.write_topic(&id, "body", "The GIL", vec!["python".into()], vec![], vec![], None).await;
    assert_eq!(kb.search_topics("python").await.data.unwrap().len(), 1);

    let deleted = kb.delete_topic(&id).await;
    assert!(deleted.success);

    assert!(kb.search_topics("python").await.data.unwrap().is_empty());
    assert!(!kb.read_topic(&id).await.success);
}

#[tokio::test]
async fn find_related_topics_returns_explicit_links_first() {
    let dir = tempfile::tempdir().unwrap();
    let kb = kb(dir.path());
    let gil = TopicId::new("python/gil");
    let asyncio = TopicId::new("python/asyncio");

    kb.write_topic(&asyncio, "body", "Asyncio", vec!["python".into()], vec![], vec![], None).await;
    kb.write_topic(&gil, "body", "The GIL", vec!["python".into()], vec![asyncio.clone()], vec![], None).await;

    let related = kb.find_related_topics(&gil).await;
    assert!(related.success);
    let hits = related.data.unwrap();
    assert!(hits.iter().any(|r| r.topic_id == asyncio && r.relation == "explicit"));
}

#[tokio::test]
async fn citations_round_trip_and_attach_to_topic_metadata() {
    let dir = tempfile::tempdir().unwrap();
    let kb = kb(dir.path());
    let id = TopicId::new("python/gil");

    kb.write_topic(&id, "body", "The GIL", vec![], vec![], vec![], None).await;

    let citation = kb.add_citation("docs/cpython-internals.pdf", vec![id.clone()], "background on the GIL").await;
    assert!(citation.success);
    let citation = citation.data.unwrap();

    let fetched = kb.get_citation(&citation.citation_id).await;
    assert!(fetched.success);
    assert_eq!(fetched.data.unwrap().source_document, "docs/cpython-internals.pdf");
}

#[tokio::test]
async fn log_operation_persists_an_append_only_entry() {
    let dir = tempfile::tempdir().unwrap();
    let kb = kb(dir.path());

    let logged = kb.log_operation("write_topic", serde_json::json!({"topic_id": "python/gil"})).await;
    assert!(logged.success);
    assert_eq!(logged.data.unwrap().operation, "write_topic");
}

#[tokio::test]
async fn list_logs_returns_entries_newest_first() {
    let dir = tempfile::tempdir().unwrap();
    let kb = kb(dir.path());

    kb.log_operation("write_topic", serde_json::json!({"topic_id": "python/gil"})).await;
    kb.log_operation("delete_topic", serde_json::json!({"topic_id": "python/asyncio"})).await;

    let logs = kb.list_logs(10).await;
    assert!(logs.success);
    let entries = logs.data.unwrap();
    assert_eq!(entries.len(), 2);
    assert_eq!(entries[0].operation, "delete_topic");
    assert_eq!(entries[1].operation, "write_topic");
}

#[tokio::test]
async fn rebuild_index_recovers_from_a_deleted_index_tree() {
    let dir = tempfile::tempdir().unwrap();
    let kb = kb(dir.path());

    kb.write_topic(&TopicId::new("python/gil"), "body", "The GIL", vec!["python".into()], vec![], vec![], None).await;
    kb.write_topic(&TopicId::new("rust/ownership"), "body", "Ownership", vec!["rust".into()], vec![], vec![], None).await;

    std::fs::remove_dir_all(dir.path().join("_index")).unwrap();

    let rebuilt = kb.rebuild_index().await;
    assert!(rebuilt.success);
    assert_eq!(rebuilt.data.unwrap(), 2);

    let stats = kb.get_stats().await;
    assert!(stats.success);
    let stats = stats.data.unwrap();
    assert_eq!(stats.total_topics, 2);
    assert_eq!(stats.total_citations, 0);
}

#[tokio::test]
async fn lock_acquire_is_exclusive_and_release_frees_it() {
    let dir = tempfile::tempdir().unwrap();
    let kb = kb(dir.path());

    let first = kb.acquire_lock("rebuild").await;
    assert!(first.success);
    let lock_id = first.data.unwrap();

    let held = kb.check_lock("rebuild").await;
    assert_eq!(held.data.unwrap(), Some("tester".to_string()));

    let released = kb.release_lock("rebuild", &lock_id).await;
    assert!(released.success);

    assert_eq!(kb.check_lock("rebuild").await.data.unwrap(), None);
}

#[tokio::test]
async fn migrate_index_builds_from_scratch_when_none_exists() {
    let dir = tempfile::tempdir().unwrap();
    let kb = kb(dir.path());
    kb.write_topic(&TopicId::new("python/gil"), "body", "The GIL", vec!["python".into()], vec![], vec![], None).await;

    std::fs::remove_dir_all(dir.path().join("_index")).unwrap();

    let outcome = kb.migrate_index().await;
    assert!(outcome.success);

    let stats = kb.get_stats().await.data.unwrap();
    assert_eq!(stats.total_topics, 1);
}

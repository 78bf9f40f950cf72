use eipkeeper::session::{
    InMemorySessionStore, RunControl, SessionStore, SessionStoreError, SessionUpdate,
};

use super::progress_with;

#[tokio::test]
async fn memory_store_merges_progress_idempotently() {
    let store = InMemorySessionStore::new();
    store
        .get_or_create("s-mem", 5)
        .await
        .expect("session should be created");

    let progress = progress_with(&["43.204.6.17"], &["10.0.0.5"]);
    store
        .apply("s-mem", SessionUpdate::Progress(progress.clone()))
        .await
        .expect("first checkpoint should apply");
    let record = store
        .apply("s-mem", SessionUpdate::Progress(progress))
        .await
        .expect("repeated checkpoint should apply");

    assert_eq!(record.created_ips, vec!["43.204.6.17", "10.0.0.5"]);
    assert_eq!(record.allocated_ips.len(), 1);
    assert_eq!(record.released_ips.len(), 1);
    assert!(record.updated_at >= record.created_at);
}

#[tokio::test]
async fn memory_store_reports_unknown_sessions() {
    let store = InMemorySessionStore::new();
    assert!(store.get("nope").await.expect("read should succeed").is_none());

    let err = store
        .apply("nope", SessionUpdate::SetRunControl(RunControl::Stopped))
        .await
        .expect_err("unknown session must fail");
    assert!(matches!(err, SessionStoreError::NotFound(_)));
}

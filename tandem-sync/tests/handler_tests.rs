mod common;

use common::{UserMapper, entity, handler, stores, user};
use std::time::Duration;
use tandem_sync::gateway::memory::{LocalCall, RemoteCall};
use tandem_sync::{
    LocalStoreError, Mapper, OperationKind, RecordAction, RemoteError, SyncError, SyncOperation,
};
use tandem_types::{Record, RecordId, Timestamp};

// ── INSERT / UPDATE ──────────────────────────────────────────────

#[tokio::test]
async fn insert_pushes_to_remote_only() {
    let (remote, local) = stores();
    let h = handler(&remote, &local);

    let outcome = h.handle(&SyncOperation::insert("users", user("u1", 10)).unwrap()).await;

    assert!(outcome.is_success());
    assert_eq!(outcome.action("u1"), Some(RecordAction::Pushed));
    assert_eq!(remote.get("u1"), Some(user("u1", 10)));
    assert_eq!(local.writes(), 0);
    assert!(local.calls().is_empty());
}

#[tokio::test]
async fn update_replaces_remote_copy() {
    let (remote, local) = stores();
    remote.seed(user("u1", 10));
    let h = handler(&remote, &local);

    let outcome = h.handle(&SyncOperation::update("users", user("u1", 20)).unwrap()).await;

    assert!(outcome.is_success());
    assert_eq!(remote.get("u1").unwrap().last_updated, 20);
}

#[tokio::test]
async fn insert_all_reports_each_record() {
    let (remote, local) = stores();
    remote.fail(RemoteCall::Create, "u2", RemoteError::Rejected("schema".into()));
    let h = handler(&remote, &local);

    let op = SyncOperation::insert_all("users", vec![user("u1", 1), user("u2", 1), user("u3", 1)])
        .unwrap();
    let outcome = h.handle(&op).await;

    assert!(!outcome.is_success());
    assert_eq!(outcome.records.len(), 3);
    assert_eq!(outcome.action("u1"), Some(RecordAction::Pushed));
    assert_eq!(outcome.action("u3"), Some(RecordAction::Pushed));
    let failures: Vec<_> = outcome.failures().collect();
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].0, &RecordId::from("u2"));
    assert!(matches!(failures[0].1, SyncError::RemoteWrite { .. }));
    assert!(outcome.transient_failures().is_empty());
    assert!(remote.get("u2").is_none());
}

#[tokio::test]
async fn network_write_failure_is_transient() {
    let (remote, local) = stores();
    remote.fail(RemoteCall::Create, "u1", RemoteError::Network("offline".into()));
    let h = handler(&remote, &local);

    let outcome = h.handle(&SyncOperation::insert("users", user("u1", 1)).unwrap()).await;

    assert!(outcome.transient_failures().contains("u1"));
}

// ── DELETE ───────────────────────────────────────────────────────

#[tokio::test]
async fn delete_removes_remote_record() {
    let (remote, local) = stores();
    remote.seed(user("u1", 1));
    let h = handler(&remote, &local);

    let outcome = h.handle(&SyncOperation::delete("users", user("u1", 1)).unwrap()).await;

    assert_eq!(outcome.action("u1"), Some(RecordAction::Deleted));
    assert!(remote.get("u1").is_none());
}

#[tokio::test]
async fn delete_of_missing_record_is_success() {
    let (remote, local) = stores();
    let h = handler(&remote, &local);

    let outcome = h.handle(&SyncOperation::delete("users", user("u2", 1)).unwrap()).await;

    assert!(outcome.is_success());
    assert_eq!(outcome.action("u2"), Some(RecordAction::AlreadyAbsent));
    assert_eq!(outcome.writes(), 0);
    assert_eq!(remote.call_count(RemoteCall::Delete), 1);
}

#[tokio::test]
async fn delete_failure_surfaces_as_remote_delete_error() {
    let (remote, local) = stores();
    remote.seed(user("u1", 1));
    remote.fail(RemoteCall::Delete, "u1", RemoteError::Unauthorized("token".into()));
    let h = handler(&remote, &local);

    let outcome = h.handle(&SyncOperation::delete("users", user("u1", 1)).unwrap()).await;

    let (_, err) = outcome.failures().next().unwrap();
    assert!(matches!(
        err,
        SyncError::RemoteDelete { source: RemoteError::Unauthorized(_), .. }
    ));
    assert!(!err.is_transient());
}

#[tokio::test]
async fn delete_all_mixes_present_and_absent() {
    let (remote, local) = stores();
    remote.seed(user("u1", 1));
    let h = handler(&remote, &local);

    let op = SyncOperation::delete_all("users", vec![user("u1", 1), user("u9", 1)]).unwrap();
    let outcome = h.handle(&op).await;

    assert!(outcome.is_success());
    assert_eq!(outcome.action("u1"), Some(RecordAction::Deleted));
    assert_eq!(outcome.action("u9"), Some(RecordAction::AlreadyAbsent));
}

#[tokio::test]
async fn delete_path_clears_collection() {
    let (remote, local) = stores();
    remote.seed(user("u1", 1));
    remote.seed(user("u2", 1));
    let h = handler(&remote, &local);

    let outcome = h.handle(&SyncOperation::delete_path("users").unwrap()).await;

    assert_eq!(outcome.kind, OperationKind::DeleteAll);
    assert_eq!(outcome.action("users"), Some(RecordAction::PathCleared));
    assert!(remote.is_empty());
}

// ── SYNC ─────────────────────────────────────────────────────────

#[tokio::test]
async fn sync_pulls_newer_remote_record() {
    // local {u1, 100}, remote {u1, 200}
    let (remote, local) = stores();
    local.seed(entity("u1", 100));
    remote.seed(user("u1", 200));
    let h = handler(&remote, &local);

    let local_as_model = UserMapper.to_model(&entity("u1", 100));
    let outcome = h.handle(&SyncOperation::sync("users", local_as_model).unwrap()).await;

    assert_eq!(outcome.action("u1"), Some(RecordAction::Pulled));
    assert_eq!(local.call_count(LocalCall::Update), 1);
    assert_eq!(local.call_count(LocalCall::Insert), 0);
    assert_eq!(remote.writes(), 0);
    assert_eq!(remote.call_count(RemoteCall::Create), 0);
    let stored = local.get_record("u1").unwrap();
    assert_eq!(stored.last_updated(), Timestamp::from_millis(200));
    assert_eq!(stored, UserMapper.to_entity(&user("u1", 200)));
}

#[tokio::test]
async fn sync_pushes_newer_local_record() {
    let (remote, local) = stores();
    local.seed(entity("u1", 300));
    remote.seed(user("u1", 200));
    let h = handler(&remote, &local);

    let outcome = h.handle(&SyncOperation::sync("users", user("u1", 300)).unwrap()).await;

    assert_eq!(outcome.action("u1"), Some(RecordAction::Pushed));
    assert_eq!(remote.get("u1").unwrap().last_updated, 300);
    assert_eq!(local.writes(), 0);
}

#[tokio::test]
async fn sync_tie_writes_nothing() {
    let (remote, local) = stores();
    local.seed(entity("u1", 200));
    remote.seed(user("u1", 200));
    let h = handler(&remote, &local);

    let outcome = h.handle(&SyncOperation::sync("users", user("u1", 200)).unwrap()).await;

    assert_eq!(outcome.action("u1"), Some(RecordAction::InSync));
    assert_eq!(outcome.writes(), 0);
    assert_eq!(local.writes(), 0);
    assert_eq!(remote.writes(), 0);
}

#[tokio::test]
async fn sync_pushes_when_remote_missing() {
    let (remote, local) = stores();
    local.seed(entity("u1", 50));
    let h = handler(&remote, &local);

    let outcome = h.handle(&SyncOperation::sync("users", user("u1", 50)).unwrap()).await;

    assert_eq!(outcome.action("u1"), Some(RecordAction::Pushed));
    assert_eq!(remote.get("u1"), Some(UserMapper.to_model(&entity("u1", 50))));
}

#[tokio::test]
async fn sync_uses_stored_local_copy_over_stale_payload() {
    // Payload says 100 but the store was updated to 300 before dispatch.
    let (remote, local) = stores();
    local.seed(entity("u1", 300));
    remote.seed(user("u1", 200));
    let h = handler(&remote, &local);

    let outcome = h.handle(&SyncOperation::sync("users", user("u1", 100)).unwrap()).await;

    assert_eq!(outcome.action("u1"), Some(RecordAction::Pushed));
    assert_eq!(remote.get("u1").unwrap().last_updated, 300);
}

#[tokio::test]
async fn sync_inserts_when_only_payload_has_local_copy() {
    let (remote, local) = stores();
    remote.seed(user("u1", 200));
    let h = handler(&remote, &local);

    let outcome = h.handle(&SyncOperation::sync("users", user("u1", 100)).unwrap()).await;

    assert_eq!(outcome.action("u1"), Some(RecordAction::Pulled));
    assert_eq!(local.call_count(LocalCall::Insert), 1);
    assert_eq!(local.get_record("u1").unwrap().modified, 200);
}

#[tokio::test]
async fn sync_is_idempotent() {
    let (remote, local) = stores();
    local.seed(entity("a", 100));
    remote.seed(user("a", 200));
    local.seed(entity("b", 400));
    remote.seed(user("b", 300));
    local.seed(entity("c", 10));
    let h = handler(&remote, &local);

    let op = SyncOperation::sync_all("users", vec![user("a", 100), user("b", 400), user("c", 10)])
        .unwrap();

    let first = h.handle(&op).await;
    assert!(first.is_success());
    assert_eq!(first.writes(), 3);

    let local_writes = local.writes();
    let remote_writes = remote.writes();
    let second = h.handle(&op).await;

    assert!(second.is_success());
    assert_eq!(second.writes(), 0);
    assert_eq!(local.writes(), local_writes);
    assert_eq!(remote.writes(), remote_writes);
    for id in ["a", "b", "c"] {
        assert_eq!(second.action(id), Some(RecordAction::InSync));
    }
}

#[tokio::test]
async fn sync_never_deletes() {
    let (remote, local) = stores();
    local.seed(entity("u1", 1));
    remote.seed(user("u1", 2));
    let h = handler(&remote, &local);

    h.handle(&SyncOperation::sync("users", user("u1", 1)).unwrap()).await;

    assert_eq!(local.call_count(LocalCall::Delete), 0);
    assert_eq!(remote.call_count(RemoteCall::Delete), 0);
    assert!(local.get_record("u1").is_some());
    assert!(remote.get("u1").is_some());
}

#[tokio::test]
async fn sync_isolates_a_failing_record() {
    let (remote, local) = stores();
    for (id, l, r) in [("r1", 1, 2), ("r2", 1, 2), ("r3", 5, 2), ("r4", 1, 2)] {
        local.seed(entity(id, l));
        remote.seed(user(id, r));
    }
    remote.fail(RemoteCall::Fetch, "r2", RemoteError::Unauthorized("acl".into()));
    let h = handler(&remote, &local);

    let op = SyncOperation::sync_all(
        "users",
        vec![user("r1", 1), user("r2", 1), user("r3", 5), user("r4", 1)],
    )
    .unwrap();
    let outcome = h.handle(&op).await;

    assert_eq!(outcome.action("r1"), Some(RecordAction::Pulled));
    assert_eq!(outcome.action("r3"), Some(RecordAction::Pushed));
    assert_eq!(outcome.action("r4"), Some(RecordAction::Pulled));
    let failures: Vec<_> = outcome.failures().collect();
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].0.as_str(), "r2");
    assert!(matches!(failures[0].1, SyncError::RemoteRead { .. }));
    assert_eq!(local.get_record("r2").unwrap().modified, 1);
}

#[tokio::test]
async fn sync_local_write_failure_is_permanent() {
    let (remote, local) = stores();
    local.seed(entity("u1", 1));
    remote.seed(user("u1", 2));
    local.fail(LocalCall::Update, "u1", LocalStoreError::new("disk full"));
    let h = handler(&remote, &local);

    let outcome = h.handle(&SyncOperation::sync("users", user("u1", 1)).unwrap()).await;

    let (_, err) = outcome.failures().next().unwrap();
    assert!(matches!(err, SyncError::LocalStore { .. }));
    assert!(!err.is_transient());
    assert_eq!(remote.writes(), 0);
}

// ── Timeouts ─────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn slow_remote_times_out_as_transient() {
    let (remote, local) = stores();
    remote.set_latency(Some(Duration::from_secs(10)));
    let h = handler(&remote, &local).with_call_timeout(Duration::from_millis(50));

    let outcome = h.handle(&SyncOperation::insert("users", user("u1", 1)).unwrap()).await;

    let (_, err) = outcome.failures().next().unwrap();
    assert!(matches!(
        err,
        SyncError::RemoteWrite { source: RemoteError::Timeout, .. }
    ));
    assert!(err.is_transient());
}

#[tokio::test]
async fn handler_reports_operation_identity() {
    let (remote, local) = stores();
    let h = handler(&remote, &local);
    let op = SyncOperation::insert("users/u1", user("u1", 1)).unwrap();

    let outcome = h.handle(&op).await;

    assert_eq!(outcome.operation_id, op.id());
    assert_eq!(outcome.kind, OperationKind::Insert);
    assert_eq!(outcome.path, "users/u1");
    assert_eq!(h.call_timeout(), Duration::from_secs(30));
}

//! Integration tests for compare-and-swap state transitions.

mod common;

use common::{TestMetadata, record, record_in_state, seed};
use depot_core::{DataStoreRole, ObjectEvent, ObjectState};
use depot_metadata::MetadataError;
use time::{Duration, OffsetDateTime};

/// Debug-level subscriber for the current thread, so stale-write diagnostics run.
fn debug_subscriber() -> tracing::subscriber::DefaultGuard {
    let subscriber = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .with_test_writer()
        .finish();
    tracing::subscriber::set_default(subscriber)
}

#[tokio::test]
async fn test_racing_writers_exactly_one_wins() {
    let metadata = TestMetadata::in_memory()
        .await
        .expect("Failed to create metadata");
    let assoc = metadata.associations();

    let row = seed(
        assoc,
        record_in_state(7, 3, DataStoreRole::Image, ObjectState::Creating, 4),
    )
    .await;

    // Both callers read the same version.
    let mut first = row.clone();
    let mut second = row.clone();

    let won = assoc
        .update_state(
            &mut first,
            ObjectState::Creating,
            ObjectEvent::OperationSucceeded,
            ObjectState::Ready,
        )
        .await
        .expect("First update failed");
    let lost = assoc
        .update_state(
            &mut second,
            ObjectState::Creating,
            ObjectEvent::OperationFailed,
            ObjectState::Failed,
        )
        .await
        .expect("Second update failed");

    assert!(won);
    assert!(!lost);

    // The loser's in-memory record is untouched.
    assert_eq!(second, row);

    let persisted = assoc
        .get_record(row.id, false)
        .await
        .expect("Get record failed")
        .expect("Record not found");
    assert_eq!(persisted.updated_count, 5);
    assert_eq!(persisted.state().unwrap(), ObjectState::Ready);
    assert_eq!(first.updated_count, 5);
    assert_eq!(first.state().unwrap(), ObjectState::Ready);
}

#[tokio::test]
async fn test_concurrent_writers_exactly_one_wins() {
    let metadata = TestMetadata::new().await.expect("Failed to create metadata");
    let assoc = metadata.associations();

    let row = seed(
        assoc,
        record_in_state(7, 3, DataStoreRole::Image, ObjectState::Creating, 4),
    )
    .await;

    let mut first = row.clone();
    let mut second = row.clone();

    let (a, b) = tokio::join!(
        assoc.update_state(
            &mut first,
            ObjectState::Creating,
            ObjectEvent::OperationSucceeded,
            ObjectState::Ready,
        ),
        assoc.update_state(
            &mut second,
            ObjectState::Creating,
            ObjectEvent::OperationFailed,
            ObjectState::Failed,
        ),
    );
    let (a, b) = (a.unwrap(), b.unwrap());
    assert!(a ^ b, "exactly one writer must win");

    let persisted = assoc.get_record(row.id, false).await.unwrap().unwrap();
    assert_eq!(persisted.updated_count, 5);
    let winner = if a { &first } else { &second };
    assert_eq!(persisted.state, winner.state);
}

#[tokio::test]
async fn test_successful_update_bumps_version_and_timestamp() {
    let metadata = TestMetadata::in_memory().await.unwrap();
    let assoc = metadata.associations();

    let mut row = record(11, 2, DataStoreRole::ImageCache);
    let stale_time = OffsetDateTime::now_utc() - Duration::hours(1);
    row.updated_at = stale_time;
    let mut row = seed(assoc, row).await;

    let updated = assoc
        .update_state(
            &mut row,
            ObjectState::Allocated,
            ObjectEvent::CreateRequested,
            ObjectState::Creating,
        )
        .await
        .unwrap();
    assert!(updated);
    assert_eq!(row.updated_count, 1);
    assert!(row.updated_at > stale_time);

    let persisted = assoc.get_record(row.id, false).await.unwrap().unwrap();
    assert_eq!(persisted.updated_count, 1);
    assert_eq!(persisted.state().unwrap(), ObjectState::Creating);
    assert!(persisted.updated_at > stale_time);
    assert!(!persisted.destroyed);
}

#[tokio::test]
async fn test_wrong_expected_state_is_rejected() {
    let metadata = TestMetadata::in_memory().await.unwrap();
    let assoc = metadata.associations();

    let mut row = seed(
        assoc,
        record_in_state(1, 1, DataStoreRole::Image, ObjectState::Ready, 3),
    )
    .await;
    let before = row.clone();

    let updated = assoc
        .update_state(
            &mut row,
            ObjectState::Creating,
            ObjectEvent::OperationSucceeded,
            ObjectState::Ready,
        )
        .await
        .unwrap();
    assert!(!updated);
    assert_eq!(row, before);

    let persisted = assoc.get_record(row.id, false).await.unwrap().unwrap();
    assert_eq!(persisted.updated_count, 3);
}

#[tokio::test]
async fn test_destroyed_target_sets_marker() {
    let metadata = TestMetadata::in_memory().await.unwrap();
    let assoc = metadata.associations();

    let mut row = seed(
        assoc,
        record_in_state(5, 9, DataStoreRole::ImageCache, ObjectState::Destroying, 6),
    )
    .await;

    let updated = assoc
        .update_state(
            &mut row,
            ObjectState::Destroying,
            ObjectEvent::OperationSucceeded,
            ObjectState::Destroyed,
        )
        .await
        .unwrap();
    assert!(updated);
    assert!(row.destroyed);

    // Soft-deleted rows drop out of default lookups.
    assert!(assoc.get_record(row.id, false).await.unwrap().is_none());
    let persisted = assoc.get_record(row.id, true).await.unwrap().unwrap();
    assert!(persisted.destroyed);
    assert_eq!(persisted.updated_count, 7);
    assert_eq!(persisted.state().unwrap(), ObjectState::Destroyed);
}

#[tokio::test]
async fn test_transition_follows_state_machine() {
    let metadata = TestMetadata::in_memory().await.unwrap();
    let assoc = metadata.associations();

    let mut row = seed(assoc, record(3, 4, DataStoreRole::Image)).await;

    assert!(assoc.transition(&mut row, ObjectEvent::CreateRequested).await.unwrap());
    assert!(assoc.transition(&mut row, ObjectEvent::OperationSucceeded).await.unwrap());
    assert!(assoc.transition(&mut row, ObjectEvent::DestroyRequested).await.unwrap());
    assert!(assoc.transition(&mut row, ObjectEvent::ExpungeRequested).await.unwrap());

    assert_eq!(row.state().unwrap(), ObjectState::Destroyed);
    assert_eq!(row.updated_count, 4);
    assert!(row.destroyed);

    // Destroyed is terminal.
    let err = assoc
        .transition(&mut row, ObjectEvent::CreateRequested)
        .await
        .unwrap_err();
    assert!(matches!(err, MetadataError::InvalidStateTransition { .. }));
}

#[tokio::test]
async fn test_rejected_event_does_not_write() {
    let metadata = TestMetadata::in_memory().await.unwrap();
    let assoc = metadata.associations();

    let mut row = seed(assoc, record(3, 4, DataStoreRole::Image)).await;

    let err = assoc
        .transition(&mut row, ObjectEvent::MigrationRequested)
        .await
        .unwrap_err();
    assert!(matches!(err, MetadataError::InvalidStateTransition { .. }));

    let persisted = assoc.get_record(row.id, false).await.unwrap().unwrap();
    assert_eq!(persisted.updated_count, 0);
    assert_eq!(persisted.state().unwrap(), ObjectState::Allocated);
}

#[tokio::test]
async fn test_stale_write_without_diagnostics() {
    let metadata = TestMetadata::in_memory().await.unwrap();
    let store = metadata.store.clone();
    let assoc = depot_metadata::AssociationStore::from_store(store)
        .with_stale_write_diagnostics(false);

    let row = seed(&assoc, record(8, 8, DataStoreRole::Image)).await;
    let mut fresh = row.clone();
    let mut stale = row.clone();

    assert!(assoc.transition(&mut fresh, ObjectEvent::CreateRequested).await.unwrap());
    assert!(!assoc.transition(&mut stale, ObjectEvent::CreateRequested).await.unwrap());
    assert_eq!(stale, row);
}

#[tokio::test]
async fn test_update_on_missing_record_is_stale() {
    let metadata = TestMetadata::in_memory().await.unwrap();
    let assoc = metadata.associations();

    // Never inserted.
    let mut row = record(1, 1, DataStoreRole::Image);
    let updated = assoc
        .update_state(
            &mut row,
            ObjectState::Allocated,
            ObjectEvent::CreateRequested,
            ObjectState::Creating,
        )
        .await
        .unwrap();
    assert!(!updated);
}

#[tokio::test]
async fn test_lost_write_with_debug_diagnostics_returns_false() {
    let _guard = debug_subscriber();
    assert!(tracing::enabled!(tracing::Level::DEBUG));

    let metadata = TestMetadata::in_memory().await.unwrap();
    let assoc = metadata.associations();

    let row = seed(
        assoc,
        record_in_state(7, 3, DataStoreRole::Image, ObjectState::Creating, 4),
    )
    .await;
    let mut winner = row.clone();
    let mut loser = row.clone();

    assert!(assoc.transition(&mut winner, ObjectEvent::OperationSucceeded).await.unwrap());

    // The diagnostic re-read happens here and must not change the outcome.
    let updated = assoc
        .update_state(
            &mut loser,
            ObjectState::Creating,
            ObjectEvent::OperationFailed,
            ObjectState::Failed,
        )
        .await
        .unwrap();
    assert!(!updated);
    assert_eq!(loser, row);

    let persisted = assoc.get_record(row.id, false).await.unwrap().unwrap();
    assert_eq!(persisted.updated_count, 5);
    assert_eq!(persisted.state().unwrap(), ObjectState::Ready);
}

#[tokio::test]
async fn test_lost_locked_write_with_debug_diagnostics_returns_false() {
    let _guard = debug_subscriber();

    let metadata = TestMetadata::in_memory().await.unwrap();
    let assoc = metadata.associations();

    let row = seed(
        assoc,
        record_in_state(7, 3, DataStoreRole::Image, ObjectState::Creating, 4),
    )
    .await;

    let mut locked = assoc.find_by_store_template_locked(3, 7).await.unwrap().unwrap();
    let updated = locked
        .update_state(
            ObjectState::Ready,
            ObjectEvent::CopyingRequested,
            ObjectState::Copying,
        )
        .await
        .unwrap();
    assert!(!updated);
    assert_eq!(locked.record().updated_count, 4);
    locked.commit().await.unwrap();

    let persisted = assoc.get_record(row.id, false).await.unwrap().unwrap();
    assert_eq!(persisted.updated_count, 4);
    assert_eq!(persisted.state().unwrap(), ObjectState::Creating);
}

#[tokio::test]
async fn test_created_is_set_with_explicit_update() {
    let metadata = TestMetadata::in_memory().await.unwrap();
    let assoc = metadata.associations();

    let mut row = seed(
        assoc,
        record_in_state(2, 2, DataStoreRole::Image, ObjectState::Creating, 1),
    )
    .await;

    assert!(
        assoc
            .update_state(
                &mut row,
                ObjectState::Creating,
                ObjectEvent::OperationSucceeded,
                ObjectState::Created,
            )
            .await
            .unwrap()
    );
    assert_eq!(row.state().unwrap(), ObjectState::Created);

    assert!(assoc.transition(&mut row, ObjectEvent::OperationSucceeded).await.unwrap());
    assert_eq!(row.state().unwrap(), ObjectState::Ready);
    assert_eq!(row.updated_count, 3);
}

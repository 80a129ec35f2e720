//! Two-device sync scenarios over a shared in-memory cloud.
//!
//! Each "device" is a full store + orchestrator over its own local
//! storage; both sign in as the same user against the same cloud
//! document.

use std::sync::Arc;
use std::time::Duration;

use tally_core::{
    BookPatch, CloudStore, CoreConfig, EntryPatch, Error, FxService, LedgerStore, MemoryCloud,
    NewEntry, PaymentMode, StaticIdentity, StaticRateProvider, SyncOrchestrator, SyncStatus,
    UserId,
};

struct Device {
    store: Arc<LedgerStore>,
    identity: Arc<StaticIdentity>,
    orchestrator: Arc<SyncOrchestrator>,
}

fn device(cloud: &Arc<MemoryCloud>) -> Device {
    device_with_config(cloud, CoreConfig::default())
}

fn device_with_config(cloud: &Arc<MemoryCloud>, config: CoreConfig) -> Device {
    let user = UserId::from("user-1");
    let fx = Arc::new(FxService::new(
        Arc::new(
            StaticRateProvider::new()
                .with_rate("SGD", "INR", 54.31)
                .with_rate("USD", "INR", 83.2),
        ),
        &config.fx,
    ));
    let store = LedgerStore::open(
        user.clone(),
        Arc::new(tally_core::kv::MemoryStore::new()),
        fx,
        &config,
    )
    .unwrap();
    let identity = Arc::new(StaticIdentity::new(user));
    let orchestrator = SyncOrchestrator::new(
        store.clone(),
        cloud.clone() as Arc<dyn CloudStore>,
        identity.clone(),
        &config.sync,
    );
    Device {
        store,
        identity,
        orchestrator,
    }
}

async fn must_sync(device: &Device) -> tally_core::SyncReport {
    match device.orchestrator.sync().await.unwrap() {
        SyncStatus::Completed(report) => report,
        SyncStatus::Skipped => panic!("sync unexpectedly skipped"),
    }
}

fn new_entry(book: &tally_core::Book, cat: &tally_core::CategoryId, amount: f64) -> NewEntry {
    NewEntry {
        book_id: book.id.clone(),
        amount,
        category: cat.clone(),
        party: "Counterparty".to_string(),
        payment_mode: PaymentMode::Cash,
        date: chrono::NaiveDate::from_ymd_opt(2024, 10, 1).unwrap(),
        remarks: String::new(),
    }
}

// =============================================================================
// S1: delete-preservation across devices
// =============================================================================

#[tokio::test]
async fn deletion_propagates_to_other_device() {
    let cloud = Arc::new(MemoryCloud::new());
    let a = device(&cloud);
    let b = device(&cloud);

    // Build some history on A so the book is past version 1.
    let book = a.store.create_book("Groceries", "", "INR").await.unwrap();
    a.store
        .update_book(
            &book.id,
            BookPatch {
                description: Some("weekly shopping".to_string()),
                ..Default::default()
            },
        )
        .unwrap();
    must_sync(&a).await;
    must_sync(&b).await;
    assert_eq!(b.store.live_books().len(), 1);
    let b_version = b.store.live_books()[0].meta.version;

    // A deletes and pushes; B pulls.
    a.store.delete_book(&book.id).unwrap();
    must_sync(&a).await;
    must_sync(&b).await;

    assert!(b.store.live_books().is_empty(), "UI must hide the book");
    let all = b.store.all_books();
    assert_eq!(all.len(), 1);
    assert!(all[0].meta.deleted);
    assert!(all[0].meta.deleted_at.is_some());
    assert!(all[0].meta.version > b_version);
}

#[tokio::test]
async fn tombstone_survives_further_rounds() {
    let cloud = Arc::new(MemoryCloud::new());
    let a = device(&cloud);
    let b = device(&cloud);

    let book = a.store.create_book("Groceries", "", "INR").await.unwrap();
    must_sync(&a).await;
    must_sync(&b).await;

    a.store.delete_book(&book.id).unwrap();
    must_sync(&a).await;

    // Several more rounds from both sides: the tombstone must never
    // come back to life.
    for _ in 0..3 {
        must_sync(&b).await;
        must_sync(&a).await;
    }
    for dev in [&a, &b] {
        let all = dev.store.all_books();
        assert_eq!(all.len(), 1);
        assert!(all[0].meta.deleted, "tombstone resurrected");
    }
}

// =============================================================================
// S2: concurrent disjoint edits merge cleanly
// =============================================================================

#[tokio::test]
async fn disjoint_field_edits_merge_without_conflict() {
    let cloud = Arc::new(MemoryCloud::new());
    let a = device(&cloud);
    let b = device(&cloud);

    let book = a.store.create_book("Daily", "", "INR").await.unwrap();
    let cat = a.store.live_categories()[0].id.clone();
    let entry = a
        .store
        .create_entry(new_entry(&book, &cat, -100.0))
        .await
        .unwrap();
    must_sync(&a).await;
    must_sync(&b).await;

    // A changes the amount and syncs first.
    a.store
        .update_entry(
            &entry.id,
            EntryPatch {
                amount: Some(-500.0),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    must_sync(&a).await;

    // B concurrently changed the remarks from the same ancestor.
    b.store
        .update_entry(
            &entry.id,
            EntryPatch {
                remarks: Some("split with flatmates".to_string()),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    let report = must_sync(&b).await;

    assert_eq!(report.conflicts, 0, "disjoint edits must not conflict");
    let merged = b.store.entry(&entry.id).unwrap();
    assert_eq!(merged.amount, -500.0);
    assert_eq!(merged.remarks, "split with flatmates");

    // A pulls the combined result.
    must_sync(&a).await;
    let on_a = a.store.entry(&entry.id).unwrap();
    assert_eq!(on_a.amount, -500.0);
    assert_eq!(on_a.remarks, "split with flatmates");
}

// =============================================================================
// S3: concurrent same-field edit surfaces exactly one conflict
// =============================================================================

#[tokio::test]
async fn same_field_edit_conflicts_and_cloud_wins() {
    let cloud = Arc::new(MemoryCloud::new());
    let a = device(&cloud);
    let b = device(&cloud);

    let book = a.store.create_book("Daily", "", "INR").await.unwrap();
    let cat = a.store.live_categories()[0].id.clone();
    let entry = a
        .store
        .create_entry(new_entry(&book, &cat, -100.0))
        .await
        .unwrap();
    must_sync(&a).await;
    must_sync(&b).await;

    a.store
        .update_entry(
            &entry.id,
            EntryPatch {
                amount: Some(-500.0),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    must_sync(&a).await;

    b.store
        .update_entry(
            &entry.id,
            EntryPatch {
                amount: Some(-600.0),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    let report = must_sync(&b).await;

    assert_eq!(report.conflicts, 1);
    let conflicts = b.orchestrator.pending_conflicts();
    assert_eq!(conflicts.len(), 1);
    assert_eq!(conflicts[0].field, "amount");
    assert_eq!(conflicts[0].id, entry.id.to_string());
    assert_eq!(conflicts[0].local_value, serde_json::json!(-600.0));
    assert_eq!(conflicts[0].cloud_value, serde_json::json!(-500.0));

    // Cloud wins by default; B's view converges to A's value.
    assert_eq!(b.store.entry(&entry.id).unwrap().amount, -500.0);
}

// =============================================================================
// Listener path
// =============================================================================

#[tokio::test]
async fn listener_applies_remote_changes_without_push() {
    let cloud = Arc::new(MemoryCloud::new());
    let a = device(&cloud);
    let b = device(&cloud);

    // B first syncs (so later rounds fast-forward cleanly), then listens.
    must_sync(&b).await;
    b.orchestrator.start();

    a.store.create_book("Travel", "", "SGD").await.unwrap();
    must_sync(&a).await;

    // Give the listener a moment to apply.
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(b.store.live_books().len(), 1);

    b.orchestrator.shutdown();
}

#[tokio::test]
async fn own_push_echo_is_swallowed() {
    let cloud = Arc::new(MemoryCloud::new());
    let a = device(&cloud);
    a.orchestrator.start();

    let book = a.store.create_book("Travel", "", "SGD").await.unwrap();
    must_sync(&a).await;
    tokio::time::sleep(Duration::from_millis(200)).await;

    // If the echo were applied as a remote change it would fast-forward
    // and re-persist; the version must still be the pushed one.
    let on_a = a.store.all_books();
    assert_eq!(on_a.len(), 1);
    assert_eq!(on_a[0].id, book.id);
    assert_eq!(on_a[0].meta.version, on_a[0].meta.last_synced_version);

    a.orchestrator.shutdown();
}

// =============================================================================
// Auto-sync
// =============================================================================

#[tokio::test]
async fn auto_sync_debounces_mutations_into_one_push() {
    let cloud = Arc::new(MemoryCloud::new());
    let mut config = CoreConfig::default();
    config.sync.debounce_ms = 50;
    let a = device_with_config(&cloud, config);
    a.orchestrator.start();

    // A burst of mutations within the debounce window.
    let book = a.store.create_book("Daily", "", "INR").await.unwrap();
    let cat = a.store.live_categories()[0].id.clone();
    for amount in [-10.0, -20.0, -30.0] {
        a.store
            .create_entry(new_entry(&book, &cat, amount))
            .await
            .unwrap();
    }

    tokio::time::sleep(Duration::from_millis(400)).await;
    let doc = cloud
        .read_user_doc(a.store.user())
        .await
        .unwrap()
        .expect("auto-sync pushed");
    assert_eq!(doc.entries.len(), 3);
    assert!(a.orchestrator.last_sync_time().is_some());

    a.orchestrator.shutdown();
}

// =============================================================================
// Session teardown
// =============================================================================

#[tokio::test]
async fn revoked_session_disables_sync() {
    let cloud = Arc::new(MemoryCloud::new());
    let a = device(&cloud);
    a.store.create_book("Daily", "", "INR").await.unwrap();

    a.identity.revoke();
    let err = a.orchestrator.sync().await.unwrap_err();
    assert!(matches!(err, Error::AuthExpired(_)));
    // Sign-out happened; further syncs refuse outright.
    let err = a.orchestrator.sync().await.unwrap_err();
    assert!(matches!(err, Error::AuthMissing));
    assert!(cloud
        .read_user_doc(&UserId::from("user-1"))
        .await
        .unwrap()
        .is_none());
}

use std::sync::Arc;
use std::time::Duration;

use chainsift::error::IndexerError;
use chainsift::metrics::IndexerMetrics;
use chainsift::storage::repository::EntityReader;
use chainsift::storage::LmdbDatabase;
use chainsift::store::{CachedEntityModel, FlushableStore, StoreCacheController};
use chainsift::types::{CountOptions, FieldValue, MetadataKey, MetadataValue, QueryWindow};

mod common;

use common::support::{tempdir, TestAccount};

const TABLES: &[&str] = &["accounts"];
const MAP_SIZE: usize = 64 << 20;

struct Harness {
    _tmp: tempfile::TempDir,
    database: Arc<LmdbDatabase>,
    controller: Arc<StoreCacheController>,
}

impl Harness {
    fn open(historical: bool) -> Self {
        let tmp = tempdir();
        let database =
            Arc::new(LmdbDatabase::open(tmp.path(), MAP_SIZE, historical, TABLES).unwrap());
        let controller = Arc::new(StoreCacheController::new(
            Arc::clone(&database),
            1000,
            IndexerMetrics::new(),
        ));
        Self {
            _tmp: tmp,
            database,
            controller,
        }
    }

    fn model(&self, historical: bool) -> Arc<CachedEntityModel<TestAccount>> {
        let model = Arc::new(CachedEntityModel::<TestAccount>::new(
            Arc::clone(&self.database) as Arc<dyn EntityReader>,
            historical,
            500,
            Duration::from_secs(3600),
        ));
        self.controller
            .register(Arc::clone(&model) as Arc<dyn FlushableStore>);
        model
    }

    fn account_versions(&self, id: &str) -> Vec<(u64, Option<u64>, TestAccount)> {
        self.database
            .versions("accounts", id)
            .unwrap()
            .into_iter()
            .map(|row| {
                let account: TestAccount = bincode::deserialize(&row.payload).unwrap();
                (row.start_height, row.end_height, account)
            })
            .collect()
    }
}

#[test]
fn historical_set_produces_contiguous_version_rows() {
    let harness = Harness::open(true);
    let accounts = harness.model(true);

    accounts
        .set("a", TestAccount::new("a", "alice", 1), 5)
        .unwrap();
    accounts
        .set("a", TestAccount::new("a", "alice", 2), 8)
        .unwrap();
    harness.controller.flush().unwrap();

    let versions = harness.account_versions("a");
    assert_eq!(versions.len(), 2);
    assert_eq!(versions[0].0, 5);
    assert_eq!(versions[0].1, Some(8));
    assert_eq!(versions[0].2.balance, 1);
    assert_eq!(versions[1].0, 8);
    assert_eq!(versions[1].1, None);
    assert_eq!(versions[1].2.balance, 2);
}

#[test]
fn historical_set_closes_preexisting_live_row() {
    let harness = Harness::open(true);
    let accounts = harness.model(true);

    accounts
        .set("a", TestAccount::new("a", "alice", 0), 1)
        .unwrap();
    harness.controller.flush().unwrap();

    accounts
        .set("a", TestAccount::new("a", "alice", 1), 5)
        .unwrap();
    harness.controller.flush().unwrap();

    let versions = harness.account_versions("a");
    assert_eq!(versions.len(), 2);
    assert_eq!((versions[0].0, versions[0].1), (1, Some(5)));
    assert_eq!((versions[1].0, versions[1].1), (5, None));

    // Point-in-time reads land in the right version.
    let at_3: TestAccount =
        bincode::deserialize(&harness.database.find_by_pk_at("accounts", "a", 3).unwrap().unwrap())
            .unwrap();
    assert_eq!(at_3.balance, 0);
    let at_9: TestAccount =
        bincode::deserialize(&harness.database.find_by_pk_at("accounts", "a", 9).unwrap().unwrap())
            .unwrap();
    assert_eq!(at_9.balance, 1);
}

#[test]
fn historical_remove_closes_without_inserting() {
    let harness = Harness::open(true);
    let accounts = harness.model(true);

    accounts
        .set("a", TestAccount::new("a", "alice", 7), 1)
        .unwrap();
    harness.controller.flush().unwrap();

    accounts.remove("a", 7).unwrap();
    harness.controller.flush().unwrap();

    let versions = harness.account_versions("a");
    assert_eq!(versions.len(), 1);
    assert_eq!((versions[0].0, versions[0].1), (1, Some(7)));
    assert_eq!(harness.database.find_by_pk("accounts", "a").unwrap(), None);
    assert_eq!(accounts.get("a").unwrap(), None);
}

#[test]
fn remove_is_idempotent() {
    let harness = Harness::open(true);
    let accounts = harness.model(true);

    accounts
        .set("a", TestAccount::new("a", "alice", 7), 1)
        .unwrap();
    harness.controller.flush().unwrap();

    accounts.remove("a", 7).unwrap();
    accounts.remove("a", 9).unwrap();
    harness.controller.flush().unwrap();

    let versions = harness.account_versions("a");
    assert_eq!(versions.len(), 1);
    assert_eq!(versions[0].1, Some(7));
}

#[test]
fn removed_then_recreated_id_keeps_the_removal_boundary() {
    let harness = Harness::open(true);
    let accounts = harness.model(true);

    accounts
        .set("a", TestAccount::new("a", "alice", 1), 1)
        .unwrap();
    harness.controller.flush().unwrap();

    accounts.remove("a", 5).unwrap();
    accounts
        .set("a", TestAccount::new("a", "bob", 2), 9)
        .unwrap();
    harness.controller.flush().unwrap();

    let versions = harness.account_versions("a");
    assert_eq!(versions.len(), 2);
    // The old row closed at the removal height, not at the recreate height.
    assert_eq!((versions[0].0, versions[0].1), (1, Some(5)));
    assert_eq!((versions[1].0, versions[1].1), (9, None));
    assert_eq!(accounts.get("a").unwrap().unwrap().owner, "bob");
}

#[test]
fn round_trip_through_a_fresh_cache() {
    let harness = Harness::open(true);
    let accounts = harness.model(true);

    accounts
        .set("a", TestAccount::new("a", "alice", 11), 4)
        .unwrap();
    harness.controller.flush().unwrap();

    let fresh = Arc::new(CachedEntityModel::<TestAccount>::new(
        Arc::clone(&harness.database) as Arc<dyn EntityReader>,
        true,
        500,
        Duration::from_secs(3600),
    ));
    assert_eq!(
        fresh.get("a").unwrap(),
        Some(TestAccount::new("a", "alice", 11))
    );
    // Absent ids come back as a cached negative without erroring.
    assert_eq!(fresh.get("missing").unwrap(), None);
}

#[test]
fn live_mode_upserts_and_deletes() {
    let harness = Harness::open(false);
    let accounts = harness.model(false);

    accounts
        .bulk_create(
            vec![
                TestAccount::new("a", "alice", 1),
                TestAccount::new("b", "bob", 2),
            ],
            10,
        )
        .unwrap();
    harness.controller.flush().unwrap();

    accounts
        .set("a", TestAccount::new("a", "alice", 5), 12)
        .unwrap();
    accounts.remove("b", 12).unwrap();
    harness.controller.flush().unwrap();

    let fresh = CachedEntityModel::<TestAccount>::new(
        Arc::clone(&harness.database) as Arc<dyn EntityReader>,
        false,
        500,
        Duration::from_secs(3600),
    );
    assert_eq!(fresh.get("a").unwrap().unwrap().balance, 5);
    assert_eq!(fresh.get("b").unwrap(), None);
}

#[test]
fn bulk_update_rejects_field_subsets() {
    let harness = Harness::open(false);
    let accounts = harness.model(false);

    let err = accounts
        .bulk_update(vec![TestAccount::new("a", "alice", 1)], 10, Some(&["balance"]))
        .unwrap_err();
    assert!(matches!(err, IndexerError::PartialUpdateUnsupported));
}

#[test]
fn non_monotone_set_is_rejected() {
    let harness = Harness::open(true);
    let accounts = harness.model(true);

    accounts
        .set("a", TestAccount::new("a", "alice", 1), 10)
        .unwrap();
    let err = accounts
        .set("a", TestAccount::new("a", "alice", 2), 9)
        .unwrap_err();
    assert!(matches!(err, IndexerError::NonMonotonicVersion { .. }));
}

#[test]
fn get_by_field_merges_cache_and_database() {
    let harness = Harness::open(false);
    let accounts = harness.model(false);

    // Persisted rows.
    accounts
        .bulk_create(
            vec![
                TestAccount::new("db1", "carol", 1),
                TestAccount::new("db2", "carol", 2),
                TestAccount::new("db3", "dave", 3),
            ],
            10,
        )
        .unwrap();
    harness.controller.flush().unwrap();

    // Fresh cache session with pending writes on top of the DB state.
    let fresh = CachedEntityModel::<TestAccount>::new(
        Arc::clone(&harness.database) as Arc<dyn EntityReader>,
        false,
        500,
        Duration::from_secs(3600),
    );
    fresh
        .set("mem1", TestAccount::new("mem1", "carol", 4), 12)
        .unwrap();
    // Pending update moves db2 out of the carol set.
    fresh
        .set("db2", TestAccount::new("db2", "erin", 2), 12)
        .unwrap();
    fresh.remove("db1", 12).unwrap();

    let carols = fresh
        .get_by_field("owner", &FieldValue::from("carol"), QueryWindow::default())
        .unwrap();
    let ids: Vec<&str> = carols.iter().map(|a| a.id.as_str()).collect();
    assert_eq!(ids, vec!["mem1"]);

    let erins = fresh
        .get_by_field("owner", &FieldValue::from("erin"), QueryWindow::default())
        .unwrap();
    assert_eq!(erins.len(), 1);
    assert_eq!(erins[0].id, "db2");

    let daves = fresh
        .get_by_field("owner", &FieldValue::from("dave"), QueryWindow::default())
        .unwrap();
    assert_eq!(daves.len(), 1);
    assert_eq!(daves[0].id, "db3");
}

#[test]
fn get_by_field_respects_offset_and_limit() {
    let harness = Harness::open(false);
    let accounts = harness.model(false);

    let rows: Vec<TestAccount> = (0..6)
        .map(|i| TestAccount::new(&format!("id{i}"), "carol", i))
        .collect();
    accounts.bulk_create(rows, 10).unwrap();
    harness.controller.flush().unwrap();

    let fresh = CachedEntityModel::<TestAccount>::new(
        Arc::clone(&harness.database) as Arc<dyn EntityReader>,
        false,
        500,
        Duration::from_secs(3600),
    );
    let window = QueryWindow {
        offset: 2,
        limit: 3,
    };
    let page = fresh
        .get_by_field("owner", &FieldValue::from("carol"), window)
        .unwrap();
    assert_eq!(page.len(), 3);
    let ids: Vec<&str> = page.iter().map(|a| a.id.as_str()).collect();
    assert_eq!(ids, vec!["id2", "id3", "id4"]);
}

#[test]
fn get_one_by_field_short_circuits_on_db_miss() {
    let harness = Harness::open(false);
    let accounts = harness.model(false);

    assert_eq!(
        accounts
            .get_one_by_field("owner", &FieldValue::from("nobody"))
            .unwrap(),
        None
    );

    accounts
        .set("a", TestAccount::new("a", "alice", 1), 5)
        .unwrap();
    assert_eq!(
        accounts
            .get_one_by_field("owner", &FieldValue::from("alice"))
            .unwrap()
            .unwrap()
            .id,
        "a"
    );
    // Id lookups take the primary-key fast path.
    assert_eq!(
        accounts
            .get_one_by_field("id", &FieldValue::from("a"))
            .unwrap()
            .unwrap()
            .balance,
        1
    );
}

#[test]
fn count_spans_cache_and_database() {
    let harness = Harness::open(false);
    let accounts = harness.model(false);

    accounts
        .bulk_create(
            vec![
                TestAccount::new("db1", "carol", 1),
                TestAccount::new("db2", "carol", 2),
            ],
            10,
        )
        .unwrap();
    harness.controller.flush().unwrap();

    let fresh = CachedEntityModel::<TestAccount>::new(
        Arc::clone(&harness.database) as Arc<dyn EntityReader>,
        false,
        500,
        Duration::from_secs(3600),
    );
    fresh
        .set("mem1", TestAccount::new("mem1", "carol", 3), 12)
        .unwrap();

    assert_eq!(
        fresh
            .count(Some(("owner", &FieldValue::from("carol"))), CountOptions::default())
            .unwrap(),
        3
    );
    assert_eq!(fresh.count(None, CountOptions::default()).unwrap(), 3);

    let err = fresh
        .count(
            None,
            CountOptions {
                distinct: true,
                column: None,
            },
        )
        .unwrap_err();
    assert!(matches!(err, IndexerError::DistinctCountRequiresColumn));

    assert_eq!(
        fresh
            .count(
                None,
                CountOptions {
                    distinct: true,
                    column: Some("owner".to_string()),
                },
            )
            .unwrap(),
        1
    );
}

#[test]
fn metadata_increment_merges_with_stored_value() {
    let harness = Harness::open(true);
    let metadata = harness.controller.metadata();

    metadata.set(MetadataKey::ProcessedBlockCount, MetadataValue::Number(10));
    harness.controller.flush().unwrap();

    metadata
        .set_increment(MetadataKey::ProcessedBlockCount, 3)
        .unwrap();
    metadata
        .set_increment(MetadataKey::ProcessedBlockCount, 2)
        .unwrap();
    harness.controller.flush().unwrap();

    assert_eq!(
        harness
            .database
            .metadata(MetadataKey::ProcessedBlockCount)
            .unwrap()
            .and_then(|value| value.as_number()),
        Some(15)
    );
}

#[test]
fn metadata_survives_a_fresh_session() {
    let harness = Harness::open(true);
    let metadata = harness.controller.metadata();

    metadata.set(MetadataKey::Chain, MetadataValue::from("testnet"));
    metadata.set(MetadataKey::LastProcessedHeight, MetadataValue::from(99u64));
    harness.controller.flush().unwrap();

    let fresh_controller = StoreCacheController::new(
        Arc::clone(&harness.database),
        1000,
        IndexerMetrics::new(),
    );
    let fresh = fresh_controller.metadata();
    assert_eq!(
        fresh.find(MetadataKey::Chain).unwrap(),
        Some(MetadataValue::from("testnet"))
    );
    assert_eq!(
        fresh.find(MetadataKey::LastProcessedHeight).unwrap(),
        Some(MetadataValue::Number(99))
    );
}

#[test]
fn flush_threshold_gates_should_flush() {
    let tmp = tempdir();
    let database = Arc::new(LmdbDatabase::open(tmp.path(), MAP_SIZE, true, TABLES).unwrap());
    let controller = StoreCacheController::new(
        Arc::clone(&database),
        3,
        IndexerMetrics::new(),
    );
    let model = Arc::new(CachedEntityModel::<TestAccount>::new(
        Arc::clone(&database) as Arc<dyn EntityReader>,
        true,
        500,
        Duration::from_secs(3600),
    ));
    controller.register(Arc::clone(&model) as Arc<dyn FlushableStore>);

    model
        .set("a", TestAccount::new("a", "alice", 1), 1)
        .unwrap();
    assert!(!controller.should_flush());
    model.set("b", TestAccount::new("b", "bob", 1), 1).unwrap();
    model
        .set("c", TestAccount::new("c", "carol", 1), 1)
        .unwrap();
    assert!(controller.should_flush());

    controller.flush().unwrap();
    assert!(!controller.should_flush());
    assert_eq!(controller.flushable_records(), 0);
}

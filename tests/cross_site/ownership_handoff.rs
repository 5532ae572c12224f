//! Ownership moving between sites

use crate::common::*;
use mdbc::testing::InMemoryLedger;
use mdbc::{AppliedMark, ConnectionId, LedgerService, LocalStore, Range};
use serde_json::json;
use std::sync::Arc;

fn orders() -> Range {
    Range::new("shop", "orders")
}

#[test]
fn test_second_site_replays_first_sites_commits() {
    let ledger = Arc::new(InMemoryLedger::new());
    let a = TestSite::open(&ledger);
    let b = TestSite::open(&ledger);

    a.write_rows("a1", "shop.orders", &[(1, 10), (2, 20)]);
    a.write_rows("a1", "shop.orders", &[(1, 11)]);
    assert_eq!(b.qty(&orders(), 1), None);

    let conn = b.manager.get_connection("b1").unwrap();
    conn.execute(&reads("shop.orders")).unwrap();

    assert_eq!(b.qty(&orders(), 1), Some(json!(11)));
    assert_eq!(b.qty(&orders(), 2), Some(json!(20)));
    assert_eq!(b.store().applied_digests().len(), 2);
}

#[test]
fn test_ownership_round_trip_converges() {
    let ledger = Arc::new(InMemoryLedger::new());
    let a = TestSite::open(&ledger);
    let b = TestSite::open(&ledger);

    a.write_rows("a1", "shop.orders", &[(1, 10)]);
    b.write_rows("b1", "shop.orders", &[(1, 20), (3, 30)]);
    a.write_rows("a1", "shop.orders", &[(2, 5)]);

    // Own commits carry no applied mark, so A replays its first digest again
    // ahead of B's. Row writes are absolute, so the replica converges.
    assert_eq!(a.qty(&orders(), 1), Some(json!(20)));
    assert_eq!(a.qty(&orders(), 3), Some(json!(30)));
    assert_eq!(a.qty(&orders(), 2), Some(json!(5)));
    assert_eq!(a.store().applied_digests().len(), 4);

    // B saw A's first digest when it took over, and nothing since.
    assert_eq!(b.qty(&orders(), 2), None);
    assert_eq!(b.store().applied_digests().len(), 2);

    // Taking the range back replays B's own digest and A's second one; A's
    // first digest is below B's mark and is skipped.
    b.manager.get_connection("b1").unwrap().execute(&reads("shop.orders")).unwrap();
    assert_eq!(b.qty(&orders(), 1), Some(json!(20)));
    assert_eq!(b.qty(&orders(), 2), Some(json!(5)));
    assert_eq!(b.store().applied_digests().len(), 4);
}

#[test]
fn test_handoff_after_close_is_not_forced() {
    let ledger = Arc::new(InMemoryLedger::new());
    let a = TestSite::open(&ledger);
    let b = TestSite::open(&ledger);

    a.write_rows("a1", "shop.orders", &[(1, 10)]);
    a.manager.close_connection(&ConnectionId::from("a1"));
    assert_eq!(ledger.relinquished().len(), 1);

    let conn = b.manager.get_connection("b1").unwrap();
    let report = conn.own_ranges(&[orders()]).unwrap().unwrap();
    assert_eq!(report.digests_applied, 1);
    assert_eq!(b.qty(&orders(), 1), Some(json!(10)));
}

#[test]
fn test_unflushed_commits_reach_ledger_before_release() {
    let ledger = Arc::new(InMemoryLedger::new());
    let a = TestSite::open(&ledger);
    let b = TestSite::open(&ledger);

    let conn = a.manager.get_connection("a1").unwrap();
    conn.execute(&writes("shop.orders")).unwrap();
    conn.stage(upsert(&orders(), 4, 40)).unwrap();
    conn.commit().unwrap();
    assert_eq!(a.manager.pending_digests(), 1);

    a.manager.shutdown();
    assert_eq!(a.manager.pending_digests(), 0);

    b.manager.get_connection("b1").unwrap().execute(&reads("shop.orders")).unwrap();
    assert_eq!(b.qty(&orders(), 4), Some(json!(40)));
}

#[test]
fn test_restarted_site_resumes_from_persisted_marks() {
    let ledger = Arc::new(InMemoryLedger::new());
    let a = TestSite::open(&ledger);
    let b = TestSite::open(&ledger);

    a.write_rows("a1", "shop.orders", &[(1, 10)]);
    b.manager.get_connection("b1").unwrap().execute(&reads("shop.orders")).unwrap();
    let persisted = b.store().get_checkpoint_locations().unwrap();
    b.manager.shutdown();

    a.write_rows("a1", "shop.orders", &[(2, 20)]);

    // Reopen B on the same replica: only the new digest is replayed.
    let store = b.connector.store();
    let fetches = ledger.digest_fetches();
    let reopened = TestSite::reopen(&ledger, Arc::clone(store));
    assert_eq!(
        reopened.manager.engine().applied_mark(&orders()),
        persisted.get(&orders()).copied()
    );
    reopened
        .manager
        .get_connection("b1")
        .unwrap()
        .execute(&reads("shop.orders"))
        .unwrap();
    assert_eq!(ledger.digest_fetches() - fetches, 1);
    assert_eq!(reopened.qty(&orders(), 2), Some(json!(20)));
    assert!(matches!(
        reopened.manager.engine().applied_mark(&orders()),
        Some(AppliedMark { index: 0, .. })
    ));
}

#[test]
fn test_disjoint_ranges_do_not_interfere() {
    let ledger = Arc::new(InMemoryLedger::new());
    let a = TestSite::open(&ledger);
    let b = TestSite::open(&ledger);
    let customers = Range::new("shop", "customers");

    a.write_rows("a1", "shop.orders", &[(1, 10)]);
    b.write_rows("b1", "shop.customers", &[(1, 99)]);

    // Neither ownership displaced the other.
    let rows = ledger.get_all_ledger_rows().unwrap();
    assert_eq!(rows.iter().filter(|r| r.is_latest).count(), 2);
    assert_eq!(a.qty(&customers, 1), None);
    assert_eq!(b.qty(&orders(), 1), None);
    assert_eq!(a.store().applied_digests().len(), 1);
    assert_eq!(b.store().applied_digests().len(), 1);
}

#[test]
fn test_commit_then_extend_ownership_reaches_other_sites() {
    let ledger = Arc::new(InMemoryLedger::new());
    let a = TestSite::open(&ledger);
    let b = TestSite::open(&ledger);

    let conn = a.manager.get_connection("a1").unwrap();
    conn.execute(&writes("shop.orders")).unwrap();
    conn.stage(upsert(&orders(), 1, 10)).unwrap();
    conn.commit().unwrap();
    assert_eq!(a.manager.pending_digests(), 1);

    // Extending ownership issues a new row; the queued digest is flushed first.
    conn.execute(&writes("shop.items")).unwrap();
    assert_eq!(a.manager.pending_digests(), 0);
    a.manager.close_connection(&ConnectionId::from("a1"));

    b.manager.get_connection("b1").unwrap().execute(&reads("shop.orders")).unwrap();
    assert_eq!(b.qty(&orders(), 1), Some(json!(10)));
}

#[test]
fn test_retained_digest_follows_partition_to_new_row() {
    let ledger = Arc::new(InMemoryLedger::new());
    let a = TestSite::open(&ledger);
    let b = TestSite::open(&ledger);

    let conn = a.manager.get_connection("a1").unwrap();
    conn.execute(&writes("shop.orders")).unwrap();
    let first_row = conn.partition().mri_index().unwrap();
    conn.stage(upsert(&orders(), 1, 10)).unwrap();
    conn.commit().unwrap();

    ledger.set_fail_digest_writes(true);
    conn.execute(&writes("shop.items")).unwrap();
    assert_eq!(a.manager.pending_digests(), 1);
    let second_row = conn.partition().mri_index().unwrap();
    assert_ne!(first_row, second_row);

    ledger.set_fail_digest_writes(false);
    let stats = a.manager.flush_digests();
    assert_eq!((stats.pushed, stats.retained), (1, 0));
    assert_eq!(ledger.row(second_row).unwrap().digests.len(), 1);

    b.manager.get_connection("b1").unwrap().execute(&reads("shop.orders")).unwrap();
    assert_eq!(b.qty(&orders(), 1), Some(json!(10)));
}

//! Background warm-up of ranges owned by other sites

use crate::common::*;
use mdbc::testing::{InMemoryLedger, InMemoryLocalStore};
use mdbc::{MdbcConfig, Range};
use serde_json::json;
use std::sync::Arc;

fn shop(name: &str) -> Range {
    Range::new("shop", name)
}

fn follower(ledger: &Arc<InMemoryLedger>) -> TestSite {
    let config = MdbcConfig {
        eventual_ranges: Some(vec!["shop.audit".to_string()]),
        ..quiet_config()
    };
    let store = InMemoryLocalStore::with_ranges([shop("orders"), shop("customers"), shop("audit")]);
    TestSite::open_with(ledger, config, store)
}

#[test]
fn test_warmup_skips_eventual_ranges() {
    let ledger = Arc::new(InMemoryLedger::new());
    let a = TestSite::open(&ledger);
    let b = follower(&ledger);

    a.write_rows("a1", "shop.orders", &[(1, 10)]);
    a.write_rows("a2", "shop.customers", &[(7, 70)]);
    a.write_rows("a3", "shop.audit", &[(1, 1)]);

    let outcome = b.manager.run_warmup().unwrap();
    assert!(outcome.is_completed());
    assert_eq!(outcome.digests_applied(), 2);
    assert_eq!(b.qty(&shop("orders"), 1), Some(json!(10)));
    assert_eq!(b.qty(&shop("customers"), 7), Some(json!(70)));
    assert_eq!(b.qty(&shop("audit"), 1), None);
}

#[test]
fn test_warm_replica_takes_ownership_without_replay() {
    let ledger = Arc::new(InMemoryLedger::new());
    let a = TestSite::open(&ledger);
    let b = follower(&ledger);

    a.write_rows("a1", "shop.orders", &[(1, 10), (2, 20)]);
    b.manager.run_warmup().unwrap();
    let fetches = ledger.digest_fetches();

    let conn = b.manager.get_connection("b1").unwrap();
    let report = conn.own_ranges(&[shop("orders")]).unwrap().unwrap();
    assert_eq!(report.digests_applied, 0);
    assert_eq!(ledger.digest_fetches(), fetches);
}

#[test]
fn test_repeated_warmup_only_applies_new_digests() {
    let ledger = Arc::new(InMemoryLedger::new());
    let a = TestSite::open(&ledger);
    let b = follower(&ledger);

    a.write_rows("a1", "shop.orders", &[(1, 10)]);
    assert_eq!(b.manager.run_warmup().unwrap().digests_applied(), 1);
    assert_eq!(b.manager.run_warmup().unwrap().digests_applied(), 0);

    a.write_rows("a1", "shop.orders", &[(1, 11)]);
    assert_eq!(b.manager.run_warmup().unwrap().digests_applied(), 1);
    assert_eq!(b.qty(&shop("orders"), 1), Some(json!(11)));
    assert_eq!(b.store().applied_digests().len(), 2);
}

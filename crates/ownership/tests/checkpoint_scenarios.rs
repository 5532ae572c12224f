//! Checkpoint scenario tests
//!
//! Replays ledger histories into an in-memory local store and checks:
//!
//! - Replay order: every ancestor row is drained before its descendants
//! - Seeding: already-applied marks skip history exactly up to the mark
//! - Exactly once: repeated checkpoints never re-apply a digest
//! - Monotonic marks: the recorded low-water-mark never moves backwards
//! - Timeouts and failures restore foreign-key checks and stop the clock

use mdbc_core::error::MdbcError;
use mdbc_core::ledger::{AppliedMark, CheckpointLocations};
use mdbc_core::staging::{RowOperation, StagingTable};
use mdbc_core::testing::{InMemoryLedger, InMemoryLocalStore};
use mdbc_core::traits::LocalStore;
use mdbc_core::types::{MriReference, OperationId, Range};
use mdbc_ownership::OwnershipAndCheckpoint;
use proptest::prelude::*;
use serde_json::json;
use std::collections::BTreeMap;
use std::time::Duration;

fn range(name: &str) -> Range {
    Range::new("db", name)
}

/// Digest inserting one row `id` into `range`
fn digest(range: &Range, id: i64) -> StagingTable {
    let mut staging = StagingTable::new();
    staging.add_operation(RowOperation::insert(
        range.clone(),
        BTreeMap::from([("id".to_string(), json!(id))]),
        BTreeMap::from([("payload".to_string(), json!(format!("row-{}", id)))]),
    ));
    staging
}

/// Run a checkpoint with a fresh operation id and a running clock
fn checkpoint(
    engine: &OwnershipAndCheckpoint,
    ledger: &InMemoryLedger,
    store: &InMemoryLocalStore,
    ranges: &[Range],
) -> Result<usize, MdbcError> {
    let op = OperationId::new();
    engine.start_ownership_timeout_clock(op);
    let report = engine.checkpoint(ledger, store, ranges, &BTreeMap::new(), op)?;
    engine.stop_ownership_timeout_clock(op);
    Ok(report.digests_applied)
}

/// Three chained rows holding [d1, d2], [d3] and [d4, d5]
fn three_epoch_history(ledger: &InMemoryLedger, a: &Range) -> ([MriReference; 3], Vec<StagingTable>) {
    let d: Vec<StagingTable> = (1..=5).map(|i| digest(a, i)).collect();
    let row1 = ledger.append_row(vec![a.clone()], vec![]);
    ledger.push_digest(row1, &d[0]).unwrap();
    ledger.push_digest(row1, &d[1]).unwrap();
    let row2 = ledger.append_row(vec![a.clone()], vec![row1]);
    ledger.push_digest(row2, &d[2]).unwrap();
    let row3 = ledger.append_row(vec![a.clone()], vec![row2]);
    ledger.push_digest(row3, &d[3]).unwrap();
    ledger.push_digest(row3, &d[4]).unwrap();
    ([row1, row2, row3], d)
}

// ============================================================================
// Replay order
// ============================================================================

#[test]
fn test_three_epochs_replay_in_order() {
    let ledger = InMemoryLedger::new();
    let store = InMemoryLocalStore::new();
    let engine = OwnershipAndCheckpoint::default();
    let a = range("a");
    let ([_, _, row3], d) = three_epoch_history(&ledger, &a);
    assert!(ledger.row(row3).unwrap().is_latest);

    assert_eq!(checkpoint(&engine, &ledger, &store, &[a.clone()]).unwrap(), 5);
    assert_eq!(store.applied_digests(), d);
    assert_eq!(store.row_count(&a), 5);
    assert_eq!(engine.applied_mark(&a), Some(AppliedMark::new(row3, 1)));
}

#[test]
fn test_seeded_mark_skips_applied_history() {
    let ledger = InMemoryLedger::new();
    let a = range("a");
    let ([_, row2, row3], d) = three_epoch_history(&ledger, &a);

    let seeded = CheckpointLocations::from([(a.clone(), AppliedMark::new(row2, 0))]);
    let store = InMemoryLocalStore::new().with_checkpoints(seeded);
    let engine = OwnershipAndCheckpoint::new(store.get_checkpoint_locations().unwrap(), Duration::MAX);

    assert_eq!(checkpoint(&engine, &ledger, &store, &[a.clone()]).unwrap(), 2);
    assert_eq!(store.applied_digests(), d[3..].to_vec());
    assert_eq!(
        store.get_checkpoint_locations().unwrap()[&a],
        AppliedMark::new(row3, 1)
    );
}

#[test]
fn test_independent_ranges_replay_only_requested() {
    let ledger = InMemoryLedger::new();
    let store = InMemoryLocalStore::new();
    let engine = OwnershipAndCheckpoint::default();
    let a = range("a");
    let b = range("b");

    let row_a = ledger.append_row(vec![a.clone()], vec![]);
    let row_b = ledger.append_row(vec![b.clone()], vec![]);
    ledger.push_digest(row_a, &digest(&a, 1)).unwrap();
    ledger.push_digest(row_b, &digest(&b, 2)).unwrap();

    assert_eq!(checkpoint(&engine, &ledger, &store, &[a.clone()]).unwrap(), 1);
    assert_eq!(store.row_count(&a), 1);
    assert_eq!(store.row_count(&b), 0);
    assert_eq!(engine.applied_mark(&b), None);

    assert_eq!(checkpoint(&engine, &ledger, &store, &[a.clone(), b.clone()]).unwrap(), 1);
    assert_eq!(store.row_count(&b), 1);
}

#[test]
fn test_parallel_histories_each_replay_in_order() {
    let ledger = InMemoryLedger::new();
    let store = InMemoryLocalStore::new();
    let engine = OwnershipAndCheckpoint::default();
    let r1 = Range::table("t1");
    let r2 = Range::new("t1", "sub");

    // Interleave the two histories in the ledger listing.
    let r1_first = ledger.append_row(vec![r1.clone()], vec![]);
    let r2_first = ledger.append_row(vec![r2.clone()], vec![]);
    let r1_second = ledger.append_row(vec![r1.clone()], vec![r1_first]);
    let r2_second = ledger.append_row(vec![r2.clone()], vec![r2_first]);
    let mut r1_digests = Vec::new();
    let mut r2_digests = Vec::new();
    for (i, (r1_row, r2_row)) in [(r1_second, r2_second), (r1_first, r2_first)]
        .into_iter()
        .enumerate()
    {
        let d1 = digest(&r1, i as i64);
        let d2 = digest(&r2, i as i64);
        ledger.push_digest(r1_row, &d1).unwrap();
        ledger.push_digest(r2_row, &d2).unwrap();
        r1_digests.push((r1_row == r1_first, d1));
        r2_digests.push((r2_row == r2_first, d2));
    }
    // Expected per-range order: the first epoch's digest, then the second's.
    let expect = |digests: Vec<(bool, StagingTable)>| -> Vec<StagingTable> {
        let (first, second): (Vec<_>, Vec<_>) = digests.into_iter().partition(|(f, _)| *f);
        first.into_iter().chain(second).map(|(_, d)| d).collect()
    };

    checkpoint(&engine, &ledger, &store, &[r1.clone(), r2.clone()]).unwrap();
    let applied = store.applied_digests();
    let only = |r: &Range| -> Vec<StagingTable> {
        applied
            .iter()
            .filter(|d| d.ranges().contains(r))
            .cloned()
            .collect()
    };
    assert_eq!(only(&r1), expect(r1_digests));
    assert_eq!(only(&r2), expect(r2_digests));
    assert_eq!(engine.applied_mark(&r1), Some(AppliedMark::new(r1_second, 0)));
    assert_eq!(engine.applied_mark(&r2), Some(AppliedMark::new(r2_second, 0)));
}

#[test]
fn test_shared_row_applies_only_requested_ranges() {
    let ledger = InMemoryLedger::new();
    let store = InMemoryLocalStore::new();
    let engine = OwnershipAndCheckpoint::default();
    let a = range("a");
    let b = range("b");

    let row = ledger.append_row(vec![a.clone(), b.clone()], vec![]);
    let mut both = digest(&a, 1);
    both.add_operation(RowOperation::insert(
        b.clone(),
        BTreeMap::from([("id".to_string(), json!(9))]),
        BTreeMap::new(),
    ));
    ledger.push_digest(row, &both).unwrap();

    checkpoint(&engine, &ledger, &store, &[a.clone()]).unwrap();
    assert_eq!(store.row_count(&a), 1);
    assert_eq!(store.row_count(&b), 0);

    // b still has the digest outstanding.
    assert_eq!(checkpoint(&engine, &ledger, &store, &[a.clone(), b.clone()]).unwrap(), 1);
    assert_eq!(store.row_count(&b), 1);
    assert_eq!(engine.applied_mark(&b), Some(AppliedMark::new(row, 0)));
}

// ============================================================================
// Exactly once
// ============================================================================

#[test]
fn test_repeated_checkpoint_is_idempotent() {
    let ledger = InMemoryLedger::new();
    let store = InMemoryLocalStore::new();
    let engine = OwnershipAndCheckpoint::default();
    let a = range("a");
    three_epoch_history(&ledger, &a);

    checkpoint(&engine, &ledger, &store, &[a.clone()]).unwrap();
    let fetches = ledger.digest_fetches();
    assert_eq!(checkpoint(&engine, &ledger, &store, &[a.clone()]).unwrap(), 0);
    assert_eq!(ledger.digest_fetches(), fetches);
    assert_eq!(store.applied_digests().len(), 5);
}

#[test]
fn test_restart_from_persisted_marks() {
    let ledger = InMemoryLedger::new();
    let store = InMemoryLocalStore::new();
    let a = range("a");
    three_epoch_history(&ledger, &a);

    let first = OwnershipAndCheckpoint::default();
    checkpoint(&first, &ledger, &store, &[a.clone()]).unwrap();

    let restarted =
        OwnershipAndCheckpoint::new(store.get_checkpoint_locations().unwrap(), Duration::MAX);
    assert_eq!(checkpoint(&restarted, &ledger, &store, &[a.clone()]).unwrap(), 0);
    assert_eq!(store.applied_digests().len(), 5);
}

#[test]
fn test_warmup_then_checkpoint_has_nothing_left() {
    let ledger = InMemoryLedger::new();
    let store = InMemoryLocalStore::new();
    let engine = OwnershipAndCheckpoint::default();
    let a = range("a");
    three_epoch_history(&ledger, &a);

    assert_eq!(engine.warmup(&ledger, &store, &[a.clone()]).unwrap().digests_applied(), 5);
    assert_eq!(checkpoint(&engine, &ledger, &store, &[a.clone()]).unwrap(), 0);
}

// ============================================================================
// Failures and timeouts
// ============================================================================

#[test]
fn test_timeout_aborts_and_restores_checks() {
    let ledger = InMemoryLedger::new();
    let store = InMemoryLocalStore::new();
    store.set_apply_delay(Duration::from_millis(100));
    let engine = OwnershipAndCheckpoint::new(CheckpointLocations::new(), Duration::from_millis(50));
    let a = range("a");
    three_epoch_history(&ledger, &a);

    let op = OperationId::new();
    engine.start_ownership_timeout_clock(op);
    let err = engine
        .checkpoint(&ledger, &store, &[a.clone()], &BTreeMap::new(), op)
        .unwrap_err();

    assert!(matches!(err, MdbcError::OwnershipTimeout { operation_id } if operation_id == op));
    assert!(err.is_timeout());
    assert!(store.foreign_keys_enabled());
    assert_eq!(store.applied_digests().len(), 1);
    assert_eq!(engine.active_clocks(), 0);
    // The digest that did land is recorded.
    assert!(engine.applied_mark(&a).is_some());
}

#[test]
fn test_failure_mid_replay_resumes_after_last_success() {
    let ledger = InMemoryLedger::new();
    let store = InMemoryLocalStore::new();
    let engine = OwnershipAndCheckpoint::default();
    let a = range("a");
    let ([row1, _, _], d) = three_epoch_history(&ledger, &a);
    store.fail_apply_at(2);

    assert!(checkpoint(&engine, &ledger, &store, &[a.clone()]).is_err());
    assert!(store.foreign_keys_enabled());
    assert_eq!(engine.applied_mark(&a), Some(AppliedMark::new(row1, 1)));

    assert_eq!(checkpoint(&engine, &ledger, &store, &[a.clone()]).unwrap(), 3);
    assert_eq!(store.applied_digests(), d);
}

#[test]
fn test_checks_disabled_for_every_apply() {
    let ledger = InMemoryLedger::new();
    let store = InMemoryLocalStore::new();
    let engine = OwnershipAndCheckpoint::default();
    let a = range("a");
    three_epoch_history(&ledger, &a);

    checkpoint(&engine, &ledger, &store, &[a]).unwrap();
    assert_eq!(store.applies_with_foreign_keys_enabled(), 0);
    assert_eq!(store.foreign_key_history(), vec![false, true]);
}

#[test]
fn test_timeout_query_without_clock_is_invalid() {
    let engine = OwnershipAndCheckpoint::default();
    assert!(matches!(
        engine.timeout(OperationId::new()),
        Err(MdbcError::InvalidClock { .. })
    ));
}

// ============================================================================
// Monotonic marks
// ============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    /// Grow a chain of ownership epochs, checkpointing after some of them.
    /// Every digest is applied once, in chain order, and the mark only moves
    /// forward.
    #[test]
    fn prop_chain_replays_exactly_once(
        epochs in prop::collection::vec((0usize..4, any::<bool>()), 1..8)
    ) {
        let ledger = InMemoryLedger::new();
        let store = InMemoryLocalStore::new();
        let engine = OwnershipAndCheckpoint::default();
        let a = range("a");

        let mut expected = Vec::new();
        let mut prev: Option<MriReference> = None;
        let mut last_position: Option<usize> = None;
        let mut next_id = 0i64;

        for (count, run_checkpoint) in epochs {
            let row = ledger.append_row(vec![a.clone()], prev.into_iter().collect());
            for _ in 0..count {
                let d = digest(&a, next_id);
                next_id += 1;
                ledger.push_digest(row, &d).unwrap();
                expected.push((row, d));
            }
            prev = Some(row);

            if run_checkpoint {
                checkpoint(&engine, &ledger, &store, &[a.clone()]).unwrap();
                let applied: Vec<StagingTable> = expected.iter().map(|(_, d)| d.clone()).collect();
                prop_assert_eq!(store.applied_digests(), applied);

                if let Some(mark) = engine.applied_mark(&a) {
                    let row_digests = expected
                        .iter()
                        .filter(|(mri, _)| *mri == mark.mri)
                        .count();
                    let offset = expected.iter().position(|(mri, _)| *mri == mark.mri).unwrap();
                    prop_assert_eq!(mark.index + 1, row_digests);
                    let global = offset + mark.index;
                    if let Some(last) = last_position {
                        prop_assert!(global >= last);
                    }
                    last_position = Some(global);
                }
            }
        }

        checkpoint(&engine, &ledger, &store, &[a.clone()]).unwrap();
        prop_assert_eq!(store.applied_digests().len(), expected.len());
    }
}

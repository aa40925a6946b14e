//! Batch construction over random order books.

mod fixtures;

use std::collections::BTreeSet;

use proptest::prelude::*;

use batch_picking::batching::{Batcher, BatchingMethod, BatchingOptions};
use batch_picking::model::{Batch, Warehouse};

use fixtures::{Layout, TestWarehouse, order_book};

const LAYOUT: Layout = Layout::new(3, 4);

const METHODS: [BatchingMethod; 3] = [
    BatchingMethod::PMedian,
    BatchingMethod::GraphPartition,
    BatchingMethod::Clustering,
];

fn batch(w: &Warehouse, method: BatchingMethod) -> Vec<Batch> {
    let options = BatchingOptions {
        method,
        timeout_ms: 2_000,
        ..BatchingOptions::default()
    };
    Batcher::new(w, options).batch()
}

fn assert_partition(w: &Warehouse, batches: &[Batch]) -> Result<(), TestCaseError> {
    let mut seen = BTreeSet::new();
    for b in batches {
        prop_assert!(!b.is_empty());
        prop_assert!(b.is_feasible(w), "batch {:?} over capacity", b.order_ids);
        for &order in &b.order_ids {
            prop_assert!(seen.insert(order), "order {} batched twice", order);
        }
    }
    prop_assert_eq!(seen.len(), w.nb_orders());
    Ok(())
}

#[test]
fn test_volumes_past_u32_stay_apart() {
    let l = LAYOUT;
    let half = u32::MAX / 2 + 1;
    let w = TestWarehouse::new("heavy", l.clone())
        .capacity(u32::MAX, 2)
        .order(half, &[l.slot(0, 0)])
        .order(half, &[l.slot(0, 1)])
        .build();

    for method in METHODS {
        let batches = batch(&w, method);
        assert_eq!(batches.len(), 2, "{method:?}");
        assert!(batches.iter().all(|b| b.is_feasible(&w)), "{method:?}");
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    #[test]
    fn every_method_partitions_within_capacity(
        orders in order_book(LAYOUT, 7),
        volume in 4u32..=10,
        nb_orders in 1usize..=4
    ) {
        let w = TestWarehouse::new("random", LAYOUT)
            .capacity(volume, nb_orders)
            .orders(orders)
            .build();

        for method in METHODS {
            assert_partition(&w, &batch(&w, method))?;
        }
    }
}

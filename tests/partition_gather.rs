mod common;

use nemo_mass::catalog::{Catalog, ColumnData};
use nemo_mass::parallel::{add_sort_index, partition, restore_order, ErrorMode, Role, WorkerPool};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};

fn labelled(n: usize) -> Catalog {
    let mut c = Catalog::new();
    c.add_column("name", ColumnData::Text((0..n).map(|i| format!("obj{i}")).collect()))
        .unwrap();
    c.add_column("x", ColumnData::Float((0..n).map(|i| i as f64 * 0.5).collect()))
        .unwrap();
    c
}

#[test]
fn test_ten_rows_three_workers() {
    let ranges: Vec<_> = (0..3).map(|r| partition(10, 3, r)).collect();
    assert_eq!(ranges, vec![0..4, 4..8, 8..10]);
}

#[test]
fn test_last_worker_takes_remainder() {
    // ceil(7 / 4) = 2: ranks 0..2 get two rows, the last one the single remaining row
    assert_eq!(partition(7, 4, 3), 6..7);
    // more workers than rows: trailing workers get empty ranges
    assert_eq!(partition(2, 4, 2), 2..2);
    assert_eq!(partition(2, 4, 3), 2..2);
}

#[test]
fn test_restore_any_permutation() {
    let mut rng = StdRng::seed_from_u64(42);
    for _ in 0..20 {
        let n = rng.random_range(1..60);
        let original = labelled(n);
        let mut indexed = original.clone();
        add_sort_index(&mut indexed).unwrap();

        let mut perm: Vec<usize> = (0..n).collect();
        perm.shuffle(&mut rng);
        let shuffled = indexed.take(&perm);

        // split the shuffled rows into uneven blocks
        let cut = rng.random_range(0..=n);
        let blocks = [shuffled.slice(0, cut), shuffled.slice(cut, n)];
        let restored = restore_order(&blocks).unwrap();

        assert_eq!(restored.column_names(), original.column_names());
        assert_eq!(restored.texts("name").unwrap(), original.texts("name").unwrap());
        assert_eq!(restored.floats("x").unwrap(), original.floats("x").unwrap());
    }
}

#[test]
fn test_pool_blocks_follow_partition() {
    common::init_logger();
    let cat = labelled(10);
    let pool = WorkerPool::new(3, ErrorMode::Strict).unwrap();
    let out = pool
        .run(&cat, |role, mut block| {
            let rank = role.rank() as f64;
            let n = block.len();
            block.add_column("rank", ColumnData::Float(vec![rank; n]))?;
            Ok(block)
        })
        .unwrap();
    assert_eq!(
        out.floats("rank").unwrap(),
        vec![0.0, 0.0, 0.0, 0.0, 1.0, 1.0, 1.0, 1.0, 2.0, 2.0]
    );
    assert_eq!(out.texts("name").unwrap(), cat.texts("name").unwrap());
    assert_eq!(Role::of(0), Role::Coordinator);
}

//! Configuration files drive execution.

use federa_common::types::NullOrdering;
use federa_common::ExecutionConfig;
use federa_exec::sort::{ListComparator, SortKey, SortMode};
use federa_exec::PlanBuilder;
use federa_test::{int_schema, Harness};
use tempfile::tempdir;

#[test]
fn test_saved_config_round_trips() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("conf").join("federa.toml");
    let config = ExecutionConfig::builder()
        .processor_batch_size(3)
        .max_processing_batches(2)
        .max_dependent_set_size(17)
        .partitioned_join_ratio(8)
        .null_ordering(NullOrdering::High)
        .build()
        .unwrap();
    config.save(&path).unwrap();

    let loaded = ExecutionConfig::from_file(&path).unwrap();
    assert_eq!(loaded.processor_batch_size, 3);
    assert_eq!(loaded.max_dependent_set_size, 17);
    assert_eq!(loaded.partitioned_join_ratio, 8);
    assert_eq!(loaded.null_ordering, NullOrdering::High);
}

#[test]
fn test_partial_file_uses_defaults() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("federa.toml");
    std::fs::write(&path, "processor_batch_size = 5\n").unwrap();
    let loaded = ExecutionConfig::from_file(&path).unwrap();
    assert_eq!(loaded.processor_batch_size, 5);
    assert_eq!(loaded.max_dependent_set_size, ExecutionConfig::default().max_dependent_set_size);

    std::fs::write(&path, "processor_batch_size = 0\n").unwrap();
    assert!(ExecutionConfig::from_file(&path).is_err());
}

#[test]
fn test_loaded_config_runs_queries() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("federa.toml");
    ExecutionConfig::builder()
        .processor_batch_size(3)
        .max_processing_batches(2)
        .build()
        .unwrap()
        .save(&path)
        .unwrap();

    let config = ExecutionConfig::from_file(&path).unwrap();
    let mut harness = Harness::with_config(config, 2).unwrap();
    let rows: Vec<_> = (0..40).map(|i| federa_common::row![(i * 17) % 40]).collect();
    let mut b = PlanBuilder::new();
    let values = b.values(int_schema(1), rows);
    let sort = b
        .sort(values, SortMode::Sort, ListComparator::new(vec![SortKey::desc(0)]))
        .unwrap();
    let plan = b.build(sort).unwrap();

    let out = harness.run(&plan).unwrap();
    assert!(out.batches >= 14);
    let expected: Vec<_> = (0..40).rev().map(|i| federa_common::row![i]).collect();
    assert_eq!(out.rows, expected);
}

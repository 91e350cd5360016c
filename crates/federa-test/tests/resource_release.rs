//! Every buffer created during an execution is removed by its end,
//! including executions cut short by LIMIT, errors or early close.

use federa_common::types::{Row, Value};
use federa_exec::expr::col;
use federa_exec::grouping::{AggregateFunction, AggregateSpec};
use federa_exec::join::{JoinSpec, JoinType};
use federa_exec::poll::Poll;
use federa_exec::source::Command;
use federa_exec::{PlanBuilder, QueryPlan, QueryProcessor};
use federa_test::{int_schema, keyed_schema, Harness};

fn scan(table: &str) -> Command {
    Command::Query {
        table: table.into(),
        columns: vec![],
        criteria: None,
    }
}

fn load(harness: &Harness) {
    let numbers = (0..90).rev().map(|i| Row::new(vec![Value::Int(i % 31)])).collect();
    harness.table("numbers", int_schema(1), numbers);
    let sales = (0..50)
        .map(|i| Row::new(vec![Value::string(format!("k{}", i % 6)), Value::Int(i)]))
        .collect();
    harness.table("sales", keyed_schema(), sales);
}

/// Sort, join and grouping under a LIMIT of `limit` rows.
fn limited_plan(limit: usize) -> QueryPlan {
    let mut b = PlanBuilder::new();
    let left = b.access(int_schema(1), "src", scan("numbers"));
    let right = b.access(int_schema(1), "src", scan("numbers"));
    let join = b
        .join(left, right, JoinSpec::new(JoinType::Inner, vec![0], vec![0]))
        .unwrap();
    let sorted = b.sort_by_columns(join, &[1, 0]).unwrap();
    let limited = b.limit(sorted, 2, Some(limit)).unwrap();
    b.build(limited).unwrap()
}

#[test]
fn test_limit_releases_everything() {
    for limit in [0, 1, 5, 1000] {
        let mut harness = Harness::suspending(7).unwrap();
        load(&harness);
        let rows = harness.rows(&limited_plan(limit)).unwrap();
        assert!(rows.len() <= limit);
        let stats = harness.buffer_stats();
        if limit > 0 {
            assert!(stats.created > 0);
        }
        assert_eq!(stats.created, stats.removed, "limit {limit}");
        assert_eq!(harness.data().open_streams(), 0);
    }
}

#[test]
fn test_close_midway_releases_everything() {
    let mut harness = Harness::suspending(3).unwrap();
    load(&harness);
    let mut b = PlanBuilder::new();
    let access = b.access(keyed_schema(), "src", scan("sales"));
    let grouped = b
        .grouping(
            access,
            vec![col(0)],
            vec![AggregateSpec::new(AggregateFunction::Count, col(1)).distinct()],
        )
        .unwrap();
    let plan = b.build(grouped).unwrap();

    for pulls in 0..12 {
        let mut processor = QueryProcessor::new(&plan, harness.context()).unwrap();
        for _ in 0..pulls {
            if let Poll::Ready(batch) = processor.next_batch().unwrap() {
                if batch.is_terminated() {
                    break;
                }
            }
        }
        processor.close().unwrap();
        let stats = harness.buffer_stats();
        assert_eq!(stats.created, stats.removed, "closed after {pulls} pulls");
    }
    assert_eq!(harness.data().open_streams(), 0);
}

#[test]
fn test_failure_releases_everything() {
    let mut harness = Harness::new().unwrap();
    load(&harness);
    let mut b = PlanBuilder::new();
    let left = b.access(int_schema(1), "src", scan("numbers"));
    let right = b.access(int_schema(1), "broken", scan("numbers"));
    let join = b
        .join(left, right, JoinSpec::new(JoinType::Inner, vec![0], vec![0]))
        .unwrap();
    let plan = b.build(join).unwrap();
    harness.data().fail_source("broken");

    let err = harness.rows(&plan).unwrap_err();
    assert!(err.is_processing());
    assert_eq!(harness.buffer_stats().live(), 0);
    assert_eq!(harness.data().open_streams(), 0);
}

#[test]
fn test_processor_drop_releases() {
    let mut harness = Harness::suspending(2).unwrap();
    load(&harness);
    let plan = limited_plan(1000);
    {
        let mut processor = QueryProcessor::new(&plan, harness.context()).unwrap();
        let _ = processor.next_batch().unwrap();
        let _ = processor.next_batch().unwrap();
    }
    assert_eq!(harness.buffer_stats().live(), 0);
}

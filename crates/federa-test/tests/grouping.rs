//! Grouping results are independent of input order.

use federa_common::types::{Row, Value};
use federa_exec::expr::col;
use federa_exec::grouping::{AggregateFunction, AggregateSpec};
use federa_exec::source::Command;
use federa_exec::{PlanBuilder, QueryPlan};
use federa_test::{keyed_schema, sorted, Harness};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;

fn keyed(items: &[(&str, i32)]) -> Vec<Row> {
    items
        .iter()
        .map(|(k, v)| Row::new(vec![Value::string(*k), Value::Int(*v)]))
        .collect()
}

fn sum_plan(aggregates: Vec<AggregateSpec>) -> QueryPlan {
    let mut b = PlanBuilder::new();
    let access = b.access(
        keyed_schema(),
        "src",
        Command::Query {
            table: "t".into(),
            columns: vec![],
            criteria: None,
        },
    );
    let grouped = b.grouping(access, vec![col(0)], aggregates).unwrap();
    b.build(grouped).unwrap()
}

#[test]
fn test_sum_by_key_any_order() {
    let input = [("A", 1), ("A", 2), ("B", 5)];
    let orders: [[usize; 3]; 6] = [[0, 1, 2], [0, 2, 1], [1, 0, 2], [1, 2, 0], [2, 0, 1], [2, 1, 0]];
    let plan = sum_plan(vec![AggregateSpec::new(AggregateFunction::Sum, col(1))]);
    let expected = vec![
        Row::new(vec![Value::string("A"), Value::BigInt(3)]),
        Row::new(vec![Value::string("B"), Value::BigInt(5)]),
    ];
    for order in orders {
        let mut harness = Harness::suspending(1).unwrap();
        let rows: Vec<(&str, i32)> = order.iter().map(|i| input[*i]).collect();
        harness.table("t", keyed_schema(), keyed(&rows));
        assert_eq!(harness.rows(&plan).unwrap(), expected, "order {order:?}");
        assert_eq!(harness.buffer_stats().live(), 0);
    }
}

#[test]
fn test_many_groups_shuffled() {
    let mut rng = StdRng::seed_from_u64(3);
    let keys = ["k0", "k1", "k2", "k3", "k4", "k5", "k6"];
    let mut input: Vec<(&str, i32)> = (0..140).map(|i| (keys[i % 7], (i / 7) as i32)).collect();
    input.shuffle(&mut rng);

    let mut harness = Harness::new().unwrap();
    harness.table("t", keyed_schema(), keyed(&input));
    let plan = sum_plan(vec![
        AggregateSpec::count_star(),
        AggregateSpec::new(AggregateFunction::Min, col(1)),
        AggregateSpec::new(AggregateFunction::Max, col(1)),
        AggregateSpec::new(AggregateFunction::Count, col(1)).distinct(),
    ]);
    let rows = harness.rows(&plan).unwrap();
    assert_eq!(rows.len(), 7);
    for (row, key) in rows.iter().zip(keys) {
        assert_eq!(row[0], Value::string(key));
        assert_eq!(row[1], Value::BigInt(20));
        assert_eq!(row[2], Value::Int(0));
        assert_eq!(row[3], Value::Int(19));
        assert_eq!(row[4], Value::BigInt(20));
    }
    assert_eq!(rows, sorted(rows.clone()));
    assert_eq!(harness.buffer_stats().live(), 0);
}

//! Uncorrelated subqueries.
//!
//! Select and project expressions may reference subqueries by index
//! (`EXISTS`, `IN`, scalar). Each subquery has its own plan; before the
//! owning node evaluates its first row, every subquery is run to
//! completion and its rows are kept for the rest of the execution.

use std::fmt;
use std::sync::Arc;

use federa_common::error::FederaResult;
use federa_common::types::Row;
use tracing::debug;

use crate::context::CommandContext;
use crate::node::ExecNode;
use crate::plan::QueryPlan;
use crate::poll::{Poll, PollResult};
use crate::ready;

/// Runs and caches the subqueries of one node.
pub struct SubqueryEvaluator {
    plans: Vec<Arc<QueryPlan>>,
    ctx: Arc<CommandContext>,
    results: Vec<Vec<Row>>,
    /// Tree and rows of the subquery currently being executed.
    running: Option<(Box<dyn ExecNode>, Vec<Row>)>,
}

impl SubqueryEvaluator {
    /// Creates an evaluator for `plans`; subquery `i` is `plans[i]`.
    pub fn new(plans: Vec<Arc<QueryPlan>>, ctx: &Arc<CommandContext>) -> Self {
        Self {
            plans,
            ctx: Arc::clone(ctx),
            results: Vec::new(),
            running: None,
        }
    }

    /// Creates an evaluator without subqueries.
    pub fn empty(ctx: &Arc<CommandContext>) -> Self {
        Self::new(Vec::new(), ctx)
    }

    /// Returns the number of subqueries.
    pub fn len(&self) -> usize {
        self.plans.len()
    }

    /// Returns true if there are no subqueries.
    pub fn is_empty(&self) -> bool {
        self.plans.is_empty()
    }

    /// Runs every subquery that has not completed yet.
    ///
    /// Suspends when a subquery does; rows already read are kept.
    pub fn prepare(&mut self) -> PollResult<()> {
        while self.results.len() < self.plans.len() {
            let index = self.results.len();
            if self.running.is_none() {
                let mut tree = self.plans[index].create_tree(&self.ctx)?;
                tree.open()?;
                debug!(subquery = index, root = %tree.id(), "running subquery");
                self.running = Some((tree, Vec::new()));
            }
            if let Some((tree, rows)) = self.running.as_mut() {
                loop {
                    let batch = ready!(tree.next_batch());
                    let last = batch.is_terminated();
                    rows.extend(batch.into_rows());
                    if last {
                        break;
                    }
                }
                tree.close()?;
            }
            if let Some((_, rows)) = self.running.take() {
                self.results.push(rows);
            }
        }
        Ok(Poll::Ready(()))
    }

    /// Returns the rows of every completed subquery.
    pub fn results(&self) -> &[Vec<Row>] {
        &self.results
    }

    /// Closes a subquery that is still running.
    pub fn close(&mut self) -> FederaResult<()> {
        match self.running.take() {
            Some((mut tree, _)) => tree.close(),
            None => Ok(()),
        }
    }
}

impl fmt::Debug for SubqueryEvaluator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubqueryEvaluator")
            .field("subqueries", &self.plans.len())
            .field("completed", &self.results.len())
            .field("running", &self.running.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::{col, Expression};
    use crate::plan::PlanBuilder;
    use crate::source::{Command, MemoryDataManager};
    use crate::test_util::{buffer_manager, context_with, int_rows, int_schema};

    #[test]
    fn test_subquery_results_survive_suspension() {
        let data = Arc::new(MemoryDataManager::new().with_suspension(2));
        data.register_table("small", int_schema(1), int_rows(0..3));
        let ctx = context_with(Arc::clone(&data), buffer_manager(2));

        let mut builder = PlanBuilder::new();
        let access = builder.access(
            int_schema(1),
            "src",
            Command::Query {
                table: "small".into(),
                columns: vec![],
                criteria: None,
            },
        );
        let plan = Arc::new(builder.build(access).unwrap());

        let mut evaluator = SubqueryEvaluator::new(vec![plan], &ctx);
        let mut pending = 0;
        while let Poll::Pending = evaluator.prepare().unwrap() {
            pending += 1;
        }
        assert!(pending > 0);
        assert_eq!(evaluator.results(), &[int_rows(0..3)]);
        assert_eq!(data.submitted().len(), 1);

        // later calls reuse the cached rows
        assert!(matches!(evaluator.prepare().unwrap(), Poll::Ready(())));
        assert_eq!(data.submitted().len(), 1);

        let in_sub = Expression::InSubquery {
            expr: Box::new(col(0)),
            subquery: 0,
            negated: false,
        };
        assert!(crate::expr::evaluate_predicate(&in_sub, &int_rows(2..3)[0], evaluator.results()).unwrap());
        evaluator.close().unwrap();
    }
}

//! The join execution node.

use std::sync::Arc;

use federa_common::error::{FederaError, FederaResult};
use federa_common::types::{NodeId, Schema, TupleBatch};
use tracing::debug;

use super::{
    JoinSpec, JoinStrategy, JoinStrategyKind, JoinType, MergeJoinStrategy,
    PartitionedJoinStrategy, SourceState,
};
use crate::context::{CommandContext, DependentValueSource};
use crate::node::{ExecNode, NodeBase};
use crate::poll::{Poll, PollResult};
use crate::ready;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    LoadLeft,
    LoadRight,
    Execute,
    Done,
}

/// Joins two inputs.
///
/// Both inputs are buffered before any output is produced: the left one
/// first, then the right one. For a dependent join the left rows are
/// published under the join's source name between the two loads, so the
/// right side can build its commands from them.
#[derive(Debug)]
pub struct JoinNode {
    base: NodeBase,
    ctx: Arc<CommandContext>,
    spec: JoinSpec,
    left: SourceState,
    right: SourceState,
    strategy: Option<Box<dyn JoinStrategy>>,
    phase: Phase,
    published: Option<String>,
}

impl JoinNode {
    /// Creates a join of `left` and `right`.
    pub fn new(
        id: NodeId,
        left: Box<dyn ExecNode>,
        right: Box<dyn ExecNode>,
        spec: JoinSpec,
        ctx: &Arc<CommandContext>,
    ) -> FederaResult<Self> {
        if spec.left_keys.len() != spec.right_keys.len() {
            return Err(FederaError::invalid_plan(
                id,
                format!(
                    "{} left keys but {} right keys",
                    spec.left_keys.len(),
                    spec.right_keys.len()
                ),
            ));
        }
        let schema = Self::output_schema(spec.join_type, left.schema(), right.schema());
        Ok(Self {
            base: NodeBase::new(id, schema, ctx.processor_batch_size()),
            ctx: Arc::clone(ctx),
            left: SourceState::new(left, spec.left_keys.clone(), spec.left_sort),
            right: SourceState::new(right, spec.right_keys.clone(), spec.right_sort),
            spec,
            strategy: None,
            phase: Phase::LoadLeft,
            published: None,
        })
    }

    /// Output schema of a join: the left columns for semi and anti joins,
    /// otherwise left then right, nullable on the padded sides.
    pub fn output_schema(join_type: JoinType, left: &Arc<Schema>, right: &Arc<Schema>) -> Arc<Schema> {
        match join_type {
            JoinType::Semi | JoinType::AntiSemi => Arc::clone(left),
            JoinType::LeftOuter => Arc::new(left.join(&right.to_nullable())),
            JoinType::FullOuter => Arc::new(left.to_nullable().join(&right.to_nullable())),
            JoinType::Inner | JoinType::Cross => Arc::new(left.join(right)),
        }
    }

    /// Returns the join description.
    pub fn spec(&self) -> &JoinSpec {
        &self.spec
    }

    /// Returns the name of the running algorithm once both sides are loaded.
    pub fn strategy_name(&self) -> Option<&'static str> {
        self.strategy.as_ref().map(|s| s.name())
    }

    fn unpublish(&mut self) {
        if let Some(name) = self.published.take() {
            self.ctx.remove_dependent_source(&name);
        }
    }

    fn load_left(&mut self) -> PollResult<()> {
        let sort = self.spec.effective_strategy() == JoinStrategyKind::Merge;
        ready!(self.left.load(self.ctx.buffer_manager(), sort));
        if let Some(name) = self.spec.dependent_source.clone() {
            let source = DependentValueSource {
                buffer_id: self.left.buffer_id()?,
                schema: Arc::clone(self.left.schema()),
            };
            self.ctx.register_dependent_source(name.clone(), source)?;
            self.published = Some(name);
            self.right.open()?;
        }
        Ok(Poll::Ready(()))
    }

    fn load_right(&mut self) -> PollResult<()> {
        let kind = self.spec.effective_strategy();
        ready!(self
            .right
            .load(self.ctx.buffer_manager(), kind != JoinStrategyKind::NestedLoop));
        self.unpublish();
        let strategy = self.choose_strategy(kind)?;
        debug!(
            node_id = %self.base.id(),
            join_type = %self.spec.join_type,
            strategy = strategy.name(),
            left_rows = self.left.row_count(),
            right_rows = self.right.row_count(),
            "join inputs loaded"
        );
        self.strategy = Some(strategy);
        Ok(Poll::Ready(()))
    }

    fn choose_strategy(&mut self, kind: JoinStrategyKind) -> FederaResult<Box<dyn JoinStrategy>> {
        match kind {
            JoinStrategyKind::NestedLoop => Ok(Box::new(MergeJoinStrategy::nested_loop(&self.spec))),
            JoinStrategyKind::Merge => Ok(Box::new(MergeJoinStrategy::new(&self.spec))),
            JoinStrategyKind::PartitionedSort => {
                let config = self.ctx.config();
                let ratio = config.partitioned_join_ratio;
                let max_partitions = config.max_processing_batches;
                let left_dominates = self.left.row_count() >= ratio.saturating_mul(self.right.row_count());
                let right_dominates = self.right.row_count() >= ratio.saturating_mul(self.left.row_count());
                if left_dominates {
                    if let Some(partitioned) = PartitionedJoinStrategy::try_new(
                        &self.spec,
                        &self.right,
                        max_partitions,
                        self.base.batch_size(),
                    )? {
                        return Ok(Box::new(partitioned));
                    }
                } else if right_dominates && self.spec.join_type == JoinType::Inner {
                    self.left.sort_loaded(self.ctx.buffer_manager())?;
                    if let Some(partitioned) = PartitionedJoinStrategy::try_new_mirrored(
                        &self.spec,
                        &self.left,
                        max_partitions,
                        self.base.batch_size(),
                    )? {
                        return Ok(Box::new(partitioned));
                    }
                }
                debug!(node_id = %self.base.id(), "partitioned join falling back to merge");
                self.left.sort_loaded(self.ctx.buffer_manager())?;
                Ok(Box::new(MergeJoinStrategy::new(&self.spec)))
            }
        }
    }

    fn release_sides(&mut self) -> FederaResult<()> {
        let left = self.left.release();
        let right = self.right.release();
        left.and(right)
    }
}

impl ExecNode for JoinNode {
    fn id(&self) -> NodeId {
        self.base.id()
    }

    fn node_type(&self) -> &'static str {
        "Join"
    }

    fn schema(&self) -> &Arc<Schema> {
        self.base.schema()
    }

    fn open(&mut self) -> FederaResult<()> {
        self.left.open()?;
        if self.spec.dependent_source.is_none() {
            self.right.open()?;
        }
        Ok(())
    }

    fn next_batch(&mut self) -> PollResult<TupleBatch> {
        self.base.check_active()?;
        if self.phase == Phase::LoadLeft {
            ready!(self.load_left());
            self.phase = Phase::LoadRight;
        }
        if self.phase == Phase::LoadRight {
            ready!(self.load_right());
            self.phase = Phase::Execute;
        }
        if self.phase == Phase::Execute {
            let strategy = self
                .strategy
                .as_mut()
                .ok_or_else(|| FederaError::invariant("join executing without a strategy"))?;
            while !self.base.is_batch_full() {
                match strategy.next_row(&mut self.left, &mut self.right)? {
                    Some(row) => self.base.add_row(row),
                    None => {
                        self.phase = Phase::Done;
                        break;
                    }
                }
            }
            if self.phase == Phase::Done {
                self.release_sides()?;
            }
        }
        if self.phase == Phase::Done {
            return Ok(Poll::Ready(self.base.terminate_batch()));
        }
        Ok(Poll::Ready(self.base.take_batch()))
    }

    fn close(&mut self) -> FederaResult<()> {
        if !self.base.mark_closed() {
            return Ok(());
        }
        self.unpublish();
        let left = self.left.close();
        let right = self.right.close();
        left.and(right)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::join::SortOption;
    use crate::node::AccessNode;
    use crate::source::{Command, MemoryDataManager};
    use crate::test_util::{
        buffer_manager, context, context_with, drain, int_rows, int_schema, pair_schema, pairs, sorted, values,
    };
    use federa_common::types::{Row, Value};

    fn quad(a: Option<i32>, b: Option<&str>, c: Option<i32>, d: Option<&str>) -> Row {
        let int = |v: Option<i32>| v.map_or(Value::Null, Value::Int);
        let text = |v: Option<&str>| v.map_or(Value::Null, Value::string);
        Row::new(vec![int(a), text(b), int(c), text(d)])
    }

    fn run(join_type: JoinType, strategy: JoinStrategyKind) -> Vec<Row> {
        let ctx = context(2);
        let left = values(1, pair_schema(), pairs(&[(1, "a"), (2, "b"), (2, "c")]), 2);
        let right = values(2, pair_schema(), pairs(&[(2, "x"), (3, "y")]), 2);
        let spec = JoinSpec::new(join_type, vec![0], vec![0]).with_strategy(strategy);
        let mut node = JoinNode::new(NodeId::new(3), left, right, spec, &ctx).unwrap();
        node.open().unwrap();
        let rows = drain(&mut node);
        node.close().unwrap();
        assert_eq!(ctx.buffer_manager().stats().live(), 0);
        sorted(rows)
    }

    #[test]
    fn test_join_types() {
        let matched = vec![
            quad(Some(2), Some("b"), Some(2), Some("x")),
            quad(Some(2), Some("c"), Some(2), Some("x")),
        ];
        assert_eq!(run(JoinType::Inner, JoinStrategyKind::Merge), matched);

        let mut left = vec![quad(Some(1), Some("a"), None, None)];
        left.extend(matched.clone());
        assert_eq!(run(JoinType::LeftOuter, JoinStrategyKind::Merge), left);

        let mut full = vec![quad(None, None, Some(3), Some("y"))];
        full.extend(left.clone());
        assert_eq!(run(JoinType::FullOuter, JoinStrategyKind::Merge), full);

        assert_eq!(run(JoinType::Semi, JoinStrategyKind::Merge), pairs(&[(2, "b"), (2, "c")]));
        assert_eq!(run(JoinType::AntiSemi, JoinStrategyKind::Merge), pairs(&[(1, "a")]));
    }

    #[test]
    fn test_strategies_agree() {
        for join_type in [JoinType::Inner, JoinType::LeftOuter, JoinType::Semi, JoinType::AntiSemi] {
            let merge = run(join_type, JoinStrategyKind::Merge);
            assert_eq!(run(join_type, JoinStrategyKind::PartitionedSort), merge, "{join_type}");
        }
    }

    #[test]
    fn test_partitioned_falls_back_to_merge() {
        let ctx = context(2);
        let left = values(1, int_schema(1), int_rows(0..3), 2);
        let right = values(2, int_schema(1), int_rows(0..9), 2);
        let spec = JoinSpec::new(JoinType::Inner, vec![0], vec![0])
            .with_strategy(JoinStrategyKind::PartitionedSort);
        let mut node = JoinNode::new(NodeId::new(3), left, right, spec, &ctx).unwrap();
        node.open().unwrap();
        let rows = drain(&mut node);
        assert_eq!(node.strategy_name(), Some("merge"));
        assert_eq!(rows.len(), 3);
        node.close().unwrap();
    }

    #[test]
    fn test_partitioned_mirrors_when_right_dominates() {
        let ctx = context(2);
        let left = values(1, pair_schema(), pairs(&[(4, "d"), (1, "a")]), 2);
        let right_rows: Vec<Row> = (0..20).map(|i| Row::new(vec![Value::Int(i % 5)])).collect();
        let right = values(2, int_schema(1), right_rows, 2);
        let spec = JoinSpec::new(JoinType::Inner, vec![0], vec![0])
            .with_strategy(JoinStrategyKind::PartitionedSort);
        let mut node = JoinNode::new(NodeId::new(3), left, right, spec, &ctx).unwrap();
        node.open().unwrap();
        let rows = drain(&mut node);
        assert_eq!(node.strategy_name(), Some("partitioned sort"));
        let one = Row::new(vec![Value::Int(1), Value::string("a"), Value::Int(1)]);
        let four = Row::new(vec![Value::Int(4), Value::string("d"), Value::Int(4)]);
        let mut expected = vec![one; 4];
        expected.extend(vec![four; 4]);
        assert_eq!(sorted(rows), expected);
        node.close().unwrap();
        assert_eq!(ctx.buffer_manager().stats().live(), 0);
    }

    #[test]
    fn test_cross_join() {
        let ctx = context(4);
        let left = values(1, int_schema(1), int_rows(0..3), 4);
        let right = values(2, int_schema(1), int_rows(10..12), 4);
        let spec = JoinSpec::nested_loop(JoinType::Cross, None);
        let mut node = JoinNode::new(NodeId::new(3), left, right, spec, &ctx).unwrap();
        assert_eq!(node.schema().len(), 2);
        node.open().unwrap();
        let rows = drain(&mut node);
        assert_eq!(rows.len(), 6);
        assert_eq!(node.strategy_name(), Some("nested loop"));
        node.close().unwrap();
    }

    #[test]
    fn test_suspending_inputs() {
        let data = Arc::new(MemoryDataManager::new().with_suspension(1));
        data.register_table("l", pair_schema(), pairs(&[(3, "c"), (1, "a"), (2, "b")]));
        data.register_table("r", pair_schema(), pairs(&[(2, "y"), (1, "x")]));
        let ctx = context_with(Arc::clone(&data), buffer_manager(2));
        let access = |id: u32, table: &str| -> Box<dyn ExecNode> {
            let command = Command::Query {
                table: table.into(),
                columns: vec![],
                criteria: None,
            };
            Box::new(AccessNode::new(NodeId::new(id), pair_schema(), "src".into(), command, &ctx))
        };
        let spec = JoinSpec::new(JoinType::Inner, vec![0], vec![0]);
        let mut node = JoinNode::new(NodeId::new(3), access(1, "l"), access(2, "r"), spec, &ctx).unwrap();
        node.open().unwrap();
        let rows = drain(&mut node);
        assert_eq!(
            rows,
            vec![
                quad(Some(1), Some("a"), Some(1), Some("x")),
                quad(Some(2), Some("b"), Some(2), Some("y")),
            ]
        );
        node.close().unwrap();
        assert_eq!(data.open_streams(), 0);
    }

    #[test]
    fn test_dependent_source_published_between_loads() {
        let ctx = context(2);
        let left = values(1, int_schema(1), int_rows(0..3), 2);
        let right = values(2, int_schema(1), int_rows(0..3), 2);
        let spec = JoinSpec::new(JoinType::Inner, vec![0], vec![0])
            .with_sort(SortOption::Sort, SortOption::AlreadySorted)
            .dependent("outer");
        let mut node = JoinNode::new(NodeId::new(3), left, right, spec, &ctx).unwrap();
        node.open().unwrap();
        assert!(ctx.dependent_source("outer").is_none());
        let rows = drain(&mut node);
        assert_eq!(rows.len(), 3);
        assert!(ctx.dependent_source("outer").is_none());
        node.close().unwrap();
    }

    #[test]
    fn test_close_midway_releases_everything() {
        let ctx = context(1);
        let left = values(1, int_schema(1), int_rows(0..5), 1);
        let right = values(2, int_schema(1), int_rows(0..5), 1);
        let spec = JoinSpec::new(JoinType::Inner, vec![0], vec![0]).dependent("outer");
        let mut node = JoinNode::new(NodeId::new(3), left, right, spec, &ctx).unwrap();
        node.open().unwrap();
        assert!(matches!(node.next_batch().unwrap(), Poll::Ready(_)));
        assert!(ctx.buffer_manager().stats().live() > 0);
        node.close().unwrap();
        node.close().unwrap();
        assert_eq!(ctx.buffer_manager().stats().live(), 0);
        assert!(ctx.dependent_source("outer").is_none());
    }

    #[test]
    fn test_mismatched_keys_rejected() {
        let ctx = context(2);
        let spec = JoinSpec::new(JoinType::Inner, vec![0], vec![]);
        let err = JoinNode::new(
            NodeId::new(3),
            values(1, int_schema(1), vec![], 2),
            values(2, int_schema(1), vec![], 2),
            spec,
            &ctx,
        )
        .unwrap_err();
        assert!(err.is_processing());
    }
}

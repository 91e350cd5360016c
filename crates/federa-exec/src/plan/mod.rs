//! Immutable query plans.
//!
//! A [`QueryPlan`] is an arena of [`PlanNode`]s addressed by [`NodeId`].
//! Every node records its parent and children, captured once by the
//! [`PlanBuilder`]; nothing in a plan changes during execution. Each
//! execution calls [`QueryPlan::create_tree`] to get a fresh tree of
//! execution nodes, so a plan can run any number of times.

mod builder;
mod describe;

pub use builder::PlanBuilder;
pub use describe::PlanDescription;

use std::sync::Arc;

use federa_common::error::{FederaError, FederaResult};
use federa_common::types::{NodeId, Row, Schema};

use crate::context::CommandContext;
use crate::dependent::DependentAccessNode;
use crate::expr::Expression;
use crate::grouping::{AggregateSpec, GroupingNode};
use crate::join::{JoinNode, JoinSpec};
use crate::node::{
    AccessNode, ExecNode, LimitNode, ProjectNode, SelectNode, SortNode, UnionNode, UpdateNode,
    ValuesNode,
};
use crate::source::Command;
use crate::sort::{ListComparator, SortMode};
use crate::subquery::SubqueryEvaluator;

/// What a plan node does.
#[derive(Debug, Clone)]
pub enum NodeSpec {
    /// Constant rows.
    Values {
        /// Rows to emit.
        rows: Vec<Row>,
    },
    /// One command against one source.
    Access {
        /// Source to query.
        source_name: String,
        /// Command to submit.
        command: Command,
        /// Connection to route the command through.
        connection_hint: Option<String>,
    },
    /// A command re-issued per window of dependent values.
    DependentAccess {
        /// Source to query.
        source_name: String,
        /// Command whose criteria hold dependent sets.
        command: Command,
    },
    /// Sort and duplicate removal.
    Sort {
        /// What to produce.
        mode: SortMode,
        /// Order.
        comparator: ListComparator,
    },
    /// Join of the two children.
    Join(JoinSpec),
    /// Grouping and aggregation.
    Grouping {
        /// Group expressions.
        group_by: Vec<Expression>,
        /// Aggregates per group.
        aggregates: Vec<AggregateSpec>,
    },
    /// Computed columns.
    Project {
        /// One expression per output column.
        expressions: Vec<Expression>,
        /// Plans of the referenced subqueries.
        subqueries: Vec<Arc<QueryPlan>>,
    },
    /// Row filter.
    Select {
        /// Rows for which this is TRUE pass.
        predicate: Expression,
        /// Plans of the referenced subqueries.
        subqueries: Vec<Arc<QueryPlan>>,
    },
    /// Row window.
    Limit {
        /// Rows to skip.
        offset: usize,
        /// Rows to keep after the offset; `None` keeps all.
        limit: Option<usize>,
    },
    /// Concatenation of all children.
    Union,
    /// Inserts the child's rows.
    Insert {
        /// Source owning the table.
        source_name: String,
        /// Target table.
        table: String,
    },
    /// One self-contained update command.
    Update {
        /// Source owning the table.
        source_name: String,
        /// Command to submit.
        command: Command,
    },
}

impl NodeSpec {
    /// Returns the node kind name, as reported by the execution node.
    pub fn node_type(&self) -> &'static str {
        match self {
            Self::Values { .. } => "Values",
            Self::Access { .. } => "Access",
            Self::DependentAccess { .. } => "DependentAccess",
            Self::Sort { .. } => "Sort",
            Self::Join(_) => "Join",
            Self::Grouping { .. } => "Grouping",
            Self::Project { .. } => "Project",
            Self::Select { .. } => "Select",
            Self::Limit { .. } => "Limit",
            Self::Union => "Union",
            Self::Insert { .. } | Self::Update { .. } => "Update",
        }
    }
}

/// One node of a plan.
#[derive(Debug, Clone)]
pub struct PlanNode {
    /// Identity; also the node's index in the arena.
    pub id: NodeId,
    /// Enclosing node, `None` for the root.
    pub parent: Option<NodeId>,
    /// Inputs, in order.
    pub children: Vec<NodeId>,
    /// Output schema.
    pub schema: Arc<Schema>,
    /// What the node does.
    pub spec: NodeSpec,
    /// Expected output cardinality, when known.
    pub estimated_rows: Option<usize>,
}

/// An immutable, validated plan.
#[derive(Debug, Clone)]
pub struct QueryPlan {
    nodes: Vec<PlanNode>,
    root: NodeId,
}

impl QueryPlan {
    pub(crate) fn from_parts(nodes: Vec<PlanNode>, root: NodeId) -> Self {
        Self { nodes, root }
    }

    /// Returns the root node id.
    pub fn root(&self) -> NodeId {
        self.root
    }

    /// Returns the output schema of the plan.
    pub fn schema(&self) -> &Arc<Schema> {
        &self.nodes[self.root.index()].schema
    }

    /// Returns every node, indexed by id.
    pub fn nodes(&self) -> &[PlanNode] {
        &self.nodes
    }

    /// Looks up a node.
    pub fn node(&self, id: NodeId) -> Option<&PlanNode> {
        self.nodes.get(id.index())
    }

    /// Returns the parent of a node.
    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.node(id).and_then(|n| n.parent)
    }

    /// Returns the nearest join above a node.
    pub fn enclosing_join(&self, id: NodeId) -> Option<NodeId> {
        let mut current = self.parent(id);
        while let Some(node_id) = current {
            let node = self.node(node_id)?;
            if matches!(node.spec, NodeSpec::Join(_)) {
                return Some(node_id);
            }
            current = node.parent;
        }
        None
    }

    /// Builds a fresh execution tree.
    pub fn create_tree(&self, ctx: &Arc<CommandContext>) -> FederaResult<Box<dyn ExecNode>> {
        self.create_node(self.root, ctx)
    }

    fn create_node(&self, id: NodeId, ctx: &Arc<CommandContext>) -> FederaResult<Box<dyn ExecNode>> {
        let node = self
            .node(id)
            .ok_or_else(|| FederaError::invariant(format!("plan has no node {id}")))?;
        let mut children = node
            .children
            .iter()
            .map(|child| self.create_node(*child, ctx))
            .collect::<FederaResult<Vec<_>>>()?;
        let schema = Arc::clone(&node.schema);

        let exec: Box<dyn ExecNode> = match &node.spec {
            NodeSpec::Values { rows } => Box::new(ValuesNode::new(
                id,
                schema,
                rows.clone(),
                ctx.processor_batch_size(),
            )),
            NodeSpec::Access {
                source_name,
                command,
                connection_hint,
            } => {
                let access = AccessNode::new(id, schema, source_name.clone(), command.clone(), ctx);
                match connection_hint {
                    Some(hint) => Box::new(access.with_connection_hint(hint.clone())),
                    None => Box::new(access),
                }
            }
            NodeSpec::DependentAccess {
                source_name,
                command,
            } => Box::new(DependentAccessNode::new(
                id,
                schema,
                source_name.clone(),
                command.clone(),
                ctx,
            )?),
            NodeSpec::Sort { mode, comparator } => {
                Box::new(SortNode::new(id, pop_child(&mut children, id)?, *mode, comparator.clone(), ctx))
            }
            NodeSpec::Join(spec) => {
                let right = pop_child(&mut children, id)?;
                let left = pop_child(&mut children, id)?;
                Box::new(JoinNode::new(id, left, right, spec.clone(), ctx)?)
            }
            NodeSpec::Grouping {
                group_by,
                aggregates,
            } => Box::new(GroupingNode::new(
                id,
                pop_child(&mut children, id)?,
                group_by.clone(),
                aggregates.clone(),
                ctx,
            )?),
            NodeSpec::Project {
                expressions,
                subqueries,
            } => Box::new(ProjectNode::new(
                id,
                schema,
                pop_child(&mut children, id)?,
                expressions.clone(),
                SubqueryEvaluator::new(subqueries.clone(), ctx),
                ctx,
            )),
            NodeSpec::Select {
                predicate,
                subqueries,
            } => Box::new(SelectNode::new(
                id,
                pop_child(&mut children, id)?,
                predicate.clone(),
                SubqueryEvaluator::new(subqueries.clone(), ctx),
                ctx,
            )),
            NodeSpec::Limit { offset, limit } => {
                Box::new(LimitNode::new(id, pop_child(&mut children, id)?, *offset, *limit, ctx))
            }
            NodeSpec::Union => Box::new(UnionNode::new(id, schema, std::mem::take(&mut children), ctx)),
            NodeSpec::Insert { source_name, table } => Box::new(UpdateNode::insert(
                id,
                source_name.clone(),
                table.clone(),
                pop_child(&mut children, id)?,
                ctx,
            )),
            NodeSpec::Update {
                source_name,
                command,
            } => Box::new(UpdateNode::command(id, source_name.clone(), command.clone(), ctx)),
        };
        Ok(exec)
    }

    /// Returns a read-only description of the plan.
    pub fn describe(&self) -> PlanDescription {
        PlanDescription::of(self, self.root)
    }
}

fn pop_child(children: &mut Vec<Box<dyn ExecNode>>, id: NodeId) -> FederaResult<Box<dyn ExecNode>> {
    children
        .pop()
        .ok_or_else(|| FederaError::invalid_plan(id, "missing input"))
}

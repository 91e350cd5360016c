//! Plan construction.

use std::sync::Arc;

use federa_common::error::{FederaError, FederaResult};
use federa_common::types::{DataType, Field, NodeId, Row, Schema};

use super::{NodeSpec, PlanNode, QueryPlan};
use crate::expr::{DependentValues, Expression};
use crate::grouping::{AggregateSpec, GroupingNode};
use crate::join::{JoinNode, JoinSpec};
use crate::node::UpdateNode;
use crate::source::Command;
use crate::sort::{ListComparator, SortKey, SortMode};

/// Assembles a [`QueryPlan`] bottom-up.
///
/// Every method adds one node and returns its id. Node ids are handed
/// out in creation order. Attaching a node as an input records the
/// parent link; a node can have only one parent.
#[derive(Debug, Default)]
pub struct PlanBuilder {
    nodes: Vec<PlanNode>,
}

impl PlanBuilder {
    /// Creates an empty builder.
    pub fn new() -> Self {
        Self::default()
    }

    fn next_id(&self) -> NodeId {
        NodeId::new(u32::try_from(self.nodes.len()).unwrap_or(u32::MAX))
    }

    fn push(&mut self, schema: Arc<Schema>, spec: NodeSpec, estimated_rows: Option<usize>) -> NodeId {
        let id = self.next_id();
        self.nodes.push(PlanNode {
            id,
            parent: None,
            children: Vec::new(),
            schema,
            spec,
            estimated_rows,
        });
        id
    }

    fn node(&self, id: NodeId) -> FederaResult<&PlanNode> {
        self.nodes
            .get(id.index())
            .ok_or_else(|| FederaError::invalid_plan(id, "unknown node"))
    }

    fn schema_of(&self, id: NodeId) -> FederaResult<Arc<Schema>> {
        self.node(id).map(|n| Arc::clone(&n.schema))
    }

    fn rows_of(&self, id: NodeId) -> Option<usize> {
        self.nodes.get(id.index()).and_then(|n| n.estimated_rows)
    }

    /// Adds a node over `inputs`, linking parents.
    fn attach(
        &mut self,
        inputs: &[NodeId],
        schema: Arc<Schema>,
        spec: NodeSpec,
        estimated_rows: Option<usize>,
    ) -> FederaResult<NodeId> {
        for input in inputs {
            let node = self.node(*input)?;
            if let Some(parent) = node.parent {
                return Err(FederaError::invalid_plan(
                    *input,
                    format!("node already has parent {parent}"),
                ));
            }
        }
        let id = self.push(schema, spec, estimated_rows);
        for input in inputs {
            self.nodes[input.index()].parent = Some(id);
        }
        self.nodes[id.index()].children = inputs.to_vec();
        Ok(id)
    }

    fn check_columns(&self, id: NodeId, schema: &Schema, exprs: &[&Expression]) -> FederaResult<()> {
        for expr in exprs {
            if let Some(column) = expr.max_column() {
                if column >= schema.len() {
                    return Err(FederaError::invalid_plan(
                        id,
                        format!("{expr} references column {column} of {}", schema.len()),
                    ));
                }
            }
        }
        Ok(())
    }

    fn check_subqueries(&self, id: NodeId, exprs: &[&Expression], count: usize) -> FederaResult<()> {
        for expr in exprs {
            if let Some(index) = expr.max_subquery() {
                if index >= count {
                    return Err(FederaError::invalid_plan(
                        id,
                        format!("{expr} references subquery {index} of {count}"),
                    ));
                }
            }
        }
        Ok(())
    }

    /// Constant rows.
    pub fn values(&mut self, schema: Arc<Schema>, rows: Vec<Row>) -> NodeId {
        let count = rows.len();
        self.push(schema, NodeSpec::Values { rows }, Some(count))
    }

    /// Submits `command` to `source_name`.
    pub fn access(&mut self, schema: Arc<Schema>, source_name: &str, command: Command) -> NodeId {
        self.push(
            schema,
            NodeSpec::Access {
                source_name: source_name.to_string(),
                command,
                connection_hint: None,
            },
            None,
        )
    }

    /// Routes an access node's command through a specific connection.
    pub fn connection_hint(&mut self, access: NodeId, hint: impl Into<String>) -> FederaResult<()> {
        let node = self
            .nodes
            .get_mut(access.index())
            .ok_or_else(|| FederaError::invalid_plan(access, "unknown node"))?;
        match &mut node.spec {
            NodeSpec::Access { connection_hint, .. } => {
                *connection_hint = Some(hint.into());
                Ok(())
            }
            _ => Err(FederaError::invalid_plan(access, "not an access node")),
        }
    }

    /// Submits `command` once per window of its dependent sets.
    pub fn dependent_access(
        &mut self,
        schema: Arc<Schema>,
        source_name: &str,
        command: Command,
    ) -> FederaResult<NodeId> {
        let id = self.next_id();
        if !command.criteria().is_some_and(Expression::has_dependent_sets) {
            return Err(FederaError::invalid_plan(id, "dependent access without dependent criteria"));
        }
        Ok(self.push(
            schema,
            NodeSpec::DependentAccess {
                source_name: source_name.to_string(),
                command,
            },
            None,
        ))
    }

    /// Sorts or deduplicates `input`.
    pub fn sort(&mut self, input: NodeId, mode: SortMode, comparator: ListComparator) -> FederaResult<NodeId> {
        let schema = self.schema_of(input)?;
        if let Some(key) = comparator.keys().iter().find(|k| k.column >= schema.len()) {
            return Err(FederaError::invalid_plan(
                input,
                format!("sort key {} out of range", key.column),
            ));
        }
        let rows = if mode.is_distinct() { None } else { self.rows_of(input) };
        self.attach(&[input], schema, NodeSpec::Sort { mode, comparator }, rows)
    }

    /// Sorts `input` ascending on `columns`.
    pub fn sort_by_columns(&mut self, input: NodeId, columns: &[usize]) -> FederaResult<NodeId> {
        let keys = columns.iter().map(|c| SortKey::asc(*c)).collect();
        self.sort(input, SortMode::Sort, ListComparator::new(keys))
    }

    /// Removes duplicate rows of `input`, streaming.
    pub fn distinct(&mut self, input: NodeId) -> FederaResult<NodeId> {
        self.sort(input, SortMode::DistinctOnly, ListComparator::default())
    }

    /// Joins `left` and `right`.
    pub fn join(&mut self, left: NodeId, right: NodeId, spec: JoinSpec) -> FederaResult<NodeId> {
        let left_schema = self.schema_of(left)?;
        let right_schema = self.schema_of(right)?;
        let id = self.next_id();
        if spec.left_keys.len() != spec.right_keys.len() {
            return Err(FederaError::invalid_plan(id, "join key lists differ in length"));
        }
        let out_of_range = spec.left_keys.iter().any(|k| *k >= left_schema.len())
            || spec.right_keys.iter().any(|k| *k >= right_schema.len());
        if out_of_range {
            return Err(FederaError::invalid_plan(id, "join key out of range"));
        }
        let schema = JoinNode::output_schema(spec.join_type, &left_schema, &right_schema);
        if let Some(criteria) = &spec.criteria {
            let combined = left_schema.join(&right_schema);
            self.check_columns(id, &combined, &[criteria])?;
        }
        self.attach(&[left, right], schema, NodeSpec::Join(spec), None)
    }

    /// Groups `input` and computes `aggregates` per group.
    pub fn grouping(
        &mut self,
        input: NodeId,
        group_by: Vec<Expression>,
        aggregates: Vec<AggregateSpec>,
    ) -> FederaResult<NodeId> {
        let input_schema = self.schema_of(input)?;
        let id = self.next_id();
        let exprs: Vec<&Expression> = group_by
            .iter()
            .chain(aggregates.iter().filter_map(|a| a.argument.as_ref()))
            .collect();
        self.check_columns(id, &input_schema, &exprs)?;
        let schema = GroupingNode::output_schema(&input_schema, &group_by, &aggregates);
        let rows = if group_by.is_empty() { Some(1) } else { None };
        self.attach(
            &[input],
            schema,
            NodeSpec::Grouping {
                group_by,
                aggregates,
            },
            rows,
        )
    }

    /// Computes one output column per expression.
    pub fn project(
        &mut self,
        input: NodeId,
        expressions: Vec<Expression>,
        subqueries: Vec<QueryPlan>,
    ) -> FederaResult<NodeId> {
        let input_schema = self.schema_of(input)?;
        let id = self.next_id();
        let refs: Vec<&Expression> = expressions.iter().collect();
        self.check_columns(id, &input_schema, &refs)?;
        self.check_subqueries(id, &refs, subqueries.len())?;
        let schema = Arc::new(Schema::new(
            expressions
                .iter()
                .map(|expr| project_field(&input_schema, expr))
                .collect(),
        ));
        let rows = self.rows_of(input);
        self.attach(
            &[input],
            schema,
            NodeSpec::Project {
                expressions,
                subqueries: subqueries.into_iter().map(Arc::new).collect(),
            },
            rows,
        )
    }

    /// Keeps the rows of `input` for which `predicate` is TRUE.
    pub fn select(
        &mut self,
        input: NodeId,
        predicate: Expression,
        subqueries: Vec<QueryPlan>,
    ) -> FederaResult<NodeId> {
        let schema = self.schema_of(input)?;
        let id = self.next_id();
        self.check_columns(id, &schema, &[&predicate])?;
        self.check_subqueries(id, &[&predicate], subqueries.len())?;
        self.attach(
            &[input],
            schema,
            NodeSpec::Select {
                predicate,
                subqueries: subqueries.into_iter().map(Arc::new).collect(),
            },
            None,
        )
    }

    /// Skips `offset` rows of `input`, then keeps at most `limit`.
    pub fn limit(&mut self, input: NodeId, offset: usize, limit: Option<usize>) -> FederaResult<NodeId> {
        let schema = self.schema_of(input)?;
        let rows = match (self.rows_of(input), limit) {
            (Some(rows), Some(limit)) => Some(rows.saturating_sub(offset).min(limit)),
            (Some(rows), None) => Some(rows.saturating_sub(offset)),
            (None, limit) => limit,
        };
        self.attach(&[input], schema, NodeSpec::Limit { offset, limit }, rows)
    }

    /// Concatenates `inputs`, which must have the same arity.
    pub fn union(&mut self, inputs: Vec<NodeId>) -> FederaResult<NodeId> {
        let id = self.next_id();
        let first = inputs
            .first()
            .ok_or_else(|| FederaError::invalid_plan(id, "union without inputs"))?;
        let schema = self.schema_of(*first)?;
        let mut rows = Some(0usize);
        for input in &inputs {
            let other = self.schema_of(*input)?;
            if other.len() != schema.len() {
                return Err(FederaError::invalid_plan(
                    *input,
                    format!("union input has {} columns, expected {}", other.len(), schema.len()),
                ));
            }
            rows = rows.zip(self.rows_of(*input)).map(|(a, b)| a + b);
        }
        self.attach(&inputs, Arc::new(schema.to_nullable()), NodeSpec::Union, rows)
    }

    /// Inserts every row of `input` into `table`.
    pub fn insert(&mut self, input: NodeId, source_name: &str, table: &str) -> FederaResult<NodeId> {
        self.node(input)?;
        self.attach(
            &[input],
            UpdateNode::count_schema(),
            NodeSpec::Insert {
                source_name: source_name.to_string(),
                table: table.to_string(),
            },
            Some(1),
        )
    }

    /// Submits one update command.
    pub fn update(&mut self, source_name: &str, command: Command) -> FederaResult<NodeId> {
        let id = self.next_id();
        if !command.is_update() {
            return Err(FederaError::invalid_plan(id, format!("{command} is not an update")));
        }
        Ok(self.push(
            UpdateNode::count_schema(),
            NodeSpec::Update {
                source_name: source_name.to_string(),
                command,
            },
            Some(1),
        ))
    }

    /// Records an expected cardinality for a node.
    pub fn estimate(&mut self, id: NodeId, rows: usize) -> FederaResult<()> {
        let node = self
            .nodes
            .get_mut(id.index())
            .ok_or_else(|| FederaError::invalid_plan(id, "unknown node"))?;
        node.estimated_rows = Some(rows);
        Ok(())
    }

    /// Validates the plan rooted at `root` and freezes it.
    ///
    /// Every node must be reachable from the root, and every dependent
    /// access reading published rows must sit under the right input of a
    /// dependent join that publishes them.
    pub fn build(self, root: NodeId) -> FederaResult<QueryPlan> {
        let root_node = self.node(root)?;
        if let Some(parent) = root_node.parent {
            return Err(FederaError::invalid_plan(
                root,
                format!("root has parent {parent}"),
            ));
        }
        if let Some(orphan) = self
            .nodes
            .iter()
            .find(|n| n.id != root && n.parent.is_none())
        {
            return Err(FederaError::invalid_plan(orphan.id, "node is not part of the plan"));
        }
        for node in &self.nodes {
            if let NodeSpec::DependentAccess { command, .. } = &node.spec {
                self.check_dependent_sources(node.id, command)?;
            }
        }
        Ok(QueryPlan::from_parts(self.nodes, root))
    }

    fn check_dependent_sources(&self, id: NodeId, command: &Command) -> FederaResult<()> {
        let Some(criteria) = command.criteria() else {
            return Ok(());
        };
        for (_, values) in criteria.dependent_sets() {
            let DependentValues::Tuples { source, column } = values else {
                continue;
            };
            let join = self.publishing_join(id, source).ok_or_else(|| {
                FederaError::invalid_plan(
                    id,
                    format!("no enclosing dependent join publishes {source}"),
                )
            })?;
            let published = self.schema_of(self.nodes[join.index()].children[0])?;
            if *column >= published.len() {
                return Err(FederaError::invalid_plan(
                    id,
                    format!("{source} has no column {column}"),
                ));
            }
        }
        Ok(())
    }

    /// Finds the dependent join publishing `source` whose right input
    /// contains `id`.
    fn publishing_join(&self, id: NodeId, source: &str) -> Option<NodeId> {
        let mut child = id;
        let mut current = self.nodes.get(id.index())?.parent;
        while let Some(parent_id) = current {
            let parent = self.nodes.get(parent_id.index())?;
            if let NodeSpec::Join(spec) = &parent.spec {
                let from_right = parent.children.get(1) == Some(&child);
                if from_right && spec.dependent_source.as_deref() == Some(source) {
                    return Some(parent_id);
                }
            }
            child = parent_id;
            current = parent.parent;
        }
        None
    }
}

fn project_field(input: &Schema, expr: &Expression) -> Field {
    match expr {
        Expression::Column(c) => input
            .field(*c)
            .cloned()
            .unwrap_or_else(|| Field::nullable(expr.to_string(), DataType::String)),
        _ => Field::nullable(expr.to_string(), expr.data_type(input)),
    }
}

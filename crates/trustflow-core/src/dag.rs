//! Operator DAG: one node per relational operator, one output relation per node.
//!
//! The front-end builds the graph through `DagBuilder`; `build()` hands out an
//! immutable `Dag` that the partitioner and the code generators only read.
//! Parents are referenced by id of previously added nodes, so the graph is
//! acyclic by construction.

use std::collections::{BTreeSet, HashMap};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::id::{NodeId, PartyId};
use crate::schema::{Column, DataType, Relation};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Aggregator {
    Sum,
    Count,
    Mean,
    Min,
    Max,
}

impl Aggregator {
    pub fn symbol(self) -> &'static str {
        match self {
            Aggregator::Sum => "+",
            Aggregator::Count => "count",
            Aggregator::Mean => "mean",
            Aggregator::Min => "min",
            Aggregator::Max => "max",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Comparator {
    #[serde(rename = "==")]
    Eq,
    #[serde(rename = "!=")]
    NotEq,
    #[serde(rename = "<")]
    Lt,
    #[serde(rename = "<=")]
    LtEq,
    #[serde(rename = ">")]
    Gt,
    #[serde(rename = ">=")]
    GtEq,
}

impl Comparator {
    pub fn symbol(self) -> &'static str {
        match self {
            Comparator::Eq => "==",
            Comparator::NotEq => "!=",
            Comparator::Lt => "<",
            Comparator::LtEq => "<=",
            Comparator::Gt => ">",
            Comparator::GtEq => ">=",
        }
    }
}

/// Arithmetic / predicate operand: a column reference or an integer literal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Operand {
    Scalar(i64),
    Column(String),
}

impl std::fmt::Display for Operand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Operand::Scalar(v) => write!(f, "{v}"),
            Operand::Column(c) => write!(f, "{c}"),
        }
    }
}

/// The closed set of operator kinds with their key parameters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Op {
    Create,
    /// Entry into a new representation (inserted at partition boundaries).
    Open,
    /// Exit from the current representation.
    Close,
    Aggregate {
        group_cols: Vec<String>,
        agg_col: String,
        aggregator: Aggregator,
        out_col: String,
    },
    /// Aggregate driven by a precomputed index relation (second parent).
    IndexAggregate {
        group_cols: Vec<String>,
        agg_col: String,
        aggregator: Aggregator,
        out_col: String,
    },
    Join {
        left_cols: Vec<String>,
        right_cols: Vec<String>,
    },
    /// Join driven by a precomputed index relation (third parent).
    IndexJoin {
        left_cols: Vec<String>,
        right_cols: Vec<String>,
    },
    Filter {
        column: String,
        comparator: Comparator,
        operand: Operand,
    },
    /// Keep rows whose `column` appears (or not) in the second parent.
    FilterBy {
        column: String,
        negate: bool,
    },
    /// Join where `host` learns the key columns in the clear.
    PubJoin {
        left_cols: Vec<String>,
        right_cols: Vec<String>,
        host: PartyId,
    },
    PubIntersect {
        column: String,
        host: PartyId,
    },
    Index {
        idx_col: String,
    },
    ConcatCols,
    Multiply {
        target_col: String,
        operands: Vec<Operand>,
    },
    Divide {
        target_col: String,
        operands: Vec<Operand>,
    },
    Persist,
    Project {
        columns: Vec<String>,
    },
    DistinctCount {
        column: String,
        out_col: String,
    },
    Shuffle,
    /// Reveal the input to the parties in the output relation's `stored_with`.
    Store,
    Union {
        left_col: String,
        right_col: String,
    },
    Distinct {
        columns: Vec<String>,
    },
    Concat,
}

/// Field-less mirror of `Op`, used by capability tables.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OpTag {
    Create,
    Open,
    Close,
    Aggregate,
    IndexAggregate,
    Join,
    IndexJoin,
    Filter,
    FilterBy,
    PubJoin,
    PubIntersect,
    Index,
    ConcatCols,
    Multiply,
    Divide,
    Persist,
    Project,
    DistinctCount,
    Shuffle,
    Store,
    Union,
    Distinct,
    Concat,
}

impl OpTag {
    pub const ALL: [OpTag; 23] = [
        OpTag::Create,
        OpTag::Open,
        OpTag::Close,
        OpTag::Aggregate,
        OpTag::IndexAggregate,
        OpTag::Join,
        OpTag::IndexJoin,
        OpTag::Filter,
        OpTag::FilterBy,
        OpTag::PubJoin,
        OpTag::PubIntersect,
        OpTag::Index,
        OpTag::ConcatCols,
        OpTag::Multiply,
        OpTag::Divide,
        OpTag::Persist,
        OpTag::Project,
        OpTag::DistinctCount,
        OpTag::Shuffle,
        OpTag::Store,
        OpTag::Union,
        OpTag::Distinct,
        OpTag::Concat,
    ];
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Arity {
    Exactly(usize),
    AtLeast(usize),
}

impl Arity {
    fn admits(self, n: usize) -> bool {
        match self {
            Arity::Exactly(k) => n == k,
            Arity::AtLeast(k) => n >= k,
        }
    }
}

impl Op {
    pub fn tag(&self) -> OpTag {
        match self {
            Op::Create => OpTag::Create,
            Op::Open => OpTag::Open,
            Op::Close => OpTag::Close,
            Op::Aggregate { .. } => OpTag::Aggregate,
            Op::IndexAggregate { .. } => OpTag::IndexAggregate,
            Op::Join { .. } => OpTag::Join,
            Op::IndexJoin { .. } => OpTag::IndexJoin,
            Op::Filter { .. } => OpTag::Filter,
            Op::FilterBy { .. } => OpTag::FilterBy,
            Op::PubJoin { .. } => OpTag::PubJoin,
            Op::PubIntersect { .. } => OpTag::PubIntersect,
            Op::Index { .. } => OpTag::Index,
            Op::ConcatCols => OpTag::ConcatCols,
            Op::Multiply { .. } => OpTag::Multiply,
            Op::Divide { .. } => OpTag::Divide,
            Op::Persist => OpTag::Persist,
            Op::Project { .. } => OpTag::Project,
            Op::DistinctCount { .. } => OpTag::DistinctCount,
            Op::Shuffle => OpTag::Shuffle,
            Op::Store => OpTag::Store,
            Op::Union { .. } => OpTag::Union,
            Op::Distinct { .. } => OpTag::Distinct,
            Op::Concat => OpTag::Concat,
        }
    }

    /// Number of parents this operator accepts.
    pub fn arity(&self) -> Arity {
        use Op::*;
        match self {
            Create => Arity::Exactly(0),
            Open | Close | Aggregate { .. } | Filter { .. } | Index { .. } | Multiply { .. }
            | Divide { .. } | Persist | Project { .. } | DistinctCount { .. } | Shuffle
            | Store | Distinct { .. } => Arity::Exactly(1),
            IndexAggregate { .. } | Join { .. } | FilterBy { .. } | PubJoin { .. }
            | PubIntersect { .. } | Union { .. } => Arity::Exactly(2),
            IndexJoin { .. } => Arity::Exactly(3),
            ConcatCols | Concat => Arity::AtLeast(2),
        }
    }

    /// Operators that need a cryptographic backend regardless of who holds the data.
    pub fn requires_crypto(&self) -> bool {
        matches!(self, Op::PubJoin { .. } | Op::PubIntersect { .. })
    }

    /// Operators that explicitly hand a result to named parties.
    pub fn is_release(&self) -> bool {
        matches!(self, Op::Store | Op::Persist)
    }

    /// Terminal operators may not feed other nodes.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Op::Store | Op::Persist)
    }

    /// Short upper-case label used by renderers.
    pub fn label(&self) -> &'static str {
        match self {
            Op::Create => "CREATE",
            Op::Open => "OPEN",
            Op::Close => "CLOSE",
            Op::Aggregate { .. } => "AGG",
            Op::IndexAggregate { .. } => "IDX_AGG",
            Op::Join { .. } => "JOIN",
            Op::IndexJoin { .. } => "IDX_JOIN",
            Op::Filter { .. } => "FILTER",
            Op::FilterBy { .. } => "FILTER_BY",
            Op::PubJoin { .. } => "PUB_JOIN",
            Op::PubIntersect { .. } => "PUB_INTERSECT",
            Op::Index { .. } => "INDEX",
            Op::ConcatCols => "CONCAT_COLS",
            Op::Multiply { .. } => "MUL",
            Op::Divide { .. } => "DIV",
            Op::Persist => "PERSIST",
            Op::Project { .. } => "PROJECT",
            Op::DistinctCount { .. } => "DISTINCT_COUNT",
            Op::Shuffle => "SHUFFLE",
            Op::Store => "STORE",
            Op::Union { .. } => "UNION",
            Op::Distinct { .. } => "DISTINCT",
            Op::Concat => "CONCAT",
        }
    }

    /// Key parameters as display pairs.
    pub fn params(&self) -> Vec<(String, String)> {
        fn list(cols: &[String]) -> String {
            cols.join(", ")
        }
        fn operands(ops: &[Operand], sep: &str) -> String {
            ops.iter()
                .map(|o| o.to_string())
                .collect::<Vec<_>>()
                .join(sep)
        }
        let kv = |k: &str, v: String| (k.to_string(), v);
        match self {
            Op::Create
            | Op::Open
            | Op::Close
            | Op::ConcatCols
            | Op::Persist
            | Op::Shuffle
            | Op::Store
            | Op::Concat => vec![],
            Op::Aggregate {
                group_cols,
                agg_col,
                aggregator,
                out_col,
            }
            | Op::IndexAggregate {
                group_cols,
                agg_col,
                aggregator,
                out_col,
            } => vec![
                kv("group", list(group_cols)),
                kv(
                    "agg",
                    format!("{out_col}: {}({agg_col})", aggregator.symbol()),
                ),
            ],
            Op::Join {
                left_cols,
                right_cols,
            }
            | Op::IndexJoin {
                left_cols,
                right_cols,
            } => vec![kv("on", format!("{} = {}", list(left_cols), list(right_cols)))],
            Op::PubJoin {
                left_cols,
                right_cols,
                host,
            } => vec![
                kv("on", format!("{} = {}", list(left_cols), list(right_cols))),
                kv("host", host.to_string()),
            ],
            Op::Filter {
                column,
                comparator,
                operand,
            } => vec![kv(
                "predicate",
                format!("{column} {} {operand}", comparator.symbol()),
            )],
            Op::FilterBy { column, negate } => vec![
                kv("column", column.clone()),
                kv("mode", if *negate { "not in" } else { "in" }.to_string()),
            ],
            Op::PubIntersect { column, host } => {
                vec![kv("column", column.clone()), kv("host", host.to_string())]
            }
            Op::Index { idx_col } => vec![kv("index", idx_col.clone())],
            Op::Multiply {
                target_col,
                operands: ops,
            } => vec![kv(target_col, operands(ops, " * "))],
            Op::Divide {
                target_col,
                operands: ops,
            } => vec![kv(target_col, operands(ops, " / "))],
            Op::Project { columns } | Op::Distinct { columns } => {
                vec![kv("columns", list(columns))]
            }
            Op::DistinctCount { column, out_col } => {
                vec![kv(out_col, format!("count(distinct {column})"))]
            }
            Op::Union {
                left_col,
                right_col,
            } => vec![kv("columns", format!("{left_col} / {right_col}"))],
        }
    }
}

/// Read-only view of a node for renderers and code generators.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OpSummary {
    pub relation: String,
    pub kind: &'static str,
    pub params: Vec<(String, String)>,
    pub is_mpc: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct OpNode {
    id: NodeId,
    op: Op,
    out_rel: Relation,
    parents: Vec<NodeId>,
    children: BTreeSet<NodeId>,
}

impl OpNode {
    pub fn id(&self) -> NodeId {
        self.id
    }

    pub fn op(&self) -> &Op {
        &self.op
    }

    pub fn out_rel(&self) -> &Relation {
        &self.out_rel
    }

    pub fn name(&self) -> &str {
        &self.out_rel.name
    }

    /// Inputs, in operator order (left before right).
    pub fn parents(&self) -> &[NodeId] {
        &self.parents
    }

    pub fn children(&self) -> &BTreeSet<NodeId> {
        &self.children
    }

    /// True when the output must be secret-shared, or the operator itself
    /// needs cryptographic computation.
    pub fn is_mpc(&self) -> bool {
        self.out_rel.is_shared() || self.op.requires_crypto()
    }

    pub fn summary(&self) -> OpSummary {
        OpSummary {
            relation: self.out_rel.name.clone(),
            kind: self.op.label(),
            params: self.op.params(),
            is_mpc: self.is_mpc(),
        }
    }
}

/// Immutable operator graph.
#[derive(Debug, Clone, Serialize)]
pub struct Dag {
    nodes: Vec<OpNode>,
}

impl Dag {
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn node(&self, id: NodeId) -> Option<&OpNode> {
        self.nodes.get(id.index())
    }

    pub fn nodes(&self) -> impl Iterator<Item = &OpNode> {
        self.nodes.iter()
    }

    pub fn by_name(&self, relation: &str) -> Option<&OpNode> {
        self.nodes.iter().find(|n| n.out_rel.name == relation)
    }

    /// Nodes without parents (the workflow inputs).
    pub fn roots(&self) -> impl Iterator<Item = &OpNode> {
        self.nodes.iter().filter(|n| n.parents.is_empty())
    }

    /// Deterministic topological order: parents strictly before children,
    /// ties among ready nodes broken by lowest id.
    pub fn topo_sort(&self) -> Vec<NodeId> {
        self.topo_sort_by(|ready, _| ready.iter().next().copied())
    }

    /// Kahn's algorithm with a caller-supplied choice among ready nodes.
    ///
    /// `pick` receives the ready set and the order produced so far and must
    /// return a member of the ready set; returning `None` or a node that is
    /// not ready falls back to the lowest ready id.
    pub fn topo_sort_by<F>(&self, mut pick: F) -> Vec<NodeId>
    where
        F: FnMut(&BTreeSet<NodeId>, &[NodeId]) -> Option<NodeId>,
    {
        let mut pending: Vec<usize> = self.nodes.iter().map(|n| n.parents.len()).collect();
        let mut ready: BTreeSet<NodeId> = self.roots().map(|n| n.id).collect();
        let mut order = Vec::with_capacity(self.nodes.len());

        while let Some(&lowest) = ready.iter().next() {
            let next = pick(&ready, &order)
                .filter(|id| ready.contains(id))
                .unwrap_or(lowest);
            ready.remove(&next);
            order.push(next);
            for child in &self.nodes[next.index()].children {
                // A parent listed twice counts twice.
                let times = self.nodes[child.index()]
                    .parents
                    .iter()
                    .filter(|p| **p == next)
                    .count();
                let slot = &mut pending[child.index()];
                *slot -= times;
                if *slot == 0 {
                    ready.insert(*child);
                }
            }
        }

        order
    }

    /// All (parent, child) edges, in topological order of the parent.
    pub fn edges(&self) -> Vec<(NodeId, NodeId)> {
        self.topo_sort()
            .into_iter()
            .flat_map(|id| {
                self.nodes[id.index()]
                    .children
                    .iter()
                    .map(move |c| (id, *c))
            })
            .collect()
    }
}

/// The only mutating surface of the DAG; used by front-ends.
#[derive(Debug, Default)]
pub struct DagBuilder {
    nodes: Vec<OpNode>,
    names: HashMap<String, NodeId>,
}

impl DagBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lookup(&self, relation: &str) -> Result<NodeId> {
        self.names
            .get(relation)
            .copied()
            .ok_or_else(|| Error::UnknownRelation(relation.to_string()))
    }

    pub fn relation(&self, id: NodeId) -> Result<&Relation> {
        self.nodes
            .get(id.index())
            .map(|n| &n.out_rel)
            .ok_or_else(|| Error::UnknownRelation(id.to_string()))
    }

    /// Add a node with an explicit output relation.
    pub fn add(&mut self, op: Op, out_rel: Relation, parents: &[NodeId]) -> Result<NodeId> {
        let name = out_rel.name.clone();
        if self.names.contains_key(&name) {
            return Err(Error::invalid(&name, "relation name already in use"));
        }
        if !op.arity().admits(parents.len()) {
            return Err(Error::invalid(
                &name,
                format!(
                    "{} expects {:?} inputs, got {}",
                    op.label(),
                    op.arity(),
                    parents.len()
                ),
            ));
        }
        if matches!(op, Op::Create) && out_rel.stored_with.is_empty() {
            return Err(Error::invalid(&name, "input relation has no owner"));
        }
        for p in parents {
            let parent = self
                .nodes
                .get(p.index())
                .ok_or_else(|| Error::invalid(&name, format!("unknown parent {p}")))?;
            if parent.op.is_terminal() {
                return Err(Error::invalid(
                    &name,
                    format!("'{}' is terminal and cannot have consumers", parent.name()),
                ));
            }
        }

        let id = NodeId::new(self.nodes.len() as u64);
        for p in parents {
            self.nodes[p.index()].children.insert(id);
        }
        self.nodes.push(OpNode {
            id,
            op,
            out_rel,
            parents: parents.to_vec(),
            children: BTreeSet::new(),
        });
        self.names.insert(name, id);
        Ok(id)
    }

    /// Freeze the graph after re-checking the structural invariants.
    pub fn build(self) -> Result<Dag> {
        for node in &self.nodes {
            if matches!(node.op, Op::Create) != node.parents.is_empty() {
                return Err(Error::invalid(
                    node.name(),
                    "only input relations may be parentless",
                ));
            }
            if node.op.is_terminal() && !node.children.is_empty() {
                return Err(Error::invalid(node.name(), "terminal node has consumers"));
            }
        }
        let dag = Dag { nodes: self.nodes };
        if dag.topo_sort().len() != dag.len() {
            return Err(Error::invalid("<dag>", "cycle detected"));
        }
        Ok(dag)
    }

    // --- derived-relation helpers ---

    pub fn create(
        &mut self,
        name: &str,
        columns: Vec<Column>,
        stored_with: impl IntoIterator<Item = PartyId>,
    ) -> Result<NodeId> {
        self.add(Op::Create, Relation::new(name, columns, stored_with), &[])
    }

    pub fn aggregate(
        &mut self,
        input: NodeId,
        name: &str,
        group_cols: &[&str],
        agg_col: &str,
        aggregator: Aggregator,
        out_col: &str,
    ) -> Result<NodeId> {
        let rel = self.aggregate_rel(input, name, group_cols, agg_col, aggregator, out_col)?;
        let op = Op::Aggregate {
            group_cols: owned(group_cols),
            agg_col: agg_col.to_string(),
            aggregator,
            out_col: out_col.to_string(),
        };
        self.add(op, rel, &[input])
    }

    pub fn index_aggregate(
        &mut self,
        input: NodeId,
        index: NodeId,
        name: &str,
        group_cols: &[&str],
        agg_col: &str,
        aggregator: Aggregator,
        out_col: &str,
    ) -> Result<NodeId> {
        let mut rel = self.aggregate_rel(input, name, group_cols, agg_col, aggregator, out_col)?;
        rel.stored_with = self.union_owners(&[input, index])?;
        let op = Op::IndexAggregate {
            group_cols: owned(group_cols),
            agg_col: agg_col.to_string(),
            aggregator,
            out_col: out_col.to_string(),
        };
        self.add(op, rel, &[input, index])
    }

    pub fn join(
        &mut self,
        left: NodeId,
        right: NodeId,
        name: &str,
        left_cols: &[&str],
        right_cols: &[&str],
    ) -> Result<NodeId> {
        let rel = self.join_rel(left, right, name, left_cols, right_cols)?;
        let op = Op::Join {
            left_cols: owned(left_cols),
            right_cols: owned(right_cols),
        };
        self.add(op, rel, &[left, right])
    }

    pub fn index_join(
        &mut self,
        left: NodeId,
        right: NodeId,
        index: NodeId,
        name: &str,
        left_cols: &[&str],
        right_cols: &[&str],
    ) -> Result<NodeId> {
        let mut rel = self.join_rel(left, right, name, left_cols, right_cols)?;
        rel.stored_with = self.union_owners(&[left, right, index])?;
        let op = Op::IndexJoin {
            left_cols: owned(left_cols),
            right_cols: owned(right_cols),
        };
        self.add(op, rel, &[left, right, index])
    }

    pub fn pub_join(
        &mut self,
        left: NodeId,
        right: NodeId,
        name: &str,
        left_cols: &[&str],
        right_cols: &[&str],
        host: PartyId,
    ) -> Result<NodeId> {
        let rel = self.join_rel(left, right, name, left_cols, right_cols)?;
        let op = Op::PubJoin {
            left_cols: owned(left_cols),
            right_cols: owned(right_cols),
            host,
        };
        self.add(op, rel, &[left, right])
    }

    pub fn pub_intersect(
        &mut self,
        left: NodeId,
        right: NodeId,
        name: &str,
        column: &str,
        host: PartyId,
    ) -> Result<NodeId> {
        let col = self.require_column(left, column, name)?.clone();
        self.require_column(right, column, name)?;
        let rel = Relation::new(name, vec![col], self.union_owners(&[left, right])?);
        let op = Op::PubIntersect {
            column: column.to_string(),
            host,
        };
        self.add(op, rel, &[left, right])
    }

    pub fn filter(
        &mut self,
        input: NodeId,
        name: &str,
        column: &str,
        comparator: Comparator,
        operand: Operand,
    ) -> Result<NodeId> {
        self.require_column(input, column, name)?;
        if let Operand::Column(other) = &operand {
            self.require_column(input, other, name)?;
        }
        let rel = self.same_shape(input, name)?;
        let op = Op::Filter {
            column: column.to_string(),
            comparator,
            operand,
        };
        self.add(op, rel, &[input])
    }

    pub fn filter_by(
        &mut self,
        input: NodeId,
        by: NodeId,
        name: &str,
        column: &str,
        negate: bool,
    ) -> Result<NodeId> {
        self.require_column(input, column, name)?;
        let mut rel = self.same_shape(input, name)?;
        rel.stored_with = self.union_owners(&[input, by])?;
        let op = Op::FilterBy {
            column: column.to_string(),
            negate,
        };
        self.add(op, rel, &[input, by])
    }

    pub fn index(&mut self, input: NodeId, name: &str, idx_col: &str) -> Result<NodeId> {
        let parent = self.relation(input)?.clone();
        let mut columns = vec![Column::new(idx_col, DataType::Int64, parent.visibility())];
        columns.extend(parent.columns);
        let rel = Relation::new(name, columns, parent.stored_with);
        let op = Op::Index {
            idx_col: idx_col.to_string(),
        };
        self.add(op, rel, &[input])
    }

    pub fn concat_cols(&mut self, inputs: &[NodeId], name: &str) -> Result<NodeId> {
        let mut columns = Vec::new();
        for id in inputs {
            columns.extend(self.relation(*id)?.columns.iter().cloned());
        }
        let rel = Relation::new(name, columns, self.union_owners(inputs)?);
        self.add(Op::ConcatCols, rel, inputs)
    }

    pub fn multiply(
        &mut self,
        input: NodeId,
        name: &str,
        target_col: &str,
        operands: Vec<Operand>,
    ) -> Result<NodeId> {
        let rel = self.arithmetic_rel(input, name, target_col, &operands, DataType::Int64)?;
        let op = Op::Multiply {
            target_col: target_col.to_string(),
            operands,
        };
        self.add(op, rel, &[input])
    }

    pub fn divide(
        &mut self,
        input: NodeId,
        name: &str,
        target_col: &str,
        operands: Vec<Operand>,
    ) -> Result<NodeId> {
        let rel = self.arithmetic_rel(input, name, target_col, &operands, DataType::Float64)?;
        let op = Op::Divide {
            target_col: target_col.to_string(),
            operands,
        };
        self.add(op, rel, &[input])
    }

    pub fn persist(&mut self, input: NodeId, name: &str) -> Result<NodeId> {
        let rel = self.same_shape(input, name)?;
        self.add(Op::Persist, rel, &[input])
    }

    pub fn project(&mut self, input: NodeId, name: &str, columns: &[&str]) -> Result<NodeId> {
        let picked = columns
            .iter()
            .map(|c| self.require_column(input, c, name).cloned())
            .collect::<Result<Vec<_>>>()?;
        let rel = Relation::new(name, picked, self.relation(input)?.stored_with.clone());
        let op = Op::Project {
            columns: owned(columns),
        };
        self.add(op, rel, &[input])
    }

    pub fn distinct(&mut self, input: NodeId, name: &str, columns: &[&str]) -> Result<NodeId> {
        let picked = columns
            .iter()
            .map(|c| self.require_column(input, c, name).cloned())
            .collect::<Result<Vec<_>>>()?;
        let rel = Relation::new(name, picked, self.relation(input)?.stored_with.clone());
        let op = Op::Distinct {
            columns: owned(columns),
        };
        self.add(op, rel, &[input])
    }

    pub fn distinct_count(
        &mut self,
        input: NodeId,
        name: &str,
        column: &str,
        out_col: &str,
    ) -> Result<NodeId> {
        let trust = self.require_column(input, column, name)?.trust.clone();
        let rel = Relation::new(
            name,
            vec![Column::new(out_col, DataType::Int64, trust)],
            self.relation(input)?.stored_with.clone(),
        );
        let op = Op::DistinctCount {
            column: column.to_string(),
            out_col: out_col.to_string(),
        };
        self.add(op, rel, &[input])
    }

    pub fn shuffle(&mut self, input: NodeId, name: &str) -> Result<NodeId> {
        let rel = self.same_shape(input, name)?;
        self.add(Op::Shuffle, rel, &[input])
    }

    /// Reveal `input` to `recipients`, who become its only holders.
    pub fn store(
        &mut self,
        input: NodeId,
        name: &str,
        recipients: impl IntoIterator<Item = PartyId>,
    ) -> Result<NodeId> {
        let recipients: BTreeSet<PartyId> = recipients.into_iter().collect();
        if recipients.is_empty() {
            return Err(Error::invalid(name, "store without recipients"));
        }
        let mut rel = self.same_shape(input, name)?;
        rel.stored_with = recipients.clone();
        rel.visible_to = Some(recipients);
        self.add(Op::Store, rel, &[input])
    }

    pub fn union(
        &mut self,
        left: NodeId,
        right: NodeId,
        name: &str,
        left_col: &str,
        right_col: &str,
    ) -> Result<NodeId> {
        let l = self.require_column(left, left_col, name)?.clone();
        let r = self.require_column(right, right_col, name)?;
        let column = Column {
            trust: l.trust.intersection(&r.trust).copied().collect(),
            ..l
        };
        let rel = Relation::new(name, vec![column], self.union_owners(&[left, right])?);
        let op = Op::Union {
            left_col: left_col.to_string(),
            right_col: right_col.to_string(),
        };
        self.add(op, rel, &[left, right])
    }

    /// Row-wise concatenation; inputs must have the same number of columns.
    pub fn concat(&mut self, inputs: &[NodeId], name: &str) -> Result<NodeId> {
        let first = match inputs.first() {
            Some(id) => self.relation(*id)?.clone(),
            None => return Err(Error::invalid(name, "concat without inputs")),
        };
        let mut columns = first.columns;
        for id in &inputs[1..] {
            let other = self.relation(*id)?;
            if other.columns.len() != columns.len() {
                return Err(Error::invalid(
                    name,
                    format!("'{}' has a different number of columns", other.name),
                ));
            }
            for (col, theirs) in columns.iter_mut().zip(&other.columns) {
                col.trust = col.trust.intersection(&theirs.trust).copied().collect();
            }
        }
        let rel = Relation::new(name, columns, self.union_owners(inputs)?);
        self.add(Op::Concat, rel, inputs)
    }

    // --- internals ---

    fn require_column(&self, input: NodeId, column: &str, at: &str) -> Result<&Column> {
        let rel = self.relation(input)?;
        rel.column(column).ok_or_else(|| {
            Error::invalid(at, format!("'{}' has no column '{column}'", rel.name))
        })
    }

    fn union_owners(&self, inputs: &[NodeId]) -> Result<BTreeSet<PartyId>> {
        let mut owners = BTreeSet::new();
        for id in inputs {
            owners.extend(self.relation(*id)?.stored_with.iter().copied());
        }
        Ok(owners)
    }

    fn same_shape(&self, input: NodeId, name: &str) -> Result<Relation> {
        let parent = self.relation(input)?;
        Ok(Relation::new(
            name,
            parent.columns.clone(),
            parent.stored_with.clone(),
        ))
    }

    fn aggregate_rel(
        &self,
        input: NodeId,
        name: &str,
        group_cols: &[&str],
        agg_col: &str,
        aggregator: Aggregator,
        out_col: &str,
    ) -> Result<Relation> {
        let mut columns = group_cols
            .iter()
            .map(|c| self.require_column(input, c, name).cloned())
            .collect::<Result<Vec<_>>>()?;
        let agg = self.require_column(input, agg_col, name)?;
        let data_type = match aggregator {
            Aggregator::Count => DataType::Int64,
            Aggregator::Mean => DataType::Float64,
            _ => agg.data_type,
        };
        columns.push(Column::new(out_col, data_type, agg.trust.iter().copied()));
        Ok(Relation::new(
            name,
            columns,
            self.relation(input)?.stored_with.clone(),
        ))
    }

    fn join_rel(
        &self,
        left: NodeId,
        right: NodeId,
        name: &str,
        left_cols: &[&str],
        right_cols: &[&str],
    ) -> Result<Relation> {
        if left_cols.len() != right_cols.len() || left_cols.is_empty() {
            return Err(Error::invalid(name, "join key lists must be non-empty and aligned"));
        }
        let l = self.relation(left)?;
        let r = self.relation(right)?;
        let mut columns = Vec::new();
        for (lc, rc) in left_cols.iter().zip(right_cols) {
            let lcol = self.require_column(left, lc, name)?;
            let rcol = self.require_column(right, rc, name)?;
            columns.push(Column {
                trust: lcol.trust.intersection(&rcol.trust).copied().collect(),
                ..lcol.clone()
            });
        }
        columns.extend(
            l.columns
                .iter()
                .filter(|c| !left_cols.contains(&c.name.as_str()))
                .cloned(),
        );
        columns.extend(
            r.columns
                .iter()
                .filter(|c| !right_cols.contains(&c.name.as_str()))
                .cloned(),
        );
        Ok(Relation::new(name, columns, self.union_owners(&[left, right])?))
    }

    fn arithmetic_rel(
        &self,
        input: NodeId,
        name: &str,
        target_col: &str,
        operands: &[Operand],
        data_type: DataType,
    ) -> Result<Relation> {
        if operands.is_empty() {
            return Err(Error::invalid(name, "arithmetic without operands"));
        }
        let mut trust: Option<BTreeSet<PartyId>> = None;
        for operand in operands {
            if let Operand::Column(c) = operand {
                let col = self.require_column(input, c, name)?;
                trust = Some(match trust {
                    None => col.trust.clone(),
                    Some(t) => t.intersection(&col.trust).copied().collect(),
                });
            }
        }
        let parent = self.relation(input)?;
        let trust = trust.unwrap_or_else(|| parent.visibility());
        let mut columns = parent.columns.clone();
        match columns.iter_mut().find(|c| c.name == target_col) {
            Some(col) => {
                col.trust = trust;
                col.data_type = data_type;
            }
            None => columns.push(Column::new(target_col, data_type, trust)),
        }
        Ok(Relation::new(name, columns, parent.stored_with.clone()))
    }
}

fn owned(cols: &[&str]) -> Vec<String> {
    cols.iter().map(|c| c.to_string()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn p(v: u64) -> PartyId {
        PartyId::new(v)
    }

    fn cols(party: u64) -> Vec<Column> {
        vec![
            Column::new("a", DataType::Int64, [p(party)]),
            Column::new("b", DataType::Int64, [p(party)]),
        ]
    }

    #[test]
    fn topo_sort_is_stable_and_parent_first() {
        let mut b = DagBuilder::new();
        let in1 = b.create("in1", cols(1), [p(1)]).unwrap();
        let in2 = b.create("in2", cols(2), [p(2)]).unwrap();
        let j = b.join(in1, in2, "j", &["a"], &["a"]).unwrap();
        let s = b.store(j, "out", [p(1)]).unwrap();
        let dag = b.build().unwrap();

        let order = dag.topo_sort();
        assert_eq!(order, vec![in1, in2, j, s]);
        assert_eq!(order, dag.topo_sort());
        assert_eq!(dag.edges().len(), 3);
    }

    #[test]
    fn join_output_is_mpc_and_store_is_local() {
        let mut b = DagBuilder::new();
        let in1 = b.create("in1", cols(1), [p(1)]).unwrap();
        let in2 = b.create("in2", cols(2), [p(2)]).unwrap();
        let j = b.join(in1, in2, "j", &["a"], &["a"]).unwrap();
        let s = b.store(j, "out", [p(1)]).unwrap();
        let dag = b.build().unwrap();

        assert!(!dag.node(in1).unwrap().is_mpc());
        assert!(dag.node(j).unwrap().is_mpc());
        let out = dag.node(s).unwrap();
        assert!(!out.is_mpc());
        assert_eq!(out.out_rel().visibility(), [p(1)].into_iter().collect());
        // key column trust is the intersection of both sides
        assert!(dag.node(j).unwrap().out_rel().columns[0].trust.is_empty());
    }

    #[test]
    fn rejects_duplicate_names_and_bad_arity() {
        let mut b = DagBuilder::new();
        let in1 = b.create("in1", cols(1), [p(1)]).unwrap();
        assert!(b.create("in1", cols(1), [p(1)]).is_err());
        let rel = Relation::new("j", cols(1), [p(1)]);
        let err = b
            .add(
                Op::Join {
                    left_cols: vec!["a".into()],
                    right_cols: vec!["a".into()],
                },
                rel,
                &[in1],
            )
            .unwrap_err();
        assert!(matches!(err, Error::InvalidDag { .. }));
    }

    #[test]
    fn store_cannot_have_consumers() {
        let mut b = DagBuilder::new();
        let in1 = b.create("in1", cols(1), [p(1)]).unwrap();
        let s = b.store(in1, "out", [p(2)]).unwrap();
        assert!(b.project(s, "again", &["a"]).is_err());
    }

    #[test]
    fn create_requires_owner() {
        let mut b = DagBuilder::new();
        assert!(b.create("in1", cols(1), Vec::<PartyId>::new()).is_err());
    }

    #[test]
    fn pub_join_is_mpc_even_for_one_holder() {
        let mut b = DagBuilder::new();
        let l = b.create("l", cols(1), [p(1)]).unwrap();
        let r = b.create("r", cols(1), [p(1)]).unwrap();
        let j = b.pub_join(l, r, "pj", &["a"], &["a"], p(1)).unwrap();
        let dag = b.build().unwrap();
        assert!(dag.node(j).unwrap().is_mpc());
    }

    #[test]
    fn summary_exposes_key_parameters() {
        let mut b = DagBuilder::new();
        let in1 = b.create("in1", cols(1), [p(1)]).unwrap();
        let agg = b
            .aggregate(in1, "agg", &["a"], "b", Aggregator::Sum, "total")
            .unwrap();
        let dag = b.build().unwrap();
        let summary = dag.node(agg).unwrap().summary();
        assert_eq!(summary.kind, "AGG");
        assert_eq!(summary.relation, "agg");
        assert!(summary
            .params
            .contains(&("agg".to_string(), "total: +(b)".to_string())));
    }
}

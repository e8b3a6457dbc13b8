//! YAML → operator DAG.
//!
//! Each step names its output relation; later steps refer to earlier ones by
//! that name. Example:
//! ```yaml
//! config:
//!   planner: { code_root: /tmp/tf }
//!   dispatch: { local: 1, barrier_timeout_ms: 30000, backends: { python: {}, obliv-c: {} } }
//! steps:
//!   - op: create
//!     name: in1
//!     stored_with: [1]
//!     columns: [ {name: a, type: INTEGER, trust: [1]}, {name: b, type: INTEGER, trust: [1]} ]
//!   - op: create
//!     name: in2
//!     stored_with: [2]
//!     columns: [ {name: a, type: INTEGER, trust: [2]}, {name: b, type: INTEGER, trust: [2]} ]
//!   - op: join
//!     name: joined
//!     left: in1
//!     right: in2
//!     left_cols: [a]
//!     right_cols: [a]
//!   - op: store
//!     name: result
//!     input: joined
//!     to: [1]
//! ```

use serde::{Deserialize, Serialize};

use trustflow_core::config::{DispatchConfig, PlannerConfig};
use trustflow_core::dag::{Aggregator, Comparator, Dag, DagBuilder, Operand};
use trustflow_core::id::{NodeId, PartyId};
use trustflow_core::schema::{Column, DataType};

use crate::error::{PlanningError, Result};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Workflow {
    #[serde(default)]
    pub config: WorkflowConfig,
    pub steps: Vec<Step>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkflowConfig {
    pub planner: PlannerConfig,
    pub dispatch: DispatchConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ColumnDef {
    pub name: String,
    #[serde(rename = "type")]
    pub data_type: String,
    #[serde(default)]
    pub trust: Vec<PartyId>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "op")]
pub enum Step {
    Create {
        name: String,
        columns: Vec<ColumnDef>,
        stored_with: Vec<PartyId>,
    },
    Aggregate {
        name: String,
        input: String,
        #[serde(default)]
        group: Vec<String>,
        over: String,
        aggregator: Aggregator,
        out: String,
    },
    IndexAggregate {
        name: String,
        input: String,
        index: String,
        #[serde(default)]
        group: Vec<String>,
        over: String,
        aggregator: Aggregator,
        out: String,
    },
    Join {
        name: String,
        left: String,
        right: String,
        left_cols: Vec<String>,
        right_cols: Vec<String>,
    },
    IndexJoin {
        name: String,
        left: String,
        right: String,
        index: String,
        left_cols: Vec<String>,
        right_cols: Vec<String>,
    },
    PubJoin {
        name: String,
        left: String,
        right: String,
        left_cols: Vec<String>,
        right_cols: Vec<String>,
        host: PartyId,
    },
    PubIntersect {
        name: String,
        left: String,
        right: String,
        column: String,
        host: PartyId,
    },
    Filter {
        name: String,
        input: String,
        column: String,
        comparator: Comparator,
        operand: Operand,
    },
    FilterBy {
        name: String,
        input: String,
        by: String,
        column: String,
        #[serde(default)]
        negate: bool,
    },
    Index {
        name: String,
        input: String,
        #[serde(default = "default_index_col")]
        column: String,
    },
    ConcatCols {
        name: String,
        inputs: Vec<String>,
    },
    Multiply {
        name: String,
        input: String,
        target: String,
        operands: Vec<Operand>,
    },
    Divide {
        name: String,
        input: String,
        target: String,
        operands: Vec<Operand>,
    },
    Persist {
        name: String,
        input: String,
    },
    Project {
        name: String,
        input: String,
        columns: Vec<String>,
    },
    DistinctCount {
        name: String,
        input: String,
        column: String,
        out: String,
    },
    Shuffle {
        name: String,
        input: String,
    },
    Store {
        name: String,
        input: String,
        to: Vec<PartyId>,
    },
    Union {
        name: String,
        left: String,
        right: String,
        left_col: String,
        right_col: String,
    },
    Distinct {
        name: String,
        input: String,
        columns: Vec<String>,
    },
    Concat {
        name: String,
        inputs: Vec<String>,
    },
}

fn default_index_col() -> String {
    "index".to_string()
}

#[derive(Debug, Clone)]
pub struct ParsedWorkflow {
    pub dag: Dag,
    pub config: WorkflowConfig,
}

/// Parse a YAML workflow into a validated DAG plus its configuration section.
pub fn parse_workflow(yaml_src: &str) -> Result<ParsedWorkflow> {
    let doc: Workflow = serde_yaml::from_str(yaml_src)?;
    if doc.steps.is_empty() {
        return Err(PlanningError::Workflow("workflow has no steps".to_string()));
    }

    let mut b = DagBuilder::new();
    for step in &doc.steps {
        apply(&mut b, step)?;
    }

    Ok(ParsedWorkflow {
        dag: b.build()?,
        config: doc.config,
    })
}

fn columns(defs: &[ColumnDef]) -> Result<Vec<Column>> {
    defs.iter()
        .map(|d| {
            let data_type = DataType::parse(&d.data_type).ok_or_else(|| {
                PlanningError::Workflow(format!(
                    "column '{}' has unknown type '{}'",
                    d.name, d.data_type
                ))
            })?;
            Ok(Column::new(d.name.clone(), data_type, d.trust.iter().copied()))
        })
        .collect()
}

fn strs(v: &[String]) -> Vec<&str> {
    v.iter().map(String::as_str).collect()
}

fn apply(b: &mut DagBuilder, step: &Step) -> Result<NodeId> {
    let id = match step {
        Step::Create {
            name,
            columns: defs,
            stored_with,
        } => b.create(name, columns(defs)?, stored_with.iter().copied())?,
        Step::Aggregate {
            name,
            input,
            group,
            over,
            aggregator,
            out,
        } => {
            let input = b.lookup(input)?;
            b.aggregate(input, name, &strs(group), over, *aggregator, out)?
        }
        Step::IndexAggregate {
            name,
            input,
            index,
            group,
            over,
            aggregator,
            out,
        } => {
            let (input, index) = (b.lookup(input)?, b.lookup(index)?);
            b.index_aggregate(input, index, name, &strs(group), over, *aggregator, out)?
        }
        Step::Join {
            name,
            left,
            right,
            left_cols,
            right_cols,
        } => {
            let (l, r) = (b.lookup(left)?, b.lookup(right)?);
            b.join(l, r, name, &strs(left_cols), &strs(right_cols))?
        }
        Step::IndexJoin {
            name,
            left,
            right,
            index,
            left_cols,
            right_cols,
        } => {
            let (l, r, i) = (b.lookup(left)?, b.lookup(right)?, b.lookup(index)?);
            b.index_join(l, r, i, name, &strs(left_cols), &strs(right_cols))?
        }
        Step::PubJoin {
            name,
            left,
            right,
            left_cols,
            right_cols,
            host,
        } => {
            let (l, r) = (b.lookup(left)?, b.lookup(right)?);
            b.pub_join(l, r, name, &strs(left_cols), &strs(right_cols), *host)?
        }
        Step::PubIntersect {
            name,
            left,
            right,
            column,
            host,
        } => {
            let (l, r) = (b.lookup(left)?, b.lookup(right)?);
            b.pub_intersect(l, r, name, column, *host)?
        }
        Step::Filter {
            name,
            input,
            column,
            comparator,
            operand,
        } => {
            let input = b.lookup(input)?;
            b.filter(input, name, column, *comparator, operand.clone())?
        }
        Step::FilterBy {
            name,
            input,
            by,
            column,
            negate,
        } => {
            let (input, by) = (b.lookup(input)?, b.lookup(by)?);
            b.filter_by(input, by, name, column, *negate)?
        }
        Step::Index {
            name,
            input,
            column,
        } => {
            let input = b.lookup(input)?;
            b.index(input, name, column)?
        }
        Step::ConcatCols { name, inputs } => {
            let ids = lookup_all(b, inputs)?;
            b.concat_cols(&ids, name)?
        }
        Step::Multiply {
            name,
            input,
            target,
            operands,
        } => {
            let input = b.lookup(input)?;
            b.multiply(input, name, target, operands.clone())?
        }
        Step::Divide {
            name,
            input,
            target,
            operands,
        } => {
            let input = b.lookup(input)?;
            b.divide(input, name, target, operands.clone())?
        }
        Step::Persist { name, input } => {
            let input = b.lookup(input)?;
            b.persist(input, name)?
        }
        Step::Project {
            name,
            input,
            columns,
        } => {
            let input = b.lookup(input)?;
            b.project(input, name, &strs(columns))?
        }
        Step::DistinctCount {
            name,
            input,
            column,
            out,
        } => {
            let input = b.lookup(input)?;
            b.distinct_count(input, name, column, out)?
        }
        Step::Shuffle { name, input } => {
            let input = b.lookup(input)?;
            b.shuffle(input, name)?
        }
        Step::Store { name, input, to } => {
            let input = b.lookup(input)?;
            b.store(input, name, to.iter().copied())?
        }
        Step::Union {
            name,
            left,
            right,
            left_col,
            right_col,
        } => {
            let (l, r) = (b.lookup(left)?, b.lookup(right)?);
            b.union(l, r, name, left_col, right_col)?
        }
        Step::Distinct {
            name,
            input,
            columns,
        } => {
            let input = b.lookup(input)?;
            b.distinct(input, name, &strs(columns))?
        }
        Step::Concat { name, inputs } => {
            let ids = lookup_all(b, inputs)?;
            b.concat(&ids, name)?
        }
    };
    Ok(id)
}

fn lookup_all(b: &DagBuilder, names: &[String]) -> Result<Vec<NodeId>> {
    names
        .iter()
        .map(|n| b.lookup(n).map_err(PlanningError::from))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use trustflow_core::config::BackendKind;

    const TWO_PARTY: &str = r#"
config:
  planner:
    code_root: /tmp/tf-test
  dispatch:
    local: 2
    backends:
      python: {}
steps:
  - op: create
    name: in1
    stored_with: [1]
    columns:
      - { name: a, type: INTEGER, trust: [1] }
      - { name: b, type: INTEGER, trust: [1] }
  - op: create
    name: in2
    stored_with: [2]
    columns:
      - { name: a, type: INTEGER, trust: [2] }
      - { name: b, type: INTEGER, trust: [2] }
  - op: concat
    name: rel
    inputs: [in1, in2]
  - op: multiply
    name: scaled
    input: rel
    target: b
    operands: [b, 10]
  - op: aggregate
    name: agg
    input: scaled
    group: [a]
    over: b
    aggregator: sum
    out: total
  - op: store
    name: out
    input: agg
    to: [1]
"#;

    #[test]
    fn parses_steps_and_config() {
        let parsed = parse_workflow(TWO_PARTY).unwrap();
        assert_eq!(parsed.dag.len(), 6);
        assert_eq!(parsed.config.planner.code_root, "/tmp/tf-test");
        assert_eq!(parsed.config.dispatch.local, PartyId::new(2));
        assert!(parsed.config.dispatch.backend(BackendKind::Python).is_some());

        let scaled = parsed.dag.by_name("scaled").unwrap();
        assert!(scaled.is_mpc());
        assert_eq!(
            scaled.op(),
            &trustflow_core::dag::Op::Multiply {
                target_col: "b".into(),
                operands: vec![Operand::Column("b".into()), Operand::Scalar(10)],
            }
        );
    }

    #[test]
    fn unknown_relation_is_rejected() {
        let src = r#"
steps:
  - op: project
    name: p
    input: nowhere
    columns: [a]
"#;
        let err = parse_workflow(src).unwrap_err();
        assert!(err.to_string().contains("nowhere"));
    }

    #[test]
    fn unknown_type_is_rejected() {
        let src = r#"
steps:
  - op: create
    name: in1
    stored_with: [1]
    columns: [ { name: a, type: DECIMAL } ]
"#;
        assert!(matches!(
            parse_workflow(src),
            Err(PlanningError::Workflow(_))
        ));
    }
}

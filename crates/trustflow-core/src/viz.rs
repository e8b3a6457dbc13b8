//! Graphviz rendering of an operator DAG.
//!
//! Only uses the read-only `OpSummary` interface, so it doubles as the
//! reference consumer for code generators.

use std::fmt::Write as _;

use crate::dag::{Dag, OpSummary};

const MPC_FILL: &str = "/set312/1";
const LOCAL_FILL: &str = "/set312/2";

/// Render `dag` as a DOT digraph. Nodes and edges follow topological order.
pub fn to_dot(dag: &Dag) -> String {
    let mut out = String::from("digraph {\n    node [shape=record, fontsize=10]\n\n");

    let order = dag.topo_sort();
    for id in &order {
        if let Some(node) = dag.node(*id) {
            let summary = node.summary();
            let _ = writeln!(
                out,
                "    {} [style=\"filled\", fillcolor=\"{}\", label=\"{}\"]",
                escape(&summary.relation),
                if summary.is_mpc { MPC_FILL } else { LOCAL_FILL },
                label(&summary, node.out_rel().columns.iter().map(|c| c.name.as_str())),
            );
        }
    }
    out.push('\n');

    for id in &order {
        let Some(node) = dag.node(*id) else { continue };
        for child in node.children() {
            if let Some(c) = dag.node(*child) {
                let _ = writeln!(
                    out,
                    "    {} -> {}",
                    escape(node.name()),
                    escape(c.name())
                );
            }
        }
    }

    out.push_str("}\n");
    out
}

fn label<'a>(summary: &OpSummary, columns: impl Iterator<Item = &'a str>) -> String {
    let params = summary
        .params
        .iter()
        .map(|(k, v)| format!("{}: {}", record(k), record(v)))
        .collect::<Vec<_>>()
        .join("\\n");
    let cols = columns.map(record).collect::<Vec<_>>().join(", ");
    format!(
        "{{ {{ <I>{}</I> | <B>{}</B> }} | {} | {} }}",
        record(&summary.relation),
        summary.kind,
        params,
        cols
    )
}

/// Quote identifiers that DOT would not accept bare.
fn escape(name: &str) -> String {
    if name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        name.to_string()
    } else {
        format!("\"{}\"", name.replace('"', "\\\""))
    }
}

/// Escape characters with meaning inside record labels.
fn record(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        if matches!(c, '{' | '}' | '|' | '<' | '>' | '"') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dag::DagBuilder;
    use crate::id::PartyId;
    use crate::schema::{Column, DataType};

    #[test]
    fn record_escapes_structural_chars() {
        assert_eq!(record("a<b|c"), "a\\<b\\|c");
        assert_eq!(escape("in-1"), "\"in-1\"");
        assert_eq!(escape("in_1"), "in_1");
    }

    #[test]
    fn colours_follow_mpc_flag() {
        let p1 = PartyId::new(1);
        let p2 = PartyId::new(2);
        let mut b = DagBuilder::new();
        let a = b
            .create("a", vec![Column::new("x", DataType::Int64, [p1])], [p1])
            .unwrap();
        let c = b
            .create("c", vec![Column::new("x", DataType::Int64, [p2])], [p2])
            .unwrap();
        b.concat(&[a, c], "both").unwrap();
        let dot = to_dot(&b.build().unwrap());
        assert!(dot.contains("both [style=\"filled\", fillcolor=\"/set312/1\""));
        assert!(dot.contains("a [style=\"filled\", fillcolor=\"/set312/2\""));
        assert!(dot.find("a -> both").unwrap() < dot.find("c -> both").unwrap());
    }
}

use criterion::{criterion_group, criterion_main, Criterion};
use trustflow_core::config::PlannerConfig;
use trustflow_core::dag::{Aggregator, Comparator, Dag, DagBuilder, Operand};
use trustflow_core::id::PartyId;
use trustflow_core::schema::{Column, DataType};
use trustflow_planner::partition;

/// `parties` inputs, one shared concat, then `depth` shared stages. Every
/// other stage releases a result to p1 and pulls in a fresh input, so the
/// partitioner has to cut often.
fn make_dag(parties: u64, depth: usize) -> Dag {
    let p = PartyId::new;
    let cols = |owner: u64| {
        vec![
            Column::new("k", DataType::Int64, [p(owner)]),
            Column::new("v", DataType::Int64, [p(owner)]),
        ]
    };

    let mut b = DagBuilder::new();
    let inputs: Vec<_> = (1..=parties)
        .map(|i| b.create(&format!("in{i}"), cols(i), [p(i)]).unwrap())
        .collect();
    let mut cur = b.concat(&inputs, "all").unwrap();
    for d in 0..depth {
        cur = b
            .filter(cur, &format!("f{d}"), "v", Comparator::Gt, Operand::Scalar(0))
            .unwrap();
        cur = b
            .aggregate(cur, &format!("a{d}"), &["k"], "v", Aggregator::Sum, "v")
            .unwrap();
        if d % 2 == 0 {
            b.store(cur, &format!("s{d}"), [p(1)]).unwrap();
            let reshared = b.create(&format!("r{d}"), cols(2), [p(2)]).unwrap();
            cur = b.concat(&[cur, reshared], &format!("c{d}")).unwrap();
        }
    }
    b.build().unwrap()
}

fn bench_partition(c: &mut Criterion) {
    let dag = make_dag(3, 64);
    let cfg = PlannerConfig::default();
    c.bench_function("partition_3p_64", |b| {
        b.iter(|| {
            let _ = partition(&dag, &cfg).unwrap();
        })
    });
}

criterion_group!(planner, bench_partition);
criterion_main!(planner);

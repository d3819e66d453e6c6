//! Benchmarks for topoc core operations.
//!
//! Run with: cargo bench
//!
//! Results include 95% confidence intervals via Criterion.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use indexmap::IndexMap;
use std::collections::BTreeMap;
use topoc::core::topology::Topology;
use topoc::core::types::PropertyValue;
use topoc::core::{compiler, graph, parser, planner, resolver};

/// `n` subnet/function pairs hanging off one network, each function reading
/// its own table through a reference.
fn layered(n: usize) -> Topology {
    let mut t = Topology::new("bench");
    t.declare(
        "Net",
        "network",
        BTreeMap::from([("cidr".to_string(), PropertyValue::str("10.0.0.0/16"))]),
    )
    .unwrap();
    for i in 0..n {
        t.declare(
            &format!("Sub{i}"),
            "subnet",
            BTreeMap::from([
                ("network".to_string(), PropertyValue::str("Net")),
                (
                    "cidr".to_string(),
                    PropertyValue::str(format!("10.0.{}.0/24", i % 256)),
                ),
            ]),
        )
        .unwrap();
        t.declare(
            &format!("Table{i}"),
            "table",
            BTreeMap::from([
                ("partition_key".to_string(), PropertyValue::str("id")),
                (
                    "table_name".to_string(),
                    PropertyValue::str(format!("t{i}")),
                ),
            ]),
        )
        .unwrap();
        let env = BTreeMap::from([(
            "TABLE".to_string(),
            PropertyValue::str(format!("${{Table{i}.tableName}}")),
        )]);
        t.declare(
            &format!("Fn{i}"),
            "function",
            BTreeMap::from([
                ("handler".to_string(), PropertyValue::str("index.handler")),
                ("runtime".to_string(), PropertyValue::str("nodejs18.x")),
                ("environment".to_string(), PropertyValue::Map(env)),
            ]),
        )
        .unwrap();
    }
    t
}

fn bench_blake3_string(c: &mut Criterion) {
    let mut group = c.benchmark_group("blake3_string");
    for size in [64, 256, 1024, 4096] {
        let input: String = "x".repeat(size);
        group.bench_with_input(BenchmarkId::from_parameter(size), &input, |b, input| {
            b.iter(|| black_box(topoc::provenance::hasher::hash_string(black_box(input))));
        });
    }
    group.finish();
}

fn bench_yaml_parse(c: &mut Criterion) {
    let yaml = r#"
version: "1.0"
name: bench-config
tags: { Environment: Development }
resources:
  Net:
    type: network
    properties: { cidr: 10.0.0.0/16 }
  Sub:
    type: subnet
    properties: { network: Net, cidr: 10.0.1.0/24 }
  Table:
    type: table
    properties: { partition_key: id, table_name: demo }
  Handler:
    type: function
    properties:
      handler: index.handler
      runtime: nodejs18.x
      environment:
        TABLE: { ref: Table.tableName, access: read_write }
outputs:
  tableName: { value: Table.tableName }
"#;
    c.bench_function("yaml_parse", |b| {
        b.iter(|| {
            let config = parser::parse_config(black_box(yaml)).unwrap();
            black_box(config);
        });
    });
}

fn bench_resolve(c: &mut Criterion) {
    let mut group = c.benchmark_group("resolve");
    for n in [10, 50, 200] {
        let topo = layered(n);
        group.bench_with_input(BenchmarkId::from_parameter(n), &topo, |b, topo| {
            b.iter(|| black_box(resolver::resolve(black_box(topo)).unwrap()));
        });
    }
    group.finish();
}

fn bench_order(c: &mut Criterion) {
    let mut group = c.benchmark_group("topo_order");
    for n in [10, 50, 200] {
        let g = graph::build(&layered(n)).unwrap();
        group.bench_with_input(BenchmarkId::from_parameter(n), &g, |b, g| {
            b.iter(|| black_box(planner::order(black_box(g)).unwrap()));
        });
    }
    group.finish();
}

fn bench_compile(c: &mut Criterion) {
    let mut group = c.benchmark_group("compile");
    let outputs = IndexMap::new();
    for n in [10, 50, 200] {
        let topo = layered(n);
        group.bench_with_input(BenchmarkId::from_parameter(n), &topo, |b, topo| {
            b.iter(|| black_box(compiler::compile(black_box(topo), &outputs).unwrap()));
        });
    }
    group.finish();
}

criterion_group!(
    benches,
    bench_blake3_string,
    bench_yaml_parse,
    bench_resolve,
    bench_order,
    bench_compile
);
criterion_main!(benches);

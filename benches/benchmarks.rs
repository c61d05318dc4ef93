use criterion::{black_box, criterion_group, criterion_main, Criterion};
use remold::{transform, Value};

pub fn transform_benchmark(c: &mut Criterion) {
    let spec: serde_json::Value =
        serde_json::from_str(include_str!("spec.json")).expect("parsed spec");
    let input: serde_json::Value =
        serde_json::from_str(include_str!("input.json")).expect("parsed input");
    let spec = Value::from(spec);
    let input = Value::from(input);
    c.bench_function("transform", |b| {
        b.iter_with_large_setup(
            || (input.clone(), spec.clone()),
            |(input, spec)| transform(black_box(input), black_box(spec)),
        )
    });
}

criterion_group!(benches, transform_benchmark);
criterion_main!(benches);

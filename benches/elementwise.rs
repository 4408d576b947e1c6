use criterion::{criterion_group, criterion_main, BatchSize, BenchmarkId, Criterion};
use voxflow::prelude::*;

const SIZES: [usize; 3] = [4_096, 65_536, 1_048_576];

fn ramp(n: usize) -> DataArray {
    let data: Vec<f32> = (0..n).map(|i| (i % 251) as f32).collect();
    DataArray::from_slice(&data, 1).expect("host array")
}

fn bench_unary(c: &mut Criterion) {
    let _ = env_logger::builder().is_test(true).try_init();
    let mut group = c.benchmark_group("unary");
    for n in SIZES {
        for parallel in [false, true] {
            let label = if parallel { "clamp_parallel" } else { "clamp_serial" };
            group.bench_with_input(BenchmarkId::new(label, n), &n, |b, &n| {
                b.iter_batched(
                    || ramp(n),
                    |mut array| {
                        UnaryFilter::in_place(UnaryKernel::Clamp {
                            lower: 10.0,
                            upper: 200.0,
                        })
                        .with_config(FilterConfig::new().with_parallel(parallel))
                        .process(&mut array)
                        .expect("clamp");
                        criterion::black_box(array)
                    },
                    BatchSize::LargeInput,
                );
            });
        }
    }
    group.finish();
}

fn bench_binary(c: &mut Criterion) {
    let mut group = c.benchmark_group("binary");
    for n in SIZES {
        let right = ramp(n);
        group.bench_with_input(BenchmarkId::new("mul_array", n), &n, |b, &n| {
            b.iter_batched(
                || ramp(n).deep_copy().expect("copy"),
                |mut left| {
                    left.mul_assign(&right).expect("mul");
                    criterion::black_box(left)
                },
                BatchSize::LargeInput,
            );
        });
        group.bench_with_input(BenchmarkId::new("add_scalar_copy", n), &n, |b, _| {
            b.iter(|| criterion::black_box(right.add(3.0).expect("add")));
        });
    }
    group.finish();
}

criterion_group!(benches, bench_unary, bench_binary);
criterion_main!(benches);

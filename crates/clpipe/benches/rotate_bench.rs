use clpipe::rotate::{forward_map, rotate_host, Angle};
use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use std::hint::black_box;

fn bench_rotate_host(c: &mut Criterion) {
    let mut group = c.benchmark_group("rotate_host");
    for side in [64_usize, 512] {
        let src: Vec<i32> = (0..(side * side) as i32).collect();
        let angle = Angle::from_degrees(45.0);
        group.bench_with_input(BenchmarkId::from_parameter(side), &src, |b, src| {
            b.iter(|| rotate_host(black_box(src), side, side, angle).unwrap());
        });
    }
    group.finish();
}

fn bench_forward_map(c: &mut Criterion) {
    c.bench_function("forward_map_512", |b| {
        b.iter(|| forward_map(512, 512, black_box(Angle::from_degrees(30.0))).unwrap());
    });
}

criterion_group!(benches, bench_rotate_host, bench_forward_map);
criterion_main!(benches);

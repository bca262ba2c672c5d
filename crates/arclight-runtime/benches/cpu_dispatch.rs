//! Dispatch-path benchmarks on the CPU backend

use arclight_backends::LaunchConfig;
use arclight_ir::{Axis, CmpCond, ElemType, Expr, KernelBuilder, KernelDef, OpKind, ScalarType};
use arclight_runtime::{Accelerator, KernelArg};
use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};

/// out[gid] = a * x[gid] + y[gid] for gid < n
fn saxpy_kernel() -> KernelDef {
    let f32 = ElemType::Scalar(ScalarType::F32);
    let mut b = KernelBuilder::new("saxpy_f32");
    let out = b.buffer_param("out", f32, true);
    let x = b.buffer_param("x", f32, false);
    let y = b.buffer_param("y", f32, false);
    let a = b.scalar_param("a", f32);
    let n = b.scalar_param("n", ElemType::Scalar(ScalarType::U32));

    let gid = b.bind(Expr::ThreadIndex {
        op: OpKind::GlobalId,
        axis: Axis::X,
    });
    b.guard(Expr::Cmp {
        cond: CmpCond::Lt,
        ty: ElemType::Scalar(ScalarType::U32),
        a: Box::new(Expr::Value(gid)),
        b: Box::new(Expr::ScalarParam(n)),
    });
    let xv = b.bind(Expr::Load {
        param: x,
        index: Box::new(Expr::Value(gid)),
    });
    let yv = b.bind(Expr::Load {
        param: y,
        index: Box::new(Expr::Value(gid)),
    });
    let ax = b.bind(Expr::Intrinsic {
        op: OpKind::Mul,
        ty: f32,
        args: vec![Expr::ScalarParam(a), Expr::Value(xv)],
    });
    let sum = b.bind(Expr::Intrinsic {
        op: OpKind::Add,
        ty: f32,
        args: vec![Expr::Value(ax), Expr::Value(yv)],
    });
    b.store(out, Expr::Value(gid), Expr::Value(sum));
    b.build().unwrap()
}

fn bench_saxpy(c: &mut Criterion) {
    let accel = Accelerator::cpu().unwrap();
    let stream = accel.stream().unwrap();
    let kernel = accel.compile(&saxpy_kernel()).unwrap();

    let mut group = c.benchmark_group("saxpy_f32");
    for n in [1u32 << 10, 1 << 14, 1 << 18] {
        let x = accel.from_slice(&vec![1.0f32; n as usize]).unwrap();
        let y = accel.from_slice(&vec![2.0f32; n as usize]).unwrap();
        let out = accel.alloc::<f32>(n as usize).unwrap();

        group.throughput(Throughput::Elements(n as u64));
        group.bench_with_input(BenchmarkId::from_parameter(n), &n, |b, &n| {
            b.iter(|| {
                kernel
                    .launch(
                        &stream,
                        &LaunchConfig::linear(n, 256),
                        &[
                            KernelArg::from(&out),
                            KernelArg::from(&x),
                            KernelArg::from(&y),
                            KernelArg::scalar(2.0f32),
                            KernelArg::scalar(n),
                        ],
                    )
                    .unwrap();
                stream.synchronize().unwrap();
            });
        });
    }
    group.finish();
}

fn bench_compile_cached(c: &mut Criterion) {
    let accel = Accelerator::cpu().unwrap();
    let def = saxpy_kernel();
    // Warm the cache; the measured path is the cached lookup
    accel.compile(&def).unwrap();

    c.bench_function("compile_cache_hit", |b| {
        b.iter(|| accel.compile(&def).unwrap());
    });
}

criterion_group!(benches, bench_saxpy, bench_compile_cached);
criterion_main!(benches);

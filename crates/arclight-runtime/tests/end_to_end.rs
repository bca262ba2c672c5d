//! End-to-end scenarios on the CPU accelerator

use arclight_backends::{CapabilityFlag, LaunchConfig};
use arclight_ir::{Axis, CmpCond, ElemType, Expr, KernelBuilder, KernelDef, OpKind, ScalarType};
use arclight_runtime::{Accelerator, Error, KernelArg};

fn init() {
    arclight_tracing::init_for_tests();
}

/// out[gid] = (i32)gid for gid < n
fn write_index_kernel() -> KernelDef {
    let mut b = KernelBuilder::new("write_index");
    let out = b.buffer_param("out", ElemType::Scalar(ScalarType::I32), true);
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
    b.store(
        out,
        Expr::Value(gid),
        Expr::Cast {
            to: ElemType::Scalar(ScalarType::I32),
            from: Box::new(Expr::Value(gid)),
        },
    );
    b.build().unwrap()
}

/// out[gid] = x[gid] + y[gid] for gid < n
fn add_kernel(name: &str, ty: ScalarType) -> KernelDef {
    let elem = ElemType::Scalar(ty);
    let mut b = KernelBuilder::new(name);
    let out = b.buffer_param("out", elem, true);
    let x = b.buffer_param("x", elem, false);
    let y = b.buffer_param("y", elem, false);
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
    let a = b.bind(Expr::Load {
        param: x,
        index: Box::new(Expr::Value(gid)),
    });
    let c = b.bind(Expr::Load {
        param: y,
        index: Box::new(Expr::Value(gid)),
    });
    let sum = b.bind(Expr::Intrinsic {
        op: OpKind::Add,
        ty: elem,
        args: vec![Expr::Value(a), Expr::Value(c)],
    });
    b.store(out, Expr::Value(gid), Expr::Value(sum));
    b.build().unwrap()
}

#[test]
fn test_write_index_across_many_groups() {
    init();
    let accel = Accelerator::cpu().unwrap();
    let stream = accel.stream().unwrap();
    let kernel = accel.compile(&write_index_kernel()).unwrap();

    let n = 1024u32;
    let out = accel.alloc::<i32>(n as usize).unwrap();
    kernel
        .launch(
            &stream,
            &LaunchConfig::linear(n, 256),
            &[KernelArg::from(&out), KernelArg::scalar(n)],
        )
        .unwrap();
    stream.synchronize().unwrap();

    let result = out.to_vec().unwrap();
    for (i, v) in result.iter().enumerate() {
        assert_eq!(*v, i as i32);
    }
}

#[test]
fn test_guard_leaves_tail_untouched() {
    init();
    let accel = Accelerator::cpu().unwrap();
    let stream = accel.stream().unwrap();
    let kernel = accel.compile(&write_index_kernel()).unwrap();

    // 100 valid elements dispatched on a 128-lane grid
    let out = accel.from_slice(&[-1i32; 128]).unwrap();
    kernel
        .launch(
            &stream,
            &LaunchConfig::linear(128, 64),
            &[KernelArg::from(&out), KernelArg::scalar(100u32)],
        )
        .unwrap();
    stream.synchronize().unwrap();

    let result = out.to_vec().unwrap();
    assert_eq!(result[99], 99);
    assert!(result[100..].iter().all(|&v| v == -1));
}

#[test]
fn test_fifo_ordering_within_stream() {
    init();
    let accel = Accelerator::cpu().unwrap();
    let stream = accel.stream().unwrap();

    // Second launch reads what the first wrote; FIFO order makes the
    // data dependency safe without an intermediate synchronize
    let write = accel.compile(&write_index_kernel()).unwrap();
    let add = accel.compile(&add_kernel("add_i32", ScalarType::I32)).unwrap();

    let n = 256u32;
    let a = accel.alloc::<i32>(n as usize).unwrap();
    let b = accel.from_slice(&vec![10i32; n as usize]).unwrap();
    let out = accel.alloc::<i32>(n as usize).unwrap();

    write
        .launch(
            &stream,
            &LaunchConfig::linear(n, 64),
            &[KernelArg::from(&a), KernelArg::scalar(n)],
        )
        .unwrap();
    add.launch(
        &stream,
        &LaunchConfig::linear(n, 64),
        &[
            KernelArg::from(&out),
            KernelArg::from(&a),
            KernelArg::from(&b),
            KernelArg::scalar(n),
        ],
    )
    .unwrap();
    stream.synchronize().unwrap();

    let result = out.to_vec().unwrap();
    for (i, v) in result.iter().enumerate() {
        assert_eq!(*v, i as i32 + 10);
    }
}

#[test]
fn test_independent_streams_share_buffers() {
    init();
    let accel = Accelerator::cpu().unwrap();
    let s1 = accel.stream().unwrap();
    let s2 = accel.stream().unwrap();
    let kernel = accel.compile(&write_index_kernel()).unwrap();

    let out1 = accel.alloc::<i32>(64).unwrap();
    let out2 = accel.alloc::<i32>(64).unwrap();
    kernel
        .launch(
            &s1,
            &LaunchConfig::linear(64, 64),
            &[KernelArg::from(&out1), KernelArg::scalar(64u32)],
        )
        .unwrap();
    kernel
        .launch(
            &s2,
            &LaunchConfig::linear(64, 64),
            &[KernelArg::from(&out2), KernelArg::scalar(64u32)],
        )
        .unwrap();
    s1.synchronize().unwrap();
    s2.synchronize().unwrap();

    assert_eq!(out1.to_vec().unwrap(), out2.to_vec().unwrap());
}

#[test]
fn test_group_reduce_sums_one_group() {
    init();
    let elem = ElemType::Scalar(ScalarType::F32);
    let mut b = KernelBuilder::new("block_sum");
    let out = b.buffer_param("out", elem, true);
    let x = b.buffer_param("x", elem, false);

    let gid = b.bind(Expr::ThreadIndex {
        op: OpKind::GlobalId,
        axis: Axis::X,
    });
    let v = b.bind(Expr::Load {
        param: x,
        index: Box::new(Expr::Value(gid)),
    });
    let total = b.bind(Expr::GroupReduce {
        op: OpKind::GroupReduceAdd,
        ty: elem,
        source: v,
    });
    b.store(
        out,
        Expr::Literal {
            ty: ElemType::Scalar(ScalarType::U32),
            value: arclight_ir::Literal::UInt(0),
        },
        Expr::Value(total),
    );
    let def = b.build().unwrap();

    let accel = Accelerator::cpu().unwrap();
    let stream = accel.stream().unwrap();
    let kernel = accel.compile(&def).unwrap();

    let data: Vec<f32> = (1..=64).map(|i| i as f32).collect();
    let x_buf = accel.from_slice(&data).unwrap();
    let out_buf = accel.alloc::<f32>(1).unwrap();
    kernel
        .launch(
            &stream,
            &LaunchConfig::linear(64, 64),
            &[KernelArg::from(&out_buf), KernelArg::from(&x_buf)],
        )
        .unwrap();
    stream.synchronize().unwrap();

    assert_eq!(out_buf.to_vec().unwrap()[0], 2080.0);
}

#[test]
fn test_markers_bracket_work() {
    init();
    let accel = Accelerator::cpu().unwrap();
    let stream = accel.stream().unwrap();
    let kernel = accel.compile(&write_index_kernel()).unwrap();
    let out = accel.alloc::<i32>(4096).unwrap();

    let before = stream.marker().unwrap();
    kernel
        .launch(
            &stream,
            &LaunchConfig::linear(4096, 256),
            &[KernelArg::from(&out), KernelArg::scalar(4096u32)],
        )
        .unwrap();
    let after = stream.marker().unwrap();

    assert!(before.timestamp().unwrap().is_none());
    assert!(after.timestamp().unwrap().is_none());
    stream.synchronize().unwrap();

    let t0 = before.timestamp().unwrap().unwrap();
    let t1 = after.timestamp().unwrap().unwrap();
    assert!(t1 >= t0);
    assert_eq!(t1 - t0, -(t0 - t1));
}

#[test]
fn test_enumeration_always_lists_cpu() {
    init();
    // On machines without a GPU this still succeeds with the host device;
    // enumeration never errors
    let devices = arclight_backends::enumerate();
    assert!(!devices.is_empty());
    let cpu = &devices[0];
    assert_eq!(cpu.kind, arclight_backends::BackendKind::Cpu);

    // Capability queries are total on every enumerated device
    for device in &devices {
        for flag in [
            CapabilityFlag::Fp16,
            CapabilityFlag::Bf16,
            CapabilityFlag::Fp64,
            CapabilityFlag::GroupReduce,
            CapabilityFlag::WarpShuffle,
            CapabilityFlag::ProfilingMarkers,
            CapabilityFlag::UnifiedMemory,
            CapabilityFlag::CompileCancellation,
        ] {
            // supports() returns a definite bool, which is the whole point
            let _ = device.supports(flag);
        }
    }

    let opened = Accelerator::open(cpu).unwrap();
    assert_eq!(opened.descriptor().kind, arclight_backends::BackendKind::Cpu);
}

#[test]
fn test_launch_too_large_is_rejected() {
    init();
    let accel = Accelerator::cpu().unwrap();
    let stream = accel.stream().unwrap();
    let kernel = accel.compile(&write_index_kernel()).unwrap();
    let out = accel.alloc::<i32>(16).unwrap();

    let max = accel.descriptor().max_group_size;
    let err = kernel
        .launch(
            &stream,
            &LaunchConfig::linear((max + 1) * 2, max + 1),
            &[KernelArg::from(&out), KernelArg::scalar(16u32)],
        )
        .unwrap_err();
    assert!(matches!(
        err,
        Error::Backend(arclight_backends::BackendError::LaunchTooLarge(_))
    ));
}

#[test]
fn test_resource_dispose_is_idempotent() {
    init();
    let accel = Accelerator::cpu().unwrap();
    let mut buf = accel.from_slice(&[1u32, 2, 3]).unwrap();
    let mut stream = accel.stream().unwrap();
    let mut kernel = accel.compile(&write_index_kernel()).unwrap();

    buf.dispose();
    buf.dispose();
    stream.dispose();
    stream.dispose();
    kernel.dispose();
    kernel.dispose();
    accel.dispose();
    accel.dispose();
}

#[test]
fn test_kernel_reports_group_limit_before_launch() {
    init();
    let accel = Accelerator::cpu().unwrap();
    let kernel = accel.compile(&write_index_kernel()).unwrap();
    assert_eq!(kernel.max_group_size(), accel.descriptor().max_group_size);
}

#[test]
fn test_dispose_invalidates_everything() {
    init();
    let accel = Accelerator::cpu().unwrap();
    let stream = accel.stream().unwrap();
    let kernel = accel.compile(&write_index_kernel()).unwrap();
    let out = accel.alloc::<i32>(8).unwrap();

    accel.dispose();
    accel.dispose();

    assert!(matches!(out.to_vec(), Err(Error::Disposed(_))));
    assert!(matches!(stream.synchronize(), Err(Error::Disposed(_))));
    let err = kernel
        .launch(
            &stream,
            &LaunchConfig::linear(8, 8),
            &[KernelArg::from(&out), KernelArg::scalar(8u32)],
        )
        .unwrap_err();
    assert!(matches!(err, Error::Disposed(_)));
}

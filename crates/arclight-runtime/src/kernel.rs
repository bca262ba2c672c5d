//! Compiled kernels and launch arguments
//!
//! A [`Kernel`] is one compiled entry point on one accelerator. Launches go
//! through a [`Stream`] and bind arguments positionally against the
//! kernel's parameter list; kind, element type, and ownership are all
//! checked before the backend sees the submission.

use crate::accelerator::Shared;
use crate::buffer::{Buffer, DeviceScalar};
use crate::cache::CompiledEntry;
use crate::error::{Error, Result};
use crate::stream::Stream;
use arclight_backends::{BackendError, LaunchArg, LaunchConfig, ScalarValue};
use arclight_ir::{ParamKind, ScalarType};
use std::sync::Arc;

/// One launch argument with enough metadata to validate the binding
#[derive(Debug, Clone)]
pub struct KernelArg {
    raw: LaunchArg,
    /// Accelerator id for buffer arguments
    owner: Option<u64>,
    elem: ScalarType,
}

impl KernelArg {
    /// Scalar argument passed by value
    pub fn scalar<T: DeviceScalar>(value: T) -> Self {
        Self {
            raw: LaunchArg::Scalar(ScalarValue {
                ty: T::SCALAR_TYPE,
                bits: value.to_bits(),
            }),
            owner: None,
            elem: T::SCALAR_TYPE,
        }
    }
}

impl<T: DeviceScalar> From<&Buffer<T>> for KernelArg {
    fn from(buffer: &Buffer<T>) -> Self {
        Self {
            raw: LaunchArg::Buffer(buffer.handle()),
            owner: Some(buffer.accelerator_id()),
            elem: T::SCALAR_TYPE,
        }
    }
}

/// Compiled kernel bound to one accelerator
#[derive(Clone)]
pub struct Kernel {
    shared: Arc<Shared>,
    name: String,
    entry: Arc<CompiledEntry>,
    released: bool,
}

impl Kernel {
    pub(crate) fn new(shared: Arc<Shared>, name: String, entry: Arc<CompiledEntry>) -> Self {
        Self {
            shared,
            name,
            entry,
            released: false,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Largest group volume a launch of this kernel may use
    ///
    /// Available without executing anything; callers can validate a launch
    /// configuration up front instead of waiting for the submission check.
    pub fn max_group_size(&self) -> u32 {
        self.entry.max_group_size
    }

    /// Release the compiled kernel on its device
    ///
    /// Idempotent: the second and later calls are no-ops. The entry-point
    /// name is evicted from the accelerator's cache if it still maps to this
    /// kernel, so compiling the same name again produces a fresh handle.
    /// Clones sharing the entry stay valid objects but launches through them
    /// fail once the backend handle is gone.
    pub fn dispose(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        if self.shared.kernels.remove_if(&self.name, &self.entry) {
            if let Ok(mut backend) = self.shared.backend() {
                let _ = backend.release_kernel(self.entry.handle);
                tracing::debug!(kernel = %self.name, "kernel_released");
            }
        }
    }

    /// Enqueue a launch on `stream`
    ///
    /// The stream must belong to the same accelerator this kernel was
    /// compiled on, and every buffer argument must live there too.
    #[tracing::instrument(skip_all, fields(kernel = %self.name, config = %config))]
    pub fn launch(&self, stream: &Stream, config: &LaunchConfig, args: &[KernelArg]) -> Result<()> {
        if !Arc::ptr_eq(&self.shared, &stream.shared) {
            return Err(Error::InvalidArgument(format!(
                "kernel {} was compiled on accelerator {}, stream belongs to {}",
                self.name, self.shared.id, stream.shared.id
            )));
        }
        // Checked against the device limit here, before the backend sees the
        // submission
        if config.group.total_lanes() > self.entry.max_group_size {
            return Err(Error::Backend(BackendError::LaunchTooLarge(format!(
                "group volume {} exceeds the device limit of {}",
                config.group.total_lanes(),
                self.entry.max_group_size
            ))));
        }
        if args.len() != self.entry.params.len() {
            return Err(Error::InvalidArgument(format!(
                "kernel {} takes {} arguments, {} given",
                self.name,
                self.entry.params.len(),
                args.len()
            )));
        }
        for (i, (param, arg)) in self.entry.params.iter().zip(args).enumerate() {
            if let Some(owner) = arg.owner {
                if owner != self.shared.id {
                    return Err(Error::InvalidArgument(format!(
                        "argument {i} of {} is a buffer on accelerator {owner}, \
                         expected {}",
                        self.name, self.shared.id
                    )));
                }
            }
            let kind_matches = matches!(
                (param, &arg.raw),
                (ParamKind::Buffer { .. }, LaunchArg::Buffer(_))
                    | (ParamKind::Scalar(_), LaunchArg::Scalar(_))
            );
            if !kind_matches {
                return Err(Error::InvalidArgument(format!(
                    "argument {i} of {} has the wrong kind",
                    self.name
                )));
            }
            if param.elem().concrete() != Some(arg.elem) {
                return Err(Error::InvalidArgument(format!(
                    "argument {i} of {} has element type {}, parameter wants {:?}",
                    self.name,
                    arg.elem,
                    param.elem()
                )));
            }
        }

        let raw: Vec<LaunchArg> = args.iter().map(|a| a.raw.clone()).collect();
        self.shared
            .backend()?
            .submit_launch(stream.queue, self.entry.handle, config, &raw)?;
        Ok(())
    }
}

impl std::fmt::Debug for Kernel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Kernel")
            .field("name", &self.name)
            .field("accelerator", &self.shared.id)
            .field("params", &self.entry.params.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::accelerator::Accelerator;
    use arclight_ir::{Axis, CmpCond, ElemType, Expr, KernelBuilder, KernelDef, OpKind};

    fn scale_kernel() -> KernelDef {
        // out[gid] = a * x[gid] for gid < n
        let f32 = ElemType::Scalar(ScalarType::F32);
        let mut b = KernelBuilder::new("scale_f32");
        let out = b.buffer_param("out", f32, true);
        let x = b.buffer_param("x", f32, false);
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
        let v = b.bind(Expr::Load {
            param: x,
            index: Box::new(Expr::Value(gid)),
        });
        let scaled = b.bind(Expr::Intrinsic {
            op: OpKind::Mul,
            ty: f32,
            args: vec![Expr::ScalarParam(a), Expr::Value(v)],
        });
        b.store(out, Expr::Value(gid), Expr::Value(scaled));
        b.build().unwrap()
    }

    #[test]
    fn test_launch_runs_on_cpu() {
        let accel = Accelerator::cpu().unwrap();
        let kernel = accel.compile(&scale_kernel()).unwrap();
        let stream = accel.stream().unwrap();

        let x = accel.from_slice(&[1.0f32, 2.0, 3.0, 4.0]).unwrap();
        let out = accel.alloc::<f32>(4).unwrap();
        kernel
            .launch(
                &stream,
                &LaunchConfig::linear(4, 4),
                &[
                    KernelArg::from(&out),
                    KernelArg::from(&x),
                    KernelArg::scalar(2.5f32),
                    KernelArg::scalar(4u32),
                ],
            )
            .unwrap();
        stream.synchronize().unwrap();
        assert_eq!(out.to_vec().unwrap(), vec![2.5, 5.0, 7.5, 10.0]);
    }

    #[test]
    fn test_cross_accelerator_launch_rejected() {
        let a = Accelerator::cpu().unwrap();
        let b = Accelerator::cpu().unwrap();
        let kernel = a.compile(&scale_kernel()).unwrap();
        let foreign_stream = b.stream().unwrap();
        let x = a.from_slice(&[1.0f32]).unwrap();
        let out = a.alloc::<f32>(1).unwrap();

        let err = kernel
            .launch(
                &foreign_stream,
                &LaunchConfig::linear(1, 1),
                &[
                    KernelArg::from(&out),
                    KernelArg::from(&x),
                    KernelArg::scalar(1.0f32),
                    KernelArg::scalar(1u32),
                ],
            )
            .unwrap_err();
        assert!(matches!(err, Error::InvalidArgument(_)));
    }

    #[test]
    fn test_foreign_buffer_rejected() {
        let a = Accelerator::cpu().unwrap();
        let b = Accelerator::cpu().unwrap();
        let kernel = a.compile(&scale_kernel()).unwrap();
        let stream = a.stream().unwrap();
        let x = a.from_slice(&[1.0f32]).unwrap();
        let foreign = b.alloc::<f32>(1).unwrap();

        let err = kernel
            .launch(
                &stream,
                &LaunchConfig::linear(1, 1),
                &[
                    KernelArg::from(&foreign),
                    KernelArg::from(&x),
                    KernelArg::scalar(1.0f32),
                    KernelArg::scalar(1u32),
                ],
            )
            .unwrap_err();
        assert!(matches!(err, Error::InvalidArgument(_)));
    }

    #[test]
    fn test_wrong_scalar_type_rejected() {
        let accel = Accelerator::cpu().unwrap();
        let kernel = accel.compile(&scale_kernel()).unwrap();
        let stream = accel.stream().unwrap();
        let x = accel.from_slice(&[1.0f32]).unwrap();
        let out = accel.alloc::<f32>(1).unwrap();

        // `a` is f32, pass f64
        let err = kernel
            .launch(
                &stream,
                &LaunchConfig::linear(1, 1),
                &[
                    KernelArg::from(&out),
                    KernelArg::from(&x),
                    KernelArg::scalar(1.0f64),
                    KernelArg::scalar(1u32),
                ],
            )
            .unwrap_err();
        assert!(matches!(err, Error::InvalidArgument(_)));
    }

    #[test]
    fn test_recompilation_hits_cache() {
        let accel = Accelerator::cpu().unwrap();
        let def = scale_kernel();
        let k1 = accel.compile(&def).unwrap();
        let k2 = accel.compile(&def).unwrap();
        assert_eq!(k1.entry.handle, k2.entry.handle);
    }

    #[test]
    fn test_dispose_releases_and_evicts() {
        let accel = Accelerator::cpu().unwrap();
        let stream = accel.stream().unwrap();
        let def = scale_kernel();
        let mut kernel = accel.compile(&def).unwrap();
        let first_handle = kernel.entry.handle;
        let x = accel.from_slice(&[1.0f32]).unwrap();
        let out = accel.alloc::<f32>(1).unwrap();

        kernel.dispose();
        kernel.dispose();

        // The backend handle is gone, launches through the stale object fail
        let err = kernel
            .launch(
                &stream,
                &LaunchConfig::linear(1, 1),
                &[
                    KernelArg::from(&out),
                    KernelArg::from(&x),
                    KernelArg::scalar(1.0f32),
                    KernelArg::scalar(1u32),
                ],
            )
            .unwrap_err();
        assert!(matches!(
            err,
            Error::Backend(BackendError::UnknownKernel(_))
        ));

        // The name is free again; recompiling produces a fresh handle
        let recompiled = accel.compile(&def).unwrap();
        assert_ne!(recompiled.entry.handle, first_handle);
    }
}

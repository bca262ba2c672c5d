//! Work streams and profiling markers
//!
//! A [`Stream`] is a FIFO queue of device work: launches, copies, and
//! markers retire in submission order, independent of other streams on the
//! same accelerator. [`Stream::synchronize`] blocks until everything
//! submitted so far has retired; only then do markers resolve to
//! timestamps.

use crate::accelerator::Shared;
use crate::buffer::Buffer;
use crate::error::{Error, Result};
use arclight_backends::{MarkerHandle, QueueHandle};
use std::sync::Arc;

/// FIFO queue of work on one accelerator
pub struct Stream {
    pub(crate) shared: Arc<Shared>,
    pub(crate) queue: QueueHandle,
    released: bool,
}

impl Stream {
    pub(crate) fn create(shared: Arc<Shared>) -> Result<Self> {
        let queue = shared.backend()?.create_queue()?;
        Ok(Self {
            shared,
            queue,
            released: false,
        })
    }

    /// Enqueue a device-side copy between two buffers on this accelerator
    pub fn copy<T: bytemuck::Pod>(&self, src: &Buffer<T>, dst: &Buffer<T>) -> Result<()> {
        if src.accelerator_id() != self.shared.id || dst.accelerator_id() != self.shared.id {
            return Err(Error::InvalidArgument(
                "stream copy requires both buffers on the stream's accelerator".to_string(),
            ));
        }
        if src.len() != dst.len() {
            return Err(Error::SizeMismatch {
                expected: src.len(),
                actual: dst.len(),
            });
        }
        self.shared.backend()?.submit_copy(
            self.queue,
            src.handle(),
            0,
            dst.handle(),
            0,
            src.size_bytes(),
        )?;
        Ok(())
    }

    /// Enqueue a profiling marker
    ///
    /// The returned marker has no timestamp until the stream is
    /// synchronized past it.
    pub fn marker(&self) -> Result<ProfilingMarker> {
        let handle = self.shared.backend()?.submit_marker(self.queue)?;
        Ok(ProfilingMarker {
            shared: Arc::clone(&self.shared),
            handle,
        })
    }

    /// Block until all work submitted so far has retired
    #[tracing::instrument(skip_all, fields(queue = %self.queue))]
    pub fn synchronize(&self) -> Result<()> {
        self.shared.backend()?.synchronize(self.queue)?;
        Ok(())
    }

    /// Tear the stream down now instead of at drop
    ///
    /// Waits for submitted work, then destroys the queue. Idempotent; later
    /// calls and the eventual drop are no-ops.
    pub fn dispose(&mut self) {
        if !self.released {
            self.released = true;
            if let Ok(mut backend) = self.shared.backend() {
                let _ = backend.destroy_queue(self.queue);
            }
        }
    }
}

impl Drop for Stream {
    fn drop(&mut self) {
        self.dispose();
    }
}

impl std::fmt::Debug for Stream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Stream")
            .field("queue", &self.queue)
            .field("accelerator", &self.shared.id)
            .finish()
    }
}

/// Point-in-time marker on a stream
pub struct ProfilingMarker {
    shared: Arc<Shared>,
    handle: MarkerHandle,
}

impl ProfilingMarker {
    /// The marker's timestamp, or `None` if the stream has not been
    /// synchronized past it yet
    pub fn timestamp(&self) -> Result<Option<MarkerTimestamp>> {
        let nanos = self.shared.backend()?.marker_timestamp(self.handle)?;
        Ok(nanos.map(|nanos| MarkerTimestamp { nanos }))
    }
}

/// Nanoseconds since the owning backend was opened
///
/// Timestamps from different accelerators share no epoch and must not be
/// compared.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct MarkerTimestamp {
    nanos: u64,
}

impl MarkerTimestamp {
    pub fn nanos(self) -> u64 {
        self.nanos
    }
}

/// Signed interval between two markers, so `a - b == -(b - a)`
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct MarkerDelta {
    nanos: i64,
}

impl MarkerDelta {
    pub fn nanos(self) -> i64 {
        self.nanos
    }

    pub fn as_secs_f64(self) -> f64 {
        self.nanos as f64 / 1e9
    }
}

impl std::ops::Sub for MarkerTimestamp {
    type Output = MarkerDelta;

    fn sub(self, rhs: Self) -> MarkerDelta {
        MarkerDelta {
            nanos: self.nanos as i64 - rhs.nanos as i64,
        }
    }
}

impl std::ops::Neg for MarkerDelta {
    type Output = MarkerDelta;

    fn neg(self) -> MarkerDelta {
        MarkerDelta { nanos: -self.nanos }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::accelerator::Accelerator;

    #[test]
    fn test_marker_resolves_only_after_synchronize() {
        let accel = Accelerator::cpu().unwrap();
        let stream = accel.stream().unwrap();
        let marker = stream.marker().unwrap();
        assert!(marker.timestamp().unwrap().is_none());

        stream.synchronize().unwrap();
        assert!(marker.timestamp().unwrap().is_some());
    }

    #[test]
    fn test_markers_are_monotonic_in_submission_order() {
        let accel = Accelerator::cpu().unwrap();
        let stream = accel.stream().unwrap();
        let first = stream.marker().unwrap();
        let second = stream.marker().unwrap();
        stream.synchronize().unwrap();

        let t1 = first.timestamp().unwrap().unwrap();
        let t2 = second.timestamp().unwrap().unwrap();
        assert!(t2 >= t1);
    }

    #[test]
    fn test_delta_is_antisymmetric() {
        let a = MarkerTimestamp { nanos: 1_000 };
        let b = MarkerTimestamp { nanos: 3_500 };
        assert_eq!((b - a).nanos(), 2_500);
        assert_eq!(b - a, -(a - b));
    }

    #[test]
    fn test_stream_copy_checks_ownership() {
        let a = Accelerator::cpu().unwrap();
        let b = Accelerator::cpu().unwrap();
        let stream = a.stream().unwrap();
        let src = a.from_slice(&[1u32, 2]).unwrap();
        let foreign = b.alloc::<u32>(2).unwrap();
        assert!(matches!(
            stream.copy(&src, &foreign),
            Err(Error::InvalidArgument(_))
        ));
    }
}

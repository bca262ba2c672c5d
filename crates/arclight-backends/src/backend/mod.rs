//! Backend abstraction: the trait plus the handle and launch types

pub mod traits;
pub mod types;

pub use traits::Backend;
pub use types::{
    BufferHandle, GridDim, GroupDim, KernelHandle, LaunchArg, LaunchConfig, MarkerHandle,
    QueueHandle, ScalarValue,
};

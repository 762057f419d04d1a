//! Backend abstraction layer
//!
//! Provides the [`GpuBackend`] trait together with the Vulkan implementation and
//! a CPU-only dummy implementation used for testing.

pub mod dummy;
pub mod traits;
pub mod types;

#[cfg(feature = "vulkan-backend")]
pub mod vulkan;

pub use traits::*;
pub use types::*;

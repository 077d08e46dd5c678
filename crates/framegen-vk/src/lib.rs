//! Vulkan side of framegen: the interception hooks installed into the
//! Vulkan loader's lookup functions and the per-swapchain pipeline that
//! interleaves generated frames with the application's own.

pub mod context;
pub mod copy;
pub mod device;
pub mod error;
pub mod generator;
pub mod hooks;
pub mod loader;
pub mod mini;
pub mod state;

pub use error::{FrameGenError, GeneratorError, Result};

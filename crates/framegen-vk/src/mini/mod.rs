//! Single-owner wrappers around the Vulkan objects the pipeline creates.
//! Each wrapper keeps the device dispatch alive and releases its object on drop.

mod command_buffer;
mod command_pool;
mod fence;
mod image;
mod semaphore;

pub use command_buffer::{CommandBuffer, CommandBufferState};
pub use command_pool::CommandPool;
pub use fence::Fence;
pub use image::Image;
pub use semaphore::Semaphore;

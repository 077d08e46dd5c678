use std::sync::Arc;

use ash::vk;

use crate::device::DeviceDispatch;
use crate::error::{FrameGenError, Result};

/// Pool for the short-lived command buffers of one swapchain. Shared by the
/// buffers allocated from it so it is destroyed after the last of them.
pub struct CommandPool {
    dispatch: Arc<DeviceDispatch>,
    pool: vk::CommandPool,
}

impl CommandPool {
    pub fn new(dispatch: &Arc<DeviceDispatch>, queue_family_index: u32) -> Result<Self> {
        let info = vk::CommandPoolCreateInfo::default()
            .flags(vk::CommandPoolCreateFlags::TRANSIENT)
            .queue_family_index(queue_family_index);
        let pool = unsafe { dispatch.device().create_command_pool(&info, None) }
            .map_err(FrameGenError::vulkan("create command pool"))?;
        Ok(Self {
            dispatch: Arc::clone(dispatch),
            pool,
        })
    }

    pub fn handle(&self) -> vk::CommandPool {
        self.pool
    }

    pub fn dispatch(&self) -> &Arc<DeviceDispatch> {
        &self.dispatch
    }
}

impl Drop for CommandPool {
    fn drop(&mut self) {
        unsafe { self.dispatch.device().destroy_command_pool(self.pool, None) };
    }
}

use std::sync::Arc;

use ash::vk;

use crate::device::DeviceDispatch;
use crate::error::{FrameGenError, Result};

pub struct Fence {
    dispatch: Arc<DeviceDispatch>,
    fence: vk::Fence,
}

impl Fence {
    pub fn new(dispatch: &Arc<DeviceDispatch>) -> Result<Self> {
        let info = vk::FenceCreateInfo::default();
        let fence = unsafe { dispatch.device().create_fence(&info, None) }
            .map_err(FrameGenError::vulkan("create fence"))?;
        Ok(Self {
            dispatch: Arc::clone(dispatch),
            fence,
        })
    }

    pub fn handle(&self) -> vk::Fence {
        self.fence
    }

    pub fn is_signaled(&self) -> Result<bool> {
        unsafe { self.dispatch.device().get_fence_status(self.fence) }
            .map_err(FrameGenError::vulkan("query fence status"))
    }

    pub fn wait(&self, timeout: u64) -> Result<()> {
        unsafe { self.dispatch.device().wait_for_fences(&[self.fence], true, timeout) }
            .map_err(FrameGenError::vulkan("wait for fence"))
    }
}

impl Drop for Fence {
    fn drop(&mut self) {
        unsafe { self.dispatch.device().destroy_fence(self.fence, None) };
    }
}

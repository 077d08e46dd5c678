use std::os::fd::{FromRawFd, OwnedFd};
use std::sync::Arc;

use ash::vk;

use crate::device::DeviceDispatch;
use crate::error::{FrameGenError, Result};

pub struct Semaphore {
    dispatch: Arc<DeviceDispatch>,
    semaphore: vk::Semaphore,
}

impl Semaphore {
    pub fn new(dispatch: &Arc<DeviceDispatch>) -> Result<Self> {
        let info = vk::SemaphoreCreateInfo::default();
        let semaphore = unsafe { dispatch.device().create_semaphore(&info, None) }
            .map_err(FrameGenError::vulkan("create semaphore"))?;
        Ok(Self {
            dispatch: Arc::clone(dispatch),
            semaphore,
        })
    }

    /// Create a semaphore exportable as an opaque fd and export it.
    pub fn exported(dispatch: &Arc<DeviceDispatch>) -> Result<(Self, OwnedFd)> {
        let mut export = vk::ExportSemaphoreCreateInfo::default()
            .handle_types(vk::ExternalSemaphoreHandleTypeFlags::OPAQUE_FD);
        let info = vk::SemaphoreCreateInfo::default().push_next(&mut export);
        let semaphore = unsafe { dispatch.device().create_semaphore(&info, None) }
            .map_err(FrameGenError::vulkan("create exportable semaphore"))?;
        let semaphore = Self {
            dispatch: Arc::clone(dispatch),
            semaphore,
        };

        let get_fd = vk::SemaphoreGetFdInfoKHR::default()
            .semaphore(semaphore.semaphore)
            .handle_type(vk::ExternalSemaphoreHandleTypeFlags::OPAQUE_FD);
        let raw = unsafe { dispatch.semaphore_fd().get_semaphore_fd(&get_fd) }
            .map_err(FrameGenError::vulkan("export semaphore fd"))?;
        let fd = unsafe { OwnedFd::from_raw_fd(raw) };
        Ok((semaphore, fd))
    }

    pub fn handle(&self) -> vk::Semaphore {
        self.semaphore
    }
}

impl Drop for Semaphore {
    fn drop(&mut self) {
        unsafe { self.dispatch.device().destroy_semaphore(self.semaphore, None) };
    }
}

use std::os::fd::{FromRawFd, OwnedFd};
use std::sync::Arc;

use ash::vk;

use crate::device::DeviceDispatch;
use crate::error::{FrameGenError, Result};

/// 2D color image backed by a dedicated, exportable allocation.
pub struct Image {
    dispatch: Arc<DeviceDispatch>,
    image: vk::Image,
    memory: vk::DeviceMemory,
    extent: vk::Extent2D,
}

impl Image {
    /// Create the image, bind device-local memory to it and export that
    /// memory as an opaque fd.
    pub fn exported(
        dispatch: &Arc<DeviceDispatch>,
        extent: vk::Extent2D,
        format: vk::Format,
        usage: vk::ImageUsageFlags,
    ) -> Result<(Self, OwnedFd)> {
        let device = dispatch.device();

        let mut external = vk::ExternalMemoryImageCreateInfo::default()
            .handle_types(vk::ExternalMemoryHandleTypeFlags::OPAQUE_FD);
        let info = vk::ImageCreateInfo::default()
            .push_next(&mut external)
            .image_type(vk::ImageType::TYPE_2D)
            .format(format)
            .extent(vk::Extent3D {
                width: extent.width,
                height: extent.height,
                depth: 1,
            })
            .mip_levels(1)
            .array_layers(1)
            .samples(vk::SampleCountFlags::TYPE_1)
            .tiling(vk::ImageTiling::OPTIMAL)
            .usage(usage)
            .sharing_mode(vk::SharingMode::EXCLUSIVE)
            .initial_layout(vk::ImageLayout::UNDEFINED);
        let image = unsafe { device.create_image(&info, None) }
            .map_err(FrameGenError::vulkan("create image"))?;

        // From here on, Drop releases whatever has been created.
        let mut this = Self {
            dispatch: Arc::clone(dispatch),
            image,
            memory: vk::DeviceMemory::null(),
            extent,
        };

        let requirements = unsafe { device.get_image_memory_requirements(image) };
        let memory_type = dispatch
            .find_memory_type(
                requirements.memory_type_bits,
                vk::MemoryPropertyFlags::DEVICE_LOCAL,
            )
            .ok_or(FrameGenError::Vulkan {
                result: vk::Result::ERROR_OUT_OF_DEVICE_MEMORY,
                context: "find device-local memory type",
            })?;

        let mut dedicated = vk::MemoryDedicatedAllocateInfo::default().image(image);
        let mut export = vk::ExportMemoryAllocateInfo::default()
            .handle_types(vk::ExternalMemoryHandleTypeFlags::OPAQUE_FD);
        let alloc = vk::MemoryAllocateInfo::default()
            .push_next(&mut dedicated)
            .push_next(&mut export)
            .allocation_size(requirements.size)
            .memory_type_index(memory_type);
        this.memory = unsafe { device.allocate_memory(&alloc, None) }
            .map_err(FrameGenError::vulkan("allocate image memory"))?;

        unsafe { device.bind_image_memory(image, this.memory, 0) }
            .map_err(FrameGenError::vulkan("bind image memory"))?;

        let get_fd = vk::MemoryGetFdInfoKHR::default()
            .memory(this.memory)
            .handle_type(vk::ExternalMemoryHandleTypeFlags::OPAQUE_FD);
        let raw = unsafe { dispatch.memory_fd().get_memory_fd(&get_fd) }
            .map_err(FrameGenError::vulkan("export image memory fd"))?;
        let fd = unsafe { OwnedFd::from_raw_fd(raw) };

        Ok((this, fd))
    }

    pub fn handle(&self) -> vk::Image {
        self.image
    }

    pub fn extent(&self) -> vk::Extent2D {
        self.extent
    }
}

impl Drop for Image {
    fn drop(&mut self) {
        let device = self.dispatch.device();
        unsafe {
            device.destroy_image(self.image, None);
            if self.memory != vk::DeviceMemory::null() {
                device.free_memory(self.memory, None);
            }
        }
    }
}

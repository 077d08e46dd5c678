//! Per-device state: the loaded dispatch tables plus the queue used for the
//! pipeline's own submissions.

use std::collections::HashSet;
use std::ffi::{c_char, CStr};
use std::sync::Arc;

use ash::vk;

use crate::error::{FrameGenError, Result};

/// Instance extensions needed to share images and semaphores with the
/// frame generator.
pub const REQUIRED_INSTANCE_EXTENSIONS: [&CStr; 3] = [
    ash::khr::get_physical_device_properties2::NAME,
    ash::khr::external_memory_capabilities::NAME,
    ash::khr::external_semaphore_capabilities::NAME,
];

pub const REQUIRED_DEVICE_EXTENSIONS: [&CStr; 4] = [
    ash::khr::external_memory::NAME,
    ash::khr::external_memory_fd::NAME,
    ash::khr::external_semaphore::NAME,
    ash::khr::external_semaphore_fd::NAME,
];

/// Function tables for one logical device, resolved through the real loader.
pub struct DeviceDispatch {
    device: ash::Device,
    swapchain: ash::khr::swapchain::Device,
    memory_fd: ash::khr::external_memory_fd::Device,
    semaphore_fd: ash::khr::external_semaphore_fd::Device,
    memory_properties: vk::PhysicalDeviceMemoryProperties,
}

impl DeviceDispatch {
    /// # Safety
    /// `device` must be a live device created from `physical_device` of `instance`.
    pub unsafe fn load(
        instance: &ash::Instance,
        physical_device: vk::PhysicalDevice,
        device: vk::Device,
    ) -> Self {
        let device = unsafe { ash::Device::load(instance.fp_v1_0(), device) };
        let swapchain = ash::khr::swapchain::Device::new(instance, &device);
        let memory_fd = ash::khr::external_memory_fd::Device::new(instance, &device);
        let semaphore_fd = ash::khr::external_semaphore_fd::Device::new(instance, &device);
        let memory_properties =
            unsafe { instance.get_physical_device_memory_properties(physical_device) };
        Self {
            device,
            swapchain,
            memory_fd,
            semaphore_fd,
            memory_properties,
        }
    }

    pub fn device(&self) -> &ash::Device {
        &self.device
    }

    pub fn handle(&self) -> vk::Device {
        self.device.handle()
    }

    pub fn swapchain(&self) -> &ash::khr::swapchain::Device {
        &self.swapchain
    }

    pub fn memory_fd(&self) -> &ash::khr::external_memory_fd::Device {
        &self.memory_fd
    }

    pub fn semaphore_fd(&self) -> &ash::khr::external_semaphore_fd::Device {
        &self.semaphore_fd
    }

    /// First memory type allowed by `type_bits` that has all of `flags`.
    pub fn find_memory_type(&self, type_bits: u32, flags: vk::MemoryPropertyFlags) -> Option<u32> {
        let count = (self.memory_properties.memory_type_count as usize)
            .min(self.memory_properties.memory_types.len());
        self.memory_properties.memory_types[..count]
            .iter()
            .enumerate()
            .find(|(index, ty)| {
                type_bits & (1 << index) != 0 && ty.property_flags.contains(flags)
            })
            .map(|(index, _)| index as u32)
    }
}

/// State kept for every device the application created.
pub struct DeviceState {
    pub dispatch: Arc<DeviceDispatch>,
    pub physical_device: vk::PhysicalDevice,
    pub queue_family_index: u32,
    pub queue: vk::Queue,
    /// Generated frames per application frame, at least 1.
    pub frame_gen_count: usize,
}

impl DeviceState {
    /// Build the state for a freshly created device. Fails if the request did
    /// not enable a queue family with graphics support.
    ///
    /// # Safety
    /// `create_info` must be the info `device` was created with.
    pub unsafe fn new(
        instance: &ash::Instance,
        physical_device: vk::PhysicalDevice,
        device: vk::Device,
        create_info: &vk::DeviceCreateInfo<'_>,
        frame_gen_count: usize,
    ) -> Result<Self> {
        let families =
            unsafe { instance.get_physical_device_queue_family_properties(physical_device) };
        let requested = unsafe { queue_create_infos(create_info) };
        let queue_family_index =
            select_queue_family(requested, &families, vk::QueueFlags::GRAPHICS)
                .ok_or(FrameGenError::NoSuitableQueue)?;

        let dispatch = Arc::new(unsafe { DeviceDispatch::load(instance, physical_device, device) });
        let queue = unsafe { dispatch.device().get_device_queue(queue_family_index, 0) };

        Ok(Self {
            dispatch,
            physical_device,
            queue_family_index,
            queue,
            frame_gen_count: frame_gen_count.max(1),
        })
    }
}

unsafe fn queue_create_infos<'a>(
    create_info: &'a vk::DeviceCreateInfo<'_>,
) -> &'a [vk::DeviceQueueCreateInfo<'a>] {
    if create_info.p_queue_create_infos.is_null() || create_info.queue_create_info_count == 0 {
        return &[];
    }
    unsafe {
        std::slice::from_raw_parts(
            create_info.p_queue_create_infos.cast(),
            create_info.queue_create_info_count as usize,
        )
    }
}

/// First queue family enabled by the request whose capabilities include `flags`.
pub fn select_queue_family(
    requested: &[vk::DeviceQueueCreateInfo<'_>],
    families: &[vk::QueueFamilyProperties],
    flags: vk::QueueFlags,
) -> Option<u32> {
    requested
        .iter()
        .filter(|info| info.queue_count > 0)
        .map(|info| info.queue_family_index)
        .find(|&index| {
            families
                .get(index as usize)
                .is_some_and(|family| family.queue_flags.contains(flags))
        })
}

/// Append every `required` name missing from `existing`, keeping the order of
/// the application's list.
///
/// # Safety
/// `existing` must point to `count` valid C strings (or be null with count 0).
pub unsafe fn add_extensions(
    existing: *const *const c_char,
    count: u32,
    required: &[&'static CStr],
) -> Vec<*const c_char> {
    let mut names: Vec<*const c_char> = if existing.is_null() || count == 0 {
        Vec::new()
    } else {
        unsafe { std::slice::from_raw_parts(existing, count as usize) }.to_vec()
    };

    let mut present: HashSet<Vec<u8>> = names
        .iter()
        .filter(|name| !name.is_null())
        .map(|&name| unsafe { CStr::from_ptr(name) }.to_bytes().to_vec())
        .collect();

    for ext in required {
        if present.insert(ext.to_bytes().to_vec()) {
            names.push(ext.as_ptr());
        }
    }
    names
}

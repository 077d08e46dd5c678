//! A fake Vulkan driver for exercising the hooks and the present pipeline
//! without a GPU. Function pointers are handed out through
//! [`get_instance_proc_addr`]; every call lands in the [`FakeVulkan`]
//! installed on the calling thread and is recorded in its event log.

#![allow(unsafe_op_in_unsafe_fn)]

use std::cell::RefCell;
use std::collections::{HashMap, HashSet, VecDeque};
use std::ffi::{c_char, c_int, c_void, CStr};
use std::os::fd::IntoRawFd;
use std::sync::atomic::{AtomicU64, Ordering};

use ash::vk;
use ash::vk::Handle;

static NEXT_HANDLE: AtomicU64 = AtomicU64::new(0x1000);

/// Fresh non-zero, pointer-aligned handle value, unique across threads.
pub fn new_handle() -> u64 {
    NEXT_HANDLE.fetch_add(0x10, Ordering::Relaxed)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Kind {
    Instance,
    Device,
    Swapchain,
    Image,
    Memory,
    Semaphore,
    Fence,
    CommandPool,
    CommandBuffer,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Barrier {
        image: u64,
        old: vk::ImageLayout,
        new: vk::ImageLayout,
    },
    Copy {
        src: u64,
        dst: u64,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    Submit {
        waits: Vec<u64>,
        wait_stages: Vec<vk::PipelineStageFlags>,
        signals: Vec<u64>,
        commands: Vec<Command>,
        fence: u64,
    },
    Acquire {
        swapchain: u64,
        semaphore: u64,
        image_index: u32,
    },
    Present {
        queue: u64,
        waits: Vec<u64>,
        swapchain: u64,
        image_index: u32,
        p_next: usize,
    },
    WaitFences {
        fences: Vec<u64>,
    },
    QueueWaitIdle,
    GeneratorCreate {
        id: i32,
        width: u32,
        height: u32,
        outputs: usize,
    },
    GeneratorPresent {
        id: i32,
        outputs: usize,
    },
    GeneratorDelete {
        id: i32,
    },
}

#[derive(Debug, Clone)]
pub struct SwapchainRecord {
    pub images: Vec<u64>,
    pub next_image: u32,
    pub min_image_count: u32,
    pub image_usage: vk::ImageUsageFlags,
    pub present_mode: vk::PresentModeKHR,
    pub extent: vk::Extent2D,
}

#[derive(Debug, Clone)]
pub struct DeviceRecord {
    pub extensions: Vec<String>,
    pub queue_families: Vec<u32>,
}

pub struct FakeVulkan {
    pub events: Vec<Event>,
    results: HashMap<&'static str, VecDeque<vk::Result>>,
    live: HashMap<Kind, HashSet<u64>>,
    /// When set, fences stay unsignaled until waited on.
    pub hold_fences: bool,
    fences: HashMap<u64, bool>,
    recording: HashMap<u64, Vec<Command>>,
    pub swapchains: HashMap<u64, SwapchainRecord>,
    pub devices: HashMap<u64, DeviceRecord>,
    pub instance_extensions: Vec<String>,
    pub physical_device: u64,
    pub queue_families: Vec<vk::QueueFlags>,
    pub queue: u64,
    pub exported_fds: usize,
}

thread_local! {
    static CURRENT: RefCell<Option<FakeVulkan>> = const { RefCell::new(None) };
}

impl FakeVulkan {
    /// Install a fresh fake driver on the current thread.
    pub fn install() {
        let fake = FakeVulkan {
            events: Vec::new(),
            results: HashMap::new(),
            live: HashMap::new(),
            hold_fences: false,
            fences: HashMap::new(),
            recording: HashMap::new(),
            swapchains: HashMap::new(),
            devices: HashMap::new(),
            instance_extensions: Vec::new(),
            physical_device: new_handle(),
            queue_families: vec![
                vk::QueueFlags::TRANSFER,
                vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE | vk::QueueFlags::TRANSFER,
            ],
            queue: new_handle(),
            exported_fds: 0,
        };
        CURRENT.with(|c| *c.borrow_mut() = Some(fake));
    }

    pub fn with<R>(f: impl FnOnce(&mut FakeVulkan) -> R) -> R {
        CURRENT.with(|c| {
            let mut current = c.borrow_mut();
            let fake = current
                .as_mut()
                .expect("FakeVulkan::install() must run on this thread first");
            f(fake)
        })
    }

    pub fn try_with<R>(f: impl FnOnce(&mut FakeVulkan) -> R) -> Option<R> {
        CURRENT.with(|c| c.borrow_mut().as_mut().map(f))
    }

    /// Make the next call of `function` return `result`.
    pub fn queue_result(&mut self, function: &'static str, result: vk::Result) {
        self.results.entry(function).or_default().push_back(result);
    }

    fn next_result(&mut self, function: &'static str) -> vk::Result {
        self.results
            .get_mut(function)
            .and_then(VecDeque::pop_front)
            .unwrap_or(vk::Result::SUCCESS)
    }

    fn create(&mut self, kind: Kind) -> u64 {
        let handle = new_handle();
        self.live.entry(kind).or_default().insert(handle);
        handle
    }

    fn destroy(&mut self, kind: Kind, handle: u64) {
        if handle == 0 {
            return;
        }
        let removed = self.live.entry(kind).or_default().remove(&handle);
        assert!(removed, "destroying unknown {:?} {:#x}", kind, handle);
    }

    pub fn live(&self, kind: Kind) -> usize {
        self.live.get(&kind).map_or(0, HashSet::len)
    }

    pub fn is_live(&self, kind: Kind, handle: u64) -> bool {
        self.live.get(&kind).is_some_and(|set| set.contains(&handle))
    }

    pub fn presents(&self) -> Vec<Event> {
        self.events
            .iter()
            .filter(|e| matches!(e, Event::Present { .. }))
            .cloned()
            .collect()
    }

    pub fn submits(&self) -> Vec<Event> {
        self.events
            .iter()
            .filter(|e| matches!(e, Event::Submit { .. }))
            .cloned()
            .collect()
    }

    /// Register a swapchain with `count` images without going through
    /// `vkCreateSwapchainKHR`.
    pub fn add_swapchain(&mut self, count: u32, extent: vk::Extent2D) -> (vk::SwapchainKHR, Vec<vk::Image>) {
        let handle = self.create(Kind::Swapchain);
        let images: Vec<u64> = (0..count).map(|_| new_handle()).collect();
        self.swapchains.insert(
            handle,
            SwapchainRecord {
                images: images.clone(),
                next_image: 0,
                min_image_count: count,
                image_usage: vk::ImageUsageFlags::COLOR_ATTACHMENT,
                present_mode: vk::PresentModeKHR::FIFO,
                extent,
            },
        );
        (
            vk::SwapchainKHR::from_raw(handle),
            images.into_iter().map(vk::Image::from_raw).collect(),
        )
    }

    fn export_fd(&mut self) -> c_int {
        self.exported_fds += 1;
        std::fs::File::open("/dev/null")
            .map(IntoRawFd::into_raw_fd)
            .unwrap_or(-1)
    }
}

unsafe fn slice<'a, T>(ptr: *const T, len: u32) -> &'a [T] {
    if ptr.is_null() || len == 0 {
        &[]
    } else {
        std::slice::from_raw_parts(ptr, len as usize)
    }
}

unsafe fn names(ptr: *const *const c_char, len: u32) -> Vec<String> {
    slice(ptr, len)
        .iter()
        .map(|&n| CStr::from_ptr(n).to_string_lossy().into_owned())
        .collect()
}

// ── Instance level ──────────────────────────────────────────

unsafe extern "system" fn create_instance(
    p_create_info: *const vk::InstanceCreateInfo<'_>,
    _p_allocator: *const vk::AllocationCallbacks<'_>,
    p_instance: *mut vk::Instance,
) -> vk::Result {
    FakeVulkan::with(|f| {
        let result = f.next_result("vkCreateInstance");
        if result != vk::Result::SUCCESS {
            return result;
        }
        let info = &*p_create_info;
        f.instance_extensions = names(info.pp_enabled_extension_names, info.enabled_extension_count);
        *p_instance = vk::Instance::from_raw(f.create(Kind::Instance));
        vk::Result::SUCCESS
    })
}

unsafe extern "system" fn destroy_instance(
    instance: vk::Instance,
    _p_allocator: *const vk::AllocationCallbacks<'_>,
) {
    FakeVulkan::with(|f| f.destroy(Kind::Instance, instance.as_raw()));
}

unsafe extern "system" fn enumerate_physical_devices(
    _instance: vk::Instance,
    p_count: *mut u32,
    p_devices: *mut vk::PhysicalDevice,
) -> vk::Result {
    FakeVulkan::with(|f| {
        if p_devices.is_null() {
            *p_count = 1;
        } else {
            *p_devices = vk::PhysicalDevice::from_raw(f.physical_device);
            *p_count = 1;
        }
        vk::Result::SUCCESS
    })
}

unsafe extern "system" fn get_physical_device_queue_family_properties(
    _physical_device: vk::PhysicalDevice,
    p_count: *mut u32,
    p_properties: *mut vk::QueueFamilyProperties,
) {
    FakeVulkan::with(|f| {
        if p_properties.is_null() {
            *p_count = f.queue_families.len() as u32;
            return;
        }
        let count = (*p_count as usize).min(f.queue_families.len());
        for (i, flags) in f.queue_families.iter().take(count).enumerate() {
            *p_properties.add(i) = vk::QueueFamilyProperties {
                queue_flags: *flags,
                queue_count: 1,
                timestamp_valid_bits: 64,
                min_image_transfer_granularity: vk::Extent3D {
                    width: 1,
                    height: 1,
                    depth: 1,
                },
            };
        }
        *p_count = count as u32;
    })
}

unsafe extern "system" fn get_physical_device_memory_properties(
    _physical_device: vk::PhysicalDevice,
    p_properties: *mut vk::PhysicalDeviceMemoryProperties,
) {
    let mut props = vk::PhysicalDeviceMemoryProperties::default();
    props.memory_type_count = 2;
    props.memory_types[0] = vk::MemoryType {
        property_flags: vk::MemoryPropertyFlags::HOST_VISIBLE,
        heap_index: 1,
    };
    props.memory_types[1] = vk::MemoryType {
        property_flags: vk::MemoryPropertyFlags::DEVICE_LOCAL,
        heap_index: 0,
    };
    props.memory_heap_count = 2;
    *p_properties = props;
}

unsafe extern "system" fn create_device(
    _physical_device: vk::PhysicalDevice,
    p_create_info: *const vk::DeviceCreateInfo<'_>,
    _p_allocator: *const vk::AllocationCallbacks<'_>,
    p_device: *mut vk::Device,
) -> vk::Result {
    FakeVulkan::with(|f| {
        let result = f.next_result("vkCreateDevice");
        if result != vk::Result::SUCCESS {
            return result;
        }
        let info = &*p_create_info;
        let handle = f.create(Kind::Device);
        f.devices.insert(
            handle,
            DeviceRecord {
                extensions: names(info.pp_enabled_extension_names, info.enabled_extension_count),
                queue_families: slice(info.p_queue_create_infos, info.queue_create_info_count)
                    .iter()
                    .map(|q| q.queue_family_index)
                    .collect(),
            },
        );
        *p_device = vk::Device::from_raw(handle);
        vk::Result::SUCCESS
    })
}

unsafe extern "system" fn destroy_device(
    device: vk::Device,
    _p_allocator: *const vk::AllocationCallbacks<'_>,
) {
    FakeVulkan::with(|f| f.destroy(Kind::Device, device.as_raw()));
}

unsafe extern "system" fn get_device_queue(
    _device: vk::Device,
    _family: u32,
    _index: u32,
    p_queue: *mut vk::Queue,
) {
    FakeVulkan::with(|f| *p_queue = vk::Queue::from_raw(f.queue));
}

// ── Swapchain ───────────────────────────────────────────────

unsafe extern "system" fn create_swapchain(
    _device: vk::Device,
    p_create_info: *const vk::SwapchainCreateInfoKHR<'_>,
    _p_allocator: *const vk::AllocationCallbacks<'_>,
    p_swapchain: *mut vk::SwapchainKHR,
) -> vk::Result {
    FakeVulkan::with(|f| {
        let result = f.next_result("vkCreateSwapchainKHR");
        if result != vk::Result::SUCCESS {
            return result;
        }
        let info = &*p_create_info;
        let count = info.min_image_count.max(1);
        let (swapchain, _) = f.add_swapchain(count, info.image_extent);
        if let Some(record) = f.swapchains.get_mut(&swapchain.as_raw()) {
            record.min_image_count = info.min_image_count;
            record.image_usage = info.image_usage;
            record.present_mode = info.present_mode;
        }
        *p_swapchain = swapchain;
        vk::Result::SUCCESS
    })
}

unsafe extern "system" fn destroy_swapchain(
    _device: vk::Device,
    swapchain: vk::SwapchainKHR,
    _p_allocator: *const vk::AllocationCallbacks<'_>,
) {
    FakeVulkan::with(|f| {
        f.swapchains.remove(&swapchain.as_raw());
        f.destroy(Kind::Swapchain, swapchain.as_raw());
    });
}

unsafe extern "system" fn get_swapchain_images(
    _device: vk::Device,
    swapchain: vk::SwapchainKHR,
    p_count: *mut u32,
    p_images: *mut vk::Image,
) -> vk::Result {
    FakeVulkan::with(|f| {
        let result = f.next_result("vkGetSwapchainImagesKHR");
        if result != vk::Result::SUCCESS {
            return result;
        }
        let Some(record) = f.swapchains.get(&swapchain.as_raw()) else {
            return vk::Result::ERROR_SURFACE_LOST_KHR;
        };
        if p_images.is_null() {
            *p_count = record.images.len() as u32;
            return vk::Result::SUCCESS;
        }
        let count = (*p_count as usize).min(record.images.len());
        for (i, image) in record.images.iter().take(count).enumerate() {
            *p_images.add(i) = vk::Image::from_raw(*image);
        }
        *p_count = count as u32;
        if count < record.images.len() {
            vk::Result::INCOMPLETE
        } else {
            vk::Result::SUCCESS
        }
    })
}

unsafe extern "system" fn acquire_next_image(
    _device: vk::Device,
    swapchain: vk::SwapchainKHR,
    _timeout: u64,
    semaphore: vk::Semaphore,
    _fence: vk::Fence,
    p_image_index: *mut u32,
) -> vk::Result {
    FakeVulkan::with(|f| {
        let result = f.next_result("vkAcquireNextImageKHR");
        if result.as_raw() < 0 {
            return result;
        }
        let Some(record) = f.swapchains.get_mut(&swapchain.as_raw()) else {
            return vk::Result::ERROR_SURFACE_LOST_KHR;
        };
        let index = record.next_image;
        record.next_image = (index + 1) % record.images.len() as u32;
        *p_image_index = index;
        f.events.push(Event::Acquire {
            swapchain: swapchain.as_raw(),
            semaphore: semaphore.as_raw(),
            image_index: index,
        });
        result
    })
}

unsafe extern "system" fn queue_present(
    queue: vk::Queue,
    p_present_info: *const vk::PresentInfoKHR<'_>,
) -> vk::Result {
    FakeVulkan::with(|f| {
        let info = &*p_present_info;
        let swapchains = slice(info.p_swapchains, info.swapchain_count);
        let indices = slice(info.p_image_indices, info.swapchain_count);
        for (swapchain, index) in swapchains.iter().zip(indices) {
            f.events.push(Event::Present {
                queue: queue.as_raw(),
                waits: slice(info.p_wait_semaphores, info.wait_semaphore_count)
                    .iter()
                    .map(|s| s.as_raw())
                    .collect(),
                swapchain: swapchain.as_raw(),
                image_index: *index,
                p_next: info.p_next as usize,
            });
        }
        f.next_result("vkQueuePresentKHR")
    })
}

// ── Images and memory ───────────────────────────────────────

unsafe extern "system" fn create_image(
    _device: vk::Device,
    _p_create_info: *const vk::ImageCreateInfo<'_>,
    _p_allocator: *const vk::AllocationCallbacks<'_>,
    p_image: *mut vk::Image,
) -> vk::Result {
    FakeVulkan::with(|f| {
        let result = f.next_result("vkCreateImage");
        if result != vk::Result::SUCCESS {
            return result;
        }
        *p_image = vk::Image::from_raw(f.create(Kind::Image));
        vk::Result::SUCCESS
    })
}

unsafe extern "system" fn destroy_image(
    _device: vk::Device,
    image: vk::Image,
    _p_allocator: *const vk::AllocationCallbacks<'_>,
) {
    FakeVulkan::with(|f| f.destroy(Kind::Image, image.as_raw()));
}

unsafe extern "system" fn get_image_memory_requirements(
    _device: vk::Device,
    _image: vk::Image,
    p_requirements: *mut vk::MemoryRequirements,
) {
    *p_requirements = vk::MemoryRequirements {
        size: 4096,
        alignment: 256,
        memory_type_bits: 0b11,
    };
}

unsafe extern "system" fn allocate_memory(
    _device: vk::Device,
    p_allocate_info: *const vk::MemoryAllocateInfo<'_>,
    _p_allocator: *const vk::AllocationCallbacks<'_>,
    p_memory: *mut vk::DeviceMemory,
) -> vk::Result {
    FakeVulkan::with(|f| {
        let result = f.next_result("vkAllocateMemory");
        if result != vk::Result::SUCCESS {
            return result;
        }
        assert_eq!(
            (*p_allocate_info).memory_type_index,
            1,
            "image memory must be device local"
        );
        *p_memory = vk::DeviceMemory::from_raw(f.create(Kind::Memory));
        vk::Result::SUCCESS
    })
}

unsafe extern "system" fn free_memory(
    _device: vk::Device,
    memory: vk::DeviceMemory,
    _p_allocator: *const vk::AllocationCallbacks<'_>,
) {
    FakeVulkan::with(|f| f.destroy(Kind::Memory, memory.as_raw()));
}

unsafe extern "system" fn bind_image_memory(
    _device: vk::Device,
    _image: vk::Image,
    _memory: vk::DeviceMemory,
    _offset: vk::DeviceSize,
) -> vk::Result {
    FakeVulkan::with(|f| f.next_result("vkBindImageMemory"))
}

unsafe extern "system" fn get_memory_fd(
    _device: vk::Device,
    _p_info: *const vk::MemoryGetFdInfoKHR<'_>,
    p_fd: *mut c_int,
) -> vk::Result {
    FakeVulkan::with(|f| {
        let result = f.next_result("vkGetMemoryFdKHR");
        if result != vk::Result::SUCCESS {
            return result;
        }
        *p_fd = f.export_fd();
        vk::Result::SUCCESS
    })
}

// ── Synchronization ─────────────────────────────────────────

unsafe extern "system" fn create_semaphore(
    _device: vk::Device,
    _p_create_info: *const vk::SemaphoreCreateInfo<'_>,
    _p_allocator: *const vk::AllocationCallbacks<'_>,
    p_semaphore: *mut vk::Semaphore,
) -> vk::Result {
    FakeVulkan::with(|f| {
        let result = f.next_result("vkCreateSemaphore");
        if result != vk::Result::SUCCESS {
            return result;
        }
        *p_semaphore = vk::Semaphore::from_raw(f.create(Kind::Semaphore));
        vk::Result::SUCCESS
    })
}

unsafe extern "system" fn destroy_semaphore(
    _device: vk::Device,
    semaphore: vk::Semaphore,
    _p_allocator: *const vk::AllocationCallbacks<'_>,
) {
    FakeVulkan::with(|f| f.destroy(Kind::Semaphore, semaphore.as_raw()));
}

unsafe extern "system" fn get_semaphore_fd(
    _device: vk::Device,
    _p_info: *const vk::SemaphoreGetFdInfoKHR<'_>,
    p_fd: *mut c_int,
) -> vk::Result {
    FakeVulkan::with(|f| {
        let result = f.next_result("vkGetSemaphoreFdKHR");
        if result != vk::Result::SUCCESS {
            return result;
        }
        *p_fd = f.export_fd();
        vk::Result::SUCCESS
    })
}

unsafe extern "system" fn create_fence(
    _device: vk::Device,
    _p_create_info: *const vk::FenceCreateInfo<'_>,
    _p_allocator: *const vk::AllocationCallbacks<'_>,
    p_fence: *mut vk::Fence,
) -> vk::Result {
    FakeVulkan::with(|f| {
        let handle = f.create(Kind::Fence);
        f.fences.insert(handle, false);
        *p_fence = vk::Fence::from_raw(handle);
        vk::Result::SUCCESS
    })
}

unsafe extern "system" fn destroy_fence(
    _device: vk::Device,
    fence: vk::Fence,
    _p_allocator: *const vk::AllocationCallbacks<'_>,
) {
    FakeVulkan::with(|f| {
        f.fences.remove(&fence.as_raw());
        f.destroy(Kind::Fence, fence.as_raw());
    });
}

unsafe extern "system" fn get_fence_status(_device: vk::Device, fence: vk::Fence) -> vk::Result {
    FakeVulkan::with(|f| match f.fences.get(&fence.as_raw()) {
        Some(true) => vk::Result::SUCCESS,
        Some(false) => vk::Result::NOT_READY,
        None => vk::Result::ERROR_DEVICE_LOST,
    })
}

unsafe extern "system" fn wait_for_fences(
    _device: vk::Device,
    count: u32,
    p_fences: *const vk::Fence,
    _wait_all: vk::Bool32,
    _timeout: u64,
) -> vk::Result {
    FakeVulkan::with(|f| {
        let fences: Vec<u64> = slice(p_fences, count).iter().map(|h| h.as_raw()).collect();
        for fence in &fences {
            f.fences.insert(*fence, true);
        }
        f.events.push(Event::WaitFences { fences });
        vk::Result::SUCCESS
    })
}

unsafe extern "system" fn queue_wait_idle(_queue: vk::Queue) -> vk::Result {
    FakeVulkan::with(|f| {
        for signaled in f.fences.values_mut() {
            *signaled = true;
        }
        f.events.push(Event::QueueWaitIdle);
        vk::Result::SUCCESS
    })
}

// ── Commands ────────────────────────────────────────────────

unsafe extern "system" fn create_command_pool(
    _device: vk::Device,
    _p_create_info: *const vk::CommandPoolCreateInfo<'_>,
    _p_allocator: *const vk::AllocationCallbacks<'_>,
    p_pool: *mut vk::CommandPool,
) -> vk::Result {
    FakeVulkan::with(|f| {
        *p_pool = vk::CommandPool::from_raw(f.create(Kind::CommandPool));
        vk::Result::SUCCESS
    })
}

unsafe extern "system" fn destroy_command_pool(
    _device: vk::Device,
    pool: vk::CommandPool,
    _p_allocator: *const vk::AllocationCallbacks<'_>,
) {
    FakeVulkan::with(|f| f.destroy(Kind::CommandPool, pool.as_raw()));
}

unsafe extern "system" fn allocate_command_buffers(
    _device: vk::Device,
    p_allocate_info: *const vk::CommandBufferAllocateInfo<'_>,
    p_buffers: *mut vk::CommandBuffer,
) -> vk::Result {
    FakeVulkan::with(|f| {
        let result = f.next_result("vkAllocateCommandBuffers");
        if result != vk::Result::SUCCESS {
            return result;
        }
        for i in 0..(*p_allocate_info).command_buffer_count as usize {
            *p_buffers.add(i) = vk::CommandBuffer::from_raw(f.create(Kind::CommandBuffer));
        }
        vk::Result::SUCCESS
    })
}

unsafe extern "system" fn free_command_buffers(
    _device: vk::Device,
    _pool: vk::CommandPool,
    count: u32,
    p_buffers: *const vk::CommandBuffer,
) {
    FakeVulkan::with(|f| {
        for buffer in slice(p_buffers, count) {
            f.recording.remove(&buffer.as_raw());
            f.destroy(Kind::CommandBuffer, buffer.as_raw());
        }
    });
}

unsafe extern "system" fn begin_command_buffer(
    buffer: vk::CommandBuffer,
    _p_begin_info: *const vk::CommandBufferBeginInfo<'_>,
) -> vk::Result {
    FakeVulkan::with(|f| {
        f.recording.insert(buffer.as_raw(), Vec::new());
        vk::Result::SUCCESS
    })
}

unsafe extern "system" fn end_command_buffer(_buffer: vk::CommandBuffer) -> vk::Result {
    FakeVulkan::with(|f| f.next_result("vkEndCommandBuffer"))
}

#[allow(clippy::too_many_arguments)]
unsafe extern "system" fn cmd_pipeline_barrier(
    buffer: vk::CommandBuffer,
    _src_stage: vk::PipelineStageFlags,
    _dst_stage: vk::PipelineStageFlags,
    _dependency_flags: vk::DependencyFlags,
    _memory_barrier_count: u32,
    _p_memory_barriers: *const vk::MemoryBarrier<'_>,
    _buffer_barrier_count: u32,
    _p_buffer_barriers: *const vk::BufferMemoryBarrier<'_>,
    image_barrier_count: u32,
    p_image_barriers: *const vk::ImageMemoryBarrier<'_>,
) {
    FakeVulkan::with(|f| {
        let commands = f.recording.entry(buffer.as_raw()).or_default();
        for barrier in slice(p_image_barriers, image_barrier_count) {
            commands.push(Command::Barrier {
                image: barrier.image.as_raw(),
                old: barrier.old_layout,
                new: barrier.new_layout,
            });
        }
    });
}

unsafe extern "system" fn cmd_copy_image(
    buffer: vk::CommandBuffer,
    src: vk::Image,
    _src_layout: vk::ImageLayout,
    dst: vk::Image,
    _dst_layout: vk::ImageLayout,
    _region_count: u32,
    _p_regions: *const vk::ImageCopy,
) {
    FakeVulkan::with(|f| {
        f.recording
            .entry(buffer.as_raw())
            .or_default()
            .push(Command::Copy {
                src: src.as_raw(),
                dst: dst.as_raw(),
            });
    });
}

unsafe extern "system" fn queue_submit(
    _queue: vk::Queue,
    count: u32,
    p_submits: *const vk::SubmitInfo<'_>,
    fence: vk::Fence,
) -> vk::Result {
    FakeVulkan::with(|f| {
        let result = f.next_result("vkQueueSubmit");
        if result != vk::Result::SUCCESS {
            return result;
        }
        for submit in slice(p_submits, count) {
            let commands = slice(submit.p_command_buffers, submit.command_buffer_count)
                .iter()
                .flat_map(|cb| f.recording.get(&cb.as_raw()).cloned().unwrap_or_default())
                .collect();
            f.events.push(Event::Submit {
                waits: slice(submit.p_wait_semaphores, submit.wait_semaphore_count)
                    .iter()
                    .map(|s| s.as_raw())
                    .collect(),
                wait_stages: slice(submit.p_wait_dst_stage_mask, submit.wait_semaphore_count)
                    .to_vec(),
                signals: slice(submit.p_signal_semaphores, submit.signal_semaphore_count)
                    .iter()
                    .map(|s| s.as_raw())
                    .collect(),
                commands,
                fence: fence.as_raw(),
            });
        }
        if fence != vk::Fence::null() {
            let hold = f.hold_fences;
            f.fences.insert(fence.as_raw(), !hold);
        }
        vk::Result::SUCCESS
    })
}

// ── Lookup ──────────────────────────────────────────────────

fn lookup(name: &str) -> vk::PFN_vkVoidFunction {
    macro_rules! entry {
        ($f:expr) => {
            Some(unsafe { std::mem::transmute::<*const (), unsafe extern "system" fn()>($f as *const ()) })
        };
    }
    match name {
        "vkGetInstanceProcAddr" => entry!(get_instance_proc_addr),
        "vkGetDeviceProcAddr" => entry!(get_device_proc_addr),
        "vkCreateInstance" => entry!(create_instance),
        "vkDestroyInstance" => entry!(destroy_instance),
        "vkEnumeratePhysicalDevices" => entry!(enumerate_physical_devices),
        "vkGetPhysicalDeviceQueueFamilyProperties" => {
            entry!(get_physical_device_queue_family_properties)
        }
        "vkGetPhysicalDeviceMemoryProperties" => entry!(get_physical_device_memory_properties),
        "vkCreateDevice" => entry!(create_device),
        "vkDestroyDevice" => entry!(destroy_device),
        "vkGetDeviceQueue" => entry!(get_device_queue),
        "vkCreateSwapchainKHR" => entry!(create_swapchain),
        "vkDestroySwapchainKHR" => entry!(destroy_swapchain),
        "vkGetSwapchainImagesKHR" => entry!(get_swapchain_images),
        "vkAcquireNextImageKHR" => entry!(acquire_next_image),
        "vkQueuePresentKHR" => entry!(queue_present),
        "vkCreateImage" => entry!(create_image),
        "vkDestroyImage" => entry!(destroy_image),
        "vkGetImageMemoryRequirements" => entry!(get_image_memory_requirements),
        "vkAllocateMemory" => entry!(allocate_memory),
        "vkFreeMemory" => entry!(free_memory),
        "vkBindImageMemory" => entry!(bind_image_memory),
        "vkGetMemoryFdKHR" => entry!(get_memory_fd),
        "vkCreateSemaphore" => entry!(create_semaphore),
        "vkDestroySemaphore" => entry!(destroy_semaphore),
        "vkGetSemaphoreFdKHR" => entry!(get_semaphore_fd),
        "vkCreateFence" => entry!(create_fence),
        "vkDestroyFence" => entry!(destroy_fence),
        "vkGetFenceStatus" => entry!(get_fence_status),
        "vkWaitForFences" => entry!(wait_for_fences),
        "vkQueueWaitIdle" => entry!(queue_wait_idle),
        "vkCreateCommandPool" => entry!(create_command_pool),
        "vkDestroyCommandPool" => entry!(destroy_command_pool),
        "vkAllocateCommandBuffers" => entry!(allocate_command_buffers),
        "vkFreeCommandBuffers" => entry!(free_command_buffers),
        "vkBeginCommandBuffer" => entry!(begin_command_buffer),
        "vkEndCommandBuffer" => entry!(end_command_buffer),
        "vkCmdPipelineBarrier" => entry!(cmd_pipeline_barrier),
        "vkCmdCopyImage" => entry!(cmd_copy_image),
        "vkQueueSubmit" => entry!(queue_submit),
        _ => None,
    }
}

pub unsafe extern "system" fn get_instance_proc_addr(
    _instance: vk::Instance,
    p_name: *const c_char,
) -> vk::PFN_vkVoidFunction {
    lookup(&CStr::from_ptr(p_name).to_string_lossy())
}

pub unsafe extern "system" fn get_device_proc_addr(
    _device: vk::Device,
    p_name: *const c_char,
) -> vk::PFN_vkVoidFunction {
    lookup(&CStr::from_ptr(p_name).to_string_lossy())
}

/// Keeps `c_void` in the fake's vocabulary for the `p_next` comparisons
/// tests make.
pub fn chain_marker(value: usize) -> *const c_void {
    value as *const c_void
}

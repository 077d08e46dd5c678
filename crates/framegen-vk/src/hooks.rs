//! The Vulkan entrypoints framegen overrides, and their installation into
//! both lookup paths.
//!
//! Every hook is `extern "system"` with the exact native signature and
//! reports failures through the native result codes.

use std::ffi::c_void;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use ash::vk;
use ash::vk::Handle;
use framegen_common::platform::VULKAN_LIBRARY_NAMES;
use framegen_core::dl::{DlInterceptor, DynamicLoader};
use framegen_core::proc_table::ProcTable;
use framegen_core::symbols::{SymbolAddr, SymbolTable};
use parking_lot::Mutex;
use tracing::{debug, error, info, warn};

use crate::context::SurfaceState;
use crate::device::{add_extensions, DeviceState, REQUIRED_DEVICE_EXTENSIONS, REQUIRED_INSTANCE_EXTENSIONS};
use crate::error::{FrameGenError, Result};
use crate::generator::FrameGenerator;
use crate::loader;
use crate::state::{self, InstanceEntry, SwapchainEntry};

unsafe fn raw_slice<'a, T>(ptr: *const T, len: u32) -> &'a [T] {
    if ptr.is_null() || len == 0 {
        return &[];
    }
    unsafe { std::slice::from_raw_parts(ptr, len as usize) }
}

/// Resolve a device-level function through the real loader.
unsafe fn real_device_fn(device: vk::Device, name: &std::ffi::CStr) -> vk::PFN_vkVoidFunction {
    match loader::global() {
        Some(loader) => unsafe { loader.device_proc_addr(device, name.as_ptr()) },
        None => None,
    }
}

// ── Instance ────────────────────────────────────────────────

pub unsafe extern "system" fn create_instance(
    p_create_info: *const vk::InstanceCreateInfo<'_>,
    p_allocator: *const vk::AllocationCallbacks<'_>,
    p_instance: *mut vk::Instance,
) -> vk::Result {
    let Some(loader) = loader::global() else {
        error!("vkCreateInstance called before the Vulkan loader was resolved");
        return vk::Result::ERROR_INITIALIZATION_FAILED;
    };
    if p_create_info.is_null() || p_instance.is_null() {
        return vk::Result::ERROR_INITIALIZATION_FAILED;
    }

    // The generator's own Vulkan setup must not land in these hooks.
    let generator = {
        let _suspended = framegen_core::dl::suspend_hooks();
        state::runtime().generators.acquire()
    };

    let mut info = unsafe { *p_create_info };
    let extensions = unsafe {
        add_extensions(
            info.pp_enabled_extension_names,
            info.enabled_extension_count,
            &REQUIRED_INSTANCE_EXTENSIONS,
        )
    };
    info.enabled_extension_count = extensions.len() as u32;
    info.pp_enabled_extension_names = extensions.as_ptr();

    let result = unsafe { (loader.create_instance())(&info, p_allocator, p_instance) };
    if result != vk::Result::SUCCESS {
        drop(generator);
        state::runtime().generators.release();
        return result;
    }

    let instance = unsafe { *p_instance };
    let ash_instance = unsafe { loader.load_instance(instance) };
    match unsafe { ash_instance.enumerate_physical_devices() } {
        Ok(physical_devices) => {
            for physical_device in physical_devices {
                state::store_physical_device(physical_device.as_raw(), instance);
            }
        }
        Err(e) => warn!("failed to enumerate physical devices of {:?}: {}", instance, e),
    }
    state::store_instance(
        instance.as_raw(),
        Arc::new(InstanceEntry {
            instance: ash_instance,
            generator,
        }),
    );
    debug!("vkCreateInstance -> {:?}", instance);
    vk::Result::SUCCESS
}

pub unsafe extern "system" fn destroy_instance(
    instance: vk::Instance,
    p_allocator: *const vk::AllocationCallbacks<'_>,
) {
    if instance == vk::Instance::null() {
        return;
    }
    state::remove_physical_devices_of(instance);

    let destroy = match state::remove_instance(instance.as_raw()) {
        Some(entry) => {
            let destroy = entry.instance.fp_v1_0().destroy_instance;
            drop(entry);
            let _suspended = framegen_core::dl::suspend_hooks();
            state::runtime().generators.release();
            Some(destroy)
        }
        None => {
            warn!("vkDestroyInstance on unknown instance {:?}", instance);
            loader::global()
                .and_then(|l| unsafe { l.instance_proc_addr(instance, c"vkDestroyInstance".as_ptr()) })
                .map(|f| unsafe {
                    std::mem::transmute::<unsafe extern "system" fn(), vk::PFN_vkDestroyInstance>(f)
                })
        }
    };
    if let Some(destroy) = destroy {
        unsafe { destroy(instance, p_allocator) };
    }
}

// ── Device ──────────────────────────────────────────────────

pub unsafe extern "system" fn create_device(
    physical_device: vk::PhysicalDevice,
    p_create_info: *const vk::DeviceCreateInfo<'_>,
    p_allocator: *const vk::AllocationCallbacks<'_>,
    p_device: *mut vk::Device,
) -> vk::Result {
    if p_create_info.is_null() || p_device.is_null() {
        return vk::Result::ERROR_INITIALIZATION_FAILED;
    }
    let Some(entry) = state::get_physical_device(physical_device.as_raw())
        .and_then(|instance| state::get_instance(instance.as_raw()))
    else {
        error!("vkCreateDevice on physical device {:?} of an unknown instance", physical_device);
        return vk::Result::ERROR_INITIALIZATION_FAILED;
    };
    let instance = &entry.instance;

    let mut info = unsafe { *p_create_info };
    let extensions = unsafe {
        add_extensions(
            info.pp_enabled_extension_names,
            info.enabled_extension_count,
            &REQUIRED_DEVICE_EXTENSIONS,
        )
    };
    info.enabled_extension_count = extensions.len() as u32;
    info.pp_enabled_extension_names = extensions.as_ptr();

    let result =
        unsafe { (instance.fp_v1_0().create_device)(physical_device, &info, p_allocator, p_device) };
    if result != vk::Result::SUCCESS {
        return result;
    }
    let device = unsafe { *p_device };

    let frame_gen_count = state::runtime().config.frame_gen_count();
    match unsafe { DeviceState::new(instance, physical_device, device, &info, frame_gen_count) } {
        Ok(device_state) => {
            debug!(
                "vkCreateDevice -> {:?} (queue family {}, {} generated frames)",
                device, device_state.queue_family_index, device_state.frame_gen_count
            );
            state::store_device(device.as_raw(), Arc::new(device_state));
            vk::Result::SUCCESS
        }
        Err(e) => {
            error!("device setup failed: {}", e);
            unsafe {
                let device_fn = ash::Device::load(instance.fp_v1_0(), device);
                (device_fn.fp_v1_0().destroy_device)(device, p_allocator);
                *p_device = vk::Device::null();
            }
            e.to_vk_result()
        }
    }
}

pub unsafe extern "system" fn destroy_device(
    device: vk::Device,
    p_allocator: *const vk::AllocationCallbacks<'_>,
) {
    if device == vk::Device::null() {
        return;
    }
    let orphaned = state::remove_swapchains_of(device);
    if !orphaned.is_empty() {
        warn!(
            "vkDestroyDevice on {:?} with {} swapchains still alive",
            device,
            orphaned.len()
        );
    }
    drop(orphaned);

    let destroy = match state::remove_device(device.as_raw()) {
        Some(device_state) => Some(device_state.dispatch.device().fp_v1_0().destroy_device),
        None => {
            warn!("vkDestroyDevice on unknown device {:?}", device);
            unsafe { real_device_fn(device, c"vkDestroyDevice") }.map(|f| unsafe {
                std::mem::transmute::<unsafe extern "system" fn(), vk::PFN_vkDestroyDevice>(f)
            })
        }
    };
    if let Some(destroy) = destroy {
        unsafe { destroy(device, p_allocator) };
    }
}

// ── Swapchain ───────────────────────────────────────────────

/// Extra images for the generated frames, transfer usage for the copies and
/// FIFO presentation for a fixed cadence.
pub fn adjust_swapchain_create_info(
    mut info: vk::SwapchainCreateInfoKHR<'_>,
    frame_gen_count: usize,
) -> vk::SwapchainCreateInfoKHR<'_> {
    let extra = 1 + frame_gen_count as u32;
    info.min_image_count = info.min_image_count.saturating_add(extra);
    info.image_usage |= vk::ImageUsageFlags::TRANSFER_SRC | vk::ImageUsageFlags::TRANSFER_DST;
    info.present_mode = vk::PresentModeKHR::FIFO;
    info
}

fn build_surface(
    device_state: &DeviceState,
    generator: Arc<dyn FrameGenerator>,
    swapchain: vk::SwapchainKHR,
    extent: vk::Extent2D,
) -> Result<SurfaceState> {
    let images = unsafe {
        device_state
            .dispatch
            .swapchain()
            .get_swapchain_images(swapchain)
    }
    .map_err(FrameGenError::vulkan("get swapchain images"))?;
    SurfaceState::new(device_state, generator, swapchain, extent, images)
}

pub unsafe extern "system" fn create_swapchain(
    device: vk::Device,
    p_create_info: *const vk::SwapchainCreateInfoKHR<'_>,
    p_allocator: *const vk::AllocationCallbacks<'_>,
    p_swapchain: *mut vk::SwapchainKHR,
) -> vk::Result {
    if p_create_info.is_null() || p_swapchain.is_null() {
        return vk::Result::ERROR_INITIALIZATION_FAILED;
    }
    let Some(device_state) = state::get_device(device.as_raw()) else {
        error!("vkCreateSwapchainKHR on unknown device {:?}", device);
        return vk::Result::ERROR_INITIALIZATION_FAILED;
    };
    let fp = device_state.dispatch.swapchain().fp();

    let generator = state::runtime().generators.current();
    let requested = unsafe { *p_create_info };
    let info = match generator {
        Some(_) => adjust_swapchain_create_info(requested, device_state.frame_gen_count),
        None => requested,
    };

    let result = unsafe { (fp.create_swapchain_khr)(device, &info, p_allocator, p_swapchain) };
    if result != vk::Result::SUCCESS {
        return result;
    }
    let swapchain = unsafe { *p_swapchain };

    let surface = match generator {
        None => None,
        Some(generator) => match build_surface(&device_state, generator, swapchain, info.image_extent) {
            Ok(surface) => Some(Mutex::new(surface)),
            Err(e) => {
                error!("swapchain setup failed: {}", e);
                unsafe {
                    (fp.destroy_swapchain_khr)(device, swapchain, p_allocator);
                    *p_swapchain = vk::SwapchainKHR::null();
                }
                return e.to_vk_result();
            }
        },
    };

    debug!(
        "vkCreateSwapchainKHR -> {:?} ({} images requested, {} created)",
        swapchain, requested.min_image_count, info.min_image_count
    );
    state::store_swapchain(
        swapchain.as_raw(),
        Arc::new(SwapchainEntry {
            device,
            dispatch: Arc::clone(&device_state.dispatch),
            surface,
        }),
    );
    vk::Result::SUCCESS
}

pub unsafe extern "system" fn destroy_swapchain(
    device: vk::Device,
    swapchain: vk::SwapchainKHR,
    p_allocator: *const vk::AllocationCallbacks<'_>,
) {
    let dispatch = match state::remove_swapchain(swapchain.as_raw()) {
        Some(entry) => Some(Arc::clone(&entry.dispatch)),
        None => state::get_device(device.as_raw()).map(|d| Arc::clone(&d.dispatch)),
    };

    match dispatch {
        Some(dispatch) => unsafe {
            (dispatch.swapchain().fp().destroy_swapchain_khr)(device, swapchain, p_allocator)
        },
        None => {
            warn!("vkDestroySwapchainKHR on unknown device {:?}", device);
            if let Some(f) = unsafe { real_device_fn(device, c"vkDestroySwapchainKHR") } {
                unsafe {
                    let destroy = std::mem::transmute::<
                        unsafe extern "system" fn(),
                        vk::PFN_vkDestroySwapchainKHR,
                    >(f);
                    destroy(device, swapchain, p_allocator);
                }
            }
        }
    }
}

// ── Present ─────────────────────────────────────────────────

pub unsafe extern "system" fn queue_present(
    queue: vk::Queue,
    p_present_info: *const vk::PresentInfoKHR<'_>,
) -> vk::Result {
    if p_present_info.is_null() {
        return vk::Result::ERROR_OUT_OF_HOST_MEMORY;
    }
    let info = unsafe { &*p_present_info };
    let swapchains = unsafe { raw_slice(info.p_swapchains, info.swapchain_count) };
    let indices = unsafe { raw_slice(info.p_image_indices, info.swapchain_count) };
    let (Some(&swapchain), Some(&image_index)) = (swapchains.first(), indices.first()) else {
        return vk::Result::ERROR_OUT_OF_HOST_MEMORY;
    };

    let Some(entry) = state::get_swapchain(swapchain.as_raw()) else {
        error!("vkQueuePresentKHR on unknown swapchain {:?}", swapchain);
        return vk::Result::ERROR_SURFACE_LOST_KHR;
    };

    let surface = match &entry.surface {
        Some(surface) if swapchains.len() == 1 => surface,
        _ => {
            let fp = entry.dispatch.swapchain().fp();
            return unsafe { (fp.queue_present_khr)(queue, p_present_info) };
        }
    };

    let waits = unsafe { raw_slice(info.p_wait_semaphores, info.wait_semaphore_count) };
    let result = surface
        .lock()
        .present(queue, waits, image_index, info.p_next);
    let code = match result {
        Ok(false) => vk::Result::SUCCESS,
        Ok(true) => vk::Result::SUBOPTIMAL_KHR,
        Err(e) => {
            let code = e.to_vk_result();
            if code == vk::Result::ERROR_OUT_OF_DATE_KHR {
                debug!("present: {}", e);
            } else {
                error!("present failed: {}", e);
            }
            code
        }
    };
    if !info.p_results.is_null() {
        unsafe { *info.p_results = code };
    }
    code
}

// ── Installation ────────────────────────────────────────────

/// Hook table: native entrypoint name → override.
pub fn hook_table() -> SymbolTable {
    let entries: [(&str, *const c_void); 7] = [
        ("vkCreateInstance", create_instance as *const c_void),
        ("vkDestroyInstance", destroy_instance as *const c_void),
        ("vkCreateDevice", create_device as *const c_void),
        ("vkDestroyDevice", destroy_device as *const c_void),
        ("vkCreateSwapchainKHR", create_swapchain as *const c_void),
        ("vkQueuePresentKHR", queue_present as *const c_void),
        ("vkDestroySwapchainKHR", destroy_swapchain as *const c_void),
    ];
    entries
        .into_iter()
        .fold(SymbolTable::new(), |table, (name, f)| table.with(name, SymbolAddr::new(f)))
}

/// Installs the hooks once.
pub struct HookInstaller {
    installed: AtomicBool,
}

impl Default for HookInstaller {
    fn default() -> Self {
        Self::new()
    }
}

impl HookInstaller {
    pub const fn new() -> Self {
        Self {
            installed: AtomicBool::new(false),
        }
    }

    pub fn is_installed(&self) -> bool {
        self.installed.load(Ordering::Acquire)
    }

    /// Register the hooks into `procs` and under every Vulkan library name in
    /// `dl`. A second call is a no-op returning false.
    pub fn install<L: DynamicLoader>(&self, dl: &DlInterceptor<L>, procs: &ProcTable) -> bool {
        if self.installed.swap(true, Ordering::AcqRel) {
            warn!("Vulkan hooks already installed");
            return false;
        }

        let table = hook_table();
        procs.register_all(&table);
        for filename in VULKAN_LIBRARY_NAMES {
            dl.register(filename, table.clone());
        }

        for name in verify_consistency(dl, procs) {
            warn!("{} resolves differently through dlsym and vkGetInstanceProcAddr", name);
        }
        info!("installed {} Vulkan hooks", table.len());
        true
    }
}

/// Names whose override differs between the flat table and any Vulkan
/// library descriptor in `dl`.
pub fn verify_consistency<L: DynamicLoader>(dl: &DlInterceptor<L>, procs: &ProcTable) -> Vec<String> {
    let flat = procs.snapshot();
    let mut mismatched = Vec::new();

    for filename in VULKAN_LIBRARY_NAMES {
        let registry = dl.registry();
        let Some(id) = registry.find_by_filename(filename) else {
            if !flat.is_empty() {
                mismatched.extend(flat.iter().map(|(name, _)| name.to_string()));
            }
            continue;
        };
        let module = registry
            .with_descriptor(id, |d| d.symbols().clone())
            .unwrap_or_default();

        for (name, addr) in module.iter() {
            if flat.get(name) != Some(addr) {
                mismatched.push(name.to_string());
            }
        }
        for (name, addr) in flat.iter() {
            if module.get(name) != Some(addr) {
                mismatched.push(name.to_string());
            }
        }
    }

    mismatched.sort();
    mismatched.dedup();
    mismatched
}

static INSTALLER: HookInstaller = HookInstaller::new();

/// Install the hooks into the process-wide tables.
pub fn install<L: DynamicLoader>(dl: &DlInterceptor<L>) -> bool {
    INSTALLER.install(dl, loader::proc_table())
}

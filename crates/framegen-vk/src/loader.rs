//! Overrides for `vkGetInstanceProcAddr` and `vkGetDeviceProcAddr`.
//!
//! The real pair is resolved once from `libvulkan.so.1`, opened through the
//! real `dlopen` so the lookup is never intercepted. The overrides answer
//! from the flat [`ProcTable`] first and defer to the real pair otherwise.

use std::ffi::{c_char, c_int, c_void, CStr, CString};
use std::sync::OnceLock;

use ash::vk;
use framegen_common::platform::{VULKAN_LIBRARY, VULKAN_LIBRARY_NAMES};
use framegen_core::dl::{DlInterceptor, DynamicLoader};
use framegen_core::proc_table::ProcTable;
use framegen_core::symbols::{SymbolAddr, SymbolTable};
use framegen_core::CoreError;
use tracing::{debug, info, warn};

const RTLD_NOW: c_int = 0x2;

/// The real loader entrypoints.
pub struct VkLoader {
    static_fn: ash::StaticFn,
    get_device_proc_addr: vk::PFN_vkGetDeviceProcAddr,
    create_instance: vk::PFN_vkCreateInstance,
}

impl VkLoader {
    /// # Safety
    /// Both functions must be a matching pair from one Vulkan loader.
    pub unsafe fn from_entrypoints(
        get_instance_proc_addr: vk::PFN_vkGetInstanceProcAddr,
        get_device_proc_addr: vk::PFN_vkGetDeviceProcAddr,
    ) -> Result<Self, CoreError> {
        let create_instance =
            unsafe { get_instance_proc_addr(vk::Instance::null(), c"vkCreateInstance".as_ptr()) }
                .ok_or_else(|| CoreError::MissingSymbol("vkCreateInstance".to_string()))?;
        Ok(Self {
            static_fn: ash::StaticFn {
                get_instance_proc_addr,
            },
            get_device_proc_addr,
            create_instance: unsafe {
                std::mem::transmute::<unsafe extern "system" fn(), vk::PFN_vkCreateInstance>(
                    create_instance,
                )
            },
        })
    }

    /// Open the Vulkan loader through `real` and resolve its entrypoints.
    ///
    /// # Safety
    /// `real` must be the uninterposed dynamic loader.
    pub unsafe fn open<L: DynamicLoader>(real: &L) -> Result<Self, CoreError> {
        let filename = CString::new(VULKAN_LIBRARY)
            .map_err(|e| CoreError::ConfigError(e.to_string()))?;
        let handle = unsafe { real.open(filename.as_ptr(), RTLD_NOW) };
        if handle.is_null() {
            return Err(CoreError::MissingSymbol(VULKAN_LIBRARY.to_string()));
        }

        let gipa = unsafe { real.lookup(handle, c"vkGetInstanceProcAddr".as_ptr()) };
        let gdpa = unsafe { real.lookup(handle, c"vkGetDeviceProcAddr".as_ptr()) };
        if gipa.is_null() {
            return Err(CoreError::MissingSymbol("vkGetInstanceProcAddr".to_string()));
        }
        if gdpa.is_null() {
            return Err(CoreError::MissingSymbol("vkGetDeviceProcAddr".to_string()));
        }
        debug!("resolved real Vulkan loader entrypoints from {}", VULKAN_LIBRARY);

        unsafe {
            Self::from_entrypoints(
                std::mem::transmute::<*mut c_void, vk::PFN_vkGetInstanceProcAddr>(gipa),
                std::mem::transmute::<*mut c_void, vk::PFN_vkGetDeviceProcAddr>(gdpa),
            )
        }
    }

    pub fn static_fn(&self) -> &ash::StaticFn {
        &self.static_fn
    }

    pub fn create_instance(&self) -> vk::PFN_vkCreateInstance {
        self.create_instance
    }

    /// # Safety
    /// `instance` must be null or a live instance.
    pub unsafe fn load_instance(&self, instance: vk::Instance) -> ash::Instance {
        unsafe { ash::Instance::load(&self.static_fn, instance) }
    }

    /// # Safety
    /// `name` must be a valid C string.
    pub unsafe fn instance_proc_addr(
        &self,
        instance: vk::Instance,
        name: *const c_char,
    ) -> vk::PFN_vkVoidFunction {
        unsafe { (self.static_fn.get_instance_proc_addr)(instance, name) }
    }

    /// # Safety
    /// `name` must be a valid C string.
    pub unsafe fn device_proc_addr(
        &self,
        device: vk::Device,
        name: *const c_char,
    ) -> vk::PFN_vkVoidFunction {
        unsafe { (self.get_device_proc_addr)(device, name) }
    }
}

static LOADER: OnceLock<VkLoader> = OnceLock::new();
static PROC_TABLE: OnceLock<ProcTable> = OnceLock::new();

/// The flat Vulkan override table.
pub fn proc_table() -> &'static ProcTable {
    PROC_TABLE.get_or_init(ProcTable::new)
}

pub fn global() -> Option<&'static VkLoader> {
    LOADER.get()
}

/// Make `loader` the process-wide real loader. The first one wins.
pub fn install(loader: VkLoader) -> &'static VkLoader {
    if LOADER.get().is_some() {
        warn!("Vulkan loader already initialized");
    }
    LOADER.get_or_init(|| loader)
}

/// Entries for the two lookup overrides themselves.
pub fn loader_overrides() -> SymbolTable {
    SymbolTable::new()
        .with(
            "vkGetInstanceProcAddr",
            SymbolAddr::new(get_instance_proc_addr as *const c_void),
        )
        .with(
            "vkGetDeviceProcAddr",
            SymbolAddr::new(get_device_proc_addr as *const c_void),
        )
}

/// Resolve the real loader through `dl` and register the lookup overrides in
/// both the flat table and the module registry.
pub fn initialize<L: DynamicLoader>(dl: &DlInterceptor<L>) -> Result<&'static VkLoader, CoreError> {
    if let Some(existing) = global() {
        warn!("Vulkan loader already initialized");
        return Ok(existing);
    }
    let loader = install(unsafe { VkLoader::open(dl.real()) }?);
    register_overrides(dl, &loader_overrides());
    info!("Vulkan loader interception ready");
    Ok(loader)
}

/// Register `table` in the flat table and under every Vulkan library name.
pub fn register_overrides<L: DynamicLoader>(dl: &DlInterceptor<L>, table: &SymbolTable) {
    proc_table().register_all(table);
    for filename in VULKAN_LIBRARY_NAMES {
        dl.register(filename, table.clone());
    }
}

unsafe fn lookup_override(name: *const c_char) -> vk::PFN_vkVoidFunction {
    if name.is_null() {
        return None;
    }
    let name = unsafe { CStr::from_ptr(name) }.to_str().ok()?;
    let addr = proc_table().get(name)?;
    Some(unsafe { std::mem::transmute::<*mut c_void, unsafe extern "system" fn()>(addr.as_ptr()) })
}

/// Overriding `vkGetInstanceProcAddr`.
pub unsafe extern "system" fn get_instance_proc_addr(
    instance: vk::Instance,
    p_name: *const c_char,
) -> vk::PFN_vkVoidFunction {
    if let Some(f) = unsafe { lookup_override(p_name) } {
        return Some(f);
    }
    match global() {
        Some(loader) if !p_name.is_null() => unsafe { loader.instance_proc_addr(instance, p_name) },
        _ => None,
    }
}

/// Overriding `vkGetDeviceProcAddr`.
pub unsafe extern "system" fn get_device_proc_addr(
    device: vk::Device,
    p_name: *const c_char,
) -> vk::PFN_vkVoidFunction {
    if let Some(f) = unsafe { lookup_override(p_name) } {
        return Some(f);
    }
    match global() {
        Some(loader) if !p_name.is_null() => unsafe { loader.device_proc_addr(device, p_name) },
        _ => None,
    }
}

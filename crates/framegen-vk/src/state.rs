//! Process-wide tables keyed by raw Vulkan handles.

use std::sync::{Arc, OnceLock};

use ash::vk;
use ash::vk::Handle;
use dashmap::DashMap;
use framegen_core::config::FrameGenConfig;
use parking_lot::Mutex;

use crate::context::SurfaceState;
use crate::device::{DeviceDispatch, DeviceState};
use crate::generator::{FrameGenerator, GeneratorHost};

pub struct InstanceEntry {
    pub instance: ash::Instance,
    /// Generator acquired for this instance, if frame generation is on.
    pub generator: Option<Arc<dyn FrameGenerator>>,
}

pub struct SwapchainEntry {
    pub device: vk::Device,
    pub dispatch: Arc<DeviceDispatch>,
    /// `None` when frame generation is off for this swapchain.
    pub surface: Option<Mutex<SurfaceState>>,
}

macro_rules! state_map {
    ($map_name:ident, $fn_map:ident, $fn_store:ident, $fn_get:ident, $fn_remove:ident, $value:ty) => {
        static $map_name: OnceLock<DashMap<u64, $value>> = OnceLock::new();

        fn $fn_map() -> &'static DashMap<u64, $value> {
            $map_name.get_or_init(DashMap::new)
        }

        pub fn $fn_store(key: u64, value: $value) -> Option<$value> {
            $fn_map().insert(key, value)
        }

        pub fn $fn_get(key: u64) -> Option<$value> {
            $fn_map().get(&key).map(|v| v.clone())
        }

        pub fn $fn_remove(key: u64) -> Option<$value> {
            $fn_map().remove(&key).map(|(_, v)| v)
        }
    };
}

state_map!(INSTANCE_MAP, instance_map, store_instance, get_instance, remove_instance, Arc<InstanceEntry>);
state_map!(PHYS_DEV_MAP, phys_dev_map, store_physical_device, get_physical_device, remove_physical_device, vk::Instance);
state_map!(DEVICE_MAP, device_map, store_device, get_device, remove_device, Arc<DeviceState>);
state_map!(SWAPCHAIN_MAP, swapchain_map, store_swapchain, get_swapchain, remove_swapchain, Arc<SwapchainEntry>);

/// Forget every physical device enumerated from `instance`.
pub fn remove_physical_devices_of(instance: vk::Instance) -> usize {
    let map = phys_dev_map();
    let before = map.len();
    map.retain(|_, owner| *owner != instance);
    before.saturating_sub(map.len())
}

/// Remove and return every swapchain created on `device`.
pub fn remove_swapchains_of(device: vk::Device) -> Vec<Arc<SwapchainEntry>> {
    let map = swapchain_map();
    let keys: Vec<u64> = map
        .iter()
        .filter(|entry| entry.value().device == device)
        .map(|entry| *entry.key())
        .collect();
    keys.into_iter()
        .filter_map(|key| map.remove(&key).map(|(_, v)| v))
        .collect()
}

pub fn instance_count() -> usize {
    instance_map().len()
}

pub fn device_count() -> usize {
    device_map().len()
}

pub fn swapchain_count() -> usize {
    swapchain_map().len()
}

pub fn key<H: Handle>(handle: H) -> u64 {
    handle.as_raw()
}

// ── Runtime ─────────────────────────────────────────────────

/// Configuration and generator shared by every hook.
pub struct Runtime {
    pub config: FrameGenConfig,
    pub generators: GeneratorHost,
}

impl Runtime {
    pub fn from_config(config: FrameGenConfig) -> Self {
        let generators = GeneratorHost::from_library(config.generator_library.clone());
        Self { config, generators }
    }
}

static RUNTIME: OnceLock<Runtime> = OnceLock::new();

/// Install the runtime. Returns false if one was already in place.
pub fn install_runtime(runtime: Runtime) -> bool {
    RUNTIME.set(runtime).is_ok()
}

/// The installed runtime, or one built from the environment on first use.
pub fn runtime() -> &'static Runtime {
    RUNTIME.get_or_init(|| Runtime::from_config(FrameGenConfig::from_environment()))
}

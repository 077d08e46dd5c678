//! The external frame generator.
//!
//! Frame synthesis happens outside this crate. The generator only ever sees
//! file descriptors for exported images and semaphores: two history images it
//! reads, N output images it writes, one semaphore it waits on per present and
//! N semaphores it signals when each output is ready.

use std::ffi::c_int;
use std::os::fd::{IntoRawFd, OwnedFd};
use std::sync::Arc;

use ash::vk;
use libloading::{Library, Symbol};
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::error::GeneratorError;

pub trait FrameGenerator: Send + Sync {
    /// Create a context over the given images. Ownership of every descriptor
    /// passes to the generator.
    fn create_context(
        &self,
        extent: vk::Extent2D,
        history: [OwnedFd; 2],
        outputs: Vec<OwnedFd>,
    ) -> Result<i32, GeneratorError>;

    /// Schedule generation of the context's outputs. Must not block on the GPU.
    fn present_context(
        &self,
        id: i32,
        input_semaphore: OwnedFd,
        output_semaphores: Vec<OwnedFd>,
    ) -> Result<(), GeneratorError>;

    fn delete_context(&self, id: i32);
}

/// A generator context, deleted when the last reference drops.
pub struct GeneratorContext {
    id: i32,
    generator: Arc<dyn FrameGenerator>,
}

impl GeneratorContext {
    pub fn create(
        generator: Arc<dyn FrameGenerator>,
        extent: vk::Extent2D,
        history: [OwnedFd; 2],
        outputs: Vec<OwnedFd>,
    ) -> Result<Arc<Self>, GeneratorError> {
        let id = generator.create_context(extent, history, outputs)?;
        debug!("created generator context {} ({}x{})", id, extent.width, extent.height);
        Ok(Arc::new(Self { id, generator }))
    }

    pub fn id(&self) -> i32 {
        self.id
    }

    pub fn present(
        &self,
        input_semaphore: OwnedFd,
        output_semaphores: Vec<OwnedFd>,
    ) -> Result<(), GeneratorError> {
        self.generator
            .present_context(self.id, input_semaphore, output_semaphores)
    }
}

impl Drop for GeneratorContext {
    fn drop(&mut self) {
        debug!("deleting generator context {}", self.id);
        self.generator.delete_context(self.id);
    }
}

// ── Shared library binding ──────────────────────────────────

type AfmfInitialize = unsafe extern "C" fn() -> vk::Result;
type AfmfCreateContext = unsafe extern "C" fn(
    width: u32,
    height: u32,
    history0: c_int,
    history1: c_int,
    outputs: *const c_int,
    output_count: u32,
    out_id: *mut i32,
) -> vk::Result;
type AfmfPresentContext = unsafe extern "C" fn(
    id: i32,
    input: c_int,
    outputs: *const c_int,
    output_count: u32,
) -> vk::Result;
type AfmfDeleteContext = unsafe extern "C" fn(id: i32);
type AfmfFinalize = unsafe extern "C" fn();

/// Generator implemented by a shared library exporting the `afmf*` C ABI.
pub struct LibraryGenerator {
    create_context: AfmfCreateContext,
    present_context: AfmfPresentContext,
    delete_context: AfmfDeleteContext,
    finalize: AfmfFinalize,
    _lib: Library,
}

impl LibraryGenerator {
    /// Load and initialize the generator library at `path`.
    pub fn load(path: &str) -> Result<Self, GeneratorError> {
        let lib = unsafe { Library::new(path) }
            .map_err(|e| GeneratorError::Load(format!("{}: {}", path, e)))?;
        info!("loaded frame generator from {}", path);

        unsafe {
            let initialize: AfmfInitialize = load_fn(&lib, "afmfInitialize")?;
            let create_context = load_fn(&lib, "afmfCreateContext")?;
            let present_context = load_fn(&lib, "afmfPresentContext")?;
            let delete_context = load_fn(&lib, "afmfDeleteContext")?;
            let finalize = load_fn(&lib, "afmfFinalize")?;

            let result = initialize();
            if result != vk::Result::SUCCESS {
                return Err(GeneratorError::Failed {
                    op: "initialize",
                    result,
                });
            }
            Ok(Self {
                create_context,
                present_context,
                delete_context,
                finalize,
                _lib: lib,
            })
        }
    }
}

unsafe fn load_fn<F: Copy>(lib: &Library, name: &str) -> Result<F, GeneratorError> {
    let sym: Symbol<F> = unsafe { lib.get(name.as_bytes()) }
        .map_err(|e| GeneratorError::Load(format!("{}: {}", name, e)))?;
    Ok(*sym)
}

fn into_raw_fds(fds: Vec<OwnedFd>) -> Vec<c_int> {
    fds.into_iter().map(IntoRawFd::into_raw_fd).collect()
}

impl FrameGenerator for LibraryGenerator {
    fn create_context(
        &self,
        extent: vk::Extent2D,
        history: [OwnedFd; 2],
        outputs: Vec<OwnedFd>,
    ) -> Result<i32, GeneratorError> {
        let [history0, history1] = history;
        let outputs = into_raw_fds(outputs);
        let mut id = 0i32;
        let result = unsafe {
            (self.create_context)(
                extent.width,
                extent.height,
                history0.into_raw_fd(),
                history1.into_raw_fd(),
                outputs.as_ptr(),
                outputs.len() as u32,
                &mut id,
            )
        };
        if result != vk::Result::SUCCESS {
            return Err(GeneratorError::Failed {
                op: "create context",
                result,
            });
        }
        Ok(id)
    }

    fn present_context(
        &self,
        id: i32,
        input_semaphore: OwnedFd,
        output_semaphores: Vec<OwnedFd>,
    ) -> Result<(), GeneratorError> {
        let outputs = into_raw_fds(output_semaphores);
        let result = unsafe {
            (self.present_context)(
                id,
                input_semaphore.into_raw_fd(),
                outputs.as_ptr(),
                outputs.len() as u32,
            )
        };
        if result != vk::Result::SUCCESS {
            return Err(GeneratorError::Failed {
                op: "present context",
                result,
            });
        }
        Ok(())
    }

    fn delete_context(&self, id: i32) {
        unsafe { (self.delete_context)(id) };
    }
}

impl Drop for LibraryGenerator {
    fn drop(&mut self) {
        unsafe { (self.finalize)() };
    }
}

// ── Process-wide generator ──────────────────────────────────

pub type GeneratorFactory =
    Box<dyn Fn() -> Result<Arc<dyn FrameGenerator>, GeneratorError> + Send + Sync>;

#[derive(Default)]
struct HostSlot {
    generator: Option<Arc<dyn FrameGenerator>>,
    users: usize,
}

/// Owns the generator while at least one Vulkan instance is alive. The
/// generator is created for the first instance and dropped after the last.
pub struct GeneratorHost {
    factory: GeneratorFactory,
    slot: Mutex<HostSlot>,
}

impl GeneratorHost {
    pub fn new(factory: GeneratorFactory) -> Self {
        Self {
            factory,
            slot: Mutex::new(HostSlot::default()),
        }
    }

    /// Host backed by [`LibraryGenerator`].
    pub fn from_library(path: String) -> Self {
        Self::new(Box::new(move || {
            let generator: Arc<dyn FrameGenerator> = Arc::new(LibraryGenerator::load(&path)?);
            Ok(generator)
        }))
    }

    /// Register one more instance. Returns the generator, or `None` if it
    /// could not be created, in which case frame generation stays off.
    pub fn acquire(&self) -> Option<Arc<dyn FrameGenerator>> {
        let mut slot = self.slot.lock();
        slot.users += 1;
        if slot.generator.is_none() {
            match (self.factory)() {
                Ok(generator) => slot.generator = Some(generator),
                Err(e) => warn!("frame generation disabled: {}", e),
            }
        }
        slot.generator.clone()
    }

    /// Unregister an instance; the last one releases the generator.
    pub fn release(&self) {
        let released = {
            let mut slot = self.slot.lock();
            slot.users = slot.users.saturating_sub(1);
            if slot.users == 0 {
                slot.generator.take()
            } else {
                None
            }
        };
        if released.is_some() {
            debug!("last instance gone, releasing frame generator");
        }
    }

    pub fn current(&self) -> Option<Arc<dyn FrameGenerator>> {
        self.slot.lock().generator.clone()
    }

    pub fn users(&self) -> usize {
        self.slot.lock().users
    }
}

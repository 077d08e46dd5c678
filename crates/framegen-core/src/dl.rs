//! Interception of the `dlopen` / `dlsym` / `dlclose` triad.
//!
//! [`DlInterceptor`] implements the override semantics on top of any
//! [`DynamicLoader`] backend. The process-wide instance wraps [`RealDl`], the
//! glibc functions found behind this library via `RTLD_NEXT`.

use std::ffi::{c_char, c_int, c_void, CStr};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::OnceLock;

use tracing::{debug, trace, warn};

use crate::loaded::LoadedHandleSet;
use crate::registry::{ModuleHandle, OverrideRegistry, RegisterOutcome};
use crate::symbols::SymbolTable;
#[cfg(target_os = "linux")]
use crate::CoreError;

/// The open / lookup / close triad of a dynamic loader.
///
/// # Safety
/// Implementations receive raw pointers straight from the application and must
/// uphold the contracts of `dlopen(3)`, `dlsym(3)` and `dlclose(3)`.
pub trait DynamicLoader: Send + Sync {
    unsafe fn open(&self, filename: *const c_char, flags: c_int) -> *mut c_void;
    unsafe fn lookup(&self, handle: *mut c_void, symbol: *const c_char) -> *mut c_void;
    unsafe fn close(&self, handle: *mut c_void) -> c_int;
}

/// Override semantics for the dynamic loader.
pub struct DlInterceptor<L> {
    real: L,
    registry: OverrideRegistry,
    loaded: LoadedHandleSet,
    enabled: AtomicBool,
}

impl<L: DynamicLoader> DlInterceptor<L> {
    pub fn new(real: L) -> Self {
        Self {
            real,
            registry: OverrideRegistry::new(),
            loaded: LoadedHandleSet::new(),
            enabled: AtomicBool::new(true),
        }
    }

    /// The backend, bypassing all interception.
    pub fn real(&self) -> &L {
        &self.real
    }

    pub fn registry(&self) -> &OverrideRegistry {
        &self.registry
    }

    pub fn loaded(&self) -> &LoadedHandleSet {
        &self.loaded
    }

    pub fn register(&self, filename: &str, symbols: SymbolTable) -> RegisterOutcome {
        self.registry.register(filename, symbols)
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Acquire)
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Release);
    }

    /// Disable interception until the returned guard drops.
    pub fn suspend(&self) -> HookSuspension<'_> {
        let previous = self.enabled.swap(false, Ordering::AcqRel);
        HookSuspension {
            enabled: &self.enabled,
            previous,
        }
    }

    /// `dlopen`. The real library is always opened; registered filenames get
    /// an intercepted handle while hooks are enabled.
    ///
    /// # Safety
    /// `filename` must be null or a valid C string.
    pub unsafe fn open(&self, filename: *const c_char, flags: c_int) -> *mut c_void {
        let handle = unsafe { self.real.open(filename, flags) };
        if handle.is_null() {
            return handle;
        }
        self.loaded.insert(handle);

        if !self.is_enabled() || filename.is_null() {
            return handle;
        }

        let name = unsafe { CStr::from_ptr(filename) }.to_string_lossy();
        match self.registry.find_by_filename(&name) {
            Some(id) => {
                let fake = self.registry.attach(id, handle);
                debug!("intercepted dlopen({}) -> {:p} (real {:p})", name, fake, handle);
                fake
            }
            None => handle,
        }
    }

    /// `dlsym`. Intercepted handles consult their override table first and fall
    /// through to the stashed real handle on a miss.
    ///
    /// # Safety
    /// `symbol` must be null or a valid C string.
    pub unsafe fn lookup(&self, handle: *mut c_void, symbol: *const c_char) -> *mut c_void {
        let id = match self.registry.resolve(handle) {
            ModuleHandle::Intercepted(id) => id,
            _ => return unsafe { self.real.lookup(handle, symbol) },
        };

        if self.is_enabled() && !symbol.is_null() {
            let name = unsafe { CStr::from_ptr(symbol) }.to_string_lossy();
            if let Some(addr) = self.registry.symbol(id, &name) {
                trace!("dlsym override hit: {}", name);
                return addr.as_ptr();
            }
        }

        match self.registry.real_handle(id) {
            Some(real) => unsafe { self.real.lookup(real, symbol) },
            None => std::ptr::null_mut(),
        }
    }

    /// `dlclose`. Each real handle is closed at most once no matter how many
    /// paths release it.
    ///
    /// # Safety
    /// `handle` must be null or a value previously returned by `open`.
    pub unsafe fn close(&self, handle: *mut c_void) -> c_int {
        let real = match self.registry.resolve(handle) {
            ModuleHandle::Null => return unsafe { self.real.close(handle) },
            ModuleHandle::Real(raw) => raw as *mut c_void,
            ModuleHandle::Intercepted(id) => match self.registry.detach(id) {
                Some(real) => real,
                None => {
                    debug!("dlclose on intercepted handle {:p} with nothing attached", handle);
                    return 0;
                }
            },
        };

        if !self.loaded.remove(real) {
            debug!("skipping dlclose({:p}), handle already released", real);
            return 0;
        }
        unsafe { self.real.close(real) }
    }
}

/// Re-enables interception on drop, restoring the state seen at creation.
pub struct HookSuspension<'a> {
    enabled: &'a AtomicBool,
    previous: bool,
}

impl Drop for HookSuspension<'_> {
    fn drop(&mut self) {
        self.enabled.store(self.previous, Ordering::Release);
    }
}

// ── Real loader ─────────────────────────────────────────────

#[cfg(target_os = "linux")]
type DlOpenFn = unsafe extern "C" fn(*const c_char, c_int) -> *mut c_void;
#[cfg(target_os = "linux")]
type DlSymFn = unsafe extern "C" fn(*mut c_void, *const c_char) -> *mut c_void;
#[cfg(target_os = "linux")]
type DlCloseFn = unsafe extern "C" fn(*mut c_void) -> c_int;

/// glibc symbol versions of the dl* family, newest first.
#[cfg(target_os = "linux")]
const GLIBC_VERSIONS: [&CStr; 3] = [c"GLIBC_2.34", c"GLIBC_2.2.5", c"GLIBC_2.17"];

/// glibc's own `dlopen`, `dlsym` and `dlclose`.
#[cfg(target_os = "linux")]
pub struct RealDl {
    open: DlOpenFn,
    lookup: DlSymFn,
    close: DlCloseFn,
}

#[cfg(target_os = "linux")]
impl RealDl {
    /// Resolve the next definitions of the dl* functions after this library.
    pub fn resolve() -> Result<Self, CoreError> {
        unsafe {
            Ok(Self {
                open: std::mem::transmute::<*mut c_void, DlOpenFn>(resolve_next(c"dlopen")?),
                lookup: std::mem::transmute::<*mut c_void, DlSymFn>(resolve_next(c"dlsym")?),
                close: std::mem::transmute::<*mut c_void, DlCloseFn>(resolve_next(c"dlclose")?),
            })
        }
    }
}

#[cfg(target_os = "linux")]
unsafe fn resolve_next(name: &CStr) -> Result<*mut c_void, CoreError> {
    for version in GLIBC_VERSIONS {
        let ptr = unsafe { libc::dlvsym(libc::RTLD_NEXT, name.as_ptr(), version.as_ptr()) };
        if !ptr.is_null() {
            debug!("resolved {:?}@{:?}", name, version);
            return Ok(ptr);
        }
    }
    Err(CoreError::MissingSymbol(name.to_string_lossy().into_owned()))
}

#[cfg(target_os = "linux")]
impl DynamicLoader for RealDl {
    unsafe fn open(&self, filename: *const c_char, flags: c_int) -> *mut c_void {
        unsafe { (self.open)(filename, flags) }
    }

    unsafe fn lookup(&self, handle: *mut c_void, symbol: *const c_char) -> *mut c_void {
        unsafe { (self.lookup)(handle, symbol) }
    }

    unsafe fn close(&self, handle: *mut c_void) -> c_int {
        unsafe { (self.close)(handle) }
    }
}

#[cfg(target_os = "linux")]
static INTERCEPTOR: OnceLock<DlInterceptor<RealDl>> = OnceLock::new();

/// Resolve the real loader and create the process-wide interceptor.
/// A second call returns the existing interceptor.
#[cfg(target_os = "linux")]
pub fn initialize() -> Result<&'static DlInterceptor<RealDl>, CoreError> {
    if let Some(existing) = INTERCEPTOR.get() {
        warn!("dynamic loader interception already initialized");
        return Ok(existing);
    }
    let real = RealDl::resolve()?;
    Ok(INTERCEPTOR.get_or_init(|| DlInterceptor::new(real)))
}

/// The process-wide interceptor, if [`initialize`] ran.
#[cfg(target_os = "linux")]
pub fn global() -> Option<&'static DlInterceptor<RealDl>> {
    INTERCEPTOR.get()
}

/// Suspend process-wide interception for the guard's lifetime. No-op when
/// interception was never initialized.
pub fn suspend_hooks() -> Option<HookSuspension<'static>> {
    #[cfg(target_os = "linux")]
    {
        global().map(DlInterceptor::suspend)
    }
    #[cfg(not(target_os = "linux"))]
    {
        None
    }
}

//! LD_PRELOAD entry point.
//!
//! Exports `dlopen`, `dlsym` and `dlclose` so every dynamic lookup in the
//! process goes through the framegen interceptor, and installs the Vulkan
//! hooks from the library constructor, before the host runs any code of its
//! own.
//!
//! There is no destructor. Process-wide state lives in statics that are never
//! dropped, so normal exit runs without framegen teardown and the host keeps
//! its exit status.

use std::ffi::{c_char, c_int, c_void};

use framegen_common::logging::init_logging;
use framegen_common::platform::platform_name;
use framegen_core::config::FrameGenConfig;
use framegen_core::dl::{self, DlInterceptor, RealDl};
use framegen_core::CoreError;
use framegen_vk::state::{self, Runtime};
use framegen_vk::{hooks, loader};
use tracing::{error, info};

/// Terminate on an unrecoverable setup failure. Without the real loader
/// functions no lookup can be answered correctly.
fn fatal(err: &CoreError) -> ! {
    init_logging(None);
    error!("framegen initialization failed: {}", err);
    std::process::exit(1)
}

fn interceptor() -> &'static DlInterceptor<RealDl> {
    if let Some(dl) = dl::global() {
        return dl;
    }
    match dl::initialize() {
        Ok(dl) => dl,
        Err(e) => fatal(&e),
    }
}

fn bootstrap() -> Result<(), CoreError> {
    let config = FrameGenConfig::from_environment();
    init_logging(config.log_filter.as_deref());
    info!(
        "framegen {} on {}: multiplier {}, generator {}",
        env!("CARGO_PKG_VERSION"),
        platform_name(),
        config.multiplier,
        config.generator_library
    );
    state::install_runtime(Runtime::from_config(config));

    let dl = interceptor();
    loader::initialize(dl)?;
    hooks::install(dl);
    Ok(())
}

extern "C" fn on_load() {
    if let Err(e) = bootstrap() {
        fatal(&e);
    }
}

#[used]
#[link_section = ".init_array"]
static INIT: extern "C" fn() = on_load;

// ── Exported loader functions ───────────────────────────────

#[no_mangle]
pub unsafe extern "C" fn dlopen(filename: *const c_char, flags: c_int) -> *mut c_void {
    unsafe { interceptor().open(filename, flags) }
}

#[no_mangle]
pub unsafe extern "C" fn dlsym(handle: *mut c_void, symbol: *const c_char) -> *mut c_void {
    unsafe { interceptor().lookup(handle, symbol) }
}

#[no_mangle]
pub unsafe extern "C" fn dlclose(handle: *mut c_void) -> c_int {
    unsafe { interceptor().close(handle) }
}

use std::path::PathBuf;

/// Sonames under which applications load the Vulkan loader.
pub const VULKAN_LIBRARY_NAMES: [&str; 2] = ["libvulkan.so.1", "libvulkan.so"];

/// Soname opened internally to reach the real Vulkan entrypoints.
pub const VULKAN_LIBRARY: &str = VULKAN_LIBRARY_NAMES[0];

/// Frame generator library loaded when no other path is configured.
pub const DEFAULT_GENERATOR_LIBRARY: &str = "libafmf.so";

/// Returns the per-user configuration directory for framegen.
/// `$XDG_CONFIG_HOME/framegen`, falling back to `$HOME/.config/framegen`.
pub fn config_dir() -> Option<PathBuf> {
    if let Some(dir) = std::env::var_os("XDG_CONFIG_HOME").filter(|d| !d.is_empty()) {
        return Some(PathBuf::from(dir).join("framegen"));
    }
    std::env::var_os("HOME")
        .filter(|h| !h.is_empty())
        .map(|home| PathBuf::from(home).join(".config").join("framegen"))
}

/// Returns the platform name string.
pub fn platform_name() -> &'static str {
    #[cfg(target_os = "linux")]
    { "linux" }
    #[cfg(not(target_os = "linux"))]
    { "unknown" }
}

use std::collections::HashSet;
use std::ffi::c_void;

use parking_lot::Mutex;

/// Handles currently open through the real `dlopen`. Each handle is removed
/// at most once, which is what keeps a handle from being closed twice when it
/// was obtained both through interception and with hooks suspended.
#[derive(Debug, Default)]
pub struct LoadedHandleSet {
    handles: Mutex<HashSet<usize>>,
}

impl LoadedHandleSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true if the handle was not tracked yet.
    pub fn insert(&self, handle: *mut c_void) -> bool {
        self.handles.lock().insert(handle as usize)
    }

    /// Returns true if the handle was tracked and is now removed.
    pub fn remove(&self, handle: *mut c_void) -> bool {
        self.handles.lock().remove(&(handle as usize))
    }

    pub fn contains(&self, handle: *mut c_void) -> bool {
        self.handles.lock().contains(&(handle as usize))
    }

    pub fn len(&self) -> usize {
        self.handles.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.lock().is_empty()
    }
}

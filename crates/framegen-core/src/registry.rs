//! Per-filename override tables and the handle indirection around them.
//!
//! Opening a registered module hands out an *intercepted* handle instead of
//! the real one. Intercepted handles are tagged odd integers carrying the
//! descriptor index; real handles returned by the dynamic loader are pointer
//! aligned, so the two can never be confused.

use std::ffi::c_void;

use parking_lot::RwLock;
use tracing::{debug, warn};

use crate::symbols::{SymbolAddr, SymbolTable};

/// Index of a descriptor inside an [`OverrideRegistry`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DescriptorId(usize);

impl DescriptorId {
    pub fn index(self) -> usize {
        self.0
    }
}

/// Decoded form of a module handle seen at the loader boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModuleHandle {
    Null,
    Real(usize),
    Intercepted(DescriptorId),
}

impl ModuleHandle {
    /// Raw value handed to the application.
    pub fn to_raw(self) -> *mut c_void {
        match self {
            ModuleHandle::Null => std::ptr::null_mut(),
            ModuleHandle::Real(raw) => raw as *mut c_void,
            ModuleHandle::Intercepted(id) => ((id.0 << 1) | 1) as *mut c_void,
        }
    }

    /// Structural decode without consulting a registry. Odd values are only
    /// intercepted handles once a registry confirms the id exists.
    fn tagged_id(raw: *mut c_void) -> Option<usize> {
        let value = raw as usize;
        (value & 1 == 1).then_some(value >> 1)
    }
}

/// Override table for one module filename.
#[derive(Debug)]
pub struct OverrideDescriptor {
    filename: String,
    symbols: SymbolTable,
    real_handle: Option<usize>,
}

impl OverrideDescriptor {
    pub fn filename(&self) -> &str {
        &self.filename
    }

    pub fn symbols(&self) -> &SymbolTable {
        &self.symbols
    }

    /// Real handle stashed by the last intercepted open, if still open.
    pub fn real_handle(&self) -> Option<*mut c_void> {
        self.real_handle.map(|h| h as *mut c_void)
    }
}

/// Result of [`OverrideRegistry::register`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegisterOutcome {
    pub id: DescriptorId,
    /// True if this call created the descriptor.
    pub created: bool,
    /// Names that collided with an earlier registration and were skipped.
    pub rejected: Vec<String>,
}

/// Process-wide set of override descriptors. Descriptors are never removed.
#[derive(Debug, Default)]
pub struct OverrideRegistry {
    descriptors: RwLock<Vec<OverrideDescriptor>>,
}

impl OverrideRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `symbols` for `filename`, merging into an existing descriptor.
    /// The first registration of a name wins; later ones are logged and skipped.
    pub fn register(&self, filename: &str, symbols: SymbolTable) -> RegisterOutcome {
        let mut descriptors = self.descriptors.write();

        if let Some(index) = descriptors.iter().position(|d| d.filename == filename) {
            let existing = &mut descriptors[index];
            let rejected = existing.symbols.merge(symbols);
            for name in &rejected {
                warn!(
                    "Tried registering symbol {}::{}, but it is already defined",
                    filename, name
                );
            }
            return RegisterOutcome {
                id: DescriptorId(index),
                created: false,
                rejected,
            };
        }

        debug!("registering {} overrides for {}", symbols.len(), filename);
        descriptors.push(OverrideDescriptor {
            filename: filename.to_string(),
            symbols,
            real_handle: None,
        });
        RegisterOutcome {
            id: DescriptorId(descriptors.len() - 1),
            created: true,
            rejected: Vec::new(),
        }
    }

    pub fn find_by_filename(&self, filename: &str) -> Option<DescriptorId> {
        self.descriptors
            .read()
            .iter()
            .position(|d| d.filename == filename)
            .map(DescriptorId)
    }

    /// Map a raw handle back to the descriptor it was issued for.
    pub fn find_by_fake_handle(&self, raw: *mut c_void) -> Option<DescriptorId> {
        let index = ModuleHandle::tagged_id(raw)?;
        (index < self.descriptors.read().len()).then_some(DescriptorId(index))
    }

    /// Classify a raw handle received from the application.
    pub fn resolve(&self, raw: *mut c_void) -> ModuleHandle {
        if raw.is_null() {
            return ModuleHandle::Null;
        }
        match self.find_by_fake_handle(raw) {
            Some(id) => ModuleHandle::Intercepted(id),
            None => ModuleHandle::Real(raw as usize),
        }
    }

    pub fn symbol(&self, id: DescriptorId, name: &str) -> Option<SymbolAddr> {
        self.descriptors.read().get(id.0)?.symbols.get(name)
    }

    pub fn filename(&self, id: DescriptorId) -> Option<String> {
        self.descriptors.read().get(id.0).map(|d| d.filename.clone())
    }

    pub fn real_handle(&self, id: DescriptorId) -> Option<*mut c_void> {
        self.descriptors.read().get(id.0)?.real_handle()
    }

    /// Stash `real` in the descriptor and return the intercepted handle for it.
    pub fn attach(&self, id: DescriptorId, real: *mut c_void) -> *mut c_void {
        if let Some(descriptor) = self.descriptors.write().get_mut(id.0) {
            descriptor.real_handle = Some(real as usize);
        }
        ModuleHandle::Intercepted(id).to_raw()
    }

    /// Clear and return the stashed real handle.
    pub fn detach(&self, id: DescriptorId) -> Option<*mut c_void> {
        self.descriptors
            .write()
            .get_mut(id.0)?
            .real_handle
            .take()
            .map(|h| h as *mut c_void)
    }

    /// Run `f` over a descriptor while holding the read lock.
    pub fn with_descriptor<R>(
        &self,
        id: DescriptorId,
        f: impl FnOnce(&OverrideDescriptor) -> R,
    ) -> Option<R> {
        self.descriptors.read().get(id.0).map(f)
    }

    pub fn len(&self) -> usize {
        self.descriptors.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.descriptors.read().is_empty()
    }
}

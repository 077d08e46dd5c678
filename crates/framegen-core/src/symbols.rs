use std::collections::HashMap;
use std::ffi::c_void;

/// Address of an exported function. Stored as an integer so tables holding
/// it can be shared across threads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SymbolAddr(usize);

impl SymbolAddr {
    pub fn new(ptr: *const c_void) -> Self {
        Self(ptr as usize)
    }

    pub fn as_ptr(self) -> *mut c_void {
        self.0 as *mut c_void
    }

    pub fn raw(self) -> usize {
        self.0
    }
}

/// Symbol name to replacement address. Names are unique and the first
/// definition of a name is the one that sticks.
#[derive(Debug, Clone, Default)]
pub struct SymbolTable {
    entries: HashMap<String, SymbolAddr>,
}

impl SymbolTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder form of [`SymbolTable::define`].
    pub fn with(mut self, name: impl Into<String>, addr: SymbolAddr) -> Self {
        self.define(name, addr);
        self
    }

    /// Add `name`. Returns false, leaving the table unchanged, if the name is
    /// already defined.
    pub fn define(&mut self, name: impl Into<String>, addr: SymbolAddr) -> bool {
        use std::collections::hash_map::Entry;
        match self.entries.entry(name.into()) {
            Entry::Occupied(_) => false,
            Entry::Vacant(slot) => {
                slot.insert(addr);
                true
            }
        }
    }

    /// Move every symbol of `other` into `self`. Names already present keep
    /// their address; the colliding names are returned.
    pub fn merge(&mut self, other: SymbolTable) -> Vec<String> {
        let mut rejected = Vec::new();
        for (name, addr) in other.entries {
            if self.entries.contains_key(&name) {
                rejected.push(name);
            } else {
                self.entries.insert(name, addr);
            }
        }
        rejected.sort();
        rejected
    }

    pub fn get(&self, name: &str) -> Option<SymbolAddr> {
        self.entries.get(name).copied()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, SymbolAddr)> {
        self.entries.iter().map(|(name, addr)| (name.as_str(), *addr))
    }
}

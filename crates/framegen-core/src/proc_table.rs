use parking_lot::RwLock;
use tracing::warn;

use crate::symbols::{SymbolAddr, SymbolTable};

/// Flat name → override table consulted by the graphics API's own
/// `GetProcAddr` entrypoints. No per-module indirection: an application may
/// reach the same function through `dlsym` or through the API accessor.
#[derive(Debug, Default)]
pub struct ProcTable {
    symbols: RwLock<SymbolTable>,
}

impl ProcTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// First registration of a name wins. Returns false on a collision.
    pub fn register(&self, name: &str, addr: SymbolAddr) -> bool {
        let inserted = self.symbols.write().define(name, addr);
        if !inserted {
            warn!("Tried registering Vulkan symbol {}, but it is already defined", name);
        }
        inserted
    }

    /// Register every entry of `table`, returning the names that collided.
    pub fn register_all(&self, table: &SymbolTable) -> Vec<String> {
        let mut rejected: Vec<String> = table
            .iter()
            .filter(|(name, addr)| !self.register(name, *addr))
            .map(|(name, _)| name.to_string())
            .collect();
        rejected.sort();
        rejected
    }

    pub fn get(&self, name: &str) -> Option<SymbolAddr> {
        self.symbols.read().get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.symbols.read().contains(name)
    }

    /// Snapshot of the current table.
    pub fn snapshot(&self) -> SymbolTable {
        self.symbols.read().clone()
    }

    pub fn len(&self) -> usize {
        self.symbols.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.symbols.read().is_empty()
    }
}

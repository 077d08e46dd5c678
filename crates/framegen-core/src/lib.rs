//! GPU-independent core of the framegen interposer: configuration, the
//! module override registry and the dynamic loader interception built on it.

pub mod config;
pub mod dl;
pub mod error;
pub mod loaded;
pub mod proc_table;
pub mod registry;
pub mod ring;
pub mod symbols;

pub use error::CoreError;

//! Module Registry
//!
//! Module definitions, the registry that resolves them by id, and the
//! built-in reference modules.

pub mod builtin;
pub mod definition;
pub mod registry;

pub use definition::{ConsumedContract, ErasedState, ModuleBuilder, ModuleDefinition, ProvidedContract};
pub use registry::ModuleRegistry;

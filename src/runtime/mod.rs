//! Runtime objects and execution
//!
//! Everything a running module owns or touches lives here: linear memories,
//! tables, globals, the import registry, the instance lifecycle, and the
//! interpreter that executes decoded function bodies.

pub mod context;
pub mod global;
pub mod imports;
pub mod instance;
mod interp;
pub mod memory;
pub mod table;

pub use context::InstanceContext;
pub use global::{Global, GlobalDescriptor, Mutability};
pub use imports::{HostFunction, ImportObject};
pub use instance::Instance;
pub use memory::{Memory, MAX_PAGES, PAGE_SIZE};
pub use table::{FuncRef, Table};

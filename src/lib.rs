//! An embeddable WebAssembly runtime.
//!
//! skiff is the execution and resource-management engine behind a wasm
//! embedding boundary: it validates binary modules, instantiates them against
//! host-provided imports, dispatches typed calls between host and guest, and
//! manages the linear memories, tables and global cells a module exposes or
//! requires.
//!
//! # Modules
//!
//! - [`decode`] -- Binary format decoder and structural validator. Reads
//!   `.wasm` bytes into a [`decode::module::Module`].
//! - [`runtime`] -- Instances, memories, tables, globals, host imports, and
//!   the stack-machine interpreter.
//! - [`error`] -- The error taxonomy and the per-thread last-error channel.
//!
//! # Example
//!
//! Instantiate a module and call an exported function:
//!
//! ```
//! use skiff::{ImportObject, Instance, Value};
//!
//! let bytes = wat::parse_str(r#"
//!     (module
//!         (func (export "add") (param i32 i32) (result i32)
//!             local.get 0
//!             local.get 1
//!             i32.add))
//! "#).unwrap();
//!
//! let imports = ImportObject::new();
//! let mut instance = Instance::instantiate(&bytes, &imports).unwrap();
//! let results = instance.call("add", &[Value::I32(2), Value::I32(3)]).unwrap();
//! assert_eq!(results, vec![Value::I32(5)]);
//! ```
//!
//! # Ownership and concurrency
//!
//! Every created object (`Instance`, `Memory`, `Table`, `Global`,
//! `ImportObject`) is owned by its creator and released on drop. Calls run to
//! completion on the caller's thread with no internal locking; an `Instance`
//! requires `&mut` access, so serialised use per instance is enforced by the
//! borrow checker, while distinct instances may live on distinct threads.
//! Failures are reported through `Result` and recorded on a per-thread error
//! channel readable via [`last_error_length`] and [`last_error_message`].

pub mod decode;
pub mod error;
pub mod runtime;
pub mod values;

pub use decode::module::{FuncType, Limits};
pub use decode::{decode, validate};
pub use error::{
    last_error_length, last_error_message, ContractViolation, DecodeError, Error, LinkError,
    ResourceLimitError, Trap,
};
pub use runtime::{
    FuncRef, Global, GlobalDescriptor, HostFunction, ImportObject, Instance, InstanceContext,
    Memory, Mutability, Table, MAX_PAGES, PAGE_SIZE,
};
pub use values::{Value, ValueKind};

//! Error taxonomy and the thread-local error channel
//!
//! Every fallible embedding operation reports failure two ways: the `Result`
//! it returns, and a human-readable message recorded on a per-thread channel
//! that mirrors a C-style `last_error` query surface. Successful operations
//! never touch the channel, so a read is only meaningful immediately after a
//! failure signal on the same thread.

use crate::values::ValueKind;
use std::cell::RefCell;
use std::fmt;
use thiserror::Error;

/// Top-level error for every fallible embedding operation
#[derive(Debug, Error)]
pub enum Error {
    #[error("decode error: {0}")]
    Decode(#[from] DecodeError),

    #[error("link error: {0}")]
    Link(#[from] LinkError),

    #[error("trap: {0}")]
    Trap(#[from] Trap),

    #[error("resource limit: {0}")]
    ResourceLimit(#[from] ResourceLimitError),

    #[error("contract violation: {0}")]
    Contract(#[from] ContractViolation),
}

/// A malformed or unsupported binary module
#[derive(Debug, Error, PartialEq)]
pub enum DecodeError {
    #[error("unexpected end of input at offset {0}")]
    UnexpectedEof(usize),

    #[error("bad magic number 0x{0:08x}, expected 0x6d736100")]
    BadMagic(u32),

    #[error("unsupported binary version {0}, expected 1")]
    BadVersion(u32),

    #[error("malformed varint at offset {0}")]
    MalformedVarint(usize),

    #[error("invalid UTF-8 in name at offset {0}")]
    InvalidName(usize),

    #[error("unknown value type 0x{0:02x}")]
    UnknownValueType(u8),

    #[error("invalid function type marker 0x{0:02x}, expected 0x60")]
    InvalidFuncTypeMarker(u8),

    #[error("unknown import kind 0x{0:02x}")]
    UnknownImportKind(u8),

    #[error("unknown export kind 0x{0:02x}")]
    UnknownExportKind(u8),

    #[error("unknown limits flag 0x{0:02x}")]
    UnknownLimitsFlag(u8),

    #[error("invalid mutability flag 0x{0:02x}")]
    InvalidMutability(u8),

    #[error("invalid element type 0x{0:02x}, expected funcref")]
    InvalidElemType(u8),

    #[error("unsupported segment flag {0}")]
    UnsupportedSegmentFlag(u32),

    #[error("segment offset expression must be i32")]
    OffsetNotI32,

    #[error("unknown section id {0}")]
    UnknownSection(u8),

    #[error("section id {0} out of order")]
    SectionOutOfOrder(u8),

    #[error("section size mismatch: declared {declared} bytes, consumed {consumed}")]
    SectionSizeMismatch { declared: usize, consumed: usize },

    #[error("unsupported opcode 0x{0:02x}")]
    UnsupportedOpcode(u8),

    #[error("unsupported block type 0x{0:02x}")]
    UnsupportedBlockType(u8),

    #[error("{kind} count {count} exceeds implementation limit {limit}")]
    CountExceedsLimit {
        kind: &'static str,
        count: u32,
        limit: u32,
    },

    #[error("function and code section lengths differ ({functions} vs {bodies})")]
    FunctionCodeMismatch { functions: usize, bodies: usize },

    #[error("constant expression is not a single const instruction")]
    InvalidConstExpr,

    #[error("type index {0} out of range")]
    TypeIndexOutOfRange(u32),

    #[error("function index {0} out of range")]
    FuncIndexOutOfRange(u32),

    #[error("table index {0} out of range")]
    TableIndexOutOfRange(u32),

    #[error("memory index {0} out of range")]
    MemoryIndexOutOfRange(u32),

    #[error("global index {0} out of range")]
    GlobalIndexOutOfRange(u32),

    #[error("local index {0} out of range")]
    LocalIndexOutOfRange(u32),

    #[error("branch depth {0} out of range")]
    BranchDepthOutOfRange(u32),

    #[error("at most one memory is supported")]
    MultipleMemories,

    #[error("at most one table is supported")]
    MultipleTables,

    #[error("limits invalid: min {min} exceeds max {max}")]
    LimitsInvalid { min: u32, max: u32 },

    #[error("memory limits exceed {limit} pages")]
    MemoryLimitsTooLarge { limit: u32 },

    #[error("duplicate export name '{0}'")]
    DuplicateExport(String),

    #[error("export index {index} out of range for {kind} export '{name}'")]
    ExportIndexOutOfRange {
        name: String,
        kind: &'static str,
        index: u32,
    },

    #[error("global init expression has kind {actual}, declared {declared}")]
    GlobalInitKindMismatch {
        declared: ValueKind,
        actual: ValueKind,
    },

    #[error("start function must have no parameters and no results")]
    StartFunctionSignature,

    #[error("global.set targets immutable global {0}")]
    SetOfImmutableGlobal(u32),

    #[error("{op} requires a memory but the module declares none")]
    MissingMemory { op: &'static str },

    #[error("call_indirect requires a table but the module declares none")]
    MissingTable,
}

/// An import the module declares could not be satisfied at instantiation time
#[derive(Debug, Error, PartialEq)]
pub enum LinkError {
    #[error("unresolved import {namespace}.{name}")]
    UnresolvedImport { namespace: String, name: String },

    #[error("signature mismatch for import {namespace}.{name}: module expects {expected}, host registered {found}")]
    SignatureMismatch {
        namespace: String,
        name: String,
        expected: String,
        found: String,
    },

    #[error("import {namespace}.{name} is a {kind} import; only function imports can be registered")]
    UnsupportedImportKind {
        namespace: String,
        name: String,
        kind: &'static str,
    },

    #[error("data segment {index} is out of bounds of memory {memory}")]
    DataSegmentOutOfBounds { index: u32, memory: u32 },

    #[error("element segment {index} is out of bounds of table {table}")]
    ElementSegmentOutOfBounds { index: u32, table: u32 },
}

/// A guest execution fault; aborts the in-flight call only
#[derive(Debug, Error, Clone, PartialEq)]
pub enum Trap {
    #[error("out of bounds memory access")]
    MemoryOutOfBounds,

    #[error("integer divide by zero")]
    DivisionByZero,

    #[error("integer overflow")]
    IntegerOverflow,

    #[error("invalid conversion to integer")]
    InvalidConversion,

    #[error("unreachable executed")]
    Unreachable,

    #[error("undefined table element at index {0}")]
    UndefinedElement(u32),

    #[error("uninitialized table element at index {0}")]
    UninitializedElement(u32),

    #[error("indirect call type mismatch")]
    IndirectCallTypeMismatch,

    #[error("call stack exhausted")]
    CallStackExhausted,

    #[error("fuel exhausted")]
    OutOfFuel,

    #[error("value stack underflow")]
    StackUnderflow,

    #[error("type mismatch: expected {expected}")]
    TypeMismatch { expected: ValueKind },

    #[error("local index {0} out of bounds")]
    LocalOutOfBounds(u32),

    #[error("global index {0} out of bounds")]
    GlobalOutOfBounds(u32),

    #[error("function index {0} out of bounds")]
    FunctionOutOfBounds(u32),

    #[error("host function returned results not matching its declared signature")]
    HostSignatureMismatch,

    #[error("host error: {0}")]
    Host(String),
}

impl Trap {
    /// Construct a host-defined trap carrying a custom message
    pub fn host(message: impl Into<String>) -> Trap {
        Trap::Host(message.into())
    }
}

/// A growth or allocation request the host cannot satisfy
#[derive(Debug, Error, PartialEq)]
pub enum ResourceLimitError {
    #[error("memory growth to {requested} pages exceeds maximum of {max}")]
    MemoryMaxExceeded { requested: u64, max: u32 },

    #[error("table growth to {requested} elements exceeds maximum of {max}")]
    TableMaxExceeded { requested: u64, max: u32 },

    #[error("memory of {0} pages exceeds the 32-bit address space")]
    AddressSpaceExceeded(u64),

    #[error("allocation of {bytes} bytes failed")]
    AllocationFailed { bytes: usize },
}

/// Misuse of the embedding API by the host; deterministic, never undefined
#[derive(Debug, Error, PartialEq)]
pub enum ContractViolation {
    #[error("unknown export '{0}'")]
    UnknownExport(String),

    #[error("export '{0}' is not a function")]
    NotAFunction(String),

    #[error("'{name}' expects {expected} parameters, got {actual}")]
    ParamArityMismatch {
        name: String,
        expected: usize,
        actual: usize,
    },

    #[error("'{name}' parameter {index} expects {expected}, got {actual}")]
    ParamKindMismatch {
        name: String,
        index: usize,
        expected: ValueKind,
        actual: ValueKind,
    },

    #[error("global is immutable")]
    ImmutableGlobal,

    #[error("global holds {expected}, cannot store {actual}")]
    GlobalKindMismatch {
        expected: ValueKind,
        actual: ValueKind,
    },

    #[error("table index {index} out of bounds (size {size})")]
    TableIndexOutOfBounds { index: u32, size: u32 },

    #[error("limits invalid: min {min} exceeds max {max}")]
    InvalidLimits { min: u32, max: u32 },

    #[error("import {namespace}.{name} is already registered")]
    DuplicateImport { namespace: String, name: String },
}

thread_local! {
    static LAST_ERROR: RefCell<Option<String>> = RefCell::new(None);
}

/// Record a failure on the calling thread's error channel
///
/// The channel holds at most one message; each failure overwrites the last.
pub(crate) fn record(err: &dyn fmt::Display) {
    let message = err.to_string();
    log::debug!("error recorded: {message}");
    LAST_ERROR.with(|slot| *slot.borrow_mut() = Some(message));
}

/// Record the error of a failed result on the channel, passing it through
pub(crate) fn report<T, E: fmt::Display>(result: Result<T, E>) -> Result<T, E> {
    if let Err(err) = &result {
        record(err);
    }
    result
}

/// Byte length of the most recently recorded error message for this thread,
/// or 0 if no failure has been recorded.
pub fn last_error_length() -> usize {
    LAST_ERROR.with(|slot| slot.borrow().as_ref().map_or(0, String::len))
}

/// Copy the most recent error message into `buffer`.
///
/// Returns the number of bytes written, or -1 if no error is recorded or the
/// buffer is smaller than the message. The read is non-destructive and the
/// channel is not cleared by successful operations, so a read that is not
/// immediately preceded by a failure returns the previous failure's message.
pub fn last_error_message(buffer: &mut [u8]) -> i32 {
    LAST_ERROR.with(|slot| {
        let slot = slot.borrow();
        let Some(message) = slot.as_ref() else {
            return -1;
        };
        if buffer.len() < message.len() {
            return -1;
        }
        buffer[..message.len()].copy_from_slice(message.as_bytes());
        message.len() as i32
    })
}

#[cfg(test)]
pub(crate) fn clear_last_error() {
    LAST_ERROR.with(|slot| *slot.borrow_mut() = None);
}

//! Global cells
//!
//! A global is a single typed storage cell whose kind and mutability are
//! fixed at creation. Writes to an immutable global, or writes of the wrong
//! kind, are rejected deterministically with an error signal and no state
//! change; they never trap and never silently succeed.

use crate::error::{self, ContractViolation, Error, Trap};
use crate::values::{Value, ValueKind};

/// Whether a global accepts writes after creation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mutability {
    Const,
    Var,
}

/// Kind and mutability of a global, as reported to the host
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GlobalDescriptor {
    pub kind: ValueKind,
    pub mutable: bool,
}

/// A typed storage cell
#[derive(Debug)]
pub struct Global {
    value: Value,
    mutability: Mutability,
}

impl Global {
    /// Create a new global holding `value`. The caller owns the returned
    /// global; its kind is fixed to the kind of the initial value.
    pub fn new(value: Value, mutability: Mutability) -> Global {
        Global { value, mutability }
    }

    /// The current value, tagged with the global's fixed kind
    pub fn get(&self) -> Value {
        self.value
    }

    /// The fixed kind of this global
    pub fn kind(&self) -> ValueKind {
        self.value.kind()
    }

    /// Kind and mutability, for host introspection
    pub fn descriptor(&self) -> GlobalDescriptor {
        GlobalDescriptor {
            kind: self.kind(),
            mutable: self.mutability == Mutability::Var,
        }
    }

    /// Replace the stored value.
    ///
    /// Fails, leaving the value unchanged, if the global is immutable or the
    /// new value's kind differs from the global's fixed kind.
    pub fn set(&mut self, value: Value) -> Result<(), Error> {
        let result = self.try_set(value);
        error::report(result)
    }

    fn try_set(&mut self, value: Value) -> Result<(), Error> {
        if self.mutability == Mutability::Const {
            return Err(ContractViolation::ImmutableGlobal.into());
        }
        if value.kind() != self.kind() {
            return Err(ContractViolation::GlobalKindMismatch {
                expected: self.kind(),
                actual: value.kind(),
            }
            .into());
        }
        self.value = value;
        Ok(())
    }

    /// Kind-checked store that bypasses the mutability check; used by the
    /// interpreter, where `global.set` on an immutable global has already
    /// been rejected at validation time.
    pub(crate) fn store(&mut self, value: Value) -> Result<(), Trap> {
        if value.kind() != self.kind() {
            return Err(Trap::TypeMismatch {
                expected: self.kind(),
            });
        }
        self.value = value;
        Ok(())
    }
}

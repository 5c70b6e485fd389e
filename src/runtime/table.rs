//! Tables of function references
//!
//! A table is a growable, indexed buffer of nullable function references.
//! Guest code reaches them through `call_indirect`; the host sees them as an
//! owned resource with the same element-granularity limit and monotonic
//! growth rules as linear memory.

use crate::decode::module::Limits;
use crate::error::{self, ContractViolation, Error, ResourceLimitError, Trap};

/// Implementation ceiling on table size, preventing hostile limits from
/// forcing enormous allocations
pub const MAX_TABLE_ELEMENTS: u32 = 10_000_000;

/// An opaque reference to a function in an instance's function index space
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FuncRef(pub(crate) u32);

impl FuncRef {
    pub(crate) fn index(&self) -> u32 {
        self.0
    }
}

/// A table instance
#[derive(Debug)]
pub struct Table {
    elements: Vec<Option<FuncRef>>,
    limits: Limits,
}

impl Table {
    /// Create a new table with the given element limits, filled with null
    /// references. The caller owns the returned table.
    pub fn new(limits: Limits) -> Result<Table, Error> {
        error::report(Table::allocate(limits))
    }

    pub(crate) fn allocate(limits: Limits) -> Result<Table, Error> {
        if limits.min > MAX_TABLE_ELEMENTS {
            return Err(ResourceLimitError::TableMaxExceeded {
                requested: u64::from(limits.min),
                max: MAX_TABLE_ELEMENTS,
            }
            .into());
        }
        if let Some(max) = limits.max {
            if limits.min > max {
                return Err(ContractViolation::InvalidLimits {
                    min: limits.min,
                    max,
                }
                .into());
            }
        }

        Ok(Table {
            elements: vec![None; limits.min as usize],
            limits,
        })
    }

    /// Current number of elements
    pub fn size(&self) -> u32 {
        self.elements.len() as u32
    }

    /// The limits this table was created with
    pub fn limits(&self) -> Limits {
        self.limits
    }

    /// Get the element at `index`; `None` is a null reference
    pub fn get(&self, index: u32) -> Result<Option<FuncRef>, Error> {
        let result = self
            .lookup(index)
            .map_err(|_| Error::from(self.out_of_bounds(index)));
        error::report(result)
    }

    /// Replace the element at `index`
    pub fn set(&mut self, index: u32, value: Option<FuncRef>) -> Result<(), Error> {
        let result = match self.elements.get_mut(index as usize) {
            Some(slot) => {
                *slot = value;
                Ok(())
            }
            None => Err(self.out_of_bounds(index).into()),
        };
        error::report(result)
    }

    /// Grow by `delta` elements, returning the previous size.
    ///
    /// New slots hold null references. Fails without mutating state if the
    /// declared max or the implementation ceiling would be exceeded.
    pub fn grow(&mut self, delta: u32) -> Result<u32, Error> {
        error::report(self.expand(delta))
    }

    pub(crate) fn expand(&mut self, delta: u32) -> Result<u32, Error> {
        let current = self.size();
        let requested = u64::from(current) + u64::from(delta);

        let max = self.limits.max.unwrap_or(MAX_TABLE_ELEMENTS);
        if requested > u64::from(max) {
            return Err(ResourceLimitError::TableMaxExceeded { requested, max }.into());
        }

        self.elements.resize(requested as usize, None);
        log::trace!("table grown from {current} to {requested} elements");
        Ok(current)
    }

    /// Trap-level lookup, for the `call_indirect` path
    pub(crate) fn lookup(&self, index: u32) -> Result<Option<FuncRef>, Trap> {
        self.elements
            .get(index as usize)
            .copied()
            .ok_or(Trap::UndefinedElement(index))
    }

    /// Set without the error-channel write, for element segment initialisation
    pub(crate) fn init(&mut self, index: u32, value: FuncRef) -> Result<(), Trap> {
        let slot = self
            .elements
            .get_mut(index as usize)
            .ok_or(Trap::UndefinedElement(index))?;
        *slot = Some(value);
        Ok(())
    }

    fn out_of_bounds(&self, index: u32) -> ContractViolation {
        ContractViolation::TableIndexOutOfBounds {
            index,
            size: self.size(),
        }
    }
}

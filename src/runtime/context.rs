//! The capability handed to host import callbacks
//!
//! An `InstanceContext` is constructed by the engine immediately before each
//! host callback and borrows the calling instance's runtime objects. The
//! borrow ends when the callback returns, so the context cannot be retained
//! past the call's dynamic extent; the lifetime parameter is what enforces
//! the "valid only for this invocation" rule.

use crate::runtime::global::Global;
use crate::runtime::memory::Memory;
use crate::runtime::table::Table;

pub struct InstanceContext<'a> {
    memories: &'a mut [Memory],
    tables: &'a mut [Table],
    globals: &'a mut [Global],
}

impl<'a> InstanceContext<'a> {
    pub(crate) fn new(
        memories: &'a mut [Memory],
        tables: &'a mut [Table],
        globals: &'a mut [Global],
    ) -> InstanceContext<'a> {
        InstanceContext {
            memories,
            tables,
            globals,
        }
    }

    /// The calling instance's memory at `index` (0 in a single-memory engine)
    pub fn memory(&self, index: u32) -> Option<&Memory> {
        self.memories.get(index as usize)
    }

    /// Mutable access to the calling instance's memory at `index`
    pub fn memory_mut(&mut self, index: u32) -> Option<&mut Memory> {
        self.memories.get_mut(index as usize)
    }

    /// The calling instance's table at `index`
    pub fn table(&self, index: u32) -> Option<&Table> {
        self.tables.get(index as usize)
    }

    pub fn table_mut(&mut self, index: u32) -> Option<&mut Table> {
        self.tables.get_mut(index as usize)
    }

    /// The calling instance's global at `index`
    pub fn global(&self, index: u32) -> Option<&Global> {
        self.globals.get(index as usize)
    }

    pub fn global_mut(&mut self, index: u32) -> Option<&mut Global> {
        self.globals.get_mut(index as usize)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decode::module::Limits;
    use crate::runtime::global::Mutability;
    use crate::values::Value;

    #[test]
    fn test_context_access() {
        let mut memories = vec![Memory::new(Limits { min: 1, max: None }).unwrap()];
        let mut tables = vec![];
        let mut globals = vec![Global::new(Value::I32(3), Mutability::Var)];

        let mut ctx = InstanceContext::new(&mut memories, &mut tables, &mut globals);

        assert!(ctx.memory(0).is_some());
        assert!(ctx.memory(1).is_none());
        assert!(ctx.table(0).is_none());
        assert_eq!(ctx.global(0).unwrap().get(), Value::I32(3));

        ctx.memory_mut(0).unwrap().write_u8(0, 7).unwrap();
        assert_eq!(ctx.memory(0).unwrap().read_u8(0).unwrap(), 7);
    }
}

//! Instance: a linked, running module
//!
//! `instantiate` runs the full pipeline: decode, structural validation,
//! import resolution, resource allocation, segment initialisation, and the
//! start function. Failure at any stage drops every partially built resource
//! before returning, so ownership is never partially transferred.
//!
//! `call` is the typed entry point from host to guest. The export is looked
//! up by name and the parameter list is checked against the declared
//! signature on every call; what was validated at instantiation time is not
//! enough, because exported-function identity is resolved per call.

use crate::decode::module::{ExportKind, ImportKind, Module};
use crate::error::{self, ContractViolation, DecodeError, Error, LinkError};
use crate::runtime::global::{Global, Mutability};
use crate::runtime::imports::{HostFunction, ImportObject};
use crate::runtime::interp::Vm;
use crate::runtime::memory::Memory;
use crate::runtime::table::{FuncRef, Table};
use crate::values::Value;

/// A module linked against its imports, with its runtime objects allocated
#[derive(Debug)]
pub struct Instance {
    module: Module,
    memories: Vec<Memory>,
    tables: Vec<Table>,
    globals: Vec<Global>,
    host_funcs: Vec<HostFunction>,
}

impl Instance {
    /// Instantiate a binary module against host-provided imports.
    ///
    /// The returned instance owns every memory, table and global the module
    /// declares; dropping it releases them all. The import object is only
    /// read and can be reused for further instantiations.
    pub fn instantiate(bytes: &[u8], imports: &ImportObject) -> Result<Instance, Error> {
        error::report(Instance::build(bytes, imports))
    }

    fn build(bytes: &[u8], imports: &ImportObject) -> Result<Instance, Error> {
        let module = crate::decode::checked_decode(bytes)?;

        let host_funcs = resolve_imports(&module, imports)?;

        let mut memories = Vec::with_capacity(module.memories.len());
        for &limits in &module.memories {
            memories.push(Memory::allocate(limits)?);
        }
        let mut tables = Vec::with_capacity(module.tables.len());
        for &limits in &module.tables {
            tables.push(Table::allocate(limits)?);
        }
        let globals = module
            .globals
            .iter()
            .map(|decl| {
                let mutability = if decl.ty.mutable {
                    Mutability::Var
                } else {
                    Mutability::Const
                };
                Global::new(decl.init.evaluate(), mutability)
            })
            .collect();

        let mut instance = Instance {
            module,
            memories,
            tables,
            globals,
            host_funcs,
        };
        instance.initialize_segments()?;
        instance.run_start()?;

        log::debug!(
            "instantiated module: {} functions, {} memories, {} tables, {} globals",
            instance.module.num_funcs(),
            instance.memories.len(),
            instance.tables.len(),
            instance.globals.len()
        );
        Ok(instance)
    }

    /// Apply active element and data segments, with bounds checked up front
    /// so a failed instantiation never half-writes a resource it owns.
    fn initialize_segments(&mut self) -> Result<(), Error> {
        for (index, segment) in self.module.elements.iter().enumerate() {
            let table = self
                .tables
                .get_mut(segment.table as usize)
                .ok_or(DecodeError::TableIndexOutOfRange(segment.table))?;
            let offset = segment.offset.evaluate().as_i32().unwrap_or(0) as u32;
            let end = u64::from(offset) + segment.funcs.len() as u64;
            if end > u64::from(table.size()) {
                return Err(LinkError::ElementSegmentOutOfBounds {
                    index: index as u32,
                    table: segment.table,
                }
                .into());
            }
            for (i, &func) in segment.funcs.iter().enumerate() {
                table
                    .init(offset + i as u32, FuncRef(func))
                    .map_err(|_| LinkError::ElementSegmentOutOfBounds {
                        index: index as u32,
                        table: segment.table,
                    })?;
            }
        }

        for (index, segment) in self.module.data.iter().enumerate() {
            let memory = self
                .memories
                .get_mut(segment.memory as usize)
                .ok_or(DecodeError::MemoryIndexOutOfRange(segment.memory))?;
            let offset = segment.offset.evaluate().as_i32().unwrap_or(0) as u32;
            let end = u64::from(offset) + segment.bytes.len() as u64;
            if end > memory.data_len() as u64 {
                return Err(LinkError::DataSegmentOutOfBounds {
                    index: index as u32,
                    memory: segment.memory,
                }
                .into());
            }
            memory
                .write_bytes(u64::from(offset), &segment.bytes)
                .map_err(|_| LinkError::DataSegmentOutOfBounds {
                    index: index as u32,
                    memory: segment.memory,
                })?;
        }
        Ok(())
    }

    fn run_start(&mut self) -> Result<(), Error> {
        let Some(start) = self.module.start else {
            return Ok(());
        };
        log::debug!("running start function {start}");
        let Instance {
            module,
            memories,
            tables,
            globals,
            host_funcs,
        } = self;
        let mut vm = Vm::new(module, memories, tables, globals, host_funcs, None);
        vm.invoke(start, Vec::new())?;
        Ok(())
    }

    /// Call an exported function by name.
    ///
    /// `params` must match the declared parameter kinds exactly; the results
    /// have exactly the declared result arity. A trap aborts this call only
    /// and leaves the instance's mutable state as the guest left it.
    pub fn call(&mut self, name: &str, params: &[Value]) -> Result<Vec<Value>, Error> {
        error::report(self.dispatch(name, params, None))
    }

    /// Like [`Instance::call`], bounded by an instruction budget.
    ///
    /// Each executed instruction consumes one unit of fuel; exhausting the
    /// budget traps. This is the hook for hosts that must bound runaway
    /// guest code.
    pub fn call_with_fuel(
        &mut self,
        name: &str,
        params: &[Value],
        fuel: Option<u64>,
    ) -> Result<Vec<Value>, Error> {
        error::report(self.dispatch(name, params, fuel))
    }

    fn dispatch(
        &mut self,
        name: &str,
        params: &[Value],
        fuel: Option<u64>,
    ) -> Result<Vec<Value>, Error> {
        let export = self
            .module
            .export(name)
            .ok_or_else(|| ContractViolation::UnknownExport(name.to_string()))?;
        if export.kind != ExportKind::Function {
            return Err(ContractViolation::NotAFunction(name.to_string()).into());
        }
        let func_idx = export.index;

        let ty = self
            .module
            .func_type(func_idx)
            .ok_or(DecodeError::FuncIndexOutOfRange(func_idx))?;
        if params.len() != ty.params.len() {
            return Err(ContractViolation::ParamArityMismatch {
                name: name.to_string(),
                expected: ty.params.len(),
                actual: params.len(),
            }
            .into());
        }
        for (index, (param, &kind)) in params.iter().zip(&ty.params).enumerate() {
            if param.kind() != kind {
                return Err(ContractViolation::ParamKindMismatch {
                    name: name.to_string(),
                    index,
                    expected: kind,
                    actual: param.kind(),
                }
                .into());
            }
        }

        log::trace!("calling export '{name}' with {} params", params.len());
        let Instance {
            module,
            memories,
            tables,
            globals,
            host_funcs,
        } = self;
        let mut vm = Vm::new(module, memories, tables, globals, host_funcs, fuel);
        let results = vm.invoke(func_idx, params.to_vec())?;
        Ok(results)
    }

    /// Names and kinds of everything the module exports
    pub fn exports(&self) -> impl Iterator<Item = (&str, ExportKind)> {
        self.module
            .exports
            .iter()
            .map(|e| (e.name.as_str(), e.kind))
    }

    /// The instance's memory at `index` (0 in a single-memory engine)
    pub fn memory(&self, index: u32) -> Option<&Memory> {
        self.memories.get(index as usize)
    }

    pub fn memory_mut(&mut self, index: u32) -> Option<&mut Memory> {
        self.memories.get_mut(index as usize)
    }

    /// The instance's table at `index`
    pub fn table(&self, index: u32) -> Option<&Table> {
        self.tables.get(index as usize)
    }

    pub fn table_mut(&mut self, index: u32) -> Option<&mut Table> {
        self.tables.get_mut(index as usize)
    }

    /// The instance's global at `index`
    pub fn global(&self, index: u32) -> Option<&Global> {
        self.globals.get(index as usize)
    }

    pub fn global_mut(&mut self, index: u32) -> Option<&mut Global> {
        self.globals.get_mut(index as usize)
    }
}

/// Resolve every declared import against the registry by exact
/// (namespace, name, signature) match
fn resolve_imports(module: &Module, imports: &ImportObject) -> Result<Vec<HostFunction>, Error> {
    let mut resolved = Vec::new();
    for import in &module.imports {
        match &import.kind {
            ImportKind::Function(type_idx) => {
                let host = imports
                    .resolve(&import.namespace, &import.name)
                    .ok_or_else(|| LinkError::UnresolvedImport {
                        namespace: import.namespace.clone(),
                        name: import.name.clone(),
                    })?;
                let expected = module
                    .types
                    .get(*type_idx as usize)
                    .ok_or(DecodeError::TypeIndexOutOfRange(*type_idx))?;
                if host.ty() != expected {
                    return Err(LinkError::SignatureMismatch {
                        namespace: import.namespace.clone(),
                        name: import.name.clone(),
                        expected: expected.to_string(),
                        found: host.ty().to_string(),
                    }
                    .into());
                }
                log::debug!(
                    "linked import {}.{} {}",
                    import.namespace,
                    import.name,
                    expected
                );
                resolved.push(host.clone());
            }
            other => {
                return Err(LinkError::UnsupportedImportKind {
                    namespace: import.namespace.clone(),
                    name: import.name.clone(),
                    kind: other.describe(),
                }
                .into());
            }
        }
    }
    Ok(resolved)
}

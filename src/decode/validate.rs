//! Structural validation of decoded modules
//!
//! Checks the cross-section properties the decoder cannot see while reading a
//! single section: index references, limit sanity, export uniqueness, and a
//! walk over every function body verifying that locals, globals, callees and
//! branch depths resolve. Instantiation refuses any module that fails here,
//! and [`crate::validate`] reports the same verdict to the embedder.

use crate::decode::instr::Instr;
use crate::decode::module::{ExportKind, ImportKind, Limits, Module};
use crate::error::DecodeError;
use crate::runtime::memory::MAX_PAGES;
use crate::values::ValueKind;

/// Validate a decoded module; `Ok` means it is safe to instantiate
pub(crate) fn check(module: &Module) -> Result<(), DecodeError> {
    check_types(module)?;
    check_limits(module)?;
    check_globals(module)?;
    check_exports(module)?;
    check_start(module)?;
    check_segments(module)?;
    check_bodies(module)?;
    Ok(())
}

fn check_types(module: &Module) -> Result<(), DecodeError> {
    let num_types = module.types.len() as u32;
    for import in &module.imports {
        if let ImportKind::Function(type_idx) = import.kind {
            if type_idx >= num_types {
                return Err(DecodeError::TypeIndexOutOfRange(type_idx));
            }
        }
    }
    for &type_idx in &module.functions {
        if type_idx >= num_types {
            return Err(DecodeError::TypeIndexOutOfRange(type_idx));
        }
    }
    Ok(())
}

fn check_one_limits(limits: &Limits) -> Result<(), DecodeError> {
    if let Some(max) = limits.max {
        if limits.min > max {
            return Err(DecodeError::LimitsInvalid {
                min: limits.min,
                max,
            });
        }
    }
    Ok(())
}

fn check_memory_limits(limits: &Limits) -> Result<(), DecodeError> {
    check_one_limits(limits)?;
    if limits.min > MAX_PAGES || limits.max.is_some_and(|max| max > MAX_PAGES) {
        return Err(DecodeError::MemoryLimitsTooLarge { limit: MAX_PAGES });
    }
    Ok(())
}

fn check_limits(module: &Module) -> Result<(), DecodeError> {
    let mut memories = module.memories.len();
    let mut tables = module.tables.len();
    for import in &module.imports {
        match &import.kind {
            ImportKind::Memory(limits) => {
                memories += 1;
                check_memory_limits(limits)?;
            }
            ImportKind::Table(limits) => {
                tables += 1;
                check_one_limits(limits)?;
            }
            _ => {}
        }
    }
    if memories > 1 {
        return Err(DecodeError::MultipleMemories);
    }
    if tables > 1 {
        return Err(DecodeError::MultipleTables);
    }
    for limits in &module.memories {
        check_memory_limits(limits)?;
    }
    for limits in &module.tables {
        check_one_limits(limits)?;
    }
    Ok(())
}

fn check_globals(module: &Module) -> Result<(), DecodeError> {
    for global in &module.globals {
        if global.init.kind() != global.ty.kind {
            return Err(DecodeError::GlobalInitKindMismatch {
                declared: global.ty.kind,
                actual: global.init.kind(),
            });
        }
    }
    Ok(())
}

fn num_globals(module: &Module) -> u32 {
    let imported = module
        .imports
        .iter()
        .filter(|imp| matches!(imp.kind, ImportKind::Global(_)))
        .count();
    (imported + module.globals.len()) as u32
}

/// Mutability of a global by index, spanning imported and local globals
fn global_mutable(module: &Module, idx: u32) -> Option<bool> {
    let imported: Vec<bool> = module
        .imports
        .iter()
        .filter_map(|imp| match imp.kind {
            ImportKind::Global(ty) => Some(ty.mutable),
            _ => None,
        })
        .collect();
    if (idx as usize) < imported.len() {
        return Some(imported[idx as usize]);
    }
    module
        .globals
        .get(idx as usize - imported.len())
        .map(|g| g.ty.mutable)
}

fn check_exports(module: &Module) -> Result<(), DecodeError> {
    let mut seen = std::collections::HashSet::new();
    for export in &module.exports {
        if !seen.insert(export.name.as_str()) {
            return Err(DecodeError::DuplicateExport(export.name.clone()));
        }
        let count = match export.kind {
            ExportKind::Function => module.num_funcs() as u32,
            ExportKind::Table => table_count(module),
            ExportKind::Memory => memory_count(module),
            ExportKind::Global => num_globals(module),
        };
        if export.index >= count {
            return Err(DecodeError::ExportIndexOutOfRange {
                name: export.name.clone(),
                kind: export.kind.describe(),
                index: export.index,
            });
        }
    }
    Ok(())
}

fn memory_count(module: &Module) -> u32 {
    let imported = module
        .imports
        .iter()
        .filter(|imp| matches!(imp.kind, ImportKind::Memory(_)))
        .count();
    (imported + module.memories.len()) as u32
}

fn table_count(module: &Module) -> u32 {
    let imported = module
        .imports
        .iter()
        .filter(|imp| matches!(imp.kind, ImportKind::Table(_)))
        .count();
    (imported + module.tables.len()) as u32
}

fn check_start(module: &Module) -> Result<(), DecodeError> {
    let Some(start) = module.start else {
        return Ok(());
    };
    let ty = module
        .func_type(start)
        .ok_or(DecodeError::FuncIndexOutOfRange(start))?;
    if !ty.params.is_empty() || !ty.results.is_empty() {
        return Err(DecodeError::StartFunctionSignature);
    }
    Ok(())
}

fn check_segments(module: &Module) -> Result<(), DecodeError> {
    for segment in &module.elements {
        if segment.table >= table_count(module) {
            return Err(DecodeError::TableIndexOutOfRange(segment.table));
        }
        if segment.offset.kind() != ValueKind::I32 {
            return Err(DecodeError::OffsetNotI32);
        }
        for &func in &segment.funcs {
            if func as usize >= module.num_funcs() {
                return Err(DecodeError::FuncIndexOutOfRange(func));
            }
        }
    }
    for segment in &module.data {
        if segment.memory >= memory_count(module) {
            return Err(DecodeError::MemoryIndexOutOfRange(segment.memory));
        }
        if segment.offset.kind() != ValueKind::I32 {
            return Err(DecodeError::OffsetNotI32);
        }
    }
    Ok(())
}

fn check_bodies(module: &Module) -> Result<(), DecodeError> {
    for (i, body) in module.code.iter().enumerate() {
        let type_idx = module.functions[i];
        let ty = module
            .types
            .get(type_idx as usize)
            .ok_or(DecodeError::TypeIndexOutOfRange(type_idx))?;
        let num_locals = (ty.params.len() + body.locals.len()) as u32;
        walk(module, num_locals, &body.code, 1)?;
    }
    Ok(())
}

/// Recursive walk of a structured body. `labels` counts the enclosing branch
/// targets, including the implicit function-body label.
fn walk(module: &Module, num_locals: u32, code: &[Instr], labels: u32) -> Result<(), DecodeError> {
    for instr in code {
        match instr {
            Instr::Block { body, .. } | Instr::Loop { body, .. } => {
                walk(module, num_locals, body, labels + 1)?;
            }
            Instr::If { then, els, .. } => {
                walk(module, num_locals, then, labels + 1)?;
                walk(module, num_locals, els, labels + 1)?;
            }
            Instr::Br(depth) | Instr::BrIf(depth) => {
                if *depth >= labels {
                    return Err(DecodeError::BranchDepthOutOfRange(*depth));
                }
            }
            Instr::BrTable { targets, default } => {
                for &depth in targets.iter().chain(std::iter::once(default)) {
                    if depth >= labels {
                        return Err(DecodeError::BranchDepthOutOfRange(depth));
                    }
                }
            }
            Instr::LocalGet(idx) | Instr::LocalSet(idx) | Instr::LocalTee(idx) => {
                if *idx >= num_locals {
                    return Err(DecodeError::LocalIndexOutOfRange(*idx));
                }
            }
            Instr::GlobalGet(idx) => {
                if *idx >= num_globals(module) {
                    return Err(DecodeError::GlobalIndexOutOfRange(*idx));
                }
            }
            Instr::GlobalSet(idx) => {
                match global_mutable(module, *idx) {
                    None => return Err(DecodeError::GlobalIndexOutOfRange(*idx)),
                    Some(false) => return Err(DecodeError::SetOfImmutableGlobal(*idx)),
                    Some(true) => {}
                }
            }
            Instr::Call(idx) => {
                if *idx as usize >= module.num_funcs() {
                    return Err(DecodeError::FuncIndexOutOfRange(*idx));
                }
            }
            Instr::CallIndirect { type_idx } => {
                if *type_idx >= module.types.len() as u32 {
                    return Err(DecodeError::TypeIndexOutOfRange(*type_idx));
                }
                if !module.has_table() {
                    return Err(DecodeError::MissingTable);
                }
            }
            Instr::I32Load(_)
            | Instr::I64Load(_)
            | Instr::F32Load(_)
            | Instr::F64Load(_)
            | Instr::I32Load8S(_)
            | Instr::I32Load8U(_)
            | Instr::I32Load16S(_)
            | Instr::I32Load16U(_)
            | Instr::I64Load8S(_)
            | Instr::I64Load8U(_)
            | Instr::I64Load16S(_)
            | Instr::I64Load16U(_)
            | Instr::I64Load32S(_)
            | Instr::I64Load32U(_) => {
                if !module.has_memory() {
                    return Err(DecodeError::MissingMemory { op: "load" });
                }
            }
            Instr::I32Store(_)
            | Instr::I64Store(_)
            | Instr::F32Store(_)
            | Instr::F64Store(_)
            | Instr::I32Store8(_)
            | Instr::I32Store16(_)
            | Instr::I64Store8(_)
            | Instr::I64Store16(_)
            | Instr::I64Store32(_) => {
                if !module.has_memory() {
                    return Err(DecodeError::MissingMemory { op: "store" });
                }
            }
            Instr::MemorySize => {
                if !module.has_memory() {
                    return Err(DecodeError::MissingMemory { op: "memory.size" });
                }
            }
            Instr::MemoryGrow => {
                if !module.has_memory() {
                    return Err(DecodeError::MissingMemory { op: "memory.grow" });
                }
            }
            _ => {}
        }
    }
    Ok(())
}

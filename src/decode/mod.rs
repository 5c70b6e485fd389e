//! Binary module decoding and structural validation
//!
//! The decoder reads `.wasm` bytes into a [`module::Module`]. Sections are
//! length-prefixed, must appear in ascending id order (custom sections may
//! appear anywhere), and every section must consume exactly its declared
//! size. Count fields are capped before allocation so hostile inputs cannot
//! claim unrealistic sizes.
//!
//! [`validate`] is the embedder-facing structural check: it never fails with
//! an error, it just answers whether the bytes decode and pass the
//! cross-section checks the validator applies.

pub mod instr;
pub mod module;
pub mod reader;
mod validate;

use crate::error::DecodeError;
use crate::values::ValueKind;
use module::{
    ConstExpr, DataSegment, ElemSegment, Export, ExportKind, FuncBody, FuncType, GlobalDecl,
    GlobalType, Import, ImportKind, Limits, Module,
};
use reader::Reader;

const WASM_MAGIC: u32 = 0x6D73_6100;
const WASM_VERSION: u32 = 1;

// Implementation limits, preventing allocation from hostile count fields.
const MAX_TYPES: u32 = 1_000_000;
const MAX_IMPORTS: u32 = 100_000;
const MAX_FUNCTIONS: u32 = 1_000_000;
const MAX_EXPORTS: u32 = 100_000;
const MAX_GLOBALS: u32 = 1_000_000;
const MAX_SEGMENTS: u32 = 100_000;
const MAX_PARAMS: u32 = 1_000;
const MAX_LOCALS: u32 = 50_000;
pub(crate) const MAX_BR_TABLE_TARGETS: u32 = 65_536;

/// Structural check of a binary module; true iff `decode` would succeed and
/// the decoded module passes validation. Never raises.
pub fn validate(bytes: &[u8]) -> bool {
    checked_decode(bytes).is_ok()
}

/// Decode plus cross-section validation, for the instantiation pipeline
pub(crate) fn checked_decode(bytes: &[u8]) -> Result<Module, DecodeError> {
    let module = decode(bytes)?;
    validate::check(&module)?;
    Ok(module)
}

/// Decode a binary module into its section contents
pub fn decode(bytes: &[u8]) -> Result<Module, DecodeError> {
    let mut reader = Reader::new(bytes);

    let magic = reader.read_u32()?;
    if magic != WASM_MAGIC {
        return Err(DecodeError::BadMagic(magic));
    }
    let version = reader.read_u32()?;
    if version != WASM_VERSION {
        return Err(DecodeError::BadVersion(version));
    }

    let mut module = Module::default();
    let mut last_section = 0u8;
    let mut data_count: Option<u32> = None;

    while !reader.is_empty() {
        let id = reader.read_byte()?;
        let size = reader.read_var_u32()? as usize;
        let payload = reader.read_bytes(size)?;
        let mut sec = Reader::new(payload);

        if id != 0 {
            if id > 12 {
                return Err(DecodeError::UnknownSection(id));
            }
            if section_order(id) <= section_order(last_section) {
                return Err(DecodeError::SectionOutOfOrder(id));
            }
            last_section = id;
        }

        match id {
            0 => {
                // Custom section: the name must be well-formed, the payload
                // is opaque and skipped.
                let name = sec.read_name()?;
                log::trace!("skipping custom section '{name}' ({size} bytes)");
                continue;
            }
            1 => decode_types(&mut sec, &mut module)?,
            2 => decode_imports(&mut sec, &mut module)?,
            3 => decode_functions(&mut sec, &mut module)?,
            4 => decode_tables(&mut sec, &mut module)?,
            5 => decode_memories(&mut sec, &mut module)?,
            6 => decode_globals(&mut sec, &mut module)?,
            7 => decode_exports(&mut sec, &mut module)?,
            8 => module.start = Some(sec.read_var_u32()?),
            9 => decode_elements(&mut sec, &mut module)?,
            10 => decode_code(&mut sec, &mut module)?,
            11 => decode_data(&mut sec, &mut module)?,
            12 => {
                // Data count: only meaningful for bulk-memory ops, which are
                // out of scope; the declared count is still cross-checked.
                let declared = sec.read_var_u32()?;
                data_count = Some(declared);
            }
            _ => unreachable!("section id checked above"),
        }

        if sec.remaining() != 0 {
            return Err(DecodeError::SectionSizeMismatch {
                declared: size,
                consumed: size - sec.remaining(),
            });
        }
    }

    if module.functions.len() != module.code.len() {
        return Err(DecodeError::FunctionCodeMismatch {
            functions: module.functions.len(),
            bodies: module.code.len(),
        });
    }
    if data_count.is_some_and(|count| count as usize != module.data.len()) {
        return Err(DecodeError::SectionSizeMismatch {
            declared: data_count.unwrap_or(0) as usize,
            consumed: module.data.len(),
        });
    }

    log::trace!(
        "decoded module: {} types, {} imports, {} functions, {} exports",
        module.types.len(),
        module.imports.len(),
        module.functions.len(),
        module.exports.len()
    );
    Ok(module)
}

/// Required position of a section in the binary; the data count section (12)
/// sits between the element (9) and code (10) sections
fn section_order(id: u8) -> u8 {
    match id {
        12 => 19,
        other => other * 2,
    }
}

fn check_count(kind: &'static str, count: u32, limit: u32) -> Result<(), DecodeError> {
    if count > limit {
        return Err(DecodeError::CountExceedsLimit { kind, count, limit });
    }
    Ok(())
}

fn decode_value_kinds(sec: &mut Reader, limit: u32, kind: &'static str) -> Result<Vec<ValueKind>, DecodeError> {
    let count = sec.read_var_u32()?;
    check_count(kind, count, limit)?;
    let mut kinds = Vec::with_capacity(count as usize);
    for _ in 0..count {
        let byte = sec.read_byte()?;
        kinds.push(ValueKind::decode(byte).ok_or(DecodeError::UnknownValueType(byte))?);
    }
    Ok(kinds)
}

fn decode_limits(sec: &mut Reader) -> Result<Limits, DecodeError> {
    let flag = sec.read_byte()?;
    let min = sec.read_var_u32()?;
    let max = match flag {
        0x00 => None,
        0x01 => Some(sec.read_var_u32()?),
        other => return Err(DecodeError::UnknownLimitsFlag(other)),
    };
    Ok(Limits { min, max })
}

fn decode_const_expr(sec: &mut Reader) -> Result<ConstExpr, DecodeError> {
    let expr = match sec.read_byte()? {
        0x41 => ConstExpr::I32(sec.read_var_s32()?),
        0x42 => ConstExpr::I64(sec.read_var_s64()?),
        0x43 => ConstExpr::F32(sec.read_f32()?),
        0x44 => ConstExpr::F64(sec.read_f64()?),
        _ => return Err(DecodeError::InvalidConstExpr),
    };
    if sec.read_byte()? != 0x0B {
        return Err(DecodeError::InvalidConstExpr);
    }
    Ok(expr)
}

fn decode_types(sec: &mut Reader, module: &mut Module) -> Result<(), DecodeError> {
    let count = sec.read_var_u32()?;
    check_count("type", count, MAX_TYPES)?;
    for _ in 0..count {
        let marker = sec.read_byte()?;
        if marker != 0x60 {
            return Err(DecodeError::InvalidFuncTypeMarker(marker));
        }
        let params = decode_value_kinds(sec, MAX_PARAMS, "parameter")?;
        let results = decode_value_kinds(sec, MAX_PARAMS, "result")?;
        module.types.push(FuncType { params, results });
    }
    Ok(())
}

fn decode_imports(sec: &mut Reader, module: &mut Module) -> Result<(), DecodeError> {
    let count = sec.read_var_u32()?;
    check_count("import", count, MAX_IMPORTS)?;
    for _ in 0..count {
        let namespace = sec.read_name()?;
        let name = sec.read_name()?;
        let kind = match sec.read_byte()? {
            0x00 => ImportKind::Function(sec.read_var_u32()?),
            0x01 => {
                let elem_type = sec.read_byte()?;
                if elem_type != 0x70 {
                    return Err(DecodeError::InvalidElemType(elem_type));
                }
                ImportKind::Table(decode_limits(sec)?)
            }
            0x02 => ImportKind::Memory(decode_limits(sec)?),
            0x03 => {
                let byte = sec.read_byte()?;
                let kind = ValueKind::decode(byte).ok_or(DecodeError::UnknownValueType(byte))?;
                let mutable = decode_mutability(sec)?;
                ImportKind::Global(GlobalType { kind, mutable })
            }
            other => return Err(DecodeError::UnknownImportKind(other)),
        };
        module.imports.push(Import { namespace, name, kind });
    }
    Ok(())
}

fn decode_mutability(sec: &mut Reader) -> Result<bool, DecodeError> {
    match sec.read_byte()? {
        0x00 => Ok(false),
        0x01 => Ok(true),
        other => Err(DecodeError::InvalidMutability(other)),
    }
}

fn decode_functions(sec: &mut Reader, module: &mut Module) -> Result<(), DecodeError> {
    let count = sec.read_var_u32()?;
    check_count("function", count, MAX_FUNCTIONS)?;
    for _ in 0..count {
        module.functions.push(sec.read_var_u32()?);
    }
    Ok(())
}

fn decode_tables(sec: &mut Reader, module: &mut Module) -> Result<(), DecodeError> {
    let count = sec.read_var_u32()?;
    if count > 1 {
        return Err(DecodeError::MultipleTables);
    }
    for _ in 0..count {
        let elem_type = sec.read_byte()?;
        if elem_type != 0x70 {
            return Err(DecodeError::InvalidElemType(elem_type));
        }
        module.tables.push(decode_limits(sec)?);
    }
    Ok(())
}

fn decode_memories(sec: &mut Reader, module: &mut Module) -> Result<(), DecodeError> {
    let count = sec.read_var_u32()?;
    if count > 1 {
        return Err(DecodeError::MultipleMemories);
    }
    for _ in 0..count {
        module.memories.push(decode_limits(sec)?);
    }
    Ok(())
}

fn decode_globals(sec: &mut Reader, module: &mut Module) -> Result<(), DecodeError> {
    let count = sec.read_var_u32()?;
    check_count("global", count, MAX_GLOBALS)?;
    for _ in 0..count {
        let byte = sec.read_byte()?;
        let kind = ValueKind::decode(byte).ok_or(DecodeError::UnknownValueType(byte))?;
        let mutable = decode_mutability(sec)?;
        let init = decode_const_expr(sec)?;
        module.globals.push(GlobalDecl {
            ty: GlobalType { kind, mutable },
            init,
        });
    }
    Ok(())
}

fn decode_exports(sec: &mut Reader, module: &mut Module) -> Result<(), DecodeError> {
    let count = sec.read_var_u32()?;
    check_count("export", count, MAX_EXPORTS)?;
    for _ in 0..count {
        let name = sec.read_name()?;
        let kind = match sec.read_byte()? {
            0x00 => ExportKind::Function,
            0x01 => ExportKind::Table,
            0x02 => ExportKind::Memory,
            0x03 => ExportKind::Global,
            other => return Err(DecodeError::UnknownExportKind(other)),
        };
        let index = sec.read_var_u32()?;
        module.exports.push(Export { name, kind, index });
    }
    Ok(())
}

fn decode_elements(sec: &mut Reader, module: &mut Module) -> Result<(), DecodeError> {
    let count = sec.read_var_u32()?;
    check_count("element segment", count, MAX_SEGMENTS)?;
    for _ in 0..count {
        let flags = sec.read_var_u32()?;
        if flags != 0 {
            return Err(DecodeError::UnsupportedSegmentFlag(flags));
        }
        let offset = decode_const_expr(sec)?;
        let func_count = sec.read_var_u32()?;
        check_count("element function", func_count, MAX_SEGMENTS)?;
        let mut funcs = Vec::with_capacity(func_count as usize);
        for _ in 0..func_count {
            funcs.push(sec.read_var_u32()?);
        }
        module.elements.push(ElemSegment {
            table: 0,
            offset,
            funcs,
        });
    }
    Ok(())
}

fn decode_code(sec: &mut Reader, module: &mut Module) -> Result<(), DecodeError> {
    let count = sec.read_var_u32()?;
    check_count("function body", count, MAX_FUNCTIONS)?;
    for _ in 0..count {
        let size = sec.read_var_u32()? as usize;
        let payload = sec.read_bytes(size)?;
        let mut body = Reader::new(payload);

        let group_count = body.read_var_u32()?;
        check_count("local group", group_count, MAX_LOCALS)?;
        let mut locals = Vec::new();
        for _ in 0..group_count {
            let repeat = body.read_var_u32()?;
            let byte = body.read_byte()?;
            let kind = ValueKind::decode(byte).ok_or(DecodeError::UnknownValueType(byte))?;
            let total = locals.len() as u64 + u64::from(repeat);
            if total > u64::from(MAX_LOCALS) {
                return Err(DecodeError::CountExceedsLimit {
                    kind: "local",
                    count: total.min(u64::from(u32::MAX)) as u32,
                    limit: MAX_LOCALS,
                });
            }
            locals.extend(std::iter::repeat(kind).take(repeat as usize));
        }

        let code = instr::decode_expr(&mut body)?;
        if body.remaining() != 0 {
            return Err(DecodeError::SectionSizeMismatch {
                declared: size,
                consumed: size - body.remaining(),
            });
        }
        module.code.push(FuncBody { locals, code });
    }
    Ok(())
}

fn decode_data(sec: &mut Reader, module: &mut Module) -> Result<(), DecodeError> {
    let count = sec.read_var_u32()?;
    check_count("data segment", count, MAX_SEGMENTS)?;
    for _ in 0..count {
        let flags = sec.read_var_u32()?;
        if flags != 0 {
            return Err(DecodeError::UnsupportedSegmentFlag(flags));
        }
        let offset = decode_const_expr(sec)?;
        let size = sec.read_var_u32()? as usize;
        let bytes = sec.read_bytes(size)?.to_vec();
        module.data.push(DataSegment {
            memory: 0,
            offset,
            bytes,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn wat(source: &str) -> Vec<u8> {
        wat::parse_str(source).unwrap()
    }

    #[test]
    fn test_decode_empty_module() {
        let module = decode(&wat("(module)")).unwrap();
        assert!(module.types.is_empty());
        assert!(module.functions.is_empty());
        assert!(module.start.is_none());
    }

    #[test]
    fn test_decode_bad_magic() {
        let err = decode(&[0x00, 0x61, 0x73, 0x6E, 0x01, 0x00, 0x00, 0x00]).unwrap_err();
        assert_eq!(err, DecodeError::BadMagic(0x6E736100));
    }

    #[test]
    fn test_decode_bad_version() {
        let err = decode(&[0x00, 0x61, 0x73, 0x6D, 0x02, 0x00, 0x00, 0x00]).unwrap_err();
        assert_eq!(err, DecodeError::BadVersion(2));
    }

    #[test]
    fn test_decode_truncated() {
        let err = decode(&[0x00, 0x61, 0x73, 0x6D]).unwrap_err();
        assert!(matches!(err, DecodeError::UnexpectedEof(_)));
    }

    #[test]
    fn test_decode_function_sections() {
        let module = decode(&wat(
            r#"(module
                (func (export "add") (param i32 i32) (result i32)
                    local.get 0
                    local.get 1
                    i32.add))"#,
        ))
        .unwrap();
        assert_eq!(module.types.len(), 1);
        assert_eq!(module.types[0].params.len(), 2);
        assert_eq!(module.functions, vec![0]);
        assert_eq!(module.code.len(), 1);
        assert_eq!(module.exports.len(), 1);
        assert_eq!(module.exports[0].name, "add");
        assert_eq!(module.exports[0].kind, ExportKind::Function);
    }

    #[test]
    fn test_decode_memory_and_data() {
        let module = decode(&wat(
            r#"(module
                (memory 1 2)
                (data (i32.const 8) "hi"))"#,
        ))
        .unwrap();
        assert_eq!(module.memories, vec![Limits { min: 1, max: Some(2) }]);
        assert_eq!(module.data.len(), 1);
        assert_eq!(module.data[0].offset, ConstExpr::I32(8));
        assert_eq!(module.data[0].bytes, b"hi");
    }

    #[test]
    fn test_decode_imports() {
        let module = decode(&wat(
            r#"(module
                (import "env" "log" (func (param i32)))
                (import "env" "mem" (memory 1)))"#,
        ))
        .unwrap();
        assert_eq!(module.imports.len(), 2);
        assert_eq!(module.imports[0].namespace, "env");
        assert_eq!(module.imports[0].name, "log");
        assert!(matches!(module.imports[0].kind, ImportKind::Function(0)));
        assert!(matches!(module.imports[1].kind, ImportKind::Memory(_)));
    }

    #[test]
    fn test_decode_globals_and_table() {
        let module = decode(&wat(
            r#"(module
                (global (mut i32) (i32.const 10))
                (global f64 (f64.const 2.5))
                (table 4 funcref)
                (func $f)
                (elem (i32.const 1) $f $f))"#,
        ))
        .unwrap();
        assert_eq!(module.globals.len(), 2);
        assert!(module.globals[0].ty.mutable);
        assert_eq!(module.globals[0].init, ConstExpr::I32(10));
        assert!(!module.globals[1].ty.mutable);
        assert_eq!(module.tables, vec![Limits { min: 4, max: None }]);
        assert_eq!(module.elements.len(), 1);
        assert_eq!(module.elements[0].funcs, vec![0, 0]);
    }

    #[test]
    fn test_decode_start_section() {
        let module = decode(&wat("(module (func $init) (start $init))")).unwrap();
        assert_eq!(module.start, Some(0));
    }

    #[test]
    fn test_validate_accepts_and_rejects() {
        assert!(validate(&wat("(module (func (result i32) i32.const 1))")));
        assert!(!validate(b"not a wasm module"));
        assert!(!validate(&[]));
    }
}

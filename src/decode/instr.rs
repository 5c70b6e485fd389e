//! Instruction decoding
//!
//! Function bodies are lowered at decode time into a structured form:
//! `Block`, `Loop` and `If` own their nested bodies, so the interpreter can
//! execute by recursion instead of scanning for matching `end` opcodes. The
//! numeric instruction space is grouped by operator family to keep the
//! dispatch surface small; each opcode still round-trips to exactly one
//! instruction value.
//!
//! Covered: the WebAssembly 1.0 (MVP) instruction set plus the sign-extension
//! operators. Prefixed opcode spaces (SIMD, bulk memory, saturating
//! truncation) decode to an `UnsupportedOpcode` error.

use crate::decode::reader::Reader;
use crate::error::DecodeError;
use crate::values::ValueKind;

/// Result arity marker for a block, loop or if
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockType {
    Empty,
    Value(ValueKind),
}

impl BlockType {
    pub(crate) fn arity(&self) -> usize {
        match self {
            BlockType::Empty => 0,
            BlockType::Value(_) => 1,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IntWidth {
    W32,
    W64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FloatWidth {
    W32,
    W64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IntCmp {
    Eq,
    Ne,
    LtS,
    LtU,
    GtS,
    GtU,
    LeS,
    LeU,
    GeS,
    GeU,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FloatCmp {
    Eq,
    Ne,
    Lt,
    Gt,
    Le,
    Ge,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IntUnary {
    Clz,
    Ctz,
    Popcnt,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IntBinary {
    Add,
    Sub,
    Mul,
    DivS,
    DivU,
    RemS,
    RemU,
    And,
    Or,
    Xor,
    Shl,
    ShrS,
    ShrU,
    Rotl,
    Rotr,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FloatUnary {
    Abs,
    Neg,
    Ceil,
    Floor,
    Trunc,
    Nearest,
    Sqrt,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FloatBinary {
    Add,
    Sub,
    Mul,
    Div,
    Min,
    Max,
    Copysign,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Conversion {
    I32WrapI64,
    I32TruncF32S,
    I32TruncF32U,
    I32TruncF64S,
    I32TruncF64U,
    I64ExtendI32S,
    I64ExtendI32U,
    I64TruncF32S,
    I64TruncF32U,
    I64TruncF64S,
    I64TruncF64U,
    F32ConvertI32S,
    F32ConvertI32U,
    F32ConvertI64S,
    F32ConvertI64U,
    F32DemoteF64,
    F64ConvertI32S,
    F64ConvertI32U,
    F64ConvertI64S,
    F64ConvertI64U,
    F64PromoteF32,
    I32ReinterpretF32,
    I64ReinterpretF64,
    F32ReinterpretI32,
    F64ReinterpretI64,
    I32Extend8S,
    I32Extend16S,
    I64Extend8S,
    I64Extend16S,
    I64Extend32S,
}

/// One structured instruction
#[derive(Debug, Clone, PartialEq)]
pub enum Instr {
    Unreachable,
    Nop,
    Block { ty: BlockType, body: Vec<Instr> },
    Loop { ty: BlockType, body: Vec<Instr> },
    If { ty: BlockType, then: Vec<Instr>, els: Vec<Instr> },
    Br(u32),
    BrIf(u32),
    BrTable { targets: Vec<u32>, default: u32 },
    Return,
    Call(u32),
    CallIndirect { type_idx: u32 },
    Drop,
    Select,
    LocalGet(u32),
    LocalSet(u32),
    LocalTee(u32),
    GlobalGet(u32),
    GlobalSet(u32),
    I32Load(u32),
    I64Load(u32),
    F32Load(u32),
    F64Load(u32),
    I32Load8S(u32),
    I32Load8U(u32),
    I32Load16S(u32),
    I32Load16U(u32),
    I64Load8S(u32),
    I64Load8U(u32),
    I64Load16S(u32),
    I64Load16U(u32),
    I64Load32S(u32),
    I64Load32U(u32),
    I32Store(u32),
    I64Store(u32),
    F32Store(u32),
    F64Store(u32),
    I32Store8(u32),
    I32Store16(u32),
    I64Store8(u32),
    I64Store16(u32),
    I64Store32(u32),
    MemorySize,
    MemoryGrow,
    I32Const(i32),
    I64Const(i64),
    F32Const(f32),
    F64Const(f64),
    ITest(IntWidth),
    ICmp(IntWidth, IntCmp),
    FCmp(FloatWidth, FloatCmp),
    IUnary(IntWidth, IntUnary),
    IBinary(IntWidth, IntBinary),
    FUnary(FloatWidth, FloatUnary),
    FBinary(FloatWidth, FloatBinary),
    Convert(Conversion),
}

/// How a nested instruction sequence ended
enum Terminator {
    End,
    Else,
}

/// Nesting ceiling for blocks within one function body
const MAX_BLOCK_NESTING: u32 = 1_024;

/// Decode a function body expression; must terminate with `end`
pub(crate) fn decode_expr(reader: &mut Reader) -> Result<Vec<Instr>, DecodeError> {
    let (body, terminator) = decode_block(reader, 0)?;
    match terminator {
        Terminator::End => Ok(body),
        Terminator::Else => Err(DecodeError::UnsupportedOpcode(0x05)),
    }
}

fn decode_block_type(reader: &mut Reader) -> Result<BlockType, DecodeError> {
    let byte = reader.read_byte()?;
    if byte == 0x40 {
        return Ok(BlockType::Empty);
    }
    match ValueKind::decode(byte) {
        Some(kind) => Ok(BlockType::Value(kind)),
        None => Err(DecodeError::UnsupportedBlockType(byte)),
    }
}

fn read_memarg(reader: &mut Reader) -> Result<u32, DecodeError> {
    let _align = reader.read_var_u32()?; // alignment is a hint only
    reader.read_var_u32()
}

fn decode_block(reader: &mut Reader, depth: u32) -> Result<(Vec<Instr>, Terminator), DecodeError> {
    use FloatWidth::{W32 as F32W, W64 as F64W};
    use IntWidth::{W32, W64};

    if depth > MAX_BLOCK_NESTING {
        return Err(DecodeError::CountExceedsLimit {
            kind: "block nesting",
            count: depth,
            limit: MAX_BLOCK_NESTING,
        });
    }

    let mut out = Vec::new();
    loop {
        let opcode = reader.read_byte()?;
        let instr = match opcode {
            0x0B => return Ok((out, Terminator::End)),
            0x05 => return Ok((out, Terminator::Else)),

            0x00 => Instr::Unreachable,
            0x01 => Instr::Nop,
            0x02 => {
                let ty = decode_block_type(reader)?;
                let (body, terminator) = decode_block(reader, depth + 1)?;
                match terminator {
                    Terminator::End => Instr::Block { ty, body },
                    Terminator::Else => return Err(DecodeError::UnsupportedOpcode(0x05)),
                }
            }
            0x03 => {
                let ty = decode_block_type(reader)?;
                let (body, terminator) = decode_block(reader, depth + 1)?;
                match terminator {
                    Terminator::End => Instr::Loop { ty, body },
                    Terminator::Else => return Err(DecodeError::UnsupportedOpcode(0x05)),
                }
            }
            0x04 => {
                let ty = decode_block_type(reader)?;
                let (then, terminator) = decode_block(reader, depth + 1)?;
                let els = match terminator {
                    Terminator::End => Vec::new(),
                    Terminator::Else => {
                        let (els, terminator) = decode_block(reader, depth + 1)?;
                        match terminator {
                            Terminator::End => els,
                            Terminator::Else => {
                                return Err(DecodeError::UnsupportedOpcode(0x05))
                            }
                        }
                    }
                };
                Instr::If { ty, then, els }
            }
            0x0C => Instr::Br(reader.read_var_u32()?),
            0x0D => Instr::BrIf(reader.read_var_u32()?),
            0x0E => {
                let count = reader.read_var_u32()?;
                if count > crate::decode::MAX_BR_TABLE_TARGETS {
                    return Err(DecodeError::CountExceedsLimit {
                        kind: "br_table target",
                        count,
                        limit: crate::decode::MAX_BR_TABLE_TARGETS,
                    });
                }
                let mut targets = Vec::with_capacity(count as usize);
                for _ in 0..count {
                    targets.push(reader.read_var_u32()?);
                }
                let default = reader.read_var_u32()?;
                Instr::BrTable { targets, default }
            }
            0x0F => Instr::Return,
            0x10 => Instr::Call(reader.read_var_u32()?),
            0x11 => {
                let type_idx = reader.read_var_u32()?;
                let table = reader.read_var_u32()?;
                if table != 0 {
                    return Err(DecodeError::TableIndexOutOfRange(table));
                }
                Instr::CallIndirect { type_idx }
            }

            0x1A => Instr::Drop,
            0x1B => Instr::Select,

            0x20 => Instr::LocalGet(reader.read_var_u32()?),
            0x21 => Instr::LocalSet(reader.read_var_u32()?),
            0x22 => Instr::LocalTee(reader.read_var_u32()?),
            0x23 => Instr::GlobalGet(reader.read_var_u32()?),
            0x24 => Instr::GlobalSet(reader.read_var_u32()?),

            0x28 => Instr::I32Load(read_memarg(reader)?),
            0x29 => Instr::I64Load(read_memarg(reader)?),
            0x2A => Instr::F32Load(read_memarg(reader)?),
            0x2B => Instr::F64Load(read_memarg(reader)?),
            0x2C => Instr::I32Load8S(read_memarg(reader)?),
            0x2D => Instr::I32Load8U(read_memarg(reader)?),
            0x2E => Instr::I32Load16S(read_memarg(reader)?),
            0x2F => Instr::I32Load16U(read_memarg(reader)?),
            0x30 => Instr::I64Load8S(read_memarg(reader)?),
            0x31 => Instr::I64Load8U(read_memarg(reader)?),
            0x32 => Instr::I64Load16S(read_memarg(reader)?),
            0x33 => Instr::I64Load16U(read_memarg(reader)?),
            0x34 => Instr::I64Load32S(read_memarg(reader)?),
            0x35 => Instr::I64Load32U(read_memarg(reader)?),
            0x36 => Instr::I32Store(read_memarg(reader)?),
            0x37 => Instr::I64Store(read_memarg(reader)?),
            0x38 => Instr::F32Store(read_memarg(reader)?),
            0x39 => Instr::F64Store(read_memarg(reader)?),
            0x3A => Instr::I32Store8(read_memarg(reader)?),
            0x3B => Instr::I32Store16(read_memarg(reader)?),
            0x3C => Instr::I64Store8(read_memarg(reader)?),
            0x3D => Instr::I64Store16(read_memarg(reader)?),
            0x3E => Instr::I64Store32(read_memarg(reader)?),
            0x3F => {
                reader.read_byte()?; // reserved memory index
                Instr::MemorySize
            }
            0x40 => {
                reader.read_byte()?;
                Instr::MemoryGrow
            }

            0x41 => Instr::I32Const(reader.read_var_s32()?),
            0x42 => Instr::I64Const(reader.read_var_s64()?),
            0x43 => Instr::F32Const(reader.read_f32()?),
            0x44 => Instr::F64Const(reader.read_f64()?),

            0x45 => Instr::ITest(W32),
            0x46 => Instr::ICmp(W32, IntCmp::Eq),
            0x47 => Instr::ICmp(W32, IntCmp::Ne),
            0x48 => Instr::ICmp(W32, IntCmp::LtS),
            0x49 => Instr::ICmp(W32, IntCmp::LtU),
            0x4A => Instr::ICmp(W32, IntCmp::GtS),
            0x4B => Instr::ICmp(W32, IntCmp::GtU),
            0x4C => Instr::ICmp(W32, IntCmp::LeS),
            0x4D => Instr::ICmp(W32, IntCmp::LeU),
            0x4E => Instr::ICmp(W32, IntCmp::GeS),
            0x4F => Instr::ICmp(W32, IntCmp::GeU),

            0x50 => Instr::ITest(W64),
            0x51 => Instr::ICmp(W64, IntCmp::Eq),
            0x52 => Instr::ICmp(W64, IntCmp::Ne),
            0x53 => Instr::ICmp(W64, IntCmp::LtS),
            0x54 => Instr::ICmp(W64, IntCmp::LtU),
            0x55 => Instr::ICmp(W64, IntCmp::GtS),
            0x56 => Instr::ICmp(W64, IntCmp::GtU),
            0x57 => Instr::ICmp(W64, IntCmp::LeS),
            0x58 => Instr::ICmp(W64, IntCmp::LeU),
            0x59 => Instr::ICmp(W64, IntCmp::GeS),
            0x5A => Instr::ICmp(W64, IntCmp::GeU),

            0x5B => Instr::FCmp(F32W, FloatCmp::Eq),
            0x5C => Instr::FCmp(F32W, FloatCmp::Ne),
            0x5D => Instr::FCmp(F32W, FloatCmp::Lt),
            0x5E => Instr::FCmp(F32W, FloatCmp::Gt),
            0x5F => Instr::FCmp(F32W, FloatCmp::Le),
            0x60 => Instr::FCmp(F32W, FloatCmp::Ge),
            0x61 => Instr::FCmp(F64W, FloatCmp::Eq),
            0x62 => Instr::FCmp(F64W, FloatCmp::Ne),
            0x63 => Instr::FCmp(F64W, FloatCmp::Lt),
            0x64 => Instr::FCmp(F64W, FloatCmp::Gt),
            0x65 => Instr::FCmp(F64W, FloatCmp::Le),
            0x66 => Instr::FCmp(F64W, FloatCmp::Ge),

            0x67 => Instr::IUnary(W32, IntUnary::Clz),
            0x68 => Instr::IUnary(W32, IntUnary::Ctz),
            0x69 => Instr::IUnary(W32, IntUnary::Popcnt),
            0x6A => Instr::IBinary(W32, IntBinary::Add),
            0x6B => Instr::IBinary(W32, IntBinary::Sub),
            0x6C => Instr::IBinary(W32, IntBinary::Mul),
            0x6D => Instr::IBinary(W32, IntBinary::DivS),
            0x6E => Instr::IBinary(W32, IntBinary::DivU),
            0x6F => Instr::IBinary(W32, IntBinary::RemS),
            0x70 => Instr::IBinary(W32, IntBinary::RemU),
            0x71 => Instr::IBinary(W32, IntBinary::And),
            0x72 => Instr::IBinary(W32, IntBinary::Or),
            0x73 => Instr::IBinary(W32, IntBinary::Xor),
            0x74 => Instr::IBinary(W32, IntBinary::Shl),
            0x75 => Instr::IBinary(W32, IntBinary::ShrS),
            0x76 => Instr::IBinary(W32, IntBinary::ShrU),
            0x77 => Instr::IBinary(W32, IntBinary::Rotl),
            0x78 => Instr::IBinary(W32, IntBinary::Rotr),

            0x79 => Instr::IUnary(W64, IntUnary::Clz),
            0x7A => Instr::IUnary(W64, IntUnary::Ctz),
            0x7B => Instr::IUnary(W64, IntUnary::Popcnt),
            0x7C => Instr::IBinary(W64, IntBinary::Add),
            0x7D => Instr::IBinary(W64, IntBinary::Sub),
            0x7E => Instr::IBinary(W64, IntBinary::Mul),
            0x7F => Instr::IBinary(W64, IntBinary::DivS),
            0x80 => Instr::IBinary(W64, IntBinary::DivU),
            0x81 => Instr::IBinary(W64, IntBinary::RemS),
            0x82 => Instr::IBinary(W64, IntBinary::RemU),
            0x83 => Instr::IBinary(W64, IntBinary::And),
            0x84 => Instr::IBinary(W64, IntBinary::Or),
            0x85 => Instr::IBinary(W64, IntBinary::Xor),
            0x86 => Instr::IBinary(W64, IntBinary::Shl),
            0x87 => Instr::IBinary(W64, IntBinary::ShrS),
            0x88 => Instr::IBinary(W64, IntBinary::ShrU),
            0x89 => Instr::IBinary(W64, IntBinary::Rotl),
            0x8A => Instr::IBinary(W64, IntBinary::Rotr),

            0x8B => Instr::FUnary(F32W, FloatUnary::Abs),
            0x8C => Instr::FUnary(F32W, FloatUnary::Neg),
            0x8D => Instr::FUnary(F32W, FloatUnary::Ceil),
            0x8E => Instr::FUnary(F32W, FloatUnary::Floor),
            0x8F => Instr::FUnary(F32W, FloatUnary::Trunc),
            0x90 => Instr::FUnary(F32W, FloatUnary::Nearest),
            0x91 => Instr::FUnary(F32W, FloatUnary::Sqrt),
            0x92 => Instr::FBinary(F32W, FloatBinary::Add),
            0x93 => Instr::FBinary(F32W, FloatBinary::Sub),
            0x94 => Instr::FBinary(F32W, FloatBinary::Mul),
            0x95 => Instr::FBinary(F32W, FloatBinary::Div),
            0x96 => Instr::FBinary(F32W, FloatBinary::Min),
            0x97 => Instr::FBinary(F32W, FloatBinary::Max),
            0x98 => Instr::FBinary(F32W, FloatBinary::Copysign),

            0x99 => Instr::FUnary(F64W, FloatUnary::Abs),
            0x9A => Instr::FUnary(F64W, FloatUnary::Neg),
            0x9B => Instr::FUnary(F64W, FloatUnary::Ceil),
            0x9C => Instr::FUnary(F64W, FloatUnary::Floor),
            0x9D => Instr::FUnary(F64W, FloatUnary::Trunc),
            0x9E => Instr::FUnary(F64W, FloatUnary::Nearest),
            0x9F => Instr::FUnary(F64W, FloatUnary::Sqrt),
            0xA0 => Instr::FBinary(F64W, FloatBinary::Add),
            0xA1 => Instr::FBinary(F64W, FloatBinary::Sub),
            0xA2 => Instr::FBinary(F64W, FloatBinary::Mul),
            0xA3 => Instr::FBinary(F64W, FloatBinary::Div),
            0xA4 => Instr::FBinary(F64W, FloatBinary::Min),
            0xA5 => Instr::FBinary(F64W, FloatBinary::Max),
            0xA6 => Instr::FBinary(F64W, FloatBinary::Copysign),

            0xA7 => Instr::Convert(Conversion::I32WrapI64),
            0xA8 => Instr::Convert(Conversion::I32TruncF32S),
            0xA9 => Instr::Convert(Conversion::I32TruncF32U),
            0xAA => Instr::Convert(Conversion::I32TruncF64S),
            0xAB => Instr::Convert(Conversion::I32TruncF64U),
            0xAC => Instr::Convert(Conversion::I64ExtendI32S),
            0xAD => Instr::Convert(Conversion::I64ExtendI32U),
            0xAE => Instr::Convert(Conversion::I64TruncF32S),
            0xAF => Instr::Convert(Conversion::I64TruncF32U),
            0xB0 => Instr::Convert(Conversion::I64TruncF64S),
            0xB1 => Instr::Convert(Conversion::I64TruncF64U),
            0xB2 => Instr::Convert(Conversion::F32ConvertI32S),
            0xB3 => Instr::Convert(Conversion::F32ConvertI32U),
            0xB4 => Instr::Convert(Conversion::F32ConvertI64S),
            0xB5 => Instr::Convert(Conversion::F32ConvertI64U),
            0xB6 => Instr::Convert(Conversion::F32DemoteF64),
            0xB7 => Instr::Convert(Conversion::F64ConvertI32S),
            0xB8 => Instr::Convert(Conversion::F64ConvertI32U),
            0xB9 => Instr::Convert(Conversion::F64ConvertI64S),
            0xBA => Instr::Convert(Conversion::F64ConvertI64U),
            0xBB => Instr::Convert(Conversion::F64PromoteF32),
            0xBC => Instr::Convert(Conversion::I32ReinterpretF32),
            0xBD => Instr::Convert(Conversion::I64ReinterpretF64),
            0xBE => Instr::Convert(Conversion::F32ReinterpretI32),
            0xBF => Instr::Convert(Conversion::F64ReinterpretI64),

            0xC0 => Instr::Convert(Conversion::I32Extend8S),
            0xC1 => Instr::Convert(Conversion::I32Extend16S),
            0xC2 => Instr::Convert(Conversion::I64Extend8S),
            0xC3 => Instr::Convert(Conversion::I64Extend16S),
            0xC4 => Instr::Convert(Conversion::I64Extend32S),

            other => return Err(DecodeError::UnsupportedOpcode(other)),
        };
        out.push(instr);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decode_bytes(bytes: &[u8]) -> Result<Vec<Instr>, DecodeError> {
        decode_expr(&mut Reader::new(bytes))
    }

    #[test]
    fn test_flat_sequence() {
        // local.get 0, local.get 1, i32.add, end
        let body = decode_bytes(&[0x20, 0x00, 0x20, 0x01, 0x6A, 0x0B]).unwrap();
        assert_eq!(
            body,
            vec![
                Instr::LocalGet(0),
                Instr::LocalGet(1),
                Instr::IBinary(IntWidth::W32, IntBinary::Add),
            ]
        );
    }

    #[test]
    fn test_nested_block() {
        // block (result i32) i32.const 7 end, end
        let body = decode_bytes(&[0x02, 0x7F, 0x41, 0x07, 0x0B, 0x0B]).unwrap();
        assert_eq!(
            body,
            vec![Instr::Block {
                ty: BlockType::Value(ValueKind::I32),
                body: vec![Instr::I32Const(7)],
            }]
        );
    }

    #[test]
    fn test_if_else() {
        // if (result i32) i32.const 1 else i32.const 2 end, end
        let body = decode_bytes(&[0x04, 0x7F, 0x41, 0x01, 0x05, 0x41, 0x02, 0x0B, 0x0B]).unwrap();
        assert_eq!(
            body,
            vec![Instr::If {
                ty: BlockType::Value(ValueKind::I32),
                then: vec![Instr::I32Const(1)],
                els: vec![Instr::I32Const(2)],
            }]
        );
    }

    #[test]
    fn test_if_without_else() {
        // if nop end, end
        let body = decode_bytes(&[0x04, 0x40, 0x01, 0x0B, 0x0B]).unwrap();
        assert_eq!(
            body,
            vec![Instr::If {
                ty: BlockType::Empty,
                then: vec![Instr::Nop],
                els: vec![],
            }]
        );
    }

    #[test]
    fn test_br_table() {
        // br_table 1 2 default 0, end
        let body = decode_bytes(&[0x0E, 0x02, 0x01, 0x02, 0x00, 0x0B]).unwrap();
        assert_eq!(
            body,
            vec![Instr::BrTable {
                targets: vec![1, 2],
                default: 0,
            }]
        );
    }

    #[test]
    fn test_memarg() {
        // i32.load align=2 offset=16, drop, end
        let body = decode_bytes(&[0x28, 0x02, 0x10, 0x1A, 0x0B]).unwrap();
        assert_eq!(body, vec![Instr::I32Load(16), Instr::Drop]);
    }

    #[test]
    fn test_unsupported_opcode() {
        // 0xFD is the SIMD prefix
        assert_eq!(
            decode_bytes(&[0xFD, 0x00, 0x0B]),
            Err(DecodeError::UnsupportedOpcode(0xFD))
        );
    }

    #[test]
    fn test_stray_else() {
        assert_eq!(
            decode_bytes(&[0x05, 0x0B]),
            Err(DecodeError::UnsupportedOpcode(0x05))
        );
    }

    #[test]
    fn test_missing_end() {
        assert!(matches!(
            decode_bytes(&[0x01]),
            Err(DecodeError::UnexpectedEof(_))
        ));
    }
}

//! The stack-machine interpreter
//!
//! Executes the structured bodies produced by the decoder. Each function
//! activation gets a frame holding its locals and operand stack; blocks are
//! executed by recursion, with branches signalled as [`Flow`] values that
//! unwind to the targeted nesting depth. All operand pops are kind-checked,
//! so even a module that slipped past structural validation can at worst
//! trap, never corrupt the host.
//!
//! Two host-enforced bounds apply to every call: a fixed call-depth ceiling,
//! and an optional per-call fuel budget that turns runaway guest code into a
//! deterministic trap.

use crate::decode::instr::{
    Conversion, FloatBinary, FloatCmp, FloatUnary, FloatWidth, Instr, IntBinary, IntCmp, IntUnary,
    IntWidth,
};
use crate::decode::module::Module;
use crate::error::Trap;
use crate::runtime::context::InstanceContext;
use crate::runtime::global::Global;
use crate::runtime::imports::HostFunction;
use crate::runtime::memory::Memory;
use crate::runtime::table::Table;
use crate::values::{Value, ValueKind};

/// Nested-call ceiling; exceeding it traps with `CallStackExhausted`
const MAX_CALL_DEPTH: usize = 512;

/// One in-flight execution over an instance's runtime objects
pub(crate) struct Vm<'a> {
    module: &'a Module,
    memories: &'a mut [Memory],
    tables: &'a mut [Table],
    globals: &'a mut [Global],
    host_funcs: &'a [HostFunction],
    fuel: Option<u64>,
    depth: usize,
}

/// How an instruction sequence ended
enum Flow {
    Next,
    /// Unwind to the branch target this many labels out
    Branch(u32),
    /// Unwind out of the current function
    Return,
}

struct Frame {
    locals: Vec<Value>,
    stack: Vec<Value>,
}

impl Frame {
    fn push(&mut self, value: Value) {
        self.stack.push(value);
    }

    fn pop(&mut self) -> Result<Value, Trap> {
        self.stack.pop().ok_or(Trap::StackUnderflow)
    }

    fn pop_kind(&mut self, kind: ValueKind) -> Result<Value, Trap> {
        let value = self.pop()?;
        if value.kind() != kind {
            return Err(Trap::TypeMismatch { expected: kind });
        }
        Ok(value)
    }

    fn pop_i32(&mut self) -> Result<i32, Trap> {
        match self.pop()? {
            Value::I32(v) => Ok(v),
            _ => Err(Trap::TypeMismatch {
                expected: ValueKind::I32,
            }),
        }
    }

    fn pop_i64(&mut self) -> Result<i64, Trap> {
        match self.pop()? {
            Value::I64(v) => Ok(v),
            _ => Err(Trap::TypeMismatch {
                expected: ValueKind::I64,
            }),
        }
    }

    fn pop_f32(&mut self) -> Result<f32, Trap> {
        match self.pop()? {
            Value::F32(v) => Ok(v),
            _ => Err(Trap::TypeMismatch {
                expected: ValueKind::F32,
            }),
        }
    }

    fn pop_f64(&mut self) -> Result<f64, Trap> {
        match self.pop()? {
            Value::F64(v) => Ok(v),
            _ => Err(Trap::TypeMismatch {
                expected: ValueKind::F64,
            }),
        }
    }

    fn local(&self, idx: u32) -> Result<Value, Trap> {
        self.locals
            .get(idx as usize)
            .copied()
            .ok_or(Trap::LocalOutOfBounds(idx))
    }

    fn set_local(&mut self, idx: u32, value: Value) -> Result<(), Trap> {
        let slot = self
            .locals
            .get_mut(idx as usize)
            .ok_or(Trap::LocalOutOfBounds(idx))?;
        *slot = value;
        Ok(())
    }
}

impl<'a> Vm<'a> {
    pub(crate) fn new(
        module: &'a Module,
        memories: &'a mut [Memory],
        tables: &'a mut [Table],
        globals: &'a mut [Global],
        host_funcs: &'a [HostFunction],
        fuel: Option<u64>,
    ) -> Vm<'a> {
        Vm {
            module,
            memories,
            tables,
            globals,
            host_funcs,
            fuel,
            depth: 0,
        }
    }

    /// Invoke a function by its index in the instance's function index space.
    /// `args` must already match the function's parameter kinds.
    pub(crate) fn invoke(&mut self, func_idx: u32, args: Vec<Value>) -> Result<Vec<Value>, Trap> {
        if self.depth >= MAX_CALL_DEPTH {
            return Err(Trap::CallStackExhausted);
        }

        let imported = self.host_funcs.len();
        if (func_idx as usize) < imported {
            return self.invoke_host(func_idx, args);
        }

        let module = self.module;
        let local_idx = func_idx as usize - imported;
        let body = module
            .code
            .get(local_idx)
            .ok_or(Trap::FunctionOutOfBounds(func_idx))?;
        let ty = module
            .func_type(func_idx)
            .ok_or(Trap::FunctionOutOfBounds(func_idx))?;

        let mut locals = args;
        locals.reserve(body.locals.len());
        for &kind in &body.locals {
            locals.push(Value::default_for(kind));
        }
        let mut frame = Frame {
            locals,
            stack: Vec::new(),
        };

        self.depth += 1;
        let flow = self.exec_seq(&body.code, &mut frame);
        self.depth -= 1;

        match flow? {
            Flow::Next | Flow::Return | Flow::Branch(0) => {}
            // A deeper branch target cannot exist; validation bounds depths
            Flow::Branch(_) => return Err(Trap::StackUnderflow),
        }

        let mut results = Vec::with_capacity(ty.results.len());
        for &kind in ty.results.iter().rev() {
            results.push(frame.pop_kind(kind)?);
        }
        results.reverse();
        Ok(results)
    }

    fn invoke_host(&mut self, func_idx: u32, args: Vec<Value>) -> Result<Vec<Value>, Trap> {
        let host_funcs = self.host_funcs;
        let host = &host_funcs[func_idx as usize];
        self.depth += 1;
        let result = {
            let mut ctx = InstanceContext::new(self.memories, self.tables, self.globals);
            host.call(&mut ctx, &args)
        };
        self.depth -= 1;
        let results = result?;

        // The boundary is type-checked in both directions: a host function
        // that returns something other than its declared results traps.
        let declared = &host.ty().results;
        if results.len() != declared.len()
            || results.iter().zip(declared).any(|(v, &k)| v.kind() != k)
        {
            return Err(Trap::HostSignatureMismatch);
        }
        Ok(results)
    }

    fn exec_seq(&mut self, code: &[Instr], frame: &mut Frame) -> Result<Flow, Trap> {
        for instr in code {
            match self.exec(instr, frame)? {
                Flow::Next => {}
                other => return Ok(other),
            }
        }
        Ok(Flow::Next)
    }

    /// Run a block body: settle the operand stack on normal exit, re-enter
    /// on branches to a loop label, unwind otherwise.
    fn run_block(
        &mut self,
        body: &[Instr],
        arity: usize,
        is_loop: bool,
        frame: &mut Frame,
    ) -> Result<Flow, Trap> {
        let base = frame.stack.len();
        loop {
            match self.exec_seq(body, frame)? {
                Flow::Next => {
                    settle(frame, base, arity)?;
                    return Ok(Flow::Next);
                }
                Flow::Branch(0) => {
                    if is_loop {
                        // Loop labels have no parameters; discard and repeat
                        frame.stack.truncate(base);
                        continue;
                    }
                    settle(frame, base, arity)?;
                    return Ok(Flow::Next);
                }
                Flow::Branch(depth) => return Ok(Flow::Branch(depth - 1)),
                Flow::Return => return Ok(Flow::Return),
            }
        }
    }

    fn mem(&self) -> Result<&Memory, Trap> {
        self.memories.first().ok_or(Trap::MemoryOutOfBounds)
    }

    fn mem_mut(&mut self) -> Result<&mut Memory, Trap> {
        self.memories.first_mut().ok_or(Trap::MemoryOutOfBounds)
    }

    /// Effective address of a memory access: a 33-bit sum, so base+offset
    /// cannot wrap around the 32-bit address space
    fn ea(frame: &mut Frame, offset: u32) -> Result<u64, Trap> {
        let base = frame.pop_i32()? as u32;
        Ok(u64::from(base) + u64::from(offset))
    }

    fn exec(&mut self, instr: &Instr, frame: &mut Frame) -> Result<Flow, Trap> {
        if let Some(fuel) = &mut self.fuel {
            if *fuel == 0 {
                return Err(Trap::OutOfFuel);
            }
            *fuel -= 1;
        }

        match instr {
            Instr::Unreachable => return Err(Trap::Unreachable),
            Instr::Nop => {}

            Instr::Block { ty, body } => return self.run_block(body, ty.arity(), false, frame),
            Instr::Loop { ty, body } => return self.run_block(body, ty.arity(), true, frame),
            Instr::If { ty, then, els } => {
                let cond = frame.pop_i32()?;
                let body = if cond != 0 { then } else { els };
                return self.run_block(body, ty.arity(), false, frame);
            }
            Instr::Br(depth) => return Ok(Flow::Branch(*depth)),
            Instr::BrIf(depth) => {
                if frame.pop_i32()? != 0 {
                    return Ok(Flow::Branch(*depth));
                }
            }
            Instr::BrTable { targets, default } => {
                let index = frame.pop_i32()? as u32 as usize;
                let depth = targets.get(index).copied().unwrap_or(*default);
                return Ok(Flow::Branch(depth));
            }
            Instr::Return => return Ok(Flow::Return),
            Instr::Call(func_idx) => self.call_function(*func_idx, frame)?,
            Instr::CallIndirect { type_idx } => {
                let elem = frame.pop_i32()? as u32;
                let table = self.tables.first().ok_or(Trap::UndefinedElement(elem))?;
                let func_ref = table
                    .lookup(elem)?
                    .ok_or(Trap::UninitializedElement(elem))?;
                let func_idx = func_ref.index();

                let module = self.module;
                let expected = module
                    .types
                    .get(*type_idx as usize)
                    .ok_or(Trap::IndirectCallTypeMismatch)?;
                let actual = module
                    .func_type(func_idx)
                    .ok_or(Trap::FunctionOutOfBounds(func_idx))?;
                if actual != expected {
                    return Err(Trap::IndirectCallTypeMismatch);
                }
                self.call_function(func_idx, frame)?;
            }

            Instr::Drop => {
                frame.pop()?;
            }
            Instr::Select => {
                let cond = frame.pop_i32()?;
                let b = frame.pop()?;
                let a = frame.pop()?;
                frame.push(if cond != 0 { a } else { b });
            }

            Instr::LocalGet(idx) => {
                let value = frame.local(*idx)?;
                frame.push(value);
            }
            Instr::LocalSet(idx) => {
                let value = frame.pop()?;
                frame.set_local(*idx, value)?;
            }
            Instr::LocalTee(idx) => {
                let value = frame.pop()?;
                frame.push(value);
                frame.set_local(*idx, value)?;
            }
            Instr::GlobalGet(idx) => {
                let global = self
                    .globals
                    .get(*idx as usize)
                    .ok_or(Trap::GlobalOutOfBounds(*idx))?;
                frame.push(global.get());
            }
            Instr::GlobalSet(idx) => {
                let value = frame.pop()?;
                self.globals
                    .get_mut(*idx as usize)
                    .ok_or(Trap::GlobalOutOfBounds(*idx))?
                    .store(value)?;
            }

            Instr::I32Load(offset) => {
                let addr = Self::ea(frame, *offset)?;
                let v = self.mem()?.read_u32(addr)? as i32;
                frame.push(Value::I32(v));
            }
            Instr::I64Load(offset) => {
                let addr = Self::ea(frame, *offset)?;
                let v = self.mem()?.read_u64(addr)? as i64;
                frame.push(Value::I64(v));
            }
            Instr::F32Load(offset) => {
                let addr = Self::ea(frame, *offset)?;
                let v = self.mem()?.read_f32(addr)?;
                frame.push(Value::F32(v));
            }
            Instr::F64Load(offset) => {
                let addr = Self::ea(frame, *offset)?;
                let v = self.mem()?.read_f64(addr)?;
                frame.push(Value::F64(v));
            }
            Instr::I32Load8S(offset) => {
                let addr = Self::ea(frame, *offset)?;
                let v = self.mem()?.read_u8(addr)? as i8 as i32;
                frame.push(Value::I32(v));
            }
            Instr::I32Load8U(offset) => {
                let addr = Self::ea(frame, *offset)?;
                let v = self.mem()?.read_u8(addr)? as i32;
                frame.push(Value::I32(v));
            }
            Instr::I32Load16S(offset) => {
                let addr = Self::ea(frame, *offset)?;
                let v = self.mem()?.read_u16(addr)? as i16 as i32;
                frame.push(Value::I32(v));
            }
            Instr::I32Load16U(offset) => {
                let addr = Self::ea(frame, *offset)?;
                let v = self.mem()?.read_u16(addr)? as i32;
                frame.push(Value::I32(v));
            }
            Instr::I64Load8S(offset) => {
                let addr = Self::ea(frame, *offset)?;
                let v = self.mem()?.read_u8(addr)? as i8 as i64;
                frame.push(Value::I64(v));
            }
            Instr::I64Load8U(offset) => {
                let addr = Self::ea(frame, *offset)?;
                let v = self.mem()?.read_u8(addr)? as i64;
                frame.push(Value::I64(v));
            }
            Instr::I64Load16S(offset) => {
                let addr = Self::ea(frame, *offset)?;
                let v = self.mem()?.read_u16(addr)? as i16 as i64;
                frame.push(Value::I64(v));
            }
            Instr::I64Load16U(offset) => {
                let addr = Self::ea(frame, *offset)?;
                let v = self.mem()?.read_u16(addr)? as i64;
                frame.push(Value::I64(v));
            }
            Instr::I64Load32S(offset) => {
                let addr = Self::ea(frame, *offset)?;
                let v = self.mem()?.read_u32(addr)? as i32 as i64;
                frame.push(Value::I64(v));
            }
            Instr::I64Load32U(offset) => {
                let addr = Self::ea(frame, *offset)?;
                let v = self.mem()?.read_u32(addr)? as i64;
                frame.push(Value::I64(v));
            }

            Instr::I32Store(offset) => {
                let v = frame.pop_i32()?;
                let addr = Self::ea(frame, *offset)?;
                self.mem_mut()?.write_u32(addr, v as u32)?;
            }
            Instr::I64Store(offset) => {
                let v = frame.pop_i64()?;
                let addr = Self::ea(frame, *offset)?;
                self.mem_mut()?.write_u64(addr, v as u64)?;
            }
            Instr::F32Store(offset) => {
                let v = frame.pop_f32()?;
                let addr = Self::ea(frame, *offset)?;
                self.mem_mut()?.write_f32(addr, v)?;
            }
            Instr::F64Store(offset) => {
                let v = frame.pop_f64()?;
                let addr = Self::ea(frame, *offset)?;
                self.mem_mut()?.write_f64(addr, v)?;
            }
            Instr::I32Store8(offset) => {
                let v = frame.pop_i32()?;
                let addr = Self::ea(frame, *offset)?;
                self.mem_mut()?.write_u8(addr, v as u8)?;
            }
            Instr::I32Store16(offset) => {
                let v = frame.pop_i32()?;
                let addr = Self::ea(frame, *offset)?;
                self.mem_mut()?.write_u16(addr, v as u16)?;
            }
            Instr::I64Store8(offset) => {
                let v = frame.pop_i64()?;
                let addr = Self::ea(frame, *offset)?;
                self.mem_mut()?.write_u8(addr, v as u8)?;
            }
            Instr::I64Store16(offset) => {
                let v = frame.pop_i64()?;
                let addr = Self::ea(frame, *offset)?;
                self.mem_mut()?.write_u16(addr, v as u16)?;
            }
            Instr::I64Store32(offset) => {
                let v = frame.pop_i64()?;
                let addr = Self::ea(frame, *offset)?;
                self.mem_mut()?.write_u32(addr, v as u32)?;
            }

            Instr::MemorySize => {
                let pages = self.mem()?.size();
                frame.push(Value::I32(pages as i32));
            }
            Instr::MemoryGrow => {
                let delta = frame.pop_i32()? as u32;
                // In-guest growth failure is not an error, it is the -1 result
                let result = match self.mem_mut()?.expand(delta) {
                    Ok(previous) => previous as i32,
                    Err(_) => -1,
                };
                frame.push(Value::I32(result));
            }

            Instr::I32Const(v) => frame.push(Value::I32(*v)),
            Instr::I64Const(v) => frame.push(Value::I64(*v)),
            Instr::F32Const(v) => frame.push(Value::F32(*v)),
            Instr::F64Const(v) => frame.push(Value::F64(*v)),

            Instr::ITest(IntWidth::W32) => {
                let v = frame.pop_i32()?;
                frame.push(Value::I32((v == 0) as i32));
            }
            Instr::ITest(IntWidth::W64) => {
                let v = frame.pop_i64()?;
                frame.push(Value::I32((v == 0) as i32));
            }
            Instr::ICmp(IntWidth::W32, op) => {
                let b = frame.pop_i32()?;
                let a = frame.pop_i32()?;
                frame.push(Value::I32(icmp32(a, b, *op) as i32));
            }
            Instr::ICmp(IntWidth::W64, op) => {
                let b = frame.pop_i64()?;
                let a = frame.pop_i64()?;
                frame.push(Value::I32(icmp64(a, b, *op) as i32));
            }
            Instr::FCmp(width, op) => {
                let result = match width {
                    FloatWidth::W32 => {
                        let b = frame.pop_f32()?;
                        let a = frame.pop_f32()?;
                        fcmp(f64::from(a), f64::from(b), *op)
                    }
                    FloatWidth::W64 => {
                        let b = frame.pop_f64()?;
                        let a = frame.pop_f64()?;
                        fcmp(a, b, *op)
                    }
                };
                frame.push(Value::I32(result as i32));
            }
            Instr::IUnary(IntWidth::W32, op) => {
                let v = frame.pop_i32()?;
                let r = match op {
                    IntUnary::Clz => v.leading_zeros() as i32,
                    IntUnary::Ctz => v.trailing_zeros() as i32,
                    IntUnary::Popcnt => v.count_ones() as i32,
                };
                frame.push(Value::I32(r));
            }
            Instr::IUnary(IntWidth::W64, op) => {
                let v = frame.pop_i64()?;
                let r = match op {
                    IntUnary::Clz => v.leading_zeros() as i64,
                    IntUnary::Ctz => v.trailing_zeros() as i64,
                    IntUnary::Popcnt => v.count_ones() as i64,
                };
                frame.push(Value::I64(r));
            }
            Instr::IBinary(IntWidth::W32, op) => {
                let b = frame.pop_i32()?;
                let a = frame.pop_i32()?;
                frame.push(Value::I32(ibin32(a, b, *op)?));
            }
            Instr::IBinary(IntWidth::W64, op) => {
                let b = frame.pop_i64()?;
                let a = frame.pop_i64()?;
                frame.push(Value::I64(ibin64(a, b, *op)?));
            }
            Instr::FUnary(FloatWidth::W32, op) => {
                let v = frame.pop_f32()?;
                frame.push(Value::F32(funary32(v, *op)));
            }
            Instr::FUnary(FloatWidth::W64, op) => {
                let v = frame.pop_f64()?;
                frame.push(Value::F64(funary64(v, *op)));
            }
            Instr::FBinary(FloatWidth::W32, op) => {
                let b = frame.pop_f32()?;
                let a = frame.pop_f32()?;
                frame.push(Value::F32(fbin32(a, b, *op)));
            }
            Instr::FBinary(FloatWidth::W64, op) => {
                let b = frame.pop_f64()?;
                let a = frame.pop_f64()?;
                frame.push(Value::F64(fbin64(a, b, *op)));
            }
            Instr::Convert(conv) => {
                let result = convert(frame, *conv)?;
                frame.push(result);
            }
        }
        Ok(Flow::Next)
    }

    /// Pop arguments per the callee's signature and invoke it
    fn call_function(&mut self, func_idx: u32, frame: &mut Frame) -> Result<(), Trap> {
        let module = self.module;
        let ty = module
            .func_type(func_idx)
            .ok_or(Trap::FunctionOutOfBounds(func_idx))?;

        let mut args = Vec::with_capacity(ty.params.len());
        for &kind in ty.params.iter().rev() {
            args.push(frame.pop_kind(kind)?);
        }
        args.reverse();

        let results = self.invoke(func_idx, args)?;
        frame.stack.extend(results);
        Ok(())
    }
}

/// Keep the top `arity` values, dropping everything above `base` below them
fn settle(frame: &mut Frame, base: usize, arity: usize) -> Result<(), Trap> {
    let len = frame.stack.len();
    if len < base + arity {
        return Err(Trap::StackUnderflow);
    }
    frame.stack.drain(base..len - arity);
    Ok(())
}

fn icmp32(a: i32, b: i32, op: IntCmp) -> bool {
    match op {
        IntCmp::Eq => a == b,
        IntCmp::Ne => a != b,
        IntCmp::LtS => a < b,
        IntCmp::LtU => (a as u32) < (b as u32),
        IntCmp::GtS => a > b,
        IntCmp::GtU => (a as u32) > (b as u32),
        IntCmp::LeS => a <= b,
        IntCmp::LeU => (a as u32) <= (b as u32),
        IntCmp::GeS => a >= b,
        IntCmp::GeU => (a as u32) >= (b as u32),
    }
}

fn icmp64(a: i64, b: i64, op: IntCmp) -> bool {
    match op {
        IntCmp::Eq => a == b,
        IntCmp::Ne => a != b,
        IntCmp::LtS => a < b,
        IntCmp::LtU => (a as u64) < (b as u64),
        IntCmp::GtS => a > b,
        IntCmp::GtU => (a as u64) > (b as u64),
        IntCmp::LeS => a <= b,
        IntCmp::LeU => (a as u64) <= (b as u64),
        IntCmp::GeS => a >= b,
        IntCmp::GeU => (a as u64) >= (b as u64),
    }
}

fn fcmp(a: f64, b: f64, op: FloatCmp) -> bool {
    match op {
        FloatCmp::Eq => a == b,
        FloatCmp::Ne => a != b,
        FloatCmp::Lt => a < b,
        FloatCmp::Gt => a > b,
        FloatCmp::Le => a <= b,
        FloatCmp::Ge => a >= b,
    }
}

fn ibin32(a: i32, b: i32, op: IntBinary) -> Result<i32, Trap> {
    Ok(match op {
        IntBinary::Add => a.wrapping_add(b),
        IntBinary::Sub => a.wrapping_sub(b),
        IntBinary::Mul => a.wrapping_mul(b),
        IntBinary::DivS => {
            if b == 0 {
                return Err(Trap::DivisionByZero);
            }
            a.checked_div(b).ok_or(Trap::IntegerOverflow)?
        }
        IntBinary::DivU => {
            if b == 0 {
                return Err(Trap::DivisionByZero);
            }
            ((a as u32) / (b as u32)) as i32
        }
        IntBinary::RemS => {
            if b == 0 {
                return Err(Trap::DivisionByZero);
            }
            a.wrapping_rem(b)
        }
        IntBinary::RemU => {
            if b == 0 {
                return Err(Trap::DivisionByZero);
            }
            ((a as u32) % (b as u32)) as i32
        }
        IntBinary::And => a & b,
        IntBinary::Or => a | b,
        IntBinary::Xor => a ^ b,
        IntBinary::Shl => a.wrapping_shl(b as u32),
        IntBinary::ShrS => a.wrapping_shr(b as u32),
        IntBinary::ShrU => ((a as u32).wrapping_shr(b as u32)) as i32,
        IntBinary::Rotl => a.rotate_left((b as u32) % 32),
        IntBinary::Rotr => a.rotate_right((b as u32) % 32),
    })
}

fn ibin64(a: i64, b: i64, op: IntBinary) -> Result<i64, Trap> {
    Ok(match op {
        IntBinary::Add => a.wrapping_add(b),
        IntBinary::Sub => a.wrapping_sub(b),
        IntBinary::Mul => a.wrapping_mul(b),
        IntBinary::DivS => {
            if b == 0 {
                return Err(Trap::DivisionByZero);
            }
            a.checked_div(b).ok_or(Trap::IntegerOverflow)?
        }
        IntBinary::DivU => {
            if b == 0 {
                return Err(Trap::DivisionByZero);
            }
            ((a as u64) / (b as u64)) as i64
        }
        IntBinary::RemS => {
            if b == 0 {
                return Err(Trap::DivisionByZero);
            }
            a.wrapping_rem(b)
        }
        IntBinary::RemU => {
            if b == 0 {
                return Err(Trap::DivisionByZero);
            }
            ((a as u64) % (b as u64)) as i64
        }
        IntBinary::And => a & b,
        IntBinary::Or => a | b,
        IntBinary::Xor => a ^ b,
        IntBinary::Shl => a.wrapping_shl(b as u32),
        IntBinary::ShrS => a.wrapping_shr(b as u32),
        IntBinary::ShrU => ((a as u64).wrapping_shr(b as u32)) as i64,
        IntBinary::Rotl => a.rotate_left((b as u32) % 64),
        IntBinary::Rotr => a.rotate_right((b as u32) % 64),
    })
}

fn funary32(v: f32, op: FloatUnary) -> f32 {
    match op {
        FloatUnary::Abs => v.abs(),
        FloatUnary::Neg => -v,
        FloatUnary::Ceil => v.ceil(),
        FloatUnary::Floor => v.floor(),
        FloatUnary::Trunc => v.trunc(),
        FloatUnary::Nearest => nearest32(v),
        FloatUnary::Sqrt => v.sqrt(),
    }
}

fn funary64(v: f64, op: FloatUnary) -> f64 {
    match op {
        FloatUnary::Abs => v.abs(),
        FloatUnary::Neg => -v,
        FloatUnary::Ceil => v.ceil(),
        FloatUnary::Floor => v.floor(),
        FloatUnary::Trunc => v.trunc(),
        FloatUnary::Nearest => nearest64(v),
        FloatUnary::Sqrt => v.sqrt(),
    }
}

/// Round half to even, the wasm `nearest` semantics
fn nearest32(v: f32) -> f32 {
    let rounded = v.round();
    if (v - v.trunc()).abs() == 0.5 && rounded % 2.0 != 0.0 {
        // round() went away from zero on a tie; pull back to the even side,
        // keeping the sign for the -0.5 case
        (rounded - v.signum()).copysign(v)
    } else {
        rounded
    }
}

fn nearest64(v: f64) -> f64 {
    let rounded = v.round();
    if (v - v.trunc()).abs() == 0.5 && rounded % 2.0 != 0.0 {
        (rounded - v.signum()).copysign(v)
    } else {
        rounded
    }
}

fn fbin32(a: f32, b: f32, op: FloatBinary) -> f32 {
    match op {
        FloatBinary::Add => a + b,
        FloatBinary::Sub => a - b,
        FloatBinary::Mul => a * b,
        FloatBinary::Div => a / b,
        FloatBinary::Min => {
            if a.is_nan() || b.is_nan() {
                f32::NAN
            } else if a == b {
                // min(+0, -0) is -0; bitwise or keeps the sign bit
                f32::from_bits(a.to_bits() | b.to_bits())
            } else if a < b {
                a
            } else {
                b
            }
        }
        FloatBinary::Max => {
            if a.is_nan() || b.is_nan() {
                f32::NAN
            } else if a == b {
                f32::from_bits(a.to_bits() & b.to_bits())
            } else if a > b {
                a
            } else {
                b
            }
        }
        FloatBinary::Copysign => a.copysign(b),
    }
}

fn fbin64(a: f64, b: f64, op: FloatBinary) -> f64 {
    match op {
        FloatBinary::Add => a + b,
        FloatBinary::Sub => a - b,
        FloatBinary::Mul => a * b,
        FloatBinary::Div => a / b,
        FloatBinary::Min => {
            if a.is_nan() || b.is_nan() {
                f64::NAN
            } else if a == b {
                f64::from_bits(a.to_bits() | b.to_bits())
            } else if a < b {
                a
            } else {
                b
            }
        }
        FloatBinary::Max => {
            if a.is_nan() || b.is_nan() {
                f64::NAN
            } else if a == b {
                f64::from_bits(a.to_bits() & b.to_bits())
            } else if a > b {
                a
            } else {
                b
            }
        }
        FloatBinary::Copysign => a.copysign(b),
    }
}

fn trunc_to_i32_s(t: f64) -> Result<i32, Trap> {
    if t.is_nan() {
        return Err(Trap::InvalidConversion);
    }
    let t = t.trunc();
    if t >= 2147483648.0 || t < -2147483648.0 {
        return Err(Trap::IntegerOverflow);
    }
    Ok(t as i32)
}

fn trunc_to_i32_u(t: f64) -> Result<i32, Trap> {
    if t.is_nan() {
        return Err(Trap::InvalidConversion);
    }
    let t = t.trunc();
    if t >= 4294967296.0 || t <= -1.0 {
        return Err(Trap::IntegerOverflow);
    }
    Ok(t as u32 as i32)
}

fn trunc_to_i64_s(t: f64) -> Result<i64, Trap> {
    if t.is_nan() {
        return Err(Trap::InvalidConversion);
    }
    let t = t.trunc();
    if t >= 9223372036854775808.0 || t < -9223372036854775808.0 {
        return Err(Trap::IntegerOverflow);
    }
    Ok(t as i64)
}

fn trunc_to_i64_u(t: f64) -> Result<i64, Trap> {
    if t.is_nan() {
        return Err(Trap::InvalidConversion);
    }
    let t = t.trunc();
    if t >= 18446744073709551616.0 || t <= -1.0 {
        return Err(Trap::IntegerOverflow);
    }
    Ok(t as u64 as i64)
}

fn convert(frame: &mut Frame, conv: Conversion) -> Result<Value, Trap> {
    Ok(match conv {
        Conversion::I32WrapI64 => Value::I32(frame.pop_i64()? as i32),
        Conversion::I32TruncF32S => Value::I32(trunc_to_i32_s(frame.pop_f32()? as f64)?),
        Conversion::I32TruncF32U => Value::I32(trunc_to_i32_u(frame.pop_f32()? as f64)?),
        Conversion::I32TruncF64S => Value::I32(trunc_to_i32_s(frame.pop_f64()?)?),
        Conversion::I32TruncF64U => Value::I32(trunc_to_i32_u(frame.pop_f64()?)?),
        Conversion::I64ExtendI32S => Value::I64(i64::from(frame.pop_i32()?)),
        Conversion::I64ExtendI32U => Value::I64(i64::from(frame.pop_i32()? as u32)),
        Conversion::I64TruncF32S => Value::I64(trunc_to_i64_s(frame.pop_f32()? as f64)?),
        Conversion::I64TruncF32U => Value::I64(trunc_to_i64_u(frame.pop_f32()? as f64)?),
        Conversion::I64TruncF64S => Value::I64(trunc_to_i64_s(frame.pop_f64()?)?),
        Conversion::I64TruncF64U => Value::I64(trunc_to_i64_u(frame.pop_f64()?)?),
        Conversion::F32ConvertI32S => Value::F32(frame.pop_i32()? as f32),
        Conversion::F32ConvertI32U => Value::F32(frame.pop_i32()? as u32 as f32),
        Conversion::F32ConvertI64S => Value::F32(frame.pop_i64()? as f32),
        Conversion::F32ConvertI64U => Value::F32(frame.pop_i64()? as u64 as f32),
        Conversion::F32DemoteF64 => Value::F32(frame.pop_f64()? as f32),
        Conversion::F64ConvertI32S => Value::F64(f64::from(frame.pop_i32()?)),
        Conversion::F64ConvertI32U => Value::F64(f64::from(frame.pop_i32()? as u32)),
        Conversion::F64ConvertI64S => Value::F64(frame.pop_i64()? as f64),
        Conversion::F64ConvertI64U => Value::F64(frame.pop_i64()? as u64 as f64),
        Conversion::F64PromoteF32 => Value::F64(f64::from(frame.pop_f32()?)),
        Conversion::I32ReinterpretF32 => Value::I32(frame.pop_f32()?.to_bits() as i32),
        Conversion::I64ReinterpretF64 => Value::I64(frame.pop_f64()?.to_bits() as i64),
        Conversion::F32ReinterpretI32 => Value::F32(f32::from_bits(frame.pop_i32()? as u32)),
        Conversion::F64ReinterpretI64 => Value::F64(f64::from_bits(frame.pop_i64()? as u64)),
        Conversion::I32Extend8S => Value::I32(frame.pop_i32()? as i8 as i32),
        Conversion::I32Extend16S => Value::I32(frame.pop_i32()? as i16 as i32),
        Conversion::I64Extend8S => Value::I64(frame.pop_i64()? as i8 as i64),
        Conversion::I64Extend16S => Value::I64(frame.pop_i64()? as i16 as i64),
        Conversion::I64Extend32S => Value::I64(frame.pop_i64()? as i32 as i64),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_division_semantics() {
        assert_eq!(ibin32(7, 2, IntBinary::DivS).unwrap(), 3);
        assert_eq!(ibin32(-7, 2, IntBinary::DivS).unwrap(), -3);
        assert_eq!(ibin32(7, 0, IntBinary::DivS), Err(Trap::DivisionByZero));
        assert_eq!(
            ibin32(i32::MIN, -1, IntBinary::DivS),
            Err(Trap::IntegerOverflow)
        );
        // MIN % -1 is 0, not an overflow
        assert_eq!(ibin32(i32::MIN, -1, IntBinary::RemS).unwrap(), 0);
        // Unsigned division reinterprets the bits
        assert_eq!(ibin32(-1, 2, IntBinary::DivU).unwrap(), 0x7FFFFFFF);
    }

    #[test]
    fn test_shift_masking() {
        // Shift counts are taken modulo the width
        assert_eq!(ibin32(1, 33, IntBinary::Shl).unwrap(), 2);
        assert_eq!(ibin64(1, 65, IntBinary::Shl).unwrap(), 2);
        assert_eq!(ibin32(-8, 1, IntBinary::ShrS).unwrap(), -4);
        assert_eq!(ibin32(-8, 1, IntBinary::ShrU).unwrap(), 0x7FFFFFFC);
    }

    #[test]
    fn test_rotates() {
        assert_eq!(ibin32(0x40000000, 1, IntBinary::Rotl).unwrap(), i32::MIN);
        assert_eq!(ibin32(1, 1, IntBinary::Rotr).unwrap(), i32::MIN);
        assert_eq!(ibin32(0x12345678, 32, IntBinary::Rotl).unwrap(), 0x12345678);
    }

    #[test]
    fn test_float_min_max_semantics() {
        assert!(fbin32(f32::NAN, 1.0, FloatBinary::Min).is_nan());
        assert!(fbin32(1.0, f32::NAN, FloatBinary::Max).is_nan());
        // min(+0, -0) is -0 and max(+0, -0) is +0
        assert!(fbin32(0.0, -0.0, FloatBinary::Min).is_sign_negative());
        assert!(fbin32(0.0, -0.0, FloatBinary::Max).is_sign_positive());
        assert_eq!(fbin64(1.0, 2.0, FloatBinary::Min), 1.0);
        assert_eq!(fbin64(1.0, 2.0, FloatBinary::Max), 2.0);
    }

    #[test]
    fn test_nearest_ties_to_even() {
        assert_eq!(nearest32(2.5), 2.0);
        assert_eq!(nearest32(3.5), 4.0);
        assert_eq!(nearest32(-2.5), -2.0);
        assert_eq!(nearest64(0.5), 0.0);
        assert_eq!(nearest64(1.5), 2.0);
        assert_eq!(nearest64(2.4), 2.0);
    }

    #[test]
    fn test_trunc_bounds() {
        assert_eq!(trunc_to_i32_s(42.9).unwrap(), 42);
        assert_eq!(trunc_to_i32_s(-42.9).unwrap(), -42);
        assert_eq!(trunc_to_i32_s(-2147483648.0).unwrap(), i32::MIN);
        assert_eq!(trunc_to_i32_s(2147483648.0), Err(Trap::IntegerOverflow));
        assert_eq!(trunc_to_i32_s(f64::NAN), Err(Trap::InvalidConversion));

        assert_eq!(trunc_to_i32_u(4294967295.0).unwrap(), -1);
        assert_eq!(trunc_to_i32_u(-0.5).unwrap(), 0);
        assert_eq!(trunc_to_i32_u(-1.0), Err(Trap::IntegerOverflow));

        assert_eq!(trunc_to_i64_s(-9223372036854775808.0).unwrap(), i64::MIN);
        assert_eq!(
            trunc_to_i64_s(9223372036854775808.0),
            Err(Trap::IntegerOverflow)
        );
        assert_eq!(trunc_to_i64_u(18446744073709551616.0), Err(Trap::IntegerOverflow));
    }

    #[test]
    fn test_unsigned_comparisons() {
        assert!(icmp32(-1, 1, IntCmp::GtU)); // 0xFFFFFFFF > 1 unsigned
        assert!(!icmp32(-1, 1, IntCmp::GtS));
        assert!(icmp64(-1, 1, IntCmp::GeU));
        assert!(icmp64(1, -1, IntCmp::LtU));
    }

    #[test]
    fn test_settle_keeps_results() {
        let mut frame = Frame {
            locals: vec![],
            stack: vec![Value::I32(1), Value::I32(2), Value::I32(3)],
        };
        // Block entered at height 1, produces one result: 3 survives, 2 is dropped
        settle(&mut frame, 1, 1).unwrap();
        assert_eq!(frame.stack, vec![Value::I32(1), Value::I32(3)]);
    }
}

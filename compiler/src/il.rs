//! CIL instruction definitions and method-body encoding.
//!
//! This module defines the typed instruction stream the code generator
//! emits and its byte-level encoding. Call targets stay symbolic
//! ([`Callee`]) until assembly, when the metadata builder has assigned the
//! member-reference tokens; [`CalleeTokens`] carries the mapping.
//!
//! Method bodies use the two ECMA-335 framings: the one-byte tiny header
//! for short bodies without locals, and the 12-byte fat header (aligned to
//! 4) when a local-variable signature or larger stack is involved.

// ── Opcodes ─────────────────────────────────────────────────────────

const LDARG_0: u8 = 0x02;
const LDLOC_0: u8 = 0x06;
const STLOC_0: u8 = 0x0A;
const LDC_I4_M1: u8 = 0x15;
const LDC_I4_0: u8 = 0x16;
const LDC_I4_S: u8 = 0x1F;
const LDC_I4: u8 = 0x20;
const CALL: u8 = 0x28;
const RET: u8 = 0x2A;
const ADD: u8 = 0x58;
const SUB: u8 = 0x59;
const MUL: u8 = 0x5A;
const DIV: u8 = 0x5B;
const REM: u8 = 0x5D;
const CONV_I4: u8 = 0x69;
const CONV_R8: u8 = 0x6C;

/// External members a generated stream may call. Resolved to metadata
/// tokens by the image assembler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Callee {
    /// `instance void System.Object::.ctor()`
    ObjectCtor,
    /// `void System.Console::WriteLine(int32)`
    WriteLineInt32,
    /// `float64 System.Math::Pow(float64, float64)`
    MathPow,
}

/// Metadata tokens for the [`Callee`] set, assigned during assembly.
#[derive(Debug, Clone, Copy)]
pub struct CalleeTokens {
    pub object_ctor: u32,
    pub write_line_int32: u32,
    pub math_pow: u32,
}

impl CalleeTokens {
    fn token(&self, callee: Callee) -> u32 {
        match callee {
            Callee::ObjectCtor => self.object_ctor,
            Callee::WriteLineInt32 => self.write_line_int32,
            Callee::MathPow => self.math_pow,
        }
    }
}

/// One stack-machine instruction. Appended into an ordered stream by the
/// code generator and never mutated after emission.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Instruction {
    LdcI4(i32),
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    ConvR8,
    ConvI4,
    Ldarg0,
    Ldloc0,
    Stloc0,
    Call(Callee),
    Ret,
}

impl Instruction {
    /// Net effect on the evaluation stack depth.
    pub fn stack_delta(self) -> i32 {
        match self {
            Instruction::LdcI4(_) | Instruction::Ldarg0 | Instruction::Ldloc0 => 1,
            Instruction::Add
            | Instruction::Sub
            | Instruction::Mul
            | Instruction::Div
            | Instruction::Rem
            | Instruction::Stloc0 => -1,
            Instruction::ConvR8 | Instruction::ConvI4 | Instruction::Ret => 0,
            // Pow pops two args and pushes the result; the void calls pop
            // their single argument (or `this` for the ctor).
            Instruction::Call(Callee::MathPow) => -1,
            Instruction::Call(Callee::WriteLineInt32) | Instruction::Call(Callee::ObjectCtor) => -1,
        }
    }

    pub fn encode(self, buf: &mut Vec<u8>, tokens: &CalleeTokens) {
        match self {
            Instruction::LdcI4(value) => encode_ldc_i4(buf, value),
            Instruction::Add => buf.push(ADD),
            Instruction::Sub => buf.push(SUB),
            Instruction::Mul => buf.push(MUL),
            Instruction::Div => buf.push(DIV),
            Instruction::Rem => buf.push(REM),
            Instruction::ConvR8 => buf.push(CONV_R8),
            Instruction::ConvI4 => buf.push(CONV_I4),
            Instruction::Ldarg0 => buf.push(LDARG_0),
            Instruction::Ldloc0 => buf.push(LDLOC_0),
            Instruction::Stloc0 => buf.push(STLOC_0),
            Instruction::Call(callee) => {
                buf.push(CALL);
                buf.extend_from_slice(&tokens.token(callee).to_le_bytes());
            }
            Instruction::Ret => buf.push(RET),
        }
    }
}

/// Shortest `ldc.i4` form for the constant.
fn encode_ldc_i4(buf: &mut Vec<u8>, value: i32) {
    match value {
        -1 => buf.push(LDC_I4_M1),
        0..=8 => buf.push(LDC_I4_0 + value as u8),
        -128..=127 => {
            buf.push(LDC_I4_S);
            buf.push(value as i8 as u8);
        }
        _ => {
            buf.push(LDC_I4);
            buf.extend_from_slice(&value.to_le_bytes());
        }
    }
}

/// Encode a full instruction stream into IL bytes.
pub fn encode_stream(instructions: &[Instruction], tokens: &CalleeTokens) -> Vec<u8> {
    let mut buf = Vec::new();
    for instruction in instructions {
        instruction.encode(&mut buf, tokens);
    }
    buf
}

// ── Method body framing ─────────────────────────────────────────────

const TINY_FORMAT: u8 = 0x02;
const FAT_FORMAT: u16 = 0x03;
const FAT_INIT_LOCALS: u16 = 0x10;
const FAT_HEADER_DWORDS: u16 = 3;

/// Accumulates encoded method bodies into the image's IL stream. Each
/// `add_*` call returns the body's byte offset within the stream, which
/// becomes the method's RVA once the stream's base RVA is known.
pub struct MethodBodyStream {
    buf: Vec<u8>,
}

impl MethodBodyStream {
    pub fn new() -> Self {
        Self { buf: Vec::new() }
    }

    /// Tiny format: single header byte, code under 64 bytes, no locals,
    /// max stack of 8 or less.
    pub fn add_tiny_body(&mut self, code: &[u8]) -> u32 {
        assert!(code.len() < 64, "tiny method body must be under 64 bytes");
        let offset = self.buf.len() as u32;
        self.buf.push(((code.len() as u8) << 2) | TINY_FORMAT);
        self.buf.extend_from_slice(code);
        offset
    }

    /// Fat format: 12-byte header aligned to 4, with a local-variable
    /// signature token and an explicit max stack.
    pub fn add_fat_body(&mut self, code: &[u8], max_stack: u16, local_sig_token: u32) -> u32 {
        while self.buf.len() % 4 != 0 {
            self.buf.push(0);
        }
        let offset = self.buf.len() as u32;
        let flags = (FAT_HEADER_DWORDS << 12) | FAT_INIT_LOCALS | FAT_FORMAT;
        self.buf.extend_from_slice(&flags.to_le_bytes());
        self.buf.extend_from_slice(&max_stack.to_le_bytes());
        self.buf.extend_from_slice(&(code.len() as u32).to_le_bytes());
        self.buf.extend_from_slice(&local_sig_token.to_le_bytes());
        self.buf.extend_from_slice(code);
        offset
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.buf
    }
}

impl Default for MethodBodyStream {
    fn default() -> Self {
        Self::new()
    }
}

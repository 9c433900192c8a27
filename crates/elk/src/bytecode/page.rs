//! Pages: the immutable bytecode artefact of one callable.

use std::hash::{Hash, Hasher};

use crate::{expressions::CodeRange, intern::StringId, value::Value};

use super::op::Op;

/// The compiled code of one callable (top-level script, user function, or
/// closure body): an ordered byte stream, its constant pool, and debug
/// identity. Immutable after [`PageBuilder::build`](super::PageBuilder).
#[derive(Debug)]
pub struct Page {
    name: StringId,
    code: Vec<u8>,
    consts: Vec<Value>,
    num_locals: u16,
    max_stack: u16,
    /// Instruction offset → source range, ascending by offset.
    positions: Vec<(u32, CodeRange)>,
    hash: u64,
}

impl Page {
    pub(super) fn new(
        name: StringId,
        code: Vec<u8>,
        consts: Vec<Value>,
        num_locals: u16,
        max_stack: u16,
        positions: Vec<(u32, CodeRange)>,
    ) -> Self {
        let mut hasher = ahash::AHasher::default();
        code.hash(&mut hasher);
        let hash = hasher.finish();
        Self {
            name,
            code,
            consts,
            num_locals,
            max_stack,
            positions,
            hash,
        }
    }

    #[must_use]
    pub fn name(&self) -> StringId {
        self.name
    }

    #[must_use]
    pub fn code(&self) -> &[u8] {
        &self.code
    }

    #[must_use]
    pub fn constant(&self, index: u16) -> &Value {
        &self.consts[index as usize]
    }

    #[must_use]
    pub fn num_locals(&self) -> u16 {
        self.num_locals
    }

    #[must_use]
    pub fn max_stack(&self) -> u16 {
        self.max_stack
    }

    /// Debug identity of the byte stream.
    #[must_use]
    pub fn hash(&self) -> u64 {
        self.hash
    }

    /// Source range of the instruction containing `offset`, when recorded.
    #[must_use]
    pub fn position_at(&self, offset: usize) -> Option<CodeRange> {
        let offset = u32::try_from(offset).ok()?;
        match self.positions.binary_search_by_key(&offset, |&(at, _)| at) {
            Ok(index) => Some(self.positions[index].1),
            Err(0) => None,
            Err(index) => Some(self.positions[index - 1].1),
        }
    }

    /// Renders the byte stream one instruction per line, for tests and
    /// debugging.
    #[must_use]
    pub fn disassemble(&self) -> String {
        use std::fmt::Write;

        let mut out = String::new();
        let mut ip = 0;
        while ip < self.code.len() {
            let Ok(op) = Op::try_from(self.code[ip]) else {
                let _ = writeln!(out, "{ip:04} <bad opcode {:#04x}>", self.code[ip]);
                break;
            };
            let width = op.operands().width();
            let _ = write!(out, "{ip:04} {op}");
            for byte in &self.code[ip + 1..ip + 1 + width] {
                let _ = write!(out, " {byte}");
            }
            out.push('\n');
            ip += 1 + width;
        }
        out
    }
}

//! The closed opcode enumeration.
//!
//! Every opcode is one byte; operands follow little-endian. The operand
//! layout metadata drives disassembly and the builder's accounting; the VM
//! hardcodes its fetches per dispatch arm.

use strum::{Display, IntoStaticStr};

/// Operand layout of an opcode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operands {
    None,
    U8,
    U16,
    U32,
    /// Relative jump offset.
    I16,
    U8U8,
    U16U8,
    U16U8U8,
}

impl Operands {
    /// Total operand bytes following the opcode.
    #[must_use]
    pub fn width(self) -> usize {
        match self {
            Self::None => 0,
            Self::U8 => 1,
            Self::U16 | Self::I16 | Self::U8U8 => 2,
            Self::U16U8 => 3,
            Self::U32 | Self::U16U8U8 => 4,
        }
    }
}

/// Bytecode instruction opcodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, IntoStaticStr)]
#[repr(u8)]
pub enum Op {
    // --- stack manipulation ---
    Nop,
    Pop,
    /// Pops the operand's count of values.
    PopArgs,
    /// Pops an iterable and pushes its elements; the operand is the
    /// expected element count (wrong lengths are a runtime error).
    Unpack,
    /// Trims the stack to a block watermark: pops the top value, discards
    /// the operand's count of values beneath it, pushes the value back.
    ExitBlock,

    // --- locals and captured variables ---
    /// Pushes the local at slot (u16) in the current frame.
    Load,
    /// Pops into the local at slot (u16).
    Store,
    /// Pushes capture slot (u16) of the executing closure's frame.
    LoadUpper,
    /// Pops into capture slot (u16) of the executing closure's frame.
    StoreUpper,
    /// Pushes the shell/environment variable named by constant (u16).
    LoadShellVar,

    // --- constants ---
    /// Pushes constant-pool entry (u16).
    Const,

    // --- calls ---
    /// Calls user function (u16) with argc (u8); result kept as a value.
    Call,
    /// As `Call`, but the frame executes in root context.
    RootCall,
    /// As `Call`; the frame inherits the caller's root context.
    MaybeRootCall,
    /// Calls standard function (u16) with argc (u8).
    CallStd,
    /// Spawns program named by constant (u16), argc (u8), flags (u8 bit0 =
    /// piped value below the arguments); pushes a pipe value.
    CallProgram,
    /// As `CallProgram`, but blocking in root context: stdout inherits and
    /// the exit code is the pushed result.
    RootCallProgram,
    /// As `CallProgram`, choosing blocking or redirected execution from the
    /// caller's root context at run time.
    MaybeRootCallProgram,
    /// Executes built-in (u8: cd/exec/scriptPath/error) with argc (u8).
    CallBuiltIn,
    /// Packs argc (u8) values into an argument list, leaving
    /// `[callee, args]` for `DynamicCall`.
    ResolveArgumentsDynamically,
    /// Pops `[callee, args]` and dispatches on the callee's target; the
    /// operand (u8) selects value/root/maybe-root result context.
    DynamicCall,
    /// Pops argc (u8) values into the reference below them as bound
    /// arguments, leaving the reference.
    PushArgsToRef,
    /// Pops a closure into the reference below it, leaving the reference.
    PushClosureToRef,
    /// Packages page (u16) with capture-count (u8) popped values into a
    /// closure value.
    BuildClosure,

    // --- structural builders ---
    BuildTuple,
    /// Builds a list from count (u8) values.
    BuildList,
    /// Builds a list from count (u32) values; emitted above 255 elements.
    BuildListBig,
    BuildSet,
    /// Builds a dict from count (u8) key/value pairs.
    BuildDict,
    /// Pops end and start, pushes a range.
    BuildRange,
    /// Concatenates count (u8) parts into a string.
    BuildString,
    /// Instantiates user struct (u16) from argc (u8) field values.
    New,
    /// Instantiates standard-library struct (u16) from argc (u8) values.
    NewStd,
    /// Pushes the struct type constant for struct (u16).
    StructConst,
    /// Pops a pattern string, pushes the list of filesystem matches (or the
    /// pattern itself as a single-element list when nothing matches).
    Glob,

    // --- field and index access ---
    /// Pushes field named by constant (u16) of the popped object.
    LoadField,
    /// Pops value then object; stores into field named by constant (u16).
    StoreField,
    /// Pops index then object, pushes the element.
    LoadIndex,
    /// Pops value, index, object; stores the element.
    StoreIndex,

    // --- arithmetic and logic ---
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Negate,
    Not,
    Equal,
    NotEqual,
    Greater,
    GreaterEqual,
    Less,
    LessEqual,
    And,
    Or,
    Contains,

    // --- control flow ---
    /// Unconditional forward jump (relative i16).
    Jump,
    /// Backward jump: the operand (u16) is the distance back from the
    /// position after this instruction.
    JumpBackward,
    /// Jumps if the top of stack is truthy, without popping.
    JumpIf,
    /// Jumps if the top of stack is falsy, without popping.
    JumpIfNot,
    /// Pops; jumps if the value was truthy.
    PopJumpIf,
    /// Pops; jumps if the value was falsy.
    PopJumpIfNot,
    /// Returns from the current frame with the top of stack.
    Ret,

    // --- iteration ---
    /// Pops a value, converts it to an iterator.
    GetIter,
    /// Advances the innermost iterator: pushes the next value, or jumps
    /// forward (i16) past the loop on exhaustion.
    ForIter,
    /// Tears down the innermost iterator.
    EndFor,
}

impl Op {
    /// Operand layout for this opcode.
    #[must_use]
    pub fn operands(self) -> Operands {
        match self {
            Self::Nop
            | Self::Pop
            | Self::BuildRange
            | Self::PushClosureToRef
            | Self::LoadIndex
            | Self::StoreIndex
            | Self::Add
            | Self::Sub
            | Self::Mul
            | Self::Div
            | Self::Mod
            | Self::Negate
            | Self::Not
            | Self::Equal
            | Self::NotEqual
            | Self::Greater
            | Self::GreaterEqual
            | Self::Less
            | Self::LessEqual
            | Self::And
            | Self::Or
            | Self::Contains
            | Self::Ret
            | Self::GetIter
            | Self::EndFor
            | Self::Glob => Operands::None,
            Self::PopArgs
            | Self::Unpack
            | Self::ExitBlock
            | Self::ResolveArgumentsDynamically
            | Self::DynamicCall
            | Self::PushArgsToRef
            | Self::BuildTuple
            | Self::BuildList
            | Self::BuildSet
            | Self::BuildDict
            | Self::BuildString => Operands::U8,
            Self::Load
            | Self::Store
            | Self::LoadUpper
            | Self::StoreUpper
            | Self::LoadShellVar
            | Self::Const
            | Self::StructConst
            | Self::LoadField
            | Self::StoreField
            | Self::JumpBackward => Operands::U16,
            Self::BuildListBig => Operands::U32,
            Self::Jump | Self::JumpIf | Self::JumpIfNot | Self::PopJumpIf | Self::PopJumpIfNot | Self::ForIter => {
                Operands::I16
            }
            Self::CallBuiltIn => Operands::U8U8,
            Self::Call
            | Self::RootCall
            | Self::MaybeRootCall
            | Self::CallStd
            | Self::New
            | Self::NewStd
            | Self::BuildClosure => Operands::U16U8,
            Self::CallProgram | Self::RootCallProgram | Self::MaybeRootCallProgram => Operands::U16U8U8,
        }
    }

    /// Fixed stack effect, for opcodes whose effect does not depend on an
    /// operand. `None` means the emitter must account for it explicitly.
    #[must_use]
    pub fn stack_effect(self) -> Option<i16> {
        match self {
            Self::Nop
            | Self::Jump
            | Self::JumpBackward
            | Self::JumpIf
            | Self::JumpIfNot
            | Self::Negate
            | Self::Not
            | Self::Glob
            | Self::LoadField
            | Self::EndFor
            | Self::StructConst => Some(0),
            Self::Load | Self::LoadUpper | Self::LoadShellVar | Self::Const => Some(1),
            Self::Pop
            | Self::Store
            | Self::StoreUpper
            | Self::PopJumpIf
            | Self::PopJumpIfNot
            | Self::Ret
            | Self::GetIter
            | Self::BuildRange
            | Self::LoadIndex
            | Self::PushClosureToRef
            | Self::Add
            | Self::Sub
            | Self::Mul
            | Self::Div
            | Self::Mod
            | Self::Equal
            | Self::NotEqual
            | Self::Greater
            | Self::GreaterEqual
            | Self::Less
            | Self::LessEqual
            | Self::And
            | Self::Or
            | Self::Contains => Some(-1),
            Self::StoreField => Some(-2),
            Self::StoreIndex => Some(-3),
            Self::ForIter => Some(1),
            _ => None,
        }
    }
}

/// Decodes an opcode byte.
///
/// The VM trusts pages it generated itself; this conversion exists for
/// disassembly and for the builder's debug assertions.
impl TryFrom<u8> for Op {
    type Error = u8;

    fn try_from(byte: u8) -> Result<Self, u8> {
        if byte <= Self::EndFor as u8 {
            // SAFETY: Op is repr(u8) with contiguous discriminants from 0
            // through EndFor, and the byte was just range-checked.
            Ok(unsafe { std::mem::transmute::<u8, Self>(byte) })
        } else {
            Err(byte)
        }
    }
}

//! Device instruction set support
//!
//! This crate owns everything that understands the GPU's instruction
//! encoding:
//!
//! - [`opcode`]: the opcode classification table (single source of truth)
//! - [`instr`]: the decoded instruction and operand model
//! - [`decode`]: total, validating decoder over raw kernel code
//! - [`encode`]: assembler used by the materializer and by tests
//!
//! The decoded [`Instr`] implements [`cfg::FlowInstruction`], so CFGs are
//! built directly over decoder output.

pub mod decode;
pub mod encode;
pub mod instr;
pub mod opcode;

pub use decode::{decode_function, decode_word, DecodeError};
pub use encode::{patch_direct_target, Assembler};
pub use instr::{
    Instr, Operand, OperandKind, Predicate, SpecialReg, MAX_OPERANDS, PT, RZ, WORD_BYTES,
};
pub use opcode::{Compare, MemorySpace, OpClass, OpcodeInfo, OPCODE_TABLE};

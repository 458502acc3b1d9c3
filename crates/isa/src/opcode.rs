//! Opcode classification
//!
//! Single source of truth for the device opcode set. The decoder, the CFG
//! layer and the materializer all classify instructions through this table.

use std::collections::HashMap;

use lazy_static::lazy_static;

/// Memory-operation classification of an opcode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemorySpace {
    /// Not a memory operation
    None,
    /// Per-thread local memory
    Local,
    /// Generic address space
    Generic,
    /// Device global memory
    Global,
    /// Per-block shared memory
    Shared,
    /// Read-only constant banks
    Constant,
}

impl std::fmt::Display for MemorySpace {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            MemorySpace::None => "none",
            MemorySpace::Local => "local",
            MemorySpace::Generic => "generic",
            MemorySpace::Global => "global",
            MemorySpace::Shared => "shared",
            MemorySpace::Constant => "constant",
        };
        write!(f, "{s}")
    }
}

/// Operand shape class of an opcode, used by the decoder to validate that
/// every operand claims a kind compatible with the opcode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpClass {
    /// No operands (`nop`, `bar`)
    Misc,
    /// Thread exit, no operands
    Exit,
    /// Return from an intra-module call, no operands
    Ret,
    /// Direct branch: one immediate (relative target)
    Branch,
    /// Register-indexed branch: one register-pair operand
    BranchIndex,
    /// Direct intra-module call: one immediate (relative target)
    Call,
    /// Register-indexed call: one register-pair operand
    CallIndex,
    /// `mov Rd, (Rb|#imm)`
    Move,
    /// `movi Rd, #imm16` (zero-extended)
    MoveImm,
    /// `movk Rd, #imm16, #hw` (insert halfword, keep the rest)
    MoveInsert,
    /// `s2r Rd, SRn`
    SpecialRead,
    /// `p2r Rd` (predicate mask to register)
    PredRead,
    /// `r2p Ra` (register to predicate mask)
    PredWrite,
    /// `Rd, Ra, (Rb|#imm)` integer ALU
    Alu,
    /// `Rd, Ra, #imm` shift
    Shift,
    /// `isetp.cc Pd, Ra, (Rb|#imm)` signed compare into a predicate
    SetPred,
    /// `Rd, [Ra+#imm]` load
    Load,
    /// `ldc Rd, c[bank][offset]` constant-bank load
    LoadConst,
    /// `[Ra+#imm], Rb` store
    Store,
}

/// Signed comparison carried by a `SetPred` opcode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Compare {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

/// Classification of one device opcode
#[derive(Debug)]
pub struct OpcodeInfo {
    /// Encoding id (byte 0 of the instruction word)
    pub id: u8,
    /// The mnemonic string (e.g., "iadd", "isetp.lt")
    pub mnemonic: &'static str,
    /// Operand shape class
    pub class: OpClass,
    /// Memory space touched by this opcode
    pub memory_space: MemorySpace,
    /// Comparison, for `SetPred` opcodes
    pub compare: Option<Compare>,
}

impl OpcodeInfo {
    const fn new(id: u8, mnemonic: &'static str, class: OpClass) -> Self {
        Self {
            id,
            mnemonic,
            class,
            memory_space: MemorySpace::None,
            compare: None,
        }
    }

    const fn memory(id: u8, mnemonic: &'static str, class: OpClass, space: MemorySpace) -> Self {
        Self {
            id,
            mnemonic,
            class,
            memory_space: space,
            compare: None,
        }
    }

    const fn set_pred(id: u8, mnemonic: &'static str, compare: Compare) -> Self {
        Self {
            id,
            mnemonic,
            class: OpClass::SetPred,
            memory_space: MemorySpace::None,
            compare: Some(compare),
        }
    }

    /// May this opcode redirect the program counter?
    pub fn is_branch(&self) -> bool {
        matches!(
            self.class,
            OpClass::Branch | OpClass::BranchIndex | OpClass::Call | OpClass::CallIndex
        )
    }

    /// Does execution resume after this opcode's transfer?
    pub fn is_call(&self) -> bool {
        matches!(self.class, OpClass::Call | OpClass::CallIndex)
    }

    /// Does this opcode end the thread or the current function?
    pub fn is_exit(&self) -> bool {
        matches!(self.class, OpClass::Exit | OpClass::Ret)
    }

    /// Is the transfer target taken from a register?
    pub fn is_indirect(&self) -> bool {
        matches!(self.class, OpClass::BranchIndex | OpClass::CallIndex)
    }

    /// Is this a memory load?
    pub fn is_load(&self) -> bool {
        matches!(self.class, OpClass::Load | OpClass::LoadConst)
    }

    /// Is this a memory store?
    pub fn is_store(&self) -> bool {
        matches!(self.class, OpClass::Store)
    }

    /// Does this opcode access memory at all?
    pub fn is_memory(&self) -> bool {
        self.is_load() || self.is_store()
    }

    /// Classify by encoding id. Returns `None` for ids not in the table.
    pub fn from_id(id: u8) -> Option<&'static Self> {
        BY_ID.get(&id).copied()
    }

    /// Classify by mnemonic string. Returns `None` for unknown mnemonics.
    pub fn from_mnemonic(mnemonic: &str) -> Option<&'static Self> {
        BY_MNEMONIC.get(mnemonic).copied()
    }
}

/// Single source of truth: all device opcodes
pub const OPCODE_TABLE: &[OpcodeInfo] = &[
    OpcodeInfo::new(0x00, "nop", OpClass::Misc),
    OpcodeInfo::new(0x01, "exit", OpClass::Exit),
    OpcodeInfo::new(0x02, "ret", OpClass::Ret),
    OpcodeInfo::new(0x03, "bar", OpClass::Misc),
    // Control transfers
    OpcodeInfo::new(0x04, "bra", OpClass::Branch),
    OpcodeInfo::new(0x05, "brx", OpClass::BranchIndex),
    OpcodeInfo::new(0x06, "call", OpClass::Call),
    OpcodeInfo::new(0x07, "callx", OpClass::CallIndex),
    // Moves
    OpcodeInfo::new(0x10, "mov", OpClass::Move),
    OpcodeInfo::new(0x11, "movi", OpClass::MoveImm),
    OpcodeInfo::new(0x12, "movk", OpClass::MoveInsert),
    OpcodeInfo::new(0x13, "s2r", OpClass::SpecialRead),
    OpcodeInfo::new(0x14, "p2r", OpClass::PredRead),
    OpcodeInfo::new(0x15, "r2p", OpClass::PredWrite),
    // Integer ALU
    OpcodeInfo::new(0x20, "iadd", OpClass::Alu),
    OpcodeInfo::new(0x21, "imul", OpClass::Alu),
    OpcodeInfo::new(0x22, "and", OpClass::Alu),
    OpcodeInfo::new(0x23, "or", OpClass::Alu),
    OpcodeInfo::new(0x24, "xor", OpClass::Alu),
    OpcodeInfo::new(0x25, "shl", OpClass::Shift),
    OpcodeInfo::new(0x26, "shr", OpClass::Shift),
    // Predicate-setting compares
    OpcodeInfo::set_pred(0x28, "isetp.eq", Compare::Eq),
    OpcodeInfo::set_pred(0x29, "isetp.ne", Compare::Ne),
    OpcodeInfo::set_pred(0x2a, "isetp.lt", Compare::Lt),
    OpcodeInfo::set_pred(0x2b, "isetp.le", Compare::Le),
    OpcodeInfo::set_pred(0x2c, "isetp.gt", Compare::Gt),
    OpcodeInfo::set_pred(0x2d, "isetp.ge", Compare::Ge),
    // Loads
    OpcodeInfo::memory(0x30, "ld", OpClass::Load, MemorySpace::Generic),
    OpcodeInfo::memory(0x31, "ldg", OpClass::Load, MemorySpace::Global),
    OpcodeInfo::memory(0x32, "lds", OpClass::Load, MemorySpace::Shared),
    OpcodeInfo::memory(0x33, "ldl", OpClass::Load, MemorySpace::Local),
    OpcodeInfo::memory(0x34, "ldc", OpClass::LoadConst, MemorySpace::Constant),
    // Stores
    OpcodeInfo::memory(0x38, "st", OpClass::Store, MemorySpace::Generic),
    OpcodeInfo::memory(0x39, "stg", OpClass::Store, MemorySpace::Global),
    OpcodeInfo::memory(0x3a, "sts", OpClass::Store, MemorySpace::Shared),
    OpcodeInfo::memory(0x3b, "stl", OpClass::Store, MemorySpace::Local),
];

lazy_static! {
    static ref BY_ID: HashMap<u8, &'static OpcodeInfo> =
        OPCODE_TABLE.iter().map(|info| (info.id, info)).collect();

    /// Lookup table: mnemonic -> classification
    pub static ref BY_MNEMONIC: HashMap<&'static str, &'static OpcodeInfo> = OPCODE_TABLE
        .iter()
        .map(|info| (info.mnemonic, info))
        .collect();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ids_are_unique() {
        assert_eq!(BY_ID.len(), OPCODE_TABLE.len());
        assert_eq!(BY_MNEMONIC.len(), OPCODE_TABLE.len());
    }

    #[test]
    fn test_lookup_by_id_and_mnemonic_agree() {
        for info in OPCODE_TABLE {
            assert_eq!(OpcodeInfo::from_id(info.id).unwrap().mnemonic, info.mnemonic);
            assert_eq!(OpcodeInfo::from_mnemonic(info.mnemonic).unwrap().id, info.id);
        }
    }

    #[test]
    fn test_classification() {
        let bra = OpcodeInfo::from_mnemonic("bra").unwrap();
        assert!(bra.is_branch() && !bra.is_call() && !bra.is_indirect());

        let brx = OpcodeInfo::from_mnemonic("brx").unwrap();
        assert!(brx.is_branch() && brx.is_indirect());

        let callx = OpcodeInfo::from_mnemonic("callx").unwrap();
        assert!(callx.is_branch() && callx.is_call() && callx.is_indirect());

        let exit = OpcodeInfo::from_mnemonic("exit").unwrap();
        assert!(exit.is_exit() && !exit.is_branch());

        let ldg = OpcodeInfo::from_mnemonic("ldg").unwrap();
        assert!(ldg.is_load() && !ldg.is_store());
        assert_eq!(ldg.memory_space, MemorySpace::Global);

        let stl = OpcodeInfo::from_mnemonic("stl").unwrap();
        assert!(stl.is_store());
        assert_eq!(stl.memory_space, MemorySpace::Local);
    }

    #[test]
    fn test_unknown_lookups() {
        assert!(OpcodeInfo::from_id(0xff).is_none());
        assert!(OpcodeInfo::from_mnemonic("fadd").is_none());
    }
}

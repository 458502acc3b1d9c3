//! Trait abstraction for CFG construction
//!
//! The [`FlowInstruction`] trait provides the control-flow information the
//! CFG builder needs, without coupling the builder to a concrete decoded
//! instruction type. Targets are byte offsets within the function.

/// Control-flow properties of one instruction.
///
/// # Requirements
///
/// Every item in the instruction stream must be an actual instruction; the
/// sequence must be in offset order, and `as_target` must be unique per
/// instruction (it is the instruction's own byte offset).
pub trait FlowInstruction {
    /// Returns the mnemonic of this instruction.
    fn mnemonic(&self) -> &str;

    /// Returns the branch target (byte offset) if this is a direct branch.
    /// Indirect branches and non-branches return `None`.
    fn branch_target(&self) -> Option<usize>;

    /// Returns this instruction's identity as a potential branch target
    /// (its own byte offset).
    fn as_target(&self) -> usize;

    /// Check if this instruction may redirect the program counter
    /// (direct or indirect branch, including calls).
    fn is_branch(&self) -> bool;

    /// Check if this is a call (execution resumes at the next instruction
    /// after the callee returns).
    fn is_call(&self) -> bool;

    /// Check if this instruction terminates the thread or function
    /// (no successors).
    fn is_exit(&self) -> bool;

    /// Check if this instruction is guarded by a predicate and may
    /// therefore fall through even when it is a branch.
    fn is_conditional(&self) -> bool;

    /// Check if this branch takes its target from a register, making the
    /// target unresolvable before runtime.
    fn is_indirect(&self) -> bool;

    /// Check if this instruction ends a basic block.
    #[inline]
    fn is_control_transfer(&self) -> bool {
        self.is_branch() || self.is_exit()
    }
}

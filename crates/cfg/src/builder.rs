//! Generic CFG builder
//!
//! Builds a control flow graph from a sequence of instructions implementing
//! the [`FlowInstruction`] trait.

use std::collections::{HashMap, HashSet};

use crate::{
    graph::{BlockData, Cfg, Graph},
    FlowInstruction,
};

/// Build a CFG from a sequence of decoded instructions.
///
/// The instructions must be in offset order. A register-indexed branch
/// anywhere in the sequence marks the resulting CFG degenerate: its edges
/// cannot be resolved statically and the edge set is incomplete.
pub fn build_cfg<I: FlowInstruction>(instructions: &[I]) -> Cfg {
    CfgBuilder::new(instructions).build()
}

/// Builder for constructing a CFG from instructions
struct CfgBuilder<'a, I: FlowInstruction> {
    instructions: &'a [I],
    graph: Graph,
    target_to_block: HashMap<usize, petgraph::graph::NodeIndex>,
    nodes: Vec<petgraph::graph::NodeIndex>,
}

impl<'a, I: FlowInstruction> CfgBuilder<'a, I> {
    fn new(instructions: &'a [I]) -> Self {
        Self {
            instructions,
            graph: Graph::new(),
            target_to_block: HashMap::new(),
            nodes: Vec::new(),
        }
    }

    fn build(mut self) -> Cfg {
        let block_starts = self.find_block_boundaries();
        self.create_blocks(&block_starts);
        self.add_edges();

        let degenerate = self
            .instructions
            .iter()
            .any(|i| i.is_indirect() && i.is_branch() && !i.is_call() && !i.is_exit());

        Cfg::new(self.graph, degenerate)
    }

    /// Find basic block boundaries.
    ///
    /// A new block starts at:
    /// - The beginning of the code
    /// - Any direct-branch target
    /// - The instruction after a control transfer
    ///
    /// An instruction that is both a branch target and the successor of a
    /// control transfer starts exactly one block; boundaries are purely
    /// offset-based.
    fn find_block_boundaries(&self) -> Vec<usize> {
        // Collect all direct-branch targets first
        let branch_targets: HashSet<usize> = self
            .instructions
            .iter()
            .filter_map(|i| i.branch_target())
            .collect();

        let mut block_starts = Vec::new();
        let mut previous_was_transfer = false;

        for (idx, item) in self.instructions.iter().enumerate() {
            let is_branch_target = branch_targets.contains(&item.as_target());

            if idx == 0 || is_branch_target || previous_was_transfer {
                block_starts.push(idx);
            }

            previous_was_transfer = item.is_control_transfer();
        }

        block_starts
    }

    /// Create graph nodes for each basic block.
    fn create_blocks(&mut self, block_starts: &[usize]) {
        for (block_idx, &start_idx) in block_starts.iter().enumerate() {
            let end_idx = block_starts
                .get(block_idx + 1)
                .copied()
                .unwrap_or(self.instructions.len());

            let instruction_range = start_idx..end_idx;
            let terminator = &self.instructions[end_idx - 1];

            let node = self.graph.add_node(BlockData {
                instruction_range: instruction_range.clone(),
                start_offset: self.instructions[start_idx].as_target(),
                has_explicit_terminator: terminator.is_control_transfer(),
            });
            self.nodes.push(node);

            // Register every instruction offset in this block so branch
            // targets anywhere inside it resolve (targets always land on a
            // block start by construction, but the lookup stays total).
            for idx in instruction_range {
                self.target_to_block
                    .insert(self.instructions[idx].as_target(), node);
            }
        }
    }

    /// Add edges based on control flow.
    fn add_edges(&mut self) {
        for (block_idx, &node) in self.nodes.iter().enumerate() {
            let range = self.graph[node].instruction_range.clone();
            let item = &self.instructions[range.end - 1];

            // Edge to a direct branch target. Calls do not add an edge to
            // the callee: control returns, so only the fall-through applies.
            if item.is_branch() && !item.is_call() && !item.is_indirect() {
                if let Some(target) = item.branch_target() {
                    if let Some(&target_node) = self.target_to_block.get(&target) {
                        self.graph.add_edge(node, target_node, ());
                    }
                }
            }

            // Fall-through edge. Exits never fall through; unconditional
            // non-call branches never fall through; everything else does.
            let falls_through = !item.is_exit()
                && !(item.is_branch() && !item.is_call() && !item.is_conditional());

            if falls_through {
                if let Some(&next_node) = self.nodes.get(block_idx + 1) {
                    self.graph.add_edge(node, next_node, ());
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::{build_cfg, traits::mock::MockInstruction, BlockIndex};

    #[test]
    fn test_linear_code_single_block() {
        let instructions = vec![
            MockInstruction::new("mov", 0),
            MockInstruction::new("iadd", 16),
            MockInstruction::exit(32),
        ];
        let cfg = build_cfg(&instructions);

        assert_eq!(cfg.block_count(), 1);
        assert_eq!(cfg.edge_count(), 0);
    }

    #[test]
    fn test_conditional_branch_three_blocks() {
        //  0: mov
        // 16: @P0 bra 48
        // 32: imul
        // 48: exit
        let instructions = vec![
            MockInstruction::new("mov", 0),
            MockInstruction::branch_if(16, 48),
            MockInstruction::new("imul", 32),
            MockInstruction::exit(48),
        ];
        let cfg = build_cfg(&instructions);

        // Blocks: [mov, bra], [imul], [exit]
        assert_eq!(cfg.block_count(), 3);

        // Entry has both the branch edge and the fall-through edge.
        let entry = cfg.entry().unwrap();
        let succ: Vec<_> = cfg.successors(entry).collect();
        assert_eq!(succ.len(), 2);
    }

    #[test]
    fn test_unconditional_branch_no_fall_through() {
        let instructions = vec![
            MockInstruction::branch(0, 32),
            MockInstruction::new("imul", 16),
            MockInstruction::exit(32),
        ];
        let cfg = build_cfg(&instructions);

        assert_eq!(cfg.block_count(), 3);
        let entry = cfg.entry().unwrap();
        let succ: Vec<_> = cfg.successors(entry).collect();
        // Only the branch-target edge; no fall-through into [imul].
        assert_eq!(succ, vec![BlockIndex::new(2)]);
    }

    #[test]
    fn test_backward_branch_loop() {
        //  0: mov
        // 16: iadd        <- loop head
        // 32: @P0 bra 16
        // 48: exit
        let instructions = vec![
            MockInstruction::new("mov", 0),
            MockInstruction::new("iadd", 16),
            MockInstruction::branch_if(32, 16),
            MockInstruction::exit(48),
        ];
        let cfg = build_cfg(&instructions);

        // Blocks: [mov], [iadd, bra], [exit]
        assert_eq!(cfg.block_count(), 3);
        let body = BlockIndex::new(1);
        let succ: Vec<_> = cfg.successors(body).collect();
        assert!(succ.contains(&body), "loop body should branch to itself");
    }

    #[test]
    fn test_call_falls_through_without_callee_edge() {
        let instructions = vec![
            MockInstruction::call(0, 32),
            MockInstruction::exit(16),
            MockInstruction::exit(32),
        ];
        let cfg = build_cfg(&instructions);

        let entry = cfg.entry().unwrap();
        let succ: Vec<_> = cfg.successors(entry).collect();
        // Fall-through to the block after the call only.
        assert_eq!(succ, vec![BlockIndex::new(1)]);
        assert!(!cfg.is_degenerate());
    }

    #[test]
    fn test_register_indexed_branch_marks_degenerate() {
        let instructions = vec![
            MockInstruction::new("mov", 0),
            MockInstruction::branch_indirect(16),
            MockInstruction::exit(32),
        ];
        let cfg = build_cfg(&instructions);

        assert!(cfg.is_degenerate());
        // The indirect branch contributes no target edge, and it is
        // unconditional so there is no fall-through either.
        let entry = cfg.entry().unwrap();
        assert_eq!(cfg.successors(entry).count(), 0);
        // Still two blocks; nothing is dropped.
        assert_eq!(cfg.block_count(), 2);
    }

    #[test]
    fn test_branch_target_is_block_start() {
        let instructions = vec![
            MockInstruction::new("mov", 0),
            MockInstruction::branch(16, 48),
            MockInstruction::new("iadd", 32),
            MockInstruction::new("imul", 48),
            MockInstruction::exit(64),
        ];
        let cfg = build_cfg(&instructions);

        let starts: Vec<_> = cfg.blocks().map(|b| cfg.start_offset(b)).collect();
        assert!(starts.contains(&48), "branch target must start a block");
    }
}

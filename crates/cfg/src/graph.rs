//! CFG data structures

use std::ops::Range;

pub type BlockIndex = petgraph::graph::NodeIndex;

pub(crate) type Graph = petgraph::graph::DiGraph<BlockData, ()>;

/// Data stored in each basic block node
#[derive(Debug)]
pub struct BlockData {
    /// Range of indices into the original instruction list.
    /// E.g., for a block containing instructions 3, 4, 5 this would be `3..6`
    pub instruction_range: Range<usize>,

    /// Byte offset of the block's first instruction.
    pub start_offset: usize,

    /// Whether this block ends with an explicit terminator instruction.
    ///
    /// A **terminator** is the instruction that ends a basic block's control
    /// flow - a branch, call, or exit. Blocks without an explicit terminator
    /// end only because the next instruction is a branch target, and fall
    /// through to the next block.
    pub has_explicit_terminator: bool,
}

/// Control flow graph backed by petgraph
#[derive(Debug)]
pub struct Cfg {
    /// The underlying directed graph
    graph: Graph,
    /// True when the function contains register-indexed branches whose
    /// targets are only known at runtime. The edge set is then incomplete
    /// and must not be treated as exhaustive.
    degenerate: bool,
}

impl Cfg {
    /// Create a new CFG from graph (used by builder)
    pub(crate) fn new(graph: Graph, degenerate: bool) -> Self {
        Self { graph, degenerate }
    }

    /// Whether the edge set is incomplete because the function uses
    /// register-indexed branches.
    pub fn is_degenerate(&self) -> bool {
        self.degenerate
    }

    /// Iterate over all block indices
    pub fn blocks(&self) -> impl Iterator<Item = BlockIndex> {
        self.graph.node_indices()
    }

    /// Get the number of blocks
    pub fn block_count(&self) -> usize {
        self.graph.node_count()
    }

    /// The entry block, if the function is non-empty.
    /// BlockIndex 0 is the entry point by construction: the builder always
    /// creates the first block for the function's first instruction.
    pub fn entry(&self) -> Option<BlockIndex> {
        (self.graph.node_count() > 0).then(|| BlockIndex::new(0))
    }

    /// Iterate over the successors of a block
    pub fn successors(&self, block: BlockIndex) -> impl Iterator<Item = BlockIndex> + '_ {
        self.graph.neighbors(block)
    }

    /// Total number of edges in the graph
    pub fn edge_count(&self) -> usize {
        self.graph.edge_count()
    }

    /// Get the instruction range for a block
    pub fn instruction_range(&self, block: BlockIndex) -> &Range<usize> {
        &self.graph[block].instruction_range
    }

    /// Byte offset of the block's first instruction
    pub fn start_offset(&self, block: BlockIndex) -> usize {
        self.graph[block].start_offset
    }

    /// Get the number of instructions in a block
    pub fn instruction_count(&self, block: BlockIndex) -> usize {
        self.graph[block].instruction_range.len()
    }

    /// Get the index of the block's terminator instruction.
    ///
    /// Returns `Some(index)` if the block has an explicit terminator
    /// (branch, call, or exit); the terminator is always the last
    /// instruction in the block. Returns `None` for fall-through blocks.
    pub fn terminator_index(&self, block: BlockIndex) -> Option<usize> {
        let data = &self.graph[block];
        data.has_explicit_terminator
            .then(|| data.instruction_range.end - 1)
    }
}

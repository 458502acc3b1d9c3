//! Control Flow Graph analysis for device code
//!
//! This crate provides:
//! - **CFG construction** from decoded instruction sequences
//! - **Degeneracy tracking** for functions whose branch targets are only
//!   resolvable at runtime (register-indexed branches)
//!
//! # Architecture
//!
//! The builder is generic over the [`FlowInstruction`] trait, which exposes
//! the control-flow properties of one instruction (branch target, own
//! offset, classification). The concrete decoded instruction type lives in
//! the `isa` crate and implements the trait there.
//!
//! # Modules
//!
//! - [`traits`]: the `FlowInstruction` trait
//! - [`graph`]: CFG data structures (`Cfg`, `BlockData`)
//! - [`builder`]: generic CFG builder

pub mod builder;
pub mod graph;
pub mod traits;

pub use builder::build_cfg;
pub use graph::{BlockData, BlockIndex, Cfg};
pub use traits::FlowInstruction;

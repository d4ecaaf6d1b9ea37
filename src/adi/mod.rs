//! Arm Debug Interface register layer.
//!
//! Debug Port and Access Port accesses are built from bus transactions and
//! keep the register cache of the [`Context`](crate::Context) in step with
//! the target. MEM-AP memory access and Cortex-M halt control sit on top.

mod ap;
pub mod debug;
mod dp;
pub mod memap;
pub mod regs;

pub use debug::{CortexPart, CpuId};
pub use memap::{AccessSize, AddressingMode};

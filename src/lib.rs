//! A queue based Serial Wire Debug protocol engine.
//!
//! Bus operations are appended to a command queue and executed in order
//! through a [`transport::Transport`], which only has to shift bits. On top
//! of the queue sit the bus primitives, WAIT/FAULT recovery and the Arm Debug
//! Interface register layer: DP and AP access, MEM-AP memory access and
//! Cortex-M halt control.
//!
//! ```ignore
//! let mut ctx = Context::new(transport, delay, Config::default())?;
//! ctx.dap_init()?;
//! ctx.dp_power_up()?;
//! ctx.memap_init()?;
//! let word = ctx.memap_read_word(0x2000_0000)?;
//! ```

#![cfg_attr(not(test), no_std)]
#![warn(missing_docs)]

extern crate alloc;

#[macro_use]
mod fmt;

pub mod adi;
pub mod bits;
pub mod bus;
pub mod context;
pub mod flush;
pub mod queue;
mod retry;
pub mod swd;
pub mod swj;
pub mod transport;

#[cfg(test)]
mod fake_target;
#[cfg(test)]
mod mock_device;

pub use bus::Operation;
pub use context::{Config, Context, DapState, LogLevel};
pub use flush::FlushPolicy;
pub use swd::{Error, Result};

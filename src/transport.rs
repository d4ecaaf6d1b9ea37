//! The electrical transport the engine drives.
//!
//! Implementations shift bits on real wires (GPIO bitbang, MPSSE, a remote
//! bridge). The engine calls exactly one method per queued command, so every
//! call carries at most 32 bits.
//!
//! Payload buffers hold the bits packed little endian: bit 0 of `data[0]` is
//! the first bit of the payload word. With [`BitOrder::MsbFirst`] the engine
//! has already reversed the payload word, so a transport that shifts MSB first
//! can send the buffer as is.

use crate::swd::{BitOrder, Error, Result};

/// Longest turnaround a transport has to support.
pub const MAX_TURNAROUND: usize = 4;

/// Longest bit sequence passed in one call.
pub const MAX_BITS: usize = 32;

/// Bit level access to the SWD lines.
#[cfg_attr(test, mockall::automock)]
pub trait Transport {
    /// Drive `bits` bits from `data` onto SWDIO. Returns the bits sent.
    fn mosi_bits(&mut self, data: &[u8], bits: usize, order: BitOrder) -> Result<usize>;

    /// Sample `bits` bits from SWDIO into `data`. Returns the bits received.
    fn miso_bits(&mut self, data: &mut [u8], bits: usize, order: BitOrder) -> Result<usize>;

    /// Hand SWDIO to the host for `bits` clock cycles.
    fn mosi_turnaround(&mut self, bits: usize) -> Result<usize>;

    /// Hand SWDIO to the target for `bits` clock cycles.
    fn miso_turnaround(&mut self, bits: usize) -> Result<usize>;
}

/// Check a data bit count against the transport contract.
pub fn check_bits(bits: usize) -> Result<()> {
    if (1..=MAX_BITS).contains(&bits) {
        Ok(())
    } else {
        Err(Error::InvalidBitCount(bits.min(u8::MAX as usize) as u8))
    }
}

/// Check a turnaround length against the transport contract.
pub fn check_turnaround(bits: usize) -> Result<()> {
    if (1..=MAX_TURNAROUND).contains(&bits) {
        Ok(())
    } else {
        Err(Error::InvalidBitCount(bits.min(u8::MAX as usize) as u8))
    }
}

/// Pack a payload word into `buf`, little endian.
pub(crate) fn pack(value: u32, buf: &mut [u8; 4]) {
    *buf = value.to_le_bytes();
}

/// Unpack a little endian buffer into a word.
pub(crate) fn unpack(buf: &[u8; 4]) -> u32 {
    u32::from_le_bytes(*buf)
}

/// Number of buffer bytes that carry `bits` bits.
pub(crate) fn byte_len(bits: usize) -> usize {
    bits.div_ceil(8)
}

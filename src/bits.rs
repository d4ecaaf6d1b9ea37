//! Bit helpers shared by the packet generator and the flush engine.

use alloc::string::String;

use crate::swd::{Error, Result};

/// Even parity bit for `value`: `true` when `value` has an odd number of set
/// bits, so that the total including the parity bit is even.
pub fn parity_even<T: Into<u32>>(value: T) -> bool {
    value.into().count_ones() & 1 == 1
}

/// Reverse the order of the low `bit_count` bits of `value`.
///
/// Bits above `bit_count` are discarded. `bit_count` must be within `0..=32`.
pub fn bit_reverse(value: u32, bit_count: u8) -> Result<u32> {
    match bit_count {
        0 => Ok(0),
        1..=32 => Ok(value.reverse_bits() >> (32 - bit_count as u32)),
        _ => Err(Error::InvalidBitCount(bit_count)),
    }
}

/// Mask selecting the low `bit_count` bits.
pub(crate) fn low_mask(bit_count: u8) -> u32 {
    match bit_count {
        0 => 0,
        n if n >= 32 => u32::MAX,
        n => (1 << n) - 1,
    }
}

/// Render the low `bit_count` bits of `value` as a binary string, most
/// significant bit first.
pub fn bin_string(value: u32, bit_count: u8) -> String {
    let bit_count = bit_count.min(32);
    (0..bit_count)
        .rev()
        .map(|i| if value & (1 << i) != 0 { '1' } else { '0' })
        .collect()
}

//! Fixed control sequences sent as raw control bytes.
//!
//! All sequences are given in wire order: bit 0 of the first byte is clocked
//! out first.

/// SWDIO held high for 56 clock cycles.
const HIGH_56: [u8; 7] = [0xFF; 7];

/// JTAG-to-SWD select code `0xE79E`, LSB first.
const JTAG_TO_SWD_CODE: [u8; 2] = [0x9E, 0xE7];

/// SWD-to-JTAG select code `0xE73C`, LSB first.
const SWD_TO_JTAG_CODE: [u8; 2] = [0x3C, 0xE7];

/// Named control sequences.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Sequence {
    /// 56 cycles high followed by the JTAG-to-SWD select code.
    JtagToSwd,
    /// 56 cycles high followed by the SWD-to-JTAG select code.
    SwdToJtag,
    /// 56 cycles high followed by 8 idle cycles low.
    LineReset,
    /// 8 cycles high.
    Reset,
    /// 8 idle cycles low.
    Idle,
}

impl Sequence {
    /// Bytes to clock out for this sequence.
    pub fn bytes(self) -> &'static [u8] {
        const JTAG_TO_SWD: [u8; 9] = concat(HIGH_56, JTAG_TO_SWD_CODE);
        const SWD_TO_JTAG: [u8; 9] = concat(HIGH_56, SWD_TO_JTAG_CODE);
        const LINE_RESET: [u8; 8] = [0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0x00];

        match self {
            Sequence::JtagToSwd => &JTAG_TO_SWD,
            Sequence::SwdToJtag => &SWD_TO_JTAG,
            Sequence::LineReset => &LINE_RESET,
            Sequence::Reset => &[0xFF],
            Sequence::Idle => &[0x00],
        }
    }

    /// Number of clock cycles the sequence takes.
    pub fn cycles(self) -> usize {
        self.bytes().len() * 8
    }
}

const fn concat(high: [u8; 7], code: [u8; 2]) -> [u8; 9] {
    let mut out = [0u8; 9];
    let mut i = 0;
    while i < 7 {
        out[i] = high[i];
        i += 1;
    }
    out[7] = code[0];
    out[8] = code[1];
    out
}

use core::fmt;

use num_enum::{IntoPrimitive, TryFromPrimitive};

use crate::bits::parity_even;

/// The available errors for SWD.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Error {
    /// Parity error on a data phase read from the target.
    BadParity,
    /// Ack not yet ready.
    AckWait,
    /// A fault.
    AckFault,
    /// The line was not driven during the ack phase.
    AckProtocol,
    /// Unkown ack value, the bus is out of sync.
    AckUnknown(u8),

    /// Register address outside `0x0..=0xC` or not word aligned.
    InvalidAddress(u8),
    /// Bit count outside the range accepted by an operation.
    InvalidBitCount(u8),
    /// Log level outside `Silent..=Payload`.
    InvalidLogLevel(u8),
    /// MEM-AP access size other than 1, 2 or 4 bytes.
    InvalidAccessSize(u8),
    /// Any other argument a caller got wrong.
    InvalidArgument,

    /// The queue holds no commands.
    QueueEmpty,
    /// Appending would exceed the configured queue length.
    QueueFull,
    /// A handle outlived the command it referred to.
    StaleHandle,

    /// An ack read was not preceded by a request or a turnaround to MISO.
    AckOrderViolation,
    /// A parity command is not directly preceded by its data command.
    ParityOrderViolation,
    /// No request header precedes an ack that needs to be retried.
    MissingRequest,

    /// The transport reported a driver specific error.
    Transport(i32),
    /// The transport clocked fewer bits than requested.
    ShortTransfer {
        /// Bits requested.
        expected: u8,
        /// Bits the transport reported.
        actual: usize,
    },

    /// The WAIT/FAULT retry budget is used up.
    MaxRetryExceeded,

    /// The debug or system power domain did not acknowledge power up.
    PowerUpFailed,
    /// The DAP is not in a state that allows the requested operation.
    NotReady,
    /// The selected AP is not a memory access port, holds its IDR.
    NotMemAp(u32),
    /// CPUID does not describe a known Cortex-M core.
    UnknownCpu(u32),
    /// The core did not report the requested halt state.
    HaltTimeout,
}

impl Error {
    /// Transient target condition that may succeed when retried.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::AckWait | Error::MaxRetryExceeded)
    }

    /// The host and target may disagree about the bus state; the DAP should be
    /// brought up again with [`Context::dap_init`](crate::Context::dap_init).
    pub fn requires_reinit(&self) -> bool {
        matches!(
            self,
            Error::BadParity
                | Error::AckFault
                | Error::AckProtocol
                | Error::AckUnknown(_)
                | Error::AckOrderViolation
                | Error::ParityOrderViolation
                | Error::MissingRequest
                | Error::ShortTransfer { .. }
        )
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::BadParity => write!(f, "data parity mismatch"),
            Error::AckWait => write!(f, "target answered WAIT"),
            Error::AckFault => write!(f, "target answered FAULT"),
            Error::AckProtocol => write!(f, "no ack from target"),
            Error::AckUnknown(ack) => write!(f, "unknown ack {ack:#05b}"),
            Error::InvalidAddress(addr) => write!(f, "invalid register address {addr:#x}"),
            Error::InvalidBitCount(n) => write!(f, "invalid bit count {n}"),
            Error::InvalidLogLevel(l) => write!(f, "invalid log level {l}"),
            Error::InvalidAccessSize(s) => write!(f, "invalid access size {s}"),
            Error::InvalidArgument => write!(f, "invalid argument"),
            Error::QueueEmpty => write!(f, "command queue is empty"),
            Error::QueueFull => write!(f, "command queue is full"),
            Error::StaleHandle => write!(f, "command handle no longer valid"),
            Error::AckOrderViolation => write!(f, "ack not preceded by request"),
            Error::ParityOrderViolation => write!(f, "parity not preceded by data"),
            Error::MissingRequest => write!(f, "no request found for ack"),
            Error::Transport(code) => write!(f, "transport error {code}"),
            Error::ShortTransfer { expected, actual } => {
                write!(f, "transport moved {actual} of {expected} bits")
            }
            Error::MaxRetryExceeded => write!(f, "retry budget exhausted"),
            Error::PowerUpFailed => write!(f, "debug power up not acknowledged"),
            Error::NotReady => write!(f, "DAP not initialized"),
            Error::NotMemAp(idr) => write!(f, "AP with IDR {idr:#010x} is not a MEM-AP"),
            Error::UnknownCpu(cpuid) => write!(f, "unknown CPUID {cpuid:#010x}"),
            Error::HaltTimeout => write!(f, "core did not change halt state"),
        }
    }
}

/// The definision of SWD results.
pub type Result<T> = core::result::Result<T, Error>;

/// Encode if a transaction is for AP or DP.
#[repr(u8)]
#[derive(PartialEq, Eq, Copy, Clone, Debug, TryFromPrimitive)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum APnDP {
    /// For DP.
    DP = 0,
    /// For AP.
    AP = 1,
}

/// Encode if an SWD transaction is a read or a write.
#[repr(u8)]
#[derive(PartialEq, Eq, Copy, Clone, Debug, TryFromPrimitive)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum RnW {
    /// Write flag.
    W = 0,
    /// Read flag.
    R = 1,
}

/// The different kinds of SWD Ack, as shifted in LSB first.
#[repr(u8)]
#[derive(PartialEq, Eq, Copy, Clone, Debug)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[allow(missing_docs)]
pub enum Ack {
    Ok = 0b001,
    Wait = 0b010,
    Fault = 0b100,
    Protocol = 0b111,
}

impl Ack {
    /// Decode a raw 3-bit ack into `Ok(())` or the matching error.
    pub fn try_ok(ack: u8) -> Result<()> {
        match ack {
            v if v == (Ack::Ok as u8) => Ok(()),
            v if v == (Ack::Wait as u8) => Err(Error::AckWait),
            v if v == (Ack::Fault as u8) => Err(Error::AckFault),
            v if v == (Ack::Protocol as u8) => Err(Error::AckProtocol),
            _ => Err(Error::AckUnknown(ack)),
        }
    }
}

/// Turn around period configuration.
#[derive(Copy, Clone, Debug, Default, TryFromPrimitive, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[allow(missing_docs)]
#[repr(u8)]
pub enum TurnaroundPeriod {
    #[default]
    Cycles1 = 0b00,
    Cycles2 = 0b01,
    Cycles3 = 0b10,
    Cycles4 = 0b11,
}

impl TurnaroundPeriod {
    /// Number of clock cycles in one turnaround.
    pub fn cycles(self) -> u8 {
        self as u8 + 1
    }

    /// Build from a cycle count in `1..=4`.
    pub fn from_cycles(cycles: u8) -> Result<Self> {
        cycles
            .checked_sub(1)
            .and_then(|v| Self::try_from(v).ok())
            .ok_or(Error::InvalidBitCount(cycles))
    }
}

/// Order in which a transport shifts the bits of a payload.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, IntoPrimitive)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum BitOrder {
    /// Bit 0 of the payload goes on the wire first (native SWD order).
    #[default]
    LsbFirst = 0,
    /// The highest bit of the payload goes on the wire first.
    MsbFirst = 1,
}

const REQ_START: u8 = 1 << 0;
const REQ_APNDP: u8 = 1 << 1;
const REQ_RNW: u8 = 1 << 2;
const REQ_ADDR_SHIFT: u8 = 3;
const REQ_PARITY: u8 = 1 << 5;
const REQ_STOP: u8 = 1 << 6;
const REQ_PARK: u8 = 1 << 7;

/// Check a DP/AP register address within a bank: `0x0`, `0x4`, `0x8` or `0xC`.
pub fn check_address(addr: u8) -> Result<()> {
    if addr > 0xC || addr & 0x3 != 0 {
        return Err(Error::InvalidAddress(addr));
    }
    Ok(())
}

/// Build the 8-bit request header, in wire order (bit 0 is sent first).
///
/// ```text
/// bit  0      1      2    3    4    5       6     7
///      Start  APnDP  RnW  A2   A3   Parity  Stop  Park
/// ```
pub fn build_request(apndp: APnDP, rnw: RnW, addr: u8) -> Result<u8> {
    check_address(addr)?;
    let fields =
        ((apndp as u8) << 1) | ((rnw as u8) << 2) | (((addr >> 2) & 0x3) << REQ_ADDR_SHIFT);
    let parity = if parity_even(fields) { REQ_PARITY } else { 0 };
    Ok(REQ_START | fields | parity | REQ_PARK)
}

/// A decoded request header.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct RequestHeader {
    /// Port the request targets.
    pub apndp: APnDP,
    /// Direction of the data phase.
    pub rnw: RnW,
    /// Register address within the bank, `0x0..=0xC`.
    pub addr: u8,
}

impl RequestHeader {
    /// Encode into the wire byte.
    pub fn encode(&self) -> Result<u8> {
        build_request(self.apndp, self.rnw, self.addr)
    }
}

impl TryFrom<u8> for RequestHeader {
    type Error = Error;

    /// Decode a wire byte, checking the framing bits and parity.
    fn try_from(byte: u8) -> Result<Self> {
        if byte & REQ_START == 0 || byte & REQ_STOP != 0 || byte & REQ_PARK == 0 {
            return Err(Error::InvalidArgument);
        }
        let fields = byte & (REQ_APNDP | REQ_RNW | (0x3 << REQ_ADDR_SHIFT));
        if parity_even(fields) != (byte & REQ_PARITY != 0) {
            return Err(Error::BadParity);
        }
        Ok(RequestHeader {
            apndp: if byte & REQ_APNDP != 0 {
                APnDP::AP
            } else {
                APnDP::DP
            },
            rnw: if byte & REQ_RNW != 0 { RnW::R } else { RnW::W },
            addr: ((byte >> REQ_ADDR_SHIFT) & 0x3) << 2,
        })
    }
}

//! A simulated SW-DP with one AHB-AP in front of a Cortex-M4, driven at the
//! bit level through [`Transport`].
//!
//! The target follows the wire protocol closely enough to catch framing,
//! parity and direction mistakes: it fails the transport call when the host
//! drives SWDIO during a target phase or the other way round.

use std::collections::{HashMap, VecDeque};

use crate::bits::parity_even;
use crate::queue::Direction;
use crate::swd::{APnDP, BitOrder, Error, RequestHeader, Result, RnW};
use crate::swj::Sequence;
use crate::transport::Transport;

const IDCODE: u32 = 0x2BA0_1477;
const AHB_AP_IDR: u32 = 0x2477_0011;
const AHB_AP_BASE: u32 = 0xE00F_F003;
const CORTEX_M4_CPUID: u32 = 0x410F_C241;
const DHCSR: u32 = 0xE000_EDF0;
const CPUID: u32 = 0xE000_ED00;

/// ORUNDETECT, TRNMODE, MASKLANE, TRNCNT and the three request bits.
const CTRLSTAT_RW: u32 = 0x54FF_FF0D;
const STICKYORUN: u32 = 1 << 1;
const STICKYCMP: u32 = 1 << 4;
const STICKYERR: u32 = 1 << 5;
const WDATAERR: u32 = 1 << 7;
const CDBGPWRUPREQ: u32 = 1 << 28;
const CDBGPWRUPACK: u32 = 1 << 29;
const CSYSPWRUPREQ: u32 = 1 << 30;
const CSYSPWRUPACK: u32 = 1 << 31;

const ACK_OK: u8 = 0b001;
const ACK_WAIT: u8 = 0b010;
const ACK_FAULT: u8 = 0b100;
const ACK_NONE: u8 = 0b111;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum Phase {
    Idle,
    Ack(RequestHeader),
    ReadData(u32),
    ReadParity(u32),
    WriteData(RequestHeader),
    WriteParity(RequestHeader, u32),
    /// Request seen while in JTAG mode, nobody answers.
    NoResponse,
    /// Data phase after WAIT or FAULT.
    Discard,
    DiscardParity(bool),
}

pub struct FakeTarget {
    phase: Phase,
    driver: Direction,
    turnaround: usize,
    swd: bool,
    recent: VecDeque<u8>,

    ctrlstat: u32,
    select: u32,
    wcr: u32,
    rdbuff: u32,
    power_reads: usize,
    power_up_delay: usize,

    csw: u32,
    tar: u32,
    memory: HashMap<u32, u8>,
    cpuid: u32,
    dhcsr: u32,

    waits: usize,
    faults: usize,
    no_acks: usize,
    bad_parities: usize,

    acks: usize,
    zero_phases: usize,
    aborts: usize,
    dp_writes: usize,
    tar_writes: usize,
    csw_writes: usize,
    line_resets: usize,
    last_drw_write: Option<u32>,
}

impl FakeTarget {
    pub fn new() -> Self {
        FakeTarget {
            phase: Phase::Idle,
            driver: Direction::Mosi,
            turnaround: 1,
            swd: true,
            recent: VecDeque::new(),
            ctrlstat: 0,
            select: 0,
            wcr: 0,
            rdbuff: 0,
            power_reads: 0,
            power_up_delay: 1,
            csw: 0x0300_0040,
            tar: 0,
            memory: HashMap::new(),
            cpuid: CORTEX_M4_CPUID,
            dhcsr: 0,
            waits: 0,
            faults: 0,
            no_acks: 0,
            bad_parities: 0,
            acks: 0,
            zero_phases: 0,
            aborts: 0,
            dp_writes: 0,
            tar_writes: 0,
            csw_writes: 0,
            line_resets: 0,
            last_drw_write: None,
        }
    }

    /// Answer the next `n` requests with WAIT.
    pub fn inject_waits(&mut self, n: usize) {
        self.waits = n;
    }

    /// Answer the next `n` requests with FAULT, setting STICKYERR.
    pub fn inject_faults(&mut self, n: usize) {
        self.faults = n;
    }

    /// Leave SWDIO floating high during the next `n` acks.
    pub fn inject_no_ack(&mut self, n: usize) {
        self.no_acks = n;
    }

    /// Send a wrong parity bit with the next `n` read data phases.
    pub fn inject_bad_parity(&mut self, n: usize) {
        self.bad_parities = n;
    }

    pub fn set_turnaround(&mut self, cycles: usize) {
        self.turnaround = cycles;
    }

    /// CTRL/STAT reads after a power request until both acks show up.
    pub fn set_power_up_delay(&mut self, reads: usize) {
        self.power_up_delay = reads;
    }

    pub fn set_sticky_error(&mut self) {
        self.ctrlstat |= STICKYERR;
    }

    pub fn set_cpuid(&mut self, cpuid: u32) {
        self.cpuid = cpuid;
    }

    pub fn acks(&self) -> usize {
        self.acks
    }

    pub fn zero_phases(&self) -> usize {
        self.zero_phases
    }

    pub fn aborts(&self) -> usize {
        self.aborts
    }

    pub fn dp_writes(&self) -> usize {
        self.dp_writes
    }

    pub fn tar_writes(&self) -> usize {
        self.tar_writes
    }

    pub fn csw_writes(&self) -> usize {
        self.csw_writes
    }

    pub fn line_resets(&self) -> usize {
        self.line_resets
    }

    pub fn last_drw_write(&self) -> Option<u32> {
        self.last_drw_write
    }

    pub fn ctrlstat(&self) -> u32 {
        self.ctrlstat
    }

    pub fn csw(&self) -> u32 {
        self.csw
    }

    pub fn is_swd(&self) -> bool {
        self.swd
    }

    fn expect_driver(&self, driver: Direction) -> Result<()> {
        if self.driver != driver {
            return Err(Error::Transport(-1));
        }
        Ok(())
    }

    fn control_byte(&mut self, byte: u8) {
        self.recent.push_back(byte);
        if self.recent.len() > 9 {
            self.recent.pop_front();
        }
        let recent: Vec<u8> = self.recent.iter().copied().collect();
        if recent.ends_with(Sequence::JtagToSwd.bytes()) {
            self.swd = true;
        } else if recent.ends_with(Sequence::SwdToJtag.bytes()) {
            self.swd = false;
        } else if self.swd && recent.ends_with(Sequence::LineReset.bytes()) {
            self.line_resets += 1;
        }
    }

    fn request(&mut self, header: RequestHeader) {
        self.phase = Phase::Ack(header);
    }

    fn ack(&mut self, header: RequestHeader) -> u8 {
        self.acks += 1;
        if self.no_acks > 0 {
            self.no_acks -= 1;
            self.phase = Phase::Idle;
            return ACK_NONE;
        }
        if self.waits > 0 {
            self.waits -= 1;
            self.phase = Phase::Discard;
            return ACK_WAIT;
        }
        let sticky = self.ctrlstat & (STICKYERR | WDATAERR) != 0;
        if self.faults > 0 || (sticky && header.apndp == APnDP::AP) {
            self.faults = self.faults.saturating_sub(1);
            self.ctrlstat |= STICKYERR;
            self.phase = Phase::Discard;
            return ACK_FAULT;
        }

        self.phase = match header.rnw {
            RnW::R => Phase::ReadData(self.read(header)),
            RnW::W => Phase::WriteData(header),
        };
        ACK_OK
    }

    fn read(&mut self, header: RequestHeader) -> u32 {
        match (header.apndp, header.addr) {
            (APnDP::DP, 0x0) => IDCODE,
            (APnDP::DP, 0x4) if self.select & 1 != 0 => self.wcr,
            (APnDP::DP, 0x4) => {
                if self.ctrlstat & (CDBGPWRUPREQ | CSYSPWRUPREQ) != 0 {
                    self.power_reads = self.power_reads.saturating_add(1);
                    if self.power_reads >= self.power_up_delay {
                        self.ctrlstat |= CDBGPWRUPACK | CSYSPWRUPACK;
                    }
                }
                self.ctrlstat
            }
            // RESEND and RDBUFF
            (APnDP::DP, _) => self.rdbuff,
            (APnDP::AP, addr) => {
                // Posted: this read returns the previous AP read.
                let posted = self.rdbuff;
                self.rdbuff = self.ap_read(self.ap_address(addr));
                posted
            }
        }
    }

    fn write(&mut self, header: RequestHeader, value: u32) {
        match (header.apndp, header.addr) {
            (APnDP::DP, addr) => {
                self.dp_writes += 1;
                match addr {
                    0x0 => {
                        self.aborts += 1;
                        let clear = [
                            (1 << 1, STICKYCMP),
                            (1 << 2, STICKYERR),
                            (1 << 3, WDATAERR),
                            (1 << 4, STICKYORUN),
                        ];
                        for (bit, flag) in clear {
                            if value & bit != 0 {
                                self.ctrlstat &= !flag;
                            }
                        }
                    }
                    0x4 if self.select & 1 != 0 => self.wcr = value,
                    0x4 => {
                        let sticky = self.ctrlstat & !CTRLSTAT_RW;
                        self.ctrlstat = (value & CTRLSTAT_RW) | sticky;
                        if value & (CDBGPWRUPREQ | CSYSPWRUPREQ) == 0 {
                            self.ctrlstat &= !(CDBGPWRUPACK | CSYSPWRUPACK);
                        }
                        self.power_reads = 0;
                    }
                    0x8 => self.select = value,
                    _ => {}
                }
            }
            (APnDP::AP, addr) => {
                let addr = self.ap_address(addr);
                self.ap_write(addr, value);
            }
        }
    }

    fn ap_address(&self, addr: u8) -> u8 {
        (((self.select >> 4) & 0xF) as u8) << 4 | addr
    }

    fn ap_present(&self) -> bool {
        self.select >> 24 == 0
    }

    fn ap_read(&mut self, addr: u8) -> u32 {
        if !self.ap_present() {
            return 0;
        }
        match addr {
            0x00 => self.csw | 0x40,
            0x04 => self.tar,
            0x0C => {
                let value = self.mem_read_word(self.tar & !0x3);
                self.advance_tar();
                value
            }
            0x10..=0x1C => self.mem_read_word((self.tar & !0xF) | (addr as u32 & 0xC)),
            0xF4 => 0,
            0xF8 => AHB_AP_BASE,
            0xFC => AHB_AP_IDR,
            _ => 0,
        }
    }

    fn ap_write(&mut self, addr: u8, value: u32) {
        if !self.ap_present() {
            return;
        }
        match addr {
            0x00 => {
                self.csw_writes += 1;
                self.csw = value & !0xC0;
            }
            0x04 => {
                self.tar_writes += 1;
                self.tar = value;
            }
            0x0C => {
                self.last_drw_write = Some(value);
                let size = 1u32 << (self.csw & 0x7);
                self.mem_write(self.tar, value, size);
                self.advance_tar();
            }
            0x10..=0x1C => {
                let addr = (self.tar & !0xF) | (addr as u32 & 0xC);
                self.mem_write(addr, value, 4);
            }
            _ => {}
        }
    }

    fn advance_tar(&mut self) {
        if (self.csw >> 4) & 0x3 == 1 {
            let size = 1u32 << (self.csw & 0x7);
            let next = (self.tar & 0x3FF) + size;
            self.tar = (self.tar & !0x3FF) | (next & 0x3FF);
        }
    }

    fn mem_read_word(&self, addr: u32) -> u32 {
        match addr {
            CPUID => self.cpuid,
            DHCSR => self.dhcsr,
            _ => {
                let bytes = [0, 1, 2, 3].map(|i| *self.memory.get(&(addr + i)).unwrap_or(&0));
                u32::from_le_bytes(bytes)
            }
        }
    }

    fn mem_write(&mut self, addr: u32, value: u32, size: u32) {
        if addr & !0x3 == DHCSR {
            if value >> 16 == 0xA05F {
                let control = value & 0x3;
                self.dhcsr = control | if control & 0x2 != 0 { 1 << 17 } else { 0 };
            }
            return;
        }
        let lanes = value.to_le_bytes();
        for i in 0..size {
            let a = addr + i;
            self.memory.insert(a, lanes[(a % 4) as usize]);
        }
    }
}

impl Transport for FakeTarget {
    fn mosi_bits(&mut self, data: &[u8], bits: usize, _order: BitOrder) -> Result<usize> {
        self.expect_driver(Direction::Mosi)?;
        let mut buf = [0u8; 4];
        buf[..data.len()].copy_from_slice(data);
        let value = u32::from_le_bytes(buf);

        self.phase = match (self.phase, bits) {
            (Phase::Idle, 8) => {
                let byte = value as u8;
                match RequestHeader::try_from(byte) {
                    Ok(header) if self.swd => {
                        self.recent.clear();
                        self.request(header);
                        return Ok(bits);
                    }
                    Ok(_) => Phase::NoResponse,
                    Err(_) => {
                        self.control_byte(byte);
                        Phase::Idle
                    }
                }
            }
            (Phase::Idle, 1) => Phase::Idle,
            (Phase::WriteData(header), 32) => Phase::WriteParity(header, value),
            (Phase::WriteParity(header, data), 1) => {
                if parity_even(data) == (value & 1 != 0) {
                    self.write(header, data);
                } else {
                    self.ctrlstat |= WDATAERR;
                }
                Phase::Idle
            }
            (Phase::Discard, 32) => Phase::DiscardParity(value == 0),
            (Phase::DiscardParity(zero), 1) => {
                if zero && value & 1 == 0 {
                    self.zero_phases += 1;
                }
                Phase::Idle
            }
            _ => return Err(Error::Transport(-2)),
        };
        Ok(bits)
    }

    fn miso_bits(&mut self, data: &mut [u8], bits: usize, _order: BitOrder) -> Result<usize> {
        self.expect_driver(Direction::Miso)?;
        let (value, next) = match (self.phase, bits) {
            (Phase::NoResponse, 3) => (ACK_NONE as u32, Phase::Idle),
            (Phase::Ack(header), 3) => {
                let ack = self.ack(header);
                (ack as u32, self.phase)
            }
            (Phase::ReadData(value), 32) => (value, Phase::ReadParity(value)),
            (Phase::ReadParity(value), 1) => {
                let mut parity = parity_even(value);
                if self.bad_parities > 0 {
                    self.bad_parities -= 1;
                    parity = !parity;
                }
                (parity as u32, Phase::Idle)
            }
            // Nobody drives the line.
            _ => (u32::MAX, self.phase),
        };
        self.phase = next;
        let bytes = value.to_le_bytes();
        let n = data.len();
        data.copy_from_slice(&bytes[..n]);
        Ok(bits)
    }

    fn mosi_turnaround(&mut self, bits: usize) -> Result<usize> {
        if bits != self.turnaround {
            return Err(Error::Transport(-3));
        }
        self.driver = Direction::Mosi;
        Ok(bits)
    }

    fn miso_turnaround(&mut self, bits: usize) -> Result<usize> {
        if bits != self.turnaround {
            return Err(Error::Transport(-3));
        }
        self.driver = Direction::Miso;
        Ok(bits)
    }
}

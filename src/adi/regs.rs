//! Debug Port and Access Port register definitions (ADIv5).

use bitflags::bitflags;
use num_enum::{IntoPrimitive, TryFromPrimitive};

/// Debug Port register addresses. Several addresses name a different
/// register for reads and writes.
#[repr(u8)]
#[derive(Copy, Clone, Debug, PartialEq, Eq, TryFromPrimitive, IntoPrimitive)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum DpRegister {
    /// IDCODE on read, ABORT on write.
    IdcodeAbort = 0x0,
    /// CTRL/STAT, or WCR while `SELECT.CTRLSEL` is set.
    CtrlStat = 0x4,
    /// RESEND on read, SELECT on write.
    ResendSelect = 0x8,
    /// RDBUFF on read, ROUTESEL on write.
    RdbuffRoutesel = 0xC,
}

/// Memory Access Port registers, as full bank addresses.
#[repr(u8)]
#[derive(Copy, Clone, Debug, PartialEq, Eq, TryFromPrimitive, IntoPrimitive)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum MemApRegister {
    /// Control/Status Word.
    Csw = 0x00,
    /// Transfer Address.
    Tar = 0x04,
    /// Data Read/Write.
    Drw = 0x0C,
    /// Banked data 0, the word at `TAR & !0xF`.
    Bd0 = 0x10,
    /// Banked data 1.
    Bd1 = 0x14,
    /// Banked data 2.
    Bd2 = 0x18,
    /// Banked data 3.
    Bd3 = 0x1C,
    /// Configuration.
    Cfg = 0xF4,
    /// Debug base address.
    Base = 0xF8,
    /// Identification.
    Idr = 0xFC,
}

bitflags! {
    /// ABORT register, write only.
    pub struct Abort: u32 {
        /// Abort the current AP transaction.
        const DAPABORT = 1 << 0;
        /// Clear `CTRL/STAT.STICKYCMP`.
        const STKCMPCLR = 1 << 1;
        /// Clear `CTRL/STAT.STICKYERR`.
        const STKERRCLR = 1 << 2;
        /// Clear `CTRL/STAT.WDATAERR`.
        const WDERRCLR = 1 << 3;
        /// Clear `CTRL/STAT.STICKYORUN`.
        const ORUNERRCLR = 1 << 4;
        /// Every sticky flag clear bit.
        const ALL_CLEAR = Self::STKCMPCLR.bits
            | Self::STKERRCLR.bits
            | Self::WDERRCLR.bits
            | Self::ORUNERRCLR.bits;
    }
}

bitflags! {
    /// CTRL/STAT register.
    pub struct CtrlStat: u32 {
        /// Overrun detection enabled.
        const ORUNDETECT = 1 << 0;
        /// Sticky overrun.
        const STICKYORUN = 1 << 1;
        /// Sticky compare.
        const STICKYCMP = 1 << 4;
        /// Sticky error, set by a faulting AP transaction.
        const STICKYERR = 1 << 5;
        /// Last AP read or RDBUFF read was OK.
        const READOK = 1 << 6;
        /// Write data parity or framing error.
        const WDATAERR = 1 << 7;
        /// Debug reset request.
        const CDBGRSTREQ = 1 << 26;
        /// Debug reset acknowledge.
        const CDBGRSTACK = 1 << 27;
        /// Debug power request.
        const CDBGPWRUPREQ = 1 << 28;
        /// Debug power acknowledge.
        const CDBGPWRUPACK = 1 << 29;
        /// System power request.
        const CSYSPWRUPREQ = 1 << 30;
        /// System power acknowledge.
        const CSYSPWRUPACK = 1 << 31;
    }
}

impl CtrlStat {
    /// ABORT bits that clear the sticky flags set in `self`.
    pub fn clear_flags(self) -> Abort {
        let mut abort = Abort::empty();
        abort.set(Abort::ORUNERRCLR, self.contains(CtrlStat::STICKYORUN));
        abort.set(Abort::STKCMPCLR, self.contains(CtrlStat::STICKYCMP));
        abort.set(Abort::STKERRCLR, self.contains(CtrlStat::STICKYERR));
        abort.set(Abort::WDERRCLR, self.contains(CtrlStat::WDATAERR));
        abort
    }

    /// Both power domains acknowledge.
    pub fn powered(self) -> bool {
        self.contains(CtrlStat::CDBGPWRUPACK | CtrlStat::CSYSPWRUPACK)
    }
}

/// SELECT register: AP and bank selection.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Select(pub u32);

impl Select {
    const CTRLSEL: u32 = 1 << 0;
    const APBANKSEL_SHIFT: u32 = 4;
    const APBANKSEL_MASK: u32 = 0xF << Self::APBANKSEL_SHIFT;
    const APSEL_SHIFT: u32 = 24;
    const APSEL_MASK: u32 = 0xFF << Self::APSEL_SHIFT;

    /// Selected access port.
    pub fn apsel(self) -> u8 {
        (self.0 >> Self::APSEL_SHIFT) as u8
    }

    /// Select access port `ap`.
    pub fn set_apsel(&mut self, ap: u8) {
        self.0 = (self.0 & !Self::APSEL_MASK) | ((ap as u32) << Self::APSEL_SHIFT);
    }

    /// Selected AP register bank, address bits `[7:4]`.
    pub fn apbanksel(self) -> u8 {
        ((self.0 & Self::APBANKSEL_MASK) >> Self::APBANKSEL_SHIFT) as u8
    }

    /// Select AP register bank `bank`.
    pub fn set_apbanksel(&mut self, bank: u8) {
        self.0 = (self.0 & !Self::APBANKSEL_MASK)
            | (((bank & 0xF) as u32) << Self::APBANKSEL_SHIFT);
    }

    /// Whether DP address `0x4` maps to WCR instead of CTRL/STAT.
    pub fn ctrlsel(self) -> bool {
        self.0 & Self::CTRLSEL != 0
    }

    /// Map DP address `0x4` to WCR when set.
    pub fn set_ctrlsel(&mut self, ctrlsel: bool) {
        if ctrlsel {
            self.0 |= Self::CTRLSEL;
        } else {
            self.0 &= !Self::CTRLSEL;
        }
    }
}

/// MEM-AP Control/Status Word.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Csw(pub u32);

impl Csw {
    const SIZE_MASK: u32 = 0x7;
    const ADDRINC_SHIFT: u32 = 4;
    const ADDRINC_MASK: u32 = 0x3 << Self::ADDRINC_SHIFT;
    /// Privileged data access, HPROT master type bits.
    const PROT_DEFAULT: u32 = 0x23 << 24;
    /// Debug software access enable.
    pub const DBGSWENABLE: u32 = 1 << 31;
    /// Access to the memory system enabled, read only.
    pub const DEVICEEN: u32 = 1 << 6;
    /// A transfer is in progress, read only.
    pub const TRINPROG: u32 = 1 << 7;

    /// A CSW for `size` accesses, with the debug enable and protection
    /// bits every access of this engine carries.
    pub fn new(size: u8, addr_inc: AddrInc) -> Self {
        let mut csw = Csw(Self::DBGSWENABLE | Self::PROT_DEFAULT);
        csw.set_size(size);
        csw.set_addr_inc(addr_inc);
        csw
    }

    /// Access size field, `log2` of the byte count.
    pub fn size(self) -> u8 {
        (self.0 & Self::SIZE_MASK) as u8
    }

    /// Set the access size field.
    pub fn set_size(&mut self, size: u8) {
        self.0 = (self.0 & !Self::SIZE_MASK) | (size as u32 & Self::SIZE_MASK);
    }

    /// Address auto-increment mode.
    pub fn addr_inc(self) -> AddrInc {
        match (self.0 & Self::ADDRINC_MASK) >> Self::ADDRINC_SHIFT {
            0 => AddrInc::Off,
            1 => AddrInc::Single,
            _ => AddrInc::Packed,
        }
    }

    /// Set the address auto-increment mode.
    pub fn set_addr_inc(&mut self, inc: AddrInc) {
        self.0 = (self.0 & !Self::ADDRINC_MASK) | ((inc as u32) << Self::ADDRINC_SHIFT);
    }
}

/// CSW address increment mode.
#[repr(u8)]
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum AddrInc {
    /// TAR stays put.
    Off = 0,
    /// TAR advances by the access size after each DRW access.
    Single = 1,
    /// Packed transfers, not used by this crate.
    Packed = 2,
}

/// AP Identification Register.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Idr(pub u32);

impl Idr {
    /// CLASS value of a MEM-AP.
    pub const CLASS_MEM_AP: u8 = 0x8;

    /// AP revision.
    pub fn revision(self) -> u8 {
        (self.0 >> 28) as u8
    }

    /// JEP106 designer code, `0x23B` for Arm.
    pub fn designer(self) -> u16 {
        ((self.0 >> 17) & 0x7FF) as u16
    }

    /// AP class, see [`Idr::CLASS_MEM_AP`].
    pub fn class(self) -> u8 {
        ((self.0 >> 13) & 0xF) as u8
    }

    /// Implementation variant.
    pub fn variant(self) -> u8 {
        ((self.0 >> 4) & 0xF) as u8
    }

    /// AP type within its class, `0x1` is an AHB-AP.
    pub fn ap_type(self) -> u8 {
        (self.0 & 0xF) as u8
    }

    /// Whether the AP is an Arm MEM-AP.
    pub fn is_mem_ap(self) -> bool {
        self.0 != 0 && self.class() == Self::CLASS_MEM_AP
    }
}

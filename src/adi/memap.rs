//! Memory access through a MEM-AP.
//!
//! Accesses narrower than a word use byte lanes: the byte at `addr` travels
//! in bits `[8 * (addr % 4) + 7 : 8 * (addr % 4)]` of DRW. CSW and TAR are
//! only written when the cached value differs from what an access needs.

use embedded_hal::delay::DelayNs;
use num_enum::{IntoPrimitive, TryFromPrimitive};

use super::regs::{AddrInc, Csw, Idr, MemApRegister};
use crate::bits::low_mask;
use crate::context::{Context, DapState};
use crate::swd::{Error, Result};
use crate::transport::Transport;

/// Auto increment never carries past a 1 KiB boundary.
pub const TAR_WRAP: u32 = 0x400;

/// Width of one MEM-AP access, in bytes.
#[repr(u8)]
#[derive(Copy, Clone, Debug, PartialEq, Eq, TryFromPrimitive, IntoPrimitive)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum AccessSize {
    /// 8 bits.
    Byte = 1,
    /// 16 bits.
    Half = 2,
    /// 32 bits.
    Word = 4,
}

impl AccessSize {
    /// Build from a byte count, failing for anything but 1, 2 or 4.
    pub fn from_bytes(bytes: u8) -> Result<Self> {
        Self::try_from(bytes).map_err(|_| Error::InvalidAccessSize(bytes))
    }

    /// Bytes moved per access.
    pub fn bytes(self) -> u32 {
        self as u32
    }

    /// The CSW.Size encoding.
    pub fn csw_size(self) -> u8 {
        match self {
            AccessSize::Byte => 0,
            AccessSize::Half => 1,
            AccessSize::Word => 2,
        }
    }

    fn mask(self) -> u32 {
        low_mask(8 * self as u8)
    }
}

/// How block accesses program TAR.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum AddressingMode {
    /// Write TAR before every access, CSW auto increment off.
    Manual,
    /// Let the MEM-AP advance TAR, rewriting it only at 1 KiB boundaries.
    AutoIncrement,
}

impl AddressingMode {
    fn addr_inc(self) -> AddrInc {
        match self {
            AddressingMode::Manual => AddrInc::Off,
            AddressingMode::AutoIncrement => AddrInc::Single,
        }
    }
}

fn lane_shift(addr: u32) -> u32 {
    8 * (addr % 4)
}

impl<T, D> Context<T, D>
where
    T: Transport,
    D: DelayNs,
{
    /// Identify the selected AP as a MEM-AP and program a word sized CSW.
    ///
    /// Returns the AP's IDR.
    pub fn memap_init(&mut self) -> Result<u32> {
        self.require(DapState::Powered)?;

        let idr = self.ap_read(MemApRegister::Idr.into())?;
        if !Idr(idr).is_mem_ap() {
            log_at!(self, Error, "AP IDR {:#x} is not a MEM-AP", idr);
            return Err(Error::NotMemAp(idr));
        }
        let base = self.ap_read(MemApRegister::Base.into())?;
        let cfg = self.ap_read(MemApRegister::Cfg.into())?;
        self.ap_read(MemApRegister::Csw.into())?;
        // CSW reads back status bits, so the cached value cannot match a write.
        self.cache.ap.csw = None;
        self.cache.ap.tar = None;

        let csw = Csw::new(AccessSize::Word.csw_size(), self.config.addressing.addr_inc());
        self.ap_write(MemApRegister::Csw.into(), csw.0)?;

        log_at!(
            self,
            Normal,
            "MEM-AP IDR {:#x} BASE {:#x} CFG {:#x}",
            idr,
            base,
            cfg
        );
        self.state = self.state.max(DapState::MemApConfigured);
        Ok(idr)
    }

    /// Program CSW and TAR, skipping writes of values the MEM-AP already
    /// holds. The debug enable and protection bits are always set in CSW.
    pub fn memap_setup(&mut self, csw: u32, tar: u32) -> Result<()> {
        self.require(DapState::MemApConfigured)?;
        let mut full = Csw::new(0, AddrInc::Off);
        full.0 |= csw;

        if self.cache.ap.csw != Some(full.0) {
            self.ap_write(MemApRegister::Csw.into(), full.0)?;
        }
        if self.cache.ap.tar != Some(tar) {
            self.ap_write(MemApRegister::Tar.into(), tar)?;
        }
        Ok(())
    }

    /// Read `data.len()` bytes starting at `addr`, in `size` accesses.
    pub fn memap_read_char(&mut self, addr: u32, data: &mut [u8], size: AccessSize) -> Result<()> {
        self.check_block(addr, data.len(), size)?;
        let step = size.bytes() as usize;
        for (i, chunk) in data.chunks_exact_mut(step).enumerate() {
            let a = addr.wrapping_add((i * step) as u32);
            let value = self.memap_access_read(a, size)?;
            let bytes = (value >> lane_shift(a)).to_le_bytes();
            chunk.copy_from_slice(&bytes[..step]);
        }
        Ok(())
    }

    /// Write `data` starting at `addr`, in `size` accesses.
    pub fn memap_write_char(&mut self, addr: u32, data: &[u8], size: AccessSize) -> Result<()> {
        self.check_block(addr, data.len(), size)?;
        let step = size.bytes() as usize;
        for (i, chunk) in data.chunks_exact(step).enumerate() {
            let a = addr.wrapping_add((i * step) as u32);
            let mut bytes = [0u8; 4];
            bytes[..step].copy_from_slice(chunk);
            self.memap_access_write(a, u32::from_le_bytes(bytes), size)?;
        }
        Ok(())
    }

    /// Read one `size` value per element of `data` starting at `addr`. Each
    /// value lands right aligned in its element.
    pub fn memap_read_int(&mut self, addr: u32, data: &mut [u32], size: AccessSize) -> Result<()> {
        self.check_block(addr, data.len() * size.bytes() as usize, size)?;
        for (i, slot) in data.iter_mut().enumerate() {
            let a = addr.wrapping_add(i as u32 * size.bytes());
            let value = self.memap_access_read(a, size)?;
            *slot = (value >> lane_shift(a)) & size.mask();
        }
        Ok(())
    }

    /// Write the low `size` bytes of every element of `data` starting at
    /// `addr`.
    pub fn memap_write_int(&mut self, addr: u32, data: &[u32], size: AccessSize) -> Result<()> {
        self.check_block(addr, data.len() * size.bytes() as usize, size)?;
        for (i, &value) in data.iter().enumerate() {
            let a = addr.wrapping_add(i as u32 * size.bytes());
            self.memap_access_write(a, value & size.mask(), size)?;
        }
        Ok(())
    }

    /// Read the word at `addr`.
    pub fn memap_read_word(&mut self, addr: u32) -> Result<u32> {
        let mut word = [0];
        self.memap_read_int(addr, &mut word, AccessSize::Word)?;
        Ok(word[0])
    }

    /// Write the word at `addr`.
    pub fn memap_write_word(&mut self, addr: u32, value: u32) -> Result<()> {
        self.memap_write_int(addr, &[value], AccessSize::Word)
    }

    fn check_block(&self, addr: u32, len: usize, size: AccessSize) -> Result<()> {
        self.require(DapState::MemApConfigured)?;
        if len == 0 || len % size.bytes() as usize != 0 || addr % size.bytes() != 0 {
            return Err(Error::InvalidArgument);
        }
        Ok(())
    }

    /// Program CSW and TAR for one access at `addr`.
    fn memap_prepare(&mut self, addr: u32, size: AccessSize) -> Result<()> {
        let mode = self.config.addressing;
        let csw = Csw::new(size.csw_size(), mode.addr_inc());
        if mode == AddressingMode::Manual {
            self.cache.ap.tar = None;
        }
        self.memap_setup(csw.0, addr)
    }

    /// Track where TAR went after a DRW access at `addr`.
    fn memap_advance(&mut self, addr: u32, size: AccessSize) {
        self.cache.ap.tar = match self.config.addressing {
            AddressingMode::Manual => Some(addr),
            AddressingMode::AutoIncrement => {
                let next = addr.wrapping_add(size.bytes());
                // Past the boundary the MEM-AP wraps within the old block.
                (next % TAR_WRAP != 0).then_some(next)
            }
        };
    }

    fn memap_access_read(&mut self, addr: u32, size: AccessSize) -> Result<u32> {
        self.memap_prepare(addr, size)?;
        let result = self.ap_read(MemApRegister::Drw.into());
        self.memap_settle(addr, size, result.is_ok());
        result
    }

    fn memap_access_write(&mut self, addr: u32, value: u32, size: AccessSize) -> Result<()> {
        self.memap_prepare(addr, size)?;
        let result = self.ap_write(MemApRegister::Drw.into(), value << lane_shift(addr));
        self.memap_settle(addr, size, result.is_ok());
        result
    }

    fn memap_settle(&mut self, addr: u32, size: AccessSize, ok: bool) {
        if ok {
            self.memap_advance(addr, size);
        } else {
            // A failed access may or may not have moved TAR.
            self.cache.ap.tar = None;
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::context::Config;
    use crate::fake_target::FakeTarget;
    use crate::mock_device::StdDelayUs;

    type TestContext = Context<FakeTarget, StdDelayUs>;

    fn configured(addressing: AddressingMode) -> TestContext {
        let config = Config {
            addressing,
            ..Config::default()
        };
        let mut ctx = Context::new(FakeTarget::new(), StdDelayUs {}, config).unwrap();
        ctx.dap_init().unwrap();
        ctx.dp_power_up().unwrap();
        ctx.memap_init().unwrap();
        ctx
    }

    #[test]
    fn init_identifies_mem_ap() {
        let ctx = configured(AddressingMode::AutoIncrement);
        assert_eq!(ctx.state(), DapState::MemApConfigured);
        assert_eq!(ctx.cache().ap.idr, Some(0x2477_0011));
        assert_eq!(ctx.cache().ap.base, Some(0xE00F_F003));
        assert_eq!(ctx.transport().csw() & 0x7, 2);
    }

    #[test]
    fn init_rejects_other_aps() {
        let mut ctx = Context::new(FakeTarget::new(), StdDelayUs {}, Config::default()).unwrap();
        ctx.dap_init().unwrap();
        ctx.dp_power_up().unwrap();
        ctx.ap_select(2).unwrap();
        assert_eq!(ctx.memap_init(), Err(Error::NotMemAp(0)));
        assert_eq!(ctx.state(), DapState::Powered);
    }

    #[test]
    fn memory_ops_need_config() {
        let mut ctx = Context::new(FakeTarget::new(), StdDelayUs {}, Config::default()).unwrap();
        ctx.dap_init().unwrap();
        ctx.dp_power_up().unwrap();
        assert_eq!(ctx.memap_read_word(0x2000_0000), Err(Error::NotReady));
    }

    #[test]
    fn word_round_trip() {
        let mut ctx = configured(AddressingMode::AutoIncrement);
        ctx.memap_write_word(0x2000_0000, 0xDEAD_BEEF).unwrap();
        assert_eq!(ctx.memap_read_word(0x2000_0000), Ok(0xDEAD_BEEF));
    }

    #[test]
    fn byte_lanes() {
        let mut ctx = configured(AddressingMode::AutoIncrement);
        ctx.memap_write_word(0x1000, 0x1122_3344).unwrap();

        let mut byte = [0u8; 1];
        ctx.memap_read_char(0x1002, &mut byte, AccessSize::Byte)
            .unwrap();
        assert_eq!(byte, [0x22]);

        ctx.memap_write_char(0x1002, &[0xAB], AccessSize::Byte)
            .unwrap();
        assert_eq!(ctx.transport().last_drw_write(), Some(0x00AB_0000));
        assert_eq!(ctx.memap_read_word(0x1000), Ok(0x11AB_3344));

        let mut half = [0u32; 1];
        ctx.memap_read_int(0x1002, &mut half, AccessSize::Half)
            .unwrap();
        assert_eq!(half, [0x11AB]);
    }

    #[test]
    fn bytes_in_every_lane() {
        let mut ctx = configured(AddressingMode::AutoIncrement);
        let pattern = [0x01, 0x02, 0x03, 0x04, 0x05, 0x06];
        ctx.memap_write_char(0x2000_0001, &pattern, AccessSize::Byte)
            .unwrap();

        let mut back = [0u8; 6];
        ctx.memap_read_char(0x2000_0001, &mut back, AccessSize::Byte)
            .unwrap();
        assert_eq!(back, pattern);
        assert_eq!(ctx.memap_read_word(0x2000_0004), Ok(0x0006_0504));
    }

    #[test]
    fn halfwords_as_ints() {
        let mut ctx = configured(AddressingMode::AutoIncrement);
        ctx.memap_write_int(0x2000_0100, &[0xAAAA_1234, 0x5678], AccessSize::Half)
            .unwrap();
        assert_eq!(ctx.memap_read_word(0x2000_0100), Ok(0x5678_1234));

        let mut back = [0u32; 2];
        ctx.memap_read_int(0x2000_0100, &mut back, AccessSize::Half)
            .unwrap();
        assert_eq!(back, [0x1234, 0x5678]);
    }

    #[test]
    fn auto_increment_skips_tar_writes() {
        let mut ctx = configured(AddressingMode::AutoIncrement);
        let words: Vec<u32> = (0..8).collect();
        ctx.memap_write_int(0x2000_0000, &words, AccessSize::Word)
            .unwrap();
        assert_eq!(ctx.transport().tar_writes(), 1);

        let mut back = [0u32; 8];
        ctx.memap_read_int(0x2000_0000, &mut back, AccessSize::Word)
            .unwrap();
        assert_eq!(&back[..], &words[..]);
        assert_eq!(ctx.transport().tar_writes(), 2);
    }

    #[test]
    fn auto_increment_rewrites_tar_at_boundary() {
        let mut ctx = configured(AddressingMode::AutoIncrement);
        let words = [1u32, 2, 3, 4];
        ctx.memap_write_int(0x2000_03F8, &words, AccessSize::Word)
            .unwrap();
        assert_eq!(ctx.transport().tar_writes(), 2);
        assert_eq!(ctx.memap_read_word(0x2000_0400), Ok(3));
        assert_eq!(ctx.memap_read_word(0x2000_0000), Ok(0));
    }

    #[test]
    fn manual_mode_writes_tar_every_access() {
        let mut ctx = configured(AddressingMode::Manual);
        let words = [1u32, 2, 3];
        ctx.memap_write_int(0x2000_0000, &words, AccessSize::Word)
            .unwrap();
        assert_eq!(ctx.transport().tar_writes(), 3);
        assert_eq!(ctx.transport().csw() & 0x30, 0);

        let mut back = [0u32; 3];
        ctx.memap_read_int(0x2000_0000, &mut back, AccessSize::Word)
            .unwrap();
        assert_eq!(back, words);
    }

    #[test]
    fn csw_written_once_per_size() {
        let mut ctx = configured(AddressingMode::AutoIncrement);
        let before = ctx.transport().csw_writes();
        ctx.memap_read_word(0x2000_0000).unwrap();
        ctx.memap_read_word(0x2000_0004).unwrap();
        assert_eq!(ctx.transport().csw_writes(), before);

        let mut b = [0u8; 1];
        ctx.memap_read_char(0x2000_0008, &mut b, AccessSize::Byte)
            .unwrap();
        ctx.memap_read_word(0x2000_000C).unwrap();
        assert_eq!(ctx.transport().csw_writes(), before + 2);
    }

    #[test]
    fn rejects_misaligned_and_empty() {
        let mut ctx = configured(AddressingMode::AutoIncrement);
        let mut buf = [0u8; 3];
        assert_eq!(
            ctx.memap_read_char(0x2000_0000, &mut buf, AccessSize::Half),
            Err(Error::InvalidArgument)
        );
        assert_eq!(
            ctx.memap_write_word(0x2000_0002, 0),
            Err(Error::InvalidArgument)
        );
        assert_eq!(
            ctx.memap_write_char(0x2000_0000, &[], AccessSize::Byte),
            Err(Error::InvalidArgument)
        );
        assert_eq!(AccessSize::from_bytes(3), Err(Error::InvalidAccessSize(3)));
    }

    #[test]
    fn memory_survives_waits_with_autofix() {
        let mut ctx = configured(AddressingMode::AutoIncrement);
        ctx.set_autofix(true);
        ctx.transport_mut().inject_waits(2);
        ctx.memap_write_word(0x2000_0040, 0xCAFE_F00D).unwrap();
        ctx.transport_mut().inject_waits(3);
        assert_eq!(ctx.memap_read_word(0x2000_0040), Ok(0xCAFE_F00D));
    }
}

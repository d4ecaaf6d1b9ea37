//! Cortex-M core identification and halt control.

use embedded_hal::delay::DelayNs;
use num_enum::{IntoPrimitive, TryFromPrimitive};

use crate::context::{Context, DapState};
use crate::swd::{Error, Result};
use crate::transport::Transport;

/// CPUID Base Register.
pub const CPUID: u32 = 0xE000_ED00;
/// Debug Halting Control and Status Register.
pub const DHCSR: u32 = 0xE000_EDF0;

/// Key that must accompany every DHCSR write.
const DBGKEY: u32 = 0xA05F << 16;
const C_DEBUGEN: u32 = 1 << 0;
const C_HALT: u32 = 1 << 1;
const S_HALT: u32 = 1 << 17;

const ARM_IMPLEMENTER: u8 = 0x41;
const HALT_POLL_US: u32 = 100;

/// Cortex-M part numbers from CPUID.PARTNO.
#[repr(u16)]
#[derive(Copy, Clone, Debug, PartialEq, Eq, TryFromPrimitive, IntoPrimitive)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[allow(missing_docs)]
pub enum CortexPart {
    M0 = 0xC20,
    M1 = 0xC21,
    M3 = 0xC23,
    M4 = 0xC24,
    M7 = 0xC27,
    M0Plus = 0xC60,
    M23 = 0xD20,
    M33 = 0xD21,
    M55 = 0xD22,
}

/// CPUID register fields.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct CpuId(pub u32);

impl CpuId {
    /// 0x41 for Arm.
    pub fn implementer(self) -> u8 {
        (self.0 >> 24) as u8
    }

    /// Major revision.
    pub fn variant(self) -> u8 {
        ((self.0 >> 20) & 0xF) as u8
    }

    /// Part number, see [`CortexPart`].
    pub fn partno(self) -> u16 {
        ((self.0 >> 4) & 0xFFF) as u16
    }

    /// Minor revision.
    pub fn revision(self) -> u8 {
        (self.0 & 0xF) as u8
    }

    /// The core this CPUID describes, if it is a known Arm Cortex-M.
    pub fn part(self) -> Option<CortexPart> {
        if self.implementer() != ARM_IMPLEMENTER {
            return None;
        }
        CortexPart::try_from(self.partno()).ok()
    }
}

impl<T, D> Context<T, D>
where
    T: Transport,
    D: DelayNs,
{
    /// Read CPUID and DHCSR to find out which core sits behind the MEM-AP and
    /// whether it is halted.
    pub fn debug_init(&mut self) -> Result<CortexPart> {
        self.require(DapState::MemApConfigured)?;
        let cpuid = self.memap_read_word(CPUID)?;
        self.cache.cpuid = Some(cpuid);

        let Some(part) = CpuId(cpuid).part() else {
            log_at!(self, Error, "unknown CPUID {:#x}", cpuid);
            return Err(Error::UnknownCpu(cpuid));
        };
        log_at!(
            self,
            Normal,
            "found Cortex-{:?} r{}p{}",
            part,
            CpuId(cpuid).variant(),
            CpuId(cpuid).revision()
        );

        self.state = DapState::DebugDetected;
        self.debug_is_halted()?;
        Ok(part)
    }

    /// Request a halt and wait for the core to report it.
    pub fn debug_halt(&mut self) -> Result<()> {
        self.require(DapState::DebugDetected)?;
        self.memap_write_word(DHCSR, DBGKEY | C_HALT | C_DEBUGEN)?;
        self.debug_wait_halted(true)
    }

    /// Let the core run, keeping halting debug enabled.
    pub fn debug_run(&mut self) -> Result<()> {
        self.require(DapState::DebugDetected)?;
        self.memap_write_word(DHCSR, DBGKEY | C_DEBUGEN)?;
        self.debug_wait_halted(false)
    }

    /// Whether the core reports S_HALT.
    pub fn debug_is_halted(&mut self) -> Result<bool> {
        self.require(DapState::DebugDetected)?;
        let halted = self.memap_read_word(DHCSR)? & S_HALT != 0;
        self.state = if halted {
            DapState::Halted
        } else {
            DapState::Running
        };
        Ok(halted)
    }

    fn debug_wait_halted(&mut self, halted: bool) -> Result<()> {
        for _ in 0..self.config.power_up_retries {
            if self.debug_is_halted()? == halted {
                log_at!(self, Info, "core {}", if halted { "halted" } else { "running" });
                return Ok(());
            }
            self.delay.delay_us(HALT_POLL_US);
        }
        log_at!(self, Error, "core did not change halt state");
        Err(Error::HaltTimeout)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::context::Config;
    use crate::fake_target::FakeTarget;
    use crate::mock_device::StdDelayUs;

    type TestContext = Context<FakeTarget, StdDelayUs>;

    fn configured() -> TestContext {
        let mut ctx = Context::new(FakeTarget::new(), StdDelayUs {}, Config::default()).unwrap();
        ctx.dap_init().unwrap();
        ctx.dp_power_up().unwrap();
        ctx.memap_init().unwrap();
        ctx
    }

    #[test]
    fn cpuid_fields() {
        let cpuid = CpuId(0x410F_C241);
        assert_eq!(cpuid.implementer(), 0x41);
        assert_eq!(cpuid.variant(), 0);
        assert_eq!(cpuid.partno(), 0xC24);
        assert_eq!(cpuid.revision(), 1);
        assert_eq!(cpuid.part(), Some(CortexPart::M4));
        assert_eq!(CpuId(0x410C_C601).part(), Some(CortexPart::M0Plus));
        assert_eq!(CpuId(0x000F_C241).part(), None);
    }

    #[test]
    fn detects_cortex_m4() {
        let mut ctx = configured();
        assert_eq!(ctx.debug_init(), Ok(CortexPart::M4));
        assert_eq!(ctx.cache().cpuid, Some(0x410F_C241));
        assert_eq!(ctx.state(), DapState::Running);
    }

    #[test]
    fn unknown_core() {
        let mut ctx = configured();
        ctx.transport_mut().set_cpuid(0x4100_1231);
        assert_eq!(ctx.debug_init(), Err(Error::UnknownCpu(0x4100_1231)));
        assert_eq!(ctx.state(), DapState::MemApConfigured);
    }

    #[test]
    fn halt_and_run() {
        let mut ctx = configured();
        ctx.debug_init().unwrap();

        ctx.debug_halt().unwrap();
        assert_eq!(ctx.state(), DapState::Halted);
        assert_eq!(ctx.debug_is_halted(), Ok(true));

        ctx.debug_run().unwrap();
        assert_eq!(ctx.state(), DapState::Running);
        assert_eq!(ctx.debug_is_halted(), Ok(false));
    }

    #[test]
    fn halt_needs_detection() {
        let mut ctx = configured();
        assert_eq!(ctx.debug_halt(), Err(Error::NotReady));
    }
}

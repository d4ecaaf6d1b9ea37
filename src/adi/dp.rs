use embedded_hal::delay::DelayNs;

use super::regs::{Abort, CtrlStat, DpRegister, Select};
use crate::bus::Operation;
use crate::context::{Context, DapState, RegisterCache};
use crate::swd::{check_address, APnDP, Error, RequestHeader, Result, RnW};
use crate::swj::Sequence;
use crate::transport::Transport;

/// Polling interval while waiting for power acknowledges.
const POWER_UP_POLL_US: u32 = 100;

impl<T, D> Context<T, D>
where
    T: Transport,
    D: DelayNs,
{
    /// Read a Debug Port register.
    pub fn dp_read(&mut self, addr: u8) -> Result<u32> {
        check_address(addr)?;
        let header = RequestHeader {
            apndp: APnDP::DP,
            rnw: RnW::R,
            addr,
        };
        let value = self.transfer(header, 0)?.data;
        log_at!(self, Info, "DP read {:#x} = {:#x}", addr, value);

        let ctrlsel = self.cached_select().ctrlsel();
        let dp = &mut self.cache.dp;
        match DpRegister::try_from(addr).map_err(|_| Error::InvalidAddress(addr))? {
            DpRegister::IdcodeAbort => dp.idcode = Some(value),
            DpRegister::CtrlStat if ctrlsel => dp.wcr = Some(value),
            DpRegister::CtrlStat => dp.ctrlstat = Some(value),
            DpRegister::ResendSelect => dp.resend = Some(value),
            DpRegister::RdbuffRoutesel => dp.rdbuff = Some(value),
        }
        Ok(value)
    }

    /// Write a Debug Port register.
    pub fn dp_write(&mut self, addr: u8, value: u32) -> Result<()> {
        check_address(addr)?;
        let header = RequestHeader {
            apndp: APnDP::DP,
            rnw: RnW::W,
            addr,
        };
        let ctrlsel = self.cached_select().ctrlsel();
        let register = DpRegister::try_from(addr).map_err(|_| Error::InvalidAddress(addr))?;
        if register == DpRegister::ResendSelect {
            // An interrupted SELECT write leaves the target selection unknown.
            self.cache.dp.select = None;
        }

        self.transfer(header, value)?;
        log_at!(self, Info, "DP write {:#x} = {:#x}", addr, value);

        let dp = &mut self.cache.dp;
        match register {
            DpRegister::IdcodeAbort => dp.abort = Some(value),
            DpRegister::CtrlStat if ctrlsel => dp.wcr = Some(value),
            DpRegister::CtrlStat => dp.ctrlstat = Some(value),
            DpRegister::ResendSelect => dp.select = Some(value),
            DpRegister::RdbuffRoutesel => dp.routesel = Some(value),
        }
        Ok(())
    }

    /// Read IDCODE.
    pub fn dp_read_idcode(&mut self) -> Result<u32> {
        self.dp_read(DpRegister::IdcodeAbort.into())
    }

    /// Read CTRL/STAT, clearing `SELECT.CTRLSEL` first if needed.
    pub fn dp_read_ctrlstat(&mut self) -> Result<CtrlStat> {
        self.dp_select_ctrlsel(false)?;
        self.dp_read(DpRegister::CtrlStat.into())
            .map(CtrlStat::from_bits_truncate)
    }

    /// Write CTRL/STAT, clearing `SELECT.CTRLSEL` first if needed.
    pub fn dp_write_ctrlstat(&mut self, value: CtrlStat) -> Result<()> {
        self.dp_select_ctrlsel(false)?;
        self.dp_write(DpRegister::CtrlStat.into(), value.bits())
    }

    /// Write ABORT.
    pub fn dp_write_abort(&mut self, abort: Abort) -> Result<()> {
        self.dp_write(DpRegister::IdcodeAbort.into(), abort.bits())
    }

    /// Write SELECT unless the target is known to hold `select` already.
    pub fn dp_write_select(&mut self, select: Select) -> Result<()> {
        if self.cache.dp.select == Some(select.0) {
            return Ok(());
        }
        self.dp_write(DpRegister::ResendSelect.into(), select.0)
    }

    /// Clear the sticky error flags reported by CTRL/STAT.
    ///
    /// Returns the ABORT bits that were written, empty when nothing was set.
    pub fn dp_clear_errors(&mut self) -> Result<Abort> {
        let status = self.dp_read_ctrlstat()?;
        let abort = status.clear_flags();
        if !abort.is_empty() {
            log_at!(self, Warning, "clearing sticky flags {:#x}", status.bits());
            self.dp_write_abort(abort)?;
        }
        Ok(abort)
    }

    /// Request debug and system power and wait for both acknowledges.
    pub fn dp_power_up(&mut self) -> Result<CtrlStat> {
        self.require(DapState::Selected)?;
        self.dp_write_abort(Abort::ALL_CLEAR)?;
        self.dp_write_select(Select::default())?;
        self.dp_write_ctrlstat(CtrlStat::CDBGPWRUPREQ | CtrlStat::CSYSPWRUPREQ)?;

        for _ in 0..self.config.power_up_retries {
            let status = self.dp_read_ctrlstat()?;
            if status.powered() {
                log_at!(self, Normal, "debug power up acknowledged");
                self.state = self.state.max(DapState::Powered);
                return Ok(status);
            }
            self.delay.delay_us(POWER_UP_POLL_US);
        }

        log_at!(self, Error, "debug power up not acknowledged");
        Err(Error::PowerUpFailed)
    }

    /// Switch the target to SWD, reset the line and read IDCODE.
    ///
    /// Forgets every cached register value first; the target may have been
    /// reset or switched by someone else.
    pub fn dap_init(&mut self) -> Result<u32> {
        self.queue.clear();
        self.cache = RegisterCache::default();
        self.state = DapState::Uninitialized;

        self.bus_write_sequence(Sequence::JtagToSwd, Operation::Enqueue)?;
        self.bus_write_sequence(Sequence::LineReset, Operation::Enqueue)?;
        let idcode = self.dp_read_idcode()?;

        log_at!(self, Normal, "DAP selected, IDCODE {:#x}", idcode);
        self.state = DapState::Selected;
        Ok(idcode)
    }

    /// Line reset without the protocol switch, then read IDCODE.
    ///
    /// The DP keeps its SELECT and power state over a line reset, so only
    /// the bus level cache is dropped.
    pub fn dap_reset(&mut self) -> Result<u32> {
        self.queue.trim_executed();
        self.cache.bus = Default::default();

        self.bus_write_sequence(Sequence::LineReset, Operation::Enqueue)?;
        let idcode = self.dp_read_idcode()?;

        log_at!(self, Normal, "line reset, IDCODE {:#x}", idcode);
        self.state = self.state.max(DapState::Selected);
        Ok(idcode)
    }

    /// Hand the target back to JTAG.
    pub fn swd_to_jtag(&mut self) -> Result<()> {
        self.queue.trim_executed();
        self.bus_write_sequence(Sequence::SwdToJtag, Operation::Execute)?;
        self.cache = RegisterCache::default();
        self.state = DapState::Uninitialized;
        log_at!(self, Normal, "switched to JTAG");
        Ok(())
    }

    pub(crate) fn cached_select(&self) -> Select {
        Select(self.cache.dp.select.unwrap_or(0))
    }

    fn dp_select_ctrlsel(&mut self, ctrlsel: bool) -> Result<()> {
        let known = self.cache.dp.select.is_some();
        let mut select = self.cached_select();
        if known && select.ctrlsel() == ctrlsel {
            return Ok(());
        }
        // Unknown SELECT contents are rewritten, CTRLSEL may be set.
        select.set_ctrlsel(ctrlsel);
        self.dp_write(DpRegister::ResendSelect.into(), select.0)
    }
}

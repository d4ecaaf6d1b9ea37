use embedded_hal::delay::DelayNs;

use super::regs::{DpRegister, MemApRegister};
use crate::context::{ApCache, Context, DapState};
use crate::swd::{APnDP, Error, RequestHeader, Result, RnW};
use crate::transport::Transport;

impl<T, D> Context<T, D>
where
    T: Transport,
    D: DelayNs,
{
    /// Select access port `ap`, keeping the current bank.
    ///
    /// Changing the port forgets the cached AP registers.
    pub fn ap_select(&mut self, ap: u8) -> Result<()> {
        let mut select = self.cached_select();
        if self.cache.dp.select.is_some() && select.apsel() == ap {
            return Ok(());
        }
        select.set_apsel(ap);
        self.dp_write_select(select)?;
        self.cache.ap = ApCache::default();
        log_at!(self, Info, "AP {} selected", ap);
        Ok(())
    }

    /// Select the register bank holding AP address `addr`.
    pub fn ap_bank_select(&mut self, addr: u8) -> Result<()> {
        let mut select = self.cached_select();
        let bank = addr >> 4;
        if self.cache.dp.select.is_some() && select.apbanksel() == bank {
            return Ok(());
        }
        select.set_apbanksel(bank);
        self.dp_write_select(select)
    }

    /// Read AP register `addr` of the selected access port.
    ///
    /// AP reads are posted: the value comes back with a follow-up RDBUFF
    /// read.
    pub fn ap_read(&mut self, addr: u8) -> Result<u32> {
        self.require(DapState::Powered)?;
        let header = self.ap_header(RnW::R, addr)?;
        self.ap_bank_select(addr)?;
        self.transfer(header, 0)?;
        let value = self.dp_read(DpRegister::RdbuffRoutesel.into())?;

        log_at!(self, Info, "AP read {:#x} = {:#x}", addr, value);
        self.remember_ap(addr, value);
        Ok(value)
    }

    /// Write AP register `addr` of the selected access port.
    pub fn ap_write(&mut self, addr: u8, value: u32) -> Result<()> {
        self.require(DapState::Powered)?;
        let header = self.ap_header(RnW::W, addr)?;
        self.ap_bank_select(addr)?;
        self.forget_ap(addr);
        self.transfer(header, value)?;

        log_at!(self, Info, "AP write {:#x} = {:#x}", addr, value);
        self.remember_ap(addr, value);
        Ok(())
    }

    fn ap_header(&self, rnw: RnW, addr: u8) -> Result<RequestHeader> {
        if addr & 0x3 != 0 {
            return Err(Error::InvalidAddress(addr));
        }
        Ok(RequestHeader {
            apndp: APnDP::AP,
            rnw,
            addr: addr & 0xC,
        })
    }

    fn ap_slot(&mut self, addr: u8) -> Option<&mut Option<u32>> {
        let ap = &mut self.cache.ap;
        match MemApRegister::try_from(addr).ok()? {
            MemApRegister::Csw => Some(&mut ap.csw),
            MemApRegister::Tar => Some(&mut ap.tar),
            MemApRegister::Drw => Some(&mut ap.drw),
            MemApRegister::Cfg => Some(&mut ap.cfg),
            MemApRegister::Base => Some(&mut ap.base),
            MemApRegister::Idr => Some(&mut ap.idr),
            _ => None,
        }
    }

    fn remember_ap(&mut self, addr: u8, value: u32) {
        if let Some(slot) = self.ap_slot(addr) {
            *slot = Some(value);
        }
    }

    fn forget_ap(&mut self, addr: u8) {
        if let Some(slot) = self.ap_slot(addr) {
            *slot = None;
        }
    }
}

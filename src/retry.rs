//! WAIT and FAULT handling.
//!
//! Whatever the ack, the SWD protocol expects the host to run the data phase
//! unless overrun detection is off. After a WAIT or FAULT the engine
//! therefore sends a turnaround to MOSI and 33 zero bits before anything
//! else. With `autofix` set the transaction is then retried on a scratch
//! queue and its outcome is written back into the original commands, so the
//! caller sees a successful transfer.

use embedded_hal::delay::DelayNs;

use crate::bits::parity_even;
use crate::bus::{Operation, Transfer};
use crate::context::Context;
use crate::flush::FlushPolicy;
use crate::queue::Direction;
use crate::swd::{Ack, Error, RequestHeader, Result, RnW};
use crate::transport::Transport;

/// Positions of the data phase that belongs to a failed ack.
struct DataSlots {
    data: Option<usize>,
    parity: Option<usize>,
    /// Last command of the transaction.
    end: usize,
}

impl<T, D> Context<T, D>
where
    T: Transport,
    D: DelayNs,
{
    /// Called by the flush engine once the ack at `ack_idx` came back as
    /// something other than OK.
    pub(crate) fn handle_ack_error(&mut self, ack_idx: usize, err: Error) -> Result<()> {
        log_at!(self, Warning, "ack error {:?} at {}", err, ack_idx);
        let slots = self.void_data_phase(ack_idx);

        if !matches!(err, Error::AckWait | Error::AckFault) {
            // Bus out of sync, nothing sensible to send.
            self.truncate_after_index(slots.end)?;
            return Err(err);
        }

        if self.config.autofix {
            match self.retry_transaction(ack_idx, &slots, err) {
                Ok(()) => return Ok(()),
                Err(e) => {
                    log_at!(self, Error, "retry failed: {:?}", e);
                    self.truncate_after_index(slots.end)?;
                    return Err(e);
                }
            }
        }

        self.truncate_after_index(slots.end)?;
        self.post_ack_data_phase()?;
        Err(err)
    }

    /// Send the data phase the target expects after WAIT or FAULT: a
    /// turnaround to MOSI, 32 zero bits and a zero parity bit.
    pub(crate) fn post_ack_data_phase(&mut self) -> Result<()> {
        let first = self.push_turnaround(Direction::Mosi)?;
        self.bus_write_data(0, false, Operation::Enqueue)?;
        self.flush(FlushPolicy::ToTail(first))?;
        Ok(())
    }

    /// Find the data phase of the ack at `ack_idx` and void its pending
    /// commands so the flush engine will not transmit them.
    fn void_data_phase(&mut self, ack_idx: usize) -> DataSlots {
        let mut slots = DataSlots {
            data: None,
            parity: None,
            end: ack_idx,
        };

        // A write has a turnaround between ack and data.
        let data = (ack_idx + 1..=ack_idx + 2)
            .take_while(|&i| self.queue.at(i).is_some())
            .find(|&i| self.queue.at(i).and_then(|c| c.data()).is_some());
        if let Some(data) = data {
            slots.data = Some(data);
            slots.end = data;
            if self.queue.at(data + 1).and_then(|c| c.parity()).is_some() {
                slots.parity = Some(data + 1);
                slots.end = data + 1;
            }
        }

        for i in ack_idx + 1..=slots.end {
            if let Some(cmd) = self.queue.at_mut(i) {
                if !cmd.is_done() {
                    cmd.mark_voided();
                }
            }
        }
        slots
    }

    fn truncate_after_index(&mut self, idx: usize) -> Result<()> {
        if idx + 1 < self.queue.len() {
            let keep = self.queue.handle_at(idx);
            let removed = self.queue.truncate_after(keep)?;
            log_at!(self, Debug, "dropped {} pending commands", removed);
        }
        Ok(())
    }

    /// The request header that the ack at `ack_idx` answers.
    fn request_for(&self, ack_idx: usize) -> Result<RequestHeader> {
        let request = (1..=2)
            .filter_map(|back| ack_idx.checked_sub(back))
            .filter_map(|i| self.queue.at(i))
            .find_map(|c| c.request())
            .ok_or(Error::MissingRequest)?;
        RequestHeader::try_from(request).map_err(|_| Error::MissingRequest)
    }

    fn retry_transaction(&mut self, ack_idx: usize, slots: &DataSlots, first: Error) -> Result<()> {
        // A write whose data is not queued yet cannot be repeated.
        let target = self.request_for(ack_idx).and_then(|header| {
            let write = match header.rnw {
                RnW::R => 0,
                RnW::W => slots
                    .data
                    .and_then(|i| self.queue.at(i))
                    .and_then(|c| c.data())
                    .ok_or(first)?,
            };
            Ok((header, write))
        });

        let retries = self.config.wait_retries;
        let delay_us = self.config.retry_delay_us;
        let result = self.with_scratch_queue(|ctx| {
            // Sent even when there is nothing to retry.
            ctx.post_ack_data_phase()?;
            let (header, write) = target?;

            let mut last = first;
            for attempt in 1..=retries {
                ctx.delay.delay_us(delay_us);
                if last == Error::AckFault {
                    if let Err(e) = ctx.dp_clear_errors() {
                        log_at!(ctx, Warning, "clearing sticky errors: {:?}", e);
                        last = e;
                        continue;
                    }
                }
                match ctx.transfer(header, write) {
                    Ok(transfer) => {
                        log_at!(ctx, Warning, "recovered after {} retries", attempt);
                        return Ok(Some(transfer));
                    }
                    Err(e @ (Error::AckWait | Error::AckFault | Error::BadParity)) => {
                        log_at!(ctx, Debug, "retry {}: {:?}", attempt, e);
                        last = e;
                    }
                    Err(e) => return Err(e),
                }
            }
            Ok(None)
        })?;

        match result {
            Some(transfer) => self.splice(ack_idx, slots, transfer),
            None => Err(Error::MaxRetryExceeded),
        }
    }

    /// Write the outcome of a successful retry into the original commands.
    fn splice(&mut self, ack_idx: usize, slots: &DataSlots, transfer: Transfer) -> Result<()> {
        let ack = self.queue.at_mut(ack_idx).ok_or(Error::QueueEmpty)?;
        ack.fill(Ack::Ok as u32);
        self.cache.bus.ack = Some(transfer.ack);

        if let Some(cmd) = slots.data.and_then(|i| self.queue.at_mut(i)) {
            cmd.fill(transfer.data);
            if cmd.direction() == Direction::Miso {
                self.cache.bus.data_read = Some(transfer.data);
            } else {
                self.cache.bus.data_written = Some(transfer.data);
            }
        }
        if let Some(cmd) = slots.parity.and_then(|i| self.queue.at_mut(i)) {
            cmd.fill(transfer.parity as u32);
            self.cache.bus.parity = Some(parity_even(transfer.data));
        }
        Ok(())
    }
}

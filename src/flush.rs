//! The flush engine: executes queued commands through the transport.

use embedded_hal::delay::DelayNs;

use crate::bits::{bit_reverse, parity_even};
use crate::context::Context;
use crate::queue::{Direction, Handle, Payload};
use crate::swd::{Ack, BitOrder, Error, Result};
use crate::transport::{byte_len, check_bits, check_turnaround, pack, unpack, Transport};

/// Which part of the queue a flush executes. Commands already executed are
/// skipped in every case.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum FlushPolicy {
    /// From the head up to and including the given command.
    HeadTo(Handle),
    /// From the given command to the tail.
    ToTail(Handle),
    /// The whole queue.
    All,
    /// Just the given command.
    Only(Handle),
    /// Just the tail.
    Tail,
}

impl<T, D> Context<T, D>
where
    T: Transport,
    D: DelayNs,
{
    /// Execute the commands selected by `policy`, in order.
    ///
    /// Returns the number of commands transmitted. The first failure stops
    /// the flush: a transport error leaves the failing command pending, a bad
    /// ack goes through the retry handler and a parity mismatch removes the
    /// parity command and everything after it.
    pub fn flush(&mut self, policy: FlushPolicy) -> Result<usize> {
        let (start, end) = match policy {
            FlushPolicy::HeadTo(h) => (0, self.queue.index_of(h)?),
            FlushPolicy::ToTail(h) => (self.queue.index_of(h)?, usize::MAX),
            FlushPolicy::All => (0, usize::MAX),
            FlushPolicy::Only(h) => {
                let idx = self.queue.index_of(h)?;
                (idx, idx)
            }
            FlushPolicy::Tail => {
                let tail = self.queue.len().checked_sub(1).ok_or(Error::QueueEmpty)?;
                (tail, tail)
            }
        };

        let mut sent = 0;
        let mut idx = start;
        // Handlers may shorten the queue, so the bound is rechecked each step.
        while idx <= end && idx < self.queue.len() {
            let pending = self.queue.at(idx).is_some_and(|c| !c.is_done());
            if pending {
                self.transmit(idx)?;
                sent += 1;
                self.check_executed(idx)?;
            }
            idx += 1;
        }
        Ok(sent)
    }

    fn transmit(&mut self, idx: usize) -> Result<()> {
        let cmd = *self.queue.at(idx).ok_or(Error::QueueEmpty)?;
        let bits = cmd.bits();
        let order = self.config.bit_order;

        let moved = match (cmd.direction(), cmd.payload()) {
            (_, Payload::Undefined) => 0,
            (Direction::Mosi, Payload::Turnaround(n)) => {
                check_turnaround(n as usize)?;
                self.transport.mosi_turnaround(n as usize)?
            }
            (Direction::Miso, Payload::Turnaround(n)) => {
                check_turnaround(n as usize)?;
                self.transport.miso_turnaround(n as usize)?
            }
            (Direction::Mosi, payload) => {
                check_bits(bits as usize)?;
                let mut buf = [0u8; 4];
                pack(to_wire(payload.value(), bits, order)?, &mut buf);
                self.transport
                    .mosi_bits(&buf[..byte_len(bits as usize)], bits as usize, order)?
            }
            (Direction::Miso, _) => {
                check_bits(bits as usize)?;
                let mut buf = [0u8; 4];
                let n = self.transport.miso_bits(
                    &mut buf[..byte_len(bits as usize)],
                    bits as usize,
                    order,
                )?;
                let value = from_wire(unpack(&buf), bits, order)?;
                if let Some(cmd) = self.queue.at_mut(idx) {
                    cmd.payload_mut().set_value(value);
                }
                n
            }
        };

        if moved != bits as usize {
            log_at!(self, Error, "short transfer: {} of {} bits", moved, bits);
            return Err(Error::ShortTransfer {
                expected: bits,
                actual: moved,
            });
        }

        let cmd = self.queue.at_mut(idx).ok_or(Error::QueueEmpty)?;
        cmd.mark_done();
        let cmd = *cmd;
        self.remember(cmd.direction(), cmd.payload());
        log_at!(self, Payload, "{}", cmd);
        Ok(())
    }

    /// Check what the target sent once a command is done.
    fn check_executed(&mut self, idx: usize) -> Result<()> {
        let cmd = *self.queue.at(idx).ok_or(Error::QueueEmpty)?;
        if cmd.direction() != Direction::Miso {
            return Ok(());
        }

        match cmd.payload() {
            Payload::Ack(ack) => match Ack::try_ok(ack) {
                Ok(()) => Ok(()),
                Err(e) => self.handle_ack_error(idx, e),
            },
            Payload::Parity(parity) => {
                let data = idx
                    .checked_sub(1)
                    .and_then(|i| self.queue.at(i))
                    .and_then(|c| c.data());
                let Some(data) = data else {
                    log_at!(self, Error, "parity without data at {}", idx);
                    return Err(Error::ParityOrderViolation);
                };
                if parity_even(data) != parity {
                    log_at!(self, Error, "bad parity for data {:#x}", data);
                    let from = self.queue.handle_at(idx);
                    self.queue.truncate_tail(from)?;
                    return Err(Error::BadParity);
                }
                Ok(())
            }
            _ => Ok(()),
        }
    }

    fn remember(&mut self, direction: Direction, payload: Payload) {
        let bus = &mut self.cache.bus;
        match (direction, payload) {
            (_, Payload::Request(v)) => bus.request = Some(v),
            (_, Payload::Ack(v)) => bus.ack = Some(v),
            (_, Payload::Parity(p)) => bus.parity = Some(p),
            (_, Payload::Control(v)) => bus.control = Some(v),
            (Direction::Miso, Payload::Data(v)) => bus.data_read = Some(v),
            (Direction::Mosi, Payload::Data(v)) => bus.data_written = Some(v),
            _ => {}
        }
    }
}

fn to_wire(value: u32, bits: u8, order: BitOrder) -> Result<u32> {
    match order {
        BitOrder::LsbFirst => Ok(value),
        BitOrder::MsbFirst => bit_reverse(value, bits),
    }
}

fn from_wire(raw: u32, bits: u8, order: BitOrder) -> Result<u32> {
    to_wire(raw, bits, order)
}

//! Bus primitives: the building blocks of every SWD transaction.
//!
//! Each primitive appends commands to the queue and, with
//! [`Operation::Execute`], flushes the queue right away. Primitives that
//! need a particular bus direction insert a turnaround first when the tail
//! of the queue leaves the bus in the other direction.

use embedded_hal::delay::DelayNs;

use crate::bits::parity_even;
use crate::context::Context;
use crate::flush::FlushPolicy;
use crate::queue::{Command, Direction, Handle, Payload};
use crate::swd::{Ack, Error, RequestHeader, Result, RnW};
use crate::swj::Sequence;
use crate::transport::Transport;

/// Whether a primitive only queues its commands or runs them too.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Operation {
    /// Append to the queue and return.
    Enqueue,
    /// Append to the queue and flush everything pending.
    Execute,
}

/// The two commands of a data phase read from the target.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct DataPhase {
    /// The 32-bit data read.
    pub data: Handle,
    /// The parity bit read right after it.
    pub parity: Handle,
}

/// Outcome of one complete register transaction.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Transfer {
    /// Raw ack bits, OK once the transfer succeeded.
    pub ack: u8,
    /// Word read from or written to the target.
    pub data: u32,
    /// Parity bit that accompanied `data`.
    pub parity: bool,
}

impl<T, D> Context<T, D>
where
    T: Transport,
    D: DelayNs,
{
    /// Make sure the bus ends up in `direction`, appending a turnaround if the
    /// queue is empty or its tail runs the other way.
    ///
    /// Returns the number of commands appended, 0 or 1.
    pub fn bus_set_direction(&mut self, direction: Direction, op: Operation) -> Result<usize> {
        let needed = match self.queue.tail() {
            None => true,
            Some(tail) => self.queue.get(tail)?.direction() != direction,
        };
        if needed {
            self.push_turnaround(direction)?;
        }
        self.finish(op)?;
        Ok(needed as usize)
    }

    /// Append a request header, preceded by a turnaround to MOSI if needed.
    pub fn bus_write_request(&mut self, request: u8, op: Operation) -> Result<usize> {
        self.reserve(2)?;
        let mut count = self.bus_set_direction(Direction::Mosi, Operation::Enqueue)?;
        self.push(Direction::Mosi, Payload::Request(request))?;
        count += 1;
        log_at!(self, Debug, "request {:#x} queued", request);
        self.finish(op)?;
        Ok(count)
    }

    /// Append the ack read that follows a request.
    ///
    /// The tail must be a request or a turnaround to MISO, anything else
    /// fails with [`Error::AckOrderViolation`]. The turnaround to MISO is
    /// inserted when the tail is the request.
    pub fn bus_read_ack(&mut self, op: Operation) -> Result<Handle> {
        let tail = self.queue.tail().ok_or(Error::QueueEmpty)?;
        let tail = *self.queue.get(tail)?;
        let after_request = tail.request().is_some();
        let after_turnaround = tail.is_turnaround() && tail.direction() == Direction::Miso;
        if !after_request && !after_turnaround {
            log_at!(self, Error, "ack after {}", tail);
            return Err(Error::AckOrderViolation);
        }

        self.reserve(2)?;
        self.bus_set_direction(Direction::Miso, Operation::Enqueue)?;
        let ack = self.push(Direction::Miso, Payload::Ack(0))?;
        self.finish(op)?;
        Ok(ack)
    }

    /// Append a data word and the given parity bit, preceded by a turnaround
    /// to MOSI if needed. The parity is sent as is, even when wrong.
    pub fn bus_write_data(&mut self, data: u32, parity: bool, op: Operation) -> Result<usize> {
        self.reserve(3)?;
        let mut count = self.bus_set_direction(Direction::Mosi, Operation::Enqueue)?;
        self.push(Direction::Mosi, Payload::Data(data))?;
        self.push(Direction::Mosi, Payload::Parity(parity))?;
        count += 2;
        self.finish(op)?;
        Ok(count)
    }

    /// Append a data word with its computed parity.
    pub fn bus_write_data_auto_parity(&mut self, data: u32, op: Operation) -> Result<usize> {
        self.bus_write_data(data, parity_even(data), op)
    }

    /// Append a data word read and its parity read, preceded by a turnaround
    /// to MISO if needed.
    ///
    /// The values are only meaningful once executed, see
    /// [`Context::data_result`].
    pub fn bus_read_data(&mut self, op: Operation) -> Result<DataPhase> {
        self.reserve(3)?;
        self.bus_set_direction(Direction::Miso, Operation::Enqueue)?;
        let data = self.push(Direction::Miso, Payload::Data(0))?;
        let parity = self.push(Direction::Miso, Payload::Parity(false))?;
        self.finish(op)?;
        Ok(DataPhase { data, parity })
    }

    /// Append one raw 8-bit control command per byte of `bytes`.
    pub fn bus_write_control(&mut self, bytes: &[u8], op: Operation) -> Result<usize> {
        if bytes.is_empty() {
            return Err(Error::InvalidArgument);
        }
        self.reserve(bytes.len() + 1)?;
        let mut count = self.bus_set_direction(Direction::Mosi, Operation::Enqueue)?;
        for &byte in bytes {
            self.push(Direction::Mosi, Payload::Control(byte))?;
        }
        count += bytes.len();
        self.finish(op)?;
        Ok(count)
    }

    /// Append single raw bits, for sequences that are not byte sized.
    pub fn bus_write_bits(&mut self, bits: &[bool], op: Operation) -> Result<usize> {
        if bits.is_empty() {
            return Err(Error::InvalidArgument);
        }
        self.reserve(bits.len() + 1)?;
        let mut count = self.bus_set_direction(Direction::Mosi, Operation::Enqueue)?;
        for &bit in bits {
            self.push(Direction::Mosi, Payload::Bitbang(bit))?;
        }
        count += bits.len();
        self.finish(op)?;
        Ok(count)
    }

    /// Append one of the predefined line sequences.
    pub fn bus_write_sequence(&mut self, sequence: Sequence, op: Operation) -> Result<usize> {
        log_at!(self, Debug, "sequence {:?}", sequence);
        self.bus_write_control(sequence.bytes(), op)
    }

    /// Read back an executed data phase.
    ///
    /// Fails with [`Error::ParityOrderViolation`] unless the parity command
    /// directly follows the data command, and with [`Error::NotReady`] while
    /// either is still pending. A phase that was skipped because its ack
    /// failed returns that ack's error.
    pub fn data_result(&self, phase: DataPhase) -> Result<(u32, bool)> {
        let data = self.queue.get(phase.data)?;
        let parity = self.queue.get(phase.parity)?;
        if self.queue.next(phase.data)? != Some(phase.parity) {
            return Err(Error::ParityOrderViolation);
        }
        if data.is_voided() || parity.is_voided() {
            return Err(self.voided_cause(phase.data));
        }
        if !data.is_done() || !parity.is_done() {
            return Err(Error::NotReady);
        }
        match (data.data(), parity.parity()) {
            (Some(d), Some(p)) => Ok((d, p)),
            _ => Err(Error::ParityOrderViolation),
        }
    }

    /// Run one complete transaction: request, ack and data phase.
    ///
    /// `write` carries the word for a write request and is ignored for reads.
    /// Acks other than OK go through the retry handler, which either recovers
    /// or fails the transaction.
    pub fn transfer(&mut self, header: RequestHeader, write: u32) -> Result<Transfer> {
        let request = header.encode()?;
        self.queue.trim_executed();

        self.bus_write_request(request, Operation::Enqueue)?;
        let ack = self.bus_read_ack(Operation::Enqueue)?;
        let (data, parity) = match header.rnw {
            RnW::R => {
                let phase = self.bus_read_data(Operation::Execute)?;
                self.data_result(phase)?
            }
            RnW::W => {
                self.bus_write_data_auto_parity(write, Operation::Execute)?;
                (write, parity_even(write))
            }
        };

        let ack = self.queue.get(ack)?.ack().ok_or(Error::AckOrderViolation)?;
        Ack::try_ok(ack)?;
        Ok(Transfer { ack, data, parity })
    }

    /// The ack error that voided the data phase starting at `data`.
    fn voided_cause(&self, data: Handle) -> Error {
        let mut cur = data;
        // A read phase follows its ack directly, a write has a turnaround between.
        for _ in 0..2 {
            match self.queue.prev(cur) {
                Ok(Some(prev)) => cur = prev,
                _ => break,
            }
            if let Some(ack) = self.queue.get(cur).ok().and_then(|c| c.ack()) {
                return Ack::try_ok(ack).err().unwrap_or(Error::NotReady);
            }
        }
        Error::NotReady
    }

    /// Append a turnaround to `direction` whatever the tail looks like.
    pub(crate) fn push_turnaround(&mut self, direction: Direction) -> Result<Handle> {
        let cycles = self.config.turnaround.cycles();
        self.push(direction, Payload::Turnaround(cycles))
    }

    fn push(&mut self, direction: Direction, payload: Payload) -> Result<Handle> {
        self.queue.append(Command::new(direction, payload))
    }

    /// Fail up front instead of leaving half a phase in the queue.
    fn reserve(&self, commands: usize) -> Result<()> {
        if self.queue.len() + commands > self.queue.max_len() {
            log_at!(self, Error, "queue full ({})", self.queue.len());
            return Err(Error::QueueFull);
        }
        Ok(())
    }

    fn finish(&mut self, op: Operation) -> Result<()> {
        if op == Operation::Execute {
            self.flush(FlushPolicy::All)?;
        }
        Ok(())
    }
}

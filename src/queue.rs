//! Commands and the command queue.
//!
//! A [`Command`] is one bus operation: a request header, an ack, a data word,
//! a parity bit, a turnaround or a raw control byte. Commands are appended to
//! a [`Queue`] by the bus primitives and executed in order by the flush
//! engine, which fills in the payload of target-to-host commands.
//!
//! Commands are addressed through [`Handle`]s. A handle stays valid until the
//! command it names is removed by one of the documented truncations; after
//! that, lookups return [`Error::StaleHandle`] instead of another command.

use alloc::vec::Vec;
use core::fmt;

use crate::bits::{bin_string, low_mask};
use crate::swd::{Error, Result};

/// Bus direction relative to the debug host.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Direction {
    /// Host drives SWDIO.
    Mosi,
    /// Target drives SWDIO.
    Miso,
}

impl Direction {
    /// The other direction.
    pub fn flip(self) -> Self {
        match self {
            Direction::Mosi => Direction::Miso,
            Direction::Miso => Direction::Mosi,
        }
    }
}

/// Payload of a command, one variant per kind of bus operation.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Payload {
    /// Placeholder that is never transmitted.
    Undefined,
    /// Eight raw bits, used for switch and reset sequences.
    Control(u8),
    /// A single raw bit.
    Bitbang(bool),
    /// Parity bit following a data word.
    Parity(bool),
    /// Turnaround of the given number of clock cycles.
    Turnaround(u8),
    /// Request header.
    Request(u8),
    /// Three ack bits.
    Ack(u8),
    /// 32-bit data word.
    Data(u32),
}

impl Payload {
    /// Number of clock cycles the payload occupies on the wire.
    pub fn bits(&self) -> u8 {
        match self {
            Payload::Undefined => 0,
            Payload::Bitbang(_) | Payload::Parity(_) => 1,
            Payload::Turnaround(cycles) => *cycles,
            Payload::Ack(_) => 3,
            Payload::Control(_) | Payload::Request(_) => 8,
            Payload::Data(_) => 32,
        }
    }

    /// The payload bits as a word, turnarounds carry none.
    pub fn value(&self) -> u32 {
        match *self {
            Payload::Undefined | Payload::Turnaround(_) => 0,
            Payload::Control(v) | Payload::Request(v) | Payload::Ack(v) => v as u32,
            Payload::Bitbang(b) | Payload::Parity(b) => b as u32,
            Payload::Data(v) => v,
        }
    }

    /// Store raw bits received from the wire, keeping the variant.
    pub(crate) fn set_value(&mut self, raw: u32) {
        let raw = raw & low_mask(self.bits());
        match self {
            Payload::Undefined | Payload::Turnaround(_) => {}
            Payload::Control(v) | Payload::Request(v) | Payload::Ack(v) => *v = raw as u8,
            Payload::Bitbang(b) | Payload::Parity(b) => *b = raw != 0,
            Payload::Data(v) => *v = raw,
        }
    }

    fn name(&self) -> &'static str {
        match self {
            Payload::Undefined => "UNDEFINED",
            Payload::Control(_) => "CONTROL",
            Payload::Bitbang(_) => "BITBANG",
            Payload::Parity(_) => "PARITY",
            Payload::Turnaround(_) => "TRN",
            Payload::Request(_) => "REQUEST",
            Payload::Ack(_) => "ACK",
            Payload::Data(_) => "DATA",
        }
    }
}

/// One atomic bus operation.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Command {
    direction: Direction,
    payload: Payload,
    done: bool,
    /// Skipped after a failed ack, never went on the wire.
    voided: bool,
    generation: u32,
}

impl Command {
    /// Create a command that has not been transmitted yet.
    pub fn new(direction: Direction, payload: Payload) -> Self {
        Command {
            direction,
            payload,
            done: false,
            voided: false,
            generation: 0,
        }
    }

    /// Direction of the bus while this command runs.
    pub fn direction(&self) -> Direction {
        self.direction
    }

    /// The payload, filled in by the flush engine for MISO commands.
    pub fn payload(&self) -> Payload {
        self.payload
    }

    /// Clock cycles consumed by this command.
    pub fn bits(&self) -> u8 {
        self.payload.bits()
    }

    /// Whether the command has been executed or voided.
    pub fn is_done(&self) -> bool {
        self.done
    }

    /// Whether the command was skipped because its transaction failed. A
    /// voided command counts as done but its payload was never transferred.
    pub fn is_voided(&self) -> bool {
        self.voided
    }

    /// Data word, if this is a data command.
    pub fn data(&self) -> Option<u32> {
        match self.payload {
            Payload::Data(v) => Some(v),
            _ => None,
        }
    }

    /// Raw ack bits, if this is an ack command.
    pub fn ack(&self) -> Option<u8> {
        match self.payload {
            Payload::Ack(v) => Some(v),
            _ => None,
        }
    }

    /// Parity bit, if this is a parity command.
    pub fn parity(&self) -> Option<bool> {
        match self.payload {
            Payload::Parity(p) => Some(p),
            _ => None,
        }
    }

    /// Request header byte, if this is a request command.
    pub fn request(&self) -> Option<u8> {
        match self.payload {
            Payload::Request(v) => Some(v),
            _ => None,
        }
    }

    /// Whether this is a turnaround command.
    pub fn is_turnaround(&self) -> bool {
        matches!(self.payload, Payload::Turnaround(_))
    }

    pub(crate) fn payload_mut(&mut self) -> &mut Payload {
        &mut self.payload
    }

    pub(crate) fn mark_done(&mut self) {
        self.done = true;
    }

    pub(crate) fn mark_voided(&mut self) {
        self.done = true;
        self.voided = true;
    }

    /// Take a value that was transferred on the target's behalf.
    pub(crate) fn fill(&mut self, raw: u32) {
        self.payload.set_value(raw);
        self.done = true;
        self.voided = false;
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let dir = match self.direction {
            Direction::Mosi => "MOSI",
            Direction::Miso => "MISO",
        };
        write!(
            f,
            "{}_{} bits={} done={}",
            dir,
            self.payload.name(),
            self.bits(),
            self.done as u8
        )?;
        if self.voided {
            write!(f, " voided")?;
        }
        match self.payload {
            Payload::Undefined | Payload::Turnaround(_) => Ok(()),
            p => write!(
                f,
                " value={:#x} ({})",
                p.value(),
                bin_string(p.value(), p.bits())
            ),
        }
    }
}

/// Reference to a command in a [`Queue`].
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Handle {
    pos: usize,
    generation: u32,
}

/// Ordered sequence of pending and executed commands.
#[derive(Debug)]
pub struct Queue {
    cmds: Vec<Command>,
    /// Absolute position of `cmds[0]`, grows as the head is trimmed.
    base: usize,
    /// Bumped on every tail truncation so reused positions get new handles.
    generation: u32,
    max_len: usize,
}

impl Queue {
    /// Create an empty queue holding at most `max_len` commands.
    pub fn new(max_len: usize) -> Self {
        Queue {
            cmds: Vec::new(),
            base: 0,
            generation: 0,
            max_len,
        }
    }

    /// Number of commands currently held.
    pub fn len(&self) -> usize {
        self.cmds.len()
    }

    /// `true` if the queue holds no commands.
    pub fn is_empty(&self) -> bool {
        self.cmds.is_empty()
    }

    /// Maximum number of commands.
    pub fn max_len(&self) -> usize {
        self.max_len
    }

    /// Append `cmd` at the tail.
    pub fn append(&mut self, mut cmd: Command) -> Result<Handle> {
        if self.cmds.len() >= self.max_len {
            return Err(Error::QueueFull);
        }
        cmd.generation = self.generation;
        self.cmds.push(cmd);
        Ok(self.handle_at(self.cmds.len() - 1))
    }

    /// Look up a command.
    pub fn get(&self, handle: Handle) -> Result<&Command> {
        let idx = self.index_of(handle)?;
        Ok(&self.cmds[idx])
    }

    #[cfg(test)]
    pub(crate) fn get_mut(&mut self, handle: Handle) -> Result<&mut Command> {
        let idx = self.index_of(handle)?;
        Ok(&mut self.cmds[idx])
    }

    /// First command, the one without a predecessor.
    pub fn head(&self) -> Option<Handle> {
        (!self.cmds.is_empty()).then(|| self.handle_at(0))
    }

    /// Last command, the one without a successor.
    pub fn tail(&self) -> Option<Handle> {
        self.cmds.len().checked_sub(1).map(|i| self.handle_at(i))
    }

    /// The command after `handle`.
    pub fn next(&self, handle: Handle) -> Result<Option<Handle>> {
        let idx = self.index_of(handle)? + 1;
        Ok((idx < self.cmds.len()).then(|| self.handle_at(idx)))
    }

    /// The command before `handle`.
    pub fn prev(&self, handle: Handle) -> Result<Option<Handle>> {
        let idx = self.index_of(handle)?;
        Ok(idx.checked_sub(1).map(|i| self.handle_at(i)))
    }

    /// The rightmost executed command whose successor, if any, is not
    /// executed. This is where the bus stands after an error. Voided
    /// commands never reached the wire and do not count as executed.
    pub fn last_executed(&self) -> Option<Handle> {
        let sent = |c: &Command| c.done && !c.voided;
        let mut found = None;
        for (i, cmd) in self.cmds.iter().enumerate() {
            let next_pending = self.cmds.get(i + 1).map_or(true, |n| !sent(n));
            if sent(cmd) && next_pending {
                found = Some(i);
            }
        }
        found.map(|i| self.handle_at(i))
    }

    /// Remove `from` and every command after it. Returns the number removed.
    pub fn truncate_tail(&mut self, from: Handle) -> Result<usize> {
        let idx = self.index_of(from)?;
        Ok(self.truncate_at(idx))
    }

    /// Remove every command after `keep`. Returns the number removed.
    pub fn truncate_after(&mut self, keep: Handle) -> Result<usize> {
        let idx = self.index_of(keep)?;
        Ok(self.truncate_at(idx + 1))
    }

    /// Remove every command before `keep`. Returns the number removed.
    ///
    /// Handles to `keep` and later commands stay valid.
    pub fn truncate_head(&mut self, keep: Handle) -> Result<usize> {
        let idx = self.index_of(keep)?;
        self.cmds.drain(..idx);
        self.base += idx;
        Ok(idx)
    }

    /// Drop executed commands from the head, keeping the last of them so the
    /// bus direction stays known. Returns the number removed.
    pub fn trim_executed(&mut self) -> usize {
        let done = self.cmds.iter().take_while(|c| c.done).count();
        let drop = done.saturating_sub(1);
        if drop > 0 {
            self.cmds.drain(..drop);
            self.base += drop;
        }
        drop
    }

    /// Remove every command.
    pub fn clear(&mut self) {
        let len = self.cmds.len();
        self.truncate_at(0);
        self.base += len;
    }

    /// Iterate over the commands from head to tail.
    pub fn iter(&self) -> impl Iterator<Item = &Command> {
        self.cmds.iter()
    }

    /// Handles of all commands from `from` to the tail.
    pub fn handles_from(&self, from: Handle) -> Result<impl Iterator<Item = Handle> + '_> {
        let idx = self.index_of(from)?;
        Ok((idx..self.cmds.len()).map(move |i| self.handle_at(i)))
    }

    pub(crate) fn handle_at(&self, idx: usize) -> Handle {
        Handle {
            pos: self.base + idx,
            generation: self.cmds[idx].generation,
        }
    }

    pub(crate) fn index_of(&self, handle: Handle) -> Result<usize> {
        let idx = handle
            .pos
            .checked_sub(self.base)
            .ok_or(Error::StaleHandle)?;
        match self.cmds.get(idx) {
            Some(cmd) if cmd.generation == handle.generation => Ok(idx),
            _ => Err(Error::StaleHandle),
        }
    }

    pub(crate) fn at(&self, idx: usize) -> Option<&Command> {
        self.cmds.get(idx)
    }

    pub(crate) fn at_mut(&mut self, idx: usize) -> Option<&mut Command> {
        self.cmds.get_mut(idx)
    }

    fn truncate_at(&mut self, idx: usize) -> usize {
        let removed = self.cmds.len().saturating_sub(idx);
        if removed > 0 {
            self.cmds.truncate(idx);
            self.generation = self.generation.wrapping_add(1);
        }
        removed
    }
}

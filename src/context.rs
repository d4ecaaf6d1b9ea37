//! The engine context: configuration, queue, register cache and transport.

use core::mem;

use embedded_hal::delay::DelayNs;
use num_enum::{IntoPrimitive, TryFromPrimitive};

use crate::adi::memap::AddressingMode;
use crate::queue::Queue;
use crate::swd::{BitOrder, Error, Result, TurnaroundPeriod};
use crate::transport::Transport;

/// Verbosity of the engine's log output, in increasing order.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, TryFromPrimitive, IntoPrimitive)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum LogLevel {
    /// Nothing at all.
    Silent = 0,
    /// Failures surfaced to the caller.
    Error = 1,
    /// Recovered protocol conditions such as WAIT retries.
    Warning = 2,
    /// DAP bring-up milestones.
    Normal = 3,
    /// Register level operations.
    Info = 4,
    /// Queue and bus primitive activity.
    Debug = 5,
    /// Every transmitted command with its payload.
    Payload = 6,
}

/// Smallest queue length accepted by [`Context::new`]; one register
/// transaction with its turnarounds needs eight commands.
pub const MIN_QUEUE_LEN: usize = 16;

/// The engine configuration.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Config {
    /// Length of every turnaround.
    pub turnaround: TurnaroundPeriod,
    /// Maximum number of commands held by the queue.
    pub max_queue_len: usize,
    /// Messages above this level are dropped.
    pub log_level: LogLevel,
    /// Handle WAIT and FAULT acks internally instead of returning them.
    pub autofix: bool,
    /// The number of retries after a `Wait` or `Fault` response when
    /// `autofix` is set.
    pub wait_retries: usize,
    /// Delay between two retries.
    pub retry_delay_us: u32,
    /// Shift order expected by the transport.
    pub bit_order: BitOrder,
    /// How MEM-AP block accesses program TAR.
    pub addressing: AddressingMode,
    /// Polls of CTRL/STAT or DHCSR before giving up on an acknowledge.
    pub power_up_retries: usize,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            turnaround: TurnaroundPeriod::Cycles1,
            max_queue_len: 2048,
            log_level: LogLevel::Normal,
            autofix: false,
            wait_retries: 32,
            retry_delay_us: 10,
            bit_order: BitOrder::LsbFirst,
            addressing: AddressingMode::AutoIncrement,
            power_up_retries: 16,
        }
    }
}

/// Values of the last executed commands.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct BusCache {
    /// Last request header sent.
    pub request: Option<u8>,
    /// Last ack received, whatever its value.
    pub ack: Option<u8>,
    /// Last data word read from the target.
    pub data_read: Option<u32>,
    /// Last data word written to the target.
    pub data_written: Option<u32>,
    /// Last parity bit in either direction.
    pub parity: Option<bool>,
    /// Last control byte sent.
    pub control: Option<u8>,
}

/// Last known Debug Port register values.
///
/// SELECT and ABORT are write-only on the wire, so their entries are the
/// only record of what the target holds.
#[allow(missing_docs)]
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct DpCache {
    pub idcode: Option<u32>,
    pub abort: Option<u32>,
    pub ctrlstat: Option<u32>,
    pub wcr: Option<u32>,
    pub select: Option<u32>,
    pub resend: Option<u32>,
    pub rdbuff: Option<u32>,
    pub routesel: Option<u32>,
}

/// Last known Access Port register values of the selected AP.
#[allow(missing_docs)]
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ApCache {
    pub csw: Option<u32>,
    pub tar: Option<u32>,
    pub drw: Option<u32>,
    pub cfg: Option<u32>,
    pub base: Option<u32>,
    pub idr: Option<u32>,
}

/// Cached register values, owned by the [`Context`].
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct RegisterCache {
    /// Values moved by the last commands.
    pub bus: BusCache,
    /// Debug Port registers.
    pub dp: DpCache,
    /// Access Port registers.
    pub ap: ApCache,
    /// CPUID of the core found by `debug_init`.
    pub cpuid: Option<u32>,
}

/// Where the DAP bring-up stands.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum DapState {
    /// Nothing sent yet, or the bus was switched away from SWD.
    Uninitialized,
    /// Switch sequence and line reset sent, IDCODE read.
    Selected,
    /// Debug and system power domains acknowledged.
    Powered,
    /// MEM-AP identified, CSW programmed.
    MemApConfigured,
    /// CPUID identified a Cortex-M core.
    DebugDetected,
    /// The core reports S_HALT.
    Halted,
    /// The core runs with halting debug enabled.
    Running,
}

/// One SWD interface talking to one target.
///
/// A context is not shareable between threads of execution; serialize access
/// above it if several callers need the same interface.
pub struct Context<T, D> {
    pub(crate) config: Config,
    pub(crate) queue: Queue,
    pub(crate) cache: RegisterCache,
    pub(crate) state: DapState,
    pub(crate) transport: T,
    pub(crate) delay: D,
}

impl<T, D> Context<T, D>
where
    T: Transport,
    D: DelayNs,
{
    /// Create a context around `transport`. `delay` paces WAIT retries and
    /// power-up polling.
    pub fn new(transport: T, delay: D, config: Config) -> Result<Self> {
        if config.max_queue_len < MIN_QUEUE_LEN {
            return Err(Error::InvalidArgument);
        }

        Ok(Context {
            queue: Queue::new(config.max_queue_len),
            config,
            cache: RegisterCache::default(),
            state: DapState::Uninitialized,
            transport,
            delay,
        })
    }

    /// Tear the context down and give back the transport and delay.
    pub fn release(self) -> (T, D) {
        (self.transport, self.delay)
    }

    /// The active configuration.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Handle WAIT and FAULT acks internally.
    pub fn set_autofix(&mut self, autofix: bool) {
        self.config.autofix = autofix;
    }

    /// Change the turnaround length, `1..=4` cycles.
    pub fn set_turnaround(&mut self, cycles: u8) -> Result<()> {
        self.config.turnaround = TurnaroundPeriod::from_cycles(cycles)?;
        Ok(())
    }

    /// Change the log verbosity.
    pub fn set_log_level(&mut self, level: LogLevel) {
        self.config.log_level = level;
    }

    /// Change the log verbosity from its numeric value.
    pub fn set_log_level_raw(&mut self, level: u8) -> Result<()> {
        let level = LogLevel::try_from(level).map_err(|_| Error::InvalidLogLevel(level))?;
        self.set_log_level(level);
        Ok(())
    }

    /// The command queue.
    pub fn queue(&self) -> &Queue {
        &self.queue
    }

    /// The command queue, for explicit truncation.
    pub fn queue_mut(&mut self) -> &mut Queue {
        &mut self.queue
    }

    /// Cached register values.
    pub fn cache(&self) -> &RegisterCache {
        &self.cache
    }

    /// Where the DAP bring-up stands.
    pub fn state(&self) -> DapState {
        self.state
    }

    /// The transport.
    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// The transport, mutably.
    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    /// Dump every queued command at debug verbosity.
    pub fn log_queue(&self) {
        log_at!(self, Debug, "queue: {} commands", self.queue.len());
        for cmd in self.queue.iter() {
            log_at!(self, Debug, "  {}", cmd);
        }
    }

    pub(crate) fn logs(&self, level: LogLevel) -> bool {
        level != LogLevel::Silent && level <= self.config.log_level
    }

    pub(crate) fn require(&self, state: DapState) -> Result<()> {
        if self.state < state {
            log_at!(self, Error, "DAP is {:?}, need {:?}", self.state, state);
            return Err(Error::NotReady);
        }
        Ok(())
    }

    /// Run `f` against an empty queue with `autofix` off, then put the
    /// original queue and setting back, whatever `f` returned.
    pub(crate) fn with_scratch_queue<R>(
        &mut self,
        f: impl FnOnce(&mut Self) -> Result<R>,
    ) -> Result<R> {
        let scratch = Queue::new(self.config.max_queue_len);
        let saved_queue = mem::replace(&mut self.queue, scratch);
        let saved_autofix = mem::replace(&mut self.config.autofix, false);

        let result = f(self);

        self.queue = saved_queue;
        self.config.autofix = saved_autofix;
        result
    }
}

//! HECI transport: the device handle, ring buffer flow control, framing and
//! whole-message send/receive/reset.
//!
//! See [`crate`] for an overview of the register interface.

// Copyright (C) 2025 Piers Finlayson <piers@piers.rocks>
//
// MIT License

pub mod frame;
pub mod ring;
pub mod transport;
pub mod window;

pub use frame::{Fragments, MeiHeader};
pub use window::RegisterWindow;

use crate::io::{Clock, ConfigSpace, RegisterIo};

/// Size of one ring buffer slot in bytes
pub const SLOT_SIZE: usize = core::mem::size_of::<u32>();

/// Host write window - host pushes slots to the CSE
pub const MMIO_CSE_CB_WW: usize = 0x00;
/// Host control/status register
pub const MMIO_HOST_CSR: usize = 0x04;
/// CSE read window - host pops slots sent by the CSE
pub const MMIO_CSE_CB_RW: usize = 0x08;
/// CSE control/status register
pub const MMIO_CSE_CSR: usize = 0x0c;

/// Control/status register, as found at [`MMIO_HOST_CSR`] and
/// [`MMIO_CSE_CSR`].
///
/// ```text
///  31      24 23      16 15       8  4   3   2   1   0
/// +----------+----------+----------+---+---+---+---+---+
/// |  depth   | write ptr| read ptr |RST|RDY|IG |IS |IE |
/// +----------+----------+----------+---+---+---+---+---+
/// ```
///
/// The read and write pointers are free-running 8-bit slot counters, so
/// their difference modulo 256 is the number of occupied slots.  The depth is
/// the ring's capacity in slots.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Csr(u32);

impl Csr {
    /// Interrupt enable
    pub const IE: u32 = 1 << 0;
    /// Interrupt status, write 1 to clear
    pub const IS: u32 = 1 << 1;
    /// Interrupt generate - tells the other side to look at the ring
    pub const IG: u32 = 1 << 2;
    /// Ready
    pub const READY: u32 = 1 << 3;
    /// Reset
    pub const RESET: u32 = 1 << 4;

    const RP_SHIFT: u32 = 8;
    const WP_SHIFT: u32 = 16;
    const CBD_SHIFT: u32 = 24;

    pub const fn from_raw(raw: u32) -> Self {
        Self(raw)
    }

    pub const fn raw(&self) -> u32 {
        self.0
    }

    pub const fn interrupt_enable(&self) -> bool {
        self.0 & Self::IE != 0
    }

    pub const fn interrupt_status(&self) -> bool {
        self.0 & Self::IS != 0
    }

    pub const fn interrupt_generate(&self) -> bool {
        self.0 & Self::IG != 0
    }

    pub const fn ready(&self) -> bool {
        self.0 & Self::READY != 0
    }

    pub const fn reset(&self) -> bool {
        self.0 & Self::RESET != 0
    }

    pub const fn read_ptr(&self) -> u8 {
        (self.0 >> Self::RP_SHIFT) as u8
    }

    pub const fn write_ptr(&self) -> u8 {
        (self.0 >> Self::WP_SHIFT) as u8
    }

    /// Ring capacity in slots
    pub const fn depth(&self) -> u8 {
        (self.0 >> Self::CBD_SHIFT) as u8
    }

    /// Number of occupied slots.
    pub const fn filled_slots(&self) -> usize {
        self.write_ptr().wrapping_sub(self.read_ptr()) as usize
    }

    /// Number of free slots.  Saturates at zero should the pointers ever
    /// claim more occupancy than the depth allows.
    pub const fn empty_slots(&self) -> usize {
        (self.depth() as usize).saturating_sub(self.filled_slots())
    }

    /// Ring capacity in bytes
    pub const fn capacity_bytes(&self) -> usize {
        self.depth() as usize * SLOT_SIZE
    }

    /// Return a copy with the given flag bits set.
    pub const fn with(self, bits: u32) -> Self {
        Self(self.0 | bits)
    }

    /// Return a copy with the given flag bits cleared.
    pub const fn without(self, bits: u32) -> Self {
        Self(self.0 & !bits)
    }
}

/// Number of slots needed to carry `bytes`.
pub const fn bytes_to_slots(bytes: usize) -> usize {
    bytes.div_ceil(SLOT_SIZE)
}

/// Tunables for the transport and the mode waits.
///
/// [`HeciConfig::DEFAULT`] matches what production CSE firmware needs.  Tests
/// and slow platforms can adjust individual values with the `with_*`
/// methods.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeciConfig {
    /// Whole-message attempts for send and receive
    pub retry_count: u8,
    /// How long to wait for the CSE ready bit
    pub ready_timeout_ms: u32,
    /// Interval between polls of any register
    pub poll_interval_us: u32,
    /// How long to wait for the CSE to drain the host ring
    pub send_timeout_ms: u32,
    /// How long to wait for the CSE to fill the CSE ring
    pub read_timeout_ms: u32,
    /// How long to wait for security override mode
    pub sec_override_timeout_ms: u32,
    /// How long to wait for the CSE to boot from its RO partition
    pub boot_to_ro_timeout_ms: u32,
    /// Host address used by the command layer
    pub host_addr: u8,
    /// MKHI client address used by the command layer
    pub mkhi_addr: u8,
    /// BAR used by [`Heci::init_temporary_bar`] when none is given
    pub default_bar: usize,
}

impl HeciConfig {
    pub const DEFAULT: Self = Self {
        retry_count: 5,
        ready_timeout_ms: 15 * 1000,
        poll_interval_us: 100,
        send_timeout_ms: 5 * 1000,
        read_timeout_ms: 5 * 1000,
        sec_override_timeout_ms: 15 * 1000,
        boot_to_ro_timeout_ms: 5 * 1000,
        host_addr: 0x00,
        mkhi_addr: 0x07,
        default_bar: 0xfeda_2000,
    };

    pub const fn with_retry_count(mut self, retry_count: u8) -> Self {
        self.retry_count = retry_count;
        self
    }

    pub const fn with_ready_timeout_ms(mut self, ms: u32) -> Self {
        self.ready_timeout_ms = ms;
        self
    }

    pub const fn with_io_timeouts_ms(mut self, send_ms: u32, read_ms: u32) -> Self {
        self.send_timeout_ms = send_ms;
        self.read_timeout_ms = read_ms;
        self
    }

    pub const fn with_default_bar(mut self, bar: usize) -> Self {
        self.default_bar = bar;
        self
    }
}

impl Default for HeciConfig {
    fn default() -> Self {
        Self::DEFAULT
    }
}

/// Handle to the CSE's HECI1 function.
///
/// Created once by the boot orchestration and passed to every caller that
/// needs the controller.  It owns the platform collaborators and the cached
/// register base, so there is no hidden global state.
///
/// The transport methods live in [`transport`], flow control in [`ring`],
/// framing in [`frame`], firmware status in [`crate::status`] and the MKHI
/// commands in [`crate::mkhi`].
pub struct Heci<R: RegisterIo, P: ConfigSpace, C: Clock> {
    pub(crate) window: RegisterWindow<R, P>,
    pub(crate) clock: C,
    pub(crate) config: HeciConfig,
}

impl<R: RegisterIo, P: ConfigSpace, C: Clock> Heci<R, P, C> {
    /// Create a new handle.  No hardware is accessed until the first
    /// operation.
    ///
    /// Arguments:
    /// - `regs` - Memory-mapped register access
    /// - `pci` - The controller's PCI configuration space
    /// - `clock` - Busy-wait delay and time source
    /// - `config` - Timeouts, retry count and addresses
    pub fn new(regs: R, pci: P, clock: C, config: HeciConfig) -> Self {
        Self {
            window: RegisterWindow::new(regs, pci),
            clock,
            config,
        }
    }

    pub fn config(&self) -> &HeciConfig {
        &self.config
    }

    /// Direct access to the register window, for diagnostic consumers.
    pub fn window(&mut self) -> &mut RegisterWindow<R, P> {
        &mut self.window
    }

    /// Install the BAR assigned by the bus resource allocator, replacing any
    /// temporary or lazily-read value.
    pub fn set_base(&mut self, base: usize) {
        self.window.set_base(base);
    }

    /// Program a temporary BAR, for use before the PCI allocator has run.
    ///
    /// Does nothing if a base is already cached.  `None` uses
    /// [`HeciConfig::default_bar`].
    pub fn init_temporary_bar(&mut self, bar: Option<usize>) -> crate::Result<()> {
        let bar = bar.unwrap_or(self.config.default_bar);
        self.window.init_temporary_bar(bar)
    }
}

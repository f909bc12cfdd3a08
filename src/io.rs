//! Traits for the platform services the HECI driver relies on.
//!
//! The driver never touches hardware directly.  Instead the boot stage
//! provides three collaborators:
//!
//! - [`RegisterIo`] - 32-bit access to the controller's memory-mapped
//!   registers, at absolute addresses
//! - [`ConfigSpace`] - access to the controller's PCI configuration space,
//!   used to locate BAR0 and to read the firmware status registers
//! - [`Clock`] - busy-wait delays and a monotonic time source
//!
//! # Possible implementations
//!
//! - On the target: [`VolatileRegisterIo`] for registers, the boot stage's
//!   PCI config accessors (legacy I/O ports or ECAM), and its timer
//! - In tests: a simulated controller sharing state between all three
//!
//! # Address Space
//!
//! [`RegisterIo`] uses absolute addresses, computed by the driver from the
//! cached BAR plus a register offset.  [`ConfigSpace`] uses offsets within
//! the controller's own PCI function; the implementation knows which
//! bus/device/function that is.

// Copyright (C) 2025 Piers Finlayson <piers@piers.rocks>
//
// MIT License

use crate::Result;

/// Trait for accessing the controller's memory-mapped registers.
pub trait RegisterIo {
    /// Read a 32-bit register
    fn read_u32(&mut self, addr: usize) -> Result<u32>;

    /// Write a 32-bit register
    fn write_u32(&mut self, addr: usize, value: u32) -> Result<()>;
}

impl<T: RegisterIo + ?Sized> RegisterIo for &mut T {
    fn read_u32(&mut self, addr: usize) -> Result<u32> {
        (**self).read_u32(addr)
    }

    fn write_u32(&mut self, addr: usize, value: u32) -> Result<()> {
        (**self).write_u32(addr, value)
    }
}

/// Trait for accessing the controller's PCI configuration space.
pub trait ConfigSpace {
    /// Read 8 bits at `offset`
    fn read_config8(&mut self, offset: u16) -> Result<u8>;

    /// Read 16 bits at `offset`
    fn read_config16(&mut self, offset: u16) -> Result<u16>;

    /// Read 32 bits at `offset`
    fn read_config32(&mut self, offset: u16) -> Result<u32>;

    /// Write 8 bits at `offset`
    fn write_config8(&mut self, offset: u16, value: u8) -> Result<()>;

    /// Write 32 bits at `offset`
    fn write_config32(&mut self, offset: u16, value: u32) -> Result<()>;

    /// Whether device enumeration found the controller and left it enabled.
    ///
    /// Stages which have not enumerated devices yet keep the default.
    fn device_enabled(&mut self) -> bool {
        true
    }

    /// BAR0 as assigned by the bus resource allocator, once it has run.
    ///
    /// When this returns `Some`, it is used in preference to reading BAR0
    /// from configuration space.
    fn resource_base(&mut self) -> Option<usize> {
        None
    }
}

impl<T: ConfigSpace + ?Sized> ConfigSpace for &mut T {
    fn read_config8(&mut self, offset: u16) -> Result<u8> {
        (**self).read_config8(offset)
    }

    fn read_config16(&mut self, offset: u16) -> Result<u16> {
        (**self).read_config16(offset)
    }

    fn read_config32(&mut self, offset: u16) -> Result<u32> {
        (**self).read_config32(offset)
    }

    fn write_config8(&mut self, offset: u16, value: u8) -> Result<()> {
        (**self).write_config8(offset, value)
    }

    fn write_config32(&mut self, offset: u16, value: u32) -> Result<()> {
        (**self).write_config32(offset, value)
    }

    fn device_enabled(&mut self) -> bool {
        (**self).device_enabled()
    }

    fn resource_base(&mut self) -> Option<usize> {
        (**self).resource_base()
    }
}

/// Busy-wait delay and monotonic time.
///
/// There is no scheduler to yield to during early boot, so [`Self::delay_us`]
/// is expected to spin.
///
/// Example:
///
/// ```rust,ignore
/// struct Tsc;
/// impl Clock for Tsc {
///     fn delay_us(&mut self, us: u32) {
///         let end = self.now_us() + us as u64;
///         while self.now_us() < end {
///             core::hint::spin_loop();
///         }
///     }
///     fn now_us(&mut self) -> u64 {
///         rdtsc() / TSC_MHZ
///     }
/// }
/// ```
pub trait Clock {
    /// Spin for at least `us` microseconds
    fn delay_us(&mut self, us: u32);

    /// Monotonic time in microseconds.  The epoch is arbitrary.
    fn now_us(&mut self) -> u64;
}

impl<T: Clock + ?Sized> Clock for &mut T {
    fn delay_us(&mut self, us: u32) {
        (**self).delay_us(us)
    }

    fn now_us(&mut self) -> u64 {
        (**self).now_us()
    }
}

/// Register I/O implementation using direct volatile memory access.
#[derive(Clone, Copy)]
pub struct VolatileRegisterIo;

impl VolatileRegisterIo {
    /// Create a new VolatileRegisterIo instance.
    ///
    /// ```rust
    /// use cse_heci::io::VolatileRegisterIo;
    /// static REGS: VolatileRegisterIo = VolatileRegisterIo::new();
    /// ```
    // We need a new() rather than a default() as it must be const.
    #[allow(clippy::new_without_default)]
    pub const fn new() -> Self {
        Self {}
    }
}

impl RegisterIo for VolatileRegisterIo {
    fn read_u32(&mut self, addr: usize) -> Result<u32> {
        // Safety: addr is BAR0 plus a fixed register offset, and the BAR
        // has been programmed and decoded before any access.
        Ok(unsafe { core::ptr::read_volatile(addr as *const u32) })
    }

    fn write_u32(&mut self, addr: usize, value: u32) -> Result<()> {
        // Safety: as for read_u32.
        unsafe { core::ptr::write_volatile(addr as *mut u32, value) };
        Ok(())
    }
}

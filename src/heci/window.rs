//! Register window - the controller's four HECI registers behind BAR0.

// Copyright (C) 2025 Piers Finlayson <piers@piers.rocks>
//
// MIT License

#[allow(unused_imports)]
use log::{debug, error, info, trace, warn};

use crate::Result;
use crate::heci::{Csr, MMIO_CSE_CB_RW, MMIO_CSE_CB_WW, MMIO_CSE_CSR, MMIO_HOST_CSR};
use crate::io::{ConfigSpace, RegisterIo};

/// PCI vendor ID register
pub const PCI_VENDOR_ID: u16 = 0x00;
/// PCI command register
pub const PCI_COMMAND: u16 = 0x04;
/// Command register: memory space decode
pub const PCI_COMMAND_MEMORY: u8 = 1 << 1;
/// Command register: bus master
pub const PCI_COMMAND_MASTER: u8 = 1 << 2;
/// BAR0 - lower 32 bits of the HECI register base
pub const PCI_BASE_ADDRESS_0: u16 = 0x10;
/// BAR1 - upper 32 bits of the HECI register base
pub const PCI_BASE_ADDRESS_1: u16 = 0x14;
/// Attribute bits at the bottom of a memory BAR
pub const PCI_BASE_ADDRESS_MEM_ATTR_MASK: u32 = 0x0f;

/// The controller's HECI registers, plus the configuration space used to
/// find them.
///
/// The base address is resolved on first use and cached until replaced by
/// [`Self::set_base`].
pub struct RegisterWindow<R: RegisterIo, P: ConfigSpace> {
    regs: R,
    pci: P,
    base: Option<usize>,
}

impl<R: RegisterIo, P: ConfigSpace> RegisterWindow<R, P> {
    pub fn new(regs: R, pci: P) -> Self {
        Self {
            regs,
            pci,
            base: None,
        }
    }

    /// The controller's configuration space.
    pub fn pci(&mut self) -> &mut P {
        &mut self.pci
    }

    pub fn set_base(&mut self, base: usize) {
        debug!("HECI base set to {base:#010X}");
        self.base = Some(base);
    }

    /// Cached base address, without resolving it.
    pub fn cached_base(&self) -> Option<usize> {
        self.base
    }

    /// Program `bar` into BAR0 and enable decode, unless a base is already
    /// cached.
    ///
    /// Memory decode and bus mastering are disabled while the BAR is
    /// changed.
    pub fn init_temporary_bar(&mut self, bar: usize) -> Result<()> {
        if self.base.is_some() {
            return Ok(());
        }

        let cmd = self.pci.read_config8(PCI_COMMAND)?;
        self.pci.write_config8(
            PCI_COMMAND,
            cmd & !(PCI_COMMAND_MASTER | PCI_COMMAND_MEMORY),
        )?;

        self.pci.write_config32(PCI_BASE_ADDRESS_0, bar as u32)?;
        self.pci.write_config32(PCI_BASE_ADDRESS_1, 0)?;

        let cmd = self.pci.read_config8(PCI_COMMAND)?;
        self.pci
            .write_config8(PCI_COMMAND, cmd | PCI_COMMAND_MASTER | PCI_COMMAND_MEMORY)?;

        debug!("HECI temporary BAR {bar:#010X}");
        self.base = Some(bar);
        Ok(())
    }

    /// Resolve and cache the register base.
    ///
    /// Uses the allocator's assignment if the platform reports one, otherwise
    /// reads BAR0.
    ///
    /// # Panics
    ///
    /// If BAR0 is unprogrammed.  Registers are only accessed after the boot
    /// stage has assigned the BAR, so this is an ordering bug in the caller.
    pub fn base(&mut self) -> Result<usize> {
        if let Some(base) = self.base {
            return Ok(base);
        }

        let base = match self.pci.resource_base() {
            Some(base) => base,
            None => {
                let bar = self.pci.read_config32(PCI_BASE_ADDRESS_0)?;
                assert_ne!(bar, 0, "HECI BAR0 is not programmed");
                (bar & !PCI_BASE_ADDRESS_MEM_ATTR_MASK) as usize
            }
        };

        trace!("HECI base resolved to {base:#010X}");
        self.base = Some(base);
        Ok(base)
    }

    /// Read the register at `offset` from the base.
    pub fn read32(&mut self, offset: usize) -> Result<u32> {
        let base = self.base()?;
        self.regs.read_u32(base + offset)
    }

    /// Write the register at `offset` from the base.
    pub fn write32(&mut self, offset: usize, value: u32) -> Result<()> {
        let base = self.base()?;
        self.regs.write_u32(base + offset, value)
    }

    pub fn host_csr(&mut self) -> Result<Csr> {
        self.read32(MMIO_HOST_CSR).map(Csr::from_raw)
    }

    pub fn write_host_csr(&mut self, csr: Csr) -> Result<()> {
        self.write32(MMIO_HOST_CSR, csr.raw())
    }

    pub fn cse_csr(&mut self) -> Result<Csr> {
        self.read32(MMIO_CSE_CSR).map(Csr::from_raw)
    }

    /// Pop one slot from the CSE-to-host ring.
    pub fn read_slot(&mut self) -> Result<u32> {
        self.read32(MMIO_CSE_CB_RW)
    }

    /// Push one slot into the host-to-CSE ring.
    pub fn write_slot(&mut self, value: u32) -> Result<()> {
        self.write32(MMIO_CSE_CB_WW, value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::{SIM_BAR, SimCse};

    #[test]
    fn test_base_read_lazily_and_masked() {
        let sim = SimCse::new();
        sim.state().bar0 = SIM_BAR as u32 | 0x4;
        let mut window = RegisterWindow::new(sim.regs(), sim.pci());
        assert_eq!(window.cached_base(), None);

        let csr = window.cse_csr().unwrap();
        assert!(csr.ready());
        assert_eq!(window.cached_base(), Some(SIM_BAR));
        assert_eq!(sim.state().bar0_reads, 1);

        // Cached from now on
        window.host_csr().unwrap();
        assert_eq!(sim.state().bar0_reads, 1);
    }

    #[test]
    fn test_resource_base_preferred() {
        let sim = SimCse::new();
        sim.state().resource_base = Some(SIM_BAR);
        sim.state().bar0 = 0;
        let mut window = RegisterWindow::new(sim.regs(), sim.pci());
        assert_eq!(window.base().unwrap(), SIM_BAR);
        assert_eq!(sim.state().bar0_reads, 0);
    }

    #[test]
    #[should_panic(expected = "BAR0 is not programmed")]
    fn test_unprogrammed_bar_asserts() {
        let sim = SimCse::new();
        sim.state().bar0 = 0;
        let mut window = RegisterWindow::new(sim.regs(), sim.pci());
        let _ = window.host_csr();
    }

    #[test]
    fn test_temporary_bar_programs_config_space() {
        let sim = SimCse::new();
        sim.state().bar0 = 0;
        sim.state().command = 0x46;
        let mut window = RegisterWindow::new(sim.regs(), sim.pci());

        window.init_temporary_bar(SIM_BAR).unwrap();
        let state = sim.state();
        assert_eq!(state.bar0, SIM_BAR as u32);
        assert_eq!(state.bar1, 0);
        assert_eq!(state.command, 0x46);
        // Decode was off while the BAR changed
        assert_eq!(state.command_writes[0], 0x40);
        drop(state);
        assert_eq!(window.cached_base(), Some(SIM_BAR));
    }

    #[test]
    fn test_temporary_bar_skipped_when_cached() {
        let sim = SimCse::new();
        let mut window = RegisterWindow::new(sim.regs(), sim.pci());
        window.set_base(SIM_BAR);
        window.init_temporary_bar(0x1000).unwrap();
        assert_eq!(window.cached_base(), Some(SIM_BAR));
        assert!(sim.state().command_writes.is_empty());
    }

    #[test]
    fn test_slot_access_goes_to_windows() {
        let sim = SimCse::new();
        let mut window = RegisterWindow::new(sim.regs(), sim.pci());
        window.write_slot(0x1234_5678).unwrap();
        assert_eq!(sim.state().slot_writes, 1);
        assert_eq!(window.host_csr().unwrap().filled_slots(), 1);
    }
}

//! Ring buffer flow control.
//!
//! The host may only push a slot when the host ring has room, and may only
//! pop a slot once the CSE has filled one.  Both rings advertise their depth
//! in their CSR, which varies by SKU, so capacity is always read from the
//! live register.

// Copyright (C) 2025 Piers Finlayson <piers@piers.rocks>
//
// MIT License

#[allow(unused_imports)]
use log::{debug, error, info, trace, warn};

use crate::Result;
use crate::heci::{Csr, Heci, RegisterWindow};
use crate::io::{Clock, ConfigSpace, RegisterIo};
use crate::time::poll_until;

impl<R: RegisterIo, P: ConfigSpace> RegisterWindow<R, P> {
    /// Free slots in the host-to-CSE ring.
    pub fn host_empty_slots(&mut self) -> Result<usize> {
        Ok(self.host_csr()?.empty_slots())
    }

    /// Slots the CSE has filled and the host has not yet read.
    pub fn cse_filled_slots(&mut self) -> Result<usize> {
        Ok(self.cse_csr()?.filled_slots())
    }

    pub fn cse_ready(&mut self) -> Result<bool> {
        Ok(self.cse_csr()?.ready())
    }

    /// Acknowledge any pending interrupt status.
    pub fn clear_interrupt(&mut self) -> Result<()> {
        let csr = self.host_csr()?;
        self.write_host_csr(csr.with(Csr::IS))
    }

    /// Prompt the CSE to look at the rings.
    ///
    /// There is no interrupt path to the CSE here, only this handshake bit.
    pub fn generate_interrupt(&mut self) -> Result<()> {
        let csr = self.host_csr()?;
        self.write_host_csr(csr.with(Csr::IG))
    }

    /// Mark the host ready to communicate, taking it out of reset.
    pub fn set_host_ready(&mut self) -> Result<()> {
        let csr = self.host_csr()?;
        self.write_host_csr(csr.without(Csr::RESET).with(Csr::IG | Csr::READY))
    }
}

impl<R: RegisterIo, P: ConfigSpace, C: Clock> Heci<R, P, C> {
    /// Wait until the host ring has at least `count` free slots.
    pub fn wait_write_slots(&mut self, count: usize) -> Result<()> {
        let Self {
            window,
            clock,
            config,
        } = self;
        poll_until(clock, config.send_timeout_ms, config.poll_interval_us, || {
            Ok(window.host_empty_slots()? >= count)
        })
        .inspect_err(|_| error!("Timeout, host buffer not drained ({count} slots needed)"))?;
        Ok(())
    }

    /// Wait until the CSE ring holds at least `count` filled slots.
    pub fn wait_read_slots(&mut self, count: usize) -> Result<()> {
        let Self {
            window,
            clock,
            config,
        } = self;
        poll_until(clock, config.read_timeout_ms, config.poll_interval_us, || {
            Ok(window.cse_filled_slots()? >= count)
        })
        .inspect_err(|_| error!("Timed out reading answer ({count} slots needed)"))?;
        Ok(())
    }

    /// Tell the CSE the host is ready, for boot stages which take over a
    /// channel a previous stage left in reset.
    pub fn set_host_ready(&mut self) -> Result<()> {
        self.window.set_host_ready()
    }

    /// Wait for the CSE to set its ready bit.
    pub fn wait_ready(&mut self) -> Result<()> {
        let Self {
            window,
            clock,
            config,
        } = self;
        poll_until(clock, config.ready_timeout_ms, config.poll_interval_us, || {
            window.cse_ready()
        })?;
        Ok(())
    }
}

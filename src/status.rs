//! CSE firmware status registers and mode polling.
//!
//! The Host Firmware Status registers (HFSTS1-6) live in the HECI1
//! function's PCI configuration space, not behind the ring.  The CSE updates
//! them as it boots, so they are always read fresh and never cached.
//!
//! Each register is a value type with accessors for its fields.  Only the
//! accessors know the bit layout.

// Copyright (C) 2025 Piers Finlayson <piers@piers.rocks>
//
// MIT License

#[allow(unused_imports)]
use log::{debug, error, info, trace, warn};

use crate::Result;
use crate::heci::Heci;
use crate::heci::window::PCI_VENDOR_ID;
use crate::io::{Clock, ConfigSpace, RegisterIo};
use crate::time::poll_until;

/// Extract `width` bits of `raw` starting at `shift`.
const fn field(raw: u32, shift: u32, width: u32) -> u32 {
    (raw >> shift) & ((1 << width) - 1)
}

const fn bit(raw: u32, shift: u32) -> bool {
    field(raw, shift, 1) != 0
}

/// Firmware status registers, by configuration space offset
#[repr(u16)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FwStatusRegister {
    Hfsts1 = 0x40,
    Hfsts2 = 0x48,
    Hfsts3 = 0x60,
    Hfsts4 = 0x64,
    Hfsts5 = 0x68,
    Hfsts6 = 0x6c,
}

impl FwStatusRegister {
    pub const fn offset(self) -> u16 {
        self as u16
    }
}

/// HFSTS1 current working state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkingState {
    Reset,
    Initializing,
    Recovery,
    Test,
    Disabled,
    Normal,
    Wait,
    Transition,
    InvalidCpu,
    Unknown(u8),
}

impl From<u8> for WorkingState {
    fn from(value: u8) -> Self {
        match value {
            0 => WorkingState::Reset,
            1 => WorkingState::Initializing,
            2 => WorkingState::Recovery,
            3 => WorkingState::Test,
            4 => WorkingState::Disabled,
            5 => WorkingState::Normal,
            6 => WorkingState::Wait,
            7 => WorkingState::Transition,
            8 => WorkingState::InvalidCpu,
            other => WorkingState::Unknown(other),
        }
    }
}

/// HFSTS1 current operation mode
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationMode {
    Normal,
    /// Entered when the CSE boots from its RO partition
    SoftTemporaryDisable,
    /// Security override, requested by an MEI message
    SecurityOverride,
    Other(u8),
}

impl From<u8> for OperationMode {
    fn from(value: u8) -> Self {
        match value {
            0x0 => OperationMode::Normal,
            0x3 => OperationMode::SoftTemporaryDisable,
            0x5 => OperationMode::SecurityOverride,
            other => OperationMode::Other(other),
        }
    }
}

/// HFSTS3 firmware SKU
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FwSku {
    Consumer,
    Corporate,
    Custom,
    Other(u8),
}

impl From<u8> for FwSku {
    fn from(value: u8) -> Self {
        match value {
            0x2 => FwSku::Consumer,
            0x3 => FwSku::Corporate,
            0x5 => FwSku::Custom,
            other => FwSku::Other(other),
        }
    }
}

/// Host Firmware Status register 1
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Hfsts1(u32);

impl Hfsts1 {
    pub const fn from_raw(raw: u32) -> Self {
        Self(raw)
    }

    pub const fn raw(&self) -> u32 {
        self.0
    }

    pub fn working_state(&self) -> WorkingState {
        WorkingState::from(field(self.0, 0, 4) as u8)
    }

    pub const fn manufacturing_mode(&self) -> bool {
        bit(self.0, 4)
    }

    /// FW partition table is bad
    pub const fn fpt_bad(&self) -> bool {
        bit(self.0, 5)
    }

    pub const fn operation_state(&self) -> u8 {
        field(self.0, 6, 3) as u8
    }

    pub const fn fw_init_complete(&self) -> bool {
        bit(self.0, 9)
    }

    /// Bring-up loader failure
    pub const fn bup_load_failure(&self) -> bool {
        bit(self.0, 10)
    }

    pub const fn update_in_progress(&self) -> bool {
        bit(self.0, 11)
    }

    pub const fn error_code(&self) -> u8 {
        field(self.0, 12, 4) as u8
    }

    pub fn operation_mode(&self) -> OperationMode {
        OperationMode::from(field(self.0, 16, 4) as u8)
    }

    pub const fn reset_count(&self) -> u8 {
        field(self.0, 20, 4) as u8
    }

    pub const fn boot_options_present(&self) -> bool {
        bit(self.0, 24)
    }

    pub const fn bist_test_state(&self) -> bool {
        bit(self.0, 26)
    }

    pub const fn bist_reset_request(&self) -> bool {
        bit(self.0, 27)
    }

    pub const fn current_power_source(&self) -> u8 {
        field(self.0, 28, 2) as u8
    }

    pub const fn d3_support_valid(&self) -> bool {
        bit(self.0, 30)
    }

    pub const fn d0i3_support_valid(&self) -> bool {
        bit(self.0, 31)
    }
}

/// Host Firmware Status register 2
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Hfsts2(u32);

impl Hfsts2 {
    pub const fn from_raw(raw: u32) -> Self {
        Self(raw)
    }

    pub const fn raw(&self) -> u32 {
        self.0
    }

    pub const fn nftp_load_failure(&self) -> bool {
        bit(self.0, 0)
    }

    pub const fn icc_prog_status(&self) -> u8 {
        field(self.0, 1, 2) as u8
    }

    pub const fn invoke_mebx(&self) -> bool {
        bit(self.0, 3)
    }

    pub const fn cpu_replaced(&self) -> bool {
        bit(self.0, 4)
    }

    pub const fn mfs_failure(&self) -> bool {
        bit(self.0, 6)
    }

    pub const fn warm_reset_request(&self) -> bool {
        bit(self.0, 7)
    }

    pub const fn cpu_replaced_valid(&self) -> bool {
        bit(self.0, 8)
    }

    pub const fn low_power_state(&self) -> bool {
        bit(self.0, 9)
    }

    pub const fn me_power_gate(&self) -> bool {
        bit(self.0, 10)
    }

    pub const fn ipu_needed(&self) -> bool {
        bit(self.0, 11)
    }

    pub const fn forced_safe_boot(&self) -> bool {
        bit(self.0, 12)
    }

    pub const fn listener_change(&self) -> bool {
        bit(self.0, 15)
    }

    pub const fn status_data(&self) -> u8 {
        field(self.0, 16, 8) as u8
    }

    pub const fn current_pm_event(&self) -> u8 {
        field(self.0, 24, 4) as u8
    }

    pub const fn phase(&self) -> u8 {
        field(self.0, 28, 4) as u8
    }
}

/// Host Firmware Status register 3
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Hfsts3(u32);

impl Hfsts3 {
    pub const fn from_raw(raw: u32) -> Self {
        Self(raw)
    }

    pub const fn raw(&self) -> u32 {
        self.0
    }

    pub fn fw_sku(&self) -> FwSku {
        FwSku::from(field(self.0, 4, 3) as u8)
    }
}

/// Host Firmware Status register 4
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Hfsts4(u32);

impl Hfsts4 {
    pub const fn from_raw(raw: u32) -> Self {
        Self(raw)
    }

    pub const fn raw(&self) -> u32 {
        self.0
    }

    pub const fn enforcement_flow(&self) -> bool {
        bit(self.0, 9)
    }

    pub const fn sx_resume_type(&self) -> bool {
        bit(self.0, 10)
    }

    pub const fn tpms_disconnected(&self) -> bool {
        bit(self.0, 12)
    }

    pub const fn fwsts_valid(&self) -> bool {
        bit(self.0, 14)
    }

    pub const fn boot_guard_self_test(&self) -> bool {
        bit(self.0, 15)
    }
}

/// Host Firmware Status register 5 - Boot Guard ACM status
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Hfsts5(u32);

impl Hfsts5 {
    pub const fn from_raw(raw: u32) -> Self {
        Self(raw)
    }

    pub const fn raw(&self) -> u32 {
        self.0
    }

    pub const fn acm_active(&self) -> bool {
        bit(self.0, 0)
    }

    pub const fn valid(&self) -> bool {
        bit(self.0, 1)
    }

    pub const fn result_code_source(&self) -> bool {
        bit(self.0, 2)
    }

    pub const fn error_status_code(&self) -> u8 {
        field(self.0, 3, 5) as u8
    }

    pub const fn acm_done(&self) -> bool {
        bit(self.0, 8)
    }

    pub const fn timeout_count(&self) -> u8 {
        field(self.0, 9, 7) as u8
    }

    pub const fn scrtm_indicator(&self) -> bool {
        bit(self.0, 16)
    }

    pub const fn start_enforcement(&self) -> bool {
        bit(self.0, 31)
    }
}

/// Host Firmware Status register 6 - Boot Guard policy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Hfsts6(u32);

impl Hfsts6 {
    pub const fn from_raw(raw: u32) -> Self {
        Self(raw)
    }

    pub const fn raw(&self) -> u32 {
        self.0
    }

    pub const fn force_boot_guard_acm(&self) -> bool {
        bit(self.0, 0)
    }

    pub const fn cpu_debug_disable(&self) -> bool {
        bit(self.0, 1)
    }

    pub const fn bsp_init_disable(&self) -> bool {
        bit(self.0, 2)
    }

    pub const fn protect_bios_env(&self) -> bool {
        bit(self.0, 3)
    }

    pub const fn error_enforce_policy(&self) -> u8 {
        field(self.0, 6, 2) as u8
    }

    pub const fn measured_boot(&self) -> bool {
        bit(self.0, 8)
    }

    pub const fn verified_boot(&self) -> bool {
        bit(self.0, 9)
    }

    pub const fn key_manifest_id(&self) -> u8 {
        field(self.0, 22, 4) as u8
    }

    pub const fn boot_guard_disable(&self) -> bool {
        bit(self.0, 28)
    }

    pub const fn txt_support(&self) -> bool {
        bit(self.0, 31)
    }
}

/// All six firmware status registers, read together.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FwStatus {
    pub hfsts1: Hfsts1,
    pub hfsts2: Hfsts2,
    pub hfsts3: Hfsts3,
    pub hfsts4: Hfsts4,
    pub hfsts5: Hfsts5,
    pub hfsts6: Hfsts6,
}

impl<R: RegisterIo, P: ConfigSpace, C: Clock> Heci<R, P, C> {
    /// Read one firmware status register.
    pub fn read_fw_status(&mut self, reg: FwStatusRegister) -> Result<u32> {
        self.window.pci().read_config32(reg.offset())
    }

    pub fn hfsts1(&mut self) -> Result<Hfsts1> {
        self.read_fw_status(FwStatusRegister::Hfsts1).map(Hfsts1::from_raw)
    }

    pub fn hfsts3(&mut self) -> Result<Hfsts3> {
        self.read_fw_status(FwStatusRegister::Hfsts3).map(Hfsts3::from_raw)
    }

    /// Snapshot of every firmware status register, for diagnostics.
    pub fn fw_status(&mut self) -> Result<FwStatus> {
        Ok(FwStatus {
            hfsts1: self.hfsts1()?,
            hfsts2: Hfsts2::from_raw(self.read_fw_status(FwStatusRegister::Hfsts2)?),
            hfsts3: self.hfsts3()?,
            hfsts4: Hfsts4::from_raw(self.read_fw_status(FwStatusRegister::Hfsts4)?),
            hfsts5: Hfsts5::from_raw(self.read_fw_status(FwStatusRegister::Hfsts5)?),
            hfsts6: Hfsts6::from_raw(self.read_fw_status(FwStatusRegister::Hfsts6)?),
        })
    }

    /// Whether the HECI1 function exists and is visible.
    pub fn is_cse_enabled(&mut self) -> Result<bool> {
        let pci = self.window.pci();
        if !pci.device_enabled() {
            warn!("No CSE device");
            return Ok(false);
        }
        if pci.read_config16(PCI_VENDOR_ID)? == 0xffff {
            warn!("CSE device is hidden");
            return Ok(false);
        }
        Ok(true)
    }

    pub fn is_working_state_normal(&mut self) -> Result<bool> {
        Ok(self.hfsts1()?.working_state() == WorkingState::Normal)
    }

    pub fn is_operation_mode(&mut self, mode: OperationMode) -> Result<bool> {
        Ok(self.hfsts1()?.operation_mode() == mode)
    }

    pub fn is_operation_mode_normal(&mut self) -> Result<bool> {
        self.is_operation_mode(OperationMode::Normal)
    }

    pub fn is_sec_override_mode(&mut self) -> Result<bool> {
        self.is_operation_mode(OperationMode::SecurityOverride)
    }

    pub fn is_soft_temp_disable(&mut self) -> Result<bool> {
        self.is_operation_mode(OperationMode::SoftTemporaryDisable)
    }

    pub fn is_fw_sku_custom(&mut self) -> Result<bool> {
        Ok(self.hfsts3()?.fw_sku() == FwSku::Custom)
    }

    /// Poll HFSTS1 until `reached` holds, for at most `timeout_ms`.
    ///
    /// Returns the time taken in milliseconds.  A timeout is reported as
    /// [`Error::Timeout`](crate::Error::Timeout); what to do about it is up
    /// to the caller.
    pub fn wait_for_mode<F>(&mut self, timeout_ms: u32, mut reached: F) -> Result<u64>
    where
        F: FnMut(Hfsts1) -> bool,
    {
        let Self {
            window,
            clock,
            config,
        } = self;
        poll_until(clock, timeout_ms, config.poll_interval_us, || {
            let raw = window
                .pci()
                .read_config32(FwStatusRegister::Hfsts1.offset())?;
            Ok(reached(Hfsts1::from_raw(raw)))
        })
    }

    /// Wait for the CSE to enter security override mode.
    pub fn wait_sec_override_mode(&mut self) -> Result<u64> {
        let timeout_ms = self.config.sec_override_timeout_ms;
        let elapsed = self
            .wait_for_mode(timeout_ms, |hfsts1| {
                hfsts1.operation_mode() == OperationMode::SecurityOverride
            })
            .inspect_err(|_| error!("Timed out waiting for SEC_OVERRIDE mode"))?;
        debug!("CSE took {elapsed} ms to enter security override mode");
        Ok(elapsed)
    }

    /// Wait for the CSE to boot from its RO partition, which it signals by
    /// entering soft temporary disable mode.
    pub fn wait_soft_temp_disable(&mut self) -> Result<u64> {
        let timeout_ms = self.config.boot_to_ro_timeout_ms;
        let elapsed = self
            .wait_for_mode(timeout_ms, |hfsts1| {
                hfsts1.operation_mode() == OperationMode::SoftTemporaryDisable
            })
            .inspect_err(|_| error!("Timed out waiting for CSE to boot from RO"))?;
        trace!("CSE took {elapsed} ms to boot from RO");
        Ok(elapsed)
    }
}

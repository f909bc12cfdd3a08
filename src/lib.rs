//! Host-side driver for the Intel CSE/ME Host Embedded Controller Interface
//! (HECI), for use during early boot.
//!
//! HECI is a pair of memory-mapped circular buffers between the host CPU and
//! the Converged Security Engine (CSE, also known as the ME).  The host has no
//! interrupts or DMA at this point in boot, so every operation here is a
//! bounded busy-wait poll against the controller's registers.
//!
//! `no_std`, no `alloc`.
//!
//! ## Architecture
//!
//! The controller exposes four 32-bit registers through BAR0 of its PCI
//! function:
//! - **Host write window** (`0x00`): host pushes one 4-byte slot into the
//!   host-to-CSE ring
//! - **Host CSR** (`0x04`): host control/status, including the host ring's
//!   pointers and depth
//! - **CSE read window** (`0x08`): host pops one 4-byte slot from the
//!   CSE-to-host ring
//! - **CSE CSR** (`0x0c`): controller control/status, including the CSE ring's
//!   pointers and ready bit
//!
//! Each logical message is carried as one or more frames.  A frame is a 32-bit
//! header followed by its payload, padded to whole slots.  The header carries
//! the frame's payload length, the host and ME client addresses, and a
//! "message complete" flag which is set only on the final frame.
//!
//! A frame can never exceed the ring depth the controller advertises, so
//! longer messages are fragmented on send and reassembled on receive.  Whole
//! messages, not frames, are retried when the controller drops its ready bit
//! or a wait times out.
//!
//! On top of the transport sit firmware status decoding (the HFSTS registers
//! in PCI configuration space) and a handful of MKHI commands: global reset
//! requests, the HMRFPO enable/status pair and the firmware version query.
//!
//! ## Modules
//!
//! - [`io`] - Traits the platform implements: register access, PCI
//!   configuration space access, and a clock for busy-waits
//! - [`heci`] - The [`heci::Heci`] device handle, ring buffer flow control,
//!   framing and the send/receive/reset transport
//! - [`status`] - Firmware status register decoding and mode polling
//! - [`mkhi`] - MKHI command messages and the commands built on them
//! - [`time`] - Stopwatch and bounded polling on top of [`io::Clock`]
//!
//! ## Getting Started
//!
//! The boot orchestration creates one [`heci::Heci`] for the lifetime of the
//! boot stage, and passes it (by `&mut`) to whatever needs the controller:
//!
//! ```rust,ignore
//! use cse_heci::heci::{Heci, HeciConfig};
//! use cse_heci::io::VolatileRegisterIo;
//!
//! let mut heci = Heci::new(VolatileRegisterIo::new(), pci, clock, HeciConfig::DEFAULT);
//!
//! // Pre-memory, before the PCI allocator has run
//! heci.init_temporary_bar(None)?;
//!
//! if heci.is_cse_enabled()? {
//!     let status = heci.hmrfpo_get_status()?;
//!     // ...
//! }
//! ```
//!
//! The platform supplies the [`io::ConfigSpace`] and [`io::Clock`]
//! implementations.  [`io::VolatileRegisterIo`] is usually sufficient for
//! register access.
//!
//! The transport is single-threaded by construction.  If it is used from a
//! stage where more than one CPU may run, the caller must serialise every
//! call on the [`heci::Heci`] handle.

// Copyright (C) 2025 Piers Finlayson <piers@piers.rocks>
//
// MIT License

#![cfg_attr(not(test), no_std)]

pub mod heci;
pub mod io;
pub mod mkhi;
pub mod status;
pub mod time;

#[cfg(test)]
pub(crate) mod sim;

/// HECI errors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// A bounded wait expired before the controller reached the required
    /// state
    Timeout,
    /// Controller dropped its ready bit during a transfer
    NotReady,
    /// Controller advertises a ring too small to carry a frame
    NoCapacity,
    /// Inbound frame is larger than the remaining buffer
    BufferTooSmall,
    /// Buffer filled before the final frame of the message arrived
    Truncated,
    /// Controller is not in the mode the command requires
    InvalidMode,
    /// Unsupported reset type
    InvalidResetType,
    /// Channel reset did not complete
    ResetFailed,
    /// Controller returned a non-zero result code
    CommandFailed(u8),
    /// Reply does not answer the request which was sent
    UnexpectedResponse,
    /// Reply is too short for the command
    ShortResponse,
    /// I/O error
    Io,
}

impl Error {
    /// Whether a whole-message retry may clear this error.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::Timeout | Error::NotReady | Error::Io)
    }
}

/// Type to represent the result of a HECI operation
pub type Result<T> = core::result::Result<T, Error>;

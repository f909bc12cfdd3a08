//! Message framing, fragmentation and single-frame transfer.
//!
//! A frame is one [`MeiHeader`] slot followed by the frame's payload, padded
//! to whole slots.  The header's length field is 9 bits wide and the frame
//! (header included) must fit in the ring, so logical messages longer than
//! [`max_frame_len`] are split by [`Fragments`].

// Copyright (C) 2025 Piers Finlayson <piers@piers.rocks>
//
// MIT License

#[allow(unused_imports)]
use log::{debug, error, info, trace, warn};

use crate::heci::{Csr, Heci, SLOT_SIZE, bytes_to_slots};
use crate::io::{Clock, ConfigSpace, RegisterIo};
use crate::{Error, Result};

/// Frame header.
///
/// ```text
///  31  30      25 24         16 15          8 7           0
/// +---+----------+-------------+-------------+-------------+
/// | C | reserved |   length    |  host addr  | client addr |
/// +---+----------+-------------+-------------+-------------+
/// ```
///
/// `length` is the payload length of this frame only, in bytes.  `C` marks
/// the final frame of a logical message.  The same layout is used in both
/// directions: the host address is always bits 15:8 and the CSE client
/// address always bits 7:0.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MeiHeader(u32);

impl MeiHeader {
    const COMPLETE: u32 = 1 << 31;
    const LENGTH_SHIFT: u32 = 16;
    const LENGTH_BITS: u32 = 9;
    const LENGTH_MASK: u32 = (1 << Self::LENGTH_BITS) - 1;
    const HOST_ADDR_SHIFT: u32 = 8;
    const CLIENT_ADDR_SHIFT: u32 = 0;

    /// Largest length the header can express
    pub const MAX_LENGTH: usize = Self::LENGTH_MASK as usize;

    /// Build a header.  `length` is truncated to 9 bits; callers keep it
    /// within [`max_frame_len`].
    pub const fn new(length: usize, host_addr: u8, client_addr: u8, complete: bool) -> Self {
        let mut raw = ((length as u32) & Self::LENGTH_MASK) << Self::LENGTH_SHIFT;
        raw |= (host_addr as u32) << Self::HOST_ADDR_SHIFT;
        raw |= (client_addr as u32) << Self::CLIENT_ADDR_SHIFT;
        if complete {
            raw |= Self::COMPLETE;
        }
        Self(raw)
    }

    pub const fn from_raw(raw: u32) -> Self {
        Self(raw)
    }

    pub const fn raw(&self) -> u32 {
        self.0
    }

    /// Payload length of this frame in bytes
    pub const fn length(&self) -> usize {
        ((self.0 >> Self::LENGTH_SHIFT) & Self::LENGTH_MASK) as usize
    }

    pub const fn host_addr(&self) -> u8 {
        (self.0 >> Self::HOST_ADDR_SHIFT) as u8
    }

    pub const fn client_addr(&self) -> u8 {
        (self.0 >> Self::CLIENT_ADDR_SHIFT) as u8
    }

    /// Whether this is the final frame of a logical message
    pub const fn is_complete(&self) -> bool {
        self.0 & Self::COMPLETE != 0
    }
}

/// Largest frame payload the ring described by `csr` can carry.
///
/// One slot of the ring is reserved for the header, and the header can't
/// express more than [`MeiHeader::MAX_LENGTH`].
pub fn max_frame_len(csr: Csr) -> usize {
    csr.capacity_bytes()
        .min(MeiHeader::MAX_LENGTH)
        .saturating_sub(SLOT_SIZE)
}

/// Splits a logical message into frame lengths.
///
/// Yields `(length, complete)` for each frame in order.  Only the last frame
/// is complete.  An empty message is a single complete, empty frame.
#[derive(Debug, Clone)]
pub struct Fragments {
    remaining: usize,
    max_len: usize,
    done: bool,
}

impl Fragments {
    /// `max_len` must be non-zero unless `len` is zero.
    pub fn new(len: usize, max_len: usize) -> Self {
        Self {
            remaining: len,
            max_len,
            done: false,
        }
    }
}

impl Iterator for Fragments {
    type Item = (usize, bool);

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        let len = self.remaining.min(self.max_len);
        let complete = len == self.remaining;
        self.remaining -= len;
        self.done = complete;
        Some((len, complete))
    }
}

impl<R: RegisterIo, P: ConfigSpace, C: Clock> Heci<R, P, C> {
    /// Send one frame: `header` followed by `payload`.
    ///
    /// `payload` must be at least as long as the header's length field; only
    /// that many bytes are sent.  A trailing partial slot is zero-padded.
    ///
    /// Returns the number of payload bytes sent.  Fails with
    /// [`Error::NotReady`] if the CSE dropped its ready bit while the frame
    /// was in flight, in which case the frame must be treated as lost.
    pub fn send_frame(&mut self, header: MeiHeader, payload: &[u8]) -> Result<usize> {
        let len = header.length();
        let payload = payload.get(..len).ok_or(Error::BufferTooSmall)?;

        self.wait_write_slots(1)?;
        self.window.write_slot(header.raw())?;

        self.wait_write_slots(bytes_to_slots(len))?;

        let mut chunks = payload.chunks_exact(SLOT_SIZE);
        for chunk in &mut chunks {
            let word = u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
            self.window.write_slot(word)?;
        }

        // Pad to a whole slot without reading past the payload
        let tail = chunks.remainder();
        if !tail.is_empty() {
            let mut last = [0u8; SLOT_SIZE];
            last[..tail.len()].copy_from_slice(tail);
            self.window.write_slot(u32::from_le_bytes(last))?;
        }

        self.window.generate_interrupt()?;

        if !self.window.cse_ready()? {
            warn!("CSE not ready after sending frame {:#010X}", header.raw());
            return Err(Error::NotReady);
        }

        trace!("Sent frame {:#010X}", header.raw());
        Ok(len)
    }

    /// Receive one frame into `buf`.
    ///
    /// Returns the frame's header and payload length.  A frame longer than
    /// `buf` is rejected with [`Error::BufferTooSmall`] before any of its
    /// payload is read.
    pub fn receive_frame(&mut self, buf: &mut [u8]) -> Result<(MeiHeader, usize)> {
        self.wait_read_slots(1)?;

        let header = MeiHeader::from_raw(self.window.read_slot()?);
        let len = header.length();
        if len == 0 {
            warn!("Frame {:#010X} is zero-sized", header.raw());
        }

        if len > buf.len() {
            error!("Frame of {len} bytes too big for {} byte buffer", buf.len());
            return Err(Error::BufferTooSmall);
        }

        self.wait_read_slots(bytes_to_slots(len))?;

        let (whole, tail) = buf[..len].split_at_mut(len - len % SLOT_SIZE);
        for chunk in whole.chunks_exact_mut(SLOT_SIZE) {
            chunk.copy_from_slice(&self.window.read_slot()?.to_le_bytes());
        }

        // If the CSE is no longer ready then what we read is junk
        if !self.window.cse_ready()? {
            warn!("CSE not ready while receiving frame {:#010X}", header.raw());
            return Err(Error::NotReady);
        }

        if !tail.is_empty() {
            let last = self.window.read_slot()?.to_le_bytes();
            tail.copy_from_slice(&last[..tail.len()]);
        }

        trace!("Received frame {:#010X}", header.raw());
        Ok((header, len))
    }
}

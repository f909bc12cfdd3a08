//! Whole-message send, receive and channel reset.
//!
//! Retries happen here and only here.  A failure anywhere in a message
//! abandons the whole message and starts it again from the first frame, so
//! the CSE never sees a partial message presented as complete.

// Copyright (C) 2025 Piers Finlayson <piers@piers.rocks>
//
// MIT License

#[allow(unused_imports)]
use log::{debug, error, info, trace, warn};

use crate::heci::frame::max_frame_len;
use crate::heci::{Csr, Fragments, Heci, MeiHeader};
use crate::io::{Clock, ConfigSpace, RegisterIo};
use crate::{Error, Result};

/// Run `attempt` up to `attempts` times, until it succeeds or fails with an
/// error that is not [retryable](Error::is_retryable).
///
/// `attempt` is passed the zero-based attempt number.  If every attempt
/// fails, the last error is returned.
pub fn with_retries<T, F>(attempts: u8, mut attempt: F) -> Result<T>
where
    F: FnMut(u8) -> Result<T>,
{
    let mut last = Error::Timeout;
    for n in 0..attempts {
        match attempt(n) {
            Ok(value) => return Ok(value),
            Err(e) if e.is_retryable() => {
                debug!("Attempt {} of {attempts} failed: {e:?}", n + 1);
                last = e;
            }
            Err(e) => return Err(e),
        }
    }
    Err(last)
}

impl<R: RegisterIo, P: ConfigSpace, C: Clock> Heci<R, P, C> {
    /// Send a logical message to CSE client `client_addr`.
    ///
    /// The message is fragmented to fit the ring the CSE currently
    /// advertises.  Succeeds only once every byte has been accepted.
    ///
    /// Arguments:
    /// - `msg` - Message to send
    /// - `host_addr` - Host address to send from
    /// - `client_addr` - CSE client address to send to
    pub fn send(&mut self, msg: &[u8], host_addr: u8, client_addr: u8) -> Result<()> {
        self.window.clear_interrupt()?;

        let attempts = self.config.retry_count;
        with_retries(attempts, |_| self.send_attempt(msg, host_addr, client_addr))
            .inspect_err(|e| error!("Send of {} bytes failed: {e:?}", msg.len()))
    }

    /// Receive a logical message into `buf`.
    ///
    /// Frames are appended to `buf` until one marked complete arrives.
    ///
    /// Only the wait for the CSE to be ready with the first frame is retried.
    /// Once a slot has been read the host is part way through the CSE's
    /// message, so any later failure ends the receive.
    ///
    /// Returns:
    /// - `Ok(len)`: the message occupies `buf[..len]`
    /// - `Err(Error::BufferTooSmall)`: a frame would have overrun `buf`
    /// - `Err(Error::Truncated)`: `buf` filled before the final frame
    /// - `Err(e)`: every attempt failed, `e` from the last one
    pub fn receive(&mut self, buf: &mut [u8]) -> Result<usize> {
        self.window.clear_interrupt()?;

        let attempts = self.config.retry_count;
        with_retries(attempts, |_| self.wait_first_frame())
            .and_then(|()| self.receive_message(buf))
            .inspect_err(|e| error!("Receive failed: {e:?}"))
    }

    /// Send `msg` to the MKHI client, then receive its reply into `reply`.
    ///
    /// If `reply` is `None` the message is sent without waiting for a
    /// response, and `Ok(0)` is returned.
    pub fn send_then_receive(&mut self, msg: &[u8], reply: Option<&mut [u8]>) -> Result<usize> {
        let (host_addr, client_addr) = (self.config.host_addr, self.config.mkhi_addr);
        self.send(msg, host_addr, client_addr)?;

        match reply {
            Some(buf) => self.receive(buf),
            None => Ok(0),
        }
    }

    /// Reset the channel, to recover when the host and CSE are out of step.
    ///
    /// Not retried: if the CSE doesn't come back the channel is unusable.
    pub fn reset(&mut self) -> Result<()> {
        let csr = self.window.host_csr()?;
        self.window.write_host_csr(csr.with(Csr::RESET | Csr::IG))?;

        match self.wait_ready() {
            Ok(()) => {
                debug!("HECI reset complete");
                self.window.set_host_ready()
            }
            Err(Error::Timeout) => {
                error!("HECI reset failed");
                Err(Error::ResetFailed)
            }
            Err(e) => Err(e),
        }
    }
}

// Internal functions
impl<R: RegisterIo, P: ConfigSpace, C: Clock> Heci<R, P, C> {
    fn send_attempt(&mut self, msg: &[u8], host_addr: u8, client_addr: u8) -> Result<()> {
        self.wait_ready().inspect_err(|_| error!("HECI not ready"))?;

        // The ring may have changed size if the channel was reset
        let max_len = max_frame_len(self.window.host_csr()?);
        if max_len == 0 && !msg.is_empty() {
            error!("Host ring too small to carry a frame");
            return Err(Error::NoCapacity);
        }

        let mut offset = 0;
        for (len, complete) in Fragments::new(msg.len(), max_len) {
            let header = MeiHeader::new(len, host_addr, client_addr, complete);
            offset += self.send_frame(header, &msg[offset..])?;
        }

        debug!("Sent {offset} byte message to client {client_addr:#04X}");
        Ok(())
    }

    /// Wait for the CSE to be ready and to have queued the first frame's
    /// header.  Consumes nothing, so may be retried.
    fn wait_first_frame(&mut self) -> Result<()> {
        self.wait_ready().inspect_err(|_| error!("HECI not ready"))?;
        self.wait_read_slots(1)
    }

    fn receive_message(&mut self, buf: &mut [u8]) -> Result<usize> {
        let mut received = 0;
        loop {
            let (header, len) = self.receive_frame(&mut buf[received..])?;
            received += len;

            if header.is_complete() {
                debug!("Received {received} byte message");
                return Ok(received);
            }

            if received == buf.len() {
                error!("Message larger than {received} byte buffer");
                return Err(Error::Truncated);
            }

            // The CSE waits to be prompted before queueing the next frame
            if self.window.cse_filled_slots()? == 0 {
                self.window.generate_interrupt()?;
            }
        }
    }
}

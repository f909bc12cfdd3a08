//! Simulated CSE for unit tests.
//!
//! One shared [`State`] sits behind the register, configuration space and
//! clock handles, so the controller sees the host's writes and the passage
//! of time.  Host frames are parsed when the host sets IG, complete
//! messages are recorded and optionally answered by a responder, and
//! replies are queued into the CSE ring a frame at a time as room allows.

// Copyright (C) 2025 Piers Finlayson <piers@piers.rocks>
//
// MIT License

use std::cell::{RefCell, RefMut};
use std::collections::VecDeque;
use std::rc::Rc;

use crate::Result;
use crate::heci::frame::max_frame_len;
use crate::heci::{
    Csr, Fragments, Heci, HeciConfig, MMIO_CSE_CB_RW, MMIO_CSE_CB_WW, MMIO_CSE_CSR,
    MMIO_HOST_CSR, MeiHeader, SLOT_SIZE, bytes_to_slots,
};
use crate::io::{Clock, ConfigSpace, RegisterIo};

pub const SIM_BAR: usize = 0xfeda_2000;

/// Pointers start near the top of their range so that every test crosses
/// the 8-bit wrap.
const POINTER_START: u8 = 250;

/// How long the simulated CSE takes to come back after a reset or a
/// dropped ready bit
const RECOVERY_US: u64 = 1_000;

type Responder = Box<dyn FnMut(&[u8]) -> Option<Vec<u8>>>;

pub struct State {
    // Configuration space
    pub bar0: u32,
    pub bar1: u32,
    pub bar0_reads: usize,
    pub resource_base: Option<usize>,
    pub command: u8,
    pub command_writes: Vec<u8>,
    pub vendor_id: u16,
    pub enabled: bool,
    /// HFSTS1..6
    pub hfsts: [u32; 6],

    // Rings
    pub depth: u8,
    pub host_ctrl: u32,
    host_fifo: VecDeque<u32>,
    host_rp: u8,
    host_wp: u8,
    cse_fifo: VecDeque<u32>,
    cse_rp: u8,
    cse_wp: u8,
    /// When the CSE ready bit comes up; `None` for never
    pub ready_at_us: Option<u64>,
    /// Whether the CSE comes back after a channel reset
    pub reset_recovers: bool,

    pub now_us: u64,

    // Behaviour
    /// Drain host frames without interpreting them
    pub capture_only: bool,
    /// Drop the ready bit when this (zero-based) host frame arrives
    pub drop_ready_on_frame: Option<usize>,
    /// Drop the ready bit once the host has read this many CSE slots
    pub drop_ready_after_reads: Option<usize>,
    responder: Option<Responder>,
    partial: Vec<u8>,
    pending_reply: VecDeque<Vec<u32>>,

    // Observations
    pub raw_host_slots: Vec<u32>,
    pub headers: Vec<MeiHeader>,
    pub messages: Vec<Vec<u8>>,
    pub slot_writes: usize,
    pub cse_slot_reads: usize,
    pub interrupts: usize,
    pub resets: usize,
}

impl State {
    fn new() -> Self {
        Self {
            bar0: SIM_BAR as u32,
            bar1: 0,
            bar0_reads: 0,
            resource_base: None,
            command: 0x06,
            command_writes: Vec::new(),
            vendor_id: 0x8086,
            enabled: true,
            // Normal working state, FW init complete / consumer SKU
            hfsts: [0x0000_0205, 0, 0x0000_0020, 0, 0, 0],
            depth: 0x80,
            host_ctrl: Csr::READY,
            host_fifo: VecDeque::new(),
            host_rp: POINTER_START,
            host_wp: POINTER_START,
            cse_fifo: VecDeque::new(),
            cse_rp: POINTER_START,
            cse_wp: POINTER_START,
            ready_at_us: Some(0),
            reset_recovers: true,
            now_us: 0,
            capture_only: false,
            drop_ready_on_frame: None,
            drop_ready_after_reads: None,
            responder: None,
            partial: Vec::new(),
            pending_reply: VecDeque::new(),
            raw_host_slots: Vec::new(),
            headers: Vec::new(),
            messages: Vec::new(),
            slot_writes: 0,
            cse_slot_reads: 0,
            interrupts: 0,
            resets: 0,
        }
    }

    fn cse_ready(&self) -> bool {
        self.ready_at_us.is_some_and(|at| self.now_us >= at)
    }

    fn host_csr(&self) -> u32 {
        self.host_ctrl
            | (self.host_rp as u32) << 8
            | (self.host_wp as u32) << 16
            | (self.depth as u32) << 24
    }

    fn cse_csr(&self) -> u32 {
        let ready = if self.cse_ready() { Csr::READY } else { 0 };
        ready | (self.cse_rp as u32) << 8 | (self.cse_wp as u32) << 16 | (self.depth as u32) << 24
    }

    fn write_host_slot(&mut self, value: u32) {
        self.slot_writes += 1;
        self.raw_host_slots.push(value);
        self.host_fifo.push_back(value);
        self.host_wp = self.host_wp.wrapping_add(1);
        assert!(
            self.host_fifo.len() <= self.depth as usize,
            "host overran the ring"
        );
    }

    fn read_cse_slot(&mut self) -> u32 {
        self.cse_slot_reads += 1;
        if self.drop_ready_after_reads == Some(self.cse_slot_reads) {
            self.drop_ready_after_reads = None;
            self.ready_at_us = Some(self.now_us + RECOVERY_US);
        }
        match self.cse_fifo.pop_front() {
            Some(value) => {
                self.cse_rp = self.cse_rp.wrapping_add(1);
                value
            }
            None => 0,
        }
    }

    fn write_host_csr(&mut self, value: u32) {
        let old = self.host_ctrl;
        let mut ctrl = old;
        if value & Csr::IS != 0 {
            ctrl &= !Csr::IS;
        }
        self.host_ctrl = (ctrl & Csr::IS) | (value & (Csr::IE | Csr::READY | Csr::RESET));

        if value & Csr::RESET != 0 && old & Csr::RESET == 0 {
            self.reset();
        }
        if value & Csr::IG != 0 {
            self.interrupts += 1;
            self.process_host_ring();
            self.pump_reply();
        }
    }

    fn reset(&mut self) {
        self.resets += 1;
        self.host_fifo.clear();
        self.host_rp = self.host_wp;
        self.cse_fifo.clear();
        self.cse_rp = self.cse_wp;
        self.partial.clear();
        self.pending_reply.clear();
        self.ready_at_us = self
            .reset_recovers
            .then_some(self.now_us + RECOVERY_US);
    }

    fn pop_host_slot(&mut self) -> u32 {
        self.host_rp = self.host_rp.wrapping_add(1);
        self.host_fifo.pop_front().unwrap()
    }

    fn process_host_ring(&mut self) {
        if self.capture_only {
            while !self.host_fifo.is_empty() {
                self.pop_host_slot();
            }
            return;
        }

        while let Some(&raw) = self.host_fifo.front() {
            let header = MeiHeader::from_raw(raw);
            let slots = bytes_to_slots(header.length());
            if self.host_fifo.len() < 1 + slots {
                // Rest of the frame not written yet
                return;
            }
            self.pop_host_slot();
            let mut body = Vec::with_capacity(slots * SLOT_SIZE);
            for _ in 0..slots {
                let word = self.pop_host_slot();
                body.extend_from_slice(&word.to_le_bytes());
            }
            body.truncate(header.length());

            let index = self.headers.len();
            self.headers.push(header);

            if self.drop_ready_on_frame == Some(index) {
                // Lose the frame and resynchronise on the next header
                self.drop_ready_on_frame = None;
                self.ready_at_us = Some(self.now_us + RECOVERY_US);
                self.partial.clear();
                continue;
            }

            self.partial.extend_from_slice(&body);
            if header.is_complete() {
                let msg = core::mem::take(&mut self.partial);
                self.messages.push(msg.clone());
                let reply = self.responder.as_mut().and_then(|respond| respond(&msg));
                if let Some(reply) = reply {
                    self.queue_frames(&reply, header.host_addr(), header.client_addr());
                }
            }
        }
    }

    fn queue_frames(&mut self, msg: &[u8], host_addr: u8, client_addr: u8) {
        let max_len = max_frame_len(Csr::from_raw((self.depth as u32) << 24));
        let mut offset = 0;
        for (len, complete) in Fragments::new(msg.len(), max_len) {
            let header = MeiHeader::new(len, host_addr, client_addr, complete);
            let mut frame = vec![header.raw()];
            for chunk in msg[offset..offset + len].chunks(SLOT_SIZE) {
                let mut word = [0u8; SLOT_SIZE];
                word[..chunk.len()].copy_from_slice(chunk);
                frame.push(u32::from_le_bytes(word));
            }
            offset += len;
            self.pending_reply.push_back(frame);
        }
    }

    fn pump_reply(&mut self) {
        while let Some(frame) = self.pending_reply.front() {
            if (self.depth as usize).saturating_sub(self.cse_fifo.len()) < frame.len() {
                return;
            }
            let frame = self.pending_reply.pop_front().unwrap();
            self.cse_wp = self.cse_wp.wrapping_add(frame.len() as u8);
            self.cse_fifo.extend(frame);
        }
    }
}

/// Handle to a simulated CSE.  Clone-free: hand out as many register,
/// configuration space and clock handles as needed.
pub struct SimCse {
    state: Rc<RefCell<State>>,
}

impl SimCse {
    pub fn new() -> Self {
        Self {
            state: Rc::new(RefCell::new(State::new())),
        }
    }

    pub fn state(&self) -> RefMut<'_, State> {
        self.state.borrow_mut()
    }

    pub fn regs(&self) -> SimRegs {
        SimRegs(self.state.clone())
    }

    pub fn pci(&self) -> SimPci {
        SimPci(self.state.clone())
    }

    pub fn clock(&self) -> SimClock {
        SimClock(self.state.clone())
    }

    pub fn heci(&self, config: HeciConfig) -> Heci<SimRegs, SimPci, SimClock> {
        Heci::new(self.regs(), self.pci(), self.clock(), config)
    }

    pub fn now_us(&self) -> u64 {
        self.state.borrow().now_us
    }

    pub fn set_responder<F>(&self, responder: F)
    where
        F: FnMut(&[u8]) -> Option<Vec<u8>> + 'static,
    {
        self.state().responder = Some(Box::new(responder));
    }

    /// Queue a reply as if the CSE had just answered a request.
    pub fn queue_reply(&self, msg: &[u8]) {
        let mut state = self.state();
        state.queue_frames(msg, 0x00, 0x07);
        state.pump_reply();
    }

    /// Place raw slots in the CSE ring, bypassing framing.
    pub fn queue_raw_slots(&self, slots: &[u32]) {
        let mut state = self.state();
        state.cse_fifo.extend(slots.iter().copied());
        state.cse_wp = state.cse_wp.wrapping_add(slots.len() as u8);
    }
}

pub struct SimRegs(Rc<RefCell<State>>);

impl RegisterIo for SimRegs {
    fn read_u32(&mut self, addr: usize) -> Result<u32> {
        let mut state = self.0.borrow_mut();
        Ok(match addr - SIM_BAR {
            MMIO_HOST_CSR => state.host_csr(),
            MMIO_CSE_CSR => state.cse_csr(),
            MMIO_CSE_CB_RW => state.read_cse_slot(),
            offset => panic!("read of unexpected register {offset:#x}"),
        })
    }

    fn write_u32(&mut self, addr: usize, value: u32) -> Result<()> {
        let mut state = self.0.borrow_mut();
        match addr - SIM_BAR {
            MMIO_CSE_CB_WW => state.write_host_slot(value),
            MMIO_HOST_CSR => state.write_host_csr(value),
            offset => panic!("write of unexpected register {offset:#x}"),
        }
        Ok(())
    }
}

pub struct SimPci(Rc<RefCell<State>>);

impl ConfigSpace for SimPci {
    fn read_config8(&mut self, offset: u16) -> Result<u8> {
        let state = self.0.borrow();
        Ok(match offset {
            0x04 => state.command,
            _ => 0,
        })
    }

    fn read_config16(&mut self, offset: u16) -> Result<u16> {
        let state = self.0.borrow();
        Ok(match offset {
            0x00 => state.vendor_id,
            _ => 0,
        })
    }

    fn read_config32(&mut self, offset: u16) -> Result<u32> {
        let mut state = self.0.borrow_mut();
        Ok(match offset {
            0x10 => {
                state.bar0_reads += 1;
                state.bar0
            }
            0x14 => state.bar1,
            0x40 => state.hfsts[0],
            0x48 => state.hfsts[1],
            0x60 => state.hfsts[2],
            0x64 => state.hfsts[3],
            0x68 => state.hfsts[4],
            0x6c => state.hfsts[5],
            _ => 0,
        })
    }

    fn write_config8(&mut self, offset: u16, value: u8) -> Result<()> {
        let mut state = self.0.borrow_mut();
        if offset == 0x04 {
            state.command = value;
            state.command_writes.push(value);
        }
        Ok(())
    }

    fn write_config32(&mut self, offset: u16, value: u32) -> Result<()> {
        let mut state = self.0.borrow_mut();
        match offset {
            0x10 => state.bar0 = value,
            0x14 => state.bar1 = value,
            _ => {}
        }
        Ok(())
    }

    fn device_enabled(&mut self) -> bool {
        self.0.borrow().enabled
    }

    fn resource_base(&mut self) -> Option<usize> {
        self.0.borrow().resource_base
    }
}

pub struct SimClock(Rc<RefCell<State>>);

impl Clock for SimClock {
    fn delay_us(&mut self, us: u32) {
        self.0.borrow_mut().now_us += us as u64;
    }

    fn now_us(&mut self) -> u64 {
        self.0.borrow().now_us
    }
}

//! Shared test helpers: a minimal packet encoder and clock stepping.

#![allow(dead_code)]

use ctf_shm_transport::{Clock, CoreCoords, DownCounter, PacketEncoder, SoftCounter};

/// Packet layout written by [`SeqEncoder`]:
///
/// | bytes  | field                       |
/// |--------|-----------------------------|
/// | 0..4   | packet sequence number (LE) |
/// | 4..8   | core index (LE)             |
/// | 8..16  | begin timestamp (LE)        |
/// | 16..24 | end timestamp (LE)          |
/// | 24..28 | event count (LE)            |
#[derive(Default)]
pub struct SeqEncoder {
    pub seq: u32,
    pub events: u32,
    open: bool,
}

impl SeqEncoder {
    pub fn add_event(&mut self) {
        self.events += 1;
    }
}

impl<const P: usize> PacketEncoder<P> for SeqEncoder {
    fn open(&mut self, packet: &mut [u8; P], timestamp: u64, core: CoreCoords) {
        packet.fill(0);
        packet[0..4].copy_from_slice(&self.seq.to_le_bytes());
        packet[4..8].copy_from_slice(&(core.index() as u32).to_le_bytes());
        packet[8..16].copy_from_slice(&timestamp.to_le_bytes());
        self.events = 0;
        self.open = true;
    }

    fn close(&mut self, packet: &mut [u8; P], timestamp: u64) {
        packet[16..24].copy_from_slice(&timestamp.to_le_bytes());
        packet[24..28].copy_from_slice(&self.events.to_le_bytes());
        self.seq = self.seq.wrapping_add(1);
        self.open = false;
    }

    fn is_open(&self) -> bool {
        self.open
    }

    fn is_empty(&self) -> bool {
        self.events == 0
    }
}

/// Decoded header of a [`SeqEncoder`] packet.
#[derive(Debug, PartialEq, Eq)]
pub struct Header {
    pub seq: u32,
    pub core: u32,
    pub begin: u64,
    pub end: u64,
    pub events: u32,
}

pub fn decode(packet: &[u8]) -> Header {
    let u32_at = |at: usize| u32::from_le_bytes(packet[at..at + 4].try_into().unwrap());
    let u64_at = |at: usize| u64::from_le_bytes(packet[at..at + 8].try_into().unwrap());

    Header {
        seq: u32_at(0),
        core: u32_at(4),
        begin: u64_at(8),
        end: u64_at(16),
        events: u32_at(24),
    }
}

/// Advance a simulated clock, running the underflow handler when due.
pub fn advance<const BITS: u32>(clock: &Clock<SoftCounter<BITS>>, ticks: u64) {
    let mut left = ticks;
    while left > 0 {
        let step = left.min(clock.counter().read().max(1));
        if clock.counter().tick(step) {
            clock.on_underflow();
        }
        left -= step;
    }
}

//! Lock-free SPSC packet ring buffer living in shared memory.
//!
//! One ring buffer per producer core. This is the only structure both sides
//! of the transport touch.
//!
//! # Architecture
//!
//! ```text
//! Producer core ──write_slot──▶ [P0][P1][P2][P3] ──with_slot──▶ Consumer process
//!               ──producer_index──▶          ◀──consumer_index──
//! ```
//!
//! # Rules (from ARCHITECTURE.md §3)
//!
//! - RULE 3.1.1: Only the producer writes `producer_index` and slot bytes
//! - RULE 3.1.2: Only the consumer writes `consumer_index`
//! - RULE 3.1.3: No compare-and-swap, only loads, stores and barriers
//! - RULE 3.2.1: Full barrier between slot write and `producer_index` store
//! - RULE 3.2.2: Full barrier between slot read and `consumer_index` store
//! - RULE 3.3.1: `producer_index - consumer_index` never exceeds capacity

use core::cell::UnsafeCell;
use core::sync::atomic::{fence, AtomicU32, AtomicU8, Ordering};

use crate::config::{DEBUG_TEXT_LEN, PACKET_SIZE, RINGBUF_SIZE};

/// Full memory barrier (orders both loads and stores).
#[inline(always)]
pub fn full_barrier() {
    fence(Ordering::SeqCst);
}

/// Fixed-capacity ring of fixed-size packet slots.
///
/// `#[repr(C)]` because producers and the consumer may be separate images
/// mapping the same memory: the layout is consumer index, producer index,
/// `N` packets of `P` bytes, then the optional debug text.
///
/// An all-zero bit pattern is a valid, empty ring buffer.
///
/// # Safety
///
/// This type uses `UnsafeCell` internally but is safe to use because:
/// - Single producer per ring (enforced by design, not by type system)
/// - Single consumer process for all rings
/// - A slot is only written while unpublished and only read while published
#[repr(C)]
pub struct RingBuffer<const N: usize = RINGBUF_SIZE, const P: usize = PACKET_SIZE> {
    consumer_index: AtomicU32,
    producer_index: AtomicU32,
    packets: UnsafeCell<[[u8; P]; N]>,
    debug_text: [AtomicU8; DEBUG_TEXT_LEN],
}

// SAFETY: Single producer, single consumer, coordinated by the index
// protocol. No slot is accessed by both sides at the same time.
unsafe impl<const N: usize, const P: usize> Sync for RingBuffer<N, P> {}
unsafe impl<const N: usize, const P: usize> Send for RingBuffer<N, P> {}

impl<const N: usize, const P: usize> RingBuffer<N, P> {
    /// Number of slots.
    pub const CAPACITY: u32 = {
        assert!(N.is_power_of_two(), "Ring buffer size must be power of 2");
        assert!(N <= (u32::MAX / 2) as usize, "Ring buffer size must fit the u32 index space");
        N as u32
    };

    /// Mask for wrapping a logical index to a slot.
    const MASK: u32 = Self::CAPACITY - 1;

    /// Packet size in bytes.
    pub const PACKET_SIZE: usize = {
        assert!(P.is_power_of_two(), "Packet size must be power of 2");
        P
    };

    /// Create a new, zeroed ring buffer.
    pub const fn new() -> Self {
        let _ = Self::CAPACITY;
        let _ = Self::PACKET_SIZE;

        #[allow(clippy::declare_interior_mutable_const)]
        const ZERO: AtomicU8 = AtomicU8::new(0);

        Self {
            consumer_index: AtomicU32::new(0),
            producer_index: AtomicU32::new(0),
            packets: UnsafeCell::new([[0; P]; N]),
            debug_text: [ZERO; DEBUG_TEXT_LEN],
        }
    }

    /// Slot holding the packet with the given logical index.
    #[inline]
    pub const fn slot_index(logical_index: u32) -> usize {
        (logical_index & Self::MASK) as usize
    }

    /// Number of published, unconsumed packets (wraparound-safe).
    #[inline]
    pub const fn gap(producer_index: u32, consumer_index: u32) -> u32 {
        producer_index.wrapping_sub(consumer_index)
    }

    /// True if no free slot remains.
    #[inline]
    pub const fn is_full(producer_index: u32, consumer_index: u32) -> bool {
        Self::gap(producer_index, consumer_index) == Self::CAPACITY
    }

    /// True if at least one packet awaits the consumer.
    #[inline]
    pub const fn has_data(producer_index: u32, consumer_index: u32) -> bool {
        producer_index != consumer_index
    }

    /// Shared producer index (consumer side).
    #[inline]
    pub fn producer_index(&self) -> u32 {
        self.producer_index.load(Ordering::Acquire)
    }

    /// Shared consumer index (producer side).
    #[inline]
    pub fn consumer_index(&self) -> u32 {
        self.consumer_index.load(Ordering::Acquire)
    }

    /// Copy a finished packet into the slot of `logical_index`.
    ///
    /// Producer only, and only for a slot the consumer has released
    /// (`gap < CAPACITY` when the packet was opened).
    #[inline]
    pub fn write_slot(&self, logical_index: u32, packet: &[u8; P]) {
        let slot = Self::slot_index(logical_index);

        // SAFETY: slot < N. RULE 3.1.1: the slot is unpublished, so the
        // consumer does not read it until the index store that follows.
        unsafe {
            let dst = (self.packets.get() as *mut [u8; P]).add(slot);
            core::ptr::copy_nonoverlapping(packet.as_ptr(), dst as *mut u8, P);
        }
    }

    /// Publish a new producer index.
    ///
    /// RULE 3.2.1: the barrier orders every preceding slot write before the
    /// index store.
    #[inline]
    pub fn publish_producer_index(&self, index: u32) {
        full_barrier();
        self.producer_index.store(index, Ordering::Release);
    }

    /// Borrow the packet stored at `logical_index`.
    ///
    /// Consumer only, and only for a published, unconsumed index. The borrow
    /// ends before the consumer index can move past it.
    #[inline]
    pub fn with_slot<R>(&self, logical_index: u32, f: impl FnOnce(&[u8; P]) -> R) -> R {
        let slot = Self::slot_index(logical_index);

        // SAFETY: slot < N. The producer does not write a published slot
        // until the consumer index moves past it, which happens after `f`.
        let packet = unsafe { &*(self.packets.get() as *const [u8; P]).add(slot) };
        f(packet)
    }

    /// Publish a new consumer index.
    ///
    /// RULE 3.2.2: the barrier orders every preceding slot read before the
    /// index store.
    #[inline]
    pub fn publish_consumer_index(&self, index: u32) {
        full_barrier();
        self.consumer_index.store(index, Ordering::Release);
    }

    /// Overwrite the debug text area (NUL-terminated, truncated to fit).
    ///
    /// Producer only. Readers may observe a torn message: this is a
    /// diagnostic side channel, not part of the packet protocol.
    pub fn write_debug_text(&self, msg: &[u8]) {
        let len = msg.len().min(DEBUG_TEXT_LEN.saturating_sub(1));
        for (dst, &byte) in self.debug_text.iter().zip(&msg[..len]) {
            dst.store(byte, Ordering::Relaxed);
        }
        if let Some(terminator) = self.debug_text.get(len) {
            terminator.store(0, Ordering::Release);
        }
    }

    /// Copy the debug text into `buf`, returning its length.
    ///
    /// Returns 0 when no text was written (or the feature is off).
    pub fn read_debug_text(&self, buf: &mut [u8]) -> usize {
        let mut len = 0;
        for (src, dst) in self.debug_text.iter().zip(buf.iter_mut()) {
            let byte = src.load(Ordering::Acquire);
            if byte == 0 {
                break;
            }
            *dst = byte;
            len += 1;
        }
        len
    }

    /// Get the buffer capacity.
    #[inline]
    pub const fn capacity(&self) -> usize {
        N
    }
}

impl<const N: usize, const P: usize> Default for RingBuffer<N, P> {
    fn default() -> Self {
        Self::new()
    }
}

//! Producer side of the transport (one instance per core).
//!
//! The packet encoder fills a packet in core-local memory; this module
//! decides whether the backend has room, and publishes finished packets to
//! the core's ring buffer.
//!
//! # Architecture
//!
//! ```text
//! Encoder ──is_backend_full()──▶ Producer ──write_slot + barrier──▶ RingBuffer
//!         ──open_packet()─────▶  (local    ──producer_index──────▶
//!         ──close_packet()────▶   packet)
//! ```
//!
//! # Rules (from ARCHITECTURE.md §4)
//!
//! - RULE 4.1.1: No producer operation shall block
//! - RULE 4.1.2: A full backend drops the packet, it never waits
//! - RULE 4.2.1: The shared producer index is write-only for the producer;
//!   the local shadow is authoritative
//! - RULE 4.2.2: While waiting, shared memory is re-read at most once per
//!   `BACKEND_CHECK_TIMEOUT` clock units

use crate::clock::{Clock, DownCounter};
use crate::config::{BACKEND_CHECK_TIMEOUT, PACKET_SIZE, RINGBUF_SIZE};
use crate::ringbuf::RingBuffer;
use crate::topology::CoreCoords;

/// Packet encoder contract (external collaborator).
///
/// The encoder owns the packet format. The transport only needs to know
/// whether a packet is open and whether it holds any event.
pub trait PacketEncoder<const P: usize> {
    /// Start a new packet in `packet` (write its header).
    fn open(&mut self, packet: &mut [u8; P], timestamp: u64, core: CoreCoords);

    /// Finalize the open packet (patch header/trailer fields).
    fn close(&mut self, packet: &mut [u8; P], timestamp: u64);

    /// True if a packet is currently open.
    fn is_open(&self) -> bool;

    /// True if the open packet holds no event.
    fn is_empty(&self) -> bool;
}

/// The platform hooks an encoder calls at packet boundaries.
pub trait PlatformCallbacks {
    /// Current trace clock value.
    fn now(&self) -> u64;

    /// True if a new packet cannot be published right now.
    fn is_backend_full(&mut self) -> bool;

    /// Begin filling a new packet.
    fn open_packet(&mut self);

    /// Finish the current packet and publish it.
    fn close_packet(&mut self);
}

/// Per-core producer context.
///
/// Owned exclusively by its core. Holds the local scratch packet, the shadow
/// of the producer index and the backoff state.
pub struct Producer<
    'a,
    C: DownCounter,
    E: PacketEncoder<P>,
    const N: usize = RINGBUF_SIZE,
    const P: usize = PACKET_SIZE,
> {
    ring: &'a RingBuffer<N, P>,
    clock: &'a Clock<C>,
    encoder: E,
    core: CoreCoords,
    local_packet: [u8; P],

    /// Authoritative producer index. NEVER read the shared copy back.
    producer_index_shadow: u32,

    last_backend_check: u64,
    backend_wait_period: bool,
    backend_check_timeout: u64,

    packets_dropped: u32,
    initialized: bool,
}

impl<'a, C: DownCounter, E: PacketEncoder<P>, const N: usize, const P: usize>
    Producer<'a, C, E, N, P>
{
    /// Create the producer context of `core`.
    ///
    /// No side effect: call [`Producer::init`] to start tracing.
    pub fn new(ring: &'a RingBuffer<N, P>, clock: &'a Clock<C>, encoder: E, core: CoreCoords) -> Self {
        Self {
            ring,
            clock,
            encoder,
            core,
            local_packet: [0; P],
            producer_index_shadow: 0,
            last_backend_check: 0,
            backend_wait_period: false,
            backend_check_timeout: BACKEND_CHECK_TIMEOUT,
            packets_dropped: 0,
            initialized: false,
        }
    }

    /// Override the backoff period (clock units).
    pub fn with_backend_check_timeout(mut self, timeout: u64) -> Self {
        self.backend_check_timeout = timeout;
        self
    }

    /// Start tracing: zero the local packet, restart the clock and open the
    /// first packet. Idempotent.
    pub fn init(&mut self) {
        if self.initialized {
            return;
        }

        self.local_packet = [0; P];
        self.reset_clock();
        self.begin_packet();
        self.initialized = true;

        log::debug!("core {}: tracing initialized", self.core);
    }

    /// Stop tracing: publish the last packet if it holds events, then stop
    /// the clock.
    pub fn fini(&mut self) {
        if !self.initialized {
            return;
        }

        if self.encoder.is_open() && !self.encoder.is_empty() {
            self.close_packet();
        }

        self.clock.stop();
        self.initialized = false;

        log::debug!(
            "core {}: tracing stopped ({} published, {} dropped)",
            self.core,
            self.producer_index_shadow,
            self.packets_dropped
        );
    }

    /// Restart the clock from 0 and forget any backoff state.
    pub fn reset_clock(&mut self) {
        self.clock.reset();
        self.backend_wait_period = false;
        self.last_backend_check = 0;
    }

    /// Current trace clock value.
    #[inline]
    pub fn now(&self) -> u64 {
        self.clock.now()
    }

    /// True if the ring buffer has no free slot.
    ///
    /// After a check that found the ring full, shared memory is only read
    /// again once `backend_check_timeout` clock units have elapsed; until
    /// then the backend is reported full without touching it.
    pub fn is_backend_full(&mut self) -> bool {
        let mut check_shared = true;

        if self.backend_wait_period {
            let now = self.now();
            if now.wrapping_sub(self.last_backend_check) >= self.backend_check_timeout {
                self.last_backend_check = now;
            } else {
                check_shared = false;
            }
        }

        if !check_shared {
            return true;
        }

        let full = RingBuffer::<N, P>::is_full(self.producer_index_shadow, self.ring.consumer_index());
        self.backend_wait_period = full;
        if full {
            self.last_backend_check = self.now();
        }

        full
    }

    /// Begin filling a new packet in local memory.
    pub fn open_packet(&mut self) {
        let now = self.now();
        self.encoder.open(&mut self.local_packet, now, self.core);
    }

    /// Finalize the local packet and publish it to the ring buffer.
    ///
    /// Only valid after an [`is_backend_full`](Self::is_backend_full) check
    /// returned `false` for the packet being closed. Without an open packet
    /// (the reservation failed) this is a no-op.
    pub fn close_packet(&mut self) {
        // RULE 3.3.1: no open packet means no reserved slot
        if !self.encoder.is_open() {
            return;
        }

        let now = self.now();
        self.encoder.close(&mut self.local_packet, now);

        debug_assert!(
            RingBuffer::<N, P>::gap(self.producer_index_shadow, self.ring.consumer_index())
                < RingBuffer::<N, P>::CAPACITY,
            "close_packet on a full ring buffer"
        );

        self.ring.write_slot(self.producer_index_shadow, &self.local_packet);
        self.incr_producer_index();
    }

    /// Check for room and open a packet, or drop it.
    ///
    /// Returns `false` (and counts a dropped packet) if the backend is full.
    /// The events meant for this packet must be discarded by the caller.
    pub fn begin_packet(&mut self) -> bool {
        if self.is_backend_full() {
            self.packets_dropped = self.packets_dropped.wrapping_add(1);
            return false;
        }

        self.open_packet();
        true
    }

    /// Run `f` with the encoder and the local packet.
    pub fn with_packet<R>(&mut self, f: impl FnOnce(&mut E, &mut [u8; P]) -> R) -> R {
        f(&mut self.encoder, &mut self.local_packet)
    }

    /// Store a diagnostic message in the ring buffer's debug text area.
    pub fn debug_text(&self, msg: &[u8]) {
        self.ring.write_debug_text(msg);
    }

    #[inline]
    fn incr_producer_index(&mut self) {
        self.producer_index_shadow = self.producer_index_shadow.wrapping_add(1);
        self.ring.publish_producer_index(self.producer_index_shadow);
    }

    /// Local producer index (number of packets published).
    #[inline]
    pub fn producer_index(&self) -> u32 {
        self.producer_index_shadow
    }

    /// Packets dropped because the backend was full.
    #[inline]
    pub fn packets_dropped(&self) -> u32 {
        self.packets_dropped
    }

    /// True while in a backoff period.
    #[inline]
    pub fn is_waiting(&self) -> bool {
        self.backend_wait_period
    }

    #[inline]
    pub fn core(&self) -> CoreCoords {
        self.core
    }

    #[inline]
    pub fn encoder(&self) -> &E {
        &self.encoder
    }

    #[inline]
    pub fn is_initialized(&self) -> bool {
        self.initialized
    }
}

impl<'a, C: DownCounter, E: PacketEncoder<P>, const N: usize, const P: usize> PlatformCallbacks
    for Producer<'a, C, E, N, P>
{
    fn now(&self) -> u64 {
        Producer::now(self)
    }

    fn is_backend_full(&mut self) -> bool {
        Producer::is_backend_full(self)
    }

    fn open_packet(&mut self) {
        Producer::open_packet(self)
    }

    fn close_packet(&mut self) {
        Producer::close_packet(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::SoftCounter;

    /// Writes a sequence number in the first 4 bytes, the open timestamp in
    /// the next 8.
    #[derive(Default)]
    struct SeqEncoder {
        seq: u32,
        open: bool,
        events: u32,
    }

    impl<const P: usize> PacketEncoder<P> for SeqEncoder {
        fn open(&mut self, packet: &mut [u8; P], timestamp: u64, _core: CoreCoords) {
            packet.fill(0);
            packet[..4].copy_from_slice(&self.seq.to_le_bytes());
            packet[4..12].copy_from_slice(&timestamp.to_le_bytes());
            self.open = true;
            self.events = 0;
        }

        fn close(&mut self, _packet: &mut [u8; P], _timestamp: u64) {
            self.seq += 1;
            self.open = false;
        }

        fn is_open(&self) -> bool {
            self.open
        }

        fn is_empty(&self) -> bool {
            self.events == 0
        }
    }

    type Ring = RingBuffer<4, 64>;
    type TestClock = Clock<SoftCounter<32>>;

    fn advance(clock: &TestClock, ticks: u64) {
        if clock.counter().tick(ticks) {
            clock.on_underflow();
        }
    }

    fn publish(producer: &mut Producer<'_, SoftCounter<32>, SeqEncoder, 4, 64>) -> bool {
        if !producer.begin_packet() {
            return false;
        }
        producer.close_packet();
        true
    }

    #[test]
    fn test_init_opens_first_packet() {
        let ring = Ring::new();
        let clock = TestClock::new(SoftCounter::new());
        let mut producer = Producer::new(&ring, &clock, SeqEncoder::default(), CoreCoords::new(0, 1));

        producer.init();
        assert!(producer.is_initialized());
        assert!(producer.encoder().open);
        assert_eq!(clock.now(), 0);
    }

    #[test]
    fn test_close_publishes_into_slot() {
        let ring = Ring::new();
        let clock = TestClock::new(SoftCounter::new());
        let mut producer = Producer::new(&ring, &clock, SeqEncoder::default(), CoreCoords::default());
        producer.init();

        advance(&clock, 7);
        producer.close_packet();

        assert_eq!(ring.producer_index(), 1);
        assert_eq!(producer.producer_index(), 1);
        assert_eq!(ring.with_slot(0, |p| u32::from_le_bytes([p[0], p[1], p[2], p[3]])), 0);
    }

    #[test]
    fn test_full_ring_drops_packet() {
        let ring = Ring::new();
        let clock = TestClock::new(SoftCounter::new());
        let mut producer = Producer::new(&ring, &clock, SeqEncoder::default(), CoreCoords::default());
        producer.reset_clock();

        for _ in 0..4 {
            assert!(publish(&mut producer));
        }
        assert!(producer.is_backend_full());
        assert!(producer.is_waiting());

        assert!(!publish(&mut producer));
        assert_eq!(producer.packets_dropped(), 1);
        assert_eq!(ring.producer_index(), 4);
    }

    #[test]
    fn test_waiting_period_skips_shared_memory() {
        let ring = Ring::new();
        let clock = TestClock::new(SoftCounter::new());
        let mut producer = Producer::new(&ring, &clock, SeqEncoder::default(), CoreCoords::default())
            .with_backend_check_timeout(100);
        producer.reset_clock();

        for _ in 0..4 {
            assert!(publish(&mut producer));
        }
        assert!(producer.is_backend_full());

        // Consumer frees a slot, but the producer is still backing off
        ring.publish_consumer_index(1);
        advance(&clock, 99);
        assert!(producer.is_backend_full());

        advance(&clock, 1);
        assert!(!producer.is_backend_full());
        assert!(!producer.is_waiting());
    }

    #[test]
    fn test_reset_clock_clears_waiting_state() {
        let ring = Ring::new();
        let clock = TestClock::new(SoftCounter::new());
        let mut producer = Producer::new(&ring, &clock, SeqEncoder::default(), CoreCoords::default())
            .with_backend_check_timeout(1_000);
        producer.reset_clock();

        for _ in 0..4 {
            assert!(publish(&mut producer));
        }
        assert!(producer.is_backend_full());
        ring.publish_consumer_index(4);

        producer.reset_clock();
        assert!(!producer.is_waiting());
        assert!(!producer.is_backend_full());
    }

    #[test]
    fn test_fini_skips_empty_packet() {
        let ring = Ring::new();
        let clock = TestClock::new(SoftCounter::new());
        let mut producer = Producer::new(&ring, &clock, SeqEncoder::default(), CoreCoords::default());

        producer.init();
        producer.fini();

        assert_eq!(ring.producer_index(), 0);
        assert!(!clock.counter().is_running());
    }

    #[test]
    fn test_fini_publishes_non_empty_packet() {
        let ring = Ring::new();
        let clock = TestClock::new(SoftCounter::new());
        let mut producer = Producer::new(&ring, &clock, SeqEncoder::default(), CoreCoords::default());

        producer.init();
        producer.with_packet(|encoder, _| encoder.events = 3);
        producer.fini();

        assert_eq!(ring.producer_index(), 1);
        assert!(!producer.is_initialized());
    }

    #[test]
    fn test_close_without_open_packet_keeps_ring() {
        let ring = Ring::new();
        let clock = TestClock::new(SoftCounter::new());
        let mut producer = Producer::new(&ring, &clock, SeqEncoder::default(), CoreCoords::default());
        producer.reset_clock();

        for _ in 0..4 {
            assert!(publish(&mut producer));
        }
        let oldest = ring.with_slot(0, |p| *p);

        // Reservation fails, the encoder closes anyway
        assert!(!producer.begin_packet());
        PlatformCallbacks::close_packet(&mut producer);

        assert_eq!(producer.producer_index(), 4);
        assert_eq!(ring.producer_index(), 4);
        assert_eq!(ring.with_slot(0, |p| *p), oldest);
    }

    #[test]
    fn test_producer_index_wraps_u32() {
        let ring = Ring::new();
        let clock = TestClock::new(SoftCounter::new());
        let mut producer = Producer::new(&ring, &clock, SeqEncoder::default(), CoreCoords::default());
        producer.reset_clock();

        // Both sides start just below the u32 wraparound
        producer.producer_index_shadow = u32::MAX - 1;
        ring.publish_consumer_index(u32::MAX - 1);

        for _ in 0..4 {
            assert!(publish(&mut producer));
        }
        assert_eq!(producer.producer_index(), 2);
        assert!(producer.is_backend_full());
    }
}

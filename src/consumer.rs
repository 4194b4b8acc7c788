//! Consumer side of the transport (host process).
//!
//! One consumer drains every core's ring buffer into a per-core output
//! stream. It is a single-threaded poll loop: sweep all cores once, sleep if
//! nothing was consumed, repeat until shutdown.
//!
//! # Rules (from ARCHITECTURE.md §6)
//!
//! - RULE 6.1.1: Cores are swept in row-major order, at most one packet per
//!   core per sweep
//! - RULE 6.1.2: Packets of one core are consumed strictly in FIFO order
//! - RULE 6.2.1: The consumer index only moves after the whole packet was
//!   written to its stream
//! - RULE 6.2.2: Shutdown is checked before each sweep and before each core,
//!   never in the middle of a packet
//! - RULE 6.3.1: A failed write is fatal; an interrupted write is retried

use std::fs::{self, File};
use std::io::Write;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

use crate::config::{CORES_COUNT, PACKET_SIZE, RINGBUF_SIZE};
use crate::error::TransportError;
use crate::ringbuf::{full_barrier, RingBuffer};
use crate::topology::CoreCoords;

/// Create the trace directory and one empty stream file per core.
///
/// Stale content from a previous run is truncated. On failure the files
/// already opened are closed and the error is returned.
pub fn open_stream_files(trace_dir: impl AsRef<Path>) -> Result<Vec<File>, TransportError> {
    let trace_dir = trace_dir.as_ref();

    fs::create_dir_all(trace_dir)
        .map_err(|source| TransportError::StreamCreate { path: trace_dir.to_path_buf(), source })?;

    let mut files = Vec::with_capacity(CORES_COUNT);
    for core in CoreCoords::all() {
        let path = trace_dir.join(core.stream_file_name());
        log::debug!("creating stream file \"{}\"", path.display());

        let file = File::create(&path).map_err(|source| TransportError::StreamCreate { path, source })?;
        files.push(file);
    }

    Ok(files)
}

/// Consumer context: the ring buffers, one sink per core and the shutdown
/// flag.
pub struct Consumer<'a, W: Write, const N: usize = RINGBUF_SIZE, const P: usize = PACKET_SIZE> {
    rings: &'a [RingBuffer<N, P>],
    sinks: Vec<W>,
    shutdown: &'a AtomicBool,
    verbose: bool,
    consumed: Vec<u64>,

    #[cfg(feature = "debug-text")]
    last_debug_text: Vec<Vec<u8>>,
}

impl<'a, W: Write, const N: usize, const P: usize> Consumer<'a, W, N, P> {
    /// Create a consumer over `rings`, writing core `i`'s packets to
    /// `sinks[i]`.
    ///
    /// # Panics
    ///
    /// Panics unless there is exactly one ring buffer and one sink per core.
    pub fn new(rings: &'a [RingBuffer<N, P>], sinks: Vec<W>, shutdown: &'a AtomicBool) -> Self {
        assert_eq!(rings.len(), CORES_COUNT, "one ring buffer per core");
        assert_eq!(sinks.len(), CORES_COUNT, "one sink per core");

        Self {
            rings,
            sinks,
            shutdown,
            verbose: false,
            consumed: vec![0; CORES_COUNT],
            #[cfg(feature = "debug-text")]
            last_debug_text: vec![Vec::new(); CORES_COUNT],
        }
    }

    /// Log every consumed packet.
    pub fn with_verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    #[inline]
    fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::SeqCst)
    }

    /// Move at most one packet of `core` from its ring buffer to its sink.
    ///
    /// Returns `Ok(false)` if the core had nothing to consume.
    pub fn try_consume_one(&mut self, core: CoreCoords) -> Result<bool, TransportError> {
        let idx = core.index();
        let rings = self.rings;
        let ring = &rings[idx];

        let producer_index = ring.producer_index();
        let consumer_index = ring.consumer_index();

        if !RingBuffer::<N, P>::has_data(producer_index, consumer_index) {
            return Ok(false);
        }

        // Index reads before slot read
        full_barrier();

        let slot = RingBuffer::<N, P>::slot_index(consumer_index);
        if self.verbose {
            log::info!(
                "core {}: producer index {}, consumer index {}, slot {}",
                core,
                producer_index,
                consumer_index,
                slot
            );
        }

        // write_all retries on Interrupted and reports a zero-length write
        // as WriteZero
        let sink = &mut self.sinks[idx];
        ring.with_slot(consumer_index, |packet| sink.write_all(packet))
            .map_err(|source| TransportError::PacketWrite { core, source })?;

        ring.publish_consumer_index(consumer_index.wrapping_add(1));
        self.consumed[idx] += 1;

        Ok(true)
    }

    /// Visit every core once, in row-major order.
    ///
    /// Returns the number of packets consumed. Stops early, between two
    /// cores, when shutdown is requested.
    pub fn sweep(&mut self) -> Result<usize, TransportError> {
        let mut consumed = 0;

        for core in CoreCoords::all() {
            if self.is_shutdown() {
                break;
            }

            if self.try_consume_one(core)? {
                consumed += 1;
            }

            #[cfg(feature = "debug-text")]
            self.drain_debug_text(core);
        }

        Ok(consumed)
    }

    /// Sweep until shutdown, sleeping `poll_delay` after idle sweeps.
    ///
    /// Returns `Ok(())` on shutdown and the first fatal error otherwise.
    pub fn run(&mut self, poll_delay: Duration) -> Result<(), TransportError> {
        log::info!("consuming {} cores, poll delay {:?}", CORES_COUNT, poll_delay);

        while !self.is_shutdown() {
            if self.sweep()? == 0 {
                thread::sleep(poll_delay);
            }
        }

        log::info!("shutdown requested, {} packets consumed", self.total_consumed());
        Ok(())
    }

    #[cfg(feature = "debug-text")]
    fn drain_debug_text(&mut self, core: CoreCoords) {
        let idx = core.index();
        let mut buf = [0u8; crate::config::DEBUG_TEXT_LEN];
        let len = self.rings[idx].read_debug_text(&mut buf);

        if len > 0 && self.last_debug_text[idx][..] != buf[..len] {
            log::info!("core {}: {}", core, String::from_utf8_lossy(&buf[..len]));
            self.last_debug_text[idx].clear();
            self.last_debug_text[idx].extend_from_slice(&buf[..len]);
        }
    }

    /// Packets consumed so far from `core`.
    pub fn consumed(&self, core: CoreCoords) -> u64 {
        self.consumed[core.index()]
    }

    pub fn total_consumed(&self) -> u64 {
        self.consumed.iter().sum()
    }

    /// The sink of `core`.
    pub fn sink(&self, core: CoreCoords) -> &W {
        &self.sinks[core.index()]
    }

    /// Flush every sink and return the per-core packet counts.
    ///
    /// Every sink is flushed and dropped even if one fails; the first
    /// failure is returned.
    pub fn finish(self) -> Result<Vec<u64>, TransportError> {
        let mut first_error = None;

        for (idx, mut sink) in self.sinks.into_iter().enumerate() {
            if let Err(source) = sink.flush() {
                let core = CoreCoords::from_index(idx);
                log::error!("core {}: flushing stream failed: {}", core, source);
                first_error.get_or_insert(TransportError::PacketWrite { core, source });
            }
        }

        match first_error {
            Some(err) => Err(err),
            None => Ok(self.consumed),
        }
    }
}

//! Module: config
//!
//! Purpose: Build-time configuration of the trace transport.
//!
//! Architecture:
//! - build.rs: single source of truth, every parameter overridable by a
//!   `CTF_*` environment variable at build time
//! - Generated code: `$OUT_DIR/config.rs`
//! - Producers and the consumer must be built with the same values: the
//!   shared-memory layout is derived from them
//!
//! Safety: RT-safe. Plain constants, no runtime state.

mod generated {
    include!(concat!(env!("OUT_DIR"), "/config.rs"));
}

pub use generated::{
    BACKEND_CHECK_TIMEOUT, CONSUMER_POLL_DELAY_US, CORES_COLS, CORES_ROWS, PACKET_SIZE,
    RINGBUF_SIZE, SMEM_NAME,
};

/// Number of producer cores (one ring buffer each).
pub const CORES_COUNT: usize = CORES_ROWS * CORES_COLS;

/// Size of the optional debug text area appended to every ring buffer.
pub const DEBUG_TEXT_LEN: usize = if cfg!(feature = "debug-text") { 256 } else { 0 };

/// Directory holding the shared-memory backing file on the host.
pub const SMEM_DIR: &str = "/dev/shm";

/// Trace directory used by the consumer when none is given.
pub const DEFAULT_TRACE_DIR: &str = "ctf";

/// Version string baked in by build.rs.
pub const VERSION_STRING: &str = env!("VERSION_STRING");

const _: () = assert!(PACKET_SIZE.is_power_of_two(), "packet size must be a power of 2");
const _: () = assert!(RINGBUF_SIZE.is_power_of_two(), "ring buffer size must be a power of 2");
const _: () = assert!(RINGBUF_SIZE <= (u32::MAX / 2) as usize, "ring buffer size must fit the u32 index space");

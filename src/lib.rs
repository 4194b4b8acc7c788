//! # ctf-shm-transport
//!
//! Lock-free transport of fixed-size trace packets from many producer cores
//! to one consumer process over shared memory.
//!
//! ## Architecture
//!
//! Every core owns one [`RingBuffer`] in a shared-memory region:
//! - The [`Producer`] of a core fills packets locally and publishes them
//!   with a slot write, a barrier and a producer index store
//! - The [`Consumer`] sweeps every ring buffer, appends packets to one
//!   stream per core and publishes the consumer index
//! - No locks, no compare-and-swap: each index has exactly one writer
//! - Timestamps come from a 64-bit [`Clock`] extended from a narrow
//!   hardware down-counter
//!
//! The producer side builds without `std` (disable default features).
//!
//! See ARCHITECTURE.md for the protocol rules.

#![cfg_attr(not(any(test, feature = "std")), no_std)]

pub mod config;
pub mod topology;
pub mod clock;
pub mod ringbuf;
pub mod producer;
pub mod logging;

#[cfg(feature = "std")]
pub mod error;
#[cfg(feature = "std")]
pub mod shm;
#[cfg(feature = "std")]
pub mod signal;
#[cfg(feature = "std")]
pub mod consumer;

pub use clock::{Clock, DownCounter, TraceClock};
#[cfg(target_has_atomic = "64")]
pub use clock::SoftCounter;
pub use producer::{PacketEncoder, PlatformCallbacks, Producer};
pub use ringbuf::RingBuffer;
pub use topology::CoreCoords;

#[cfg(feature = "std")]
pub use clock::{spawn_underflow_watcher, InstantCounter};
#[cfg(feature = "std")]
pub use consumer::{open_stream_files, Consumer};
#[cfg(feature = "std")]
pub use error::TransportError;
#[cfg(feature = "std")]
pub use shm::SharedRegion;

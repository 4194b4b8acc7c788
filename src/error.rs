//! Transport error types.
//!
//! Only the host side can fail. Producer paths are infallible: a full ring
//! buffer is backpressure, not an error.

use std::fmt;
use std::io;
use std::path::PathBuf;

use crate::topology::CoreCoords;

/// Fatal host-side error with code and context.
#[derive(Debug)]
pub enum TransportError {
    /// E01: Shared-memory region could not be created or sized
    ShmCreate { path: PathBuf, source: io::Error },
    /// E02: Shared-memory region could not be opened or mapped
    ShmAttach { path: PathBuf, source: io::Error },
    /// E03: Existing region does not match the configured layout
    ShmSize { path: PathBuf, expected: u64, actual: u64 },
    /// E04: Per-core stream file could not be created
    StreamCreate { path: PathBuf, source: io::Error },
    /// E05: Packet could not be appended to a core's stream
    PacketWrite { core: CoreCoords, source: io::Error },
    /// E06: Shutdown signal handler could not be installed
    SignalInstall { source: io::Error },
}

impl TransportError {
    /// Get error code string
    pub fn code(&self) -> &'static str {
        match self {
            Self::ShmCreate { .. } => "E01",
            Self::ShmAttach { .. } => "E02",
            Self::ShmSize { .. } => "E03",
            Self::StreamCreate { .. } => "E04",
            Self::PacketWrite { .. } => "E05",
            Self::SignalInstall { .. } => "E06",
        }
    }

    /// Get error message
    pub fn message(&self) -> &'static str {
        match self {
            Self::ShmCreate { .. } => "failed to allocate shared memory",
            Self::ShmAttach { .. } => "failed to attach to shared memory",
            Self::ShmSize { .. } => "shared memory size mismatch",
            Self::StreamCreate { .. } => "failed to create stream file",
            Self::PacketWrite { .. } => "failed to write packet",
            Self::SignalInstall { .. } => "failed to install signal handler",
        }
    }
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code(), self.message())?;
        match self {
            Self::ShmCreate { path, .. }
            | Self::ShmAttach { path, .. }
            | Self::StreamCreate { path, .. } => write!(f, " \"{}\"", path.display()),
            Self::ShmSize { path, expected, actual } => write!(
                f,
                " \"{}\" (expected {} bytes, found {})",
                path.display(),
                expected,
                actual
            ),
            Self::PacketWrite { core, .. } => write!(f, " of core {}", core),
            Self::SignalInstall { .. } => Ok(()),
        }
    }
}

impl std::error::Error for TransportError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::ShmCreate { source, .. }
            | Self::ShmAttach { source, .. }
            | Self::StreamCreate { source, .. }
            | Self::PacketWrite { source, .. }
            | Self::SignalInstall { source } => Some(source),
            Self::ShmSize { .. } => None,
        }
    }
}

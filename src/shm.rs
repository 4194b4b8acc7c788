//! Shared-memory region holding every core's ring buffer.
//!
//! On the host the region is a file under `SMEM_DIR` (tmpfs) mapped with
//! `memmap2`. Its layout is `CORES_COUNT` consecutive [`RingBuffer`]s in
//! row-major core order, so any process built with the same configuration
//! can attach to it.

use std::fs::{self, File, OpenOptions};
use std::io;
use std::mem;
use std::path::{Path, PathBuf};
use std::slice;

use memmap2::{MmapMut, MmapOptions};

use crate::config::{CORES_COUNT, PACKET_SIZE, RINGBUF_SIZE, SMEM_DIR, SMEM_NAME};
use crate::error::TransportError;
use crate::ringbuf::RingBuffer;
use crate::topology::CoreCoords;

/// Mapped shared-memory region.
pub struct SharedRegion<const N: usize = RINGBUF_SIZE, const P: usize = PACKET_SIZE> {
    path: PathBuf,
    mmap: MmapMut,
    owner: bool,
}

impl<const N: usize, const P: usize> SharedRegion<N, P> {
    /// Size of one ring buffer, debug text included.
    pub const RING_SIZE: usize = mem::size_of::<RingBuffer<N, P>>();

    /// Size of the whole region.
    pub const REGION_SIZE: usize = Self::RING_SIZE * CORES_COUNT;

    /// Agreed location of the region: `SMEM_DIR/SMEM_NAME`.
    pub fn default_path() -> PathBuf {
        Path::new(SMEM_DIR).join(SMEM_NAME)
    }

    /// Allocate the region, or attach to it if it already exists.
    ///
    /// Used by the consumer at startup. The caller owns a region it
    /// allocated and removes it on [`release`](Self::release).
    pub fn allocate_or_attach(path: impl AsRef<Path>) -> Result<Self, TransportError> {
        let path = path.as_ref();

        match OpenOptions::new().read(true).write(true).create_new(true).open(path) {
            Ok(file) => {
                log::debug!("allocating {} bytes of shared memory in \"{}\"", Self::REGION_SIZE, path.display());

                match Self::create(&file, path) {
                    Ok(mmap) => Ok(Self { path: path.to_path_buf(), mmap, owner: true }),
                    Err(err) => {
                        // Leave no half-created region behind
                        drop(file);
                        if let Err(remove_err) = fs::remove_file(path) {
                            log::warn!("cannot remove \"{}\": {}", path.display(), remove_err);
                        }
                        Err(err)
                    }
                }
            }
            Err(err) if err.kind() == io::ErrorKind::AlreadyExists => {
                log::debug!("allocation failed; attaching to shared memory region \"{}\"", path.display());
                Self::attach(path)
            }
            Err(source) => Err(TransportError::ShmCreate { path: path.to_path_buf(), source }),
        }
    }

    /// Attach to an existing region (producer side, or a second consumer run).
    pub fn attach(path: impl AsRef<Path>) -> Result<Self, TransportError> {
        let path = path.as_ref();

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(path)
            .map_err(|source| TransportError::ShmAttach { path: path.to_path_buf(), source })?;

        let actual = file
            .metadata()
            .map_err(|source| TransportError::ShmAttach { path: path.to_path_buf(), source })?
            .len();

        if actual != Self::REGION_SIZE as u64 {
            return Err(TransportError::ShmSize {
                path: path.to_path_buf(),
                expected: Self::REGION_SIZE as u64,
                actual,
            });
        }

        let mmap = Self::map(&file, path)?;
        Ok(Self { path: path.to_path_buf(), mmap, owner: false })
    }

    fn create(file: &File, path: &Path) -> Result<MmapMut, TransportError> {
        file.set_len(Self::REGION_SIZE as u64)
            .map_err(|source| TransportError::ShmCreate { path: path.to_path_buf(), source })?;
        Self::map(file, path)
    }

    fn map(file: &File, path: &Path) -> Result<MmapMut, TransportError> {
        // SAFETY: the file has exactly REGION_SIZE bytes. Concurrent
        // modification by other processes only touches atomics and slots
        // covered by the ring buffer protocol.
        unsafe { MmapOptions::new().len(Self::REGION_SIZE).map_mut(file) }
            .map_err(|source| TransportError::ShmAttach { path: path.to_path_buf(), source })
    }

    /// Reset every ring buffer to empty (system (re)initialization).
    ///
    /// Must not run while producers are publishing.
    pub fn zero(&mut self) {
        self.mmap.fill(0);
    }

    /// Every core's ring buffer, in row-major order.
    pub fn rings(&self) -> &[RingBuffer<N, P>] {
        // SAFETY: the mapping is page-aligned and REGION_SIZE bytes long,
        // RingBuffer is repr(C) and valid for any bit pattern.
        unsafe { slice::from_raw_parts(self.mmap.as_ptr() as *const RingBuffer<N, P>, CORES_COUNT) }
    }

    /// Ring buffer of one core.
    ///
    /// # Panics
    ///
    /// Panics if `core` is outside the configured grid.
    pub fn ring(&self, core: CoreCoords) -> &RingBuffer<N, P> {
        &self.rings()[core.index()]
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// True if this handle allocated the region.
    pub fn is_owner(&self) -> bool {
        self.owner
    }

    /// Unmap the region, and remove its backing file if this handle
    /// allocated it.
    pub fn release(self) -> io::Result<()> {
        let Self { path, mmap, owner } = self;
        drop(mmap);

        if owner {
            log::debug!("releasing shared memory region \"{}\"", path.display());
            fs::remove_file(&path)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    type Region = SharedRegion<4, 64>;

    #[test]
    fn test_region_size_covers_every_core() {
        assert_eq!(Region::RING_SIZE, mem::size_of::<RingBuffer<4, 64>>());
        assert_eq!(Region::REGION_SIZE, Region::RING_SIZE * CORES_COUNT);
    }

    #[test]
    fn test_allocate_then_attach_share_memory() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("region");

        let consumer = Region::allocate_or_attach(&path).unwrap();
        assert!(consumer.is_owner());

        let producer = Region::attach(&path).unwrap();
        assert!(!producer.is_owner());

        let core = CoreCoords::new(0, 1);
        producer.ring(core).write_slot(0, &[7u8; 64]);
        producer.ring(core).publish_producer_index(1);

        let ring = consumer.ring(core);
        assert_eq!(ring.producer_index(), 1);
        assert_eq!(ring.with_slot(0, |p| p[63]), 7);
        assert_eq!(consumer.ring(CoreCoords::new(0, 0)).producer_index(), 0);
    }

    #[test]
    fn test_allocate_falls_back_to_attach() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("region");

        let first = Region::allocate_or_attach(&path).unwrap();
        let second = Region::allocate_or_attach(&path).unwrap();
        assert!(first.is_owner());
        assert!(!second.is_owner());
    }

    #[test]
    fn test_attach_rejects_size_mismatch() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("region");
        fs::write(&path, [0u8; 16]).unwrap();

        match Region::attach(&path) {
            Err(TransportError::ShmSize { expected, actual, .. }) => {
                assert_eq!(expected, Region::REGION_SIZE as u64);
                assert_eq!(actual, 16);
            }
            other => panic!("expected size mismatch, got {:?}", other.err()),
        }
    }

    #[test]
    fn test_attach_missing_region_fails() {
        let dir = tempfile::tempdir().unwrap();
        let err = Region::attach(dir.path().join("missing")).err().unwrap();
        assert_eq!(err.code(), "E02");
    }

    #[test]
    fn test_zero_resets_indices() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("region");

        let mut region = Region::allocate_or_attach(&path).unwrap();
        region.ring(CoreCoords::new(0, 0)).publish_producer_index(3);
        region.zero();
        assert_eq!(region.ring(CoreCoords::new(0, 0)).producer_index(), 0);
    }

    #[test]
    fn test_release_removes_owned_file_only() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("region");

        let owner = Region::allocate_or_attach(&path).unwrap();
        let attached = Region::attach(&path).unwrap();

        attached.release().unwrap();
        assert!(path.exists());

        owner.release().unwrap();
        assert!(!path.exists());
    }
}

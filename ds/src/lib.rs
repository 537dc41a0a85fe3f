//! Byte-addressable backing store abstraction.
//!
//! The fat16 core never opens a file or a block device itself; it talks to
//! whatever implements [`DataStorage`]. No buffering or caching happens at
//! this layer - a short read or write is reported as [`fat16_err::Error::Io`]
//! and the caller is expected to leave its in-memory state untouched.

pub use fat16_err::{Error, Result};

/// A fixed-size, byte-addressable backing store.
///
/// Implementations back the two concatenated superblock copies described by
/// the fat16 on-disk layout; `size()` must report the full backing store
/// (`2 * IMAGE_SIZE`), not just one copy.
pub trait DataStorage {
    /// Total addressable size of the backing store, in bytes.
    fn size(&self) -> u64;

    /// Read `buffer.len()` bytes starting at `offset`.
    ///
    /// Fails with [`Error::Io`] if fewer bytes are available than requested.
    fn read(&self, offset: u64, buffer: &mut [u8]) -> Result<()>;

    /// Write `buffer` starting at `offset`.
    ///
    /// Fails with [`Error::Io`] if the write cannot be completed in full.
    fn write(&self, offset: u64, buffer: &[u8]) -> Result<()>;

    /// Flush any buffering the implementation performs beneath `write`.
    ///
    /// The default implementation is a no-op, matching implementations that
    /// write through immediately.
    fn sync(&self) -> Result<()> {
        Ok(())
    }
}

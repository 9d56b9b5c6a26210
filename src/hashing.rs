//! Streaming SHA-256 of file contents
//!
//! [`FileHasher`] produces the same digest as `sha256sum --binary` while
//! reading through a reusable buffer it owns. Each worker thread owns one
//! hasher; hashers are never shared.
//!
//! ## Cancellation
//!
//! The hasher polls its [`CancellationToken`] after every buffer refill, so a
//! shutdown request interrupts even a multi-gigabyte file within one buffer's
//! worth of I/O. Cancellation is reported as [`CheckpointError::Cancelled`],
//! never as an I/O error.
//!
//! ## Example
//!
//! ```rust,ignore
//! use checkpoint::hashing::{FileHasher, DEFAULT_BUFFER_SIZE};
//! use checkpoint::CancellationToken;
//! use std::path::Path;
//!
//! let mut hasher = FileHasher::new(DEFAULT_BUFFER_SIZE, CancellationToken::new());
//! let digest = hasher.hash_file(Path::new("photo.jpg"))?;
//! println!("{}", digest);
//! ```

use crate::cancel::CancellationToken;
use crate::error::{CheckpointError, Result};
use crate::types::Sha256;
use sha2::{Digest, Sha256 as Sha256Hasher};
use std::fs::File;
use std::io::{ErrorKind, Read};
use std::path::Path;
use tracing::trace;

/// Default read buffer size (1 MiB)
pub const DEFAULT_BUFFER_SIZE: usize = 1024 * 1024;

/// Smallest accepted read buffer size
pub const MIN_BUFFER_SIZE: usize = 4096;

/// Computes SHA-256 digests of files through an owned buffer
pub struct FileHasher {
    buffer: Vec<u8>,
    cancellation: CancellationToken,
}

impl FileHasher {
    /// Create a hasher with a buffer of `buffer_size` bytes
    ///
    /// Sizes below [`MIN_BUFFER_SIZE`] are raised to it.
    pub fn new(buffer_size: usize, cancellation: CancellationToken) -> Self {
        Self {
            buffer: vec![0u8; buffer_size.max(MIN_BUFFER_SIZE)],
            cancellation,
        }
    }

    /// Size of the read buffer
    pub fn buffer_size(&self) -> usize {
        self.buffer.len()
    }

    /// Hash the content of the file at `path`
    ///
    /// # Arguments
    ///
    /// * `path` - File to hash; symlinks are followed by `open`, but discovery
    ///   never hands symlinks to workers
    ///
    /// # Returns
    ///
    /// The digest of the raw file bytes.
    ///
    /// # Errors
    ///
    /// - [`CheckpointError::Cancelled`] if cancellation was requested while reading
    /// - [`CheckpointError::Io`] if the file cannot be opened or read
    pub fn hash_file(&mut self, path: &Path) -> Result<Sha256> {
        let file = File::open(path)?;
        let digest = self.hash_reader(file)?;
        trace!("Hashed {:?}: {}", path, digest);
        Ok(digest)
    }

    /// Hash everything `reader` yields until end of input
    pub fn hash_reader<R: Read>(&mut self, mut reader: R) -> Result<Sha256> {
        let mut hasher = Sha256Hasher::new();

        loop {
            let bytes_read = match reader.read(&mut self.buffer) {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(CheckpointError::Io(e)),
            };
            self.cancellation.check()?;
            hasher.update(&self.buffer[..bytes_read]);
        }

        Ok(Sha256::from_bytes(hasher.finalize().into()))
    }
}

/// Hash in-memory data
pub fn hash_data(data: &[u8]) -> Sha256 {
    Sha256::from_bytes(Sha256Hasher::digest(data).into())
}

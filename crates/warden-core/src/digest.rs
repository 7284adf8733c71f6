//! Content fingerprints.
//!
//! A [`Fingerprinter`] turns a path into a [`Fingerprint`]: the digest of the
//! file's full byte stream, an explicit `Absent` when the file is gone, or the
//! I/O error that prevented the read. Files are streamed through a fixed-size
//! buffer so memory use does not grow with file size; the chunk size never
//! influences the digest.
//!
//! Only regular files are fingerprinted. Directories, FIFOs, sockets and
//! device nodes report `Absent` and are never opened: opening a FIFO for
//! reading blocks until a writer shows up.

use serde::{Deserialize, Serialize};
use sha2::{Digest as _, Sha256};
use std::fmt;
use std::fs::{self, File};
use std::io::{self, Read};
use std::path::Path;
use tracing::debug;

pub const DEFAULT_CHUNK_SIZE: usize = 4096;

/// A 32-byte content digest.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Digest([u8; 32]);

impl Digest {
    pub const fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Lowercase hex, the form used in logs, journals and `warden scan`.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    pub fn from_hex(s: &str) -> Option<Self> {
        let bytes = hex::decode(s).ok()?;
        let arr: [u8; 32] = bytes.try_into().ok()?;
        Some(Self(arr))
    }
}

impl fmt::Display for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Digest({})", &self.to_hex()[..12])
    }
}

impl Serialize for Digest {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for Digest {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Digest::from_hex(&s).ok_or_else(|| serde::de::Error::custom("expected 64 hex characters"))
    }
}

/// Result of fingerprinting a single path.
#[derive(Debug)]
pub enum Fingerprint {
    Present(Digest),
    /// The file does not exist (anymore).
    Absent,
    ReadError(io::Error),
}

impl Fingerprint {
    pub fn digest(&self) -> Option<Digest> {
        match self {
            Fingerprint::Present(d) => Some(*d),
            _ => None,
        }
    }
}

/// Deterministic content fingerprint for a path.
///
/// Implementations must be callable from several threads at once; the
/// reconciler serializes calls per path, not globally.
pub trait Fingerprinter: Send + Sync {
    fn fingerprint(&self, path: &Path) -> Fingerprint;
}

/// Digest algorithm used for every fingerprint in one baseline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HashAlgorithm {
    #[default]
    Blake3,
    Sha256,
}

enum StreamHasher {
    Blake3(Box<blake3::Hasher>),
    Sha256(Sha256),
}

impl StreamHasher {
    fn new(algorithm: HashAlgorithm) -> Self {
        match algorithm {
            HashAlgorithm::Blake3 => StreamHasher::Blake3(Box::new(blake3::Hasher::new())),
            HashAlgorithm::Sha256 => StreamHasher::Sha256(Sha256::new()),
        }
    }

    fn update(&mut self, data: &[u8]) {
        match self {
            StreamHasher::Blake3(h) => {
                h.update(data);
            }
            StreamHasher::Sha256(h) => h.update(data),
        }
    }

    fn finalize(self) -> Digest {
        match self {
            StreamHasher::Blake3(h) => Digest(*h.finalize().as_bytes()),
            StreamHasher::Sha256(h) => Digest(h.finalize().into()),
        }
    }
}

/// Streaming file hasher backed by BLAKE3 or SHA-256.
#[derive(Debug, Clone)]
pub struct FileHasher {
    algorithm: HashAlgorithm,
    chunk_size: usize,
}

impl Default for FileHasher {
    fn default() -> Self {
        Self::new(HashAlgorithm::default(), DEFAULT_CHUNK_SIZE)
    }
}

impl FileHasher {
    /// `chunk_size` is the read buffer size; zero is bumped to one byte.
    pub fn new(algorithm: HashAlgorithm, chunk_size: usize) -> Self {
        Self {
            algorithm,
            chunk_size: chunk_size.max(1),
        }
    }

    pub fn algorithm(&self) -> HashAlgorithm {
        self.algorithm
    }

    /// Digest an in-memory buffer with the configured algorithm.
    pub fn digest_bytes(&self, data: &[u8]) -> Digest {
        let mut hasher = StreamHasher::new(self.algorithm);
        hasher.update(data);
        hasher.finalize()
    }

    /// `Ok(None)` when `path` is not a regular file.
    fn hash_file(&self, path: &Path) -> io::Result<Option<Digest>> {
        if !fs::metadata(path)?.is_file() {
            return Ok(None);
        }
        let mut file = File::open(path)?;
        // the path may have been swapped between the stat and the open
        if !file.metadata()?.is_file() {
            return Ok(None);
        }
        let mut hasher = StreamHasher::new(self.algorithm);
        let mut buffer = vec![0u8; self.chunk_size];
        loop {
            let n = match file.read(&mut buffer) {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            };
            hasher.update(&buffer[..n]);
        }
        Ok(Some(hasher.finalize()))
    }
}

impl Fingerprinter for FileHasher {
    fn fingerprint(&self, path: &Path) -> Fingerprint {
        match self.hash_file(path) {
            Ok(Some(digest)) => Fingerprint::Present(digest),
            Ok(None) => {
                debug!(path = %path.display(), "not a regular file");
                Fingerprint::Absent
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Fingerprint::Absent,
            Err(e) => Fingerprint::ReadError(e),
        }
    }
}

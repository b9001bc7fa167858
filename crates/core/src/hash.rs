//! BLAKE3 hashing primitives for content-addressed snapshots

use serde::{Deserialize, Serialize};
use std::path::Path;

/// Files at or above this size are hashed through a memory map
pub const MMAP_THRESHOLD: u64 = 4 * 1024 * 1024;

/// BLAKE3 digest of a file or directory node
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Digest([u8; 32]);

impl Digest {
    pub const fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Parse a 64 character hex string; `None` on bad length or digits
    pub fn from_hex(text: &str) -> Option<Self> {
        let mut bytes = [0u8; 32];
        hex::decode_to_slice(text, &mut bytes).ok()?;
        Some(Self(bytes))
    }

    /// Fold this digest into a snapshot identifier
    ///
    /// Takes the bytes at even offsets (16 of 32) and formats them as a
    /// hyphenated UUID, so identical trees always map to the same id.
    pub fn snapshot_id(&self) -> String {
        let mut folded = [0u8; 16];
        for (i, byte) in folded.iter_mut().enumerate() {
            *byte = self.0[i * 2];
        }
        uuid::Uuid::from_bytes(folded).hyphenated().to_string()
    }
}

impl std::fmt::Debug for Digest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Digest({})", self.to_hex())
    }
}

impl std::fmt::Display for Digest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

pub fn hash_bytes(data: &[u8]) -> Digest {
    Digest::from_bytes(*blake3::hash(data).as_bytes())
}

/// Hash a file, picking streamed or mapped I/O by size
pub fn hash_file(path: &Path, len: u64) -> std::io::Result<Digest> {
    if len >= MMAP_THRESHOLD {
        hash_file_mmap(path)
    } else {
        hash_file_streaming(path)
    }
}

/// Hash a file by streaming it through the hasher
pub fn hash_file_streaming(path: &Path) -> std::io::Result<Digest> {
    let mut file = std::fs::File::open(path)?;
    let mut hasher = blake3::Hasher::new();
    std::io::copy(&mut file, &mut hasher)?;
    Ok(Digest::from_bytes(*hasher.finalize().as_bytes()))
}

/// Hash a file through a read-only memory map
pub fn hash_file_mmap(path: &Path) -> std::io::Result<Digest> {
    let file = std::fs::File::open(path)?;
    // SAFETY: the map is read-only and dropped before returning. A concurrent
    // writer can change the bytes we hash, which is the same race a buffered
    // read has.
    let mmap = unsafe { memmap2::Mmap::map(&file)? };
    Ok(Digest::from_bytes(*blake3::hash(&mmap).as_bytes()))
}

/// Incremental hasher used to fold child digests into a directory digest
pub struct IncrementalHasher {
    inner: blake3::Hasher,
}

impl IncrementalHasher {
    pub fn new() -> Self {
        Self {
            inner: blake3::Hasher::new(),
        }
    }

    pub fn update(&mut self, data: &[u8]) {
        self.inner.update(data);
    }

    pub fn finalize(self) -> Digest {
        Digest::from_bytes(*self.inner.finalize().as_bytes())
    }
}

impl Default for IncrementalHasher {
    fn default() -> Self {
        Self::new()
    }
}

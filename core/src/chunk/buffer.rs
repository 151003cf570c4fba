/*
 * buffer.rs
 * Copyright (C) 2026 Chris Burdess
 *
 * This file is part of Casellario, an SMTP message-processing backend.
 *
 * Casellario is free software: you can redistribute it and/or modify
 * it under the terms of the GNU General Public License as published by
 * the Free Software Foundation, either version 3 of the License, or
 * (at your option) any later version.
 *
 * Casellario is distributed in the hope that it will be useful,
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
 * GNU General Public License for more details.
 *
 * You should have received a copy of the GNU General Public License
 * along with Casellario.  If not, see <http://www.gnu.org/licenses/>.
 */

//! Fixed-capacity chunk assembly buffer with a running content hash.

use bytes::Bytes;
use md5::{Digest, Md5};

use super::HashKey;

/// Accumulates chunk bytes up to a fixed capacity. Filling never grows the
/// allocation; `cut` hands out the chunk with its digest and resets,
/// preserving capacity.
pub struct ChunkingBuffer {
    data: Vec<u8>,
    capacity: usize,
    hasher: Md5,
}

impl ChunkingBuffer {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            data: Vec::with_capacity(capacity),
            capacity,
            hasher: Md5::new(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.data.len() == self.capacity
    }

    /// Absorb as much of `p` as fits; the hash tracks every absorbed byte.
    /// Returns how many bytes were taken.
    pub fn fill(&mut self, p: &[u8]) -> usize {
        let n = (self.capacity - self.data.len()).min(p.len());
        self.data.extend_from_slice(&p[..n]);
        self.hasher.update(&p[..n]);
        n
    }

    /// Finalise the running hash, hand out the chunk bytes, and reset.
    pub fn cut(&mut self) -> (HashKey, Bytes) {
        let digest = self.hasher.finalize_reset();
        let bytes = Bytes::copy_from_slice(&self.data);
        self.data.clear();
        (HashKey::new(digest.into()), bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fill_never_exceeds_capacity() {
        let mut b = ChunkingBuffer::new(8);
        assert_eq!(b.fill(b"0123456789"), 8);
        assert!(b.is_full());
        assert_eq!(b.fill(b"x"), 0);
        assert_eq!(b.len(), 8);
    }

    #[test]
    fn cut_resets_and_preserves_capacity() {
        let mut b = ChunkingBuffer::new(16);
        b.fill(b"hello");
        let before = b.data.capacity();
        let (_, bytes) = b.cut();
        assert_eq!(&bytes[..], b"hello");
        assert!(b.is_empty());
        assert_eq!(b.data.capacity(), before);
    }

    #[test]
    fn digest_matches_content() {
        use md5::{Digest, Md5};
        let mut b = ChunkingBuffer::new(64);
        b.fill(b"split ");
        b.fill(b"input");
        let (hash, bytes) = b.cut();
        let mut h = Md5::new();
        h.update(b"split input");
        assert_eq!(hash, HashKey::new(h.finalize().into()));
        assert_eq!(&bytes[..], b"split input");

        // The hash state restarts after a cut.
        b.fill(b"split input");
        let (hash2, _) = b.cut();
        assert_eq!(hash2, hash);
    }
}

/*
 * mod.rs
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

//! Content-addressed chunked message store: records, parts metadata,
//! storage engines, segmenting saver, reassembly reader.

mod buffer;
mod memory;
mod reader;
mod saver;
pub mod sql;
mod store;

pub use buffer::ChunkingBuffer;
pub use memory::MemoryStore;
pub use reader::{ChunkedReader, PartDecoder};
pub use saver::{ChunkSaver, DEFAULT_CHUNK_SIZE};
pub use store::{shared, ChunkStorage, SharedStorage, StorageError};

use std::fmt;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::de::{self, Deserializer, Visitor};
use serde::{Deserialize, Serialize, Serializer};

/// Fixed 16-byte content hash of one stored chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HashKey([u8; 16]);

impl HashKey {
    pub fn new(bytes: [u8; 16]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 16] {
        &self.0
    }

    /// Parse the 32-character hex form.
    pub fn from_hex(s: &str) -> Option<Self> {
        let s = s.trim();
        if s.len() != 32 {
            return None;
        }
        let mut out = [0u8; 16];
        for (i, chunk) in s.as_bytes().chunks(2).enumerate() {
            let hi = (chunk[0] as char).to_digit(16)?;
            let lo = (chunk[1] as char).to_digit(16)?;
            out[i] = ((hi << 4) | lo) as u8;
        }
        Some(Self(out))
    }
}

impl fmt::Display for HashKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for b in self.0 {
            write!(f, "{:02x}", b)?;
        }
        Ok(())
    }
}

impl Serialize for HashKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for HashKey {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct HexVisitor;
        impl Visitor<'_> for HexVisitor {
            type Value = HashKey;
            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "a 32-character hex string")
            }
            fn visit_str<E: de::Error>(self, v: &str) -> Result<HashKey, E> {
                HashKey::from_hex(v).ok_or_else(|| E::custom("invalid chunk hash"))
            }
        }
        deserializer.deserialize_str(HexVisitor)
    }
}

/// One stored chunk. A record with `reference_count` 0 is eligible for GC.
#[derive(Debug, Clone)]
pub struct ChunkRecord {
    pub hash: HashKey,
    pub data: Bytes,
    pub reference_count: u32,
    pub modified_at: DateTime<Utc>,
}

/// Descriptor of one MIME part inside a stored message: which chunks hold
/// it, in order, and how its content was declared.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChunkedPart {
    pub part_id: String,
    pub chunk_hashes: Vec<HashKey>,
    pub content_type: String,
    pub charset: String,
    pub transfer_encoding: String,
    pub content_disposition: String,
}

/// MIME structure metadata of a stored message.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PartsInfo {
    /// Equals the length of `parts`.
    pub count: u32,
    /// Index of the primary text part in `parts`, or -1.
    pub text_part: i32,
    /// Index of the primary HTML part in `parts`, or -1.
    pub html_part: i32,
    pub has_attach: bool,
    pub parts: Vec<ChunkedPart>,
}

impl Default for PartsInfo {
    fn default() -> Self {
        Self {
            count: 0,
            text_part: -1,
            html_part: -1,
            has_attach: false,
            parts: Vec::new(),
        }
    }
}

/// A stored message's metadata row.
#[derive(Debug, Clone)]
pub struct StoredEmail {
    pub message_id: u64,
    pub created_at: DateTime<Utc>,
    pub size: u64,
    /// Sender (MAIL FROM).
    pub from: String,
    /// Primary recipient.
    pub to: String,
    pub helo: String,
    pub subject: String,
    pub queued_id: String,
    pub ip: std::net::IpAddr,
    pub return_path: String,
    pub is_tls: bool,
    pub parts_info: PartsInfo,
}

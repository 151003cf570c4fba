/*
 * store.rs
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

//! Storage engine trait for chunks and stored messages.

use std::fmt;
use std::net::IpAddr;
use std::sync::{Arc, Mutex};

use crate::config::ConfigGroup;

use super::{ChunkRecord, HashKey, PartsInfo, StoredEmail};

/// Storage-side failures. `Unavailable` and `Busy` are transient; the
/// client may retry the transaction.
#[derive(Debug, Clone)]
pub enum StorageError {
    NotFound(String),
    Unavailable(String),
    Message(String),
}

impl StorageError {
    pub fn new(msg: impl Into<String>) -> Self {
        Self::Message(msg.into())
    }
}

impl fmt::Display for StorageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StorageError::NotFound(m) => write!(f, "not found: {}", m),
            StorageError::Unavailable(m) => write!(f, "storage not available: {}", m),
            StorageError::Message(m) => write!(f, "{}", m),
        }
    }
}

impl std::error::Error for StorageError {}

/// A chunk-and-message store. `add_chunk` is idempotent under equal bytes
/// (reference counting); `open_message`/`close_message` are not.
pub trait ChunkStorage: Send {
    fn initialize(&mut self, cfg: &ConfigGroup) -> Result<(), StorageError>;

    /// Begin a stored message; returns its id.
    #[allow(clippy::too_many_arguments)]
    fn open_message(
        &mut self,
        from: &str,
        helo: &str,
        recipient: &str,
        ip: IpAddr,
        return_path: &str,
        is_tls: bool,
    ) -> Result<u64, StorageError>;

    /// Insert a chunk, or bump its reference count when the hash exists.
    fn add_chunk(&mut self, data: &[u8], hash: HashKey) -> Result<(), StorageError>;

    /// Finalise a stored message with its size and structure metadata.
    #[allow(clippy::too_many_arguments)]
    fn close_message(
        &mut self,
        message_id: u64,
        size: u64,
        parts_info: &PartsInfo,
        subject: &str,
        queued_id: &str,
        to: &str,
        from: &str,
    ) -> Result<(), StorageError>;

    fn get_email(&mut self, message_id: u64) -> Result<StoredEmail, StorageError>;

    fn get_chunks(&mut self, hashes: &[HashKey]) -> Result<Vec<ChunkRecord>, StorageError>;

    fn shutdown(&mut self) -> Result<(), StorageError>;
}

/// Storage handle shared between the saver, the reader, and their tests.
pub type SharedStorage = Arc<Mutex<dyn ChunkStorage>>;

pub fn shared(engine: impl ChunkStorage + 'static) -> SharedStorage {
    Arc::new(Mutex::new(engine))
}

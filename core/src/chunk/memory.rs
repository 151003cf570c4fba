/*
 * memory.rs
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

//! In-memory storage engine keyed by the 16-byte chunk hash.

use std::collections::HashMap;
use std::net::IpAddr;

use bytes::Bytes;
use chrono::Utc;

use crate::config::ConfigGroup;

use super::{ChunkRecord, ChunkStorage, HashKey, PartsInfo, StorageError, StoredEmail};

#[derive(Default)]
pub struct MemoryStore {
    chunks: HashMap<HashKey, ChunkRecord>,
    emails: HashMap<u64, StoredEmail>,
    next_id: u64,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn chunk_count(&self) -> usize {
        self.chunks.len()
    }

    pub fn email_count(&self) -> usize {
        self.emails.len()
    }
}

impl ChunkStorage for MemoryStore {
    fn initialize(&mut self, _cfg: &ConfigGroup) -> Result<(), StorageError> {
        Ok(())
    }

    fn open_message(
        &mut self,
        from: &str,
        helo: &str,
        recipient: &str,
        ip: IpAddr,
        return_path: &str,
        is_tls: bool,
    ) -> Result<u64, StorageError> {
        self.next_id += 1;
        let id = self.next_id;
        self.emails.insert(
            id,
            StoredEmail {
                message_id: id,
                created_at: Utc::now(),
                size: 0,
                from: from.to_string(),
                to: recipient.to_string(),
                helo: helo.to_string(),
                subject: String::new(),
                queued_id: String::new(),
                ip,
                return_path: return_path.to_string(),
                is_tls,
                parts_info: PartsInfo::default(),
            },
        );
        Ok(id)
    }

    fn add_chunk(&mut self, data: &[u8], hash: HashKey) -> Result<(), StorageError> {
        match self.chunks.get_mut(&hash) {
            Some(record) => {
                record.reference_count += 1;
                record.modified_at = Utc::now();
            }
            None => {
                self.chunks.insert(
                    hash,
                    ChunkRecord {
                        hash,
                        data: Bytes::copy_from_slice(data),
                        reference_count: 1,
                        modified_at: Utc::now(),
                    },
                );
            }
        }
        Ok(())
    }

    fn close_message(
        &mut self,
        message_id: u64,
        size: u64,
        parts_info: &PartsInfo,
        subject: &str,
        queued_id: &str,
        to: &str,
        from: &str,
    ) -> Result<(), StorageError> {
        let email = self
            .emails
            .get_mut(&message_id)
            .ok_or_else(|| StorageError::NotFound(format!("message {}", message_id)))?;
        email.size = size;
        email.parts_info = parts_info.clone();
        email.subject = subject.to_string();
        email.queued_id = queued_id.to_string();
        if !to.is_empty() {
            email.to = to.to_string();
        }
        if !from.is_empty() {
            email.from = from.to_string();
        }
        Ok(())
    }

    fn get_email(&mut self, message_id: u64) -> Result<StoredEmail, StorageError> {
        self.emails
            .get(&message_id)
            .cloned()
            .ok_or_else(|| StorageError::NotFound(format!("message {}", message_id)))
    }

    fn get_chunks(&mut self, hashes: &[HashKey]) -> Result<Vec<ChunkRecord>, StorageError> {
        hashes
            .iter()
            .map(|h| {
                self.chunks
                    .get(h)
                    .cloned()
                    .ok_or_else(|| StorageError::NotFound(format!("chunk {}", h)))
            })
            .collect()
    }

    fn shutdown(&mut self) -> Result<(), StorageError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    fn key(data: &[u8]) -> HashKey {
        use md5::{Digest, Md5};
        let mut h = Md5::new();
        h.update(data);
        HashKey::new(h.finalize().into())
    }

    #[test]
    fn duplicate_chunk_bumps_reference_count() {
        let mut store = MemoryStore::new();
        let h = key(b"same bytes");
        store.add_chunk(b"same bytes", h).unwrap();
        store.add_chunk(b"same bytes", h).unwrap();
        let records = store.get_chunks(&[h]).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].reference_count, 2);
        assert_eq!(store.chunk_count(), 1);
    }

    #[test]
    fn distinct_chunks_get_distinct_records() {
        let mut store = MemoryStore::new();
        store.add_chunk(b"aaa", key(b"aaa")).unwrap();
        store.add_chunk(b"bbb", key(b"bbb")).unwrap();
        assert_eq!(store.chunk_count(), 2);
    }

    #[test]
    fn message_open_close_round_trip() {
        let mut store = MemoryStore::new();
        let ip = IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1));
        let id = store
            .open_message("a@b", "helo.host", "c@d", ip, "a@b", true)
            .unwrap();
        store
            .close_message(id, 42, &PartsInfo::default(), "Hi", "qid1", "c@d", "a@b")
            .unwrap();
        let email = store.get_email(id).unwrap();
        assert_eq!(email.size, 42);
        assert_eq!(email.subject, "Hi");
        assert_eq!(email.queued_id, "qid1");
        assert!(email.is_tls);
        assert!(store.get_email(id + 1).is_err());
    }
}

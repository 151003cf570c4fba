/*
 * saver.rs
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

//! MIME-aware streaming segmenter: cuts the incoming message at part and
//! header boundaries and at the chunk-size limit, content-addresses each
//! segment, and inserts it into the storage engine (deduplicated).

use std::io;
use std::sync::{Arc, Mutex, PoisonError};

use log::debug;

use crate::backend::envelope::Envelope;
use crate::backend::stream::{write_all, StreamProcessor};
use crate::mime::MimePart;

use super::{ChunkedPart, ChunkingBuffer, PartsInfo, SharedStorage, StorageError};

pub const DEFAULT_CHUNK_SIZE: usize = 16 * 1024;

fn storage_io(e: StorageError) -> io::Error {
    io::Error::new(io::ErrorKind::Other, e)
}

/// Stream decorator that persists the message as content-addressed chunks.
/// Expects the MIME analyzer upstream to share the live part list through
/// the envelope hand-off; without it, everything lands in a single part.
pub struct ChunkSaver {
    next: Box<dyn StreamProcessor>,
    storage: SharedStorage,
    chunk_size: usize,
    buffer: ChunkingBuffer,
    parts: Option<Arc<Mutex<Vec<MimePart>>>>,
    info: PartsInfo,
    /// Absolute offset of the next byte to absorb.
    msg_pos: u64,
    /// Boundaries at or before this offset have been honoured.
    last_cut: u64,
    current_part: usize,
    message_id: Option<u64>,
    queued_id: String,
    envelope_from: String,
    envelope_to: String,
    subject: String,
    header_to: String,
    header_from: String,
    headers_seen: bool,
}

impl ChunkSaver {
    pub fn new(next: Box<dyn StreamProcessor>, storage: SharedStorage, chunk_size: usize) -> Self {
        let chunk_size = if chunk_size == 0 {
            DEFAULT_CHUNK_SIZE
        } else {
            chunk_size
        };
        Self {
            next,
            storage,
            chunk_size,
            buffer: ChunkingBuffer::new(chunk_size),
            parts: None,
            info: PartsInfo::default(),
            msg_pos: 0,
            last_cut: 0,
            current_part: 0,
            message_id: None,
            queued_id: String::new(),
            envelope_from: String::new(),
            envelope_to: String::new(),
            subject: String::new(),
            header_to: String::new(),
            header_from: String::new(),
            headers_seen: false,
        }
    }

    /// The smallest untriggered boundary offset within `(last_cut, limit]`.
    /// Triggers are each part's starting position and body start.
    fn next_boundary(&self, limit: u64) -> Option<u64> {
        let parts = self.parts.as_ref()?;
        let parts = parts.lock().unwrap_or_else(PoisonError::into_inner);
        let mut best: Option<u64> = None;
        for p in parts.iter() {
            for off in [p.starting_pos, p.starting_pos_body] {
                if off > self.last_cut && off <= limit && best.map_or(true, |b| off < b) {
                    best = Some(off);
                }
            }
        }
        best
    }

    /// Honour a boundary: flush whatever is buffered, then make the part
    /// starting at `off` (if any) current.
    fn cut_at(&mut self, off: u64) -> io::Result<()> {
        if !self.buffer.is_empty() {
            self.flush()?;
        }
        self.last_cut = off;
        if let Some(parts) = &self.parts {
            let parts = parts.lock().unwrap_or_else(PoisonError::into_inner);
            for (i, p) in parts.iter().enumerate() {
                if p.starting_pos == off {
                    self.current_part = i;
                }
            }
        }
        self.capture_root_headers();
        Ok(())
    }

    /// Absorb bytes into the chunk buffer, flushing each time it fills.
    fn absorb(&mut self, mut p: &[u8]) -> io::Result<()> {
        while !p.is_empty() {
            let n = self.buffer.fill(p);
            self.msg_pos += n as u64;
            p = &p[n..];
            if !p.is_empty() {
                self.flush()?;
            }
        }
        Ok(())
    }

    /// Cut a chunk: finalise the digest, record it on the current part's
    /// descriptor, and insert it into storage.
    fn flush(&mut self) -> io::Result<()> {
        if self.buffer.is_empty() {
            return Ok(());
        }
        let (hash, bytes) = self.buffer.cut();

        let (part_id, content_type, charset, transfer_encoding, disposition) =
            match self.parts.as_ref() {
                Some(parts) => {
                    let parts = parts.lock().unwrap_or_else(PoisonError::into_inner);
                    match parts.get(self.current_part) {
                        Some(p) => (
                            p.node.clone(),
                            p.mime_type(),
                            p.charset.clone(),
                            p.transfer_encoding.clone(),
                            p.content_disposition.clone(),
                        ),
                        None => default_part_meta(),
                    }
                }
                None => default_part_meta(),
            };

        match self.info.parts.last_mut() {
            Some(last) if last.part_id == part_id => last.chunk_hashes.push(hash),
            _ => {
                let index = self.info.parts.len() as i32;
                let primary = content_type.split('/').next().unwrap_or("");
                let is_inline_text =
                    primary.eq_ignore_ascii_case("text") && disposition != "attachment";
                if is_inline_text && content_type.eq_ignore_ascii_case("text/plain")
                    && self.info.text_part < 0
                {
                    self.info.text_part = index;
                }
                if is_inline_text && content_type.eq_ignore_ascii_case("text/html")
                    && self.info.html_part < 0
                {
                    self.info.html_part = index;
                }
                let container = primary.eq_ignore_ascii_case("multipart")
                    || primary.eq_ignore_ascii_case("message");
                if disposition == "attachment"
                    || (!container && !primary.eq_ignore_ascii_case("text"))
                {
                    self.info.has_attach = true;
                }
                self.info.parts.push(ChunkedPart {
                    part_id,
                    chunk_hashes: vec![hash],
                    content_type,
                    charset,
                    transfer_encoding,
                    content_disposition: disposition,
                });
                self.info.count = self.info.parts.len() as u32;
            }
        }

        debug!(target: "chunksaver", "chunk {} ({} bytes)", hash, bytes.len());
        let mut storage = self.storage.lock().unwrap_or_else(PoisonError::into_inner);
        storage.add_chunk(&bytes, hash).map_err(storage_io)
    }

    /// Subject, To, and From come from the first part's headers, captured
    /// the first time they are available.
    fn capture_root_headers(&mut self) {
        if self.headers_seen {
            return;
        }
        let Some(parts) = &self.parts else {
            return;
        };
        let parts = parts.lock().unwrap_or_else(PoisonError::into_inner);
        let Some(root) = parts.first() else {
            return;
        };
        if root.headers.is_empty() {
            return;
        }
        self.subject = root.header("subject").unwrap_or("").to_string();
        self.header_to = root.header("to").unwrap_or("").to_string();
        self.header_from = root.header("from").unwrap_or("").to_string();
        self.headers_seen = true;
    }
}

fn default_part_meta() -> (String, String, String, String, String) {
    (
        "1".to_string(),
        "text/plain".to_string(),
        crate::mime::DEFAULT_CHARSET.to_string(),
        crate::mime::DEFAULT_TRANSFER_ENCODING.to_string(),
        String::new(),
    )
}

impl StreamProcessor for ChunkSaver {
    fn open(&mut self, e: &mut Envelope) -> io::Result<()> {
        self.envelope_from = e.mail_from.to_string();
        self.envelope_to = e
            .rcpt_to
            .first()
            .map(|a| a.to_string())
            .unwrap_or_default();
        let id = {
            let mut storage = self.storage.lock().unwrap_or_else(PoisonError::into_inner);
            storage
                .open_message(
                    &self.envelope_from,
                    &e.helo,
                    &self.envelope_to,
                    e.remote_ip,
                    &e.return_path(),
                    e.tls,
                )
                .map_err(storage_io)?
        };
        e.handoff.message_id = Some(id);
        self.message_id = Some(id);
        self.queued_id = e.queued_id.clone();
        self.parts = e.handoff.mime_parts.clone();
        self.buffer = ChunkingBuffer::new(self.chunk_size);
        self.info = PartsInfo::default();
        self.msg_pos = 0;
        self.last_cut = 0;
        self.current_part = 0;
        self.subject.clear();
        self.header_to.clear();
        self.header_from.clear();
        self.headers_seen = false;
        self.next.open(e)
    }

    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut p = buf;
        while !p.is_empty() {
            let limit = self.msg_pos + p.len() as u64;
            match self.next_boundary(limit) {
                Some(off) if off <= self.msg_pos => self.cut_at(off)?,
                Some(off) => {
                    let take = (off - self.msg_pos) as usize;
                    self.absorb(&p[..take])?;
                    p = &p[take..];
                    self.cut_at(off)?;
                }
                None => {
                    self.absorb(p)?;
                    p = &[];
                }
            }
        }
        write_all(self.next.as_mut(), buf)?;
        Ok(buf.len())
    }

    fn close(&mut self) -> io::Result<()> {
        // The analyzer upstream has already closed its parser, so trailing
        // body starts now sit at or before the end of the message.
        while let Some(off) = self.next_boundary(self.msg_pos) {
            self.cut_at(off)?;
        }
        if !self.buffer.is_empty() {
            self.flush()?;
        }
        self.capture_root_headers();
        let id = self
            .message_id
            .take()
            .ok_or_else(|| io::Error::new(io::ErrorKind::Other, "close without open"))?;
        {
            let mut storage = self.storage.lock().unwrap_or_else(PoisonError::into_inner);
            storage
                .close_message(
                    id,
                    self.msg_pos,
                    &self.info,
                    &self.subject,
                    &self.queued_id,
                    &self.header_to,
                    &self.header_from,
                )
                .map_err(storage_io)?;
        }
        self.next.close()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::stream::StreamTerminal;
    use crate::chunk::{shared, MemoryStore};

    fn saver(chunk_size: usize) -> (ChunkSaver, SharedStorage) {
        let storage = shared(MemoryStore::new());
        let s = ChunkSaver::new(Box::new(StreamTerminal), Arc::clone(&storage), chunk_size);
        (s, storage)
    }

    #[test]
    fn capacity_cut_sizes() {
        let (mut s, storage) = saver(64);
        let mut e = Envelope::default();
        let input: Vec<u8> = (0..130u32).map(|i| (i % 251) as u8).collect();
        s.open(&mut e).unwrap();
        s.write(&input).unwrap();
        s.close().unwrap();

        let id = e.handoff.message_id.unwrap();
        let mut guard = storage.lock().unwrap();
        let email = guard.get_email(id).unwrap();
        assert_eq!(email.size, 130);
        assert_eq!(email.parts_info.count, 1);
        let hashes = &email.parts_info.parts[0].chunk_hashes;
        assert_eq!(hashes.len(), 3);
        let sizes: Vec<usize> = guard
            .get_chunks(hashes)
            .unwrap()
            .iter()
            .map(|c| c.data.len())
            .collect();
        assert_eq!(sizes, vec![64, 64, 2]);
    }

    #[test]
    fn close_without_open_errors() {
        let (mut s, _) = saver(64);
        assert!(s.close().is_err());
    }
}

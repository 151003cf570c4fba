/*
 * reader.rs
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

//! Reassembly readers over stored chunks: sequential whole-message stream
//! with part seeking, and a per-part decoding variant.

use std::io;
use std::io::Read;
use std::sync::PoisonError;

use bytes::Bytes;

use crate::mime::transfer::{decode_base64, decode_quoted_printable};

use super::{HashKey, SharedStorage, StorageError, StoredEmail};

fn storage_io(e: StorageError) -> io::Error {
    io::Error::new(io::ErrorKind::Other, e)
}

/// Sequential byte stream over the concatenation of a stored message's
/// chunks, across all parts in order. Chunks are fetched lazily.
pub struct ChunkedReader {
    storage: SharedStorage,
    email: StoredEmail,
    part: usize,
    chunk: usize,
    current: Bytes,
    offset: usize,
}

impl ChunkedReader {
    pub fn open(storage: SharedStorage, message_id: u64) -> Result<Self, StorageError> {
        let email = {
            let mut guard = storage.lock().unwrap_or_else(PoisonError::into_inner);
            guard.get_email(message_id)?
        };
        Ok(Self {
            storage,
            email,
            part: 0,
            chunk: 0,
            current: Bytes::new(),
            offset: 0,
        })
    }

    pub fn email(&self) -> &StoredEmail {
        &self.email
    }

    /// Reposition to the first chunk of part `i`.
    pub fn seek_part(&mut self, i: usize) -> Result<(), StorageError> {
        if i >= self.email.parts_info.parts.len() {
            return Err(StorageError::NotFound(format!("part {}", i)));
        }
        self.part = i;
        self.chunk = 0;
        self.current = Bytes::new();
        self.offset = 0;
        Ok(())
    }

    /// Hash of the next chunk to fetch, advancing part/chunk cursors.
    fn next_hash(&mut self) -> Option<HashKey> {
        loop {
            let part = self.email.parts_info.parts.get(self.part)?;
            match part.chunk_hashes.get(self.chunk) {
                Some(h) => {
                    self.chunk += 1;
                    return Some(*h);
                }
                None => {
                    self.part += 1;
                    self.chunk = 0;
                }
            }
        }
    }

    fn refill(&mut self) -> io::Result<bool> {
        let Some(hash) = self.next_hash() else {
            return Ok(false);
        };
        let records = {
            let mut guard = self
                .storage
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            guard.get_chunks(&[hash]).map_err(storage_io)?
        };
        let record = records
            .into_iter()
            .next()
            .ok_or_else(|| storage_io(StorageError::NotFound(format!("chunk {}", hash))))?;
        self.current = record.data;
        self.offset = 0;
        Ok(true)
    }
}

impl Read for ChunkedReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        while self.offset >= self.current.len() {
            if !self.refill()? {
                return Ok(0);
            }
        }
        let n = (self.current.len() - self.offset).min(buf.len());
        buf[..n].copy_from_slice(&self.current[self.offset..self.offset + n]);
        self.offset += n;
        Ok(n)
    }
}

/// Reader over one part's content with its transfer-encoding unwrapped and
/// its charset decoded to UTF-8. The part's raw bytes are pulled through a
/// `ChunkedReader` limited to that part, then decoded.
pub struct PartDecoder {
    decoded: Vec<u8>,
    pos: usize,
}

impl PartDecoder {
    pub fn open(
        storage: SharedStorage,
        message_id: u64,
        part: usize,
    ) -> Result<Self, StorageError> {
        let mut reader = ChunkedReader::open(storage, message_id)?;
        reader.seek_part(part)?;
        let descriptor = reader.email.parts_info.parts[part].clone();
        let chunk_count = descriptor.chunk_hashes.len();

        let mut raw = Vec::new();
        let mut fetched = 0;
        while fetched < chunk_count {
            if !reader.refill().map_err(|e| StorageError::new(e.to_string()))? {
                break;
            }
            raw.extend_from_slice(&reader.current);
            fetched += 1;
        }

        // Chunks are cut at the part's header/body boundary, so the raw
        // bytes open with the header block; the tail carries the enclosing
        // boundary delimiter lines.
        let body = trim_trailing_boundaries(strip_header_block(&raw));
        let unwrapped = match descriptor.transfer_encoding.as_str() {
            "base64" => decode_base64(body),
            "quoted-printable" => decode_quoted_printable(body),
            _ => body.to_vec(),
        };

        let decoded = decode_charset(&unwrapped, &descriptor.charset);
        Ok(Self { decoded, pos: 0 })
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.decoded
    }
}

impl Read for PartDecoder {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = (self.decoded.len() - self.pos).min(buf.len());
        buf[..n].copy_from_slice(&self.decoded[self.pos..self.pos + n]);
        self.pos += n;
        Ok(n)
    }
}

/// Skip past the part's header block (first blank line). Headerless
/// content is all body.
fn strip_header_block(raw: &[u8]) -> &[u8] {
    for i in 0..raw.len() {
        if raw[i] != b'\n' {
            continue;
        }
        if raw[i + 1..].starts_with(b"\n") {
            return &raw[i + 2..];
        }
        if raw[i + 1..].starts_with(b"\r\n") {
            return &raw[i + 3..];
        }
    }
    raw
}

/// Drop trailing boundary delimiter lines (`--...`), plus the line break
/// that belongs to the first delimiter.
fn trim_trailing_boundaries(mut body: &[u8]) -> &[u8] {
    loop {
        let trimmed = match body.last() {
            Some(b'\n') => {
                let mut end = body.len() - 1;
                if end > 0 && body[end - 1] == b'\r' {
                    end -= 1;
                }
                end
            }
            _ => body.len(),
        };
        let line_start = body[..trimmed]
            .iter()
            .rposition(|&b| b == b'\n')
            .map(|i| i + 1)
            .unwrap_or(0);
        if body[line_start..trimmed].starts_with(b"--") {
            body = &body[..line_start];
        } else {
            break;
        }
    }
    // The line break preceding the first delimiter belongs to it.
    if body.ends_with(b"\r\n") {
        &body[..body.len() - 2]
    } else if body.ends_with(b"\n") {
        &body[..body.len() - 1]
    } else {
        body
    }
}

/// Convert part content to UTF-8 bytes. Unknown labels pass through.
fn decode_charset(raw: &[u8], charset: &str) -> Vec<u8> {
    if charset.is_empty()
        || charset.eq_ignore_ascii_case("utf-8")
        || charset.eq_ignore_ascii_case("us-ascii")
    {
        return raw.to_vec();
    }
    match encoding_rs::Encoding::for_label(charset.as_bytes()) {
        Some(enc) => {
            let (text, _, _) = enc.decode(raw);
            text.into_owned().into_bytes()
        }
        None => raw.to_vec(),
    }
}

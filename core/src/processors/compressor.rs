/*
 * compressor.rs
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

//! Lazy zlib compression of the message, handed off for later stages.

use std::io::Write;
use std::sync::{Arc, Mutex, PoisonError};

use bytes::Bytes;
use flate2::write::ZlibEncoder;
use flate2::Compression;

use crate::backend::envelope::Envelope;
use crate::backend::processor::{Processor, ProcessorResult, Task};
use crate::backend::registry::ProcessorInstance;
use crate::backend::result::ProcessorError;
use crate::config::{ConfigError, ConfigGroup};

/// Delivery header plus message body, compressed on first use and cached.
/// Cheap to clone; clones share the cache.
#[derive(Debug, Clone, Default)]
pub struct CompressedPayload {
    header: Bytes,
    body: Bytes,
    cache: Arc<Mutex<Option<Bytes>>>,
}

impl CompressedPayload {
    pub fn new(header: Bytes, body: Bytes) -> Self {
        Self {
            header,
            body,
            cache: Arc::new(Mutex::new(None)),
        }
    }

    /// The zlib stream over header + body.
    pub fn bytes(&self) -> Result<Bytes, std::io::Error> {
        let mut cache = self.cache.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(b) = cache.as_ref() {
            return Ok(b.clone());
        }
        let mut enc = ZlibEncoder::new(Vec::new(), Compression::default());
        enc.write_all(&self.header)?;
        enc.write_all(&self.body)?;
        let compressed = Bytes::from(enc.finish()?);
        *cache = Some(compressed.clone());
        Ok(compressed)
    }
}

struct Compressor {
    next: Box<dyn Processor>,
}

impl Processor for Compressor {
    fn process(&mut self, e: &mut Envelope, task: Task) -> ProcessorResult {
        if task == Task::Save {
            let payload = CompressedPayload::new(
                Bytes::from(e.delivery_header.clone().into_bytes()),
                e.data_bytes(),
            );
            // Fail early if the body cannot be compressed at all.
            payload
                .bytes()
                .map_err(|err| ProcessorError::Storage(err.to_string()))?;
            e.handoff.compressor = Some(payload);
        }
        self.next.process(e, task)
    }
}

pub fn factory(
    _cfg: &ConfigGroup,
    next: Box<dyn Processor>,
) -> Result<ProcessorInstance, ConfigError> {
    Ok(ProcessorInstance::plain(Compressor { next }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::processor::DefaultProcessor;
    use flate2::read::ZlibDecoder;
    use std::io::Read;

    #[test]
    fn payload_round_trips_through_zlib() {
        let p = CompressedPayload::new(Bytes::from_static(b"H: v\n"), Bytes::from_static(b"body"));
        let compressed = p.bytes().unwrap();
        let mut out = String::new();
        ZlibDecoder::new(&compressed[..]).read_to_string(&mut out).unwrap();
        assert_eq!(out, "H: v\nbody");
        // Second call serves the cache (same bytes).
        assert_eq!(p.bytes().unwrap(), compressed);
    }

    #[test]
    fn stage_installs_handoff_payload() {
        let mut p = Compressor {
            next: Box::new(DefaultProcessor),
        };
        let mut e = Envelope::default();
        e.set_data(b"some body");
        e.delivery_header = "Delivered-To: x\n".to_string();
        p.process(&mut e, Task::Save).unwrap();
        assert!(e.handoff.compressor.is_some());
    }
}

/*
 * compress.rs
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

//! zlib stream stages. The write-side flate2 adapters decode/encode as
//! bytes pass through, so no helper task is needed on pipe boundaries.

use std::io;
use std::io::Write;
use std::sync::{Arc, Mutex, PoisonError};

use flate2::write::{ZlibDecoder, ZlibEncoder};
use flate2::Compression;

use crate::backend::envelope::Envelope;
use crate::backend::registry::StreamInstance;
use crate::backend::stream::{write_all, StreamProcessor};
use crate::config::{ConfigError, ConfigGroup};

/// The downstream chain as an `io::Write`, shared with a flate2 adapter.
#[derive(Clone)]
struct DownstreamWriter(Arc<Mutex<Box<dyn StreamProcessor>>>);

impl Write for DownstreamWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut next = self.0.lock().unwrap_or_else(PoisonError::into_inner);
        write_all(next.as_mut(), buf)?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

struct Compress {
    next: Arc<Mutex<Box<dyn StreamProcessor>>>,
    encoder: Option<ZlibEncoder<DownstreamWriter>>,
}

impl StreamProcessor for Compress {
    fn open(&mut self, e: &mut Envelope) -> io::Result<()> {
        {
            let mut next = self.next.lock().unwrap_or_else(PoisonError::into_inner);
            next.open(e)?;
        }
        self.encoder = Some(ZlibEncoder::new(
            DownstreamWriter(Arc::clone(&self.next)),
            Compression::default(),
        ));
        Ok(())
    }

    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self.encoder.as_mut() {
            Some(enc) => enc.write(buf),
            None => Err(io::Error::new(io::ErrorKind::NotConnected, "write before open")),
        }
    }

    fn close(&mut self) -> io::Result<()> {
        if let Some(enc) = self.encoder.take() {
            enc.finish()?;
        }
        let mut next = self.next.lock().unwrap_or_else(PoisonError::into_inner);
        next.close()
    }
}

struct Decompress {
    next: Arc<Mutex<Box<dyn StreamProcessor>>>,
    decoder: Option<ZlibDecoder<DownstreamWriter>>,
}

impl StreamProcessor for Decompress {
    fn open(&mut self, e: &mut Envelope) -> io::Result<()> {
        {
            let mut next = self.next.lock().unwrap_or_else(PoisonError::into_inner);
            next.open(e)?;
        }
        self.decoder = Some(ZlibDecoder::new(DownstreamWriter(Arc::clone(&self.next))));
        Ok(())
    }

    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self.decoder.as_mut() {
            Some(dec) => dec.write(buf),
            None => Err(io::Error::new(io::ErrorKind::NotConnected, "write before open")),
        }
    }

    fn close(&mut self) -> io::Result<()> {
        if let Some(dec) = self.decoder.take() {
            dec.finish()?;
        }
        let mut next = self.next.lock().unwrap_or_else(PoisonError::into_inner);
        next.close()
    }
}

pub fn compress_factory(
    _cfg: &ConfigGroup,
    next: Box<dyn StreamProcessor>,
) -> Result<StreamInstance, ConfigError> {
    Ok(StreamInstance::plain(Compress {
        next: Arc::new(Mutex::new(next)),
        encoder: None,
    }))
}

pub fn decompress_factory(
    _cfg: &ConfigGroup,
    next: Box<dyn StreamProcessor>,
) -> Result<StreamInstance, ConfigError> {
    Ok(StreamInstance::plain(Decompress {
        next: Arc::new(Mutex::new(next)),
        decoder: None,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::stream::write_all as push_all;

    /// Terminal that keeps everything written to it.
    struct Capture(Arc<Mutex<Vec<u8>>>);

    impl StreamProcessor for Capture {
        fn open(&mut self, _e: &mut Envelope) -> io::Result<()> {
            Ok(())
        }
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }
        fn close(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn compress_then_decompress_round_trips() {
        let sink = Arc::new(Mutex::new(Vec::new()));
        let capture = Box::new(Capture(Arc::clone(&sink)));
        let decompress =
            decompress_factory(&ConfigGroup::new(), capture).unwrap().processor;
        let mut chain = compress_factory(&ConfigGroup::new(), decompress)
            .unwrap()
            .processor;

        let mut e = Envelope::default();
        chain.open(&mut e).unwrap();
        let payload = b"a mildly repetitive payload payload payload".repeat(20);
        push_all(chain.as_mut(), &payload).unwrap();
        chain.close().unwrap();

        assert_eq!(*sink.lock().unwrap(), payload);
    }
}

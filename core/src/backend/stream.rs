/*
 * stream.rs
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

//! Stream pipeline runtime: Open/Write/Close lifecycle for chained writers.

use std::io;
use std::io::Read;

use crate::backend::envelope::Envelope;

/// A stream pipeline stage: a decorator around the next writer.
///
/// For one envelope, `open` strictly precedes any `write`, which strictly
/// precedes `close`. Decorators forward `open` and `close` inward so both
/// run in declaration order. Writes are cooperative and may block the
/// caller. No concurrent writes to one chain are permitted; the front-end
/// serialises envelopes.
pub trait StreamProcessor: Send {
    fn open(&mut self, e: &mut Envelope) -> io::Result<()>;

    /// Consume bytes; returns how many were accepted from `buf`.
    fn write(&mut self, buf: &[u8]) -> io::Result<usize>;

    /// Flush remaining state and release per-message resources. A decorator
    /// that spawned a helper task must terminate it here.
    fn close(&mut self) -> io::Result<()>;
}

/// Terminal sink: discards bytes successfully.
pub struct StreamTerminal;

impl StreamProcessor for StreamTerminal {
    fn open(&mut self, _e: &mut Envelope) -> io::Result<()> {
        Ok(())
    }

    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        Ok(buf.len())
    }

    fn close(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Push every byte of `buf` into the chain, looping over short writes.
pub fn write_all(chain: &mut dyn StreamProcessor, mut buf: &[u8]) -> io::Result<()> {
    while !buf.is_empty() {
        let n = chain.write(buf)?;
        if n == 0 {
            return Err(io::Error::new(
                io::ErrorKind::WriteZero,
                "stream stage accepted no bytes",
            ));
        }
        buf = &buf[n..];
    }
    Ok(())
}

/// Copy a reader through the chain with a fixed-size buffer.
/// Returns total bytes copied. Open and close are the caller's business.
pub fn copy_to_chain(
    reader: &mut dyn Read,
    chain: &mut dyn StreamProcessor,
    buffer_size: usize,
) -> io::Result<u64> {
    let mut buf = vec![0u8; buffer_size.max(1)];
    let mut total = 0u64;
    loop {
        let n = reader.read(&mut buf)?;
        if n == 0 {
            return Ok(total);
        }
        write_all(chain, &buf[..n])?;
        total += n as u64;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct CountingSink {
        seen: usize,
    }

    impl StreamProcessor for CountingSink {
        fn open(&mut self, _e: &mut Envelope) -> io::Result<()> {
            Ok(())
        }
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            // Short writes: accept at most 3 bytes per call.
            let n = buf.len().min(3);
            self.seen += n;
            Ok(n)
        }
        fn close(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn write_all_loops_over_short_writes() {
        let mut sink = CountingSink { seen: 0 };
        write_all(&mut sink, b"0123456789").unwrap();
        assert_eq!(sink.seen, 10);
    }

    #[test]
    fn copy_to_chain_counts_bytes() {
        let mut sink = CountingSink { seen: 0 };
        let data = vec![7u8; 100];
        let n = copy_to_chain(&mut &data[..], &mut sink, 8).unwrap();
        assert_eq!(n, 100);
        assert_eq!(sink.seen, 100);
    }
}

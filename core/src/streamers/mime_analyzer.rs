/*
 * mime_analyzer.rs
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

//! Stream stage that push-parses MIME structure as bytes flow through,
//! sharing the live part list with downstream stages via the hand-off.

use std::io;

use crate::backend::envelope::Envelope;
use crate::backend::registry::StreamInstance;
use crate::backend::stream::{write_all, StreamProcessor};
use crate::config::{ConfigError, ConfigGroup};
use crate::mime::MimeParser;

struct MimeAnalyzer {
    parser: MimeParser,
    next: Box<dyn StreamProcessor>,
}

impl StreamProcessor for MimeAnalyzer {
    fn open(&mut self, e: &mut Envelope) -> io::Result<()> {
        self.parser = MimeParser::new();
        e.handoff.mime_parts = Some(self.parser.parts_handle());
        self.next.open(e)
    }

    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.parser.push(buf);
        write_all(self.next.as_mut(), buf)?;
        Ok(buf.len())
    }

    fn close(&mut self) -> io::Result<()> {
        // Parse problems were recorded while bytes kept flowing; they only
        // surface here, after the inner stages have closed.
        let parse_result = self.parser.close();
        self.next.close()?;
        parse_result.map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
    }
}

pub fn factory(
    _cfg: &ConfigGroup,
    next: Box<dyn StreamProcessor>,
) -> Result<StreamInstance, ConfigError> {
    Ok(StreamInstance::plain(MimeAnalyzer {
        parser: MimeParser::new(),
        next,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::stream::StreamTerminal;

    #[test]
    fn shares_parts_through_handoff() {
        let mut a = MimeAnalyzer {
            parser: MimeParser::new(),
            next: Box::new(StreamTerminal),
        };
        let mut e = Envelope::default();
        a.open(&mut e).unwrap();
        a.write(b"Subject: x\r\n\r\nbody\r\n").unwrap();
        a.close().unwrap();
        let parts = e.handoff.mime_parts.as_ref().unwrap().lock().unwrap();
        assert_eq!(parts.len(), 1);
        assert_eq!(parts[0].header("subject"), Some("x"));
    }
}

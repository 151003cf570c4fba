/*
 * headers_parser.rs
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

//! Parse the message's top-level header block onto the envelope.

use crate::backend::envelope::Envelope;
use crate::backend::processor::{Processor, ProcessorResult, Task};
use crate::backend::registry::ProcessorInstance;
use crate::config::{ConfigError, ConfigGroup};

/// Parse RFC 5322 headers from the start of `data`: `name: value` lines up
/// to the first blank line, folded continuations joined with a space.
/// Tolerant of bare-LF line endings.
pub fn parse_headers(data: &[u8]) -> Vec<(String, String)> {
    let mut out: Vec<(String, String)> = Vec::new();
    for raw in data.split(|&b| b == b'\n') {
        let line = match raw.last() {
            Some(b'\r') => &raw[..raw.len() - 1],
            _ => raw,
        };
        if line.is_empty() {
            break;
        }
        if line[0] == b' ' || line[0] == b'\t' {
            if let Some((_, v)) = out.last_mut() {
                v.push(' ');
                v.push_str(String::from_utf8_lossy(line).trim());
            }
            continue;
        }
        let Some(colon) = line.iter().position(|&b| b == b':') else {
            break;
        };
        let name = String::from_utf8_lossy(&line[..colon]).trim().to_string();
        let value = String::from_utf8_lossy(&line[colon + 1..]).trim().to_string();
        out.push((name, value));
    }
    out
}

struct HeadersParser {
    next: Box<dyn Processor>,
}

impl Processor for HeadersParser {
    fn process(&mut self, e: &mut Envelope, task: Task) -> ProcessorResult {
        if task == Task::Save {
            let headers = parse_headers(&e.data);
            if let Some(subject) = headers
                .iter()
                .find(|(k, _)| k.eq_ignore_ascii_case("subject"))
            {
                e.subject = subject.1.clone();
            }
            e.set_headers(headers);
        }
        self.next.process(e, task)
    }
}

pub fn factory(
    _cfg: &ConfigGroup,
    next: Box<dyn Processor>,
) -> Result<ProcessorInstance, ConfigError> {
    Ok(ProcessorInstance::plain(HeadersParser { next }))
}

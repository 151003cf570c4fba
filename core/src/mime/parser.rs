/*
 * parser.rs
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

//! Offset-tracking push parser: feed byte slices via push(), complete lines
//! are consumed, the incomplete tail is carried to the next call. Produces
//! an append-only list of part descriptors shared with downstream stages.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use super::headers::{is_valid_boundary, parse_content_disposition, parse_content_type};
use super::{MimeError, MimePart};

#[derive(Clone, Copy, PartialEq)]
enum ParserState {
    /// Reading the header block of the innermost open part.
    Headers,
    /// Reading body content (or multipart preamble/epilogue).
    Body,
}

/// Event-driven MIME parser. Parts are appended as their opening boundary
/// completes; offsets never decrease across pushes. Parse problems are
/// recorded and surfaced at close; bytes always keep flowing.
pub struct MimeParser {
    parts: Arc<Mutex<Vec<MimePart>>>,
    /// Stack of open part indexes, outermost first.
    open: Vec<usize>,
    state: ParserState,
    /// Incomplete line carried over from the previous push.
    line_buffer: Vec<u8>,
    /// Absolute offset of the next unattributed byte.
    pos: u64,
    /// Header under assembly (folding joins continuation lines).
    pending_header: Option<(String, String)>,
    error: Option<MimeError>,
    started: bool,
}

impl Default for MimeParser {
    fn default() -> Self {
        Self::new()
    }
}

impl MimeParser {
    pub fn new() -> Self {
        Self {
            parts: Arc::new(Mutex::new(Vec::new())),
            open: Vec::new(),
            state: ParserState::Headers,
            line_buffer: Vec::new(),
            pos: 0,
            pending_header: None,
            error: None,
            started: false,
        }
    }

    /// Shared handle to the live part list (for the envelope hand-off).
    pub fn parts_handle(&self) -> Arc<Mutex<Vec<MimePart>>> {
        Arc::clone(&self.parts)
    }

    fn parts(&self) -> MutexGuard<'_, Vec<MimePart>> {
        self.parts.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn part_count(&self) -> usize {
        self.parts().len()
    }

    /// Feed the next slice of the message.
    pub fn push(&mut self, buf: &[u8]) {
        if buf.is_empty() {
            return;
        }
        let mut combined;
        let data: &[u8] = if self.line_buffer.is_empty() {
            buf
        } else {
            combined = std::mem::take(&mut self.line_buffer);
            combined.extend_from_slice(buf);
            &combined
        };
        let mut rest = data;
        while let Some(nl) = rest.iter().position(|&b| b == b'\n') {
            let (line, tail) = rest.split_at(nl + 1);
            self.handle_line(line);
            rest = tail;
        }
        self.line_buffer = rest.to_vec();
    }

    /// Finish the message: attribute any trailing bytes, close open parts.
    /// Returns the first parse problem recorded, if any.
    pub fn close(&mut self) -> Result<(), MimeError> {
        if !self.line_buffer.is_empty() {
            let tail = std::mem::take(&mut self.line_buffer);
            self.handle_line(&tail);
        }
        self.finish_pending_header();
        if self.state == ParserState::Headers {
            if let Some(&idx) = self.open.last() {
                self.parts()[idx].starting_pos_body = self.pos;
            }
        }
        let end = self.pos;
        let mut parts = self.parts();
        for &idx in &self.open {
            parts[idx].ending_pos_body = end;
        }
        drop(parts);
        self.open.clear();
        match self.error.take() {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    fn record_error(&mut self, message: impl Into<String>) {
        if self.error.is_none() {
            self.error = Some(MimeError::new(self.pos, message));
        }
    }

    /// One complete line, terminator included (the final line may lack one).
    fn handle_line(&mut self, line: &[u8]) {
        let start = self.pos;
        self.pos += line.len() as u64;

        if !self.started {
            self.started = true;
            let mut parts = self.parts();
            parts.push(MimePart::new("1", start));
            drop(parts);
            self.open.push(0);
            self.state = ParserState::Headers;
        }

        let content = trim_line_ending(line);

        // Boundary delimiters win over both states; a missing blank line
        // before a boundary is tolerated.
        if content.starts_with(b"--") {
            if let Some((owner, is_final)) = self.match_boundary(content) {
                self.finish_pending_header();
                self.cut_to(owner, start);
                if is_final {
                    self.state = ParserState::Body;
                } else {
                    self.open_child(owner);
                }
                return;
            }
        }

        match self.state {
            ParserState::Headers => {
                if content.is_empty() {
                    self.finish_pending_header();
                    if let Some(&idx) = self.open.last() {
                        self.parts()[idx].starting_pos_body = self.pos;
                    }
                    self.state = ParserState::Body;
                } else if (line[0] == b' ' || line[0] == b'\t')
                    && self.pending_header.is_some()
                {
                    if let Some((_, v)) = self.pending_header.as_mut() {
                        v.push(' ');
                        v.push_str(String::from_utf8_lossy(content).trim());
                    }
                } else if let Some(colon) = content.iter().position(|&b| b == b':') {
                    self.finish_pending_header();
                    let name = String::from_utf8_lossy(&content[..colon]).trim().to_string();
                    let value = String::from_utf8_lossy(&content[colon + 1..])
                        .trim()
                        .to_string();
                    self.pending_header = Some((name, value));
                } else {
                    // Not a header: the block ended without a blank line.
                    // The body begins at this line.
                    self.finish_pending_header();
                    if let Some(&idx) = self.open.last() {
                        self.parts()[idx].starting_pos_body = start;
                    }
                    self.state = ParserState::Body;
                }
            }
            ParserState::Body => {}
        }
    }

    /// If the line is a delimiter of any open multipart part, return that
    /// part's stack position and whether it is the closing `--b--` form.
    fn match_boundary(&self, content: &[u8]) -> Option<(usize, bool)> {
        let parts = self.parts.lock().unwrap_or_else(PoisonError::into_inner);
        for (depth, &idx) in self.open.iter().enumerate().rev() {
            let boundary = parts[idx].content_boundary.as_bytes();
            if boundary.is_empty() {
                continue;
            }
            let want = 2 + boundary.len();
            if content.len() < want || &content[2..want] != boundary {
                continue;
            }
            let tail = trim_trailing_ws(&content[want..]);
            if tail.is_empty() {
                return Some((depth, false));
            }
            if tail == b"--" {
                return Some((depth, true));
            }
        }
        None
    }

    /// Close every open part nested below the stack position `owner`,
    /// ending their bodies at the boundary line's first byte.
    fn cut_to(&mut self, owner: usize, boundary_start: u64) {
        let mut closed = Vec::new();
        while self.open.len() > owner + 1 {
            closed.push(self.open.pop().unwrap_or_default());
        }
        let mut parts = self.parts();
        for idx in closed {
            parts[idx].ending_pos_body = boundary_start;
        }
    }

    /// Open the next child of the multipart part at stack position `owner`.
    /// The child's headers begin just past the delimiter line.
    fn open_child(&mut self, owner: usize) {
        let child_idx;
        {
            let mut parts = self.parts();
            let parent_idx = self.open[owner];
            parts[parent_idx].children += 1;
            let node = format!("{}.{}", parts[parent_idx].node, parts[parent_idx].children);
            child_idx = parts.len();
            parts.push(MimePart::new(node, self.pos));
        }
        self.open.push(child_idx);
        self.state = ParserState::Headers;
        self.pending_header = None;
    }

    /// Complete the header under assembly and apply its side effects.
    fn finish_pending_header(&mut self) {
        let Some((name, value)) = self.pending_header.take() else {
            return;
        };
        let Some(&idx) = self.open.last() else {
            return;
        };
        let lower = name.to_lowercase();
        let mut invalid_boundary = false;
        {
            let mut parts = self.parts();
            let part = &mut parts[idx];
            match lower.as_str() {
                "content-type" => {
                    if let Some(ct) = parse_content_type(&value) {
                        if let Some(cs) = ct.parameter("charset") {
                            part.charset = cs.to_lowercase();
                        }
                        if ct.is_primary("multipart") {
                            match ct.parameter("boundary") {
                                Some(b) if is_valid_boundary(b) => {
                                    part.content_boundary = b.to_string();
                                }
                                _ => invalid_boundary = true,
                            }
                        }
                        part.content_type = Some(ct);
                    }
                }
                "content-transfer-encoding" => {
                    part.transfer_encoding = value.trim().to_lowercase();
                }
                "content-disposition" => {
                    if let Some((disp, _)) = parse_content_disposition(&value) {
                        part.content_disposition = disp;
                    }
                }
                _ => {}
            }
            part.headers.push((name, value));
        }
        if invalid_boundary {
            self.record_error("multipart content-type with missing or invalid boundary");
        }
    }
}

fn trim_line_ending(line: &[u8]) -> &[u8] {
    let mut end = line.len();
    while end > 0 && (line[end - 1] == b'\n' || line[end - 1] == b'\r') {
        end -= 1;
    }
    &line[..end]
}

fn trim_trailing_ws(s: &[u8]) -> &[u8] {
    let mut end = s.len();
    while end > 0 && (s[end - 1] == b' ' || s[end - 1] == b'\t') {
        end -= 1;
    }
    &s[..end]
}

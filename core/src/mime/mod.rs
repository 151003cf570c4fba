/*
 * mod.rs
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

//! Push MIME parsing: part descriptors with byte offsets, header values.

mod headers;
mod parser;
pub mod transfer;

pub use headers::{is_valid_boundary, parse_content_disposition, parse_content_type, ContentType};
pub use parser::MimeParser;

use std::fmt;

pub const DEFAULT_CHARSET: &str = "us-ascii";
pub const DEFAULT_TRANSFER_ENCODING: &str = "7bit";

/// One MIME entity located inside the message. Offsets are absolute from
/// the start of the message and monotonically non-decreasing across parts.
#[derive(Debug, Clone)]
pub struct MimePart {
    /// Dotted node id: `1` for the root, `1.2.1` for nested children.
    pub node: String,
    /// Offset of the part's first header byte.
    pub starting_pos: u64,
    /// Offset of the first body byte (just past the blank line).
    pub starting_pos_body: u64,
    /// Offset one past the last body byte.
    pub ending_pos_body: u64,
    pub content_type: Option<ContentType>,
    pub charset: String,
    pub transfer_encoding: String,
    pub content_disposition: String,
    /// Multipart boundary owned by this part, empty otherwise.
    pub content_boundary: String,
    /// Raw headers in arrival order (folded lines joined).
    pub headers: Vec<(String, String)>,
    /// Number of direct children created so far.
    pub children: u32,
}

impl MimePart {
    pub fn new(node: impl Into<String>, starting_pos: u64) -> Self {
        Self {
            node: node.into(),
            starting_pos,
            starting_pos_body: 0,
            ending_pos_body: 0,
            content_type: None,
            charset: DEFAULT_CHARSET.to_string(),
            transfer_encoding: DEFAULT_TRANSFER_ENCODING.to_string(),
            content_disposition: String::new(),
            content_boundary: String::new(),
            headers: Vec::new(),
            children: 0,
        }
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn is_multipart(&self) -> bool {
        !self.content_boundary.is_empty()
    }

    /// Content type as `primary/sub`, or the implied default.
    pub fn mime_type(&self) -> String {
        match &self.content_type {
            Some(ct) => format!("{}/{}", ct.primary(), ct.sub()),
            None => "text/plain".to_string(),
        }
    }
}

/// A recoverable parse problem. Recorded while bytes keep flowing;
/// surfaced when the stream closes.
#[derive(Debug, Clone)]
pub struct MimeError {
    pub offset: u64,
    pub message: String,
}

impl MimeError {
    pub fn new(offset: u64, message: impl Into<String>) -> Self {
        Self {
            offset,
            message: message.into(),
        }
    }
}

impl fmt::Display for MimeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "mime parse error at byte {}: {}", self.offset, self.message)
    }
}

impl std::error::Error for MimeError {}

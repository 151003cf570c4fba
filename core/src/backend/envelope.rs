/*
 * envelope.rs
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

//! The in-flight message: one accepted envelope and its processing state.

use std::fmt;
use std::net::{IpAddr, Ipv4Addr};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use bytes::{Bytes, BytesMut};
use md5::{Digest, Md5};
use rand::RngCore;

use crate::mime::MimePart;
use crate::processors::compressor::CompressedPayload;

/// A bare mailbox address (`user@host`).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MailAddress {
    pub user: String,
    pub host: String,
}

impl MailAddress {
    pub fn new(user: impl Into<String>, host: impl Into<String>) -> Self {
        Self {
            user: user.into(),
            host: host.into(),
        }
    }

    /// Parse `user@host`; addresses without `@` keep everything in `user`.
    pub fn parse(s: &str) -> Self {
        let s = s.trim().trim_start_matches('<').trim_end_matches('>');
        match s.rsplit_once('@') {
            Some((user, host)) => Self::new(user, host.to_lowercase()),
            None => Self::new(s, ""),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.user.is_empty() && self.host.is_empty()
    }
}

impl fmt::Display for MailAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.is_empty() {
            write!(f, "{}", self.user)
        } else {
            write!(f, "{}@{}", self.user, self.host)
        }
    }
}

/// Typed hand-off record for processor-to-processor state. Closed set of
/// slots rather than an open map; each slot is owned by the stage that fills it.
#[derive(Debug, Clone, Default)]
pub struct Handoff {
    /// Live MIME part list, shared with the push parser while bytes arrive.
    pub mime_parts: Option<Arc<Mutex<Vec<MimePart>>>>,
    /// Storage message id from `open_message`.
    pub message_id: Option<u64>,
    /// Lazily compressed payload installed by the compressor stage.
    pub compressor: Option<CompressedPayload>,
    /// Key under which the message was placed in the object cache.
    pub cache_marker: Option<String>,
}

/// One accepted message and everything the pipeline attaches to it.
#[derive(Debug, Clone)]
pub struct Envelope {
    pub remote_ip: IpAddr,
    pub helo: String,
    pub tls: bool,
    pub mail_from: MailAddress,
    pub rcpt_to: Vec<MailAddress>,
    pub data: BytesMut,
    headers: Vec<(String, String)>,
    pub subject: String,
    pub hashes: Vec<String>,
    pub delivery_header: String,
    pub queued_id: String,
    pub handoff: Handoff,
}

impl Envelope {
    pub fn new(remote_ip: IpAddr, helo: impl Into<String>) -> Self {
        Self {
            remote_ip,
            helo: helo.into(),
            tls: false,
            mail_from: MailAddress::default(),
            rcpt_to: Vec::new(),
            data: BytesMut::new(),
            headers: Vec::new(),
            subject: String::new(),
            hashes: Vec::new(),
            delivery_header: String::new(),
            queued_id: new_queued_id(&remote_ip),
            handoff: Handoff::default(),
        }
    }

    pub fn set_data(&mut self, data: impl AsRef<[u8]>) {
        self.data = BytesMut::from(data.as_ref());
    }

    /// A cheap read-only view of the raw message bytes.
    pub fn data_bytes(&self) -> Bytes {
        Bytes::copy_from_slice(&self.data)
    }

    /// Replace the parsed header set (headers parser stage).
    pub fn set_headers(&mut self, headers: Vec<(String, String)>) {
        self.headers = headers;
    }

    /// Parsed header value by case-insensitive name.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn headers(&self) -> &[(String, String)] {
        &self.headers
    }

    /// The return path is the sender address unless overridden later.
    pub fn return_path(&self) -> String {
        self.mail_from.to_string()
    }

    /// Reset per-delivery state so the session can reuse the envelope.
    pub fn reseed(&mut self) {
        self.mail_from = MailAddress::default();
        self.rcpt_to.clear();
        self.data.clear();
        self.headers.clear();
        self.subject.clear();
        self.hashes.clear();
        self.delivery_header.clear();
        self.queued_id = new_queued_id(&self.remote_ip);
        self.handoff = Handoff::default();
    }
}

impl Default for Envelope {
    fn default() -> Self {
        Self::new(IpAddr::V4(Ipv4Addr::LOCALHOST), "")
    }
}

/// Generate a fresh queued-identifier: 128-bit digest over arrival time,
/// remote address, and random salt, hex encoded.
pub fn new_queued_id(remote_ip: &IpAddr) -> String {
    let mut h = Md5::new();
    let now = chrono::Utc::now();
    h.update(now.timestamp_nanos_opt().unwrap_or_default().to_be_bytes());
    h.update(remote_ip.to_string().as_bytes());
    h.update(rand::thread_rng().next_u64().to_be_bytes());
    let digest = h.finalize();
    let mut out = String::with_capacity(32);
    for b in digest {
        out.push_str(&format!("{:02x}", b));
    }
    out
}

struct EnvelopeCell {
    mail: Mutex<Envelope>,
    /// Claim token: the gateway raises it on timeout to signal that a worker
    /// may still be writing; the drainer lowers it once the reply arrives.
    busy: AtomicBool,
}

/// Shared handle to one envelope. The front-end session owns the envelope;
/// the gateway clones the handle for the duration of one submission.
#[derive(Clone)]
pub struct SharedEnvelope(Arc<EnvelopeCell>);

impl SharedEnvelope {
    pub fn new(envelope: Envelope) -> Self {
        Self(Arc::new(EnvelopeCell {
            mail: Mutex::new(envelope),
            busy: AtomicBool::new(false),
        }))
    }

    /// Lock the envelope data. A panic inside a worker chain may poison the
    /// inner mutex; the envelope stays readable, the submission already
    /// carries the failure.
    pub fn lock(&self) -> MutexGuard<'_, Envelope> {
        self.0.mail.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Raise the claim token: a worker may still be writing to this envelope.
    pub fn claim(&self) {
        self.0.busy.store(true, Ordering::SeqCst);
    }

    /// Lower the claim token.
    pub fn release(&self) {
        self.0.busy.store(false, Ordering::SeqCst);
    }

    /// True while a timed-out submission's worker has not yet finished.
    /// The front-end must not reuse the envelope while this holds.
    pub fn is_busy(&self) -> bool {
        self.0.busy.load(Ordering::SeqCst)
    }
}

impl fmt::Debug for SharedEnvelope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SharedEnvelope")
            .field("busy", &self.is_busy())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn address_parse_and_display() {
        let a = MailAddress::parse("<Alice@Example.COM>");
        assert_eq!(a.user, "Alice");
        assert_eq!(a.host, "example.com");
        assert_eq!(a.to_string(), "Alice@example.com");
        assert!(MailAddress::parse("").is_empty());
    }

    #[test]
    fn header_lookup_is_case_insensitive() {
        let mut e = Envelope::default();
        e.set_headers(vec![("Subject".to_string(), "Test".to_string())]);
        assert_eq!(e.header("subject"), Some("Test"));
        assert_eq!(e.header("SUBJECT"), Some("Test"));
        assert_eq!(e.header("To"), None);
    }

    #[test]
    fn queued_ids_are_unique_hex() {
        let ip = IpAddr::V4(Ipv4Addr::LOCALHOST);
        let a = new_queued_id(&ip);
        let b = new_queued_id(&ip);
        assert_eq!(a.len(), 32);
        assert!(a.bytes().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(a, b);
    }

    #[test]
    fn claim_token_round_trip() {
        let e = SharedEnvelope::new(Envelope::default());
        assert!(!e.is_busy());
        e.claim();
        assert!(e.is_busy());
        e.release();
        assert!(!e.is_busy());
    }

    #[test]
    fn reseed_clears_delivery_state() {
        let mut e = Envelope::default();
        e.mail_from = MailAddress::parse("a@b");
        e.set_data(b"hello");
        e.hashes.push("h".to_string());
        let old_id = e.queued_id.clone();
        e.reseed();
        assert!(e.mail_from.is_empty());
        assert!(e.data.is_empty());
        assert!(e.hashes.is_empty());
        assert_ne!(e.queued_id, old_id);
    }
}

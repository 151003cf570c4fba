/*
 * result.rs
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

//! SMTP-shaped backend results, canned replies, and processor error kinds.

use std::fmt;

/// Outcome of one envelope submission, shaped as an SMTP response line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendResult(String);

impl BackendResult {
    pub fn new(line: impl Into<String>) -> Self {
        Self(line.into())
    }

    /// Success for a queued message.
    pub fn queued_ok(queued_id: &str) -> Self {
        Self(format!("250 2.0.0 OK: queued as {}", queued_id))
    }

    /// The gateway is not in the running state; carries the current state name.
    pub fn not_running(state: &str) -> Self {
        Self(format!(
            "554 5.3.0 Transaction failed - backend not running ({})",
            state
        ))
    }

    /// The gateway gave up waiting for a worker reply.
    pub fn timed_out() -> Self {
        Self("554 5.3.0 Transaction timed out".to_string())
    }

    /// A processor aborted the chain; carries the inner message.
    pub fn transaction_failed(msg: &str) -> Self {
        Self(format!("554 5.3.0 Error: transaction failed: {}", msg))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The 3-digit SMTP code: first three characters, or 554 if unparseable.
    pub fn code(&self) -> u16 {
        self.0
            .get(..3)
            .and_then(|c| c.parse::<u16>().ok())
            .unwrap_or(554)
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.code())
    }
}

impl fmt::Display for BackendResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Recipient validation outcomes, propagated verbatim to the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RcptError {
    NoSuchUser,
    StorageNotAvailable,
    StorageTooBusy,
    StorageTimeout,
    QuotaExceeded,
    UserSuspended,
    StorageError,
}

impl fmt::Display for RcptError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let msg = match self {
            RcptError::NoSuchUser => "no such user",
            RcptError::StorageNotAvailable => "storage not available",
            RcptError::StorageTooBusy => "storage too busy",
            RcptError::StorageTimeout => "storage timeout",
            RcptError::QuotaExceeded => "quota exceeded",
            RcptError::UserSuspended => "user suspended",
            RcptError::StorageError => "storage error",
        };
        write!(f, "{}", msg)
    }
}

impl std::error::Error for RcptError {}

/// Errors returned by a processor stage. Any error aborts the chain for the
/// current envelope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessorError {
    /// Transient storage error; the client may retry the transaction.
    Storage(String),
    /// A panic was recovered while the chain was running.
    StorageFailed,
    /// Recipient rejected during validation.
    Rcpt(RcptError),
}

impl fmt::Display for ProcessorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProcessorError::Storage(m) => write!(f, "{}", m),
            ProcessorError::StorageFailed => write!(f, "storage failed"),
            ProcessorError::Rcpt(e) => write!(f, "{}", e),
        }
    }
}

impl std::error::Error for ProcessorError {}

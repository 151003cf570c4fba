/*
 * lib.rs
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

//! Casellario core: the message-processing backend of an SMTP server.
//! The front-end hands fully-received envelopes to a gateway, which runs
//! them through configurable processor pipelines (batch and streaming) and
//! persists messages as content-addressed, MIME-aware chunks.

pub mod backend;
pub mod chunk;
pub mod config;
pub mod mime;
pub mod processors;
pub mod streamers;

pub use backend::{
    BackendResult, Envelope, Gateway, GatewayError, GatewayState, MailAddress, ProcessorRegistry,
    RcptError, SharedEnvelope,
};
pub use config::{diff_trees, ConfigDiff, ConfigTree};

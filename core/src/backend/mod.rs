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

//! Backend: envelope, processor chains, service hooks, and the gateway.

pub mod chain;
pub mod envelope;
pub mod gateway;
pub mod processor;
pub mod registry;
pub mod result;
pub mod service;
pub mod stream;

pub use chain::{build_chain, build_stream_chain, BuiltChain, BuiltStreamChain};
pub use envelope::{Envelope, Handoff, MailAddress, SharedEnvelope};
pub use gateway::{Gateway, GatewayError, GatewayState};
pub use processor::{DefaultProcessor, Processor, ProcessorResult, Task};
pub use registry::{ProcessorInstance, ProcessorRegistry, StreamInstance};
pub use result::{BackendResult, ProcessorError, RcptError};
pub use service::{Hooks, Services};
pub use stream::{copy_to_chain, write_all, StreamProcessor, StreamTerminal};

/*
 * processor.rs
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

//! Processor trait: one pipeline stage acting on an envelope.

use crate::backend::envelope::Envelope;
use crate::backend::result::{BackendResult, ProcessorError};

/// What a submission asks of the chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Task {
    /// Persist the received message.
    Save,
    /// Validate the envelope's recipients.
    ValidateRcpt,
}

pub type ProcessorResult = Result<BackendResult, ProcessorError>;

/// A pipeline stage. Decorator stages own the next (inner) stage and pass
/// control inward; the innermost stage is a terminal that accepts.
/// Each worker owns its chain exclusively, so stages may hold mutable state.
pub trait Processor: Send {
    fn process(&mut self, e: &mut Envelope, task: Task) -> ProcessorResult;
}

/// Terminal stage: accepts the envelope.
pub struct DefaultProcessor;

impl Processor for DefaultProcessor {
    fn process(&mut self, _e: &mut Envelope, _task: Task) -> ProcessorResult {
        Ok(BackendResult::new("250 2.0.0 OK"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_processor_accepts() {
        let mut p = DefaultProcessor;
        let mut e = Envelope::default();
        let r = p.process(&mut e, Task::Save).unwrap();
        assert_eq!(r.code(), 250);
    }
}

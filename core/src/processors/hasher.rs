/*
 * hasher.rs
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

//! Per-recipient content hashes, seeded with sender, subject, and time.

use chrono::Utc;
use md5::{Digest, Md5};

use crate::backend::envelope::Envelope;
use crate::backend::processor::{Processor, ProcessorResult, Task};
use crate::backend::registry::ProcessorInstance;
use crate::config::{ConfigError, ConfigGroup};

struct Hasher {
    next: Box<dyn Processor>,
}

impl Processor for Hasher {
    fn process(&mut self, e: &mut Envelope, task: Task) -> ProcessorResult {
        if task == Task::Save {
            let stamp = Utc::now()
                .timestamp_nanos_opt()
                .unwrap_or_default()
                .to_be_bytes();
            for rcpt in &e.rcpt_to {
                let mut h = Md5::new();
                h.update(e.mail_from.to_string().as_bytes());
                h.update(e.subject.as_bytes());
                h.update(stamp);
                h.update(rcpt.to_string().as_bytes());
                let digest = h.finalize();
                let mut hex = String::with_capacity(32);
                for b in digest {
                    hex.push_str(&format!("{:02x}", b));
                }
                e.hashes.push(hex);
            }
        }
        self.next.process(e, task)
    }
}

pub fn factory(
    _cfg: &ConfigGroup,
    next: Box<dyn Processor>,
) -> Result<ProcessorInstance, ConfigError> {
    Ok(ProcessorInstance::plain(Hasher { next }))
}

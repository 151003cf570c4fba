/*
 * debugger.rs
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

//! Log received mail when configured; otherwise pass through.

use log::info;
use serde::Deserialize;

use crate::backend::envelope::Envelope;
use crate::backend::processor::{Processor, ProcessorResult, Task};
use crate::backend::registry::ProcessorInstance;
use crate::config::{ConfigError, ConfigGroup};

#[derive(Deserialize, Default)]
#[serde(default)]
struct DebuggerConfig {
    log_received_mails: bool,
}

struct Debugger {
    log_received_mails: bool,
    next: Box<dyn Processor>,
}

impl Processor for Debugger {
    fn process(&mut self, e: &mut Envelope, task: Task) -> ProcessorResult {
        if task == Task::Save && self.log_received_mails {
            let rcpts: Vec<String> = e.rcpt_to.iter().map(|a| a.to_string()).collect();
            info!(
                target: "debugger",
                "mail from={} to={:?} subject={:?} size={}",
                e.mail_from,
                rcpts,
                e.subject,
                e.data.len()
            );
        }
        self.next.process(e, task)
    }
}

pub fn factory(
    cfg: &ConfigGroup,
    next: Box<dyn Processor>,
) -> Result<ProcessorInstance, ConfigError> {
    let config: DebuggerConfig = cfg.extract("debugger")?;
    Ok(ProcessorInstance::plain(Debugger {
        log_received_mails: config.log_received_mails,
        next,
    }))
}

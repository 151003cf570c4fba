/*
 * delivery_header.rs
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

//! Synthesise Delivered-To and Received headers for downstream persistence.

use chrono::Local;
use serde::Deserialize;

use crate::backend::envelope::Envelope;
use crate::backend::processor::{Processor, ProcessorResult, Task};
use crate::backend::registry::ProcessorInstance;
use crate::config::{ConfigError, ConfigGroup};

#[derive(Deserialize)]
struct HeaderConfig {
    primary_mail_host: String,
}

struct DeliveryHeader {
    primary_host: String,
    next: Box<dyn Processor>,
}

impl Processor for DeliveryHeader {
    fn process(&mut self, e: &mut Envelope, task: Task) -> ProcessorResult {
        if task == Task::Save {
            if let Some(to) = e.rcpt_to.first() {
                // RFC 1123 date with numeric zone.
                let date = Local::now().format("%a, %d %b %Y %H:%M:%S %z");
                e.delivery_header = format!(
                    "Delivered-To: {to}\nReceived: from {helo} ({helo} [{ip}])\n\tby {host} with SMTP id {id}@{host};\n\t{date}\n",
                    to = to,
                    helo = e.helo,
                    ip = e.remote_ip,
                    host = self.primary_host,
                    id = e.queued_id,
                );
            }
        }
        self.next.process(e, task)
    }
}

pub fn factory(
    cfg: &ConfigGroup,
    next: Box<dyn Processor>,
) -> Result<ProcessorInstance, ConfigError> {
    let config: HeaderConfig = cfg.extract("header")?;
    Ok(ProcessorInstance::plain(DeliveryHeader {
        primary_host: config.primary_mail_host,
        next,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::envelope::MailAddress;
    use crate::backend::processor::DefaultProcessor;
    use serde_json::json;

    #[test]
    fn factory_requires_primary_mail_host() {
        let err = factory(&ConfigGroup::new(), Box::new(DefaultProcessor)).unwrap_err();
        assert!(err.to_string().contains("primary_mail_host"));
    }

    #[test]
    fn synthesises_delivery_header() {
        let mut cfg = ConfigGroup::new();
        cfg.set("primary_mail_host", json!("mail.example.com"));
        let mut instance = factory(&cfg, Box::new(DefaultProcessor)).unwrap();
        let mut e = Envelope::default();
        e.helo = "client.host".to_string();
        e.rcpt_to.push(MailAddress::parse("rcpt@example.com"));
        instance.processor.process(&mut e, Task::Save).unwrap();
        assert!(e.delivery_header.starts_with("Delivered-To: rcpt@example.com\n"));
        assert!(e.delivery_header.contains("Received: from client.host"));
        assert!(e.delivery_header.contains("by mail.example.com with SMTP id"));
        assert!(e.delivery_header.contains(&e.queued_id));
    }

    #[test]
    fn no_recipient_leaves_header_empty() {
        let mut cfg = ConfigGroup::new();
        cfg.set("primary_mail_host", json!("h"));
        let mut instance = factory(&cfg, Box::new(DefaultProcessor)).unwrap();
        let mut e = Envelope::default();
        instance.processor.process(&mut e, Task::Save).unwrap();
        assert!(e.delivery_header.is_empty());
    }
}

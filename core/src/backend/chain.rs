/*
 * chain.rs
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

//! Pipeline builder: compose a decorator chain from a pipe expression.
//! The first named processor ends up outermost, so control enters stages
//! left to right and reaches a terminal that accepts.

use crate::backend::processor::{DefaultProcessor, Processor};
use crate::backend::registry::ProcessorRegistry;
use crate::backend::service::Hooks;
use crate::backend::stream::{StreamProcessor, StreamTerminal};
use crate::config::{split_pipeline, ConfigGroup, ConfigError, Section};

/// A built batch chain: its head, the hooks its stages contributed, and
/// whether the expression was empty (the no-op sentinel).
pub struct BuiltChain {
    pub head: Box<dyn Processor>,
    pub hooks: Hooks,
    pub is_noop: bool,
}

impl std::fmt::Debug for BuiltChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BuiltChain")
            .field("is_noop", &self.is_noop)
            .finish()
    }
}

/// A built stream chain.
pub struct BuiltStreamChain {
    pub head: Box<dyn StreamProcessor>,
    pub hooks: Hooks,
    pub is_noop: bool,
}

impl std::fmt::Debug for BuiltStreamChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BuiltStreamChain")
            .field("is_noop", &self.is_noop)
            .finish()
    }
}

/// Resolve one pipeline entry to its canonical factory name. An explicit
/// `alias:name` entry names the factory directly; a bare entry goes through
/// the section's alias map.
fn canonical<'a>(alias: &'a str, name: &'a str, section: &'a Section) -> &'a str {
    if alias != name {
        name
    } else {
        section.canonical(alias)
    }
}

/// Build a batch chain from a pipe expression. Stages are wrapped
/// innermost-first so the textual order is the execution order.
pub fn build_chain(
    expr: &str,
    section: &Section,
    registry: &ProcessorRegistry,
) -> Result<BuiltChain, ConfigError> {
    let entries = split_pipeline(expr);
    let empty = ConfigGroup::new();
    let mut head: Box<dyn Processor> = Box::new(DefaultProcessor);
    let mut hooks = Hooks::new();
    for (alias, name) in entries.iter().rev() {
        let group = section.group(alias).unwrap_or(&empty);
        let instance = registry.make(canonical(alias, name, section), group, head)?;
        head = instance.processor;
        hooks.merge(instance.hooks);
    }
    Ok(BuiltChain {
        head,
        hooks,
        is_noop: entries.is_empty(),
    })
}

/// Build a stream chain; the terminal writer discards successfully.
pub fn build_stream_chain(
    expr: &str,
    section: &Section,
    registry: &ProcessorRegistry,
) -> Result<BuiltStreamChain, ConfigError> {
    let entries = split_pipeline(expr);
    let empty = ConfigGroup::new();
    let mut head: Box<dyn StreamProcessor> = Box::new(StreamTerminal);
    let mut hooks = Hooks::new();
    for (alias, name) in entries.iter().rev() {
        let group = section.group(alias).unwrap_or(&empty);
        let instance = registry.make_stream(canonical(alias, name, section), group, head)?;
        head = instance.processor;
        hooks.merge(instance.hooks);
    }
    Ok(BuiltStreamChain {
        head,
        hooks,
        is_noop: entries.is_empty(),
    })
}

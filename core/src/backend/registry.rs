/*
 * registry.rs
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

//! Processor registries: name → factory for batch and stream stages.
//! A factory receives the instance's configuration group and the next
//! (inner) stage, and returns the wrapped stage plus its service hooks.

use std::collections::BTreeMap;

use crate::backend::processor::Processor;
use crate::backend::service::Hooks;
use crate::backend::stream::StreamProcessor;
use crate::config::{ConfigError, ConfigGroup};

/// A batch stage plus the hooks it wants run at gateway init/shutdown.
pub struct ProcessorInstance {
    pub processor: Box<dyn Processor>,
    pub hooks: Hooks,
}

impl std::fmt::Debug for ProcessorInstance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessorInstance").finish()
    }
}

impl ProcessorInstance {
    pub fn plain(processor: impl Processor + 'static) -> Self {
        Self {
            processor: Box::new(processor),
            hooks: Hooks::new(),
        }
    }
}

/// A stream stage plus its hooks.
pub struct StreamInstance {
    pub processor: Box<dyn StreamProcessor>,
    pub hooks: Hooks,
}

impl std::fmt::Debug for StreamInstance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamInstance").finish()
    }
}

impl StreamInstance {
    pub fn plain(processor: impl StreamProcessor + 'static) -> Self {
        Self {
            processor: Box::new(processor),
            hooks: Hooks::new(),
        }
    }
}

pub type ProcessorFactory = Box<
    dyn Fn(&ConfigGroup, Box<dyn Processor>) -> Result<ProcessorInstance, ConfigError>
        + Send
        + Sync,
>;

pub type StreamFactory = Box<
    dyn Fn(&ConfigGroup, Box<dyn StreamProcessor>) -> Result<StreamInstance, ConfigError>
        + Send
        + Sync,
>;

/// Name → factory for every known processor. Names are case-insensitive.
/// Registering over an existing name replaces it, so embedders and tests
/// can swap implementations (e.g. a recording cache driver).
pub struct ProcessorRegistry {
    batch: BTreeMap<String, ProcessorFactory>,
    stream: BTreeMap<String, StreamFactory>,
}

impl ProcessorRegistry {
    pub fn empty() -> Self {
        Self {
            batch: BTreeMap::new(),
            stream: BTreeMap::new(),
        }
    }

    /// Registry with the built-in processors.
    pub fn with_defaults() -> Self {
        let mut r = Self::empty();
        crate::processors::register_defaults(&mut r);
        crate::streamers::register_defaults(&mut r);
        r
    }

    pub fn register(
        &mut self,
        name: &str,
        factory: impl Fn(&ConfigGroup, Box<dyn Processor>) -> Result<ProcessorInstance, ConfigError>
            + Send
            + Sync
            + 'static,
    ) {
        self.batch.insert(name.to_lowercase(), Box::new(factory));
    }

    pub fn register_stream(
        &mut self,
        name: &str,
        factory: impl Fn(&ConfigGroup, Box<dyn StreamProcessor>) -> Result<StreamInstance, ConfigError>
            + Send
            + Sync
            + 'static,
    ) {
        self.stream.insert(name.to_lowercase(), Box::new(factory));
    }

    pub fn make(
        &self,
        name: &str,
        cfg: &ConfigGroup,
        next: Box<dyn Processor>,
    ) -> Result<ProcessorInstance, ConfigError> {
        match self.batch.get(&name.to_lowercase()) {
            Some(f) => f(cfg, next),
            None => Err(ConfigError::new(format!("processor [{}] not found", name))),
        }
    }

    pub fn make_stream(
        &self,
        name: &str,
        cfg: &ConfigGroup,
        next: Box<dyn StreamProcessor>,
    ) -> Result<StreamInstance, ConfigError> {
        match self.stream.get(&name.to_lowercase()) {
            Some(f) => f(cfg, next),
            None => Err(ConfigError::new(format!("processor [{}] not found", name))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::processor::DefaultProcessor;

    #[test]
    fn unknown_name_is_reported() {
        let r = ProcessorRegistry::empty();
        let err = r
            .make("ghost", &ConfigGroup::new(), Box::new(DefaultProcessor))
            .unwrap_err();
        assert_eq!(err.to_string(), "processor [ghost] not found");
    }

    #[test]
    fn names_are_case_insensitive() {
        let mut r = ProcessorRegistry::empty();
        r.register("MyStage", |_cfg, next| {
            Ok(ProcessorInstance {
                processor: next,
                hooks: Hooks::new(),
            })
        });
        assert!(r
            .make("mystage", &ConfigGroup::new(), Box::new(DefaultProcessor))
            .is_ok());
        assert!(r
            .make("MYSTAGE", &ConfigGroup::new(), Box::new(DefaultProcessor))
            .is_ok());
    }
}

/*
 * service.rs
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

//! Initializer and shutdowner hooks collected from built chains.
//! Owned per gateway; reset before re-initialisation so hooks never
//! register twice.

use log::error;

use crate::config::ConfigError;

pub type InitHook = Box<dyn FnMut() -> Result<(), ConfigError> + Send>;
pub type ShutdownHook = Box<dyn FnMut() -> Result<(), ConfigError> + Send>;

/// Hooks contributed by one processor instance.
#[derive(Default)]
pub struct Hooks {
    pub initializers: Vec<InitHook>,
    pub shutdowners: Vec<ShutdownHook>,
}

impl Hooks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_init(mut self, hook: impl FnMut() -> Result<(), ConfigError> + Send + 'static) -> Self {
        self.initializers.push(Box::new(hook));
        self
    }

    pub fn on_shutdown(
        mut self,
        hook: impl FnMut() -> Result<(), ConfigError> + Send + 'static,
    ) -> Self {
        self.shutdowners.push(Box::new(hook));
        self
    }

    pub fn merge(&mut self, other: Hooks) {
        self.initializers.extend(other.initializers);
        self.shutdowners.extend(other.shutdowners);
    }
}

/// Ordered hook lists for one gateway's current chains.
#[derive(Default)]
pub struct Services {
    initializers: Vec<InitHook>,
    shutdowners: Vec<ShutdownHook>,
}

impl Services {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn collect(&mut self, hooks: Hooks) {
        self.initializers.extend(hooks.initializers);
        self.shutdowners.extend(hooks.shutdowners);
    }

    /// Run every initializer in registration order; the first failure wins.
    pub fn initialize(&mut self) -> Result<(), ConfigError> {
        for hook in &mut self.initializers {
            hook()?;
        }
        Ok(())
    }

    /// Run every shutdowner. Failures are logged and the remaining hooks
    /// still run; the first failure is returned.
    pub fn shutdown(&mut self) -> Result<(), ConfigError> {
        let mut first_err = None;
        for hook in &mut self.shutdowners {
            if let Err(e) = hook() {
                error!(target: "backend", "shutdown hook failed: {}", e);
                first_err.get_or_insert(e);
            }
        }
        match first_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Drop all hooks. Called before chains are rebuilt.
    pub fn reset(&mut self) {
        self.initializers.clear();
        self.shutdowners.clear();
    }
}

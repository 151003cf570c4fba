/*
 * redis.rs
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

//! Place the message in an object cache with an expiry. The wire driver is
//! abstract; an in-memory driver is the default.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};

use serde::Deserialize;

use crate::backend::envelope::Envelope;
use crate::backend::processor::{Processor, ProcessorResult, Task};
use crate::backend::registry::ProcessorInstance;
use crate::backend::result::ProcessorError;
use crate::backend::service::Hooks;
use crate::config::{ConfigError, ConfigGroup};

#[derive(Debug)]
pub struct CacheError(pub String);

impl fmt::Display for CacheError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::error::Error for CacheError {}

/// Object-cache driver: set-with-expiry and close.
pub trait CacheDriver: Send {
    fn setex(&mut self, key: &str, expiry_secs: u64, value: &[u8]) -> Result<(), CacheError>;

    fn close(&mut self) -> Result<(), CacheError>;
}

pub type SharedCacheDriver = Arc<Mutex<dyn CacheDriver>>;

/// Default driver: an in-process map. Expiries are recorded, not enforced.
#[derive(Default)]
pub struct MemoryCacheDriver {
    entries: HashMap<String, (u64, Vec<u8>)>,
}

impl MemoryCacheDriver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<&[u8]> {
        self.entries.get(key).map(|(_, v)| v.as_slice())
    }
}

impl CacheDriver for MemoryCacheDriver {
    fn setex(&mut self, key: &str, expiry_secs: u64, value: &[u8]) -> Result<(), CacheError> {
        self.entries
            .insert(key.to_string(), (expiry_secs, value.to_vec()));
        Ok(())
    }

    fn close(&mut self) -> Result<(), CacheError> {
        self.entries.clear();
        Ok(())
    }
}

const DEFAULT_EXPIRE_SECONDS: u64 = 7200;

#[derive(Deserialize)]
#[serde(default)]
struct RedisConfig {
    redis_expire_seconds: u64,
    #[allow(dead_code)]
    redis_interface: String,
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            redis_expire_seconds: DEFAULT_EXPIRE_SECONDS,
            redis_interface: String::new(),
        }
    }
}

struct RedisProcessor {
    driver: SharedCacheDriver,
    expire_seconds: u64,
    next: Box<dyn Processor>,
}

impl Processor for RedisProcessor {
    fn process(&mut self, e: &mut Envelope, task: Task) -> ProcessorResult {
        if task == Task::Save {
            let key = e
                .hashes
                .first()
                .cloned()
                .unwrap_or_else(|| e.queued_id.clone());
            let value = match &e.handoff.compressor {
                Some(payload) => payload
                    .bytes()
                    .map_err(|err| ProcessorError::Storage(err.to_string()))?,
                None => e.data_bytes(),
            };
            {
                let mut driver = self.driver.lock().unwrap_or_else(PoisonError::into_inner);
                driver
                    .setex(&key, self.expire_seconds, &value)
                    .map_err(|err| ProcessorError::Storage(err.to_string()))?;
            }
            e.handoff.cache_marker = Some(key);
        }
        self.next.process(e, task)
    }
}

/// Build the cache stage around an explicit driver. The shutdown hook
/// closes the driver when the gateway tears the chain down.
pub fn with_driver(
    driver: SharedCacheDriver,
    cfg: &ConfigGroup,
    next: Box<dyn Processor>,
) -> Result<ProcessorInstance, ConfigError> {
    let config: RedisConfig = cfg.extract("redis")?;
    let hook_driver = Arc::clone(&driver);
    let hooks = Hooks::new().on_shutdown(move || {
        let mut d = hook_driver.lock().unwrap_or_else(PoisonError::into_inner);
        d.close().map_err(|e| ConfigError::new(e.to_string()))
    });
    Ok(ProcessorInstance {
        processor: Box::new(RedisProcessor {
            driver,
            expire_seconds: config.redis_expire_seconds,
            next,
        }),
        hooks,
    })
}

pub fn factory(
    cfg: &ConfigGroup,
    next: Box<dyn Processor>,
) -> Result<ProcessorInstance, ConfigError> {
    with_driver(Arc::new(Mutex::new(MemoryCacheDriver::new())), cfg, next)
}

/*
 * chunk_saver.rs
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

//! Configuration-driven construction of the chunksaver stage.

use std::sync::PoisonError;

use serde::Deserialize;

use crate::backend::registry::StreamInstance;
use crate::backend::service::Hooks;
use crate::backend::stream::StreamProcessor;
use crate::chunk::{shared, ChunkSaver, MemoryStore, SharedStorage, DEFAULT_CHUNK_SIZE};
use crate::config::{ConfigError, ConfigGroup};

#[derive(Deserialize)]
#[serde(default)]
struct ChunkSaverConfig {
    chunksaver_chunk_size: i64,
    chunksaver_storage_engine: String,
}

impl Default for ChunkSaverConfig {
    fn default() -> Self {
        Self {
            chunksaver_chunk_size: DEFAULT_CHUNK_SIZE as i64,
            chunksaver_storage_engine: "memory".to_string(),
        }
    }
}

/// Build the chunksaver around an explicit storage engine. The engine's
/// initialize/shutdown are wired through the gateway's service hooks.
pub fn with_engine(
    storage: SharedStorage,
    cfg: &ConfigGroup,
    next: Box<dyn StreamProcessor>,
) -> Result<StreamInstance, ConfigError> {
    let config: ChunkSaverConfig = cfg.extract("chunksaver")?;
    let chunk_size = if config.chunksaver_chunk_size <= 0 {
        DEFAULT_CHUNK_SIZE
    } else {
        config.chunksaver_chunk_size as usize
    };

    let init_storage = SharedStorage::clone(&storage);
    let init_cfg = cfg.clone();
    let down_storage = SharedStorage::clone(&storage);
    let hooks = Hooks::new()
        .on_init(move || {
            let mut s = init_storage.lock().unwrap_or_else(PoisonError::into_inner);
            s.initialize(&init_cfg)
                .map_err(|e| ConfigError::new(e.to_string()))
        })
        .on_shutdown(move || {
            let mut s = down_storage.lock().unwrap_or_else(PoisonError::into_inner);
            s.shutdown().map_err(|e| ConfigError::new(e.to_string()))
        });

    Ok(StreamInstance {
        processor: Box::new(ChunkSaver::new(next, storage, chunk_size)),
        hooks,
    })
}

/// Default factory: builds the engine named by `chunksaver_storage_engine`.
/// Only the in-memory engine can be built from configuration alone; the
/// relational engine needs an embedder-supplied connection, so embedders
/// register a custom factory built on `with_engine`.
pub fn factory(
    cfg: &ConfigGroup,
    next: Box<dyn StreamProcessor>,
) -> Result<StreamInstance, ConfigError> {
    let config: ChunkSaverConfig = cfg.extract("chunksaver")?;
    match config.chunksaver_storage_engine.to_lowercase().as_str() {
        "memory" => with_engine(shared(MemoryStore::new()), cfg, next),
        other => Err(ConfigError::new(format!(
            "unknown storage engine [{}]",
            other
        ))),
    }
}

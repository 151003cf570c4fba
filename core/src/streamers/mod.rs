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

//! Built-in stream processors.

pub mod chunk_saver;
pub mod compress;
pub mod mime_analyzer;

use crate::backend::registry::ProcessorRegistry;

/// Register every built-in stream processor under its canonical name.
pub fn register_defaults(r: &mut ProcessorRegistry) {
    r.register_stream("mimeanalyzer", mime_analyzer::factory);
    r.register_stream("chunksaver", chunk_saver::factory);
    r.register_stream("compress", compress::compress_factory);
    r.register_stream("decompress", compress::decompress_factory);
}

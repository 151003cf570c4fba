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

//! Built-in batch processors.

pub mod compressor;
pub mod debugger;
pub mod delivery_header;
pub mod hasher;
pub mod headers_parser;
pub mod redis;
pub mod sql_inserter;

use crate::backend::registry::ProcessorRegistry;

/// Register every built-in batch processor under its canonical name.
pub fn register_defaults(r: &mut ProcessorRegistry) {
    r.register("headersparser", headers_parser::factory);
    r.register("header", delivery_header::factory);
    r.register("hasher", hasher::factory);
    r.register("compressor", compressor::factory);
    r.register("debugger", debugger::factory);
    r.register("redis", redis::factory);
    r.register("sql", sql_inserter::factory);
}

/*
 * sql_inserter.rs
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

//! Batched relational insert of envelope metadata. Rows go through a feeder
//! channel to a background batcher that accumulates a multi-row insert and
//! flushes on batch size or a timer. The batcher survives panics (restarted
//! by its supervising loop) and drains cleanly on shutdown.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use chrono::Utc;
use crossbeam_channel::{bounded, select, Receiver, Sender};
use log::{error, warn};
use serde::Deserialize;

use crate::backend::envelope::Envelope;
use crate::backend::processor::{Processor, ProcessorResult, Task};
use crate::backend::registry::ProcessorInstance;
use crate::backend::result::ProcessorError;
use crate::backend::service::Hooks;
use crate::chunk::sql::{SqlConn, SqlValue};
use crate::config::{parse_duration, ConfigError, ConfigGroup};

const DEFAULT_BATCH_MAX: usize = 50;
const DEFAULT_BATCH_TIMEOUT: Duration = Duration::from_secs(3);
const DEFAULT_TABLE: &str = "emails_meta";
const FEEDER_BUFFER: usize = 256;
const RETRY_ATTEMPTS: usize = 3;
const RETRY_DELAY: Duration = Duration::from_secs(1);

/// One metadata row queued for insertion.
#[derive(Debug, Clone)]
pub struct InsertRow {
    pub queued_id: String,
    pub mail_from: String,
    pub rcpt_to: String,
    pub subject: String,
    pub hash: String,
}

#[derive(Deserialize, Default)]
#[serde(default)]
struct SqlConfig {
    sql_driver: String,
    sql_batch_max: i64,
    sql_batch_timeout: String,
    sql_insert_table: String,
}

/// Maker invoked at gateway initialisation to open the connection.
pub type ConnMaker = Arc<dyn Fn() -> Result<Box<dyn SqlConn>, ConfigError> + Send + Sync>;

struct Batcher {
    rx: Receiver<InsertRow>,
    stop: Receiver<()>,
    conn: Box<dyn SqlConn>,
    batch_max: usize,
    timeout: Duration,
    table: String,
}

impl Batcher {
    fn pump(&mut self) {
        let stop = self.stop.clone();
        let rx = self.rx.clone();
        let mut batch: Vec<InsertRow> = Vec::with_capacity(self.batch_max);
        loop {
            select! {
                recv(stop) -> _ => {
                    while let Ok(row) = rx.try_recv() {
                        batch.push(row);
                        if batch.len() >= self.batch_max {
                            self.flush(&mut batch);
                        }
                    }
                    self.flush(&mut batch);
                    return;
                }
                recv(rx) -> msg => match msg {
                    Ok(row) => {
                        batch.push(row);
                        if batch.len() >= self.batch_max {
                            self.flush(&mut batch);
                        }
                    }
                    Err(_) => {
                        self.flush(&mut batch);
                        return;
                    }
                },
                default(self.timeout) => {
                    self.flush(&mut batch);
                }
            }
        }
    }

    /// Execute the accumulated multi-row insert, retrying transient
    /// failures. A persistent failure drops the batch.
    fn flush(&mut self, batch: &mut Vec<InsertRow>) {
        if batch.is_empty() {
            return;
        }
        let placeholders = vec!["(?, ?, ?, ?, ?, ?)"; batch.len()].join(", ");
        let sql = format!(
            "INSERT INTO `{}` (`queued_id`, `mail_from`, `rcpt_to`, `subject`, `hash`, \
             `created_at`) VALUES {}",
            self.table, placeholders
        );
        let now = Utc::now().to_rfc3339();
        let mut params = Vec::with_capacity(batch.len() * 6);
        for row in batch.iter() {
            params.push(SqlValue::Text(row.queued_id.clone()));
            params.push(SqlValue::Text(row.mail_from.clone()));
            params.push(SqlValue::Text(row.rcpt_to.clone()));
            params.push(SqlValue::Text(row.subject.clone()));
            params.push(SqlValue::Text(row.hash.clone()));
            params.push(SqlValue::Text(now.clone()));
        }
        for attempt in 1..=RETRY_ATTEMPTS {
            match self.conn.execute(&sql, &params) {
                Ok(_) => {
                    batch.clear();
                    return;
                }
                Err(e) if attempt < RETRY_ATTEMPTS => {
                    warn!(target: "sql", "batch insert failed (attempt {}): {}", attempt, e);
                    thread::sleep(RETRY_DELAY);
                }
                Err(e) => {
                    error!(target: "sql", "batch insert failed, dropping {} rows: {}", batch.len(), e);
                }
            }
        }
        batch.clear();
    }
}

struct SqlInserter {
    feeder: Sender<InsertRow>,
    next: Box<dyn Processor>,
}

impl Processor for SqlInserter {
    fn process(&mut self, e: &mut Envelope, task: Task) -> ProcessorResult {
        if task == Task::Save {
            let row = InsertRow {
                queued_id: e.queued_id.clone(),
                mail_from: e.mail_from.to_string(),
                rcpt_to: e
                    .rcpt_to
                    .first()
                    .map(|a| a.to_string())
                    .unwrap_or_default(),
                subject: e.subject.clone(),
                hash: e.hashes.first().cloned().unwrap_or_default(),
            };
            self.feeder
                .send(row)
                .map_err(|_| ProcessorError::Storage("batch writer unavailable".to_string()))?;
        }
        self.next.process(e, task)
    }
}

/// Build the inserter around an explicit connection maker. The initializer
/// opens the connection and starts the supervised batcher; the shutdowner
/// stops it and waits for the drain.
pub fn with_conn_maker(
    conn_maker: ConnMaker,
    cfg: &ConfigGroup,
    next: Box<dyn Processor>,
) -> Result<ProcessorInstance, ConfigError> {
    let config: SqlConfig = cfg.extract("sql")?;
    let batch_max = if config.sql_batch_max <= 0 {
        DEFAULT_BATCH_MAX
    } else {
        config.sql_batch_max as usize
    };
    let timeout = parse_duration(&config.sql_batch_timeout).unwrap_or(DEFAULT_BATCH_TIMEOUT);
    let table = if config.sql_insert_table.is_empty() {
        DEFAULT_TABLE.to_string()
    } else {
        config.sql_insert_table
    };

    let (feeder_tx, feeder_rx) = bounded(FEEDER_BUFFER);
    let (stop_tx, stop_rx) = bounded::<()>(1);
    let rx_slot = Arc::new(Mutex::new(Some(feeder_rx)));
    let handle_slot: Arc<Mutex<Option<thread::JoinHandle<()>>>> = Arc::new(Mutex::new(None));

    let init_handle = Arc::clone(&handle_slot);
    let hooks = Hooks::new()
        .on_init(move || {
            let rx = rx_slot
                .lock()
                .map_err(|_| ConfigError::new("sql batcher state poisoned"))?
                .take()
                .ok_or_else(|| ConfigError::new("sql batcher already started"))?;
            let conn = conn_maker()?;
            let mut batcher = Batcher {
                rx,
                stop: stop_rx.clone(),
                conn,
                batch_max,
                timeout,
                table: table.clone(),
            };
            let handle = thread::Builder::new()
                .name("sql-batcher".to_string())
                .spawn(move || loop {
                    let outcome = catch_unwind(AssertUnwindSafe(|| batcher.pump()));
                    match outcome {
                        Ok(()) => break,
                        Err(_) => {
                            error!(target: "sql", "batcher panicked; restarting");
                        }
                    }
                })
                .map_err(|e| ConfigError::new(e.to_string()))?;
            *init_handle
                .lock()
                .map_err(|_| ConfigError::new("sql batcher state poisoned"))? = Some(handle);
            Ok(())
        })
        .on_shutdown(move || {
            let _ = stop_tx.try_send(());
            let handle = handle_slot
                .lock()
                .map_err(|_| ConfigError::new("sql batcher state poisoned"))?
                .take();
            if let Some(h) = handle {
                h.join()
                    .map_err(|_| ConfigError::new("sql batcher did not stop cleanly"))?;
            }
            Ok(())
        });

    Ok(ProcessorInstance {
        processor: Box::new(SqlInserter {
            feeder: feeder_tx,
            next,
        }),
        hooks,
    })
}

/// Default factory. Wire drivers live outside this crate; without one
/// registered by the embedder this is a configuration error naming the key.
pub fn factory(
    cfg: &ConfigGroup,
    next: Box<dyn Processor>,
) -> Result<ProcessorInstance, ConfigError> {
    let config: SqlConfig = cfg.extract("sql")?;
    let _ = next;
    if config.sql_driver.is_empty() {
        Err(ConfigError::new(
            "sql processor requires sql_driver; register a driver-backed factory",
        ))
    } else {
        Err(ConfigError::new(format!(
            "unknown sql driver [{}]",
            config.sql_driver
        )))
    }
}

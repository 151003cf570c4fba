/*
 * sql.rs
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

//! Relational storage engine: two tables (emails, chunks) driven through an
//! abstract SQL connection. Wire drivers live outside this crate; embedders
//! supply a `SqlConn` implementation.

use std::net::IpAddr;

use bytes::Bytes;
use chrono::{DateTime, Utc};

use crate::config::ConfigGroup;

use super::{ChunkRecord, ChunkStorage, HashKey, PartsInfo, StorageError, StoredEmail};

/// A parameter or result cell.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    Null,
    Int(i64),
    Text(String),
    Blob(Vec<u8>),
}

pub type SqlRow = Vec<SqlValue>;

/// Minimal prepared-statement surface a driver must provide.
pub trait SqlConn: Send {
    /// Run a statement; returns affected rows.
    fn execute(&mut self, sql: &str, params: &[SqlValue]) -> Result<u64, StorageError>;

    /// Run an insert; returns the generated id.
    fn insert(&mut self, sql: &str, params: &[SqlValue]) -> Result<u64, StorageError>;

    fn query(&mut self, sql: &str, params: &[SqlValue]) -> Result<Vec<SqlRow>, StorageError>;

    fn close(&mut self) -> Result<(), StorageError>;
}

const DEFAULT_EMAIL_TABLE: &str = "emails";
const DEFAULT_CHUNK_TABLE: &str = "chunks";

/// Chunk-and-message store over two relational tables.
pub struct SqlStore {
    conn: Box<dyn SqlConn>,
    email_table: String,
    chunk_table: String,
}

impl SqlStore {
    pub fn new(conn: Box<dyn SqlConn>) -> Self {
        Self {
            conn,
            email_table: DEFAULT_EMAIL_TABLE.to_string(),
            chunk_table: DEFAULT_CHUNK_TABLE.to_string(),
        }
    }
}

fn col_text(row: &SqlRow, i: usize) -> Result<String, StorageError> {
    match row.get(i) {
        Some(SqlValue::Text(s)) => Ok(s.clone()),
        Some(SqlValue::Null) => Ok(String::new()),
        _ => Err(StorageError::new(format!("column {} is not text", i))),
    }
}

fn col_int(row: &SqlRow, i: usize) -> Result<i64, StorageError> {
    match row.get(i) {
        Some(SqlValue::Int(n)) => Ok(*n),
        _ => Err(StorageError::new(format!("column {} is not an integer", i))),
    }
}

fn col_blob(row: &SqlRow, i: usize) -> Result<Vec<u8>, StorageError> {
    match row.get(i) {
        Some(SqlValue::Blob(b)) => Ok(b.clone()),
        _ => Err(StorageError::new(format!("column {} is not a blob", i))),
    }
}

fn parse_time(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|t| t.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

impl ChunkStorage for SqlStore {
    fn initialize(&mut self, cfg: &ConfigGroup) -> Result<(), StorageError> {
        if let Some(t) = cfg.str("email_table") {
            self.email_table = t.to_string();
        }
        if let Some(t) = cfg.str("chunk_table") {
            self.chunk_table = t.to_string();
        }
        self.conn.execute(
            &format!(
                "CREATE TABLE IF NOT EXISTS `{}` (\
                 `id` BIGINT UNSIGNED NOT NULL AUTO_INCREMENT PRIMARY KEY, \
                 `created_at` VARCHAR(40) NOT NULL, \
                 `size` BIGINT NOT NULL DEFAULT 0, \
                 `mail_from` VARCHAR(255) NOT NULL DEFAULT '', \
                 `helo` VARCHAR(255) NOT NULL DEFAULT '', \
                 `recipient` VARCHAR(255) NOT NULL DEFAULT '', \
                 `ip_addr` VARCHAR(45) NOT NULL DEFAULT '', \
                 `return_path` VARCHAR(255) NOT NULL DEFAULT '', \
                 `is_tls` TINYINT NOT NULL DEFAULT 0, \
                 `subject` TEXT, \
                 `queued_id` VARCHAR(64) NOT NULL DEFAULT '', \
                 `header_to` VARCHAR(255) NOT NULL DEFAULT '', \
                 `header_from` VARCHAR(255) NOT NULL DEFAULT '', \
                 `parts_info` TEXT)",
                self.email_table
            ),
            &[],
        )?;
        self.conn.execute(
            &format!(
                "CREATE TABLE IF NOT EXISTS `{}` (\
                 `hash` BINARY(16) NOT NULL PRIMARY KEY, \
                 `data` LONGBLOB NOT NULL, \
                 `reference_count` INT UNSIGNED NOT NULL DEFAULT 1, \
                 `modified_at` VARCHAR(40) NOT NULL)",
                self.chunk_table
            ),
            &[],
        )?;
        Ok(())
    }

    fn open_message(
        &mut self,
        from: &str,
        helo: &str,
        recipient: &str,
        ip: IpAddr,
        return_path: &str,
        is_tls: bool,
    ) -> Result<u64, StorageError> {
        self.conn.insert(
            &format!(
                "INSERT INTO `{}` (`created_at`, `mail_from`, `helo`, `recipient`, \
                 `ip_addr`, `return_path`, `is_tls`) VALUES (?, ?, ?, ?, ?, ?, ?)",
                self.email_table
            ),
            &[
                SqlValue::Text(Utc::now().to_rfc3339()),
                SqlValue::Text(from.to_string()),
                SqlValue::Text(helo.to_string()),
                SqlValue::Text(recipient.to_string()),
                SqlValue::Text(ip.to_string()),
                SqlValue::Text(return_path.to_string()),
                SqlValue::Int(is_tls as i64),
            ],
        )
    }

    fn add_chunk(&mut self, data: &[u8], hash: HashKey) -> Result<(), StorageError> {
        // Atomic insert-or-bump keyed on the content hash.
        self.conn.execute(
            &format!(
                "INSERT INTO `{}` (`hash`, `data`, `reference_count`, `modified_at`) \
                 VALUES (?, ?, 1, ?) \
                 ON DUPLICATE KEY UPDATE `reference_count` = `reference_count` + 1, \
                 `modified_at` = VALUES(`modified_at`)",
                self.chunk_table
            ),
            &[
                SqlValue::Blob(hash.as_bytes().to_vec()),
                SqlValue::Blob(data.to_vec()),
                SqlValue::Text(Utc::now().to_rfc3339()),
            ],
        )?;
        Ok(())
    }

    fn close_message(
        &mut self,
        message_id: u64,
        size: u64,
        parts_info: &PartsInfo,
        subject: &str,
        queued_id: &str,
        to: &str,
        from: &str,
    ) -> Result<(), StorageError> {
        let info_json = serde_json::to_string(parts_info)
            .map_err(|e| StorageError::new(e.to_string()))?;
        let n = self.conn.execute(
            &format!(
                "UPDATE `{}` SET `size` = ?, `parts_info` = ?, `subject` = ?, \
                 `queued_id` = ?, `header_to` = ?, `header_from` = ? WHERE `id` = ?",
                self.email_table
            ),
            &[
                SqlValue::Int(size as i64),
                SqlValue::Text(info_json),
                SqlValue::Text(subject.to_string()),
                SqlValue::Text(queued_id.to_string()),
                SqlValue::Text(to.to_string()),
                SqlValue::Text(from.to_string()),
                SqlValue::Int(message_id as i64),
            ],
        )?;
        if n == 0 {
            return Err(StorageError::NotFound(format!("message {}", message_id)));
        }
        Ok(())
    }

    fn get_email(&mut self, message_id: u64) -> Result<StoredEmail, StorageError> {
        let rows = self.conn.query(
            &format!(
                "SELECT `created_at`, `size`, `mail_from`, `helo`, `recipient`, \
                 `ip_addr`, `return_path`, `is_tls`, `subject`, `queued_id`, \
                 `header_to`, `header_from`, `parts_info` FROM `{}` WHERE `id` = ?",
                self.email_table
            ),
            &[SqlValue::Int(message_id as i64)],
        )?;
        let row = rows
            .first()
            .ok_or_else(|| StorageError::NotFound(format!("message {}", message_id)))?;
        let parts_json = col_text(row, 12)?;
        let parts_info = if parts_json.is_empty() {
            PartsInfo::default()
        } else {
            serde_json::from_str(&parts_json).map_err(|e| StorageError::new(e.to_string()))?
        };
        Ok(StoredEmail {
            message_id,
            created_at: parse_time(&col_text(row, 0)?),
            size: col_int(row, 1)? as u64,
            from: col_text(row, 2)?,
            helo: col_text(row, 3)?,
            to: col_text(row, 4)?,
            ip: col_text(row, 5)?
                .parse()
                .unwrap_or(IpAddr::V4(std::net::Ipv4Addr::UNSPECIFIED)),
            return_path: col_text(row, 6)?,
            is_tls: col_int(row, 7)? != 0,
            subject: col_text(row, 8)?,
            queued_id: col_text(row, 9)?,
            parts_info,
        })
    }

    fn get_chunks(&mut self, hashes: &[HashKey]) -> Result<Vec<ChunkRecord>, StorageError> {
        let mut out = Vec::with_capacity(hashes.len());
        for hash in hashes {
            let rows = self.conn.query(
                &format!(
                    "SELECT `data`, `reference_count`, `modified_at` FROM `{}` \
                     WHERE `hash` = ?",
                    self.chunk_table
                ),
                &[SqlValue::Blob(hash.as_bytes().to_vec())],
            )?;
            let row = rows
                .first()
                .ok_or_else(|| StorageError::NotFound(format!("chunk {}", hash)))?;
            out.push(ChunkRecord {
                hash: *hash,
                data: Bytes::from(col_blob(row, 0)?),
                reference_count: col_int(row, 1)? as u32,
                modified_at: parse_time(&col_text(row, 2)?),
            });
        }
        Ok(out)
    }

    fn shutdown(&mut self) -> Result<(), StorageError> {
        self.conn.close()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    /// Records statements; answers queries from a canned row set.
    struct FakeConn {
        log: Arc<Mutex<Vec<String>>>,
        rows: Vec<SqlRow>,
    }

    impl SqlConn for FakeConn {
        fn execute(&mut self, sql: &str, params: &[SqlValue]) -> Result<u64, StorageError> {
            self.log
                .lock()
                .unwrap()
                .push(format!("execute({}) sql={}", params.len(), sql));
            Ok(1)
        }
        fn insert(&mut self, sql: &str, params: &[SqlValue]) -> Result<u64, StorageError> {
            self.log
                .lock()
                .unwrap()
                .push(format!("insert({}) sql={}", params.len(), sql));
            Ok(7)
        }
        fn query(&mut self, sql: &str, _params: &[SqlValue]) -> Result<Vec<SqlRow>, StorageError> {
            self.log.lock().unwrap().push(format!("query sql={}", sql));
            Ok(self.rows.clone())
        }
        fn close(&mut self) -> Result<(), StorageError> {
            Ok(())
        }
    }

    fn fake(rows: Vec<SqlRow>) -> (SqlStore, Arc<Mutex<Vec<String>>>) {
        let log = Arc::new(Mutex::new(Vec::new()));
        let store = SqlStore::new(Box::new(FakeConn {
            log: Arc::clone(&log),
            rows,
        }));
        (store, log)
    }

    #[test]
    fn add_chunk_uses_insert_or_bump_idiom() {
        let (mut store, log) = fake(Vec::new());
        store.add_chunk(b"bytes", HashKey::new([1u8; 16])).unwrap();
        let entries = log.lock().unwrap();
        assert!(entries[0].contains("ON DUPLICATE KEY UPDATE"));
        assert!(entries[0].contains("`reference_count` = `reference_count` + 1"));
        assert!(entries[0].starts_with("execute(3)"));
    }

    #[test]
    fn open_message_returns_generated_id() {
        let (mut store, log) = fake(Vec::new());
        let ip = "10.1.2.3".parse().unwrap();
        let id = store
            .open_message("a@b", "helo", "c@d", ip, "a@b", false)
            .unwrap();
        assert_eq!(id, 7);
        assert!(log.lock().unwrap()[0].starts_with("insert(7)"));
    }

    #[test]
    fn get_email_parses_row() {
        let info = PartsInfo::default();
        let row = vec![
            SqlValue::Text(Utc::now().to_rfc3339()),
            SqlValue::Int(99),
            SqlValue::Text("a@b".to_string()),
            SqlValue::Text("helo.host".to_string()),
            SqlValue::Text("c@d".to_string()),
            SqlValue::Text("2001:db8::1".to_string()),
            SqlValue::Text("a@b".to_string()),
            SqlValue::Int(1),
            SqlValue::Text("Subject!".to_string()),
            SqlValue::Text("q123".to_string()),
            SqlValue::Text("c@d".to_string()),
            SqlValue::Text("a@b".to_string()),
            SqlValue::Text(serde_json::to_string(&info).unwrap()),
        ];
        let (mut store, _) = fake(vec![row]);
        let email = store.get_email(3).unwrap();
        assert_eq!(email.size, 99);
        assert_eq!(email.subject, "Subject!");
        assert!(email.is_tls);
        assert!(email.ip.is_ipv6());
    }

    #[test]
    fn close_message_without_row_is_not_found() {
        struct ZeroConn;
        impl SqlConn for ZeroConn {
            fn execute(&mut self, _s: &str, _p: &[SqlValue]) -> Result<u64, StorageError> {
                Ok(0)
            }
            fn insert(&mut self, _s: &str, _p: &[SqlValue]) -> Result<u64, StorageError> {
                Ok(0)
            }
            fn query(&mut self, _s: &str, _p: &[SqlValue]) -> Result<Vec<SqlRow>, StorageError> {
                Ok(Vec::new())
            }
            fn close(&mut self) -> Result<(), StorageError> {
                Ok(())
            }
        }
        let mut store = SqlStore::new(Box::new(ZeroConn));
        let err = store
            .close_message(1, 0, &PartsInfo::default(), "", "", "", "")
            .unwrap_err();
        assert!(matches!(err, StorageError::NotFound(_)));
    }
}

/*
 * state_store.rs
 * Copyright (C) 2026 Chris Burdess
 *
 * This file is part of matrix_olm_core.
 *
 * matrix_olm_core is free software: you can redistribute it and/or modify
 * it under the terms of the GNU General Public License as published by
 * the Free Software Foundation, either version 3 of the License, or
 * (at your option) any later version.
 *
 * This file is distributed in the hope that it will be useful,
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
 * GNU General Public License for more details.
 *
 * You should have received a copy of the GNU General Public License
 * along with this file.  If not, see <http://www.gnu.org/licenses/>.
 */

//! Durable persistence of account, pairwise-session, and inbound-group-session
//! pickles in a local embedded relational store (one `.db` file per
//! `(user_id, device_id)`).

use std::path::Path;

use rusqlite::{params, Connection, OptionalExtension};

use crate::error::OlmResult;

pub struct StateStore {
    conn: Connection,
    user_id: String,
}

/// One persisted pairwise session row.
pub struct StoredSession {
    pub device_id: String,
    pub identity_key: String,
    pub session_id: String,
    pub pickle: String,
}

/// One persisted inbound group session row.
pub struct StoredGroupSession {
    pub room_id: String,
    pub session_id: String,
    pub pickle: String,
}

impl StateStore {
    /// Open (creating if necessary) the database at `path`. Returns the store
    /// plus whether the database was newly initialized — callers use this to
    /// decide whether to bootstrap a fresh account or load existing state.
    pub fn open(path: impl AsRef<Path>, user_id: impl Into<String>) -> OlmResult<(Self, bool)> {
        let conn = Connection::open(path)?;
        let is_new = Self::check_tables(&conn)?;
        Ok((Self { conn, user_id: user_id.into() }, is_new))
    }

    fn table_exists(conn: &Connection, name: &str) -> OlmResult<bool> {
        let exists: Option<String> = conn
            .query_row(
                "SELECT name FROM sqlite_master WHERE type='table' AND name=?1",
                params![name],
                |row| row.get(0),
            )
            .optional()?;
        Ok(exists.is_some())
    }

    /// Create any missing tables; return whether at least one was created.
    fn check_tables(conn: &Connection) -> OlmResult<bool> {
        let mut created = false;
        for (name, ddl) in [
            ("olmaccount", "CREATE TABLE olmaccount (user TEXT PRIMARY KEY, pickle TEXT NOT NULL)"),
            (
                "olmsessions",
                "CREATE TABLE olmsessions (user TEXT NOT NULL, device_id TEXT NOT NULL, identity_key TEXT NOT NULL, session_id TEXT NOT NULL, pickle TEXT NOT NULL, PRIMARY KEY (user, device_id, identity_key, session_id))",
            ),
            (
                "inbound_group_sessions",
                "CREATE TABLE inbound_group_sessions (room_id TEXT NOT NULL, session_id TEXT NOT NULL, pickle TEXT NOT NULL, PRIMARY KEY (room_id, session_id))",
            ),
        ] {
            if !Self::table_exists(conn, name)? {
                conn.execute(ddl, [])?;
                created = true;
            }
        }
        Ok(created)
    }

    pub fn load_account(&self) -> OlmResult<Option<String>> {
        let pickle: Option<String> = self
            .conn
            .query_row("SELECT pickle FROM olmaccount WHERE user = ?1", params![self.user_id], |row| row.get(0))
            .optional()?;
        Ok(pickle)
    }

    pub fn save_account(&self, pickle_json: &str, is_new: bool) -> OlmResult<()> {
        if is_new {
            self.conn
                .execute("INSERT INTO olmaccount (user, pickle) VALUES (?1, ?2)", params![self.user_id, pickle_json])?;
        } else {
            self.conn
                .execute("UPDATE olmaccount SET pickle = ?2 WHERE user = ?1", params![self.user_id, pickle_json])?;
        }
        Ok(())
    }

    pub fn load_sessions(&self) -> OlmResult<Vec<StoredSession>> {
        let mut stmt = self
            .conn
            .prepare("SELECT device_id, identity_key, session_id, pickle FROM olmsessions WHERE user = ?1")?;
        let rows = stmt.query_map(params![self.user_id], |row| {
            Ok(StoredSession {
                device_id: row.get(0)?,
                identity_key: row.get(1)?,
                session_id: row.get(2)?,
                pickle: row.get(3)?,
            })
        })?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    pub fn save_session(&self, device_id: &str, identity_key: &str, session_id: &str, pickle_json: &str, is_new: bool) -> OlmResult<()> {
        if is_new {
            self.conn.execute(
                "INSERT INTO olmsessions (user, device_id, identity_key, session_id, pickle) VALUES (?1, ?2, ?3, ?4, ?5)",
                params![self.user_id, device_id, identity_key, session_id, pickle_json],
            )?;
        } else {
            self.conn.execute(
                "UPDATE olmsessions SET pickle = ?5 WHERE user = ?1 AND device_id = ?2 AND identity_key = ?3 AND session_id = ?4",
                params![self.user_id, device_id, identity_key, session_id, pickle_json],
            )?;
        }
        Ok(())
    }

    pub fn load_inbound_group_sessions(&self) -> OlmResult<Vec<StoredGroupSession>> {
        let mut stmt = self.conn.prepare("SELECT room_id, session_id, pickle FROM inbound_group_sessions")?;
        let rows = stmt.query_map([], |row| {
            Ok(StoredGroupSession {
                room_id: row.get(0)?,
                session_id: row.get(1)?,
                pickle: row.get(2)?,
            })
        })?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    /// Insert a freshly-installed inbound group session. Not an upsert: a
    /// duplicate `(room_id, session_id)` surfaces as a constraint-violation
    /// `OlmError::Store` rather than silently overwriting a persisted
    /// session's pickle — the first-write-wins guarantee lives here too, not
    /// only in the in-memory table.
    pub fn save_inbound_group_session(&self, room_id: &str, session_id: &str, pickle_json: &str) -> OlmResult<()> {
        self.conn.execute(
            "INSERT INTO inbound_group_sessions (room_id, session_id, pickle) VALUES (?1, ?2, ?3)",
            params![room_id, session_id, pickle_json],
        )?;
        Ok(())
    }
}

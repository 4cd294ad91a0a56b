//! `rusqlite`-backed [`ChronicleStore`]: arcs own chapters, chapters own
//! paragraphs, mirroring the history store's append-only shape
//! ([`crate::history::sqlite::SqliteHistoryStore`]).

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use rusqlite::{params, Connection};

use crate::error::BotError;
use crate::types::ArcKey;

use super::ChronicleStore;

pub struct SqliteChronicleStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteChronicleStore {
    pub fn open_in_memory() -> Result<Self, BotError> {
        let conn = Connection::open_in_memory().map_err(|e| BotError::Store(e.to_string()))?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS arcs (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                server TEXT NOT NULL,
                channel TEXT NOT NULL,
                UNIQUE(server, channel)
            );
            CREATE TABLE IF NOT EXISTS chapters (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                arc_id INTEGER NOT NULL REFERENCES arcs(id)
            );
            CREATE TABLE IF NOT EXISTS paragraphs (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                chapter_id INTEGER NOT NULL REFERENCES chapters(id),
                author TEXT NOT NULL,
                text TEXT NOT NULL
            );",
        )
        .map_err(|e| BotError::Store(format!("initializing chronicle schema: {e}")))?;
        Ok(Self { conn: Arc::new(Mutex::new(conn)) })
    }

    fn arc_id(conn: &Connection, arc: &ArcKey) -> Result<i64, BotError> {
        conn.execute(
            "INSERT OR IGNORE INTO arcs (server, channel) VALUES (?1, ?2)",
            params![arc.server_tag, arc.channel_name],
        )
        .map_err(|e| BotError::Store(e.to_string()))?;
        conn.query_row(
            "SELECT id FROM arcs WHERE server = ?1 AND channel = ?2",
            params![arc.server_tag, arc.channel_name],
            |row| row.get(0),
        )
        .map_err(|e| BotError::Store(e.to_string()))
    }

    fn current_chapter_id(conn: &Connection, arc_id: i64) -> Result<i64, BotError> {
        let existing: Option<i64> = conn
            .query_row("SELECT id FROM chapters WHERE arc_id = ?1 ORDER BY id DESC LIMIT 1", params![arc_id], |row| row.get(0))
            .ok();
        match existing {
            Some(id) => Ok(id),
            None => {
                conn.execute("INSERT INTO chapters (arc_id) VALUES (?1)", params![arc_id])
                    .map_err(|e| BotError::Store(e.to_string()))?;
                Ok(conn.last_insert_rowid())
            }
        }
    }
}

#[async_trait]
impl ChronicleStore for SqliteChronicleStore {
    async fn append_paragraph(&self, arc: &ArcKey, author: &str, text: &str) -> Result<(), BotError> {
        let conn = Arc::clone(&self.conn);
        let arc = arc.clone();
        let author = author.to_string();
        let text = text.to_string();
        tokio::task::spawn_blocking(move || {
            let conn = conn.lock().expect("chronicle connection poisoned");
            let arc_id = Self::arc_id(&conn, &arc)?;
            let chapter_id = Self::current_chapter_id(&conn, arc_id)?;
            conn.execute(
                "INSERT INTO paragraphs (chapter_id, author, text) VALUES (?1, ?2, ?3)",
                params![chapter_id, author, text],
            )
            .map_err(|e| BotError::Store(e.to_string()))?;
            Ok(())
        })
        .await
        .map_err(|e| BotError::Store(format!("chronicle task panicked: {e}")))?
    }
}

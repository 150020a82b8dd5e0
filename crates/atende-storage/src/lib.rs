//! Atende Storage
//!
//! SQLite message log for inbound and outbound chat traffic

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Incoming,
    Outgoing,
}

impl Direction {
    fn as_str(&self) -> &'static str {
        match self {
            Direction::Incoming => "incoming",
            Direction::Outgoing => "outgoing",
        }
    }

    fn parse(value: &str) -> Self {
        if value.eq_ignore_ascii_case("outgoing") {
            Direction::Outgoing
        } else {
            Direction::Incoming
        }
    }
}

/// What was attached to an outbound message, if anything.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttachmentMeta {
    pub kind: String,
    pub file_name: Option<String>,
}

impl AttachmentMeta {
    pub fn image() -> Self {
        Self {
            kind: "image".to_string(),
            file_name: None,
        }
    }

    pub fn document(file_name: &str) -> Self {
        Self {
            kind: "document".to_string(),
            file_name: Some(file_name.to_string()),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggedMessage {
    pub id: i64,
    pub chat_id: String,
    pub direction: Direction,
    pub text: String,
    pub display_name: Option<String>,
    pub attachment: Option<AttachmentMeta>,
    /// Milliseconds since the epoch.
    pub timestamp: i64,
}

pub struct Storage {
    conn: rusqlite::Connection,
}

impl Storage {
    pub fn new<P: AsRef<Path>>(db_path: P) -> Result<Self> {
        let conn = rusqlite::Connection::open(db_path.as_ref())?;
        Self::init(conn)
    }

    pub fn in_memory() -> Result<Self> {
        Self::init(rusqlite::Connection::open_in_memory()?)
    }

    fn init(conn: rusqlite::Connection) -> Result<Self> {
        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS messages (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                chat_id TEXT NOT NULL,
                direction TEXT NOT NULL,
                text TEXT NOT NULL,
                display_name TEXT,
                attachment_kind TEXT,
                attachment_name TEXT,
                timestamp INTEGER NOT NULL,
                created_at DATETIME DEFAULT CURRENT_TIMESTAMP
            );

            CREATE INDEX IF NOT EXISTS idx_messages_chat_ts
            ON messages(chat_id, timestamp);
            ",
        )?;
        Ok(Self { conn })
    }

    pub fn record_incoming(
        &self,
        chat_id: &str,
        text: &str,
        timestamp_millis: i64,
        display_name: Option<&str>,
    ) -> Result<i64> {
        self.conn.execute(
            "INSERT INTO messages (chat_id, direction, text, display_name, timestamp)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            (
                chat_id,
                Direction::Incoming.as_str(),
                text,
                display_name,
                timestamp_millis,
            ),
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    pub fn record_outgoing(
        &self,
        chat_id: &str,
        text: &str,
        timestamp_millis: i64,
        attachment: Option<&AttachmentMeta>,
    ) -> Result<i64> {
        self.conn.execute(
            "INSERT INTO messages (chat_id, direction, text, attachment_kind, attachment_name, timestamp)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            (
                chat_id,
                Direction::Outgoing.as_str(),
                text,
                attachment.map(|a| a.kind.as_str()),
                attachment.and_then(|a| a.file_name.as_deref()),
                timestamp_millis,
            ),
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    /// Most recent messages of a chat in the order they were logged, oldest
    /// first.
    pub fn recent_messages(&self, chat_id: &str, limit: usize) -> Result<Vec<LoggedMessage>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, chat_id, direction, text, display_name, attachment_kind, attachment_name, timestamp
             FROM messages
             WHERE chat_id = ?1
             ORDER BY id DESC
             LIMIT ?2",
        )?;

        let rows = stmt.query_map((chat_id, limit as i64), |row| {
            let direction: String = row.get(2)?;
            let attachment_kind: Option<String> = row.get(5)?;
            let attachment_name: Option<String> = row.get(6)?;
            Ok(LoggedMessage {
                id: row.get(0)?,
                chat_id: row.get(1)?,
                direction: Direction::parse(&direction),
                text: row.get(3)?,
                display_name: row.get(4)?,
                attachment: attachment_kind.map(|kind| AttachmentMeta {
                    kind,
                    file_name: attachment_name,
                }),
                timestamp: row.get(7)?,
            })
        })?;

        let mut result = Vec::new();
        for row in rows {
            result.push(row?);
        }
        result.reverse();
        Ok(result)
    }

    pub fn count_messages(&self) -> Result<i64> {
        let count = self
            .conn
            .query_row("SELECT COUNT(*) FROM messages", [], |row| row.get(0))?;
        Ok(count)
    }

    /// Deletes messages older than `cutoff_millis`. Returns the number removed.
    pub fn prune_before(&self, cutoff_millis: i64) -> Result<usize> {
        let removed = self
            .conn
            .execute("DELETE FROM messages WHERE timestamp < ?1", [cutoff_millis])?;
        Ok(removed)
    }
}

pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

#[cfg(test)]
mod tests {
    use super::{AttachmentMeta, Direction, Storage};
    use std::time::{SystemTime, UNIX_EPOCH};

    fn temp_db_path(name: &str) -> std::path::PathBuf {
        let ts = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("clock")
            .as_nanos();
        std::env::temp_dir().join(format!("atende-storage-{}-{}.db", name, ts))
    }

    #[test]
    fn records_both_directions_in_chat_order() {
        let path = temp_db_path("directions");
        let storage = Storage::new(&path).expect("storage init");

        storage
            .record_incoming("a@s.whatsapp.net", "oi", 1_000, Some("Maria"))
            .expect("incoming");
        storage
            .record_outgoing("a@s.whatsapp.net", "menu", 2_000, None)
            .expect("outgoing");
        storage
            .record_incoming("b@s.whatsapp.net", "outro chat", 1_500, None)
            .expect("other chat");

        let messages = storage
            .recent_messages("a@s.whatsapp.net", 10)
            .expect("query");
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].direction, Direction::Incoming);
        assert_eq!(messages[0].display_name.as_deref(), Some("Maria"));
        assert_eq!(messages[1].direction, Direction::Outgoing);
        assert_eq!(messages[1].text, "menu");

        let _ = std::fs::remove_file(path);
    }

    #[test]
    fn outgoing_attachment_meta_round_trips() {
        let storage = Storage::in_memory().expect("storage init");
        storage
            .record_outgoing(
                "a@s.whatsapp.net",
                "Boleto de Maria",
                10,
                Some(&AttachmentMeta::document("boleto.pdf")),
            )
            .expect("outgoing");

        let messages = storage.recent_messages("a@s.whatsapp.net", 1).expect("query");
        let attachment = messages[0].attachment.clone().expect("attachment");
        assert_eq!(attachment.kind, "document");
        assert_eq!(attachment.file_name.as_deref(), Some("boleto.pdf"));
    }

    #[test]
    fn recent_messages_respects_limit_and_keeps_newest() {
        let storage = Storage::in_memory().expect("storage init");
        for i in 0..5 {
            storage
                .record_incoming("c@s.whatsapp.net", &format!("m{}", i), i, None)
                .expect("insert");
        }
        let messages = storage.recent_messages("c@s.whatsapp.net", 2).expect("query");
        let texts: Vec<&str> = messages.iter().map(|m| m.text.as_str()).collect();
        assert_eq!(texts, vec!["m3", "m4"]);
    }

    #[test]
    fn prune_before_removes_old_rows() {
        let storage = Storage::in_memory().expect("storage init");
        storage.record_incoming("c", "old", 100, None).expect("old");
        storage.record_incoming("c", "new", 5_000, None).expect("new");

        assert_eq!(storage.prune_before(1_000).expect("prune"), 1);
        assert_eq!(storage.count_messages().expect("count"), 1);
    }
}

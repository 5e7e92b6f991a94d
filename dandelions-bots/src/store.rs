//! Event store backed by SQLite.
//!
//! Keeps every event the bot receives or sends, so restarts don't answer the
//! same mention twice, plus a cache of kind-0 profile metadata.

use std::path::Path;

use anyhow::{Context, Result};
use chrono::Utc;
use dandelions_sdk::{Event, Filter, Kind};
use parking_lot::Mutex;
use rusqlite::{Connection, OptionalExtension, params};

/// Default number of rows returned by [`EventStore::query`].
pub const DEFAULT_QUERY_LIMIT: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Inbound,
    Outbound,
}

impl Direction {
    fn as_str(self) -> &'static str {
        match self {
            Direction::Inbound => "in",
            Direction::Outbound => "out",
        }
    }
}

pub struct EventStore {
    db: Mutex<Connection>,
}

impl EventStore {
    /// Open or create an event database. Parent directories are created.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        let db = Connection::open(path).context("Failed to open event database")?;
        Self::init(db)
    }

    /// Open an in-memory database (for testing).
    pub fn in_memory() -> Result<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(db: Connection) -> Result<Self> {
        db.execute_batch(
            "CREATE TABLE IF NOT EXISTS events (
                id TEXT PRIMARY KEY,
                pubkey TEXT NOT NULL,
                created_at INTEGER NOT NULL,
                kind INTEGER NOT NULL,
                tags TEXT NOT NULL,
                content TEXT NOT NULL,
                sig TEXT NOT NULL,
                direction TEXT NOT NULL,
                stored_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_events_created ON events(created_at);
            CREATE INDEX IF NOT EXISTS idx_events_kind ON events(kind, created_at);
            CREATE TABLE IF NOT EXISTS profiles (
                pubkey TEXT PRIMARY KEY,
                metadata TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );",
        )
        .context("Failed to create event schema")?;
        Ok(Self { db: Mutex::new(db) })
    }

    /// Store an event. Returns false if it was already stored.
    pub fn insert(&self, event: &Event, direction: Direction) -> Result<bool> {
        let tags = serde_json::to_string(&event.tags)?;
        let db = self.db.lock();
        let changed = db.execute(
            "INSERT OR IGNORE INTO events
                (id, pubkey, created_at, kind, tags, content, sig, direction, stored_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                event.id,
                event.pubkey,
                event.created_at as i64,
                event.kind.as_u16(),
                tags,
                event.content,
                event.sig,
                direction.as_str(),
                Utc::now().to_rfc3339(),
            ],
        )?;
        Ok(changed > 0)
    }

    pub fn contains(&self, id: &str) -> Result<bool> {
        let db = self.db.lock();
        let found = db
            .query_row("SELECT 1 FROM events WHERE id = ?1", params![id], |_| Ok(()))
            .optional()?;
        Ok(found.is_some())
    }

    /// Events matching `filter`, newest first.
    ///
    /// Kind and time bounds are pushed into SQL; the rest of the filter is
    /// applied in memory.
    pub fn query(&self, filter: &Filter) -> Result<Vec<Event>> {
        let limit = filter.limit.unwrap_or(DEFAULT_QUERY_LIMIT);
        if limit == 0 {
            return Ok(Vec::new());
        }
        let mut sql = String::from(
            "SELECT id, pubkey, created_at, kind, tags, content, sig FROM events WHERE 1=1",
        );
        let mut args: Vec<i64> = Vec::new();
        if let Some(since) = filter.since {
            sql.push_str(" AND created_at >= ?");
            args.push(since as i64);
        }
        if let Some(until) = filter.until {
            sql.push_str(" AND created_at <= ?");
            args.push(until as i64);
        }
        if !filter.kinds.is_empty() {
            let marks = vec!["?"; filter.kinds.len()].join(", ");
            sql.push_str(&format!(" AND kind IN ({marks})"));
            args.extend(filter.kinds.iter().map(|k| i64::from(k.as_u16())));
        }
        sql.push_str(" ORDER BY created_at DESC, rowid DESC");

        let db = self.db.lock();
        let mut stmt = db.prepare(&sql)?;
        let rows = stmt.query_map(rusqlite::params_from_iter(args.iter()), |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, i64>(2)?,
                row.get::<_, u16>(3)?,
                row.get::<_, String>(4)?,
                row.get::<_, String>(5)?,
                row.get::<_, String>(6)?,
            ))
        })?;

        let mut out = Vec::new();
        for row in rows {
            let (id, pubkey, created_at, kind, tags, content, sig) = row?;
            let event = Event {
                id,
                pubkey,
                created_at: created_at.max(0) as u64,
                kind: Kind(kind),
                tags: serde_json::from_str(&tags).context("Corrupt tags column")?,
                content,
                sig,
            };
            if filter.matches(&event) {
                out.push(event);
                if out.len() >= limit {
                    break;
                }
            }
        }
        Ok(out)
    }

    /// Cache kind-0 metadata for `pubkey`.
    pub fn set_profile(&self, pubkey: &str, metadata: &serde_json::Value) -> Result<()> {
        let db = self.db.lock();
        db.execute(
            "INSERT OR REPLACE INTO profiles (pubkey, metadata, updated_at) VALUES (?1, ?2, ?3)",
            params![pubkey, metadata.to_string(), Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }

    pub fn profile(&self, pubkey: &str) -> Result<Option<serde_json::Value>> {
        let db = self.db.lock();
        let raw: Option<String> = db
            .query_row(
                "SELECT metadata FROM profiles WHERE pubkey = ?1",
                params![pubkey],
                |row| row.get(0),
            )
            .optional()?;
        raw.map(|s| serde_json::from_str(&s).context("Corrupt profile metadata"))
            .transpose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dandelions_sdk::{EventBuilder, Keys};

    fn note(keys: &Keys, content: &str, ts: u64) -> Event {
        EventBuilder::text_note(content)
            .created_at(ts)
            .sign(keys)
            .unwrap()
    }

    #[test]
    fn insert_is_idempotent() {
        let store = EventStore::in_memory().unwrap();
        let keys = Keys::generate();
        let ev = note(&keys, "hello", 1_700_000_000);
        assert!(!store.contains(&ev.id).unwrap());
        assert!(store.insert(&ev, Direction::Inbound).unwrap());
        assert!(!store.insert(&ev, Direction::Outbound).unwrap());
        assert!(store.contains(&ev.id).unwrap());
    }

    #[test]
    fn query_is_newest_first_and_limited() {
        let store = EventStore::in_memory().unwrap();
        let keys = Keys::generate();
        for i in 0..5 {
            store
                .insert(&note(&keys, &format!("n{i}"), 1_000 + i), Direction::Inbound)
                .unwrap();
        }
        let all = store.query(&Filter::new()).unwrap();
        assert_eq!(all.len(), 5);
        assert_eq!(all[0].content, "n4");
        assert_eq!(all[4].content, "n0");

        let two = store.query(&Filter::new().limit(2)).unwrap();
        assert_eq!(
            two.iter().map(|e| e.content.as_str()).collect::<Vec<_>>(),
            vec!["n4", "n3"]
        );

        let window = store.query(&Filter::new().since(1_001).until(1_002)).unwrap();
        assert_eq!(window.len(), 2);

        assert!(store.query(&Filter::new().limit(0)).unwrap().is_empty());
    }

    #[test]
    fn query_applies_tag_and_kind_filters() {
        let store = EventStore::in_memory().unwrap();
        let alice = Keys::generate();
        let bob = Keys::generate();
        let mention = EventBuilder::text_note("hi bob")
            .tag(["p", bob.public_key_hex().as_str()])
            .sign(&alice)
            .unwrap();
        let reaction = EventBuilder::new(Kind::REACTION, "+").sign(&alice).unwrap();
        store.insert(&mention, Direction::Inbound).unwrap();
        store.insert(&reaction, Direction::Inbound).unwrap();
        store
            .insert(&note(&bob, "unrelated", 5), Direction::Outbound)
            .unwrap();

        let found = store
            .query(&Filter::new().pubkey_refs([bob.public_key_hex()]))
            .unwrap();
        assert_eq!(found, vec![mention]);

        let reactions = store.query(&Filter::new().kinds([Kind::REACTION])).unwrap();
        assert_eq!(reactions.len(), 1);
        assert_eq!(reactions[0].tags, Vec::<Vec<String>>::new());

        let by_bob = store
            .query(&Filter::new().authors([bob.public_key_hex()]))
            .unwrap();
        assert_eq!(by_bob.len(), 1);
    }

    #[test]
    fn profiles_round_trip_and_overwrite() {
        let store = EventStore::in_memory().unwrap();
        assert!(store.profile("abc").unwrap().is_none());
        store
            .set_profile("abc", &serde_json::json!({"name": "alice"}))
            .unwrap();
        store
            .set_profile("abc", &serde_json::json!({"name": "alice2"}))
            .unwrap();
        assert_eq!(store.profile("abc").unwrap().unwrap()["name"], "alice2");
    }

    #[test]
    fn reopening_keeps_events() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("events.db");
        let keys = Keys::generate();
        let ev = note(&keys, "persist me", 42);
        {
            let store = EventStore::open(&path).unwrap();
            store.insert(&ev, Direction::Inbound).unwrap();
        }
        let store = EventStore::open(&path).unwrap();
        assert!(store.contains(&ev.id).unwrap());
    }
}

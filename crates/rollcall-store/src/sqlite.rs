//! SQLite-backed encoding store (`face_encodings` table).

use crate::{codec, EncodingStore, StoreError};
use rollcall_core::{Embedding, IdentityKey};
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS face_encodings (
        identity      TEXT PRIMARY KEY,
        encoding      BLOB NOT NULL,
        encoding_date TEXT NOT NULL
    );
";

pub struct SqliteEncodingStore {
    conn: Mutex<Connection>,
}

impl SqliteEncodingStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        tracing::debug!(path = %path.display(), "sqlite encoding store opened");
        Self::init(conn)
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self, StoreError> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>, StoreError> {
        self.conn.lock().map_err(|_| StoreError::Poisoned)
    }

    /// When the identity was last enrolled (RFC 3339, UTC).
    pub fn encoding_date(&self, identity: &IdentityKey) -> Result<Option<String>, StoreError> {
        Ok(self
            .conn()?
            .query_row(
                "SELECT encoding_date FROM face_encodings WHERE identity = ?1",
                params![identity.as_str()],
                |row| row.get(0),
            )
            .optional()?)
    }
}

impl EncodingStore for SqliteEncodingStore {
    fn save(&self, identity: &IdentityKey, embedding: &Embedding) -> Result<(), StoreError> {
        let blob = codec::encode(embedding)?;
        let now = chrono::Utc::now().to_rfc3339();
        self.conn()?.execute(
            "INSERT INTO face_encodings (identity, encoding, encoding_date)
             VALUES (?1, ?2, ?3)
             ON CONFLICT(identity) DO UPDATE SET
                encoding = excluded.encoding,
                encoding_date = excluded.encoding_date",
            params![identity.as_str(), blob, now],
        )?;
        tracing::debug!(%identity, dim = embedding.len(), "saved face encoding");
        Ok(())
    }

    fn load(&self, identity: &IdentityKey) -> Result<Option<Embedding>, StoreError> {
        let blob: Option<Vec<u8>> = self
            .conn()?
            .query_row(
                "SELECT encoding FROM face_encodings WHERE identity = ?1",
                params![identity.as_str()],
                |row| row.get(0),
            )
            .optional()?;
        blob.map(|b| codec::decode(&b)).transpose()
    }

    fn remove(&self, identity: &IdentityKey) -> Result<bool, StoreError> {
        let n = self.conn()?.execute(
            "DELETE FROM face_encodings WHERE identity = ?1",
            params![identity.as_str()],
        )?;
        Ok(n > 0)
    }

    fn identities(&self) -> Result<Vec<IdentityKey>, StoreError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare("SELECT identity FROM face_encodings")?;
        let mut ids = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .map(|r| r.map(IdentityKey::from))
            .collect::<Result<Vec<_>, _>>()?;
        ids.sort();
        Ok(ids)
    }

    fn load_all(&self) -> Result<BTreeMap<IdentityKey, Embedding>, StoreError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare("SELECT identity, encoding FROM face_encodings")?;
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, Vec<u8>>(1)?))
        })?;

        let mut out = BTreeMap::new();
        for row in rows {
            let (identity, blob) = row?;
            out.insert(IdentityKey::from(identity), codec::decode(&blob)?);
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_contract() {
        let store = SqliteEncodingStore::open_in_memory().unwrap();
        crate::contract::exercise(&store);
    }

    #[test]
    fn test_encoding_date_recorded() {
        let store = SqliteEncodingStore::open_in_memory().unwrap();
        let id = IdentityKey::from("STU001");
        assert!(store.encoding_date(&id).unwrap().is_none());
        store.save(&id, &Embedding::untagged(vec![1.0])).unwrap();
        let date = store.encoding_date(&id).unwrap().unwrap();
        assert!(chrono::DateTime::parse_from_rfc3339(&date).is_ok());
    }

    #[test]
    fn test_accepts_any_identity_text() {
        let store = SqliteEncodingStore::open_in_memory().unwrap();
        let id = IdentityKey::from("Dept/CS 101");
        store.save(&id, &Embedding::untagged(vec![2.0])).unwrap();
        assert!(store.load(&id).unwrap().is_some());
    }

    #[test]
    fn test_corrupt_blob_is_an_error() {
        let store = SqliteEncodingStore::open_in_memory().unwrap();
        store
            .conn()
            .unwrap()
            .execute(
                "INSERT INTO face_encodings VALUES ('bad', x'00010203', '2024-01-01T00:00:00Z')",
                [],
            )
            .unwrap();
        assert!(matches!(
            store.load(&IdentityKey::from("bad")),
            Err(StoreError::Corrupt(_))
        ));
    }

    #[test]
    fn test_reopen_file_database() {
        let path = std::env::temp_dir().join(format!("rollcall-store-{}.db", std::process::id()));
        let _ = std::fs::remove_file(&path);
        let id = IdentityKey::from("STU007");
        let emb = Embedding::new(vec![0.1, 0.2, 0.3], "w600k_r50");
        {
            let store = SqliteEncodingStore::open(&path).unwrap();
            store.save(&id, &emb).unwrap();
        }
        let store = SqliteEncodingStore::open(&path).unwrap();
        assert_eq!(store.load(&id).unwrap(), Some(emb));
        drop(store);
        let _ = std::fs::remove_file(&path);
    }
}

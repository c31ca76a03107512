//! rollcall-store: keyed face embedding persistence.
//!
//! One record per identity, holding exactly one embedding. Writes replace
//! unconditionally; concurrent writers to the same key race and the last
//! write wins.

pub mod codec;
pub mod file;
pub mod sqlite;

pub use file::FileEncodingStore;
pub use sqlite::SqliteEncodingStore;

use rollcall_core::{Embedding, IdentityKey};
use std::collections::BTreeMap;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
    #[error("sqlite: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("encoding embedding: {0}")]
    Encode(#[from] bincode::error::EncodeError),
    #[error("corrupt embedding blob: {0}")]
    Corrupt(String),
    #[error("store lock poisoned")]
    Poisoned,
}

/// Keyed embedding storage.
pub trait EncodingStore: Send + Sync {
    /// Store `embedding` for `identity`, replacing any previous one.
    fn save(&self, identity: &IdentityKey, embedding: &Embedding) -> Result<(), StoreError>;

    /// Stored embedding for `identity`, or `None` if nothing is enrolled.
    fn load(&self, identity: &IdentityKey) -> Result<Option<Embedding>, StoreError>;

    /// Delete the record. Returns whether one existed.
    fn remove(&self, identity: &IdentityKey) -> Result<bool, StoreError>;

    /// All enrolled identities, sorted.
    fn identities(&self) -> Result<Vec<IdentityKey>, StoreError>;

    /// Embeddings for the given identities; unenrolled ones are left out.
    fn load_many(
        &self,
        identities: &[IdentityKey],
    ) -> Result<BTreeMap<IdentityKey, Embedding>, StoreError> {
        let mut out = BTreeMap::new();
        for identity in identities {
            if let Some(embedding) = self.load(identity)? {
                out.insert(identity.clone(), embedding);
            }
        }
        Ok(out)
    }

    /// Every enrolled embedding, for roll-call against the whole roster.
    fn load_all(&self) -> Result<BTreeMap<IdentityKey, Embedding>, StoreError> {
        self.load_many(&self.identities()?)
    }
}

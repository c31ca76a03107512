//! One blob file per identity in a directory.
//!
//! File names are `<key>_encoding.bin`, with every byte of the key outside
//! `[A-Za-z0-9_-]` written as `%XX`, so any identity text maps to a plain file
//! name inside the store directory and back.

use crate::{codec, EncodingStore, StoreError};
use rollcall_core::{Embedding, IdentityKey};
use std::fmt::Write as _;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

const FILE_SUFFIX: &str = "_encoding.bin";

static WRITE_SEQ: AtomicU64 = AtomicU64::new(0);

pub struct FileEncodingStore {
    dir: PathBuf,
}

impl FileEncodingStore {
    /// Open (and create if needed) the encodings directory.
    pub fn open(dir: impl AsRef<Path>) -> Result<Self, StoreError> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)?;
        tracing::debug!(dir = %dir.display(), "file encoding store opened");
        Ok(Self { dir })
    }

    fn path_for(&self, identity: &IdentityKey) -> PathBuf {
        self.dir
            .join(format!("{}{FILE_SUFFIX}", encode_key(identity.as_str())))
    }
}

fn encode_key(key: &str) -> String {
    let mut out = String::with_capacity(key.len());
    for &b in key.as_bytes() {
        if b.is_ascii_alphanumeric() || b == b'_' || b == b'-' {
            out.push(b as char);
        } else {
            let _ = write!(out, "%{b:02X}");
        }
    }
    out
}

fn decode_key(name: &str) -> Option<String> {
    let bytes = name.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' {
            let hex = std::str::from_utf8(bytes.get(i + 1..i + 3)?).ok()?;
            out.push(u8::from_str_radix(hex, 16).ok()?);
            i += 3;
        } else {
            out.push(bytes[i]);
            i += 1;
        }
    }
    String::from_utf8(out).ok()
}

impl EncodingStore for FileEncodingStore {
    fn save(&self, identity: &IdentityKey, embedding: &Embedding) -> Result<(), StoreError> {
        let path = self.path_for(identity);
        let blob = codec::encode(embedding)?;

        // Write-then-rename so readers never observe a partial blob. Each write
        // gets its own temp file; concurrent saves of one key end last-wins.
        let seq = WRITE_SEQ.fetch_add(1, Ordering::Relaxed);
        let tmp = self.dir.join(format!(
            ".{}.{}-{seq}.tmp",
            encode_key(identity.as_str()),
            std::process::id()
        ));
        fs::write(&tmp, blob)?;
        if let Err(e) = fs::rename(&tmp, &path) {
            let _ = fs::remove_file(&tmp);
            return Err(e.into());
        }
        tracing::debug!(%identity, dim = embedding.len(), "saved face encoding");
        Ok(())
    }

    fn load(&self, identity: &IdentityKey) -> Result<Option<Embedding>, StoreError> {
        match fs::read(self.path_for(identity)) {
            Ok(blob) => codec::decode(&blob).map(Some),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn remove(&self, identity: &IdentityKey) -> Result<bool, StoreError> {
        match fs::remove_file(self.path_for(identity)) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    fn identities(&self) -> Result<Vec<IdentityKey>, StoreError> {
        let mut ids = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let name = entry?.file_name();
            let Some(encoded) = name.to_str().and_then(|n| n.strip_suffix(FILE_SUFFIX)) else {
                continue;
            };
            match decode_key(encoded) {
                Some(key) => ids.push(IdentityKey::from(key)),
                None => tracing::debug!(file = encoded, "skipping undecodable encoding file"),
            }
        }
        ids.sort();
        Ok(ids)
    }
}

//! On disk persistence of a replica.
//!
//! A replica kept in a folder stores its key, its metadata log and the content blocks it
//! has in a redb database at `<folder>/.dat/archive.redb`.

use std::{
    path::{Path, PathBuf},
    sync::Arc,
};

use anyhow::{ensure, Context, Result};
use bytes::Bytes;
use dat_archive_base::{ArchiveKey, SecretKey};
use redb::{Database, ReadableTable, TableDefinition};
use tracing::debug;

use super::Record;

const JOURNAL_DIR: &str = ".dat";
const DB_FILE: &str = "archive.redb";

const PUBLIC_KEY: &str = "public";
const SECRET_KEY: &str = "secret";

// Identity
// Table
// Key: &str # PUBLIC_KEY or SECRET_KEY
// Value: [u8; 32]
const IDENTITY_TABLE: TableDefinition<&str, &[u8; 32]> = TableDefinition::new("identity-1");

// Metadata log
// Table
// Key: u64 # version
// Value: Vec<u8> # json encoded Record
const RECORDS_TABLE: TableDefinition<u64, &[u8]> = TableDefinition::new("records-1");

// Content
// Table
// Key: u64 # block index
// Value: Vec<u8> # block data
const BLOCKS_TABLE: TableDefinition<u64, &[u8]> = TableDefinition::new("blocks-1");

/// State read back from a journal.
#[derive(Debug)]
pub(super) struct Restored {
    pub key: ArchiveKey,
    pub secret: Option<SecretKey>,
    pub metadata: Vec<Record>,
    pub content: Vec<(u64, Bytes)>,
}

#[derive(Debug, Clone)]
pub(super) struct Journal {
    db: Arc<Database>,
}

fn db_path(root: &Path) -> PathBuf {
    root.join(JOURNAL_DIR).join(DB_FILE)
}

impl Journal {
    /// Whether the folder `root` holds a journal.
    pub fn exists(root: &Path) -> bool {
        db_path(root).is_file()
    }

    /// Starts a new journal in `root`.
    pub fn create(root: &Path, key: ArchiveKey, secret: Option<&SecretKey>) -> Result<Self> {
        let path = db_path(root);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("creating {}", parent.display()))?;
        }
        let db = Database::create(&path)
            .with_context(|| format!("creating journal at {}", path.display()))?;

        let write_tx = db.begin_write()?;
        {
            let mut identity = write_tx.open_table(IDENTITY_TABLE)?;
            identity.insert(PUBLIC_KEY, key.as_bytes())?;
            if let Some(secret) = secret {
                identity.insert(SECRET_KEY, &secret.to_bytes())?;
            }
            let _table = write_tx.open_table(RECORDS_TABLE)?;
            let _table = write_tx.open_table(BLOCKS_TABLE)?;
        }
        write_tx.commit()?;
        debug!(path = %path.display(), "created journal");

        Ok(Self { db: Arc::new(db) })
    }

    /// Opens the journal in `root` and reads it back.
    pub fn open(root: &Path) -> Result<(Self, Restored)> {
        let path = db_path(root);
        let db = Database::create(&path)
            .with_context(|| format!("opening journal at {}", path.display()))?;

        let read_tx = db.begin_read()?;
        let identity = read_tx.open_table(IDENTITY_TABLE)?;
        let key = identity
            .get(PUBLIC_KEY)?
            .map(|v| ArchiveKey::from(*v.value()))
            .context("journal has no archive key")?;
        let secret = identity
            .get(SECRET_KEY)?
            .map(|v| SecretKey::from_bytes(v.value()));
        if let Some(secret) = &secret {
            ensure!(
                secret.public() == key,
                "secret key does not match archive key"
            );
        }

        let mut metadata = Vec::new();
        let records = read_tx.open_table(RECORDS_TABLE)?;
        for item in records.iter()? {
            let (version, value) = item?;
            let version = version.value();
            ensure!(
                version == metadata.len() as u64 + 1,
                "metadata log is out of order at version {version}"
            );
            let record: Record =
                serde_json::from_slice(value.value()).context("parsing metadata log")?;
            metadata.push(record);
        }

        let mut content = Vec::new();
        let blocks = read_tx.open_table(BLOCKS_TABLE)?;
        for item in blocks.iter()? {
            let (index, data) = item?;
            content.push((index.value(), Bytes::copy_from_slice(data.value())));
        }
        drop((identity, records, blocks));
        drop(read_tx);

        let restored = Restored {
            key,
            secret,
            metadata,
            content,
        };
        Ok((Self { db: Arc::new(db) }, restored))
    }

    /// Stores `records` and `blocks` in a single transaction.
    pub fn append(&self, records: &[Record], blocks: &[(u64, Bytes)]) -> Result<()> {
        if records.is_empty() && blocks.is_empty() {
            return Ok(());
        }
        let write_tx = self.db.begin_write()?;
        {
            let mut table = write_tx.open_table(RECORDS_TABLE)?;
            for record in records {
                let value = serde_json::to_vec(record)?;
                table.insert(record.version, value.as_slice())?;
            }
            let mut table = write_tx.open_table(BLOCKS_TABLE)?;
            for (index, data) in blocks {
                table.insert(*index, &data[..])?;
            }
        }
        write_tx.commit()?;
        Ok(())
    }

    /// Runs [`Self::append`] on the blocking pool.
    pub async fn append_async(&self, records: Vec<Record>, blocks: Vec<(u64, Bytes)>) -> Result<()> {
        let journal = self.clone();
        tokio::task::spawn_blocking(move || journal.append(&records, &blocks))
            .await
            .context("journal task failed")?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{ChangeType, EntryKind};

    fn record(version: u64, name: &str) -> Record {
        Record {
            name: name.into(),
            version,
            change: ChangeType::Put,
            kind: EntryKind::File,
            offset: version - 1,
            blocks: 1,
            size: 5,
            mtime: 1,
        }
    }

    #[test]
    fn journal_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let secret = SecretKey::generate();
        let key = secret.public();
        assert!(!Journal::exists(dir.path()));

        let journal = Journal::create(dir.path(), key, Some(&secret)).unwrap();
        let block = Bytes::from_static(b"hello");
        journal
            .append(&[record(1, "/hello.txt")], &[(0, block.clone())])
            .unwrap();
        assert!(Journal::exists(dir.path()));
        drop(journal);

        let (_journal, restored) = Journal::open(dir.path()).unwrap();
        assert_eq!(restored.key, key);
        assert_eq!(restored.secret.map(|s| s.public()), Some(key));
        assert_eq!(restored.metadata, vec![record(1, "/hello.txt")]);
        assert_eq!(restored.content, vec![(0, block)]);
    }

    #[test]
    fn journal_without_secret() {
        let dir = tempfile::tempdir().unwrap();
        let key = SecretKey::generate().public();
        drop(Journal::create(dir.path(), key, None).unwrap());
        let (_journal, restored) = Journal::open(dir.path()).unwrap();
        assert_eq!(restored.key, key);
        assert!(restored.secret.is_none());
        assert!(restored.metadata.is_empty());
    }

    #[tokio::test]
    async fn records_and_blocks_land_together() {
        let dir = tempfile::tempdir().unwrap();
        let key = SecretKey::generate().public();
        let journal = Journal::create(dir.path(), key, None).unwrap();
        journal
            .append_async(
                vec![record(1, "/a"), record(2, "/b")],
                vec![(0, Bytes::from_static(b"a")), (1, Bytes::from_static(b"b"))],
            )
            .await
            .unwrap();
        // blocks can arrive on their own
        journal
            .append_async(vec![], vec![(7, Bytes::from_static(b"late"))])
            .await
            .unwrap();
        drop(journal);

        let (_journal, restored) = Journal::open(dir.path()).unwrap();
        assert_eq!(restored.metadata.len(), 2);
        assert_eq!(restored.metadata[1].name, "/b");
        let indices: Vec<u64> = restored.content.iter().map(|(i, _)| *i).collect();
        assert_eq!(indices, vec![0, 1, 7]);
    }
}

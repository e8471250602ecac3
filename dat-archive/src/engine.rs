//! The storage and replication engine behind an archive session.
//!
//! A session never touches logs or peers directly. It opens an [`ArchiveHandle`] through an
//! [`Engine`] and talks to it through the traits in this module. [`MemEngine`] is the
//! in-process implementation shipped with this crate.

use std::{fmt, future::Future, ops::Range, path::PathBuf};

use bytes::Bytes;
use dat_archive_base::ArchiveKey;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::error::Result;

mod journal;
mod mem;
mod swarm;
mod tree;

pub use self::{
    mem::{MemEngine, Replica, ReplicaView},
    swarm::Swarm,
};

/// Size of a content block.
pub const BLOCK_SIZE: usize = 64 * 1024;

/// Where an archive keeps its logs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Backing {
    /// Ephemeral, gone when the last handle is dropped.
    Memory,
    /// Persisted in a folder on disk.
    Dir(PathBuf),
}

/// Whether a log record adds or removes an entry.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, strum::Display, strum::AsRefStr,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum ChangeType {
    /// The entry was written.
    Put,
    /// The entry was deleted.
    Del,
}

/// The kind of a tree entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryKind {
    /// A file.
    File,
    /// A folder.
    Directory,
}

/// A record of the metadata log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Record {
    /// Path of the entry.
    pub name: String,
    /// Version of the archive after this record, i.e. its index in the log plus one.
    pub version: u64,
    /// Whether the entry was written or deleted.
    pub change: ChangeType,
    /// Kind of the entry.
    pub kind: EntryKind,
    /// Index of the first content block of the entry.
    pub offset: u64,
    /// Number of content blocks.
    pub blocks: u64,
    /// Size of the content in bytes.
    pub size: u64,
    /// Commit time, in milliseconds since the unix epoch.
    pub mtime: u64,
}

/// Metadata about an entry of an archive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stat {
    /// Kind of the entry.
    pub kind: EntryKind,
    /// Size in bytes.
    pub size: u64,
    /// Number of content blocks.
    pub blocks: u64,
    /// Number of content blocks available locally.
    pub downloaded: u64,
    /// Index of the first content block.
    pub offset: u64,
    /// Last modification, in milliseconds since the unix epoch.
    pub mtime: u64,
}

impl Stat {
    pub(crate) fn directory() -> Self {
        Self {
            kind: EntryKind::Directory,
            size: 0,
            blocks: 0,
            downloaded: 0,
            offset: 0,
            mtime: 0,
        }
    }

    /// Whether the entry is a file.
    pub fn is_file(&self) -> bool {
        self.kind == EntryKind::File
    }

    /// Whether the entry is a folder.
    pub fn is_directory(&self) -> bool {
        self.kind == EntryKind::Directory
    }
}

/// An entry of a folder listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirEntry {
    /// Name of the entry inside the folder.
    pub name: String,
    /// Metadata of the entry.
    pub stat: Stat,
}

/// Totals over all files of a view.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Summary {
    /// Number of files.
    pub files: u64,
    /// Sum of file sizes in bytes.
    pub size: u64,
    /// Time of the latest commit, in milliseconds since the unix epoch.
    pub mtime: u64,
}

/// One of the two logs which make up an archive.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, strum::Display, strum::AsRefStr,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Feed {
    /// The log of tree records.
    Metadata,
    /// The log of content blocks.
    Content,
}

/// Replication progress of a handle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FeedEvent {
    /// The number of connected peers changed.
    PeersChanged {
        /// The new number of peers.
        peers: usize,
    },
    /// A block of `feed` was received from a peer.
    Download {
        /// The feed the block belongs to.
        feed: Feed,
        /// Index of the block in the feed.
        index: u64,
    },
    /// All blocks of `feed` known so far are available locally.
    Sync {
        /// The feed that is complete.
        feed: Feed,
    },
}

/// Opens archives.
pub trait Engine: fmt::Debug + Clone + Send + Sync + 'static {
    /// Handle to an open archive.
    type Handle: ArchiveHandle;

    /// Opens the archive `key` on `backing`.
    ///
    /// With no key a new archive is created, owned by this engine. A [`Backing::Dir`] which
    /// already holds an archive is reopened, in which case `key` may be omitted.
    fn open(
        &self,
        backing: Backing,
        key: Option<ArchiveKey>,
    ) -> impl Future<Output = Result<Self::Handle>> + Send;
}

/// Read access to an archive, either live or pinned to a version.
pub trait ArchiveView: Clone + Send + Sync + 'static {
    /// The version this view reads at.
    ///
    /// For a live view this is the current length of the metadata log.
    fn version(&self) -> u64;

    /// Metadata of the entry at `path`.
    fn stat(&self, path: &str) -> impl Future<Output = Result<Stat>> + Send;

    /// Content of the file at `path`, fetched from peers where missing.
    fn read_file(&self, path: &str) -> impl Future<Output = Result<Bytes>> + Send;

    /// Entries of the folder at `path`, sorted by name.
    fn readdir(&self, path: &str) -> impl Future<Output = Result<Vec<DirEntry>>> + Send;

    /// Records of the metadata log in `range`, clamped to the view's version.
    fn history(&self, range: Range<u64>) -> impl Future<Output = Result<Vec<Record>>> + Send;

    /// Totals over the files of this view.
    fn summary(&self) -> impl Future<Output = Result<Summary>> + Send;
}

/// A handle to an open archive.
pub trait ArchiveHandle: ArchiveView {
    /// A read view pinned to a version.
    type View: ArchiveView;

    /// The key of the archive.
    fn key(&self) -> ArchiveKey;

    /// Whether this handle can append to the archive.
    fn writable(&self) -> bool;

    /// Number of connected peers.
    fn peers(&self) -> usize;

    /// Starts replicating with peers.
    fn join_network(&self) -> impl Future<Output = Result<()>> + Send;

    /// Stops replicating with peers.
    fn leave_network(&self) -> impl Future<Output = Result<()>> + Send;

    /// A view at `version`, or a live view for `None`.
    ///
    /// Waits until the metadata log reached `version`.
    fn checkout(&self, version: Option<u64>) -> impl Future<Output = Result<Self::View>> + Send;

    /// Waits until the metadata log is longer than `after_len` and returns the new length.
    fn metadata_update(&self, after_len: u64) -> impl Future<Output = Result<u64>> + Send;

    /// Writes a file.
    fn write_file(&self, path: &str, data: Bytes) -> impl Future<Output = Result<()>> + Send;

    /// Deletes a file.
    fn unlink(&self, path: &str) -> impl Future<Output = Result<()>> + Send;

    /// Creates a folder.
    fn mkdir(&self, path: &str) -> impl Future<Output = Result<()>> + Send;

    /// Deletes a folder, with all its entries if `recursive`.
    fn rmdir(&self, path: &str, recursive: bool) -> impl Future<Output = Result<()>> + Send;

    /// Fetches all content below `path` from peers.
    fn download(&self, path: &str) -> impl Future<Output = Result<()>> + Send;

    /// Receives every record appended to the metadata log from now on, in log order.
    ///
    /// The stream ends when the handle is closed.
    fn subscribe_changes(&self) -> mpsc::UnboundedReceiver<Record>;

    /// Receives replication progress from now on.
    ///
    /// The stream ends when the handle is closed.
    fn subscribe_activity(&self) -> mpsc::UnboundedReceiver<FeedEvent>;

    /// Leaves the network and ends all subscriptions.
    fn close(&self) -> impl Future<Output = Result<()>> + Send;
}

//! An in-process engine.
//!
//! Each opened archive is a [`Replica`]: a metadata log, a sparse content log and the
//! subscribers interested in them. Replicas of the same key find each other through a
//! [`Swarm`]. Metadata is pushed to all peers as soon as it is appended, content blocks
//! are only pulled when read or downloaded.

use std::{
    ops::Range,
    path::PathBuf,
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        Arc, Weak,
    },
    time::{SystemTime, UNIX_EPOCH},
};

use anyhow::{anyhow, bail, Context};
use bytes::{Bytes, BytesMut};
use dat_archive_base::{ArchiveKey, SecretKey};
use parking_lot::Mutex;
use tokio::sync::{mpsc, watch};
use tracing::{debug, trace, warn};

use super::{
    journal::{Journal, Restored},
    swarm::Swarm,
    tree::{canonical, Node, Tree},
    ArchiveHandle, ArchiveView, Backing, ChangeType, DirEntry, Engine, EntryKind, Feed, FeedEvent,
    Record, Stat, Summary, BLOCK_SIZE,
};
use crate::error::{ArchiveError, Result};

/// An [`Engine`] keeping archives in memory, or in a journal on disk, and replicating them
/// within the process.
#[derive(Debug, Clone)]
pub struct MemEngine {
    swarm: Swarm,
}

impl Default for MemEngine {
    /// An engine on the process wide [`Swarm::global`].
    fn default() -> Self {
        Self::new(Swarm::global())
    }
}

impl MemEngine {
    /// Creates an engine whose archives replicate within `swarm`.
    pub fn new(swarm: Swarm) -> Self {
        Self { swarm }
    }

    /// The swarm of this engine.
    pub fn swarm(&self) -> &Swarm {
        &self.swarm
    }
}

impl Engine for MemEngine {
    type Handle = Replica;

    async fn open(&self, backing: Backing, key: Option<ArchiveKey>) -> Result<Replica> {
        match backing {
            Backing::Memory => {
                let (key, secret) = match key {
                    Some(key) => (key, None),
                    None => {
                        let secret = SecretKey::generate();
                        (secret.public(), Some(secret))
                    }
                };
                let restored = Restored {
                    key,
                    secret,
                    metadata: Vec::new(),
                    content: Vec::new(),
                };
                Ok(Replica::new(restored, None, self.swarm.clone()))
            }
            Backing::Dir(root) => {
                let (journal, restored) =
                    tokio::task::spawn_blocking(move || open_journal(root, key))
                        .await
                        .context("journal task failed")??;
                Ok(Replica::new(restored, Some(journal), self.swarm.clone()))
            }
        }
    }
}

fn open_journal(root: PathBuf, key: Option<ArchiveKey>) -> anyhow::Result<(Journal, Restored)> {
    if Journal::exists(&root) {
        let (journal, restored) = Journal::open(&root)?;
        if let Some(key) = key {
            if key != restored.key {
                bail!(
                    "{} holds archive {}, not {}",
                    root.display(),
                    restored.key,
                    key
                );
            }
        }
        return Ok((journal, restored));
    }
    let (key, secret) = match key {
        Some(key) => (key, None),
        None => {
            let secret = SecretKey::generate();
            (secret.public(), Some(secret))
        }
    };
    let journal = Journal::create(&root, key, secret.as_ref())?;
    let restored = Restored {
        key,
        secret,
        metadata: Vec::new(),
        content: Vec::new(),
    };
    Ok((journal, restored))
}

/// A local copy of an archive.
#[derive(Debug, Clone)]
pub struct Replica(Arc<ReplicaInner>);

#[derive(derive_more::Debug)]
pub(super) struct ReplicaInner {
    key: ArchiveKey,
    secret: Option<SecretKey>,
    id: u64,
    #[debug(skip)]
    state: Mutex<ReplicaState>,
    #[debug(skip)]
    len: watch::Sender<u64>,
    #[debug(skip)]
    swarm: Swarm,
    /// Released on close.
    journal: Mutex<Option<Journal>>,
    /// Serializes commits while their journal write is in flight.
    #[debug(skip)]
    commit_lock: tokio::sync::Mutex<()>,
    joined: AtomicBool,
    closed: AtomicBool,
}

#[derive(Debug, Default)]
struct ReplicaState {
    metadata: Vec<Record>,
    /// Content blocks by index, `None` where not downloaded yet.
    content: Vec<Option<Bytes>>,
    changes: Vec<mpsc::UnboundedSender<Record>>,
    activity: Vec<mpsc::UnboundedSender<FeedEvent>>,
}

impl ReplicaState {
    fn emit_change(&mut self, record: &Record) {
        self.changes.retain(|tx| tx.send(record.clone()).is_ok());
    }

    fn emit_activity(&mut self, event: FeedEvent) {
        self.activity.retain(|tx| tx.send(event.clone()).is_ok());
    }

    fn has_all_content(&self) -> bool {
        self.content.iter().all(Option::is_some)
    }

    fn downloaded(&self, offset: u64, blocks: u64) -> u64 {
        self.block_range(offset, blocks)
            .filter(|i| matches!(self.content.get(*i), Some(Some(_))))
            .count() as u64
    }

    fn block_range(&self, offset: u64, blocks: u64) -> Range<usize> {
        offset as usize..(offset + blocks) as usize
    }

    /// The records up to `version`, or all of them for the live version.
    fn records(&self, version: Option<u64>) -> &[Record] {
        let len = self.metadata.len();
        let end = version.map_or(len, |v| (v as usize).min(len));
        &self.metadata[..end]
    }

    fn stat(&self, node: Node<'_>) -> Stat {
        match node {
            Node::File(record) => Stat {
                kind: EntryKind::File,
                size: record.size,
                blocks: record.blocks,
                downloaded: self.downloaded(record.offset, record.blocks),
                offset: record.offset,
                mtime: record.mtime,
            },
            Node::Dir(Some(record)) => Stat {
                kind: EntryKind::Directory,
                offset: record.offset,
                mtime: record.mtime,
                ..Stat::directory()
            },
            Node::Dir(None) => Stat::directory(),
        }
    }
}

/// A change to commit to the log.
#[derive(Debug)]
struct Pending {
    name: String,
    change: ChangeType,
    kind: EntryKind,
    data: Bytes,
}

impl Pending {
    fn put_file(name: String, data: Bytes) -> Self {
        Self {
            name,
            change: ChangeType::Put,
            kind: EntryKind::File,
            data,
        }
    }

    fn put_dir(name: String) -> Self {
        Self {
            name,
            change: ChangeType::Put,
            kind: EntryKind::Directory,
            data: Bytes::new(),
        }
    }

    fn del(name: String, kind: EntryKind) -> Self {
        Self {
            name,
            change: ChangeType::Del,
            kind,
            data: Bytes::new(),
        }
    }
}

/// Turns planned changes into the records and content blocks that follow the current log.
fn prepare(state: &ReplicaState, pending: Vec<Pending>) -> (Vec<Record>, Vec<(u64, Bytes)>) {
    let mut version = state.metadata.len() as u64;
    let mut offset = state.content.len() as u64;
    let mut records = Vec::with_capacity(pending.len());
    let mut blocks = Vec::new();
    let mtime = now_millis();
    for change in pending {
        let size = change.data.len();
        let start = offset;
        for chunk in (0..size).step_by(BLOCK_SIZE) {
            blocks.push((offset, change.data.slice(chunk..(chunk + BLOCK_SIZE).min(size))));
            offset += 1;
        }
        version += 1;
        records.push(Record {
            name: change.name,
            version,
            change: change.change,
            kind: change.kind,
            offset: start,
            blocks: offset - start,
            size: size as u64,
            mtime,
        });
    }
    (records, blocks)
}

fn next_replica_id() -> u64 {
    static NEXT: AtomicU64 = AtomicU64::new(0);
    NEXT.fetch_add(1, Ordering::Relaxed)
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}

impl Replica {
    fn new(restored: Restored, journal: Option<Journal>, swarm: Swarm) -> Self {
        let Restored {
            key,
            secret,
            metadata,
            content: stored,
        } = restored;
        let blocks = metadata
            .iter()
            .map(|r| r.offset + r.blocks)
            .max()
            .unwrap_or_default() as usize;
        let mut content = vec![None; blocks];
        for (index, data) in stored {
            if let Some(slot) = content.get_mut(index as usize) {
                *slot = Some(data);
            }
        }
        let (len, _) = watch::channel(metadata.len() as u64);
        let state = ReplicaState {
            metadata,
            content,
            ..Default::default()
        };
        debug!(key = %key.fmt_short(), writable = secret.is_some(), "opened replica");
        Self(Arc::new(ReplicaInner {
            key,
            secret,
            id: next_replica_id(),
            state: Mutex::new(state),
            len,
            swarm,
            journal: Mutex::new(journal),
            commit_lock: Default::default(),
            joined: AtomicBool::new(false),
            closed: AtomicBool::new(false),
        }))
    }

    pub(super) fn from_inner(inner: Arc<ReplicaInner>) -> Self {
        Self(inner)
    }

    pub(super) fn downgrade(&self) -> Weak<ReplicaInner> {
        Arc::downgrade(&self.0)
    }

    pub(super) fn id(&self) -> u64 {
        self.0.id
    }

    /// Current length of the metadata log.
    pub fn len(&self) -> u64 {
        *self.0.len.borrow()
    }

    /// Whether the metadata log is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn is_joined(&self) -> bool {
        self.0.joined.load(Ordering::SeqCst)
    }

    fn ensure_open(&self) -> Result<()> {
        if self.0.closed.load(Ordering::SeqCst) {
            return Err(anyhow!("archive {} is closed", self.0.key.fmt_short()).into());
        }
        Ok(())
    }

    fn ensure_writable(&self) -> Result<()> {
        self.ensure_open()?;
        if self.0.secret.is_none() {
            return Err(ArchiveError::not_owner());
        }
        Ok(())
    }

    fn journal(&self) -> Option<Journal> {
        self.0.journal.lock().clone()
    }

    /// Validates and appends changes, atomically with respect to other commits.
    ///
    /// On disk the records and their content are written in one transaction, before any of
    /// them become visible.
    async fn commit(&self, plan: impl FnOnce(&Tree) -> Result<Vec<Pending>>) -> Result<()> {
        self.ensure_writable()?;
        let _commit = self.0.commit_lock.lock().await;
        let (records, blocks) = {
            let state = self.0.state.lock();
            let pending = plan(&Tree::replay(&state.metadata))?;
            prepare(&state, pending)
        };
        if records.is_empty() {
            return Ok(());
        }
        if let Some(journal) = self.journal() {
            journal
                .append_async(records.clone(), blocks.clone())
                .await?;
        }
        {
            let mut state = self.0.state.lock();
            if state.metadata.len() as u64 + 1 != records[0].version {
                return Err(anyhow!("metadata log changed during commit").into());
            }
            for (index, data) in blocks {
                let index = index as usize;
                if state.content.len() <= index {
                    state.content.resize(index + 1, None);
                }
                state.content[index] = Some(data);
            }
            for record in records {
                debug!(
                    key = %self.0.key.fmt_short(),
                    version = record.version,
                    path = %record.name,
                    change = %record.change,
                    "commit"
                );
                state.metadata.push(record.clone());
                state.emit_change(&record);
            }
            self.0.len.send_replace(state.metadata.len() as u64);
        }
        self.broadcast();
        Ok(())
    }

    /// Pushes new metadata to all peers.
    fn broadcast(&self) {
        if !self.is_joined() {
            return;
        }
        for peer in self.0.swarm.peers_of(self) {
            if let Err(err) = peer.ingest_from(self) {
                warn!(peer = peer.id(), "failed to replicate metadata: {err:#}");
            }
        }
        self.0.swarm.notify(&self.0.key);
    }

    /// Takes over the records `source` has and we do not.
    fn ingest_from(&self, source: &Replica) -> Result<()> {
        let have = self.len();
        let suffix = {
            let source = source.0.state.lock();
            source.records(None)[(have as usize).min(source.metadata.len())..].to_vec()
        };
        if suffix.is_empty() {
            return Ok(());
        }
        if let Some(journal) = self.journal() {
            journal.append(&suffix, &[])?;
        }
        let mut state = self.0.state.lock();
        let mut added = false;
        for record in suffix {
            if record.version != state.metadata.len() as u64 + 1 {
                continue;
            }
            let end = (record.offset + record.blocks) as usize;
            if state.content.len() < end {
                state.content.resize(end, None);
            }
            trace!(key = %self.0.key.fmt_short(), version = record.version, "received record");
            let index = record.version - 1;
            state.metadata.push(record.clone());
            state.emit_change(&record);
            state.emit_activity(FeedEvent::Download {
                feed: Feed::Metadata,
                index,
            });
            added = true;
        }
        if added {
            self.0.len.send_replace(state.metadata.len() as u64);
            state.emit_activity(FeedEvent::Sync {
                feed: Feed::Metadata,
            });
        }
        Ok(())
    }

    /// Copies of the blocks in `indices` we have.
    fn blocks(&self, indices: &[usize]) -> Vec<(usize, Bytes)> {
        let state = self.0.state.lock();
        indices
            .iter()
            .filter_map(|i| match state.content.get(*i) {
                Some(Some(data)) => Some((*i, data.clone())),
                _ => None,
            })
            .collect()
    }

    fn missing(&self, range: Range<usize>) -> Vec<usize> {
        let state = self.0.state.lock();
        range
            .filter(|i| !matches!(state.content.get(*i), Some(Some(_))))
            .collect()
    }

    async fn store_blocks(&self, found: Vec<(usize, Bytes)>) -> Result<()> {
        let fresh: Vec<(u64, Bytes)> = {
            let state = self.0.state.lock();
            found
                .into_iter()
                .filter(|(index, _)| matches!(state.content.get(*index), Some(None)))
                .map(|(index, data)| (index as u64, data))
                .collect()
        };
        if fresh.is_empty() {
            return Ok(());
        }
        if let Some(journal) = self.journal() {
            journal.append_async(Vec::new(), fresh.clone()).await?;
        }
        let mut state = self.0.state.lock();
        let was_complete = state.has_all_content();
        let mut stored = Vec::new();
        for (index, data) in fresh {
            if let Some(slot @ None) = state.content.get_mut(index as usize) {
                *slot = Some(data);
                stored.push(index);
            }
        }
        for index in &stored {
            state.emit_activity(FeedEvent::Download {
                feed: Feed::Content,
                index: *index,
            });
        }
        if !stored.is_empty() && !was_complete && state.has_all_content() {
            state.emit_activity(FeedEvent::Sync {
                feed: Feed::Content,
            });
        }
        Ok(())
    }

    /// Makes the content blocks in `range` available locally, waiting for peers that have
    /// them.
    async fn fetch(&self, range: Range<usize>) -> Result<()> {
        let notifier = self.0.swarm.notifier(self.0.key);
        loop {
            let notified = notifier.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            self.ensure_open()?;
            let missing = self.missing(range.clone());
            if missing.is_empty() {
                return Ok(());
            }
            if self.is_joined() {
                for peer in self.0.swarm.peers_of(self) {
                    let found = peer.blocks(&missing);
                    if !found.is_empty() {
                        self.store_blocks(found).await?;
                    }
                }
                if self.missing(range.clone()).is_empty() {
                    return Ok(());
                }
            }
            trace!(key = %self.0.key.fmt_short(), missing = missing.len(), "waiting for content");
            notified.await;
        }
    }

    fn emit_activity(&self, event: FeedEvent) {
        self.0.state.lock().emit_activity(event);
    }

    fn stat_at(&self, version: Option<u64>, path: &str) -> Result<Stat> {
        let path = canonical(path);
        let state = self.0.state.lock();
        let tree = Tree::replay(state.records(version));
        let node = tree.get(&path).ok_or_else(|| ArchiveError::not_found(&path))?;
        Ok(state.stat(node))
    }

    async fn read_file_at(&self, version: Option<u64>, path: &str) -> Result<Bytes> {
        let path = canonical(path);
        let (offset, blocks, size) = {
            let state = self.0.state.lock();
            let tree = Tree::replay(state.records(version));
            match tree.get(&path) {
                Some(Node::File(record)) => (record.offset, record.blocks, record.size),
                Some(Node::Dir(_)) => return Err(ArchiveError::NotAFile { path }),
                None => return Err(ArchiveError::not_found(path)),
            }
        };
        let range = offset as usize..(offset + blocks) as usize;
        self.fetch(range.clone()).await?;

        let state = self.0.state.lock();
        let mut buf = BytesMut::with_capacity(size as usize);
        for index in range {
            match state.content.get(index) {
                Some(Some(data)) => buf.extend_from_slice(data),
                _ => return Err(anyhow!("content block {index} went missing").into()),
            }
        }
        Ok(buf.freeze())
    }

    fn readdir_at(&self, version: Option<u64>, path: &str) -> Result<Vec<DirEntry>> {
        let path = canonical(path);
        let state = self.0.state.lock();
        let tree = Tree::replay(state.records(version));
        match tree.get(&path) {
            Some(Node::Dir(_)) => {}
            Some(Node::File(_)) => return Err(ArchiveError::NotAFolder { path }),
            None => return Err(ArchiveError::not_found(path)),
        }
        let entries = tree
            .children(&path)
            .into_iter()
            .map(|(name, node)| DirEntry {
                name: name.to_string(),
                stat: state.stat(node),
            })
            .collect();
        Ok(entries)
    }

    fn history_at(&self, version: Option<u64>, range: Range<u64>) -> Vec<Record> {
        let state = self.0.state.lock();
        let records = state.records(version);
        let end = (range.end as usize).min(records.len());
        let start = (range.start as usize).min(end);
        records[start..end].to_vec()
    }

    fn summary_at(&self, version: Option<u64>) -> Summary {
        let state = self.0.state.lock();
        let records = state.records(version);
        let tree = Tree::replay(records);
        let files = tree.files_below("/");
        Summary {
            files: files.len() as u64,
            size: files.iter().map(|r| r.size).sum(),
            mtime: records.last().map(|r| r.mtime).unwrap_or_default(),
        }
    }

    async fn wait_for_len(&self, len: u64) -> Result<u64> {
        let mut rx = self.0.len.subscribe();
        let current = rx
            .wait_for(|current| *current >= len)
            .await
            .map_err(|_| anyhow!("archive {} dropped", self.0.key.fmt_short()))?;
        Ok(*current)
    }
}

impl ArchiveView for Replica {
    fn version(&self) -> u64 {
        self.len()
    }

    async fn stat(&self, path: &str) -> Result<Stat> {
        self.stat_at(None, path)
    }

    async fn read_file(&self, path: &str) -> Result<Bytes> {
        self.read_file_at(None, path).await
    }

    async fn readdir(&self, path: &str) -> Result<Vec<DirEntry>> {
        self.readdir_at(None, path)
    }

    async fn history(&self, range: Range<u64>) -> Result<Vec<Record>> {
        Ok(self.history_at(None, range))
    }

    async fn summary(&self) -> Result<Summary> {
        Ok(self.summary_at(None))
    }
}

impl ArchiveHandle for Replica {
    type View = ReplicaView;

    fn key(&self) -> ArchiveKey {
        self.0.key
    }

    fn writable(&self) -> bool {
        self.0.secret.is_some()
    }

    fn peers(&self) -> usize {
        if !self.is_joined() {
            return 0;
        }
        self.0.swarm.peers_of(self).len()
    }

    async fn join_network(&self) -> Result<()> {
        self.ensure_open()?;
        if self.0.joined.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        let peers = self.0.swarm.join(self);
        debug!(key = %self.0.key.fmt_short(), peers = peers.len(), "joined network");
        for peer in &peers {
            let (mine, theirs) = (self.len(), peer.len());
            let res = if mine < theirs {
                self.ingest_from(peer)
            } else if theirs < mine {
                peer.ingest_from(self)
            } else {
                Ok(())
            };
            if let Err(err) = res {
                warn!(peer = peer.id(), "failed to exchange metadata: {err:#}");
            }
        }
        self.emit_activity(FeedEvent::PeersChanged { peers: peers.len() });
        for peer in &peers {
            peer.emit_activity(FeedEvent::PeersChanged {
                peers: peer.peers(),
            });
        }
        self.0.swarm.notify(&self.0.key);
        Ok(())
    }

    async fn leave_network(&self) -> Result<()> {
        if !self.0.joined.swap(false, Ordering::SeqCst) {
            return Ok(());
        }
        let remaining = self.0.swarm.leave(self);
        debug!(key = %self.0.key.fmt_short(), "left network");
        self.emit_activity(FeedEvent::PeersChanged { peers: 0 });
        for peer in remaining {
            peer.emit_activity(FeedEvent::PeersChanged {
                peers: peer.peers(),
            });
        }
        Ok(())
    }

    async fn checkout(&self, version: Option<u64>) -> Result<ReplicaView> {
        if let Some(version) = version {
            self.wait_for_len(version).await?;
        }
        Ok(ReplicaView {
            replica: self.clone(),
            version,
        })
    }

    async fn metadata_update(&self, after_len: u64) -> Result<u64> {
        self.wait_for_len(after_len + 1).await
    }

    async fn write_file(&self, path: &str, data: Bytes) -> Result<()> {
        let path = canonical(path);
        self.commit(|tree| {
            if let Some(file) = tree.file_ancestor(&path) {
                return Err(ArchiveError::NotAFolder {
                    path: file.name.clone(),
                });
            }
            if let Some(Node::Dir(_)) = tree.get(&path) {
                return Err(ArchiveError::NotAFile { path: path.clone() });
            }
            Ok(vec![Pending::put_file(path.clone(), data)])
        })
        .await
    }

    async fn unlink(&self, path: &str) -> Result<()> {
        let path = canonical(path);
        self.commit(|tree| match tree.get(&path) {
            Some(Node::File(_)) => Ok(vec![Pending::del(path.clone(), EntryKind::File)]),
            Some(Node::Dir(_)) => Err(ArchiveError::NotAFile { path: path.clone() }),
            None => Err(ArchiveError::not_found(&path)),
        })
        .await
    }

    async fn mkdir(&self, path: &str) -> Result<()> {
        let path = canonical(path);
        self.commit(|tree| {
            if tree.get(&path).is_some() {
                return Err(ArchiveError::AlreadyExists { path: path.clone() });
            }
            if let Some(file) = tree.file_ancestor(&path) {
                return Err(ArchiveError::NotAFolder {
                    path: file.name.clone(),
                });
            }
            Ok(vec![Pending::put_dir(path.clone())])
        })
        .await
    }

    async fn rmdir(&self, path: &str, recursive: bool) -> Result<()> {
        let path = canonical(path);
        if path == "/" {
            return Err(ArchiveError::InvalidArgument(
                "the archive root can not be removed".into(),
            ));
        }
        self.commit(|tree| {
            let explicit = match tree.get(&path) {
                Some(Node::Dir(record)) => record.is_some(),
                Some(Node::File(_)) => return Err(ArchiveError::NotAFolder { path: path.clone() }),
                None => return Err(ArchiveError::not_found(&path)),
            };
            let descendants = tree.descendants(&path);
            if !descendants.is_empty() && !recursive {
                return Err(ArchiveError::DirectoryNotEmpty { path: path.clone() });
            }
            let mut pending: Vec<_> = descendants
                .into_iter()
                .map(|r| Pending::del(r.name.clone(), r.kind))
                .collect();
            if explicit {
                pending.push(Pending::del(path.clone(), EntryKind::Directory));
            }
            Ok(pending)
        })
        .await
    }

    async fn download(&self, path: &str) -> Result<()> {
        self.ensure_open()?;
        let path = canonical(path);
        let ranges: Vec<Range<usize>> = {
            let state = self.0.state.lock();
            let tree = Tree::replay(&state.metadata);
            if tree.get(&path).is_none() {
                return Err(ArchiveError::not_found(path));
            }
            tree.files_below(&path)
                .into_iter()
                .map(|r| state.block_range(r.offset, r.blocks))
                .collect()
        };
        for range in ranges {
            self.fetch(range).await?;
        }
        Ok(())
    }

    fn subscribe_changes(&self) -> mpsc::UnboundedReceiver<Record> {
        let (tx, rx) = mpsc::unbounded_channel();
        if !self.0.closed.load(Ordering::SeqCst) {
            self.0.state.lock().changes.push(tx);
        }
        rx
    }

    fn subscribe_activity(&self) -> mpsc::UnboundedReceiver<FeedEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        if !self.0.closed.load(Ordering::SeqCst) {
            self.0.state.lock().activity.push(tx);
        }
        rx
    }

    async fn close(&self) -> Result<()> {
        self.leave_network().await?;
        if self.0.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        {
            let mut state = self.0.state.lock();
            state.changes.clear();
            state.activity.clear();
        }
        self.0.journal.lock().take();
        // wake up fetches so they notice
        self.0.swarm.notify(&self.0.key);
        debug!(key = %self.0.key.fmt_short(), "closed replica");
        Ok(())
    }
}

/// A read view of a [`Replica`], live or pinned to a version.
#[derive(Debug, Clone)]
pub struct ReplicaView {
    replica: Replica,
    version: Option<u64>,
}

impl ArchiveView for ReplicaView {
    fn version(&self) -> u64 {
        match self.version {
            Some(version) => version,
            None => self.replica.len(),
        }
    }

    async fn stat(&self, path: &str) -> Result<Stat> {
        self.replica.stat_at(self.version, path)
    }

    async fn read_file(&self, path: &str) -> Result<Bytes> {
        self.replica.read_file_at(self.version, path).await
    }

    async fn readdir(&self, path: &str) -> Result<Vec<DirEntry>> {
        self.replica.readdir_at(self.version, path)
    }

    async fn history(&self, range: Range<u64>) -> Result<Vec<Record>> {
        Ok(self.replica.history_at(self.version, range))
    }

    async fn summary(&self) -> Result<Summary> {
        Ok(self.replica.summary_at(self.version))
    }
}

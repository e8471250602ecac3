//! Archive sessions.
//!
//! A [`DatArchive`] is opened in the background as soon as it is spawned. Every operation
//! first waits for that to finish, under the operation's deadline, and then works against
//! either the live handle (mutations) or the view the session is pinned to (reads).

use std::{
    fmt,
    future::Future,
    path::{Path, PathBuf},
    str::FromStr,
    sync::Arc,
    time::Duration,
};

use dat_archive_base::{ArchiveKey, ArchiveLocator, Host};
use futures::{
    future::{BoxFuture, Shared},
    FutureExt,
};
use serde::Serialize;
use serde_json::Value;
use tokio_util::task::AbortOnDropHandle;
use tracing::{debug, info, info_span, warn, Instrument};

use crate::{
    config::Config,
    dns::{DnsResolver, NameResolver},
    encoding::{Encoding, FileContent},
    engine::{ArchiveHandle, ArchiveView, Backing, DirEntry, Engine, MemEngine, Stat},
    error::{ArchiveError, Result},
    feed::EventFeed,
    history::{self, HistoryEntry},
    manifest::{Manifest, ManifestMode, CONFIGURABLE_FIELDS},
    network::{self, NetworkActivityFeed},
    path::{self as paths, MANIFEST_PATH},
    timeout::{self, PhaseReporter},
    watch::{self, PathMatcher, WatchArgs, WatchEvent, WatchFeed},
};

/// Whether a session finished opening.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "lowercase")]
pub enum ReadyState {
    /// Still opening.
    Pending,
    /// Open, operations run against the archive.
    Ready,
    /// Opening failed, every operation fails with the same error.
    Failed,
}

/// Options shared by all operations.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OpOptions {
    /// Deadline of the operation.
    ///
    /// `None` uses the session default, [`Duration::ZERO`] waits forever.
    pub timeout: Option<Duration>,
}

impl OpOptions {
    /// Options with the given deadline.
    pub fn timeout(timeout: Duration) -> Self {
        Self {
            timeout: Some(timeout),
        }
    }
}

/// Options of [`DatArchive::read_file`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReadFileOptions {
    /// How to encode the content.
    pub encoding: Encoding,
    /// Deadline, see [`OpOptions::timeout`].
    pub timeout: Option<Duration>,
}

impl From<Encoding> for ReadFileOptions {
    fn from(encoding: Encoding) -> Self {
        Self {
            encoding,
            timeout: None,
        }
    }
}

/// Options of [`DatArchive::write_file`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WriteFileOptions {
    /// How textual content is decoded.
    pub encoding: Encoding,
    /// Deadline, see [`OpOptions::timeout`].
    pub timeout: Option<Duration>,
}

impl From<Encoding> for WriteFileOptions {
    fn from(encoding: Encoding) -> Self {
        Self {
            encoding,
            timeout: None,
        }
    }
}

/// Options of [`DatArchive::history`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HistoryOptions {
    /// First log index, defaults to the start of the log.
    pub start: Option<u64>,
    /// End of the range, exclusive. Defaults to the length of the log, as does `Some(0)`.
    pub end: Option<u64>,
    /// Most recent entries first, with `start` and `end` counted from the end of the log.
    pub reverse: bool,
    /// Deadline, see [`OpOptions::timeout`].
    pub timeout: Option<Duration>,
}

/// Options of [`DatArchive::rmdir`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RmdirOptions {
    /// Remove the folder together with everything in it.
    pub recursive: bool,
    /// Deadline, see [`OpOptions::timeout`].
    pub timeout: Option<Duration>,
}

/// Manifest fields written by [`Builder::create`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CreateOptions {
    /// Title.
    pub title: Option<String>,
    /// Description.
    pub description: Option<String>,
    /// Type of the archive, a string or a list of them.
    pub kind: Option<Value>,
    /// Author, a name or an object.
    pub author: Option<Value>,
}

/// Information about an archive, returned by [`DatArchive::get_info`].
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ArchiveInfo {
    /// Key of the archive.
    pub key: ArchiveKey,
    /// `dat://` url of the archive.
    pub url: String,
    /// Whether this session can write to the archive.
    pub is_owner: bool,
    /// Version of the view the session reads.
    pub version: u64,
    /// Number of connected peers.
    pub peers: usize,
    /// Time of the latest commit, in milliseconds since the unix epoch.
    pub mtime: u64,
    /// Sum of the sizes of all files.
    pub size: u64,
    /// Manifest title.
    pub title: Option<String>,
    /// Manifest description.
    pub description: Option<String>,
    /// Manifest type.
    #[serde(rename = "type")]
    pub kind: Option<Value>,
    /// Manifest author.
    pub author: Option<Value>,
    /// Manifest links.
    pub links: Option<Value>,
}

/// The open archive, shared by all operations of a session.
struct Loaded<H: ArchiveHandle> {
    live: H,
    view: H::View,
    url: String,
    version: Option<u64>,
}

impl<H: ArchiveHandle> Clone for Loaded<H> {
    fn clone(&self) -> Self {
        Self {
            live: self.live.clone(),
            view: self.view.clone(),
            url: self.url.clone(),
            version: self.version,
        }
    }
}

impl<H: ArchiveHandle> Loaded<H> {
    fn ensure_writable(&self) -> Result<()> {
        if self.version.is_some() {
            return Err(ArchiveError::historic_version());
        }
        if !self.live.writable() {
            return Err(ArchiveError::not_owner());
        }
        Ok(())
    }

    /// Checks a mutation of `path`: pinned sessions are refused first, then the manifest,
    /// then sessions without write access.
    fn ensure_mutable(&self, path: &str) -> Result<()> {
        if self.version.is_some() {
            return Err(ArchiveError::historic_version());
        }
        paths::validate_unprotected(path)?;
        self.ensure_writable()
    }
}

type ReadyFuture<H> = Shared<BoxFuture<'static, Result<Loaded<H>>>>;

struct Inner<E: Engine> {
    locator: Option<ArchiveLocator>,
    config: Config,
    resolver: Arc<dyn NameResolver>,
    ready: ReadyFuture<E::Handle>,
    _driver: AbortOnDropHandle<()>,
}

/// Builder for [`DatArchive`].
#[derive(Debug)]
pub struct Builder<E: Engine = MemEngine> {
    url: Option<String>,
    local_path: Option<PathBuf>,
    engine: E,
    networked: Option<bool>,
    resolver: Option<Arc<dyn NameResolver>>,
    config: Config,
}

impl Default for Builder<MemEngine> {
    fn default() -> Self {
        Self::new(MemEngine::default())
    }
}

impl<E: Engine> Builder<E> {
    /// A builder opening archives through `engine`.
    pub fn new(engine: E) -> Self {
        Self {
            url: None,
            local_path: None,
            engine,
            networked: None,
            resolver: None,
            config: Config::default(),
        }
    }

    /// The archive to open, `dat://<key or name>[+<version>]`.
    ///
    /// Without a url a new archive is created.
    pub fn url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    /// Keep the archive in a folder on disk instead of in memory.
    pub fn local_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.local_path = Some(path.into());
        self
    }

    /// Use a different engine.
    pub fn engine<E2: Engine>(self, engine: E2) -> Builder<E2> {
        Builder {
            url: self.url,
            local_path: self.local_path,
            engine,
            networked: self.networked,
            resolver: self.resolver,
            config: self.config,
        }
    }

    /// Whether to join the network, overriding [`Config::networked`].
    pub fn networked(mut self, networked: bool) -> Self {
        self.networked = Some(networked);
        self
    }

    /// Resolve names with `resolver` instead of a [`DnsResolver`].
    pub fn resolver(mut self, resolver: impl NameResolver) -> Self {
        self.resolver = Some(Arc::new(resolver));
        self
    }

    /// Sets the configuration.
    pub fn config(mut self, config: Config) -> Self {
        self.config = config;
        self
    }

    /// Sets how `configure` writes the manifest.
    pub fn manifest_mode(mut self, mode: ManifestMode) -> Self {
        self.config.manifest = mode;
        self
    }

    /// Sets the default deadline of operations, [`Duration::ZERO`] disables it.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.config.timeout_ms = timeout.as_millis() as u64;
        self
    }

    /// Starts opening the archive and returns the session.
    ///
    /// Fails if the url does not parse. Errors while opening surface in the operations of
    /// the session. Must be called from within a tokio runtime.
    pub fn spawn(self) -> Result<DatArchive<E>> {
        let locator = self
            .url
            .as_deref()
            .map(ArchiveLocator::from_str)
            .transpose()?;
        let resolver: Arc<dyn NameResolver> = match self.resolver {
            Some(resolver) => resolver,
            None => Arc::new(DnsResolver::new(self.config.dns.clone())),
        };
        let opener = Opener {
            engine: self.engine,
            locator: locator.clone(),
            backing: match self.local_path {
                Some(path) => Backing::Dir(path),
                None => Backing::Memory,
            },
            networked: self.networked.unwrap_or(self.config.networked),
            resolver: resolver.clone(),
        };
        let span = info_span!(
            "archive",
            url = self.url.as_deref().unwrap_or("new"),
            networked = opener.networked
        );
        let ready = opener.open().instrument(span).boxed().shared();
        let driver = tokio::task::spawn(ready.clone().map(|_| ()));
        Ok(DatArchive {
            inner: Arc::new(Inner {
                locator,
                config: self.config,
                resolver,
                ready,
                _driver: AbortOnDropHandle::new(driver),
            }),
        })
    }

    /// Creates a new archive, with a manifest holding the given fields.
    ///
    /// With a local path the target must not exist, or be an empty folder. Any url set on
    /// the builder is ignored.
    pub async fn create(mut self, options: CreateOptions) -> Result<DatArchive<E>> {
        if let Some(path) = &self.local_path {
            ensure_creatable(path).await?;
        }
        self.url = None;
        let archive = self.spawn()?;
        archive
            .op(None, "writing manifest", move |loaded, _| async move {
                let manifest = Manifest {
                    url: Some(loaded.url.clone()),
                    title: options.title,
                    description: options.description,
                    kind: options.kind,
                    author: options.author,
                    ..Default::default()
                };
                loaded
                    .live
                    .write_file(MANIFEST_PATH, manifest.to_vec()?.into())
                    .await
            })
            .await?;
        Ok(archive)
    }

    /// Loads the archive kept in the builder's local path.
    pub async fn load(self) -> Result<DatArchive<E>> {
        let Some(path) = &self.local_path else {
            return Err(ArchiveError::InvalidArgument(
                "a local path is required to load an archive".into(),
            ));
        };
        match tokio::fs::metadata(path).await {
            Ok(meta) if meta.is_dir() => {}
            _ => {
                return Err(ArchiveError::LoadMissing(
                    "No folder exists at the given location.".into(),
                ))
            }
        }
        let archive = self.spawn()?;
        archive.ready(OpOptions::default()).await?;
        Ok(archive)
    }
}

async fn ensure_creatable(path: &Path) -> Result<()> {
    let meta = match tokio::fs::metadata(path).await {
        Ok(meta) => meta,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(()),
        Err(err) => return Err(err.into()),
    };
    if !meta.is_dir() {
        return Err(ArchiveError::CreateConflict(
            "A file exists at the target location.".into(),
        ));
    }
    let mut entries = tokio::fs::read_dir(path).await?;
    if entries.next_entry().await?.is_some() {
        return Err(ArchiveError::CreateConflict(
            "The target folder is not empty.".into(),
        ));
    }
    Ok(())
}

/// Runs the open sequence of a session.
struct Opener<E: Engine> {
    engine: E,
    locator: Option<ArchiveLocator>,
    backing: Backing,
    networked: bool,
    resolver: Arc<dyn NameResolver>,
}

impl<E: Engine> Opener<E> {
    async fn open(self) -> Result<Loaded<E::Handle>> {
        let res = self.try_open().await;
        match &res {
            Ok(loaded) => info!(url = %loaded.url, "archive ready"),
            Err(err) => warn!("failed to open archive: {err}"),
        }
        res
    }

    async fn try_open(self) -> Result<Loaded<E::Handle>> {
        let key = match self.locator.as_ref().map(|l| l.host()) {
            Some(Host::Key(key)) => Some(*key),
            Some(Host::Name(name)) => {
                debug!(%name, "resolving name");
                Some(self.resolver.resolve_name(name).await?)
            }
            None => None,
        };

        debug!(backing = ?self.backing, "opening");
        let live = self.engine.open(self.backing, key).await?;

        if self.networked {
            debug!("joining network");
            live.join_network().await?;
        }

        let url = match &self.locator {
            Some(locator) => locator.origin(),
            None => ArchiveLocator::new(live.key()).origin(),
        };

        let version = self.locator.as_ref().and_then(|l| l.version());
        let view = live.checkout(version).await?;

        if !live.writable() && live.version() == 0 {
            debug!("waiting for first metadata update");
            live.metadata_update(0).await?;
        }

        Ok(Loaded {
            live,
            view,
            url,
            version,
        })
    }
}

/// A session on an archive.
///
/// Cloning is cheap, clones share the open archive.
pub struct DatArchive<E: Engine = MemEngine> {
    inner: Arc<Inner<E>>,
}

impl<E: Engine> Clone for DatArchive<E> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<E: Engine> fmt::Debug for DatArchive<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DatArchive")
            .field("url", &self.url())
            .field("ready_state", &self.ready_state())
            .finish_non_exhaustive()
    }
}

impl DatArchive<MemEngine> {
    /// A builder for sessions on the default engine.
    pub fn builder() -> Builder<MemEngine> {
        Builder::default()
    }

    /// Opens the archive at `url`, or creates a new one if `None`.
    pub fn new(url: Option<&str>) -> Result<Self> {
        let mut builder = Self::builder();
        if let Some(url) = url {
            builder = builder.url(url);
        }
        builder.spawn()
    }

    /// Creates a new in-memory archive.
    pub async fn create(options: CreateOptions) -> Result<Self> {
        Self::builder().create(options).await
    }

    /// Loads the archive kept in the folder at `path`.
    pub async fn load(path: impl Into<PathBuf>) -> Result<Self> {
        Self::builder().local_path(path).load().await
    }
}

impl<E: Engine> DatArchive<E> {
    /// Whether the session finished opening.
    pub fn ready_state(&self) -> ReadyState {
        match self.inner.ready.peek() {
            None => ReadyState::Pending,
            Some(Ok(_)) => ReadyState::Ready,
            Some(Err(_)) => ReadyState::Failed,
        }
    }

    /// Waits until the session is open.
    pub async fn ready(&self, options: OpOptions) -> Result<()> {
        self.op(options.timeout, "loading archive", |_, _| async { Ok(()) })
            .await
    }

    /// The `dat://` url of the archive, without version.
    ///
    /// `None` for a new archive that did not finish opening yet.
    pub fn url(&self) -> Option<String> {
        if let Some(Ok(loaded)) = self.inner.ready.peek() {
            return Some(loaded.url.clone());
        }
        self.inner.locator.as_ref().map(|l| l.origin())
    }

    /// Resolves `name` to an archive key, with this session's resolver.
    pub async fn resolve_name(&self, name: &str) -> Result<ArchiveKey> {
        self.inner.resolver.resolve_name(name).await
    }

    fn deadline(&self, timeout: Option<Duration>) -> Option<Duration> {
        timeout.or_else(|| self.inner.config.timeout())
    }

    /// Runs `action` once the session is open, under the deadline.
    async fn op<T, F, Fut>(
        &self,
        timeout: Option<Duration>,
        phase: &'static str,
        action: F,
    ) -> Result<T>
    where
        F: FnOnce(Loaded<E::Handle>, PhaseReporter) -> Fut + Send + 'static,
        Fut: Future<Output = Result<T>> + Send + 'static,
        T: Send + 'static,
    {
        let ready = self.inner.ready.clone();
        timeout::run(self.deadline(timeout), move |reporter| async move {
            reporter.report("loading archive");
            let loaded = ready.await?;
            reporter.report(phase);
            action(loaded, reporter).await
        })
        .await
    }

    /// Information about the archive and its manifest.
    ///
    /// A missing or unreadable manifest is treated as an empty one.
    pub async fn get_info(&self, options: OpOptions) -> Result<ArchiveInfo> {
        self.op(options.timeout, "reading info", |loaded, _| async move {
            let manifest = read_manifest(&loaded.view).await.unwrap_or_default();
            let summary = loaded.view.summary().await?;
            Ok(ArchiveInfo {
                key: loaded.live.key(),
                url: loaded.url,
                is_owner: loaded.live.writable(),
                version: loaded.view.version(),
                peers: loaded.live.peers(),
                mtime: summary.mtime,
                size: summary.size,
                title: manifest.title,
                description: manifest.description,
                kind: manifest.kind,
                author: manifest.author,
                links: manifest.links,
            })
        })
        .await
    }

    /// Updates the manifest and network participation.
    ///
    /// `settings` must be an object. Its manifest fields are written according to the
    /// configured [`ManifestMode`], a boolean `networked` joins or leaves the network.
    pub async fn configure(&self, settings: Value, options: OpOptions) -> Result<()> {
        let Value::Object(settings) = settings else {
            return Err(ArchiveError::InvalidArgument(
                "settings must be an object".into(),
            ));
        };
        let networked = match settings.get("networked") {
            None => None,
            Some(Value::Bool(networked)) => Some(*networked),
            Some(_) => {
                return Err(ArchiveError::InvalidArgument(
                    "networked must be a boolean".into(),
                ))
            }
        };
        let mode = self.inner.config.manifest;
        self.op(options.timeout, "updating manifest", move |loaded, phase| async move {
            if CONFIGURABLE_FIELDS.iter().any(|f| settings.contains_key(*f)) {
                loaded.ensure_writable()?;
                let current = read_manifest(&loaded.live).await.unwrap_or_default();
                let next = Manifest::configured(current, &settings, mode)?;
                loaded
                    .live
                    .write_file(MANIFEST_PATH, next.to_vec()?.into())
                    .await?;
            }
            match networked {
                Some(true) => {
                    phase.report("joining network");
                    loaded.live.join_network().await?;
                }
                Some(false) => {
                    phase.report("leaving network");
                    loaded.live.leave_network().await?;
                }
                None => {}
            }
            Ok(())
        })
        .await
    }

    /// Uncommitted changes. Writes are committed immediately, so there are none.
    pub async fn diff(&self) -> Result<Vec<HistoryEntry>> {
        Ok(Vec::new())
    }

    /// Commits staged changes. Writes are committed immediately, so this does nothing.
    pub async fn commit(&self) -> Result<Vec<HistoryEntry>> {
        Ok(Vec::new())
    }

    /// Reverts staged changes. Writes are committed immediately, so this does nothing.
    pub async fn revert(&self) -> Result<Vec<HistoryEntry>> {
        Ok(Vec::new())
    }

    /// Entries of the metadata log.
    pub async fn history(&self, options: HistoryOptions) -> Result<Vec<HistoryEntry>> {
        self.op(options.timeout, "reading history", move |loaded, _| async move {
            let range = history::query_range(
                loaded.view.version(),
                options.start,
                options.end,
                options.reverse,
            );
            let records = loaded.view.history(range).await?;
            Ok(history::project(records, options.reverse))
        })
        .await
    }

    /// Metadata of the entry at `path`.
    pub async fn stat(&self, path: &str, options: OpOptions) -> Result<Stat> {
        let path = paths::normalize(Some(path));
        self.op(options.timeout, "reading metadata", move |loaded, _| async move {
            loaded.view.stat(&path).await
        })
        .await
    }

    /// Content of the file at `path`.
    pub async fn read_file(&self, path: &str, options: ReadFileOptions) -> Result<FileContent> {
        let path = paths::normalize(Some(path));
        self.op(options.timeout, "reading file", move |loaded, _| async move {
            let bytes = loaded.view.read_file(&path).await?;
            Ok(FileContent::from_bytes(bytes, options.encoding))
        })
        .await
    }

    /// Writes a file. Text content is decoded according to the encoding first.
    pub async fn write_file(
        &self,
        path: &str,
        content: impl Into<FileContent>,
        options: WriteFileOptions,
    ) -> Result<()> {
        let path = paths::normalize(Some(path));
        let content = content.into();
        self.op(options.timeout, "writing file", move |loaded, _| async move {
            loaded.ensure_mutable(&path)?;
            paths::validate_file_path(&path)?;
            let data = content.into_bytes(options.encoding)?;
            loaded.live.write_file(&path, data).await
        })
        .await
    }

    /// Deletes a file.
    pub async fn unlink(&self, path: &str, options: OpOptions) -> Result<()> {
        let path = paths::normalize(Some(path));
        self.op(options.timeout, "deleting file", move |loaded, _| async move {
            loaded.ensure_mutable(&path)?;
            paths::validate_syntax(&path)?;
            loaded.live.unlink(&path).await
        })
        .await
    }

    /// Fetches everything below `path` from peers.
    ///
    /// Does nothing on archives we own. Not supported on sessions pinned to a version.
    pub async fn download(&self, path: &str, options: OpOptions) -> Result<()> {
        let path = paths::normalize(Some(path));
        self.op(options.timeout, "downloading", move |loaded, _| async move {
            if loaded.version.is_some() {
                return Err(ArchiveError::NotSupported(
                    "downloading historic versions".into(),
                ));
            }
            if loaded.live.writable() {
                return Ok(());
            }
            loaded.live.download(&path).await
        })
        .await
    }

    /// Names of the entries of the folder at `path`.
    pub async fn readdir(&self, path: &str, options: OpOptions) -> Result<Vec<String>> {
        let entries = self.readdir_with_stat(path, options).await?;
        Ok(entries.into_iter().map(|e| e.name).collect())
    }

    /// Entries of the folder at `path`, with their metadata.
    pub async fn readdir_with_stat(&self, path: &str, options: OpOptions) -> Result<Vec<DirEntry>> {
        let path = paths::normalize(Some(path));
        self.op(options.timeout, "listing folder", move |loaded, _| async move {
            loaded.view.readdir(&path).await
        })
        .await
    }

    /// Creates a folder.
    pub async fn mkdir(&self, path: &str, options: OpOptions) -> Result<()> {
        let path = paths::normalize(Some(path));
        self.op(options.timeout, "creating folder", move |loaded, _| async move {
            loaded.ensure_mutable(&path)?;
            paths::validate_syntax(&path)?;
            loaded.live.mkdir(&path).await
        })
        .await
    }

    /// Removes a folder.
    pub async fn rmdir(&self, path: &str, options: RmdirOptions) -> Result<()> {
        let path = paths::normalize(Some(path));
        self.op(options.timeout, "removing folder", move |loaded, _| async move {
            loaded.ensure_mutable(&path)?;
            loaded.live.rmdir(&path, options.recursive).await
        })
        .await
    }

    /// Watches the archive for changes.
    ///
    /// Only changes committed after this returns are reported.
    pub async fn watch(&self, args: impl Into<WatchArgs>) -> Result<WatchFeed> {
        let (pattern, on_invalidated) = args.into().into_parts();
        let matcher = PathMatcher::new(pattern.as_ref());
        let live = self
            .op(None, "watching", |loaded, _| async move { Ok(loaded.live) })
            .await?;
        let feed: WatchFeed = EventFeed::new();
        if let Some(callback) = on_invalidated {
            feed.add_listener(watch::WatchEventKind::Invalidated, move |event| {
                callback(event)
            });
        }
        let span = info_span!("watch", key = %live.key().fmt_short());
        feed.attach(
            watch::changes(live.subscribe_changes(), matcher),
            Some(WatchEvent::Invalidated),
            span,
        );
        Ok(feed)
    }

    /// Deprecated alias of [`Self::watch`].
    #[deprecated(note = "use `watch` instead")]
    pub async fn create_file_activity_stream(
        &self,
        args: impl Into<WatchArgs>,
    ) -> Result<WatchFeed> {
        warn!("create_file_activity_stream is deprecated, use watch instead");
        self.watch(args).await
    }

    /// Reports replication progress of the archive.
    pub async fn create_network_activity_stream(&self) -> Result<NetworkActivityFeed> {
        let live = self
            .op(None, "watching network", |loaded, _| async move {
                Ok(loaded.live)
            })
            .await?;
        let feed: NetworkActivityFeed = EventFeed::new();
        let span = info_span!("network", key = %live.key().fmt_short());
        feed.attach(network::activity(live.subscribe_activity()), None, span);
        Ok(feed)
    }

    /// Leaves the network and closes the archive.
    ///
    /// Feeds created by [`Self::watch`] are invalidated. Closing a session which failed to
    /// open does nothing.
    pub async fn close(&self) -> Result<()> {
        let ready = self.inner.ready.clone();
        timeout::run(self.deadline(None), move |reporter| async move {
            reporter.report("loading archive");
            let Ok(loaded) = ready.await else {
                return Ok(());
            };
            reporter.report("closing");
            loaded.live.close().await
        })
        .await
    }
}

async fn read_manifest(view: &impl ArchiveView) -> anyhow::Result<Manifest> {
    let bytes = view.read_file(MANIFEST_PATH).await?;
    Manifest::from_slice(&bytes)
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::{engine::Swarm, error::ErrorKind};

    fn builder() -> Builder<MemEngine> {
        Builder::new(MemEngine::new(Swarm::new()))
    }

    #[tokio::test]
    async fn ready_state_settles() {
        let archive = builder().spawn().unwrap();
        archive.ready(OpOptions::default()).await.unwrap();
        assert_eq!(archive.ready_state(), ReadyState::Ready);
        assert!(archive.url().unwrap().starts_with("dat://"));
    }

    #[tokio::test]
    async fn bad_urls_fail_to_spawn() {
        let err = builder().url("https://example.com").spawn().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);
    }

    #[tokio::test]
    async fn failed_open_poisons_every_operation() {
        let archive = builder()
            .url("dat://unknown.example")
            .resolver(crate::dns::StaticResolver::new())
            .spawn()
            .unwrap();
        let err = archive.stat("/", OpOptions::default()).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NameNotResolved);
        assert_eq!(archive.ready_state(), ReadyState::Failed);
        let err = archive
            .readdir("/", OpOptions::default())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NameNotResolved);
        // nothing to close
        archive.close().await.unwrap();
    }

    #[tokio::test]
    async fn names_resolve_before_opening() {
        let swarm = Swarm::new();
        let owner = Builder::new(MemEngine::new(swarm.clone()))
            .create(CreateOptions::default())
            .await
            .unwrap();
        let key = owner.get_info(OpOptions::default()).await.unwrap().key;

        let reader = Builder::new(MemEngine::new(swarm))
            .url("dat://Site.Example/")
            .resolver(crate::dns::StaticResolver::new().with("site.example", key))
            .spawn()
            .unwrap();
        assert_eq!(reader.url().as_deref(), Some("dat://site.example"));
        let info = reader.get_info(OpOptions::default()).await.unwrap();
        assert_eq!(info.key, key);
        assert!(!info.is_owner);
        assert_eq!(info.url, "dat://site.example");
        assert_eq!(reader.resolve_name("site.example").await.unwrap(), key);
    }

    #[tokio::test]
    async fn deadlines_default_to_config() {
        let archive = builder()
            .timeout(Duration::from_millis(30))
            .url(format!("dat://{}", "ab".repeat(32)))
            .spawn()
            .unwrap();
        let err = archive.stat("/", OpOptions::default()).await.unwrap_err();
        assert_eq!(err.to_string(), "Timed out while loading archive");
        assert_eq!(archive.ready_state(), ReadyState::Pending);
    }
}

//! Sessions on versioned, replicated file archives.
//!
//! A [`DatArchive`] wraps an archive opened through an [`engine::Engine`]. Opening runs in
//! the background: the name of the archive is resolved, its logs are opened, the network is
//! joined and, for archives we do not own, the first metadata is awaited. Every operation
//! waits for this under its own deadline and fails with [`ArchiveError::Timeout`] naming the
//! phase it was stuck in.
//!
//! Sessions opened with a pinned version (`dat://<key>+<version>`) read a frozen checkout
//! and reject all mutations.
//!
//! # Example
//!
//! ```no_run
//! # async fn run() -> dat_archive::Result<()> {
//! use dat_archive::{CreateOptions, DatArchive, HistoryOptions, OpOptions};
//!
//! let archive = DatArchive::create(CreateOptions {
//!     title: Some("Notes".into()),
//!     ..Default::default()
//! })
//! .await?;
//! archive
//!     .write_file("/hello.txt", "world", Default::default())
//!     .await?;
//! let names = archive.readdir("/", OpOptions::default()).await?;
//! let history = archive.history(HistoryOptions::default()).await?;
//! # Ok(())
//! # }
//! ```
#![deny(missing_docs, rustdoc::broken_intra_doc_links)]

pub mod config;
pub mod dns;
pub mod encoding;
pub mod engine;
pub mod error;
pub mod feed;
pub mod history;
pub mod manifest;
pub mod network;
pub mod path;
mod session;
pub mod timeout;
pub mod watch;

pub use dat_archive_base::{ArchiveKey, ArchiveLocator, SecretKey};

pub use self::{
    config::Config,
    dns::{DnsResolver, NameResolver, StaticResolver},
    encoding::{Encoding, FileContent},
    engine::{DirEntry, MemEngine, Stat, Swarm},
    error::{ArchiveError, ErrorKind, Result},
    feed::RemovalToken,
    history::HistoryEntry,
    manifest::{Manifest, ManifestMode},
    network::{NetworkActivityFeed, NetworkEvent, NetworkEventKind},
    session::{
        ArchiveInfo, Builder, CreateOptions, DatArchive, HistoryOptions, OpOptions,
        ReadFileOptions, ReadyState, RmdirOptions, WriteFileOptions,
    },
    watch::{PatternSpec, WatchArgs, WatchEvent, WatchEventKind, WatchFeed},
};

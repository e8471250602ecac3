//! Base types and utilities for dat-archive
#![deny(missing_docs, rustdoc::broken_intra_doc_links)]

pub mod key;
pub mod locator;

pub use key::{ArchiveKey, KeyParsingError, SecretKey};
pub use locator::{ArchiveLocator, Host, LocatorError, DAT_SCHEME};

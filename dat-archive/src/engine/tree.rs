//! The folder tree at a version, replayed from the metadata log.

use std::{collections::BTreeMap, ops::Bound};

use super::{ChangeType, EntryKind, Record};

/// Brings an engine path into canonical form: a leading `/` and no trailing `/`.
pub(super) fn canonical(path: &str) -> String {
    let trimmed = path.trim_matches('/');
    format!("/{trimmed}")
}

/// A node of the tree.
#[derive(Debug, Clone, Copy)]
pub(super) enum Node<'a> {
    File(&'a Record),
    /// A folder, with the record that created it unless it only exists because of its
    /// entries.
    Dir(Option<&'a Record>),
}

#[derive(Debug, Default)]
pub(super) struct Tree {
    entries: BTreeMap<String, Record>,
}

impl Tree {
    pub fn replay(records: &[Record]) -> Self {
        let mut entries = BTreeMap::new();
        for record in records {
            match record.change {
                ChangeType::Put => {
                    entries.insert(record.name.clone(), record.clone());
                }
                ChangeType::Del => {
                    entries.remove(&record.name);
                }
            }
        }
        Self { entries }
    }

    /// Looks up a canonical path.
    pub fn get(&self, path: &str) -> Option<Node<'_>> {
        if path == "/" {
            return Some(Node::Dir(None));
        }
        if let Some(record) = self.entries.get(path) {
            return Some(match record.kind {
                EntryKind::File => Node::File(record),
                EntryKind::Directory => Node::Dir(Some(record)),
            });
        }
        self.below(dir_prefix(path)).next().map(|_| Node::Dir(None))
    }

    /// Direct children of the folder at a canonical path, by name.
    pub fn children(&self, path: &str) -> BTreeMap<&str, Node<'_>> {
        let prefix = dir_prefix(path);
        let skip = prefix.len();
        let mut children = BTreeMap::new();
        for (name, record) in self.below(prefix) {
            let rest = &name[skip..];
            match rest.split_once('/') {
                None => {
                    let node = match record.kind {
                        EntryKind::File => Node::File(record),
                        EntryKind::Directory => Node::Dir(Some(record)),
                    };
                    children.insert(rest, node);
                }
                Some((child, _)) => {
                    children.entry(child).or_insert(Node::Dir(None));
                }
            }
        }
        children
    }

    /// All records below the folder at a canonical path, entries before their folders.
    pub fn descendants(&self, path: &str) -> Vec<&Record> {
        let mut records: Vec<_> = self.below(dir_prefix(path)).map(|(_, r)| r).collect();
        records.reverse();
        records
    }

    /// All files at or below a canonical path.
    pub fn files_below(&self, path: &str) -> Vec<&Record> {
        match self.entries.get(path) {
            Some(record) if record.kind == EntryKind::File => vec![record],
            _ => self
                .below(dir_prefix(path))
                .map(|(_, r)| r)
                .filter(|r| r.kind == EntryKind::File)
                .collect(),
        }
    }

    /// The nearest ancestor of a canonical path which is a file, if any.
    pub fn file_ancestor(&self, path: &str) -> Option<&Record> {
        let mut ancestor = path;
        while let Some((parent, _)) = ancestor.rsplit_once('/') {
            if parent.is_empty() {
                return None;
            }
            if let Some(record) = self.entries.get(parent) {
                if record.kind == EntryKind::File {
                    return Some(record);
                }
            }
            ancestor = parent;
        }
        None
    }

    fn below(&self, prefix: String) -> impl Iterator<Item = (&String, &Record)> + '_ {
        self.entries
            .range::<str, _>((Bound::Included(prefix.as_str()), Bound::Unbounded))
            .take_while(move |(name, _)| name.starts_with(&prefix))
    }
}

fn dir_prefix(path: &str) -> String {
    if path == "/" {
        "/".to_string()
    } else {
        format!("{path}/")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(version: u64, name: &str, change: ChangeType, kind: EntryKind) -> Record {
        Record {
            name: name.to_string(),
            version,
            change,
            kind,
            offset: 0,
            blocks: 0,
            size: 0,
            mtime: version,
        }
    }

    fn put(version: u64, name: &str) -> Record {
        record(version, name, ChangeType::Put, EntryKind::File)
    }

    #[test]
    fn canonical_paths() {
        assert_eq!(canonical("/"), "/");
        assert_eq!(canonical(""), "/");
        assert_eq!(canonical("a/b/"), "/a/b");
        assert_eq!(canonical("/a"), "/a");
    }

    #[test]
    fn replay_applies_puts_and_deletes() {
        let log = vec![
            put(1, "/a.txt"),
            put(2, "/sub/b.txt"),
            record(3, "/a.txt", ChangeType::Del, EntryKind::File),
            record(4, "/empty", ChangeType::Put, EntryKind::Directory),
        ];
        let tree = Tree::replay(&log);
        assert!(tree.get("/a.txt").is_none());
        assert!(matches!(tree.get("/sub"), Some(Node::Dir(None))));
        assert!(matches!(tree.get("/empty"), Some(Node::Dir(Some(_)))));
        assert!(matches!(tree.get("/sub/b.txt"), Some(Node::File(_))));
        let names: Vec<_> = tree.children("/").into_keys().collect();
        assert_eq!(names, vec!["empty", "sub"]);

        // an older version still has the file
        let tree = Tree::replay(&log[..2]);
        assert!(matches!(tree.get("/a.txt"), Some(Node::File(r)) if r.version == 1));
    }

    #[test]
    fn children_do_not_leak_siblings() {
        let tree = Tree::replay(&[put(1, "/ab/x"), put(2, "/a/y"), put(3, "/a.txt")]);
        let names: Vec<_> = tree.children("/a").into_keys().collect();
        assert_eq!(names, vec!["y"]);
        assert_eq!(tree.files_below("/a").len(), 1);
        assert_eq!(tree.files_below("/").len(), 3);
        assert_eq!(tree.files_below("/a.txt").len(), 1);
    }

    #[test]
    fn descendants_before_folders() {
        let tree = Tree::replay(&[
            record(1, "/d", ChangeType::Put, EntryKind::Directory),
            put(2, "/d/x"),
            put(3, "/d/sub/y"),
        ]);
        let names: Vec<_> = tree.descendants("/d").iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names, vec!["/d/x", "/d/sub/y"]);
    }

    #[test]
    fn file_ancestors() {
        let tree = Tree::replay(&[put(1, "/f")]);
        assert_eq!(tree.file_ancestor("/f/g/h").map(|r| r.version), Some(1));
        assert!(tree.file_ancestor("/g/h").is_none());
        assert!(tree.file_ancestor("/f").is_none());
    }
}

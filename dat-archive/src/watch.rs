//! Watching an archive for changes.

use std::{fmt, sync::Arc};

use futures::{Stream, StreamExt};
use glob::{MatchOptions, Pattern};
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;

use crate::{
    engine::Record,
    feed::{Event, EventFeed, Listener},
};

/// An event of a [`WatchFeed`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatchEvent {
    /// A path matching the watched patterns was written or deleted.
    Changed {
        /// The path that changed.
        path: String,
    },
    /// The underlying subscription ended, no further events will be delivered.
    Invalidated,
}

/// The kinds of [`WatchEvent`]s listeners can register for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display)]
#[strum(serialize_all = "kebab-case")]
pub enum WatchEventKind {
    /// [`WatchEvent::Changed`]
    Changed,
    /// [`WatchEvent::Invalidated`]
    Invalidated,
}

impl Event for WatchEvent {
    type Kind = WatchEventKind;

    fn kind(&self) -> WatchEventKind {
        match self {
            Self::Changed { .. } => WatchEventKind::Changed,
            Self::Invalidated => WatchEventKind::Invalidated,
        }
    }
}

/// Feed of [`WatchEvent`]s, returned by [`crate::DatArchive::watch`].
pub type WatchFeed = EventFeed<WatchEvent>;

/// One or more glob patterns selecting the paths to watch.
///
/// `*` matches within a path segment, patterns without glob syntax match literally.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PatternSpec(Vec<String>);

impl PatternSpec {
    /// The patterns.
    pub fn patterns(&self) -> &[String] {
        &self.0
    }
}

impl From<&str> for PatternSpec {
    fn from(value: &str) -> Self {
        Self(vec![value.to_string()])
    }
}

impl From<String> for PatternSpec {
    fn from(value: String) -> Self {
        Self(vec![value])
    }
}

impl From<Vec<String>> for PatternSpec {
    fn from(value: Vec<String>) -> Self {
        Self(value)
    }
}

impl From<Vec<&str>> for PatternSpec {
    fn from(value: Vec<&str>) -> Self {
        Self(value.into_iter().map(ToString::to_string).collect())
    }
}

impl<const N: usize> From<[&str; N]> for PatternSpec {
    fn from(value: [&str; N]) -> Self {
        Self(value.into_iter().map(ToString::to_string).collect())
    }
}

/// Arguments of [`crate::DatArchive::watch`].
///
/// Either a pattern spec with an optional invalidation callback, or only an invalidation
/// callback.
#[derive(Clone)]
pub enum WatchArgs {
    /// Watch the paths matching `pattern`, all paths if `None`.
    Pattern {
        /// Paths to watch.
        pattern: Option<PatternSpec>,
        /// Called once the feed is invalidated.
        on_invalidated: Option<Listener<WatchEvent>>,
    },
    /// Watch all paths, calling the callback once the feed is invalidated.
    Invalidated(Listener<WatchEvent>),
}

impl fmt::Debug for WatchArgs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pattern {
                pattern,
                on_invalidated,
            } => f
                .debug_struct("Pattern")
                .field("pattern", pattern)
                .field("on_invalidated", &on_invalidated.is_some())
                .finish(),
            Self::Invalidated(_) => f.debug_tuple("Invalidated").finish(),
        }
    }
}

impl Default for WatchArgs {
    fn default() -> Self {
        Self::all()
    }
}

impl WatchArgs {
    /// Watch all paths.
    pub fn all() -> Self {
        Self::Pattern {
            pattern: None,
            on_invalidated: None,
        }
    }

    /// Watch the paths matching `pattern`.
    pub fn pattern(pattern: impl Into<PatternSpec>) -> Self {
        Self::Pattern {
            pattern: Some(pattern.into()),
            on_invalidated: None,
        }
    }

    /// Watch all paths and call `callback` once the feed is invalidated.
    pub fn invalidated(callback: impl Fn(&WatchEvent) + Send + Sync + 'static) -> Self {
        Self::Invalidated(Arc::new(callback))
    }

    /// Adds an invalidation callback.
    pub fn with_invalidated(self, callback: impl Fn(&WatchEvent) + Send + Sync + 'static) -> Self {
        let pattern = match self {
            Self::Pattern { pattern, .. } => pattern,
            Self::Invalidated(_) => None,
        };
        Self::Pattern {
            pattern,
            on_invalidated: Some(Arc::new(callback)),
        }
    }

    pub(crate) fn into_parts(self) -> (Option<PatternSpec>, Option<Listener<WatchEvent>>) {
        match self {
            Self::Pattern {
                pattern,
                on_invalidated,
            } => (pattern, on_invalidated),
            Self::Invalidated(callback) => (None, Some(callback)),
        }
    }
}

impl From<&str> for WatchArgs {
    fn from(value: &str) -> Self {
        Self::pattern(value)
    }
}

impl From<String> for WatchArgs {
    fn from(value: String) -> Self {
        Self::pattern(value)
    }
}

impl From<Vec<String>> for WatchArgs {
    fn from(value: Vec<String>) -> Self {
        Self::pattern(value)
    }
}

impl From<Vec<&str>> for WatchArgs {
    fn from(value: Vec<&str>) -> Self {
        Self::pattern(value)
    }
}

impl<const N: usize> From<[&str; N]> for WatchArgs {
    fn from(value: [&str; N]) -> Self {
        Self::pattern(value)
    }
}

impl From<Option<PatternSpec>> for WatchArgs {
    fn from(value: Option<PatternSpec>) -> Self {
        Self::Pattern {
            pattern: value,
            on_invalidated: None,
        }
    }
}

#[derive(Debug, Clone)]
enum Matcher {
    Glob(Pattern),
    Literal(String),
}

/// Compiled [`PatternSpec`].
#[derive(Debug, Clone, Default)]
pub(crate) struct PathMatcher {
    /// `None` matches everything.
    matchers: Option<Vec<Matcher>>,
}

const MATCH_OPTIONS: MatchOptions = MatchOptions {
    case_sensitive: true,
    require_literal_separator: true,
    require_literal_leading_dot: false,
};

impl PathMatcher {
    pub fn new(spec: Option<&PatternSpec>) -> Self {
        let matchers = spec.map(|spec| {
            spec.patterns()
                .iter()
                .map(|p| {
                    let p = if p.starts_with('/') {
                        p.clone()
                    } else {
                        format!("/{p}")
                    };
                    if !p.contains(['*', '?', '[']) {
                        return Matcher::Literal(p);
                    }
                    match Pattern::new(&p) {
                        Ok(glob) => Matcher::Glob(glob),
                        Err(_) => Matcher::Literal(p),
                    }
                })
                .collect()
        });
        Self { matchers }
    }

    pub fn matches(&self, path: &str) -> bool {
        let Some(matchers) = &self.matchers else {
            return true;
        };
        matchers.iter().any(|m| match m {
            Matcher::Glob(glob) => glob.matches_with(path, MATCH_OPTIONS),
            Matcher::Literal(literal) => literal == path,
        })
    }
}

/// Turns raw change records into the events of a watch feed.
pub(crate) fn changes(
    records: mpsc::UnboundedReceiver<Record>,
    matcher: PathMatcher,
) -> impl Stream<Item = WatchEvent> + Send + 'static {
    UnboundedReceiverStream::new(records)
        .filter(move |record| futures::future::ready(matcher.matches(&record.name)))
        .map(|record| WatchEvent::Changed { path: record.name })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn matcher(spec: impl Into<PatternSpec>) -> PathMatcher {
        PathMatcher::new(Some(&spec.into()))
    }

    #[test]
    fn match_all() {
        let all = PathMatcher::new(None);
        assert!(all.matches("/a.txt"));
        assert!(all.matches("/deep/down/b.md"));
    }

    #[test]
    fn match_literal() {
        let m = matcher("/a.txt");
        assert!(m.matches("/a.txt"));
        assert!(!m.matches("/b.txt"));
        assert!(!m.matches("/sub/a.txt"));
        // leading slash is optional in patterns
        assert!(matcher("a.txt").matches("/a.txt"));
    }

    #[test]
    fn match_glob_within_segment() {
        let m = matcher("/*.txt");
        assert!(m.matches("/a.txt"));
        assert!(m.matches("/c.txt"));
        assert!(!m.matches("/sub/a.txt"));
        assert!(!m.matches("/a.md"));
        assert!(matcher("/**/*.txt").matches("/sub/deep/a.txt"));
    }

    #[test]
    fn match_array() {
        let m = matcher(["/a.txt", "/c.txt"]);
        assert!(m.matches("/a.txt"));
        assert!(!m.matches("/b.txt"));
        assert!(m.matches("/c.txt"));
    }

    #[test]
    fn invalid_glob_is_literal() {
        let m = matcher("/[oops.txt");
        assert!(m.matches("/[oops.txt"));
        assert!(!m.matches("/o.txt"));
    }

    #[test]
    fn args_shapes() {
        let (pattern, cb) = WatchArgs::from("/a.txt").into_parts();
        assert_eq!(pattern, Some(PatternSpec::from("/a.txt")));
        assert!(cb.is_none());

        let (pattern, cb) = WatchArgs::invalidated(|_| {}).into_parts();
        assert!(pattern.is_none());
        assert!(cb.is_some());

        let (pattern, cb) = WatchArgs::from(vec!["/a", "/b"])
            .with_invalidated(|_| {})
            .into_parts();
        assert_eq!(pattern.map(|p| p.patterns().len()), Some(2));
        assert!(cb.is_some());
    }

    #[test]
    fn event_kinds() {
        assert_eq!(WatchEventKind::Changed.to_string(), "changed");
        assert_eq!(WatchEventKind::Invalidated.to_string(), "invalidated");
        assert_eq!(WatchEvent::Invalidated.kind(), WatchEventKind::Invalidated);
    }
}

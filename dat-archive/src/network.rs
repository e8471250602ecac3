//! Network activity of an archive.

use futures::{Stream, StreamExt};
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;

use crate::{
    engine::{Feed, FeedEvent},
    feed::{Event, EventFeed},
};

/// An event of a [`NetworkActivityFeed`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NetworkEvent {
    /// The number of connected peers changed.
    NetworkChanged {
        /// Number of peers now connected.
        peers: usize,
    },
    /// A block was received.
    Download {
        /// The feed the block belongs to.
        feed: Feed,
        /// Index of the block in its feed.
        index: u64,
    },
    /// A feed is fully replicated.
    Sync {
        /// The feed that is complete.
        feed: Feed,
    },
}

/// The kinds of [`NetworkEvent`]s listeners can register for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display)]
#[strum(serialize_all = "kebab-case")]
pub enum NetworkEventKind {
    /// [`NetworkEvent::NetworkChanged`]
    NetworkChanged,
    /// [`NetworkEvent::Download`]
    Download,
    /// [`NetworkEvent::Sync`]
    Sync,
}

impl Event for NetworkEvent {
    type Kind = NetworkEventKind;

    fn kind(&self) -> NetworkEventKind {
        match self {
            Self::NetworkChanged { .. } => NetworkEventKind::NetworkChanged,
            Self::Download { .. } => NetworkEventKind::Download,
            Self::Sync { .. } => NetworkEventKind::Sync,
        }
    }
}

impl From<FeedEvent> for NetworkEvent {
    fn from(event: FeedEvent) -> Self {
        match event {
            FeedEvent::PeersChanged { peers } => Self::NetworkChanged { peers },
            FeedEvent::Download { feed, index } => Self::Download { feed, index },
            FeedEvent::Sync { feed } => Self::Sync { feed },
        }
    }
}

/// Feed of [`NetworkEvent`]s, returned by [`crate::DatArchive::create_network_activity_stream`].
pub type NetworkActivityFeed = EventFeed<NetworkEvent>;

pub(crate) fn activity(
    events: mpsc::UnboundedReceiver<FeedEvent>,
) -> impl Stream<Item = NetworkEvent> + Send + 'static {
    UnboundedReceiverStream::new(events).map(NetworkEvent::from)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_are_tagged_with_their_feed() {
        let download: NetworkEvent = FeedEvent::Download {
            feed: Feed::Content,
            index: 3,
        }
        .into();
        assert_eq!(download.kind(), NetworkEventKind::Download);
        assert_eq!(
            download,
            NetworkEvent::Download {
                feed: Feed::Content,
                index: 3
            }
        );
        let sync: NetworkEvent = FeedEvent::Sync {
            feed: Feed::Metadata,
        }
        .into();
        assert_eq!(sync.kind().to_string(), "sync");
        assert_eq!(NetworkEventKind::NetworkChanged.to_string(), "network-changed");
        assert_eq!(Feed::Metadata.to_string(), "metadata");
    }
}

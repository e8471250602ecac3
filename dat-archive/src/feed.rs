//! Listener based event feeds.
//!
//! An [`EventFeed`] pumps events from an engine subscription to the listeners registered
//! for their kind. Listeners are called one after another on the pump task, in the order
//! the events arrived.

use std::{
    collections::BTreeMap,
    fmt,
    hash::Hash,
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        Arc,
    },
};

use futures::{Stream, StreamExt};
use parking_lot::Mutex;
use tokio_util::task::AbortOnDropHandle;
use tracing::{debug, trace, Instrument};

/// An event delivered through an [`EventFeed`].
pub trait Event: fmt::Debug + Send + Sync + 'static {
    /// The discriminant listeners register for.
    type Kind: fmt::Debug + Copy + Eq + Hash + Send + Sync + 'static;

    /// The kind of this event.
    fn kind(&self) -> Self::Kind;
}

/// A callback for events of an [`EventFeed`].
pub type Listener<T> = Arc<dyn Fn(&T) + Send + Sync + 'static>;

/// Token needed to remove inserted listeners.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RemovalToken(u64);

struct Shared<T: Event> {
    listeners: Mutex<BTreeMap<u64, (T::Kind, Listener<T>)>>,
    next_id: AtomicU64,
    closed: AtomicBool,
}

impl<T: Event> Shared<T> {
    fn dispatch(&self, event: &T) {
        let kind = event.kind();
        // call listeners without holding the lock, they may add or remove listeners
        let listeners: Vec<_> = self
            .listeners
            .lock()
            .values()
            .filter(|(k, _)| *k == kind)
            .map(|(_, listener)| listener.clone())
            .collect();
        trace!(?event, listeners = listeners.len(), "dispatch");
        for listener in listeners {
            if self.closed.load(Ordering::SeqCst) {
                return;
            }
            listener(event);
        }
    }
}

/// A feed of events that listeners can be attached to.
///
/// Closing the feed, explicitly or by dropping it, detaches it from its source.
pub struct EventFeed<T: Event> {
    shared: Arc<Shared<T>>,
    task: Mutex<Option<AbortOnDropHandle<()>>>,
}

impl<T: Event> fmt::Debug for EventFeed<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventFeed")
            .field("listeners", &self.shared.listeners.lock().len())
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl<T: Event> EventFeed<T> {
    /// Creates a feed that is not yet attached to a source.
    pub(crate) fn new() -> Self {
        Self {
            shared: Arc::new(Shared {
                listeners: Default::default(),
                next_id: AtomicU64::new(0),
                closed: AtomicBool::new(false),
            }),
            task: Mutex::new(None),
        }
    }

    /// Starts delivering the events of `source`.
    ///
    /// When `source` ends without the feed being closed, `on_end` is delivered as the last
    /// event.
    pub(crate) fn attach<S>(&self, source: S, on_end: Option<T>, span: tracing::Span)
    where
        S: Stream<Item = T> + Send + 'static,
    {
        let shared = self.shared.clone();
        let pump = async move {
            debug!("feed opened");
            tokio::pin!(source);
            while let Some(event) = source.next().await {
                if shared.closed.load(Ordering::SeqCst) {
                    return;
                }
                shared.dispatch(&event);
            }
            if !shared.closed.load(Ordering::SeqCst) {
                debug!("source ended");
                if let Some(event) = on_end {
                    shared.dispatch(&event);
                }
            }
        };
        let handle = tokio::task::spawn(pump.instrument(span));
        *self.task.lock() = Some(AbortOnDropHandle::new(handle));
    }

    /// Calls `listener` for every event of `kind`.
    pub fn add_listener(
        &self,
        kind: T::Kind,
        listener: impl Fn(&T) + Send + Sync + 'static,
    ) -> RemovalToken {
        let id = self.shared.next_id.fetch_add(1, Ordering::Relaxed);
        let listener: Listener<T> = Arc::new(listener);
        self.shared.listeners.lock().insert(id, (kind, listener));
        RemovalToken(id)
    }

    /// Removes a listener. Returns whether it was still registered.
    pub fn remove_listener(&self, token: RemovalToken) -> bool {
        self.shared.listeners.lock().remove(&token.0).is_some()
    }

    /// Stops delivery and detaches from the source.
    ///
    /// Closing an already closed feed does nothing.
    pub fn close(&self) {
        if self.shared.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        // dropping the handle aborts the pump
        self.task.lock().take();
        self.shared.listeners.lock().clear();
        debug!("feed closed");
    }

    /// Whether [`Self::close`] was called.
    pub fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio::sync::mpsc;

    use super::*;

    #[derive(Debug, Clone, PartialEq, Eq, strum::EnumDiscriminants)]
    #[strum_discriminants(name(TestKind), derive(Hash))]
    enum TestEvent {
        Number(u32),
        Done,
    }

    impl Event for TestEvent {
        type Kind = TestKind;

        fn kind(&self) -> TestKind {
            self.into()
        }
    }

    fn feed() -> (mpsc::UnboundedSender<TestEvent>, EventFeed<TestEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let feed = EventFeed::new();
        let source = tokio_stream::wrappers::UnboundedReceiverStream::new(rx);
        feed.attach(source, Some(TestEvent::Done), tracing::Span::none());
        (tx, feed)
    }

    fn collect(feed: &EventFeed<TestEvent>, kind: TestKind) -> Arc<Mutex<Vec<TestEvent>>> {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let s = seen.clone();
        feed.add_listener(kind, move |e| s.lock().push(e.clone()));
        seen
    }

    #[tokio::test]
    async fn delivers_in_order_by_kind() {
        let (tx, feed) = feed();
        let numbers = collect(&feed, TestKind::Number);
        let done = collect(&feed, TestKind::Done);
        for i in 0..5 {
            tx.send(TestEvent::Number(i)).unwrap();
        }
        drop(tx);
        dat_archive_test::eventually(Duration::from_secs(2), || done.lock().len() == 1)
            .await
            .unwrap();
        let numbers: Vec<_> = numbers.lock().clone();
        assert_eq!(numbers, (0..5).map(TestEvent::Number).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn removed_listeners_are_not_called() {
        let (tx, feed) = feed();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let s = seen.clone();
        let token = feed.add_listener(TestKind::Number, move |e| s.lock().push(e.clone()));
        let done = collect(&feed, TestKind::Done);
        assert!(feed.remove_listener(token));
        assert!(!feed.remove_listener(token));
        tx.send(TestEvent::Number(1)).unwrap();
        drop(tx);
        dat_archive_test::eventually(Duration::from_secs(2), || done.lock().len() == 1)
            .await
            .unwrap();
        assert!(seen.lock().is_empty());
    }

    #[tokio::test]
    async fn close_is_idempotent_and_suppresses_end() {
        let (tx, feed) = feed();
        let done = collect(&feed, TestKind::Done);
        feed.close();
        feed.close();
        assert!(feed.is_closed());
        drop(tx);
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(done.lock().is_empty());
    }
}

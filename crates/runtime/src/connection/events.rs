//! Connection event fan-out.
//!
//! Listeners register per [`EventKind`] and run in insertion order. Storage is
//! an [`IndexMap`] per kind for O(1) removal with stable ordering; each
//! registration returns a [`Subscription`] that unregisters on drop.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use indexmap::IndexMap;
use parking_lot::Mutex;
use pw_test_protocol::{ServerEvent, ServerEventKind};
use tokio::sync::mpsc;

use crate::error::Error;

/// Unique identifier for event listeners.
pub type ListenerId = u64;

static NEXT_LISTENER_ID: AtomicU64 = AtomicU64::new(1);

fn next_listener_id() -> ListenerId {
	NEXT_LISTENER_ID.fetch_add(1, Ordering::SeqCst)
}

/// Everything a connection reports to its owner.
#[derive(Debug, Clone)]
pub enum ConnectionEvent {
	/// Unsolicited message from the server.
	Server(ServerEvent),
	/// Transport, framing, or process error.
	Error(Arc<Error>),
	/// The connection or its backend process closed. Fires at most once.
	Close,
}

/// Subscription key for [`ConnectionEvent`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
	Server(ServerEventKind),
	Error,
	Close,
}

impl EventKind {
	/// Every kind, for subscribers that want the whole stream.
	pub const ALL: [EventKind; 8] = [
		EventKind::Server(ServerEventKind::Report),
		EventKind::Server(ServerEventKind::Stdio),
		EventKind::Server(ServerEventKind::ListChanged),
		EventKind::Server(ServerEventKind::TestFilesChanged),
		EventKind::Server(ServerEventKind::LoadTraceRequested),
		EventKind::Server(ServerEventKind::Other),
		EventKind::Error,
		EventKind::Close,
	];
}

impl ConnectionEvent {
	pub fn kind(&self) -> EventKind {
		match self {
			ConnectionEvent::Server(event) => EventKind::Server(event.kind()),
			ConnectionEvent::Error(_) => EventKind::Error,
			ConnectionEvent::Close => EventKind::Close,
		}
	}
}

/// Listener callback.
pub type Listener = Arc<dyn Fn(&ConnectionEvent) + Send + Sync>;

type ListenerMap = HashMap<EventKind, IndexMap<ListenerId, Listener>>;

struct HubInner {
	listeners: Mutex<ListenerMap>,
	closed: AtomicBool,
}

/// Shared event dispatcher for one client.
///
/// Created before the backend process is spawned so process errors and exit
/// can be reported even when no connection was ever established.
#[derive(Clone)]
pub struct EventHub {
	inner: Arc<HubInner>,
}

impl Default for EventHub {
	fn default() -> Self {
		Self::new()
	}
}

impl EventHub {
	pub fn new() -> Self {
		Self {
			inner: Arc::new(HubInner {
				listeners: Mutex::new(HashMap::new()),
				closed: AtomicBool::new(false),
			}),
		}
	}

	/// Registers `listener` for one event kind.
	pub fn on<F>(&self, kind: EventKind, listener: F) -> Subscription
	where
		F: Fn(&ConnectionEvent) + Send + Sync + 'static,
	{
		let id = next_listener_id();
		self.inner
			.listeners
			.lock()
			.entry(kind)
			.or_default()
			.insert(id, Arc::new(listener));

		let weak: Weak<HubInner> = Arc::downgrade(&self.inner);
		Subscription {
			id,
			kinds: vec![kind],
			hub: Some(weak),
		}
	}

	/// Forwards every event of the given kinds to an ordered async stream.
	///
	/// Use this when the consumer has to await between events.
	pub fn stream(&self, kinds: &[EventKind]) -> EventStream {
		let (tx, rx) = mpsc::unbounded_channel();
		let id = next_listener_id();
		{
			let mut listeners = self.inner.listeners.lock();
			for kind in kinds {
				let tx = tx.clone();
				let listener: Listener = Arc::new(move |event: &ConnectionEvent| {
					let _ = tx.send(event.clone());
				});
				listeners.entry(*kind).or_default().insert(id, listener);
			}
		}
		EventStream {
			rx,
			_subscription: Subscription {
				id,
				kinds: kinds.to_vec(),
				hub: Some(Arc::downgrade(&self.inner)),
			},
		}
	}

	/// Delivers `event` to its listeners in registration order.
	///
	/// [`ConnectionEvent::Close`] is delivered only the first time.
	pub fn emit(&self, event: ConnectionEvent) {
		if matches!(event, ConnectionEvent::Close) && self.inner.closed.swap(true, Ordering::SeqCst)
		{
			return;
		}

		// Snapshot so listeners may subscribe or unsubscribe re-entrantly.
		let listeners: Vec<Listener> = self
			.inner
			.listeners
			.lock()
			.get(&event.kind())
			.map(|map| map.values().cloned().collect())
			.unwrap_or_default();

		for listener in listeners {
			listener(&event);
		}
	}

	pub fn emit_error(&self, error: Error) {
		self.emit(ConnectionEvent::Error(Arc::new(error)));
	}

	pub fn emit_close(&self) {
		self.emit(ConnectionEvent::Close);
	}

	pub fn is_closed(&self) -> bool {
		self.inner.closed.load(Ordering::SeqCst)
	}

	pub fn listener_count(&self, kind: EventKind) -> usize {
		self.inner
			.listeners
			.lock()
			.get(&kind)
			.map_or(0, IndexMap::len)
	}
}

/// RAII handle that unregisters a listener on drop.
///
/// Holds a weak reference to the hub, so dropping after the hub is gone is a no-op.
pub struct Subscription {
	id: ListenerId,
	kinds: Vec<EventKind>,
	hub: Option<Weak<HubInner>>,
}

impl Subscription {
	pub fn id(&self) -> ListenerId {
		self.id
	}

	/// Explicitly unsubscribes. Equivalent to dropping.
	pub fn unsubscribe(mut self) {
		self.release();
	}

	/// Keeps the listener registered for the lifetime of the hub.
	pub fn detach(mut self) {
		self.hub = None;
	}

	fn release(&mut self) {
		let Some(hub) = self.hub.take().and_then(|weak| weak.upgrade()) else {
			return;
		};
		let mut listeners = hub.listeners.lock();
		for kind in &self.kinds {
			if let Some(map) = listeners.get_mut(kind) {
				map.shift_remove(&self.id);
			}
		}
	}
}

impl Drop for Subscription {
	fn drop(&mut self) {
		self.release();
	}
}

impl std::fmt::Debug for Subscription {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("Subscription")
			.field("id", &self.id)
			.field("kinds", &self.kinds)
			.finish()
	}
}

/// Ordered stream of connection events.
pub struct EventStream {
	rx: mpsc::UnboundedReceiver<ConnectionEvent>,
	_subscription: Subscription,
}

impl EventStream {
	/// Waits for the next event. Returns `None` once the hub is dropped.
	pub async fn recv(&mut self) -> Option<ConnectionEvent> {
		self.rx.recv().await
	}

	/// Returns an already queued event without waiting.
	pub fn try_recv(&mut self) -> Option<ConnectionEvent> {
		self.rx.try_recv().ok()
	}
}

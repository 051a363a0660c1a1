//! Per-adapter event bus.
//!
//! Each event name holds at most one listener: `on` for a name that already
//! has one replaces it. Callers that need several subscribers fan out inside
//! their own listener. The error channel is kept apart from the event
//! channels and is the terminal sink for adapter failures.

use dashmap::DashMap;
use futures_util::future::BoxFuture;
use gb_core::{EventName, GameEvent, GameKind};
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use time::OffsetDateTime;
use tracing::{debug, error, trace};

use crate::error::AdapterError;

pub type EventListener = Arc<dyn Fn(GameEvent) -> BoxFuture<'static, ()> + Send + Sync>;
pub type ErrorListener = Arc<dyn Fn(AdapterError) -> BoxFuture<'static, ()> + Send + Sync>;

/// Handle returned by `on`, used to remove exactly that registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

struct Registration<L> {
    id: ListenerId,
    listener: L,
}

pub struct Emitter {
    game: GameKind,
    listeners: DashMap<EventName, Registration<EventListener>>,
    error_listener: RwLock<Option<Registration<ErrorListener>>>,
    next_id: AtomicU64,
}

impl Emitter {
    pub fn new(game: GameKind) -> Self {
        Self {
            game,
            listeners: DashMap::new(),
            error_listener: RwLock::new(None),
            next_id: AtomicU64::new(1),
        }
    }

    pub fn game(&self) -> GameKind {
        self.game
    }

    fn next_id(&self) -> ListenerId {
        ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed))
    }

    /// Registers the listener for `name`, replacing any previous one.
    pub fn on<F, Fut>(&self, name: EventName, listener: F) -> ListenerId
    where
        F: Fn(GameEvent) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let id = self.next_id();
        let listener: EventListener = Arc::new(move |event| Box::pin(listener(event)));
        if self
            .listeners
            .insert(name, Registration { id, listener })
            .is_some()
        {
            debug!(game = %self.game, event = %name, "replaced existing listener");
        }
        id
    }

    /// Removes the listener for `name` if `id` is still the registered one.
    pub fn off(&self, name: EventName, id: ListenerId) {
        self.listeners.remove_if(&name, |_, reg| reg.id == id);
    }

    pub fn has_listener(&self, name: EventName) -> bool {
        self.listeners.contains_key(&name)
    }

    /// Publishes `event` to its listener, stamping the timestamp if missing.
    /// Events without a listener are dropped.
    pub async fn emit(&self, mut event: GameEvent) {
        event.stamp(OffsetDateTime::now_utc());
        let name = event.name();
        // Clone the handle out so the registry is not held across the await.
        let listener = self.listeners.get(&name).map(|reg| reg.listener.clone());
        match listener {
            Some(listener) => listener(event).await,
            None => trace!(game = %self.game, event = %name, "no listener, event dropped"),
        }
    }

    pub fn on_error<F, Fut>(&self, listener: F) -> ListenerId
    where
        F: Fn(AdapterError) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let id = self.next_id();
        let listener: ErrorListener = Arc::new(move |err| Box::pin(listener(err)));
        let mut slot = self
            .error_listener
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        *slot = Some(Registration { id, listener });
        id
    }

    pub fn off_error(&self, id: ListenerId) {
        let mut slot = self
            .error_listener
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        if slot.as_ref().is_some_and(|reg| reg.id == id) {
            *slot = None;
        }
    }

    pub fn has_error_listener(&self) -> bool {
        self.error_listener
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    /// Delivers `err` to the error listener.
    ///
    /// With nobody listening the error is logged at error level and handed
    /// back so the caller can propagate it.
    pub async fn emit_error(&self, err: AdapterError) -> Result<(), AdapterError> {
        let listener = self
            .error_listener
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .map(|reg| reg.listener.clone());
        match listener {
            Some(listener) => {
                listener(err).await;
                Ok(())
            }
            None => {
                error!(game = %self.game, error = %err, "adapter error with no error listener attached");
                Err(err)
            }
        }
    }
}

impl std::fmt::Debug for Emitter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Emitter")
            .field("game", &self.game)
            .field("listeners", &self.listeners.len())
            .field("has_error_listener", &self.has_error_listener())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    fn recorder() -> (
        Arc<Mutex<Vec<GameEvent>>>,
        impl Fn(GameEvent) -> BoxFuture<'static, ()> + Send + Sync + 'static,
    ) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let listener = move |event: GameEvent| -> BoxFuture<'static, ()> {
            let sink = sink.clone();
            Box::pin(async move {
                sink.lock().unwrap().push(event);
            })
        };
        (seen, listener)
    }

    #[tokio::test]
    async fn test_emit_stamps_and_delivers() {
        let emitter = Emitter::new(GameKind::Mock);
        let (seen, listener) = recorder();
        emitter.on(EventName::LogLine, listener);

        emitter.emit(GameEvent::log_line("hello")).await;

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert!(seen[0].timestamp().is_some());
    }

    #[tokio::test]
    async fn test_on_replaces_previous_listener() {
        let emitter = Emitter::new(GameKind::Mock);
        let (first, l1) = recorder();
        let (second, l2) = recorder();
        emitter.on(EventName::LogLine, l1);
        emitter.on(EventName::LogLine, l2);

        emitter.emit(GameEvent::log_line("x")).await;

        assert!(first.lock().unwrap().is_empty());
        assert_eq!(second.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_off_is_idempotent_and_ignores_stale_ids() {
        let emitter = Emitter::new(GameKind::Mock);
        let (_, l1) = recorder();
        let (seen, l2) = recorder();
        let stale = emitter.on(EventName::LogLine, l1);
        let current = emitter.on(EventName::LogLine, l2);

        emitter.off(EventName::LogLine, stale);
        assert!(emitter.has_listener(EventName::LogLine));

        emitter.off(EventName::LogLine, current);
        emitter.off(EventName::LogLine, current);
        assert!(!emitter.has_listener(EventName::LogLine));

        emitter.emit(GameEvent::log_line("dropped")).await;
        assert!(seen.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_emit_error_without_listener_hands_error_back() {
        let emitter = Emitter::new(GameKind::Rust);
        let err = AdapterError::NotConnected {
            game: GameKind::Rust,
        };
        assert!(!emitter.has_error_listener());
        assert_eq!(emitter.emit_error(err.clone()).await, Err(err));
    }

    #[tokio::test]
    async fn test_emit_error_with_listener_is_consumed() {
        let emitter = Emitter::new(GameKind::Rust);
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let id = emitter.on_error(move |err| {
            let sink = sink.clone();
            async move { sink.lock().unwrap().push(err) }
        });

        let err = AdapterError::NotConnected {
            game: GameKind::Rust,
        };
        assert_eq!(emitter.emit_error(err.clone()).await, Ok(()));
        assert_eq!(seen.lock().unwrap().as_slice(), &[err]);

        emitter.off_error(id);
        assert!(!emitter.has_error_listener());
    }
}

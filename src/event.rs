//! Synchronous typed event channels.
//!
//! Proxies and project instances expose a small fixed set of channels
//! (`config_update`, `schema_update`, `status_update`, `save_project`)
//! instead of per-attribute notifications. Listeners run synchronously on
//! the coordinator thread and must not block.
//!
//! The listener list is snapshotted before invocation, so a listener may
//! subscribe or unsubscribe (itself included) while being notified.

use std::sync::Arc;

use parking_lot::Mutex;

/// Token returned by [`EventChannel::subscribe`]; pass back to
/// [`EventChannel::unsubscribe`] to remove the listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Subscription(u64);

type Listener<T> = Arc<dyn Fn(&T) + Send + Sync>;

/// A synchronous fan-out channel for one kind of event payload.
pub struct EventChannel<T> {
    inner: Mutex<ChannelState<T>>,
}

struct ChannelState<T> {
    listeners: Vec<(u64, Listener<T>)>,
    next_id: u64,
}

impl<T> Default for EventChannel<T> {
    fn default() -> Self {
        EventChannel::new()
    }
}

impl<T> EventChannel<T> {
    /// An empty channel.
    pub fn new() -> Self {
        EventChannel {
            inner: Mutex::new(ChannelState { listeners: Vec::new(), next_id: 0 }),
        }
    }

    /// Register `listener`; it is invoked synchronously on every emit until
    /// unsubscribed.
    pub fn subscribe(&self, listener: impl Fn(&T) + Send + Sync + 'static) -> Subscription {
        let mut state = self.inner.lock();
        let id = state.next_id;
        state.next_id += 1;
        state.listeners.push((id, Arc::new(listener)));
        Subscription(id)
    }

    /// Remove a previously registered listener. Unknown tokens are ignored.
    pub fn unsubscribe(&self, token: Subscription) {
        let mut state = self.inner.lock();
        state.listeners.retain(|(id, _)| *id != token.0);
    }

    /// Number of currently registered listeners.
    pub fn listener_count(&self) -> usize {
        self.inner.lock().listeners.len()
    }

    /// Deliver `payload` to every listener, in subscription order.
    pub fn emit(&self, payload: &T) {
        let snapshot: Vec<Listener<T>> = {
            let state = self.inner.lock();
            state.listeners.iter().map(|(_, l)| Arc::clone(l)).collect()
        };
        for listener in snapshot {
            listener(payload);
        }
    }
}

impl<T> std::fmt::Debug for EventChannel<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventChannel")
            .field("listeners", &self.listener_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn emit_reaches_all_listeners_in_order() {
        let channel = EventChannel::<i32>::new();
        let seen = Arc::new(Mutex::new(Vec::new()));

        for tag in 0..3 {
            let seen = Arc::clone(&seen);
            channel.subscribe(move |v: &i32| seen.lock().push((tag, *v)));
        }

        channel.emit(&7);
        assert_eq!(&*seen.lock(), &[(0, 7), (1, 7), (2, 7)]);
    }

    #[test]
    fn unsubscribe_stops_delivery() {
        let channel = EventChannel::<()>::new();
        let count = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&count);
        let token = channel.subscribe(move |_| {
            c.fetch_add(1, Ordering::SeqCst);
        });

        channel.emit(&());
        channel.unsubscribe(token);
        channel.emit(&());
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn listener_may_unsubscribe_during_emit() {
        let channel = Arc::new(EventChannel::<()>::new());
        let count = Arc::new(AtomicUsize::new(0));

        let chan = Arc::clone(&channel);
        let c = Arc::clone(&count);
        let token = Arc::new(Mutex::new(None::<Subscription>));
        let token_ref = Arc::clone(&token);
        let sub = channel.subscribe(move |_| {
            c.fetch_add(1, Ordering::SeqCst);
            if let Some(t) = *token_ref.lock() {
                chan.unsubscribe(t);
            }
        });
        *token.lock() = Some(sub);

        channel.emit(&());
        channel.emit(&());
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }
}

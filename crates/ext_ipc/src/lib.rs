//! ext_ipc - Event listeners and message payloads for the chrome runtime shim.
//!
//! `chrome.runtime.onMessage`, `onMessageExternal` and `onUpdateAvailable` are
//! all plain observer lists: listeners are registered, can be removed by
//! subscription id, and are invoked synchronously in registration order.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

// ============================================================================
// Subscriptions
// ============================================================================

/// Identifies one registered listener on one event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SubscriptionId(u64);

impl SubscriptionId {
    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sub-{}", self.0)
    }
}

type Listener<T> = Arc<dyn Fn(&T) + Send + Sync>;

// ============================================================================
// RuntimeEvent
// ============================================================================

/// An ordered observer list.
///
/// Dispatch works on a snapshot of the listener list, so a listener may add or
/// remove listeners (including itself) while it is being invoked. Changes made
/// during a dispatch take effect on the next dispatch.
pub struct RuntimeEvent<T> {
    name: &'static str,
    next_id: AtomicU64,
    listeners: Mutex<Vec<(SubscriptionId, Listener<T>)>>,
}

impl<T> RuntimeEvent<T> {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            next_id: AtomicU64::new(1),
            listeners: Mutex::new(Vec::new()),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Register a listener and return its subscription id.
    pub fn add_listener<F>(&self, listener: F) -> SubscriptionId
    where
        F: Fn(&T) + Send + Sync + 'static,
    {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::SeqCst));
        self.lock().push((id, Arc::new(listener)));
        debug!(event = self.name, subscription = %id, "event.add_listener");
        id
    }

    /// Remove a listener. Returns false if the id was not registered.
    pub fn remove_listener(&self, id: SubscriptionId) -> bool {
        let mut listeners = self.lock();
        let before = listeners.len();
        listeners.retain(|(sub, _)| *sub != id);
        let removed = listeners.len() != before;
        debug!(event = self.name, subscription = %id, removed, "event.remove_listener");
        removed
    }

    pub fn has_listener(&self, id: SubscriptionId) -> bool {
        self.lock().iter().any(|(sub, _)| *sub == id)
    }

    pub fn has_listeners(&self) -> bool {
        !self.lock().is_empty()
    }

    pub fn listener_count(&self) -> usize {
        self.lock().len()
    }

    /// Invoke every registered listener with `args`, in registration order.
    ///
    /// Returns how many listeners ran.
    pub fn invoke_listeners(&self, args: &T) -> usize {
        let snapshot: Vec<Listener<T>> = self
            .lock()
            .iter()
            .map(|(_, listener)| Arc::clone(listener))
            .collect();

        debug!(event = self.name, listeners = snapshot.len(), "event.dispatch");
        for listener in &snapshot {
            listener(args);
        }
        snapshot.len()
    }

    /// Alias of [`RuntimeEvent::invoke_listeners`].
    pub fn dispatch(&self, args: &T) -> usize {
        self.invoke_listeners(args)
    }

    fn lock(&self) -> MutexGuard<'_, Vec<(SubscriptionId, Listener<T>)>> {
        // A listener that panicked mid-registration leaves the list intact.
        self.listeners.lock().unwrap_or_else(|poisoned| {
            warn!(event = self.name, "listener list lock poisoned, recovering");
            poisoned.into_inner()
        })
    }
}

impl<T> fmt::Debug for RuntimeEvent<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RuntimeEvent")
            .field("name", &self.name)
            .field("listeners", &self.listener_count())
            .finish()
    }
}

// ============================================================================
// Message Types
// ============================================================================

/// Who sent a runtime message.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageSender {
    /// Package id of the sender (absent for messages from web pages)
    pub id: Option<String>,
    /// URL of the page or frame that sent the message
    pub url: Option<String>,
    /// Host window the message came from
    pub window_id: Option<String>,
}

/// Payload delivered to `onMessage` / `onMessageExternal` listeners.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuntimeMessage {
    pub message: serde_json::Value,
    pub sender: MessageSender,
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn test_listeners_run_in_registration_order() {
        let event = RuntimeEvent::<u32>::new("test");
        let seen = Arc::new(Mutex::new(Vec::new()));

        for tag in ["a", "b", "c"] {
            let seen = seen.clone();
            event.add_listener(move |value| seen.lock().unwrap().push(format!("{tag}{value}")));
        }

        assert_eq!(event.invoke_listeners(&7), 3);
        assert_eq!(*seen.lock().unwrap(), vec!["a7", "b7", "c7"]);
    }

    #[test]
    fn test_remove_listener() {
        let event = RuntimeEvent::<()>::new("test");
        let hits = Arc::new(AtomicUsize::new(0));

        let h = hits.clone();
        let first = event.add_listener(move |_| {
            h.fetch_add(1, Ordering::SeqCst);
        });
        let h = hits.clone();
        let second = event.add_listener(move |_| {
            h.fetch_add(10, Ordering::SeqCst);
        });

        assert!(event.remove_listener(first));
        assert!(!event.remove_listener(first));
        assert!(!event.has_listener(first));
        assert!(event.has_listener(second));

        event.dispatch(&());
        assert_eq!(hits.load(Ordering::SeqCst), 10);
    }

    #[test]
    fn test_dispatch_without_listeners() {
        let event = RuntimeEvent::<String>::new("empty");
        assert!(!event.has_listeners());
        assert_eq!(event.dispatch(&"x".to_string()), 0);
    }

    #[test]
    fn test_listener_can_unregister_itself_during_dispatch() {
        let event = Arc::new(RuntimeEvent::<()>::new("once"));
        let hits = Arc::new(AtomicUsize::new(0));
        let slot: Arc<Mutex<Option<SubscriptionId>>> = Arc::new(Mutex::new(None));

        let ev = event.clone();
        let h = hits.clone();
        let s = slot.clone();
        let id = event.add_listener(move |_| {
            h.fetch_add(1, Ordering::SeqCst);
            if let Some(id) = *s.lock().unwrap() {
                ev.remove_listener(id);
            }
        });
        *slot.lock().unwrap() = Some(id);

        assert_eq!(event.dispatch(&()), 1);
        assert_eq!(event.dispatch(&()), 0);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_message_serialization() {
        let msg = RuntimeMessage {
            message: serde_json::json!({"ping": true}),
            sender: MessageSender {
                id: Some("abc".to_string()),
                url: None,
                window_id: Some("win-1".to_string()),
            },
        };
        let json = serde_json::to_string(&msg).unwrap();
        assert!(json.contains("windowId"));
        assert!(json.contains("ping"));
    }
}

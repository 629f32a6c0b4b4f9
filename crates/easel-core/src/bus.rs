#![forbid(unsafe_code)]

//! Priority-ordered, cancellable publish/subscribe dispatcher.
//!
//! Listeners are kept per event name, ordered by `(priority desc, insertion
//! order asc)`. Dispatch walks that order head to tail and stops as soon as a
//! listener cancels propagation — either by returning [`Reply::Value`] /
//! [`Reply::Prevent`] or by calling [`BusEvent::stop_propagation`].
//!
//! # Reentrancy
//!
//! Every operation is legal from inside a listener callback: registering,
//! deregistering (including self-removal), and firing further events. The
//! dispatcher snapshots the listener order at the start of a pass and marks
//! removed or spent entries with a tombstone, so entries that vanish
//! mid-dispatch are skipped rather than invoked.
//!
//! # Ordering guarantee
//!
//! Given existing priorities `[1500, 1500, 1000, 1000]`, inserting `1300`
//! then `1000` yields dispatch order `[1500, 1500, 1300, 1000, 1000,
//! 1000(new)]` — equal priorities preserve registration order.

use std::cell::{Cell, RefCell};
use std::error::Error;
use std::fmt;
use std::rc::Rc;

use ahash::AHashMap;

use crate::event::{BusEvent, FireSummary, ListenerResult};

/// Priority assigned when the caller does not pick one.
pub const DEFAULT_PRIORITY: i32 = 1000;

/// Handle identifying one registered listener.
///
/// Closures have no identity of their own, so deregistration goes through
/// the id handed out at registration time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

/// Errors surfaced by [`EventBus::fire`].
pub enum BusError {
    /// `fire` was called with an empty event name.
    MissingEventType,
    /// A listener failed and no error hook claimed the failure.
    ListenerFailed {
        /// Event name under which the listener was invoked.
        event_type: String,
        /// The listener's error.
        source: Box<dyn Error>,
    },
}

impl fmt::Display for BusError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingEventType => write!(f, "no event type specified"),
            Self::ListenerFailed { event_type, source } => {
                write!(f, "listener for <{event_type}> failed: {source}")
            }
        }
    }
}

impl fmt::Debug for BusError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

impl Error for BusError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::MissingEventType => None,
            Self::ListenerFailed { source, .. } => Some(source.as_ref()),
        }
    }
}

type Callback = Rc<dyn Fn(&mut BusEvent) -> ListenerResult>;
type ErrorHook = Box<dyn Fn(&(dyn Error + 'static)) -> bool>;

struct ListenerEntry {
    id: ListenerId,
    priority: i32,
    once: bool,
    /// Set before a `once` listener runs and on removal; tombstoned entries
    /// are skipped by any dispatch pass still holding them in its snapshot.
    tombstone: Cell<bool>,
    callback: Callback,
}

/// The event bus.
///
/// Single-threaded by design: listeners run synchronously on the calling
/// stack and may re-enter the bus freely. Construct one bus per diagram
/// instance and share it via `Rc`.
pub struct EventBus {
    chains: RefCell<AHashMap<String, Vec<Rc<ListenerEntry>>>>,
    error_hook: RefCell<Option<ErrorHook>>,
    next_id: Cell<u64>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventBus")
            .field("event_names", &self.chains.borrow().len())
            .field("has_error_hook", &self.error_hook.borrow().is_some())
            .finish()
    }
}

impl EventBus {
    /// Create an empty bus.
    #[must_use]
    pub fn new() -> Self {
        Self {
            chains: RefCell::new(AHashMap::new()),
            error_hook: RefCell::new(None),
            next_id: Cell::new(0),
        }
    }

    // ========================================================================
    // Registration
    // ========================================================================

    /// Register a listener at [`DEFAULT_PRIORITY`].
    pub fn on<F>(&self, event: &str, callback: F) -> ListenerId
    where
        F: Fn(&mut BusEvent) -> ListenerResult + 'static,
    {
        self.register(event, DEFAULT_PRIORITY, false, Rc::new(callback))
    }

    /// Register a listener with an explicit priority.
    ///
    /// Higher priorities run first; equal priorities run in registration
    /// order.
    pub fn on_priority<F>(&self, event: &str, priority: i32, callback: F) -> ListenerId
    where
        F: Fn(&mut BusEvent) -> ListenerResult + 'static,
    {
        self.register(event, priority, false, Rc::new(callback))
    }

    /// Register one shared callback under several event names.
    pub fn on_many<F>(&self, events: &[&str], priority: i32, callback: F) -> Vec<ListenerId>
    where
        F: Fn(&mut BusEvent) -> ListenerResult + 'static,
    {
        let callback: Callback = Rc::new(callback);
        events
            .iter()
            .map(|event| self.register(event, priority, false, Rc::clone(&callback)))
            .collect()
    }

    /// Register a listener that runs at most once, at [`DEFAULT_PRIORITY`].
    ///
    /// The entry is tombstoned immediately before its invocation, so a
    /// dispatch re-entered from the callback itself can never run it a
    /// second time.
    pub fn once<F>(&self, event: &str, callback: F) -> ListenerId
    where
        F: Fn(&mut BusEvent) -> ListenerResult + 'static,
    {
        self.register(event, DEFAULT_PRIORITY, true, Rc::new(callback))
    }

    /// Register a run-at-most-once listener with an explicit priority.
    pub fn once_priority<F>(&self, event: &str, priority: i32, callback: F) -> ListenerId
    where
        F: Fn(&mut BusEvent) -> ListenerResult + 'static,
    {
        self.register(event, priority, true, Rc::new(callback))
    }

    fn register(&self, event: &str, priority: i32, once: bool, callback: Callback) -> ListenerId {
        let id = ListenerId(self.next_id.get());
        self.next_id.set(id.0 + 1);

        let entry = Rc::new(ListenerEntry {
            id,
            priority,
            once,
            tombstone: Cell::new(false),
            callback,
        });

        let mut chains = self.chains.borrow_mut();
        let chain = chains.entry(event.to_owned()).or_default();
        // Insert after equal priorities, before the first lower one.
        let position = chain
            .iter()
            .position(|existing| existing.priority < priority)
            .unwrap_or(chain.len());
        chain.insert(position, entry);
        id
    }

    /// Remove one listener. Returns whether it was found.
    pub fn off(&self, event: &str, id: ListenerId) -> bool {
        let mut chains = self.chains.borrow_mut();
        let Some(chain) = chains.get_mut(event) else {
            return false;
        };
        let Some(position) = chain.iter().position(|entry| entry.id == id) else {
            return false;
        };
        // Tombstone first: snapshots held by in-flight dispatches still
        // reference the entry.
        chain[position].tombstone.set(true);
        chain.remove(position);
        if chain.is_empty() {
            chains.remove(event);
        }
        true
    }

    /// Remove every listener registered for `event`.
    pub fn off_all(&self, event: &str) {
        let mut chains = self.chains.borrow_mut();
        if let Some(chain) = chains.remove(event) {
            for entry in &chain {
                entry.tombstone.set(true);
            }
        }
    }

    /// Number of live listeners for `event`.
    #[must_use]
    pub fn listener_count(&self, event: &str) -> usize {
        self.chains.borrow().get(event).map_or(0, Vec::len)
    }

    // ========================================================================
    // Error policy
    // ========================================================================

    /// Install the error hook consulted when a listener fails.
    ///
    /// The hook returns whether it handled the failure. Handled failures are
    /// swallowed and dispatch continues; unhandled ones abort the dispatch
    /// and surface to the `fire` caller.
    pub fn set_error_hook<F>(&self, hook: F)
    where
        F: Fn(&(dyn Error + 'static)) -> bool + 'static,
    {
        *self.error_hook.borrow_mut() = Some(Box::new(hook));
    }

    /// Run `error` through the hook, returning whether it was handled.
    ///
    /// With no hook installed every error is unhandled.
    pub fn handle_error(&self, error: &(dyn Error + 'static)) -> bool {
        match self.error_hook.borrow().as_ref() {
            Some(hook) => hook(error),
            None => false,
        }
    }

    // ========================================================================
    // Dispatch
    // ========================================================================

    /// Build a record for `payload` and dispatch it.
    pub fn fire<P: std::any::Any>(
        &self,
        event_type: &str,
        payload: P,
    ) -> Result<FireSummary, BusError> {
        let mut event = BusEvent::new(event_type, payload);
        self.dispatch(&mut event)?;
        Ok(FireSummary::from_event(&mut event))
    }

    /// Dispatch an existing record under `event_type`.
    ///
    /// The record's original name is restored once delegation completes, so
    /// one record can be fanned out under several names. Control flags are
    /// deliberately not reset between dispatches: cancellation under one
    /// name suppresses delivery under the next.
    pub fn fire_as(&self, event_type: &str, event: &mut BusEvent) -> Result<(), BusError> {
        let original = event.swap_type(event_type.to_owned());
        let result = self.dispatch(event);
        event.swap_type(original);
        result
    }

    fn dispatch(&self, event: &mut BusEvent) -> Result<(), BusError> {
        let name = event.event_type().to_owned();
        if name.is_empty() {
            return Err(BusError::MissingEventType);
        }

        // Snapshot the order; callbacks may mutate the chain at will.
        let snapshot: Vec<Rc<ListenerEntry>> = self
            .chains
            .borrow()
            .get(&name)
            .map(|chain| chain.to_vec())
            .unwrap_or_default();

        tracing::trace!(
            target: "easel.events",
            event = %name,
            listeners = snapshot.len(),
            "dispatch"
        );

        for entry in snapshot {
            if event.propagation_stopped() {
                break;
            }
            if entry.tombstone.get() {
                continue;
            }
            if entry.once {
                entry.tombstone.set(true);
            }

            let reply = (entry.callback)(event);

            if entry.once {
                self.off(&name, entry.id);
            }

            match reply {
                Ok(crate::event::Reply::Continue) => {}
                Ok(crate::event::Reply::Value(value)) => {
                    event.record_return_value(value);
                    event.stop_propagation();
                }
                Ok(crate::event::Reply::Prevent) => {
                    event.prevent_default();
                    event.stop_propagation();
                }
                Err(error) => {
                    if self.handle_error(error.as_ref()) {
                        continue;
                    }
                    tracing::error!(
                        target: "easel.events",
                        event = %name,
                        error = %error,
                        "unhandled listener failure"
                    );
                    return Err(BusError::ListenerFailed {
                        event_type: name,
                        source: error,
                    });
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::Reply;
    use std::cell::RefCell;
    use std::rc::Rc;

    fn order_recorder() -> (Rc<RefCell<Vec<i32>>>, impl Fn(i32) -> Callback) {
        let seen = Rc::new(RefCell::new(Vec::new()));
        let make = {
            let seen = Rc::clone(&seen);
            move |tag: i32| -> Callback {
                let seen = Rc::clone(&seen);
                Rc::new(move |_event: &mut BusEvent| {
                    seen.borrow_mut().push(tag);
                    Ok(Reply::Continue)
                })
            }
        };
        (seen, make)
    }

    #[test]
    fn test_priority_ordering_exact() {
        // [1500, 1500, 1000, 1000] + 1300 + 1000
        // => [1500, 1500, 1300, 1000, 1000, 1000(new)]
        let bus = EventBus::new();
        let (seen, make) = order_recorder();

        bus.register("e", 1500, false, make(1));
        bus.register("e", 1500, false, make(2));
        bus.register("e", 1000, false, make(3));
        bus.register("e", 1000, false, make(4));
        bus.register("e", 1300, false, make(5));
        bus.register("e", 1000, false, make(6));

        bus.fire("e", ()).unwrap();
        assert_eq!(*seen.borrow(), vec![1, 2, 5, 3, 4, 6]);
    }

    #[test]
    fn test_default_priority_registration_order() {
        let bus = EventBus::new();
        let (seen, make) = order_recorder();
        bus.register("e", DEFAULT_PRIORITY, false, make(1));
        bus.register("e", DEFAULT_PRIORITY, false, make(2));
        bus.register("e", DEFAULT_PRIORITY, false, make(3));

        bus.fire("e", ()).unwrap();
        assert_eq!(*seen.borrow(), vec![1, 2, 3]);
    }

    #[test]
    fn test_first_responder_wins() {
        let bus = EventBus::new();
        let called = Rc::new(RefCell::new(Vec::new()));

        let c = Rc::clone(&called);
        bus.on_priority("e", 1500, move |_| {
            c.borrow_mut().push("high");
            Ok(Reply::value("answer"))
        });
        let c = Rc::clone(&called);
        bus.on("e", move |_| {
            c.borrow_mut().push("low");
            Ok(Reply::value("ignored"))
        });

        let summary = bus.fire("e", ()).unwrap();
        assert_eq!(summary.value::<&str>(), Some(&"answer"));
        assert_eq!(*called.borrow(), vec!["high"]);
    }

    #[test]
    fn test_falsy_values_still_stop_propagation() {
        // 0 and "" are values like any other: they stop the walk.
        let bus = EventBus::new();
        let reached = Rc::new(RefCell::new(false));

        bus.on_priority("e", 2000, |_| Ok(Reply::value(0_u32)));
        let r = Rc::clone(&reached);
        bus.on("e", move |_| {
            *r.borrow_mut() = true;
            Ok(Reply::Continue)
        });

        let summary = bus.fire("e", ()).unwrap();
        assert_eq!(summary.value::<u32>(), Some(&0));
        assert!(!*reached.borrow());
    }

    #[test]
    fn test_prevent_stops_and_marks() {
        let bus = EventBus::new();
        let reached = Rc::new(RefCell::new(false));

        bus.on_priority("e", 2000, |_| Ok(Reply::Prevent));
        let r = Rc::clone(&reached);
        bus.on("e", move |_| {
            *r.borrow_mut() = true;
            Ok(Reply::Continue)
        });

        let summary = bus.fire("e", ()).unwrap();
        assert!(summary.default_prevented());
        assert!(!summary.has_value());
        assert!(!*reached.borrow());
    }

    #[test]
    fn test_stop_propagation_without_value() {
        let bus = EventBus::new();
        let reached = Rc::new(RefCell::new(false));

        bus.on_priority("e", 2000, |event: &mut BusEvent| {
            event.stop_propagation();
            Ok(Reply::Continue)
        });
        let r = Rc::clone(&reached);
        bus.on("e", move |_| {
            *r.borrow_mut() = true;
            Ok(Reply::Continue)
        });

        let summary = bus.fire("e", ()).unwrap();
        assert!(!summary.handled());
        assert!(!*reached.borrow());
    }

    #[test]
    fn test_once_runs_exactly_once() {
        let bus = EventBus::new();
        let count = Rc::new(RefCell::new(0));

        let c = Rc::clone(&count);
        bus.once("e", move |_| {
            *c.borrow_mut() += 1;
            Ok(Reply::Continue)
        });

        bus.fire("e", ()).unwrap();
        bus.fire("e", ()).unwrap();
        assert_eq!(*count.borrow(), 1);
        assert_eq!(bus.listener_count("e"), 0);
    }

    #[test]
    fn test_once_reentrant_refire_runs_once() {
        // A once-listener that re-fires its own event synchronously must not
        // run a second time: the tombstone is set before invocation.
        let bus = Rc::new(EventBus::new());
        let count = Rc::new(RefCell::new(0));

        let c = Rc::clone(&count);
        let b = Rc::clone(&bus);
        bus.once("e", move |_| {
            *c.borrow_mut() += 1;
            b.fire("e", ()).unwrap();
            Ok(Reply::Continue)
        });

        bus.fire("e", ()).unwrap();
        bus.fire("e", ()).unwrap();
        assert_eq!(*count.borrow(), 1);
    }

    #[test]
    fn test_off_removes_listener() {
        let bus = EventBus::new();
        let count = Rc::new(RefCell::new(0));

        let c = Rc::clone(&count);
        let id = bus.on("e", move |_| {
            *c.borrow_mut() += 1;
            Ok(Reply::Continue)
        });

        assert!(bus.off("e", id));
        assert!(!bus.off("e", id));
        bus.fire("e", ()).unwrap();
        assert_eq!(*count.borrow(), 0);
    }

    #[test]
    fn test_removal_mid_dispatch_skips_tombstoned() {
        // The first listener removes the second; the second must not run
        // even though it is already in the dispatch snapshot.
        let bus = Rc::new(EventBus::new());
        let reached = Rc::new(RefCell::new(false));

        let r = Rc::clone(&reached);
        let victim = bus.on_priority("e", 500, move |_| {
            *r.borrow_mut() = true;
            Ok(Reply::Continue)
        });

        let b = Rc::clone(&bus);
        bus.on_priority("e", 1500, move |_| {
            b.off("e", victim);
            Ok(Reply::Continue)
        });

        bus.fire("e", ()).unwrap();
        assert!(!*reached.borrow());
    }

    #[test]
    fn test_off_all() {
        let bus = EventBus::new();
        bus.on("e", |_| Ok(Reply::Continue));
        bus.on("e", |_| Ok(Reply::Continue));
        assert_eq!(bus.listener_count("e"), 2);

        bus.off_all("e");
        assert_eq!(bus.listener_count("e"), 0);
    }

    #[test]
    fn test_on_many_shares_callback() {
        let bus = EventBus::new();
        let count = Rc::new(RefCell::new(0));

        let c = Rc::clone(&count);
        let ids = bus.on_many(&["a", "b"], DEFAULT_PRIORITY, move |_| {
            *c.borrow_mut() += 1;
            Ok(Reply::Continue)
        });
        assert_eq!(ids.len(), 2);

        bus.fire("a", ()).unwrap();
        bus.fire("b", ()).unwrap();
        assert_eq!(*count.borrow(), 2);
    }

    #[test]
    fn test_missing_event_type() {
        let bus = EventBus::new();
        let err = bus.fire("", ()).unwrap_err();
        assert!(matches!(err, BusError::MissingEventType));
    }

    #[test]
    fn test_error_hook_handles_failure() {
        let bus = EventBus::new();
        let reached = Rc::new(RefCell::new(false));

        bus.set_error_hook(|_| true);
        bus.on_priority("e", 2000, |_| Err("listener exploded".into()));
        let r = Rc::clone(&reached);
        bus.on("e", move |_| {
            *r.borrow_mut() = true;
            Ok(Reply::Continue)
        });

        // Handled: swallowed, dispatch continues.
        bus.fire("e", ()).unwrap();
        assert!(*reached.borrow());
    }

    #[test]
    fn test_unhandled_failure_surfaces() {
        let bus = EventBus::new();
        bus.on("e", |_| Err("listener exploded".into()));

        let err = bus.fire("e", ()).unwrap_err();
        match err {
            BusError::ListenerFailed { event_type, source } => {
                assert_eq!(event_type, "e");
                assert_eq!(source.to_string(), "listener exploded");
            }
            BusError::MissingEventType => panic!("wrong error variant"),
        }
    }

    #[test]
    fn test_handle_error_without_hook() {
        let bus = EventBus::new();
        let error: Box<dyn std::error::Error> = "boom".into();
        assert!(!bus.handle_error(error.as_ref()));
    }

    #[test]
    fn test_fire_as_restores_type_and_keeps_flags() {
        let bus = EventBus::new();
        bus.on("specific", |event: &mut BusEvent| {
            assert_eq!(event.event_type(), "specific");
            Ok(Reply::value(7_u32))
        });
        let generic_reached = Rc::new(RefCell::new(false));
        let r = Rc::clone(&generic_reached);
        bus.on("generic", move |_| {
            *r.borrow_mut() = true;
            Ok(Reply::Continue)
        });

        let mut event = BusEvent::new("original", ());
        bus.fire_as("specific", &mut event).unwrap();
        assert_eq!(event.event_type(), "original");
        assert!(event.propagation_stopped());

        // Cancellation persists: the generic dispatch delivers nothing.
        bus.fire_as("generic", &mut event).unwrap();
        assert!(!*generic_reached.borrow());
        assert_eq!(event.return_value::<u32>(), Some(&7));
    }

    #[test]
    fn test_listener_can_register_during_dispatch() {
        let bus = Rc::new(EventBus::new());
        let b = Rc::clone(&bus);
        bus.on("e", move |_| {
            b.on("late", |_| Ok(Reply::Continue));
            Ok(Reply::Continue)
        });

        bus.fire("e", ()).unwrap();
        assert_eq!(bus.listener_count("late"), 1);
    }

    #[test]
    fn test_payload_mutation_visible_downstream() {
        let bus = EventBus::new();
        bus.on_priority("e", 1500, |event: &mut BusEvent| {
            *event.payload_mut::<u32>().unwrap() += 1;
            Ok(Reply::Continue)
        });
        bus.on("e", |event: &mut BusEvent| {
            let seen = *event.payload::<u32>().unwrap();
            Ok(Reply::value(seen))
        });

        let summary = bus.fire("e", 41_u32).unwrap();
        assert_eq!(summary.value::<u32>(), Some(&42));
    }
}

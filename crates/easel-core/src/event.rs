#![forbid(unsafe_code)]

//! The mutable event record and listener reply types.
//!
//! A [`BusEvent`] is created once per dispatch (or reused when an existing
//! record is re-dispatched under another name, see
//! [`EventBus::fire_as`](crate::bus::EventBus::fire_as)). The payload is
//! type-erased: subscribers downcast to the payload type published by the
//! firing side.
//!
//! # Invariants
//!
//! - Once `cancel_bubble` is set, no further listener in the current (or any
//!   subsequent) dispatch of the record is invoked.
//! - Only the first recorded return value survives — first responder wins.
//! - Re-dispatching a record never resets its flags; cancellation observed
//!   under one name suppresses delivery under the next.

use std::any::Any;
use std::error::Error;
use std::fmt;

/// What a listener wants the dispatcher to do next.
///
/// This replaces sentinel return values with an explicit tagged outcome:
/// `Continue` keeps walking the chain, `Value` stops propagation and records
/// a result for the firing side, and `Prevent` stops propagation while
/// marking the default action as prevented.
pub enum Reply {
    /// Keep walking the listener chain.
    Continue,
    /// Stop propagation and record this value as the dispatch result.
    Value(Box<dyn Any>),
    /// Stop propagation and mark the default action as prevented.
    Prevent,
}

impl Reply {
    /// Convenience constructor boxing a concrete value.
    #[must_use]
    pub fn value<T: Any>(value: T) -> Self {
        Self::Value(Box::new(value))
    }
}

impl fmt::Debug for Reply {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Continue => f.write_str("Continue"),
            Self::Value(_) => f.write_str("Value(..)"),
            Self::Prevent => f.write_str("Prevent"),
        }
    }
}

/// Result type every listener callback returns.
///
/// The `Err` arm routes through the bus error hook: a handled error is
/// swallowed and dispatch continues with the next listener, an unhandled one
/// aborts the dispatch and surfaces to the `fire` caller.
pub type ListenerResult = Result<Reply, Box<dyn Error>>;

/// Mutable record passed to every listener of one dispatch.
pub struct BusEvent {
    event_type: String,
    payload: Box<dyn Any>,
    cancel_bubble: bool,
    default_prevented: bool,
    return_value: Option<Box<dyn Any>>,
}

impl BusEvent {
    /// Build a new record carrying `payload`.
    #[must_use]
    pub fn new(event_type: impl Into<String>, payload: impl Any) -> Self {
        Self {
            event_type: event_type.into(),
            payload: Box::new(payload),
            cancel_bubble: false,
            default_prevented: false,
            return_value: None,
        }
    }

    /// Name this record is (currently) dispatched under.
    #[must_use]
    pub fn event_type(&self) -> &str {
        &self.event_type
    }

    /// Borrow the payload as `T`.
    #[must_use]
    pub fn payload<T: Any>(&self) -> Option<&T> {
        self.payload.as_ref().downcast_ref::<T>()
    }

    /// Mutably borrow the payload as `T`.
    #[must_use]
    pub fn payload_mut<T: Any>(&mut self) -> Option<&mut T> {
        self.payload.as_mut().downcast_mut::<T>()
    }

    /// Halt propagation without recording a value.
    pub fn stop_propagation(&mut self) {
        self.cancel_bubble = true;
    }

    /// Whether propagation has been halted.
    #[must_use]
    pub fn propagation_stopped(&self) -> bool {
        self.cancel_bubble
    }

    /// Mark the default action as prevented.
    pub fn prevent_default(&mut self) {
        self.default_prevented = true;
    }

    /// Whether some listener prevented the default action.
    #[must_use]
    pub fn default_prevented(&self) -> bool {
        self.default_prevented
    }

    /// Borrow the recorded return value as `T`, if one was recorded.
    #[must_use]
    pub fn return_value<T: Any>(&self) -> Option<&T> {
        self.return_value.as_ref()?.downcast_ref::<T>()
    }

    /// Whether any listener recorded a return value.
    #[must_use]
    pub fn has_return_value(&self) -> bool {
        self.return_value.is_some()
    }

    /// Take the recorded return value out of the record.
    pub fn take_return_value(&mut self) -> Option<Box<dyn Any>> {
        self.return_value.take()
    }

    pub(crate) fn record_return_value(&mut self, value: Box<dyn Any>) {
        self.return_value = Some(value);
    }

    pub(crate) fn swap_type(&mut self, event_type: String) -> String {
        std::mem::replace(&mut self.event_type, event_type)
    }
}

impl fmt::Debug for BusEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BusEvent")
            .field("event_type", &self.event_type)
            .field("cancel_bubble", &self.cancel_bubble)
            .field("default_prevented", &self.default_prevented)
            .field("has_return_value", &self.return_value.is_some())
            .finish()
    }
}

/// Summary of a completed dispatch, handed back by
/// [`EventBus::fire`](crate::bus::EventBus::fire).
///
/// Mirrors the record's terminal state: the recorded value (if any listener
/// stopped propagation with one) and whether the default action was
/// prevented. A summary with neither is an "unhandled" dispatch.
pub struct FireSummary {
    value: Option<Box<dyn Any>>,
    default_prevented: bool,
}

impl FireSummary {
    pub(crate) fn from_event(event: &mut BusEvent) -> Self {
        Self {
            value: event.take_return_value(),
            default_prevented: event.default_prevented(),
        }
    }

    /// The recorded value, downcast to `T`.
    #[must_use]
    pub fn value<T: Any>(&self) -> Option<&T> {
        self.value.as_ref()?.downcast_ref::<T>()
    }

    /// Whether any value was recorded, regardless of its type.
    #[must_use]
    pub fn has_value(&self) -> bool {
        self.value.is_some()
    }

    /// Whether the default action was prevented.
    #[must_use]
    pub fn default_prevented(&self) -> bool {
        self.default_prevented
    }

    /// Whether any listener answered the dispatch at all.
    #[must_use]
    pub fn handled(&self) -> bool {
        self.value.is_some() || self.default_prevented
    }
}

impl fmt::Debug for FireSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FireSummary")
            .field("has_value", &self.value.is_some())
            .field("default_prevented", &self.default_prevented)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_payload_roundtrip() {
        let mut event = BusEvent::new("shape.added", 41_u32);
        assert_eq!(event.payload::<u32>(), Some(&41));
        *event.payload_mut::<u32>().unwrap() += 1;
        assert_eq!(event.payload::<u32>(), Some(&42));
        assert!(event.payload::<String>().is_none());
    }

    #[test]
    fn test_flags_default_clear() {
        let event = BusEvent::new("x", ());
        assert!(!event.propagation_stopped());
        assert!(!event.default_prevented());
        assert!(!event.has_return_value());
    }

    #[test]
    fn test_return_value_downcast() {
        let mut event = BusEvent::new("x", ());
        event.record_return_value(Box::new(false));
        assert_eq!(event.return_value::<bool>(), Some(&false));
        assert!(event.return_value::<u32>().is_none());
        assert!(event.take_return_value().is_some());
        assert!(!event.has_return_value());
    }

    #[test]
    fn test_summary_handled() {
        let mut event = BusEvent::new("x", ());
        let summary = FireSummary::from_event(&mut event);
        assert!(!summary.handled());

        let mut event = BusEvent::new("x", ());
        event.prevent_default();
        let summary = FireSummary::from_event(&mut event);
        assert!(summary.handled());
        assert!(summary.default_prevented());
        assert!(!summary.has_value());
    }

    #[test]
    fn test_debug_impls() {
        let event = BusEvent::new("canvas.init", ());
        let debug = format!("{event:?}");
        assert!(debug.contains("canvas.init"));
        assert!(format!("{:?}", Reply::value(0_i32)).contains("Value"));
    }
}

#![forbid(unsafe_code)]

//! Core: the event bus a diagram toolkit is built around.
//!
//! # Role in Easel
//! `easel-core` is the dispatch layer. Every other part of the toolkit — the
//! command stack in `easel-runtime`, and any feature plugin layered on top —
//! communicates exclusively through named events fired on [`EventBus`].
//!
//! # Primary responsibilities
//! - **EventBus**: priority-ordered, cancellable publish/subscribe dispatch.
//! - **BusEvent**: the mutable per-dispatch record carrying a type-erased
//!   payload and the control flags listeners act on.
//! - **Reply**: the tagged outcome a listener hands back (continue, stop with
//!   a value, or stop and prevent the default action).
//!
//! # How it fits in the system
//! The command stack (`easel-runtime`) fires paired lifecycle events through
//! this bus for every command it executes, undoes, or redoes. Rule providers
//! veto operations by answering `canExecute` queries; rendering layers watch
//! `elements.changed` to know what to repaint. None of those consumers hold a
//! reference to each other — the bus is the only seam.

pub mod bus;
pub mod event;

pub use bus::{BusError, DEFAULT_PRIORITY, EventBus, ListenerId};
pub use event::{BusEvent, FireSummary, ListenerResult, Reply};

#![forbid(unsafe_code)]

//! Transactional command execution.
//!
//! This module implements the command stack: a reentrant undo/redo state
//! machine over pluggable command handlers, with every state transition
//! announced on the event bus.
//!
//! # Architecture
//!
//! ```text
//! execute("shape.move", ctx)
//!     │
//!     ▼
//! ┌────────────────────────────────────────────────────────────┐
//! │ CommandStack                                               │
//! │   preExecute ─► handler.pre_execute (nested commands OK)   │
//! │   ┌──────────── atomic region ────────────────┐            │
//! │   │ execute ─► handler.execute ─► mark dirty  │            │
//! │   │ commit to history stack                   │            │
//! │   └───────────────────────────────────────────┘            │
//! │   postExecute ─► handler.post_execute (nested commands OK) │
//! └────────────────────────────────────────────────────────────┘
//!     │ outermost call returning
//!     ▼
//! elements.changed { deduped dirty set }
//! commandStack.changed { trigger }
//! ```
//!
//! # Invariants
//!
//! 1. Every action committed while one user gesture is open shares one batch
//!    id; `undo`/`redo` move over whole batches atomically.
//! 2. Committing a brand-new action truncates everything after the stack
//!    pointer — linear history, no branching.
//! 3. The execute/revert core phase is atomic: reentrant stack calls from a
//!    handler's `execute`/`revert` are rejected, never partially applied.
//! 4. `elements.changed` and `commandStack.changed` fire exactly once per
//!    completed top-level operation.
//!
//! # Module structure
//!
//! - [`context`]: the shared, type-erased per-gesture command context
//! - [`handler`]: the [`CommandHandler`] capability contract and errors
//! - [`registry`]: name → handler table with duplicate protection
//! - [`stack`]: the state machine itself

pub mod context;
pub mod handler;
pub mod registry;
pub mod stack;

pub use context::CommandContext;
pub use handler::{CommandError, CommandHandler, CommandResult};
pub use registry::CommandRegistry;
pub use stack::{
    CommandPayload, CommandStack, ElementsChangedPayload, StackChangedPayload, Trigger, topics,
};

#![forbid(unsafe_code)]

//! Runtime: the transactional command execution engine.
//!
//! # Role in Easel
//! `easel-runtime` hosts the command stack — the undo/redo state machine
//! every editing feature of the toolkit goes through. Feature plugins
//! register [`CommandHandler`]s for named commands and subscribe to the
//! lifecycle events the stack fires on the [`easel_core::EventBus`]; the
//! stack itself knows nothing about any command's semantics.
//!
//! # How it fits in the system
//! The stack consumes `easel-core` for all of its outward communication.
//! Consumers subscribe to `elements.changed` to learn what to re-render,
//! rule providers answer `canExecute` queries to veto operations, and
//! plugins piggyback side effects on command-named phase events.

pub mod command;

pub use command::{
    CommandContext, CommandError, CommandHandler, CommandPayload, CommandRegistry, CommandResult,
    CommandStack, ElementsChangedPayload, StackChangedPayload, Trigger, topics,
};

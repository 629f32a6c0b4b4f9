#![forbid(unsafe_code)]

//! The command handler contract and command errors.
//!
//! A handler is the pluggable behavior behind one named command. The stack
//! never knows what a command means — only which capabilities its handler
//! implements. All capabilities are optional through default method bodies;
//! a useful handler implements at least the `execute`/`revert` pair, which
//! carries the undo contract.
//!
//! # Invariants
//!
//! - `execute` followed by `revert` restores every observable field the
//!   handler is contracted to restore.
//! - `execute`/`revert` must not call back into the stack; nested commands
//!   are legal only from `pre_execute`/`post_execute`, the only hooks handed
//!   a stack reference.

use std::error::Error;
use std::fmt;

use easel_core::BusError;

use super::context::CommandContext;
use super::stack::CommandStack;

/// Result alias used throughout the command engine.
pub type CommandResult<T = ()> = Result<T, CommandError>;

/// Errors reported by the command stack and its handlers.
pub enum CommandError {
    /// `execute` was called without a command name.
    MissingCommand,
    /// No handler is registered for the command.
    UnregisteredCommand(String),
    /// A handler is already bound to the command name.
    DuplicateHandler(String),
    /// `register` was called with an empty command name.
    InvalidRegistration,
    /// A handler's `execute`/`revert` called back into the stack.
    AtomicViolation(String),
    /// An event listener failed during dispatch and nothing claimed it.
    Dispatch(BusError),
    /// Handler-reported failure.
    Other(String),
}

impl fmt::Display for CommandError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingCommand => write!(f, "command required"),
            Self::UnregisteredCommand(command) => {
                write!(f, "no command handler registered for <{command}>")
            }
            Self::DuplicateHandler(command) => {
                write!(f, "overriding handler for command <{command}>")
            }
            Self::InvalidRegistration => write!(f, "command and handler required"),
            Self::AtomicViolation(command) => write!(
                f,
                "illegal invocation in <execute> or <revert> phase (command: <{command}>)"
            ),
            Self::Dispatch(source) => write!(f, "event dispatch failed: {source}"),
            Self::Other(message) => write!(f, "{message}"),
        }
    }
}

impl fmt::Debug for CommandError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

impl Error for CommandError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Dispatch(source) => Some(source),
            _ => None,
        }
    }
}

impl From<BusError> for CommandError {
    fn from(source: BusError) -> Self {
        Self::Dispatch(source)
    }
}

/// Pluggable behavior behind one named command.
///
/// `E` is the application's element (entity) type; `execute`/`revert` report
/// the elements they touched so the stack can aggregate them into one
/// `elements.changed` notification per gesture.
pub trait CommandHandler<E> {
    /// Apply the command. Returns the touched elements.
    fn execute(&self, ctx: &CommandContext) -> CommandResult<Vec<E>> {
        let _ = ctx;
        Ok(Vec::new())
    }

    /// Reverse the command. Returns the touched elements.
    fn revert(&self, ctx: &CommandContext) -> CommandResult<Vec<E>> {
        let _ = ctx;
        Ok(Vec::new())
    }

    /// Whether the command may execute in the given context.
    ///
    /// Consulted only after no `canExecute` listener produced a verdict.
    fn can_execute(&self, ctx: &CommandContext) -> bool {
        let _ = ctx;
        true
    }

    /// Hook before the atomic phase. May compose further commands through
    /// `stack`; everything executed here joins the current batch.
    fn pre_execute(&self, stack: &CommandStack<E>, ctx: &CommandContext) -> CommandResult {
        let _ = (stack, ctx);
        Ok(())
    }

    /// Hook after the atomic phase. Same composition rules as
    /// [`pre_execute`](Self::pre_execute).
    fn post_execute(&self, stack: &CommandStack<E>, ctx: &CommandContext) -> CommandResult {
        let _ = (stack, ctx);
        Ok(())
    }
}

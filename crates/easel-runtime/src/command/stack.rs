#![forbid(unsafe_code)]

//! The command stack state machine.
//!
//! One stack instance owns one linear history of committed actions plus the
//! transient bookkeeping of the operation currently in flight. All outward
//! communication happens through the event bus: eight lifecycle phases per
//! command, a `canExecute` query channel, and the two aggregate
//! notifications fired once per completed top-level operation.
//!
//! # Batching
//!
//! Commands composed from a handler's `pre_execute`/`post_execute` join the
//! batch of the action that triggered them: the first action of a nested
//! call tree allocates the batch id, every action pushed while that tree is
//! open inherits it, and `undo`/`redo` move over id-runs as one unit.
//!
//! # Failure modes
//!
//! - **Reentrant stack call from `execute`/`revert`**: rejected with
//!   [`CommandError::AtomicViolation`] before any bookkeeping is touched.
//! - **Handler or listener error mid-operation**: the operation aborts and
//!   the in-flight record (actions, dirty set, trigger) is reset, so a later
//!   operation starts from a clean slate instead of inheriting a stale
//!   batch id.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::Rc;

use easel_core::{BusEvent, EventBus};

use super::context::CommandContext;
use super::handler::{CommandError, CommandHandler, CommandResult};
use super::registry::CommandRegistry;

/// Event names the stack publishes under.
pub mod topics {
    /// Aggregate per-gesture notification carrying the touched elements.
    pub const ELEMENTS_CHANGED: &str = "elements.changed";
    /// Fired once per completed execute/undo/redo/clear.
    pub const STACK_CHANGED: &str = "commandStack.changed";

    /// Generic phase topic, e.g. `commandStack.preExecute`.
    #[must_use]
    pub fn phase(phase: &str) -> String {
        format!("commandStack.{phase}")
    }

    /// Command-qualified phase topic, e.g. `commandStack.shape.move.execute`.
    #[must_use]
    pub fn command_phase(command: &str, phase: &str) -> String {
        format!("commandStack.{command}.{phase}")
    }
}

/// What kind of top-level operation completed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    /// A fresh command was executed.
    Execute,
    /// A batch was undone.
    Undo,
    /// A batch was redone.
    Redo,
    /// The history was cleared.
    Clear,
}

/// Payload of every lifecycle phase and `canExecute` event.
#[derive(Debug, Clone)]
pub struct CommandPayload {
    /// Name of the command the phase belongs to.
    pub command: String,
    /// The shared context of the command invocation.
    pub context: CommandContext,
}

/// Payload of [`topics::ELEMENTS_CHANGED`].
#[derive(Debug, Clone)]
pub struct ElementsChangedPayload<E> {
    /// Touched elements, deduplicated, most recently touched first.
    pub elements: Vec<E>,
}

/// Payload of [`topics::STACK_CHANGED`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StackChangedPayload {
    /// The operation that completed.
    pub trigger: Trigger,
}

/// Groups the actions of one user-level gesture.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct BatchId(u64);

/// One recorded command invocation.
#[derive(Clone)]
struct Action {
    command: String,
    context: CommandContext,
    id: BatchId,
}

/// Transient bookkeeping of the operation currently in flight.
struct Execution<E> {
    /// The in-flight call stack of actions (nested calls included).
    actions: Vec<Action>,
    /// Elements touched so far, announced once the outermost call returns.
    dirty: Vec<E>,
    trigger: Option<Trigger>,
    /// Set while the execute/revert core phase runs; guards against
    /// reentrant stack calls.
    atomic: bool,
}

impl<E> Execution<E> {
    fn new() -> Self {
        Self {
            actions: Vec::new(),
            dirty: Vec::new(),
            trigger: None,
            atomic: false,
        }
    }
}

/// The transactional command stack.
///
/// Generic over the application's element type `E`; element identity
/// (`PartialEq`) drives the dirty-set deduplication. Construct one stack per
/// diagram instance — the history and in-flight bookkeeping are private,
/// single-writer state observed only through fired events.
pub struct CommandStack<E> {
    bus: Rc<EventBus>,
    registry: RefCell<CommandRegistry<E>>,
    stack: RefCell<Vec<Action>>,
    /// Index of the most recently executed action; `None` = before the
    /// first.
    stack_index: Cell<Option<usize>>,
    execution: RefCell<Execution<E>>,
    next_batch: Cell<u64>,
}

impl<E> fmt::Debug for CommandStack<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CommandStack")
            .field("len", &self.stack.borrow().len())
            .field("stack_index", &self.stack_index.get())
            .field("commands", &self.registry.borrow().len())
            .finish()
    }
}

impl<E: Clone + PartialEq + 'static> CommandStack<E> {
    /// Create a stack dispatching on `bus`.
    #[must_use]
    pub fn new(bus: Rc<EventBus>) -> Self {
        Self {
            bus,
            registry: RefCell::new(CommandRegistry::new()),
            stack: RefCell::new(Vec::new()),
            stack_index: Cell::new(None),
            execution: RefCell::new(Execution::new()),
            next_batch: Cell::new(1),
        }
    }

    /// The bus this stack announces on.
    #[must_use]
    pub fn event_bus(&self) -> &Rc<EventBus> {
        &self.bus
    }

    // ========================================================================
    // Registration
    // ========================================================================

    /// Bind `handler` to `command`.
    pub fn register(
        &self,
        command: &str,
        handler: impl CommandHandler<E> + 'static,
    ) -> CommandResult {
        self.registry.borrow_mut().register(command, Rc::new(handler))
    }

    /// Bind an already-shared handler to `command`.
    pub fn register_rc(&self, command: &str, handler: Rc<dyn CommandHandler<E>>) -> CommandResult {
        self.registry.borrow_mut().register(command, handler)
    }

    /// Construct a handler through `factory`, then bind it.
    pub fn register_factory<F>(&self, command: &str, factory: F) -> CommandResult
    where
        F: FnOnce() -> Rc<dyn CommandHandler<E>>,
    {
        self.registry.borrow_mut().register_factory(command, factory)
    }

    // ========================================================================
    // Execution
    // ========================================================================

    /// Execute `command` with `context`.
    ///
    /// Fires the full lifecycle, commits the action (truncating any
    /// abandoned redo branch), and — once the outermost call returns —
    /// announces the aggregated dirty set and the stack change.
    pub fn execute(&self, command: &str, context: CommandContext) -> CommandResult {
        if command.is_empty() {
            return Err(CommandError::MissingCommand);
        }
        let is_root = self.execution.borrow().actions.is_empty();
        self.execution.borrow_mut().trigger = Some(Trigger::Execute);

        tracing::debug!(target: "easel.commands", command = %command, "execute");

        let result = self
            .push_new_action(command, context)
            .and_then(|action| {
                self.internal_execute(&action, false)?;
                self.pop_action()
            });
        self.finish(is_root, result)
    }

    /// Undo the batch at the top of the history.
    ///
    /// A no-op when there is nothing to undo.
    pub fn undo(&self) -> CommandResult {
        let Some(action) = self.undo_action() else {
            return Ok(());
        };
        let is_root = self.execution.borrow().actions.is_empty();
        self.execution.borrow_mut().trigger = Some(Trigger::Undo);

        tracing::debug!(target: "easel.commands", command = %action.command, "undo");

        let result = self.unroll_batch(action);
        self.finish(is_root, result)
    }

    fn unroll_batch(&self, mut action: Action) -> CommandResult {
        self.push_action(action.clone())?;
        loop {
            self.internal_undo(&action)?;
            match self.undo_action() {
                Some(next) if next.id == action.id => action = next,
                _ => break,
            }
        }
        self.pop_action()
    }

    /// Re-execute the batch after the stack pointer.
    ///
    /// Replays skip the `pre`/`post` hooks: their side effects ran once and
    /// are not safely re-playable. A no-op when there is nothing to redo.
    pub fn redo(&self) -> CommandResult {
        let Some(action) = self.redo_action() else {
            return Ok(());
        };
        let is_root = self.execution.borrow().actions.is_empty();
        self.execution.borrow_mut().trigger = Some(Trigger::Redo);

        tracing::debug!(target: "easel.commands", command = %action.command, "redo");

        let result = self.replay_batch(action);
        self.finish(is_root, result)
    }

    fn replay_batch(&self, mut action: Action) -> CommandResult {
        self.push_action(action.clone())?;
        loop {
            self.internal_execute(&action, true)?;
            match self.redo_action() {
                Some(next) if next.id == action.id => action = next,
                _ => break,
            }
        }
        self.pop_action()
    }

    /// Whether `command` may execute with `context`.
    ///
    /// Listener verdicts on the `canExecute` topics win; without one the
    /// handler is consulted. No handler means `false`; a handler without an
    /// own opinion means `true`. A listener failure is treated as a veto.
    #[must_use]
    pub fn can_execute(&self, command: &str, context: &CommandContext) -> bool {
        let payload = CommandPayload {
            command: command.to_owned(),
            context: context.clone(),
        };
        let mut event = BusEvent::new("", payload);
        let names = [
            topics::command_phase(command, "canExecute"),
            topics::phase("canExecute"),
        ];
        for name in &names {
            if event.propagation_stopped() {
                break;
            }
            if let Err(error) = self.bus.fire_as(name, &mut event) {
                tracing::error!(
                    target: "easel.commands",
                    command = %command,
                    error = %error,
                    "canExecute listener failed, treating as veto"
                );
                return false;
            }
        }
        if event.has_return_value() {
            // A recorded non-bool value counts as an affirmative verdict.
            return event.return_value::<bool>().copied().unwrap_or(true);
        }
        if event.default_prevented() {
            return false;
        }
        let handler = self.registry.borrow().get(command);
        match handler {
            None => false,
            Some(handler) => handler.can_execute(context),
        }
    }

    /// Whether a batch is available for undo.
    #[must_use]
    pub fn can_undo(&self) -> bool {
        self.stack_index.get().is_some()
    }

    /// Whether a batch is available for redo.
    #[must_use]
    pub fn can_redo(&self) -> bool {
        let next = self.stack_index.get().map_or(0, |index| index + 1);
        next < self.stack.borrow().len()
    }

    /// Drop the entire history.
    ///
    /// Announces a [`Trigger::Clear`] stack change unless `emit` is false.
    pub fn clear(&self, emit: bool) -> CommandResult {
        self.stack.borrow_mut().clear();
        self.stack_index.set(None);
        if emit {
            self.bus.fire(
                topics::STACK_CHANGED,
                StackChangedPayload {
                    trigger: Trigger::Clear,
                },
            )?;
        }
        Ok(())
    }

    /// Number of committed actions (including any redo branch).
    #[must_use]
    pub fn len(&self) -> usize {
        self.stack.borrow().len()
    }

    /// Whether the history is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.stack.borrow().is_empty()
    }

    /// Index of the most recently executed action.
    #[must_use]
    pub fn stack_index(&self) -> Option<usize> {
        self.stack_index.get()
    }

    // ========================================================================
    // Internals
    // ========================================================================

    fn internal_execute(&self, action: &Action, redo: bool) -> CommandResult {
        let handler = self
            .registry
            .borrow()
            .get(&action.command)
            .ok_or_else(|| CommandError::UnregisteredCommand(action.command.clone()))?;

        self.push_action(action.clone())?;

        if !redo {
            self.fire_phase(action, "preExecute")?;
            handler.pre_execute(self, &action.context)?;
            self.fire_phase(action, "preExecuted")?;
        }

        self.atomic_do(|| {
            self.fire_phase(action, "execute")?;
            let touched = handler.execute(&action.context)?;
            self.mark_dirty(touched);
            self.commit_action(action, redo);
            self.fire_phase(action, "executed")
        })?;

        if !redo {
            self.fire_phase(action, "postExecute")?;
            handler.post_execute(self, &action.context)?;
            self.fire_phase(action, "postExecuted")?;
        }

        self.pop_action()
    }

    fn internal_undo(&self, action: &Action) -> CommandResult {
        let handler = self
            .registry
            .borrow()
            .get(&action.command)
            .ok_or_else(|| CommandError::UnregisteredCommand(action.command.clone()))?;

        self.atomic_do(|| {
            self.fire_phase(action, "revert")?;
            let touched = handler.revert(&action.context)?;
            self.mark_dirty(touched);
            self.retract_action();
            self.fire_phase(action, "reverted")
        })
    }

    /// Run `f` with the atomic flag set, restoring it on every exit path.
    fn atomic_do(&self, f: impl FnOnce() -> CommandResult) -> CommandResult {
        self.execution.borrow_mut().atomic = true;
        let result = f();
        self.execution.borrow_mut().atomic = false;
        result
    }

    /// Fire one lifecycle phase: the command-qualified topic first, then the
    /// generic one, sharing a single record so cancellation in the first
    /// suppresses the second.
    fn fire_phase(&self, action: &Action, phase: &str) -> CommandResult {
        let payload = CommandPayload {
            command: action.command.clone(),
            context: action.context.clone(),
        };
        let mut event = BusEvent::new("", payload);
        self.bus
            .fire_as(&topics::command_phase(&action.command, phase), &mut event)?;
        if !event.propagation_stopped() {
            self.bus.fire_as(&topics::phase(phase), &mut event)?;
        }
        Ok(())
    }

    /// Open a new action on the in-flight list, joining the current batch
    /// (or allocating a fresh one at the root of a call tree).
    fn push_new_action(&self, command: &str, context: CommandContext) -> CommandResult<Action> {
        let mut execution = self.execution.borrow_mut();
        if execution.atomic {
            return Err(CommandError::AtomicViolation(command.to_owned()));
        }
        let id = execution
            .actions
            .first()
            .map_or_else(|| self.fresh_batch(), |first| first.id);
        let action = Action {
            command: command.to_owned(),
            context,
            id,
        };
        execution.actions.push(action.clone());
        Ok(action)
    }

    /// Re-push an action that already carries its batch id.
    fn push_action(&self, action: Action) -> CommandResult {
        let mut execution = self.execution.borrow_mut();
        if execution.atomic {
            return Err(CommandError::AtomicViolation(action.command.clone()));
        }
        execution.actions.push(action);
        Ok(())
    }

    /// Close the innermost in-flight action. When the outermost call
    /// returns, announce the aggregated dirty set and the stack change.
    fn pop_action(&self) -> CommandResult {
        let completed = {
            let mut execution = self.execution.borrow_mut();
            execution.actions.pop();
            if execution.actions.is_empty() {
                let dirty = std::mem::take(&mut execution.dirty);
                let trigger = execution.trigger.take();
                Some((dirty, trigger))
            } else {
                None
            }
        };
        let Some((dirty, trigger)) = completed else {
            return Ok(());
        };

        let elements = dedup_reversed(dirty);
        self.bus
            .fire(topics::ELEMENTS_CHANGED, ElementsChangedPayload { elements })?;
        // The trigger is always set by the entry points before any push.
        let trigger = trigger.unwrap_or(Trigger::Execute);
        self.bus
            .fire(topics::STACK_CHANGED, StackChangedPayload { trigger })?;
        Ok(())
    }

    /// Advance the stack pointer; for non-replay commits, splice the action
    /// in there, discarding any abandoned redo branch.
    fn commit_action(&self, action: &Action, redo: bool) {
        let next = self.stack_index.get().map_or(0, |index| index + 1);
        self.stack_index.set(Some(next));
        if !redo {
            let mut stack = self.stack.borrow_mut();
            stack.truncate(next);
            stack.push(action.clone());
        }
    }

    fn retract_action(&self) {
        self.stack_index.set(match self.stack_index.get() {
            Some(0) | None => None,
            Some(index) => Some(index - 1),
        });
    }

    fn mark_dirty(&self, touched: Vec<E>) {
        if touched.is_empty() {
            return;
        }
        self.execution.borrow_mut().dirty.extend(touched);
    }

    fn undo_action(&self) -> Option<Action> {
        let index = self.stack_index.get()?;
        self.stack.borrow().get(index).cloned()
    }

    fn redo_action(&self) -> Option<Action> {
        let next = self.stack_index.get().map_or(0, |index| index + 1);
        self.stack.borrow().get(next).cloned()
    }

    fn fresh_batch(&self) -> BatchId {
        let id = self.next_batch.get();
        self.next_batch.set(id + 1);
        BatchId(id)
    }

    /// Root-level error unwind: reset the in-flight record so a later
    /// operation cannot inherit a stale batch id or half-accumulated dirty
    /// set.
    fn finish(&self, is_root: bool, result: CommandResult) -> CommandResult {
        if let Err(error) = &result {
            if is_root {
                tracing::debug!(
                    target: "easel.commands",
                    error = %error,
                    "operation aborted, resetting in-flight state"
                );
                let mut execution = self.execution.borrow_mut();
                execution.actions.clear();
                execution.dirty.clear();
                execution.trigger = None;
                execution.atomic = false;
            }
        }
        result
    }
}

/// Reverse-accumulate the dirty set: most recently touched first, first
/// occurrence wins.
fn dedup_reversed<E: PartialEq>(mut dirty: Vec<E>) -> Vec<E> {
    dirty.reverse();
    let mut unique: Vec<E> = Vec::with_capacity(dirty.len());
    for element in dirty {
        if !unique.contains(&element) {
            unique.push(element);
        }
    }
    unique
}

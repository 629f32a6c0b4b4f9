#![forbid(unsafe_code)]

//! Name → handler table with duplicate-registration protection.

use std::rc::Rc;

use ahash::AHashMap;

use super::handler::{CommandError, CommandHandler, CommandResult};

/// Registry mapping command names to their handlers.
///
/// A name binds at most one handler for the lifetime of the owning stack;
/// re-binding is a programmer error, not a supported override mechanism.
pub struct CommandRegistry<E> {
    handlers: AHashMap<String, Rc<dyn CommandHandler<E>>>,
}

impl<E> Default for CommandRegistry<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E> std::fmt::Debug for CommandRegistry<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandRegistry")
            .field("commands", &self.handlers.len())
            .finish()
    }
}

impl<E> CommandRegistry<E> {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self {
            handlers: AHashMap::new(),
        }
    }

    /// Bind `handler` to `command`.
    ///
    /// Fails with [`CommandError::InvalidRegistration`] on an empty name and
    /// [`CommandError::DuplicateHandler`] when the name is already bound.
    pub fn register(&mut self, command: &str, handler: Rc<dyn CommandHandler<E>>) -> CommandResult {
        if command.is_empty() {
            return Err(CommandError::InvalidRegistration);
        }
        if self.handlers.contains_key(command) {
            return Err(CommandError::DuplicateHandler(command.to_owned()));
        }
        self.handlers.insert(command.to_owned(), handler);
        Ok(())
    }

    /// Construct a handler through `factory`, then bind it.
    ///
    /// Dependency resolution is the factory's business; this is just the
    /// construct-then-register convenience.
    pub fn register_factory<F>(&mut self, command: &str, factory: F) -> CommandResult
    where
        F: FnOnce() -> Rc<dyn CommandHandler<E>>,
    {
        if command.is_empty() {
            return Err(CommandError::InvalidRegistration);
        }
        self.register(command, factory())
    }

    /// Look up the handler bound to `command`.
    #[must_use]
    pub fn get(&self, command: &str) -> Option<Rc<dyn CommandHandler<E>>> {
        self.handlers.get(command).cloned()
    }

    /// Whether `command` has a handler.
    #[must_use]
    pub fn is_registered(&self, command: &str) -> bool {
        self.handlers.contains_key(command)
    }

    /// Number of registered commands.
    #[must_use]
    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    /// Whether no command is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::context::CommandContext;

    struct Noop;
    impl CommandHandler<u32> for Noop {}

    #[test]
    fn test_register_and_lookup() {
        let mut registry = CommandRegistry::<u32>::new();
        registry.register("shape.create", Rc::new(Noop)).unwrap();

        assert!(registry.is_registered("shape.create"));
        assert!(!registry.is_registered("shape.delete"));
        assert_eq!(registry.len(), 1);

        let handler = registry.get("shape.create").unwrap();
        assert!(handler.can_execute(&CommandContext::new(())));
    }

    #[test]
    fn test_duplicate_rejected() {
        let mut registry = CommandRegistry::<u32>::new();
        registry.register("shape.create", Rc::new(Noop)).unwrap();

        let err = registry.register("shape.create", Rc::new(Noop)).unwrap_err();
        assert!(matches!(err, CommandError::DuplicateHandler(name) if name == "shape.create"));
    }

    #[test]
    fn test_empty_name_rejected() {
        let mut registry = CommandRegistry::<u32>::new();
        let err = registry.register("", Rc::new(Noop)).unwrap_err();
        assert!(matches!(err, CommandError::InvalidRegistration));
    }

    #[test]
    fn test_factory_delegates() {
        let mut registry = CommandRegistry::<u32>::new();
        registry
            .register_factory("shape.move", || Rc::new(Noop))
            .unwrap();
        assert!(registry.is_registered("shape.move"));

        // The factory must not run for an invalid name.
        let err = registry
            .register_factory("", || -> Rc<dyn CommandHandler<u32>> {
                panic!("factory must not run")
            })
            .unwrap_err();
        assert!(matches!(err, CommandError::InvalidRegistration));
    }
}

#![forbid(unsafe_code)]

//! The shared command context.
//!
//! One context travels with a command through all of its lifecycle phases:
//! the stack stores it on the recorded action, handlers read and write it,
//! and listeners receive it inside [`CommandPayload`](super::CommandPayload).
//! It is a cheaply cloneable handle over a type-erased value, so every party
//! observes the same mutable state — a handler typically stashes the
//! information its `revert` will need right next to the input it received.

use std::any::Any;
use std::cell::{Ref, RefCell, RefMut};
use std::fmt;
use std::rc::Rc;

/// Cloneable handle to one command invocation's mutable context.
#[derive(Clone)]
pub struct CommandContext {
    inner: Rc<RefCell<Box<dyn Any>>>,
}

impl CommandContext {
    /// Wrap `value` as a command context.
    #[must_use]
    pub fn new<T: Any>(value: T) -> Self {
        Self {
            inner: Rc::new(RefCell::new(Box::new(value))),
        }
    }

    /// Whether the context currently holds a `T`.
    #[must_use]
    pub fn is<T: Any>(&self) -> bool {
        self.inner.borrow().as_ref().is::<T>()
    }

    /// Immutably borrow the context as `T`.
    ///
    /// Returns `None` when the context holds a different type.
    #[must_use]
    pub fn borrow<T: Any>(&self) -> Option<Ref<'_, T>> {
        Ref::filter_map(self.inner.borrow(), |boxed| {
            boxed.as_ref().downcast_ref::<T>()
        })
        .ok()
    }

    /// Mutably borrow the context as `T`.
    #[must_use]
    pub fn borrow_mut<T: Any>(&self) -> Option<RefMut<'_, T>> {
        RefMut::filter_map(self.inner.borrow_mut(), |boxed| {
            boxed.as_mut().downcast_mut::<T>()
        })
        .ok()
    }

    /// Run `f` with mutable access to the context as `T`.
    ///
    /// Returns `None` (without running `f`) when the context holds a
    /// different type.
    pub fn with<T: Any, R>(&self, f: impl FnOnce(&mut T) -> R) -> Option<R> {
        let mut borrowed = self.borrow_mut::<T>()?;
        Some(f(&mut borrowed))
    }

    /// Whether `other` is a handle to the same context.
    #[must_use]
    pub fn same_as(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }
}

impl fmt::Debug for CommandContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CommandContext").finish_non_exhaustive()
    }
}

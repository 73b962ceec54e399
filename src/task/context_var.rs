//! A dynamically-scoped variable: `set(value, body)` binds `value` for the
//! duration of `body`'s execution (including across suspension points,
//! since the binding lives on a stack rather than in a call-stack local),
//! and `get_exn` reads the innermost binding. One of the cooperative task
//! library's required primitives (see the crate's "variables" external
//! collaborator); this runtime threads the [`crate::Scheduler`] through
//! explicit parameters instead of through a binding, but callers composing
//! their own fiber-local state (a request id, a tracing span) can reach
//! for this directly.

use std::cell::RefCell;
use std::future::Future;
use std::pin::Pin;
use std::rc::Rc;
use std::task::{Context, Poll};

pub struct ContextVar<T> {
    stack: Rc<RefCell<Vec<T>>>,
}

impl<T> Clone for ContextVar<T> {
    fn clone(&self) -> Self {
        ContextVar { stack: self.stack.clone() }
    }
}

impl<T: Clone> ContextVar<T> {
    pub fn new() -> Self {
        ContextVar { stack: Rc::new(RefCell::new(Vec::new())) }
    }

    /// Binds `value` for the duration of `body`, then pops the binding
    /// regardless of how `body` completes (including across `.await`
    /// points, since the stack itself -- not a guard tied to a single
    /// poll -- holds the binding).
    pub fn set<F>(&self, value: T, body: F) -> SetScope<T, F>
    where
        F: Future,
    {
        SetScope { var: self.clone(), value: Some(value), body }
    }

    /// Reads the innermost binding. Panics if nothing is currently bound.
    pub fn get_exn(&self) -> T {
        self.stack.borrow().last().cloned().expect("context variable not bound")
    }

    pub fn try_get(&self) -> Option<T> {
        self.stack.borrow().last().cloned()
    }
}

impl<T: Clone> Default for ContextVar<T> {
    fn default() -> Self {
        Self::new()
    }
}

pub struct SetScope<T, F> {
    var: ContextVar<T>,
    value: Option<T>,
    body: F,
}

impl<T: Clone, F: Future> Future for SetScope<T, F> {
    type Output = F::Output;

    // The binding is only live while `body` is synchronously executing
    // inside this `poll` call, not across the suspension points it
    // contains: pushing once and popping only on completion would leak
    // the binding into whatever other task runs while this one is
    // parked, since the stack is shared by every user of this variable.
    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<F::Output> {
        // Safety: we never move `body` out except via this pin projection,
        // and `SetScope` is always accessed through a `Pin<&mut Self>`.
        let this = unsafe { self.get_unchecked_mut() };
        let value = this.value.take().unwrap_or_else(|| this.var.get_exn());
        this.var.stack.borrow_mut().push(value.clone());
        this.value = Some(value);
        let body = unsafe { Pin::new_unchecked(&mut this.body) };
        let result = body.poll(cx);
        this.var.stack.borrow_mut().pop();
        result
    }
}

//! A single-fire promise ("ivar"): write-once, read-many, suspending until
//! filled. The direct analogue of `ocl`'s `Event`/`Future` pair (see
//! `standard/event.rs`'s `set_unpark_callback` + `impl Future for Event`)
//! generalized away from OpenCL completion callbacks to a plain value.

use std::cell::RefCell;
use std::future::Future;
use std::pin::Pin;
use std::rc::Rc;
use std::task::{Context, Poll, Waker};

struct Inner<T> {
    value: Option<T>,
    wakers: Vec<Waker>,
}

/// A write-once cell. Cloning an `Ivar` shares the same cell; any clone
/// can fill it, any clone can be awaited.
pub struct Ivar<T> {
    inner: Rc<RefCell<Inner<T>>>,
}

impl<T> Clone for Ivar<T> {
    fn clone(&self) -> Self {
        Ivar { inner: self.inner.clone() }
    }
}

impl<T: Clone> Ivar<T> {
    pub fn new() -> Self {
        Ivar { inner: Rc::new(RefCell::new(Inner { value: None, wakers: Vec::new() })) }
    }

    /// Resolves the ivar. Filling an already-filled ivar is a programmer
    /// error: ivars are write-once by contract.
    pub fn fill(&self, value: T) {
        let wakers = {
            let mut inner = self.inner.borrow_mut();
            assert!(inner.value.is_none(), "ivar filled twice");
            inner.value = Some(value);
            std::mem::take(&mut inner.wakers)
        };
        for waker in wakers {
            waker.wake();
        }
    }

    /// Non-suspending read: `Some(value)` if already filled.
    pub fn peek(&self) -> Option<T> {
        self.inner.borrow().value.clone()
    }

    pub fn is_filled(&self) -> bool {
        self.inner.borrow().value.is_some()
    }

    /// A future that resolves once the ivar is filled.
    pub fn read(&self) -> Read<T> {
        Read { ivar: self.clone() }
    }
}

impl<T: Clone> Default for Ivar<T> {
    fn default() -> Self {
        Self::new()
    }
}

pub struct Read<T> {
    ivar: Ivar<T>,
}

impl<T: Clone> Future for Read<T> {
    type Output = T;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<T> {
        let mut inner = self.ivar.inner.borrow_mut();
        if let Some(v) = &inner.value {
            Poll::Ready(v.clone())
        } else {
            inner.wakers.push(cx.waker().clone());
            Poll::Pending
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn peek_before_and_after_fill() {
        let iv: Ivar<u32> = Ivar::new();
        assert_eq!(iv.peek(), None);
        iv.fill(7);
        assert_eq!(iv.peek(), Some(7));
    }

    #[test]
    #[should_panic(expected = "filled twice")]
    fn double_fill_panics() {
        let iv: Ivar<u32> = Ivar::new();
        iv.fill(1);
        iv.fill(2);
    }
}

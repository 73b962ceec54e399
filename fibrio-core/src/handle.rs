//! A reference-counted handle with an explicit finalizer, in the shape of
//! the retain/release pairs `ocl-core` generates for every OpenCL object
//! (`clRetainEvent`/`clReleaseEvent`, `clRetainCommandQueue`/
//! `clReleaseCommandQueue`, ...): a shared owner around some `data`, whose
//! `finalize` callback runs exactly once, when the last reference is
//! released.

use std::cell::RefCell;
use std::rc::Rc;

enum State<T> {
    Open { data: T, count: usize },
    Closed,
}

/// A single-threaded (`Rc`-based) ref-counted handle. Every clone shares
/// the same underlying data and finalizer; `release` on the last clone
/// runs the finalizer and transitions the handle to `Closed`. Any
/// subsequent `get` is a programmer error, matching the "operating on a
/// closed handle" family the runtime treats as fatal.
pub struct Handle<T> {
    inner: Rc<RefCell<State<T>>>,
    finalize: Rc<dyn Fn(&T)>,
}

impl<T> Handle<T> {
    pub fn new(data: T, finalize: impl Fn(&T) + 'static) -> Self {
        Handle {
            inner: Rc::new(RefCell::new(State::Open { data, count: 1 })),
            finalize: Rc::new(finalize),
        }
    }

    /// Creates an additional owning reference, bumping the count.
    pub fn retain(&self) -> Self {
        if let State::Open { count, .. } = &mut *self.inner.borrow_mut() {
            *count += 1;
        } else {
            panic!("retain on a closed handle");
        }
        Handle { inner: self.inner.clone(), finalize: self.finalize.clone() }
    }

    /// Runs `f` against the underlying data. Panics if the handle has
    /// already been released to zero.
    pub fn with<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        match &*self.inner.borrow() {
            State::Open { data, .. } => f(data),
            State::Closed => panic!("use of a closed handle"),
        }
    }

    pub fn is_open(&self) -> bool {
        matches!(&*self.inner.borrow(), State::Open { .. })
    }

    /// Decrements the reference count; runs the finalizer exactly once,
    /// when the count reaches zero. Releasing an already-closed handle is
    /// a silent no-op (mirrors `clRelease*` tolerating double release of
    /// the same retained reference only up to its count, not past it --
    /// callers here are expected to release each clone exactly once).
    pub fn release(&self) {
        let mut inner = self.inner.borrow_mut();
        let should_finalize = match &mut *inner {
            State::Open { count, .. } => {
                *count -= 1;
                *count == 0
            }
            State::Closed => false,
        };
        if should_finalize {
            if let State::Open { data, .. } = std::mem::replace(&mut *inner, State::Closed) {
                (self.finalize)(&data);
            }
        }
    }
}

impl<T> Clone for Handle<T> {
    fn clone(&self) -> Self {
        self.retain()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;
    use std::rc::Rc;

    #[test]
    fn finalizes_once_at_zero() {
        let finalized = Rc::new(Cell::new(0));
        let f = finalized.clone();
        let h = Handle::new(42, move |_| f.set(f.get() + 1));
        let h2 = h.clone();
        assert!(h.is_open());
        h.release();
        assert!(h2.is_open());
        h2.release();
        assert!(!h2.is_open());
        assert_eq!(finalized.get(), 1);
    }

    #[test]
    fn double_release_of_closed_is_noop() {
        let finalized = Rc::new(Cell::new(0));
        let f = finalized.clone();
        let h = Handle::new((), move |_| f.set(f.get() + 1));
        h.release();
        h.release();
        assert_eq!(finalized.get(), 1);
    }
}

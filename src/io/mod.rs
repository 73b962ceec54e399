//! Buffered I/O atop a [`crate::descriptor::Descriptor`] and a
//! [`fibrio_core::BipBuffer`]: a [`Reader`] and a [`Writer`], each with
//! its own grow-or-compress staging policy.

pub mod reader;
pub mod writer;

pub use reader::Reader;
pub use writer::Writer;

use fibrio_core::BipBuffer;
use std::cell::RefCell;
use std::rc::Rc;

/// Grows `buffer` (via compress, then a reallocation) until a reservation
/// of `len` bytes succeeds, then returns it. Shared by [`Reader::refill`]
/// and [`Writer::prepare`]; this is the one retry policy both sides use.
pub(crate) fn reserve_with_growth(buffer: &Rc<RefCell<BipBuffer>>, len: usize) -> fibrio_core::Reservation {
    {
        let mut buf = buffer.borrow_mut();
        if let Some(r) = buf.reserve(len) {
            return r;
        }
        if buf.compress_gain() >= len {
            buf.compress();
            if let Some(r) = buf.reserve(len) {
                return r;
            }
        }
    }
    let mut buf = buffer.borrow_mut();
    let new_capacity = buf.length() + len;
    buf.resize(new_capacity);
    buf.reserve(len).expect("reservation must succeed immediately after growing to fit")
}

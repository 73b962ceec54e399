//! Buffered reader: refill a [`fibrio_core::BipBuffer`] from the
//! descriptor with non-blocking reads, exposing the oldest committed
//! slice for the caller to consume from.

use std::cell::RefCell;
use std::io;
use std::rc::Rc;

use fibrio_core::BipBuffer;
use tracing::trace;

use crate::descriptor::{Descriptor, Direction};
use crate::io::reserve_with_growth;

/// The result of [`Reader::available`]: either some bytes are ready (or
/// the buffer is simply empty with more to come), or the stream has
/// reached end-of-file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Availability {
    Bytes(usize),
    Eof,
}

pub struct Reader {
    descriptor: Descriptor,
    buffer: Rc<RefCell<BipBuffer>>,
    eof: std::cell::Cell<bool>,
}

impl Reader {
    pub fn new(descriptor: Descriptor, initial_capacity: usize) -> Self {
        Reader {
            descriptor,
            buffer: Rc::new(RefCell::new(BipBuffer::new(initial_capacity))),
            eof: std::cell::Cell::new(false),
        }
    }

    /// The oldest contiguous committed slice. Panics if the buffer is
    /// currently empty; callers should check [`Reader::available`] (or
    /// call [`Reader::refill`]) first.
    pub fn buffer(&self) -> std::cell::Ref<'_, BipBuffer> {
        let buf = self.buffer.borrow();
        assert!(!buf.is_empty(), "Reader::buffer called on an empty reader");
        buf
    }

    pub fn consume(&self, n: usize) {
        self.buffer.borrow_mut().junk(n);
    }

    /// Releases this reader's reference to its descriptor. If the same
    /// descriptor backs a paired [`crate::io::Writer`] (the
    /// `create_rw`/duplex-stream case), that side must release its own
    /// reference too -- the finalizer (stop and destroy the watcher, then
    /// close the fd) only runs once every reference is released. Using the
    /// reader again afterward is a programmer error.
    pub fn close(&self) {
        self.descriptor.release();
    }

    pub fn available(&self) -> Availability {
        let length = self.buffer.borrow().length();
        if length == 0 && self.eof.get() {
            Availability::Eof
        } else {
            Availability::Bytes(length)
        }
    }

    /// Ensures room for at least `size` more bytes, awaits read
    /// readiness, and issues a single non-blocking read. `0` bytes or
    /// `EBADF` marks end-of-file; other errors propagate.
    pub async fn refill(&self, size: usize) -> io::Result<()> {
        if self.eof.get() {
            return Ok(());
        }
        let reservation = reserve_with_growth(&self.buffer, size);
        self.descriptor.ready(Direction::Read).await;

        let mut scratch = vec![0u8; reservation.len];
        loop {
            match fibrio_core::os::read(self.descriptor.fd(), &mut scratch) {
                Ok(0) => {
                    self.eof.set(true);
                    self.buffer.borrow_mut().commit(0);
                    return Ok(());
                }
                Ok(n) => {
                    self.buffer.borrow_mut().reservation_slice()[..n].copy_from_slice(&scratch[..n]);
                    self.buffer.borrow_mut().commit(n);
                    trace!(bytes = n, "reader refilled");
                    return Ok(());
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                    self.descriptor.ready(Direction::Read).await;
                    continue;
                }
                Err(e) if e.raw_os_error() == Some(libc::EBADF) => {
                    self.eof.set(true);
                    self.buffer.borrow_mut().commit(0);
                    return Ok(());
                }
                Err(e) => {
                    self.buffer.borrow_mut().commit(0);
                    return Err(e);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler;

    #[test]
    fn reader_observes_eof_after_writer_closes() {
        scheduler::run(Default::default(), |sched| async move {
            let (read_fd, write_fd) = fibrio_core::os::pipe().unwrap();
            let descriptor = Descriptor::new(sched.clone(), read_fd, fibrio_core::Interest::READABLE).unwrap();
            let reader = Reader::new(descriptor, 64);

            fibrio_core::os::write(write_fd, b"hi").unwrap();
            let _ = fibrio_core::os::close(write_fd);

            let mut collected = Vec::new();
            loop {
                match reader.available() {
                    Availability::Eof => break,
                    Availability::Bytes(0) => reader.refill(64).await.unwrap(),
                    Availability::Bytes(_) => {
                        let chunk = reader.buffer().peek().unwrap().to_vec();
                        reader.consume(chunk.len());
                        collected.extend_from_slice(&chunk);
                    }
                }
            }
            assert_eq!(collected, b"hi");
            reader.close();
        })
        .unwrap();
    }
}

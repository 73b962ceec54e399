//! Buffered writer: stage bytes into a [`fibrio_core::BipBuffer`], flush
//! to the descriptor with non-blocking writes, retrying on `EAGAIN` after
//! re-awaiting write-readiness.

use std::cell::RefCell;
use std::io;
use std::rc::Rc;

use fibrio_core::BipBuffer;
use tracing::trace;

use crate::descriptor::{Descriptor, Direction};
use crate::io::reserve_with_growth;
use crate::task::Mutex;

pub struct Writer {
    descriptor: Descriptor,
    buffer: Rc<RefCell<BipBuffer>>,
    mutex: Mutex,
}

impl Writer {
    pub fn new(descriptor: Descriptor, initial_capacity: usize) -> Self {
        Writer {
            descriptor,
            buffer: Rc::new(RefCell::new(BipBuffer::new(initial_capacity))),
            mutex: Mutex::new(),
        }
    }

    /// Reserves up to `len` contiguous bytes for direct writing, growing
    /// the underlying buffer (via compress, then reallocation) if neither
    /// alone makes room. Returns the buffer, borrowed mutably for the
    /// duration of the reservation, so the caller can blit bytes into
    /// `buf.reservation_slice()`. Pair with [`Writer::commit`]; unlike
    /// `with_transaction`, `prepare`/`commit` do not take the writer's
    /// transaction lock themselves -- callers juggling the two across
    /// suspension points are responsible for their own serialization.
    pub fn prepare(&self, len: usize) -> std::cell::RefMut<'_, BipBuffer> {
        reserve_with_growth(&self.buffer, len);
        self.buffer.borrow_mut()
    }

    /// Commits `len` bytes of the reservation returned by [`Writer::prepare`].
    pub fn commit(&self, len: usize) {
        self.buffer.borrow_mut().commit(len);
    }

    /// Acquires the writer's transaction lock, hands the closure a
    /// writable slice of up to `max` bytes (via [`Writer::prepare`]),
    /// commits however many of it the closure says it used (via
    /// [`Writer::commit`]), and releases the lock -- all before returning.
    pub async fn with_transaction<F, R>(&self, max: usize, f: F) -> R
    where
        F: FnOnce(&mut [u8]) -> (usize, R),
    {
        self.mutex
            .with_lock(move || async move {
                let (written, result) = {
                    let mut buf = self.prepare(max);
                    let slice = buf.reservation_slice();
                    f(slice)
                };
                debug_assert!(written <= max);
                self.commit(written);
                result
            })
            .await
    }

    /// Releases this writer's reference to its descriptor. If the same
    /// descriptor backs a paired [`crate::io::Reader`] (the
    /// `create_rw`/duplex-stream case), that side must release its own
    /// reference too -- the finalizer (stop and destroy the watcher, then
    /// close the fd) only runs once every reference is released. Using the
    /// writer again afterward is a programmer error.
    pub fn close(&self) {
        self.descriptor.release();
    }

    /// Drains every committed byte to the descriptor, awaiting
    /// write-readiness and retrying on `EAGAIN` as needed.
    pub async fn flush(&self) -> io::Result<()> {
        loop {
            let slice_owned: Option<Vec<u8>> = self.buffer.borrow().peek().map(|s| s.to_vec());
            let pending = match slice_owned {
                Some(bytes) => bytes,
                None => return Ok(()),
            };

            self.descriptor.ready(Direction::Write).await;
            match fibrio_core::os::write(self.descriptor.fd(), &pending) {
                Ok(n) => {
                    self.buffer.borrow_mut().junk(n);
                    trace!(bytes = n, "writer flushed");
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => continue,
                Err(e) => return Err(e),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler;

    #[test]
    fn writer_grows_past_its_initial_capacity() {
        scheduler::run(Default::default(), |sched| async move {
            let (read_fd, write_fd) = fibrio_core::os::pipe().unwrap();
            let descriptor = Descriptor::new(sched.clone(), write_fd, fibrio_core::Interest::WRITABLE).unwrap();
            let writer = Writer::new(descriptor, 8);

            let payload = vec![b'x'; 10_000];
            writer
                .with_transaction(payload.len(), |slice| {
                    slice.copy_from_slice(&payload);
                    (payload.len(), ())
                })
                .await;
            writer.flush().await.unwrap();

            let mut total = 0usize;
            let mut buf = [0u8; 4096];
            while total < payload.len() {
                match fibrio_core::os::read(read_fd, &mut buf) {
                    Ok(0) => break,
                    Ok(n) => total += n,
                    Err(e) if e.kind() == io::ErrorKind::WouldBlock => continue,
                    Err(e) => panic!("{e}"),
                }
            }
            assert_eq!(total, payload.len());
            writer.close();
            let _ = fibrio_core::os::close(read_fd);
        })
        .unwrap();
    }

    #[test]
    fn prepare_and_commit_write_a_partial_reservation() {
        scheduler::run(Default::default(), |sched| async move {
            let (read_fd, write_fd) = fibrio_core::os::pipe().unwrap();
            let descriptor = Descriptor::new(sched.clone(), write_fd, fibrio_core::Interest::WRITABLE).unwrap();
            let writer = Writer::new(descriptor, 64);

            {
                let mut buf = writer.prepare(10);
                buf.reservation_slice()[..3].copy_from_slice(b"abc");
                drop(buf);
                writer.commit(3);
            }
            writer.flush().await.unwrap();

            let mut got = [0u8; 3];
            let mut total = 0usize;
            while total < got.len() {
                match fibrio_core::os::read(read_fd, &mut got[total..]) {
                    Ok(0) => break,
                    Ok(n) => total += n,
                    Err(e) if e.kind() == io::ErrorKind::WouldBlock => continue,
                    Err(e) => panic!("{e}"),
                }
            }
            assert_eq!(&got, b"abc");
            writer.close();
            let _ = fibrio_core::os::close(read_fd);
        })
        .unwrap();
    }
}

//! Non-blocking TCP connect, and a listener that spawns one session task
//! per accepted connection via a [`crate::task::Pool`].

use std::cell::Cell;
use std::net::SocketAddr;
use std::os::unix::io::RawFd;
use std::rc::Rc;

use tracing::{debug, trace};

use crate::descriptor::{Descriptor, Direction};
use crate::error::Result;
use crate::scheduler::Scheduler;
use crate::task::{Ivar, Pool};

/// A connected, non-blocking socket. Carries its own [`Descriptor`] so
/// read/write halves built from it (via [`crate::io::Reader`]/
/// [`crate::io::Writer`]) can share ownership.
pub struct Session {
    pub descriptor: Descriptor,
}

impl Session {
    /// Releases this session's reference to its descriptor. Prefer closing
    /// the [`crate::io::Reader`]/[`crate::io::Writer`] built from
    /// [`Session::descriptor`] instead once those exist -- each holds its
    /// own retained reference, and this only releases the session's own.
    pub fn close(&self) {
        self.descriptor.release();
    }
}

/// Connects to `addr`, suspending the calling fiber until the connection
/// completes (or fails). Tolerates `EINPROGRESS` (the common case) and
/// `EISCONN` (already connected, e.g. a spurious immediate success).
pub async fn connect(scheduler: &Scheduler, addr: SocketAddr) -> Result<Session> {
    let domain = if addr.is_ipv4() { libc::AF_INET } else { libc::AF_INET6 };
    let fd: RawFd = unsafe { libc::socket(domain, libc::SOCK_STREAM | libc::SOCK_CLOEXEC, 0) };
    if fd < 0 {
        return Err(std::io::Error::last_os_error().into());
    }

    let immediate = fibrio_core::os::connect_nonblocking(fd, &addr)?;
    // Registered for both directions up front: once connected this
    // descriptor backs a Reader and a Writer sharing the same fd.
    let descriptor = Descriptor::new(
        scheduler.clone(),
        fd,
        fibrio_core::Interest::READABLE | fibrio_core::Interest::WRITABLE,
    )?;
    if !immediate {
        descriptor.ready(Direction::Write).await;
        fibrio_core::os::connect_error(fd)?;
    }
    Ok(Session { descriptor })
}

/// A listening socket, accepting connections and running one session task
/// per connection through an internal [`Pool`].
pub struct Server {
    scheduler: Scheduler,
    fd: RawFd,
    descriptor: Descriptor,
    pool: Pool,
    closed: Rc<Cell<bool>>,
}

impl Server {
    pub fn bind(scheduler: Scheduler, addr: SocketAddr, backlog: i32) -> Result<Self> {
        let fd = fibrio_core::os::bind_listen(&addr, backlog)?;
        let descriptor = Descriptor::new(scheduler.clone(), fd, fibrio_core::Interest::READABLE)?;
        let pool = Pool::new(scheduler.clone());
        Ok(Server { scheduler, fd, descriptor, pool, closed: Rc::new(Cell::new(false)) })
    }

    /// Runs the accept loop, spawning `session(Session)` for each
    /// accepted connection, until [`Server::close`] is called. Awaits
    /// completion of both the accept loop and every still-running session.
    pub async fn serve<F, Fut>(&self, session: F)
    where
        F: Fn(Session) -> Fut + Clone + 'static,
        Fut: std::future::Future<Output = ()> + 'static,
    {
        let accept_loop = async {
            while !self.closed.get() {
                self.descriptor.ready(Direction::Read).await;
                loop {
                    match fibrio_core::os::accept(self.fd) {
                        Ok(Some(client_fd)) => {
                            let Ok(client) = Descriptor::new(
                                self.scheduler.clone(),
                                client_fd,
                                fibrio_core::Interest::READABLE | fibrio_core::Interest::WRITABLE,
                            ) else {
                                continue;
                            };
                            trace!(fd = client_fd, "server accepted connection");
                            let session = session.clone();
                            self.pool.task(async move { session(Session { descriptor: client }).await });
                        }
                        Ok(None) => break,
                        Err(e) => {
                            debug!(error = %e, "accept failed");
                            break;
                        }
                    }
                }
            }
        };
        crate::task::fork_join(accept_loop, self.pool.run()).await;
    }

    /// Idempotent. Stops accepting new connections and wakes the accept
    /// loop so `serve` can return; does not interrupt sessions already
    /// running.
    pub fn close(&self) {
        if self.closed.replace(true) {
            return;
        }
        self.pool.stop();
        // Wake any fiber parked in the accept loop's `ready(Read)` await
        // before tearing the descriptor down, so `serve`'s accept loop
        // observes `closed` on its next poll instead of suspending
        // forever on a watcher that's about to be destroyed.
        self.descriptor.wake_all();
        // `release` runs the descriptor's finalizer on last reference,
        // which deregisters the reactor watcher and closes `self.fd`.
        self.descriptor.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::{Reader, Writer};
    use crate::scheduler;
    use std::net::{IpAddr, Ipv4Addr};

    #[test]
    fn server_accepts_and_echoes() {
        scheduler::run(Default::default(), |sched| async move {
            let addr = SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 0);
            let server = Rc::new(Server::bind(sched.clone(), addr, 16).unwrap());
            let bound_addr = fibrio_core::os::local_addr(server.fd).unwrap();

            let server_for_serve = server.clone();
            sched.spawn(async move {
                server_for_serve
                    .serve(|session: Session| async move {
                        let reader = Reader::new(session.descriptor.retain(), 64);
                        let writer = Writer::new(session.descriptor, 64);
                        reader.refill(64).await.unwrap();
                        let bytes = reader.buffer().peek().unwrap().to_vec();
                        reader.consume(bytes.len());
                        writer
                            .with_transaction(bytes.len(), |slice| {
                                slice[..bytes.len()].copy_from_slice(&bytes);
                                (bytes.len(), ())
                            })
                            .await;
                        writer.flush().await.unwrap();
                        reader.close();
                        writer.close();
                    })
                    .await;
            });

            let client = connect(&sched, bound_addr).await.unwrap();
            let reader = Reader::new(client.descriptor.retain(), 64);
            let writer = Writer::new(client.descriptor, 64);
            writer
                .with_transaction(4, |slice| {
                    slice[..4].copy_from_slice(b"ping");
                    (4, ())
                })
                .await;
            writer.flush().await.unwrap();

            reader.refill(64).await.unwrap();
            let echoed = reader.buffer().peek().unwrap().to_vec();
            assert_eq!(echoed, b"ping");
            reader.close();
            writer.close();

            server.close();
        })
        .unwrap();
    }
}

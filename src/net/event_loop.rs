//! Event loop driving the [Server] on a single dispatch thread: raw packet I/O
//! through the TUN device, application requests from other threads, and
//! signals for graceful shutdown.

use std::collections::VecDeque;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, mpsc};
use std::{io, mem, ptr};

use super::tun::MTU_SIZE;
use super::{Transport, TunTransport};
use crate::error::errno;
use crate::protocol::{Server, Socket};
use crate::{Error, Result};
use crate::{debug, error, info};

/// Total number of events returned each tick (event loop cycle).
const EPOLL_MAX_EVENTS: i32 = 3;

/// The number of milliseconds that `epoll_wait()` will block for. -1 will
/// block indefinitely until an event occurs.
const EPOLL_TIMEOUT_MS: i32 = -1;

/// Possible requests which can be passed to the event loop.
#[derive(Debug)]
enum UserReq {
    /// Request to send data to the peer of the connection.
    Send(Socket, Vec<u8>, mpsc::Sender<Result<usize>>),
    /// Request to close the connection corresponding to the `Socket`.
    Close(Socket, mpsc::Sender<Result<()>>),
    /// Request to stop the event loop.
    Shutdown,
}

/// Shared state for user request handling.
#[derive(Debug)]
struct State {
    /// Handle to notify the event loop of new user requests.
    user_handle: OwnedFd,
    /// Queue of user requests.
    user_req_queue: Mutex<VecDeque<UserReq>>,
    /// Whether an event loop is draining the queue. Only changed while the
    /// queue lock is held.
    running: AtomicBool,
}

/// Cloneable handle for operating on connections from threads other than the
/// dispatch thread.
///
/// Every request is queued, the event loop is woken, and the caller blocks
/// until the request was applied on the dispatch thread. Requests are only
/// accepted while [run] is driving the handle; before it starts and after it
/// returns they fail with `BrokenPipe`.
#[derive(Debug, Clone)]
pub struct Handle {
    state: Arc<State>,
}

impl Handle {
    /// Creates a handle with its own wake-up `eventfd`.
    ///
    /// # Errors
    ///
    /// Returns an error if the `eventfd` could not be created.
    pub fn new() -> Result<Self> {
        let event_fd = unsafe { libc::eventfd(0, libc::EFD_NONBLOCK) };
        if event_fd == -1 {
            return Err(errno!("failed to create event_fd"));
        }

        Ok(Self {
            state: Arc::new(State {
                // SAFETY: `event_fd` is a freshly created descriptor owned by
                // nothing else.
                user_handle: unsafe { OwnedFd::from_raw_fd(event_fd) },
                user_req_queue: Default::default(),
                running: AtomicBool::new(false),
            }),
        })
    }

    /// Sends `buf` on the connection identified by `sock`.
    ///
    /// # Errors
    ///
    /// Returns [Error::NotFound] if the connection is gone, a `BrokenPipe`
    /// error if the event loop has stopped, or any error from the send itself.
    pub fn send(&self, sock: Socket, buf: &[u8]) -> Result<usize> {
        let (tx, rx) = mpsc::channel();
        self.submit(UserReq::Send(sock, buf.to_vec(), tx))?;

        rx.recv().map_err(|_| loop_stopped())?
    }

    /// Closes the connection identified by `sock`.
    ///
    /// # Errors
    ///
    /// Returns [Error::NotFound] if the connection is gone, a `BrokenPipe`
    /// error if the event loop has stopped, or any error from the close itself.
    pub fn close(&self, sock: Socket) -> Result<()> {
        let (tx, rx) = mpsc::channel();
        self.submit(UserReq::Close(sock, tx))?;

        rx.recv().map_err(|_| loop_stopped())?
    }

    /// Asks the event loop to exit. Does not wait for it to do so.
    pub fn shutdown(&self) -> Result<()> {
        self.submit(UserReq::Shutdown)
    }

    fn submit(&self, req: UserReq) -> Result<()> {
        {
            let mut queue = self.queue();

            if !self.state.running.load(Ordering::Acquire) {
                return Err(loop_stopped());
            }

            queue.push_back(req);
        }

        // Notify the event loop.
        let x: u64 = 1;
        let nbytes = unsafe {
            libc::write(
                self.state.user_handle.as_raw_fd(),
                &raw const x as *const libc::c_void,
                mem::size_of::<u64>(),
            )
        };

        if nbytes == -1 {
            return Err(errno!("failed to notify event loop"));
        }

        Ok(())
    }

    fn queue(&self) -> MutexGuard<'_, VecDeque<UserReq>> {
        self.state
            .user_req_queue
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Marks the handle as driven by an event loop until the returned guard
    /// is dropped.
    fn start(&self) -> Running<'_> {
        let _queue = self.queue();
        self.state.running.store(true, Ordering::Release);

        Running { handle: self }
    }

    fn event_fd(&self) -> RawFd {
        self.state.user_handle.as_raw_fd()
    }

    /// Applies every queued request to `server`, returning `true` if a
    /// shutdown was requested.
    fn process_requests<T: Transport>(&self, server: &mut Server<T>) -> bool {
        let reqs = mem::take(&mut *self.queue());

        let mut shutdown = false;

        for req in reqs {
            match req {
                UserReq::Send(sock, buf, tx) => {
                    // The requester may have given up waiting.
                    let _ = tx.send(server.send(&sock, &buf));
                }
                UserReq::Close(sock, tx) => {
                    let _ = tx.send(server.close(&sock));
                }
                UserReq::Shutdown => shutdown = true,
            }
        }

        shutdown
    }
}

/// Stops a [Handle] from accepting requests when dropped, failing everything
/// still queued.
#[derive(Debug)]
struct Running<'a> {
    handle: &'a Handle,
}

impl Drop for Running<'_> {
    fn drop(&mut self) {
        let abandoned = {
            let mut queue = self.handle.queue();
            self.handle.state.running.store(false, Ordering::Release);
            mem::take(&mut *queue)
        };

        if !abandoned.is_empty() {
            debug!("dropping {} pending user requests", abandoned.len());
        }

        // Dropping each reply sender wakes its waiting caller.
        drop(abandoned);
    }
}

/// Runs the event loop until a shutdown signal (SIGINT, SIGTERM) arrives,
/// [Handle::shutdown] is called, or an unrecoverable error occurs.
///
/// SIGINT and SIGTERM are blocked for the calling thread, so this should run
/// on the main thread, before other threads are spawned.
///
/// # Errors
///
/// Returns an error if the loop could not be set up, or if reading from the
/// TUN device or waiting on `epoll` fails.
pub fn run(server: &mut Server<TunTransport>, handle: &Handle) -> Result<()> {
    server.transport().tun().set_non_blocking()?;

    let tun_fd = server.transport().as_raw_fd();
    let signal_fd = init_signal_fd()?;
    let epoll_fd = init_epoll_fd([tun_fd, signal_fd.as_raw_fd(), handle.event_fd()])?;

    // Requests fail with `BrokenPipe` once this is dropped, on every exit path.
    let _running = handle.start();

    // Stores events for ready file descriptors.
    let mut events = [libc::epoll_event { events: 0, u64: 0 }; EPOLL_MAX_EVENTS as usize];
    let mut buf = [0u8; MTU_SIZE];

    info!(
        "listening on port {} (interface: {})",
        server.port(),
        server.transport().tun().name()
    );

    'event_loop: loop {
        let rdfs = unsafe {
            libc::epoll_wait(
                epoll_fd.as_raw_fd(),
                events.as_mut_ptr(),
                EPOLL_MAX_EVENTS,
                EPOLL_TIMEOUT_MS,
            )
        };

        if rdfs == -1 {
            if io::Error::last_os_error().kind() == io::ErrorKind::Interrupted {
                continue;
            }

            return Err(errno!("failed to wait on epoll"));
        }

        for event in events.iter().take(rdfs as usize) {
            let fd = event.u64 as RawFd;

            // A signal was caught (SIGINT or SIGTERM).
            if fd == signal_fd.as_raw_fd() {
                info!(
                    "signal caught -- shutting down, active connections remaining: {}",
                    server.len()
                );

                break 'event_loop;
            }

            // User requests are pending.
            if fd == handle.event_fd() {
                // Read from the eventfd to clear the counter.
                let mut counter = [0u8; 8];
                let _ = unsafe {
                    libc::read(
                        fd,
                        counter.as_mut_ptr() as *mut libc::c_void,
                        counter.len(),
                    )
                };

                if handle.process_requests(server) {
                    info!(
                        "shutdown requested, active connections remaining: {}",
                        server.len()
                    );

                    break 'event_loop;
                }
            }

            // Received IP packets.
            if fd == tun_fd {
                loop {
                    match server.transport().recv(&mut buf) {
                        Ok(Some(inbound)) => {
                            server.on_segment_received(inbound.src, inbound.dst, inbound.segment)
                        }
                        Ok(None) => {}
                        Err(Error::Io(err)) if err.kind() == io::ErrorKind::WouldBlock => break,
                        Err(err) => {
                            error!("failed to read from TUN interface: {err}");
                            return Err(err);
                        }
                    }
                }
            }
        }
    }

    debug!("event loop exited");

    Ok(())
}

fn loop_stopped() -> Error {
    Error::Io(io::Error::new(
        io::ErrorKind::BrokenPipe,
        "event loop is no longer running",
    ))
}

/// Creates a non-blocking `signal_fd` for SIGINT and SIGTERM signals.
fn init_signal_fd() -> Result<OwnedFd> {
    unsafe {
        let mut mask: libc::sigset_t = mem::zeroed();

        // Initialize the signal set, excluding all signals.
        if libc::sigemptyset(&raw mut mask) == -1 {
            return Err(errno!("failed to initialize signal set"));
        }

        // Add both SIGINT and SIGTERM to the set.
        if libc::sigaddset(&raw mut mask, libc::SIGINT) == -1
            || libc::sigaddset(&raw mut mask, libc::SIGTERM) == -1
        {
            return Err(errno!("failed to update signal set"));
        }

        // Blocks SIGINT and SIGTERM from being intercepted by default handlers.
        if libc::sigprocmask(libc::SIG_BLOCK, &raw const mask, ptr::null_mut()) == -1 {
            return Err(errno!("failed to block signals on signal set"));
        }

        let signal_fd = libc::signalfd(-1, &raw const mask, libc::SFD_NONBLOCK);
        if signal_fd == -1 {
            return Err(errno!("failed to create signal_fd"));
        }

        Ok(OwnedFd::from_raw_fd(signal_fd))
    }
}

/// Creates an `epoll_fd` and registers the given file descriptors for input.
fn init_epoll_fd(fds: [RawFd; 3]) -> Result<OwnedFd> {
    let epoll_fd = unsafe { libc::epoll_create1(0) };
    if epoll_fd == -1 {
        return Err(errno!("failed to create epoll_fd"));
    }

    // SAFETY: `epoll_fd` was just created and is owned by nothing else.
    let epoll_fd = unsafe { OwnedFd::from_raw_fd(epoll_fd) };

    for fd in fds {
        let mut ev = libc::epoll_event {
            events: libc::EPOLLIN as u32,
            u64: fd as u64,
        };

        if unsafe { libc::epoll_ctl(epoll_fd.as_raw_fd(), libc::EPOLL_CTL_ADD, fd, &raw mut ev) }
            == -1
        {
            return Err(errno!("failed to add to epoll interest list"));
        }
    }

    Ok(epoll_fd)
}

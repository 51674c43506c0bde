//! The reactor: one thread, one poll, one set of connections.
//!
//! Every connection is handed to exactly one worker and stays there, so
//! per-connection state needs no locks. The only cross-thread traffic is
//! the intake channel fed by the acceptor/dialer, flushed on a waker event.
//! Hang-up events are handled before anything else and release the
//! connection unconditionally; would-block is never an error, just a reason
//! to wait for the next readiness notification.

use std::io::{self, Read, Write};
use std::os::unix::io::{AsRawFd, RawFd};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc};
use std::thread;

use log::{debug, error, trace, warn};
use mio::event::Event;
use mio::{Events, Interest, Poll, Token, Waker};
use slab::Slab;

use crate::connection::{ConnState, Connection, Machine};
use crate::reader::{Chunk, MessageReader};
use crate::server::parser::Feed;

const WAKE: Token = Token(usize::MAX);

/// Handle to a reactor thread. Dropping it stops and joins the thread.
pub struct Worker {
    tx: mpsc::Sender<Connection>,
    waker: Arc<Waker>,
    running: Arc<AtomicBool>,
    thread: Option<thread::JoinHandle<()>>,
}

impl Worker {
    pub fn start(name: &str) -> io::Result<Worker> {
        let poll = Poll::new()?;
        let waker = Arc::new(Waker::new(poll.registry(), WAKE)?);
        let (tx, rx) = mpsc::channel();
        let running = Arc::new(AtomicBool::new(true));
        let loop_running = running.clone();
        let thread = thread::Builder::new().name(name.to_string()).spawn(move || {
            let mut lp = WorkerLoop {
                poll,
                rx,
                conns: Slab::new(),
                running: loop_running,
            };
            if let Err(err) = lp.run() {
                error!("worker died: {}", err);
            }
        })?;
        Ok(Worker {
            tx,
            waker,
            running,
            thread: Some(thread),
        })
    }

    /// Transfers ownership of the connection to the reactor thread.
    pub fn assign(&self, conn: Connection) {
        if self.tx.send(conn).is_ok() {
            let _ = self.waker.wake();
        }
    }

    /// A cloneable handle the acceptor thread can assign through while the
    /// worker itself stays owned by whoever joins it on shutdown.
    pub fn mailbox(&self) -> Mailbox {
        Mailbox {
            tx: self.tx.clone(),
            waker: self.waker.clone(),
        }
    }

    pub fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        let _ = self.waker.wake();
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

impl Drop for Worker {
    fn drop(&mut self) {
        self.stop();
    }
}

#[derive(Clone)]
pub struct Mailbox {
    tx: mpsc::Sender<Connection>,
    waker: Arc<Waker>,
}

impl Mailbox {
    pub fn assign(&self, conn: Connection) {
        if self.tx.send(conn).is_ok() {
            let _ = self.waker.wake();
        }
    }
}

/// What a readiness handler decided about the connection.
enum Next {
    Keep,
    Switch(Interest),
    Release,
}

struct WorkerLoop {
    poll: Poll,
    rx: mpsc::Receiver<Connection>,
    conns: Slab<Connection>,
    running: Arc<AtomicBool>,
}

impl WorkerLoop {
    fn run(&mut self) -> io::Result<()> {
        let res = self.poll_events();
        // whatever is still in flight at shutdown never gets its answer
        while let Ok(mut conn) = self.rx.try_recv() {
            conn.notify(None);
        }
        for (_, conn) in self.conns.iter_mut() {
            conn.notify(None);
        }
        res
    }

    fn poll_events(&mut self) -> io::Result<()> {
        let mut events = Events::with_capacity(256);
        while self.running.load(Ordering::SeqCst) {
            if let Err(err) = self.poll.poll(&mut events, None) {
                if err.kind() == io::ErrorKind::Interrupted {
                    continue;
                }
                return Err(err);
            }
            for event in events.iter() {
                if event.token() == WAKE {
                    self.take_new();
                } else {
                    self.dispatch(event);
                }
            }
        }
        Ok(())
    }

    fn take_new(&mut self) {
        while let Ok(conn) = self.rx.try_recv() {
            let interest = if conn.is_reading() {
                Interest::READABLE
            } else {
                Interest::WRITABLE
            };
            let key = self.conns.insert(conn);
            let conn = &mut self.conns[key];
            match self
                .poll
                .registry()
                .register(&mut conn.sock, Token(key), interest)
            {
                Ok(()) => trace!("{}: registered", conn.peer),
                Err(err) => {
                    warn!("{}: couldn't register: {}", conn.peer, err);
                    let mut conn = self.conns.remove(key);
                    conn.notify(None);
                }
            }
        }
    }

    fn dispatch(&mut self, event: &Event) {
        let key = event.token().0;
        if !self.conns.contains(key) {
            // stale event for an already-released connection
            return;
        }

        let reading = self.conns[key].is_reading();
        let hup = event.is_error()
            || (reading && event.is_read_closed())
            || (!reading && event.is_write_closed());
        if hup {
            debug!("{}: peer hung up", self.conns[key].peer);
            self.release(key);
            return;
        }

        let next = if event.is_readable() {
            handle_readable(&mut self.conns[key])
        } else if event.is_writable() {
            handle_writable(&mut self.conns[key])
        } else {
            Next::Keep
        };

        match next {
            Next::Keep => {}
            Next::Switch(interest) => {
                let conn = &mut self.conns[key];
                if let Err(err) =
                    self.poll
                        .registry()
                        .reregister(&mut conn.sock, Token(key), interest)
                {
                    warn!("{}: couldn't reregister: {}", conn.peer, err);
                    self.release(key);
                }
            }
            Next::Release => self.release(key),
        }
    }

    /// The one place a connection dies: deregister, fire the client
    /// callback if it never got its answer, drop everything.
    fn release(&mut self, key: usize) {
        let mut conn = self.conns.remove(key);
        let _ = self.poll.registry().deregister(&mut conn.sock);
        conn.notify(None);
        trace!("{}: released", conn.peer);
    }
}

fn handle_readable(conn: &mut Connection) -> Next {
    if !conn.is_reading() {
        return Next::Keep;
    }
    loop {
        // mio is edge-triggered: drain the socket until it would block
        let hint = conn.read_hint();
        let old = conn.scratch.len();
        conn.scratch.resize(old + hint, 0);
        match conn.sock.read(&mut conn.scratch[old..]) {
            Ok(0) => {
                conn.scratch.truncate(old);
                debug!("{}: closed by peer", conn.peer);
                return Next::Release;
            }
            Ok(n) => {
                conn.scratch.truncate(old + n);
                match conn.machine {
                    Machine::Server(ref mut parser) => {
                        if let Feed::Reply(resp) = parser.feed(&mut conn.scratch) {
                            let reader = MessageReader::response(resp).unwrap_or_else(|err| {
                                warn!("{}: couldn't build reply: {}", conn.peer, err);
                                MessageReader::error(500)
                            });
                            conn.reader = Some(reader);
                            conn.state = ConnState::WriteResponse;
                            conn.scratch.clear();
                            return Next::Switch(Interest::WRITABLE);
                        }
                    }
                    Machine::Client { ref mut parser, .. } => {
                        match parser.feed(&mut conn.scratch) {
                            Ok(Some(resp)) => {
                                conn.notify(Some(resp));
                                return Next::Release;
                            }
                            Ok(None) => {}
                            Err(err) => {
                                warn!("{}: bad response: {}", conn.peer, err);
                                return Next::Release;
                            }
                        }
                    }
                }
            }
            Err(ref err) if err.kind() == io::ErrorKind::WouldBlock => {
                conn.scratch.truncate(old);
                return Next::Keep;
            }
            Err(ref err) if err.kind() == io::ErrorKind::Interrupted => {
                conn.scratch.truncate(old);
            }
            Err(err) => {
                warn!("{}: read: {}", conn.peer, err);
                return Next::Release;
            }
        }
    }
}

/// Fairness cap: one huge transfer to a fast peer must not starve the
/// other connections on the same thread. After this many write syscalls
/// the socket is reregistered, which re-arms the edge and queues a fresh
/// writability event behind everyone else's.
const MAX_WRITES_PER_EVENT: usize = 8;

fn handle_writable(conn: &mut Connection) -> Next {
    if conn.is_reading() {
        return Next::Keep;
    }
    let sock_fd = conn.sock.as_raw_fd();
    let mut writes = 0;
    loop {
        let Some(reader) = conn.reader.as_mut() else {
            return Next::Release;
        };
        if !reader.has_chunks() {
            break;
        }
        if writes == MAX_WRITES_PER_EVENT {
            return Next::Switch(Interest::WRITABLE);
        }
        writes += 1;
        let res = match reader.chunk() {
            Chunk::Slice(s) => conn.sock.write(s),
            Chunk::File { fd, offset, len } => send_file(sock_fd, fd, offset, len),
        };
        match res {
            Ok(0) => return Next::Release,
            Ok(n) => reader.advance(n),
            Err(ref err) if err.kind() == io::ErrorKind::WouldBlock => return Next::Keep,
            Err(ref err) if err.kind() == io::ErrorKind::Interrupted => {}
            Err(err) => {
                warn!("{}: write: {}", conn.peer, err);
                return Next::Release;
            }
        }
    }

    // everything flushed
    match conn.state {
        ConnState::WriteResponse => {
            trace!("{}: response flushed", conn.peer);
            Next::Release
        }
        ConnState::WriteRequest => {
            conn.reader = None;
            conn.state = ConnState::ReadResponse;
            Next::Switch(Interest::READABLE)
        }
        ConnState::ReadRequest | ConnState::ReadResponse => Next::Keep,
    }
}

/// Zero-copy transmission of a file chunk. `sendfile` wants to advance the
/// offset itself; the reader keeps the authoritative cursor, so the local
/// copy is thrown away.
fn send_file(out: RawFd, fd: RawFd, offset: u64, len: u64) -> io::Result<usize> {
    let mut off = offset as libc::off_t;
    let sent = unsafe { libc::sendfile(out, fd, &mut off, len as usize) };
    if sent < 0 {
        Err(io::Error::last_os_error())
    } else {
        Ok(sent as usize)
    }
}

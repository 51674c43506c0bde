//! Server side: a listener thread accepting inbound connections and
//! spreading them round-robin over a fixed pool of reactor workers.

pub mod parser;
pub mod protocol;

pub use self::protocol::{Handle, Handler};

use std::io;
use std::net::{SocketAddr, TcpListener, ToSocketAddrs};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use log::{info, warn};
use mio::net::TcpStream;

use crate::connection::Connection;
use crate::server::parser::RequestParser;
use crate::worker::{Mailbox, Worker};

pub struct Server {
    running: Arc<AtomicBool>,
    acceptor: Option<thread::JoinHandle<()>>,
    workers: Vec<Worker>,
    local_addr: SocketAddr,
}

impl Server {
    /// Binds, spawns the worker pool and the acceptor thread. Every
    /// accepted socket is made non-blocking, wrapped into a fresh
    /// per-message connection and handed to the next worker in round-robin
    /// order.
    pub fn start<A: ToSocketAddrs>(
        addr: A,
        nworkers: usize,
        handler: Arc<dyn Handler>,
    ) -> io::Result<Server> {
        let listener = TcpListener::bind(addr)?;
        listener.set_nonblocking(true)?;
        let local_addr = listener.local_addr()?;

        let mut workers = Vec::new();
        for i in 0..nworkers.max(1) {
            workers.push(Worker::start(&format!("rill-srv-{}", i))?);
        }
        let mailboxes: Vec<Mailbox> = workers.iter().map(Worker::mailbox).collect();

        let running = Arc::new(AtomicBool::new(true));
        let acceptor_running = running.clone();
        let acceptor = thread::Builder::new()
            .name("rill-accept".to_string())
            .spawn(move || accept_loop(listener, mailboxes, handler, acceptor_running))?;

        info!("listening at {}", local_addr);
        Ok(Server {
            running,
            acceptor: Some(acceptor),
            workers,
            local_addr,
        })
    }

    /// The bound address, useful when the caller asked for port 0.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(acceptor) = self.acceptor.take() {
            let _ = acceptor.join();
        }
        for worker in &mut self.workers {
            worker.stop();
        }
    }
}

impl Drop for Server {
    fn drop(&mut self) {
        self.stop();
    }
}

fn accept_loop(
    listener: TcpListener,
    mailboxes: Vec<Mailbox>,
    handler: Arc<dyn Handler>,
    running: Arc<AtomicBool>,
) {
    let next = AtomicUsize::new(0);
    while running.load(Ordering::SeqCst) {
        match listener.accept() {
            Ok((sock, peer)) => {
                if let Err(err) = sock.set_nonblocking(true) {
                    warn!("{}: couldn't set non-blocking: {}", peer, err);
                    continue;
                }
                let parser = RequestParser::new(
                    handler.clone(),
                    peer.ip().to_string(),
                    peer.port(),
                );
                let conn = Connection::inbound(TcpStream::from_std(sock), peer, parser);
                let idx = next.fetch_add(1, Ordering::Relaxed) % mailboxes.len();
                mailboxes[idx].assign(conn);
            }
            Err(ref err) if err.kind() == io::ErrorKind::WouldBlock => {
                thread::sleep(Duration::from_millis(10));
            }
            Err(ref err) if err.kind() == io::ErrorKind::Interrupted => {}
            Err(err) => {
                warn!("accept: {}", err);
                thread::sleep(Duration::from_millis(10));
            }
        }
    }
}

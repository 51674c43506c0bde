//! Client side: resolve, connect, then let a reactor worker stream the
//! request out and parse the response back.

pub mod parser;

use std::io;
use std::net::{TcpStream as StdTcpStream, ToSocketAddrs};
use std::sync::atomic::{AtomicUsize, Ordering};

use log::warn;
use mio::net::TcpStream;

use crate::connection::{Connection, OnResponse};
use crate::message::{Request, Response};
use crate::reader::MessageReader;
use crate::worker::Worker;

pub struct Client {
    workers: Vec<Worker>,
    next: AtomicUsize,
}

impl Client {
    pub fn new(nworkers: usize) -> io::Result<Client> {
        let mut workers = Vec::new();
        for i in 0..nworkers.max(1) {
            workers.push(Worker::start(&format!("rill-cli-{}", i))?);
        }
        Ok(Client {
            workers,
            next: AtomicUsize::new(0),
        })
    }

    /// Sends one request. The callback fires exactly once: `Some(response)`
    /// on success, `None` on any failure from resolution to a malformed
    /// reply. Failures caught before the connection reaches a worker
    /// (resolution, connect, building the request) report on the calling
    /// thread; everything after that reports from the reactor thread that
    /// owns the connection, including at shutdown.
    pub fn send<F>(&self, req: Request, on_response: F)
    where
        F: FnOnce(Option<Response>) + Send + 'static,
    {
        let cb: OnResponse = Box::new(on_response);

        let addr = match (req.remote_host.as_str(), req.remote_port)
            .to_socket_addrs()
            .map(|mut addrs| addrs.next())
        {
            Ok(Some(addr)) => addr,
            Ok(None) | Err(_) => {
                warn!(
                    "couldn't resolve {}:{}",
                    req.remote_host, req.remote_port
                );
                cb(None);
                return;
            }
        };

        let sock = match StdTcpStream::connect(addr) {
            Ok(sock) => sock,
            Err(err) => {
                warn!("{}: connect: {}", addr, err);
                cb(None);
                return;
            }
        };
        if let Err(err) = sock.set_nonblocking(true) {
            warn!("{}: couldn't set non-blocking: {}", addr, err);
            cb(None);
            return;
        }

        let reader = match MessageReader::request(req) {
            Ok(reader) => reader,
            Err(err) => {
                warn!("{}: couldn't build request: {}", addr, err);
                cb(None);
                return;
            }
        };

        let conn = Connection::outbound(TcpStream::from_std(sock), addr, reader, cb);
        let idx = self.next.fetch_add(1, Ordering::Relaxed) % self.workers.len();
        self.workers[idx].assign(conn);
    }

    pub fn stop(&mut self) {
        for worker in &mut self.workers {
            worker.stop();
        }
    }
}

impl Drop for Client {
    fn drop(&mut self) {
        self.stop();
    }
}

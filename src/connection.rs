//! Per-socket mutable state.
//!
//! A connection is owned by exactly one worker for its whole life, so
//! nothing in here is synchronized. At any instant one state machine is
//! active: the inbound parser while reading, the bound reader while
//! writing. Dropping the connection closes the socket and releases every
//! owned buffer, and that is the only way any of it is released.

use std::net::SocketAddr;

use bytes::BytesMut;
use mio::net::TcpStream;

use crate::client::parser::ResponseParser;
use crate::message::Response;
use crate::reader::MessageReader;
use crate::server::parser::RequestParser;
use crate::INITIAL_BUF_SIZE;

pub type OnResponse = Box<dyn FnOnce(Option<Response>) + Send>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnState {
    ReadRequest,
    WriteResponse,
    WriteRequest,
    ReadResponse,
}

pub enum Machine {
    /// Inbound connection: parses requests, hooks attached at creation.
    Server(RequestParser),
    /// Outbound connection: parses the response and reports it exactly once.
    Client {
        parser: ResponseParser,
        on_response: Option<OnResponse>,
    },
}

pub struct Connection {
    pub sock: TcpStream,
    pub peer: SocketAddr,
    pub state: ConnState,
    pub scratch: BytesMut,
    pub machine: Machine,
    pub reader: Option<MessageReader>,
}

impl Connection {
    pub fn inbound(sock: TcpStream, peer: SocketAddr, parser: RequestParser) -> Connection {
        Connection {
            sock,
            peer,
            state: ConnState::ReadRequest,
            scratch: BytesMut::with_capacity(INITIAL_BUF_SIZE),
            machine: Machine::Server(parser),
            reader: None,
        }
    }

    pub fn outbound(
        sock: TcpStream,
        peer: SocketAddr,
        reader: MessageReader,
        on_response: OnResponse,
    ) -> Connection {
        Connection {
            sock,
            peer,
            state: ConnState::WriteRequest,
            scratch: BytesMut::with_capacity(INITIAL_BUF_SIZE),
            machine: Machine::Client {
                parser: ResponseParser::new(),
                on_response: Some(on_response),
            },
            reader: Some(reader),
        }
    }

    pub fn is_reading(&self) -> bool {
        matches!(self.state, ConnState::ReadRequest | ConnState::ReadResponse)
    }

    /// Target size of the next socket read: exact for a known body
    /// remainder, one scratch block for the line/header phases.
    pub fn read_hint(&self) -> usize {
        let buffered = self.scratch.len();
        match self.machine {
            Machine::Server(ref parser) => parser.read_hint(buffered),
            Machine::Client { ref parser, .. } => parser.read_hint(buffered),
        }
    }

    /// Reports the outcome to the client callback, at most once.
    pub fn notify(&mut self, resp: Option<Response>) {
        if let Machine::Client { ref mut on_response, .. } = self.machine {
            if let Some(cb) = on_response.take() {
                cb(resp);
            }
        }
    }
}

use anyhow::{anyhow, Context, Result};
use std::io::{self, ErrorKind, Read, Write};
use std::net::{SocketAddr, TcpStream};
use std::time::{Duration, Instant};
use tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tungstenite::http::header::{CONTENT_LENGTH, CONTENT_TYPE};
use tungstenite::http::{HeaderValue, StatusCode};
use tungstenite::{Message, WebSocket};

use super::{Delivery, ReactionSink};
use crate::decide::Reaction;
use crate::pipeline::StopSignal;

/// Overall budget for reading the upgrade request.
const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(5);
const CLOSE_DRAIN_TIMEOUT: Duration = Duration::from_millis(500);
const READ_POLL: Duration = Duration::from_millis(100);

/// Text-frame transport to one connected client.
pub trait MessageTransport: Send {
    fn send_text(&mut self, text: &str) -> Result<Delivery>;

    fn close(&mut self) -> Result<()>;
}

/// Serializes each payload reaction as one JSON text message.
pub struct StreamSink<T: MessageTransport> {
    transport: T,
    closed: bool,
    sent: u64,
}

impl<T: MessageTransport> StreamSink<T> {
    pub fn new(transport: T) -> Self {
        Self {
            transport,
            closed: false,
            sent: 0,
        }
    }

    pub fn sent(&self) -> u64 {
        self.sent
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }
}

impl<T: MessageTransport> ReactionSink for StreamSink<T> {
    fn name(&self) -> &'static str {
        "stream"
    }

    fn deliver(&mut self, reaction: &Reaction) -> Result<Delivery> {
        let Reaction::Payload(payload) = reaction else {
            return Ok(Delivery::Skipped);
        };
        if self.closed {
            return Ok(Delivery::Disconnected);
        }
        let text = payload.to_json()?;
        let delivery = self.transport.send_text(&text)?;
        match delivery {
            Delivery::Delivered => self.sent += 1,
            Delivery::Disconnected => self.closed = true,
            Delivery::Skipped => {}
        }
        Ok(delivery)
    }

    fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.transport.close()
    }
}

/// Blocking client socket whose reads can be bounded by a deadline.
///
/// While a deadline is set, reads poll in short slices so the stop signal is
/// seen promptly, and fail with `TimedOut` once the deadline passes no matter
/// how slowly the peer trickles bytes in.
pub struct ClientStream {
    inner: TcpStream,
    deadline: Option<Instant>,
    stop: Option<StopSignal>,
}

impl ClientStream {
    fn new(inner: TcpStream) -> Self {
        Self {
            inner,
            deadline: None,
            stop: None,
        }
    }

    fn bound_reads(&mut self, deadline: Instant, stop: Option<StopSignal>) {
        self.deadline = Some(deadline);
        self.stop = stop;
    }

    fn unbound_reads(&mut self) -> io::Result<()> {
        self.deadline = None;
        self.stop = None;
        self.inner.set_read_timeout(None)
    }
}

impl Read for ClientStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let Some(deadline) = self.deadline else {
            return self.inner.read(buf);
        };
        loop {
            if self.stop.as_ref().is_some_and(StopSignal::is_stopped) {
                return Err(io::Error::new(ErrorKind::ConnectionAborted, "server stopping"));
            }
            let now = Instant::now();
            if now >= deadline {
                return Err(io::Error::new(ErrorKind::TimedOut, "client read deadline passed"));
            }
            self.inner
                .set_read_timeout(Some((deadline - now).min(READ_POLL)))?;
            match self.inner.read(buf) {
                Err(err) if matches!(err.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => {}
                other => return other,
            }
        }
    }
}

impl Write for ClientStream {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.inner.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

/// Server side of a WebSocket over a blocking TCP stream.
pub struct WsTransport {
    socket: WebSocket<ClientStream>,
    peer: SocketAddr,
}

impl WsTransport {
    /// Complete the server handshake within `HANDSHAKE_TIMEOUT` overall.
    ///
    /// Requests for any path other than `path` get 404. Once the request is
    /// read, `admit` decides whether the client is served; a refusal is
    /// answered with 503 `{"error":"busy"}`. Aborts early when `stop` fires.
    pub fn accept<A>(
        stream: TcpStream,
        path: &str,
        send_timeout: Duration,
        stop: &StopSignal,
        admit: A,
    ) -> Result<Self>
    where
        A: FnOnce() -> bool,
    {
        let peer = stream.peer_addr()?;
        stream.set_nonblocking(false)?;
        stream.set_nodelay(true)?;
        stream.set_write_timeout(Some(send_timeout))?;
        let mut stream = ClientStream::new(stream);
        stream.bound_reads(Instant::now() + HANDSHAKE_TIMEOUT, Some(stop.clone()));

        let check_request = |request: &Request, response: Response| {
            if request.uri().path() != path {
                return Err(rejection(StatusCode::NOT_FOUND, r#"{"error":"not found"}"#));
            }
            if !admit() {
                log::warn!("WsTransport: rejecting {}: no free session", peer);
                return Err(rejection(
                    StatusCode::SERVICE_UNAVAILABLE,
                    r#"{"error":"busy"}"#,
                ));
            }
            Ok(response)
        };
        let mut socket = tungstenite::accept_hdr(stream, check_request)
            .map_err(|err| anyhow!("websocket handshake with {} failed: {}", peer, err))?;
        socket
            .get_mut()
            .unbound_reads()
            .context("failed to clear handshake read timeout")?;
        log::info!("WsTransport: client {} connected on {}", peer, path);
        Ok(Self { socket, peer })
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    fn drain_until_closed(&mut self) {
        self.socket
            .get_mut()
            .bound_reads(Instant::now() + CLOSE_DRAIN_TIMEOUT, None);
        while self.socket.read().is_ok() {}
    }
}

fn rejection(status: StatusCode, body: &str) -> ErrorResponse {
    let mut response = ErrorResponse::new(Some(body.to_string()));
    *response.status_mut() = status;
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    response
        .headers_mut()
        .insert(CONTENT_LENGTH, HeaderValue::from(body.len()));
    response
}

impl MessageTransport for WsTransport {
    fn send_text(&mut self, text: &str) -> Result<Delivery> {
        match self.socket.send(Message::Text(text.to_string())) {
            Ok(()) => Ok(Delivery::Delivered),
            Err(err) if is_disconnect(&err) => {
                log::info!("WsTransport: client {} disconnected: {}", self.peer, err);
                Ok(Delivery::Disconnected)
            }
            Err(err) => Err(anyhow!("send to {} failed: {}", self.peer, err)),
        }
    }

    fn close(&mut self) -> Result<()> {
        match self.socket.close(None) {
            Ok(()) => {}
            Err(err) if is_disconnect(&err) => return Ok(()),
            Err(err) => {
                log::debug!("WsTransport: close to {} failed: {}", self.peer, err);
                return Ok(());
            }
        }
        self.drain_until_closed();
        log::info!("WsTransport: closed connection to {}", self.peer);
        Ok(())
    }
}

fn is_disconnect(err: &tungstenite::Error) -> bool {
    match err {
        tungstenite::Error::ConnectionClosed | tungstenite::Error::AlreadyClosed => true,
        tungstenite::Error::Io(io) => matches!(
            io.kind(),
            ErrorKind::BrokenPipe
                | ErrorKind::ConnectionReset
                | ErrorKind::ConnectionAborted
                | ErrorKind::UnexpectedEof
        ),
        _ => false,
    }
}

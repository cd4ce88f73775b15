//! WebSocket game server.
//!
//! An accept loop on its own thread hands each client to a session thread.
//! Every session builds its own pipeline through a `SessionFactory`, attaches
//! a `StreamSink` over the client's socket and runs until a stop condition.
//! At most `max_sessions` run at once; extra clients get HTTP 503. Each
//! connection is handshaken on its own thread under one overall deadline, so
//! a slow or silent peer never holds the accept loop or a session slot.

use anyhow::{anyhow, Context, Result};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use crate::pipeline::{Pipeline, StopSignal};
use crate::sink::{MessageTransport, StreamSink, WsTransport};

/// Connections allowed to be mid-handshake beyond the session limit.
const MAX_PENDING_HANDSHAKES: usize = 16;

#[derive(Clone, Debug, PartialEq)]
pub struct ServerConfig {
    pub addr: String,
    /// WebSocket endpoint path.
    pub path: String,
    pub max_sessions: usize,
    /// Bound on a single message write.
    pub send_timeout: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            addr: "127.0.0.1:8000".to_string(),
            path: "/ws".to_string(),
            max_sessions: 1,
            send_timeout: Duration::from_millis(1000),
        }
    }
}

/// Builds a fresh pipeline (source, detector, strategy) for one client.
pub trait SessionFactory: Send + Sync {
    fn build(&self) -> Result<Pipeline>;
}

impl<F> SessionFactory for F
where
    F: Fn() -> Result<Pipeline> + Send + Sync,
{
    fn build(&self) -> Result<Pipeline> {
        self()
    }
}

#[derive(Debug)]
pub struct ServerHandle {
    pub addr: SocketAddr,
    stop: StopSignal,
    join: Option<JoinHandle<()>>,
}

impl ServerHandle {
    /// Signal every session and the accept loop, then wait for them.
    pub fn stop(mut self) -> Result<()> {
        self.stop.stop();
        if let Some(join) = self.join.take() {
            join.join()
                .map_err(|_| anyhow!("trigger server thread panicked"))?;
        }
        Ok(())
    }

    pub fn stop_signal(&self) -> StopSignal {
        self.stop.clone()
    }
}

pub struct TriggerServer {
    config: ServerConfig,
    factory: Arc<dyn SessionFactory>,
    stop: StopSignal,
}

impl TriggerServer {
    pub fn new<F: SessionFactory + 'static>(config: ServerConfig, factory: F) -> Self {
        Self {
            config,
            factory: Arc::new(factory),
            stop: StopSignal::new(),
        }
    }

    /// Share an existing stop signal, e.g. one wired to Ctrl-C.
    pub fn with_stop_signal(mut self, stop: StopSignal) -> Self {
        self.stop = stop;
        self
    }

    pub fn spawn(self) -> Result<ServerHandle> {
        if self.config.max_sessions == 0 {
            return Err(anyhow!("max_sessions must be >= 1"));
        }
        if !self.config.path.starts_with('/') {
            return Err(anyhow!("websocket path must start with '/'"));
        }
        let configured_addr: SocketAddr = self
            .config
            .addr
            .parse()
            .with_context(|| format!("invalid server address '{}'", self.config.addr))?;
        let listener = TcpListener::bind(configured_addr)
            .with_context(|| format!("failed to bind {}", configured_addr))?;
        let addr = listener.local_addr()?;
        if configured_addr.ip().is_loopback() && !addr.ip().is_loopback() {
            return Err(anyhow!(
                "server configured for loopback address '{}', but bound to non-loopback address '{}'",
                configured_addr,
                addr
            ));
        }
        listener.set_nonblocking(true)?;

        let stop = self.stop.clone();
        let config = self.config.clone();
        let factory = self.factory.clone();
        let join = std::thread::Builder::new()
            .name("trigger-accept".to_string())
            .spawn(move || {
                if let Err(err) = run_accept_loop(listener, config, factory, stop) {
                    log::error!("TriggerServer: accept loop stopped: {:#}", err);
                }
            })
            .context("failed to spawn accept thread")?;

        Ok(ServerHandle {
            addr,
            stop: self.stop,
            join: Some(join),
        })
    }
}

/// One unit of a bounded counter, released on drop.
struct Slot(Arc<AtomicUsize>);

impl Slot {
    fn claim(counter: &Arc<AtomicUsize>, limit: usize) -> Option<Self> {
        counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| (n < limit).then_some(n + 1))
            .ok()
            .map(|_| Self(counter.clone()))
    }
}

impl Drop for Slot {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

fn run_accept_loop(
    listener: TcpListener,
    config: ServerConfig,
    factory: Arc<dyn SessionFactory>,
    stop: StopSignal,
) -> Result<()> {
    let active = Arc::new(AtomicUsize::new(0));
    let connections = Arc::new(AtomicUsize::new(0));
    let connection_limit = config.max_sessions + MAX_PENDING_HANDSHAKES;
    let mut clients: Vec<JoinHandle<()>> = Vec::new();
    loop {
        if stop.is_stopped() {
            break;
        }
        clients.retain(|client| !client.is_finished());
        match listener.accept() {
            Ok((stream, peer)) => {
                let Some(connection) = Slot::claim(&connections, connection_limit) else {
                    log::warn!("TriggerServer: dropping {}: too many open connections", peer);
                    continue;
                };
                let active = active.clone();
                let config = config.clone();
                let factory = factory.clone();
                let stop = stop.clone();
                let spawned = std::thread::Builder::new()
                    .name(format!("client-{}", peer))
                    .spawn(move || {
                        let _connection = connection;
                        serve_client(stream, peer, &config, factory.as_ref(), &active, &stop);
                    });
                match spawned {
                    Ok(handle) => clients.push(handle),
                    Err(err) => log::error!("TriggerServer: failed to spawn client thread: {}", err),
                }
            }
            Err(err) if err.kind() == std::io::ErrorKind::WouldBlock => {
                std::thread::sleep(Duration::from_millis(50));
                continue;
            }
            Err(err) => return Err(err.into()),
        }
    }
    for client in clients {
        if client.join().is_err() {
            log::error!("TriggerServer: client thread panicked");
        }
    }
    Ok(())
}

/// Handshake, then run one session. A session slot is held only once the
/// upgrade request has been read in full.
fn serve_client(
    stream: TcpStream,
    peer: SocketAddr,
    config: &ServerConfig,
    factory: &dyn SessionFactory,
    active: &Arc<AtomicUsize>,
    stop: &StopSignal,
) {
    let mut session = None;
    let admit = || {
        session = Slot::claim(active, config.max_sessions);
        session.is_some()
    };
    let mut transport =
        match WsTransport::accept(stream, &config.path, config.send_timeout, stop, admit) {
            Ok(transport) => transport,
            Err(err) => {
                log::warn!("TriggerServer: {:#}", err);
                return;
            }
        };
    let _session = session;
    let pipeline = match factory.build() {
        Ok(pipeline) => pipeline,
        Err(err) => {
            log::error!("TriggerServer: session setup for {} failed: {:#}", peer, err);
            if let Err(err) = transport.close() {
                log::debug!("TriggerServer: close to {} failed: {:#}", peer, err);
            }
            return;
        }
    };
    let summary = pipeline
        .with_sink(Box::new(StreamSink::new(transport)))
        .run(stop);
    log::info!(
        "TriggerServer: session {} ended after {} frames: {}",
        peer,
        summary.frames,
        summary.reason
    );
}
